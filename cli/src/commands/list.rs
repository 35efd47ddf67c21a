use anyhow::Result;

use larder_core::models::DATE_FORMAT;
use larder_core::service::PlannerService;

use super::helpers::{exit_not_found, parse_date, parse_quantity, print_entry_table, print_json};

pub(crate) fn cmd_list_generate(svc: &PlannerService, date: Option<String>, json: bool) -> Result<()> {
    let period = svc.get_or_create_period(parse_date(date)?)?;
    let summary = svc.generate_list_for_period(period.id)?;

    if json {
        return print_json(&summary);
    }
    let start = period.start_date.format(DATE_FORMAT);
    if summary.created + summary.updated + summary.removed == 0 {
        println!("Grocery list for the week of {start} is up to date");
    } else {
        println!(
            "Grocery list for the week of {start}: {} added, {} updated, {} removed",
            summary.created, summary.updated, summary.removed
        );
    }
    if summary.duplicates_removed > 0 {
        println!("Merged {} duplicate entries", summary.duplicates_removed);
    }
    let pending = svc.pantry_check_items(period.id)?;
    let unchecked = pending.iter().filter(|e| !e.pantry_checked).count();
    if unchecked > 0 {
        println!("{unchecked} items to check against the pantry: larder pantry show");
    }
    Ok(())
}

pub(crate) fn cmd_list_show(svc: &PlannerService, date: Option<String>, json: bool) -> Result<()> {
    let period = svc.get_or_create_period(parse_date(date)?)?;
    let entries = svc.list_entries(period.id)?;
    if json {
        return print_json(&entries);
    }
    if entries.is_empty() {
        println!("The list is empty. Generate it with: larder list generate");
        return Ok(());
    }
    println!("=== Week of {} ===", period.start_date.format(DATE_FORMAT));
    print_entry_table(&entries);
    Ok(())
}

pub(crate) fn cmd_list_cleanup(svc: &PlannerService, json: bool) -> Result<()> {
    let removed = svc.cleanup_orphaned_entries()?;
    if json {
        println!("{}", serde_json::json!({ "removed": removed }));
    } else if removed == 0 {
        println!("No orphaned entries");
    } else {
        println!("Removed {removed} orphaned entries");
    }
    Ok(())
}

pub(crate) fn cmd_list_add(
    svc: &PlannerService,
    name: &str,
    quantity: &str,
    category: &str,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    let (quantity, unit) = parse_quantity(quantity)?;
    let period = svc.get_or_create_period(parse_date(date)?)?;
    let entry = svc.add_manual_entry(Some(period.id), name, quantity, &unit, category)?;
    if json {
        print_json(&entry)?;
    } else {
        println!("Added {} to the shopping list (id: {})", entry.display_name(), entry.id);
    }
    Ok(())
}

pub(crate) fn cmd_list_delete(svc: &PlannerService, entry_id: i64, json: bool) -> Result<()> {
    if !svc.delete_entry(entry_id)? {
        exit_not_found(&format!("List entry {entry_id} not found"), json);
    }
    if json {
        println!("{}", serde_json::json!({ "deleted": entry_id }));
    } else {
        println!("Deleted list entry {entry_id}");
    }
    Ok(())
}
