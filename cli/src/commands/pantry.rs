use anyhow::Result;

use larder_core::grouping::{ListView, group_by_category};
use larder_core::service::PlannerService;

use super::helpers::{parse_range, print_grouped_table, print_json, resolve_group_key};

pub(crate) fn cmd_pantry_show(svc: &PlannerService, from: Option<String>, weeks: u32, json: bool) -> Result<()> {
    let (from, to) = parse_range(svc, from, weeks)?;
    let groups = svc.grouped_view(from, to, ListView::PantryCheck)?;
    if json {
        return print_json(&groups);
    }
    if groups.is_empty() {
        println!("Nothing to check. Generate the list first: larder list generate");
        return Ok(());
    }
    let pending = groups
        .iter()
        .filter(|g| g.members.iter().any(|e| !e.pantry_checked))
        .count();
    println!("Pantry check {from} to {to} ({pending} not yet checked)");
    print_grouped_table(&group_by_category(groups), false);
    println!("\nMark items with: larder pantry have <key> / larder pantry need <key>");
    Ok(())
}

pub(crate) fn cmd_pantry_set(
    svc: &PlannerService,
    item: &str,
    in_pantry: bool,
    from: Option<String>,
    weeks: u32,
    json: bool,
) -> Result<()> {
    let (from, to) = parse_range(svc, from, weeks)?;
    let key = resolve_group_key(svc, item)?;
    let group = svc.set_group_in_pantry(from, to, &key, in_pantry)?;
    if json {
        return print_json(&group);
    }
    let name = &group.name;
    if in_pantry {
        println!("{name}: already have it");
    } else {
        println!("{name}: added to the shopping list");
    }
    Ok(())
}

pub(crate) fn cmd_pantry_remaining(svc: &PlannerService, from: Option<String>, weeks: u32, json: bool) -> Result<()> {
    let (from, to) = parse_range(svc, from, weeks)?;
    let marked = svc.mark_all_remaining_as_needed_in_range(from, to)?;
    if json {
        println!("{}", serde_json::json!({ "marked_needed": marked }));
    } else {
        println!("Moved {marked} unchecked items to the shopping list");
    }
    Ok(())
}

pub(crate) fn cmd_pantry_sync(svc: &PlannerService, from: Option<String>, weeks: u32, json: bool) -> Result<()> {
    let (from, to) = parse_range(svc, from, weeks)?;
    let updated = svc.sync_pantry_state(from, to)?;
    if json {
        println!("{}", serde_json::json!({ "updated": updated }));
    } else {
        println!("Updated {updated} entries to match their row's pantry state");
    }
    Ok(())
}
