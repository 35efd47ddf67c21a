use anyhow::Result;

use larder_core::grouping::{ListView, group_by_category};
use larder_core::service::PlannerService;

use super::helpers::{format_quantity, parse_range, print_grouped_table, print_json, resolve_group_key};

pub(crate) fn cmd_shop_show(
    svc: &PlannerService,
    from: Option<String>,
    weeks: u32,
    remaining: bool,
    json: bool,
) -> Result<()> {
    let (from, to) = parse_range(svc, from, weeks)?;
    let mut groups = svc.grouped_view(from, to, ListView::Shopping)?;
    if remaining {
        groups.retain(|g| !g.all_checked);
    }
    if json {
        return print_json(&groups);
    }
    if groups.is_empty() {
        println!("Shopping list for {from} to {to} is empty");
        return Ok(());
    }
    let left = groups.iter().filter(|g| !g.all_checked).count();
    println!("Shopping list {from} to {to} ({left} of {} left)", groups.len());
    print_grouped_table(&group_by_category(groups), true);
    Ok(())
}

pub(crate) fn cmd_shop_check(
    svc: &PlannerService,
    item: &str,
    checked: bool,
    by: Option<&str>,
    from: Option<String>,
    weeks: u32,
    json: bool,
) -> Result<()> {
    let (from, to) = parse_range(svc, from, weeks)?;
    let key = resolve_group_key(svc, item)?;
    let group = svc.set_group_checked(from, to, &key, checked, by)?;
    if json {
        return print_json(&group);
    }
    let amount = format_quantity(group.total_quantity, &group.unit);
    if checked {
        println!("Bought {} ({amount})", group.name);
    } else {
        println!("{} is back on the list ({amount})", group.name);
    }
    Ok(())
}
