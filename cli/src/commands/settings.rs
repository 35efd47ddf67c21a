use anyhow::Result;

use larder_core::models::parse_weekday;
use larder_core::service::PlannerService;

/// Show the first day of new planning weeks, or change it.
pub(crate) fn cmd_settings_week_start(svc: &PlannerService, day: Option<&str>, json: bool) -> Result<()> {
    if let Some(day) = day {
        svc.set_week_start(parse_weekday(day)?)?;
    }
    let week_start = svc.week_start()?;
    if json {
        println!("{}", serde_json::json!({ "week_start": week_start.to_string() }));
    } else if day.is_some() {
        println!("New weeks start on {week_start}. Existing weeks keep their dates.");
    } else {
        println!("Weeks start on {week_start}");
    }
    Ok(())
}
