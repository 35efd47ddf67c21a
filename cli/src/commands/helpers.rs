use anyhow::{Context, Result, bail};
use chrono::{Duration, Local, NaiveDate};
use serde::Serialize;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use larder_core::grouping::{EntryGroup, GroupKey};
use larder_core::models::{DATE_FORMAT, ListEntry, PERIOD_DAYS, normalize_name};
use larder_core::service::PlannerService;
use larder_core::units::NormalizedQuantity;

pub(crate) fn parse_date(date_str: Option<String>) -> Result<NaiveDate> {
    match date_str {
        None => Ok(Local::now().date_naive()),
        Some(s) => match s.as_str() {
            "today" => Ok(Local::now().date_naive()),
            "yesterday" => Ok(Local::now().date_naive() - Duration::days(1)),
            "tomorrow" => Ok(Local::now().date_naive() + Duration::days(1)),
            _ => NaiveDate::parse_from_str(&s, DATE_FORMAT).with_context(|| {
                format!("Invalid date '{s}'. Use YYYY-MM-DD or today/yesterday/tomorrow")
            }),
        },
    }
}

/// `weeks` whole weeks starting at the week containing `from`, inclusive on
/// both ends.
pub(crate) fn parse_range(
    svc: &PlannerService,
    from: Option<String>,
    weeks: u32,
) -> Result<(NaiveDate, NaiveDate)> {
    if weeks == 0 {
        bail!("--weeks must be at least 1");
    }
    let from = svc.get_or_create_period(parse_date(from)?)?.start_date;
    let to = from + Duration::days(i64::from(weeks) * PERIOD_DAYS - 1);
    Ok((from, to))
}

/// Split "500g", "1.5 kg" or "3" into a quantity and a (possibly empty) unit.
pub(crate) fn parse_quantity(s: &str) -> Result<(f64, String)> {
    let s = s.trim();
    let idx = s
        .find(|c: char| c.is_alphabetic() || c.is_whitespace())
        .unwrap_or(s.len());
    let (num_part, unit_part) = s.split_at(idx);
    let quantity: f64 = num_part
        .parse()
        .with_context(|| format!("Invalid quantity '{s}'. Use a number like '500g' or '2 cups'"))?;
    if !quantity.is_finite() || quantity <= 0.0 {
        bail!("Quantity must be greater than 0");
    }
    Ok((quantity, unit_part.trim().to_lowercase()))
}

/// Base servings argument: a positive number, or `none` to clear.
pub(crate) fn parse_base_servings(s: &str) -> Result<Option<f64>> {
    if s.eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    let value: f64 = s
        .trim()
        .parse()
        .with_context(|| format!("Invalid servings '{s}'. Use a number or 'none'"))?;
    Ok(Some(value))
}

/// Accept a row key as printed by the list views, or a plain item name.
pub(crate) fn resolve_group_key(svc: &PlannerService, s: &str) -> Result<GroupKey> {
    if let Ok(key) = s.parse::<GroupKey>() {
        return Ok(key);
    }
    if s.trim().is_empty() {
        bail!("Item name must not be empty");
    }
    Ok(match svc.find_ingredient_by_name(s)? {
        Some(ingredient) => GroupKey::ByIngredient(ingredient.id),
        None => GroupKey::ByManualName(normalize_name(s)),
    })
}

pub(crate) fn format_quantity(quantity: f64, unit: &str) -> String {
    let quantity = no_neg_zero(quantity);
    let number = if (quantity - quantity.round()).abs() < 1e-9 {
        format!("{quantity:.0}")
    } else {
        let s = format!("{quantity:.2}");
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    };
    if unit.is_empty() {
        number
    } else {
        format!("{number} {unit}")
    }
}

/// "20 g + 3 cloves" for amounts that could not be summed.
pub(crate) fn quantity_with_extras(quantity: f64, unit: &str, extras: &[NormalizedQuantity]) -> String {
    let mut text = format_quantity(quantity, unit);
    for extra in extras {
        text.push_str(" + ");
        text.push_str(&format_quantity(extra.quantity, &extra.unit));
    }
    text
}

pub(crate) fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub(crate) fn print_entry_table(entries: &[ListEntry]) {
    #[derive(Tabled)]
    struct EntryRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Item")]
        name: String,
        #[tabled(rename = "Quantity")]
        quantity: String,
        #[tabled(rename = "Category")]
        category: String,
        #[tabled(rename = "State")]
        state: String,
        #[tabled(rename = "Source")]
        source: &'static str,
    }

    let rows: Vec<EntryRow> = entries
        .iter()
        .map(|e| EntryRow {
            id: e.id,
            name: truncate(e.display_name(), 35),
            quantity: quantity_with_extras(e.quantity, &e.unit, &e.unreconciled),
            category: e.category.clone(),
            state: e.state().to_string(),
            source: if e.is_manual { "manual" } else { "plan" },
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(2..3)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}

pub(crate) fn print_grouped_table(categories: &[(String, Vec<EntryGroup>)], show_checked: bool) {
    #[derive(Tabled)]
    struct GroupRow {
        #[tabled(rename = "Key")]
        key: String,
        #[tabled(rename = "Item")]
        name: String,
        #[tabled(rename = "Quantity")]
        quantity: String,
        #[tabled(rename = "Weeks")]
        periods: usize,
        #[tabled(rename = "Status")]
        status: &'static str,
    }

    for (category, groups) in categories {
        println!("\n  {}", category.to_uppercase());
        let rows: Vec<GroupRow> = groups
            .iter()
            .map(|g| {
                let quantity = quantity_with_extras(g.total_quantity, &g.unit, &g.unreconciled);
                let status = if show_checked {
                    if g.all_checked { "bought" } else { "" }
                } else if g.any_in_pantry {
                    "have"
                } else if g.members.iter().all(|e| e.pantry_checked) {
                    "need"
                } else {
                    "?"
                };
                GroupRow {
                    key: g.key.to_string(),
                    name: truncate(&g.name, 35),
                    quantity,
                    periods: g.period_ids.len(),
                    status,
                }
            })
            .collect();

        let table = Table::new(&rows)
            .with(Style::rounded())
            .with(Modify::new(Columns::new(2..3)).with(Alignment::right()))
            .to_string();
        println!("{table}");
    }
}

pub(crate) fn json_error(message: &str) -> String {
    #[derive(Serialize)]
    struct CliError<'a> {
        error: &'a str,
    }
    serde_json::to_string(&CliError { error: message })
        .unwrap_or_else(|_| format!("{{\"error\":\"{message}\"}}"))
}

/// Report a missing target and exit with status 2.
pub(crate) fn exit_not_found(message: &str, json: bool) -> ! {
    if json {
        println!("{}", json_error(message));
    } else {
        eprintln!("{message}");
    }
    std::process::exit(2);
}

pub(crate) fn no_neg_zero(v: f64) -> f64 {
    if v == 0.0 { 0.0 } else { v }
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let end = s.char_indices().nth(max - 3).map_or(s.len(), |(i, _)| i);
        format!("{}...", &s[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_date_none() {
        let today = Local::now().date_naive();
        assert_eq!(parse_date(None).unwrap(), today);
    }

    #[test]
    fn test_parse_date_keywords() {
        let today = Local::now().date_naive();
        assert_eq!(parse_date(Some("today".to_string())).unwrap(), today);
        assert_eq!(
            parse_date(Some("tomorrow".to_string())).unwrap(),
            today + Duration::days(1)
        );
    }

    #[test]
    fn test_parse_date_iso() {
        let date = parse_date(Some("2024-01-15".to_string())).unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
        assert!(parse_date(Some("nope".to_string())).is_err());
    }

    #[test]
    fn test_parse_range_snaps_to_week_start() {
        let svc = PlannerService::new_in_memory().unwrap();
        let (from, to) = parse_range(&svc, Some("2024-06-12".to_string()), 2).unwrap();
        assert_eq!(from, NaiveDate::from_ymd_opt(2024, 6, 10).unwrap());
        assert_eq!(to, NaiveDate::from_ymd_opt(2024, 6, 23).unwrap());
        assert!(parse_range(&svc, None, 0).is_err());
    }

    #[test]
    fn test_parse_quantity() {
        let (q, unit) = parse_quantity("500g").unwrap();
        assert!((q - 500.0).abs() < f64::EPSILON);
        assert_eq!(unit, "g");

        let (q, unit) = parse_quantity("1.5 KG").unwrap();
        assert!((q - 1.5).abs() < f64::EPSILON);
        assert_eq!(unit, "kg");

        let (q, unit) = parse_quantity("3").unwrap();
        assert!((q - 3.0).abs() < f64::EPSILON);
        assert_eq!(unit, "");

        let (_, unit) = parse_quantity("2 fl oz").unwrap();
        assert_eq!(unit, "fl oz");
    }

    #[test]
    fn test_parse_quantity_invalid() {
        assert!(parse_quantity("abc").is_err());
        assert!(parse_quantity("0g").is_err());
        assert!(parse_quantity("-5 g").is_err());
    }

    #[test]
    fn test_parse_base_servings() {
        assert_eq!(parse_base_servings("none").unwrap(), None);
        assert_eq!(parse_base_servings("4").unwrap(), Some(4.0));
        assert!(parse_base_servings("lots").is_err());
    }

    #[test]
    fn test_resolve_group_key() {
        let svc = PlannerService::new_in_memory().unwrap();
        let rice = svc
            .create_ingredient(&larder_core::models::NewIngredient {
                name: "Rice".to_string(),
                category: "pantry".to_string(),
                default_unit: "g".to_string(),
            })
            .unwrap();
        assert_eq!(
            resolve_group_key(&svc, "ingredient:7").unwrap(),
            GroupKey::ByIngredient(7)
        );
        assert_eq!(
            resolve_group_key(&svc, "rice").unwrap(),
            GroupKey::ByIngredient(rice.id)
        );
        assert_eq!(
            resolve_group_key(&svc, "Paper Towels").unwrap(),
            GroupKey::ByManualName("paper towels".to_string())
        );
        assert!(resolve_group_key(&svc, " ").is_err());
    }

    #[test]
    fn test_format_quantity() {
        assert_eq!(format_quantity(500.0, "g"), "500 g");
        assert_eq!(format_quantity(1.25, "l"), "1.25 l");
        assert_eq!(format_quantity(0.5, ""), "0.5");
        assert_eq!(format_quantity(-0.0, "pcs"), "0 pcs");
    }

    #[test]
    fn test_quantity_with_extras() {
        let cloves = NormalizedQuantity {
            quantity: 3.0,
            unit: "cloves".to_string(),
        };
        assert_eq!(quantity_with_extras(20.0, "g", &[cloves]), "20 g + 3 cloves");
        assert_eq!(quantity_with_extras(20.0, "g", &[]), "20 g");
    }

    #[test]
    fn test_truncate_utf8() {
        assert_eq!(truncate("Crème fraîche", 10), "Crème f...");
        assert_eq!(truncate("Müsli", 10), "Müsli");
    }
}
