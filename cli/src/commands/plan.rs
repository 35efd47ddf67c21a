use std::collections::HashMap;

use anyhow::Result;
use chrono::Datelike;
use serde::Serialize;
use tabled::{Table, Tabled, settings::Style};

use larder_core::models::{DATE_FORMAT, Period, ScheduledMeal};
use larder_core::service::PlannerService;

use super::helpers::{exit_not_found, format_quantity, parse_date, print_json, truncate};
use super::recipe::resolve_recipe;

#[derive(Serialize)]
struct PlanView<'a> {
    period: &'a Period,
    end_date: String,
    meals: &'a [ScheduledMeal],
}

fn describe_meal(meal: &ScheduledMeal, recipe_names: &HashMap<i64, String>) -> String {
    if meal.skipped {
        return "(skipped)".to_string();
    }
    if let Some(name) = &meal.custom_name {
        return name.clone();
    }
    if meal.recipe_ids.is_empty() {
        return "-".to_string();
    }
    meal.recipe_ids
        .iter()
        .map(|id| recipe_names.get(id).map_or("?", String::as_str))
        .collect::<Vec<_>>()
        .join(", ")
}

pub(crate) fn cmd_plan_show(svc: &PlannerService, date: Option<String>, json: bool) -> Result<()> {
    let period = svc.get_or_create_period(parse_date(date)?)?;
    let meals = svc.list_meals(period.id)?;

    if json {
        return print_json(&PlanView {
            period: &period,
            end_date: period.end_date().format(DATE_FORMAT).to_string(),
            meals: &meals,
        });
    }

    let start = period.start_date.format(DATE_FORMAT);
    let end = period.end_date().format(DATE_FORMAT);
    println!("=== Week of {start} to {end} ===");
    if meals.is_empty() {
        println!("Nothing planned. Add a meal with: larder plan add <date> <meal> --recipe <name>");
        return Ok(());
    }

    let recipe_names: HashMap<i64, String> = svc
        .list_recipes()?
        .into_iter()
        .map(|r| (r.id, r.name))
        .collect();

    #[derive(Tabled)]
    struct MealRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Day")]
        day: String,
        #[tabled(rename = "Meal")]
        meal_type: String,
        #[tabled(rename = "Servings")]
        servings: String,
        #[tabled(rename = "What")]
        what: String,
    }

    let rows: Vec<MealRow> = meals
        .iter()
        .map(|m| {
            let date = period.day_date(m.day);
            MealRow {
                id: m.id,
                day: format!("{} {}", date.weekday(), date.format("%m-%d")),
                meal_type: m.meal_type.clone(),
                servings: format_quantity(m.servings, ""),
                what: truncate(&describe_meal(m, &recipe_names), 45),
            }
        })
        .collect();
    println!("{}", Table::new(&rows).with(Style::rounded()));
    Ok(())
}

pub(crate) fn cmd_plan_add(
    svc: &PlannerService,
    date: Option<String>,
    meal_type: &str,
    servings: f64,
    recipes: &[String],
    name: Option<&str>,
    json: bool,
) -> Result<()> {
    let date = parse_date(date)?;
    let resolved = recipes
        .iter()
        .map(|r| resolve_recipe(svc, r))
        .collect::<Result<Vec<_>>>()?;

    let period = svc.get_or_create_period(date)?;
    let day = (date - period.start_date).num_days();
    let mut meal = svc.schedule_meal(period.id, day, meal_type, servings)?;
    for recipe in &resolved {
        meal = svc.assign_recipe(meal.id, recipe.id)?;
    }
    if let Some(name) = name {
        meal = svc.set_meal_custom_name(meal.id, Some(name))?;
    }

    if json {
        print_json(&meal)?;
    } else {
        let id = meal.id;
        let meal_type = &meal.meal_type;
        let date = date.format(DATE_FORMAT);
        println!("Planned {meal_type} on {date} for {servings} (meal id: {id})");
    }
    Ok(())
}

pub(crate) fn cmd_plan_assign(svc: &PlannerService, meal_id: i64, recipe_name: &str, json: bool) -> Result<()> {
    let recipe = resolve_recipe(svc, recipe_name)?;
    let meal = svc.assign_recipe(meal_id, recipe.id)?;
    if json {
        print_json(&meal)?;
    } else {
        println!("Added {recipe_name} to meal {meal_id}");
    }
    Ok(())
}

pub(crate) fn cmd_plan_unassign(svc: &PlannerService, meal_id: i64, recipe_name: &str, json: bool) -> Result<()> {
    let recipe = resolve_recipe(svc, recipe_name)?;
    if !svc.unassign_recipe(meal_id, recipe.id)? {
        exit_not_found(&format!("{recipe_name} is not part of meal {meal_id}"), json);
    }
    if json {
        print_json(&svc.get_meal(meal_id)?)?;
    } else {
        println!("Removed {recipe_name} from meal {meal_id}");
    }
    Ok(())
}

pub(crate) fn cmd_plan_name(svc: &PlannerService, meal_id: i64, name: Option<&str>, json: bool) -> Result<()> {
    let meal = svc.set_meal_custom_name(meal_id, name)?;
    if json {
        print_json(&meal)?;
    } else {
        match &meal.custom_name {
            Some(name) => println!("Meal {meal_id} is now '{name}'"),
            None => println!("Cleared the name of meal {meal_id}"),
        }
    }
    Ok(())
}

pub(crate) fn cmd_plan_skip(svc: &PlannerService, meal_id: i64, undo: bool, json: bool) -> Result<()> {
    let meal = svc.skip_meal(meal_id, !undo)?;
    if json {
        print_json(&meal)?;
    } else if undo {
        println!("Meal {meal_id} is no longer skipped");
    } else {
        println!("Skipped meal {meal_id}");
    }
    Ok(())
}

pub(crate) fn cmd_plan_servings(svc: &PlannerService, meal_id: i64, servings: f64, json: bool) -> Result<()> {
    let meal = svc.set_meal_servings(meal_id, servings)?;
    if json {
        print_json(&meal)?;
    } else {
        println!("Meal {meal_id} now serves {servings}");
    }
    Ok(())
}

pub(crate) fn cmd_plan_remove(svc: &PlannerService, meal_id: i64, json: bool) -> Result<()> {
    if !svc.delete_meal(meal_id)? {
        exit_not_found(&format!("Meal {meal_id} not found"), json);
    }
    if json {
        println!("{}", serde_json::json!({ "deleted": meal_id }));
    } else {
        println!("Removed meal {meal_id}");
    }
    Ok(())
}
