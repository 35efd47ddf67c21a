use anyhow::{Context, Result};
use std::path::Path;
use tabled::{Table, Tabled, settings::Style};

use larder_core::models::NewIngredient;
use larder_core::service::PlannerService;

use super::helpers::{exit_not_found, print_json, truncate};

pub(crate) fn cmd_ingredient_add(
    svc: &PlannerService,
    name: &str,
    category: &str,
    unit: &str,
    json: bool,
) -> Result<()> {
    let ingredient = svc.create_ingredient(&NewIngredient {
        name: name.to_string(),
        category: category.to_string(),
        default_unit: unit.to_string(),
    })?;
    if json {
        print_json(&ingredient)?;
    } else {
        let id = ingredient.id;
        let name = &ingredient.name;
        let category = &ingredient.category;
        println!("Added ingredient: {name} (id: {id}, category: {category})");
    }
    Ok(())
}

pub(crate) fn cmd_ingredient_list(svc: &PlannerService, search: Option<&str>, json: bool) -> Result<()> {
    let ingredients = svc.list_ingredients(search)?;
    if json {
        return print_json(&ingredients);
    }
    if ingredients.is_empty() {
        println!("No ingredients found.");
        return Ok(());
    }

    #[derive(Tabled)]
    struct IngredientRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Category")]
        category: String,
        #[tabled(rename = "Unit")]
        unit: String,
    }

    let rows: Vec<IngredientRow> = ingredients
        .iter()
        .map(|i| IngredientRow {
            id: i.id,
            name: truncate(&i.name, 35),
            category: i.category.clone(),
            unit: i.default_unit.clone(),
        })
        .collect();
    println!("{}", Table::new(&rows).with(Style::rounded()));
    Ok(())
}

pub(crate) fn cmd_ingredient_delete(svc: &PlannerService, name: &str, json: bool) -> Result<()> {
    let Some(ingredient) = svc.find_ingredient_by_name(name)? else {
        exit_not_found(&format!("Ingredient '{name}' not found"), json);
    };
    svc.delete_ingredient(ingredient.id)?;
    if json {
        println!("{}", serde_json::json!({ "deleted": ingredient.id }));
    } else {
        println!("Deleted ingredient: {}", ingredient.name);
    }
    Ok(())
}

pub(crate) fn cmd_ingredient_import(svc: &PlannerService, file: &Path, dry_run: bool, json: bool) -> Result<()> {
    let data = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let summary = svc.import_catalog_csv(&data, dry_run)?;
    if json {
        return print_json(&summary);
    }
    let prefix = if dry_run { "Would import" } else { "Imported" };
    println!(
        "{prefix} {} ingredients ({} already in the catalog, {} rows read)",
        summary.ingredients_created, summary.ingredients_reused, summary.rows_parsed
    );
    Ok(())
}
