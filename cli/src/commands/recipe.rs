use anyhow::{Context, Result};
use tabled::{Table, Tabled, settings::Style};

use larder_core::models::{NewRecipeIngredientUse, Recipe};
use larder_core::service::PlannerService;

use super::helpers::{
    exit_not_found, format_quantity, parse_base_servings, parse_quantity, print_json, truncate,
};

pub(super) fn resolve_recipe(svc: &PlannerService, name: &str) -> Result<Recipe> {
    svc.find_recipe_by_name(name)?
        .with_context(|| format!("Recipe '{name}' not found"))
}

pub(crate) fn cmd_recipe_create(
    svc: &PlannerService,
    name: &str,
    servings: Option<f64>,
    json: bool,
) -> Result<()> {
    let recipe = svc.create_recipe(name, servings)?;
    if json {
        print_json(&recipe)?;
    } else {
        let id = recipe.id;
        println!("Created recipe: {name} (id: {id})");
        println!("Add ingredients with: larder recipe add-ingredient \"{name}\" <ingredient> <quantity>");
    }
    Ok(())
}

/// A name found in the catalog links to that ingredient; anything else is
/// only accepted as a free-text use with `--unlinked`.
pub(crate) fn cmd_recipe_add_ingredient(
    svc: &PlannerService,
    recipe_name: &str,
    ingredient_name: &str,
    quantity_str: &str,
    preparation: Option<String>,
    unlinked: bool,
    json: bool,
) -> Result<()> {
    let recipe = resolve_recipe(svc, recipe_name)?;
    let (quantity, unit) = parse_quantity(quantity_str)?;

    let (ingredient_id, custom_name) = if unlinked {
        (None, Some(ingredient_name.to_string()))
    } else {
        let ingredient = svc.find_ingredient_by_name(ingredient_name)?.with_context(|| {
            format!(
                "Ingredient '{ingredient_name}' not in catalog. Add it with `larder ingredient add` or pass --unlinked"
            )
        })?;
        (Some(ingredient.id), None)
    };

    let added = svc.add_recipe_ingredient(
        recipe.id,
        &NewRecipeIngredientUse {
            ingredient_id,
            custom_name,
            quantity,
            unit,
            preparation,
        },
    )?;

    if json {
        print_json(&added)?;
    } else {
        let amount = format_quantity(added.quantity, &added.unit);
        println!("Added {amount} of {} to {recipe_name}", added.display_name());
    }
    Ok(())
}

pub(crate) fn cmd_recipe_remove_ingredient(
    svc: &PlannerService,
    recipe_name: &str,
    use_id: i64,
    json: bool,
) -> Result<()> {
    let recipe = resolve_recipe(svc, recipe_name)?;
    if !svc.remove_recipe_ingredient(recipe.id, use_id)? {
        exit_not_found(&format!("Ingredient line {use_id} not found in recipe"), json);
    }
    if json {
        println!("{}", serde_json::json!({ "removed": use_id }));
    } else {
        println!("Removed ingredient line {use_id} from {recipe_name}");
    }
    Ok(())
}

pub(crate) fn cmd_recipe_servings(
    svc: &PlannerService,
    recipe_name: &str,
    servings: &str,
    json: bool,
) -> Result<()> {
    let recipe = resolve_recipe(svc, recipe_name)?;
    let updated = svc.set_recipe_servings(recipe.id, parse_base_servings(servings)?)?;
    if json {
        print_json(&updated)?;
    } else {
        match updated.base_servings {
            Some(s) => println!("{recipe_name} now serves {s}"),
            None => println!("{recipe_name} quantities are now used unscaled"),
        }
    }
    Ok(())
}

pub(crate) fn cmd_recipe_show(svc: &PlannerService, recipe_name: &str, json: bool) -> Result<()> {
    let recipe = resolve_recipe(svc, recipe_name)?;
    let detail = svc.get_recipe_detail(recipe.id)?;

    if json {
        return print_json(&detail);
    }

    let name = &detail.recipe.name;
    println!("=== {name} ===");
    match detail.recipe.base_servings {
        Some(s) if s > 0.0 => println!("  Serves {s}\n"),
        _ => println!("  Quantities used as written\n"),
    }

    println!("  INGREDIENTS:");
    if detail.ingredients.is_empty() {
        println!("    (none)");
    }
    for ing in &detail.ingredients {
        let amount = format_quantity(ing.quantity, &ing.unit);
        let linked = if ing.ingredient_id.is_some() { "" } else { " (not in catalog)" };
        match &ing.preparation {
            Some(prep) => println!("    [{}] {} - {amount}, {prep}{linked}", ing.id, ing.display_name()),
            None => println!("    [{}] {} - {amount}{linked}", ing.id, ing.display_name()),
        }
    }
    Ok(())
}

pub(crate) fn cmd_recipe_list(svc: &PlannerService, json: bool) -> Result<()> {
    let recipes = svc.list_recipes()?;

    if json {
        return print_json(&recipes);
    }

    if recipes.is_empty() {
        println!("No recipes yet. Create one with: larder recipe create <name>");
        return Ok(());
    }

    #[derive(Tabled)]
    struct RecipeRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Serves")]
        servings: String,
    }

    let rows: Vec<RecipeRow> = recipes
        .iter()
        .map(|r| RecipeRow {
            id: r.id,
            name: truncate(&r.name, 40),
            servings: r.base_servings.map_or("-".into(), |s| format_quantity(s, "")),
        })
        .collect();
    println!("{}", Table::new(&rows).with(Style::rounded()));
    Ok(())
}

pub(crate) fn cmd_recipe_delete(svc: &PlannerService, recipe_name: &str, json: bool) -> Result<()> {
    let Some(recipe) = svc.find_recipe_by_name(recipe_name)? else {
        exit_not_found(&format!("Recipe '{recipe_name}' not found"), json);
    };
    svc.delete_recipe(recipe.id)?;
    if json {
        println!("{}", serde_json::json!({ "deleted": recipe.id }));
    } else {
        println!("Deleted recipe: {}", recipe.name);
    }
    Ok(())
}
