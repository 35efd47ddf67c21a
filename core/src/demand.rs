use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, warn};

use crate::models::{DEFAULT_CATEGORY, RecipeDetail, ScheduledMeal};
use crate::units::{self, NormalizedQuantity};

/// Total need for one ingredient across a period's planned meals.
#[derive(Debug, Clone, Serialize)]
pub struct AggregateDemand {
    pub ingredient_id: i64,
    pub ingredient_name: String,
    pub category: String,
    pub quantity: f64,
    pub unit: String,
    /// Meals that contributed, in first-contribution order.
    pub meal_ids: Vec<i64>,
    /// Amounts whose unit could not be summed into `unit`, one total per
    /// unit, sorted by unit.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unreconciled: Vec<NormalizedQuantity>,
}

/// Scale a recipe quantity to the servings planned for a meal. Without a
/// positive base serving count the quantity is used as written.
#[must_use]
pub fn scale_quantity(quantity: f64, meal_servings: f64, base_servings: Option<f64>) -> f64 {
    match base_servings {
        Some(base) if base > 0.0 && base.is_finite() => quantity * (meal_servings / base),
        _ => quantity,
    }
}

/// Walk the scheduled meals and sum every linked ingredient's scaled quantity.
///
/// Skipped meals, meals without recipes, recipes missing from `recipes`, and
/// recipe uses without a linked ingredient contribute nothing. Output order
/// follows the first time each ingredient is seen.
#[must_use]
pub fn aggregate_demand(
    meals: &[ScheduledMeal],
    recipes: &HashMap<i64, RecipeDetail>,
) -> Vec<AggregateDemand> {
    let mut demands: Vec<AggregateDemand> = Vec::new();
    let mut index: HashMap<i64, usize> = HashMap::new();

    for meal in meals.iter().filter(|m| m.contributes_demand()) {
        for recipe_id in &meal.recipe_ids {
            let Some(detail) = recipes.get(recipe_id) else {
                debug!(meal_id = meal.id, recipe_id, "recipe missing, skipping");
                continue;
            };

            for ingredient_use in &detail.ingredients {
                let Some(ingredient_id) = ingredient_use.ingredient_id else {
                    continue;
                };

                let scaled = scale_quantity(
                    ingredient_use.quantity,
                    meal.servings,
                    detail.recipe.base_servings,
                );
                let amount = units::normalize(scaled, &ingredient_use.unit);

                if let Some(&i) = index.get(&ingredient_id) {
                    let demand = &mut demands[i];
                    let first = NormalizedQuantity {
                        quantity: demand.quantity,
                        unit: demand.unit.clone(),
                    };
                    if units::compatible(&first, &amount) {
                        demand.quantity += amount.quantity;
                    } else {
                        warn!(
                            ingredient_id,
                            expected = %demand.unit,
                            found = %amount.unit,
                            "incompatible units for ingredient, not summed"
                        );
                        units::accumulate(&mut demand.unreconciled, amount);
                    }
                    if !demand.meal_ids.contains(&meal.id) {
                        demand.meal_ids.push(meal.id);
                    }
                } else {
                    index.insert(ingredient_id, demands.len());
                    demands.push(AggregateDemand {
                        ingredient_id,
                        ingredient_name: ingredient_use.display_name().to_string(),
                        category: ingredient_use
                            .category
                            .clone()
                            .unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
                        quantity: amount.quantity,
                        unit: amount.unit,
                        meal_ids: vec![meal.id],
                        unreconciled: Vec::new(),
                    });
                }
            }
        }
    }

    for demand in &mut demands {
        demand.unreconciled.sort_by(|a, b| a.unit.cmp(&b.unit));
    }
    debug!(ingredients = demands.len(), "aggregated demand");
    demands
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Recipe, RecipeIngredientUse};

    fn recipe(id: i64, base_servings: Option<f64>, uses: Vec<RecipeIngredientUse>) -> RecipeDetail {
        RecipeDetail {
            recipe: Recipe {
                id,
                uuid: String::new(),
                name: format!("Recipe {id}"),
                base_servings,
                created_at: String::new(),
                updated_at: String::new(),
            },
            ingredients: uses,
        }
    }

    fn linked(recipe_id: i64, ingredient_id: i64, name: &str, quantity: f64, unit: &str) -> RecipeIngredientUse {
        RecipeIngredientUse {
            id: 0,
            uuid: String::new(),
            recipe_id,
            ingredient_id: Some(ingredient_id),
            custom_name: None,
            quantity,
            unit: unit.to_string(),
            sort_index: 0,
            preparation: None,
            ingredient_name: Some(name.to_string()),
            category: Some("pantry".to_string()),
        }
    }

    fn meal(id: i64, servings: f64, recipe_ids: Vec<i64>) -> ScheduledMeal {
        ScheduledMeal {
            id,
            uuid: String::new(),
            period_id: 1,
            day: 0,
            meal_type: "dinner".to_string(),
            servings,
            recipe_ids,
            custom_name: None,
            skipped: false,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[test]
    fn test_scale_quantity() {
        assert!((scale_quantity(500.0, 4.0, Some(2.0)) - 1000.0).abs() < f64::EPSILON);
        assert!((scale_quantity(500.0, 1.0, Some(4.0)) - 125.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_scale_quantity_without_base_servings() {
        assert!((scale_quantity(500.0, 4.0, None) - 500.0).abs() < f64::EPSILON);
        assert!((scale_quantity(500.0, 4.0, Some(0.0)) - 500.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_rice_example() {
        let recipes = HashMap::from([(1, recipe(1, Some(2.0), vec![linked(1, 10, "Rice", 500.0, "g")]))]);
        let demand = aggregate_demand(&[meal(100, 4.0, vec![1])], &recipes);
        assert_eq!(demand.len(), 1);
        assert_eq!(demand[0].ingredient_id, 10);
        assert_eq!(demand[0].ingredient_name, "Rice");
        assert!((demand[0].quantity - 1000.0).abs() < 1e-9);
        assert_eq!(demand[0].unit, "g");
        assert_eq!(demand[0].meal_ids, vec![100]);
    }

    #[test]
    fn test_sums_across_meals_and_recipes() {
        let recipes = HashMap::from([
            (1, recipe(1, Some(2.0), vec![linked(1, 10, "Rice", 200.0, "g")])),
            (2, recipe(2, Some(4.0), vec![
                linked(2, 10, "Rice", 0.4, "kg"),
                linked(2, 11, "Onion", 2.0, "pcs"),
            ])),
        ]);
        let meals = vec![meal(100, 2.0, vec![1]), meal(101, 2.0, vec![1, 2])];
        let demand = aggregate_demand(&meals, &recipes);

        assert_eq!(demand.len(), 2);
        // 200 + 200 + 400 * 2/4
        assert!((demand[0].quantity - 600.0).abs() < 1e-9);
        assert_eq!(demand[0].meal_ids, vec![100, 101]);
        assert_eq!(demand[1].ingredient_name, "Onion");
        assert!((demand[1].quantity - 1.0).abs() < 1e-9);
        assert_eq!(demand[1].meal_ids, vec![101]);
    }

    #[test]
    fn test_skipped_and_empty_meals_contribute_nothing() {
        let recipes = HashMap::from([(1, recipe(1, Some(1.0), vec![linked(1, 10, "Rice", 100.0, "g")]))]);
        let mut skipped = meal(100, 2.0, vec![1]);
        skipped.skipped = true;
        let empty = meal(101, 2.0, vec![]);
        assert!(aggregate_demand(&[skipped, empty], &recipes).is_empty());
    }

    #[test]
    fn test_unlinked_uses_and_missing_recipes_skipped() {
        let mut custom = linked(1, 0, "", 1.0, "pinch");
        custom.ingredient_id = None;
        custom.ingredient_name = None;
        custom.custom_name = Some("Salt".to_string());
        let recipes = HashMap::from([(1, recipe(1, None, vec![custom]))]);
        let demand = aggregate_demand(&[meal(100, 2.0, vec![1, 99])], &recipes);
        assert!(demand.is_empty());
    }

    #[test]
    fn test_incompatible_units_recorded_not_summed() {
        let recipes = HashMap::from([
            (1, recipe(1, None, vec![linked(1, 10, "Garlic", 20.0, "g")])),
            (2, recipe(2, None, vec![linked(2, 10, "Garlic", 3.0, "cloves")])),
        ]);
        let demand = aggregate_demand(&[meal(100, 1.0, vec![1, 2])], &recipes);
        assert_eq!(demand.len(), 1);
        assert_eq!(demand[0].unit, "g");
        assert!((demand[0].quantity - 20.0).abs() < 1e-9);
        assert_eq!(demand[0].unreconciled.len(), 1);
        assert_eq!(demand[0].unreconciled[0].unit, "cloves");
    }

    #[test]
    fn test_unreconciled_amounts_summed_per_unit() {
        let recipes = HashMap::from([
            (1, recipe(1, None, vec![linked(1, 10, "Garlic", 20.0, "g")])),
            (2, recipe(2, None, vec![
                linked(2, 10, "Garlic", 3.0, "cloves"),
                linked(2, 10, "Garlic", 1.0, "tsp"),
            ])),
            (3, recipe(3, None, vec![linked(3, 10, "Garlic", 2.0, "cloves")])),
        ]);
        let demand = aggregate_demand(&[meal(100, 1.0, vec![1, 2, 3])], &recipes);
        let extra = &demand[0].unreconciled;
        assert_eq!(extra.len(), 2);
        assert_eq!(extra[0].unit, "cloves");
        assert!((extra[0].quantity - 5.0).abs() < 1e-9);
        assert_eq!(extra[1].unit, "ml");
    }

    #[test]
    fn test_meal_counted_once_per_ingredient() {
        let recipes = HashMap::from([
            (1, recipe(1, None, vec![linked(1, 10, "Rice", 100.0, "g")])),
            (2, recipe(2, None, vec![linked(2, 10, "Rice", 50.0, "g")])),
        ]);
        let demand = aggregate_demand(&[meal(100, 1.0, vec![1, 2])], &recipes);
        assert_eq!(demand[0].meal_ids, vec![100]);
        assert!((demand[0].quantity - 150.0).abs() < 1e-9);
    }
}
