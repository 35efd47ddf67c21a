use anyhow::{Result, bail};
use chrono::{Datelike, Duration, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

use crate::units::NormalizedQuantity;

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const DEFAULT_CATEGORY: &str = "other";
pub const PERIOD_DAYS: i64 = 7;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ingredient {
    pub id: i64,
    #[serde(default)]
    pub uuid: String,
    pub name: String,
    pub normalized_name: String,
    pub category: String,
    pub default_unit: String,
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct NewIngredient {
    pub name: String,
    pub category: String,
    pub default_unit: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Recipe {
    pub id: i64,
    #[serde(default)]
    pub uuid: String,
    pub name: String,
    /// Servings the ingredient quantities are written for. `None` or zero
    /// means the quantities are used unscaled.
    pub base_servings: Option<f64>,
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

/// A quantity of one ingredient required by one recipe.
#[derive(Debug, Clone, Serialize)]
pub struct RecipeIngredientUse {
    pub id: i64,
    #[serde(default)]
    pub uuid: String,
    pub recipe_id: i64,
    pub ingredient_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_name: Option<String>,
    pub quantity: f64,
    pub unit: String,
    pub sort_index: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preparation: Option<String>,
    // Joined fields from the linked ingredient
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingredient_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl RecipeIngredientUse {
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.ingredient_name
            .as_deref()
            .or(self.custom_name.as_deref())
            .unwrap_or("?")
    }
}

#[derive(Debug, Clone)]
pub struct NewRecipeIngredientUse {
    pub ingredient_id: Option<i64>,
    pub custom_name: Option<String>,
    pub quantity: f64,
    pub unit: String,
    pub preparation: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecipeDetail {
    #[serde(flatten)]
    pub recipe: Recipe,
    pub ingredients: Vec<RecipeIngredientUse>,
}

/// A seven-day planning container.
#[derive(Debug, Clone, Serialize)]
pub struct Period {
    pub id: i64,
    #[serde(default)]
    pub uuid: String,
    pub start_date: NaiveDate,
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

impl Period {
    #[must_use]
    pub fn end_date(&self) -> NaiveDate {
        self.start_date + Duration::days(PERIOD_DAYS - 1)
    }

    #[must_use]
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start_date && date <= self.end_date()
    }

    #[must_use]
    pub fn day_date(&self, day: i64) -> NaiveDate {
        self.start_date + Duration::days(day)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduledMeal {
    pub id: i64,
    #[serde(default)]
    pub uuid: String,
    pub period_id: i64,
    /// Offset from the period's start date, 0-6.
    pub day: i64,
    pub meal_type: String,
    pub servings: f64,
    pub recipe_ids: Vec<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_name: Option<String>,
    pub skipped: bool,
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

impl ScheduledMeal {
    /// Whether this meal can create grocery demand.
    #[must_use]
    pub fn contributes_demand(&self) -> bool {
        !self.skipped && !self.recipe_ids.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct NewScheduledMeal {
    pub period_id: i64,
    pub day: i64,
    pub meal_type: String,
    pub servings: f64,
}

/// A grocery list line item, derived from planned recipes or added by hand.
#[derive(Debug, Clone, Serialize)]
pub struct ListEntry {
    pub id: i64,
    #[serde(default)]
    pub uuid: String,
    pub period_id: Option<i64>,
    pub ingredient_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_name: Option<String>,
    pub quantity: f64,
    pub unit: String,
    pub category: String,
    pub is_manual: bool,
    pub pantry_checked: bool,
    pub is_in_pantry: bool,
    pub is_checked: bool,
    pub created_at: String,
    pub checked_at: Option<String>,
    pub checked_by: Option<String>,
    #[serde(default)]
    pub updated_at: String,
    /// Scheduled meals whose recipes created this demand.
    pub meal_ids: Vec<i64>,
    /// Demand in units that could not be added to `unit`.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unreconciled: Vec<NormalizedQuantity>,
    // Joined for display
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingredient_name: Option<String>,
}

impl ListEntry {
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.ingredient_name
            .as_deref()
            .or(self.custom_name.as_deref())
            .unwrap_or("?")
    }

    /// Derived entries need an ingredient, manual entries a non-empty name.
    /// Entries failing this are skipped by aggregation and views.
    #[must_use]
    pub fn has_identity(&self) -> bool {
        if self.is_manual {
            self.custom_name
                .as_deref()
                .is_some_and(|n| !n.trim().is_empty())
                || self.ingredient_id.is_some()
        } else {
            self.ingredient_id.is_some()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NewListEntry {
    pub period_id: Option<i64>,
    pub ingredient_id: Option<i64>,
    pub custom_name: Option<String>,
    pub quantity: f64,
    pub unit: String,
    pub category: String,
    pub is_manual: bool,
    pub pantry_checked: bool,
    pub meal_ids: Vec<i64>,
    pub unreconciled: Vec<NormalizedQuantity>,
}

impl NewListEntry {
    /// A manual entry skips the pantry check and goes straight to the
    /// shopping list.
    #[must_use]
    pub fn manual(
        period_id: Option<i64>,
        name: &str,
        quantity: f64,
        unit: &str,
        category: &str,
    ) -> Self {
        let category = category.trim();
        Self {
            period_id,
            ingredient_id: None,
            custom_name: Some(name.trim().to_string()),
            quantity,
            unit: unit.trim().to_string(),
            category: if category.is_empty() {
                DEFAULT_CATEGORY.to_string()
            } else {
                category.to_string()
            },
            is_manual: true,
            pantry_checked: true,
            meal_ids: Vec::new(),
            unreconciled: Vec::new(),
        }
    }
}

/// Lowercased, trimmed form used for ingredient matching.
#[must_use]
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

pub const MEAL_TYPES: &[&str] = &["breakfast", "lunch", "dinner", "snack"];

pub fn validate_meal_type(meal: &str) -> Result<String> {
    let lower = meal.trim().to_lowercase();
    if MEAL_TYPES.contains(&lower.as_str()) {
        Ok(lower)
    } else {
        bail!(
            "Invalid meal type '{meal}'. Must be one of: {}",
            MEAL_TYPES.join(", ")
        )
    }
}

/// Position of a meal type within a day, unknown types last.
#[must_use]
pub fn meal_type_order(meal: &str) -> usize {
    MEAL_TYPES
        .iter()
        .position(|m| *m == meal)
        .unwrap_or(MEAL_TYPES.len())
}

pub fn validate_day(day: i64) -> Result<()> {
    if !(0..PERIOD_DAYS).contains(&day) {
        bail!("Day must be between 0 and 6 (got {day})");
    }
    Ok(())
}

pub fn validate_servings(servings: f64) -> Result<()> {
    if !servings.is_finite() || servings <= 0.0 {
        bail!("Servings must be greater than 0");
    }
    Ok(())
}

pub fn validate_quantity(quantity: f64) -> Result<()> {
    if !quantity.is_finite() || quantity <= 0.0 {
        bail!("Quantity must be greater than 0");
    }
    Ok(())
}

pub fn validate_new_ingredient(ingredient: &NewIngredient) -> Result<()> {
    if ingredient.name.trim().is_empty() {
        bail!("Ingredient name must not be empty");
    }
    Ok(())
}

pub fn validate_recipe_use(new_use: &NewRecipeIngredientUse) -> Result<()> {
    validate_quantity(new_use.quantity)?;
    let has_name = new_use
        .custom_name
        .as_deref()
        .is_some_and(|n| !n.trim().is_empty());
    match (new_use.ingredient_id, has_name) {
        (None, false) => bail!("Recipe ingredient needs an ingredient or a custom name"),
        (Some(_), true) => bail!("Recipe ingredient cannot have both an ingredient and a custom name"),
        _ => Ok(()),
    }
}

pub fn validate_manual_entry(entry: &NewListEntry) -> Result<()> {
    let has_name = entry
        .custom_name
        .as_deref()
        .is_some_and(|n| !n.trim().is_empty());
    if !has_name {
        bail!("Manual items need a name");
    }
    validate_quantity(entry.quantity)
}

/// First day of the period containing `date`, for periods beginning on `week_start`.
#[must_use]
pub fn period_start_for(date: NaiveDate, week_start: Weekday) -> NaiveDate {
    let offset = (date.weekday().num_days_from_monday() + 7
        - week_start.num_days_from_monday())
        % 7;
    date - Duration::days(i64::from(offset))
}

pub fn parse_weekday(s: &str) -> Result<Weekday> {
    s.trim()
        .parse::<Weekday>()
        .map_err(|_| anyhow::anyhow!("Invalid weekday '{s}'. Use monday-sunday or mon-sun"))
}
