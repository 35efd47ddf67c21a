use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::{Duration, Local, NaiveDate, Weekday};
use tracing::{debug, info};

use crate::catalog_import::{self, CatalogImportSummary};
use crate::db::Database;
use crate::demand::{AggregateDemand, aggregate_demand};
use crate::grouping::{EntryGroup, GroupKey, ListView, group_entries};
use crate::item_state;
use crate::models::{
    DEFAULT_CATEGORY, Ingredient, ListEntry, NewIngredient, NewListEntry,
    NewRecipeIngredientUse, NewScheduledMeal, PERIOD_DAYS, Period, Recipe, RecipeDetail,
    RecipeIngredientUse, ScheduledMeal, parse_weekday, period_start_for, validate_day,
    validate_manual_entry, validate_meal_type, validate_new_ingredient, validate_recipe_use,
    validate_servings,
};
use crate::reconcile::{ReconcileSummary, plan_reconciliation};

pub const WEEK_START_KEY: &str = "week_start";

fn now() -> String {
    Local::now().to_rfc3339()
}

pub struct PlannerService {
    db: Database,
}

impl PlannerService {
    pub fn new(db_path: &str) -> Result<Self> {
        let db = Database::open(Path::new(db_path))?;
        Ok(Self { db })
    }

    pub fn new_in_memory() -> Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self { db })
    }

    // --- Settings ---

    pub fn week_start(&self) -> Result<Weekday> {
        match self.db.get_setting(WEEK_START_KEY)? {
            Some(value) => parse_weekday(&value),
            None => Ok(Weekday::Mon),
        }
    }

    /// Only affects periods created afterwards.
    pub fn set_week_start(&self, day: Weekday) -> Result<()> {
        self.db
            .set_setting(WEEK_START_KEY, &day.to_string().to_lowercase())
    }

    // --- Ingredients ---

    pub fn create_ingredient(&self, ingredient: &NewIngredient) -> Result<Ingredient> {
        validate_new_ingredient(ingredient)?;
        if self.db.find_ingredient_by_name(&ingredient.name)?.is_some() {
            bail!("Ingredient '{}' already exists", ingredient.name.trim());
        }
        let category = ingredient.category.trim().to_lowercase();
        self.db.insert_ingredient(&NewIngredient {
            name: ingredient.name.trim().to_string(),
            category: if category.is_empty() {
                DEFAULT_CATEGORY.to_string()
            } else {
                category
            },
            default_unit: ingredient.default_unit.trim().to_string(),
        })
    }

    pub fn get_ingredient(&self, id: i64) -> Result<Ingredient> {
        self.db.get_ingredient(id)
    }

    pub fn find_ingredient_by_name(&self, name: &str) -> Result<Option<Ingredient>> {
        self.db.find_ingredient_by_name(name)
    }

    pub fn list_ingredients(&self, search: Option<&str>) -> Result<Vec<Ingredient>> {
        self.db.list_ingredients(search)
    }

    /// Refused while a recipe or list entry still refers to the ingredient.
    pub fn delete_ingredient(&self, id: i64) -> Result<bool> {
        let ingredient = self.db.get_ingredient(id)?;
        if self.db.ingredient_in_use(id)? {
            bail!(
                "Ingredient '{}' is used by recipes or list entries",
                ingredient.name
            );
        }
        self.db.delete_ingredient(id)
    }

    pub fn import_catalog_csv(&self, csv_data: &str, dry_run: bool) -> Result<CatalogImportSummary> {
        let rows = catalog_import::parse_catalog_csv(csv_data.as_bytes())?;
        catalog_import::import_catalog(&self.db, &rows, dry_run)
    }

    // --- Recipes ---

    pub fn create_recipe(&self, name: &str, base_servings: Option<f64>) -> Result<Recipe> {
        if name.trim().is_empty() {
            bail!("Recipe name must not be empty");
        }
        validate_base_servings(base_servings)?;
        self.db.create_recipe(name, base_servings)
    }

    pub fn get_recipe_detail(&self, recipe_id: i64) -> Result<RecipeDetail> {
        self.db.get_recipe_detail(recipe_id)
    }

    pub fn find_recipe_by_name(&self, name: &str) -> Result<Option<Recipe>> {
        self.db.find_recipe_by_name(name)
    }

    pub fn list_recipes(&self) -> Result<Vec<Recipe>> {
        self.db.list_recipes()
    }

    pub fn add_recipe_ingredient(
        &self,
        recipe_id: i64,
        new_use: &NewRecipeIngredientUse,
    ) -> Result<RecipeIngredientUse> {
        self.db.get_recipe(recipe_id)?;
        validate_recipe_use(new_use)?;
        let Some(ingredient_id) = new_use.ingredient_id else {
            return self.db.add_recipe_ingredient(recipe_id, new_use);
        };
        let ingredient = self.db.get_ingredient(ingredient_id)?;
        if new_use.unit.trim().is_empty() && !ingredient.default_unit.is_empty() {
            let with_unit = NewRecipeIngredientUse {
                unit: ingredient.default_unit,
                ..new_use.clone()
            };
            return self.db.add_recipe_ingredient(recipe_id, &with_unit);
        }
        self.db.add_recipe_ingredient(recipe_id, new_use)
    }

    pub fn remove_recipe_ingredient(&self, recipe_id: i64, use_id: i64) -> Result<bool> {
        self.db.remove_recipe_ingredient(recipe_id, use_id)
    }

    pub fn set_recipe_servings(&self, recipe_id: i64, base_servings: Option<f64>) -> Result<Recipe> {
        validate_base_servings(base_servings)?;
        self.db.set_recipe_servings(recipe_id, base_servings)?;
        self.db.get_recipe(recipe_id)
    }

    pub fn delete_recipe(&self, recipe_id: i64) -> Result<bool> {
        self.db.delete_recipe(recipe_id)
    }

    // --- Periods ---

    /// The period containing `date`, created on first use.
    ///
    /// A new period starts on the configured week start day. If the week
    /// start changed since neighbouring periods were created, the new one is
    /// shifted so that no date belongs to two periods: it starts after an
    /// earlier period ends, or ends before a later one starts. A gap shorter
    /// than a week between two periods cannot hold a new one.
    pub fn get_or_create_period(&self, date: NaiveDate) -> Result<Period> {
        let window = Duration::days(PERIOD_DAYS - 1);
        // Candidates start as early as `date - window`
        let earlier = self
            .db
            .list_periods_starting_between(date - window - window, date)?;
        if let Some(period) = earlier.iter().find(|p| p.contains(date)) {
            return Ok(period.clone());
        }

        let mut start = period_start_for(date, self.week_start()?);
        let free_from = earlier.iter().map(|p| p.end_date() + Duration::days(1)).max();
        if let Some(free_from) = free_from {
            start = start.max(free_from);
        }
        let later = self
            .db
            .list_periods_starting_between(date + Duration::days(1), date + window)?;
        if let Some(next) = later.first() {
            if start + window >= next.start_date {
                start = next.start_date - Duration::days(PERIOD_DAYS);
                if free_from.is_some_and(|free| start < free) {
                    bail!(
                        "{date} falls in a gap shorter than a week between existing periods"
                    );
                }
            }
        }
        let period = self.db.insert_period(start)?;
        debug!(period_id = period.id, start = %period.start_date, "created period");
        Ok(period)
    }

    pub fn get_period(&self, id: i64) -> Result<Period> {
        self.db.get_period(id)
    }

    /// Periods overlapping `from..=to`, oldest first.
    pub fn list_periods_in_range(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<Period>> {
        if to < from {
            bail!("Range end {to} is before start {from}");
        }
        self.db
            .list_periods_starting_between(from - Duration::days(PERIOD_DAYS - 1), to)
    }

    pub fn list_periods(&self) -> Result<Vec<Period>> {
        self.db.list_periods()
    }

    pub fn delete_period(&self, id: i64) -> Result<bool> {
        self.db.delete_period(id)
    }

    // --- Scheduled meals ---

    pub fn schedule_meal(
        &self,
        period_id: i64,
        day: i64,
        meal_type: &str,
        servings: f64,
    ) -> Result<ScheduledMeal> {
        self.db.get_period(period_id)?;
        validate_day(day)?;
        validate_servings(servings)?;
        let meal_type = validate_meal_type(meal_type)?;
        self.db.insert_meal(&NewScheduledMeal {
            period_id,
            day,
            meal_type,
            servings,
        })
    }

    pub fn get_meal(&self, id: i64) -> Result<ScheduledMeal> {
        self.db.get_meal(id)
    }

    pub fn list_meals(&self, period_id: i64) -> Result<Vec<ScheduledMeal>> {
        self.db.list_meals(period_id)
    }

    pub fn assign_recipe(&self, meal_id: i64, recipe_id: i64) -> Result<ScheduledMeal> {
        self.db.get_meal(meal_id)?;
        self.db.get_recipe(recipe_id)?;
        self.db.assign_recipe(meal_id, recipe_id)
    }

    pub fn unassign_recipe(&self, meal_id: i64, recipe_id: i64) -> Result<bool> {
        self.db.unassign_recipe(meal_id, recipe_id)
    }

    /// An empty name clears it.
    pub fn set_meal_custom_name(&self, meal_id: i64, name: Option<&str>) -> Result<ScheduledMeal> {
        self.db.get_meal(meal_id)?;
        let name = name.map(str::trim).filter(|n| !n.is_empty());
        self.db.set_meal_custom_name(meal_id, name)
    }

    pub fn skip_meal(&self, meal_id: i64, skipped: bool) -> Result<ScheduledMeal> {
        self.db.get_meal(meal_id)?;
        self.db.set_meal_skipped(meal_id, skipped)
    }

    pub fn set_meal_servings(&self, meal_id: i64, servings: f64) -> Result<ScheduledMeal> {
        validate_servings(servings)?;
        self.db.get_meal(meal_id)?;
        self.db.set_meal_servings(meal_id, servings)
    }

    pub fn delete_meal(&self, id: i64) -> Result<bool> {
        self.db.delete_meal(id)
    }

    // --- Grocery list generation ---

    /// What the period's planned meals currently call for.
    pub fn demand_for_period(&self, period_id: i64) -> Result<Vec<AggregateDemand>> {
        let meals = self.db.list_meals(period_id)?;
        let recipe_ids: Vec<i64> = meals
            .iter()
            .filter(|m| m.contributes_demand())
            .flat_map(|m| m.recipe_ids.iter().copied())
            .collect();
        let recipes = self.db.get_recipe_details(&recipe_ids)?;
        Ok(aggregate_demand(&meals, &recipes))
    }

    /// Bring the period's derived entries in line with its planned meals.
    /// Pantry and checked state of surviving entries is kept, and running it
    /// again without meal changes writes nothing.
    pub fn generate_list_for_period(&self, period_id: i64) -> Result<ReconcileSummary> {
        self.db.get_period(period_id)?;
        let demand = self.demand_for_period(period_id)?;
        let existing = self.db.list_entries_for_period(period_id)?;
        let plan = plan_reconciliation(period_id, &demand, &existing);
        self.db.apply_reconcile_plan(period_id, &plan)?;

        let summary = plan.summary();
        info!(
            period_id,
            created = summary.created,
            updated = summary.updated,
            removed = summary.removed,
            duplicates = summary.duplicates_removed,
            "generated grocery list"
        );
        Ok(summary)
    }

    /// Delete derived entries that no longer belong to any period.
    pub fn cleanup_orphaned_entries(&self) -> Result<usize> {
        let removed = self.db.delete_orphaned_derived_entries()?;
        if removed > 0 {
            info!(removed, "removed orphaned list entries");
        }
        Ok(removed)
    }

    // --- Entries ---

    pub fn add_manual_entry(
        &self,
        period_id: Option<i64>,
        name: &str,
        quantity: f64,
        unit: &str,
        category: &str,
    ) -> Result<ListEntry> {
        if let Some(id) = period_id {
            self.db.get_period(id)?;
        }
        let entry = NewListEntry::manual(period_id, name, quantity, unit, &category.to_lowercase());
        validate_manual_entry(&entry)?;
        self.db.insert_list_entry(&entry)
    }

    pub fn get_entry(&self, id: i64) -> Result<ListEntry> {
        self.db.get_list_entry(id)
    }

    pub fn delete_entry(&self, id: i64) -> Result<bool> {
        self.db.delete_list_entry(id)
    }

    pub fn list_entries(&self, period_id: i64) -> Result<Vec<ListEntry>> {
        self.db.list_entries_for_period(period_id)
    }

    fn update_entry(&self, id: i64, change: impl FnOnce(&mut ListEntry) -> bool) -> Result<ListEntry> {
        let mut entry = self.db.get_list_entry(id)?;
        if change(&mut entry) {
            self.db.save_entry_state(&entry)?;
            entry = self.db.get_list_entry(id)?;
        }
        Ok(entry)
    }

    pub fn mark_in_pantry(&self, id: i64) -> Result<ListEntry> {
        self.update_entry(id, ListEntry::mark_in_pantry)
    }

    pub fn unmark_from_pantry(&self, id: i64) -> Result<ListEntry> {
        self.update_entry(id, ListEntry::unmark_from_pantry)
    }

    pub fn toggle_pantry(&self, id: i64) -> Result<ListEntry> {
        self.update_entry(id, ListEntry::toggle_pantry)
    }

    pub fn check(&self, id: i64, by: Option<&str>) -> Result<ListEntry> {
        let stamp = now();
        self.update_entry(id, |e| e.check(by, &stamp))
    }

    pub fn uncheck(&self, id: i64) -> Result<ListEntry> {
        self.update_entry(id, ListEntry::uncheck)
    }

    pub fn toggle_checked(&self, id: i64, by: Option<&str>) -> Result<ListEntry> {
        let stamp = now();
        self.update_entry(id, |e| e.toggle_checked(by, &stamp))
    }

    /// Complete the pantry check for every still-pending entry of a period.
    pub fn mark_all_remaining_as_needed(&self, period_id: i64) -> Result<usize> {
        let mut entries = self.db.list_entries_for_period(period_id)?;
        self.save_remaining_as_needed(&mut entries)
    }

    fn save_remaining_as_needed(&self, entries: &mut [ListEntry]) -> Result<usize> {
        let changed: HashSet<i64> = item_state::mark_all_remaining_as_needed(entries)
            .into_iter()
            .collect();
        self.db
            .save_entry_states(entries.iter().filter(|e| changed.contains(&e.id)))
    }

    // --- Per-period views ---

    pub fn pantry_check_items(&self, period_id: i64) -> Result<Vec<ListEntry>> {
        let entries = self.db.list_entries_for_period(period_id)?;
        Ok(item_state::pantry_check_items(&entries).into_iter().cloned().collect())
    }

    pub fn in_pantry_items(&self, period_id: i64) -> Result<Vec<ListEntry>> {
        let entries = self.db.list_entries_for_period(period_id)?;
        Ok(item_state::in_pantry_items(&entries).into_iter().cloned().collect())
    }

    pub fn shopping_list_items(&self, period_id: i64) -> Result<Vec<ListEntry>> {
        let entries = self.db.list_entries_for_period(period_id)?;
        Ok(item_state::shopping_list_items(&entries).into_iter().cloned().collect())
    }

    pub fn unpurchased_shopping_items(&self, period_id: i64) -> Result<Vec<ListEntry>> {
        let entries = self.db.list_entries_for_period(period_id)?;
        Ok(item_state::unpurchased_shopping_items(&entries)
            .into_iter()
            .cloned()
            .collect())
    }

    // --- Cross-period views ---

    fn entries_in_range(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<ListEntry>> {
        let period_ids: Vec<i64> = self
            .list_periods_in_range(from, to)?
            .iter()
            .map(|p| p.id)
            .collect();
        self.db.list_entries_for_periods(&period_ids)
    }

    /// Same-item entries of every period overlapping the range, merged into rows.
    pub fn grouped_view(&self, from: NaiveDate, to: NaiveDate, view: ListView) -> Result<Vec<EntryGroup>> {
        let entries = self.entries_in_range(from, to)?;
        Ok(group_entries(&entries, view))
    }

    fn find_group(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        view: ListView,
        key: &GroupKey,
    ) -> Result<EntryGroup> {
        self.grouped_view(from, to, view)?
            .into_iter()
            .find(|g| &g.key == key)
            .with_context(|| format!("List row {key} not found"))
    }

    fn save_group_members(&self, group: &EntryGroup, changed: &[i64]) -> Result<()> {
        if changed.is_empty() {
            return Ok(());
        }
        self.db.save_entry_states(
            group
                .members
                .iter()
                .filter(|e| changed.contains(&e.id)),
        )?;
        debug!(key = %group.key, changed = changed.len(), "updated list row");
        Ok(())
    }

    pub fn set_group_checked(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        key: &GroupKey,
        checked: bool,
        by: Option<&str>,
    ) -> Result<EntryGroup> {
        let mut group = self.find_group(from, to, ListView::Shopping, key)?;
        let changed = group.set_checked(checked, by, &now());
        self.save_group_members(&group, &changed)?;
        Ok(group)
    }

    /// Flip the row's checked state and apply it to every member.
    pub fn toggle_group_checked(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        key: &GroupKey,
        by: Option<&str>,
    ) -> Result<EntryGroup> {
        let mut group = self.find_group(from, to, ListView::Shopping, key)?;
        let changed = group.toggle_checked(by, &now());
        self.save_group_members(&group, &changed)?;
        Ok(group)
    }

    pub fn set_group_in_pantry(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        key: &GroupKey,
        in_pantry: bool,
    ) -> Result<EntryGroup> {
        let mut group = self.find_group(from, to, ListView::PantryCheck, key)?;
        let changed = group.set_in_pantry(in_pantry);
        self.save_group_members(&group, &changed)?;
        Ok(group)
    }

    pub fn toggle_group_in_pantry(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        key: &GroupKey,
    ) -> Result<EntryGroup> {
        let mut group = self.find_group(from, to, ListView::PantryCheck, key)?;
        let changed = group.toggle_in_pantry();
        self.save_group_members(&group, &changed)?;
        Ok(group)
    }

    /// Delete every entry behind a row.
    pub fn delete_group(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        view: ListView,
        key: &GroupKey,
    ) -> Result<usize> {
        let group = self.find_group(from, to, view, key)?;
        self.db.delete_list_entries(&group.member_ids())
    }

    /// Put every member of a row in the pantry when any member already is.
    /// Returns how many entries changed.
    pub fn sync_pantry_state(&self, from: NaiveDate, to: NaiveDate) -> Result<usize> {
        let mut total = 0;
        for mut group in self.grouped_view(from, to, ListView::PantryCheck)? {
            let changed = group.sync_pantry_state();
            self.save_group_members(&group, &changed)?;
            total += changed.len();
        }
        Ok(total)
    }

    pub fn mark_all_remaining_as_needed_in_range(&self, from: NaiveDate, to: NaiveDate) -> Result<usize> {
        let mut entries = self.entries_in_range(from, to)?;
        self.save_remaining_as_needed(&mut entries)
    }
}

fn validate_base_servings(base_servings: Option<f64>) -> Result<()> {
    if let Some(servings) = base_servings {
        if !servings.is_finite() || servings < 0.0 {
            bail!("Base servings must not be negative");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn ingredient(svc: &PlannerService, name: &str, category: &str, unit: &str) -> Ingredient {
        svc.create_ingredient(&NewIngredient {
            name: name.to_string(),
            category: category.to_string(),
            default_unit: unit.to_string(),
        })
        .unwrap()
    }

    fn uses(ingredient_id: i64, quantity: f64, unit: &str) -> NewRecipeIngredientUse {
        NewRecipeIngredientUse {
            ingredient_id: Some(ingredient_id),
            custom_name: None,
            quantity,
            unit: unit.to_string(),
            preparation: None,
        }
    }

    /// One dinner for 4 using a 2-serving recipe that needs 500g of rice.
    struct RiceWeek {
        svc: PlannerService,
        period: Period,
        meal: ScheduledMeal,
        rice: Ingredient,
    }

    fn rice_week() -> RiceWeek {
        let svc = PlannerService::new_in_memory().unwrap();
        let rice = ingredient(&svc, "Rice", "pantry", "g");
        let recipe = svc.create_recipe("Pilaf", Some(2.0)).unwrap();
        svc.add_recipe_ingredient(recipe.id, &uses(rice.id, 500.0, "g"))
            .unwrap();
        let period = svc.get_or_create_period(date(2024, 6, 12)).unwrap();
        let meal = svc.schedule_meal(period.id, 2, "dinner", 4.0).unwrap();
        svc.assign_recipe(meal.id, recipe.id).unwrap();
        RiceWeek {
            svc,
            period,
            meal,
            rice,
        }
    }

    #[test]
    fn test_rice_scenario() {
        let RiceWeek {
            svc, period, meal, rice,
        } = rice_week();

        let summary = svc.generate_list_for_period(period.id).unwrap();
        assert_eq!(summary.created, 1);
        let entries = svc.list_entries(period.id).unwrap();
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.ingredient_id, Some(rice.id));
        assert!((entry.quantity - 1000.0).abs() < 1e-9);
        assert_eq!(entry.unit, "g");
        assert!(!entry.pantry_checked);
        assert_eq!(entry.meal_ids, vec![meal.id]);

        let entry = svc.mark_in_pantry(entry.id).unwrap();
        assert!(entry.pantry_checked);
        assert!(entry.is_in_pantry);
        assert!(svc.shopping_list_items(period.id).unwrap().is_empty());

        svc.set_meal_servings(meal.id, 6.0).unwrap();
        let summary = svc.generate_list_for_period(period.id).unwrap();
        assert_eq!(summary.updated, 1);
        let after = svc.get_entry(entry.id).unwrap();
        assert!((after.quantity - 1500.0).abs() < 1e-9);
        assert!(after.pantry_checked);
        assert!(after.is_in_pantry);
    }

    #[test]
    fn test_regeneration_is_idempotent() {
        let RiceWeek { svc, period, .. } = rice_week();
        svc.generate_list_for_period(period.id).unwrap();
        let first = svc.list_entries(period.id).unwrap();
        let period_before = svc.get_period(period.id).unwrap();

        let summary = svc.generate_list_for_period(period.id).unwrap();
        assert_eq!(summary, ReconcileSummary::default());

        let second = svc.list_entries(period.id).unwrap();
        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.id, b.id);
            assert!((a.quantity - b.quantity).abs() < f64::EPSILON);
            assert_eq!(a.pantry_checked, b.pantry_checked);
            assert_eq!(a.updated_at, b.updated_at);
        }
        assert_eq!(
            svc.get_period(period.id).unwrap().updated_at,
            period_before.updated_at
        );
    }

    #[test]
    fn test_flags_survive_regeneration() {
        let RiceWeek {
            svc, period, meal, ..
        } = rice_week();
        svc.generate_list_for_period(period.id).unwrap();
        let id = svc.list_entries(period.id).unwrap()[0].id;
        svc.mark_in_pantry(id).unwrap();
        svc.check(id, Some("alex")).unwrap();

        svc.set_meal_servings(meal.id, 3.0).unwrap();
        svc.generate_list_for_period(period.id).unwrap();

        let entry = svc.get_entry(id).unwrap();
        assert!((entry.quantity - 750.0).abs() < 1e-9);
        assert!(entry.is_in_pantry);
        assert!(entry.is_checked);
        assert_eq!(entry.checked_by.as_deref(), Some("alex"));
    }

    #[test]
    fn test_conservation_of_demand() {
        let svc = PlannerService::new_in_memory().unwrap();
        let flour = ingredient(&svc, "Flour", "baking", "g");
        let bread = svc.create_recipe("Bread", Some(4.0)).unwrap();
        svc.add_recipe_ingredient(bread.id, &uses(flour.id, 0.5, "kg"))
            .unwrap();
        let pancakes = svc.create_recipe("Pancakes", Some(2.0)).unwrap();
        svc.add_recipe_ingredient(pancakes.id, &uses(flour.id, 150.0, "g"))
            .unwrap();

        let period = svc.get_or_create_period(date(2024, 6, 10)).unwrap();
        let breakfast = svc.schedule_meal(period.id, 0, "breakfast", 3.0).unwrap();
        svc.assign_recipe(breakfast.id, pancakes.id).unwrap();
        let dinner = svc.schedule_meal(period.id, 1, "dinner", 2.0).unwrap();
        svc.assign_recipe(dinner.id, bread.id).unwrap();
        svc.assign_recipe(dinner.id, pancakes.id).unwrap();

        svc.generate_list_for_period(period.id).unwrap();
        let entries = svc.list_entries(period.id).unwrap();
        assert_eq!(entries.len(), 1);
        // 150 * 3/2 + 500 * 2/4 + 150 * 2/2
        assert!((entries[0].quantity - 625.0).abs() < 1e-9);
        let mut meals = entries[0].meal_ids.clone();
        meals.sort_unstable();
        assert_eq!(meals, vec![breakfast.id, dinner.id]);
    }

    #[test]
    fn test_unplanned_ingredient_removed_manual_kept() {
        let RiceWeek {
            svc, period, meal, ..
        } = rice_week();
        svc.generate_list_for_period(period.id).unwrap();
        let manual = svc
            .add_manual_entry(Some(period.id), "Paper towels", 1.0, "pack", "household")
            .unwrap();

        svc.skip_meal(meal.id, true).unwrap();
        let summary = svc.generate_list_for_period(period.id).unwrap();
        assert_eq!(summary.removed, 1);

        let entries = svc.list_entries(period.id).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, manual.id);
    }

    #[test]
    fn test_duplicate_entries_repaired() {
        let RiceWeek {
            svc, period, rice, ..
        } = rice_week();
        for _ in 0..2 {
            svc.db
                .insert_list_entry(&NewListEntry {
                    period_id: Some(period.id),
                    ingredient_id: Some(rice.id),
                    custom_name: None,
                    quantity: 100.0,
                    unit: "g".to_string(),
                    category: "pantry".to_string(),
                    is_manual: false,
                    pantry_checked: false,
                    meal_ids: vec![],
                    unreconciled: vec![],
                })
                .unwrap();
        }

        let summary = svc.generate_list_for_period(period.id).unwrap();
        assert_eq!(summary.duplicates_removed, 1);
        let entries = svc.list_entries(period.id).unwrap();
        assert_eq!(entries.len(), 1);
        assert!((entries[0].quantity - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn test_orphan_cleanup() {
        let RiceWeek { svc, period, .. } = rice_week();
        svc.generate_list_for_period(period.id).unwrap();
        let derived = svc.list_entries(period.id).unwrap()[0].id;
        let manual = svc
            .add_manual_entry(Some(period.id), "Soap", 1.0, "", "")
            .unwrap();
        svc.db.detach_entry(derived).unwrap();
        svc.db.detach_entry(manual.id).unwrap();

        assert_eq!(svc.cleanup_orphaned_entries().unwrap(), 1);
        assert!(svc.get_entry(derived).is_err());
        let kept = svc.get_entry(manual.id).unwrap();
        assert!(kept.period_id.is_none());
        assert_eq!(svc.cleanup_orphaned_entries().unwrap(), 0);
    }

    #[test]
    fn test_manual_entry_defaults() {
        let svc = PlannerService::new_in_memory().unwrap();
        let entry = svc
            .add_manual_entry(None, "Batteries", 4.0, "pcs", "Household")
            .unwrap();
        assert!(entry.is_manual);
        assert!(entry.pantry_checked);
        assert!(!entry.is_in_pantry);
        assert_eq!(entry.category, "household");
        assert!(svc.add_manual_entry(None, " ", 1.0, "", "").is_err());
        assert!(svc.add_manual_entry(None, "Milk", 0.0, "l", "").is_err());
    }

    #[test]
    fn test_pantry_check_gating() {
        let RiceWeek { svc, period, .. } = rice_week();
        svc.generate_list_for_period(period.id).unwrap();
        assert_eq!(svc.pantry_check_items(period.id).unwrap().len(), 1);
        assert!(svc.shopping_list_items(period.id).unwrap().is_empty());

        assert_eq!(svc.mark_all_remaining_as_needed(period.id).unwrap(), 1);
        let shopping = svc.shopping_list_items(period.id).unwrap();
        assert_eq!(shopping.len(), 1);
        assert_eq!(svc.unpurchased_shopping_items(period.id).unwrap().len(), 1);

        svc.check(shopping[0].id, None).unwrap();
        assert!(svc.unpurchased_shopping_items(period.id).unwrap().is_empty());
        assert_eq!(svc.mark_all_remaining_as_needed(period.id).unwrap(), 0);
    }

    #[test]
    fn test_entry_transitions() {
        let RiceWeek { svc, period, .. } = rice_week();
        svc.generate_list_for_period(period.id).unwrap();
        let id = svc.list_entries(period.id).unwrap()[0].id;

        let entry = svc.toggle_pantry(id).unwrap();
        assert!(entry.is_in_pantry);
        assert_eq!(svc.in_pantry_items(period.id).unwrap().len(), 1);
        let entry = svc.unmark_from_pantry(id).unwrap();
        assert!(!entry.is_in_pantry);
        assert!(entry.pantry_checked);

        let entry = svc.toggle_checked(id, Some("sam")).unwrap();
        assert!(entry.is_checked);
        assert!(entry.checked_at.is_some());
        let entry = svc.uncheck(id).unwrap();
        assert!(!entry.is_checked);
        assert!(entry.checked_at.is_none());
        assert!(entry.checked_by.is_none());
    }

    /// Rice needed in three consecutive weeks: 200g, 300g and 150g.
    fn three_weeks() -> (PlannerService, Vec<Period>) {
        let svc = PlannerService::new_in_memory().unwrap();
        let rice = ingredient(&svc, "Rice", "pantry", "g");
        let recipe = svc.create_recipe("Rice bowl", Some(1.0)).unwrap();
        svc.add_recipe_ingredient(recipe.id, &uses(rice.id, 100.0, "g"))
            .unwrap();

        let mut periods = Vec::new();
        for (start, servings) in [(date(2024, 6, 10), 2.0), (date(2024, 6, 17), 3.0), (date(2024, 6, 24), 1.5)] {
            let period = svc.get_or_create_period(start).unwrap();
            let meal = svc.schedule_meal(period.id, 0, "lunch", servings).unwrap();
            svc.assign_recipe(meal.id, recipe.id).unwrap();
            svc.generate_list_for_period(period.id).unwrap();
            periods.push(period);
        }
        (svc, periods)
    }

    #[test]
    fn test_group_toggle_consistency() {
        let (svc, periods) = three_weeks();
        let (from, to) = (date(2024, 6, 10), date(2024, 6, 30));
        assert_eq!(svc.mark_all_remaining_as_needed_in_range(from, to).unwrap(), 3);

        let first = svc.list_entries(periods[0].id).unwrap()[0].id;
        let third = svc.list_entries(periods[2].id).unwrap()[0].id;
        svc.check(first, None).unwrap();
        svc.check(third, None).unwrap();

        let groups = svc.grouped_view(from, to, ListView::Shopping).unwrap();
        assert_eq!(groups.len(), 1);
        let key = groups[0].key.clone();
        assert!((groups[0].total_quantity - 650.0).abs() < 1e-9);
        assert!(!groups[0].all_checked);

        let group = svc.toggle_group_checked(from, to, &key, None).unwrap();
        assert!(group.members.iter().all(|e| !e.is_checked));

        let stored = svc.grouped_view(from, to, ListView::Shopping).unwrap();
        let states: Vec<bool> = stored[0].members.iter().map(|e| e.is_checked).collect();
        assert_eq!(states, vec![false, false, false]);
        assert!((stored[0].total_quantity - 650.0).abs() < 1e-9);

        svc.toggle_group_checked(from, to, &key, Some("alex")).unwrap();
        let stored = svc.grouped_view(from, to, ListView::Shopping).unwrap();
        assert!(stored[0].all_checked);
    }

    #[test]
    fn test_range_includes_overlapping_period() {
        let (svc, _) = three_weeks();
        // Mid-week start still sees the week it falls in
        let groups = svc
            .grouped_view(date(2024, 6, 12), date(2024, 6, 18), ListView::PantryCheck)
            .unwrap();
        assert!((groups[0].total_quantity - 500.0).abs() < 1e-9);
        assert!(svc.list_periods_in_range(date(2024, 6, 18), date(2024, 6, 12)).is_err());
    }

    #[test]
    fn test_group_pantry_and_sync() {
        let (svc, periods) = three_weeks();
        let (from, to) = (date(2024, 6, 10), date(2024, 6, 30));
        let key = GroupKey::ByIngredient(svc.list_entries(periods[0].id).unwrap()[0].ingredient_id.unwrap());

        // Only the first week was synced before the range grew
        let second = svc.list_entries(periods[1].id).unwrap()[0].id;
        svc.mark_in_pantry(second).unwrap();
        assert_eq!(svc.sync_pantry_state(from, to).unwrap(), 2);
        let group = &svc.grouped_view(from, to, ListView::PantryCheck).unwrap()[0];
        assert!(group.members.iter().all(|e| e.is_in_pantry && e.pantry_checked));
        assert_eq!(svc.sync_pantry_state(from, to).unwrap(), 0);

        let group = svc.set_group_in_pantry(from, to, &key, false).unwrap();
        assert!(group.members.iter().all(|e| !e.is_in_pantry));
        assert_eq!(svc.shopping_list_items(periods[2].id).unwrap().len(), 1);
    }

    #[test]
    fn test_delete_group() {
        let (svc, periods) = three_weeks();
        let (from, to) = (date(2024, 6, 10), date(2024, 6, 30));
        let key = svc.grouped_view(from, to, ListView::PantryCheck).unwrap()[0]
            .key
            .clone();
        assert_eq!(svc.delete_group(from, to, ListView::PantryCheck, &key).unwrap(), 3);
        assert!(periods
            .iter()
            .all(|p| svc.list_entries(p.id).unwrap().is_empty()));
        assert!(svc.delete_group(from, to, ListView::PantryCheck, &key).is_err());
    }

    #[test]
    fn test_get_or_create_period_normalizes() {
        let svc = PlannerService::new_in_memory().unwrap();
        // 2024-06-15 is a Saturday
        let period = svc.get_or_create_period(date(2024, 6, 15)).unwrap();
        assert_eq!(period.start_date, date(2024, 6, 10));
        let same = svc.get_or_create_period(date(2024, 6, 10)).unwrap();
        assert_eq!(same.id, period.id);
    }

    #[test]
    fn test_week_start_setting() {
        let svc = PlannerService::new_in_memory().unwrap();
        assert_eq!(svc.week_start().unwrap(), Weekday::Mon);
        let monday_week = svc.get_or_create_period(date(2024, 6, 12)).unwrap();

        svc.set_week_start(Weekday::Sun).unwrap();
        assert_eq!(svc.week_start().unwrap(), Weekday::Sun);
        // Existing periods keep their start date
        let still = svc.get_or_create_period(date(2024, 6, 16)).unwrap();
        assert_eq!(still.id, monday_week.id);
        let next = svc.get_or_create_period(date(2024, 6, 18)).unwrap();
        assert_eq!(next.start_date, date(2024, 6, 17));
        let sunday_week = svc.get_or_create_period(date(2024, 7, 3)).unwrap();
        assert_eq!(sunday_week.start_date, date(2024, 6, 30));
    }

    #[test]
    fn test_week_start_change_never_overlaps_later_period() {
        let svc = PlannerService::new_in_memory().unwrap();
        let monday_week = svc.get_or_create_period(date(2024, 6, 17)).unwrap();

        svc.set_week_start(Weekday::Sun).unwrap();
        let before = svc.get_or_create_period(date(2024, 6, 16)).unwrap();
        assert_ne!(before.id, monday_week.id);
        assert!(before.end_date() < monday_week.start_date);
        assert!(before.contains(date(2024, 6, 16)));
        assert_eq!(before.start_date, date(2024, 6, 10));

        for day in 10..=23 {
            let containing = svc
                .list_periods()
                .unwrap()
                .into_iter()
                .filter(|p| p.contains(date(2024, 6, day)))
                .count();
            assert_eq!(containing, 1, "2024-06-{day}");
        }
        assert_eq!(
            svc.get_or_create_period(date(2024, 6, 18)).unwrap().id,
            monday_week.id
        );
    }

    #[test]
    fn test_period_refused_in_short_gap() {
        let svc = PlannerService::new_in_memory().unwrap();
        svc.get_or_create_period(date(2024, 6, 12)).unwrap();
        svc.set_week_start(Weekday::Thu).unwrap();
        let thursday_week = svc.get_or_create_period(date(2024, 6, 21)).unwrap();
        assert_eq!(thursday_week.start_date, date(2024, 6, 20));

        let err = svc.get_or_create_period(date(2024, 6, 18)).unwrap_err();
        assert!(err.to_string().contains("gap"));
        assert_eq!(svc.list_periods().unwrap().len(), 2);
    }

    #[test]
    fn test_mixed_units_saved_with_entry() {
        let svc = PlannerService::new_in_memory().unwrap();
        let garlic = ingredient(&svc, "Garlic", "produce", "g");
        let sauce = svc.create_recipe("Sauce", None).unwrap();
        svc.add_recipe_ingredient(sauce.id, &uses(garlic.id, 20.0, "g"))
            .unwrap();
        let bread = svc.create_recipe("Garlic bread", None).unwrap();
        svc.add_recipe_ingredient(bread.id, &uses(garlic.id, 3.0, "cloves"))
            .unwrap();
        let period = svc.get_or_create_period(date(2024, 6, 12)).unwrap();
        let meal = svc.schedule_meal(period.id, 0, "dinner", 2.0).unwrap();
        svc.assign_recipe(meal.id, sauce.id).unwrap();
        svc.assign_recipe(meal.id, bread.id).unwrap();

        assert_eq!(svc.generate_list_for_period(period.id).unwrap().created, 1);
        let entries = svc.list_entries(period.id).unwrap();
        assert_eq!(entries.len(), 1);
        assert!((entries[0].quantity - 20.0).abs() < 1e-9);
        assert_eq!(entries[0].unit, "g");
        assert_eq!(entries[0].unreconciled.len(), 1);
        assert_eq!(entries[0].unreconciled[0].unit, "cloves");
        assert!((entries[0].unreconciled[0].quantity - 3.0).abs() < 1e-9);

        let before = svc.get_period(period.id).unwrap().updated_at;
        let summary = svc.generate_list_for_period(period.id).unwrap();
        assert_eq!(summary, ReconcileSummary::default());
        assert_eq!(svc.get_period(period.id).unwrap().updated_at, before);

        let rows = svc
            .grouped_view(date(2024, 6, 10), date(2024, 6, 16), ListView::PantryCheck)
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert!((rows[0].total_quantity - 20.0).abs() < 1e-9);
        assert_eq!(rows[0].unreconciled, entries[0].unreconciled);

        // Dropping the cloves recipe clears the leftover amount
        svc.unassign_recipe(meal.id, bread.id).unwrap();
        assert_eq!(svc.generate_list_for_period(period.id).unwrap().updated, 1);
        assert!(svc.list_entries(period.id).unwrap()[0].unreconciled.is_empty());
    }

    #[test]
    fn test_recipe_use_defaults_to_ingredient_unit() {
        let svc = PlannerService::new_in_memory().unwrap();
        let rice = ingredient(&svc, "Rice", "pantry", "g");
        let cumin = ingredient(&svc, "Cumin", "spices", "");
        let recipe = svc.create_recipe("Pilaf", None).unwrap();

        let bare = svc
            .add_recipe_ingredient(recipe.id, &uses(rice.id, 500.0, ""))
            .unwrap();
        assert_eq!(bare.unit, "g");
        let explicit = svc
            .add_recipe_ingredient(recipe.id, &uses(rice.id, 1.0, "cup"))
            .unwrap();
        assert_eq!(explicit.unit, "cup");
        let no_default = svc
            .add_recipe_ingredient(recipe.id, &uses(cumin.id, 2.0, ""))
            .unwrap();
        assert_eq!(no_default.unit, "");
    }

    #[test]
    fn test_delete_ingredient_refused_while_used() {
        let RiceWeek { svc, rice, .. } = rice_week();
        assert!(svc.delete_ingredient(rice.id).is_err());
        let unused = ingredient(&svc, "Cumin", "spices", "g");
        assert!(svc.delete_ingredient(unused.id).unwrap());
    }

    #[test]
    fn test_duplicate_ingredient_rejected() {
        let svc = PlannerService::new_in_memory().unwrap();
        let created = ingredient(&svc, "  Basil ", "", "");
        assert_eq!(created.name, "Basil");
        assert_eq!(created.category, DEFAULT_CATEGORY);
        let err = svc
            .create_ingredient(&NewIngredient {
                name: "basil".to_string(),
                category: "herbs".to_string(),
                default_unit: "g".to_string(),
            })
            .unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn test_schedule_meal_validation() {
        let svc = PlannerService::new_in_memory().unwrap();
        let period = svc.get_or_create_period(date(2024, 6, 10)).unwrap();
        assert!(svc.schedule_meal(period.id, 7, "dinner", 2.0).is_err());
        assert!(svc.schedule_meal(period.id, 0, "brunch", 2.0).is_err());
        assert!(svc.schedule_meal(period.id, 0, "dinner", 0.0).is_err());
        assert!(svc.schedule_meal(999, 0, "dinner", 2.0).is_err());
        let meal = svc.schedule_meal(period.id, 0, "Dinner", 2.0).unwrap();
        assert_eq!(meal.meal_type, "dinner");
    }

    #[test]
    fn test_custom_and_unlinked_meals_add_no_demand() {
        let svc = PlannerService::new_in_memory().unwrap();
        let recipe = svc.create_recipe("Salad", None).unwrap();
        svc.add_recipe_ingredient(
            recipe.id,
            &NewRecipeIngredientUse {
                ingredient_id: None,
                custom_name: Some("Whatever is in the fridge".to_string()),
                quantity: 1.0,
                unit: String::new(),
                preparation: None,
            },
        )
        .unwrap();
        let period = svc.get_or_create_period(date(2024, 6, 10)).unwrap();
        let lunch = svc.schedule_meal(period.id, 0, "lunch", 1.0).unwrap();
        svc.assign_recipe(lunch.id, recipe.id).unwrap();
        let dinner = svc.schedule_meal(period.id, 0, "dinner", 2.0).unwrap();
        svc.set_meal_custom_name(dinner.id, Some("Eating out")).unwrap();

        assert!(svc.demand_for_period(period.id).unwrap().is_empty());
        let summary = svc.generate_list_for_period(period.id).unwrap();
        assert_eq!(summary, ReconcileSummary::default());
    }

    #[test]
    fn test_import_catalog_csv() {
        let svc = PlannerService::new_in_memory().unwrap();
        let summary = svc
            .import_catalog_csv("name,category,default_unit\nRice,pantry,g\nEggs,dairy,pcs\n", false)
            .unwrap();
        assert_eq!(summary.ingredients_created, 2);
        assert!(svc.find_ingredient_by_name("eggs").unwrap().is_some());
    }
}
