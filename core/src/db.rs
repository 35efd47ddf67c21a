use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::{Local, NaiveDate};
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use crate::models::{
    DATE_FORMAT, Ingredient, ListEntry, NewIngredient, NewListEntry, NewRecipeIngredientUse,
    NewScheduledMeal, Period, Recipe, RecipeDetail, RecipeIngredientUse, ScheduledMeal,
    meal_type_order, normalize_name,
};
use crate::reconcile::ReconcilePlan;
use crate::units::NormalizedQuantity;

pub struct Database {
    conn: Connection,
}

// Columns expected by `entry_from_row`
const ENTRY_SELECT: &str = "SELECT le.id, le.uuid, le.period_id, le.ingredient_id, le.custom_name,
        le.quantity, le.unit, le.category, le.is_manual, le.pantry_checked, le.is_in_pantry,
        le.is_checked, le.created_at, le.checked_at, le.checked_by, le.updated_at, i.name
     FROM list_entries le
     LEFT JOIN ingredients i ON le.ingredient_id = i.id";

const MEAL_SELECT: &str = "SELECT id, uuid, period_id, day, meal_type, servings, custom_name,
        skipped, created_at, updated_at
     FROM scheduled_meals";

const USE_SELECT: &str = "SELECT ri.id, ri.uuid, ri.recipe_id, ri.ingredient_id, ri.custom_name,
        ri.quantity, ri.unit, ri.sort_index, ri.preparation, i.name, i.category
     FROM recipe_ingredients ri
     LEFT JOIN ingredients i ON ri.ingredient_id = i.id";

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    #[allow(clippy::too_many_lines)]
    fn migrate(&self) -> Result<()> {
        self.conn.pragma_update(None, "foreign_keys", true)?;

        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS ingredients (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    uuid TEXT NOT NULL UNIQUE,
                    name TEXT NOT NULL,
                    normalized_name TEXT NOT NULL UNIQUE,
                    category TEXT NOT NULL,
                    default_unit TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS recipes (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    uuid TEXT NOT NULL UNIQUE,
                    name TEXT NOT NULL,
                    base_servings REAL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS recipe_ingredients (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    uuid TEXT NOT NULL UNIQUE,
                    recipe_id INTEGER NOT NULL REFERENCES recipes(id) ON DELETE CASCADE,
                    ingredient_id INTEGER REFERENCES ingredients(id),
                    custom_name TEXT,
                    quantity REAL NOT NULL,
                    unit TEXT NOT NULL,
                    sort_index INTEGER NOT NULL,
                    preparation TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS periods (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    uuid TEXT NOT NULL UNIQUE,
                    start_date TEXT NOT NULL UNIQUE,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS scheduled_meals (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    uuid TEXT NOT NULL UNIQUE,
                    period_id INTEGER NOT NULL REFERENCES periods(id) ON DELETE CASCADE,
                    day INTEGER NOT NULL CHECK (day BETWEEN 0 AND 6),
                    meal_type TEXT NOT NULL,
                    servings REAL NOT NULL,
                    custom_name TEXT,
                    skipped INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS meal_recipes (
                    meal_id INTEGER NOT NULL REFERENCES scheduled_meals(id) ON DELETE CASCADE,
                    recipe_id INTEGER NOT NULL REFERENCES recipes(id) ON DELETE CASCADE,
                    position INTEGER NOT NULL,
                    PRIMARY KEY (meal_id, recipe_id)
                );

                CREATE TABLE IF NOT EXISTS list_entries (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    uuid TEXT NOT NULL UNIQUE,
                    period_id INTEGER REFERENCES periods(id) ON DELETE CASCADE,
                    ingredient_id INTEGER REFERENCES ingredients(id),
                    custom_name TEXT,
                    quantity REAL NOT NULL,
                    unit TEXT NOT NULL,
                    category TEXT NOT NULL,
                    is_manual INTEGER NOT NULL DEFAULT 0,
                    pantry_checked INTEGER NOT NULL DEFAULT 0,
                    is_in_pantry INTEGER NOT NULL DEFAULT 0,
                    is_checked INTEGER NOT NULL DEFAULT 0,
                    checked_at TEXT,
                    checked_by TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    CHECK (ingredient_id IS NOT NULL OR custom_name IS NOT NULL)
                );

                CREATE TABLE IF NOT EXISTS entry_meals (
                    entry_id INTEGER NOT NULL REFERENCES list_entries(id) ON DELETE CASCADE,
                    meal_id INTEGER NOT NULL REFERENCES scheduled_meals(id) ON DELETE CASCADE,
                    PRIMARY KEY (entry_id, meal_id)
                );

                CREATE TABLE IF NOT EXISTS user_settings (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_recipe_ingredients_recipe ON recipe_ingredients(recipe_id);
                CREATE INDEX IF NOT EXISTS idx_scheduled_meals_period ON scheduled_meals(period_id);
                CREATE INDEX IF NOT EXISTS idx_list_entries_period ON list_entries(period_id);
                CREATE INDEX IF NOT EXISTS idx_list_entries_ingredient ON list_entries(ingredient_id);
                CREATE INDEX IF NOT EXISTS idx_entry_meals_meal ON entry_meals(meal_id);

                PRAGMA user_version = 1;",
            )?;
        }

        if version < 2 {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS entry_unreconciled (
                    entry_id INTEGER NOT NULL REFERENCES list_entries(id) ON DELETE CASCADE,
                    unit TEXT NOT NULL,
                    quantity REAL NOT NULL,
                    PRIMARY KEY (entry_id, unit)
                );

                PRAGMA user_version = 2;",
            )?;
        }

        Ok(())
    }

    // --- Row mapping helpers ---

    fn ingredient_from_row(row: &rusqlite::Row) -> rusqlite::Result<Ingredient> {
        Ok(Ingredient {
            id: row.get(0)?,
            uuid: row.get(1)?,
            name: row.get(2)?,
            normalized_name: row.get(3)?,
            category: row.get(4)?,
            default_unit: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    fn recipe_from_row(row: &rusqlite::Row) -> rusqlite::Result<Recipe> {
        Ok(Recipe {
            id: row.get(0)?,
            uuid: row.get(1)?,
            name: row.get(2)?,
            base_servings: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }

    fn recipe_use_from_row(row: &rusqlite::Row) -> rusqlite::Result<RecipeIngredientUse> {
        Ok(RecipeIngredientUse {
            id: row.get(0)?,
            uuid: row.get(1)?,
            recipe_id: row.get(2)?,
            ingredient_id: row.get(3)?,
            custom_name: row.get(4)?,
            quantity: row.get(5)?,
            unit: row.get(6)?,
            sort_index: row.get(7)?,
            preparation: row.get(8)?,
            ingredient_name: row.get(9)?,
            category: row.get(10)?,
        })
    }

    fn period_from_row(row: &rusqlite::Row) -> rusqlite::Result<Period> {
        let start: String = row.get(2)?;
        let start_date = NaiveDate::parse_from_str(&start, DATE_FORMAT).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
        })?;
        Ok(Period {
            id: row.get(0)?,
            uuid: row.get(1)?,
            start_date,
            created_at: row.get(3)?,
            updated_at: row.get(4)?,
        })
    }

    // Recipe ids are filled in separately
    fn meal_from_row(row: &rusqlite::Row) -> rusqlite::Result<ScheduledMeal> {
        Ok(ScheduledMeal {
            id: row.get(0)?,
            uuid: row.get(1)?,
            period_id: row.get(2)?,
            day: row.get(3)?,
            meal_type: row.get(4)?,
            servings: row.get(5)?,
            recipe_ids: Vec::new(),
            custom_name: row.get(6)?,
            skipped: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }

    // Meal ids are filled in separately
    fn entry_from_row(row: &rusqlite::Row) -> rusqlite::Result<ListEntry> {
        Ok(ListEntry {
            id: row.get(0)?,
            uuid: row.get(1)?,
            period_id: row.get(2)?,
            ingredient_id: row.get(3)?,
            custom_name: row.get(4)?,
            quantity: row.get(5)?,
            unit: row.get(6)?,
            category: row.get(7)?,
            is_manual: row.get(8)?,
            pantry_checked: row.get(9)?,
            is_in_pantry: row.get(10)?,
            is_checked: row.get(11)?,
            created_at: row.get(12)?,
            checked_at: row.get(13)?,
            checked_by: row.get(14)?,
            updated_at: row.get(15)?,
            meal_ids: Vec::new(),
            unreconciled: Vec::new(),
            ingredient_name: row.get(16)?,
        })
    }

    // --- Ingredients ---

    pub fn insert_ingredient(&self, ingredient: &NewIngredient) -> Result<Ingredient> {
        let now = Local::now().to_rfc3339();
        let uuid = Uuid::new_v4().to_string();
        self.conn
            .execute(
                "INSERT INTO ingredients (uuid, name, normalized_name, category, default_unit, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    uuid,
                    ingredient.name.trim(),
                    normalize_name(&ingredient.name),
                    ingredient.category,
                    ingredient.default_unit,
                    now,
                    now,
                ],
            )
            .with_context(|| format!("Failed to add ingredient '{}'", ingredient.name.trim()))?;
        let id = self.conn.last_insert_rowid();
        self.get_ingredient(id)
    }

    pub fn get_ingredient(&self, id: i64) -> Result<Ingredient> {
        self.conn
            .query_row(
                "SELECT id, uuid, name, normalized_name, category, default_unit, created_at, updated_at
                 FROM ingredients WHERE id = ?1",
                params![id],
                Self::ingredient_from_row,
            )
            .optional()?
            .context("Ingredient not found")
    }

    pub fn find_ingredient_by_name(&self, name: &str) -> Result<Option<Ingredient>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, uuid, name, normalized_name, category, default_unit, created_at, updated_at
             FROM ingredients WHERE normalized_name = ?1",
        )?;
        let mut rows = stmt.query(params![normalize_name(name)])?;
        if let Some(row) = rows.next()? {
            Ok(Some(Self::ingredient_from_row(row)?))
        } else {
            Ok(None)
        }
    }

    pub fn list_ingredients(&self, search: Option<&str>) -> Result<Vec<Ingredient>> {
        let pattern = match search {
            Some(query) => {
                let escaped = normalize_name(query)
                    .replace('\\', "\\\\")
                    .replace('%', "\\%")
                    .replace('_', "\\_");
                format!("%{escaped}%")
            }
            None => "%".to_string(),
        };
        let mut stmt = self.conn.prepare(
            "SELECT id, uuid, name, normalized_name, category, default_unit, created_at, updated_at
             FROM ingredients WHERE normalized_name LIKE ?1 ESCAPE '\\'
             ORDER BY category, normalized_name",
        )?;
        let ingredients = stmt
            .query_map(params![pattern], Self::ingredient_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ingredients)
    }

    /// Whether any recipe or list entry refers to the ingredient.
    pub fn ingredient_in_use(&self, id: i64) -> Result<bool> {
        let in_use: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM recipe_ingredients WHERE ingredient_id = ?1)
                 OR EXISTS(SELECT 1 FROM list_entries WHERE ingredient_id = ?1)",
            params![id],
            |row| row.get(0),
        )?;
        Ok(in_use)
    }

    pub fn delete_ingredient(&self, id: i64) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM ingredients WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    // --- Recipes ---

    pub fn create_recipe(&self, name: &str, base_servings: Option<f64>) -> Result<Recipe> {
        let now = Local::now().to_rfc3339();
        let uuid = Uuid::new_v4().to_string();
        self.conn.execute(
            "INSERT INTO recipes (uuid, name, base_servings, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![uuid, name.trim(), base_servings, now, now],
        )?;
        let id = self.conn.last_insert_rowid();
        self.get_recipe(id)
    }

    pub fn get_recipe(&self, id: i64) -> Result<Recipe> {
        self.conn
            .query_row(
                "SELECT id, uuid, name, base_servings, created_at, updated_at FROM recipes WHERE id = ?1",
                params![id],
                Self::recipe_from_row,
            )
            .optional()?
            .context("Recipe not found")
    }

    pub fn find_recipe_by_name(&self, name: &str) -> Result<Option<Recipe>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, uuid, name, base_servings, created_at, updated_at
             FROM recipes WHERE LOWER(name) = LOWER(?1) ORDER BY id LIMIT 1",
        )?;
        let mut rows = stmt.query(params![name.trim()])?;
        if let Some(row) = rows.next()? {
            Ok(Some(Self::recipe_from_row(row)?))
        } else {
            Ok(None)
        }
    }

    pub fn list_recipes(&self) -> Result<Vec<Recipe>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, uuid, name, base_servings, created_at, updated_at
             FROM recipes ORDER BY LOWER(name), id",
        )?;
        let recipes = stmt
            .query_map([], Self::recipe_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(recipes)
    }

    pub fn set_recipe_servings(&self, recipe_id: i64, base_servings: Option<f64>) -> Result<()> {
        let now = Local::now().to_rfc3339();
        let rows = self.conn.execute(
            "UPDATE recipes SET base_servings = ?1, updated_at = ?2 WHERE id = ?3",
            params![base_servings, now, recipe_id],
        )?;
        if rows == 0 {
            bail!("Recipe not found");
        }
        Ok(())
    }

    /// Deleting a recipe drops its ingredient uses and unassigns it from meals.
    pub fn delete_recipe(&self, recipe_id: i64) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM recipes WHERE id = ?1", params![recipe_id])?;
        Ok(rows > 0)
    }

    pub fn add_recipe_ingredient(
        &self,
        recipe_id: i64,
        new_use: &NewRecipeIngredientUse,
    ) -> Result<RecipeIngredientUse> {
        let now = Local::now().to_rfc3339();
        let uuid = Uuid::new_v4().to_string();
        let custom_name = new_use
            .custom_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty());
        self.conn.execute(
            "INSERT INTO recipe_ingredients
                (uuid, recipe_id, ingredient_id, custom_name, quantity, unit, sort_index, preparation, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6,
                (SELECT COALESCE(MAX(sort_index), -1) + 1 FROM recipe_ingredients WHERE recipe_id = ?2),
                ?7, ?8, ?9)",
            params![
                uuid,
                recipe_id,
                new_use.ingredient_id,
                custom_name,
                new_use.quantity,
                new_use.unit.trim(),
                new_use.preparation,
                now,
                now,
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        self.touch_recipe(recipe_id, &now)?;
        self.get_recipe_ingredient(id)
    }

    pub fn get_recipe_ingredient(&self, id: i64) -> Result<RecipeIngredientUse> {
        self.conn
            .query_row(
                &format!("{USE_SELECT} WHERE ri.id = ?1"),
                params![id],
                Self::recipe_use_from_row,
            )
            .optional()?
            .context("Recipe ingredient not found")
    }

    pub fn remove_recipe_ingredient(&self, recipe_id: i64, use_id: i64) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM recipe_ingredients WHERE recipe_id = ?1 AND id = ?2",
            params![recipe_id, use_id],
        )?;
        if rows > 0 {
            self.touch_recipe(recipe_id, &Local::now().to_rfc3339())?;
        }
        Ok(rows > 0)
    }

    pub fn get_recipe_ingredients(&self, recipe_id: i64) -> Result<Vec<RecipeIngredientUse>> {
        let mut stmt = self.conn.prepare(&format!(
            "{USE_SELECT} WHERE ri.recipe_id = ?1 ORDER BY ri.sort_index, ri.id"
        ))?;
        let uses = stmt
            .query_map(params![recipe_id], Self::recipe_use_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(uses)
    }

    pub fn get_recipe_detail(&self, recipe_id: i64) -> Result<RecipeDetail> {
        let recipe = self.get_recipe(recipe_id)?;
        let ingredients = self.get_recipe_ingredients(recipe_id)?;
        Ok(RecipeDetail {
            recipe,
            ingredients,
        })
    }

    /// Details for every listed recipe that still exists.
    pub fn get_recipe_details(&self, ids: &[i64]) -> Result<HashMap<i64, RecipeDetail>> {
        let mut details = HashMap::new();
        for &id in ids {
            if details.contains_key(&id) {
                continue;
            }
            let exists: bool = self.conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM recipes WHERE id = ?1)",
                params![id],
                |row| row.get(0),
            )?;
            if exists {
                details.insert(id, self.get_recipe_detail(id)?);
            }
        }
        Ok(details)
    }

    fn touch_recipe(&self, recipe_id: i64, now: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE recipes SET updated_at = ?1 WHERE id = ?2",
            params![now, recipe_id],
        )?;
        Ok(())
    }

    // --- Periods ---

    pub fn insert_period(&self, start_date: NaiveDate) -> Result<Period> {
        let now = Local::now().to_rfc3339();
        let uuid = Uuid::new_v4().to_string();
        self.conn.execute(
            "INSERT INTO periods (uuid, start_date, created_at, updated_at) VALUES (?1, ?2, ?3, ?4)",
            params![uuid, start_date.format(DATE_FORMAT).to_string(), now, now],
        )?;
        let id = self.conn.last_insert_rowid();
        self.get_period(id)
    }

    pub fn get_period(&self, id: i64) -> Result<Period> {
        self.conn
            .query_row(
                "SELECT id, uuid, start_date, created_at, updated_at FROM periods WHERE id = ?1",
                params![id],
                Self::period_from_row,
            )
            .optional()?
            .context("Period not found")
    }

    /// Periods whose start date falls within `from..=to`, oldest first.
    pub fn list_periods_starting_between(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<Period>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, uuid, start_date, created_at, updated_at FROM periods
             WHERE start_date >= ?1 AND start_date <= ?2
             ORDER BY start_date",
        )?;
        let periods = stmt
            .query_map(
                params![
                    from.format(DATE_FORMAT).to_string(),
                    to.format(DATE_FORMAT).to_string()
                ],
                Self::period_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(periods)
    }

    pub fn list_periods(&self) -> Result<Vec<Period>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, uuid, start_date, created_at, updated_at FROM periods ORDER BY start_date",
        )?;
        let periods = stmt
            .query_map([], Self::period_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(periods)
    }

    /// Deleting a period deletes its meals and list entries.
    pub fn delete_period(&self, id: i64) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM periods WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    // --- Scheduled meals ---

    pub fn insert_meal(&self, meal: &NewScheduledMeal) -> Result<ScheduledMeal> {
        let now = Local::now().to_rfc3339();
        let uuid = Uuid::new_v4().to_string();
        self.conn.execute(
            "INSERT INTO scheduled_meals (uuid, period_id, day, meal_type, servings, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![uuid, meal.period_id, meal.day, meal.meal_type, meal.servings, now, now],
        )?;
        let id = self.conn.last_insert_rowid();
        self.get_meal(id)
    }

    pub fn get_meal(&self, id: i64) -> Result<ScheduledMeal> {
        let mut meal = self
            .conn
            .query_row(
                &format!("{MEAL_SELECT} WHERE id = ?1"),
                params![id],
                Self::meal_from_row,
            )
            .optional()?
            .context("Meal not found")?;
        meal.recipe_ids = self.meal_recipe_ids(id)?;
        Ok(meal)
    }

    /// A period's meals ordered by day, then meal type.
    pub fn list_meals(&self, period_id: i64) -> Result<Vec<ScheduledMeal>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{MEAL_SELECT} WHERE period_id = ?1"))?;
        let mut meals = stmt
            .query_map(params![period_id], Self::meal_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        for meal in &mut meals {
            meal.recipe_ids = self.meal_recipe_ids(meal.id)?;
        }
        meals.sort_by(|a, b| {
            a.day
                .cmp(&b.day)
                .then(meal_type_order(&a.meal_type).cmp(&meal_type_order(&b.meal_type)))
                .then(a.id.cmp(&b.id))
        });
        Ok(meals)
    }

    fn meal_recipe_ids(&self, meal_id: i64) -> Result<Vec<i64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT recipe_id FROM meal_recipes WHERE meal_id = ?1 ORDER BY position")?;
        let ids = stmt
            .query_map(params![meal_id], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// Assigning a recipe clears the meal's custom name and skipped flag.
    pub fn assign_recipe(&self, meal_id: i64, recipe_id: i64) -> Result<ScheduledMeal> {
        let now = Local::now().to_rfc3339();
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT OR IGNORE INTO meal_recipes (meal_id, recipe_id, position)
             VALUES (?1, ?2, (SELECT COALESCE(MAX(position), -1) + 1 FROM meal_recipes WHERE meal_id = ?1))",
            params![meal_id, recipe_id],
        )?;
        tx.execute(
            "UPDATE scheduled_meals SET custom_name = NULL, skipped = 0, updated_at = ?1 WHERE id = ?2",
            params![now, meal_id],
        )?;
        tx.commit()?;
        self.get_meal(meal_id)
    }

    pub fn unassign_recipe(&self, meal_id: i64, recipe_id: i64) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM meal_recipes WHERE meal_id = ?1 AND recipe_id = ?2",
            params![meal_id, recipe_id],
        )?;
        if rows > 0 {
            self.touch_meal(meal_id)?;
        }
        Ok(rows > 0)
    }

    /// Naming a meal removes its recipes and clears the skipped flag.
    pub fn set_meal_custom_name(&self, meal_id: i64, name: Option<&str>) -> Result<ScheduledMeal> {
        let now = Local::now().to_rfc3339();
        let tx = self.conn.unchecked_transaction()?;
        if name.is_some() {
            tx.execute("DELETE FROM meal_recipes WHERE meal_id = ?1", params![meal_id])?;
        }
        tx.execute(
            "UPDATE scheduled_meals SET custom_name = ?1, skipped = 0, updated_at = ?2 WHERE id = ?3",
            params![name, now, meal_id],
        )?;
        tx.commit()?;
        self.get_meal(meal_id)
    }

    /// Skipping a meal removes its recipes and custom name.
    pub fn set_meal_skipped(&self, meal_id: i64, skipped: bool) -> Result<ScheduledMeal> {
        let now = Local::now().to_rfc3339();
        let tx = self.conn.unchecked_transaction()?;
        if skipped {
            tx.execute("DELETE FROM meal_recipes WHERE meal_id = ?1", params![meal_id])?;
            tx.execute(
                "UPDATE scheduled_meals SET custom_name = NULL, skipped = 1, updated_at = ?1 WHERE id = ?2",
                params![now, meal_id],
            )?;
        } else {
            tx.execute(
                "UPDATE scheduled_meals SET skipped = 0, updated_at = ?1 WHERE id = ?2",
                params![now, meal_id],
            )?;
        }
        tx.commit()?;
        self.get_meal(meal_id)
    }

    pub fn set_meal_servings(&self, meal_id: i64, servings: f64) -> Result<ScheduledMeal> {
        let now = Local::now().to_rfc3339();
        self.conn.execute(
            "UPDATE scheduled_meals SET servings = ?1, updated_at = ?2 WHERE id = ?3",
            params![servings, now, meal_id],
        )?;
        self.get_meal(meal_id)
    }

    pub fn delete_meal(&self, id: i64) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM scheduled_meals WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    fn touch_meal(&self, meal_id: i64) -> Result<()> {
        let now = Local::now().to_rfc3339();
        self.conn.execute(
            "UPDATE scheduled_meals SET updated_at = ?1 WHERE id = ?2",
            params![now, meal_id],
        )?;
        Ok(())
    }

    // --- List entries ---

    fn insert_entry_row(conn: &Connection, entry: &NewListEntry, now: &str) -> Result<i64> {
        let uuid = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO list_entries
                (uuid, period_id, ingredient_id, custom_name, quantity, unit, category,
                 is_manual, pantry_checked, is_in_pantry, is_checked, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0, 0, ?10, ?11)",
            params![
                uuid,
                entry.period_id,
                entry.ingredient_id,
                entry.custom_name,
                entry.quantity,
                entry.unit,
                entry.category,
                entry.is_manual,
                // Manual entries never wait for the pantry check
                entry.pantry_checked || entry.is_manual,
                now,
                now,
            ],
        )?;
        let id = conn.last_insert_rowid();
        Self::replace_entry_meals(conn, id, &entry.meal_ids)?;
        Self::replace_entry_unreconciled(conn, id, &entry.unreconciled)?;
        Ok(id)
    }

    fn replace_entry_meals(conn: &Connection, entry_id: i64, meal_ids: &[i64]) -> Result<()> {
        conn.execute("DELETE FROM entry_meals WHERE entry_id = ?1", params![entry_id])?;
        let mut stmt =
            conn.prepare("INSERT OR IGNORE INTO entry_meals (entry_id, meal_id) VALUES (?1, ?2)")?;
        for meal_id in meal_ids {
            stmt.execute(params![entry_id, meal_id])?;
        }
        Ok(())
    }

    fn replace_entry_unreconciled(
        conn: &Connection,
        entry_id: i64,
        amounts: &[NormalizedQuantity],
    ) -> Result<()> {
        conn.execute(
            "DELETE FROM entry_unreconciled WHERE entry_id = ?1",
            params![entry_id],
        )?;
        let mut stmt = conn.prepare(
            "INSERT INTO entry_unreconciled (entry_id, unit, quantity) VALUES (?1, ?2, ?3)
             ON CONFLICT(entry_id, unit) DO UPDATE SET quantity = quantity + excluded.quantity",
        )?;
        for amount in amounts {
            stmt.execute(params![entry_id, amount.unit, amount.quantity])?;
        }
        Ok(())
    }

    /// Load contributing meals and unreconciled amounts.
    fn fill_entry_links(&self, entries: &mut [ListEntry]) -> Result<()> {
        let mut meals = self
            .conn
            .prepare("SELECT meal_id FROM entry_meals WHERE entry_id = ?1 ORDER BY rowid")?;
        let mut extra = self.conn.prepare(
            "SELECT quantity, unit FROM entry_unreconciled WHERE entry_id = ?1 ORDER BY unit",
        )?;
        for entry in entries {
            entry.meal_ids = meals
                .query_map(params![entry.id], |row| row.get(0))?
                .collect::<Result<Vec<_>, _>>()?;
            entry.unreconciled = extra
                .query_map(params![entry.id], |row| {
                    Ok(NormalizedQuantity {
                        quantity: row.get(0)?,
                        unit: row.get(1)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
        }
        Ok(())
    }

    fn query_entries(&self, sql: &str, args: impl rusqlite::Params) -> Result<Vec<ListEntry>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut entries = stmt
            .query_map(args, Self::entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        self.fill_entry_links(&mut entries)?;
        Ok(entries)
    }

    pub fn insert_list_entry(&self, entry: &NewListEntry) -> Result<ListEntry> {
        let now = Local::now().to_rfc3339();
        let tx = self.conn.unchecked_transaction()?;
        let id = Self::insert_entry_row(&tx, entry, &now)?;
        tx.commit()?;
        self.get_list_entry(id)
    }

    pub fn get_list_entry(&self, id: i64) -> Result<ListEntry> {
        self.query_entries(&format!("{ENTRY_SELECT} WHERE le.id = ?1"), params![id])?
            .pop()
            .context("List entry not found")
    }

    /// A period's entries in creation order.
    pub fn list_entries_for_period(&self, period_id: i64) -> Result<Vec<ListEntry>> {
        self.query_entries(
            &format!("{ENTRY_SELECT} WHERE le.period_id = ?1 ORDER BY le.id"),
            params![period_id],
        )
    }

    pub fn list_entries_for_periods(&self, period_ids: &[i64]) -> Result<Vec<ListEntry>> {
        let mut entries = Vec::new();
        for &period_id in period_ids {
            entries.extend(self.list_entries_for_period(period_id)?);
        }
        entries.sort_by_key(|e| e.id);
        Ok(entries)
    }

    pub fn delete_list_entry(&self, id: i64) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM list_entries WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    pub fn delete_list_entries(&self, ids: &[i64]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let mut removed = 0;
        for id in ids {
            removed += tx.execute("DELETE FROM list_entries WHERE id = ?1", params![id])?;
        }
        tx.commit()?;
        Ok(removed)
    }

    /// Clear an entry's period reference, leaving it orphaned.
    pub fn detach_entry(&self, id: i64) -> Result<bool> {
        let now = Local::now().to_rfc3339();
        let rows = self.conn.execute(
            "UPDATE list_entries SET period_id = NULL, updated_at = ?1 WHERE id = ?2",
            params![now, id],
        )?;
        Ok(rows > 0)
    }

    /// Remove derived entries that no longer belong to a period. Manual
    /// entries without a period are kept.
    pub fn delete_orphaned_derived_entries(&self) -> Result<usize> {
        let rows = self.conn.execute(
            "DELETE FROM list_entries WHERE period_id IS NULL AND is_manual = 0",
            [],
        )?;
        Ok(rows)
    }

    fn write_entry_state(conn: &Connection, entry: &ListEntry, now: &str) -> Result<()> {
        let rows = conn.execute(
            "UPDATE list_entries
             SET pantry_checked = ?1, is_in_pantry = ?2, is_checked = ?3,
                 checked_at = ?4, checked_by = ?5, updated_at = ?6
             WHERE id = ?7",
            params![
                entry.pantry_checked || entry.is_manual,
                entry.is_in_pantry,
                entry.is_checked,
                entry.checked_at,
                entry.checked_by,
                now,
                entry.id,
            ],
        )?;
        if rows == 0 {
            bail!("List entry not found");
        }
        Ok(())
    }

    /// Persist an entry's flags and check stamps.
    pub fn save_entry_state(&self, entry: &ListEntry) -> Result<()> {
        Self::write_entry_state(&self.conn, entry, &Local::now().to_rfc3339())
    }

    pub fn save_entry_states<'a>(&self, entries: impl IntoIterator<Item = &'a ListEntry>) -> Result<usize> {
        let now = Local::now().to_rfc3339();
        let tx = self.conn.unchecked_transaction()?;
        let mut saved = 0;
        for entry in entries {
            Self::write_entry_state(&tx, entry, &now)?;
            saved += 1;
        }
        tx.commit()?;
        Ok(saved)
    }

    /// Apply a reconciliation plan atomically. The period's timestamp only
    /// moves when something was written.
    pub fn apply_reconcile_plan(&self, period_id: i64, plan: &ReconcilePlan) -> Result<()> {
        if plan.is_empty() {
            return Ok(());
        }
        let now = Local::now().to_rfc3339();
        let tx = self.conn.unchecked_transaction()?;

        for id in &plan.removals {
            tx.execute(
                "DELETE FROM list_entries WHERE id = ?1 AND is_manual = 0",
                params![id],
            )?;
        }
        for update in &plan.updates {
            tx.execute(
                "UPDATE list_entries SET quantity = ?1, unit = ?2, updated_at = ?3 WHERE id = ?4",
                params![update.quantity, update.unit, now, update.entry_id],
            )?;
            Self::replace_entry_meals(&tx, update.entry_id, &update.meal_ids)?;
            Self::replace_entry_unreconciled(&tx, update.entry_id, &update.unreconciled)?;
        }
        for entry in &plan.creates {
            Self::insert_entry_row(&tx, entry, &now)?;
        }
        tx.execute(
            "UPDATE periods SET updated_at = ?1 WHERE id = ?2",
            params![now, period_id],
        )?;

        tx.commit().context("Failed to save grocery list")?;
        Ok(())
    }

    // --- User Settings ---

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let now = Local::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO user_settings (key, value, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, now],
        )?;
        Ok(())
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT value FROM user_settings WHERE key = ?1")?;
        let mut rows = stmt.query(params![key])?;
        if let Some(row) = rows.next()? {
            Ok(Some(row.get(0)?))
        } else {
            Ok(None)
        }
    }
}
