mod commands;
mod config;
mod server;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process;
use tracing_subscriber::EnvFilter;

use crate::commands::{
    cmd_ingredient_add, cmd_ingredient_delete, cmd_ingredient_import, cmd_ingredient_list,
    cmd_list_add, cmd_list_cleanup, cmd_list_delete, cmd_list_generate, cmd_list_show,
    cmd_pantry_remaining, cmd_pantry_set, cmd_pantry_show, cmd_pantry_sync, cmd_plan_add,
    cmd_plan_assign, cmd_plan_name, cmd_plan_remove, cmd_plan_servings, cmd_plan_show,
    cmd_plan_skip, cmd_plan_unassign, cmd_recipe_add_ingredient, cmd_recipe_create,
    cmd_recipe_delete, cmd_recipe_list, cmd_recipe_remove_ingredient, cmd_recipe_servings,
    cmd_recipe_show, cmd_settings_week_start, cmd_shop_check, cmd_shop_show,
};
use crate::config::Config;
use larder_core::service::PlannerService;

#[derive(Parser)]
#[command(
    name = "larder",
    version,
    about = "Plan the week's meals, check the pantry, shop for the rest"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the ingredient catalog
    Ingredient {
        #[command(subcommand)]
        command: IngredientCommands,
    },
    /// Manage recipes
    Recipe {
        #[command(subcommand)]
        command: RecipeCommands,
    },
    /// Plan meals for a week
    Plan {
        #[command(subcommand)]
        command: PlanCommands,
    },
    /// Build and edit a week's grocery list
    List {
        #[command(subcommand)]
        command: ListCommands,
    },
    /// Check planned ingredients against what is already at home
    Pantry {
        #[command(subcommand)]
        command: PantryCommands,
    },
    /// Shopping list across one or more weeks
    Shop {
        #[command(subcommand)]
        command: ShopCommands,
    },
    /// Planner preferences
    Settings {
        #[command(subcommand)]
        command: SettingsCommands,
    },
    /// Start the REST API server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
        /// Address to bind to (default: 127.0.0.1, use 0.0.0.0 to expose to network)
        #[arg(short, long, default_value = "127.0.0.1")]
        bind: String,
        /// Disable API key authentication (for development/testing)
        #[arg(long)]
        no_auth: bool,
    },
}

#[derive(Subcommand)]
enum IngredientCommands {
    /// Add an ingredient to the catalog
    Add {
        /// Ingredient name
        name: String,
        /// Store section, e.g. produce, dairy, pantry
        #[arg(short, long, default_value = "")]
        category: String,
        /// Unit used when none is given
        #[arg(short, long, default_value = "")]
        unit: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List/search the catalog
    List {
        /// Search query to filter ingredients
        #[arg(short, long)]
        search: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove an ingredient no recipe or list uses
    Delete {
        /// Ingredient name
        name: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Import ingredients from a CSV file (name,category,default_unit)
    Import {
        /// Path to the CSV file
        file: std::path::PathBuf,
        /// Preview import without making changes
        #[arg(long)]
        dry_run: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum RecipeCommands {
    /// Create a new recipe
    Create {
        /// Recipe name
        name: String,
        /// Number of servings the quantities are written for
        #[arg(short, long)]
        servings: Option<f64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Add an ingredient to a recipe
    AddIngredient {
        /// Recipe name
        recipe: String,
        /// Ingredient name from the catalog
        ingredient: String,
        /// Quantity (e.g. "500g", "2 cups", "3")
        quantity: String,
        /// Preparation note, e.g. "finely chopped"
        #[arg(long)]
        prep: Option<String>,
        /// Keep the ingredient as free text instead of linking it to the catalog
        #[arg(long)]
        unlinked: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove an ingredient line from a recipe
    RemoveIngredient {
        /// Recipe name
        recipe: String,
        /// Ingredient line ID (shown by `recipe show`)
        line_id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Change how many servings a recipe makes ("none" to use quantities as written)
    Servings {
        /// Recipe name
        recipe: String,
        /// Servings, or "none"
        servings: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show recipe ingredients
    Show {
        /// Recipe name
        recipe: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List all recipes
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a recipe and remove it from planned meals
    Delete {
        /// Recipe name
        recipe: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum PlanCommands {
    /// Show the week containing a date (default: today)
    Show {
        /// Date (YYYY-MM-DD or today/yesterday/tomorrow)
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Plan a meal
    Add {
        /// Date (YYYY-MM-DD or today/yesterday/tomorrow)
        date: String,
        /// Meal type: breakfast, lunch, dinner, snack
        meal: String,
        /// Number of people eating
        #[arg(short, long, default_value = "2")]
        servings: f64,
        /// Recipe to cook (repeatable)
        #[arg(short, long = "recipe")]
        recipes: Vec<String>,
        /// Describe the meal without a recipe, e.g. "Eating out"
        #[arg(long, conflicts_with = "recipes")]
        name: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Add a recipe to a planned meal
    Assign {
        /// Meal ID
        meal_id: i64,
        /// Recipe name
        recipe: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove a recipe from a planned meal
    Unassign {
        /// Meal ID
        meal_id: i64,
        /// Recipe name
        recipe: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Name a meal without a recipe (omit the name to clear it)
    Name {
        /// Meal ID
        meal_id: i64,
        /// Meal description
        name: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Skip a planned meal
    Skip {
        /// Meal ID
        meal_id: i64,
        /// Un-skip instead
        #[arg(long)]
        undo: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Change how many people a meal serves
    Servings {
        /// Meal ID
        meal_id: i64,
        /// Number of servings
        servings: f64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove a planned meal
    Remove {
        /// Meal ID
        meal_id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ListCommands {
    /// Rebuild the week's list from its planned meals
    Generate {
        /// Any date in the week (default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show every entry of the week's list
    Show {
        /// Any date in the week (default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Add an item by hand; it goes straight to the shopping list
    Add {
        /// Item name
        name: String,
        /// Quantity (e.g. "2", "500g")
        #[arg(short, long, default_value = "1")]
        quantity: String,
        /// Store section
        #[arg(short, long, default_value = "")]
        category: String,
        /// Any date in the week (default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a list entry by ID
    Delete {
        /// Entry ID
        entry_id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove planned entries left without a week
    Cleanup {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum PantryCommands {
    /// Show planned ingredients to check against the pantry
    Show {
        /// First date of the range (default: today)
        #[arg(long)]
        from: Option<String>,
        /// Number of weeks to include
        #[arg(short, long, default_value = "1")]
        weeks: u32,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Already have it: keep it off the shopping list
    Have {
        /// Row key (e.g. "ingredient:3") or item name
        item: String,
        /// First date of the range (default: today)
        #[arg(long)]
        from: Option<String>,
        /// Number of weeks to include
        #[arg(short, long, default_value = "1")]
        weeks: u32,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Need to buy it: put it on the shopping list
    Need {
        /// Row key (e.g. "ingredient:3") or item name
        item: String,
        /// First date of the range (default: today)
        #[arg(long)]
        from: Option<String>,
        /// Number of weeks to include
        #[arg(short, long, default_value = "1")]
        weeks: u32,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Finish the pantry check: everything unchecked goes on the shopping list
    Remaining {
        /// First date of the range (default: today)
        #[arg(long)]
        from: Option<String>,
        /// Number of weeks to include
        #[arg(short, long, default_value = "1")]
        weeks: u32,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Put every week's entry in the pantry when one week's already is
    Sync {
        /// First date of the range (default: today)
        #[arg(long)]
        from: Option<String>,
        /// Number of weeks to include
        #[arg(short, long, default_value = "1")]
        weeks: u32,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ShopCommands {
    /// Show the shopping list
    Show {
        /// First date of the range (default: today)
        #[arg(long)]
        from: Option<String>,
        /// Number of weeks to include
        #[arg(short, long, default_value = "1")]
        weeks: u32,
        /// Hide items already bought
        #[arg(long)]
        remaining: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Mark an item as bought
    Check {
        /// Row key (e.g. "ingredient:3") or item name
        item: String,
        /// Who bought it
        #[arg(long)]
        by: Option<String>,
        /// First date of the range (default: today)
        #[arg(long)]
        from: Option<String>,
        /// Number of weeks to include
        #[arg(short, long, default_value = "1")]
        weeks: u32,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Put a bought item back on the list
    Uncheck {
        /// Row key (e.g. "ingredient:3") or item name
        item: String,
        /// First date of the range (default: today)
        #[arg(long)]
        from: Option<String>,
        /// Number of weeks to include
        #[arg(short, long, default_value = "1")]
        weeks: u32,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum SettingsCommands {
    /// Show or set the first day of new planning weeks
    WeekStart {
        /// Day name: monday-sunday or mon-sun
        day: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_logging(serve: bool) {
    let default = if serve {
        "larder=info,larder_core=info"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(matches!(cli.command, Commands::Serve { .. }));

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

#[allow(clippy::too_many_lines)]
async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let svc = PlannerService::new(config.db_path_str()?)?;

    match cli.command {
        Commands::Serve {
            port,
            bind,
            no_auth,
        } => {
            let api_key = if no_auth {
                None
            } else {
                Some(config.load_or_create_api_key()?)
            };
            server::start_server(svc, port, &bind, api_key).await
        }
        Commands::Ingredient { command } => match command {
            IngredientCommands::Add {
                name,
                category,
                unit,
                json,
            } => cmd_ingredient_add(&svc, &name, &category, &unit, json),
            IngredientCommands::List { search, json } => {
                cmd_ingredient_list(&svc, search.as_deref(), json)
            }
            IngredientCommands::Delete { name, json } => cmd_ingredient_delete(&svc, &name, json),
            IngredientCommands::Import {
                file,
                dry_run,
                json,
            } => cmd_ingredient_import(&svc, &file, dry_run, json),
        },
        Commands::Recipe { command } => match command {
            RecipeCommands::Create {
                name,
                servings,
                json,
            } => cmd_recipe_create(&svc, &name, servings, json),
            RecipeCommands::AddIngredient {
                recipe,
                ingredient,
                quantity,
                prep,
                unlinked,
                json,
            } => cmd_recipe_add_ingredient(&svc, &recipe, &ingredient, &quantity, prep, unlinked, json),
            RecipeCommands::RemoveIngredient {
                recipe,
                line_id,
                json,
            } => cmd_recipe_remove_ingredient(&svc, &recipe, line_id, json),
            RecipeCommands::Servings {
                recipe,
                servings,
                json,
            } => cmd_recipe_servings(&svc, &recipe, &servings, json),
            RecipeCommands::Show { recipe, json } => cmd_recipe_show(&svc, &recipe, json),
            RecipeCommands::List { json } => cmd_recipe_list(&svc, json),
            RecipeCommands::Delete { recipe, json } => cmd_recipe_delete(&svc, &recipe, json),
        },
        Commands::Plan { command } => match command {
            PlanCommands::Show { date, json } => cmd_plan_show(&svc, date, json),
            PlanCommands::Add {
                date,
                meal,
                servings,
                recipes,
                name,
                json,
            } => cmd_plan_add(&svc, Some(date), &meal, servings, &recipes, name.as_deref(), json),
            PlanCommands::Assign {
                meal_id,
                recipe,
                json,
            } => cmd_plan_assign(&svc, meal_id, &recipe, json),
            PlanCommands::Unassign {
                meal_id,
                recipe,
                json,
            } => cmd_plan_unassign(&svc, meal_id, &recipe, json),
            PlanCommands::Name {
                meal_id,
                name,
                json,
            } => cmd_plan_name(&svc, meal_id, name.as_deref(), json),
            PlanCommands::Skip {
                meal_id,
                undo,
                json,
            } => cmd_plan_skip(&svc, meal_id, undo, json),
            PlanCommands::Servings {
                meal_id,
                servings,
                json,
            } => cmd_plan_servings(&svc, meal_id, servings, json),
            PlanCommands::Remove { meal_id, json } => cmd_plan_remove(&svc, meal_id, json),
        },
        Commands::List { command } => match command {
            ListCommands::Generate { date, json } => cmd_list_generate(&svc, date, json),
            ListCommands::Show { date, json } => cmd_list_show(&svc, date, json),
            ListCommands::Add {
                name,
                quantity,
                category,
                date,
                json,
            } => cmd_list_add(&svc, &name, &quantity, &category, date, json),
            ListCommands::Delete { entry_id, json } => cmd_list_delete(&svc, entry_id, json),
            ListCommands::Cleanup { json } => cmd_list_cleanup(&svc, json),
        },
        Commands::Pantry { command } => match command {
            PantryCommands::Show { from, weeks, json } => cmd_pantry_show(&svc, from, weeks, json),
            PantryCommands::Have {
                item,
                from,
                weeks,
                json,
            } => cmd_pantry_set(&svc, &item, true, from, weeks, json),
            PantryCommands::Need {
                item,
                from,
                weeks,
                json,
            } => cmd_pantry_set(&svc, &item, false, from, weeks, json),
            PantryCommands::Remaining { from, weeks, json } => {
                cmd_pantry_remaining(&svc, from, weeks, json)
            }
            PantryCommands::Sync { from, weeks, json } => cmd_pantry_sync(&svc, from, weeks, json),
        },
        Commands::Shop { command } => match command {
            ShopCommands::Show {
                from,
                weeks,
                remaining,
                json,
            } => cmd_shop_show(&svc, from, weeks, remaining, json),
            ShopCommands::Check {
                item,
                by,
                from,
                weeks,
                json,
            } => cmd_shop_check(&svc, &item, true, by.as_deref(), from, weeks, json),
            ShopCommands::Uncheck {
                item,
                from,
                weeks,
                json,
            } => cmd_shop_check(&svc, &item, false, None, from, weeks, json),
        },
        Commands::Settings { command } => match command {
            SettingsCommands::WeekStart { day, json } => {
                cmd_settings_week_start(&svc, day.as_deref(), json)
            }
        },
    }
}
