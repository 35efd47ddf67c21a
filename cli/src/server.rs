use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Context;
use axum::{
    Json, Router,
    extract::{Path, Query, Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
};
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info, warn};

use larder_core::catalog_import::CatalogImportSummary;
use larder_core::grouping::{EntryGroup, GroupKey, ListView};
use larder_core::models::{
    Ingredient, ListEntry, NewIngredient, NewRecipeIngredientUse, Period, Recipe, RecipeDetail,
    RecipeIngredientUse, ScheduledMeal, parse_weekday,
};
use larder_core::reconcile::ReconcileSummary;
use larder_core::service::PlannerService;

const BODY_LIMIT: usize = 2 * 1024 * 1024; // 2 MB

#[derive(Clone)]
struct AppState {
    planner: Arc<Mutex<PlannerService>>,
    api_key: Option<String>,
}

impl AppState {
    fn planner(&self) -> MutexGuard<'_, PlannerService> {
        self.planner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// --- Request / Response types ---

fn deserialize_some<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(deserializer).map(Some)
}

#[derive(Deserialize)]
struct WeekStartBody {
    week_start: String,
}

#[derive(Deserialize)]
struct SearchQuery {
    search: Option<String>,
}

#[derive(Deserialize)]
struct CreateIngredientRequest {
    name: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    default_unit: String,
}

#[derive(Deserialize)]
struct ImportCatalogRequest {
    csv: String,
    #[serde(default)]
    dry_run: bool,
}

#[derive(Deserialize)]
struct RecipeIngredientRequest {
    ingredient_id: Option<i64>,
    custom_name: Option<String>,
    quantity: f64,
    #[serde(default)]
    unit: String,
    preparation: Option<String>,
}

impl From<RecipeIngredientRequest> for NewRecipeIngredientUse {
    fn from(req: RecipeIngredientRequest) -> Self {
        Self {
            ingredient_id: req.ingredient_id,
            custom_name: req.custom_name,
            quantity: req.quantity,
            unit: req.unit,
            preparation: req.preparation,
        }
    }
}

#[derive(Deserialize)]
struct CreateRecipeRequest {
    name: String,
    base_servings: Option<f64>,
    #[serde(default)]
    ingredients: Vec<RecipeIngredientRequest>,
}

#[derive(Deserialize)]
struct UpdateRecipeRequest {
    base_servings: Option<f64>,
}

#[derive(Deserialize)]
struct PeriodRequest {
    date: NaiveDate,
}

#[derive(Deserialize)]
struct PeriodsQuery {
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
}

#[derive(Deserialize)]
struct CreateMealRequest {
    day: i64,
    meal_type: String,
    servings: f64,
    #[serde(default)]
    recipe_ids: Vec<i64>,
    custom_name: Option<String>,
}

#[derive(Deserialize)]
#[allow(clippy::option_option)]
struct UpdateMealRequest {
    servings: Option<f64>,
    skipped: Option<bool>,
    #[serde(default, deserialize_with = "deserialize_some")]
    custom_name: Option<Option<String>>,
}

#[derive(Deserialize)]
struct AssignRecipeRequest {
    recipe_id: i64,
}

#[derive(Deserialize, Default, Clone, Copy)]
#[serde(rename_all = "snake_case")]
enum EntryFilter {
    #[default]
    All,
    PantryCheck,
    InPantry,
    Shopping,
    Unpurchased,
}

#[derive(Deserialize)]
struct EntriesQuery {
    #[serde(default)]
    view: EntryFilter,
}

#[derive(Deserialize)]
struct ManualEntryRequest {
    name: String,
    quantity: f64,
    #[serde(default)]
    unit: String,
    #[serde(default)]
    category: String,
}

#[derive(Deserialize)]
struct PantryRequest {
    /// Omit to toggle.
    in_pantry: Option<bool>,
}

#[derive(Deserialize)]
struct CheckedRequest {
    /// Omit to toggle.
    checked: Option<bool>,
    by: Option<String>,
}

fn default_view() -> ListView {
    ListView::Shopping
}

#[derive(Deserialize)]
struct RangeQuery {
    from: NaiveDate,
    to: NaiveDate,
    #[serde(default = "default_view")]
    view: ListView,
}

#[derive(Deserialize)]
struct RangeRequest {
    from: NaiveDate,
    to: NaiveDate,
}

#[derive(Deserialize)]
struct GroupCheckedRequest {
    from: NaiveDate,
    to: NaiveDate,
    key: GroupKey,
    checked: Option<bool>,
    by: Option<String>,
}

#[derive(Deserialize)]
struct GroupPantryRequest {
    from: NaiveDate,
    to: NaiveDate,
    key: GroupKey,
    in_pantry: Option<bool>,
}

#[derive(Deserialize)]
struct GroupDeleteRequest {
    from: NaiveDate,
    to: NaiveDate,
    #[serde(default = "default_view")]
    view: ListView,
    key: GroupKey,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// --- Error handling ---

enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Internal(err) => {
                error!("internal server error: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

/// Store failures become 500, missing rows 404, everything else is a
/// rejected request.
impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        if err.chain().any(|cause| cause.is::<rusqlite::Error>()) {
            return Self::Internal(err);
        }
        let message = err.to_string();
        if message.contains("not found") {
            Self::NotFound(message)
        } else {
            Self::BadRequest(message)
        }
    }
}

fn deleted(found: bool, what: &str, id: i64) -> Result<Json<serde_json::Value>, ApiError> {
    if found {
        Ok(Json(serde_json::json!({ "deleted": id })))
    } else {
        Err(ApiError::NotFound(format!("{what} {id} not found")))
    }
}

// --- Middleware ---

async fn require_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Some(ref expected_key) = state.api_key {
        let authorized = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|token| token == expected_key);

        if !authorized {
            return (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse {
                    error: "Invalid or missing API key".to_string(),
                }),
            )
                .into_response();
        }
    }
    next.run(request).await
}

async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static("default-src 'none'"),
    );
    response
}

// --- Settings ---

async fn get_week_start(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let day = state.planner().week_start()?;
    Ok(Json(serde_json::json!({ "week_start": day.to_string() })))
}

async fn set_week_start(
    State(state): State<AppState>,
    Json(req): Json<WeekStartBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let day = parse_weekday(&req.week_start).map_err(|e| ApiError::BadRequest(format!("{e}")))?;
    let planner = state.planner();
    planner.set_week_start(day)?;
    Ok(Json(serde_json::json!({ "week_start": day.to_string() })))
}

// --- Ingredients ---

async fn list_ingredients(
    State(state): State<AppState>,
    Query(params): Query<SearchQuery>,
) -> Result<Json<Vec<Ingredient>>, ApiError> {
    let ingredients = state.planner().list_ingredients(params.search.as_deref())?;
    Ok(Json(ingredients))
}

async fn create_ingredient(
    State(state): State<AppState>,
    Json(req): Json<CreateIngredientRequest>,
) -> Result<(StatusCode, Json<Ingredient>), ApiError> {
    let ingredient = state.planner().create_ingredient(&NewIngredient {
        name: req.name,
        category: req.category,
        default_unit: req.default_unit,
    })?;
    Ok((StatusCode::CREATED, Json(ingredient)))
}

async fn delete_ingredient(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let found = state.planner().delete_ingredient(id)?;
    deleted(found, "Ingredient", id)
}

async fn import_catalog(
    State(state): State<AppState>,
    Json(req): Json<ImportCatalogRequest>,
) -> Result<Json<CatalogImportSummary>, ApiError> {
    let summary = state.planner().import_catalog_csv(&req.csv, req.dry_run)?;
    Ok(Json(summary))
}

// --- Recipes ---

async fn list_recipes(State(state): State<AppState>) -> Result<Json<Vec<Recipe>>, ApiError> {
    let recipes = state.planner().list_recipes()?;
    Ok(Json(recipes))
}

async fn create_recipe(
    State(state): State<AppState>,
    Json(req): Json<CreateRecipeRequest>,
) -> Result<(StatusCode, Json<RecipeDetail>), ApiError> {
    let planner = state.planner();
    let recipe = planner.create_recipe(&req.name, req.base_servings)?;
    for ing in req.ingredients {
        if let Err(e) = planner.add_recipe_ingredient(recipe.id, &ing.into()) {
            planner
                .delete_recipe(recipe.id)
                .context("failed to roll back recipe")?;
            return Err(ApiError::BadRequest(format!("{e:#}")));
        }
    }
    let detail = planner.get_recipe_detail(recipe.id)?;
    Ok((StatusCode::CREATED, Json(detail)))
}

async fn get_recipe(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<RecipeDetail>, ApiError> {
    let detail = state.planner().get_recipe_detail(id)?;
    Ok(Json(detail))
}

async fn update_recipe(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateRecipeRequest>,
) -> Result<Json<RecipeDetail>, ApiError> {
    let planner = state.planner();
    planner.set_recipe_servings(id, req.base_servings)?;
    Ok(Json(planner.get_recipe_detail(id)?))
}

async fn delete_recipe(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let found = state.planner().delete_recipe(id)?;
    deleted(found, "Recipe", id)
}

async fn add_recipe_ingredient(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<RecipeIngredientRequest>,
) -> Result<(StatusCode, Json<RecipeIngredientUse>), ApiError> {
    let added = state.planner().add_recipe_ingredient(id, &req.into())?;
    Ok((StatusCode::CREATED, Json(added)))
}

async fn remove_recipe_ingredient(
    State(state): State<AppState>,
    Path((id, use_id)): Path<(i64, i64)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let found = state.planner().remove_recipe_ingredient(id, use_id)?;
    deleted(found, "Recipe ingredient", use_id)
}

// --- Periods and meals ---

async fn list_periods(
    State(state): State<AppState>,
    Query(params): Query<PeriodsQuery>,
) -> Result<Json<Vec<Period>>, ApiError> {
    let planner = state.planner();
    let periods = match (params.from, params.to) {
        (Some(from), Some(to)) => planner.list_periods_in_range(from, to)?,
        (None, None) => planner.list_periods()?,
        _ => {
            return Err(ApiError::BadRequest(
                "from and to must be given together".to_string(),
            ));
        }
    };
    Ok(Json(periods))
}

/// Returns the period containing the date, creating it if needed.
async fn open_period(
    State(state): State<AppState>,
    Json(req): Json<PeriodRequest>,
) -> Result<Json<Period>, ApiError> {
    let period = state.planner().get_or_create_period(req.date)?;
    Ok(Json(period))
}

async fn get_period(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Period>, ApiError> {
    Ok(Json(state.planner().get_period(id)?))
}

async fn delete_period(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let found = state.planner().delete_period(id)?;
    deleted(found, "Period", id)
}

async fn list_meals(
    State(state): State<AppState>,
    Path(period_id): Path<i64>,
) -> Result<Json<Vec<ScheduledMeal>>, ApiError> {
    let planner = state.planner();
    planner.get_period(period_id)?;
    Ok(Json(planner.list_meals(period_id)?))
}

async fn create_meal(
    State(state): State<AppState>,
    Path(period_id): Path<i64>,
    Json(req): Json<CreateMealRequest>,
) -> Result<(StatusCode, Json<ScheduledMeal>), ApiError> {
    if !req.recipe_ids.is_empty() && req.custom_name.is_some() {
        return Err(ApiError::BadRequest(
            "A meal has either recipes or a custom name, not both".to_string(),
        ));
    }
    let planner = state.planner();
    for recipe_id in &req.recipe_ids {
        planner
            .get_recipe_detail(*recipe_id)
            .map_err(|_| ApiError::BadRequest(format!("Recipe with id {recipe_id} not found")))?;
    }
    let mut meal = planner.schedule_meal(period_id, req.day, &req.meal_type, req.servings)?;
    for recipe_id in req.recipe_ids {
        meal = planner.assign_recipe(meal.id, recipe_id)?;
    }
    if let Some(name) = req.custom_name.as_deref() {
        meal = planner.set_meal_custom_name(meal.id, Some(name))?;
    }
    Ok((StatusCode::CREATED, Json(meal)))
}

async fn update_meal(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateMealRequest>,
) -> Result<Json<ScheduledMeal>, ApiError> {
    let planner = state.planner();
    let mut meal = planner.get_meal(id)?;
    if let Some(servings) = req.servings {
        meal = planner.set_meal_servings(id, servings)?;
    }
    if let Some(skipped) = req.skipped {
        meal = planner.skip_meal(id, skipped)?;
    }
    if let Some(name) = req.custom_name {
        meal = planner.set_meal_custom_name(id, name.as_deref())?;
    }
    Ok(Json(meal))
}

async fn delete_meal(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let found = state.planner().delete_meal(id)?;
    deleted(found, "Meal", id)
}

async fn assign_recipe(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<AssignRecipeRequest>,
) -> Result<Json<ScheduledMeal>, ApiError> {
    Ok(Json(state.planner().assign_recipe(id, req.recipe_id)?))
}

async fn unassign_recipe(
    State(state): State<AppState>,
    Path((id, recipe_id)): Path<(i64, i64)>,
) -> Result<Json<ScheduledMeal>, ApiError> {
    let planner = state.planner();
    if !planner.unassign_recipe(id, recipe_id)? {
        return Err(ApiError::NotFound(format!(
            "Recipe {recipe_id} is not assigned to meal {id}"
        )));
    }
    Ok(Json(planner.get_meal(id)?))
}

// --- Grocery list ---

async fn generate_list(
    State(state): State<AppState>,
    Path(period_id): Path<i64>,
) -> Result<Json<ReconcileSummary>, ApiError> {
    Ok(Json(state.planner().generate_list_for_period(period_id)?))
}

async fn cleanup_orphans(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let removed = state.planner().cleanup_orphaned_entries()?;
    Ok(Json(serde_json::json!({ "removed": removed })))
}

async fn list_entries(
    State(state): State<AppState>,
    Path(period_id): Path<i64>,
    Query(params): Query<EntriesQuery>,
) -> Result<Json<Vec<ListEntry>>, ApiError> {
    let planner = state.planner();
    planner.get_period(period_id)?;
    let entries = match params.view {
        EntryFilter::All => planner.list_entries(period_id)?,
        EntryFilter::PantryCheck => planner.pantry_check_items(period_id)?,
        EntryFilter::InPantry => planner.in_pantry_items(period_id)?,
        EntryFilter::Shopping => planner.shopping_list_items(period_id)?,
        EntryFilter::Unpurchased => planner.unpurchased_shopping_items(period_id)?,
    };
    Ok(Json(entries))
}

async fn add_manual_entry(
    State(state): State<AppState>,
    Path(period_id): Path<i64>,
    Json(req): Json<ManualEntryRequest>,
) -> Result<(StatusCode, Json<ListEntry>), ApiError> {
    let entry = state.planner().add_manual_entry(
        Some(period_id),
        &req.name,
        req.quantity,
        &req.unit,
        &req.category,
    )?;
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn complete_pantry_check(
    State(state): State<AppState>,
    Path(period_id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let planner = state.planner();
    planner.get_period(period_id)?;
    let marked = planner.mark_all_remaining_as_needed(period_id)?;
    Ok(Json(serde_json::json!({ "marked_needed": marked })))
}

async fn get_entry(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ListEntry>, ApiError> {
    Ok(Json(state.planner().get_entry(id)?))
}

async fn delete_entry(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let found = state.planner().delete_entry(id)?;
    deleted(found, "List entry", id)
}

async fn set_entry_pantry(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<PantryRequest>,
) -> Result<Json<ListEntry>, ApiError> {
    let planner = state.planner();
    let entry = match req.in_pantry {
        Some(true) => planner.mark_in_pantry(id)?,
        Some(false) => planner.unmark_from_pantry(id)?,
        None => planner.toggle_pantry(id)?,
    };
    Ok(Json(entry))
}

async fn set_entry_checked(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<CheckedRequest>,
) -> Result<Json<ListEntry>, ApiError> {
    let planner = state.planner();
    let by = req.by.as_deref();
    let entry = match req.checked {
        Some(true) => planner.check(id, by)?,
        Some(false) => planner.uncheck(id)?,
        None => planner.toggle_checked(id, by)?,
    };
    Ok(Json(entry))
}

// --- Cross-period rows ---

async fn grouped_list(
    State(state): State<AppState>,
    Query(params): Query<RangeQuery>,
) -> Result<Json<Vec<EntryGroup>>, ApiError> {
    let groups = state
        .planner()
        .grouped_view(params.from, params.to, params.view)?;
    Ok(Json(groups))
}

async fn set_group_checked(
    State(state): State<AppState>,
    Json(req): Json<GroupCheckedRequest>,
) -> Result<Json<EntryGroup>, ApiError> {
    let planner = state.planner();
    let by = req.by.as_deref();
    let group = match req.checked {
        Some(checked) => planner.set_group_checked(req.from, req.to, &req.key, checked, by)?,
        None => planner.toggle_group_checked(req.from, req.to, &req.key, by)?,
    };
    Ok(Json(group))
}

async fn set_group_pantry(
    State(state): State<AppState>,
    Json(req): Json<GroupPantryRequest>,
) -> Result<Json<EntryGroup>, ApiError> {
    let planner = state.planner();
    let group = match req.in_pantry {
        Some(in_pantry) => planner.set_group_in_pantry(req.from, req.to, &req.key, in_pantry)?,
        None => planner.toggle_group_in_pantry(req.from, req.to, &req.key)?,
    };
    Ok(Json(group))
}

async fn delete_group(
    State(state): State<AppState>,
    Json(req): Json<GroupDeleteRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let removed = state
        .planner()
        .delete_group(req.from, req.to, req.view, &req.key)?;
    Ok(Json(serde_json::json!({ "deleted": removed })))
}

async fn sync_pantry(
    State(state): State<AppState>,
    Json(req): Json<RangeRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let updated = state.planner().sync_pantry_state(req.from, req.to)?;
    Ok(Json(serde_json::json!({ "updated": updated })))
}

async fn complete_pantry_check_range(
    State(state): State<AppState>,
    Json(req): Json<RangeRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let marked = state
        .planner()
        .mark_all_remaining_as_needed_in_range(req.from, req.to)?;
    Ok(Json(serde_json::json!({ "marked_needed": marked })))
}

// --- Router builder ---

fn build_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/settings/week-start",
            get(get_week_start).put(set_week_start),
        )
        .route(
            "/api/ingredients",
            get(list_ingredients).post(create_ingredient),
        )
        .route("/api/ingredients/import", post(import_catalog))
        .route("/api/ingredients/{id}", delete(delete_ingredient))
        .route("/api/recipes", get(list_recipes).post(create_recipe))
        .route(
            "/api/recipes/{id}",
            get(get_recipe).put(update_recipe).delete(delete_recipe),
        )
        .route("/api/recipes/{id}/ingredients", post(add_recipe_ingredient))
        .route(
            "/api/recipes/{id}/ingredients/{use_id}",
            delete(remove_recipe_ingredient),
        )
        .route("/api/periods", get(list_periods).post(open_period))
        .route("/api/periods/{id}", get(get_period).delete(delete_period))
        .route("/api/periods/{id}/meals", get(list_meals).post(create_meal))
        .route("/api/periods/{id}/generate", post(generate_list))
        .route(
            "/api/periods/{id}/entries",
            get(list_entries).post(add_manual_entry),
        )
        .route("/api/periods/{id}/pantry-check", post(complete_pantry_check))
        .route("/api/meals/{id}", put(update_meal).delete(delete_meal))
        .route("/api/meals/{id}/recipes", post(assign_recipe))
        .route(
            "/api/meals/{id}/recipes/{recipe_id}",
            delete(unassign_recipe),
        )
        .route("/api/entries/{id}", get(get_entry).delete(delete_entry))
        .route("/api/entries/{id}/pantry", put(set_entry_pantry))
        .route("/api/entries/{id}/checked", put(set_entry_checked))
        .route("/api/entries/cleanup", post(cleanup_orphans))
        .route("/api/list", get(grouped_list))
        .route("/api/list/checked", put(set_group_checked))
        .route("/api/list/pantry", put(set_group_pantry))
        .route("/api/list/delete", post(delete_group))
        .route("/api/list/sync-pantry", post(sync_pantry))
        .route("/api/list/pantry-check", post(complete_pantry_check_range))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(middleware::from_fn(security_headers))
        .with_state(state)
}

// --- Server startup ---

pub async fn start_server(
    planner: PlannerService,
    port: u16,
    bind: &str,
    api_key: Option<String>,
) -> anyhow::Result<()> {
    let state = AppState {
        planner: Arc::new(Mutex::new(planner)),
        api_key: api_key.clone(),
    };

    let app = build_router(state);

    if let Some(ref key) = api_key {
        eprintln!(
            "API key: {}...{} (see api_key file in data directory)",
            &key[..4],
            &key[key.len() - 4..],
        );
    } else {
        warn!("authentication disabled (--no-auth), API is open to anyone");
    }

    if bind != "127.0.0.1" && bind != "localhost" && api_key.is_none() {
        warn!(bind, "listening beyond localhost with no authentication");
    }

    let listener = tokio::net::TcpListener::bind(format!("{bind}:{port}"))
        .await
        .with_context(|| format!("failed to bind {bind}:{port}"))?;
    info!("listening on http://{bind}:{port}");
    axum::serve(listener, app).await?;

    Ok(())
}
