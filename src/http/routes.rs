//! HTTP route definitions

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Extension, Path, Query, State},
    http::{header, Method, StatusCode},
    middleware,
    response::{IntoResponse, Json},
    routing::{delete, get, patch, post, put},
    Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tower_http::{
    compression::CompressionLayer, cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer,
};
use tracing::error;
use uuid::Uuid;

use crate::app::{AppState, Session};
use crate::household::{
    expense_range, CategoryTotal, Expense, Household, Pantry, PantryItem, ShoppingItem,
    ShoppingList,
};
use crate::http::middleware::{rate_limit, require_auth, AuthenticatedUser};
use crate::store::{Cached, ChildItem, EntityStore, Filter, Friend, ItemStore, Member, Resource, Row, StoreError};
use crate::util::time::{today, uptime_secs};

/// Upper bound for one request, including its Supabase round trips
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    // CORS configuration - support multiple origins (comma-separated in CLIENT_ORIGIN)
    let allowed_origins: Vec<header::HeaderValue> = state
        .config
        .client_origin
        .split(',')
        .filter_map(|s| s.trim().parse::<header::HeaderValue>().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true);

    // Public routes (no auth required)
    let public_routes = Router::new().route("/health", get(health_handler));

    // Protected routes (auth required)
    let mut protected_routes = Router::new();
    protected_routes = resource_routes::<Pantry>(protected_routes, "/pantries");
    protected_routes = resource_routes::<ShoppingList>(protected_routes, "/shopping-lists");
    protected_routes = resource_routes::<Expense>(protected_routes, "/expenses");
    protected_routes = item_routes::<PantryItem>(protected_routes, "/pantries", "/pantry-items");
    protected_routes =
        item_routes::<ShoppingItem>(protected_routes, "/shopping-lists", "/shopping-items");

    let protected_routes = protected_routes
        .route("/expense-summary", get(expense_summary_handler))
        .route("/expiring-items", get(expiring_items_handler))
        .route("/friends", get(list_friends_handler))
        .route("/friends/invite", post(invite_friend_handler))
        .route("/friends/:id/accept", post(accept_friend_handler))
        .route("/friends/:id", delete(remove_friend_handler))
        .route("/session", delete(close_session_handler))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn session(state: &AppState, auth: &AuthenticatedUser) -> Arc<Session> {
    state.sessions.open(auth.user_id, &auth.access_token)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    active_sessions: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        active_sessions: state.sessions.active(),
    })
}

#[derive(Serialize)]
struct ActionResponse {
    success: bool,
    message: String,
}

impl ActionResponse {
    fn ok(message: &str) -> Json<Self> {
        Json(Self {
            success: true,
            message: message.to_string(),
        })
    }
}

// ============================================================================
// Shared resources (pantries, shopping lists, expenses)
// ============================================================================

/// A resource type the API exposes, and where its store lives
trait HouseholdResource: Resource {
    fn store(household: &Household) -> &EntityStore<Self>;

    /// Extra filters for listing
    fn list_filters(_params: &ListParams) -> Vec<Filter> {
        Vec::new()
    }
}

impl HouseholdResource for Pantry {
    fn store(household: &Household) -> &EntityStore<Self> {
        &household.pantries
    }
}

impl HouseholdResource for ShoppingList {
    fn store(household: &Household) -> &EntityStore<Self> {
        &household.shopping_lists
    }
}

impl HouseholdResource for Expense {
    fn store(household: &Household) -> &EntityStore<Self> {
        &household.expenses
    }

    fn list_filters(params: &ListParams) -> Vec<Filter> {
        expense_range(params.from, params.to)
    }
}

fn resource_routes<R: HouseholdResource>(router: Router<AppState>, base: &str) -> Router<AppState> {
    router
        .route(base, get(list_resources::<R>).post(create_resource::<R>))
        .route(
            &format!("{}/:id", base),
            patch(update_resource::<R>).delete(delete_resource::<R>),
        )
        .route(
            &format!("{}/:id/members", base),
            get(list_members::<R>)
                .post(add_member::<R>)
                .delete(remove_member::<R>),
        )
}

#[derive(Debug, Deserialize)]
struct ListParams {
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
}

#[derive(Serialize)]
struct ListResponse<T> {
    items: Vec<T>,
}

#[derive(Deserialize)]
struct CreateRequest<D> {
    #[serde(flatten)]
    draft: D,
    #[serde(default)]
    shared_with: Vec<Uuid>,
}

#[derive(Deserialize)]
struct UpdateRequest {
    #[serde(default)]
    patch: Row,
    #[serde(default)]
    shared_with: Vec<Uuid>,
}

#[derive(Deserialize)]
struct MemberRequest {
    email: String,
}

#[derive(Serialize)]
struct MembersResponse {
    members: Vec<Member>,
}

/// Owner checks run against the cache; load it if this session has not yet
async fn ensure_cached<R: HouseholdResource>(
    store: &EntityStore<R>,
    id: Uuid,
    user_id: Uuid,
) -> Result<(), AppError> {
    if store.get(id).is_none() {
        store.fetch_all(user_id).await?;
    }
    Ok(())
}

async fn list_resources<R: HouseholdResource>(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Query(params): Query<ListParams>,
) -> Result<Json<ListResponse<Cached<R>>>, AppError> {
    let session = session(&state, &auth);
    let store = R::store(&session.household);

    store
        .fetch_all_where(auth.user_id, R::list_filters(&params))
        .await?;

    Ok(Json(ListResponse {
        items: store.items(),
    }))
}

async fn create_resource<R: HouseholdResource>(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Json(req): Json<CreateRequest<R::Draft>>,
) -> Result<(StatusCode, Json<Cached<R>>), AppError> {
    let session = session(&state, &auth);
    let created = R::store(&session.household)
        .add(&req.draft, &req.shared_with)
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn update_resource<R: HouseholdResource>(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateRequest>,
) -> Result<Json<ActionResponse>, AppError> {
    let session = session(&state, &auth);
    let store = R::store(&session.household);

    ensure_cached(store, id, auth.user_id).await?;
    store
        .update(id, auth.user_id, req.patch, &req.shared_with)
        .await?;

    Ok(ActionResponse::ok("Updated"))
}

async fn delete_resource<R: HouseholdResource>(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<ActionResponse>, AppError> {
    let session = session(&state, &auth);
    let store = R::store(&session.household);

    ensure_cached(store, id, auth.user_id).await?;
    store.delete(id, auth.user_id).await?;

    Ok(ActionResponse::ok("Deleted"))
}

async fn list_members<R: HouseholdResource>(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<MembersResponse>, AppError> {
    let session = session(&state, &auth);
    let members = R::store(&session.household).fetch_members(id).await?;
    Ok(Json(MembersResponse { members }))
}

async fn add_member<R: HouseholdResource>(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<MemberRequest>,
) -> Result<Json<MembersResponse>, AppError> {
    let session = session(&state, &auth);
    let members = R::store(&session.household)
        .add_member(id, &req.email)
        .await?;
    Ok(Json(MembersResponse { members }))
}

async fn remove_member<R: HouseholdResource>(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<MemberRequest>,
) -> Result<Json<MembersResponse>, AppError> {
    let session = session(&state, &auth);
    let members = R::store(&session.household)
        .remove_member(id, &req.email)
        .await?;
    Ok(Json(MembersResponse { members }))
}

#[derive(Serialize)]
struct SummaryResponse {
    totals: Vec<CategoryTotal>,
}

async fn expense_summary_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Query(params): Query<ListParams>,
) -> Result<Json<SummaryResponse>, AppError> {
    let session = session(&state, &auth);
    session
        .household
        .fetch_expenses_between(auth.user_id, params.from, params.to)
        .await?;

    Ok(Json(SummaryResponse {
        totals: session.household.expense_totals(),
    }))
}

// ============================================================================
// Child items (pantry items, shopping items)
// ============================================================================

/// A child item type the API exposes; access follows its parent resource
trait HouseholdItem: ChildItem {
    type Parent: HouseholdResource;

    fn store(household: &Household) -> &ItemStore<Self>;
}

impl HouseholdItem for PantryItem {
    type Parent = Pantry;

    fn store(household: &Household) -> &ItemStore<Self> {
        &household.pantry_items
    }
}

impl HouseholdItem for ShoppingItem {
    type Parent = ShoppingList;

    fn store(household: &Household) -> &ItemStore<Self> {
        &household.shopping_items
    }
}

fn item_routes<I: HouseholdItem>(
    router: Router<AppState>,
    parent_base: &str,
    base: &str,
) -> Router<AppState> {
    router
        .route(
            &format!("{}/:id/items", parent_base),
            get(list_items::<I>).post(create_item::<I>),
        )
        .route(
            &format!("{}/:id", base),
            patch(update_item::<I>).delete(delete_item::<I>),
        )
        .route(&format!("{}/:id/quantity", base), put(set_quantity::<I>))
}

/// Items are reachable only through a parent the caller owns or shares
async fn authorize_parent<I: HouseholdItem>(
    household: &Household,
    parent_id: Uuid,
    user_id: Uuid,
) -> Result<(), AppError> {
    <I::Parent as HouseholdResource>::store(household)
        .ensure_visible(parent_id, user_id)
        .await?;
    Ok(())
}

async fn authorize_item<I: HouseholdItem>(
    household: &Household,
    item_id: Uuid,
    user_id: Uuid,
) -> Result<(), AppError> {
    let parent_id = I::store(household).parent_of(item_id).await?;
    authorize_parent::<I>(household, parent_id, user_id).await
}

#[derive(Deserialize)]
struct QuantityRequest {
    quantity: f64,
}

async fn list_items<I: HouseholdItem>(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path(parent_id): Path<Uuid>,
) -> Result<Json<ListResponse<I>>, AppError> {
    let session = session(&state, &auth);
    authorize_parent::<I>(&session.household, parent_id, auth.user_id).await?;
    let items = I::store(&session.household).fetch_items(parent_id).await?;
    Ok(Json(ListResponse { items }))
}

async fn create_item<I: HouseholdItem>(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path(parent_id): Path<Uuid>,
    Json(draft): Json<I::Draft>,
) -> Result<(StatusCode, Json<I>), AppError> {
    let session = session(&state, &auth);
    authorize_parent::<I>(&session.household, parent_id, auth.user_id).await?;
    let item = I::store(&session.household)
        .add_item(parent_id, &draft)
        .await?;
    Ok((StatusCode::CREATED, Json(item)))
}

async fn update_item<I: HouseholdItem>(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
    Json(patch): Json<Row>,
) -> Result<Json<I>, AppError> {
    let session = session(&state, &auth);
    authorize_item::<I>(&session.household, id, auth.user_id).await?;
    let item = I::store(&session.household).update_item(id, patch).await?;
    Ok(Json(item))
}

async fn set_quantity<I: HouseholdItem>(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<QuantityRequest>,
) -> Result<Json<ActionResponse>, AppError> {
    let session = session(&state, &auth);
    authorize_item::<I>(&session.household, id, auth.user_id).await?;
    I::store(&session.household)
        .set_quantity(id, req.quantity)
        .await?;
    Ok(ActionResponse::ok("Quantity updated"))
}

async fn delete_item<I: HouseholdItem>(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<ActionResponse>, AppError> {
    let session = session(&state, &auth);
    authorize_item::<I>(&session.household, id, auth.user_id).await?;
    I::store(&session.household).remove_item(id).await?;
    Ok(ActionResponse::ok("Item removed"))
}

#[derive(Deserialize)]
struct ExpiringParams {
    #[serde(default = "default_expiry_window")]
    days: u32,
}

fn default_expiry_window() -> u32 {
    7
}

async fn expiring_items_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Query(params): Query<ExpiringParams>,
) -> Result<Json<ListResponse<PantryItem>>, AppError> {
    let session = session(&state, &auth);
    let household = &session.household;

    household.pantries.fetch_all(auth.user_id).await?;
    let items = household
        .expiring_pantry_items(today(), params.days)
        .await?;

    Ok(Json(ListResponse { items }))
}

// ============================================================================
// Friends
// ============================================================================

#[derive(Serialize)]
struct FriendsResponse {
    friends: Vec<Friend>,
}

#[derive(Deserialize)]
struct InviteRequest {
    email: String,
}

async fn list_friends_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> Result<Json<FriendsResponse>, AppError> {
    let session = session(&state, &auth);
    let friends = session.household.friends.fetch_friends().await?;
    Ok(Json(FriendsResponse { friends }))
}

async fn invite_friend_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Json(req): Json<InviteRequest>,
) -> Result<Json<FriendsResponse>, AppError> {
    let session = session(&state, &auth);
    let friends = session.household.friends.send_invite(&req.email).await?;
    Ok(Json(FriendsResponse { friends }))
}

async fn accept_friend_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<FriendsResponse>, AppError> {
    let session = session(&state, &auth);
    let friends = session.household.friends.accept_invite(id).await?;
    Ok(Json(FriendsResponse { friends }))
}

async fn remove_friend_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<FriendsResponse>, AppError> {
    let session = session(&state, &auth);
    let friends = session.household.friends.remove_friend(id).await?;
    Ok(Json(FriendsResponse { friends }))
}

async fn close_session_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> Json<ActionResponse> {
    state.sessions.close(auth.user_id);
    ActionResponse::ok("Session closed")
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        let message = err.to_string();
        match err {
            StoreError::NotAuthenticated => AppError::Unauthorized,
            StoreError::UserNotFound(_) | StoreError::NotFound(_) | StoreError::MemberNotFound => {
                AppError::NotFound(message)
            }
            StoreError::PermissionDenied => AppError::Forbidden(message),
            StoreError::AlreadyMember | StoreError::AlreadyFriends => AppError::Conflict(message),
            StoreError::SelfInvite | StoreError::InvalidQuantity | StoreError::InvalidPatch(_) => {
                AppError::BadRequest(message)
            }
            StoreError::Decode(_) | StoreError::Backend(_) => {
                error!(error = %message, "Store operation failed");
                AppError::Internal(message)
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
