//! In-process fake of the Ambrosia API
//!
//! Implements just enough of the server's contract for the harness to be
//! exercised without a real server: initial setup, cookie-based login,
//! roles, users and permission-gated orders. `/echo` answers with the query
//! string it received.

use super::constants::*;
use ambrosia_e2e::ApiClient;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, CorsLayer};

const ADMIN_ROLE_ID: &str = "role-admin";

const ADMIN_PERMISSIONS: &[&str] = &[
    "orders_read",
    "orders_create",
    "orders_update",
    "orders_delete",
    "roles_read",
    "roles_create",
    "roles_update",
    "roles_delete",
    "users_read",
    "users_create",
];

/// How POST /initial-setup behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupBehavior {
    /// 201 the first time, 409 afterwards.
    Normal,
    /// Status check never reports initialized; setup always answers 409.
    Conflict,
    /// Status check never reports initialized; setup fails on the admin's unique name.
    UniqueViolation,
    /// 500 with an unrelated message.
    Explode,
    /// 500 with a body that is not JSON.
    Garbage500,
    /// 418
    Teapot,
}

#[derive(Debug, Clone)]
struct FakeUser {
    id: String,
    pin: String,
    role_id: String,
}

#[derive(Debug, Default)]
struct FakeDb {
    initialized: bool,
    next_id: u64,
    users: HashMap<String, FakeUser>,
    roles: HashMap<String, BTreeSet<String>>,
    access_tokens: HashMap<String, String>,
    refresh_tokens: HashMap<String, String>,
}

impl FakeDb {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }

    fn seed_admin(&mut self) {
        self.roles.insert(
            ADMIN_ROLE_ID.to_string(),
            ADMIN_PERMISSIONS.iter().map(|p| p.to_string()).collect(),
        );
        self.users.insert(
            ADMIN_USER.to_string(),
            FakeUser {
                id: "user-admin".to_string(),
                pin: ADMIN_PIN.to_string(),
                role_id: ADMIN_ROLE_ID.to_string(),
            },
        );
    }

    fn issue_tokens(&mut self, user_name: &str) -> (String, String) {
        let access = format!("access-{}", self.next_id("token"));
        let refresh = format!("refresh-{}", self.next_id("token"));
        self.access_tokens
            .insert(access.clone(), user_name.to_string());
        self.refresh_tokens
            .insert(refresh.clone(), user_name.to_string());
        (access, refresh)
    }

    fn permissions_of(&self, user_name: &str) -> BTreeSet<String> {
        self.users
            .get(user_name)
            .and_then(|u| self.roles.get(&u.role_id))
            .cloned()
            .unwrap_or_default()
    }
}

struct FakeState {
    behavior: SetupBehavior,
    db: Mutex<FakeDb>,
    setup_posts: AtomicUsize,
    status_checks: AtomicUsize,
}

impl FakeState {
    fn db(&self) -> MutexGuard<'_, FakeDb> {
        self.db.lock().unwrap()
    }
}

type SharedState = Arc<FakeState>;

/// Fake API instance on a random port
///
/// When dropped, the server shuts down.
pub struct FakeApi {
    /// Base URL for making requests (e.g., "http://127.0.0.1:12345")
    pub base_url: String,

    state: SharedState,
    _shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl FakeApi {
    /// A fresh server that still needs its initial setup.
    pub async fn spawn() -> Self {
        Self::start(SetupBehavior::Normal, false).await
    }

    /// A server whose initial setup already happened.
    pub async fn spawn_initialized() -> Self {
        Self::start(SetupBehavior::Normal, true).await
    }

    pub async fn spawn_with(behavior: SetupBehavior) -> Self {
        Self::start(behavior, false).await
    }

    async fn start(behavior: SetupBehavior, initialized: bool) -> Self {
        let mut db = FakeDb::default();
        // These behaviors model a server that already holds the admin user.
        if initialized
            || matches!(
                behavior,
                SetupBehavior::Conflict | SetupBehavior::UniqueViolation
            )
        {
            db.seed_admin();
        }
        db.initialized = initialized;

        let state = Arc::new(FakeState {
            behavior,
            db: Mutex::new(db),
            setup_posts: AtomicUsize::new(0),
            status_checks: AtomicUsize::new(0),
        });

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();
        let base_url = format!("http://127.0.0.1:{}", port);

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        let app = make_app(state.clone());

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .expect("Server failed");
        });

        let api = Self {
            base_url,
            state,
            _shutdown_tx: Some(shutdown_tx),
        };
        ambrosia_e2e::server::wait_for_health(
            &api.base_url,
            ambrosia_e2e::server::DEFAULT_HEALTH_PATH,
            Duration::from_millis(SERVER_READY_TIMEOUT_MS),
        )
        .await
        .expect("Fake API did not become ready");
        api
    }

    /// An unauthenticated harness client for this server.
    pub fn client(&self) -> ApiClient {
        ApiClient::open(&self.base_url, Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .expect("Failed to open client")
    }

    pub fn setup_posts(&self) -> usize {
        self.state.setup_posts.load(Ordering::SeqCst)
    }

    pub fn status_checks(&self) -> usize {
        self.state.status_checks.load(Ordering::SeqCst)
    }

    pub fn is_initialized(&self) -> bool {
        self.state.db().initialized
    }

    /// Permissions currently granted to `role_id`, `None` for unknown roles.
    pub fn role_permissions(&self, role_id: &str) -> Option<Vec<String>> {
        self.state
            .db()
            .roles
            .get(role_id)
            .map(|perms| perms.iter().cloned().collect())
    }

    /// Role the named user is bound to.
    pub fn user_role(&self, user_name: &str) -> Option<String> {
        self.state
            .db()
            .users
            .get(user_name)
            .map(|u| u.role_id.clone())
    }

    pub fn role_count(&self) -> usize {
        self.state.db().roles.len()
    }
}

impl Drop for FakeApi {
    fn drop(&mut self) {
        if let Some(tx) = self._shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

fn make_app(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/", get(root))
        .route("/api/health", get(health))
        .route("/base-currency", get(base_currency))
        .route("/initial-setup", get(setup_status).post(initial_setup))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/logout", post(logout))
        .route("/users/me", get(me))
        .route("/users", post(create_user))
        .route("/roles", post(create_role))
        .route("/roles/{id}/permissions", put(assign_permissions))
        .route("/orders", get(list_orders).post(create_order))
        .route("/orders/{id}", delete(delete_order))
        .route("/echo", get(echo_query))
        .fallback(not_found)
        .layer(cors)
        .with_state(state)
}

fn message(status: StatusCode, text: &str) -> Response {
    (status, Json(json!({ "message": text }))).into_response()
}

/// Resolves the session's user and checks `permission`, answering 401/403 otherwise.
fn authorize(
    state: &FakeState,
    jar: &CookieJar,
    permission: Option<&str>,
) -> Result<(String, FakeUser), Response> {
    let db = state.db();
    let user_name = jar
        .get("accessToken")
        .and_then(|c| db.access_tokens.get(c.value()))
        .cloned()
        .ok_or_else(|| message(StatusCode::UNAUTHORIZED, "Unauthorized"))?;
    let user = db
        .users
        .get(&user_name)
        .cloned()
        .ok_or_else(|| message(StatusCode::UNAUTHORIZED, "Unauthorized"))?;

    if let Some(permission) = permission {
        if !db.permissions_of(&user_name).contains(permission) {
            return Err(message(StatusCode::FORBIDDEN, "Forbidden"));
        }
    }
    Ok((user_name, user))
}

fn with_tokens(jar: CookieJar, access: String, refresh: String) -> CookieJar {
    jar.add(Cookie::build(("accessToken", access)).path("/").http_only(true))
        .add(Cookie::build(("refreshToken", refresh)).path("/").http_only(true))
}

async fn root() -> &'static str {
    ROOT_TEXT
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn base_currency() -> Json<Value> {
    Json(json!({
        "currency_id": "1",
        "acronym": "USD",
        "symbol": "$",
        "country_name": "United States"
    }))
}

async fn setup_status(State(state): State<SharedState>) -> Json<Value> {
    state.status_checks.fetch_add(1, Ordering::SeqCst);
    let initialized = match state.behavior {
        SetupBehavior::Normal => state.db().initialized,
        _ => false,
    };
    Json(json!({ "initialized": initialized, "needsBusinessType": !initialized }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetupBody {
    user_name: String,
    user_pin: String,
    business_type: String,
}

async fn initial_setup(State(state): State<SharedState>, Json(body): Json<SetupBody>) -> Response {
    state.setup_posts.fetch_add(1, Ordering::SeqCst);
    match state.behavior {
        SetupBehavior::Normal => {}
        SetupBehavior::Conflict => {
            return message(StatusCode::CONFLICT, "Initial setup already completed")
        }
        SetupBehavior::UniqueViolation => {
            return message(StatusCode::INTERNAL_SERVER_ERROR, DUPLICATE_USER_MESSAGE)
        }
        SetupBehavior::Explode => {
            return message(StatusCode::INTERNAL_SERVER_ERROR, "Failed to save config")
        }
        SetupBehavior::Garbage500 => {
            return (StatusCode::INTERNAL_SERVER_ERROR, "<html>oops</html>").into_response()
        }
        SetupBehavior::Teapot => return message(StatusCode::IM_A_TEAPOT, "I'm a teapot"),
    }

    if body.business_type != "store" && body.business_type != "restaurant" {
        return message(StatusCode::BAD_REQUEST, "Invalid business type");
    }

    let mut db = state.db();
    if db.initialized {
        return message(StatusCode::CONFLICT, "Initial setup already completed");
    }
    db.roles.insert(
        ADMIN_ROLE_ID.to_string(),
        ADMIN_PERMISSIONS.iter().map(|p| p.to_string()).collect(),
    );
    db.users.insert(
        body.user_name,
        FakeUser {
            id: "user-admin".to_string(),
            pin: body.user_pin,
            role_id: ADMIN_ROLE_ID.to_string(),
        },
    );
    db.initialized = true;
    message(StatusCode::CREATED, "Initial setup completed")
}

#[derive(Debug, Deserialize)]
struct LoginBody {
    name: String,
    pin: String,
}

async fn login(
    State(state): State<SharedState>,
    jar: CookieJar,
    Json(body): Json<LoginBody>,
) -> Response {
    let mut db = state.db();
    let user = match db.users.get(&body.name) {
        Some(user) if user.pin == body.pin => user.clone(),
        _ => return message(StatusCode::UNAUTHORIZED, "Invalid credentials"),
    };
    if db.permissions_of(&body.name).is_empty() {
        return message(StatusCode::FORBIDDEN, "User has no permissions");
    }

    let (access, refresh) = db.issue_tokens(&body.name);
    let jar = with_tokens(jar, access, refresh);
    (
        StatusCode::OK,
        jar,
        Json(json!({
            "message": "Login successful",
            "user": { "id": user.id, "name": body.name, "role_id": user.role_id }
        })),
    )
        .into_response()
}

async fn refresh(State(state): State<SharedState>, jar: CookieJar) -> Response {
    let mut db = state.db();
    let token = jar.get("refreshToken").map(|c| c.value().to_string());
    let user_name = match token.and_then(|t| db.refresh_tokens.remove(&t)) {
        Some(user_name) => user_name,
        None => return message(StatusCode::UNAUTHORIZED, "Invalid refresh token"),
    };

    let (access, refresh) = db.issue_tokens(&user_name);
    let jar = with_tokens(jar, access, refresh);
    (
        StatusCode::OK,
        jar,
        Json(json!({ "message": "Token refreshed successfully" })),
    )
        .into_response()
}

async fn logout(State(state): State<SharedState>, jar: CookieJar) -> Response {
    {
        let mut db = state.db();
        if let Some(c) = jar.get("accessToken") {
            db.access_tokens.remove(c.value());
        }
        if let Some(c) = jar.get("refreshToken") {
            db.refresh_tokens.remove(c.value());
        }
    }

    let cleared = |name: &'static str| {
        let mut cookie = Cookie::new(name, "");
        cookie.set_path("/");
        cookie.make_removal();
        cookie
    };
    let jar = jar
        .add(cleared("accessToken"))
        .add(cleared("refreshToken"));
    (
        StatusCode::OK,
        jar,
        Json(json!({ "message": "Logout successful" })),
    )
        .into_response()
}

async fn me(State(state): State<SharedState>, jar: CookieJar) -> Response {
    match authorize(&state, &jar, None) {
        Ok((name, user)) => Json(json!({
            "user": { "id": user.id, "name": name, "role_id": user.role_id }
        }))
        .into_response(),
        Err(response) => response,
    }
}

#[derive(Debug, Deserialize)]
struct RoleBody {
    role: String,
}

async fn create_role(
    State(state): State<SharedState>,
    jar: CookieJar,
    Json(body): Json<RoleBody>,
) -> Response {
    if let Err(response) = authorize(&state, &jar, Some("roles_create")) {
        return response;
    }
    if body.role.trim().is_empty() {
        return message(StatusCode::BAD_REQUEST, "Role name is required");
    }

    let mut db = state.db();
    let id = db.next_id("role");
    db.roles.insert(id.clone(), BTreeSet::new());
    (StatusCode::CREATED, Json(json!({ "id": id }))).into_response()
}

#[derive(Debug, Deserialize)]
struct PermissionsBody {
    permissions: Vec<String>,
}

async fn assign_permissions(
    State(state): State<SharedState>,
    jar: CookieJar,
    Path(id): Path<String>,
    Json(body): Json<PermissionsBody>,
) -> Response {
    if let Err(response) = authorize(&state, &jar, Some("roles_update")) {
        return response;
    }

    let mut db = state.db();
    match db.roles.get_mut(&id) {
        Some(perms) => {
            *perms = body.permissions.iter().cloned().collect();
            Json(json!({ "roleId": id, "assigned": perms.len() })).into_response()
        }
        None => message(StatusCode::NOT_FOUND, "Role not found"),
    }
}

#[derive(Debug, Deserialize)]
struct UserBody {
    name: String,
    pin: String,
    role_id: String,
}

async fn create_user(
    State(state): State<SharedState>,
    jar: CookieJar,
    Json(body): Json<UserBody>,
) -> Response {
    if let Err(response) = authorize(&state, &jar, Some("users_create")) {
        return response;
    }

    let mut db = state.db();
    if !db.roles.contains_key(&body.role_id) {
        return message(StatusCode::BAD_REQUEST, "Role does not exist");
    }
    if db.users.contains_key(&body.name) {
        return message(StatusCode::CONFLICT, "User already exists");
    }
    let id = db.next_id("user");
    db.users.insert(
        body.name,
        FakeUser {
            id: id.clone(),
            pin: body.pin,
            role_id: body.role_id,
        },
    );
    (StatusCode::CREATED, Json(json!({ "id": id }))).into_response()
}

async fn list_orders(State(state): State<SharedState>, jar: CookieJar) -> Response {
    match authorize(&state, &jar, Some("orders_read")) {
        Ok(_) => Json(json!([])).into_response(),
        Err(response) => response,
    }
}

async fn create_order(State(state): State<SharedState>, jar: CookieJar, body: Bytes) -> Response {
    if let Err(response) = authorize(&state, &jar, Some("orders_create")) {
        return response;
    }
    match serde_json::from_slice::<Value>(&body) {
        Ok(Value::Object(fields)) if !fields.is_empty() => {
            (StatusCode::CREATED, Json(json!({ "id": "order-1" }))).into_response()
        }
        _ => message(StatusCode::BAD_REQUEST, "Invalid order"),
    }
}

async fn delete_order(
    State(state): State<SharedState>,
    jar: CookieJar,
    Path(id): Path<String>,
) -> Response {
    if let Err(response) = authorize(&state, &jar, Some("orders_delete")) {
        return response;
    }
    if id == "missing" {
        return message(StatusCode::NOT_FOUND, "Order not found");
    }
    StatusCode::NO_CONTENT.into_response()
}

async fn echo_query(Query(params): Query<HashMap<String, String>>) -> Json<Value> {
    Json(json!({ "query": params }))
}

async fn not_found() -> Response {
    message(StatusCode::NOT_FOUND, "Not Found")
}
