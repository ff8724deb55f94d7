use std::sync::Arc;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{delete, get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::services::ServeDir;
use log::{info, warn};

use crate::auth::{extract_jwt_from_headers, JwtManager, User, UserStore};
use crate::prices::Broadcaster;
use crate::widgets::{NewWidget, TemplateCatalog, Widget, WidgetPatch, WidgetStore};

#[derive(Clone)]
pub struct ApiState {
    pub broadcaster: Broadcaster,
    pub users: UserStore,
    pub widgets: WidgetStore,
    pub templates: Arc<TemplateCatalog>,
    pub jwt: Arc<JwtManager>,
}

type ApiError = (StatusCode, Json<Value>);
type ApiResult = Result<(StatusCode, Json<Value>), ApiError>;

fn api_error(status: StatusCode, message: &str) -> ApiError {
    (status, Json(json!({ "error": message })))
}

fn ok(body: Value) -> ApiResult {
    Ok((StatusCode::OK, Json(body)))
}

// Authenticate request and resolve the calling user
fn authenticate_request(headers: &HeaderMap, state: &ApiState) -> Result<User, ApiError> {
    let token = extract_jwt_from_headers(headers)
        .ok_or_else(|| api_error(StatusCode::UNAUTHORIZED, "Token is missing"))?;

    let claims = state
        .jwt
        .validate_token(&token)
        .map_err(|e| api_error(StatusCode::UNAUTHORIZED, &e))?;

    state
        .users
        .get(claims.user_id)
        .ok_or_else(|| api_error(StatusCode::UNAUTHORIZED, "User not found"))
}

fn require_admin(user: &User) -> Result<(), ApiError> {
    if user.is_admin() {
        Ok(())
    } else {
        Err(api_error(StatusCode::FORBIDDEN, "Admin privileges required"))
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

fn non_empty(field: Option<String>) -> Option<String> {
    field.filter(|value| !value.trim().is_empty())
}

// POST /api/auth/login
pub async fn login(State(state): State<ApiState>, Json(body): Json<LoginRequest>) -> ApiResult {
    let (Some(email), Some(password)) = (non_empty(body.email), non_empty(body.password)) else {
        return Err(api_error(StatusCode::BAD_REQUEST, "Email and password are required"));
    };

    let user = state.users.authenticate(&email, &password).ok_or_else(|| {
        warn!("Failed login for {}", email);
        api_error(StatusCode::UNAUTHORIZED, "Invalid credentials")
    })?;

    let token = state
        .jwt
        .issue(&user)
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, &e))?;

    info!("User {} logged in", user.username);
    ok(json!({ "success": true, "token": token, "user": user }))
}

// POST /api/auth/register
pub async fn register(State(state): State<ApiState>, Json(body): Json<RegisterRequest>) -> ApiResult {
    let (Some(username), Some(email), Some(password)) =
        (non_empty(body.username), non_empty(body.email), non_empty(body.password))
    else {
        return Err(api_error(StatusCode::BAD_REQUEST, "All fields are required"));
    };

    let user = state
        .users
        .register(&username, &email, &password)
        .map_err(|e| api_error(StatusCode::CONFLICT, &e))?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "message": "User created successfully", "user": user })),
    ))
}

// GET /api/auth/me
pub async fn current_user(State(state): State<ApiState>, headers: HeaderMap) -> ApiResult {
    let user = authenticate_request(&headers, &state)?;
    ok(json!({ "user": user }))
}

// GET /api/widgets
pub async fn list_widgets(State(state): State<ApiState>, headers: HeaderMap) -> ApiResult {
    let user = authenticate_request(&headers, &state)?;
    let widgets = state.widgets.list_for(&user);
    let total = widgets.len();
    ok(json!({ "widgets": widgets, "total": total }))
}

// POST /api/widgets
pub async fn create_widget(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<NewWidget>,
) -> ApiResult {
    let user = authenticate_request(&headers, &state)?;
    let widget = state
        .widgets
        .create(body, user.id)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, &e))?;
    Ok((StatusCode::CREATED, Json(json!({ "success": true, "widget": widget }))))
}

fn visible_widget(state: &ApiState, user: &User, id: u64) -> Result<Widget, ApiError> {
    let widget = state
        .widgets
        .get(id)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "Widget not found"))?;
    if !widget.visible_to(user) {
        return Err(api_error(StatusCode::FORBIDDEN, "Access denied"));
    }
    Ok(widget)
}

// GET /api/widgets/:id
pub async fn get_widget(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<u64>,
) -> ApiResult {
    let user = authenticate_request(&headers, &state)?;
    let widget = visible_widget(&state, &user, id)?;
    ok(json!({ "widget": widget }))
}

// PUT /api/widgets/:id
pub async fn update_widget(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<u64>,
    Json(patch): Json<WidgetPatch>,
) -> ApiResult {
    let user = authenticate_request(&headers, &state)?;
    visible_widget(&state, &user, id)?;
    let widget = state
        .widgets
        .update(id, patch)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "Widget not found"))?;
    ok(json!({ "success": true, "widget": widget }))
}

// DELETE /api/widgets/:id
pub async fn delete_widget(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<u64>,
) -> ApiResult {
    let user = authenticate_request(&headers, &state)?;
    visible_widget(&state, &user, id)?;
    if !state.widgets.delete(id) {
        return Err(api_error(StatusCode::NOT_FOUND, "Widget not found"));
    }
    info!("User {} deleted widget {}", user.username, id);
    ok(json!({ "success": true, "message": "Widget deleted" }))
}

// GET /api/users (admin)
pub async fn list_users(State(state): State<ApiState>, headers: HeaderMap) -> ApiResult {
    let user = authenticate_request(&headers, &state)?;
    require_admin(&user)?;
    ok(json!({ "users": state.users.list() }))
}

// DELETE /api/users/:id (admin)
pub async fn delete_user(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<u64>,
) -> ApiResult {
    let user = authenticate_request(&headers, &state)?;
    require_admin(&user)?;
    if id == user.id {
        return Err(api_error(StatusCode::BAD_REQUEST, "Cannot delete yourself"));
    }
    if !state.users.delete(id) {
        return Err(api_error(StatusCode::NOT_FOUND, "User not found"));
    }
    ok(json!({ "success": true, "message": "User deleted" }))
}

// GET /api/analytics/overview
pub async fn analytics_overview(State(state): State<ApiState>, headers: HeaderMap) -> ApiResult {
    authenticate_request(&headers, &state)?;
    let summary = state.widgets.summary();
    ok(json!({
        "overview": {
            "total_users": state.users.count(),
            "total_widgets": summary.total_widgets,
            "active_widgets": summary.active_widgets,
            "live_connections": state.broadcaster.stats().connections
        }
    }))
}

// GET /api/analytics/widgets
pub async fn widget_analytics(State(state): State<ApiState>, headers: HeaderMap) -> ApiResult {
    authenticate_request(&headers, &state)?;
    let summary = serde_json::to_value(state.widgets.summary())
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()))?;
    ok(summary)
}

// GET /api/templates
pub async fn list_templates(State(state): State<ApiState>) -> ApiResult {
    ok(json!({ "templates": state.templates.all() }))
}

// GET /api/templates/:id
pub async fn get_template(State(state): State<ApiState>, Path(id): Path<u64>) -> ApiResult {
    let template = state
        .templates
        .get(id)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "Template not found"))?;
    ok(json!({ "template": template }))
}

// GET /api/prices
pub async fn list_prices(State(state): State<ApiState>) -> ApiResult {
    let prices: Vec<Value> = state
        .broadcaster
        .prices()
        .into_iter()
        .map(|p| json!({ "symbol": p.symbol, "price": crate::prices::round2(p.value) }))
        .collect();
    ok(json!({ "prices": prices, "timestamp": chrono::Utc::now() }))
}

// GET /api/prices/:symbol
pub async fn get_price(State(state): State<ApiState>, Path(symbol): Path<String>) -> ApiResult {
    let symbol = crate::prices::normalize_symbol(&symbol);
    let price = state
        .broadcaster
        .price(&symbol)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "Symbol not found"))?;
    ok(json!({
        "symbol": symbol,
        "price": crate::prices::round2(price),
        "timestamp": chrono::Utc::now()
    }))
}

// GET /api/web3/price/:symbol
pub async fn web3_price(State(state): State<ApiState>, Path(symbol): Path<String>) -> ApiResult {
    let symbol = crate::prices::normalize_symbol(&symbol);
    let price = state
        .broadcaster
        .price(&symbol)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "Symbol not found"))?;
    let change = state.broadcaster.change_since_open(&symbol).unwrap_or(0.0);
    ok(json!({
        "symbol": symbol,
        "price": crate::prices::round2(price),
        "change_24h": crate::prices::round2(change),
        "timestamp": chrono::Utc::now()
    }))
}

const NETWORKS: &[(u64, &str, &str, &str)] = &[
    (1, "Ethereum", "ETH", "https://mainnet.infura.io"),
    (56, "BSC", "BNB", "https://bsc-dataseed.binance.org"),
    (137, "Polygon", "MATIC", "https://polygon-rpc.com"),
    (42161, "Arbitrum", "ETH", "https://arb1.arbitrum.io/rpc"),
];

// GET /api/web3/networks
pub async fn web3_networks() -> ApiResult {
    let networks: Vec<Value> = NETWORKS
        .iter()
        .map(|(id, name, symbol, rpc)| json!({ "id": id, "name": name, "symbol": symbol, "rpc": rpc }))
        .collect();
    ok(json!({ "networks": networks }))
}

// GET /api/feed/stats
pub async fn feed_stats(State(state): State<ApiState>) -> ApiResult {
    let broadcaster = &state.broadcaster;
    let subscribers: serde_json::Map<String, Value> = broadcaster
        .prices()
        .into_iter()
        .map(|p| {
            let count = broadcaster.subscribers(&p.symbol).len();
            (p.symbol, json!(count))
        })
        .collect();
    ok(json!({ "feed": broadcaster.stats(), "subscribers": subscribers }))
}

// GET /health - Health check endpoint
pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "widget_feed",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now()
    }))
}

// Create the API router
pub fn create_api_router(state: ApiState, static_dir: &str) -> Router {
    let api_routes = Router::new()
        .route("/auth/login", post(login))
        .route("/auth/register", post(register))
        .route("/auth/me", get(current_user))
        .route("/widgets", get(list_widgets).post(create_widget))
        .route("/widgets/:id", get(get_widget).put(update_widget).delete(delete_widget))
        .route("/users", get(list_users))
        .route("/users/:id", delete(delete_user))
        .route("/analytics/overview", get(analytics_overview))
        .route("/analytics/widgets", get(widget_analytics))
        .route("/templates", get(list_templates))
        .route("/templates/:id", get(get_template))
        .route("/prices", get(list_prices))
        .route("/prices/:symbol", get(get_price))
        .route("/web3/price/:symbol", get(web3_price))
        .route("/web3/networks", get(web3_networks))
        .route("/feed/stats", get(feed_stats))
        .with_state(state);

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", api_routes)
        .fallback_service(ServeDir::new(static_dir))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::prices::PriceStore;

    fn state() -> ApiState {
        ApiState {
            broadcaster: Broadcaster::new(PriceStore::from_seed(&[("BTC", 45000.0), ("ETH", 3200.0)]), 8),
            users: UserStore::with_demo_users(),
            widgets: WidgetStore::with_demo_widgets(),
            templates: Arc::new(TemplateCatalog::builtin()),
            jwt: Arc::new(JwtManager::new(&"t".repeat(32))),
        }
    }

    fn router(state: ApiState) -> Router {
        create_api_router(state, "./does-not-exist")
    }

    async fn call(app: &Router, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header("Content-Type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn login_as(app: &Router, email: &str, password: &str) -> String {
        let (status, body) = call(app, "POST", "/api/auth/login", None, Some(json!({"email": email, "password": password}))).await;
        assert_eq!(status, StatusCode::OK);
        body["token"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_health() {
        let app = router(state());
        let (status, body) = call(&app, "GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_login_and_me() {
        let app = router(state());
        let (status, _) = call(&app, "POST", "/api/auth/login", None, Some(json!({"email": "admin@widgetfeed.dev"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(&app, "POST", "/api/auth/login", None, Some(json!({"email": "admin@widgetfeed.dev", "password": "nope"}))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let token = login_as(&app, "admin@widgetfeed.dev", "admin123").await;
        let (status, body) = call(&app, "GET", "/api/auth/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["role"], "admin");
        assert!(body["user"].get("password").is_none());

        let (status, body) = call(&app, "GET", "/api/auth/me", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Token is missing");
    }

    #[tokio::test]
    async fn test_register_conflict() {
        let app = router(state());
        let payload = json!({"username": "dave", "email": "dave@example.com", "password": "pw"});
        let (status, body) = call(&app, "POST", "/api/auth/register", None, Some(payload.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["user"]["role"], "user");

        let (status, _) = call(&app, "POST", "/api/auth/register", None, Some(payload)).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = call(&app, "POST", "/api/auth/register", None, Some(json!({"username": "x"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_widget_crud_and_access() {
        let app = router(state());
        let user = login_as(&app, "user1@widgetfeed.dev", "user123").await;
        let admin = login_as(&app, "admin@widgetfeed.dev", "admin123").await;

        let (status, body) = call(&app, "GET", "/api/widgets", Some(&user), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 1);

        let (status, _) = call(&app, "GET", "/api/widgets/1", Some(&user), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = call(&app, "POST", "/api/widgets", Some(&user), Some(json!({"name": "no type"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(&app, "POST", "/api/widgets", Some(&user), Some(json!({"name": "BNB", "type": "price", "symbol": "BNB"}))).await;
        assert_eq!(status, StatusCode::CREATED);
        let id = body["widget"]["id"].as_u64().unwrap();

        let (status, body) = call(&app, "PUT", &format!("/api/widgets/{}", id), Some(&user), Some(json!({"active": false}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["widget"]["active"], false);
        assert_eq!(body["widget"]["name"], "BNB");

        let (_, body) = call(&app, "GET", "/api/widgets", Some(&admin), None).await;
        assert_eq!(body["total"], 3);

        let (status, _) = call(&app, "DELETE", &format!("/api/widgets/{}", id), Some(&admin), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(&app, "GET", &format!("/api/widgets/{}", id), Some(&user), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_admin_routes() {
        let app = router(state());
        let user = login_as(&app, "user1@widgetfeed.dev", "user123").await;
        let admin = login_as(&app, "admin@widgetfeed.dev", "admin123").await;

        let (status, _) = call(&app, "GET", "/api/users", Some(&user), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = call(&app, "GET", "/api/users", Some(&admin), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["users"].as_array().unwrap().len(), 2);

        let (status, _) = call(&app, "DELETE", "/api/users/1", Some(&admin), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(&app, "DELETE", "/api/users/2", Some(&admin), None).await;
        assert_eq!(status, StatusCode::OK);

        // Token outlives the deleted account
        let (status, body) = call(&app, "GET", "/api/auth/me", Some(&user), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "User not found");
    }

    #[tokio::test]
    async fn test_analytics_and_templates() {
        let app = router(state());
        let user = login_as(&app, "user1@widgetfeed.dev", "user123").await;

        let (status, body) = call(&app, "GET", "/api/analytics/widgets", Some(&user), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_widgets"], 2);
        assert_eq!(body["widget_types"]["price"], 1);

        let (status, body) = call(&app, "GET", "/api/templates", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["templates"].as_array().unwrap().len(), 1);

        let (status, _) = call(&app, "GET", "/api/templates/42", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_prices_follow_the_store() {
        let state = state();
        let app = router(state.clone());

        let (status, body) = call(&app, "GET", "/api/prices/btc", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["symbol"], "BTC");
        assert_eq!(body["price"], 45000.0);

        state.broadcaster.tick(|s| if s == "BTC" { 0.01 } else { 0.0 });
        let (_, body) = call(&app, "GET", "/api/prices/BTC", None, None).await;
        assert_eq!(body["price"], 45450.0);

        let (status, body) = call(&app, "GET", "/api/prices/DOGE", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Symbol not found");

        let (_, body) = call(&app, "GET", "/api/prices", None, None).await;
        assert_eq!(body["prices"].as_array().unwrap().len(), 2);

        let (_, body) = call(&app, "GET", "/api/feed/stats", None, None).await;
        assert_eq!(body["feed"]["symbols"], 2);
    }

    #[tokio::test]
    async fn test_analytics_overview_counts_stores() {
        let state = state();
        let app = router(state.clone());

        let (status, _) = call(&app, "GET", "/api/analytics/overview", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let user = login_as(&app, "user1@widgetfeed.dev", "user123").await;
        state.users.register("erin", "erin@example.com", "pw").unwrap();
        let (status, body) = call(&app, "GET", "/api/analytics/overview", Some(&user), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["overview"]["total_users"], 3);
        assert_eq!(body["overview"]["total_widgets"], 2);
        assert_eq!(body["overview"]["active_widgets"], 2);
        assert_eq!(body["overview"]["live_connections"], 0);
    }

    #[tokio::test]
    async fn test_web3_networks() {
        let app = router(state());
        let (status, body) = call(&app, "GET", "/api/web3/networks", None, None).await;
        assert_eq!(status, StatusCode::OK);

        let networks = body["networks"].as_array().unwrap();
        let ids: Vec<u64> = networks.iter().map(|n| n["id"].as_u64().unwrap()).collect();
        assert_eq!(ids, vec![1, 56, 137, 42161]);
        assert_eq!(networks[2]["symbol"], "MATIC");
        assert!(networks.iter().all(|n| n["rpc"].as_str().unwrap().starts_with("https://")));
    }

    #[tokio::test]
    async fn test_web3_price_reads_live_store() {
        let state = state();
        let app = router(state.clone());

        let (status, body) = call(&app, "GET", "/api/web3/price/eth", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["symbol"], "ETH");
        assert_eq!(body["price"], 3200.0);
        assert_eq!(body["change_24h"], 0.0);

        state.broadcaster.tick(|s| if s == "ETH" { -0.05 } else { 0.0 });
        let (_, body) = call(&app, "GET", "/api/web3/price/ETH", None, None).await;
        assert_eq!(body["price"], 3040.0);
        assert_eq!(body["change_24h"], -5.0);

        let (status, body) = call(&app, "GET", "/api/web3/price/SOL", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Symbol not found");
    }

    #[tokio::test]
    async fn test_feed_stats_counts_subscribers_per_symbol() {
        let state = state();
        let app = router(state.clone());
        let (a, _rx_a) = state.broadcaster.connect();
        let (b, _rx_b) = state.broadcaster.connect();
        state.broadcaster.subscribe(a, &["BTC", "ETH"]);
        state.broadcaster.subscribe(b, &["BTC"]);

        let (status, body) = call(&app, "GET", "/api/feed/stats", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["feed"]["connections"], 2);
        assert_eq!(body["feed"]["subscriptions"], 3);
        assert_eq!(body["subscribers"]["BTC"], 2);
        assert_eq!(body["subscribers"]["ETH"], 1);
    }
}
