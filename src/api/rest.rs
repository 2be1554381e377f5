// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// The interactive surface of the sentinel.  Every configuration edit a
// subscriber can make maps to one endpoint and one `commands` call; free-text
// inputs are taken as `{ "text": "..." }` and normalised by the command layer.
//
// All endpoints live under `/api/v1/`.  Health is public; everything else
// requires a valid Bearer token checked via the `AuthBearer` extractor.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::api::auth::AuthBearer;
use crate::app_state::{AppState, PairStatus};
use crate::commands::{self, AddOutcome, CommandError, RemoveOutcome};
use crate::store::SubscriberConfig;
use crate::types::PairKey;

// =============================================================================
// Router construction
// =============================================================================

/// Build the full REST API router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Public ──────────────────────────────────────────────────
        .route("/api/v1/health", get(health))
        // ── Authenticated ───────────────────────────────────────────
        .route("/api/v1/state", get(full_state))
        .route("/api/v1/alerts", get(recent_alerts))
        .route("/api/v1/errors", get(recent_errors))
        .route("/api/v1/subscribers/:id", get(subscriber_settings))
        .route("/api/v1/subscribers/:id/coins", get(list_coins))
        .route("/api/v1/subscribers/:id/coins", post(add_coin))
        .route("/api/v1/subscribers/:id/coins/:symbol", delete(remove_coin))
        .route("/api/v1/subscribers/:id/toggle", post(toggle_monitoring))
        .route("/api/v1/subscribers/:id/interval", put(set_interval))
        .route("/api/v1/subscribers/:id/rsi", put(set_rsi))
        // ── WebSocket alert feed ────────────────────────────────────
        .route("/api/v1/ws", get(crate::api::ws::ws_handler))
        // ── Middleware & State ───────────────────────────────────────
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Error mapping
// =============================================================================

impl IntoResponse for CommandError {
    fn into_response(self) -> Response {
        let status = match &self {
            CommandError::Store(e) => {
                error!(error = %format!("{e:#}"), "settings could not be persisted");
                StatusCode::INTERNAL_SERVER_ERROR
            }
            CommandError::UnknownSubscriber(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::BAD_REQUEST,
        };
        let body = serde_json::json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}

/// Free-text input, as typed at a prompt.
#[derive(Deserialize)]
struct TextInput {
    text: String,
}

#[derive(Serialize)]
struct MessageResponse<T: Serialize> {
    message: String,
    #[serde(flatten)]
    data: T,
}

// =============================================================================
// Health (public)
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    state_version: u64,
    server_time: i64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        state_version: state.current_state_version(),
        server_time: chrono::Utc::now().timestamp_millis(),
    })
}

// =============================================================================
// Engine views (authenticated)
// =============================================================================

async fn full_state(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    Json(state.build_snapshot())
}

async fn recent_alerts(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    Json(state.recent_alerts.read().clone())
}

async fn recent_errors(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    Json(state.recent_errors.read().clone())
}

// =============================================================================
// Subscriber settings (authenticated)
// =============================================================================

#[derive(Serialize)]
struct SubscriberView {
    settings: SubscriberConfig,
    pairs: Vec<PairStatus>,
}

async fn subscriber_settings(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, CommandError> {
    let settings = commands::settings(&state.store, &id)?;
    let pairs = state
        .build_snapshot()
        .pairs
        .into_iter()
        .filter(|p| p.subscriber == id)
        .collect();
    Ok(Json(SubscriberView { settings, pairs }))
}

#[derive(Serialize)]
struct CoinsResponse {
    coins: Vec<String>,
}

async fn list_coins(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, CommandError> {
    let coins = commands::list_symbols(&state.store, &id)?;
    Ok(Json(CoinsResponse { coins }))
}

async fn add_coin(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(input): Json<TextInput>,
) -> Result<impl IntoResponse, CommandError> {
    let (status, message) = match commands::add_symbol(&state.store, &id, &input.text)? {
        AddOutcome::Added(sym) => (StatusCode::CREATED, format!("{sym} added")),
        AddOutcome::AlreadyPresent(sym) => (StatusCode::OK, format!("{sym} is already in the list")),
    };
    state.increment_version();

    let coins = commands::list_symbols(&state.store, &id)?;
    Ok((status, Json(MessageResponse { message, data: CoinsResponse { coins } })))
}

async fn remove_coin(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Path((id, symbol)): Path<(String, String)>,
) -> Result<impl IntoResponse, CommandError> {
    let (status, message) = match commands::remove_symbol(&state.store, &id, &symbol)? {
        RemoveOutcome::Removed(sym) => {
            state.forget_pair(&PairKey::new(id.as_str(), sym.as_str()));
            (StatusCode::OK, format!("{sym} removed"))
        }
        RemoveOutcome::NotPresent(sym) => (StatusCode::NOT_FOUND, format!("{sym} is not in the list")),
    };
    state.increment_version();

    let coins = commands::list_symbols(&state.store, &id)?;
    Ok((status, Json(MessageResponse { message, data: CoinsResponse { coins } })))
}

#[derive(Serialize)]
struct ActiveResponse {
    active: bool,
}

async fn toggle_monitoring(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, CommandError> {
    let active = commands::toggle_active(&state.store, &id)?;
    state.increment_version();

    let message = if active { "Monitoring resumed" } else { "Monitoring paused" };
    info!(subscriber = %id, active, "monitoring toggled via API");
    Ok(Json(MessageResponse {
        message: message.to_string(),
        data: ActiveResponse { active },
    }))
}

#[derive(Serialize)]
struct IntervalResponse {
    interval: String,
}

async fn set_interval(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(input): Json<TextInput>,
) -> Result<impl IntoResponse, CommandError> {
    let interval = commands::set_interval(&state.store, &id, &input.text)?;
    state.increment_version();

    Ok(Json(MessageResponse {
        message: format!("Kline interval set to {interval}"),
        data: IntervalResponse {
            interval: interval.to_string(),
        },
    }))
}

#[derive(Serialize)]
struct RsiResponse {
    rsi_period: u32,
    rsi_overbought: i64,
    rsi_oversold: i64,
}

async fn set_rsi(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(input): Json<TextInput>,
) -> Result<impl IntoResponse, CommandError> {
    let (rsi_period, rsi_overbought, rsi_oversold) =
        commands::set_rsi(&state.store, &id, &input.text)?;
    state.increment_version();

    Ok(Json(MessageResponse {
        message: "RSI parameters updated".to_string(),
        data: RsiResponse {
            rsi_period,
            rsi_overbought,
            rsi_oversold,
        },
    }))
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{header, Method, Request};
    use tower::ServiceExt;

    use super::*;
    use crate::api::auth::ADMIN_TOKEN_ENV;
    use crate::binance::RateLimitTracker;
    use crate::runtime_config::RuntimeConfig;
    use crate::store::SubscriberStore;

    const TOKEN: &str = "test-admin-token";

    fn app() -> (Router, Arc<AppState>) {
        std::env::set_var(ADMIN_TOKEN_ENV, TOKEN);
        let state = Arc::new(AppState::new(
            RuntimeConfig::default(),
            Arc::new(SubscriberStore::in_memory()),
            Arc::new(RateLimitTracker::new()),
        ));
        (router(state.clone()), state)
    }

    fn request(method: Method, uri: &str, body: Option<serde_json::Value>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
            .header(header::CONTENT_TYPE, "application/json");
        match body {
            Some(json) => builder.body(Body::from(json.to_string())).unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn json_body(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_is_public() {
        let (app, _) = app();
        let resp = app
            .oneshot(Request::get("/api/v1/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await["status"], "ok");
    }

    #[tokio::test]
    async fn settings_require_token() {
        let (app, _) = app();
        let resp = app
            .oneshot(Request::get("/api/v1/subscribers/1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn add_coin_then_list() {
        let (app, state) = app();
        let resp = app
            .clone()
            .oneshot(request(
                Method::POST,
                "/api/v1/subscribers/7/coins",
                Some(serde_json::json!({ "text": "btcusdt" })),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        assert_eq!(json_body(resp).await["coins"], serde_json::json!(["BTCUSDT"]));

        let resp = app
            .oneshot(request(Method::GET, "/api/v1/subscribers/7/coins", None))
            .await
            .unwrap();
        assert_eq!(json_body(resp).await["coins"], serde_json::json!(["BTCUSDT"]));
        assert_eq!(state.store.get("7").unwrap().coins, vec!["BTCUSDT"]);
    }

    #[tokio::test]
    async fn invalid_symbol_is_bad_request() {
        let (app, _) = app();
        let resp = app
            .oneshot(request(
                Method::POST,
                "/api/v1/subscribers/7/coins",
                Some(serde_json::json!({ "text": "DOGEBTC" })),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(json_body(resp).await["error"]
            .as_str()
            .unwrap()
            .contains("DOGEBTC"));
    }

    #[tokio::test]
    async fn reading_unknown_subscriber_is_not_found() {
        let (app, state) = app();
        for uri in ["/api/v1/subscribers/404", "/api/v1/subscribers/404/coins"] {
            let resp = app
                .clone()
                .oneshot(request(Method::GET, uri, None))
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::NOT_FOUND, "{uri}");
        }
        assert_eq!(state.store.len(), 0);
    }

    #[tokio::test]
    async fn removed_coin_leaves_state_view() {
        let (app, state) = app();
        commands::add_symbol(&state.store, "7", "BTCUSDT").unwrap();
        let key = PairKey::new("7", "BTCUSDT");
        state.tracker.evaluate(&key, 80.0, 70.0, 30.0);
        state.record_reading(key, 80.0);

        let resp = app
            .clone()
            .oneshot(request(Method::DELETE, "/api/v1/subscribers/7/coins/btcusdt", None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app
            .oneshot(request(Method::GET, "/api/v1/state", None))
            .await
            .unwrap();
        assert_eq!(json_body(resp).await["pairs"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn remove_missing_coin_is_not_found() {
        let (app, _) = app();
        let resp = app
            .oneshot(request(Method::DELETE, "/api/v1/subscribers/7/coins/ETHUSDT", None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn toggle_interval_and_rsi_updates() {
        let (app, state) = app();

        let resp = app
            .clone()
            .oneshot(request(Method::POST, "/api/v1/subscribers/9/toggle", None))
            .await
            .unwrap();
        assert_eq!(json_body(resp).await["active"], false);

        let resp = app
            .clone()
            .oneshot(request(
                Method::PUT,
                "/api/v1/subscribers/9/interval",
                Some(serde_json::json!({ "text": "1H" })),
            ))
            .await
            .unwrap();
        assert_eq!(json_body(resp).await["interval"], "1h");

        let resp = app
            .oneshot(request(
                Method::PUT,
                "/api/v1/subscribers/9/rsi",
                Some(serde_json::json!({ "text": "21,80,20" })),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let cfg = state.store.get("9").unwrap();
        assert!(!cfg.active);
        assert_eq!(cfg.interval, "1h");
        assert_eq!((cfg.rsi_period, cfg.rsi_overbought, cfg.rsi_oversold), (21, 80, 20));
    }
}
