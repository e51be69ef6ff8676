// =============================================================================
// HTTP surface (C1's inbound boundary + liveness probe)
// =============================================================================
//
// Grounded on the teacher's `api/rest.rs` idiom (`Router`/`State` extractor,
// `tower_http::cors::CorsLayer`, JSON bodies), trimmed to the two
// interface-level endpoints spec.md §6 actually names: `POST /webhook` and
// `GET /health`. Webhook framing (HMAC signatures, per-tenant auth) is out
// of scope per spec.md §1 — the handler's whole job is decode JSON, hand it
// to the Validator, and answer 200/400/500 with no side channel beyond the
// Collector.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

use crate::app_state::AppState;
use crate::validator::Validator;

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/webhook", post(webhook))
        .route("/health", get(health))
        .layer(cors)
        .with_state(state)
}

/// Decode the inbound payload, validate it into a canonical `Signal`, and
/// hand it to the Collector (C2). 400 on a malformed payload, 200 once the
/// Collector has accepted it — the debounce flush and everything downstream
/// happens off the request path.
async fn webhook(State(state): State<Arc<AppState>>, Json(body): Json<Value>) -> impl IntoResponse {
    match Validator::validate(&body) {
        Ok(signal) => {
            state.collector.receive(signal);
            (StatusCode::OK, Json(json!({ "status": "accepted" })))
        }
        Err(err) => {
            warn!(field = %err.field, reason = %err.reason, "webhook payload rejected");
            (StatusCode::BAD_REQUEST, Json(json!({ "status": "rejected", "error": err.to_string() })))
        }
    }
}

/// Liveness probe (spec.md §6): 200 while the broker connection is up, 503
/// once HealthMonitor's poll has observed it down. Cheap and synchronous —
/// reads the same `Broker::is_connected` HealthMonitor already polls rather
/// than opening a fresh connection per request.
async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.broker.is_connected().await {
        (StatusCode::OK, Json(json!({ "status": "ok" })))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "status": "disconnected" })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MockBroker;
    use crate::persistence::InMemoryStore;
    use crate::runtime_config::RuntimeConfig;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_state() -> Arc<AppState> {
        let broker: Arc<dyn crate::broker::Broker> = Arc::new(MockBroker::default());
        let store: Arc<dyn crate::persistence::Store> = Arc::new(InMemoryStore::new());
        AppState::new(RuntimeConfig::default(), broker, store)
    }

    #[tokio::test]
    async fn health_reports_ok_when_broker_connected() {
        let app = router(test_state());
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn webhook_rejects_missing_required_field() {
        let app = router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhook")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"signal_type": "entry_trigger"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn webhook_accepts_well_formed_structure_signal() {
        let app = router(test_state());
        let body = json!({
            "signal_type": "structure",
            "event": "zone_retrace_touch",
            "price": 5200.5,
            "symbol": "GOLD",
            "strength": "strong",
        });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhook")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
