//! HTTP routes: the webhook endpoint and a health check.

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::error::Error;
use crate::transactions::WebhookPayload;
use crate::webhook::intake::{self, WebhookIntake};

/// Shared state for webhook routes.
#[derive(Clone)]
pub struct WebhookRouteState {
    pub intake: WebhookIntake,
}

/// POST /hook
///
/// Acknowledges with 200 once the dedup decision is made, whatever the
/// rules then do. A ledger failure answers 503 so the sender retries.
async fn receive_hook(
    State(state): State<WebhookRouteState>,
    payload: Result<Json<WebhookPayload>, JsonRejection>,
) -> impl IntoResponse {
    let Json(webhook) = match payload {
        Ok(p) => p,
        Err(rejection) => {
            warn!("Rejected webhook body: {rejection}");
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": rejection.body_text() })),
            )
                .into_response();
        }
    };

    match state.intake.handle(webhook).await {
        Ok(_) => StatusCode::OK.into_response(),
        Err(e) => error_response(e),
    }
}

fn error_response(e: Error) -> axum::response::Response {
    let status = if intake::is_retryable(&e) {
        error!("Webhook not recorded: {e}");
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        warn!("Webhook rejected: {e}");
        StatusCode::BAD_REQUEST
    };
    (status, Json(serde_json::json!({ "error": e.to_string() }))).into_response()
}

/// GET /health
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Build the service router.
pub fn webhook_routes(state: WebhookRouteState) -> Router {
    Router::new()
        .route("/hook", post(receive_hook))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
