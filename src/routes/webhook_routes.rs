// src/routes/webhook_routes.rs

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::HeaderMap,
    routing::post,
};
use chrono::Utc;
use serde::Serialize;

use crate::{
    error::ApiError,
    gateway::webhook::{SIGNATURE_HEADER, WebhookError, construct_event},
    models::{ApiOk, AppState},
    services::webhooks::ReconcileOutcome,
    store::Store,
};

pub fn router<S: Store>() -> Router<AppState<S>> {
    Router::new().route("/webhooks/payment", post(payment_webhook::<S>))
}

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
    #[serde(flatten)]
    pub outcome: ReconcileOutcome,
}

/// Raw body on purpose: the signature covers the exact bytes sent.
pub async fn payment_webhook<S: Store>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ApiOk<WebhookAck>>, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            ApiError::BadRequest("INVALID_SIGNATURE", "missing signature header".into())
        })?;

    let event = construct_event(
        &body,
        signature,
        &state.webhook_secret,
        Utc::now().timestamp(),
        state.webhook_tolerance_secs,
    )
    .map_err(|e| {
        tracing::warn!(error = %e, "webhook rejected");
        match e {
            WebhookError::BadPayload(msg) => ApiError::validation(msg),
            other => ApiError::BadRequest("INVALID_SIGNATURE", other.to_string()),
        }
    })?;

    let outcome = state.reconciler.handle_event(event).await?;
    Ok(Json(ApiOk {
        data: WebhookAck {
            received: true,
            outcome,
        },
    }))
}
