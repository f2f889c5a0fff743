// src/routes/appointment_routes.rs

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    routing::{get, post},
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState, Appointment},
    services::cancellation::CancellationResult,
    store::Store,
};

pub fn router<S: Store>() -> Router<AppState<S>> {
    Router::new()
        .route("/appointments/{appointment_id}", get(get_appointment::<S>))
        .route(
            "/appointments/{appointment_id}/cancel",
            post(cancel_appointment::<S>),
        )
        .route(
            "/appointments/{appointment_id}/reschedule",
            post(reschedule_appointment::<S>),
        )
        .route(
            "/appointments/{appointment_id}/confirm",
            post(confirm_appointment::<S>),
        )
        .route(
            "/appointments/{appointment_id}/complete",
            post(complete_appointment::<S>),
        )
        .route(
            "/appointments/{appointment_id}/no-show",
            post(mark_no_show::<S>),
        )
}

/* ============================================================
   Request DTOs
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RescheduleRequest {
    #[serde(alias = "newSlotId")]
    pub new_slot_id: Uuid,
    pub reason: Option<String>,
}

/* ============================================================
   Handlers
   ============================================================ */

pub async fn get_appointment<S: Store>(
    State(state): State<AppState<S>>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<Appointment>>, ApiError> {
    let appointment = state
        .lifecycle
        .get_appointment(&auth.actor, appointment_id)
        .await?;
    Ok(Json(ApiOk { data: appointment }))
}

pub async fn cancel_appointment<S: Store>(
    State(state): State<AppState<S>>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
    body: Bytes,
) -> Result<Json<ApiOk<CancellationResult>>, ApiError> {
    // body is optional; `{}` and no body at all both mean "no reason"
    let reason = if body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        serde_json::from_slice::<CancelRequest>(&body)
            .map_err(|e| ApiError::validation(format!("invalid body: {e}")))?
            .reason
    };
    let result = state
        .cancellation
        .cancel_appointment(&auth.actor, appointment_id, reason)
        .await?;
    Ok(Json(ApiOk { data: result }))
}

pub async fn reschedule_appointment<S: Store>(
    State(state): State<AppState<S>>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
    Json(req): Json<RescheduleRequest>,
) -> Result<Json<ApiOk<Appointment>>, ApiError> {
    let appointment = state
        .reschedule
        .reschedule_appointment(&auth.actor, appointment_id, req.new_slot_id, req.reason)
        .await?;
    Ok(Json(ApiOk { data: appointment }))
}

pub async fn confirm_appointment<S: Store>(
    State(state): State<AppState<S>>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<Appointment>>, ApiError> {
    let appointment = state
        .lifecycle
        .confirm_appointment(&auth.actor, appointment_id)
        .await?;
    Ok(Json(ApiOk { data: appointment }))
}

pub async fn complete_appointment<S: Store>(
    State(state): State<AppState<S>>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<Appointment>>, ApiError> {
    let appointment = state
        .lifecycle
        .complete_appointment(&auth.actor, appointment_id)
        .await?;
    Ok(Json(ApiOk { data: appointment }))
}

pub async fn mark_no_show<S: Store>(
    State(state): State<AppState<S>>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<Appointment>>, ApiError> {
    let appointment = state
        .lifecycle
        .mark_no_show(&auth.actor, appointment_id)
        .await?;
    Ok(Json(ApiOk { data: appointment }))
}
