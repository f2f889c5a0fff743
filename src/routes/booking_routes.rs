// src/routes/booking_routes.rs

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::post,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{Actor, ApiOk, AppState, Role},
    services::{
        booking::{ManualBooking, StartedBooking},
        webhooks::ReconcileOutcome,
    },
    store::Store,
};

pub fn router<S: Store>() -> Router<AppState<S>> {
    Router::new()
        .route("/bookings/start", post(start_booking::<S>))
        .route("/bookings/manual", post(create_manual_booking::<S>))
        .route("/bookings/{appointment_id}/sync", post(sync_booking::<S>))
}

/* ============================================================
   Request DTOs
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct StartBookingRequest {
    #[serde(alias = "scheduleId")]
    pub schedule_id: Uuid,
    /// Staff booking online on a patient's behalf. Patients book for themselves.
    #[serde(default, alias = "patientId")]
    pub patient_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct ManualBookingRequest {
    #[serde(alias = "scheduleId")]
    pub schedule_id: Uuid,
    #[serde(alias = "patientId")]
    pub patient_id: Uuid,
    #[serde(alias = "paymentProvider")]
    pub payment_provider: String,
}

fn resolve_patient(actor: &Actor, requested: Option<Uuid>) -> Result<Uuid, ApiError> {
    match (actor.role, requested) {
        (Role::Patient, None) => actor
            .patient_id
            .ok_or_else(|| ApiError::forbidden("Account has no patient profile")),
        (Role::Patient, Some(id)) if actor.patient_id == Some(id) => Ok(id),
        (Role::Patient, Some(_)) => Err(ApiError::forbidden(
            "Patients can only book for themselves",
        )),
        (Role::Admin | Role::Doctor, Some(id)) => Ok(id),
        (Role::Admin | Role::Doctor, None) => {
            Err(ApiError::validation("patient_id is required"))
        }
    }
}

/* ============================================================
   Handlers
   ============================================================ */

pub async fn start_booking<S: Store>(
    State(state): State<AppState<S>>,
    auth: AuthContext,
    Json(req): Json<StartBookingRequest>,
) -> Result<(StatusCode, Json<ApiOk<StartedBooking>>), ApiError> {
    let patient_id = resolve_patient(&auth.actor, req.patient_id)?;
    let started = state
        .booking
        .start_booking(&auth.actor, req.schedule_id, patient_id)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiOk { data: started })))
}

pub async fn create_manual_booking<S: Store>(
    State(state): State<AppState<S>>,
    auth: AuthContext,
    Json(req): Json<ManualBookingRequest>,
) -> Result<(StatusCode, Json<ApiOk<ManualBooking>>), ApiError> {
    let booking = state
        .booking
        .create_manual_booking(
            &auth.actor,
            req.schedule_id,
            req.patient_id,
            &req.payment_provider,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(ApiOk { data: booking })))
}

pub async fn sync_booking<S: Store>(
    State(state): State<AppState<S>>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<ReconcileOutcome>>, ApiError> {
    let outcome = state
        .reconciler
        .sync_appointment(&auth.actor, appointment_id)
        .await?;
    Ok(Json(ApiOk { data: outcome }))
}
