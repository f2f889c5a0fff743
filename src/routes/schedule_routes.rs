// src/routes/schedule_routes.rs

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState, Schedule, ScheduleAvailability},
    services::schedules::{CreateScheduleInput, UpdateScheduleInput},
    store::Store,
};

pub fn router<S: Store>() -> Router<AppState<S>> {
    Router::new()
        .route(
            "/schedules",
            get(list_schedules::<S>).post(create_schedule::<S>),
        )
        .route(
            "/schedules/{schedule_id}",
            get(get_schedule::<S>)
                .patch(update_schedule::<S>)
                .delete(delete_schedule::<S>),
        )
}

#[derive(Debug, Deserialize)]
pub struct ListSchedulesQuery {
    #[serde(alias = "doctorId")]
    pub doctor_id: Uuid,
    pub from: Option<NaiveDate>,
}

pub async fn create_schedule<S: Store>(
    State(state): State<AppState<S>>,
    auth: AuthContext,
    Json(req): Json<CreateScheduleInput>,
) -> Result<(StatusCode, Json<ApiOk<Schedule>>), ApiError> {
    let schedule = state.schedules.create_schedule(&auth.actor, req).await?;
    Ok((StatusCode::CREATED, Json(ApiOk { data: schedule })))
}

pub async fn list_schedules<S: Store>(
    State(state): State<AppState<S>>,
    _auth: AuthContext,
    Query(q): Query<ListSchedulesQuery>,
) -> Result<Json<ApiOk<Vec<ScheduleAvailability>>>, ApiError> {
    let from = q.from.unwrap_or_else(|| Utc::now().date_naive());
    let schedules = state.schedules.list_schedules(q.doctor_id, from).await?;
    Ok(Json(ApiOk { data: schedules }))
}

pub async fn get_schedule<S: Store>(
    State(state): State<AppState<S>>,
    _auth: AuthContext,
    Path(schedule_id): Path<Uuid>,
) -> Result<Json<ApiOk<ScheduleAvailability>>, ApiError> {
    let schedule = state.schedules.get_schedule(schedule_id).await?;
    Ok(Json(ApiOk { data: schedule }))
}

pub async fn update_schedule<S: Store>(
    State(state): State<AppState<S>>,
    auth: AuthContext,
    Path(schedule_id): Path<Uuid>,
    Json(req): Json<UpdateScheduleInput>,
) -> Result<Json<ApiOk<ScheduleAvailability>>, ApiError> {
    let schedule = state
        .schedules
        .update_schedule(&auth.actor, schedule_id, req)
        .await?;
    Ok(Json(ApiOk { data: schedule }))
}

pub async fn delete_schedule<S: Store>(
    State(state): State<AppState<S>>,
    auth: AuthContext,
    Path(schedule_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state
        .schedules
        .delete_schedule(&auth.actor, schedule_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
