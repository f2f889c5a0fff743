use crate::{models::AppState, store::Store};
use axum::Router;

pub mod appointment_routes;
pub mod booking_routes;
pub mod schedule_routes;
pub mod webhook_routes;

pub fn router<S: Store>(state: AppState<S>) -> Router {
    Router::new()
        .merge(schedule_routes::router())
        .merge(booking_routes::router())
        .merge(appointment_routes::router())
        .merge(webhook_routes::router())
        .with_state(state)
}
