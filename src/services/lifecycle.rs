// src/services/lifecycle.rs

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    error::ApiError,
    models::{Actor, Appointment, AppointmentStatus},
    services::{authorize_appointment, ensure_practice, ensure_transition},
    store::Store,
};

/// Staff-driven status changes after booking.
pub struct LifecycleService<S: Store> {
    store: Arc<S>,
}

/// Time guard attached to a transition.
#[derive(Debug, Clone, Copy)]
enum StartGuard {
    NotStarted,
    Started,
}

impl<S: Store> LifecycleService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn get_appointment(
        &self,
        actor: &Actor,
        appointment_id: Uuid,
    ) -> Result<Appointment, ApiError> {
        let actor = actor.clone();
        self.store
            .transaction(move |tx| {
                Box::pin(async move {
                    let appointment = tx
                        .appointment(appointment_id)
                        .await?
                        .ok_or_else(|| ApiError::not_found("appointment"))?;
                    authorize_appointment(&actor, &appointment)?;
                    Ok(appointment)
                })
            })
            .await
    }

    pub async fn confirm_appointment(
        &self,
        actor: &Actor,
        appointment_id: Uuid,
    ) -> Result<Appointment, ApiError> {
        self.transition(
            actor,
            appointment_id,
            AppointmentStatus::Confirmed,
            StartGuard::NotStarted,
        )
        .await
    }

    pub async fn complete_appointment(
        &self,
        actor: &Actor,
        appointment_id: Uuid,
    ) -> Result<Appointment, ApiError> {
        self.transition(
            actor,
            appointment_id,
            AppointmentStatus::Completed,
            StartGuard::Started,
        )
        .await
    }

    pub async fn mark_no_show(
        &self,
        actor: &Actor,
        appointment_id: Uuid,
    ) -> Result<Appointment, ApiError> {
        self.transition(
            actor,
            appointment_id,
            AppointmentStatus::NoShow,
            StartGuard::Started,
        )
        .await
    }

    /// Flags appointments whose end passed. Status is left alone.
    pub async fn archive_elapsed(&self, now: DateTime<Utc>) -> Result<u64, ApiError> {
        self.store
            .transaction(move |tx| Box::pin(async move { tx.archive_ended_appointments(now).await }))
            .await
    }

    async fn transition(
        &self,
        actor: &Actor,
        appointment_id: Uuid,
        next: AppointmentStatus,
        guard: StartGuard,
    ) -> Result<Appointment, ApiError> {
        let actor = actor.clone();
        let now = Utc::now();

        let appointment = self
            .store
            .transaction(move |tx| {
                Box::pin(async move {
                    let mut appointment = tx
                        .appointment_for_update(appointment_id)
                        .await?
                        .ok_or_else(|| ApiError::not_found("appointment"))?;
                    ensure_practice(&actor, appointment.doctor_id)?;
                    ensure_transition(appointment.status, next)?;

                    let started = appointment.start_at <= now;
                    match guard {
                        StartGuard::NotStarted if started => {
                            return Err(ApiError::validation(
                                "Cannot confirm an appointment whose start time has passed.",
                            ));
                        }
                        StartGuard::Started if !started => {
                            let verb = match next {
                                AppointmentStatus::NoShow => "mark as no-show",
                                _ => "complete",
                            };
                            return Err(ApiError::validation(format!(
                                "Cannot {verb} an appointment that hasn't started."
                            )));
                        }
                        _ => {}
                    }

                    appointment.status = next;
                    tx.update_appointment(&appointment).await?;
                    Ok(appointment)
                })
            })
            .await?;

        tracing::info!(
            appointment_id = %appointment_id,
            status = %appointment.status,
            "appointment status changed"
        );
        Ok(appointment)
    }
}
