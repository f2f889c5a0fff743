// src/services/reschedule.rs

use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::{
    error::ApiError,
    models::{Actor, Appointment, AppointmentStatus},
    reminders::{Reminders, plan_send_at},
    services::{authorize_appointment, ensure_not_terminal},
    store::Store,
};

pub struct RescheduleService<S: Store> {
    store: Arc<S>,
    reminders: Arc<dyn Reminders>,
    reminder_lead: Duration,
}

impl<S: Store> RescheduleService<S> {
    pub fn new(store: Arc<S>, reminders: Arc<dyn Reminders>, reminder_lead_minutes: i64) -> Self {
        Self {
            store,
            reminders,
            reminder_lead: Duration::minutes(reminder_lead_minutes),
        }
    }

    /// Moves a slot-based appointment to another free slot of the same doctor.
    /// Releasing the old slot and taking the new one commit together.
    pub async fn reschedule_appointment(
        &self,
        actor: &Actor,
        appointment_id: Uuid,
        new_slot_id: Uuid,
        reason: Option<String>,
    ) -> Result<Appointment, ApiError> {
        let actor = actor.clone();
        let now = Utc::now();

        let (appointment, old_start) = self
            .store
            .transaction(move |tx| {
                Box::pin(async move {
                    let mut appointment = tx
                        .appointment_for_update(appointment_id)
                        .await?
                        .ok_or_else(|| ApiError::not_found("appointment"))?;
                    authorize_appointment(&actor, &appointment)?;

                    ensure_not_terminal(appointment.status)?;
                    if !matches!(
                        appointment.status,
                        AppointmentStatus::Pending | AppointmentStatus::Confirmed
                    ) {
                        return Err(ApiError::validation(format!(
                            "Cannot reschedule an appointment in status {}",
                            appointment.status
                        )));
                    }
                    if appointment.schedule_id.is_some() {
                        return Err(ApiError::validation(
                            "Queue appointments cannot be moved to a time slot; cancel and book again",
                        ));
                    }
                    if appointment.time_slot_id == Some(new_slot_id) {
                        return Err(ApiError::validation(
                            "The appointment is already in this slot",
                        ));
                    }

                    let slot = tx
                        .time_slot_for_update(new_slot_id)
                        .await?
                        .ok_or_else(|| ApiError::not_found("time slot"))?;
                    if slot.doctor_id != appointment.doctor_id {
                        return Err(ApiError::validation(
                            "The new slot belongs to a different doctor",
                        ));
                    }
                    if slot.start_at <= now {
                        return Err(ApiError::validation("Cannot reschedule into the past"));
                    }
                    if slot.is_booked {
                        return Err(ApiError::Conflict(
                            "SLOT_TAKEN",
                            "The selected slot is already booked".into(),
                        ));
                    }

                    if let Some(old_slot_id) = appointment.time_slot_id {
                        tx.set_time_slot_booked(old_slot_id, false).await?;
                    }
                    tx.set_time_slot_booked(slot.time_slot_id, true).await?;

                    let old_start = appointment.start_at;
                    appointment.time_slot_id = Some(slot.time_slot_id);
                    appointment.start_at = slot.start_at;
                    appointment.end_at = slot.end_at;

                    let moved = format!(
                        "Rescheduled from {} to {}",
                        old_start.format("%Y-%m-%d %H:%M UTC"),
                        slot.start_at.format("%Y-%m-%d %H:%M UTC")
                    );
                    match reason.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
                        Some(reason) => appointment.append_note(&format!("{moved}: {reason}")),
                        None => appointment.append_note(&moved),
                    }

                    tx.update_appointment(&appointment).await?;
                    Ok((appointment, old_start))
                })
            })
            .await?;

        tracing::info!(
            appointment_id = %appointment_id,
            time_slot_id = %new_slot_id,
            old_start = %old_start,
            new_start = %appointment.start_at,
            "appointment rescheduled"
        );

        self.sync_reminder(&appointment).await;
        Ok(appointment)
    }

    /// Best effort. A reminder that cannot be moved never fails the reschedule.
    async fn sync_reminder(&self, appointment: &Appointment) {
        let appointment_id = appointment.appointment_id;
        let res = match plan_send_at(appointment.start_at, self.reminder_lead, Utc::now()) {
            Some(_) => {
                self.reminders
                    .update_for_reschedule(appointment_id, appointment.start_at)
                    .await
            }
            None => self.reminders.cancel(appointment_id).await,
        };

        if let Err(e) = res {
            tracing::warn!(appointment_id = %appointment_id, error = %e, "reminder not updated");
        }
    }
}
