// src/services/booking.rs

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::{
    error::ApiError,
    gateway::{IntentMetadata, PaymentGateway},
    models::{
        Actor, Appointment, AppointmentStatus, NewAppointment, NewPayment, PaymentRecordStatus,
        PaymentStatus, Role, Schedule,
    },
    services::ensure_practice,
    store::{Store, StoreTx},
};

#[derive(Debug, Clone, Serialize)]
pub struct StartedBooking {
    pub client_secret: String,
    pub appointment_id: Uuid,
}

#[derive(Debug, Clone, Serialize)]
pub struct ManualBooking {
    pub id: Uuid,
    pub queue_number: i32,
}

pub struct BookingService<S: Store> {
    store: Arc<S>,
    gateway: Arc<dyn PaymentGateway>,
    currency: String,
}

/// Lowest positive queue number not held by an admitted appointment.
/// Equals `count + 1` as long as nobody ahead cancelled.
pub fn next_queue_number(taken: &[i32]) -> i32 {
    let mut n = 1;
    let mut sorted = taken.to_vec();
    sorted.sort_unstable();
    for q in sorted {
        if q == n {
            n += 1;
        } else if q > n {
            break;
        }
    }
    n
}

/// Capacity check and queue assignment for one admission. The schedule must
/// have been read with `lock_schedule` in the same transaction. `None` means
/// the schedule is full.
pub(crate) async fn claim_queue_position(
    tx: &mut dyn StoreTx,
    schedule: &Schedule,
) -> Result<Option<i32>, ApiError> {
    let admitted = tx
        .count_appointments(schedule.schedule_id, &AppointmentStatus::ADMITTED)
        .await?;
    if admitted >= i64::from(schedule.max_patients) {
        return Ok(None);
    }
    let taken = tx.taken_queue_numbers(schedule.schedule_id).await?;
    Ok(Some(next_queue_number(&taken)))
}

/// Patients book for themselves; staff only on schedules of their practice.
fn ensure_may_book(actor: &Actor, schedule: &Schedule, patient_id: Uuid) -> Result<(), ApiError> {
    match actor.role {
        Role::Patient if actor.patient_id == Some(patient_id) => Ok(()),
        Role::Patient => Err(ApiError::forbidden("Patients can only book for themselves")),
        Role::Admin | Role::Doctor => ensure_practice(actor, schedule.doctor_id),
    }
}

impl<S: Store> BookingService<S> {
    pub fn new(store: Arc<S>, gateway: Arc<dyn PaymentGateway>, currency: &str) -> Self {
        Self {
            store,
            gateway,
            currency: currency.to_ascii_lowercase(),
        }
    }

    /// Online booking: reserves an appointment in PENDING_PAYMENT and opens a
    /// payment intent. Capacity is adjudicated later, when the payment confirms.
    pub async fn start_booking(
        &self,
        actor: &Actor,
        schedule_id: Uuid,
        patient_id: Uuid,
    ) -> Result<StartedBooking, ApiError> {
        let actor = actor.clone();
        let now = Utc::now();

        let (appointment, amount_cents) = self
            .store
            .transaction(move |tx| {
                Box::pin(async move {
                    let schedule = tx
                        .schedule(schedule_id)
                        .await?
                        .ok_or_else(|| ApiError::not_found("schedule"))?;
                    ensure_may_book(&actor, &schedule, patient_id)?;

                    if !schedule.is_open(now) {
                        return Err(ApiError::validation("Cannot book a schedule in the past"));
                    }

                    let fee = tx.doctor_fee_cents(schedule.doctor_id).await?.unwrap_or(0);
                    if fee <= 0 {
                        return Err(ApiError::invalid_amount(
                            "This doctor has no consultation price; online payment is unavailable",
                        ));
                    }

                    let appointment = tx
                        .insert_appointment(NewAppointment {
                            patient_id,
                            doctor_id: schedule.doctor_id,
                            schedule_id: Some(schedule.schedule_id),
                            time_slot_id: None,
                            status: AppointmentStatus::PendingPayment,
                            payment_status: PaymentStatus::Pending,
                            queue_number: None,
                            notes: None,
                            start_at: schedule.starts_at(),
                            end_at: schedule.ends_at(),
                            paid_at: None,
                        })
                        .await?;

                    Ok((appointment, fee))
                })
            })
            .await?;

        let metadata = IntentMetadata {
            schedule_id,
            doctor_id: appointment.doctor_id,
            patient_id,
            appointment_id: appointment.appointment_id,
        };

        let intent = match self
            .gateway
            .create_payment_intent(amount_cents, &self.currency, &metadata)
            .await
        {
            Ok(intent) => intent,
            Err(e) => {
                tracing::error!(
                    appointment_id = %appointment.appointment_id,
                    schedule_id = %schedule_id,
                    error = %e,
                    "payment intent creation failed"
                );
                self.abandon(appointment.appointment_id, "Payment could not be started")
                    .await;
                return Err(e.into());
            }
        };

        let appointment_id = appointment.appointment_id;
        let intent_id = intent.id.clone();
        let currency = self.currency.clone();

        self.store
            .transaction(move |tx| {
                Box::pin(async move {
                    let mut appointment = tx
                        .appointment_for_update(appointment_id)
                        .await?
                        .ok_or_else(|| ApiError::not_found("appointment"))?;

                    appointment.payment_intent_id = Some(intent_id.clone());
                    tx.update_appointment(&appointment).await?;

                    tx.insert_payment(NewPayment {
                        appointment_id: Some(appointment_id),
                        patient_id: appointment.patient_id,
                        doctor_id: appointment.doctor_id,
                        amount_cents,
                        currency,
                        status: PaymentRecordStatus::Pending,
                        provider: "gateway".into(),
                        external_intent_id: Some(intent_id),
                    })
                    .await?;
                    Ok(())
                })
            })
            .await
            .inspect_err(|e| {
                tracing::error!(
                    appointment_id = %appointment_id,
                    intent_id = %intent.id,
                    error = %e,
                    "could not attach payment intent"
                )
            })?;

        tracing::info!(
            appointment_id = %appointment_id,
            schedule_id = %schedule_id,
            intent_id = %intent.id,
            amount_cents,
            "online booking started"
        );

        Ok(StartedBooking {
            client_secret: intent.client_secret,
            appointment_id,
        })
    }

    /// Staff-assisted booking paid on the spot. Count and insert happen under
    /// the schedule lock, so concurrent calls cannot overfill the schedule.
    pub async fn create_manual_booking(
        &self,
        actor: &Actor,
        schedule_id: Uuid,
        patient_id: Uuid,
        payment_provider: &str,
    ) -> Result<ManualBooking, ApiError> {
        let provider = payment_provider.trim().to_ascii_lowercase();
        if provider.is_empty() {
            return Err(ApiError::validation("payment_provider is required"));
        }

        let actor = actor.clone();
        let currency = self.currency.clone();
        let now = Utc::now();

        let appointment: Appointment = self
            .store
            .transaction(move |tx| {
                Box::pin(async move {
                    let schedule = tx
                        .lock_schedule(schedule_id)
                        .await?
                        .ok_or_else(|| ApiError::not_found("schedule"))?;
                    ensure_practice(&actor, schedule.doctor_id)?;

                    if !schedule.is_open(now) {
                        return Err(ApiError::validation("Cannot book a schedule in the past"));
                    }

                    let Some(queue_number) = claim_queue_position(&mut *tx, &schedule).await?
                    else {
                        return Err(ApiError::schedule_full());
                    };

                    let fee = tx.doctor_fee_cents(schedule.doctor_id).await?.unwrap_or(0);

                    let appointment = tx
                        .insert_appointment(NewAppointment {
                            patient_id,
                            doctor_id: schedule.doctor_id,
                            schedule_id: Some(schedule.schedule_id),
                            time_slot_id: None,
                            status: AppointmentStatus::Confirmed,
                            payment_status: PaymentStatus::Paid,
                            queue_number: Some(queue_number),
                            notes: None,
                            start_at: schedule.starts_at(),
                            end_at: schedule.ends_at(),
                            paid_at: Some(now),
                        })
                        .await?;

                    tx.insert_payment(NewPayment {
                        appointment_id: Some(appointment.appointment_id),
                        patient_id,
                        doctor_id: schedule.doctor_id,
                        amount_cents: fee.max(0),
                        currency,
                        status: PaymentRecordStatus::Completed,
                        provider,
                        external_intent_id: None,
                    })
                    .await?;

                    Ok(appointment)
                })
            })
            .await?;

        let queue_number = appointment.queue_number.unwrap_or_default();
        tracing::info!(
            appointment_id = %appointment.appointment_id,
            schedule_id = %schedule_id,
            queue_number,
            "manual booking confirmed"
        );

        Ok(ManualBooking {
            id: appointment.appointment_id,
            queue_number,
        })
    }

    /// Best effort: a reservation whose intent never got created is released.
    async fn abandon(&self, appointment_id: Uuid, note: &'static str) {
        let now = Utc::now();
        let res = self
            .store
            .transaction(move |tx| {
                Box::pin(async move {
                    let Some(mut appointment) = tx.appointment_for_update(appointment_id).await?
                    else {
                        return Ok(());
                    };
                    if appointment.status != AppointmentStatus::PendingPayment {
                        return Ok(());
                    }
                    appointment.status = AppointmentStatus::Cancelled;
                    appointment.payment_status = PaymentStatus::Unpaid;
                    appointment.cancelled_at = Some(now);
                    appointment.append_note(note);
                    tx.update_appointment(&appointment).await
                })
            })
            .await;

        if let Err(e) = res {
            tracing::warn!(appointment_id = %appointment_id, error = %e, "could not release reservation");
        }
    }
}
