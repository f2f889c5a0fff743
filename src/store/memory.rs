// src/store/memory.rs

//! In-process store used by the test-suite and local experiments.
//!
//! Transactions are serialized behind one async mutex and operate on a
//! working copy that replaces the committed state only when the closure
//! returns `Ok`, which gives serializable isolation with real rollback.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
    error::ApiError,
    models::{
        Appointment, AppointmentStatus, NewAppointment, NewPayment, NewSchedule, Payment,
        Schedule, SessionIdentity, TimeSlot,
    },
    store::{Store, StoreTx, TxFuture},
};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    schedules: HashMap<Uuid, Schedule>,
    appointments: HashMap<Uuid, Appointment>,
    time_slots: HashMap<Uuid, TimeSlot>,
    payments: HashMap<Uuid, Payment>,
    doctor_fees: HashMap<Uuid, i64>,
    webhook_events: HashSet<String>,
    sessions: HashMap<String, SessionIdentity>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_doctor(&self, doctor_id: Uuid, fee_cents: i64) {
        self.state.lock().await.doctor_fees.insert(doctor_id, fee_cents);
    }

    pub async fn add_time_slot(&self, slot: TimeSlot) {
        self.state.lock().await.time_slots.insert(slot.time_slot_id, slot);
    }

    pub async fn add_session(&self, token_hash: &str, identity: SessionIdentity) {
        self.state
            .lock()
            .await
            .sessions
            .insert(token_hash.to_string(), identity);
    }

    /// Inserts a schedule without the creation-time validation, e.g. one
    /// that already lies in the past.
    pub async fn seed_schedule(&self, new: NewSchedule) -> Schedule {
        let schedule = new_schedule_row(new);
        self.state
            .lock()
            .await
            .schedules
            .insert(schedule.schedule_id, schedule.clone());
        schedule
    }

    /// Inserts an appointment as another booking channel would have, holding
    /// its time slot when it has one.
    pub async fn seed_appointment(&self, new: NewAppointment) -> Result<Appointment, ApiError> {
        self.transaction(move |tx| {
            Box::pin(async move {
                if let Some(slot_id) = new.time_slot_id {
                    tx.set_time_slot_booked(slot_id, true).await?;
                }
                tx.insert_appointment(new).await
            })
        })
        .await
    }

    pub async fn appointment(&self, appointment_id: Uuid) -> Option<Appointment> {
        self.state.lock().await.appointments.get(&appointment_id).cloned()
    }

    pub async fn appointments_for_schedule(&self, schedule_id: Uuid) -> Vec<Appointment> {
        let state = self.state.lock().await;
        let mut rows: Vec<Appointment> = state
            .appointments
            .values()
            .filter(|a| a.schedule_id == Some(schedule_id))
            .cloned()
            .collect();
        rows.sort_by_key(|a| a.created_at);
        rows
    }

    pub async fn time_slot(&self, time_slot_id: Uuid) -> Option<TimeSlot> {
        self.state.lock().await.time_slots.get(&time_slot_id).cloned()
    }

    pub async fn payment_by_intent(&self, intent_id: &str) -> Option<Payment> {
        self.state
            .lock()
            .await
            .payments
            .values()
            .find(|p| p.external_intent_id.as_deref() == Some(intent_id))
            .cloned()
    }

    pub async fn payment_for_appointment(&self, appointment_id: Uuid) -> Option<Payment> {
        self.state
            .lock()
            .await
            .payments
            .values()
            .find(|p| p.appointment_id == Some(appointment_id))
            .cloned()
    }
}

fn new_schedule_row(new: NewSchedule) -> Schedule {
    Schedule {
        schedule_id: Uuid::new_v4(),
        doctor_id: new.doctor_id,
        date: new.date,
        start_time: new.start_time,
        end_time: new.end_time,
        max_patients: new.max_patients,
        created_at: Utc::now(),
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn transaction<T, F>(&self, work: F) -> Result<T, ApiError>
    where
        T: Send + 'static,
        F: for<'t> FnOnce(&'t mut dyn StoreTx) -> TxFuture<'t, T> + Send + 'static,
    {
        let mut committed = self.state.lock().await;
        let mut tx = MemoryTx {
            state: committed.clone(),
        };

        let value = work(&mut tx).await?;
        *committed = tx.state;
        Ok(value)
    }
}

struct MemoryTx {
    state: MemoryState,
}

impl MemoryTx {
    /// Mirrors the partial unique indexes of the SQL schema.
    fn check_unique(&self, candidate: &Appointment) -> Result<(), ApiError> {
        for other in self.state.appointments.values() {
            if other.appointment_id == candidate.appointment_id {
                continue;
            }
            if let (Some(a), Some(b)) = (&candidate.payment_intent_id, &other.payment_intent_id) {
                if a == b
                    && candidate.status != AppointmentStatus::Cancelled
                    && other.status != AppointmentStatus::Cancelled
                {
                    return Err(ApiError::Conflict(
                        "PAYMENT_INTENT_IN_USE",
                        "payment intent already belongs to another active appointment".into(),
                    ));
                }
            }
            if candidate.schedule_id.is_some()
                && candidate.schedule_id == other.schedule_id
                && candidate.queue_number.is_some()
                && candidate.queue_number == other.queue_number
                && candidate.status.is_admitted()
                && other.status.is_admitted()
            {
                return Err(ApiError::Conflict(
                    "QUEUE_NUMBER_TAKEN",
                    "queue number already assigned on this schedule".into(),
                ));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn insert_schedule(&mut self, new: NewSchedule) -> Result<Schedule, ApiError> {
        let schedule = new_schedule_row(new);
        self.state
            .schedules
            .insert(schedule.schedule_id, schedule.clone());
        Ok(schedule)
    }

    async fn schedule(&mut self, schedule_id: Uuid) -> Result<Option<Schedule>, ApiError> {
        Ok(self.state.schedules.get(&schedule_id).cloned())
    }

    async fn lock_schedule(&mut self, schedule_id: Uuid) -> Result<Option<Schedule>, ApiError> {
        // the whole store is already held exclusively
        Ok(self.state.schedules.get(&schedule_id).cloned())
    }

    async fn update_schedule(&mut self, schedule: &Schedule) -> Result<(), ApiError> {
        if let Some(row) = self.state.schedules.get_mut(&schedule.schedule_id) {
            row.date = schedule.date;
            row.start_time = schedule.start_time;
            row.end_time = schedule.end_time;
            row.max_patients = schedule.max_patients;
        }
        Ok(())
    }

    async fn move_schedule_appointments(
        &mut self,
        schedule_id: Uuid,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
    ) -> Result<u64, ApiError> {
        let now = Utc::now();
        let mut moved = 0;
        for appt in self.state.appointments.values_mut() {
            if appt.schedule_id == Some(schedule_id)
                && AppointmentStatus::OPEN.contains(&appt.status)
            {
                appt.start_at = start_at;
                appt.end_at = end_at;
                appt.updated_at = now;
                moved += 1;
            }
        }
        Ok(moved)
    }

    async fn delete_schedule(&mut self, schedule_id: Uuid) -> Result<(), ApiError> {
        self.state.schedules.remove(&schedule_id);
        Ok(())
    }

    async fn schedules_for_doctor(
        &mut self,
        doctor_id: Uuid,
        from: NaiveDate,
    ) -> Result<Vec<Schedule>, ApiError> {
        let mut rows: Vec<Schedule> = self
            .state
            .schedules
            .values()
            .filter(|s| s.doctor_id == doctor_id && s.date >= from)
            .cloned()
            .collect();
        rows.sort_by_key(|s| (s.date, s.start_time));
        Ok(rows)
    }

    async fn count_appointments(
        &mut self,
        schedule_id: Uuid,
        statuses: &[AppointmentStatus],
    ) -> Result<i64, ApiError> {
        let count = self
            .state
            .appointments
            .values()
            .filter(|a| a.schedule_id == Some(schedule_id) && statuses.contains(&a.status))
            .count();
        Ok(count as i64)
    }

    async fn taken_queue_numbers(&mut self, schedule_id: Uuid) -> Result<Vec<i32>, ApiError> {
        let mut taken: Vec<i32> = self
            .state
            .appointments
            .values()
            .filter(|a| a.schedule_id == Some(schedule_id) && a.status.is_admitted())
            .filter_map(|a| a.queue_number)
            .collect();
        taken.sort_unstable();
        Ok(taken)
    }

    async fn doctor_fee_cents(&mut self, doctor_id: Uuid) -> Result<Option<i64>, ApiError> {
        Ok(self.state.doctor_fees.get(&doctor_id).copied())
    }

    async fn insert_appointment(&mut self, new: NewAppointment) -> Result<Appointment, ApiError> {
        let now = Utc::now();
        let appointment = Appointment {
            appointment_id: Uuid::new_v4(),
            patient_id: new.patient_id,
            doctor_id: new.doctor_id,
            schedule_id: new.schedule_id,
            time_slot_id: new.time_slot_id,
            status: new.status,
            payment_status: new.payment_status,
            queue_number: new.queue_number,
            payment_intent_id: None,
            notes: new.notes,
            start_at: new.start_at,
            end_at: new.end_at,
            paid_at: new.paid_at,
            cancelled_at: None,
            is_archived: false,
            created_at: now,
            updated_at: now,
        };
        self.check_unique(&appointment)?;
        self.state
            .appointments
            .insert(appointment.appointment_id, appointment.clone());
        Ok(appointment)
    }

    async fn appointment(&mut self, appointment_id: Uuid) -> Result<Option<Appointment>, ApiError> {
        Ok(self.state.appointments.get(&appointment_id).cloned())
    }

    async fn appointment_for_update(
        &mut self,
        appointment_id: Uuid,
    ) -> Result<Option<Appointment>, ApiError> {
        Ok(self.state.appointments.get(&appointment_id).cloned())
    }

    async fn appointment_by_intent_for_update(
        &mut self,
        intent_id: &str,
    ) -> Result<Option<Appointment>, ApiError> {
        Ok(self
            .state
            .appointments
            .values()
            .filter(|a| a.payment_intent_id.as_deref() == Some(intent_id))
            .max_by_key(|a| (a.status != AppointmentStatus::Cancelled, a.created_at))
            .cloned())
    }

    async fn update_appointment(&mut self, appointment: &Appointment) -> Result<(), ApiError> {
        self.check_unique(appointment)?;
        if let Some(row) = self.state.appointments.get_mut(&appointment.appointment_id) {
            let queue_number = row.queue_number.or(appointment.queue_number);
            *row = Appointment {
                queue_number,
                updated_at: Utc::now(),
                ..appointment.clone()
            };
        }
        Ok(())
    }

    async fn archive_ended_appointments(&mut self, now: DateTime<Utc>) -> Result<u64, ApiError> {
        let mut archived = 0;
        for appt in self.state.appointments.values_mut() {
            if !appt.is_archived && appt.end_at <= now {
                appt.is_archived = true;
                appt.updated_at = now;
                archived += 1;
            }
        }
        Ok(archived)
    }

    async fn time_slot_for_update(
        &mut self,
        time_slot_id: Uuid,
    ) -> Result<Option<TimeSlot>, ApiError> {
        Ok(self.state.time_slots.get(&time_slot_id).cloned())
    }

    async fn set_time_slot_booked(
        &mut self,
        time_slot_id: Uuid,
        booked: bool,
    ) -> Result<(), ApiError> {
        if let Some(slot) = self.state.time_slots.get_mut(&time_slot_id) {
            slot.is_booked = booked;
        }
        Ok(())
    }

    async fn insert_payment(&mut self, new: NewPayment) -> Result<Payment, ApiError> {
        if let Some(intent) = &new.external_intent_id {
            let duplicate = self
                .state
                .payments
                .values()
                .any(|p| p.external_intent_id.as_ref() == Some(intent));
            if duplicate {
                return Err(ApiError::Conflict(
                    "PAYMENT_INTENT_IN_USE",
                    "payment intent already recorded".into(),
                ));
            }
        }
        let now = Utc::now();
        let payment = Payment {
            payment_id: Uuid::new_v4(),
            appointment_id: new.appointment_id,
            patient_id: new.patient_id,
            doctor_id: new.doctor_id,
            amount_cents: new.amount_cents,
            currency: new.currency,
            status: new.status,
            provider: new.provider,
            external_intent_id: new.external_intent_id,
            external_charge_id: None,
            refunded_cents: 0,
            created_at: now,
            updated_at: now,
        };
        self.state.payments.insert(payment.payment_id, payment.clone());
        Ok(payment)
    }

    async fn payment_by_intent_for_update(
        &mut self,
        intent_id: &str,
    ) -> Result<Option<Payment>, ApiError> {
        Ok(self
            .state
            .payments
            .values()
            .find(|p| p.external_intent_id.as_deref() == Some(intent_id))
            .cloned())
    }

    async fn payment_for_appointment(
        &mut self,
        appointment_id: Uuid,
    ) -> Result<Option<Payment>, ApiError> {
        Ok(self
            .state
            .payments
            .values()
            .filter(|p| p.appointment_id == Some(appointment_id))
            .max_by_key(|p| p.created_at)
            .cloned())
    }

    async fn update_payment(&mut self, payment: &Payment) -> Result<(), ApiError> {
        if let Some(row) = self.state.payments.get_mut(&payment.payment_id) {
            row.appointment_id = row.appointment_id.or(payment.appointment_id);
            row.status = payment.status;
            row.external_charge_id = payment.external_charge_id.clone();
            row.refunded_cents = payment.refunded_cents.min(row.amount_cents);
            row.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn record_webhook_event(
        &mut self,
        event_id: &str,
        _event_type: &str,
    ) -> Result<bool, ApiError> {
        Ok(self.state.webhook_events.insert(event_id.to_string()))
    }

    async fn session_by_token_hash(
        &mut self,
        token_hash: &str,
    ) -> Result<Option<SessionIdentity>, ApiError> {
        Ok(self.state.sessions.get(token_hash).cloned())
    }
}
