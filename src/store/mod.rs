// src/store/mod.rs
//
// Transactional store boundary. Services never see SQL; they run their
// check-then-write sequences as one closure passed to `Store::transaction`.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use futures::future::BoxFuture;
use uuid::Uuid;

use crate::{
    error::ApiError,
    models::{
        Appointment, AppointmentStatus, NewAppointment, NewPayment, NewSchedule, Payment,
        Schedule, SessionIdentity, TimeSlot,
    },
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub type TxFuture<'t, T> = BoxFuture<'t, Result<T, ApiError>>;

#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Runs `work` inside one transaction. Commits when it returns `Ok`,
    /// rolls everything back when it returns `Err`.
    ///
    /// Implementations must give schedule-scoped count-then-write sequences
    /// serializable behaviour (see `StoreTx::lock_schedule`).
    async fn transaction<T, F>(&self, work: F) -> Result<T, ApiError>
    where
        T: Send + 'static,
        F: for<'t> FnOnce(&'t mut dyn StoreTx) -> TxFuture<'t, T> + Send + 'static;
}

/// Transaction-scoped handle.
#[async_trait]
pub trait StoreTx: Send {
    /* ---------- schedules ---------- */

    async fn insert_schedule(&mut self, new: NewSchedule) -> Result<Schedule, ApiError>;

    async fn schedule(&mut self, schedule_id: Uuid) -> Result<Option<Schedule>, ApiError>;

    /// Reads the schedule row and holds it exclusively until the transaction
    /// ends, serializing every booking decision against that schedule.
    async fn lock_schedule(&mut self, schedule_id: Uuid) -> Result<Option<Schedule>, ApiError>;

    async fn update_schedule(&mut self, schedule: &Schedule) -> Result<(), ApiError>;

    async fn delete_schedule(&mut self, schedule_id: Uuid) -> Result<(), ApiError>;

    async fn schedules_for_doctor(
        &mut self,
        doctor_id: Uuid,
        from: NaiveDate,
    ) -> Result<Vec<Schedule>, ApiError>;

    async fn count_appointments(
        &mut self,
        schedule_id: Uuid,
        statuses: &[AppointmentStatus],
    ) -> Result<i64, ApiError>;

    /// Rewrites the visit window of every open appointment on a schedule.
    async fn move_schedule_appointments(
        &mut self,
        schedule_id: Uuid,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
    ) -> Result<u64, ApiError>;

    /// Queue numbers currently held by admitted appointments of a schedule.
    async fn taken_queue_numbers(&mut self, schedule_id: Uuid) -> Result<Vec<i32>, ApiError>;

    /* ---------- doctors ---------- */

    /// Per-appointment fee in minor units, `None` when the doctor is unknown.
    async fn doctor_fee_cents(&mut self, doctor_id: Uuid) -> Result<Option<i64>, ApiError>;

    /* ---------- appointments ---------- */

    async fn insert_appointment(&mut self, new: NewAppointment) -> Result<Appointment, ApiError>;

    /// Plain point read, no row lock.
    async fn appointment(&mut self, appointment_id: Uuid) -> Result<Option<Appointment>, ApiError>;

    /// Point read that also locks the row for the rest of the transaction.
    async fn appointment_for_update(
        &mut self,
        appointment_id: Uuid,
    ) -> Result<Option<Appointment>, ApiError>;

    /// Newest appointment carrying the intent, preferring non-cancelled rows.
    async fn appointment_by_intent_for_update(
        &mut self,
        intent_id: &str,
    ) -> Result<Option<Appointment>, ApiError>;

    async fn update_appointment(&mut self, appointment: &Appointment) -> Result<(), ApiError>;

    async fn archive_ended_appointments(&mut self, now: DateTime<Utc>) -> Result<u64, ApiError>;

    /* ---------- time slots ---------- */

    async fn time_slot_for_update(&mut self, time_slot_id: Uuid)
    -> Result<Option<TimeSlot>, ApiError>;

    async fn set_time_slot_booked(&mut self, time_slot_id: Uuid, booked: bool)
    -> Result<(), ApiError>;

    /* ---------- payments ---------- */

    async fn insert_payment(&mut self, new: NewPayment) -> Result<Payment, ApiError>;

    async fn payment_by_intent_for_update(
        &mut self,
        intent_id: &str,
    ) -> Result<Option<Payment>, ApiError>;

    async fn payment_for_appointment(
        &mut self,
        appointment_id: Uuid,
    ) -> Result<Option<Payment>, ApiError>;

    async fn update_payment(&mut self, payment: &Payment) -> Result<(), ApiError>;

    /* ---------- webhook idempotency ---------- */

    /// Records a gateway event id. Returns `false` when it was seen before.
    async fn record_webhook_event(
        &mut self,
        event_id: &str,
        event_type: &str,
    ) -> Result<bool, ApiError>;

    /* ---------- sessions ---------- */

    async fn session_by_token_hash(
        &mut self,
        token_hash: &str,
    ) -> Result<Option<SessionIdentity>, ApiError>;
}
