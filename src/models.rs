use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::{
    config::PaymentConfig,
    gateway::PaymentGateway,
    reminders::Reminders,
    services::{
        booking::BookingService, cancellation::CancellationService, lifecycle::LifecycleService,
        reschedule::RescheduleService, schedules::ScheduleService, webhooks::PaymentReconciler,
    },
    store::Store,
};

/// Shared handler state. Every service holds its own handle on the injected store.
pub struct AppState<S: Store> {
    pub store: Arc<S>,
    pub schedules: Arc<ScheduleService<S>>,
    pub booking: Arc<BookingService<S>>,
    pub reconciler: Arc<PaymentReconciler<S>>,
    pub cancellation: Arc<CancellationService<S>>,
    pub reschedule: Arc<RescheduleService<S>>,
    pub lifecycle: Arc<LifecycleService<S>>,
    pub webhook_secret: String,
    pub webhook_tolerance_secs: i64,
}

impl<S: Store> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            schedules: self.schedules.clone(),
            booking: self.booking.clone(),
            reconciler: self.reconciler.clone(),
            cancellation: self.cancellation.clone(),
            reschedule: self.reschedule.clone(),
            lifecycle: self.lifecycle.clone(),
            webhook_secret: self.webhook_secret.clone(),
            webhook_tolerance_secs: self.webhook_tolerance_secs,
        }
    }
}

impl<S: Store> AppState<S> {
    pub fn new(
        store: Arc<S>,
        gateway: Arc<dyn PaymentGateway>,
        reminders: Arc<dyn Reminders>,
        payment: &PaymentConfig,
        reminder_lead_minutes: i64,
    ) -> Self {
        Self {
            schedules: Arc::new(ScheduleService::new(store.clone())),
            booking: Arc::new(BookingService::new(
                store.clone(),
                gateway.clone(),
                &payment.currency,
            )),
            reconciler: Arc::new(PaymentReconciler::new(store.clone(), gateway.clone())),
            cancellation: Arc::new(CancellationService::new(store.clone(), gateway)),
            reschedule: Arc::new(RescheduleService::new(
                store.clone(),
                reminders,
                reminder_lead_minutes,
            )),
            lifecycle: Arc::new(LifecycleService::new(store.clone())),
            store,
            webhook_secret: payment.webhook_secret.clone(),
            webhook_tolerance_secs: payment.webhook_tolerance_secs,
        }
    }
}

/* -------------------------
   API envelopes
--------------------------*/

#[derive(Debug, Serialize)]
pub struct ApiOk<T> {
    pub data: T,
}

/* -------------------------
   Roles and the acting user
--------------------------*/

/// Role values as stored in `app_user.role`:
/// 0 Patient, 1 Admin, 3 Doctor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Patient,
    Admin,
    Doctor,
}

impl Role {
    pub fn from_db(role: i16) -> Option<Self> {
        match role {
            0 => Some(Role::Patient),
            1 => Some(Role::Admin),
            3 => Some(Role::Doctor),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Patient => "patient",
            Role::Admin => "admin",
            Role::Doctor => "doctor",
        }
    }
}

/// The authenticated user a request acts for, with the profile it owns.
#[derive(Debug, Clone)]
pub struct Actor {
    pub user_id: Uuid,
    pub role: Role,
    /// Set when the user has a patient profile.
    pub patient_id: Option<Uuid>,
    /// Set when the user practices as a doctor.
    pub doctor_id: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct SessionIdentity {
    pub session_token_id: Uuid,
    pub actor: Actor,
}

/* -------------------------
   Status enums (smallint in DB)
--------------------------*/

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum AppointmentStatus {
    Pending = 0,
    PendingPayment = 1,
    Confirmed = 2,
    Overflow = 3,
    Completed = 4,
    Cancelled = 5,
    NoShow = 6,
}

impl AppointmentStatus {
    /// Statuses that hold a seat on a capacity schedule.
    pub const ADMITTED: [AppointmentStatus; 3] = [
        AppointmentStatus::Confirmed,
        AppointmentStatus::Completed,
        AppointmentStatus::NoShow,
    ];

    /// Statuses still waiting on their visit; they follow schedule moves.
    pub const OPEN: [AppointmentStatus; 4] = [
        AppointmentStatus::Pending,
        AppointmentStatus::PendingPayment,
        AppointmentStatus::Confirmed,
        AppointmentStatus::Overflow,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "PENDING",
            AppointmentStatus::PendingPayment => "PENDING_PAYMENT",
            AppointmentStatus::Confirmed => "CONFIRMED",
            AppointmentStatus::Overflow => "OVERFLOW",
            AppointmentStatus::Completed => "COMPLETED",
            AppointmentStatus::Cancelled => "CANCELLED",
            AppointmentStatus::NoShow => "NO_SHOW",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AppointmentStatus::Completed | AppointmentStatus::Cancelled | AppointmentStatus::NoShow
        )
    }

    pub fn is_admitted(self) -> bool {
        Self::ADMITTED.contains(&self)
    }

    /// Edges of the appointment state machine. Time-dependent guards
    /// (start passed / not passed) are checked by the callers.
    pub fn can_transition_to(self, next: AppointmentStatus) -> bool {
        use AppointmentStatus::*;
        match self {
            Pending => matches!(next, Confirmed | Cancelled),
            PendingPayment => matches!(next, Confirmed | Overflow | Cancelled),
            Confirmed => matches!(next, Completed | Cancelled | NoShow),
            Overflow => matches!(next, Cancelled),
            Completed | Cancelled | NoShow => false,
        }
    }
}

impl std::fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum PaymentStatus {
    Unpaid = 0,
    Pending = 1,
    Processing = 2,
    Paid = 3,
}

/// Lifecycle of a gateway-linked `payment` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum PaymentRecordStatus {
    Pending = 0,
    Processing = 1,
    Completed = 2,
    Failed = 3,
}

/* -------------------------
   DB Row Models
--------------------------*/

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Schedule {
    pub schedule_id: Uuid,
    pub doctor_id: Uuid,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub max_patients: i32,
    pub created_at: DateTime<Utc>,
}

impl Schedule {
    pub fn starts_at(&self) -> DateTime<Utc> {
        self.date.and_time(self.start_time).and_utc()
    }

    pub fn ends_at(&self) -> DateTime<Utc> {
        self.date.and_time(self.end_time).and_utc()
    }

    /// A schedule accepts bookings until its window closes.
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        now < self.ends_at()
    }
}

#[derive(Debug, Clone)]
pub struct NewSchedule {
    pub doctor_id: Uuid,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub max_patients: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Appointment {
    pub appointment_id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub schedule_id: Option<Uuid>,
    pub time_slot_id: Option<Uuid>,
    pub status: AppointmentStatus,
    pub payment_status: PaymentStatus,
    pub queue_number: Option<i32>,
    pub payment_intent_id: Option<String>,
    pub notes: Option<String>,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub is_archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    /// Appends a line to the notes, keeping whatever was there.
    pub fn append_note(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        self.notes = Some(match self.notes.take() {
            Some(prev) if !prev.is_empty() => format!("{prev}\n{line}"),
            _ => line.to_string(),
        });
    }
}

#[derive(Debug, Clone)]
pub struct NewAppointment {
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub schedule_id: Option<Uuid>,
    pub time_slot_id: Option<Uuid>,
    pub status: AppointmentStatus,
    pub payment_status: PaymentStatus,
    pub queue_number: Option<i32>,
    pub notes: Option<String>,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TimeSlot {
    pub time_slot_id: Uuid,
    pub doctor_id: Uuid,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub is_booked: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub payment_id: Uuid,
    pub appointment_id: Option<Uuid>,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub amount_cents: i64,
    pub currency: String,
    pub status: PaymentRecordStatus,
    pub provider: String,
    pub external_intent_id: Option<String>,
    pub external_charge_id: Option<String>,
    pub refunded_cents: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    pub fn refundable_cents(&self) -> i64 {
        (self.amount_cents - self.refunded_cents).max(0)
    }
}

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub appointment_id: Option<Uuid>,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub amount_cents: i64,
    pub currency: String,
    pub status: PaymentRecordStatus,
    pub provider: String,
    pub external_intent_id: Option<String>,
}

/* -------------------------
   Helpers
--------------------------*/

/// Schedule plus its derived occupancy.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleAvailability {
    #[serde(flatten)]
    pub schedule: Schedule,
    pub admitted: i64,
    pub pending_payment: i64,
    pub remaining: i64,
}
