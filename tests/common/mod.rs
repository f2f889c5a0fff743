//! Shared fixtures: in-memory store, a scripted payment gateway and a reminder
//! service that records what it was asked to do.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use uuid::Uuid;

use clinic_booking::{
    config::PaymentConfig,
    error::ApiError,
    gateway::{CreatedIntent, GatewayError, IntentMetadata, PaymentGateway, PaymentIntent},
    models::{
        Actor, AppState, AppointmentStatus, NewAppointment, NewSchedule, PaymentStatus, Role,
        Schedule, TimeSlot,
    },
    reminders::{Reminder, ReminderStatus, Reminders},
    store::MemoryStore,
};

pub const WEBHOOK_SECRET: &str = "whsec_test";
pub const FEE_CENTS: i64 = 5_000;

/* ---------- payment gateway ---------- */

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRefund {
    pub refund_id: String,
    pub intent_id: String,
    pub amount: i64,
    pub idempotency_key: String,
}

#[derive(Default)]
struct GatewayBook {
    intents: HashMap<String, PaymentIntent>,
    refunds: Vec<RecordedRefund>,
    fail_intents: bool,
    fail_refunds: bool,
    seq: u32,
}

#[derive(Default)]
pub struct FakeGateway {
    book: Mutex<GatewayBook>,
}

impl FakeGateway {
    pub fn fail_intents(&self, fail: bool) {
        self.book.lock().unwrap().fail_intents = fail;
    }

    pub fn fail_refunds(&self, fail: bool) {
        self.book.lock().unwrap().fail_refunds = fail;
    }

    pub fn intent(&self, intent_id: &str) -> PaymentIntent {
        self.book.lock().unwrap().intents[intent_id].clone()
    }

    /// Moves an intent to a new gateway status, as the customer's bank would.
    pub fn settle(&self, intent_id: &str, status: &str) -> PaymentIntent {
        let mut book = self.book.lock().unwrap();
        let intent = book.intents.get_mut(intent_id).unwrap();
        intent.status = status.to_string();
        if status == "succeeded" {
            intent.latest_charge = Some(format!("ch_{intent_id}"));
        }
        intent.clone()
    }

    pub fn refunds(&self) -> Vec<RecordedRefund> {
        self.book.lock().unwrap().refunds.clone()
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_payment_intent(
        &self,
        amount_minor: i64,
        currency: &str,
        metadata: &IntentMetadata,
    ) -> Result<CreatedIntent, GatewayError> {
        if amount_minor <= 0 {
            return Err(GatewayError::InvalidAmount(format!("{amount_minor}")));
        }
        let mut book = self.book.lock().unwrap();
        if book.fail_intents {
            return Err(GatewayError::Rejected {
                status: 503,
                message: "gateway unavailable".into(),
            });
        }
        book.seq += 1;
        let id = format!("pi_test_{}", book.seq);
        book.intents.insert(
            id.clone(),
            PaymentIntent {
                id: id.clone(),
                status: "requires_payment_method".into(),
                amount: amount_minor,
                currency: currency.to_string(),
                metadata: metadata
                    .to_pairs()
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v))
                    .collect(),
                latest_charge: None,
            },
        );
        Ok(CreatedIntent {
            client_secret: format!("{id}_secret"),
            id,
        })
    }

    async fn get_payment_intent(&self, intent_id: &str) -> Result<PaymentIntent, GatewayError> {
        self.book
            .lock()
            .unwrap()
            .intents
            .get(intent_id)
            .cloned()
            .ok_or_else(|| GatewayError::Rejected {
                status: 404,
                message: format!("no such payment_intent: {intent_id}"),
            })
    }

    async fn refund(
        &self,
        intent_id: &str,
        amount_minor: i64,
        idempotency_key: &str,
    ) -> Result<String, GatewayError> {
        let mut book = self.book.lock().unwrap();
        if book.fail_refunds {
            return Err(GatewayError::Rejected {
                status: 402,
                message: "charge already disputed".into(),
            });
        }
        if let Some(prev) = book
            .refunds
            .iter()
            .find(|r| r.idempotency_key == idempotency_key)
        {
            return Ok(prev.refund_id.clone());
        }
        book.seq += 1;
        let refund_id = format!("re_test_{}", book.seq);
        book.refunds.push(RecordedRefund {
            refund_id: refund_id.clone(),
            intent_id: intent_id.to_string(),
            amount: amount_minor,
            idempotency_key: idempotency_key.to_string(),
        });
        Ok(refund_id)
    }
}

/* ---------- reminders ---------- */

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReminderCall {
    Moved(Uuid, DateTime<Utc>),
    Cancelled(Uuid),
}

#[derive(Default)]
pub struct RecordingReminders {
    calls: Mutex<Vec<ReminderCall>>,
    fail: Mutex<bool>,
}

impl RecordingReminders {
    pub fn calls(&self) -> Vec<ReminderCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn fail(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }
}

#[async_trait]
impl Reminders for RecordingReminders {
    async fn update_for_reschedule(
        &self,
        appointment_id: Uuid,
        new_start: DateTime<Utc>,
    ) -> Result<Option<Reminder>, ApiError> {
        self.calls
            .lock()
            .unwrap()
            .push(ReminderCall::Moved(appointment_id, new_start));
        if *self.fail.lock().unwrap() {
            return Err(ApiError::Internal("reminder queue down".into()));
        }
        Ok(Some(Reminder {
            appointment_id,
            send_at: new_start - Duration::hours(24),
            status: ReminderStatus::Scheduled,
        }))
    }

    async fn cancel(&self, appointment_id: Uuid) -> Result<Option<Reminder>, ApiError> {
        self.calls
            .lock()
            .unwrap()
            .push(ReminderCall::Cancelled(appointment_id));
        if *self.fail.lock().unwrap() {
            return Err(ApiError::Internal("reminder queue down".into()));
        }
        Ok(None)
    }
}

/* ---------- harness ---------- */

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub gateway: Arc<FakeGateway>,
    pub reminders: Arc<RecordingReminders>,
    pub state: AppState<MemoryStore>,
    pub doctor_id: Uuid,
}

pub fn payment_config() -> PaymentConfig {
    PaymentConfig {
        secret_key: "sk_test".into(),
        webhook_secret: WEBHOOK_SECRET.into(),
        api_base: "http://gateway.invalid".into(),
        currency: "usd".into(),
        webhook_tolerance_secs: 300,
    }
}

impl Harness {
    /// One doctor charging `FEE_CENTS`, reminder lead of 24h.
    pub async fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(FakeGateway::default());
        let reminders = Arc::new(RecordingReminders::default());

        let state = AppState::new(
            store.clone(),
            gateway.clone(),
            reminders.clone(),
            &payment_config(),
            24 * 60,
        );

        let doctor_id = Uuid::new_v4();
        store.add_doctor(doctor_id, FEE_CENTS).await;

        Self {
            store,
            gateway,
            reminders,
            state,
            doctor_id,
        }
    }

    /// Open schedule tomorrow 09:00-17:00.
    pub async fn schedule(&self, max_patients: i32) -> Schedule {
        self.schedule_on(tomorrow(), max_patients).await
    }

    pub async fn schedule_on(&self, date: NaiveDate, max_patients: i32) -> Schedule {
        self.store
            .seed_schedule(NewSchedule {
                doctor_id: self.doctor_id,
                date,
                start_time: hm(9, 0),
                end_time: hm(17, 0),
                max_patients,
            })
            .await
    }

    pub async fn slot(&self, start_at: DateTime<Utc>) -> TimeSlot {
        self.slot_for(self.doctor_id, start_at).await
    }

    pub async fn slot_for(&self, doctor_id: Uuid, start_at: DateTime<Utc>) -> TimeSlot {
        let slot = TimeSlot {
            time_slot_id: Uuid::new_v4(),
            doctor_id,
            start_at,
            end_at: start_at + Duration::minutes(30),
            is_booked: false,
        };
        self.store.add_time_slot(slot.clone()).await;
        slot
    }

    /// Confirmed slot-based appointment holding `slot`.
    pub async fn slot_appointment(
        &self,
        patient_id: Uuid,
        slot: &TimeSlot,
    ) -> clinic_booking::models::Appointment {
        self.store
            .seed_appointment(NewAppointment {
                patient_id,
                doctor_id: slot.doctor_id,
                schedule_id: None,
                time_slot_id: Some(slot.time_slot_id),
                status: AppointmentStatus::Confirmed,
                payment_status: PaymentStatus::Unpaid,
                queue_number: None,
                notes: Some("first visit".into()),
                start_at: slot.start_at,
                end_at: slot.end_at,
                paid_at: None,
            })
            .await
            .unwrap()
    }

    /// Starts an online booking and returns `(appointment_id, intent_id)`.
    pub async fn start_online(&self, schedule: &Schedule, patient_id: Uuid) -> (Uuid, String) {
        let started = self
            .state
            .booking
            .start_booking(&patient(patient_id), schedule.schedule_id, patient_id)
            .await
            .unwrap();
        let appointment = self.store.appointment(started.appointment_id).await.unwrap();
        (started.appointment_id, appointment.payment_intent_id.unwrap())
    }

    pub fn admin(&self) -> Actor {
        actor(Role::Admin, None, None)
    }

    pub fn doctor(&self) -> Actor {
        actor(Role::Doctor, None, Some(self.doctor_id))
    }
}

pub fn actor(role: Role, patient_id: Option<Uuid>, doctor_id: Option<Uuid>) -> Actor {
    Actor {
        user_id: Uuid::new_v4(),
        role,
        patient_id,
        doctor_id,
    }
}

pub fn patient(patient_id: Uuid) -> Actor {
    actor(Role::Patient, Some(patient_id), None)
}

pub fn hm(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

pub fn tomorrow() -> NaiveDate {
    Utc::now().date_naive() + Duration::days(1)
}

pub fn yesterday() -> NaiveDate {
    Utc::now().date_naive() - Duration::days(1)
}
