mod common;

use std::collections::HashSet;

use clinic_booking::models::{AppointmentStatus, PaymentRecordStatus, PaymentStatus, Role};
use common::*;
use uuid::Uuid;

#[tokio::test]
async fn manual_bookings_fill_the_queue_then_conflict() {
    let h = Harness::new().await;
    let schedule = h.schedule(2).await;
    let staff = h.doctor();

    let first = h
        .state
        .booking
        .create_manual_booking(&staff, schedule.schedule_id, Uuid::new_v4(), "cash")
        .await
        .unwrap();
    let second = h
        .state
        .booking
        .create_manual_booking(&staff, schedule.schedule_id, Uuid::new_v4(), "cash")
        .await
        .unwrap();
    assert_eq!(first.queue_number, 1);
    assert_eq!(second.queue_number, 2);

    let err = h
        .state
        .booking
        .create_manual_booking(&staff, schedule.schedule_id, Uuid::new_v4(), "cash")
        .await
        .unwrap_err();
    assert_eq!(err.status(), axum::http::StatusCode::CONFLICT);
    assert_eq!(err.message(), "schedule is full");

    let rows = h.store.appointments_for_schedule(schedule.schedule_id).await;
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|a| a.status == AppointmentStatus::Confirmed
        && a.payment_status == PaymentStatus::Paid));
}

#[tokio::test]
async fn manual_booking_records_a_completed_payment() {
    let h = Harness::new().await;
    let schedule = h.schedule(3).await;

    let booking = h
        .state
        .booking
        .create_manual_booking(&h.admin(), schedule.schedule_id, Uuid::new_v4(), " Cash ")
        .await
        .unwrap();

    let payment = h.store.payment_for_appointment(booking.id).await.unwrap();
    assert_eq!(payment.status, PaymentRecordStatus::Completed);
    assert_eq!(payment.provider, "cash");
    assert_eq!(payment.amount_cents, FEE_CENTS);
    assert!(payment.external_intent_id.is_none());
}

#[tokio::test]
async fn concurrent_manual_bookings_never_overfill() {
    let h = Harness::new().await;
    let schedule = h.schedule(5).await;

    let mut tasks = Vec::new();
    for _ in 0..20 {
        let booking = h.state.booking.clone();
        let staff = h.doctor();
        let schedule_id = schedule.schedule_id;
        tasks.push(tokio::spawn(async move {
            booking
                .create_manual_booking(&staff, schedule_id, Uuid::new_v4(), "cash")
                .await
        }));
    }

    let mut ok = 0;
    let mut full = 0;
    for t in tasks {
        match t.await.unwrap() {
            Ok(_) => ok += 1,
            Err(e) => {
                assert_eq!(e.code(), "SCHEDULE_FULL");
                full += 1;
            }
        }
    }
    assert_eq!(ok, 5);
    assert_eq!(full, 15);

    let queue: HashSet<i32> = h
        .store
        .appointments_for_schedule(schedule.schedule_id)
        .await
        .iter()
        .filter_map(|a| a.queue_number)
        .collect();
    assert_eq!(queue, (1..=5).collect());
}

#[tokio::test]
async fn manual_booking_is_staff_only() {
    let h = Harness::new().await;
    let schedule = h.schedule(2).await;
    let me = Uuid::new_v4();

    let err = h
        .state
        .booking
        .create_manual_booking(&patient(me), schedule.schedule_id, me, "cash")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "FORBIDDEN");

    let other_doctor = actor(clinic_booking::models::Role::Doctor, None, Some(Uuid::new_v4()));
    let err = h
        .state
        .booking
        .create_manual_booking(&other_doctor, schedule.schedule_id, me, "cash")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "FORBIDDEN");
}

#[tokio::test]
async fn start_booking_reserves_without_consuming_capacity() {
    let h = Harness::new().await;
    let schedule = h.schedule(1).await;

    // more reservations than seats is allowed; payment decides admission
    let (a1, intent1) = h.start_online(&schedule, Uuid::new_v4()).await;
    let (a2, intent2) = h.start_online(&schedule, Uuid::new_v4()).await;
    assert_ne!(intent1, intent2);

    for id in [a1, a2] {
        let appt = h.store.appointment(id).await.unwrap();
        assert_eq!(appt.status, AppointmentStatus::PendingPayment);
        assert_eq!(appt.payment_status, PaymentStatus::Pending);
        assert_eq!(appt.queue_number, None);
        assert_eq!(appt.schedule_id, Some(schedule.schedule_id));
    }

    let intent = h.gateway.intent(&intent1);
    assert_eq!(intent.amount, FEE_CENTS);
    assert_eq!(intent.currency, "usd");
    assert_eq!(intent.metadata["appointment_id"], a1.to_string());
    assert_eq!(intent.metadata["schedule_id"], schedule.schedule_id.to_string());

    let payment = h.store.payment_by_intent(&intent1).await.unwrap();
    assert_eq!(payment.status, PaymentRecordStatus::Pending);
    assert_eq!(payment.appointment_id, Some(a1));
}

#[tokio::test]
async fn start_booking_returns_the_client_secret() {
    let h = Harness::new().await;
    let schedule = h.schedule(1).await;

    let started = h
        .state
        .booking
        .start_booking(&h.admin(), schedule.schedule_id, Uuid::new_v4())
        .await
        .unwrap();
    let appt = h.store.appointment(started.appointment_id).await.unwrap();
    let intent_id = appt.payment_intent_id.unwrap();
    assert_eq!(started.client_secret, format!("{intent_id}_secret"));
}

#[tokio::test]
async fn past_schedules_cannot_be_booked() {
    let h = Harness::new().await;
    let schedule = h.schedule_on(yesterday(), 5).await;

    let err = h
        .state
        .booking
        .start_booking(&h.admin(), schedule.schedule_id, Uuid::new_v4())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");
    assert!(err.message().contains("past"));

    let err = h
        .state
        .booking
        .create_manual_booking(&h.admin(), schedule.schedule_id, Uuid::new_v4(), "cash")
        .await
        .unwrap_err();
    assert!(err.message().contains("past"));
    assert!(h.store.appointments_for_schedule(schedule.schedule_id).await.is_empty());
}

#[tokio::test]
async fn free_doctor_cannot_take_online_payment() {
    let h = Harness::new().await;
    h.store.add_doctor(h.doctor_id, 0).await;
    let schedule = h.schedule(5).await;

    let err = h
        .state
        .booking
        .start_booking(&h.admin(), schedule.schedule_id, Uuid::new_v4())
        .await
        .unwrap_err();
    assert_eq!(err.status(), axum::http::StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(err.code(), "INVALID_AMOUNT");
    assert!(h.store.appointments_for_schedule(schedule.schedule_id).await.is_empty());
}

#[tokio::test]
async fn unknown_schedule_is_not_found() {
    let h = Harness::new().await;
    let err = h
        .state
        .booking
        .start_booking(&h.admin(), Uuid::new_v4(), Uuid::new_v4())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");
}

#[tokio::test]
async fn gateway_outage_releases_the_reservation() {
    let h = Harness::new().await;
    let schedule = h.schedule(5).await;
    h.gateway.fail_intents(true);

    let err = h
        .state
        .booking
        .start_booking(&h.admin(), schedule.schedule_id, Uuid::new_v4())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INTERNAL");

    let rows = h.store.appointments_for_schedule(schedule.schedule_id).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, AppointmentStatus::Cancelled);
    assert_eq!(rows[0].payment_status, PaymentStatus::Unpaid);
}

#[tokio::test]
async fn online_booking_respects_practice_and_patient_boundaries() {
    let h = Harness::new().await;
    let schedule = h.schedule(3).await;
    let other_doctor = actor(Role::Doctor, None, Some(Uuid::new_v4()));

    let err = h
        .state
        .booking
        .start_booking(&other_doctor, schedule.schedule_id, Uuid::new_v4())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "FORBIDDEN");

    let me = Uuid::new_v4();
    let err = h
        .state
        .booking
        .start_booking(&patient(me), schedule.schedule_id, Uuid::new_v4())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "FORBIDDEN");
    assert!(h.store.appointments_for_schedule(schedule.schedule_id).await.is_empty());

    h.state
        .booking
        .start_booking(&h.doctor(), schedule.schedule_id, me)
        .await
        .unwrap();
    h.state
        .booking
        .start_booking(&patient(me), schedule.schedule_id, me)
        .await
        .unwrap();
    assert_eq!(h.store.appointments_for_schedule(schedule.schedule_id).await.len(), 2);
}
