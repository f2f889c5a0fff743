mod common;

use chrono::{Duration, Utc};
use clinic_booking::{
    gateway::webhook::{GatewayEvent, GatewayEventKind},
    models::{AppointmentStatus, NewAppointment, PaymentStatus, Role},
    refund_policy::RefundType,
    services::cancellation::RefundOutcome,
};
use common::*;
use uuid::Uuid;

/// Online booking paid through the gateway, three days out.
async fn paid_online(h: &Harness, patient_id: Uuid) -> (Uuid, String) {
    let schedule = h
        .schedule_on(Utc::now().date_naive() + Duration::days(3), 5)
        .await;
    let (appointment_id, intent_id) = h.start_online(&schedule, patient_id).await;
    h.state
        .reconciler
        .handle_event(GatewayEvent {
            id: format!("evt_{intent_id}"),
            event_type: "payment_intent.succeeded".into(),
            kind: GatewayEventKind::PaymentSucceeded(h.gateway.settle(&intent_id, "succeeded")),
        })
        .await
        .unwrap();
    (appointment_id, intent_id)
}

#[tokio::test]
async fn early_patient_cancellation_refunds_in_full_once() {
    let h = Harness::new().await;
    let me = Uuid::new_v4();
    let (appointment_id, intent_id) = paid_online(&h, me).await;

    let first = h
        .state
        .cancellation
        .cancel_appointment(&patient(me), appointment_id, Some("feeling better".into()))
        .await
        .unwrap();
    assert_eq!(first.appointment.status, AppointmentStatus::Cancelled);
    assert!(first.refund_decision.eligible);
    assert_eq!(first.refund_decision.kind, RefundType::Full);
    assert!(matches!(
        first.refund,
        RefundOutcome::Refunded { amount_cents: FEE_CENTS, .. }
    ));

    let refunds = h.gateway.refunds();
    assert_eq!(refunds.len(), 1);
    assert_eq!(refunds[0].intent_id, intent_id);
    assert_eq!(refunds[0].idempotency_key, format!("refund-{appointment_id}"));
    assert_eq!(
        h.store.payment_by_intent(&intent_id).await.unwrap().refunded_cents,
        FEE_CENTS
    );

    let second = h
        .state
        .cancellation
        .cancel_appointment(&patient(me), appointment_id, Some("again".into()))
        .await
        .unwrap();
    assert_eq!(second.refund_decision, first.refund_decision);
    assert_eq!(second.refund, RefundOutcome::AlreadyProcessed);
    assert_eq!(second.appointment.notes, first.appointment.notes);
    assert_eq!(second.appointment.cancelled_at, first.appointment.cancelled_at);
    assert_eq!(h.gateway.refunds().len(), 1);
}

#[tokio::test]
async fn late_patient_cancellation_is_not_refunded_and_frees_the_slot() {
    let h = Harness::new().await;
    let me = Uuid::new_v4();
    let slot = h.slot(Utc::now() + Duration::hours(2)).await;
    let appt = h.slot_appointment(me, &slot).await;
    assert!(h.store.time_slot(slot.time_slot_id).await.unwrap().is_booked);

    let result = h
        .state
        .cancellation
        .cancel_appointment(&patient(me), appt.appointment_id, Some("feeling better".into()))
        .await
        .unwrap();
    assert!(!result.refund_decision.eligible);
    assert_eq!(result.refund_decision.kind, RefundType::None);
    assert_eq!(result.refund, RefundOutcome::NotEligible);
    assert_eq!(
        result.appointment.notes.as_deref(),
        Some("first visit\nCancelled by patient: feeling better")
    );
    assert!(!h.store.time_slot(slot.time_slot_id).await.unwrap().is_booked);
    assert!(h.gateway.refunds().is_empty());
}

#[tokio::test]
async fn doctor_cancellation_of_cash_booking_needs_manual_settlement() {
    let h = Harness::new().await;
    let schedule = h.schedule(2).await;
    let booking = h
        .state
        .booking
        .create_manual_booking(&h.doctor(), schedule.schedule_id, Uuid::new_v4(), "cash")
        .await
        .unwrap();

    let result = h
        .state
        .cancellation
        .cancel_appointment(&h.doctor(), booking.id, None)
        .await
        .unwrap();
    assert_eq!(result.refund_decision.kind, RefundType::Full);
    assert_eq!(
        result.refund,
        RefundOutcome::ManualSettlement {
            amount_cents: FEE_CENTS
        }
    );
    assert_eq!(result.appointment.payment_status, PaymentStatus::Paid);
    assert!(h.gateway.refunds().is_empty());
}

#[tokio::test]
async fn cancellation_frees_capacity() {
    let h = Harness::new().await;
    let schedule = h.schedule(1).await;
    let staff = h.doctor();

    let first = h
        .state
        .booking
        .create_manual_booking(&staff, schedule.schedule_id, Uuid::new_v4(), "cash")
        .await
        .unwrap();
    assert!(
        h.state
            .booking
            .create_manual_booking(&staff, schedule.schedule_id, Uuid::new_v4(), "cash")
            .await
            .is_err()
    );

    h.state
        .cancellation
        .cancel_appointment(&h.admin(), first.id, Some("double booked".into()))
        .await
        .unwrap();

    let replacement = h
        .state
        .booking
        .create_manual_booking(&staff, schedule.schedule_id, Uuid::new_v4(), "cash")
        .await
        .unwrap();
    assert_eq!(replacement.queue_number, 1);
}

#[tokio::test]
async fn strangers_cannot_cancel() {
    let h = Harness::new().await;
    let owner = Uuid::new_v4();
    let slot = h.slot(Utc::now() + Duration::days(2)).await;
    let appt = h.slot_appointment(owner, &slot).await;

    let err = h
        .state
        .cancellation
        .cancel_appointment(&patient(Uuid::new_v4()), appt.appointment_id, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "FORBIDDEN");

    let other_doctor = actor(Role::Doctor, None, Some(Uuid::new_v4()));
    let err = h
        .state
        .cancellation
        .cancel_appointment(&other_doctor, appt.appointment_id, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "FORBIDDEN");

    assert_eq!(
        h.store.appointment(appt.appointment_id).await.unwrap().status,
        AppointmentStatus::Confirmed
    );
}

#[tokio::test]
async fn finished_appointments_cannot_be_cancelled() {
    let h = Harness::new().await;
    let me = Uuid::new_v4();
    let start = Utc::now() - Duration::hours(3);
    let appt = h
        .store
        .seed_appointment(NewAppointment {
            patient_id: me,
            doctor_id: h.doctor_id,
            schedule_id: None,
            time_slot_id: None,
            status: AppointmentStatus::Completed,
            payment_status: PaymentStatus::Paid,
            queue_number: None,
            notes: None,
            start_at: start,
            end_at: start + Duration::minutes(30),
            paid_at: Some(start),
        })
        .await
        .unwrap();

    let err = h
        .state
        .cancellation
        .cancel_appointment(&h.admin(), appt.appointment_id, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_TRANSITION");
    assert!(err.message().contains("already COMPLETED"));
}

#[tokio::test]
async fn refund_failure_does_not_undo_the_cancellation() {
    let h = Harness::new().await;
    let me = Uuid::new_v4();
    let (appointment_id, _) = paid_online(&h, me).await;
    h.gateway.fail_refunds(true);

    let result = h
        .state
        .cancellation
        .cancel_appointment(&patient(me), appointment_id, None)
        .await
        .unwrap();
    assert!(matches!(result.refund, RefundOutcome::Failed { .. }));
    assert_eq!(
        h.store.appointment(appointment_id).await.unwrap().status,
        AppointmentStatus::Cancelled
    );
}

#[tokio::test]
async fn cancelling_an_unpaid_reservation_needs_no_refund() {
    let h = Harness::new().await;
    let me = Uuid::new_v4();
    let schedule = h
        .schedule_on(Utc::now().date_naive() + Duration::days(3), 2)
        .await;
    let (appointment_id, _) = h.start_online(&schedule, me).await;

    let result = h
        .state
        .cancellation
        .cancel_appointment(&patient(me), appointment_id, None)
        .await
        .unwrap();
    assert_eq!(result.refund, RefundOutcome::NotRequired);
    assert_eq!(result.appointment.payment_status, PaymentStatus::Unpaid);
    assert_eq!(
        result.appointment.notes.as_deref(),
        Some("Cancelled by patient")
    );
}
