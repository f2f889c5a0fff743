mod common;

use chrono::{Duration, Utc};
use clinic_booking::models::AppointmentStatus;
use common::*;
use uuid::Uuid;

#[tokio::test]
async fn moves_to_a_free_slot_and_swaps_the_holds() {
    let h = Harness::new().await;
    let me = Uuid::new_v4();
    let old = h.slot(Utc::now() + Duration::days(2)).await;
    let new = h.slot(Utc::now() + Duration::days(4)).await;
    let appt = h.slot_appointment(me, &old).await;

    let moved = h
        .state
        .reschedule
        .reschedule_appointment(&patient(me), appt.appointment_id, new.time_slot_id, Some("work trip".into()))
        .await
        .unwrap();

    assert_eq!(moved.appointment_id, appt.appointment_id);
    assert_eq!(moved.time_slot_id, Some(new.time_slot_id));
    assert_eq!(moved.start_at, new.start_at);
    assert_eq!(moved.end_at, new.end_at);
    assert_eq!(moved.patient_id, me);
    assert_eq!(moved.status, AppointmentStatus::Confirmed);
    let notes = moved.notes.unwrap();
    assert!(notes.starts_with("first visit\nRescheduled from "));
    assert!(notes.ends_with(": work trip"));

    assert!(!h.store.time_slot(old.time_slot_id).await.unwrap().is_booked);
    assert!(h.store.time_slot(new.time_slot_id).await.unwrap().is_booked);

    assert_eq!(
        h.reminders.calls(),
        vec![ReminderCall::Moved(appt.appointment_id, new.start_at)]
    );
}

#[tokio::test]
async fn booked_target_leaves_everything_untouched() {
    let h = Harness::new().await;
    let me = Uuid::new_v4();
    let old = h.slot(Utc::now() + Duration::days(2)).await;
    let taken = h.slot(Utc::now() + Duration::days(3)).await;
    let appt = h.slot_appointment(me, &old).await;
    h.slot_appointment(Uuid::new_v4(), &taken).await;

    let err = h
        .state
        .reschedule
        .reschedule_appointment(&patient(me), appt.appointment_id, taken.time_slot_id, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "SLOT_TAKEN");

    let after = h.store.appointment(appt.appointment_id).await.unwrap();
    assert_eq!(after.time_slot_id, Some(old.time_slot_id));
    assert_eq!(after.start_at, old.start_at);
    assert_eq!(after.notes, appt.notes);
    assert!(h.store.time_slot(old.time_slot_id).await.unwrap().is_booked);
    assert!(h.reminders.calls().is_empty());
}

#[tokio::test]
async fn too_close_for_a_reminder_cancels_it() {
    let h = Harness::new().await;
    let me = Uuid::new_v4();
    let old = h.slot(Utc::now() + Duration::days(3)).await;
    let soon = h.slot(Utc::now() + Duration::hours(5)).await;
    let appt = h.slot_appointment(me, &old).await;

    h.state
        .reschedule
        .reschedule_appointment(&patient(me), appt.appointment_id, soon.time_slot_id, None)
        .await
        .unwrap();

    assert_eq!(
        h.reminders.calls(),
        vec![ReminderCall::Cancelled(appt.appointment_id)]
    );
}

#[tokio::test]
async fn reminder_outage_does_not_fail_the_reschedule() {
    let h = Harness::new().await;
    let me = Uuid::new_v4();
    let old = h.slot(Utc::now() + Duration::days(2)).await;
    let new = h.slot(Utc::now() + Duration::days(5)).await;
    let appt = h.slot_appointment(me, &old).await;
    h.reminders.fail(true);

    let moved = h
        .state
        .reschedule
        .reschedule_appointment(&patient(me), appt.appointment_id, new.time_slot_id, None)
        .await
        .unwrap();
    assert_eq!(moved.time_slot_id, Some(new.time_slot_id));
    assert_eq!(h.reminders.calls().len(), 1);
}

#[tokio::test]
async fn rejects_slots_of_another_doctor_or_in_the_past() {
    let h = Harness::new().await;
    let me = Uuid::new_v4();
    let old = h.slot(Utc::now() + Duration::days(2)).await;
    let foreign = h.slot_for(Uuid::new_v4(), Utc::now() + Duration::days(3)).await;
    let past = h.slot(Utc::now() - Duration::hours(1)).await;
    let appt = h.slot_appointment(me, &old).await;

    let err = h
        .state
        .reschedule
        .reschedule_appointment(&patient(me), appt.appointment_id, foreign.time_slot_id, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");
    assert!(err.message().contains("different doctor"));

    let err = h
        .state
        .reschedule
        .reschedule_appointment(&patient(me), appt.appointment_id, past.time_slot_id, None)
        .await
        .unwrap_err();
    assert!(err.message().contains("past"));

    let err = h
        .state
        .reschedule
        .reschedule_appointment(&patient(me), appt.appointment_id, Uuid::new_v4(), None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");
}

#[tokio::test]
async fn queue_and_cancelled_appointments_stay_put() {
    let h = Harness::new().await;
    let schedule = h.schedule(3).await;
    let booking = h
        .state
        .booking
        .create_manual_booking(&h.doctor(), schedule.schedule_id, Uuid::new_v4(), "cash")
        .await
        .unwrap();
    let slot = h.slot(Utc::now() + Duration::days(3)).await;

    let err = h
        .state
        .reschedule
        .reschedule_appointment(&h.admin(), booking.id, slot.time_slot_id, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");

    h.state
        .cancellation
        .cancel_appointment(&h.admin(), booking.id, None)
        .await
        .unwrap();
    let err = h
        .state
        .reschedule
        .reschedule_appointment(&h.admin(), booking.id, slot.time_slot_id, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_TRANSITION");
    assert!(!h.store.time_slot(slot.time_slot_id).await.unwrap().is_booked);
}

#[tokio::test]
async fn strangers_cannot_reschedule() {
    let h = Harness::new().await;
    let old = h.slot(Utc::now() + Duration::days(2)).await;
    let new = h.slot(Utc::now() + Duration::days(3)).await;
    let appt = h.slot_appointment(Uuid::new_v4(), &old).await;

    let err = h
        .state
        .reschedule
        .reschedule_appointment(&patient(Uuid::new_v4()), appt.appointment_id, new.time_slot_id, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "FORBIDDEN");
    assert!(!h.store.time_slot(new.time_slot_id).await.unwrap().is_booked);
}
