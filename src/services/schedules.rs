// src/services/schedules.rs

use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    error::ApiError,
    models::{Actor, AppointmentStatus, NewSchedule, Schedule, ScheduleAvailability},
    services::ensure_practice,
    store::{Store, StoreTx},
};

#[derive(Debug, Clone, Deserialize)]
pub struct CreateScheduleInput {
    #[serde(alias = "doctorId")]
    pub doctor_id: Uuid,
    pub date: NaiveDate,
    #[serde(alias = "startTime")]
    pub start_time: NaiveTime,
    #[serde(alias = "endTime")]
    pub end_time: NaiveTime,
    #[serde(alias = "maxPatients")]
    pub max_patients: i32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateScheduleInput {
    pub date: Option<NaiveDate>,
    #[serde(alias = "startTime")]
    pub start_time: Option<NaiveTime>,
    #[serde(alias = "endTime")]
    pub end_time: Option<NaiveTime>,
    #[serde(alias = "maxPatients")]
    pub max_patients: Option<i32>,
}

pub struct ScheduleService<S: Store> {
    store: Arc<S>,
}

fn validate_window(
    date: NaiveDate,
    start_time: NaiveTime,
    end_time: NaiveTime,
    max_patients: i32,
    today: NaiveDate,
) -> Result<(), ApiError> {
    if date < today {
        return Err(ApiError::validation("Cannot create a schedule in the past"));
    }
    if end_time <= start_time {
        return Err(ApiError::validation("end_time must be > start_time"));
    }
    if max_patients < 1 {
        return Err(ApiError::validation("max_patients must be at least 1"));
    }
    Ok(())
}

/// Occupancy is derived from appointment rows every time, never cached.
async fn with_availability(
    tx: &mut dyn StoreTx,
    schedule: Schedule,
) -> Result<ScheduleAvailability, ApiError> {
    let admitted = tx
        .count_appointments(schedule.schedule_id, &AppointmentStatus::ADMITTED)
        .await?;
    let pending_payment = tx
        .count_appointments(schedule.schedule_id, &[AppointmentStatus::PendingPayment])
        .await?;
    let remaining = (i64::from(schedule.max_patients) - admitted).max(0);

    Ok(ScheduleAvailability {
        schedule,
        admitted,
        pending_payment,
        remaining,
    })
}

impl<S: Store> ScheduleService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn create_schedule(
        &self,
        actor: &Actor,
        input: CreateScheduleInput,
    ) -> Result<Schedule, ApiError> {
        ensure_practice(actor, input.doctor_id)?;
        validate_window(
            input.date,
            input.start_time,
            input.end_time,
            input.max_patients,
            Utc::now().date_naive(),
        )?;

        let schedule = self
            .store
            .transaction(move |tx| {
                Box::pin(async move {
                    tx.insert_schedule(NewSchedule {
                        doctor_id: input.doctor_id,
                        date: input.date,
                        start_time: input.start_time,
                        end_time: input.end_time,
                        max_patients: input.max_patients,
                    })
                    .await
                })
            })
            .await?;

        tracing::info!(
            schedule_id = %schedule.schedule_id,
            doctor_id = %schedule.doctor_id,
            max_patients = schedule.max_patients,
            "schedule created"
        );
        Ok(schedule)
    }

    pub async fn get_schedule(&self, schedule_id: Uuid) -> Result<ScheduleAvailability, ApiError> {
        self.store
            .transaction(move |tx| {
                Box::pin(async move {
                    let schedule = tx
                        .schedule(schedule_id)
                        .await?
                        .ok_or_else(|| ApiError::not_found("schedule"))?;
                    with_availability(tx, schedule).await
                })
            })
            .await
    }

    pub async fn list_schedules(
        &self,
        doctor_id: Uuid,
        from: NaiveDate,
    ) -> Result<Vec<ScheduleAvailability>, ApiError> {
        self.store
            .transaction(move |tx| {
                Box::pin(async move {
                    let schedules = tx.schedules_for_doctor(doctor_id, from).await?;
                    let mut out = Vec::with_capacity(schedules.len());
                    for schedule in schedules {
                        out.push(with_availability(&mut *tx, schedule).await?);
                    }
                    Ok(out)
                })
            })
            .await
    }

    pub async fn update_schedule(
        &self,
        actor: &Actor,
        schedule_id: Uuid,
        input: UpdateScheduleInput,
    ) -> Result<ScheduleAvailability, ApiError> {
        let actor = actor.clone();
        let today = Utc::now().date_naive();

        self.store
            .transaction(move |tx| {
                Box::pin(async move {
                    let mut schedule = tx
                        .lock_schedule(schedule_id)
                        .await?
                        .ok_or_else(|| ApiError::not_found("schedule"))?;
                    ensure_practice(&actor, schedule.doctor_id)?;
                    let window = (schedule.starts_at(), schedule.ends_at());

                    if let Some(date) = input.date {
                        schedule.date = date;
                    }
                    if let Some(start_time) = input.start_time {
                        schedule.start_time = start_time;
                    }
                    if let Some(end_time) = input.end_time {
                        schedule.end_time = end_time;
                    }
                    if let Some(max_patients) = input.max_patients {
                        schedule.max_patients = max_patients;
                    }
                    validate_window(
                        schedule.date,
                        schedule.start_time,
                        schedule.end_time,
                        schedule.max_patients,
                        today,
                    )?;

                    let admitted = tx
                        .count_appointments(schedule_id, &AppointmentStatus::ADMITTED)
                        .await?;
                    if i64::from(schedule.max_patients) < admitted {
                        return Err(ApiError::Conflict(
                            "CAPACITY_BELOW_BOOKED",
                            format!(
                                "max_patients cannot be lower than the {admitted} patients already admitted"
                            ),
                        ));
                    }

                    tx.update_schedule(&schedule).await?;
                    if window != (schedule.starts_at(), schedule.ends_at()) {
                        let moved = tx
                            .move_schedule_appointments(
                                schedule_id,
                                schedule.starts_at(),
                                schedule.ends_at(),
                            )
                            .await?;
                        tracing::info!(schedule_id = %schedule_id, moved, "schedule window moved");
                    }
                    with_availability(tx, schedule).await
                })
            })
            .await
    }

    pub async fn delete_schedule(&self, actor: &Actor, schedule_id: Uuid) -> Result<(), ApiError> {
        let actor = actor.clone();

        self.store
            .transaction(move |tx| {
                Box::pin(async move {
                    let schedule = tx
                        .lock_schedule(schedule_id)
                        .await?
                        .ok_or_else(|| ApiError::not_found("schedule"))?;
                    ensure_practice(&actor, schedule.doctor_id)?;

                    let active = tx
                        .count_appointments(
                            schedule_id,
                            &[
                                AppointmentStatus::Confirmed,
                                AppointmentStatus::PendingPayment,
                                AppointmentStatus::Overflow,
                            ],
                        )
                        .await?;
                    if active > 0 {
                        return Err(ApiError::Conflict(
                            "SCHEDULE_IN_USE",
                            format!("schedule still has {active} active appointments"),
                        ));
                    }

                    tx.delete_schedule(schedule_id).await
                })
            })
            .await?;

        tracing::info!(schedule_id = %schedule_id, "schedule deleted");
        Ok(())
    }
}
