// src/store/postgres.rs

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::{
    error::ApiError,
    models::{
        Actor, Appointment, AppointmentStatus, NewAppointment, NewPayment, NewSchedule, Payment,
        Role, Schedule, SessionIdentity, TimeSlot,
    },
    store::{Store, StoreTx, TxFuture},
};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn transaction<T, F>(&self, work: F) -> Result<T, ApiError>
    where
        T: Send + 'static,
        F: for<'t> FnOnce(&'t mut dyn StoreTx) -> TxFuture<'t, T> + Send + 'static,
    {
        let tx = self.pool.begin().await.map_err(ApiError::db)?;
        let mut handle = PgTx { tx };

        let result = work(&mut handle).await;
        match result {
            Ok(value) => {
                handle.tx.commit().await.map_err(ApiError::db)?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = handle.tx.rollback().await {
                    tracing::warn!(error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }
}

pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[derive(Debug, sqlx::FromRow)]
struct SessionLookupRow {
    session_token_id: Uuid,
    user_id: Uuid,
    role: i16,
    patient_id: Option<Uuid>,
    doctor_id: Option<Uuid>,
}

/// Unique-index violations carry business meaning; everything else is internal.
fn write_err(e: sqlx::Error) -> ApiError {
    if let sqlx::Error::Database(db) = &e {
        match db.constraint() {
            Some("appointment_payment_intent_uq") => {
                return ApiError::Conflict(
                    "PAYMENT_INTENT_IN_USE",
                    "payment intent already belongs to another active appointment".into(),
                );
            }
            Some("payment_external_intent_id_key") => {
                return ApiError::Conflict(
                    "PAYMENT_INTENT_IN_USE",
                    "payment intent already recorded".into(),
                );
            }
            Some("appointment_schedule_queue_uq") => {
                return ApiError::Conflict(
                    "QUEUE_NUMBER_TAKEN",
                    "queue number already assigned on this schedule".into(),
                );
            }
            _ => {}
        }
    }
    ApiError::db(e)
}

fn status_codes(statuses: &[AppointmentStatus]) -> Vec<i16> {
    statuses.iter().map(|s| *s as i16).collect()
}

#[async_trait]
impl StoreTx for PgTx {
    /* ============================================================
       Schedules
       ============================================================ */

    async fn insert_schedule(&mut self, new: NewSchedule) -> Result<Schedule, ApiError> {
        sqlx::query_as::<_, Schedule>(
            r#"
            INSERT INTO schedule (doctor_id, date, start_time, end_time, max_patients)
            VALUES ($1,$2,$3,$4,$5)
            RETURNING *
            "#,
        )
        .bind(new.doctor_id)
        .bind(new.date)
        .bind(new.start_time)
        .bind(new.end_time)
        .bind(new.max_patients)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(write_err)
    }

    async fn schedule(&mut self, schedule_id: Uuid) -> Result<Option<Schedule>, ApiError> {
        sqlx::query_as::<_, Schedule>(r#"SELECT * FROM schedule WHERE schedule_id = $1"#)
            .bind(schedule_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(ApiError::db)
    }

    async fn lock_schedule(&mut self, schedule_id: Uuid) -> Result<Option<Schedule>, ApiError> {
        sqlx::query_as::<_, Schedule>(
            r#"SELECT * FROM schedule WHERE schedule_id = $1 FOR UPDATE"#,
        )
        .bind(schedule_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(ApiError::db)
    }

    async fn update_schedule(&mut self, schedule: &Schedule) -> Result<(), ApiError> {
        sqlx::query(
            r#"
            UPDATE schedule
            SET date = $2,
                start_time = $3,
                end_time = $4,
                max_patients = $5
            WHERE schedule_id = $1
            "#,
        )
        .bind(schedule.schedule_id)
        .bind(schedule.date)
        .bind(schedule.start_time)
        .bind(schedule.end_time)
        .bind(schedule.max_patients)
        .execute(&mut *self.tx)
        .await
        .map_err(write_err)?;
        Ok(())
    }

    async fn move_schedule_appointments(
        &mut self,
        schedule_id: Uuid,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
    ) -> Result<u64, ApiError> {
        let res = sqlx::query(
            r#"
            UPDATE appointment
            SET start_at = $2,
                end_at = $3,
                updated_at = now()
            WHERE schedule_id = $1
              AND status = ANY($4)
            "#,
        )
        .bind(schedule_id)
        .bind(start_at)
        .bind(end_at)
        .bind(status_codes(&AppointmentStatus::OPEN))
        .execute(&mut *self.tx)
        .await
        .map_err(ApiError::db)?;
        Ok(res.rows_affected())
    }

    async fn delete_schedule(&mut self, schedule_id: Uuid) -> Result<(), ApiError> {
        sqlx::query(r#"DELETE FROM schedule WHERE schedule_id = $1"#)
            .bind(schedule_id)
            .execute(&mut *self.tx)
            .await
            .map_err(write_err)?;
        Ok(())
    }

    async fn schedules_for_doctor(
        &mut self,
        doctor_id: Uuid,
        from: NaiveDate,
    ) -> Result<Vec<Schedule>, ApiError> {
        sqlx::query_as::<_, Schedule>(
            r#"
            SELECT *
            FROM schedule
            WHERE doctor_id = $1
              AND date >= $2
            ORDER BY date ASC, start_time ASC
            "#,
        )
        .bind(doctor_id)
        .bind(from)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(ApiError::db)
    }

    async fn count_appointments(
        &mut self,
        schedule_id: Uuid,
        statuses: &[AppointmentStatus],
    ) -> Result<i64, ApiError> {
        sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM appointment
            WHERE schedule_id = $1
              AND status = ANY($2)
            "#,
        )
        .bind(schedule_id)
        .bind(status_codes(statuses))
        .fetch_one(&mut *self.tx)
        .await
        .map_err(ApiError::db)
    }

    async fn taken_queue_numbers(&mut self, schedule_id: Uuid) -> Result<Vec<i32>, ApiError> {
        sqlx::query_scalar::<_, i32>(
            r#"
            SELECT queue_number
            FROM appointment
            WHERE schedule_id = $1
              AND queue_number IS NOT NULL
              AND status = ANY($2)
            ORDER BY queue_number ASC
            "#,
        )
        .bind(schedule_id)
        .bind(status_codes(&AppointmentStatus::ADMITTED))
        .fetch_all(&mut *self.tx)
        .await
        .map_err(ApiError::db)
    }

    /* ============================================================
       Doctors
       ============================================================ */

    async fn doctor_fee_cents(&mut self, doctor_id: Uuid) -> Result<Option<i64>, ApiError> {
        sqlx::query_scalar::<_, i64>(
            r#"SELECT consultation_fee_cents FROM doctor WHERE doctor_id = $1"#,
        )
        .bind(doctor_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(ApiError::db)
    }

    /* ============================================================
       Appointments
       ============================================================ */

    async fn insert_appointment(&mut self, new: NewAppointment) -> Result<Appointment, ApiError> {
        sqlx::query_as::<_, Appointment>(
            r#"
            INSERT INTO appointment (
              patient_id,
              doctor_id,
              schedule_id,
              time_slot_id,
              status,
              payment_status,
              queue_number,
              notes,
              start_at,
              end_at,
              paid_at
            )
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11)
            RETURNING *
            "#,
        )
        .bind(new.patient_id)
        .bind(new.doctor_id)
        .bind(new.schedule_id)
        .bind(new.time_slot_id)
        .bind(new.status)
        .bind(new.payment_status)
        .bind(new.queue_number)
        .bind(new.notes)
        .bind(new.start_at)
        .bind(new.end_at)
        .bind(new.paid_at)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(write_err)
    }

    async fn appointment(&mut self, appointment_id: Uuid) -> Result<Option<Appointment>, ApiError> {
        sqlx::query_as::<_, Appointment>(r#"SELECT * FROM appointment WHERE appointment_id = $1"#)
            .bind(appointment_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(ApiError::db)
    }

    async fn appointment_for_update(
        &mut self,
        appointment_id: Uuid,
    ) -> Result<Option<Appointment>, ApiError> {
        sqlx::query_as::<_, Appointment>(
            r#"SELECT * FROM appointment WHERE appointment_id = $1 FOR UPDATE"#,
        )
        .bind(appointment_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(ApiError::db)
    }

    async fn appointment_by_intent_for_update(
        &mut self,
        intent_id: &str,
    ) -> Result<Option<Appointment>, ApiError> {
        sqlx::query_as::<_, Appointment>(
            r#"
            SELECT *
            FROM appointment
            WHERE payment_intent_id = $1
            ORDER BY (status = $2) ASC, created_at DESC
            LIMIT 1
            FOR UPDATE
            "#,
        )
        .bind(intent_id)
        .bind(AppointmentStatus::Cancelled)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(ApiError::db)
    }

    async fn update_appointment(&mut self, appointment: &Appointment) -> Result<(), ApiError> {
        // queue_number only ever moves from NULL to a value
        sqlx::query(
            r#"
            UPDATE appointment
            SET time_slot_id = $2,
                status = $3,
                payment_status = $4,
                queue_number = COALESCE(queue_number, $5),
                payment_intent_id = $6,
                notes = $7,
                start_at = $8,
                end_at = $9,
                paid_at = $10,
                cancelled_at = $11,
                is_archived = $12,
                updated_at = now()
            WHERE appointment_id = $1
            "#,
        )
        .bind(appointment.appointment_id)
        .bind(appointment.time_slot_id)
        .bind(appointment.status)
        .bind(appointment.payment_status)
        .bind(appointment.queue_number)
        .bind(appointment.payment_intent_id.as_deref())
        .bind(appointment.notes.as_deref())
        .bind(appointment.start_at)
        .bind(appointment.end_at)
        .bind(appointment.paid_at)
        .bind(appointment.cancelled_at)
        .bind(appointment.is_archived)
        .execute(&mut *self.tx)
        .await
        .map_err(write_err)?;
        Ok(())
    }

    async fn archive_ended_appointments(&mut self, now: DateTime<Utc>) -> Result<u64, ApiError> {
        let res = sqlx::query(
            r#"
            UPDATE appointment
            SET is_archived = TRUE,
                updated_at = now()
            WHERE is_archived = FALSE
              AND end_at <= $1
            "#,
        )
        .bind(now)
        .execute(&mut *self.tx)
        .await
        .map_err(ApiError::db)?;
        Ok(res.rows_affected())
    }

    /* ============================================================
       Time slots
       ============================================================ */

    async fn time_slot_for_update(
        &mut self,
        time_slot_id: Uuid,
    ) -> Result<Option<TimeSlot>, ApiError> {
        sqlx::query_as::<_, TimeSlot>(
            r#"
            SELECT time_slot_id, doctor_id, start_at, end_at, is_booked
            FROM time_slot
            WHERE time_slot_id = $1
            FOR UPDATE
            "#,
        )
        .bind(time_slot_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(ApiError::db)
    }

    async fn set_time_slot_booked(
        &mut self,
        time_slot_id: Uuid,
        booked: bool,
    ) -> Result<(), ApiError> {
        sqlx::query(r#"UPDATE time_slot SET is_booked = $2 WHERE time_slot_id = $1"#)
            .bind(time_slot_id)
            .bind(booked)
            .execute(&mut *self.tx)
            .await
            .map_err(ApiError::db)?;
        Ok(())
    }

    /* ============================================================
       Payments
       ============================================================ */

    async fn insert_payment(&mut self, new: NewPayment) -> Result<Payment, ApiError> {
        sqlx::query_as::<_, Payment>(
            r#"
            INSERT INTO payment (
              appointment_id,
              patient_id,
              doctor_id,
              amount_cents,
              currency,
              status,
              provider,
              external_intent_id
            )
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8)
            RETURNING *
            "#,
        )
        .bind(new.appointment_id)
        .bind(new.patient_id)
        .bind(new.doctor_id)
        .bind(new.amount_cents)
        .bind(new.currency)
        .bind(new.status)
        .bind(new.provider)
        .bind(new.external_intent_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(write_err)
    }

    async fn payment_by_intent_for_update(
        &mut self,
        intent_id: &str,
    ) -> Result<Option<Payment>, ApiError> {
        sqlx::query_as::<_, Payment>(
            r#"SELECT * FROM payment WHERE external_intent_id = $1 FOR UPDATE"#,
        )
        .bind(intent_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(ApiError::db)
    }

    async fn payment_for_appointment(
        &mut self,
        appointment_id: Uuid,
    ) -> Result<Option<Payment>, ApiError> {
        sqlx::query_as::<_, Payment>(
            r#"
            SELECT *
            FROM payment
            WHERE appointment_id = $1
            ORDER BY created_at DESC
            LIMIT 1
            FOR UPDATE
            "#,
        )
        .bind(appointment_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(ApiError::db)
    }

    async fn update_payment(&mut self, payment: &Payment) -> Result<(), ApiError> {
        // appointment_id is write-once
        sqlx::query(
            r#"
            UPDATE payment
            SET appointment_id = COALESCE(appointment_id, $2),
                status = $3,
                external_charge_id = $4,
                refunded_cents = LEAST($5, amount_cents),
                updated_at = now()
            WHERE payment_id = $1
            "#,
        )
        .bind(payment.payment_id)
        .bind(payment.appointment_id)
        .bind(payment.status)
        .bind(payment.external_charge_id.as_deref())
        .bind(payment.refunded_cents)
        .execute(&mut *self.tx)
        .await
        .map_err(write_err)?;
        Ok(())
    }

    /* ============================================================
       Webhook idempotency
       ============================================================ */

    async fn record_webhook_event(
        &mut self,
        event_id: &str,
        event_type: &str,
    ) -> Result<bool, ApiError> {
        let res = sqlx::query(
            r#"
            INSERT INTO processed_webhook_event (event_id, event_type)
            VALUES ($1,$2)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(event_id)
        .bind(event_type)
        .execute(&mut *self.tx)
        .await
        .map_err(ApiError::db)?;
        Ok(res.rows_affected() == 1)
    }

    /* ============================================================
       Sessions
       ============================================================ */

    async fn session_by_token_hash(
        &mut self,
        token_hash: &str,
    ) -> Result<Option<SessionIdentity>, ApiError> {
        let row = sqlx::query_as::<_, SessionLookupRow>(
            r#"
            SELECT st.session_token_id, st.user_id, u.role, p.patient_id, d.doctor_id
            FROM session_token st
            JOIN app_user u ON u.user_id = st.user_id
            LEFT JOIN patient p ON p.user_id = u.user_id
            LEFT JOIN doctor d ON d.user_id = u.user_id
            WHERE st.session_token_hash = $1
              AND st.revoked_at IS NULL
              AND st.expires_at > now()
              AND u.is_active = true
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(ApiError::db)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let Some(role) = Role::from_db(row.role) else {
            tracing::warn!(user_id = %row.user_id, role = row.role, "session for unsupported role");
            return Ok(None);
        };

        // Touch last_seen_at (best-effort)
        let _ = sqlx::query(
            r#"
            UPDATE session_token
            SET last_seen_at = now()
            WHERE session_token_id = $1
            "#,
        )
        .bind(row.session_token_id)
        .execute(&mut *self.tx)
        .await;

        Ok(Some(SessionIdentity {
            session_token_id: row.session_token_id,
            actor: Actor {
                user_id: row.user_id,
                role,
                patient_id: row.patient_id,
                doctor_id: row.doctor_id,
            },
        }))
    }
}
