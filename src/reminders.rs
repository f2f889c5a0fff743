// src/reminders.rs

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::ApiError;

/// 0 scheduled, 1 sent, 2 cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum ReminderStatus {
    Scheduled = 0,
    Sent = 1,
    Cancelled = 2,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Reminder {
    pub appointment_id: Uuid,
    pub send_at: DateTime<Utc>,
    pub status: ReminderStatus,
}

/// When a reminder for an appointment starting at `start` should go out, or
/// `None` when that moment is already behind us.
pub fn plan_send_at(start: DateTime<Utc>, lead: Duration, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let send_at = start - lead;
    (send_at > now).then_some(send_at)
}

/// Reminder delivery lives elsewhere; this is the part the booking core drives.
#[async_trait]
pub trait Reminders: Send + Sync {
    /// Moves a pending reminder to the new start time, cancelling it when the
    /// new time is too close for the lead time.
    async fn update_for_reschedule(
        &self,
        appointment_id: Uuid,
        new_start: DateTime<Utc>,
    ) -> Result<Option<Reminder>, ApiError>;

    async fn cancel(&self, appointment_id: Uuid) -> Result<Option<Reminder>, ApiError>;
}

pub struct PgReminders {
    db: PgPool,
    lead: Duration,
}

impl PgReminders {
    pub fn new(db: PgPool, lead_minutes: i64) -> Self {
        Self {
            db,
            lead: Duration::minutes(lead_minutes),
        }
    }
}

#[async_trait]
impl Reminders for PgReminders {
    async fn update_for_reschedule(
        &self,
        appointment_id: Uuid,
        new_start: DateTime<Utc>,
    ) -> Result<Option<Reminder>, ApiError> {
        let Some(send_at) = plan_send_at(new_start, self.lead, Utc::now()) else {
            return self.cancel(appointment_id).await;
        };

        sqlx::query_as::<_, Reminder>(
            r#"
            UPDATE appointment_reminder
            SET send_at = $2,
                updated_at = now()
            WHERE appointment_id = $1
              AND status = $3
            RETURNING appointment_id, send_at, status
            "#,
        )
        .bind(appointment_id)
        .bind(send_at)
        .bind(ReminderStatus::Scheduled)
        .fetch_optional(&self.db)
        .await
        .map_err(ApiError::db)
    }

    async fn cancel(&self, appointment_id: Uuid) -> Result<Option<Reminder>, ApiError> {
        sqlx::query_as::<_, Reminder>(
            r#"
            UPDATE appointment_reminder
            SET status = $2,
                updated_at = now()
            WHERE appointment_id = $1
              AND status = $3
            RETURNING appointment_id, send_at, status
            "#,
        )
        .bind(appointment_id)
        .bind(ReminderStatus::Cancelled)
        .bind(ReminderStatus::Scheduled)
        .fetch_optional(&self.db)
        .await
        .map_err(ApiError::db)
    }
}
