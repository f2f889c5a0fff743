// src/refund_policy.rs

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::models::Role;

/// Patients get their money back only when they cancel at least this far ahead.
pub const PATIENT_FULL_REFUND_NOTICE: Duration = Duration::hours(24);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefundType {
    Full,
    Partial,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefundDecision {
    pub eligible: bool,
    #[serde(rename = "type")]
    pub kind: RefundType,
    pub reason: String,
}

impl RefundDecision {
    fn full(reason: impl Into<String>) -> Self {
        Self {
            eligible: true,
            kind: RefundType::Full,
            reason: reason.into(),
        }
    }

    fn none(reason: impl Into<String>) -> Self {
        Self {
            eligible: false,
            kind: RefundType::None,
            reason: reason.into(),
        }
    }
}

/// Refund eligibility for a cancellation. Compares UTC instants only.
pub fn compute_refund_decision(
    cancelled_by: Role,
    cancelled_at: DateTime<Utc>,
    appointment_start: DateTime<Utc>,
) -> RefundDecision {
    match cancelled_by {
        Role::Doctor => RefundDecision::full("Cancelled by the doctor"),
        Role::Admin => RefundDecision::full("Cancelled by an administrator"),
        Role::Patient => {
            let notice = appointment_start - cancelled_at;
            if notice >= PATIENT_FULL_REFUND_NOTICE {
                RefundDecision::full("Cancelled at least 24 hours before the appointment")
            } else {
                RefundDecision::none("Cancelled less than 24 hours before the appointment")
            }
        }
    }
}
