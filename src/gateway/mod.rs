// src/gateway/mod.rs

//! Payment gateway adapter. Amounts are always minor currency units and
//! currency codes are lowercase ISO identifiers.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;

pub mod stripe;
pub mod webhook;

pub use stripe::StripeGateway;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The gateway refuses to charge this amount (zero, too small, too large).
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
    #[error("gateway rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("gateway transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected gateway response: {0}")]
    Decode(String),
}

impl From<GatewayError> for ApiError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::InvalidAmount(msg) => ApiError::invalid_amount(msg),
            other => ApiError::Internal(format!("payment gateway error: {other}")),
        }
    }
}

/// Metadata attached to every intent so a webhook can be traced back to the
/// reservation that created it.
#[derive(Debug, Clone)]
pub struct IntentMetadata {
    pub schedule_id: Uuid,
    pub doctor_id: Uuid,
    pub patient_id: Uuid,
    pub appointment_id: Uuid,
}

impl IntentMetadata {
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("schedule_id", self.schedule_id.to_string()),
            ("doctor_id", self.doctor_id.to_string()),
            ("patient_id", self.patient_id.to_string()),
            ("appointment_id", self.appointment_id.to_string()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedIntent {
    pub id: String,
    pub client_secret: String,
}

/// Gateway view of a payment intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub status: String,
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub latest_charge: Option<String>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_payment_intent(
        &self,
        amount_minor: i64,
        currency: &str,
        metadata: &IntentMetadata,
    ) -> Result<CreatedIntent, GatewayError>;

    async fn get_payment_intent(&self, intent_id: &str) -> Result<PaymentIntent, GatewayError>;

    /// Refunds `amount_minor` of the intent's charge. The idempotency key makes
    /// retries of the same refund harmless. Returns the gateway refund id.
    async fn refund(
        &self,
        intent_id: &str,
        amount_minor: i64,
        idempotency_key: &str,
    ) -> Result<String, GatewayError>;
}
