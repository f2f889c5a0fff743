// src/gateway/stripe.rs

use async_trait::async_trait;
use serde::Deserialize;

use crate::{
    config::PaymentConfig,
    gateway::{CreatedIntent, GatewayError, IntentMetadata, PaymentGateway, PaymentIntent},
};

/// Stripe-compatible REST adapter (form-encoded requests, bearer secret key).
#[derive(Clone)]
pub struct StripeGateway {
    http: reqwest::Client,
    secret_key: String,
    api_base: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreatedIntentBody {
    id: String,
    client_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RefundBody {
    id: String,
}

impl StripeGateway {
    pub fn new(cfg: &PaymentConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            secret_key: cfg.secret_key.clone(),
            api_base: cfg.api_base.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        res: reqwest::Response,
    ) -> Result<T, GatewayError> {
        let status = res.status();
        let body = res.text().await?;

        if !status.is_success() {
            let parsed = serde_json::from_str::<ErrorEnvelope>(&body).ok();
            let code = parsed.as_ref().and_then(|e| e.error.code.clone());
            let message = parsed
                .and_then(|e| e.error.message)
                .unwrap_or_else(|| body.clone());

            return Err(match code.as_deref() {
                Some("amount_too_small") | Some("amount_too_large") => {
                    GatewayError::InvalidAmount(message)
                }
                _ => GatewayError::Rejected {
                    status: status.as_u16(),
                    message,
                },
            });
        }

        serde_json::from_str::<T>(&body).map_err(|e| GatewayError::Decode(format!("{e}")))
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_payment_intent(
        &self,
        amount_minor: i64,
        currency: &str,
        metadata: &IntentMetadata,
    ) -> Result<CreatedIntent, GatewayError> {
        if amount_minor <= 0 {
            return Err(GatewayError::InvalidAmount(format!(
                "amount must be positive, got {amount_minor}"
            )));
        }

        let mut form: Vec<(String, String)> = vec![
            ("amount".into(), amount_minor.to_string()),
            ("currency".into(), currency.to_ascii_lowercase()),
            ("automatic_payment_methods[enabled]".into(), "true".into()),
        ];
        for (key, value) in metadata.to_pairs() {
            form.push((format!("metadata[{key}]"), value));
        }

        let res = self
            .http
            .post(self.url("/v1/payment_intents"))
            .bearer_auth(&self.secret_key)
            .form(&form)
            .send()
            .await?;

        let body: CreatedIntentBody = Self::read_json(res).await?;
        let client_secret = body
            .client_secret
            .ok_or_else(|| GatewayError::Decode("payment intent without client_secret".into()))?;

        Ok(CreatedIntent {
            id: body.id,
            client_secret,
        })
    }

    async fn get_payment_intent(&self, intent_id: &str) -> Result<PaymentIntent, GatewayError> {
        let res = self
            .http
            .get(self.url(&format!("/v1/payment_intents/{intent_id}")))
            .bearer_auth(&self.secret_key)
            .send()
            .await?;

        Self::read_json(res).await
    }

    async fn refund(
        &self,
        intent_id: &str,
        amount_minor: i64,
        idempotency_key: &str,
    ) -> Result<String, GatewayError> {
        if amount_minor <= 0 {
            return Err(GatewayError::InvalidAmount(format!(
                "refund amount must be positive, got {amount_minor}"
            )));
        }

        let form = [
            ("payment_intent", intent_id.to_string()),
            ("amount", amount_minor.to_string()),
        ];

        let res = self
            .http
            .post(self.url("/v1/refunds"))
            .bearer_auth(&self.secret_key)
            .header("Idempotency-Key", idempotency_key)
            .form(&form)
            .send()
            .await?;

        let body: RefundBody = Self::read_json(res).await?;
        Ok(body.id)
    }
}
