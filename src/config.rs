use std::env;

use anyhow::Context;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub payment: PaymentConfig,
    pub reminder_lead_minutes: i64,
    pub archive_interval_secs: u64,
}

#[derive(Clone, Debug)]
pub struct PaymentConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub api_base: String,
    /// Lowercase ISO 4217 code, e.g. `usd`.
    pub currency: String,
    pub webhook_tolerance_secs: i64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());

        let payment = PaymentConfig {
            secret_key: env::var("PAYMENT_SECRET_KEY").context("PAYMENT_SECRET_KEY must be set")?,
            webhook_secret: env::var("PAYMENT_WEBHOOK_SECRET")
                .context("PAYMENT_WEBHOOK_SECRET must be set")?,
            api_base: env::var("PAYMENT_API_BASE")
                .unwrap_or_else(|_| "https://api.stripe.com".to_string()),
            currency: env::var("PAYMENT_CURRENCY")
                .map(|c| c.trim().to_ascii_lowercase())
                .unwrap_or_else(|_| "usd".to_string()),
            webhook_tolerance_secs: parse_or("WEBHOOK_TOLERANCE_SECS", 300),
        };

        Ok(Self {
            database_url,
            bind_addr,
            payment,
            reminder_lead_minutes: parse_or("REMINDER_LEAD_MINUTES", 24 * 60),
            archive_interval_secs: parse_or("ARCHIVE_INTERVAL_SECS", 900),
        })
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse::<T>().ok())
        .unwrap_or(default)
}
