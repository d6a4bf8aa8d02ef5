//! Application configuration loaded from environment variables.

use std::time::Duration;

use crate::errors::{AppError, Result};

#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file
    pub database_url: String,
    /// How long a write waits on a locked database before giving up
    pub database_busy_timeout: Duration,
    /// Port for the REST API server
    pub api_port: u16,
    /// Absolute base URL this API is reachable at (PayPal return URLs)
    pub public_base_url: String,
    /// Frontend origin that payment redirects land on
    pub frontend_url: String,
    /// ISO currency code used for every charge
    pub currency: String,
    pub stripe: StripeConfig,
    pub paypal: PayPalConfig,
    pub email: EmailConfig,
    /// Shared secret for `/admin` routes; unset leaves them open
    pub admin_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub api_url: String,
    pub secret_key: String,
    pub webhook_secret: String,
    /// Maximum age of a signed webhook timestamp
    pub webhook_tolerance: Duration,
}

#[derive(Debug, Clone)]
pub struct PayPalConfig {
    /// `https://api-m.sandbox.paypal.com` or `https://api-m.paypal.com`
    pub api_url: String,
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone)]
pub struct EmailConfig {
    /// JSON email API endpoint; `None` logs messages instead of sending them
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub from: String,
    /// Upper bound on one delivery attempt
    pub timeout: Duration,
    /// Capacity of the outbound notification queue
    pub queue_capacity: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let api_port: u16 = parse_or("API_PORT", 3001)?;
        Ok(Config {
            database_url: env_var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./donations.db".to_string()),
            database_busy_timeout: Duration::from_millis(parse_or(
                "DATABASE_BUSY_TIMEOUT_MS",
                5_000,
            )?),
            api_port,
            public_base_url: env_var("PUBLIC_BASE_URL")
                .unwrap_or_else(|_| format!("http://localhost:{api_port}")),
            frontend_url: env_var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            currency: env_var("CURRENCY").unwrap_or_else(|_| "usd".to_string()),
            stripe: StripeConfig {
                api_url: env_var("STRIPE_API_URL")
                    .unwrap_or_else(|_| "https://api.stripe.com".to_string()),
                secret_key: required("STRIPE_SECRET_KEY")?,
                webhook_secret: required("STRIPE_WEBHOOK_SECRET")?,
                webhook_tolerance: Duration::from_secs(parse_or(
                    "STRIPE_WEBHOOK_TOLERANCE_SECS",
                    300,
                )?),
            },
            paypal: PayPalConfig {
                api_url: env_var("PAYPAL_API_URL")
                    .unwrap_or_else(|_| "https://api-m.sandbox.paypal.com".to_string()),
                client_id: required("PAYPAL_CLIENT_ID")?,
                client_secret: required("PAYPAL_CLIENT_SECRET")?,
            },
            email: EmailConfig {
                api_url: env_var("EMAIL_API_URL").ok(),
                api_key: env_var("EMAIL_API_KEY").ok(),
                from: env_var("EMAIL_FROM")
                    .unwrap_or_else(|_| "donations@localhost".to_string()),
                timeout: Duration::from_secs(parse_or("NOTIFY_TIMEOUT_SECS", 10)?),
                queue_capacity: parse_or("NOTIFY_QUEUE_CAPACITY", 256)?,
            },
            admin_token: env_var("ADMIN_TOKEN").ok().filter(|t| !t.is_empty()),
        })
    }
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| AppError::Config(format!("Missing env var: {key}")))
}

fn required(key: &str) -> Result<String> {
    env_var(key)
        .map_err(|_| AppError::Config(format!("{key} environment variable is required")))
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match env_var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| AppError::Config(format!("Invalid {key}"))),
        Err(_) => Ok(default),
    }
}
