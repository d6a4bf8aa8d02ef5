//! Stripe: PaymentIntent creation and webhook verification.
//!
//! ## Webhook signatures
//!
//! Stripe signs `"{timestamp}.{raw body}"` with HMAC-SHA256 keyed by the
//! endpoint secret and sends `Stripe-Signature: t=<ts>,v1=<hex>[,v1=<hex>]`.
//! A payload is accepted when any `v1` matches and the timestamp is within
//! the configured tolerance of now.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, warn};

use crate::config::StripeConfig;
use crate::errors::{AppError, Result};
use crate::models::PaymentEventKind;
use crate::providers::ProviderEvent;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "stripe-signature";

#[derive(Debug, Clone)]
pub struct PaymentIntentRequest {
    pub donation_id: String,
    pub campaign_id: String,
    pub campaign_title: String,
    pub donor_email: String,
    pub amount_cents: i64,
    pub currency: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: Option<String>,
}

#[async_trait]
pub trait StripeApi: Send + Sync {
    async fn create_payment_intent(&self, req: &PaymentIntentRequest) -> Result<PaymentIntent>;

    /// Authenticate a webhook body against its `Stripe-Signature` header.
    fn verify_webhook(&self, payload: &[u8], signature_header: &str) -> Result<()>;
}

pub struct StripeClient {
    client: Client,
    api_url: String,
    secret_key: String,
    webhook_secret: String,
    tolerance: Duration,
}

impl StripeClient {
    pub fn new(client: Client, config: &StripeConfig) -> Self {
        Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            secret_key: config.secret_key.clone(),
            webhook_secret: config.webhook_secret.clone(),
            tolerance: config.webhook_tolerance,
        }
    }
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    message: Option<String>,
}

#[async_trait]
impl StripeApi for StripeClient {
    async fn create_payment_intent(&self, req: &PaymentIntentRequest) -> Result<PaymentIntent> {
        let amount = req.amount_cents.to_string();
        let description = format!("Donation to {}", req.campaign_title);
        let form = [
            ("amount", amount.as_str()),
            ("currency", req.currency.as_str()),
            ("description", description.as_str()),
            ("metadata[donation_id]", req.donation_id.as_str()),
            ("metadata[campaign_id]", req.campaign_id.as_str()),
            ("metadata[donor_email]", req.donor_email.as_str()),
            ("automatic_payment_methods[enabled]", "true"),
        ];

        let resp = self
            .client
            .post(format!("{}/v1/payment_intents", self.api_url))
            .bearer_auth(&self.secret_key)
            .form(&form)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp
                .json::<StripeErrorBody>()
                .await
                .ok()
                .and_then(|b| b.error.message)
                .unwrap_or_else(|| status.to_string());
            return Err(AppError::Provider(format!("stripe: {message}")));
        }

        let intent: PaymentIntent = resp.json().await?;
        debug!("Created PaymentIntent {} for donation {}", intent.id, req.donation_id);
        Ok(intent)
    }

    fn verify_webhook(&self, payload: &[u8], signature_header: &str) -> Result<()> {
        verify_signature(
            payload,
            signature_header,
            &self.webhook_secret,
            self.tolerance,
            chrono::Utc::now().timestamp(),
        )
    }
}

// ─────────────────────────────────────────────────────────
// Signature verification
// ─────────────────────────────────────────────────────────

pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    tolerance: Duration,
    now: i64,
) -> Result<()> {
    let mut timestamp: Option<i64> = None;
    let mut signatures: Vec<&str> = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", v)) => timestamp = v.parse().ok(),
            Some(("v1", v)) => signatures.push(v),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(|| {
        AppError::ProviderVerificationFailed("signature header has no timestamp".to_string())
    })?;
    if signatures.is_empty() {
        return Err(AppError::ProviderVerificationFailed(
            "signature header has no v1 signature".to_string(),
        ));
    }

    let age = now.abs_diff(timestamp);
    if age > tolerance.as_secs() {
        return Err(AppError::ProviderVerificationFailed(format!(
            "timestamp outside tolerance ({age}s)"
        )));
    }

    let matched = signatures.iter().any(|sig| {
        let Ok(expected) = hex::decode(sig) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
            return false;
        };
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        mac.verify_slice(&expected).is_ok()
    });

    if matched {
        Ok(())
    } else {
        Err(AppError::ProviderVerificationFailed(
            "no signature matched the payload".to_string(),
        ))
    }
}

// ─────────────────────────────────────────────────────────
// Event normalization
// ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: StripeEventData,
}

#[derive(Debug, Deserialize)]
pub struct StripeEventData {
    pub object: PaymentIntentObject,
}

#[derive(Debug, Deserialize)]
pub struct PaymentIntentObject {
    pub id: String,
    pub latest_charge: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Reduce a verified Stripe event to a ledger event.
///
/// `Ok(None)` for event types the ledger does not act on, and for
/// PaymentIntents this service did not create (no `donation_id` metadata).
/// Both are acknowledged so Stripe stops redelivering them.
pub fn normalize_event(payload: &[u8]) -> Result<Option<ProviderEvent>> {
    let envelope: serde_json::Value = serde_json::from_slice(payload)?;
    let event_type = envelope
        .get("type")
        .and_then(|t| t.as_str())
        .unwrap_or_default();

    let kind = match event_type {
        "payment_intent.succeeded" => PaymentEventKind::Confirmed,
        "payment_intent.payment_failed" => PaymentEventKind::Failed,
        "payment_intent.canceled" => PaymentEventKind::CancelledByUser,
        _ => return Ok(None),
    };

    let event: StripeEvent = serde_json::from_value(envelope)?;
    let intent = event.data.object;
    let Some(donation_id) = intent.metadata.get("donation_id").cloned() else {
        warn!(
            event_id = %event.id,
            payment_intent = %intent.id,
            "Ignoring {} PaymentIntent event without donation_id metadata",
            kind.as_str()
        );
        return Ok(None);
    };

    let provider_reference = match kind {
        PaymentEventKind::Confirmed => intent.latest_charge.or(Some(intent.id)),
        _ => Some(intent.id),
    };

    Ok(Some(ProviderEvent {
        donation_id,
        kind,
        provider_reference,
    }))
}

#[cfg(test)]
pub(crate) fn sign(payload: &[u8], secret: &str, timestamp: i64) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(format!("{timestamp}.").as_bytes());
    mac.update(payload);
    format!("t={timestamp},v1={}", hex::encode(mac.finalize().into_bytes()))
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
