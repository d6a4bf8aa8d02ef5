//! PayPal REST (v1 payments). Create a payment, then execute it after the
//! donor approves it and is redirected back with `paymentId` and `PayerID`.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::config::PayPalConfig;
use crate::errors::{AppError, Result};

#[derive(Debug, Clone)]
pub struct PayPalPaymentRequest {
    pub donation_id: String,
    pub campaign_title: String,
    /// Decimal string with two places, e.g. `"30.00"`
    pub amount: String,
    pub currency: String,
    pub return_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedPayment {
    pub payment_id: String,
    pub approval_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutedPayment {
    /// Sale id of the captured transaction, falling back to the payment id
    pub transaction_id: String,
}

#[async_trait]
pub trait PayPalApi: Send + Sync {
    async fn create_payment(&self, req: &PayPalPaymentRequest) -> Result<CreatedPayment>;

    async fn execute_payment(&self, payment_id: &str, payer_id: &str) -> Result<ExecutedPayment>;
}

pub struct PayPalClient {
    client: Client,
    api_url: String,
    client_id: String,
    client_secret: String,
}

// ─────────────────────────────────────────────────────────
// Response shapes
// ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct Link {
    href: String,
    rel: String,
}

#[derive(Debug, Deserialize)]
struct PaymentResponse {
    id: String,
    state: Option<String>,
    #[serde(default)]
    links: Vec<Link>,
    #[serde(default)]
    transactions: Vec<Transaction>,
}

#[derive(Debug, Deserialize)]
struct Transaction {
    #[serde(default)]
    related_resources: Vec<RelatedResource>,
}

#[derive(Debug, Deserialize)]
struct RelatedResource {
    sale: Option<Sale>,
}

#[derive(Debug, Deserialize)]
struct Sale {
    id: String,
}

impl PayPalClient {
    pub fn new(client: Client, config: &PayPalConfig) -> Self {
        Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
        }
    }

    async fn access_token(&self) -> Result<String> {
        let resp = self
            .client
            .post(format!("{}/v1/oauth2/token", self.api_url))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(AppError::Provider(format!(
                "paypal: token request failed with {}",
                resp.status()
            )));
        }
        let token: TokenResponse = resp.json().await?;
        Ok(token.access_token)
    }

    async fn post_payment(&self, path: &str, body: serde_json::Value) -> Result<PaymentResponse> {
        let token = self.access_token().await?;
        let resp = self
            .client
            .post(format!("{}{path}", self.api_url))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(AppError::Provider(format!("paypal: {status} {detail}")));
        }
        Ok(resp.json().await?)
    }
}

#[async_trait]
impl PayPalApi for PayPalClient {
    async fn create_payment(&self, req: &PayPalPaymentRequest) -> Result<CreatedPayment> {
        let currency = req.currency.to_uppercase();
        let body = json!({
            "intent": "sale",
            "payer": { "payment_method": "paypal" },
            "redirect_urls": {
                "return_url": req.return_url,
                "cancel_url": req.cancel_url,
            },
            "transactions": [{
                "item_list": { "items": [{
                    "name": format!("Donation to {}", req.campaign_title),
                    "sku": req.donation_id,
                    "price": req.amount,
                    "currency": currency,
                    "quantity": 1,
                }]},
                "amount": { "total": req.amount, "currency": currency },
                "description": format!("Donation for the cause: {}", req.campaign_title),
            }],
        });

        let payment = self.post_payment("/v1/payments/payment", body).await?;
        let approval_url = approval_url(&payment.links).ok_or_else(|| {
            AppError::Provider(format!("paypal: payment {} has no approval_url", payment.id))
        })?;

        debug!("Created PayPal payment {} for donation {}", payment.id, req.donation_id);
        Ok(CreatedPayment {
            payment_id: payment.id,
            approval_url,
        })
    }

    async fn execute_payment(&self, payment_id: &str, payer_id: &str) -> Result<ExecutedPayment> {
        let payment = self
            .post_payment(
                &format!("/v1/payments/payment/{payment_id}/execute"),
                json!({ "payer_id": payer_id }),
            )
            .await?;

        if payment.state.as_deref() != Some("approved") {
            return Err(AppError::Provider(format!(
                "paypal: payment {} executed with state {:?}",
                payment.id, payment.state
            )));
        }

        Ok(ExecutedPayment {
            transaction_id: sale_id(&payment).unwrap_or(payment.id),
        })
    }
}

fn approval_url(links: &[Link]) -> Option<String> {
    links
        .iter()
        .find(|l| l.rel == "approval_url")
        .map(|l| l.href.clone())
}

fn sale_id(payment: &PaymentResponse) -> Option<String> {
    payment
        .transactions
        .first()?
        .related_resources
        .first()?
        .sale
        .as_ref()
        .map(|s| s.id.clone())
}
