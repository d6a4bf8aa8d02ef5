//! Inbound payment triggers: the Stripe webhook, the PayPal return and
//! cancel redirects, and the administrative refund.
//!
//! Each handler authenticates or confirms with the provider first and only
//! then hands a normalized event to the ledger.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::HeaderMap,
    response::Redirect,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::ApiState;
use crate::db;
use crate::errors::{AppError, Result};
use crate::ledger::EventOutcome;
use crate::models::{timestamp, PaymentEventKind, PaymentStatus};
use crate::providers::stripe::{normalize_event, SIGNATURE_HEADER};

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
    /// Donation status after the event, when the event concerned a donation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<PaymentStatus>,
}

/// `POST /stripe/webhook`
pub async fn stripe_webhook(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            AppError::ProviderVerificationFailed("missing Stripe-Signature header".to_string())
        })?;

    if let Err(e) = state.gateways.stripe.verify_webhook(&body, signature) {
        warn!("Rejected Stripe webhook: {e}");
        return Err(e);
    }

    let Some(event) = normalize_event(&body)? else {
        return Ok(Json(WebhookAck {
            received: true,
            status: None,
        }));
    };

    let outcome = state
        .ledger
        .apply_payment_event(
            &event.donation_id,
            event.kind,
            event.provider_reference.as_deref(),
        )
        .await?;

    Ok(Json(WebhookAck {
        received: true,
        status: Some(outcome.status()),
    }))
}

#[derive(Debug, Deserialize)]
pub struct PayPalReturnQuery {
    #[serde(rename = "paymentId")]
    pub payment_id: Option<String>,
    #[serde(rename = "PayerID")]
    pub payer_id: Option<String>,
}

/// `GET /paypal/execute/:donation_id?paymentId=..&PayerID=..`
///
/// The donor lands here after approving on PayPal. The payment is executed
/// with PayPal before the ledger hears about it; the donor is then sent on
/// to the frontend result page.
pub async fn paypal_execute(
    State(state): State<Arc<ApiState>>,
    Path(donation_id): Path<Uuid>,
    Query(query): Query<PayPalReturnQuery>,
) -> Redirect {
    let donation_id = donation_id.to_string();
    let succeeded = match execute_and_apply(&state, &donation_id, query).await {
        Ok(status) => status == PaymentStatus::Completed,
        Err(e) => {
            error!(%donation_id, "PayPal execution failed: {e}");
            false
        }
    };

    let page = if succeeded { "success" } else { "failed" };
    frontend_redirect(&state, page, &donation_id)
}

async fn execute_and_apply(
    state: &ApiState,
    donation_id: &str,
    query: PayPalReturnQuery,
) -> Result<PaymentStatus> {
    let (Some(payment_id), Some(payer_id)) = (query.payment_id, query.payer_id) else {
        return Err(AppError::Validation("missing paymentId or PayerID".to_string()));
    };

    let donation = db::get_donation(&state.pool, donation_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("donation {donation_id}")))?;

    if donation.payment_status.is_terminal() {
        info!(%donation_id, "PayPal return for a donation already {}", donation.payment_status.as_str());
        return Ok(donation.payment_status);
    }
    if donation.paypal_order_id.as_deref() != Some(payment_id.as_str()) {
        return Err(AppError::ProviderVerificationFailed(format!(
            "payment {payment_id} does not belong to donation {donation_id}"
        )));
    }

    // An execute error leaves the donation pending; the sale may still have
    // been captured.
    let executed = match state.gateways.paypal.execute_payment(&payment_id, &payer_id).await {
        Ok(executed) => executed,
        Err(e) => {
            warn!(%donation_id, "PayPal did not execute payment {payment_id}: {e}");
            return Err(e);
        }
    };

    let outcome = state
        .ledger
        .apply_payment_event(
            donation_id,
            PaymentEventKind::Confirmed,
            Some(&executed.transaction_id),
        )
        .await?;
    Ok(outcome.status())
}

/// `GET /paypal/cancel/:donation_id`
pub async fn paypal_cancel(
    State(state): State<Arc<ApiState>>,
    Path(donation_id): Path<Uuid>,
) -> Redirect {
    let donation_id = donation_id.to_string();
    match state
        .ledger
        .apply_payment_event(&donation_id, PaymentEventKind::CancelledByUser, None)
        .await
    {
        Ok(EventOutcome::Applied { .. }) => info!(%donation_id, "Donor cancelled at PayPal"),
        Ok(EventOutcome::Ignored { .. }) => {}
        Err(e) => warn!(%donation_id, "PayPal cancel not recorded: {e}"),
    }
    frontend_redirect(&state, "cancelled", &donation_id)
}

fn frontend_redirect(state: &ApiState, page: &str, donation_id: &str) -> Redirect {
    let base = state.settings.frontend_url.trim_end_matches('/');
    Redirect::to(&format!("{base}/payment/{page}?donation_id={donation_id}"))
}

#[derive(Debug, Serialize)]
pub struct RefundResponse {
    pub message: &'static str,
    pub donation_id: String,
    pub status: PaymentStatus,
}

/// `POST /admin/donations/:id/refund`
pub async fn refund_donation(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<RefundResponse>> {
    let donation_id = id.to_string();
    state.ledger.refund(&donation_id).await?;
    Ok(Json(RefundResponse {
        message: "Donation refunded",
        donation_id,
        status: PaymentStatus::Refunded,
    }))
}

#[derive(Debug, Serialize)]
pub struct PaymentEventView {
    pub event_kind: String,
    pub provider_reference: Option<String>,
    pub outcome: String,
    pub received_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize)]
pub struct PaymentEventsResponse {
    pub donation_id: String,
    pub status: PaymentStatus,
    pub events: Vec<PaymentEventView>,
}

/// `GET /admin/donations/:id/events`
///
/// Every provider event the ledger received for the donation, oldest first.
pub async fn donation_events(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<PaymentEventsResponse>> {
    let donation_id = id.to_string();
    let donation = db::get_donation(&state.pool, &donation_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("donation {donation_id}")))?;

    let events = db::get_payment_events(&state.pool, &donation_id)
        .await?
        .into_iter()
        .map(|e| PaymentEventView {
            event_kind: e.event_kind,
            provider_reference: e.provider_reference,
            outcome: e.outcome,
            received_at: timestamp(e.received_at),
        })
        .collect();

    Ok(Json(PaymentEventsResponse {
        donation_id,
        status: donation.payment_status,
        events,
    }))
}
