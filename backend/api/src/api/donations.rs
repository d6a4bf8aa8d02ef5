//! Donation creation, lookup and statistics.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{Datelike, NaiveDate, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

use super::ApiState;
use crate::db;
use crate::errors::{AppError, Result};
use crate::models::{
    CampaignStatus, Donation, DonationRecord, DonationStats, NewDonation, PaymentEventKind,
    PaymentMethod,
};
use crate::money::{from_cents, to_cents};
use crate::providers::paypal::PayPalPaymentRequest;
use crate::providers::stripe::PaymentIntentRequest;

const RECENT_DONATIONS_LIMIT: i64 = 10;
const STATS_MONTHS: u32 = 12;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateDonationRequest {
    pub campaign: Uuid,
    #[validate(length(min = 1, max = 100))]
    pub donor_name: String,
    #[validate(email)]
    pub donor_email: String,
    #[validate(length(max = 20))]
    pub donor_phone: Option<String>,
    pub amount: Decimal,
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub is_anonymous: bool,
    pub message: Option<String>,
}

/// How the client continues the payment with the provider.
#[derive(Debug, Serialize)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum PaymentInstructions {
    Stripe { client_secret: Option<String> },
    Paypal { approval_url: String },
}

#[derive(Debug, Serialize)]
pub struct CreateDonationResponse {
    pub message: &'static str,
    pub donation: Donation,
    pub payment: PaymentInstructions,
}

/// `POST /api/donations`
///
/// Records a pending donation and opens the payment with its provider. If
/// the provider refuses, the donation is marked failed through the ledger.
pub async fn create_donation(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<CreateDonationRequest>,
) -> Result<(StatusCode, Json<CreateDonationResponse>)> {
    body.validate()?;

    let amount_cents = to_cents(body.amount)?;
    if amount_cents <= 0 {
        return Err(AppError::Validation("amount must be positive".to_string()));
    }

    let campaign_id = body.campaign.to_string();
    let campaign = db::get_campaign(&state.pool, &campaign_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("campaign {campaign_id}")))?;
    if campaign.status != CampaignStatus::Active {
        return Err(AppError::Validation(format!(
            "campaign is {} and not accepting donations",
            campaign.status.as_str()
        )));
    }

    let donation = db::insert_donation(
        &state.pool,
        &NewDonation {
            campaign_id,
            donor_name: body.donor_name,
            donor_email: body.donor_email,
            donor_phone: body.donor_phone,
            amount_cents,
            payment_method: body.payment_method,
            is_anonymous: body.is_anonymous,
            message: body.message,
        },
    )
    .await?;

    let payment = match initiate_payment(&state, &donation).await {
        Ok(p) => p,
        Err(e) => {
            warn!(donation_id = %donation.id, "Payment initiation failed: {e}");
            state
                .ledger
                .apply_payment_event(&donation.id, PaymentEventKind::Failed, None)
                .await?;
            return Err(e);
        }
    };

    let donation = db::get_donation(&state.pool, &donation.id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("donation {}", donation.id)))?;

    info!(
        donation_id = %donation.id,
        campaign_id = %donation.campaign_id,
        amount_cents,
        "Donation created via {}",
        donation.payment_method.as_str()
    );

    Ok((
        StatusCode::CREATED,
        Json(CreateDonationResponse {
            message: "Donation created successfully",
            donation: donation.into(),
            payment,
        }),
    ))
}

async fn initiate_payment(state: &ApiState, donation: &DonationRecord) -> Result<PaymentInstructions> {
    match donation.payment_method {
        PaymentMethod::Stripe => {
            let intent = state
                .gateways
                .stripe
                .create_payment_intent(&PaymentIntentRequest {
                    donation_id: donation.id.clone(),
                    campaign_id: donation.campaign_id.clone(),
                    campaign_title: donation.campaign_title.clone(),
                    donor_email: donation.donor_email.clone(),
                    amount_cents: donation.amount_cents,
                    currency: state.settings.currency.to_lowercase(),
                })
                .await?;
            db::set_payment_intent_id(&state.pool, &donation.id, &intent.id).await?;
            Ok(PaymentInstructions::Stripe {
                client_secret: intent.client_secret,
            })
        }
        PaymentMethod::Paypal => {
            let base = state.settings.public_base_url.trim_end_matches('/');
            let created = state
                .gateways
                .paypal
                .create_payment(&PayPalPaymentRequest {
                    donation_id: donation.id.clone(),
                    campaign_title: donation.campaign_title.clone(),
                    amount: from_cents(donation.amount_cents).to_string(),
                    currency: state.settings.currency.clone(),
                    return_url: format!("{base}/paypal/execute/{}", donation.id),
                    cancel_url: format!("{base}/paypal/cancel/{}", donation.id),
                })
                .await?;
            db::set_paypal_order_id(&state.pool, &donation.id, &created.payment_id).await?;
            Ok(PaymentInstructions::Paypal {
                approval_url: created.approval_url,
            })
        }
    }
}

/// `GET /api/donations/:id`
pub async fn get_donation(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Donation>> {
    let donation = db::get_donation(&state.pool, &id.to_string())
        .await?
        .ok_or_else(|| AppError::NotFound(format!("donation {id}")))?;
    Ok(Json(donation.into()))
}

/// `GET /admin/donations/stats`
pub async fn donation_stats(State(state): State<Arc<ApiState>>) -> Result<Json<DonationStats>> {
    let (sum_cents, donors, count) = db::completed_totals(&state.pool).await?;
    let average_donation = if count > 0 {
        (from_cents(sum_cents) / Decimal::from(count))
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
    } else {
        Decimal::ZERO
    };

    let months = last_months(Utc::now().date_naive(), STATS_MONTHS);
    let since = months
        .first()
        .and_then(|m| m.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or_default();
    let totals = db::monthly_completed_totals(&state.pool, since).await?;
    let monthly_donations = months
        .iter()
        .map(|m| {
            let key = m.format("%Y-%m").to_string();
            let cents = totals
                .iter()
                .find(|(month, _)| *month == key)
                .map(|(_, c)| *c)
                .unwrap_or(0);
            from_cents(cents)
        })
        .collect();

    let recent_donations = db::recent_completed_donations(&state.pool, RECENT_DONATIONS_LIMIT)
        .await?
        .into_iter()
        .map(Donation::from)
        .collect();

    Ok(Json(DonationStats {
        total_donations: from_cents(sum_cents),
        total_donors: donors,
        average_donation,
        monthly_donations,
        recent_donations,
    }))
}

/// First day of each of the `n` calendar months ending with `today`'s, oldest first.
fn last_months(today: NaiveDate, n: u32) -> Vec<NaiveDate> {
    let current = today.year() * 12 + today.month0() as i32;
    (0..n as i32)
        .rev()
        .filter_map(|back| {
            let idx = current - back;
            NaiveDate::from_ymd_opt(idx.div_euclid(12), idx.rem_euclid(12) as u32 + 1, 1)
        })
        .collect()
}
