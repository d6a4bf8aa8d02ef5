//! Campaign endpoints.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use super::ApiState;
use crate::db;
use crate::errors::{AppError, Result};
use crate::models::{Campaign, CampaignStatus, NewCampaign, PublicDonation};
use crate::money::to_cents;

const PUBLIC_DONATIONS_LIMIT: i64 = 20;

#[derive(Serialize)]
pub struct CampaignsResponse {
    pub count: usize,
    pub campaigns: Vec<Campaign>,
}

#[derive(Serialize)]
pub struct CampaignDonationsResponse {
    pub campaign_id: String,
    pub count: usize,
    pub donations: Vec<PublicDonation>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateCampaignRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    pub description: String,
    #[validate(length(max = 300))]
    pub short_description: String,
    pub goal_amount: Decimal,
    #[validate(length(max = 500))]
    pub image: Option<String>,
    /// `draft` or `active`; defaults to `active`
    pub status: Option<CampaignStatus>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: CampaignStatus,
}

async fn load_campaign(state: &ApiState, id: &Uuid) -> Result<crate::models::CampaignRecord> {
    db::get_campaign(&state.pool, &id.to_string())
        .await?
        .ok_or_else(|| AppError::NotFound(format!("campaign {id}")))
}

/// `GET /api/campaigns`
pub async fn list_active_campaigns(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<CampaignsResponse>> {
    let campaigns: Vec<Campaign> = db::list_campaigns(&state.pool, CampaignStatus::Active)
        .await?
        .into_iter()
        .map(Campaign::from)
        .collect();
    Ok(Json(CampaignsResponse {
        count: campaigns.len(),
        campaigns,
    }))
}

/// `GET /api/campaigns/completed`
pub async fn list_completed_campaigns(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<CampaignsResponse>> {
    let campaigns: Vec<Campaign> = db::list_campaigns(&state.pool, CampaignStatus::Completed)
        .await?
        .into_iter()
        .map(Campaign::from)
        .collect();
    Ok(Json(CampaignsResponse {
        count: campaigns.len(),
        campaigns,
    }))
}

/// `GET /api/campaigns/:id`
pub async fn get_campaign(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Campaign>> {
    Ok(Json(load_campaign(&state, &id).await?.into()))
}

/// `GET /api/campaigns/:id/donations`
///
/// The latest completed donations whose donors chose to be listed.
pub async fn list_campaign_donations(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<CampaignDonationsResponse>> {
    let campaign = load_campaign(&state, &id).await?;
    let donations: Vec<PublicDonation> =
        db::list_public_donations(&state.pool, &campaign.id, PUBLIC_DONATIONS_LIMIT)
            .await?
            .into_iter()
            .map(PublicDonation::from)
            .collect();
    Ok(Json(CampaignDonationsResponse {
        campaign_id: campaign.id,
        count: donations.len(),
        donations,
    }))
}

/// `POST /admin/campaigns`
pub async fn create_campaign(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<CreateCampaignRequest>,
) -> Result<(StatusCode, Json<Campaign>)> {
    body.validate()?;

    let goal_cents = to_cents(body.goal_amount)?;
    if goal_cents <= 0 {
        return Err(AppError::Validation("goal_amount must be positive".to_string()));
    }
    let status = body.status.unwrap_or(CampaignStatus::Active);
    if !matches!(status, CampaignStatus::Draft | CampaignStatus::Active) {
        return Err(AppError::Validation(format!(
            "a campaign cannot be created as {}",
            status.as_str()
        )));
    }

    let record = db::insert_campaign(
        &state.pool,
        &NewCampaign {
            title: body.title,
            description: body.description,
            short_description: body.short_description,
            goal_cents,
            image: body.image,
            status,
            start_date: body.start_date.map(|d| d.timestamp()),
            end_date: body.end_date.map(|d| d.timestamp()),
        },
    )
    .await?;

    info!(campaign_id = %record.id, goal_cents, "Campaign created as {}", status.as_str());
    Ok((StatusCode::CREATED, Json(record.into())))
}

/// `POST /admin/campaigns/:id/status`
pub async fn update_campaign_status(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateStatusRequest>,
) -> Result<Json<Campaign>> {
    let campaign = load_campaign(&state, &id).await?;
    let transition_error = |current: CampaignStatus| AppError::InvalidStateTransition {
        entity: "campaign",
        id: id.to_string(),
        current: current.as_str().to_string(),
        requested: body.status.as_str().to_string(),
    };

    if !campaign.status.can_transition_to(body.status) {
        return Err(transition_error(campaign.status));
    }
    if !db::update_campaign_status(&state.pool, &campaign.id, campaign.status, body.status).await? {
        // Lost a race with another status change; report what is stored now.
        let current = load_campaign(&state, &id).await?;
        return Err(transition_error(current.status));
    }

    info!(
        campaign_id = %campaign.id,
        "Campaign {} -> {}",
        campaign.status.as_str(),
        body.status.as_str()
    );
    Ok(Json(load_campaign(&state, &id).await?.into()))
}
