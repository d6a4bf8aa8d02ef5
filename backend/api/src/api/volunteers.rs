//! Volunteer opportunities, applications and logged hours.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use super::ApiState;
use crate::db;
use crate::errors::{AppError, Result};
use crate::models::{
    ApplicationRecord, ApplicationStatus, Availability, NewApplication, NewOpportunity,
    OpportunityRecord, OpportunityStatus, OpportunityType, VolunteerApplication,
    VolunteerOpportunity, VolunteerStats,
};
use crate::money::{from_cents, to_cents};
use crate::notifier::{Notification, VolunteerEmail};

const RECENT_APPLICATIONS_LIMIT: i64 = 10;
const APPLICATIONS_PAGE_LIMIT: i64 = 100;
const MAX_HOURS_PER_ENTRY: i64 = 24 * 100;

#[derive(Serialize)]
pub struct OpportunitiesResponse {
    pub count: usize,
    pub opportunities: Vec<VolunteerOpportunity>,
}

#[derive(Serialize)]
pub struct ApplicationsResponse {
    pub count: usize,
    pub applications: Vec<VolunteerApplication>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateOpportunityRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    pub description: String,
    #[validate(length(max = 300))]
    pub short_description: String,
    pub opportunity_type: OpportunityType,
    #[validate(length(min = 1, max = 200))]
    pub location: String,
    pub skills_required: String,
    #[validate(length(min = 1, max = 100))]
    pub time_commitment: String,
    #[validate(range(min = 1))]
    pub max_volunteers: i64,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    #[validate(length(min = 1, max = 100))]
    pub contact_person: String,
    #[validate(email)]
    pub contact_email: String,
    #[validate(length(min = 1, max = 20))]
    pub contact_phone: String,
    #[validate(length(max = 500))]
    pub image: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OpportunityStatusRequest {
    pub status: OpportunityStatus,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ApplyRequest {
    pub opportunity: Uuid,
    #[validate(length(min = 1, max = 50))]
    pub first_name: String,
    #[validate(length(min = 1, max = 50))]
    pub last_name: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1, max = 20))]
    pub phone: String,
    pub date_of_birth: NaiveDate,
    pub address: String,
    #[validate(length(min = 1, max = 100))]
    pub city: String,
    #[validate(length(min = 1, max = 50))]
    pub state: String,
    #[validate(length(min = 1, max = 10))]
    pub zip_code: String,
    pub availability: Availability,
    pub previous_volunteer_experience: Option<String>,
    #[validate(length(min = 1))]
    pub skills_and_interests: String,
    #[validate(length(min = 1))]
    pub why_volunteer: String,
    #[validate(length(min = 1, max = 100))]
    pub emergency_contact_name: String,
    #[validate(length(min = 1, max = 20))]
    pub emergency_contact_phone: String,
    #[validate(length(min = 1, max = 50))]
    pub emergency_contact_relationship: String,
    #[serde(default)]
    pub background_check_consent: bool,
}

#[derive(Debug, Deserialize)]
pub struct ApplicationsQuery {
    pub status: Option<ApplicationStatus>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ReviewRequest {
    pub status: ApplicationStatus,
    pub notes: Option<String>,
    #[validate(length(max = 100))]
    pub reviewed_by: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LogHoursRequest {
    pub date: NaiveDate,
    pub hours: Decimal,
    #[validate(length(min = 1))]
    pub description: String,
    #[validate(length(max = 100))]
    pub verified_by: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LogHoursResponse {
    pub application_id: String,
    pub hours: Decimal,
}

async fn load_opportunity(state: &ApiState, id: &Uuid) -> Result<OpportunityRecord> {
    db::get_opportunity(&state.pool, &id.to_string())
        .await?
        .ok_or_else(|| AppError::NotFound(format!("opportunity {id}")))
}

async fn load_application(state: &ApiState, id: &Uuid) -> Result<ApplicationRecord> {
    db::get_application(&state.pool, &id.to_string())
        .await?
        .ok_or_else(|| AppError::NotFound(format!("application {id}")))
}

async fn list_by_status(state: &ApiState, status: OpportunityStatus) -> Result<OpportunitiesResponse> {
    let opportunities: Vec<VolunteerOpportunity> = db::list_opportunities(&state.pool, status)
        .await?
        .into_iter()
        .map(VolunteerOpportunity::from)
        .collect();
    Ok(OpportunitiesResponse {
        count: opportunities.len(),
        opportunities,
    })
}

/// `GET /api/volunteers/opportunities`
pub async fn list_active_opportunities(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<OpportunitiesResponse>> {
    Ok(Json(list_by_status(&state, OpportunityStatus::Active).await?))
}

/// `GET /api/volunteers/opportunities/completed`
pub async fn list_completed_opportunities(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<OpportunitiesResponse>> {
    Ok(Json(list_by_status(&state, OpportunityStatus::Completed).await?))
}

/// `GET /api/volunteers/opportunities/:id`
pub async fn get_opportunity(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<VolunteerOpportunity>> {
    Ok(Json(load_opportunity(&state, &id).await?.into()))
}

/// `POST /api/volunteers/applications`
///
/// Claims a place on the opportunity and queues the "application received"
/// email.
pub async fn apply(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<ApplyRequest>,
) -> Result<(StatusCode, Json<VolunteerApplication>)> {
    body.validate()?;
    if body.date_of_birth >= Utc::now().date_naive() {
        return Err(AppError::Validation("date_of_birth must be in the past".to_string()));
    }

    let record = db::create_application(
        &state.pool,
        &NewApplication {
            opportunity_id: body.opportunity.to_string(),
            first_name: body.first_name,
            last_name: body.last_name,
            email: body.email.trim().to_string(),
            phone: body.phone,
            date_of_birth: body.date_of_birth.to_string(),
            address: body.address,
            city: body.city,
            state: body.state,
            zip_code: body.zip_code,
            availability: body.availability,
            previous_volunteer_experience: body.previous_volunteer_experience,
            skills_and_interests: body.skills_and_interests,
            why_volunteer: body.why_volunteer,
            emergency_contact_name: body.emergency_contact_name,
            emergency_contact_phone: body.emergency_contact_phone,
            emergency_contact_relationship: body.emergency_contact_relationship,
            background_check_consent: body.background_check_consent,
        },
    )
    .await?;

    info!(
        application_id = %record.id,
        opportunity_id = %record.opportunity_id,
        "Volunteer application received"
    );
    state.notifications.enqueue(Notification::VolunteerApplication {
        application_id: record.id.clone(),
        email: VolunteerEmail::Received,
    });
    Ok((StatusCode::CREATED, Json(record.into())))
}

/// `POST /admin/volunteers/opportunities`
pub async fn create_opportunity(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<CreateOpportunityRequest>,
) -> Result<(StatusCode, Json<VolunteerOpportunity>)> {
    body.validate()?;
    if body.end_date.is_some_and(|end| end < body.start_date) {
        return Err(AppError::Validation("end_date is before start_date".to_string()));
    }

    let record = db::insert_opportunity(
        &state.pool,
        &NewOpportunity {
            title: body.title,
            description: body.description,
            short_description: body.short_description,
            opportunity_type: body.opportunity_type,
            location: body.location,
            skills_required: body.skills_required,
            time_commitment: body.time_commitment,
            max_volunteers: body.max_volunteers,
            start_date: body.start_date.timestamp(),
            end_date: body.end_date.map(|d| d.timestamp()),
            contact_person: body.contact_person,
            contact_email: body.contact_email,
            contact_phone: body.contact_phone,
            image: body.image,
        },
    )
    .await?;

    info!(opportunity_id = %record.id, max_volunteers = record.max_volunteers, "Opportunity created");
    Ok((StatusCode::CREATED, Json(record.into())))
}

/// `POST /admin/volunteers/opportunities/:id/status`
pub async fn update_opportunity_status(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<OpportunityStatusRequest>,
) -> Result<Json<VolunteerOpportunity>> {
    if !db::set_opportunity_status(&state.pool, &id.to_string(), body.status).await? {
        return Err(AppError::NotFound(format!("opportunity {id}")));
    }
    info!(opportunity_id = %id, "Opportunity marked {}", body.status.as_str());
    Ok(Json(load_opportunity(&state, &id).await?.into()))
}

/// `GET /admin/volunteers/applications[?status=..]`
pub async fn list_applications(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<ApplicationsQuery>,
) -> Result<Json<ApplicationsResponse>> {
    let applications: Vec<VolunteerApplication> =
        db::list_applications(&state.pool, query.status, APPLICATIONS_PAGE_LIMIT)
            .await?
            .into_iter()
            .map(VolunteerApplication::from)
            .collect();
    Ok(Json(ApplicationsResponse {
        count: applications.len(),
        applications,
    }))
}

/// `GET /admin/volunteers/applications/:id`
pub async fn get_application(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<VolunteerApplication>> {
    Ok(Json(load_application(&state, &id).await?.into()))
}

/// `POST /admin/volunteers/applications/:id/review`
///
/// Approval queues the "application approved" email.
pub async fn review_application(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<ReviewRequest>,
) -> Result<Json<VolunteerApplication>> {
    body.validate()?;
    let application = load_application(&state, &id).await?;
    let transition_error = |current: ApplicationStatus| AppError::InvalidStateTransition {
        entity: "volunteer application",
        id: id.to_string(),
        current: current.as_str().to_string(),
        requested: body.status.as_str().to_string(),
    };

    if !application.status.can_transition_to(body.status) {
        return Err(transition_error(application.status));
    }
    let moved = db::review_application(
        &state.pool,
        &application.id,
        application.status,
        body.status,
        body.notes.as_deref(),
        body.reviewed_by.as_deref(),
    )
    .await?;
    if !moved {
        let current = load_application(&state, &id).await?;
        return Err(transition_error(current.status));
    }

    info!(
        application_id = %application.id,
        "Volunteer application {} -> {}",
        application.status.as_str(),
        body.status.as_str()
    );
    if body.status == ApplicationStatus::Approved {
        state.notifications.enqueue(Notification::VolunteerApplication {
            application_id: application.id.clone(),
            email: VolunteerEmail::Approved,
        });
    }
    Ok(Json(load_application(&state, &id).await?.into()))
}

/// `POST /admin/volunteers/applications/:id/hours`
pub async fn log_hours(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<LogHoursRequest>,
) -> Result<(StatusCode, Json<LogHoursResponse>)> {
    body.validate()?;
    let hundredths = to_cents(body.hours)?;
    if !(1..=MAX_HOURS_PER_ENTRY).contains(&hundredths) {
        return Err(AppError::Validation("hours must be between 0.01 and 24".to_string()));
    }

    let application = load_application(&state, &id).await?;
    if application.status != ApplicationStatus::Approved {
        return Err(AppError::Conflict(format!(
            "hours can only be logged for approved volunteers; application is {}",
            application.status.as_str()
        )));
    }

    db::log_volunteer_hours(
        &state.pool,
        &application,
        &body.date.to_string(),
        hundredths,
        &body.description,
        body.verified_by.as_deref(),
    )
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(LogHoursResponse {
            application_id: application.id,
            hours: from_cents(hundredths),
        }),
    ))
}

/// `GET /admin/volunteers/stats`
pub async fn volunteer_stats(State(state): State<Arc<ApiState>>) -> Result<Json<VolunteerStats>> {
    let (total_volunteers, active_opportunities, hours_hundredths) =
        db::volunteer_totals(&state.pool).await?;
    let recent_applications = db::list_applications(&state.pool, None, RECENT_APPLICATIONS_LIMIT)
        .await?
        .into_iter()
        .map(VolunteerApplication::from)
        .collect();

    Ok(Json(VolunteerStats {
        total_volunteers,
        active_opportunities,
        total_hours_logged: from_cents(hours_hundredths),
        recent_applications,
    }))
}
