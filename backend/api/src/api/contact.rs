//! Contact form submissions and their follow-up.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use super::ApiState;
use crate::db;
use crate::errors::{AppError, Result};
use crate::models::{
    ContactMessage, ContactMessageRecord, ContactMessageType, ContactStatus, NewContactMessage,
};

#[derive(Debug, Deserialize, Validate)]
pub struct ContactRequest {
    #[validate(length(min = 1, max = 50))]
    pub first_name: String,
    #[validate(length(min = 1, max = 50))]
    pub last_name: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(max = 20))]
    pub phone: Option<String>,
    #[validate(length(min = 1, max = 200))]
    pub subject: String,
    #[validate(length(min = 1))]
    pub message: String,
    pub message_type: Option<ContactMessageType>,
}

/// What the public form gets back; the stored message stays admin-only.
#[derive(Debug, Serialize)]
pub struct ContactReceipt {
    pub message: &'static str,
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    pub status: Option<ContactStatus>,
}

#[derive(Serialize)]
pub struct MessagesResponse {
    pub count: usize,
    pub messages: Vec<ContactMessage>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateMessageRequest {
    pub status: ContactStatus,
    pub response_message: Option<String>,
    #[validate(length(max = 100))]
    pub responded_by: Option<String>,
}

async fn load_message(state: &ApiState, id: &Uuid) -> Result<ContactMessageRecord> {
    db::get_contact_message(&state.pool, &id.to_string())
        .await?
        .ok_or_else(|| AppError::NotFound(format!("contact message {id}")))
}

/// `POST /api/contact`
pub async fn submit_message(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<ContactRequest>,
) -> Result<(StatusCode, Json<ContactReceipt>)> {
    body.validate()?;

    let record = db::insert_contact_message(
        &state.pool,
        &NewContactMessage {
            first_name: body.first_name,
            last_name: body.last_name,
            email: body.email,
            phone: body.phone,
            subject: body.subject,
            message: body.message,
            message_type: body.message_type.unwrap_or(ContactMessageType::General),
        },
    )
    .await?;

    info!(message_id = %record.id, "Contact message received");
    Ok((
        StatusCode::CREATED,
        Json(ContactReceipt {
            message: "Thank you for contacting us",
            id: record.id,
        }),
    ))
}

/// `GET /admin/contact/messages[?status=..]`
pub async fn list_messages(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<MessagesQuery>,
) -> Result<Json<MessagesResponse>> {
    let messages: Vec<ContactMessage> = db::list_contact_messages(&state.pool, query.status)
        .await?
        .into_iter()
        .map(ContactMessage::from)
        .collect();
    Ok(Json(MessagesResponse {
        count: messages.len(),
        messages,
    }))
}

/// `GET /admin/contact/messages/:id`
pub async fn get_message(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ContactMessage>> {
    Ok(Json(load_message(&state, &id).await?.into()))
}

/// `POST /admin/contact/messages/:id`
pub async fn update_message(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateMessageRequest>,
) -> Result<Json<ContactMessage>> {
    body.validate()?;
    let message_id = id.to_string();
    let current = load_message(&state, &id).await?;
    let transition_error = |current: ContactStatus| AppError::InvalidStateTransition {
        entity: "contact message",
        id: message_id.clone(),
        current: current.as_str().to_string(),
        requested: body.status.as_str().to_string(),
    };
    if !current.status.can_transition_to(body.status) {
        return Err(transition_error(current.status));
    }

    let moved = db::update_contact_message(
        &state.pool,
        &message_id,
        current.status,
        body.status,
        body.response_message.as_deref(),
        body.responded_by.as_deref(),
    )
    .await?;
    if !moved {
        return Err(transition_error(load_message(&state, &id).await?.status));
    }

    info!(
        %message_id,
        "Contact message {} -> {}",
        current.status.as_str(),
        body.status.as_str()
    );
    Ok(Json(load_message(&state, &id).await?.into()))
}
