//! Axum REST API: router, shared state and the admin guard.

mod campaigns;
mod contact;
mod donations;
mod payments;
mod volunteers;

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use sqlx::SqlitePool;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::errors::AppError;
use crate::ledger::Ledger;
use crate::notifier::NotificationQueue;
use crate::providers::PaymentGateways;

#[derive(Clone)]
pub struct ApiState {
    pub pool: SqlitePool,
    pub ledger: Ledger,
    /// Volunteer emails; donation confirmations go through the ledger.
    pub notifications: NotificationQueue,
    pub gateways: PaymentGateways,
    pub settings: ApiSettings,
}

/// The slice of configuration the handlers read.
#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub public_base_url: String,
    pub frontend_url: String,
    pub currency: String,
    pub admin_token: Option<String>,
}

pub fn router(state: Arc<ApiState>) -> Router {
    let admin = Router::new()
        .route("/campaigns", post(campaigns::create_campaign))
        .route("/campaigns/:id/status", post(campaigns::update_campaign_status))
        .route("/donations/stats", get(donations::donation_stats))
        .route("/donations/:id/refund", post(payments::refund_donation))
        .route("/donations/:id/events", get(payments::donation_events))
        .route("/volunteers/opportunities", post(volunteers::create_opportunity))
        .route(
            "/volunteers/opportunities/:id/status",
            post(volunteers::update_opportunity_status),
        )
        .route("/volunteers/applications", get(volunteers::list_applications))
        .route("/volunteers/applications/:id", get(volunteers::get_application))
        .route(
            "/volunteers/applications/:id/review",
            post(volunteers::review_application),
        )
        .route("/volunteers/applications/:id/hours", post(volunteers::log_hours))
        .route("/volunteers/stats", get(volunteers::volunteer_stats))
        .route("/contact/messages", get(contact::list_messages))
        .route(
            "/contact/messages/:id",
            get(contact::get_message).post(contact::update_message),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin));

    let public = Router::new()
        .route("/campaigns", get(campaigns::list_active_campaigns))
        .route("/campaigns/completed", get(campaigns::list_completed_campaigns))
        .route("/campaigns/:id", get(campaigns::get_campaign))
        .route("/campaigns/:id/donations", get(campaigns::list_campaign_donations))
        .route("/donations", post(donations::create_donation))
        .route("/donations/:id", get(donations::get_donation))
        .route("/volunteers/opportunities", get(volunteers::list_active_opportunities))
        .route(
            "/volunteers/opportunities/completed",
            get(volunteers::list_completed_opportunities),
        )
        .route("/volunteers/opportunities/:id", get(volunteers::get_opportunity))
        .route("/volunteers/applications", post(volunteers::apply))
        .route("/contact", post(contact::submit_message));

    Router::new()
        .route("/health", get(health))
        .nest("/api", public)
        .nest("/admin", admin)
        .route("/stripe/webhook", post(payments::stripe_webhook))
        .route("/paypal/execute/:donation_id", get(payments::paypal_execute))
        .route("/paypal/cancel/:donation_id", get(payments::paypal_cancel))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Requires `Authorization: Bearer <ADMIN_TOKEN>` when a token is configured.
async fn require_admin(
    State(state): State<Arc<ApiState>>,
    req: Request,
    next: Next,
) -> Response {
    if let Some(expected) = &state.settings.admin_token {
        let presented = req
            .headers()
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));

        if !presented.is_some_and(|token| token_matches(token, expected)) {
            warn!(path = %req.uri().path(), "Rejected admin request");
            return AppError::Unauthorized.into_response();
        }
    }
    next.run(req).await
}

/// Compares fixed-length HMAC tags of both tokens, so the check takes the
/// same time wherever the first differing byte is.
fn token_matches(presented: &str, expected: &str) -> bool {
    let tag = |token: &str| {
        Hmac::<Sha256>::new_from_slice(expected.as_bytes()).map(|mut mac| {
            mac.update(token.as_bytes());
            mac
        })
    };
    match (tag(presented), tag(expected)) {
        (Ok(presented), Ok(expected)) => presented
            .verify_slice(&expected.finalize().into_bytes())
            .is_ok(),
        _ => false,
    }
}
