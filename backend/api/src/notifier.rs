//! Outbound email, sent off the request and payment write paths.
//!
//! The ledger hands a [`DonationCompleted`] to a bounded queue after its
//! transaction commits, and the volunteer endpoints queue application
//! emails the same way. A background task drains the queue, renders the
//! matching template and sends it. Nothing here can fail or delay a ledger
//! transition.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use sqlx::SqlitePool;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::EmailConfig;
use crate::db;
use crate::errors::{AppError, Result};
use crate::models::{timestamp, ApplicationRecord, DonationRecord};
use crate::money::from_cents;

pub const CONFIRMATION_TEMPLATE: &str = "donation_confirmation";

/// Emitted once per donation, after it commits as `completed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DonationCompleted {
    pub donation_id: String,
}

/// Emails about a volunteer application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolunteerEmail {
    Received,
    Approved,
}

impl VolunteerEmail {
    pub fn template_type(&self) -> &'static str {
        match self {
            Self::Received => "volunteer_application_received",
            Self::Approved => "volunteer_application_approved",
        }
    }
}

/// One queued message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    DonationCompleted(DonationCompleted),
    VolunteerApplication {
        application_id: String,
        email: VolunteerEmail,
    },
}

impl Notification {
    /// `(reference_type, reference_id)` as recorded in `email_logs`.
    pub fn reference(&self) -> (&'static str, &str) {
        match self {
            Self::DonationCompleted(m) => ("donation", &m.donation_id),
            Self::VolunteerApplication { application_id, .. } => {
                ("volunteer_application", application_id)
            }
        }
    }
}

impl From<DonationCompleted> for Notification {
    fn from(message: DonationCompleted) -> Self {
        Self::DonationCompleted(message)
    }
}

/// Sending half of the outbound queue.
#[derive(Clone)]
pub struct NotificationQueue {
    tx: mpsc::Sender<Notification>,
}

impl NotificationQueue {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Never blocks; a full or closed queue drops the message with a warning.
    pub fn enqueue(&self, message: impl Into<Notification>) {
        if let Err(e) = self.tx.try_send(message.into()) {
            let (reason, message) = match e {
                mpsc::error::TrySendError::Full(m) => ("queue full", m),
                mpsc::error::TrySendError::Closed(m) => ("queue closed", m),
            };
            let (reference_type, reference_id) = message.reference();
            warn!(
                reference_type,
                reference_id,
                "Notification not queued ({reason}); needs manual follow-up"
            );
        }
    }
}

// ─────────────────────────────────────────────────────────
// Transport
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct EmailMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[async_trait]
pub trait EmailTransport: Send + Sync {
    /// Short provider name recorded in `email_logs`.
    fn name(&self) -> &'static str;

    async fn send(&self, message: &EmailMessage) -> Result<()>;
}

/// JSON email API (`POST {url}` with a bearer key).
pub struct HttpEmailTransport {
    client: Client,
    url: String,
    api_key: String,
}

impl HttpEmailTransport {
    pub fn new(client: Client, url: String, api_key: String) -> Self {
        Self {
            client,
            url,
            api_key,
        }
    }
}

#[async_trait]
impl EmailTransport for HttpEmailTransport {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn send(&self, message: &EmailMessage) -> Result<()> {
        let resp = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(message)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let detail = resp.text().await.unwrap_or_default();
            return Err(AppError::Provider(format!("email API {status}: {detail}")));
        }
        Ok(())
    }
}

/// Writes messages to the log instead of delivering them.
pub struct LogTransport;

#[async_trait]
impl EmailTransport for LogTransport {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send(&self, message: &EmailMessage) -> Result<()> {
        info!(to = %message.to, subject = %message.subject, "Email (log transport)");
        Ok(())
    }
}

pub fn transport_from_config(client: Client, config: &EmailConfig) -> Arc<dyn EmailTransport> {
    match (&config.api_url, &config.api_key) {
        (Some(url), Some(key)) => Arc::new(HttpEmailTransport::new(client, url.clone(), key.clone())),
        _ => {
            warn!("EMAIL_API_URL/EMAIL_API_KEY not set; confirmations will only be logged");
            Arc::new(LogTransport)
        }
    }
}

// ─────────────────────────────────────────────────────────
// Worker
// ─────────────────────────────────────────────────────────

pub struct NotifierState {
    pub pool: SqlitePool,
    pub transport: Arc<dyn EmailTransport>,
    pub from: String,
    pub timeout: Duration,
}

/// Drain the queue until it closes or `shutdown` fires. On shutdown the
/// queue is closed to new messages and whatever it already holds is still
/// delivered.
pub async fn run(
    state: Arc<NotifierState>,
    mut rx: mpsc::Receiver<Notification>,
    shutdown: CancellationToken,
) {
    info!("Notifier starting with {} transport", state.transport.name());

    loop {
        let message = tokio::select! {
            _ = shutdown.cancelled() => break,
            message = rx.recv() => match message {
                Some(m) => m,
                None => break,
            },
        };
        handle(&state, &message).await;
    }

    rx.close();
    let mut flushed = 0usize;
    while let Some(message) = rx.recv().await {
        let (reference_type, reference_id) = message.reference();
        info!(reference_type, reference_id, "Delivering notification queued before shutdown");
        handle(&state, &message).await;
        flushed += 1;
    }

    info!(flushed, "Notifier stopped");
}

async fn handle(state: &NotifierState, message: &Notification) {
    if let Err(e) = dispatch(state, message).await {
        let (reference_type, reference_id) = message.reference();
        error!(reference_type, reference_id, "Notification delivery error: {e}");
    }
}

pub async fn dispatch(state: &NotifierState, message: &Notification) -> Result<()> {
    match message {
        Notification::DonationCompleted(m) => deliver(state, m).await,
        Notification::VolunteerApplication {
            application_id,
            email,
        } => deliver_volunteer_email(state, application_id, *email).await,
    }
}

/// Issue the receipt and send one confirmation. Send failures are recorded
/// in `email_logs` and are not errors; only storage failures are.
pub async fn deliver(state: &NotifierState, message: &DonationCompleted) -> Result<()> {
    let Some(donation) = db::get_donation(&state.pool, &message.donation_id).await? else {
        warn!(donation_id = %message.donation_id, "Completed donation vanished before confirmation");
        return Ok(());
    };

    let receipt_number = db::issue_receipt(
        &state.pool,
        &donation.id,
        &receipt_number(&donation.id, chrono::Utc::now()),
    )
    .await?;

    let sent = send_templated(
        state,
        Outgoing {
            template_type: CONFIRMATION_TEMPLATE,
            to: &donation.donor_email,
            name: &donation.donor_name,
            context: confirmation_context(&donation, &receipt_number),
            reference_type: "donation",
            reference_id: &donation.id,
        },
    )
    .await?;

    if sent {
        info!(donation_id = %donation.id, receipt = %receipt_number, "Confirmation sent");
    }
    Ok(())
}

async fn deliver_volunteer_email(
    state: &NotifierState,
    application_id: &str,
    email: VolunteerEmail,
) -> Result<()> {
    let Some(application) = db::get_application(&state.pool, application_id).await? else {
        warn!(%application_id, "Volunteer application vanished before {}", email.template_type());
        return Ok(());
    };

    let name = application.full_name();
    send_templated(
        state,
        Outgoing {
            template_type: email.template_type(),
            to: &application.email,
            name: &name,
            context: volunteer_context(&application),
            reference_type: "volunteer_application",
            reference_id: &application.id,
        },
    )
    .await?;
    Ok(())
}

struct Outgoing<'a> {
    template_type: &'static str,
    to: &'a str,
    name: &'a str,
    context: HashMap<&'static str, String>,
    reference_type: &'static str,
    reference_id: &'a str,
}

/// Render `template_type` for one recipient, send it within the configured
/// timeout and log the attempt. `Ok(false)` when the template is missing,
/// inactive or the send failed.
async fn send_templated(state: &NotifierState, out: Outgoing<'_>) -> Result<bool> {
    let Some(template) = db::get_active_template(&state.pool, out.template_type).await? else {
        warn!("Email template '{}' not found or is inactive", out.template_type);
        return Ok(false);
    };

    let email = EmailMessage {
        from: state.from.clone(),
        to: out.to.to_string(),
        subject: render(&template.subject, &out.context),
        html: render(&template.html_content, &out.context),
        text: template.text_content.as_deref().map(|t| render(t, &out.context)),
    };

    let outcome = match tokio::time::timeout(state.timeout, state.transport.send(&email)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("timed out after {:?}", state.timeout)),
    };

    if let Err(e) = &outcome {
        warn!(
            reference_type = out.reference_type,
            reference_id = out.reference_id,
            "{} send failed: {e}",
            out.template_type
        );
    }

    db::log_email(
        &state.pool,
        &db::EmailLogEntry {
            recipient_email: out.to,
            recipient_name: Some(out.name),
            subject: &email.subject,
            template_type: out.template_type,
            status: if outcome.is_ok() { "sent" } else { "failed" },
            provider: state.transport.name(),
            error_message: outcome.as_ref().err().map(String::as_str),
            reference_type: out.reference_type,
            reference_id: out.reference_id,
        },
    )
    .await?;
    Ok(outcome.is_ok())
}

/// `JW-{YYYYmmddHHMMSS}-{first 8 chars of the id, uppercased}`
pub fn receipt_number(donation_id: &str, at: chrono::DateTime<chrono::Utc>) -> String {
    let prefix: String = donation_id.chars().take(8).collect();
    format!("JW-{}-{}", at.format("%Y%m%d%H%M%S"), prefix.to_uppercase())
}

fn confirmation_context(donation: &DonationRecord, receipt_number: &str) -> HashMap<&'static str, String> {
    HashMap::from([
        ("donor_name", donation.donor_name.clone()),
        ("donation_amount", from_cents(donation.amount_cents).to_string()),
        ("campaign_title", donation.campaign_title.clone()),
        (
            "donation_date",
            timestamp(donation.created_at).format("%Y-%m-%d %H:%M").to_string(),
        ),
        ("receipt_number", receipt_number.to_string()),
    ])
}

fn volunteer_context(application: &ApplicationRecord) -> HashMap<&'static str, String> {
    HashMap::from([
        ("volunteer_name", application.full_name()),
        ("opportunity_title", application.opportunity_title.clone()),
        (
            "application_date",
            timestamp(application.created_at).format("%Y-%m-%d").to_string(),
        ),
        ("contact_person", application.contact_person.clone()),
        ("contact_email", application.contact_email.clone()),
    ])
}

/// Replace `{{ key }}` / `{{key}}` placeholders; unknown keys are left as-is.
pub fn render(template: &str, context: &HashMap<&'static str, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        let Some(len) = rest[start..].find("}}") else {
            break;
        };
        let key = rest[start + 2..start + len].trim();
        out.push_str(&rest[..start]);
        match context.get(key) {
            Some(value) => out.push_str(value),
            None => out.push_str(&rest[start..start + len + 2]),
        }
        rest = &rest[start + len + 2..];
    }

    out.push_str(rest);
    out
}
