//! Domain types: campaigns, donations and the payment state machine, plus
//! volunteer opportunities and contact messages.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::money::{from_cents, progress_percentage};

/// Lifecycle of a fundraising campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum CampaignStatus {
    Draft,
    Active,
    Paused,
    Completed,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Completed => "completed",
        }
    }

    /// `draft -> active -> (paused <-> active) -> completed`
    pub fn can_transition_to(&self, next: CampaignStatus) -> bool {
        matches!(
            (self, next),
            (Self::Draft, Self::Active)
                | (Self::Active, Self::Paused)
                | (Self::Paused, Self::Active)
                | (Self::Active, Self::Completed)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum PaymentMethod {
    Stripe,
    Paypal,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stripe => "stripe",
            Self::Paypal => "paypal",
        }
    }
}

/// Donation payment status.
///
/// ```text
/// pending --confirmed--------> completed --refund--> refunded
/// pending --failed------------> failed
/// pending --cancelled_by_user-> cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
    Cancelled,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// A provider-reported outcome, normalized across Stripe and PayPal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentEventKind {
    Confirmed,
    Failed,
    CancelledByUser,
}

impl PaymentEventKind {
    /// The status a pending donation moves to on this event.
    pub fn target_status(&self) -> PaymentStatus {
        match self {
            Self::Confirmed => PaymentStatus::Completed,
            Self::Failed => PaymentStatus::Failed,
            Self::CancelledByUser => PaymentStatus::Cancelled,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
            Self::CancelledByUser => "cancelled_by_user",
        }
    }
}

// ─────────────────────────────────────────────────────────
// Stored rows
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CampaignRecord {
    pub id: String,
    pub title: String,
    pub description: String,
    pub short_description: String,
    pub goal_cents: i64,
    pub raised_cents: i64,
    pub image: Option<String>,
    pub status: CampaignStatus,
    pub start_date: i64,
    pub end_date: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DonationRecord {
    pub id: String,
    pub campaign_id: String,
    pub campaign_title: String,
    pub donor_name: String,
    pub donor_email: String,
    pub donor_phone: Option<String>,
    pub amount_cents: i64,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub transaction_id: Option<String>,
    pub payment_intent_id: Option<String>,
    pub paypal_order_id: Option<String>,
    pub is_anonymous: bool,
    pub message: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Fields the creation endpoint supplies; everything else is defaulted.
#[derive(Debug, Clone)]
pub struct NewDonation {
    pub campaign_id: String,
    pub donor_name: String,
    pub donor_email: String,
    pub donor_phone: Option<String>,
    pub amount_cents: i64,
    pub payment_method: PaymentMethod,
    pub is_anonymous: bool,
    pub message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewCampaign {
    pub title: String,
    pub description: String,
    pub short_description: String,
    pub goal_cents: i64,
    pub image: Option<String>,
    pub status: CampaignStatus,
    pub start_date: Option<i64>,
    pub end_date: Option<i64>,
}

// ─────────────────────────────────────────────────────────
// Volunteers
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
pub enum OpportunityType {
    OneTime,
    Ongoing,
    Seasonal,
    Emergency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum OpportunityStatus {
    Active,
    Inactive,
    Full,
    Completed,
}

impl OpportunityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Full => "full",
            Self::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum Availability {
    Weekdays,
    Weekends,
    Evenings,
    Flexible,
}

/// Review state of a volunteer application.
///
/// ```text
/// pending ----> approved | rejected | waitlisted
/// waitlisted -> approved | rejected
/// pending | waitlisted | approved -> withdrawn
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum ApplicationStatus {
    Pending,
    Approved,
    Rejected,
    Waitlisted,
    Withdrawn,
}

impl ApplicationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Waitlisted => "waitlisted",
            Self::Withdrawn => "withdrawn",
        }
    }

    pub fn can_transition_to(&self, next: ApplicationStatus) -> bool {
        use ApplicationStatus::*;
        matches!(
            (self, next),
            (Pending, Approved | Rejected | Waitlisted)
                | (Waitlisted, Approved | Rejected)
                | (Pending | Waitlisted | Approved, Withdrawn)
        )
    }

    /// Whether an application in this status holds one of the opportunity's places.
    pub fn holds_place(&self) -> bool {
        matches!(self, Self::Pending | Self::Approved | Self::Waitlisted)
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OpportunityRecord {
    pub id: String,
    pub title: String,
    pub description: String,
    pub short_description: String,
    pub opportunity_type: OpportunityType,
    pub location: String,
    pub skills_required: String,
    pub time_commitment: String,
    pub max_volunteers: i64,
    pub current_volunteers: i64,
    pub start_date: i64,
    pub end_date: Option<i64>,
    pub contact_person: String,
    pub contact_email: String,
    pub contact_phone: String,
    pub status: OpportunityStatus,
    pub image: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone)]
pub struct NewOpportunity {
    pub title: String,
    pub description: String,
    pub short_description: String,
    pub opportunity_type: OpportunityType,
    pub location: String,
    pub skills_required: String,
    pub time_commitment: String,
    pub max_volunteers: i64,
    pub start_date: i64,
    pub end_date: Option<i64>,
    pub contact_person: String,
    pub contact_email: String,
    pub contact_phone: String,
    pub image: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ApplicationRecord {
    pub id: String,
    pub opportunity_id: String,
    pub opportunity_title: String,
    pub contact_person: String,
    pub contact_email: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub date_of_birth: String,
    pub address: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
    pub availability: Availability,
    pub previous_volunteer_experience: Option<String>,
    pub skills_and_interests: String,
    pub why_volunteer: String,
    pub emergency_contact_name: String,
    pub emergency_contact_phone: String,
    pub emergency_contact_relationship: String,
    pub background_check_consent: bool,
    pub status: ApplicationStatus,
    pub notes: Option<String>,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ApplicationRecord {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone)]
pub struct NewApplication {
    pub opportunity_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub date_of_birth: String,
    pub address: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
    pub availability: Availability,
    pub previous_volunteer_experience: Option<String>,
    pub skills_and_interests: String,
    pub why_volunteer: String,
    pub emergency_contact_name: String,
    pub emergency_contact_phone: String,
    pub emergency_contact_relationship: String,
    pub background_check_consent: bool,
}

// ─────────────────────────────────────────────────────────
// Contact messages
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum ContactMessageType {
    General,
    Donation,
    Volunteer,
    Partnership,
    Media,
    Complaint,
    Other,
}

/// `new -> in_progress -> resolved -> closed`; any open message may be closed
/// or resolved directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
pub enum ContactStatus {
    New,
    InProgress,
    Resolved,
    Closed,
}

impl ContactStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::InProgress => "in_progress",
            Self::Resolved => "resolved",
            Self::Closed => "closed",
        }
    }

    pub fn can_transition_to(&self, next: ContactStatus) -> bool {
        use ContactStatus::*;
        matches!(
            (self, next),
            (New, InProgress | Resolved | Closed) | (InProgress, Resolved | Closed) | (Resolved, Closed)
        )
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ContactMessageRecord {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub subject: String,
    pub message: String,
    pub message_type: ContactMessageType,
    pub status: ContactStatus,
    pub response_message: Option<String>,
    pub responded_by: Option<String>,
    pub responded_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone)]
pub struct NewContactMessage {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub subject: String,
    pub message: String,
    pub message_type: ContactMessageType,
}

// ─────────────────────────────────────────────────────────
// API views
// ─────────────────────────────────────────────────────────

pub fn timestamp(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

#[derive(Debug, Clone, Serialize)]
pub struct Campaign {
    pub id: String,
    pub title: String,
    pub description: String,
    pub short_description: String,
    pub goal_amount: Decimal,
    pub raised_amount: Decimal,
    pub image: Option<String>,
    pub status: CampaignStatus,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub progress_percentage: Decimal,
    pub is_completed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<CampaignRecord> for Campaign {
    fn from(r: CampaignRecord) -> Self {
        Campaign {
            progress_percentage: progress_percentage(r.raised_cents, r.goal_cents),
            is_completed: r.raised_cents >= r.goal_cents,
            goal_amount: from_cents(r.goal_cents),
            raised_amount: from_cents(r.raised_cents),
            start_date: timestamp(r.start_date),
            end_date: r.end_date.map(timestamp),
            created_at: timestamp(r.created_at),
            updated_at: timestamp(r.updated_at),
            id: r.id,
            title: r.title,
            description: r.description,
            short_description: r.short_description,
            image: r.image,
            status: r.status,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Donation {
    pub id: String,
    pub campaign: String,
    pub campaign_title: String,
    pub donor_name: String,
    pub donor_email: String,
    pub donor_phone: Option<String>,
    pub amount: Decimal,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub transaction_id: Option<String>,
    pub payment_intent_id: Option<String>,
    pub paypal_order_id: Option<String>,
    pub is_anonymous: bool,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<DonationRecord> for Donation {
    fn from(r: DonationRecord) -> Self {
        Donation {
            amount: from_cents(r.amount_cents),
            created_at: timestamp(r.created_at),
            updated_at: timestamp(r.updated_at),
            id: r.id,
            campaign: r.campaign_id,
            campaign_title: r.campaign_title,
            donor_name: r.donor_name,
            donor_email: r.donor_email,
            donor_phone: r.donor_phone,
            payment_method: r.payment_method,
            payment_status: r.payment_status,
            transaction_id: r.transaction_id,
            payment_intent_id: r.payment_intent_id,
            paypal_order_id: r.paypal_order_id,
            is_anonymous: r.is_anonymous,
            message: r.message,
        }
    }
}

/// What a campaign page shows about its supporters.
#[derive(Debug, Clone, Serialize)]
pub struct PublicDonation {
    pub id: String,
    pub donor_name: String,
    pub amount: Decimal,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<DonationRecord> for PublicDonation {
    fn from(r: DonationRecord) -> Self {
        PublicDonation {
            amount: from_cents(r.amount_cents),
            created_at: timestamp(r.created_at),
            id: r.id,
            donor_name: r.donor_name,
            message: r.message,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DonationStats {
    pub total_donations: Decimal,
    pub total_donors: i64,
    pub average_donation: Decimal,
    /// Oldest month first.
    pub monthly_donations: Vec<Decimal>,
    pub recent_donations: Vec<Donation>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VolunteerOpportunity {
    pub id: String,
    pub title: String,
    pub description: String,
    pub short_description: String,
    pub opportunity_type: OpportunityType,
    pub location: String,
    pub skills_required: String,
    pub time_commitment: String,
    pub max_volunteers: i64,
    pub current_volunteers: i64,
    pub spots_remaining: i64,
    pub is_full: bool,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub contact_person: String,
    pub contact_email: String,
    pub contact_phone: String,
    pub status: OpportunityStatus,
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<OpportunityRecord> for VolunteerOpportunity {
    fn from(r: OpportunityRecord) -> Self {
        VolunteerOpportunity {
            spots_remaining: (r.max_volunteers - r.current_volunteers).max(0),
            is_full: r.current_volunteers >= r.max_volunteers,
            start_date: timestamp(r.start_date),
            end_date: r.end_date.map(timestamp),
            created_at: timestamp(r.created_at),
            updated_at: timestamp(r.updated_at),
            id: r.id,
            title: r.title,
            description: r.description,
            short_description: r.short_description,
            opportunity_type: r.opportunity_type,
            location: r.location,
            skills_required: r.skills_required,
            time_commitment: r.time_commitment,
            max_volunteers: r.max_volunteers,
            current_volunteers: r.current_volunteers,
            contact_person: r.contact_person,
            contact_email: r.contact_email,
            contact_phone: r.contact_phone,
            status: r.status,
            image: r.image,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VolunteerApplication {
    pub id: String,
    pub opportunity: String,
    pub opportunity_title: String,
    pub first_name: String,
    pub last_name: String,
    pub full_name: String,
    pub email: String,
    pub phone: String,
    pub date_of_birth: String,
    pub address: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
    pub availability: Availability,
    pub previous_volunteer_experience: Option<String>,
    pub skills_and_interests: String,
    pub why_volunteer: String,
    pub emergency_contact_name: String,
    pub emergency_contact_phone: String,
    pub emergency_contact_relationship: String,
    pub background_check_consent: bool,
    pub status: ApplicationStatus,
    pub notes: Option<String>,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ApplicationRecord> for VolunteerApplication {
    fn from(r: ApplicationRecord) -> Self {
        VolunteerApplication {
            full_name: r.full_name(),
            reviewed_at: r.reviewed_at.map(timestamp),
            created_at: timestamp(r.created_at),
            updated_at: timestamp(r.updated_at),
            id: r.id,
            opportunity: r.opportunity_id,
            opportunity_title: r.opportunity_title,
            first_name: r.first_name,
            last_name: r.last_name,
            email: r.email,
            phone: r.phone,
            date_of_birth: r.date_of_birth,
            address: r.address,
            city: r.city,
            state: r.state,
            zip_code: r.zip_code,
            availability: r.availability,
            previous_volunteer_experience: r.previous_volunteer_experience,
            skills_and_interests: r.skills_and_interests,
            why_volunteer: r.why_volunteer,
            emergency_contact_name: r.emergency_contact_name,
            emergency_contact_phone: r.emergency_contact_phone,
            emergency_contact_relationship: r.emergency_contact_relationship,
            background_check_consent: r.background_check_consent,
            status: r.status,
            notes: r.notes,
            reviewed_by: r.reviewed_by,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VolunteerStats {
    pub total_volunteers: i64,
    pub active_opportunities: i64,
    pub total_hours_logged: Decimal,
    pub recent_applications: Vec<VolunteerApplication>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContactMessage {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub full_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub subject: String,
    pub message: String,
    pub message_type: ContactMessageType,
    pub status: ContactStatus,
    pub response_message: Option<String>,
    pub responded_by: Option<String>,
    pub responded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ContactMessageRecord> for ContactMessage {
    fn from(r: ContactMessageRecord) -> Self {
        ContactMessage {
            full_name: format!("{} {}", r.first_name, r.last_name),
            responded_at: r.responded_at.map(timestamp),
            created_at: timestamp(r.created_at),
            updated_at: timestamp(r.updated_at),
            id: r.id,
            first_name: r.first_name,
            last_name: r.last_name,
            email: r.email,
            phone: r.phone,
            subject: r.subject,
            message: r.message,
            message_type: r.message_type,
            status: r.status,
            response_message: r.response_message,
            responded_by: r.responded_by,
        }
    }
}
