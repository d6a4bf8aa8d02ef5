//! Database layer: migrations, queries, and the ledger write primitives.
//!
//! Everything that touches `payment_status` or `raised_cents` is a single
//! conditional or additive `UPDATE`, so the guard and the arithmetic both run
//! inside SQLite rather than on values read earlier by the application.

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::info;
use uuid::Uuid;

use crate::errors::{AppError, Result};
use crate::models::{
    ApplicationRecord, ApplicationStatus, CampaignRecord, CampaignStatus, ContactMessageRecord,
    ContactStatus, DonationRecord, NewApplication, NewCampaign, NewContactMessage, NewDonation,
    NewOpportunity, OpportunityRecord, OpportunityStatus, PaymentStatus,
};

/// Establish a SQLite connection pool and run pending migrations.
///
/// `busy_timeout` bounds how long a writer waits on another connection's
/// lock before SQLite reports `SQLITE_BUSY`.
pub async fn init_pool(database_url: &str, busy_timeout: Duration) -> Result<SqlitePool> {
    let url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite:{database_url}")
    };

    let options = SqliteConnectOptions::from_str(&url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(busy_timeout)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database migrations applied successfully");
    Ok(pool)
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

// ─────────────────────────────────────────────────────────
// Campaigns
// ─────────────────────────────────────────────────────────

const CAMPAIGN_COLUMNS: &str = r#"
    id, title, description, short_description, goal_cents, raised_cents,
    image, status, start_date, end_date, created_at, updated_at
"#;

pub async fn insert_campaign(pool: &SqlitePool, new: &NewCampaign) -> Result<CampaignRecord> {
    let id = Uuid::new_v4().to_string();
    let ts = now();
    let sql = format!(
        r#"
        INSERT INTO campaigns
            (id, title, description, short_description, goal_cents, raised_cents,
             image, status, start_date, end_date, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7, ?8, ?9, ?10, ?10)
        RETURNING {CAMPAIGN_COLUMNS}
        "#
    );
    let row = sqlx::query_as::<_, CampaignRecord>(&sql)
        .bind(&id)
        .bind(&new.title)
        .bind(&new.description)
        .bind(&new.short_description)
        .bind(new.goal_cents)
        .bind(&new.image)
        .bind(new.status)
        .bind(new.start_date.unwrap_or(ts))
        .bind(new.end_date)
        .bind(ts)
        .fetch_one(pool)
        .await?;
    Ok(row)
}

pub async fn get_campaign(pool: &SqlitePool, id: &str) -> Result<Option<CampaignRecord>> {
    let sql = format!("SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE id = ?1");
    let row = sqlx::query_as::<_, CampaignRecord>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

/// Active campaigns newest first; completed ones by end date.
pub async fn list_campaigns(
    pool: &SqlitePool,
    status: CampaignStatus,
) -> Result<Vec<CampaignRecord>> {
    let order = match status {
        CampaignStatus::Completed => "end_date DESC, created_at DESC",
        _ => "created_at DESC",
    };
    let sql = format!("SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE status = ?1 ORDER BY {order}");
    let rows = sqlx::query_as::<_, CampaignRecord>(&sql)
        .bind(status)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// Move a campaign from `from` to `to`. Returns `false` when the stored
/// status was no longer `from`.
pub async fn update_campaign_status(
    pool: &SqlitePool,
    id: &str,
    from: CampaignStatus,
    to: CampaignStatus,
) -> Result<bool> {
    let ts = now();
    let stamp_end = to == CampaignStatus::Completed;
    let rows = sqlx::query(
        r#"
        UPDATE campaigns
        SET    status = ?1,
               end_date = CASE WHEN ?2 AND end_date IS NULL THEN ?3 ELSE end_date END,
               updated_at = ?3
        WHERE  id = ?4 AND status = ?5
        "#,
    )
    .bind(to)
    .bind(stamp_end)
    .bind(ts)
    .bind(id)
    .bind(from)
    .execute(pool)
    .await?
    .rows_affected();
    Ok(rows == 1)
}

/// Atomic `raised_cents += delta`.
pub async fn credit_campaign(
    conn: &mut SqliteConnection,
    campaign_id: &str,
    delta_cents: i64,
) -> Result<()> {
    adjust_campaign_raised(conn, campaign_id, delta_cents).await
}

/// Atomic `raised_cents -= delta`.
pub async fn debit_campaign(
    conn: &mut SqliteConnection,
    campaign_id: &str,
    delta_cents: i64,
) -> Result<()> {
    adjust_campaign_raised(conn, campaign_id, -delta_cents).await
}

async fn adjust_campaign_raised(
    conn: &mut SqliteConnection,
    campaign_id: &str,
    delta_cents: i64,
) -> Result<()> {
    let rows = sqlx::query(
        "UPDATE campaigns SET raised_cents = raised_cents + ?1, updated_at = ?2 WHERE id = ?3",
    )
    .bind(delta_cents)
    .bind(now())
    .bind(campaign_id)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    if rows == 0 {
        return Err(AppError::NotFound(format!("campaign {campaign_id}")));
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────
// Donations
// ─────────────────────────────────────────────────────────

const DONATION_SELECT: &str = r#"
    SELECT d.id, d.campaign_id, c.title AS campaign_title, d.donor_name, d.donor_email,
           d.donor_phone, d.amount_cents, d.payment_method, d.payment_status,
           d.transaction_id, d.payment_intent_id, d.paypal_order_id, d.is_anonymous,
           d.message, d.created_at, d.updated_at
    FROM   donations d
    JOIN   campaigns c ON c.id = d.campaign_id
"#;

pub async fn insert_donation(pool: &SqlitePool, new: &NewDonation) -> Result<DonationRecord> {
    let id = Uuid::new_v4().to_string();
    let ts = now();
    sqlx::query(
        r#"
        INSERT INTO donations
            (id, campaign_id, donor_name, donor_email, donor_phone, amount_cents,
             payment_method, payment_status, is_anonymous, message, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending', ?8, ?9, ?10, ?10)
        "#,
    )
    .bind(&id)
    .bind(&new.campaign_id)
    .bind(&new.donor_name)
    .bind(&new.donor_email)
    .bind(&new.donor_phone)
    .bind(new.amount_cents)
    .bind(new.payment_method)
    .bind(new.is_anonymous)
    .bind(&new.message)
    .bind(ts)
    .execute(pool)
    .await?;

    get_donation(pool, &id)
        .await?
        .ok_or_else(|| AppError::from(sqlx::Error::RowNotFound))
}

pub async fn get_donation(pool: &SqlitePool, id: &str) -> Result<Option<DonationRecord>> {
    let sql = format!("{DONATION_SELECT} WHERE d.id = ?1");
    let row = sqlx::query_as::<_, DonationRecord>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

/// Latest completed, non-anonymous donations for a campaign page.
pub async fn list_public_donations(
    pool: &SqlitePool,
    campaign_id: &str,
    limit: i64,
) -> Result<Vec<DonationRecord>> {
    let sql = format!(
        r#"{DONATION_SELECT}
        WHERE  d.campaign_id = ?1 AND d.is_anonymous = 0 AND d.payment_status = 'completed'
        ORDER  BY d.created_at DESC, d.id DESC
        LIMIT  ?2"#
    );
    let rows = sqlx::query_as::<_, DonationRecord>(&sql)
        .bind(campaign_id)
        .bind(limit)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// Provider correlation ids are written once.
pub async fn set_payment_intent_id(pool: &SqlitePool, id: &str, intent_id: &str) -> Result<bool> {
    let rows = sqlx::query(
        r#"
        UPDATE donations SET payment_intent_id = ?1, updated_at = ?2
        WHERE  id = ?3 AND payment_intent_id IS NULL
        "#,
    )
    .bind(intent_id)
    .bind(now())
    .bind(id)
    .execute(pool)
    .await?
    .rows_affected();
    Ok(rows == 1)
}

pub async fn set_paypal_order_id(pool: &SqlitePool, id: &str, order_id: &str) -> Result<bool> {
    let rows = sqlx::query(
        r#"
        UPDATE donations SET paypal_order_id = ?1, updated_at = ?2
        WHERE  id = ?3 AND paypal_order_id IS NULL
        "#,
    )
    .bind(order_id)
    .bind(now())
    .bind(id)
    .execute(pool)
    .await?
    .rows_affected();
    Ok(rows == 1)
}

/// The part of a donation the ledger needs after a status change.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TransitionedDonation {
    pub campaign_id: String,
    pub amount_cents: i64,
}

/// Compare-and-set on `payment_status`.
///
/// Only a row still in `expected` is changed, so of any number of concurrent
/// callers exactly one gets `Some`. `transaction_ref`, when given, fills
/// `transaction_id` only if it is still empty.
pub async fn transition_donation_status(
    conn: &mut SqliteConnection,
    id: &str,
    expected: PaymentStatus,
    next: PaymentStatus,
    transaction_ref: Option<&str>,
) -> Result<Option<TransitionedDonation>> {
    let row = sqlx::query_as::<_, TransitionedDonation>(
        r#"
        UPDATE donations
        SET    payment_status = ?1,
               transaction_id = COALESCE(transaction_id, ?2),
               updated_at = ?3
        WHERE  id = ?4 AND payment_status = ?5
        RETURNING campaign_id, amount_cents
        "#,
    )
    .bind(next)
    .bind(transaction_ref)
    .bind(now())
    .bind(id)
    .bind(expected)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row)
}

// ─────────────────────────────────────────────────────────
// Payment event audit
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PaymentEventRecord {
    pub event_kind: String,
    pub provider_reference: Option<String>,
    pub outcome: String,
    pub received_at: i64,
}

pub async fn record_payment_event(
    conn: &mut SqliteConnection,
    donation_id: &str,
    event_kind: &str,
    provider_reference: Option<&str>,
    outcome: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO payment_events (donation_id, event_kind, provider_reference, outcome, received_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
    )
    .bind(donation_id)
    .bind(event_kind)
    .bind(provider_reference)
    .bind(outcome)
    .bind(now())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn get_payment_events(
    pool: &SqlitePool,
    donation_id: &str,
) -> Result<Vec<PaymentEventRecord>> {
    let rows = sqlx::query_as::<_, PaymentEventRecord>(
        r#"
        SELECT event_kind, provider_reference, outcome, received_at
        FROM   payment_events
        WHERE  donation_id = ?1
        ORDER  BY id ASC
        "#,
    )
    .bind(donation_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

// ─────────────────────────────────────────────────────────
// Statistics
// ─────────────────────────────────────────────────────────

/// `(sum_cents, distinct_donors, count)` over completed donations.
pub async fn completed_totals(pool: &SqlitePool) -> Result<(i64, i64, i64)> {
    let row: (i64, i64, i64) = sqlx::query_as(
        r#"
        SELECT COALESCE(SUM(amount_cents), 0), COUNT(DISTINCT donor_email), COUNT(*)
        FROM   donations
        WHERE  payment_status = 'completed'
        "#,
    )
    .fetch_one(pool)
    .await?;
    Ok(row)
}

/// Completed totals per `YYYY-MM` for donations created at or after `since`.
pub async fn monthly_completed_totals(pool: &SqlitePool, since: i64) -> Result<Vec<(String, i64)>> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        r#"
        SELECT strftime('%Y-%m', created_at, 'unixepoch') AS month, SUM(amount_cents)
        FROM   donations
        WHERE  payment_status = 'completed' AND created_at >= ?1
        GROUP  BY month
        "#,
    )
    .bind(since)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn recent_completed_donations(pool: &SqlitePool, limit: i64) -> Result<Vec<DonationRecord>> {
    let sql = format!(
        r#"{DONATION_SELECT}
        WHERE  d.payment_status = 'completed'
        ORDER  BY d.created_at DESC, d.id DESC
        LIMIT  ?1"#
    );
    let rows = sqlx::query_as::<_, DonationRecord>(&sql)
        .bind(limit)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

// ─────────────────────────────────────────────────────────
// Volunteer opportunities and applications
// ─────────────────────────────────────────────────────────

const OPPORTUNITY_COLUMNS: &str = r#"
    id, title, description, short_description, opportunity_type, location,
    skills_required, time_commitment, max_volunteers, current_volunteers,
    start_date, end_date, contact_person, contact_email, contact_phone,
    status, image, created_at, updated_at
"#;

pub async fn insert_opportunity(pool: &SqlitePool, new: &NewOpportunity) -> Result<OpportunityRecord> {
    let ts = now();
    let sql = format!(
        r#"
        INSERT INTO volunteer_opportunities
            (id, title, description, short_description, opportunity_type, location,
             skills_required, time_commitment, max_volunteers, current_volunteers,
             start_date, end_date, contact_person, contact_email, contact_phone,
             status, image, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0, ?10, ?11, ?12, ?13, ?14,
                'active', ?15, ?16, ?16)
        RETURNING {OPPORTUNITY_COLUMNS}
        "#
    );
    let row = sqlx::query_as::<_, OpportunityRecord>(&sql)
        .bind(Uuid::new_v4().to_string())
        .bind(&new.title)
        .bind(&new.description)
        .bind(&new.short_description)
        .bind(new.opportunity_type)
        .bind(&new.location)
        .bind(&new.skills_required)
        .bind(&new.time_commitment)
        .bind(new.max_volunteers)
        .bind(new.start_date)
        .bind(new.end_date)
        .bind(&new.contact_person)
        .bind(&new.contact_email)
        .bind(&new.contact_phone)
        .bind(&new.image)
        .bind(ts)
        .fetch_one(pool)
        .await?;
    Ok(row)
}

pub async fn get_opportunity(pool: &SqlitePool, id: &str) -> Result<Option<OpportunityRecord>> {
    let sql = format!("SELECT {OPPORTUNITY_COLUMNS} FROM volunteer_opportunities WHERE id = ?1");
    let row = sqlx::query_as::<_, OpportunityRecord>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

/// Active opportunities by start date; completed ones by end date.
pub async fn list_opportunities(
    pool: &SqlitePool,
    status: OpportunityStatus,
) -> Result<Vec<OpportunityRecord>> {
    let order = match status {
        OpportunityStatus::Completed => "end_date DESC, created_at DESC",
        _ => "start_date DESC, created_at DESC",
    };
    let sql = format!(
        "SELECT {OPPORTUNITY_COLUMNS} FROM volunteer_opportunities WHERE status = ?1 ORDER BY {order}"
    );
    let rows = sqlx::query_as::<_, OpportunityRecord>(&sql)
        .bind(status)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// Returns `false` when no such opportunity exists.
pub async fn set_opportunity_status(
    pool: &SqlitePool,
    id: &str,
    status: OpportunityStatus,
) -> Result<bool> {
    let ts = now();
    let stamp_end = status == OpportunityStatus::Completed;
    let rows = sqlx::query(
        r#"
        UPDATE volunteer_opportunities
        SET    status = ?1,
               end_date = CASE WHEN ?2 AND end_date IS NULL THEN ?3 ELSE end_date END,
               updated_at = ?3
        WHERE  id = ?4
        "#,
    )
    .bind(status)
    .bind(stamp_end)
    .bind(ts)
    .bind(id)
    .execute(pool)
    .await?
    .rows_affected();
    Ok(rows == 1)
}

const APPLICATION_SELECT: &str = r#"
    SELECT a.id, a.opportunity_id, o.title AS opportunity_title, o.contact_person,
           o.contact_email, a.first_name, a.last_name, a.email, a.phone, a.date_of_birth,
           a.address, a.city, a.state, a.zip_code, a.availability,
           a.previous_volunteer_experience, a.skills_and_interests, a.why_volunteer,
           a.emergency_contact_name, a.emergency_contact_phone,
           a.emergency_contact_relationship, a.background_check_consent, a.status, a.notes,
           a.reviewed_by, a.reviewed_at, a.created_at, a.updated_at
    FROM   volunteer_applications a
    JOIN   volunteer_opportunities o ON o.id = a.opportunity_id
"#;

/// Take one place on an active opportunity and record the application, in
/// one transaction.
///
/// The place is claimed with a guarded `UPDATE`, so concurrent applicants
/// can never push `current_volunteers` past `max_volunteers`.
pub async fn create_application(pool: &SqlitePool, new: &NewApplication) -> Result<ApplicationRecord> {
    let id = Uuid::new_v4().to_string();
    let ts = now();
    let mut tx = pool.begin().await?;

    let claimed = sqlx::query(
        r#"
        UPDATE volunteer_opportunities
        SET    current_volunteers = current_volunteers + 1, updated_at = ?1
        WHERE  id = ?2 AND status = 'active' AND current_volunteers < max_volunteers
        "#,
    )
    .bind(ts)
    .bind(&new.opportunity_id)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if claimed == 0 {
        tx.rollback().await?;
        let opportunity = get_opportunity(pool, &new.opportunity_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("opportunity {}", new.opportunity_id)))?;
        return Err(AppError::Conflict(if opportunity.status == OpportunityStatus::Active {
            format!("opportunity {} is full", opportunity.id)
        } else {
            format!(
                "opportunity {} is {} and not accepting applications",
                opportunity.id,
                opportunity.status.as_str()
            )
        }));
    }

    let inserted = sqlx::query(
        r#"
        INSERT INTO volunteer_applications
            (id, opportunity_id, first_name, last_name, email, phone, date_of_birth,
             address, city, state, zip_code, availability, previous_volunteer_experience,
             skills_and_interests, why_volunteer, emergency_contact_name,
             emergency_contact_phone, emergency_contact_relationship,
             background_check_consent, status, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                ?17, ?18, ?19, 'pending', ?20, ?20)
        "#,
    )
    .bind(&id)
    .bind(&new.opportunity_id)
    .bind(&new.first_name)
    .bind(&new.last_name)
    .bind(&new.email)
    .bind(&new.phone)
    .bind(&new.date_of_birth)
    .bind(&new.address)
    .bind(&new.city)
    .bind(&new.state)
    .bind(&new.zip_code)
    .bind(new.availability)
    .bind(&new.previous_volunteer_experience)
    .bind(&new.skills_and_interests)
    .bind(&new.why_volunteer)
    .bind(&new.emergency_contact_name)
    .bind(&new.emergency_contact_phone)
    .bind(&new.emergency_contact_relationship)
    .bind(new.background_check_consent)
    .bind(ts)
    .execute(&mut *tx)
    .await;

    match inserted {
        // Dropping `tx` releases the claimed place.
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
            return Err(AppError::Conflict(format!(
                "{} has already applied for this opportunity",
                new.email
            )));
        }
        other => {
            other?;
        }
    }
    tx.commit().await?;

    get_application(pool, &id)
        .await?
        .ok_or_else(|| AppError::from(sqlx::Error::RowNotFound))
}

pub async fn get_application(pool: &SqlitePool, id: &str) -> Result<Option<ApplicationRecord>> {
    let sql = format!("{APPLICATION_SELECT} WHERE a.id = ?1");
    let row = sqlx::query_as::<_, ApplicationRecord>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

/// Newest first, optionally narrowed to one review status.
pub async fn list_applications(
    pool: &SqlitePool,
    status: Option<ApplicationStatus>,
    limit: i64,
) -> Result<Vec<ApplicationRecord>> {
    let sql = format!(
        r#"{APPLICATION_SELECT}
        WHERE  (?1 IS NULL OR a.status = ?1)
        ORDER  BY a.created_at DESC, a.id DESC
        LIMIT  ?2"#
    );
    let rows = sqlx::query_as::<_, ApplicationRecord>(&sql)
        .bind(status)
        .bind(limit)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// Compare-and-set on the application status. A move out of a status that
/// holds a place gives that place back to the opportunity.
pub async fn review_application(
    pool: &SqlitePool,
    id: &str,
    from: ApplicationStatus,
    to: ApplicationStatus,
    notes: Option<&str>,
    reviewed_by: Option<&str>,
) -> Result<bool> {
    let ts = now();
    let mut tx = pool.begin().await?;

    let moved: Option<(String,)> = sqlx::query_as(
        r#"
        UPDATE volunteer_applications
        SET    status = ?1,
               notes = COALESCE(?2, notes),
               reviewed_by = COALESCE(?3, reviewed_by),
               reviewed_at = ?4,
               updated_at = ?4
        WHERE  id = ?5 AND status = ?6
        RETURNING opportunity_id
        "#,
    )
    .bind(to)
    .bind(notes)
    .bind(reviewed_by)
    .bind(ts)
    .bind(id)
    .bind(from)
    .fetch_optional(&mut *tx)
    .await?;

    let Some((opportunity_id,)) = moved else {
        tx.rollback().await?;
        return Ok(false);
    };

    if from.holds_place() && !to.holds_place() {
        sqlx::query(
            r#"
            UPDATE volunteer_opportunities
            SET    current_volunteers = MAX(current_volunteers - 1, 0), updated_at = ?1
            WHERE  id = ?2
            "#,
        )
        .bind(ts)
        .bind(&opportunity_id)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(true)
}

pub async fn log_volunteer_hours(
    pool: &SqlitePool,
    application: &ApplicationRecord,
    work_date: &str,
    hours_hundredths: i64,
    description: &str,
    verified_by: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO volunteer_hours
            (application_id, opportunity_id, work_date, hours_hundredths, description,
             verified_by, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
    )
    .bind(&application.id)
    .bind(&application.opportunity_id)
    .bind(work_date)
    .bind(hours_hundredths)
    .bind(description)
    .bind(verified_by)
    .bind(now())
    .execute(pool)
    .await?;
    Ok(())
}

/// `(approved_volunteers, active_opportunities, hours_hundredths)`
pub async fn volunteer_totals(pool: &SqlitePool) -> Result<(i64, i64, i64)> {
    let row: (i64, i64, i64) = sqlx::query_as(
        r#"
        SELECT (SELECT COUNT(*) FROM volunteer_applications WHERE status = 'approved'),
               (SELECT COUNT(*) FROM volunteer_opportunities WHERE status = 'active'),
               (SELECT COALESCE(SUM(hours_hundredths), 0) FROM volunteer_hours)
        "#,
    )
    .fetch_one(pool)
    .await?;
    Ok(row)
}

// ─────────────────────────────────────────────────────────
// Contact messages
// ─────────────────────────────────────────────────────────

const CONTACT_COLUMNS: &str = r#"
    id, first_name, last_name, email, phone, subject, message, message_type, status,
    response_message, responded_by, responded_at, created_at, updated_at
"#;

pub async fn insert_contact_message(
    pool: &SqlitePool,
    new: &NewContactMessage,
) -> Result<ContactMessageRecord> {
    let sql = format!(
        r#"
        INSERT INTO contact_messages
            (id, first_name, last_name, email, phone, subject, message, message_type,
             status, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'new', ?9, ?9)
        RETURNING {CONTACT_COLUMNS}
        "#
    );
    let row = sqlx::query_as::<_, ContactMessageRecord>(&sql)
        .bind(Uuid::new_v4().to_string())
        .bind(&new.first_name)
        .bind(&new.last_name)
        .bind(&new.email)
        .bind(&new.phone)
        .bind(&new.subject)
        .bind(&new.message)
        .bind(new.message_type)
        .bind(now())
        .fetch_one(pool)
        .await?;
    Ok(row)
}

pub async fn get_contact_message(pool: &SqlitePool, id: &str) -> Result<Option<ContactMessageRecord>> {
    let sql = format!("SELECT {CONTACT_COLUMNS} FROM contact_messages WHERE id = ?1");
    let row = sqlx::query_as::<_, ContactMessageRecord>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

/// Newest first, optionally narrowed to one status.
pub async fn list_contact_messages(
    pool: &SqlitePool,
    status: Option<ContactStatus>,
) -> Result<Vec<ContactMessageRecord>> {
    let sql = format!(
        r#"
        SELECT {CONTACT_COLUMNS} FROM contact_messages
        WHERE  (?1 IS NULL OR status = ?1)
        ORDER  BY created_at DESC, id DESC
        "#
    );
    let rows = sqlx::query_as::<_, ContactMessageRecord>(&sql)
        .bind(status)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// Compare-and-set on the message status; a response, when given, is
/// stamped with who sent it and when.
pub async fn update_contact_message(
    pool: &SqlitePool,
    id: &str,
    from: ContactStatus,
    to: ContactStatus,
    response_message: Option<&str>,
    responded_by: Option<&str>,
) -> Result<bool> {
    let ts = now();
    let rows = sqlx::query(
        r#"
        UPDATE contact_messages
        SET    status = ?1,
               response_message = COALESCE(?2, response_message),
               responded_by = CASE WHEN ?2 IS NULL THEN responded_by ELSE ?3 END,
               responded_at = CASE WHEN ?2 IS NULL THEN responded_at ELSE ?4 END,
               updated_at = ?4
        WHERE  id = ?5 AND status = ?6
        "#,
    )
    .bind(to)
    .bind(response_message)
    .bind(responded_by)
    .bind(ts)
    .bind(id)
    .bind(from)
    .execute(pool)
    .await?
    .rows_affected();
    Ok(rows == 1)
}

// ─────────────────────────────────────────────────────────
// Receipts and email
// ─────────────────────────────────────────────────────────

/// Store `receipt_number` for the donation unless one exists, then return
/// whichever number is on record.
pub async fn issue_receipt(pool: &SqlitePool, donation_id: &str, receipt_number: &str) -> Result<String> {
    sqlx::query(
        r#"
        INSERT OR IGNORE INTO donation_receipts (donation_id, receipt_number, generated_at)
        VALUES (?1, ?2, ?3)
        "#,
    )
    .bind(donation_id)
    .bind(receipt_number)
    .bind(now())
    .execute(pool)
    .await?;

    let (number,): (String,) =
        sqlx::query_as("SELECT receipt_number FROM donation_receipts WHERE donation_id = ?1")
            .bind(donation_id)
            .fetch_one(pool)
            .await?;
    Ok(number)
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EmailTemplate {
    pub template_type: String,
    pub subject: String,
    pub html_content: String,
    pub text_content: Option<String>,
}

pub async fn get_active_template(
    pool: &SqlitePool,
    template_type: &str,
) -> Result<Option<EmailTemplate>> {
    let row = sqlx::query_as::<_, EmailTemplate>(
        r#"
        SELECT template_type, subject, html_content, text_content
        FROM   email_templates
        WHERE  template_type = ?1 AND is_active = 1
        "#,
    )
    .bind(template_type)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

#[derive(Debug, Clone)]
pub struct EmailLogEntry<'a> {
    pub recipient_email: &'a str,
    pub recipient_name: Option<&'a str>,
    pub subject: &'a str,
    pub template_type: &'a str,
    pub status: &'a str,
    pub provider: &'a str,
    pub error_message: Option<&'a str>,
    pub reference_type: &'a str,
    pub reference_id: &'a str,
}

pub async fn log_email(pool: &SqlitePool, entry: &EmailLogEntry<'_>) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO email_logs
            (recipient_email, recipient_name, subject, template_type, status, provider,
             error_message, reference_type, reference_id, sent_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        "#,
    )
    .bind(entry.recipient_email)
    .bind(entry.recipient_name)
    .bind(entry.subject)
    .bind(entry.template_type)
    .bind(entry.status)
    .bind(entry.provider)
    .bind(entry.error_message)
    .bind(entry.reference_type)
    .bind(entry.reference_id)
    .bind(now())
    .execute(pool)
    .await?;
    Ok(())
}

/// `(status, error_message)` of every email logged against a reference.
#[cfg(test)]
pub async fn email_log_statuses(
    pool: &SqlitePool,
    reference_type: &str,
    reference_id: &str,
) -> Result<Vec<(String, Option<String>)>> {
    let rows = sqlx::query_as(
        r#"
        SELECT status, error_message FROM email_logs
        WHERE  reference_type = ?1 AND reference_id = ?2
        ORDER  BY id ASC
        "#,
    )
    .bind(reference_type)
    .bind(reference_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
