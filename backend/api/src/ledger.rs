//! Ledger reconciler, the only writer of `payment_status` transitions and
//! of campaign `raised_cents`.
//!
//! ## Guarantees
//!
//! * A pending donation moves at most once. The move is a compare-and-set on
//!   `payment_status = 'pending'`, so duplicate or concurrent provider events
//!   find nothing to change and become successful no-ops.
//! * The campaign credit (or refund debit) is an additive `UPDATE` in the
//!   same transaction as the status change; both commit or neither does.
//! * The donor confirmation is queued only after commit and never affects
//!   the outcome.
//! * A write conflict reported by SQLite is retried once from scratch; a
//!   second conflict surfaces as [`AppError::PersistenceConflict`].

use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::db;
use crate::errors::{AppError, Result};
use crate::models::{PaymentEventKind, PaymentStatus};
use crate::notifier::{DonationCompleted, NotificationQueue};

const REFUND_EVENT: &str = "refund";

/// What `apply_payment_event` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// The donation moved from `pending` to `status`.
    Applied { status: PaymentStatus },
    /// The donation was already in `current`; nothing changed.
    Ignored { current: PaymentStatus },
}

impl EventOutcome {
    pub fn status(&self) -> PaymentStatus {
        match self {
            Self::Applied { status } => *status,
            Self::Ignored { current } => *current,
        }
    }
}

#[derive(Clone)]
pub struct Ledger {
    pool: SqlitePool,
    notifications: NotificationQueue,
}

impl Ledger {
    pub fn new(pool: SqlitePool, notifications: NotificationQueue) -> Self {
        Self {
            pool,
            notifications,
        }
    }

    /// Apply a provider-reported payment outcome to a donation.
    pub async fn apply_payment_event(
        &self,
        donation_id: &str,
        kind: PaymentEventKind,
        provider_reference: Option<&str>,
    ) -> Result<EventOutcome> {
        let outcome = match self.try_apply(donation_id, kind, provider_reference).await {
            Err(AppError::PersistenceConflict(reason)) => {
                warn!(%donation_id, "Write conflict applying {} ({reason}); retrying", kind.as_str());
                self.try_apply(donation_id, kind, provider_reference).await?
            }
            other => other?,
        };

        if outcome == (EventOutcome::Applied { status: PaymentStatus::Completed }) {
            self.notifications.enqueue(DonationCompleted {
                donation_id: donation_id.to_string(),
            });
        }
        Ok(outcome)
    }

    async fn try_apply(
        &self,
        donation_id: &str,
        kind: PaymentEventKind,
        provider_reference: Option<&str>,
    ) -> Result<EventOutcome> {
        let next = kind.target_status();
        // Only a confirmation records a transaction id on the donation; every
        // reference still lands in `payment_events`.
        let transaction_ref = match kind {
            PaymentEventKind::Confirmed => provider_reference,
            _ => None,
        };

        let mut tx = self.pool.begin().await?;
        let moved = db::transition_donation_status(
            &mut tx,
            donation_id,
            PaymentStatus::Pending,
            next,
            transaction_ref,
        )
        .await?;

        if let Some(donation) = moved {
            if next == PaymentStatus::Completed {
                db::credit_campaign(&mut tx, &donation.campaign_id, donation.amount_cents).await?;
            }
            db::record_payment_event(&mut tx, donation_id, kind.as_str(), provider_reference, "applied")
                .await?;
            tx.commit().await?;

            info!(
                %donation_id,
                campaign_id = %donation.campaign_id,
                amount_cents = donation.amount_cents,
                "Donation pending -> {}",
                next.as_str()
            );
            return Ok(EventOutcome::Applied { status: next });
        }
        tx.rollback().await?;

        let current = db::get_donation(&self.pool, donation_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("donation {donation_id}")))?;

        let mut conn = self.pool.acquire().await?;
        db::record_payment_event(&mut conn, donation_id, kind.as_str(), provider_reference, "ignored")
            .await?;

        if kind == PaymentEventKind::Confirmed
            && current.payment_status == PaymentStatus::Completed
            && provider_reference.is_some()
            && current.transaction_id.as_deref() != provider_reference
        {
            warn!(
                %donation_id,
                recorded = ?current.transaction_id,
                received = ?provider_reference,
                "Conflicting confirmation for an already completed donation"
            );
        } else {
            info!(
                %donation_id,
                "Ignoring {} event; donation already {}",
                kind.as_str(),
                current.payment_status.as_str()
            );
        }

        Ok(EventOutcome::Ignored {
            current: current.payment_status,
        })
    }

    /// Administrative refund of a completed donation.
    pub async fn refund(&self, donation_id: &str) -> Result<()> {
        match self.try_refund(donation_id).await {
            Err(AppError::PersistenceConflict(reason)) => {
                warn!(%donation_id, "Write conflict refunding ({reason}); retrying");
                self.try_refund(donation_id).await
            }
            other => other,
        }
    }

    async fn try_refund(&self, donation_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let moved = db::transition_donation_status(
            &mut tx,
            donation_id,
            PaymentStatus::Completed,
            PaymentStatus::Refunded,
            None,
        )
        .await?;

        let Some(donation) = moved else {
            tx.rollback().await?;
            let current = db::get_donation(&self.pool, donation_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("donation {donation_id}")))?;
            return Err(AppError::donation_transition(
                donation_id,
                current.payment_status,
                PaymentStatus::Refunded,
            ));
        };

        db::debit_campaign(&mut tx, &donation.campaign_id, donation.amount_cents).await?;
        db::record_payment_event(&mut tx, donation_id, REFUND_EVENT, None, "applied").await?;
        tx.commit().await?;

        info!(
            %donation_id,
            campaign_id = %donation.campaign_id,
            amount_cents = donation.amount_cents,
            "Donation completed -> refunded"
        );
        Ok(())
    }
}
