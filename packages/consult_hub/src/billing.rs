//! Session billing.
//!
//! Per-minute billing with ceiling rounding and a minimum of one minute.
//! All arithmetic is in integer cents; the platform takes a configured
//! percentage and the counselor gets the exact remainder, so the split
//! always sums back to the total.

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::info;

use crate::models::BillingRecord;
use crate::repository::{ChatRepository, SettlementWrite};
use crate::session::LiveSession;

/// The computed charge for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeBreakdown {
    pub duration_secs: i64,
    pub billed_minutes: i64,
    pub total_amount_cents: i64,
    pub platform_fee_cents: i64,
    pub counselor_fee_cents: i64,
}

impl FeeBreakdown {
    /// Any partial minute bills as a full minute, and even an instant
    /// disconnect bills one minute.
    pub fn compute(
        duration_secs: i64,
        price_cents_per_minute: i64,
        platform_share_percent: i64,
    ) -> Self {
        let duration_secs = duration_secs.max(0);
        let billed_minutes = ((duration_secs + 59) / 60).max(1);
        let total_amount_cents = billed_minutes * price_cents_per_minute;
        let platform_fee_cents = total_amount_cents * platform_share_percent / 100;
        let counselor_fee_cents = total_amount_cents - platform_fee_cents;
        Self {
            duration_secs,
            billed_minutes,
            total_amount_cents,
            platform_fee_cents,
            counselor_fee_cents,
        }
    }
}

/// Computes charges and writes settlements through the repository.
pub struct BillingEngine {
    repo: ChatRepository,
    platform_share_percent: i64,
}

impl BillingEngine {
    pub fn new(repo: ChatRepository, platform_share_percent: i64) -> Self {
        Self {
            repo,
            platform_share_percent,
        }
    }

    /// Settle a session that has just ended: compute the charge from wall
    /// clock duration and commit the session/billing/account writes in one
    /// transaction.
    pub async fn settle(
        &self,
        session: &LiveSession,
        ended_at: DateTime<Utc>,
    ) -> Result<BillingRecord> {
        let duration_secs = (ended_at - session.started_at).num_seconds().max(0);
        let fees = FeeBreakdown::compute(
            duration_secs,
            session.price_cents_per_minute,
            self.platform_share_percent,
        );

        let record = self
            .repo
            .settle_session(&SettlementWrite {
                session_id: session.session_id,
                order_id: session.order_id,
                user_id: session.user_id,
                counselor_id: session.counselor_id,
                ended_at,
                duration_secs: fees.duration_secs,
                billed_minutes: fees.billed_minutes,
                price_cents_per_minute: session.price_cents_per_minute,
                total_amount_cents: fees.total_amount_cents,
                platform_fee_cents: fees.platform_fee_cents,
                counselor_fee_cents: fees.counselor_fee_cents,
            })
            .await?;

        info!(
            session_id = session.session_id,
            duration_secs = fees.duration_secs,
            billed_minutes = fees.billed_minutes,
            total_cents = fees.total_amount_cents,
            "Session settled"
        );

        Ok(record)
    }
}
