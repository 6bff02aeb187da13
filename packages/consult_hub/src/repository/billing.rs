use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::Row;

use crate::models::{BillingRecord, SettlementStatus};

use super::ChatRepository;

/// Everything the settlement transaction writes, computed up front by the
/// billing engine so the transaction itself does no arithmetic.
#[derive(Debug, Clone)]
pub struct SettlementWrite {
    pub session_id: i64,
    pub order_id: i64,
    pub user_id: i64,
    pub counselor_id: i64,
    pub ended_at: DateTime<Utc>,
    pub duration_secs: i64,
    pub billed_minutes: i64,
    pub price_cents_per_minute: i64,
    pub total_amount_cents: i64,
    pub platform_fee_cents: i64,
    pub counselor_fee_cents: i64,
}

impl ChatRepository {
    /// Atomically: mark the session Ended, insert its billing record, and
    /// credit the counselor's account. All three writes commit together or
    /// not at all; no caller can observe Ended without a BillingRecord.
    ///
    /// The `status = 1` guard and the UNIQUE(session_id) index on billings
    /// give storage-level idempotency under racing settlements.
    pub async fn settle_session(&self, w: &SettlementWrite) -> Result<BillingRecord> {
        let created_at = Utc::now();
        let mut tx = self.pool.begin().await.context("Failed to begin settlement")?;

        let updated = sqlx::query(
            r#"
            UPDATE chat_sessions
            SET status = 2, end_time = ?, duration_secs = ?, total_amount_cents = ?, updated_at = ?
            WHERE id = ? AND status = 1
            "#,
        )
        .bind(w.ended_at)
        .bind(w.duration_secs)
        .bind(w.total_amount_cents)
        .bind(created_at)
        .bind(w.session_id)
        .execute(&mut *tx)
        .await
        .context("Failed to end session row")?;

        if updated.rows_affected() != 1 {
            anyhow::bail!("session {} is not active in the store", w.session_id);
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO chat_billings
                (session_id, order_id, user_id, counselor_id, duration_secs, billed_minutes,
                 price_cents_per_minute, total_amount_cents, platform_fee_cents, counselor_fee_cents,
                 status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?)
            "#,
        )
        .bind(w.session_id)
        .bind(w.order_id)
        .bind(w.user_id)
        .bind(w.counselor_id)
        .bind(w.duration_secs)
        .bind(w.billed_minutes)
        .bind(w.price_cents_per_minute)
        .bind(w.total_amount_cents)
        .bind(w.platform_fee_cents)
        .bind(w.counselor_fee_cents)
        .bind(created_at)
        .execute(&mut *tx)
        .await
        .context("Failed to insert billing record")?;

        // Single-statement atomic increment, never read-modify-write, so
        // concurrent settlements for the same counselor cannot lose updates.
        sqlx::query(
            r#"
            INSERT INTO counselor_accounts (counselor_id, total_income_cents, balance_cents, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(counselor_id) DO UPDATE SET
                total_income_cents = total_income_cents + excluded.total_income_cents,
                balance_cents = balance_cents + excluded.balance_cents,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(w.counselor_id)
        .bind(w.counselor_fee_cents)
        .bind(w.counselor_fee_cents)
        .bind(created_at)
        .execute(&mut *tx)
        .await
        .context("Failed to credit counselor account")?;

        tx.commit().await.context("Failed to commit settlement")?;

        Ok(BillingRecord {
            id: inserted.last_insert_rowid(),
            session_id: w.session_id,
            order_id: w.order_id,
            user_id: w.user_id,
            counselor_id: w.counselor_id,
            duration_secs: w.duration_secs,
            billed_minutes: w.billed_minutes,
            price_cents_per_minute: w.price_cents_per_minute,
            total_amount_cents: w.total_amount_cents,
            platform_fee_cents: w.platform_fee_cents,
            counselor_fee_cents: w.counselor_fee_cents,
            status: SettlementStatus::Pending,
            settled_at: None,
            created_at,
        })
    }

    /// Count and gross total of all settlements, for the stats endpoint.
    pub async fn billing_totals(&self) -> Result<(i64, i64)> {
        let row: (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(total_amount_cents), 0) FROM chat_billings",
        )
        .fetch_one(&self.pool)
        .await
        .context("Failed to compute billing totals")?;

        Ok(row)
    }

    pub async fn get_billing_for_session(&self, session_id: i64) -> Result<Option<BillingRecord>> {
        let row = sqlx::query("SELECT * FROM chat_billings WHERE session_id = ?")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load billing record")?;

        row.map(|r| {
            let status_raw: i64 = r.get("status");
            let status = SettlementStatus::from_i64(status_raw)
                .with_context(|| format!("Invalid settlement status {}", status_raw))?;
            Ok(BillingRecord {
                id: r.get("id"),
                session_id: r.get("session_id"),
                order_id: r.get("order_id"),
                user_id: r.get("user_id"),
                counselor_id: r.get("counselor_id"),
                duration_secs: r.get("duration_secs"),
                billed_minutes: r.get("billed_minutes"),
                price_cents_per_minute: r.get("price_cents_per_minute"),
                total_amount_cents: r.get("total_amount_cents"),
                platform_fee_cents: r.get("platform_fee_cents"),
                counselor_fee_cents: r.get("counselor_fee_cents"),
                status,
                settled_at: r.get("settled_at"),
                created_at: r.get("created_at"),
            })
        })
        .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_helpers::test_repository;
    use super::*;
    use crate::models::SessionStatus;

    fn write_for(session_id: i64, counselor_id: i64) -> SettlementWrite {
        SettlementWrite {
            session_id,
            order_id: 1,
            user_id: 100,
            counselor_id,
            ended_at: Utc::now(),
            duration_secs: 125,
            billed_minutes: 3,
            price_cents_per_minute: 200,
            total_amount_cents: 600,
            platform_fee_cents: 180,
            counselor_fee_cents: 420,
        }
    }

    #[tokio::test]
    async fn settle_writes_all_three_rows() {
        let repo = test_repository().await;
        let counselor_id = repo.create_counselor("C", 200).await.unwrap();
        let session_id = repo.create_session(1, 100, counselor_id).await.unwrap();
        repo.activate_session(session_id, Utc::now(), 200)
            .await
            .unwrap();

        let record = repo
            .settle_session(&write_for(session_id, counselor_id))
            .await
            .unwrap();
        assert_eq!(record.total_amount_cents, 600);
        assert_eq!(record.status, SettlementStatus::Pending);

        let session = repo.get_session(session_id).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Ended);
        assert_eq!(session.duration_secs, 125);

        let account = repo.get_account(counselor_id).await.unwrap().unwrap();
        assert_eq!(account.total_income_cents, 420);
        assert_eq!(account.balance_cents, 420);
    }

    #[tokio::test]
    async fn settle_requires_active_session() {
        let repo = test_repository().await;
        let counselor_id = repo.create_counselor("C", 200).await.unwrap();
        let session_id = repo.create_session(1, 100, counselor_id).await.unwrap();

        // Still Pending: the status guard rejects the whole transaction.
        let err = repo
            .settle_session(&write_for(session_id, counselor_id))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not active"));

        // Nothing partial was written.
        assert!(
            repo.get_billing_for_session(session_id)
                .await
                .unwrap()
                .is_none()
        );
        assert!(repo.get_account(counselor_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn settle_twice_is_rejected() {
        let repo = test_repository().await;
        let counselor_id = repo.create_counselor("C", 200).await.unwrap();
        let session_id = repo.create_session(1, 100, counselor_id).await.unwrap();
        repo.activate_session(session_id, Utc::now(), 200)
            .await
            .unwrap();

        repo.settle_session(&write_for(session_id, counselor_id))
            .await
            .unwrap();
        // Losing racer: the session is no longer Active.
        assert!(
            repo.settle_session(&write_for(session_id, counselor_id))
                .await
                .is_err()
        );

        // Exactly one billing record and one credit.
        let account = repo.get_account(counselor_id).await.unwrap().unwrap();
        assert_eq!(account.total_income_cents, 420);
    }

    #[tokio::test]
    async fn account_accumulates_across_sessions() {
        let repo = test_repository().await;
        let counselor_id = repo.create_counselor("C", 200).await.unwrap();
        for order in 1..=2 {
            let session_id = repo.create_session(order, 100, counselor_id).await.unwrap();
            repo.activate_session(session_id, Utc::now(), 200)
                .await
                .unwrap();
            repo.settle_session(&write_for(session_id, counselor_id))
                .await
                .unwrap();
        }

        let account = repo.get_account(counselor_id).await.unwrap().unwrap();
        assert_eq!(account.total_income_cents, 840);
        assert_eq!(account.balance_cents, 840);
        // balance + frozen + withdrawn == total_income
        assert_eq!(
            account.balance_cents + account.frozen_cents + account.withdrawn_cents,
            account.total_income_cents
        );
    }
}
