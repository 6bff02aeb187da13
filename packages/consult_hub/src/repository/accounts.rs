use anyhow::{Context, Result};
use sqlx::Row;

use crate::models::CounselorAccount;

use super::ChatRepository;

impl ChatRepository {
    /// Account rows are created lazily by the first settlement, so a missing
    /// row just means the counselor has never been paid.
    pub async fn get_account(&self, counselor_id: i64) -> Result<Option<CounselorAccount>> {
        let row = sqlx::query("SELECT * FROM counselor_accounts WHERE counselor_id = ?")
            .bind(counselor_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load counselor account")?;

        Ok(row.map(|r| CounselorAccount {
            counselor_id: r.get("counselor_id"),
            total_income_cents: r.get("total_income_cents"),
            withdrawn_cents: r.get("withdrawn_cents"),
            balance_cents: r.get("balance_cents"),
            frozen_cents: r.get("frozen_cents"),
            updated_at: r.get("updated_at"),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_helpers::test_repository;

    #[tokio::test]
    async fn missing_account_is_none() {
        let repo = test_repository().await;
        assert!(repo.get_account(42).await.unwrap().is_none());
    }
}
