use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::models::{ChatSession, SessionStatus};

use super::ChatRepository;

pub(crate) fn map_session(row: &SqliteRow) -> Result<ChatSession> {
    let status_raw: i64 = row.get("status");
    let status = SessionStatus::from_i64(status_raw)
        .with_context(|| format!("Invalid session status {} in database", status_raw))?;
    Ok(ChatSession {
        id: row.get("id"),
        order_id: row.get("order_id"),
        user_id: row.get("user_id"),
        counselor_id: row.get("counselor_id"),
        status,
        start_time: row.get("start_time"),
        end_time: row.get("end_time"),
        duration_secs: row.get("duration_secs"),
        price_cents_per_minute: row.get("price_cents_per_minute"),
        total_amount_cents: row.get("total_amount_cents"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

impl ChatRepository {
    /// Create a session in Pending. Upstream this happens when an order is
    /// paid; here it is the collaborator input for tests and operators.
    pub async fn create_session(
        &self,
        order_id: i64,
        user_id: i64,
        counselor_id: i64,
    ) -> Result<i64> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO chat_sessions (order_id, user_id, counselor_id, status, created_at, updated_at)
            VALUES (?, ?, ?, 0, ?, ?)
            "#,
        )
        .bind(order_id)
        .bind(user_id)
        .bind(counselor_id)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to create session")?;

        Ok(result.last_insert_rowid())
    }

    pub async fn get_session(&self, session_id: i64) -> Result<Option<ChatSession>> {
        let row = sqlx::query("SELECT * FROM chat_sessions WHERE id = ?")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load session")?;

        row.as_ref().map(map_session).transpose()
    }

    /// Pending → Active: record the start time and copy the counselor's
    /// current rate into the session row. The `status = 0` guard makes
    /// concurrent activations race-safe; only one caller wins.
    pub async fn activate_session(
        &self,
        session_id: i64,
        start_time: DateTime<Utc>,
        price_cents_per_minute: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE chat_sessions
            SET status = 1, start_time = ?, price_cents_per_minute = ?, updated_at = ?
            WHERE id = ? AND status = 0
            "#,
        )
        .bind(start_time)
        .bind(price_cents_per_minute)
        .bind(Utc::now())
        .bind(session_id)
        .execute(&self.pool)
        .await
        .context("Failed to activate session")?;

        Ok(result.rows_affected() == 1)
    }

    /// All sessions currently marked Active in the store. Used at startup to
    /// rehydrate the in-memory tracker after a restart, so the timeout sweep
    /// can still end sessions whose participants never come back.
    pub async fn list_active_sessions(&self) -> Result<Vec<ChatSession>> {
        let rows = sqlx::query("SELECT * FROM chat_sessions WHERE status = 1 ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list active sessions")?;

        rows.iter().map(map_session).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_helpers::test_repository;
    use crate::models::SessionStatus;
    use chrono::Utc;

    #[tokio::test]
    async fn create_and_get_session() {
        let repo = test_repository().await;
        let id = repo.create_session(10, 100, 200).await.unwrap();

        let session = repo.get_session(id).await.unwrap().unwrap();
        assert_eq!(session.order_id, 10);
        assert_eq!(session.user_id, 100);
        assert_eq!(session.counselor_id, 200);
        assert_eq!(session.status, SessionStatus::Pending);
        assert!(session.start_time.is_none());
    }

    #[tokio::test]
    async fn get_session_missing_is_none() {
        let repo = test_repository().await;
        assert!(repo.get_session(999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn activate_session_only_once() {
        let repo = test_repository().await;
        let id = repo.create_session(10, 100, 200).await.unwrap();

        let now = Utc::now();
        assert!(repo.activate_session(id, now, 250).await.unwrap());
        // Second activation loses the status guard.
        assert!(!repo.activate_session(id, now, 999).await.unwrap());

        let session = repo.get_session(id).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Active);
        assert_eq!(session.price_cents_per_minute, 250);
        assert!(session.start_time.is_some());
    }

    #[tokio::test]
    async fn list_active_sessions_filters_by_status() {
        let repo = test_repository().await;
        let pending = repo.create_session(1, 100, 200).await.unwrap();
        let active = repo.create_session(2, 101, 200).await.unwrap();
        repo.activate_session(active, Utc::now(), 100).await.unwrap();

        let listed = repo.list_active_sessions().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, active);
        assert_ne!(listed[0].id, pending);
    }
}
