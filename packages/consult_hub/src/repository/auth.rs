use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use super::ChatRepository;

impl ChatRepository {
    /// Store a token hash. Tokens are hashed before they reach the store;
    /// the plaintext never touches disk.
    pub async fn insert_auth_token(
        &self,
        user_id: i64,
        token_hash: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO auth_tokens (token_hash, user_id, expires_at, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(token_hash)
        .bind(user_id)
        .bind(expires_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .context("Failed to insert auth token")?;

        Ok(())
    }

    /// Resolve a token hash to its user, treating expired tokens as absent.
    pub async fn lookup_auth_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<i64>> {
        let user_id: Option<i64> = sqlx::query_scalar(
            "SELECT user_id FROM auth_tokens WHERE token_hash = ? AND (expires_at IS NULL OR expires_at > ?)",
        )
        .bind(token_hash)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to look up auth token")?;

        Ok(user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_helpers::test_repository;
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn lookup_finds_unexpired_token() {
        let repo = test_repository().await;
        repo.insert_auth_token(7, "hash-a", None).await.unwrap();
        repo.insert_auth_token(8, "hash-b", Some(Utc::now() + Duration::hours(1)))
            .await
            .unwrap();

        assert_eq!(
            repo.lookup_auth_token("hash-a", Utc::now()).await.unwrap(),
            Some(7)
        );
        assert_eq!(
            repo.lookup_auth_token("hash-b", Utc::now()).await.unwrap(),
            Some(8)
        );
        assert_eq!(
            repo.lookup_auth_token("nope", Utc::now()).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn expired_token_is_absent() {
        let repo = test_repository().await;
        repo.insert_auth_token(9, "hash-c", Some(Utc::now() - Duration::minutes(1)))
            .await
            .unwrap();

        assert_eq!(
            repo.lookup_auth_token("hash-c", Utc::now()).await.unwrap(),
            None
        );
    }
}
