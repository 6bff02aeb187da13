//! Token authentication for the WebSocket upgrade.
//!
//! Tokens are opaque random strings; only their SHA-256 hex digest is
//! stored. Issuance is an operator/test concern; the upgrade path only
//! ever verifies.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::repository::ChatRepository;

pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Resolve a presented token to a participant id, or `None` for anything
/// unknown or expired.
pub async fn authenticate_token(repo: &ChatRepository, token: &str) -> Result<Option<i64>> {
    repo.lookup_auth_token(&hash_token(token), Utc::now()).await
}

/// Mint a fresh token for a participant and store its hash.
pub async fn mint_token(
    repo: &ChatRepository,
    participant_id: i64,
    expires_at: Option<DateTime<Utc>>,
) -> Result<String> {
    let raw: [u8; 32] = rand::random();
    let token: String = raw.iter().map(|b| format!("{b:02x}")).collect();
    repo.insert_auth_token(participant_id, &hash_token(&token), expires_at)
        .await?;
    Ok(token)
}
