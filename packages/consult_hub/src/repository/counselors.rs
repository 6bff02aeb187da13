use anyhow::{Context, Result};
use sqlx::Row;

use crate::models::Counselor;

use super::ChatRepository;

impl ChatRepository {
    pub async fn create_counselor(
        &self,
        display_name: &str,
        price_cents_per_minute: i64,
    ) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO counselors (display_name, price_cents_per_minute, status) VALUES (?, ?, 1)",
        )
        .bind(display_name)
        .bind(price_cents_per_minute)
        .execute(&self.pool)
        .await
        .context("Failed to create counselor")?;

        Ok(result.last_insert_rowid())
    }

    pub async fn get_counselor(&self, counselor_id: i64) -> Result<Option<Counselor>> {
        let row = sqlx::query(
            "SELECT id, display_name, price_cents_per_minute, status FROM counselors WHERE id = ?",
        )
        .bind(counselor_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to load counselor")?;

        Ok(row.map(|r| Counselor {
            id: r.get("id"),
            display_name: r.get("display_name"),
            price_cents_per_minute: r.get("price_cents_per_minute"),
            status: r.get("status"),
        }))
    }

    /// Enabled counselors among `ids` (used for the online-counselors view:
    /// the registry knows who is connected, the store knows who counsels).
    pub async fn get_counselors_by_ids(&self, ids: &[i64]) -> Result<Vec<Counselor>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT id, display_name, price_cents_per_minute, status FROM counselors \
             WHERE status = 1 AND id IN ({}) ORDER BY id",
            placeholders
        );

        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id);
        }

        let rows = query
            .fetch_all(&self.pool)
            .await
            .context("Failed to load counselors")?;

        Ok(rows
            .into_iter()
            .map(|r| Counselor {
                id: r.get("id"),
                display_name: r.get("display_name"),
                price_cents_per_minute: r.get("price_cents_per_minute"),
                status: r.get("status"),
            })
            .collect())
    }
}
