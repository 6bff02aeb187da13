use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::models::{ChatMessage, ParticipantRole};

use super::ChatRepository;

fn map_message(row: &SqliteRow) -> Result<ChatMessage> {
    let sender_type: String = row.get("sender_type");
    let sender_type = match sender_type.as_str() {
        "user" => ParticipantRole::User,
        "counselor" => ParticipantRole::Counselor,
        other => anyhow::bail!("Invalid sender_type {:?} in database", other),
    };
    Ok(ChatMessage {
        id: row.get("id"),
        session_id: row.get("session_id"),
        sender_id: row.get("sender_id"),
        sender_type,
        content_type: row.get("content_type"),
        content: row.get("content"),
        file_url: row.get("file_url"),
        is_read: row.get::<i64, _>("is_read") != 0,
        read_at: row.get("read_at"),
        created_at: row.get("created_at"),
    })
}

impl ChatRepository {
    /// Persist a chat message and return the stored row (write then
    /// acknowledge: the broadcast carries the assigned id and timestamp).
    pub async fn insert_message(
        &self,
        session_id: i64,
        sender_id: i64,
        sender_type: ParticipantRole,
        content_type: &str,
        content: &str,
        file_url: Option<&str>,
    ) -> Result<ChatMessage> {
        let created_at = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO chat_messages (session_id, sender_id, sender_type, content_type, content, file_url, is_read, created_at)
            VALUES (?, ?, ?, ?, ?, ?, 0, ?)
            "#,
        )
        .bind(session_id)
        .bind(sender_id)
        .bind(sender_type.as_str())
        .bind(content_type)
        .bind(content)
        .bind(file_url)
        .bind(created_at)
        .execute(&self.pool)
        .await
        .context("Failed to insert chat message")?;

        Ok(ChatMessage {
            id: result.last_insert_rowid(),
            session_id,
            sender_id,
            sender_type,
            content_type: content_type.to_string(),
            content: content.to_string(),
            file_url: file_url.map(str::to_string),
            is_read: false,
            read_at: None,
            created_at,
        })
    }

    pub async fn get_message(&self, message_id: i64) -> Result<Option<ChatMessage>> {
        let row = sqlx::query("SELECT * FROM chat_messages WHERE id = ?")
            .bind(message_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load message")?;

        row.as_ref().map(map_message).transpose()
    }

    /// Mark one stored message read. Returns false if it was already read
    /// (or does not exist), so duplicate read receipts are not re-notified.
    pub async fn mark_message_read(
        &self,
        message_id: i64,
        read_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result =
            sqlx::query("UPDATE chat_messages SET is_read = 1, read_at = ? WHERE id = ? AND is_read = 0")
                .bind(read_at)
                .bind(message_id)
                .execute(&self.pool)
                .await
                .context("Failed to mark message read")?;

        Ok(result.rows_affected() == 1)
    }

    /// Paginated history, returned oldest-first within the page.
    pub async fn message_history(
        &self,
        session_id: i64,
        page: i64,
        page_size: i64,
    ) -> Result<(Vec<ChatMessage>, i64)> {
        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM chat_messages WHERE session_id = ?")
                .bind(session_id)
                .fetch_one(&self.pool)
                .await
                .context("Failed to count messages")?;

        let offset = (page.max(1) - 1) * page_size;
        let rows = sqlx::query(
            r#"
            SELECT * FROM chat_messages
            WHERE session_id = ?
            ORDER BY id DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(session_id)
        .bind(page_size)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load message history")?;

        let mut messages: Vec<ChatMessage> =
            rows.iter().map(map_message).collect::<Result<_>>()?;
        // Newest page first, but oldest-first within the page for reading order.
        messages.reverse();
        Ok((messages, total))
    }
}
