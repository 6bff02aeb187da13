use sqlx::sqlite::SqlitePoolOptions;

use super::ChatRepository;
use crate::db::run_migrations;

/// Fresh in-memory repository with the full schema applied.
pub(crate) async fn test_repository() -> ChatRepository {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();

    run_migrations(&pool).await.unwrap();
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await
        .unwrap();

    ChatRepository::new(pool)
}
