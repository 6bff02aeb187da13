// Repository layer. Each domain lives in its own file with `impl ChatRepository`.
//
// All callers import `crate::repository::ChatRepository`; the split is purely
// organizational.

use sqlx::sqlite::SqlitePool;

mod accounts;
mod auth;
mod billing;
mod counselors;
mod messages;
mod sessions;

pub use billing::SettlementWrite;

#[cfg(test)]
pub(crate) mod test_helpers;

#[derive(Clone)]
pub struct ChatRepository {
    pub(crate) pool: SqlitePool,
}

impl ChatRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}
