//! Live session tracking.
//!
//! One `LiveSession` per Active session, held in memory for the hub's hot
//! path (message routing, activity tracking, timeout checks). The store
//! remains the source of truth for lifecycle state; the tracker mirrors it
//! and is rehydrated from the store at startup.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// In-memory record of an Active session.
#[derive(Debug, Clone)]
pub struct LiveSession {
    pub session_id: i64,
    pub order_id: i64,
    pub user_id: i64,
    pub counselor_id: i64,
    /// Rate frozen at activation time.
    pub price_cents_per_minute: i64,
    pub started_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl LiveSession {
    pub fn is_party(&self, participant_id: i64) -> bool {
        self.user_id == participant_id || self.counselor_id == participant_id
    }

    /// The other side of the conversation, for targeted notifications.
    pub fn other_party(&self, participant_id: i64) -> Option<i64> {
        if participant_id == self.user_id {
            Some(self.counselor_id)
        } else if participant_id == self.counselor_id {
            Some(self.user_id)
        } else {
            None
        }
    }
}

/// Tracker for all live sessions.
///
/// Every lock here is taken for map access only and released before any
/// await point in callers; nothing is held across I/O.
pub struct SessionTracker {
    sessions: RwLock<HashMap<i64, LiveSession>>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Start tracking a session. Idempotent: if it is already tracked the
    /// existing entry (and its activity clock) is kept.
    pub async fn activate(&self, session: LiveSession) -> bool {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.session_id) {
            return false;
        }
        sessions.insert(session.session_id, session);
        true
    }

    /// Record activity on a session. Returns false if it is not live.
    pub async fn touch(&self, session_id: i64) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(&session_id) {
            Some(s) => {
                s.last_activity = Utc::now();
                true
            }
            None => false,
        }
    }

    pub async fn get(&self, session_id: i64) -> Option<LiveSession> {
        self.sessions.read().await.get(&session_id).cloned()
    }

    pub async fn last_activity(&self, session_id: i64) -> Option<DateTime<Utc>> {
        self.sessions
            .read()
            .await
            .get(&session_id)
            .map(|s| s.last_activity)
    }

    /// Atomically remove a session for settlement. Exactly one caller gets
    /// the `LiveSession` back; racing enders (counselor leave vs timeout)
    /// lose here and see `None`, which maps to the idempotent already-ended
    /// outcome.
    pub async fn take_for_settlement(&self, session_id: i64) -> Option<LiveSession> {
        self.sessions.write().await.remove(&session_id)
    }

    /// Put a session back after a failed settlement so the sweep retries it.
    /// If activity happened meanwhile the newer entry wins.
    pub async fn reinstate(&self, session: LiveSession) {
        let mut sessions = self.sessions.write().await;
        sessions.entry(session.session_id).or_insert(session);
    }

    /// Sessions whose last activity is older than `window`, for the sweep.
    pub async fn stale_sessions(&self, window: Duration, now: DateTime<Utc>) -> Vec<i64> {
        let cutoff = now - window;
        self.sessions
            .read()
            .await
            .values()
            .filter(|s| s.last_activity < cutoff)
            .map(|s| s.session_id)
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}
