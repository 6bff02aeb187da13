//! Inactivity timeout supervision.
//!
//! One watcher task per live session plus a periodic sweep. The watcher
//! sleeps until `last_activity + window` and re-checks on wake, so touching
//! a session never re-arms a timer; it just moves the deadline the watcher
//! reads next time. The sweep catches anything a watcher misses (crashed
//! task, rehydration gap). Both paths funnel into the idempotent settlement,
//! so racing is safe.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::ws::ChatHub;

pub struct TimeoutSupervisor {
    window: Duration,
    watchers: RwLock<HashMap<i64, CancellationToken>>,
}

impl TimeoutSupervisor {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            watchers: RwLock::new(HashMap::new()),
        }
    }

    /// Spawn (or replace) the watcher for a session.
    pub async fn arm(&self, hub: Arc<ChatHub>, session_id: i64) {
        let token = CancellationToken::new();
        if let Some(prev) = self
            .watchers
            .write()
            .await
            .insert(session_id, token.clone())
        {
            prev.cancel();
        }

        let window = chrono::Duration::from_std(self.window)
            .unwrap_or_else(|_| chrono::Duration::seconds(30 * 60));

        tokio::spawn(async move {
            loop {
                // The tracker entry disappearing means the session ended.
                let Some(last_activity) = hub.tracker().last_activity(session_id).await else {
                    break;
                };
                let deadline = last_activity + window;
                let now = Utc::now();
                if deadline <= now {
                    debug!(session_id, "Inactivity window exceeded");
                    hub.force_timeout(session_id).await;
                    break;
                }
                let sleep_for = (deadline - now)
                    .to_std()
                    .unwrap_or(Duration::from_millis(50));
                tokio::select! {
                    _ = token.cancelled() => break,
                    // Wake and re-read last_activity; a touch during the
                    // sleep just pushes the deadline out.
                    _ = tokio::time::sleep(sleep_for) => {}
                }
            }
        });
    }

    /// Cancel the watcher after a session ends.
    pub async fn disarm(&self, session_id: i64) {
        if let Some(token) = self.watchers.write().await.remove(&session_id) {
            token.cancel();
        }
    }

    /// Spawn the periodic sweep. Returns its cancellation token for shutdown.
    pub fn spawn_sweep(hub: Arc<ChatHub>, interval: Duration) -> CancellationToken {
        let token = CancellationToken::new();
        let sweep_token = token.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = sweep_token.cancelled() => break,
                    _ = ticker.tick() => hub.sweep_stale().await,
                }
            }
        });
        token
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HubConfig;
    use crate::models::SessionStatus;
    use crate::repository::test_helpers::test_repository;
    use crate::session::LiveSession;
    use crate::ws::ChatHub;

    async fn active_hub(window: Duration) -> (Arc<ChatHub>, i64) {
        let repo = test_repository().await;
        let counselor_id = repo.create_counselor("C", 200).await.unwrap();
        let session_id = repo.create_session(1, 100, counselor_id).await.unwrap();
        let started_at = Utc::now();
        repo.activate_session(session_id, started_at, 200)
            .await
            .unwrap();

        let mut config = HubConfig::default();
        config.inactivity_timeout = window;
        let hub = ChatHub::new(repo, config);
        hub.tracker()
            .activate(LiveSession {
                session_id,
                order_id: 1,
                user_id: 100,
                counselor_id,
                price_cents_per_minute: 200,
                started_at,
                last_activity: started_at,
            })
            .await;
        (hub, session_id)
    }

    #[tokio::test]
    async fn watcher_ends_an_idle_session() {
        let (hub, session_id) = active_hub(Duration::from_millis(30)).await;
        let supervisor = TimeoutSupervisor::new(Duration::from_millis(30));
        supervisor.arm(hub.clone(), session_id).await;

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(hub.tracker().get(session_id).await.is_none());
        let session = hub.repo().get_session(session_id).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Ended);
        assert!(
            hub.repo()
                .get_billing_for_session(session_id)
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn touch_defers_the_watcher() {
        let (hub, session_id) = active_hub(Duration::from_millis(80)).await;
        let supervisor = TimeoutSupervisor::new(Duration::from_millis(80));
        supervisor.arm(hub.clone(), session_id).await;

        // Keep the session warm across two would-be deadlines.
        for _ in 0..4 {
            tokio::time::sleep(Duration::from_millis(40)).await;
            hub.tracker().touch(session_id).await;
        }
        assert!(hub.tracker().get(session_id).await.is_some());

        // Then go quiet and let it fire.
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(hub.tracker().get(session_id).await.is_none());
    }

    #[tokio::test]
    async fn disarm_stops_the_watcher() {
        let (hub, session_id) = active_hub(Duration::from_millis(30)).await;
        let supervisor = TimeoutSupervisor::new(Duration::from_millis(30));
        supervisor.arm(hub.clone(), session_id).await;
        supervisor.disarm(session_id).await;

        tokio::time::sleep(Duration::from_millis(120)).await;
        // Nothing ended it.
        assert!(hub.tracker().get(session_id).await.is_some());
    }

    #[tokio::test]
    async fn sweep_ends_stale_sessions() {
        let (hub, session_id) = active_hub(Duration::from_millis(10)).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        hub.sweep_stale().await;
        assert!(hub.tracker().get(session_id).await.is_none());

        // Re-sweeping an already-ended session is a no-op.
        hub.sweep_stale().await;
        let session = hub.repo().get_session(session_id).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Ended);
    }

    #[tokio::test]
    async fn sweep_task_runs_on_interval() {
        let (hub, session_id) = active_hub(Duration::from_millis(10)).await;
        let token = TimeoutSupervisor::spawn_sweep(hub.clone(), Duration::from_millis(20));

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(hub.tracker().get(session_id).await.is_none());
        token.cancel();
    }
}
