//! Chat hub: the orchestrator behind every WebSocket connection.
//!
//! Owns the connection registry, session rooms, the live-session tracker,
//! the billing engine and the timeout supervisor, and implements the session
//! lifecycle: Pending -> Active on the second distinct party joining,
//! Active -> Ended on counselor leave or inactivity timeout. Ending is
//! settled synchronously and exactly once; racing enders resolve through the
//! tracker's take-for-settlement.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::billing::BillingEngine;
use crate::config::HubConfig;
use crate::error::HubError;
use crate::models::{BillingRecord, ChatSession, ParticipantRole, SessionStatus};
use crate::repository::ChatRepository;
use crate::session::{LiveSession, SessionTracker};
use crate::timeout::TimeoutSupervisor;

use super::protocol::ServerMessage;
use super::registry::{ClientHandle, ConnectionRegistry};
use super::rooms::RoomRegistry;

/// Who forced the Active -> Ended transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndedBy {
    Counselor,
    Timeout,
}

impl EndedBy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Counselor => "counselor",
            Self::Timeout => "timeout",
        }
    }
}

pub struct ChatHub {
    registry: ConnectionRegistry,
    rooms: RoomRegistry,
    tracker: SessionTracker,
    billing: BillingEngine,
    repo: ChatRepository,
    supervisor: TimeoutSupervisor,
    config: HubConfig,
}

impl ChatHub {
    pub fn new(repo: ChatRepository, config: HubConfig) -> Arc<Self> {
        Arc::new(Self {
            registry: ConnectionRegistry::new(),
            rooms: RoomRegistry::new(),
            tracker: SessionTracker::new(),
            billing: BillingEngine::new(repo.clone(), config.platform_share_percent),
            repo,
            supervisor: TimeoutSupervisor::new(config.inactivity_timeout),
            config,
        })
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn rooms(&self) -> &RoomRegistry {
        &self.rooms
    }

    pub fn tracker(&self) -> &SessionTracker {
        &self.tracker
    }

    pub fn repo(&self) -> &ChatRepository {
        &self.repo
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Reload sessions marked Active in the store into the tracker and re-arm
    /// their watchers. Run once at startup so a restart cannot orphan live
    /// sessions away from the timeout path.
    pub async fn rehydrate(self: &Arc<Self>) -> Result<usize, HubError> {
        let sessions = self.repo.list_active_sessions().await?;
        let mut restored = 0;
        for session in &sessions {
            if self.tracker.activate(live_from_row(session)).await {
                self.supervisor.arm(Arc::clone(self), session.id).await;
                restored += 1;
            }
        }
        if restored > 0 {
            info!(restored, "Rehydrated active sessions from the store");
        }
        Ok(restored)
    }

    /// `join`: admit a party into the session room; the second distinct
    /// party's join activates a Pending session.
    pub async fn join(self: &Arc<Self>, handle: &ClientHandle, session_id: i64) -> Result<(), HubError> {
        let session = self
            .repo
            .get_session(session_id)
            .await?
            .ok_or(HubError::SessionNotFound)?;
        if !session.is_party(handle.participant_id) {
            return Err(HubError::NotAuthorized);
        }
        // Ended is terminal: no re-admission, no room mutation. History is
        // the REST surface's job.
        if session.status == SessionStatus::Ended {
            return Err(HubError::AlreadyEnded);
        }

        self.rooms.join(session_id, handle.clone()).await;
        handle.send(ServerMessage::join_success(session_id, session.status));
        debug!(
            session_id,
            participant_id = handle.participant_id,
            status = ?session.status,
            "Participant joined session room"
        );

        match session.status {
            SessionStatus::Pending => {
                let members = self.rooms.members(session_id).await;
                if members.contains(&session.user_id) && members.contains(&session.counselor_id) {
                    self.activate(&session).await?;
                }
            }
            SessionStatus::Active => {
                // A db-Active session may be missing from the tracker after a
                // restart that raced rehydration.
                if self.tracker.get(session_id).await.is_none()
                    && self.tracker.activate(live_from_row(&session)).await
                {
                    self.supervisor.arm(Arc::clone(self), session_id).await;
                }
                self.tracker.touch(session_id).await;
            }
            // Rejected above.
            SessionStatus::Ended => {}
        }
        Ok(())
    }

    /// Pending -> Active: persist first (status guard makes racing joins
    /// single-winner), then track, arm the watcher and announce.
    async fn activate(self: &Arc<Self>, session: &ChatSession) -> Result<(), HubError> {
        // The counselor's current rate is frozen into the session here. A
        // dangling counselor reference fails the activation rather than
        // silently producing a zero-rate session.
        let price = self
            .repo
            .get_counselor(session.counselor_id)
            .await?
            .ok_or_else(|| {
                HubError::Persistence(anyhow::anyhow!(
                    "counselor {} missing for session {}",
                    session.counselor_id,
                    session.id
                ))
            })?
            .price_cents_per_minute;
        let start_time = Utc::now();

        if !self
            .repo
            .activate_session(session.id, start_time, price)
            .await?
        {
            // Lost the activation race; the winner already announced.
            return Ok(());
        }

        self.tracker
            .activate(LiveSession {
                session_id: session.id,
                order_id: session.order_id,
                user_id: session.user_id,
                counselor_id: session.counselor_id,
                price_cents_per_minute: price,
                started_at: start_time,
                last_activity: start_time,
            })
            .await;
        self.supervisor.arm(Arc::clone(self), session.id).await;

        info!(
            session_id = session.id,
            price_cents_per_minute = price,
            "Session activated"
        );
        self.rooms
            .broadcast(
                session.id,
                ServerMessage::session_start(session.id, start_time, price),
            )
            .await;
        Ok(())
    }

    /// `message`: persist, then fan out to everyone else in the room.
    pub async fn send_chat_message(
        &self,
        handle: &ClientHandle,
        session_id: i64,
        content: &str,
        content_type: &str,
        file_url: Option<&str>,
    ) -> Result<(), HubError> {
        let live = self.require_live(session_id).await?;
        let role = self
            .role_of(&live, handle.participant_id)
            .ok_or(HubError::NotAuthorized)?;

        let msg = self
            .repo
            .insert_message(
                session_id,
                handle.participant_id,
                role,
                content_type,
                content,
                file_url,
            )
            .await?;

        self.rooms
            .broadcast_except(session_id, handle.participant_id, ServerMessage::chat_message(&msg))
            .await;
        self.tracker.touch(session_id).await;
        Ok(())
    }

    /// `typing` / `typing_stop`: ephemeral, other party only, never persisted.
    pub async fn typing(
        &self,
        handle: &ClientHandle,
        session_id: i64,
        stopped: bool,
    ) -> Result<(), HubError> {
        let live = self.require_live(session_id).await?;
        let other = live
            .other_party(handle.participant_id)
            .ok_or(HubError::NotAuthorized)?;

        let msg = if stopped {
            ServerMessage::typing_stop(session_id, handle.participant_id)
        } else {
            ServerMessage::typing(session_id, handle.participant_id)
        };
        self.rooms.send_to_member(session_id, other, msg).await;
        self.tracker.touch(session_id).await;
        Ok(())
    }

    /// `read`: mark a stored message read and notify its sender. Only the
    /// receiving side may issue the receipt; duplicates are silent no-ops.
    pub async fn mark_read(
        &self,
        handle: &ClientHandle,
        session_id: i64,
        message_id: i64,
    ) -> Result<(), HubError> {
        let live = self.require_live(session_id).await?;
        if !live.is_party(handle.participant_id) {
            return Err(HubError::NotAuthorized);
        }

        let msg = self
            .repo
            .get_message(message_id)
            .await?
            .ok_or(HubError::MessageNotFound)?;
        if msg.session_id != session_id || msg.sender_id == handle.participant_id {
            return Err(HubError::NotAuthorized);
        }

        let read_at = Utc::now();
        if self.repo.mark_message_read(message_id, read_at).await? {
            self.rooms
                .send_to_member(
                    session_id,
                    msg.sender_id,
                    ServerMessage::message_read(session_id, message_id, handle.participant_id, read_at),
                )
                .await;
        }
        self.tracker.touch(session_id).await;
        Ok(())
    }

    /// `leave`: counselor-only business event that ends and settles the
    /// session. A user's leave is refused; users going away is what the
    /// inactivity timeout is for.
    pub async fn leave(
        &self,
        handle: &ClientHandle,
        session_id: i64,
    ) -> Result<BillingRecord, HubError> {
        let live = self.require_live(session_id).await?;
        if !live.is_party(handle.participant_id) {
            return Err(HubError::NotAuthorized);
        }
        if handle.participant_id != live.counselor_id {
            return Err(HubError::Forbidden);
        }
        self.end_session(session_id, EndedBy::Counselor).await
    }

    /// Active -> Ended, exactly once. The tracker removal decides the winner
    /// of any leave/timeout race; settlement failure reinstates the session
    /// so the sweep retries.
    pub async fn end_session(
        &self,
        session_id: i64,
        ended_by: EndedBy,
    ) -> Result<BillingRecord, HubError> {
        let live = self
            .tracker
            .take_for_settlement(session_id)
            .await
            .ok_or(HubError::AlreadyEnded)?;

        let ended_at = Utc::now();
        match self.billing.settle(&live, ended_at).await {
            Ok(record) => {
                self.supervisor.disarm(session_id).await;
                info!(session_id, ended_by = ended_by.as_str(), "Session ended");
                self.rooms
                    .broadcast(session_id, ServerMessage::session_end(session_id, ended_by))
                    .await;
                self.rooms
                    .broadcast(session_id, ServerMessage::billing(&record))
                    .await;
                self.rooms.discard(session_id).await;
                Ok(record)
            }
            Err(e) => {
                // Stay visibly Active so the next sweep retries settlement.
                self.tracker.reinstate(live).await;
                warn!(session_id, "Settlement failed, session reinstated: {e:#}");
                Err(HubError::Persistence(e))
            }
        }
    }

    /// Timeout path; losing the race to a concurrent leave is expected.
    pub async fn force_timeout(&self, session_id: i64) {
        match self.end_session(session_id, EndedBy::Timeout).await {
            Ok(_) => {}
            Err(e) if e.is_benign() => {}
            Err(e) => warn!(session_id, "Timeout settlement failed: {e}"),
        }
    }

    /// Sweep backstop: force-timeout every session whose last activity is
    /// older than the inactivity window.
    pub async fn sweep_stale(&self) {
        let window = chrono::Duration::from_std(self.config.inactivity_timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(30 * 60));
        let stale = self.tracker.stale_sessions(window, Utc::now()).await;
        for session_id in stale {
            info!(session_id, "Sweep found stale session, forcing timeout");
            self.force_timeout(session_id).await;
        }
    }

    /// Transport-level cleanup. Dropping a socket never ends a session; the
    /// timeout supervisor is the backstop for a silently gone participant.
    pub async fn on_disconnect(&self, handle: &ClientHandle) {
        self.registry
            .unregister(handle.participant_id, &handle.connection_id)
            .await;
        let left = self
            .rooms
            .leave_all(handle.participant_id, &handle.connection_id)
            .await;
        if !left.is_empty() {
            debug!(
                participant_id = handle.participant_id,
                sessions = ?left,
                "Connection left session rooms"
            );
        }
    }

    /// Resolve a live session, mapping absence to the precise error.
    async fn require_live(&self, session_id: i64) -> Result<LiveSession, HubError> {
        if let Some(live) = self.tracker.get(session_id).await {
            return Ok(live);
        }
        match self.repo.get_session(session_id).await? {
            None => Err(HubError::SessionNotFound),
            Some(s) if s.status == SessionStatus::Ended => Err(HubError::AlreadyEnded),
            Some(_) => Err(HubError::NotActive),
        }
    }

    fn role_of(&self, live: &LiveSession, participant_id: i64) -> Option<ParticipantRole> {
        if participant_id == live.counselor_id {
            Some(ParticipantRole::Counselor)
        } else if participant_id == live.user_id {
            Some(ParticipantRole::User)
        } else {
            None
        }
    }
}

fn live_from_row(session: &ChatSession) -> LiveSession {
    let started_at = session.start_time.unwrap_or(session.created_at);
    LiveSession {
        session_id: session.id,
        order_id: session.order_id,
        user_id: session.user_id,
        counselor_id: session.counselor_id,
        price_cents_per_minute: session.price_cents_per_minute,
        started_at,
        // Activity restarts from now: a restart must not instantly time out
        // every rehydrated session.
        last_activity: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_helpers::test_repository;
    use tokio::sync::mpsc;

    struct Fixture {
        hub: Arc<ChatHub>,
        session_id: i64,
        user_id: i64,
        counselor_id: i64,
    }

    async fn fixture() -> Fixture {
        let repo = test_repository().await;
        let counselor_id = repo.create_counselor("Dr. Chen", 200).await.unwrap();
        let user_id = 100;
        let session_id = repo.create_session(1, user_id, counselor_id).await.unwrap();
        let hub = ChatHub::new(repo, HubConfig::default());
        Fixture {
            hub,
            session_id,
            user_id,
            counselor_id,
        }
    }

    fn connect(participant_id: i64) -> (ClientHandle, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(32);
        (
            ClientHandle::new(uuid::Uuid::new_v4().to_string(), participant_id, tx),
            rx,
        )
    }

    fn drain(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[tokio::test]
    async fn second_distinct_join_activates() {
        let f = fixture().await;
        let (user, mut user_rx) = connect(f.user_id);
        let (counselor, mut counselor_rx) = connect(f.counselor_id);

        f.hub.join(&user, f.session_id).await.unwrap();
        // One party present: still pending, no session_start yet.
        assert!(f.hub.tracker().get(f.session_id).await.is_none());
        let kinds: Vec<_> = drain(&mut user_rx).iter().map(|m| m.kind).collect();
        assert_eq!(kinds, vec!["join_success"]);

        f.hub.join(&counselor, f.session_id).await.unwrap();
        let live = f.hub.tracker().get(f.session_id).await.unwrap();
        assert_eq!(live.price_cents_per_minute, 200);

        // Both parties see session_start.
        let kinds: Vec<_> = drain(&mut user_rx).iter().map(|m| m.kind).collect();
        assert_eq!(kinds, vec!["session_start"]);
        let kinds: Vec<_> = drain(&mut counselor_rx).iter().map(|m| m.kind).collect();
        assert_eq!(kinds, vec!["join_success", "session_start"]);
    }

    #[tokio::test]
    async fn same_party_rejoin_does_not_activate() {
        let f = fixture().await;
        let (user, _rx1) = connect(f.user_id);
        f.hub.join(&user, f.session_id).await.unwrap();

        // Same participant reconnects; still only one distinct party.
        let (user2, _rx2) = connect(f.user_id);
        f.hub.join(&user2, f.session_id).await.unwrap();
        assert!(f.hub.tracker().get(f.session_id).await.is_none());
    }

    #[tokio::test]
    async fn outsider_is_not_authorized() {
        let f = fixture().await;
        let (outsider, _rx) = connect(999);
        assert!(matches!(
            f.hub.join(&outsider, f.session_id).await,
            Err(HubError::NotAuthorized)
        ));
        assert!(matches!(
            f.hub.join(&outsider, 12345).await,
            Err(HubError::SessionNotFound)
        ));
    }

    async fn activate(f: &Fixture) -> (ClientHandle, mpsc::Receiver<ServerMessage>, ClientHandle, mpsc::Receiver<ServerMessage>) {
        let (user, mut user_rx) = connect(f.user_id);
        let (counselor, mut counselor_rx) = connect(f.counselor_id);
        f.hub.join(&user, f.session_id).await.unwrap();
        f.hub.join(&counselor, f.session_id).await.unwrap();
        drain(&mut user_rx);
        drain(&mut counselor_rx);
        (user, user_rx, counselor, counselor_rx)
    }

    #[tokio::test]
    async fn chat_message_reaches_only_the_other_side() {
        let f = fixture().await;
        let (user, mut user_rx, _counselor, mut counselor_rx) = activate(&f).await;

        f.hub
            .send_chat_message(&user, f.session_id, "hello", "text", None)
            .await
            .unwrap();

        assert!(user_rx.try_recv().is_err());
        let received = counselor_rx.try_recv().unwrap();
        assert_eq!(received.kind, "message");
        assert_eq!(received.data["content"], "hello");
        assert_eq!(received.data["sender_type"], "user");
    }

    #[tokio::test]
    async fn typing_goes_to_other_party_only_and_is_not_persisted() {
        let f = fixture().await;
        let (user, mut user_rx, _counselor, mut counselor_rx) = activate(&f).await;

        f.hub.typing(&user, f.session_id, false).await.unwrap();
        f.hub.typing(&user, f.session_id, true).await.unwrap();

        assert!(user_rx.try_recv().is_err());
        assert_eq!(counselor_rx.try_recv().unwrap().kind, "typing");
        assert_eq!(counselor_rx.try_recv().unwrap().kind, "typing_stop");

        let (messages, total) = f.hub.repo().message_history(f.session_id, 1, 10).await.unwrap();
        assert!(messages.is_empty());
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn read_receipt_notifies_sender_once() {
        let f = fixture().await;
        let (user, mut user_rx, counselor, _counselor_rx) = activate(&f).await;

        f.hub
            .send_chat_message(&user, f.session_id, "hi", "text", None)
            .await
            .unwrap();
        let (messages, _) = f.hub.repo().message_history(f.session_id, 1, 10).await.unwrap();
        let message_id = messages[0].id;

        // The sender cannot ack their own message.
        assert!(matches!(
            f.hub.mark_read(&user, f.session_id, message_id).await,
            Err(HubError::NotAuthorized)
        ));

        f.hub
            .mark_read(&counselor, f.session_id, message_id)
            .await
            .unwrap();
        let receipt = user_rx.try_recv().unwrap();
        assert_eq!(receipt.kind, "message_read");
        assert_eq!(receipt.data["message_id"], message_id);

        // Duplicate receipt: no second notification.
        f.hub
            .mark_read(&counselor, f.session_id, message_id)
            .await
            .unwrap();
        assert!(user_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn user_leave_is_forbidden_and_bills_nothing() {
        let f = fixture().await;
        let (user, _user_rx, _counselor, _counselor_rx) = activate(&f).await;

        assert!(matches!(
            f.hub.leave(&user, f.session_id).await,
            Err(HubError::Forbidden)
        ));
        // Session stays live and no billing record exists.
        assert!(f.hub.tracker().get(f.session_id).await.is_some());
        assert!(
            f.hub
                .repo()
                .get_billing_for_session(f.session_id)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn counselor_leave_settles_and_broadcasts() {
        let f = fixture().await;
        let (_user, mut user_rx, counselor, _counselor_rx) = activate(&f).await;

        let record = f.hub.leave(&counselor, f.session_id).await.unwrap();
        assert_eq!(record.billed_minutes, 1);
        assert_eq!(record.total_amount_cents, 200);
        assert_eq!(
            record.platform_fee_cents + record.counselor_fee_cents,
            record.total_amount_cents
        );

        let kinds: Vec<_> = drain(&mut user_rx).iter().map(|m| m.kind).collect();
        assert_eq!(kinds, vec!["session_end", "billing"]);

        // Second leave is the idempotent no-op.
        assert!(matches!(
            f.hub.leave(&counselor, f.session_id).await,
            Err(HubError::AlreadyEnded)
        ));
    }

    #[tokio::test]
    async fn join_after_end_is_already_ended() {
        let f = fixture().await;
        let (_user, _user_rx, counselor, _counselor_rx) = activate(&f).await;
        f.hub.leave(&counselor, f.session_id).await.unwrap();

        // A party rejoining the ended session is rejected and gets no
        // join_success; the room stays gone.
        let (user_again, mut rx) = connect(f.user_id);
        assert!(matches!(
            f.hub.join(&user_again, f.session_id).await,
            Err(HubError::AlreadyEnded)
        ));
        assert!(rx.try_recv().is_err());
        assert!(f.hub.rooms().members(f.session_id).await.is_empty());
    }

    #[tokio::test]
    async fn ending_discards_the_room() {
        let f = fixture().await;
        let (_user, _user_rx, counselor, _counselor_rx) = activate(&f).await;
        assert_eq!(f.hub.rooms().member_count(f.session_id).await, 2);

        f.hub.leave(&counselor, f.session_id).await.unwrap();
        // Membership never outlives the session, even with both sockets
        // still connected.
        assert_eq!(f.hub.rooms().member_count(f.session_id).await, 0);
    }

    #[tokio::test]
    async fn activation_fails_without_counselor_row() {
        let repo = test_repository().await;
        // Session references a counselor that was never created.
        let session_id = repo.create_session(1, 100, 999).await.unwrap();
        let hub = ChatHub::new(repo, HubConfig::default());

        let (user, _rx1) = connect(100);
        let (counselor, _rx2) = connect(999);
        hub.join(&user, session_id).await.unwrap();
        assert!(matches!(
            hub.join(&counselor, session_id).await,
            Err(HubError::Persistence(_))
        ));

        // Nothing activated at a zero rate.
        assert!(hub.tracker().get(session_id).await.is_none());
        let session = hub.repo().get_session(session_id).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Pending);
    }

    #[tokio::test]
    async fn leave_before_activation_is_not_active() {
        let f = fixture().await;
        let (counselor, _rx) = connect(f.counselor_id);
        f.hub.join(&counselor, f.session_id).await.unwrap();

        assert!(matches!(
            f.hub.leave(&counselor, f.session_id).await,
            Err(HubError::NotActive)
        ));
    }

    #[tokio::test]
    async fn timeout_and_leave_race_settles_once() {
        let f = fixture().await;
        let (_user, _user_rx, counselor, _counselor_rx) = activate(&f).await;

        // Timeout wins; the counselor's leave arrives late.
        f.hub.force_timeout(f.session_id).await;
        assert!(matches!(
            f.hub.leave(&counselor, f.session_id).await,
            Err(HubError::AlreadyEnded)
        ));

        let record = f
            .hub
            .repo()
            .get_billing_for_session(f.session_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.billed_minutes, 1);
    }

    #[tokio::test]
    async fn disconnect_never_ends_the_session() {
        let f = fixture().await;
        let (user, _user_rx, _counselor, _counselor_rx) = activate(&f).await;

        f.hub.registry().register(user.clone()).await;
        f.hub.on_disconnect(&user).await;

        assert!(!f.hub.registry().is_online(f.user_id).await);
        assert!(f.hub.rooms().members(f.session_id).await.contains(&f.counselor_id));
        // Still live: the supervisor, not the transport, ends sessions.
        assert!(f.hub.tracker().get(f.session_id).await.is_some());
    }

    #[tokio::test]
    async fn rehydrate_restores_db_active_sessions() {
        let repo = test_repository().await;
        let counselor_id = repo.create_counselor("C", 150).await.unwrap();
        let session_id = repo.create_session(1, 100, counselor_id).await.unwrap();
        repo.activate_session(session_id, Utc::now(), 150)
            .await
            .unwrap();

        let hub = ChatHub::new(repo, HubConfig::default());
        let restored = hub.rehydrate().await.unwrap();
        assert_eq!(restored, 1);
        let live = hub.tracker().get(session_id).await.unwrap();
        assert_eq!(live.price_cents_per_minute, 150);
    }
}
