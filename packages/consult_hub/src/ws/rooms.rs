//! Per-session rooms: routing structure for message fan-out.
//!
//! A room is pure plumbing. Emptying a room never ends the session; the
//! lifecycle state machine and the timeout supervisor own that.

use std::collections::HashMap;
use tokio::sync::RwLock;

use super::protocol::ServerMessage;
use super::registry::ClientHandle;

pub struct RoomRegistry {
    rooms: RwLock<HashMap<i64, HashMap<i64, ClientHandle>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
        }
    }

    /// Add a member. The caller has already checked that the participant is
    /// one of the session's two parties.
    pub async fn join(&self, session_id: i64, handle: ClientHandle) {
        let mut rooms = self.rooms.write().await;
        rooms
            .entry(session_id)
            .or_default()
            .insert(handle.participant_id, handle);
    }

    pub async fn leave(&self, session_id: i64, participant_id: i64) {
        let mut rooms = self.rooms.write().await;
        if let Some(members) = rooms.get_mut(&session_id) {
            members.remove(&participant_id);
            if members.is_empty() {
                rooms.remove(&session_id);
            }
        }
    }

    /// Remove this connection from every room it is in (disconnect cleanup).
    /// Membership owned by a newer connection of the same participant is
    /// left alone.
    pub async fn leave_all(&self, participant_id: i64, connection_id: &str) -> Vec<i64> {
        let mut rooms = self.rooms.write().await;
        let mut left = Vec::new();
        let mut emptied = Vec::new();
        for (session_id, members) in rooms.iter_mut() {
            let matches = members
                .get(&participant_id)
                .is_some_and(|h| h.connection_id == connection_id);
            if matches {
                members.remove(&participant_id);
                left.push(*session_id);
                if members.is_empty() {
                    emptied.push(*session_id);
                }
            }
        }
        for id in emptied {
            rooms.remove(&id);
        }
        left
    }

    /// Drop an entire room. Called when its session reaches Ended so that
    /// membership never outlives the session.
    pub async fn discard(&self, session_id: i64) {
        self.rooms.write().await.remove(&session_id);
    }

    pub async fn members(&self, session_id: i64) -> Vec<i64> {
        self.rooms
            .read()
            .await
            .get(&session_id)
            .map(|m| m.keys().copied().collect())
            .unwrap_or_default()
    }

    pub async fn member_count(&self, session_id: i64) -> usize {
        self.rooms
            .read()
            .await
            .get(&session_id)
            .map(|m| m.len())
            .unwrap_or(0)
    }

    pub async fn broadcast(&self, session_id: i64, msg: ServerMessage) {
        let handles: Vec<ClientHandle> = {
            let rooms = self.rooms.read().await;
            rooms
                .get(&session_id)
                .map(|m| m.values().cloned().collect())
                .unwrap_or_default()
        };
        for h in handles {
            h.send(msg.clone());
        }
    }

    pub async fn broadcast_except(&self, session_id: i64, exclude: i64, msg: ServerMessage) {
        let handles: Vec<ClientHandle> = {
            let rooms = self.rooms.read().await;
            rooms
                .get(&session_id)
                .map(|m| {
                    m.values()
                        .filter(|h| h.participant_id != exclude)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        };
        for h in handles {
            h.send(msg.clone());
        }
    }

    /// Targeted delivery to one room member. Returns false if they are not
    /// in the room (offline participants just miss ephemeral events).
    pub async fn send_to_member(&self, session_id: i64, participant_id: i64, msg: ServerMessage) -> bool {
        let handle = {
            let rooms = self.rooms.read().await;
            rooms
                .get(&session_id)
                .and_then(|m| m.get(&participant_id))
                .cloned()
        };
        match handle {
            Some(h) => h.send(msg),
            None => false,
        }
    }
}
