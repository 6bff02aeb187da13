//! Connection registry: participant id -> live outbound handle.

use std::collections::HashMap;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, warn};

use super::protocol::ServerMessage;

/// Cloneable handle to one connection's writer task.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    pub connection_id: String,
    pub participant_id: i64,
    tx: mpsc::Sender<ServerMessage>,
}

impl ClientHandle {
    pub fn new(connection_id: String, participant_id: i64, tx: mpsc::Sender<ServerMessage>) -> Self {
        Self {
            connection_id,
            participant_id,
            tx,
        }
    }

    /// Best-effort delivery: a full outbound buffer drops the frame rather
    /// than blocking the hub on a slow consumer.
    pub fn send(&self, msg: ServerMessage) -> bool {
        match self.tx.try_send(msg) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    connection_id = %self.connection_id,
                    participant_id = self.participant_id,
                    "Outbound buffer full, dropping frame"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(
                    connection_id = %self.connection_id,
                    "Send to closed connection"
                );
                false
            }
        }
    }
}

/// All currently connected participants. One live connection per participant;
/// a reconnect replaces the previous handle.
pub struct ConnectionRegistry {
    clients: RwLock<HashMap<i64, ClientHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register(&self, handle: ClientHandle) {
        self.clients
            .write()
            .await
            .insert(handle.participant_id, handle);
    }

    /// Remove the participant's entry only if it still belongs to this
    /// connection. A replaced connection racing its own cleanup must not
    /// evict its replacement.
    pub async fn unregister(&self, participant_id: i64, connection_id: &str) -> bool {
        let mut clients = self.clients.write().await;
        match clients.get(&participant_id) {
            Some(h) if h.connection_id == connection_id => {
                clients.remove(&participant_id);
                true
            }
            _ => false,
        }
    }

    pub async fn is_online(&self, participant_id: i64) -> bool {
        self.clients.read().await.contains_key(&participant_id)
    }

    pub async fn list_online(&self) -> Vec<i64> {
        self.clients.read().await.keys().copied().collect()
    }

    pub async fn get(&self, participant_id: i64) -> Option<ClientHandle> {
        self.clients.read().await.get(&participant_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }
}
