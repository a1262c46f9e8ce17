//! Session registry: the central system's set of live charge-point links

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info};

use crate::application::ports::OutboundTransport;
use crate::support::errors::TransportError;

/// One accepted WebSocket connection. Frames pushed on `sender` are written
/// by the connection's own loop, which is the single writer of the socket.
#[derive(Debug)]
pub struct Connection {
    /// Distinguishes successive connections of the same charge point.
    pub connection_id: u64,
    pub charge_point_id: String,
    pub subprotocol: String,
    sender: mpsc::UnboundedSender<Message>,
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Connection {
    fn send(&self, message: Message) -> Result<(), TransportError> {
        self.sender
            .send(message)
            .map_err(|_| TransportError::ChannelClosed(self.charge_point_id.clone()))
    }

    fn touch(&mut self) {
        self.last_activity = Utc::now();
    }
}

/// Thread-safe registry of connected charge points
pub struct SessionRegistry {
    sessions: DashMap<String, Connection>,
    next_connection_id: AtomicU64,
}

pub type SharedSessionRegistry = Arc<SessionRegistry>;

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            next_connection_id: AtomicU64::new(1),
        }
    }

    pub fn shared() -> SharedSessionRegistry {
        Arc::new(Self::new())
    }

    /// Register a connection. A charge point id holds at most one
    /// connection; a second registration fails with `DuplicateChannel`.
    pub fn register(
        &self,
        charge_point_id: &str,
        subprotocol: &str,
        sender: mpsc::UnboundedSender<Message>,
    ) -> Result<u64, TransportError> {
        match self.sessions.entry(charge_point_id.to_string()) {
            Entry::Occupied(_) => Err(TransportError::DuplicateChannel(charge_point_id.to_string())),
            Entry::Vacant(slot) => {
                let connection_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
                let now = Utc::now();
                slot.insert(Connection {
                    connection_id,
                    charge_point_id: charge_point_id.to_string(),
                    subprotocol: subprotocol.to_string(),
                    sender,
                    connected_at: now,
                    last_activity: now,
                });
                info!(charge_point_id, subprotocol, connection_id, "Registered charge point session");
                Ok(connection_id)
            }
        }
    }

    /// Remove the session if it still belongs to `connection_id`.
    pub fn unregister(&self, charge_point_id: &str, connection_id: u64) -> bool {
        let removed = self
            .sessions
            .remove_if(charge_point_id, |_, conn| conn.connection_id == connection_id)
            .is_some();
        if removed {
            info!(charge_point_id, connection_id, "Unregistered charge point session");
        } else {
            debug!(charge_point_id, connection_id, "Session already replaced or removed");
        }
        removed
    }

    pub fn send_to(&self, charge_point_id: &str, message: Message) -> Result<(), TransportError> {
        match self.sessions.get(charge_point_id) {
            Some(conn) => conn.send(message),
            None => Err(TransportError::NotConnected(charge_point_id.to_string())),
        }
    }

    pub fn touch(&self, charge_point_id: &str) {
        if let Some(mut conn) = self.sessions.get_mut(charge_point_id) {
            conn.touch();
        }
    }

    pub fn is_connected(&self, charge_point_id: &str) -> bool {
        self.sessions.contains_key(charge_point_id)
    }

    pub fn connected_ids(&self) -> Vec<String> {
        self.sessions.iter().map(|r| r.key().clone()).collect()
    }

    pub fn subprotocol(&self, charge_point_id: &str) -> Option<String> {
        self.sessions
            .get(charge_point_id)
            .map(|conn| conn.subprotocol.clone())
    }

    pub fn last_activity(&self, charge_point_id: &str) -> Option<DateTime<Utc>> {
        self.sessions.get(charge_point_id).map(|conn| conn.last_activity)
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl OutboundTransport for SessionRegistry {
    fn write(&self, channel: &str, frame: String) -> Result<(), TransportError> {
        self.send_to(channel, Message::Text(frame))
    }
}
