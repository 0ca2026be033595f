// crates/jobs/src/hub.rs
//! Per-user broadcast registry for server-push job updates.
//!
//! The hub owns one set of subscriber channels per user. Broadcasts target
//! a user, not an individual viewer, so several browser tabs can follow the
//! same jobs at once. Channels that fail a write are pruned during the send
//! rather than left to leak.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Identifier for a registered subscriber channel.
pub type ClientId = u64;

/// First frame written to every new subscriber, so clients can detect a
/// successful subscription without racing the first job update.
const CONNECTED_PREAMBLE: &str = r#"{"type":"connected"}"#;

struct Client {
    id: ClientId,
    tx: mpsc::UnboundedSender<String>,
}

/// Registry of live subscriber channels, keyed by user id.
///
/// Explicitly constructed and shared via `Arc` — each test builds a fresh
/// instance. All mutations and broadcast iterations take the registry lock;
/// sends are non-blocking so the lock is never held across an await.
pub struct EventHub {
    next_id: AtomicU64,
    clients: Mutex<HashMap<i64, Vec<Client>>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Register a subscriber channel for a user.
    ///
    /// Writes the connection preamble into the channel before registering it.
    /// A channel that is already closed at subscribe time is not registered;
    /// the returned id is still valid to pass to `remove_client` (a no-op).
    pub fn add_client(&self, user_id: i64, tx: mpsc::UnboundedSender<String>) -> ClientId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        if tx.send(CONNECTED_PREAMBLE.to_string()).is_err() {
            tracing::debug!(user_id, client_id = id, "subscriber closed before registration");
            return id;
        }

        match self.clients.lock() {
            Ok(mut map) => map.entry(user_id).or_default().push(Client { id, tx }),
            Err(e) => tracing::error!("Mutex poisoned adding client: {e}"),
        }
        id
    }

    /// Broadcast a message to every live channel registered for a user.
    ///
    /// Channels whose write fails (peer disconnected) are removed as part of
    /// the send. A user with no registered channels is a no-op — such users
    /// are covered by the polling endpoints instead.
    pub fn send<T: Serialize>(&self, user_id: i64, message: &T) {
        let payload = match serde_json::to_string(message) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(user_id, error = %e, "failed to serialize push message");
                return;
            }
        };

        let mut map = match self.clients.lock() {
            Ok(map) => map,
            Err(e) => {
                tracing::error!("Mutex poisoned sending to clients: {e}");
                return;
            }
        };
        let Some(channels) = map.get_mut(&user_id) else {
            return;
        };

        let before = channels.len();
        channels.retain(|client| client.tx.send(payload.clone()).is_ok());
        let pruned = before - channels.len();
        if pruned > 0 {
            tracing::debug!(user_id, pruned, "pruned dead subscriber channels");
        }
        if channels.is_empty() {
            map.remove(&user_id);
        }
    }

    /// Remove a single subscriber channel, pruning the user entry when empty.
    pub fn remove_client(&self, user_id: i64, client_id: ClientId) {
        let mut map = match self.clients.lock() {
            Ok(map) => map,
            Err(e) => {
                tracing::error!("Mutex poisoned removing client: {e}");
                return;
            }
        };
        if let Some(channels) = map.get_mut(&user_id) {
            channels.retain(|client| client.id != client_id);
            if channels.is_empty() {
                map.remove(&user_id);
            }
        }
    }

    /// Remove every subscriber channel for a user.
    pub fn remove_all_clients(&self, user_id: i64) {
        match self.clients.lock() {
            Ok(mut map) => {
                map.remove(&user_id);
            }
            Err(e) => tracing::error!("Mutex poisoned removing clients: {e}"),
        }
    }

    /// Number of currently-live channels for a user. Diagnostics only.
    pub fn client_count(&self, user_id: i64) -> usize {
        match self.clients.lock() {
            Ok(map) => map.get(&user_id).map_or(0, Vec::len),
            Err(e) => {
                tracing::error!("Mutex poisoned counting clients: {e}");
                0
            }
        }
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}
