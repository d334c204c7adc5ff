//! Connection registry.
//!
//! Tracks live channels per user and per course subscription. All buckets
//! are mutated concurrently from connection handlers, so the maps live
//! behind locks and every operation takes `&self` on one shared, injected
//! instance.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::debug;

use super::messages::ServerMessage;

/// Buffered frames per connection before sends start dropping.
const CONNECTION_BUFFER: usize = 64;

/// Writer handle for one live connection.
///
/// The socket task owns the receiving half and drains it into the sink; the
/// registry only ever pushes serialized frames through the sender.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: String,
    user_id: String,
    sender: mpsc::Sender<String>,
}

impl ConnectionHandle {
    /// Create a handle plus the receiver the socket task drains.
    pub fn new(user_id: impl Into<String>) -> (Self, mpsc::Receiver<String>) {
        let (sender, receiver) = mpsc::channel(CONNECTION_BUFFER);
        (
            Self {
                id: uuid::Uuid::new_v4().to_string(),
                user_id: user_id.into(),
                sender,
            },
            receiver,
        )
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Push one frame. A closed peer reports `false`; a full buffer drops
    /// the frame but keeps the connection (slow consumers lose messages,
    /// they don't block producers).
    fn push(&self, frame: &str) -> bool {
        match self.sender.try_send(frame.to_string()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(connection_id = %self.id, "Connection buffer full, dropping frame");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// Registry bucket counts for health reporting.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct RegistryStats {
    pub users_connected: usize,
    pub total_connections: usize,
    pub course_buckets: usize,
}

/// Registry of live connections.
#[derive(Default)]
pub struct ConnectionRegistry {
    users: RwLock<HashMap<String, Vec<ConnectionHandle>>>,
    courses: RwLock<HashMap<String, Vec<ConnectionHandle>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a connection under its user bucket. No-op if already present.
    pub fn register(&self, connection: &ConnectionHandle) {
        let mut users = self.users.write();
        let bucket = users.entry(connection.user_id.clone()).or_default();
        if !bucket.iter().any(|c| c.id == connection.id) {
            bucket.push(connection.clone());
        }
    }

    /// Drop a connection from its user bucket and every course bucket,
    /// pruning emptied buckets.
    pub fn unregister(&self, connection: &ConnectionHandle) {
        {
            let mut users = self.users.write();
            if let Some(bucket) = users.get_mut(&connection.user_id) {
                bucket.retain(|c| c.id != connection.id);
                if bucket.is_empty() {
                    users.remove(&connection.user_id);
                }
            }
        }

        let mut courses = self.courses.write();
        courses.retain(|_, bucket| {
            bucket.retain(|c| c.id != connection.id);
            !bucket.is_empty()
        });
    }

    /// Add a connection to a course bucket without touching the user bucket.
    /// No-op if already subscribed.
    pub fn subscribe_course(&self, connection: &ConnectionHandle, course_id: &str) {
        let mut courses = self.courses.write();
        let bucket = courses.entry(course_id.to_string()).or_default();
        if !bucket.iter().any(|c| c.id == connection.id) {
            bucket.push(connection.clone());
        }
    }

    /// Remove a connection from one course bucket, pruning it if emptied.
    pub fn unsubscribe_course(&self, connection: &ConnectionHandle, course_id: &str) {
        let mut courses = self.courses.write();
        if let Some(bucket) = courses.get_mut(course_id) {
            bucket.retain(|c| c.id != connection.id);
            if bucket.is_empty() {
                courses.remove(course_id);
            }
        }
    }

    /// Deliver to every live connection of one user. Returns the number of
    /// connections written to; dead peers are silently pruned from the
    /// bucket.
    pub fn send_to_user(&self, user_id: &str, message: &ServerMessage) -> usize {
        let Ok(frame) = serde_json::to_string(message) else {
            return 0;
        };
        let mut users = self.users.write();
        let Some(bucket) = users.get_mut(user_id) else {
            return 0;
        };
        let before = bucket.len();
        bucket.retain(|c| c.push(&frame));
        let delivered = bucket.len();
        if delivered < before {
            debug!(user_id, pruned = before - delivered, "Pruned dead connections");
        }
        if bucket.is_empty() {
            users.remove(user_id);
        }
        delivered
    }

    /// Deliver to every subscriber of one course. Same pruning semantics as
    /// `send_to_user`.
    pub fn send_to_course(&self, course_id: &str, message: &ServerMessage) -> usize {
        let Ok(frame) = serde_json::to_string(message) else {
            return 0;
        };
        let mut courses = self.courses.write();
        let Some(bucket) = courses.get_mut(course_id) else {
            return 0;
        };
        bucket.retain(|c| c.push(&frame));
        let delivered = bucket.len();
        if bucket.is_empty() {
            courses.remove(course_id);
        }
        delivered
    }

    /// Deliver to every connection across all users.
    pub fn broadcast(&self, message: &ServerMessage) -> usize {
        let Ok(frame) = serde_json::to_string(message) else {
            return 0;
        };
        let mut users = self.users.write();
        let mut delivered = 0;
        users.retain(|_, bucket| {
            bucket.retain(|c| c.push(&frame));
            delivered += bucket.len();
            !bucket.is_empty()
        });
        delivered
    }

    pub fn stats(&self) -> RegistryStats {
        let users = self.users.read();
        RegistryStats {
            users_connected: users.len(),
            total_connections: users.values().map(|b| b.len()).sum(),
            course_buckets: self.courses.read().len(),
        }
    }
}
