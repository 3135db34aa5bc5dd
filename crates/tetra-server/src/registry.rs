//! Live WebSocket viewers for push notifications.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use axum::body::Bytes;
use tokio::sync::mpsc::Sender;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

/// Notifications a viewer may have queued before it counts as stalled.
pub const OUTBOX_CAPACITY: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

/// Outbound payload queued for a connection's writer task.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Text(String),
    Binary(Bytes),
}

#[derive(Debug)]
struct Entry {
    id: ConnectionId,
    sender: Sender<Notification>,
    connected_at: Instant,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    entries: Vec<Entry>,
}

/// Registered channels in insertion order; broadcasts follow that order.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<Mutex<Inner>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self, sender: Sender<Notification>) -> ConnectionId {
        let mut inner = self.lock();
        let id = ConnectionId(inner.next_id);
        inner.next_id += 1;
        inner.entries.push(Entry {
            id,
            sender,
            connected_at: Instant::now(),
        });
        debug!(connection = id.0, active = inner.entries.len(), "added websocket connection");
        id
    }

    /// Removes `id`; returns whether it was registered.
    pub fn disconnect(&self, id: ConnectionId) -> bool {
        let mut inner = self.lock();
        let Some(position) = inner.entries.iter().position(|entry| entry.id == id) else {
            return false;
        };
        let entry = inner.entries.remove(position);
        debug!(
            connection = id.0,
            active = inner.entries.len(),
            connected_ms = entry.connected_at.elapsed().as_millis() as u64,
            "removed websocket connection"
        );
        true
    }

    pub fn broadcast_text(&self, message: impl Into<String>) -> usize {
        self.broadcast(Notification::Text(message.into()))
    }

    pub fn broadcast_bytes(&self, payload: impl Into<Bytes>) -> usize {
        self.broadcast(Notification::Binary(payload.into()))
    }

    /// Queues to every connection in registration order and returns how many
    /// accepted the message. Connections whose channel is closed, or whose
    /// outbox is full, are dropped without affecting delivery to the rest.
    pub fn broadcast(&self, notification: Notification) -> usize {
        let mut inner = self.lock();
        let mut delivered = 0;
        inner.entries.retain(|entry| match entry.sender.try_send(notification.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                warn!(connection = entry.id.0, "dropping stalled websocket connection");
                false
            }
            Err(TrySendError::Closed(_)) => {
                warn!(connection = entry.id.0, "dropping websocket connection after failed send");
                false
            }
        });
        debug!(delivered, kind = notification.kind(), "broadcast notification");
        delivered
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Notification {
    fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Binary(_) => "binary",
        }
    }
}
