//! Connection registry.
//!
//! Tracks inbound requests that are waiting for a reply. Each entry owns the
//! sending half of a oneshot channel; the request handler awaits the other
//! half. An entry leaves the registry exactly once: when a broadcast writes
//! to it, or when its guard is dropped (rejection, client disconnect).

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use dashmap::DashMap;
use portico_protocol::ConnectionId;
use tokio::sync::oneshot;
use tracing::debug;

/// Reply half held by a waiting request handler.
pub type ReplyReceiver = oneshot::Receiver<Bytes>;

/// Returned by [`ConnectionRegistry::register`] when the registry is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryFull {
    pub capacity: usize,
}

/// Per-handle result of a broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Handles that received the payload.
    pub delivered: usize,
    /// Handles whose request had already gone away.
    pub closed: usize,
}

struct Entry {
    /// Registration sequence number; broadcasts write in this order.
    seq: u64,
    reply: oneshot::Sender<Bytes>,
}

#[derive(Clone)]
pub struct ConnectionRegistry {
    entries: Arc<DashMap<ConnectionId, Entry>>,
    next_seq: Arc<AtomicU64>,
    capacity: usize,
}

impl ConnectionRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            next_seq: Arc::new(AtomicU64::new(0)),
            capacity,
        }
    }

    /// Register a new open connection.
    ///
    /// The capacity check and the insert are not atomic, so under heavy
    /// concurrent arrival the registry may briefly exceed `capacity`.
    pub fn register(&self) -> Result<(ConnectionGuard, ReplyReceiver), RegistryFull> {
        if self.entries.len() >= self.capacity {
            return Err(RegistryFull {
                capacity: self.capacity,
            });
        }

        let id = ConnectionId::new();
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let (reply, rx) = oneshot::channel();
        self.entries.insert(id.clone(), Entry { seq, reply });

        let guard = ConnectionGuard {
            registry: self.clone(),
            id,
        };
        Ok((guard, rx))
    }

    /// Remove a connection without replying. Returns whether it was present.
    pub fn remove(&self, id: &ConnectionId) -> bool {
        self.entries.remove(id).is_some()
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write `payload` to every connection registered at call time, in
    /// arrival order, closing each.
    ///
    /// A handle is removed before it is written, so concurrent broadcasts
    /// never write the same handle twice.
    pub fn broadcast(&self, payload: Bytes) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        for id in self.ids_in_arrival_order() {
            let Some((_, entry)) = self.entries.remove(&id) else {
                continue;
            };
            if entry.reply.send(payload.clone()).is_ok() {
                report.delivered += 1;
            } else {
                debug!(connection = %id, "Connection closed before broadcast");
                report.closed += 1;
            }
        }
        report
    }

    fn ids_in_arrival_order(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<(u64, ConnectionId)> = self
            .entries
            .iter()
            .map(|e| (e.value().seq, e.key().clone()))
            .collect();
        ids.sort_unstable_by_key(|(seq, _)| *seq);
        ids.into_iter().map(|(_, id)| id).collect()
    }
}

/// Keeps a connection registered for as long as its request is in flight.
pub struct ConnectionGuard {
    registry: ConnectionRegistry,
    id: ConnectionId,
}

impl ConnectionGuard {
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.id);
    }
}
