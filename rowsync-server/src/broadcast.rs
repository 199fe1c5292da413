//! Fan-out of one path's outbound messages to all of its clients.
//!
//! Uses a tokio broadcast channel: every client holds its own receiver
//! buffering up to `capacity` frames, so a slow client lags (and is later
//! resynchronized) without holding up the others.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use rowsync_core::MessageSink;

/// A connected client of one path.
#[derive(Debug, Clone, Serialize)]
pub struct ClientInfo {
    pub client_id: Uuid,
    pub addr: Option<SocketAddr>,
    #[serde(skip)]
    pub connected_at: Instant,
}

impl ClientInfo {
    pub fn new(addr: Option<SocketAddr>) -> Self {
        Self {
            client_id: Uuid::new_v4(),
            addr,
            connected_at: Instant::now(),
        }
    }
}

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastStats {
    pub messages_sent: u64,
    pub messages_dropped: u64,
    pub active_clients: usize,
}

/// Counters updated on the hot path without taking a lock.
#[derive(Default)]
struct AtomicBroadcastStats {
    messages_sent: AtomicU64,
    messages_dropped: AtomicU64,
}

/// Broadcast group for a single path.
pub struct BroadcastGroup {
    sender: broadcast::Sender<Arc<str>>,
    clients: RwLock<HashMap<Uuid, ClientInfo>>,
    capacity: usize,
    /// Slots held by connections, from handshake until disconnect
    occupied: AtomicUsize,
    atomic_stats: AtomicBroadcastStats,
}

/// One claimed connection slot of a [`BroadcastGroup`]; released on drop.
pub struct Slot {
    group: Arc<BroadcastGroup>,
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.group.occupied.fetch_sub(1, Ordering::AcqRel);
    }
}

impl BroadcastGroup {
    /// `capacity` frames are buffered per client before it starts lagging.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            clients: RwLock::new(HashMap::new()),
            capacity,
            occupied: AtomicUsize::new(0),
            atomic_stats: AtomicBroadcastStats::default(),
        }
    }

    /// Claim one of `max` slots, or `None` when all are taken.
    pub fn try_reserve(self: &Arc<Self>, max: usize) -> Option<Slot> {
        self.occupied
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < max).then_some(n + 1))
            .ok()?;
        Some(Slot { group: self.clone() })
    }

    pub fn reserved(&self) -> usize {
        self.occupied.load(Ordering::Acquire)
    }

    /// Register a client and return its receiver.
    pub fn add_client(&self, info: ClientInfo) -> broadcast::Receiver<Arc<str>> {
        self.clients.write().insert(info.client_id, info);
        self.sender.subscribe()
    }

    pub fn remove_client(&self, client_id: &Uuid) -> Option<ClientInfo> {
        self.clients.write().remove(client_id)
    }

    /// Send one frame to every receiver. Returns how many got it.
    pub fn broadcast_raw(&self, frame: Arc<str>) -> usize {
        let count = self.sender.send(frame).unwrap_or(0);
        self.atomic_stats.messages_sent.fetch_add(1, Ordering::Relaxed);
        count
    }

    /// Account for frames a lagging receiver skipped.
    pub fn record_dropped(&self, count: u64) {
        self.atomic_stats.messages_dropped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn client_count(&self) -> usize {
        self.clients.read().len()
    }

    pub fn clients(&self) -> Vec<ClientInfo> {
        self.clients.read().values().cloned().collect()
    }

    pub fn has_client(&self, client_id: &Uuid) -> bool {
        self.clients.read().contains_key(client_id)
    }

    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            messages_sent: self.atomic_stats.messages_sent.load(Ordering::Relaxed),
            messages_dropped: self.atomic_stats.messages_dropped.load(Ordering::Relaxed),
            active_clients: self.client_count(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl MessageSink for BroadcastGroup {
    fn send(&self, message: Arc<str>) {
        self.broadcast_raw(message);
    }

    fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}
