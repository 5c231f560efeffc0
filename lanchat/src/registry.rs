//! Registry of live peer writers on the host.
//!
//! Each accepted connection registers the sending half of its writer
//! channel under a fresh [`PeerKey`]. The writer task owning the socket
//! drops the receiving half when a socket write fails, so a failed
//! `send` on a registered writer means the peer is gone.
//!
//! All operations take a short `parking_lot` lock and never hold it
//! across an await point. Broadcasts iterate over a [`snapshot`], so a
//! peer removed concurrently by another worker cannot disturb an
//! in-flight fan-out.
//!
//! [`snapshot`]: PeerRegistry::snapshot

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Sending half of a peer's outbound line channel.
pub type PeerWriter = mpsc::UnboundedSender<String>;

/// Registry-assigned key of one peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerKey(u64);

impl fmt::Display for PeerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

/// A registered peer as seen by a broadcast.
#[derive(Debug, Clone)]
pub struct PeerEntry {
    /// Registry key.
    pub key: PeerKey,
    /// Display name learned from the handshake.
    pub display_name: String,
    /// Outbound channel.
    pub writer: PeerWriter,
}

/// Thread-safe set of active peer writers.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: Mutex<HashMap<PeerKey, PeerEntry>>,
    next_key: AtomicU64,
}

impl PeerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a writer and returns its key.
    pub fn add(&self, display_name: impl Into<String>, writer: PeerWriter) -> PeerKey {
        let key = PeerKey(self.next_key.fetch_add(1, Ordering::Relaxed));
        let entry = PeerEntry {
            key,
            display_name: display_name.into(),
            writer,
        };
        self.peers.lock().insert(key, entry);
        key
    }

    /// Removes a peer, returning its entry if it was still registered.
    pub fn remove(&self, key: PeerKey) -> Option<PeerEntry> {
        self.peers.lock().remove(&key)
    }

    /// Copies the current membership for iteration outside the lock.
    #[must_use]
    pub fn snapshot(&self) -> Vec<PeerEntry> {
        self.peers.lock().values().cloned().collect()
    }

    /// Number of registered peers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.lock().len()
    }

    /// Whether no peer is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.lock().is_empty()
    }

    /// Display names of all registered peers, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .peers
            .lock()
            .values()
            .map(|p| p.display_name.clone())
            .collect();
        names.sort();
        names
    }

    /// Drops every writer, which ends each peer's writer task.
    pub fn clear(&self) -> usize {
        let mut peers = self.peers.lock();
        let count = peers.len();
        peers.clear();
        count
    }
}
