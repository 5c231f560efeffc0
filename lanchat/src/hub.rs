//! Host-side broadcast fan-out.
//!
//! The [`Hub`] writes one frame to every registered peer. A peer whose
//! writer channel has closed is removed from the registry and the
//! fan-out continues with the remaining peers.

use std::sync::Arc;

use lanchat_proto::codec;

use crate::registry::PeerRegistry;

/// Fans frames out to all registered peers.
#[derive(Debug, Clone)]
pub struct Hub {
    registry: Arc<PeerRegistry>,
}

impl Hub {
    /// Creates a hub over a shared registry.
    #[must_use]
    pub const fn new(registry: Arc<PeerRegistry>) -> Self {
        Self { registry }
    }

    /// Returns the registry this hub broadcasts to.
    #[must_use]
    pub const fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    /// Sends `frame` to every registered peer and returns how many peers
    /// accepted it. Peers whose writer has closed are pruned.
    pub fn broadcast(&self, frame: &str) -> usize {
        let peers = self.registry.snapshot();
        let mut delivered = 0;
        for peer in peers {
            if peer.writer.send(frame.to_string()).is_ok() {
                delivered += 1;
            } else {
                tracing::warn!(
                    peer = %peer.display_name,
                    key = %peer.key,
                    "peer writer closed, removing from registry"
                );
                self.registry.remove(peer.key);
            }
        }
        tracing::debug!(delivered, frame = %codec::preview(frame), "broadcast");
        delivered
    }
}
