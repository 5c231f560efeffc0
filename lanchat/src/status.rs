//! Observable connection status for the presentation layer.
//!
//! Two values, each published through a `tokio::sync::watch` channel so
//! that any number of observers see the latest state:
//! - a connection flag (`true` while hosting or connected to a host)
//! - a human-readable host address, or a failure message

use tokio::sync::watch;

/// Prefix of the address string while hosting.
pub const HOSTING_PREFIX: &str = "Hosting on: ";

/// Prefix of the address string after the host failed to start.
pub const HOST_FAILED_PREFIX: &str = "Host failed: ";

/// Publisher for the connection flag and host address string.
#[derive(Debug)]
pub struct StatusBoard {
    connected: watch::Sender<bool>,
    address: watch::Sender<String>,
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusBoard {
    /// Creates a board reporting "not connected" and no address.
    #[must_use]
    pub fn new() -> Self {
        let (connected, _) = watch::channel(false);
        let (address, _) = watch::channel(String::new());
        Self { connected, address }
    }

    /// Publishes the connection flag.
    pub fn set_connected(&self, connected: bool) {
        let previous = self.connected.send_replace(connected);
        if previous != connected {
            tracing::info!(connected, "connection status changed");
        }
    }

    /// Publishes `Hosting on: <address>`.
    pub fn set_hosting(&self, address: &str) {
        self.address.send_replace(format!("{HOSTING_PREFIX}{address}"));
    }

    /// Publishes `Host failed: <reason>`.
    pub fn set_host_failed(&self, reason: &str) {
        self.address.send_replace(format!("{HOST_FAILED_PREFIX}{reason}"));
    }

    /// Current connection flag.
    #[must_use]
    pub fn connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Current address string.
    #[must_use]
    pub fn address(&self) -> String {
        self.address.borrow().clone()
    }

    /// Subscribes to connection flag changes.
    #[must_use]
    pub fn watch_connected(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }

    /// Subscribes to address string changes.
    #[must_use]
    pub fn watch_address(&self) -> watch::Receiver<String> {
        self.address.subscribe()
    }
}
