//! TCP transport for `LanChat`.
//!
//! - [`host`]: listener that accepts clients, relays their frames through
//!   the [`Hub`], and reports them to the reconciler.
//! - [`client`]: single outbound connection to a host.
//!
//! Every connection runs its own read loop task and its own writer task.
//! Writers are fed through an unbounded channel, so sending never blocks
//! the caller; a broken socket is noticed by the writer task, which then
//! drops its receiver, so the next send on that channel fails.

pub mod client;
pub mod host;

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use lanchat_proto::ChatEvent;
use lanchat_proto::codec;

use crate::hub::Hub;
use crate::registry::PeerWriter;

/// Well-known port of the host listener.
pub const DEFAULT_PORT: u16 = 12345;

/// Errors that can occur during transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The host listener could not bind.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was attempted.
        addr: SocketAddr,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The outbound connection could not be established.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        /// Host address that was attempted.
        addr: SocketAddr,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The outbound connection did not complete in time.
    #[error("connection to {0} timed out")]
    ConnectTimeout(SocketAddr),

    /// Networking was already started in some role.
    #[error("networking already started as {0}")]
    AlreadyStarted(crate::session::Role),

    /// The node has shut down and accepts no more work.
    #[error("node has shut down")]
    Stopped,

    /// An underlying I/O error occurred.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Lifecycle of one peer connection.
///
/// `Connecting → Handshaking → Active → Closed`; any state may go straight
/// to `Closed`, which is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Socket being accepted or connected.
    Connecting,
    /// Waiting for (host) or sending (client) the display-name line.
    Handshaking,
    /// Exchanging frames.
    Active,
    /// Socket gone; never reused.
    Closed,
}

impl ConnectionState {
    /// Whether moving from `self` to `next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Connecting, Self::Handshaking)
                | (Self::Handshaking, Self::Active)
                | (Self::Connecting | Self::Handshaking | Self::Active, Self::Closed)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Handshaking => "handshaking",
            Self::Active => "active",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Tracks and logs the state of one connection.
#[derive(Debug)]
pub struct Lifecycle {
    peer: String,
    state: ConnectionState,
}

impl Lifecycle {
    /// Starts tracking a connection in [`ConnectionState::Connecting`].
    pub fn new(peer: impl Into<String>) -> Self {
        Self {
            peer: peer.into(),
            state: ConnectionState::Connecting,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Renames the tracked peer once its display name is known.
    pub fn rename(&mut self, peer: impl Into<String>) {
        self.peer = peer.into();
    }

    /// Moves to `next` if the transition is legal and reports whether it did.
    pub fn advance(&mut self, next: ConnectionState) -> bool {
        if !self.state.can_transition_to(next) {
            tracing::debug!(peer = %self.peer, from = %self.state, to = %next, "ignored state change");
            return false;
        }
        tracing::debug!(peer = %self.peer, from = %self.state, to = %next, "connection state");
        self.state = next;
        true
    }
}

/// Where locally produced events go once networking is up.
#[derive(Debug, Clone, Default)]
pub enum Uplink {
    /// No network yet; events are applied locally only.
    #[default]
    Offline,
    /// Host mode: fan out to every client.
    Host {
        /// Broadcast hub over the host's registry.
        hub: Hub,
        /// Host display name, used as the sender of relayed text.
        display_name: String,
    },
    /// Client mode: write to the single upstream connection.
    Client {
        /// Writer of the upstream connection.
        writer: PeerWriter,
    },
}

impl Uplink {
    /// Sends a locally produced event outward and returns how many peers
    /// accepted it.
    ///
    /// On the host, keyed text travels as `<host>: MSG:<id>:<body>` so that
    /// clients learn the author; everything else is sent as encoded.
    pub fn publish(&self, event: &ChatEvent) -> usize {
        match self {
            Self::Offline => {
                tracing::debug!(kind = event.kind(), "offline, event kept local");
                0
            }
            Self::Host { hub, display_name } => {
                let frame = match event {
                    ChatEvent::Text { .. } => codec::encode(&ChatEvent::PlainRelay {
                        sender_display_name: display_name.clone(),
                        body: codec::encode(event),
                    }),
                    _ => codec::encode(event),
                };
                hub.broadcast(&frame)
            }
            Self::Client { writer } => {
                if writer.send(codec::encode(event)).is_ok() {
                    1
                } else {
                    tracing::warn!(kind = event.kind(), "upstream writer closed, event not sent");
                    0
                }
            }
        }
    }
}

/// Spawns the task that writes queued lines to a socket.
///
/// The task ends when the channel closes or a write fails; either way the
/// receiver is dropped and the write half is shut down.
pub(crate) fn spawn_writer(
    mut write: OwnedWriteHalf,
    mut lines: mpsc::UnboundedReceiver<String>,
    peer: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(line) = lines.recv().await {
            if let Err(e) = write_line(&mut write, &line).await {
                tracing::warn!(peer = %peer, error = %e, "socket write failed");
                break;
            }
        }
        let _ = write.shutdown().await;
    })
}

/// Writes one frame followed by a newline.
pub(crate) async fn write_line(
    write: &mut (impl AsyncWrite + Unpin),
    line: &str,
) -> std::io::Result<()> {
    write.write_all(line.as_bytes()).await?;
    write.write_all(b"\n").await?;
    write.flush().await
}

/// Resolves once shutdown has been requested or the signal is gone.
pub(crate) async fn shutdown_requested(signal: &mut watch::Receiver<bool>) {
    let _ = signal.wait_for(|stop| *stop).await;
}

/// Name given to a client whose handshake line was empty.
#[must_use]
pub fn guest_name() -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    format!("Guest-{}", millis.rem_euclid(1000))
}

/// Best-effort LAN address of this device.
///
/// Asks the routing table which local address would reach a public
/// address; no packet is sent.
#[must_use]
pub fn local_ip() -> Option<IpAddr> {
    let socket = std::net::UdpSocket::bind(("0.0.0.0", 0)).ok()?;
    socket.connect(("8.8.8.8", 80)).ok()?;
    let ip = socket.local_addr().ok()?.ip();
    (!ip.is_unspecified()).then_some(ip)
}
