//! Client side of the transport: one connection to a host.
//!
//! [`connect`] dials the host with a timeout, sends the display name as
//! the handshake line and spawns two tasks: a writer fed by the returned
//! [`PeerWriter`], and a reader that decodes every line and queues it for
//! the reconciler. When the reader stops the connection flag goes false.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use lanchat_proto::codec;

use super::{ConnectionState, Lifecycle, TransportError, shutdown_requested, spawn_writer, write_line};
use crate::reconcile::{Job, JobSender};
use crate::registry::PeerWriter;
use crate::status::StatusBoard;

/// Default time allowed for the TCP connect to the host.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything the client connection tasks need.
#[derive(Debug, Clone)]
pub struct ClientContext {
    /// Queue into the reconciler.
    pub jobs: JobSender,
    /// Flips to `true` when the node shuts down.
    pub shutdown: watch::Receiver<bool>,
    /// Connection flag publisher.
    pub status: Arc<StatusBoard>,
}

/// A live connection to a host.
#[derive(Debug)]
pub struct ClientConnection {
    /// Queue of frames to write upstream.
    pub writer: PeerWriter,
    /// Reader task; ends on disconnect or shutdown.
    pub task: JoinHandle<()>,
}

/// Connects to the host at `addr` and performs the handshake.
///
/// Sets the connection flag to `true` once the handshake line is written.
///
/// # Errors
///
/// - [`TransportError::ConnectTimeout`] if the connect takes longer than
///   `connect_timeout`.
/// - [`TransportError::Connect`] if the host refuses or is unreachable.
/// - [`TransportError::Io`] if the handshake line cannot be written.
pub async fn connect(
    addr: SocketAddr,
    display_name: &str,
    connect_timeout: Duration,
    ctx: ClientContext,
) -> Result<ClientConnection, TransportError> {
    let mut life = Lifecycle::new(addr.to_string());
    let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| {
            tracing::warn!(addr = %addr, "connect timed out");
            TransportError::ConnectTimeout(addr)
        })?
        .map_err(|source| {
            tracing::warn!(addr = %addr, error = %source, "connect failed");
            TransportError::Connect { addr, source }
        })?;
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(addr = %addr, error = %e, "set_nodelay failed");
    }

    life.advance(ConnectionState::Handshaking);
    let (read, mut write) = stream.into_split();
    write_line(&mut write, display_name).await?;
    life.advance(ConnectionState::Active);
    tracing::info!(addr = %addr, name = display_name, "connected to host");
    ctx.status.set_connected(true);

    let (tx, rx) = mpsc::unbounded_channel();
    let writer = spawn_writer(write, rx, addr.to_string());
    let task = tokio::spawn(read_loop(read, writer, life, ctx));
    Ok(ClientConnection { writer: tx, task })
}

async fn read_loop(
    read: OwnedReadHalf,
    mut writer: JoinHandle<()>,
    mut life: Lifecycle,
    ctx: ClientContext,
) {
    let mut shutdown = ctx.shutdown.clone();
    let mut lines = BufReader::new(read).lines();
    loop {
        tokio::select! {
            () = shutdown_requested(&mut shutdown) => break,
            _ = &mut writer => {
                tracing::warn!("upstream writer stopped");
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => dispatch(&line, &ctx.jobs),
                Ok(None) => {
                    tracing::info!("host closed the connection");
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "read from host failed");
                    break;
                }
            },
        }
    }
    life.advance(ConnectionState::Closed);
    ctx.status.set_connected(false);
}

fn dispatch(line: &str, jobs: &JobSender) {
    let Some(event) = codec::decode(line) else {
        tracing::debug!(frame = %codec::preview(line), "undecodable frame dropped");
        return;
    };
    if jobs.send(Job::Received { event, peer: None }).is_err() {
        tracing::debug!("reconciler gone, event not applied");
    }
}
