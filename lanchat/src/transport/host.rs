//! Host side of the transport: accept loop and per-client relay.
//!
//! Each accepted socket gets its own task. The first line a client sends
//! is its display name; after that every line is relayed to all clients
//! (the sender included) and handed to the reconciler:
//!
//! | Inbound line          | Relayed as                          |
//! |-----------------------|-------------------------------------|
//! | `MSG:<id>:<body>`     | `<name>: MSG:<id>:<body>`           |
//! | `IMG:` / `DOC:`       | the line, unchanged                 |
//! | `LIKE:` / `UNLIKE:`   | re-encoded with `<name>` as actor   |
//! | `EDIT:` / `DELETE:`   | re-encoded                          |
//! | anything else         | `<name>: <line>`                    |
//!
//! Lines that start with a known tag but do not decode are dropped.

use std::net::SocketAddr;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use lanchat_proto::codec::{self, Tag};
use lanchat_proto::event::JOIN_NOTICE;
use lanchat_proto::ChatEvent;

use super::{ConnectionState, Lifecycle, TransportError, guest_name, shutdown_requested, spawn_writer};
use crate::hub::Hub;
use crate::reconcile::{Job, JobSender};

/// Everything a host connection task needs.
#[derive(Debug, Clone)]
pub struct HostContext {
    /// Fan-out over the host's peer registry.
    pub hub: Hub,
    /// Queue into the reconciler.
    pub jobs: JobSender,
    /// Flips to `true` when the node shuts down.
    pub shutdown: watch::Receiver<bool>,
}

/// Binds the listener and spawns the accept loop.
///
/// Returns the bound address (useful when binding port 0) and the handle
/// of the accept task, which ends when shutdown is signalled.
///
/// # Errors
///
/// Returns [`TransportError::Bind`] if the listener cannot bind.
pub async fn start_host(
    bind: SocketAddr,
    ctx: HostContext,
) -> Result<(SocketAddr, JoinHandle<()>), TransportError> {
    let listener = TcpListener::bind(bind)
        .await
        .map_err(|source| TransportError::Bind { addr: bind, source })?;
    let bound = listener.local_addr()?;
    tracing::info!(addr = %bound, "host listening");

    let handle = tokio::spawn(accept_loop(listener, ctx));
    Ok((bound, handle))
}

async fn accept_loop(listener: TcpListener, ctx: HostContext) {
    let mut shutdown = ctx.shutdown.clone();
    loop {
        tokio::select! {
            () = shutdown_requested(&mut shutdown) => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    tracing::debug!(peer = %addr, "connection accepted");
                    tokio::spawn(handle_connection(stream, addr, ctx.clone()));
                }
                Err(e) => {
                    // Per-connection accept errors (aborted handshakes, fd
                    // exhaustion) must not end hosting.
                    tracing::warn!(error = %e, "accept failed");
                }
            },
        }
    }
    tracing::info!("host accept loop stopped");
}

/// Serves one client from handshake to disconnect.
async fn handle_connection(stream: TcpStream, addr: SocketAddr, ctx: HostContext) {
    let mut life = Lifecycle::new(addr.to_string());
    let mut shutdown = ctx.shutdown.clone();
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(peer = %addr, error = %e, "set_nodelay failed");
    }
    let (read, write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();

    life.advance(ConnectionState::Handshaking);
    let handshake = tokio::select! {
        () = shutdown_requested(&mut shutdown) => None,
        line = lines.next_line() => match line {
            Ok(Some(line)) => Some(line),
            Ok(None) => {
                tracing::debug!(peer = %addr, "closed before handshake");
                None
            }
            Err(e) => {
                tracing::warn!(peer = %addr, error = %e, "handshake read failed");
                None
            }
        },
    };
    let Some(handshake) = handshake else {
        life.advance(ConnectionState::Closed);
        return;
    };

    let name = codec::sanitize_field(handshake.trim()).trim().to_string();
    let name = if name.is_empty() { guest_name() } else { name };
    life.rename(name.as_str());

    // Announce to the peers already present, then register the newcomer.
    let notice = ChatEvent::PlainRelay {
        sender_display_name: name.clone(),
        body: JOIN_NOTICE.to_string(),
    };
    ctx.hub.broadcast(&codec::encode(&notice));
    submit(&ctx.jobs, notice, None);

    let (tx, rx) = mpsc::unbounded_channel();
    let mut writer = spawn_writer(write, rx, name.clone());
    let key = ctx.hub.registry().add(name.as_str(), tx);
    life.advance(ConnectionState::Active);
    tracing::info!(peer = %name, addr = %addr, key = %key, "client joined");

    loop {
        tokio::select! {
            () = shutdown_requested(&mut shutdown) => break,
            _ = &mut writer => {
                tracing::debug!(peer = %name, "writer stopped");
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => relay_line(&line, &name, &ctx),
                Ok(None) => {
                    tracing::info!(peer = %name, "client disconnected");
                    break;
                }
                Err(e) => {
                    tracing::warn!(peer = %name, error = %e, "read failed");
                    break;
                }
            },
        }
    }

    // Dropping the registered writer lets the writer task drain and close.
    ctx.hub.registry().remove(key);
    life.advance(ConnectionState::Closed);
}

/// Relays one inbound line from client `name` and queues it for the
/// reconciler.
fn relay_line(line: &str, name: &str, ctx: &HostContext) {
    let line = line.trim_end_matches('\r');
    if line.trim().is_empty() {
        return;
    }

    if Tag::of(line).is_none() {
        let event = ChatEvent::PlainRelay {
            sender_display_name: name.to_string(),
            body: line.to_string(),
        };
        ctx.hub.broadcast(&codec::encode(&event));
        submit(&ctx.jobs, event, Some(name));
        return;
    }

    let Some(event) = codec::decode(line) else {
        tracing::debug!(peer = %name, frame = %codec::preview(line), "malformed frame dropped");
        return;
    };

    let event = match event {
        ChatEvent::Text { .. } => {
            let relayed = ChatEvent::PlainRelay {
                sender_display_name: name.to_string(),
                body: codec::encode(&event),
            };
            ctx.hub.broadcast(&codec::encode(&relayed));
            event
        }
        ChatEvent::Image { .. } | ChatEvent::Document { .. } => {
            ctx.hub.broadcast(line);
            event
        }
        ChatEvent::Like {
            unique_id, liked, ..
        } => {
            // The connection's handshake name is the only accepted actor.
            let event = ChatEvent::Like {
                unique_id,
                liked,
                actor: Some(name.to_string()),
            };
            ctx.hub.broadcast(&codec::encode(&event));
            event
        }
        ChatEvent::Edit { .. } | ChatEvent::Delete { .. } => {
            ctx.hub.broadcast(&codec::encode(&event));
            event
        }
        ChatEvent::PlainRelay { .. } => {
            tracing::debug!(peer = %name, "unexpected relay frame dropped");
            return;
        }
    };
    submit(&ctx.jobs, event, Some(name));
}

fn submit(jobs: &JobSender, event: ChatEvent, peer: Option<&str>) {
    let job = Job::Received {
        event,
        peer: peer.map(str::to_string),
    };
    if jobs.send(job).is_err() {
        tracing::debug!("reconciler gone, event not applied");
    }
}
