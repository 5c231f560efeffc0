//! A chat node: one device's networking engine.
//!
//! [`ChatNode`] owns everything one device needs to take part in a chat:
//! the session, the reconciler task and its job queue, the host peer
//! registry, the status board and the shutdown signal. The presentation
//! layer drives it through plain method calls and observes it through the
//! feed channel returned by [`ChatNode::new`] and the [`StatusBoard`].

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::files::FileStore;
use crate::hub::Hub;
use crate::reconcile::{FeedEvent, Job, JobSender, LocalAction, Reconciler};
use crate::registry::PeerRegistry;
use crate::session::{Role, Session};
use crate::status::StatusBoard;
use crate::store::{LocalId, Message, MessageStore, StoreError};
use crate::transport::client::{self, ClientContext};
use crate::transport::host::{self, HostContext};
use crate::transport::{TransportError, Uplink, local_ip};

/// Keeps the device's network usable while a node is running.
///
/// Acquired once hosting starts or a host is joined, and released on
/// shutdown or when starting fails part way. Platforms that
/// need a wake or radio lock plug one in with
/// [`ChatNode::with_network_lock`].
pub trait NetworkLock: Send + Sync + fmt::Debug {
    /// Takes the lock.
    fn acquire(&self);
    /// Gives the lock back.
    fn release(&self);
}

/// [`NetworkLock`] that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLock;

impl NetworkLock for NoopLock {
    fn acquire(&self) {}
    fn release(&self) {}
}

/// Settings a node needs at construction.
#[derive(Debug, Clone)]
pub struct NodeOptions {
    /// Local display name, normalised by [`Session::new`].
    pub display_name: String,
    /// Time allowed for connecting to a host.
    pub connect_timeout: Duration,
    /// Capacity of the feed channel.
    pub feed_buffer: usize,
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self {
            display_name: String::new(),
            connect_timeout: client::CONNECT_TIMEOUT,
            feed_buffer: 64,
        }
    }
}

/// One device's chat engine.
pub struct ChatNode<S, F> {
    session: Arc<Session>,
    reconciler: Arc<Reconciler<S, F>>,
    jobs: JobSender,
    registry: Arc<PeerRegistry>,
    status: Arc<StatusBoard>,
    shutdown: watch::Sender<bool>,
    lock: Arc<dyn NetworkLock>,
    lock_held: AtomicBool,
    connect_timeout: Duration,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<S, F> ChatNode<S, F>
where
    S: MessageStore + 'static,
    F: FileStore + 'static,
{
    /// Creates a node and spawns its reconciliation task.
    ///
    /// Returns the node and the receiving end of its feed channel. Must be
    /// called from within a Tokio runtime.
    pub fn new(options: NodeOptions, store: S, files: F) -> (Self, mpsc::Receiver<FeedEvent>) {
        let session = Arc::new(Session::new(&options.display_name));
        let (feed_tx, feed_rx) = mpsc::channel(options.feed_buffer.max(1));
        let reconciler = Arc::new(Reconciler::new(Arc::clone(&session), store, files, feed_tx));
        let (jobs, job_rx) = mpsc::unbounded_channel();

        let worker = Arc::clone(&reconciler);
        let task = tokio::spawn(async move { worker.run(job_rx).await });
        let (shutdown, _) = watch::channel(false);

        tracing::info!(name = session.display_name(), "chat node created");
        let node = Self {
            session,
            reconciler,
            jobs,
            registry: Arc::new(PeerRegistry::new()),
            status: Arc::new(StatusBoard::new()),
            shutdown,
            lock: Arc::new(NoopLock),
            lock_held: AtomicBool::new(false),
            connect_timeout: options.connect_timeout,
            tasks: Mutex::new(vec![task]),
        };
        (node, feed_rx)
    }

    /// Replaces the network lock collaborator.
    #[must_use]
    pub fn with_network_lock(mut self, lock: Arc<dyn NetworkLock>) -> Self {
        self.lock = lock;
        self
    }

    /// Starts hosting on `bind` and returns the bound address.
    ///
    /// Publishes `Hosting on: <ip>:<port>` and sets the connection flag.
    ///
    /// # Errors
    ///
    /// - [`TransportError::Stopped`] if the node was shut down.
    /// - [`TransportError::AlreadyStarted`] if networking already started.
    /// - [`TransportError::Bind`] if the listener cannot bind; the status
    ///   then reads `Host failed: <reason>`.
    pub async fn start_host(&self, bind: SocketAddr) -> Result<SocketAddr, TransportError> {
        self.ensure_startable()?;

        let hub = Hub::new(Arc::clone(&self.registry));
        let ctx = HostContext {
            hub: hub.clone(),
            jobs: self.jobs.clone(),
            shutdown: self.shutdown.subscribe(),
        };
        let (bound, task) = match host::start_host(bind, ctx).await {
            Ok(started) => started,
            Err(e) => {
                tracing::error!(addr = %bind, error = %e, "hosting failed");
                self.status.set_host_failed(&e.to_string());
                self.status.set_connected(false);
                return Err(e);
            }
        };
        // Taken before the shutdown check so a concurrent shutdown always
        // finds it held and releases it.
        self.acquire_lock();
        let refused = if self.is_shut_down() {
            Some(TransportError::Stopped)
        } else {
            self.session
                .assign_role(Role::Host)
                .err()
                .map(TransportError::AlreadyStarted)
        };
        if let Some(e) = refused {
            task.abort();
            // A concurrent start that won the role keeps the lock.
            if matches!(e, TransportError::Stopped) {
                self.release_lock();
            }
            return Err(e);
        }

        let shown = if bound.ip().is_unspecified() {
            SocketAddr::new(local_ip().unwrap_or_else(|| bound.ip()), bound.port())
        } else {
            bound
        };
        self.status.set_hosting(&shown.to_string());
        self.status.set_connected(true);
        self.attach(Uplink::Host {
            hub,
            display_name: self.session.display_name().to_string(),
        });
        self.tasks.lock().push(task);
        tracing::info!(addr = %shown, "hosting");
        Ok(bound)
    }

    /// Joins the host at `addr`.
    ///
    /// # Errors
    ///
    /// - [`TransportError::Stopped`] if the node was shut down.
    /// - [`TransportError::AlreadyStarted`] if networking already started.
    /// - [`TransportError::Connect`] or [`TransportError::ConnectTimeout`]
    ///   if the host cannot be reached; the connection flag stays false.
    /// - [`TransportError::Io`] if the handshake cannot be written.
    pub async fn join(&self, addr: SocketAddr) -> Result<(), TransportError> {
        self.ensure_startable()?;

        let ctx = ClientContext {
            jobs: self.jobs.clone(),
            shutdown: self.shutdown.subscribe(),
            status: Arc::clone(&self.status),
        };
        let conn = match client::connect(addr, self.session.display_name(), self.connect_timeout, ctx)
            .await
        {
            Ok(conn) => conn,
            Err(e) => {
                self.status.set_connected(false);
                return Err(e);
            }
        };
        self.acquire_lock();
        let refused = if self.is_shut_down() {
            Some(TransportError::Stopped)
        } else {
            self.session
                .assign_role(Role::Client)
                .err()
                .map(TransportError::AlreadyStarted)
        };
        if let Some(e) = refused {
            conn.task.abort();
            if matches!(e, TransportError::Stopped) {
                self.release_lock();
                self.status.set_connected(false);
            }
            return Err(e);
        }

        self.attach(Uplink::Client { writer: conn.writer });
        self.tasks.lock().push(conn.task);
        Ok(())
    }

    /// Sends a text message.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Stopped`] if the reconciler has stopped.
    pub fn send_text(&self, text: impl Into<String>) -> Result<(), TransportError> {
        self.submit(LocalAction::SendText { text: text.into() })
    }

    /// Sends an image read from `file_path`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Stopped`] if the reconciler has stopped.
    pub fn send_image(
        &self,
        bytes: Vec<u8>,
        caption: impl Into<String>,
        file_path: PathBuf,
    ) -> Result<(), TransportError> {
        let file_name = file_name_of(&file_path);
        self.submit(LocalAction::SendImage {
            bytes,
            caption: caption.into(),
            file_name,
            file_path,
        })
    }

    /// Sends a document read from `file_path`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Stopped`] if the reconciler has stopped.
    pub fn send_document(&self, bytes: Vec<u8>, file_path: PathBuf) -> Result<(), TransportError> {
        let file_name = file_name_of(&file_path);
        self.submit(LocalAction::SendDocument {
            bytes,
            file_name,
            file_path,
        })
    }

    /// Likes the message, or unlikes it if the local user already did.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Stopped`] if the reconciler has stopped.
    pub fn toggle_like(&self, id: LocalId) -> Result<(), TransportError> {
        self.submit(LocalAction::ToggleLike { id })
    }

    /// Replaces the text of a message.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Stopped`] if the reconciler has stopped.
    pub fn edit(&self, id: LocalId, text: impl Into<String>) -> Result<(), TransportError> {
        self.submit(LocalAction::Edit {
            id,
            text: text.into(),
        })
    }

    /// Soft-deletes a message.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Stopped`] if the reconciler has stopped.
    pub fn delete(&self, id: LocalId) -> Result<(), TransportError> {
        self.submit(LocalAction::Delete { id })
    }

    /// All stored messages, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn messages(&self) -> Result<Vec<Message>, StoreError> {
        self.reconciler.store().all_messages().await
    }

    /// Returns the message store.
    pub fn store(&self) -> &S {
        self.reconciler.store()
    }

    /// Returns the local session.
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Returns the status board.
    #[must_use]
    pub fn status(&self) -> &Arc<StatusBoard> {
        &self.status
    }

    /// Number of clients connected to this host.
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.registry.len()
    }

    /// Display names of clients connected to this host.
    #[must_use]
    pub fn peer_names(&self) -> Vec<String> {
        self.registry.names()
    }

    /// Stops networking. Safe to call more than once, and before any start.
    ///
    /// Every connection and the accept loop observe the signal and stop;
    /// all peer writers are dropped; the network lock is released. The
    /// store stays readable and local actions are still applied locally.
    pub fn shutdown(&self) {
        if self.shutdown.send_replace(true) {
            return;
        }
        let dropped = self.registry.clear();
        self.attach(Uplink::Offline);
        self.release_lock();
        self.status.set_connected(false);
        tracing::info!(dropped, "node shut down");
    }

    /// Waits for every networking task to finish after [`shutdown`].
    ///
    /// [`shutdown`]: Self::shutdown
    pub async fn join_tasks(&self, limit: Duration) {
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(1..).collect();
        for task in tasks {
            if tokio::time::timeout(limit, task).await.is_err() {
                tracing::warn!("networking task did not stop in time");
            }
        }
    }

    fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn ensure_startable(&self) -> Result<(), TransportError> {
        if self.is_shut_down() {
            return Err(TransportError::Stopped);
        }
        match self.session.role() {
            Some(role) => Err(TransportError::AlreadyStarted(role)),
            None => Ok(()),
        }
    }

    fn submit(&self, action: LocalAction) -> Result<(), TransportError> {
        self.jobs
            .send(Job::Local(action))
            .map_err(|_| TransportError::Stopped)
    }

    fn attach(&self, uplink: Uplink) {
        if self.jobs.send(Job::Attach(uplink)).is_err() {
            tracing::debug!("reconciler gone, uplink not attached");
        }
    }

    fn acquire_lock(&self) {
        if !self.lock_held.swap(true, Ordering::AcqRel) {
            self.lock.acquire();
            tracing::debug!("network lock acquired");
        }
    }

    fn release_lock(&self) {
        if self.lock_held.swap(false, Ordering::AcqRel) {
            self.lock.release();
            tracing::debug!("network lock released");
        }
    }
}

fn file_name_of(path: &std::path::Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
