//! Reconciliation of chat events with local storage.
//!
//! Every event, whether decoded from the network or started by the local
//! user, is applied here and only here. The node feeds a single queue of
//! [`Job`]s to [`Reconciler::run`], so events are applied one at a time in
//! arrival order and no two updates of the same message interleave.
//!
//! Network events are keyed by [`MessageIdentity`]. Applying the same
//! event twice leaves the store as if it was applied once:
//!
//! - text and media whose identity already exists are not inserted again
//! - a like is only counted if the actor is not already in the liked-by
//!   list, an unlike only if they are
//! - edits and deletes overwrite state
//!
//! Events we authored come back from the host; those are recognized by
//! their sender or actor and skipped.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use tokio::sync::mpsc;

use lanchat_proto::codec;
use lanchat_proto::{ChatEvent, MessageIdentity};

use crate::files::{FileStore, FileStoreError};
use crate::session::Session;
use crate::store::{LocalId, Message, MessageKind, MessageStore, StoreError};
use crate::transport::Uplink;

/// Text stored for an image without a caption.
pub const IMAGE_LABEL: &str = "📷 Image";

/// Prefix of the text stored for a document.
pub const DOCUMENT_LABEL: &str = "📎 ";

/// Errors that can occur while applying an event.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// The message store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Saving an attachment failed.
    #[error("file store error: {0}")]
    Files(#[from] FileStoreError),

    /// A local action named a row that does not exist.
    #[error("no message with id {0}")]
    UnknownMessage(LocalId),

    /// An attachment with no bytes was offered for sending.
    #[error("attachment is empty")]
    EmptyAttachment,
}

/// Result of applying one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The store changed.
    Applied,
    /// Nothing changed, for the given reason.
    Ignored(&'static str),
}

/// Notification sent to the presentation layer after a store change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// A new message was stored.
    Inserted {
        /// Row id of the new message.
        id: LocalId,
        /// Its identity.
        identity: MessageIdentity,
    },
    /// An existing message changed (like, edit or delete).
    Updated {
        /// Identity of the changed message.
        identity: MessageIdentity,
    },
}

/// Something the local user asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalAction {
    /// Send a text message.
    SendText {
        /// Message text.
        text: String,
    },
    /// Send an image.
    SendImage {
        /// Image bytes.
        bytes: Vec<u8>,
        /// Caption, possibly empty.
        caption: String,
        /// Name of the picked file.
        file_name: String,
        /// Where the picked file lives locally.
        file_path: PathBuf,
    },
    /// Send a document.
    SendDocument {
        /// Document bytes.
        bytes: Vec<u8>,
        /// Name of the picked file.
        file_name: String,
        /// Where the picked file lives locally.
        file_path: PathBuf,
    },
    /// Like the message, or unlike it if the local user already liked it.
    ToggleLike {
        /// Row id of the message.
        id: LocalId,
    },
    /// Replace the text of a message.
    Edit {
        /// Row id of the message.
        id: LocalId,
        /// New text.
        text: String,
    },
    /// Soft-delete a message.
    Delete {
        /// Row id of the message.
        id: LocalId,
    },
}

/// Unit of work for the reconciliation task.
#[derive(Debug)]
pub enum Job {
    /// An event decoded from the network.
    Received {
        /// The decoded event.
        event: ChatEvent,
        /// Handshake name of the connection that delivered it, when the
        /// host read it from one of its clients.
        peer: Option<String>,
    },
    /// A local user action.
    Local(LocalAction),
    /// Networking started; publish later local events through this.
    Attach(Uplink),
}

/// Sending half of the job queue.
pub type JobSender = mpsc::UnboundedSender<Job>;

/// Receiving half of the job queue.
pub type JobReceiver = mpsc::UnboundedReceiver<Job>;

/// Applies chat events to a [`MessageStore`].
pub struct Reconciler<S, F> {
    session: Arc<Session>,
    store: S,
    files: F,
    feed: mpsc::Sender<FeedEvent>,
    last_local_ms: AtomicI64,
}

impl<S: MessageStore, F: FileStore> Reconciler<S, F> {
    /// Creates a reconciler that reports store changes on `feed`.
    pub fn new(session: Arc<Session>, store: S, files: F, feed: mpsc::Sender<FeedEvent>) -> Self {
        Self {
            session,
            store,
            files,
            feed,
            last_local_ms: AtomicI64::new(0),
        }
    }

    /// Returns the message store.
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Returns the local session.
    pub const fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Processes jobs until every [`JobSender`] is dropped.
    pub async fn run(&self, mut jobs: JobReceiver) {
        let mut uplink = Uplink::Offline;
        while let Some(job) = jobs.recv().await {
            match job {
                Job::Attach(next) => uplink = next,
                Job::Received { event, peer } => {
                    let kind = event.kind();
                    match self.receive(event, peer.as_deref()).await {
                        Ok(Outcome::Applied) => {}
                        Ok(Outcome::Ignored(reason)) => {
                            tracing::debug!(kind, reason, "received event ignored");
                        }
                        Err(e) => tracing::warn!(kind, error = %e, "failed to apply received event"),
                    }
                }
                Job::Local(action) => match self.perform(action).await {
                    Ok(Some(event)) => {
                        let delivered = uplink.publish(&event);
                        tracing::debug!(kind = event.kind(), delivered, "local event published");
                    }
                    Ok(None) => {}
                    Err(e) => tracing::warn!(error = %e, "local action failed"),
                },
            }
        }
        tracing::debug!("job queue closed, reconciler stopped");
    }

    /// Applies an event decoded from the network.
    ///
    /// `peer` is the handshake name of the delivering connection on the
    /// host; it is the sender of keyed text read from that connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the store or file store fails.
    pub async fn receive(
        &self,
        event: ChatEvent,
        peer: Option<&str>,
    ) -> Result<Outcome, ReconcileError> {
        match event {
            ChatEvent::Text { unique_id, body } => {
                let sender = peer.unwrap_or_else(|| unique_id.sender_prefix()).to_string();
                self.receive_text(&sender, &body, Some(unique_id)).await
            }
            ChatEvent::PlainRelay {
                sender_display_name,
                body,
            } => self.receive_text(&sender_display_name, &body, None).await,
            ChatEvent::Image {
                unique_id,
                caption,
                payload,
            } => {
                let text = if caption.is_empty() {
                    IMAGE_LABEL.to_string()
                } else {
                    caption
                };
                self.receive_media(unique_id, peer, MessageKind::Image, text, None, &payload)
                    .await
            }
            ChatEvent::Document {
                unique_id,
                file_name,
                file_size,
                payload,
            } => {
                let text = format!("{DOCUMENT_LABEL}{file_name}");
                self.receive_media(
                    unique_id,
                    peer,
                    MessageKind::Document,
                    text,
                    Some((file_name, file_size)),
                    &payload,
                )
                .await
            }
            ChatEvent::Like {
                unique_id,
                liked,
                actor,
            } => {
                let actor = match actor {
                    Some(actor) if self.session.is_local(&actor) => {
                        return Ok(Outcome::Ignored("own like echoed"));
                    }
                    Some(actor) => actor,
                    // Frames without an actor carry no author; count them
                    // under the local name so a repeat stays idempotent.
                    None => self.session.display_name().to_string(),
                };
                self.apply_like(&unique_id, liked, &actor).await
            }
            ChatEvent::Edit {
                unique_id,
                new_body,
            } => self.apply_edit(&unique_id, &new_body).await,
            ChatEvent::Delete { unique_id } => self.apply_delete(&unique_id).await,
        }
    }

    /// Stores received text unless it is our own or already stored.
    ///
    /// A body of the form `MSG:<id>:<text>` carries its identity; without
    /// one the identity is synthesized from sender and receipt time.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn receive_text(
        &self,
        sender: &str,
        body: &str,
        identity: Option<MessageIdentity>,
    ) -> Result<Outcome, ReconcileError> {
        if self.session.is_local(sender) {
            return Ok(Outcome::Ignored("own text echoed"));
        }
        let now = now_ms();
        let (identity, text) = match identity {
            Some(identity) => (identity, body),
            None => codec::split_keyed_text(body)
                .unwrap_or_else(|| (MessageIdentity::synthesize(sender, now), body)),
        };
        let message = Message::new(sender, text, now, false, identity);
        self.insert_unique(message).await
    }

    async fn receive_media(
        &self,
        identity: MessageIdentity,
        peer: Option<&str>,
        kind: MessageKind,
        text: String,
        document: Option<(String, u64)>,
        payload: &[u8],
    ) -> Result<Outcome, ReconcileError> {
        let sender = peer.unwrap_or_else(|| identity.sender_prefix()).to_string();
        if self.session.is_local(&sender) {
            return Ok(Outcome::Ignored("own media echoed"));
        }
        if self.store.find_by_identity(&identity).await?.is_some() {
            return Ok(Outcome::Ignored("duplicate identity"));
        }

        let suggested = document.as_ref().map_or("", |(name, _)| name.as_str());
        let path = self.files.save(kind, suggested, payload).await?;
        let (file_name, file_size) = match document {
            Some((name, size)) => (name, size),
            None => (
                path.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                payload.len() as u64,
            ),
        };

        let message = Message::new(&sender, text, now_ms(), false, identity)
            .with_attachment(kind, path, file_name, file_size);
        self.insert_unique(message).await
    }

    /// Adds or removes `actor` in the liked-by list of a message and
    /// adjusts its like count when membership changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn apply_like(
        &self,
        identity: &MessageIdentity,
        liked: bool,
        actor: &str,
    ) -> Result<Outcome, ReconcileError> {
        let Some(message) = self.store.find_by_identity(identity).await? else {
            return Ok(Outcome::Ignored("unknown identity"));
        };
        if message.deleted {
            return Ok(Outcome::Ignored("message deleted"));
        }

        let mut users = message.liked_by_list();
        let present = users.iter().any(|u| u == actor);
        match (liked, present) {
            (true, false) => {
                users.push(actor.to_string());
                self.store.increment_like(identity).await?;
            }
            (false, true) => {
                users.retain(|u| u != actor);
                self.store.decrement_like(identity).await?;
            }
            _ => return Ok(Outcome::Ignored("like state unchanged")),
        }

        let joined = users.join(",");
        let liked_by = (!joined.is_empty()).then_some(joined.as_str());
        self.store.update_liked_by(identity, liked_by).await?;
        tracing::debug!(%identity, liked, actor, "like applied");
        self.notify(FeedEvent::Updated {
            identity: identity.clone(),
        });
        Ok(Outcome::Applied)
    }

    /// Replaces the text of a message.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn apply_edit(
        &self,
        identity: &MessageIdentity,
        new_text: &str,
    ) -> Result<Outcome, ReconcileError> {
        match self.store.find_by_identity(identity).await? {
            None => return Ok(Outcome::Ignored("unknown identity")),
            Some(message) if message.deleted => return Ok(Outcome::Ignored("message deleted")),
            Some(_) => {}
        }
        self.store.update_text(identity, new_text).await?;
        tracing::debug!(%identity, "edit applied");
        self.notify(FeedEvent::Updated {
            identity: identity.clone(),
        });
        Ok(Outcome::Applied)
    }

    /// Soft-deletes a message. The row stays so later events still match.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn apply_delete(&self, identity: &MessageIdentity) -> Result<Outcome, ReconcileError> {
        if !self.store.mark_deleted(identity).await? {
            return Ok(Outcome::Ignored("unknown identity"));
        }
        tracing::debug!(%identity, "delete applied");
        self.notify(FeedEvent::Updated {
            identity: identity.clone(),
        });
        Ok(Outcome::Applied)
    }

    /// Applies a local action and returns the event to publish, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the action names an unknown row, an attachment
    /// is empty, or the store fails.
    pub async fn perform(&self, action: LocalAction) -> Result<Option<ChatEvent>, ReconcileError> {
        let me = self.session.display_name().to_string();
        match action {
            LocalAction::SendText { text } => {
                let text = codec::sanitize_text(&text);
                if text.trim().is_empty() {
                    return Ok(None);
                }
                let now = self.local_stamp();
                let identity = MessageIdentity::synthesize(&me, now);
                self.insert_unique(Message::new(&me, text.as_str(), now, true, identity.clone()))
                    .await?;
                Ok(Some(ChatEvent::Text {
                    unique_id: identity,
                    body: text,
                }))
            }
            LocalAction::SendImage {
                bytes,
                caption,
                file_name,
                file_path,
            } => {
                if bytes.is_empty() {
                    return Err(ReconcileError::EmptyAttachment);
                }
                let caption = codec::sanitize_field(&caption);
                let text = if caption.trim().is_empty() {
                    IMAGE_LABEL.to_string()
                } else {
                    caption.clone()
                };
                let now = self.local_stamp();
                let identity = MessageIdentity::synthesize(&me, now);
                let message = Message::new(&me, text, now, true, identity.clone()).with_attachment(
                    MessageKind::Image,
                    file_path,
                    codec::sanitize_field(&file_name),
                    bytes.len() as u64,
                );
                self.insert_unique(message).await?;
                Ok(Some(ChatEvent::Image {
                    unique_id: identity,
                    caption,
                    payload: bytes,
                }))
            }
            LocalAction::SendDocument {
                bytes,
                file_name,
                file_path,
            } => {
                if bytes.is_empty() {
                    return Err(ReconcileError::EmptyAttachment);
                }
                let file_name = codec::sanitize_field(&file_name);
                let file_size = bytes.len() as u64;
                let now = self.local_stamp();
                let identity = MessageIdentity::synthesize(&me, now);
                let message = Message::new(
                    &me,
                    format!("{DOCUMENT_LABEL}{file_name}"),
                    now,
                    true,
                    identity.clone(),
                )
                .with_attachment(MessageKind::Document, file_path, file_name.as_str(), file_size);
                self.insert_unique(message).await?;
                Ok(Some(ChatEvent::Document {
                    unique_id: identity,
                    file_name,
                    file_size,
                    payload: bytes,
                }))
            }
            LocalAction::ToggleLike { id } => {
                let message = self.local_message(id).await?;
                let liked = !message.liked_by_list().contains(&me);
                let outcome = self.apply_like(&message.identity, liked, &me).await?;
                Ok((outcome == Outcome::Applied).then(|| ChatEvent::Like {
                    unique_id: message.identity,
                    liked,
                    actor: Some(me),
                }))
            }
            LocalAction::Edit { id, text } => {
                let message = self.local_message(id).await?;
                let text = codec::sanitize_text(&text);
                let outcome = self.apply_edit(&message.identity, &text).await?;
                Ok((outcome == Outcome::Applied).then(|| ChatEvent::Edit {
                    unique_id: message.identity,
                    new_body: text,
                }))
            }
            LocalAction::Delete { id } => {
                let message = self.local_message(id).await?;
                self.apply_delete(&message.identity).await?;
                Ok(Some(ChatEvent::Delete {
                    unique_id: message.identity,
                }))
            }
        }
    }

    async fn local_message(&self, id: LocalId) -> Result<Message, ReconcileError> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or(ReconcileError::UnknownMessage(id))
    }

    async fn insert_unique(&self, message: Message) -> Result<Outcome, ReconcileError> {
        if self.store.find_by_identity(&message.identity).await?.is_some() {
            return Ok(Outcome::Ignored("duplicate identity"));
        }
        let identity = message.identity.clone();
        let sender = message.sender_name.clone();
        let id = self.store.insert(message).await?;
        tracing::debug!(id, %identity, sender = %sender, "message stored");
        self.notify(FeedEvent::Inserted { id, identity });
        Ok(Outcome::Applied)
    }

    /// Timestamp for a locally authored message, strictly increasing so
    /// two sends in the same millisecond get distinct identities.
    fn local_stamp(&self) -> i64 {
        // Only the consumer task calls this, so load and store do not race.
        let stamp = now_ms().max(self.last_local_ms.load(Ordering::Acquire) + 1);
        self.last_local_ms.store(stamp, Ordering::Release);
        stamp
    }

    fn notify(&self, event: FeedEvent) {
        if let Err(e) = self.feed.try_send(event) {
            tracing::debug!(error = %e, "feed notification dropped");
        }
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
