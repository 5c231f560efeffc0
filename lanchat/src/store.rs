//! Message persistence collaborator.
//!
//! The networking core never touches storage directly: it issues the
//! requests of the [`MessageStore`] trait, keyed by [`MessageIdentity`]
//! for everything that arrives from the network and by [`LocalId`] only
//! for actions the local user starts on a row they can see.
//!
//! [`InMemoryStore`] is the bundled implementation, used by the binary
//! and by tests.

use std::collections::BTreeMap;
use std::path::PathBuf;

use tokio::sync::Mutex;

use lanchat_proto::MessageIdentity;

/// Row id assigned by the store on insert.
pub type LocalId = i64;

/// Text shown in place of a deleted message.
pub const DELETED_PLACEHOLDER: &str = "This message was deleted";

/// Errors reported by a [`MessageStore`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The underlying storage is unavailable.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// A write operation failed.
    #[error("write failed: {0}")]
    WriteFailed(String),

    /// A read operation failed.
    #[error("read failed: {0}")]
    ReadFailed(String),
}

/// What a message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageKind {
    /// Plain text.
    #[default]
    Text,
    /// Image attachment with caption as text.
    Image,
    /// Document attachment.
    Document,
}

/// A stored chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Row id; `0` until the store assigns one.
    pub id: LocalId,
    /// Network-wide identity.
    pub identity: MessageIdentity,
    /// Author display name.
    pub sender_name: String,
    /// Original text (caption or file label for attachments).
    pub text: String,
    /// Creation or receipt time, epoch milliseconds.
    pub timestamp_ms: i64,
    /// Whether the local user authored this message.
    pub sent_by_user: bool,
    /// Number of likes.
    pub like_count: u32,
    /// Comma-joined names of users who liked the message.
    pub liked_by: Option<String>,
    /// Whether the text was edited.
    pub edited: bool,
    /// Latest edited text.
    pub edited_text: Option<String>,
    /// Soft-delete flag. The row and its identity stay in place.
    pub deleted: bool,
    /// Text, image or document.
    pub kind: MessageKind,
    /// Local path of the attachment.
    pub file_path: Option<PathBuf>,
    /// Attachment file name.
    pub file_name: Option<String>,
    /// Attachment size in bytes.
    pub file_size: u64,
}

impl Message {
    /// Creates a text message that has not been stored yet.
    pub fn new(
        sender_name: impl Into<String>,
        text: impl Into<String>,
        timestamp_ms: i64,
        sent_by_user: bool,
        identity: MessageIdentity,
    ) -> Self {
        Self {
            id: 0,
            identity,
            sender_name: sender_name.into(),
            text: text.into(),
            timestamp_ms,
            sent_by_user,
            like_count: 0,
            liked_by: None,
            edited: false,
            edited_text: None,
            deleted: false,
            kind: MessageKind::Text,
            file_path: None,
            file_name: None,
            file_size: 0,
        }
    }

    /// Attaches media fields.
    #[must_use]
    pub fn with_attachment(
        mut self,
        kind: MessageKind,
        file_path: PathBuf,
        file_name: impl Into<String>,
        file_size: u64,
    ) -> Self {
        self.kind = kind;
        self.file_path = Some(file_path);
        self.file_name = Some(file_name.into());
        self.file_size = file_size;
        self
    }

    /// Text to render: the deletion placeholder, the edited text, or the
    /// original text, in that order.
    #[must_use]
    pub fn display_text(&self) -> &str {
        if self.deleted {
            return DELETED_PLACEHOLDER;
        }
        match (&self.edited_text, self.edited) {
            (Some(edited), true) => edited.as_str(),
            _ => self.text.as_str(),
        }
    }

    /// Names of users who liked this message.
    #[must_use]
    pub fn liked_by_list(&self) -> Vec<String> {
        parse_liked_by(self.liked_by.as_deref())
    }

    /// Human-readable attachment size.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn formatted_file_size(&self) -> String {
        const KB: u64 = 1024;
        const MB: u64 = 1024 * 1024;
        match self.file_size {
            size if size < KB => format!("{size} B"),
            size if size < MB => format!("{:.1} KB", size as f64 / KB as f64),
            size => format!("{:.1} MB", size as f64 / MB as f64),
        }
    }
}

/// Splits a comma-joined liked-by list, skipping blank entries.
#[must_use]
pub fn parse_liked_by(liked_by: Option<&str>) -> Vec<String> {
    liked_by
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

/// Requests the networking core issues against local storage.
///
/// Update operations return `true` when a row with the identity exists.
pub trait MessageStore: Send + Sync {
    /// Inserts a message and returns its assigned row id.
    fn insert(
        &self,
        message: Message,
    ) -> impl std::future::Future<Output = Result<LocalId, StoreError>> + Send;

    /// Replaces the text of a message and marks it edited.
    fn update_text(
        &self,
        identity: &MessageIdentity,
        new_text: &str,
    ) -> impl std::future::Future<Output = Result<bool, StoreError>> + Send;

    /// Sets the deleted flag of a message.
    fn mark_deleted(
        &self,
        identity: &MessageIdentity,
    ) -> impl std::future::Future<Output = Result<bool, StoreError>> + Send;

    /// Adds one to the like count.
    fn increment_like(
        &self,
        identity: &MessageIdentity,
    ) -> impl std::future::Future<Output = Result<bool, StoreError>> + Send;

    /// Subtracts one from the like count, never going below zero.
    fn decrement_like(
        &self,
        identity: &MessageIdentity,
    ) -> impl std::future::Future<Output = Result<bool, StoreError>> + Send;

    /// Replaces the comma-joined liked-by list.
    fn update_liked_by(
        &self,
        identity: &MessageIdentity,
        liked_by: Option<&str>,
    ) -> impl std::future::Future<Output = Result<bool, StoreError>> + Send;

    /// Looks up a message by row id.
    fn find_by_id(
        &self,
        id: LocalId,
    ) -> impl std::future::Future<Output = Result<Option<Message>, StoreError>> + Send;

    /// Looks up a message by identity.
    fn find_by_identity(
        &self,
        identity: &MessageIdentity,
    ) -> impl std::future::Future<Output = Result<Option<Message>, StoreError>> + Send;

    /// Returns every message, oldest first.
    fn all_messages(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<Message>, StoreError>> + Send;
}

/// In-memory [`MessageStore`].
pub struct InMemoryStore {
    inner: Mutex<Rows>,
}

#[derive(Default)]
struct Rows {
    next_id: LocalId,
    by_id: BTreeMap<LocalId, Message>,
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Rows::default()),
        }
    }

    /// Applies `change` to every row with the identity.
    async fn modify(
        &self,
        identity: &MessageIdentity,
        change: impl Fn(&mut Message) + Send,
    ) -> bool {
        let mut rows = self.inner.lock().await;
        let mut matched = false;
        for message in rows
            .by_id
            .values_mut()
            .filter(|m| &m.identity == identity)
        {
            change(message);
            matched = true;
        }
        matched
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageStore for InMemoryStore {
    async fn insert(&self, mut message: Message) -> Result<LocalId, StoreError> {
        let mut rows = self.inner.lock().await;
        rows.next_id += 1;
        let id = rows.next_id;
        message.id = id;
        rows.by_id.insert(id, message);
        Ok(id)
    }

    async fn update_text(
        &self,
        identity: &MessageIdentity,
        new_text: &str,
    ) -> Result<bool, StoreError> {
        Ok(self
            .modify(identity, |m| {
                m.text = new_text.to_string();
                m.edited_text = Some(new_text.to_string());
                m.edited = true;
            })
            .await)
    }

    async fn mark_deleted(&self, identity: &MessageIdentity) -> Result<bool, StoreError> {
        Ok(self.modify(identity, |m| m.deleted = true).await)
    }

    async fn increment_like(&self, identity: &MessageIdentity) -> Result<bool, StoreError> {
        Ok(self
            .modify(identity, |m| m.like_count = m.like_count.saturating_add(1))
            .await)
    }

    async fn decrement_like(&self, identity: &MessageIdentity) -> Result<bool, StoreError> {
        Ok(self
            .modify(identity, |m| m.like_count = m.like_count.saturating_sub(1))
            .await)
    }

    async fn update_liked_by(
        &self,
        identity: &MessageIdentity,
        liked_by: Option<&str>,
    ) -> Result<bool, StoreError> {
        Ok(self
            .modify(identity, |m| m.liked_by = liked_by.map(str::to_string))
            .await)
    }

    async fn find_by_id(&self, id: LocalId) -> Result<Option<Message>, StoreError> {
        Ok(self.inner.lock().await.by_id.get(&id).cloned())
    }

    async fn find_by_identity(
        &self,
        identity: &MessageIdentity,
    ) -> Result<Option<Message>, StoreError> {
        Ok(self
            .inner
            .lock()
            .await
            .by_id
            .values()
            .find(|m| &m.identity == identity)
            .cloned())
    }

    async fn all_messages(&self) -> Result<Vec<Message>, StoreError> {
        let mut messages: Vec<Message> =
            self.inner.lock().await.by_id.values().cloned().collect();
        messages.sort_by_key(|m| (m.timestamp_ms, m.id));
        Ok(messages)
    }
}
