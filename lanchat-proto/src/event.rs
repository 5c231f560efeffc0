//! Chat events exchanged between `LanChat` peers.
//!
//! Every event that targets an existing message carries a
//! [`MessageIdentity`]: the logical key that all peers use to correlate
//! likes, edits, and deletions with their local copy of the message,
//! independently of any local row id.

use std::fmt;

/// Body of the notice broadcast when a peer finishes its handshake.
pub const JOIN_NOTICE: &str = "has joined the chat.";

/// Logical key of a chat message, shared by every peer holding a copy.
///
/// Either supplied by the sender (`<sender>_<timestamp>`) or synthesized
/// by the receiver for unkeyed lines. Once assigned it never changes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageIdentity(String);

impl MessageIdentity {
    /// Wraps an identity string received from the wire or from storage.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Builds the `<sender>_<timestamp_ms>` identity.
    ///
    /// Two messages from the same sender within the same millisecond get
    /// the same identity.
    #[must_use]
    pub fn synthesize(sender: &str, timestamp_ms: i64) -> Self {
        Self(format!("{sender}_{timestamp_ms}"))
    }

    /// Returns the identity string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the sender name encoded in the identity: everything before
    /// the first underscore, or the whole identity when there is none.
    #[must_use]
    pub fn sender_prefix(&self) -> &str {
        self.0.split_once('_').map_or(self.0.as_str(), |(sender, _)| sender)
    }
}

impl fmt::Display for MessageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageIdentity {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for MessageIdentity {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A decoded protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// Keyed text message (`MSG:`).
    Text {
        /// Identity assigned by the author.
        unique_id: MessageIdentity,
        /// Message text, may contain colons.
        body: String,
    },
    /// Image with optional caption (`IMG:`).
    Image {
        /// Identity assigned by the author.
        unique_id: MessageIdentity,
        /// Caption text, empty when none was given.
        caption: String,
        /// Raw image bytes.
        payload: Vec<u8>,
    },
    /// Document attachment (`DOC:`).
    Document {
        /// Identity assigned by the author.
        unique_id: MessageIdentity,
        /// Original file name.
        file_name: String,
        /// File size in bytes as reported by the author.
        file_size: u64,
        /// Raw document bytes.
        payload: Vec<u8>,
    },
    /// Like toggle (`LIKE:` / `UNLIKE:`).
    Like {
        /// Message being liked or unliked.
        unique_id: MessageIdentity,
        /// `true` for a like, `false` for an unlike.
        liked: bool,
        /// Who is toggling, when the frame carries it.
        actor: Option<String>,
    },
    /// Replacement text for an existing message (`EDIT:`).
    Edit {
        /// Message being edited.
        unique_id: MessageIdentity,
        /// New message text.
        new_body: String,
    },
    /// Soft deletion of an existing message (`DELETE:`).
    Delete {
        /// Message being deleted.
        unique_id: MessageIdentity,
    },
    /// Untagged `sender: body` line, used for relayed text and join notices.
    PlainRelay {
        /// Display name of the author as seen by the relaying host.
        sender_display_name: String,
        /// Line body; may itself be a keyed `MSG:` frame.
        body: String,
    },
}

impl ChatEvent {
    /// Returns the identity this event refers to, if it is keyed.
    #[must_use]
    pub const fn unique_id(&self) -> Option<&MessageIdentity> {
        match self {
            Self::Text { unique_id, .. }
            | Self::Image { unique_id, .. }
            | Self::Document { unique_id, .. }
            | Self::Like { unique_id, .. }
            | Self::Edit { unique_id, .. }
            | Self::Delete { unique_id } => Some(unique_id),
            Self::PlainRelay { .. } => None,
        }
    }

    /// Whether this event mutates an existing message (like, edit, delete).
    #[must_use]
    pub const fn is_mutation(&self) -> bool {
        matches!(
            self,
            Self::Like { .. } | Self::Edit { .. } | Self::Delete { .. }
        )
    }

    /// Whether this event carries an attachment payload.
    #[must_use]
    pub const fn is_media(&self) -> bool {
        matches!(self, Self::Image { .. } | Self::Document { .. })
    }

    /// Short name of the variant, for logging.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Image { .. } => "image",
            Self::Document { .. } => "document",
            Self::Like { liked: true, .. } => "like",
            Self::Like { liked: false, .. } => "unlike",
            Self::Edit { .. } => "edit",
            Self::Delete { .. } => "delete",
            Self::PlainRelay { .. } => "relay",
        }
    }
}
