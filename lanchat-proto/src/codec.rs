//! Encoding and decoding of `LanChat` wire frames.
//!
//! A frame is one line of text (the newline is added by the transport).
//! Keyed frames start with a tag and carry colon-separated fields; the
//! last field of a frame may itself contain colons, so each tag splits
//! only on its first `N - 1` separators:
//!
//! ```text
//! MSG:<id>:<body>
//! IMG:<id>:<caption>:<base64>
//! DOC:<id>:<file name>:<size>:<base64>
//! LIKE:<id>[:<actor>]      UNLIKE:<id>[:<actor>]
//! EDIT:<id>:<new body>
//! DELETE:<id>
//! <sender>: <body>
//! ```
//!
//! Frames that do not match their tag's field count are dropped:
//! [`decode`] returns `None` and never errors. Encoding does not escape
//! fields, so producers must keep newlines out of every field (see
//! [`sanitize_text`]) and colons out of captions and file names (see
//! [`sanitize_field`]).

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use crate::event::{ChatEvent, MessageIdentity};

/// Separator between sender and body in untagged relay lines.
pub const RELAY_SEPARATOR: &str = ": ";

/// Maximum number of characters of a frame included in log output.
const PREVIEW_CHARS: usize = 120;

/// Tag prefix of a keyed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    /// `MSG:`
    Msg,
    /// `IMG:`
    Img,
    /// `DOC:`
    Doc,
    /// `LIKE:`
    Like,
    /// `UNLIKE:`
    Unlike,
    /// `EDIT:`
    Edit,
    /// `DELETE:`
    Delete,
}

impl Tag {
    /// All tags, in matching order.
    pub const ALL: [Self; 7] = [
        Self::Msg,
        Self::Img,
        Self::Doc,
        Self::Like,
        Self::Unlike,
        Self::Edit,
        Self::Delete,
    ];

    /// Returns the wire prefix of this tag, including the colon.
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Msg => "MSG:",
            Self::Img => "IMG:",
            Self::Doc => "DOC:",
            Self::Like => "LIKE:",
            Self::Unlike => "UNLIKE:",
            Self::Edit => "EDIT:",
            Self::Delete => "DELETE:",
        }
    }

    /// Returns the tag a line starts with, if any.
    #[must_use]
    pub fn of(line: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tag| line.starts_with(tag.prefix()))
    }

    /// Whether frames with this tag mutate an existing message.
    #[must_use]
    pub const fn is_mutation(self) -> bool {
        matches!(self, Self::Like | Self::Unlike | Self::Edit | Self::Delete)
    }
}

/// Encodes an event as a single frame, without the trailing newline.
#[must_use]
pub fn encode(event: &ChatEvent) -> String {
    match event {
        ChatEvent::Text { unique_id, body } => format!("MSG:{unique_id}:{body}"),
        ChatEvent::Image {
            unique_id,
            caption,
            payload,
        } => format!("IMG:{unique_id}:{caption}:{}", STANDARD.encode(payload)),
        ChatEvent::Document {
            unique_id,
            file_name,
            file_size,
            payload,
        } => format!(
            "DOC:{unique_id}:{file_name}:{file_size}:{}",
            STANDARD.encode(payload)
        ),
        ChatEvent::Like {
            unique_id,
            liked,
            actor,
        } => {
            let tag = if *liked { Tag::Like } else { Tag::Unlike };
            match actor {
                Some(actor) => format!("{}{unique_id}:{actor}", tag.prefix()),
                None => format!("{}{unique_id}", tag.prefix()),
            }
        }
        ChatEvent::Edit {
            unique_id,
            new_body,
        } => format!("EDIT:{unique_id}:{new_body}"),
        ChatEvent::Delete { unique_id } => format!("DELETE:{unique_id}"),
        ChatEvent::PlainRelay {
            sender_display_name,
            body,
        } => format!("{sender_display_name}{RELAY_SEPARATOR}{body}"),
    }
}

/// Decodes one frame into an event.
///
/// Returns `None` for blank lines, tagged frames with the wrong number of
/// fields, an empty identity, an unparsable document size or invalid
/// base64, and untagged lines without a `": "` separator.
#[must_use]
pub fn decode(line: &str) -> Option<ChatEvent> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return None;
    }

    let Some(tag) = Tag::of(line) else {
        let (sender, body) = line.split_once(RELAY_SEPARATOR)?;
        return Some(ChatEvent::PlainRelay {
            sender_display_name: sender.to_string(),
            body: body.to_string(),
        });
    };

    let rest = &line[tag.prefix().len()..];
    let event = match tag {
        Tag::Msg => {
            let (id, body) = rest.split_once(':')?;
            ChatEvent::Text {
                unique_id: identity(id)?,
                body: body.to_string(),
            }
        }
        Tag::Img => {
            let mut parts = rest.splitn(3, ':');
            let (id, caption, data) = (parts.next()?, parts.next()?, parts.next()?);
            ChatEvent::Image {
                unique_id: identity(id)?,
                caption: caption.to_string(),
                payload: STANDARD.decode(data).ok()?,
            }
        }
        Tag::Doc => {
            let mut parts = rest.splitn(4, ':');
            let (id, name, size, data) =
                (parts.next()?, parts.next()?, parts.next()?, parts.next()?);
            ChatEvent::Document {
                unique_id: identity(id)?,
                file_name: name.to_string(),
                file_size: size.trim().parse().ok()?,
                payload: STANDARD.decode(data).ok()?,
            }
        }
        Tag::Like | Tag::Unlike => {
            let (id, actor) = match rest.split_once(':') {
                Some((id, actor)) if !actor.is_empty() => (id, Some(actor.to_string())),
                Some((id, _)) => (id, None),
                None => (rest, None),
            };
            ChatEvent::Like {
                unique_id: identity(id)?,
                liked: tag == Tag::Like,
                actor,
            }
        }
        Tag::Edit => {
            let (id, body) = rest.split_once(':')?;
            ChatEvent::Edit {
                unique_id: identity(id)?,
                new_body: body.to_string(),
            }
        }
        Tag::Delete => ChatEvent::Delete {
            unique_id: identity(rest)?,
        },
    };
    Some(event)
}

/// Extracts the identity and text of a keyed `MSG:` body.
///
/// The host relays keyed text as `sender: MSG:<id>:<body>`, so the body of
/// a [`ChatEvent::PlainRelay`] may carry an author-assigned identity.
#[must_use]
pub fn split_keyed_text(body: &str) -> Option<(MessageIdentity, &str)> {
    let rest = body.strip_prefix(Tag::Msg.prefix())?;
    let (id, text) = rest.split_once(':')?;
    Some((identity(id)?, text))
}

/// Replaces line breaks so the text fits in a single frame.
#[must_use]
pub fn sanitize_text(text: &str) -> String {
    text.replace("\r\n", " ").replace(['\r', '\n'], " ")
}

/// Like [`sanitize_text`], but also replaces colons, for fields that are
/// followed by further fields on the wire (captions, file names, names).
#[must_use]
pub fn sanitize_field(text: &str) -> String {
    sanitize_text(text).replace(':', " ")
}

/// Shortens a frame for log output.
#[must_use]
pub fn preview(line: &str) -> String {
    if line.chars().count() > PREVIEW_CHARS {
        let head: String = line.chars().take(PREVIEW_CHARS).collect();
        format!("{head}...")
    } else {
        line.to_string()
    }
}

fn identity(id: &str) -> Option<MessageIdentity> {
    if id.is_empty() {
        tracing::debug!("frame with empty identity dropped");
        None
    } else {
        Some(MessageIdentity::new(id))
    }
}
