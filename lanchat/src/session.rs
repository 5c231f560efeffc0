//! Local session: the user's display name and networking role.
//!
//! Constructed once at start-up and shared (behind an `Arc`) with the
//! transport workers and the reconciler. There is no process-wide state.

use std::fmt;
use std::sync::OnceLock;

use lanchat_proto::codec;

/// Name used when the configured display name is blank.
pub const DEFAULT_DISPLAY_NAME: &str = "Anonymous";

/// Networking role of this device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Accepts connections and relays events between clients.
    Host,
    /// Holds a single connection to a host.
    Client,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host => write!(f, "host"),
            Self::Client => write!(f, "client"),
        }
    }
}

/// The local user's identity and role.
#[derive(Debug)]
pub struct Session {
    display_name: String,
    role: OnceLock<Role>,
}

impl Session {
    /// Creates a session with a normalized display name and no role.
    ///
    /// The name is trimmed, line breaks and colons are replaced (the name
    /// travels inside colon-delimited frames and identities), and a blank
    /// name becomes [`DEFAULT_DISPLAY_NAME`].
    pub fn new(display_name: impl AsRef<str>) -> Self {
        let cleaned = codec::sanitize_field(display_name.as_ref());
        let trimmed = cleaned.trim();
        let display_name = if trimmed.is_empty() {
            DEFAULT_DISPLAY_NAME.to_string()
        } else {
            trimmed.to_string()
        };
        Self {
            display_name,
            role: OnceLock::new(),
        }
    }

    /// Returns the local display name.
    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Returns the role, or `None` before networking has started.
    #[must_use]
    pub fn role(&self) -> Option<Role> {
        self.role.get().copied()
    }

    /// Sets the role. Only the first call succeeds.
    ///
    /// # Errors
    ///
    /// Returns the already-assigned role if one was set before.
    pub fn assign_role(&self, role: Role) -> Result<(), Role> {
        self.role.set(role).map_err(|_| self.role.get().copied().unwrap_or(role))
    }

    /// Whether `name` refers to the local user.
    #[must_use]
    pub fn is_local(&self, name: &str) -> bool {
        self.display_name == name
    }
}
