//! Typed message identifier.
//!
//! `MessageId` wraps UUIDv7 (time-ordered, globally unique). It is opaque to
//! the store — persisted as standard UUID text — and displays as the full
//! UUID for logging. The `short()` form (first 8 hex chars) is for
//! human-facing output, never used as a lookup key.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A message identifier (UUIDv7).
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(uuid::Uuid);

impl MessageId {
    /// Create a new time-ordered ID (UUIDv7).
    pub fn new() -> Self {
        Self(uuid::Uuid::now_v7())
    }

    /// First 8 hex characters — for human display only, not lookup.
    pub fn short(&self) -> String {
        self.0.as_simple().to_string()[..8].to_string()
    }

    /// Full 32-character hex string (no hyphens).
    pub fn to_hex(&self) -> String {
        self.0.as_simple().to_string()
    }

    /// Parse from a hex string (32 chars, no hyphens) or standard UUID format.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        uuid::Uuid::parse_str(s).map(Self)
    }

    /// A nil / zero ID — for sentinel values only.
    pub fn nil() -> Self {
        Self(uuid::Uuid::nil())
    }

    /// Check if this is the nil ID.
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<uuid::Uuid> for MessageId {
    fn from(u: uuid::Uuid) -> Self {
        Self(u)
    }
}

impl From<MessageId> for uuid::Uuid {
    fn from(id: MessageId) -> uuid::Uuid {
        id.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Full UUID with hyphens for log readability
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({})", self.short())
    }
}
