//! Shared message types for hanashi.
//!
//! This crate is the relational foundation: the typed message id, the closed
//! role/status enums, and the record/patch shapes that the store and the
//! engine exchange. It has **no internal hanashi dependencies** — a pure leaf
//! crate that the core builds on.
//!
//! # Entity overview
//!
//! ```text
//! MessageRecord (MessageId) ← one node of the conversation tree
//!     └── parent_id forms the tree (None only for the system root)
//!     └── role: system | user | assistant
//!     └── status: pending → generating → finished | error  (assistant only)
//!     └── content grows by append while an assistant reply streams
//!
//! MessagePatch ← a partial update against one record
//!     └── buffered by a mutation scope, flushed as a full snapshot
//! ```

pub mod ids;
pub mod message;

// Re-export primary types at crate root for convenience.
pub use ids::MessageId;
pub use message::{MessagePatch, MessageRecord, Role, Status};

/// Current time as Unix milliseconds. Used by constructors throughout the crate.
pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
