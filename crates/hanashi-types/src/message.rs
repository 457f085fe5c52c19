//! Message roles, statuses, records, and partial updates.
//!
//! `Role` and `Status` are closed enums — validation and transition sites
//! match on them exhaustively rather than comparing strings. `MessageRecord`
//! is the persisted shape of one tree node; `MessagePatch` is a partial
//! update against it, buffered by a mutation scope and applied by the store.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::EnumString;

use crate::ids::MessageId;

/// Who authored a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum Role {
    /// The root prompt. Exactly one per tree, no parent.
    System,
    /// A person's turn. Always has a parent and content.
    User,
    /// A generated reply. Created empty; content streams in.
    Assistant,
}

impl Role {
    /// Parse from string (case-insensitive).
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        <Self as FromStr>::from_str(s).ok()
    }

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Generation lifecycle for an assistant message.
///
/// Progression is monotonic: `Pending → Generating → Finished | Error`.
/// Terminal states are frozen — see [`Status::can_advance_to`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum Status {
    /// Created, producer not yet running.
    Pending,
    /// Producer actively appending fragments.
    Generating,
    /// Completed normally; content is final.
    Finished,
    /// Producer aborted; whatever content was flushed remains.
    Error,
}

impl Status {
    /// Parse from string (case-insensitive).
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        <Self as FromStr>::from_str(s).ok()
    }

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Generating => "generating",
            Status::Finished => "finished",
            Status::Error => "error",
        }
    }

    /// Check if this status indicates completion (Finished or Error).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Finished | Status::Error)
    }

    /// Check if this status indicates active work.
    pub fn is_active(&self) -> bool {
        matches!(self, Status::Generating)
    }

    fn rank(self) -> u8 {
        match self {
            Status::Pending => 0,
            Status::Generating => 1,
            Status::Finished | Status::Error => 2,
        }
    }

    /// Whether a transition to `next` preserves monotonic progression.
    ///
    /// Forward jumps are allowed (`Pending → Finished` is legal); once a
    /// terminal state is reached only the identical status is accepted.
    pub fn can_advance_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return self == next;
        }
        next.rank() >= self.rank()
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The persisted shape of one message: a node of the conversation tree.
///
/// `status` is populated for assistant messages only. Children are not
/// modeled as an owned collection — they are discovered by querying the
/// store for records whose `parent_id` matches.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Unique identifier, assigned at creation, immutable.
    pub id: MessageId,
    /// Author role, immutable after creation.
    pub role: Role,
    /// Message text. `None` for an assistant message until generation
    /// starts; append-only while it runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Parent node. `None` only for the system root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<MessageId>,
    /// Generation lifecycle. `None` for non-assistant roles.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    /// Correlation id for an outside system (e.g. an inbound channel
    /// message), if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    /// Timestamp when the record was created (Unix millis).
    pub created_at: u64,
}

impl MessageRecord {
    /// Create a record with a fresh id and the current timestamp.
    pub fn new(
        role: Role,
        content: Option<String>,
        parent_id: Option<MessageId>,
        external_id: Option<String>,
    ) -> Self {
        Self {
            id: MessageId::new(),
            role,
            content,
            parent_id,
            status: None,
            external_id,
            created_at: crate::now_millis(),
        }
    }

    /// The root prompt of a tree.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, Some(content.into()), None, None)
    }

    /// A person's turn under `parent`.
    pub fn user(parent: MessageId, content: impl Into<String>) -> Self {
        Self::new(Role::User, Some(content.into()), Some(parent), None)
    }

    /// An empty assistant reply under `parent`, awaiting generation.
    pub fn assistant(parent: MessageId) -> Self {
        Self::new(Role::Assistant, None, Some(parent), None)
    }

    /// Check if this is the tree root (no parent).
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// A partial update against one record.
///
/// `None` fields are left untouched by [`MessagePatch::apply_to`]. The
/// double option on `parent_id` distinguishes "unchanged" (`None`) from
/// "unlink" (`Some(None)`).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MessagePatch {
    /// Replace the content with this full snapshot.
    pub content: Option<String>,
    /// Advance the status.
    pub status: Option<Status>,
    /// Re-link (`Some(Some(id))`) or unlink (`Some(None)`) the parent.
    pub parent_id: Option<Option<MessageId>>,
    /// Set the external correlation id.
    pub external_id: Option<String>,
}

impl MessagePatch {
    /// A patch carrying only a content snapshot.
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    /// Check if the patch changes nothing.
    pub fn is_empty(&self) -> bool {
        self.content.is_none()
            && self.status.is_none()
            && self.parent_id.is_none()
            && self.external_id.is_none()
    }

    /// Fold a later patch into this one — later fields win.
    pub fn merge(&mut self, later: MessagePatch) {
        if later.content.is_some() {
            self.content = later.content;
        }
        if later.status.is_some() {
            self.status = later.status;
        }
        if later.parent_id.is_some() {
            self.parent_id = later.parent_id;
        }
        if later.external_id.is_some() {
            self.external_id = later.external_id;
        }
    }

    /// Apply the patched fields to a record, leaving the rest untouched.
    pub fn apply_to(&self, record: &mut MessageRecord) {
        if let Some(content) = &self.content {
            record.content = Some(content.clone());
        }
        if let Some(status) = self.status {
            record.status = Some(status);
        }
        if let Some(parent) = self.parent_id {
            record.parent_id = parent;
        }
        if let Some(external_id) = &self.external_id {
            record.external_id = Some(external_id.clone());
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // ── Role ────────────────────────────────────────────────────────────

    #[test]
    fn test_role_parsing() {
        assert_eq!(Role::from_str("system"), Some(Role::System));
        assert_eq!(Role::from_str("USER"), Some(Role::User));
        assert_eq!(Role::from_str("Assistant"), Some(Role::Assistant));
        assert_eq!(Role::from_str("invalid"), None);
    }

    #[test]
    fn test_role_serde_is_lowercase() {
        let json = serde_json::to_string(&Role::Assistant).unwrap();
        assert_eq!(json, "\"assistant\"");
        let parsed: Role = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, Role::Assistant);
    }

    // ── Status ──────────────────────────────────────────────────────────

    #[test]
    fn test_status_parsing() {
        assert_eq!(Status::from_str("pending"), Some(Status::Pending));
        assert_eq!(Status::from_str("GENERATING"), Some(Status::Generating));
        assert_eq!(Status::from_str("Finished"), Some(Status::Finished));
        assert_eq!(Status::from_str("error"), Some(Status::Error));
        assert_eq!(Status::from_str("invalid"), None);
    }

    #[test]
    fn test_status_terminal() {
        assert!(Status::Finished.is_terminal());
        assert!(Status::Error.is_terminal());
        assert!(!Status::Pending.is_terminal());
        assert!(!Status::Generating.is_terminal());
        assert!(Status::Generating.is_active());
    }

    #[test]
    fn test_status_advances_forward() {
        assert!(Status::Pending.can_advance_to(Status::Generating));
        assert!(Status::Generating.can_advance_to(Status::Finished));
        assert!(Status::Generating.can_advance_to(Status::Error));
        // Forward jump is legal
        assert!(Status::Pending.can_advance_to(Status::Finished));
        // Re-asserting the current status is legal
        assert!(Status::Generating.can_advance_to(Status::Generating));
    }

    #[test]
    fn test_status_never_regresses() {
        assert!(!Status::Generating.can_advance_to(Status::Pending));
        assert!(!Status::Finished.can_advance_to(Status::Generating));
        assert!(!Status::Finished.can_advance_to(Status::Pending));
        // Terminal states are frozen, even against each other
        assert!(!Status::Finished.can_advance_to(Status::Error));
        assert!(!Status::Error.can_advance_to(Status::Finished));
        assert!(Status::Error.can_advance_to(Status::Error));
    }

    // ── MessageRecord ───────────────────────────────────────────────────

    #[test]
    fn test_system_record_shape() {
        let rec = MessageRecord::system("You are a helpful assistant.");
        assert_eq!(rec.role, Role::System);
        assert_eq!(rec.content.as_deref(), Some("You are a helpful assistant."));
        assert!(rec.is_root());
        assert_eq!(rec.status, None);
        assert_eq!(rec.external_id, None);
    }

    #[test]
    fn test_user_record_shape() {
        let parent = MessageId::new();
        let rec = MessageRecord::user(parent, "Count from 0 to 9.");
        assert_eq!(rec.role, Role::User);
        assert_eq!(rec.parent_id, Some(parent));
        assert!(!rec.is_root());
    }

    #[test]
    fn test_assistant_record_starts_empty() {
        let parent = MessageId::new();
        let rec = MessageRecord::assistant(parent);
        assert_eq!(rec.role, Role::Assistant);
        assert_eq!(rec.content, None);
        assert_eq!(rec.status, None);
        assert_eq!(rec.parent_id, Some(parent));
    }

    #[test]
    fn test_record_ids_are_fresh() {
        let a = MessageRecord::system("a");
        let b = MessageRecord::system("b");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_record_serde_skips_none_fields() {
        let rec = MessageRecord::system("hello");
        let json = serde_json::to_string(&rec).unwrap();
        assert!(!json.contains("parent_id"));
        assert!(!json.contains("status"));
        assert!(!json.contains("external_id"));
        let parsed: MessageRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(rec, parsed);
    }

    // ── MessagePatch ────────────────────────────────────────────────────

    #[test]
    fn test_patch_default_is_empty() {
        assert!(MessagePatch::default().is_empty());
        assert!(!MessagePatch::content("x").is_empty());
    }

    #[test]
    fn test_patch_apply_touches_only_set_fields() {
        let mut rec = MessageRecord::assistant(MessageId::new());
        let before_parent = rec.parent_id;

        let patch = MessagePatch {
            content: Some("01234".into()),
            status: Some(Status::Generating),
            ..Default::default()
        };
        patch.apply_to(&mut rec);

        assert_eq!(rec.content.as_deref(), Some("01234"));
        assert_eq!(rec.status, Some(Status::Generating));
        assert_eq!(rec.parent_id, before_parent);
        assert_eq!(rec.external_id, None);
    }

    #[test]
    fn test_patch_unlinks_parent() {
        let mut rec = MessageRecord::user(MessageId::new(), "hi");
        let patch = MessagePatch {
            parent_id: Some(None),
            ..Default::default()
        };
        patch.apply_to(&mut rec);
        assert_eq!(rec.parent_id, None);
    }

    #[test]
    fn test_patch_merge_later_wins() {
        let mut early = MessagePatch {
            content: Some("0123".into()),
            status: Some(Status::Generating),
            ..Default::default()
        };
        let later = MessagePatch {
            content: Some("0123456789".into()),
            status: Some(Status::Finished),
            external_id: Some("ext-1".into()),
            ..Default::default()
        };
        early.merge(later);

        assert_eq!(early.content.as_deref(), Some("0123456789"));
        assert_eq!(early.status, Some(Status::Finished));
        assert_eq!(early.external_id.as_deref(), Some("ext-1"));
    }

    #[test]
    fn test_patch_merge_keeps_earlier_unset_fields() {
        let mut early = MessagePatch {
            status: Some(Status::Generating),
            ..Default::default()
        };
        early.merge(MessagePatch::content("abc"));
        assert_eq!(early.status, Some(Status::Generating));
        assert_eq!(early.content.as_deref(), Some("abc"));
    }
}
