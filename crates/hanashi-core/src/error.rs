//! Error types for the conversation engine.

use thiserror::Error;

use hanashi_types::{MessageId, Status};

use crate::producer::GenerateError;
use crate::store::StoreError;

/// A role/parent/content precondition violated at append or mutation time.
///
/// Each variant names the specific rule that was broken. No partial state is
/// created when one of these is returned.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A system message is the tree root.
    #[error("a system message cannot have a parent")]
    SystemWithParent,

    /// A system message carries the prompt.
    #[error("a system message requires content")]
    SystemWithoutContent,

    /// A user message always replies to something.
    #[error("a user message requires a parent")]
    UserWithoutParent,

    /// A user message carries its text.
    #[error("a user message requires content")]
    UserWithoutContent,

    /// An assistant message always replies to something.
    #[error("an assistant message requires a parent")]
    AssistantWithoutParent,

    /// Assistant content is populated only by the generation producer.
    #[error("an assistant message must be created without content")]
    AssistantWithContent,

    /// The referenced parent does not exist in the store.
    #[error("parent message not found: {0}")]
    ParentNotFound(MessageId),

    /// Status progression is monotonic and terminal states are frozen.
    #[error("status cannot move from {from} to {to}")]
    StatusRegression { from: Status, to: Status },
}

/// Errors surfaced by the conversation engine.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// At most one mutation scope may be open per message.
    #[error("a mutation scope is already open for message {0}")]
    ScopeAlreadyOpen(MessageId),

    #[error("generation failed: {0}")]
    Generation(#[from] GenerateError),
}
