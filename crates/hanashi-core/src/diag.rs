//! Diagnostic sink for failures that must not abort generation.
//!
//! Background write failures, producer errors, and scope-release problems
//! are reported here rather than propagated into the streaming path. The
//! default sink forwards to `tracing`; tests use [`CollectingSink`].

use parking_lot::Mutex;
use tracing::warn;

use hanashi_types::MessageId;

/// A failure observed off the caller's path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DiagnosticEvent {
    /// A scheduled background write failed. Generation continues; a later
    /// full-snapshot write supersedes the loss.
    WriteFailed { message: MessageId, error: String },
    /// A generation producer raised mid-stream.
    GenerationFailed { message: MessageId, error: String },
    /// An error occurred inside a mutation scope; the buffered mutations
    /// were still flushed before this was reported.
    ScopeError { message: MessageId, error: String },
}

impl DiagnosticEvent {
    /// The message the failure belongs to.
    pub fn message(&self) -> MessageId {
        match self {
            Self::WriteFailed { message, .. }
            | Self::GenerationFailed { message, .. }
            | Self::ScopeError { message, .. } => *message,
        }
    }

    /// The failure text.
    pub fn error(&self) -> &str {
        match self {
            Self::WriteFailed { error, .. }
            | Self::GenerationFailed { error, .. }
            | Self::ScopeError { error, .. } => error,
        }
    }
}

/// Receives failure records. No format is mandated beyond the event enum.
pub trait DiagnosticSink: Send + Sync + 'static {
    fn report(&self, event: DiagnosticEvent);
}

/// Default sink: forwards everything to `tracing::warn!`.
#[derive(Debug, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn report(&self, event: DiagnosticEvent) {
        match &event {
            DiagnosticEvent::WriteFailed { message, error } => {
                warn!(message = %message, error = %error, "background write failed");
            }
            DiagnosticEvent::GenerationFailed { message, error } => {
                warn!(message = %message, error = %error, "generation failed");
            }
            DiagnosticEvent::ScopeError { message, error } => {
                warn!(message = %message, error = %error, "error inside mutation scope");
            }
        }
    }
}

/// Accumulates events in memory. Useful for testing.
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<DiagnosticEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything reported so far.
    pub fn events(&self) -> Vec<DiagnosticEvent> {
        self.events.lock().clone()
    }

    /// Check if nothing has been reported.
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl DiagnosticSink for CollectingSink {
    fn report(&self, event: DiagnosticEvent) {
        self.events.lock().push(event);
    }
}
