//! Generation producers and the driver that binds one to a message.
//!
//! A [`Generator`] is the seam where the real token source plugs in: it is
//! handed an [`AssistantStream`] and pushes fragments until it is done. The
//! driver owns the surrounding protocol — status transitions, the mutation
//! scopes, the final flush, and closing the token channel on *every* exit
//! path so a waiting consumer can never hang.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use hanashi_types::Status;

use crate::diag::{DiagnosticEvent, DiagnosticSink};
use crate::error::CoreError;
use crate::message::{Message, MessageEditor};

/// A generation producer raised mid-stream.
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("producer failed: {0}")]
    Failed(String),
}

impl GenerateError {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }
}

/// A source of generated fragments.
///
/// Any implementation that pushes some fragments into the stream and
/// returns satisfies the contract; the driver handles everything else.
#[async_trait]
pub trait Generator: Send + Sync + 'static {
    async fn generate(&self, stream: &mut AssistantStream) -> Result<(), GenerateError>;
}

/// Producer-facing handle over an assistant message's open mutation scope.
pub struct AssistantStream {
    editor: MessageEditor,
}

impl AssistantStream {
    /// Emit one fragment: appended to the content, delivered to the
    /// consumer, and buffered for debounced persistence. Returns whether a
    /// background write was scheduled.
    pub fn push(&mut self, fragment: &str) -> bool {
        self.editor.append_fragment(fragment)
    }

    /// Content accumulated so far (optimistic projection).
    pub fn content(&self) -> String {
        self.editor.message().content().unwrap_or_default()
    }

    /// The message being generated into.
    pub fn message(&self) -> &Arc<Message> {
        self.editor.message()
    }
}

/// Run one producer against an assistant message.
///
/// Spawned by the conversation core; exactly one driver exists per
/// assistant message. Wind-down is unconditional: the terminal status and
/// final flush happen first, then the end marker — so a consumer that
/// drains the stream observes the terminal persisted content.
pub(crate) async fn drive(
    message: Arc<Message>,
    generator: Arc<dyn Generator>,
    sink: Arc<dyn DiagnosticSink>,
) {
    match run(&message, generator).await {
        Ok(()) => {
            debug!(message = %message.id(), "generation finished");
        }
        Err(err) => {
            sink.report(DiagnosticEvent::GenerationFailed {
                message: message.id(),
                error: err.to_string(),
            });
        }
    }
    message.sender().close();
}

async fn run(message: &Arc<Message>, generator: Arc<dyn Generator>) -> Result<(), CoreError> {
    // Durable transition into Generating before the first fragment.
    message
        .update(|editor| Ok(editor.set_status(Status::Generating)?))
        .await?;

    let editor = message.edit()?;
    let mut stream = AssistantStream { editor };
    let produced = generator.generate(&mut stream).await;

    let mut editor = stream.editor;
    let terminal = if produced.is_ok() {
        Status::Finished
    } else {
        Status::Error
    };
    editor.set_status(terminal)?;
    editor.close().await?;

    produced.map_err(CoreError::from)
}

/// Emits a fixed fragment sequence with an optional pacing delay between
/// fragments — a stand-in for a real generation source, whose latency the
/// delay simulates.
pub struct ScriptedGenerator {
    fragments: Vec<String>,
    delay: Duration,
}

impl ScriptedGenerator {
    pub fn new<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fragments: fragments.into_iter().map(Into::into).collect(),
            delay: Duration::ZERO,
        }
    }

    /// The classic demo script: fragments "0" through "9".
    pub fn counting() -> Self {
        Self::new((0..10).map(|i| i.to_string()))
    }

    /// Sleep this long after each fragment.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, stream: &mut AssistantStream) -> Result<(), GenerateError> {
        for fragment in &self.fragments {
            stream.push(fragment);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::FlushConfig;
    use crate::diag::CollectingSink;
    use crate::store::{MemoryRecordStore, RecordStore};
    use hanashi_types::MessageRecord;

    /// Fails after emitting a couple of fragments.
    struct AbortingGenerator;

    #[async_trait]
    impl Generator for AbortingGenerator {
        async fn generate(&self, stream: &mut AssistantStream) -> Result<(), GenerateError> {
            stream.push("par");
            stream.push("tial");
            Err(GenerateError::failed("provider dropped the connection"))
        }
    }

    async fn assistant_fixture() -> (Arc<MemoryRecordStore>, Arc<CollectingSink>, Arc<Message>) {
        let store = Arc::new(MemoryRecordStore::new());
        let sink = Arc::new(CollectingSink::new());
        let root = store.create(MessageRecord::system("root")).await.unwrap();
        let record = store
            .create(MessageRecord::assistant(root.id))
            .await
            .unwrap();
        let message = Message::from_record(
            record,
            Arc::clone(&store) as Arc<dyn RecordStore>,
            Arc::clone(&sink) as Arc<dyn DiagnosticSink>,
            FlushConfig::default(),
        );
        (store, sink, message)
    }

    #[tokio::test]
    async fn test_scripted_generation_end_to_end() {
        let (store, sink, message) = assistant_fixture().await;
        let stream = message.stream().unwrap();

        drive(
            Arc::clone(&message),
            Arc::new(ScriptedGenerator::counting()),
            Arc::clone(&sink) as Arc<dyn DiagnosticSink>,
        )
        .await;

        assert_eq!(stream.collect().await, "0123456789");
        assert_eq!(message.status(), Some(Status::Finished));
        let stored = store.find_by_id(message.id()).await.unwrap().unwrap();
        assert_eq!(stored.content.as_deref(), Some("0123456789"));
        assert_eq!(stored.status, Some(Status::Finished));
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_aborting_generator_still_terminates_stream() {
        let (store, sink, message) = assistant_fixture().await;
        let mut stream = message.stream().unwrap();

        drive(
            Arc::clone(&message),
            Arc::new(AbortingGenerator),
            Arc::clone(&sink) as Arc<dyn DiagnosticSink>,
        )
        .await;

        // The consumer sees the partial fragments and a clean end of
        // stream — never an error value, never a hang.
        assert_eq!(stream.next().await.as_deref(), Some("par"));
        assert_eq!(stream.next().await.as_deref(), Some("tial"));
        assert_eq!(stream.next().await, None);

        // The partial content was flushed and the status is terminal.
        let stored = store.find_by_id(message.id()).await.unwrap().unwrap();
        assert_eq!(stored.content.as_deref(), Some("partial"));
        assert_eq!(stored.status, Some(Status::Error));

        // And the failure reached the sink.
        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert!(events[0].error().contains("provider dropped"));
    }

    #[tokio::test]
    async fn test_generator_with_pacing_delay() {
        let (_, sink, message) = assistant_fixture().await;
        let stream = message.stream().unwrap();

        let generator =
            ScriptedGenerator::new(["a", "b", "c"]).with_delay(Duration::from_millis(1));
        drive(
            Arc::clone(&message),
            Arc::new(generator),
            Arc::clone(&sink) as Arc<dyn DiagnosticSink>,
        )
        .await;

        assert_eq!(stream.collect().await, "abc");
        assert_eq!(message.status(), Some(Status::Finished));
    }
}
