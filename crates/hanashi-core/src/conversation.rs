//! Conversation core: validated append, the message index, and producer
//! wiring.
//!
//! `Conversation` is constructed from its dependencies — a record store and
//! a generator — rather than reaching for anything ambient. `append`
//! validates the tree invariants, creates the record, and for assistant
//! messages starts exactly one generation producer before returning; the
//! caller gets the message immediately and drains its token stream to watch
//! progress.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use hanashi_types::{MessageId, MessageRecord, Role, Status};

use crate::batch::FlushConfig;
use crate::diag::{DiagnosticSink, TracingSink};
use crate::error::{CoreError, ValidationError};
use crate::message::Message;
use crate::producer::{Generator, drive};
use crate::store::RecordStore;

/// Options for appending one message.
#[derive(Clone, Debug)]
pub struct AppendOptions {
    pub role: Role,
    pub content: Option<String>,
    pub external_id: Option<String>,
}

impl AppendOptions {
    /// The root prompt.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: Some(content.into()),
            external_id: None,
        }
    }

    /// A person's turn.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Some(content.into()),
            external_id: None,
        }
    }

    /// An assistant reply, to be generated.
    pub fn assistant() -> Self {
        Self {
            role: Role::Assistant,
            content: None,
            external_id: None,
        }
    }

    /// Correlate with an outside system's message id.
    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }
}

/// A branching conversation: the message tree and its live entities.
pub struct Conversation {
    store: Arc<dyn RecordStore>,
    generator: Arc<dyn Generator>,
    diag: Arc<dyn DiagnosticSink>,
    config: FlushConfig,
    messages: DashMap<MessageId, Arc<Message>>,
}

impl Conversation {
    /// Create a conversation over a store, with the given generator serving
    /// assistant replies.
    pub fn new(store: Arc<dyn RecordStore>, generator: Arc<dyn Generator>) -> Self {
        Self {
            store,
            generator,
            diag: Arc::new(TracingSink),
            config: FlushConfig::default(),
            messages: DashMap::new(),
        }
    }

    /// Override the debounce thresholds.
    pub fn with_config(mut self, config: FlushConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the diagnostic sink.
    pub fn with_diagnostics(mut self, diag: Arc<dyn DiagnosticSink>) -> Self {
        self.diag = diag;
        self
    }

    /// Append a message under `parent`.
    ///
    /// Validates the tree invariants first — an invalid combination fails
    /// with the specific violated rule and creates no record. For an
    /// assistant message the status moves to `Pending` and one generation
    /// producer is spawned before returning; generation does not block the
    /// caller.
    pub async fn append(
        &self,
        parent: Option<MessageId>,
        opts: AppendOptions,
    ) -> Result<Arc<Message>, CoreError> {
        validate(&opts, parent)?;
        if let Some(parent_id) = parent {
            self.ensure_exists(parent_id).await?;
        }

        let record = MessageRecord::new(opts.role, opts.content, parent, opts.external_id);
        let record = self.store.create(record).await?;
        debug!(message = %record.id, role = %record.role, "message created");

        let message = Message::from_record(
            record,
            Arc::clone(&self.store),
            Arc::clone(&self.diag),
            self.config.clone(),
        );
        self.messages.insert(message.id(), Arc::clone(&message));

        if message.role() == Role::Assistant {
            message
                .update(|editor| Ok(editor.set_status(Status::Pending)?))
                .await?;
            debug!(message = %message.id(), "spawning generation producer");
            tokio::spawn(drive(
                Arc::clone(&message),
                Arc::clone(&self.generator),
                Arc::clone(&self.diag),
            ));
        }

        Ok(message)
    }

    /// Look up a live message by id.
    pub fn get(&self, id: MessageId) -> Option<Arc<Message>> {
        self.messages.get(&id).map(|m| Arc::clone(m.value()))
    }

    /// All direct children of a message, from the store, in creation order.
    pub async fn children(&self, parent: MessageId) -> Result<Vec<MessageRecord>, CoreError> {
        Ok(self.store.find_by_parent(parent).await?)
    }

    /// Number of live messages in the index.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Check if the index is empty.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    async fn ensure_exists(&self, id: MessageId) -> Result<(), CoreError> {
        if self.messages.contains_key(&id) {
            return Ok(());
        }
        // Not live in this process — fall back to the store.
        match self.store.find_by_id(id).await? {
            Some(_) => Ok(()),
            None => Err(ValidationError::ParentNotFound(id).into()),
        }
    }
}

/// The role/parent/content invariant matrix, matched exhaustively.
fn validate(opts: &AppendOptions, parent: Option<MessageId>) -> Result<(), ValidationError> {
    match opts.role {
        Role::System => {
            if parent.is_some() {
                return Err(ValidationError::SystemWithParent);
            }
            if opts.content.is_none() {
                return Err(ValidationError::SystemWithoutContent);
            }
        }
        Role::User => {
            if parent.is_none() {
                return Err(ValidationError::UserWithoutParent);
            }
            if opts.content.is_none() {
                return Err(ValidationError::UserWithoutContent);
            }
        }
        Role::Assistant => {
            if parent.is_none() {
                return Err(ValidationError::AssistantWithoutParent);
            }
            if opts.content.is_some() {
                return Err(ValidationError::AssistantWithContent);
            }
        }
    }
    Ok(())
}
