//! Message entity and its scoped mutation buffer.
//!
//! A [`Message`] is the in-memory projection of a persisted record. During
//! generation it carries two views of itself: the optimistic local value
//! (updated the moment a mutation happens) and the confirmed persisted value
//! (whatever the store last accepted). The two are reconciled only by
//! [`Message::sync`] — await every outstanding write, then refresh once from
//! the authoritative record — so a stale background write can never stomp a
//! newer optimistic value.
//!
//! Mutations go through a [`MessageEditor`], the scoped buffer: at most one
//! open per message, setters accumulate into a patch, and release (explicit
//! [`close`](MessageEditor::close) or drop) always flushes what was
//! buffered.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use hanashi_types::{MessageId, MessagePatch, MessageRecord, Role, Status};

use crate::batch::{FlushConfig, SchedulerStats, WriteScheduler};
use crate::diag::{DiagnosticEvent, DiagnosticSink};
use crate::error::{CoreError, ValidationError};
use crate::store::RecordStore;
use crate::tokens::{TokenSender, TokenStream, token_channel};

/// In-memory projection of one persisted message, owning its token channel
/// and write scheduler.
pub struct Message {
    record: RwLock<MessageRecord>,
    scope_open: AtomicBool,
    tokens: TokenSender,
    stream: Mutex<Option<TokenStream>>,
    scheduler: WriteScheduler,
    store: Arc<dyn RecordStore>,
    diag: Arc<dyn DiagnosticSink>,
}

impl Message {
    /// Wrap a stored record. Only assistant messages get a consumable token
    /// stream — nothing ever produces into the others.
    pub(crate) fn from_record(
        record: MessageRecord,
        store: Arc<dyn RecordStore>,
        diag: Arc<dyn DiagnosticSink>,
        config: FlushConfig,
    ) -> Arc<Self> {
        let (tokens, stream) = token_channel();
        let stream = if record.role == Role::Assistant {
            Some(stream)
        } else {
            None
        };
        let scheduler = WriteScheduler::new(record.id, Arc::clone(&store), Arc::clone(&diag), config);
        Arc::new(Self {
            record: RwLock::new(record),
            scope_open: AtomicBool::new(false),
            tokens,
            stream: Mutex::new(stream),
            scheduler,
            store,
            diag,
        })
    }

    // ── Projection accessors ────────────────────────────────────────────
    //
    // These reflect the last-known projection. During active generation the
    // value may lag the producer's most recent mutation until the next
    // flush; the lag is bounded by the scheduler's FlushConfig.

    pub fn id(&self) -> MessageId {
        self.record.read().id
    }

    pub fn role(&self) -> Role {
        self.record.read().role
    }

    pub fn content(&self) -> Option<String> {
        self.record.read().content.clone()
    }

    pub fn parent_id(&self) -> Option<MessageId> {
        self.record.read().parent_id
    }

    pub fn status(&self) -> Option<Status> {
        self.record.read().status
    }

    pub fn external_id(&self) -> Option<String> {
        self.record.read().external_id.clone()
    }

    pub fn created_at(&self) -> u64 {
        self.record.read().created_at
    }

    /// Clone of the full projection.
    pub fn snapshot(&self) -> MessageRecord {
        self.record.read().clone()
    }

    // ── Streaming ───────────────────────────────────────────────────────

    /// Take the token stream. Hands it out once — a single traversal
    /// consumes the channel, so there is exactly one logical consumer.
    /// `None` for non-assistant messages or if already taken.
    pub fn stream(&self) -> Option<TokenStream> {
        self.stream.lock().take()
    }

    pub(crate) fn sender(&self) -> &TokenSender {
        &self.tokens
    }

    // ── Mutation ────────────────────────────────────────────────────────

    /// Open the mutation scope. Fails with [`CoreError::ScopeAlreadyOpen`]
    /// if one is open — at most one buffer per message, which is also what
    /// keeps a second producer from attaching to a streaming reply.
    pub fn edit(self: &Arc<Self>) -> Result<MessageEditor, CoreError> {
        if self.scope_open.swap(true, Ordering::SeqCst) {
            return Err(CoreError::ScopeAlreadyOpen(self.id()));
        }
        Ok(MessageEditor {
            message: Arc::clone(self),
            patch: MessagePatch::default(),
            released: false,
        })
    }

    /// Run `f` inside a mutation scope with a guaranteed release.
    ///
    /// On success the scope is closed normally. If `f` fails, the buffered
    /// mutations are still flushed best-effort, the error goes to the
    /// diagnostic sink, and then propagates to the caller — cleanup never
    /// swallows it.
    pub async fn update<T>(
        self: &Arc<Self>,
        f: impl FnOnce(&mut MessageEditor) -> Result<T, CoreError>,
    ) -> Result<T, CoreError> {
        let mut editor = self.edit()?;
        match f(&mut editor) {
            Ok(value) => {
                editor.close().await?;
                Ok(value)
            }
            Err(err) => {
                self.diag.report(DiagnosticEvent::ScopeError {
                    message: self.id(),
                    error: err.to_string(),
                });
                if let Err(release) = editor.close().await {
                    debug!(message = %self.id(), error = %release, "scope release failed after error");
                }
                Err(err)
            }
        }
    }

    /// Await every outstanding background write, then refresh the
    /// projection once from the authoritative stored record.
    ///
    /// Fragments buffered below the debounce threshold are flushed first,
    /// so a store read after this call never shows less content than was
    /// buffered before it began. With nothing new buffered, the call
    /// schedules zero writes.
    ///
    /// While a mutation scope is open the optimistic projection is the
    /// authority and the refresh is skipped — a producer may already be
    /// ahead of the store again by the time the barrier clears, and the
    /// refresh must never regress content shown to callers. The release of
    /// the scope performs the reconciling refresh.
    pub async fn sync(&self) -> Result<(), CoreError> {
        let scope_open = self.scope_open.load(Ordering::SeqCst);
        if scope_open && self.scheduler.stats().pending_fragments > 0 {
            if let Some(content) = self.content() {
                self.scheduler.flush(MessagePatch::content(content));
            }
        }
        self.scheduler.await_outstanding().await;
        if !scope_open {
            if let Some(record) = self.store.find_by_id(self.id()).await? {
                *self.record.write() = record;
            }
        }
        Ok(())
    }

    /// Activity counters of the write scheduler.
    pub fn scheduler_stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let record = self.record.read();
        f.debug_struct("Message")
            .field("id", &record.id)
            .field("role", &record.role)
            .field("status", &record.status)
            .field("content_len", &record.content.as_deref().map(str::len))
            .finish()
    }
}

/// The open mutation scope of one message.
///
/// Setters write into the buffered patch and optimistically into the
/// projection. Release — [`close`](Self::close), or drop as the backstop —
/// flushes the buffer; only `close` can also await the writes and refresh
/// the projection, so prefer it on every deliberate path.
#[derive(Debug)]
pub struct MessageEditor {
    message: Arc<Message>,
    patch: MessagePatch,
    released: bool,
}

impl MessageEditor {
    /// The message this scope belongs to.
    pub fn message(&self) -> &Arc<Message> {
        &self.message
    }

    /// Advance the status. Refuses regression per
    /// [`Status::can_advance_to`].
    pub fn set_status(&mut self, status: Status) -> Result<(), ValidationError> {
        {
            let mut record = self.message.record.write();
            if let Some(current) = record.status {
                if !current.can_advance_to(status) {
                    return Err(ValidationError::StatusRegression {
                        from: current,
                        to: status,
                    });
                }
            }
            record.status = Some(status);
        }
        self.patch.status = Some(status);
        Ok(())
    }

    /// Set the external correlation id.
    pub fn set_external_id(&mut self, external_id: impl Into<String>) {
        let external_id = external_id.into();
        self.message.record.write().external_id = Some(external_id.clone());
        self.patch.external_id = Some(external_id);
    }

    /// Re-link or unlink the parent. Tree-shape rules are enforced at
    /// append; this is the late-linkage escape hatch.
    pub fn set_parent(&mut self, parent: Option<MessageId>) {
        self.message.record.write().parent_id = parent;
        self.patch.parent_id = Some(parent);
    }

    /// Append one generated fragment: extends the buffered content,
    /// mirrors it into the projection, delivers the fragment to the token
    /// stream, and lets the scheduler decide whether a threshold crossed.
    /// Returns whether a background write was scheduled.
    ///
    /// The buffered patch is the accumulator — not the projection — so a
    /// concurrent refresh of the projection can never lose a fragment.
    pub fn append_fragment(&mut self, fragment: &str) -> bool {
        let mut content = match self.patch.content.take() {
            Some(buffered) => buffered,
            None => self.message.record.read().content.clone().unwrap_or_default(),
        };
        content.push_str(fragment);
        self.message.record.write().content = Some(content.clone());
        self.patch.content = Some(content.clone());
        self.message.tokens.push(fragment);
        self.message.scheduler.note_fragment(&content)
    }

    /// Release the scope: schedule the buffered patch as a final write,
    /// await every outstanding write for this message, and refresh the
    /// projection from the store.
    pub async fn close(mut self) -> Result<(), CoreError> {
        let patch = std::mem::take(&mut self.patch);
        self.released = true;
        self.message.scheduler.flush(patch);
        // The buffer is already drained; clear the flag first so sync()
        // performs the reconciling refresh.
        self.message.scope_open.store(false, Ordering::SeqCst);
        self.message.sync().await
    }
}

impl Drop for MessageEditor {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        // Backstop for error/panic paths: the buffered mutations still get
        // scheduled and the scope reopens, but nothing can be awaited here —
        // the projection stays unrefreshed until the next sync().
        let patch = std::mem::take(&mut self.patch);
        self.message.scheduler.flush(patch);
        self.message.scope_open.store(false, Ordering::SeqCst);
    }
}
