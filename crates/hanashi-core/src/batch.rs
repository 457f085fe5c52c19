//! Debounced persistence for streaming content.
//!
//! During generation, persisting every fragment would mean one storage write
//! per token. The scheduler batches instead: a write goes out when a
//! fragment-count threshold or an elapsed-time threshold is crossed,
//! whichever happens first. Every scheduled write carries a *full* content
//! snapshot, never a diff, so a later write supersedes anything an earlier
//! (possibly failed) one missed.
//!
//! Writes for one message are processed by a single background writer task
//! in schedule order — the structured replacement for tracking loose spawned
//! futures in a set. [`WriteScheduler::await_outstanding`] enqueues a
//! barrier and waits for it, which is how scope release knows every write
//! scheduled so far has landed.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use hanashi_types::{MessageId, MessagePatch};

use crate::diag::{DiagnosticEvent, DiagnosticSink};
use crate::store::RecordStore;

/// Configuration for write debouncing.
#[derive(Debug, Clone)]
pub struct FlushConfig {
    /// Schedule a write after this many fragments since the last one.
    pub flush_after_fragments: usize,
    /// Schedule a write once this much time has passed since the last one,
    /// checked at fragment arrival.
    pub flush_after: Duration,
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            flush_after_fragments: 5,
            flush_after: Duration::from_secs(3),
        }
    }
}

/// What the writer task is asked to do next.
enum WriteJob {
    /// Apply a patch to the store.
    Write(MessagePatch),
    /// Acknowledge that every job enqueued before this one has been
    /// processed. Performs no write.
    Barrier(oneshot::Sender<()>),
}

/// Debounce bookkeeping since the last scheduled write.
struct DebounceState {
    pending_fragments: usize,
    last_flush: Instant,
}

#[derive(Debug, Default)]
struct Counters {
    scheduled: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

/// Snapshot of a scheduler's activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Writes handed to the writer task so far.
    pub writes_scheduled: u64,
    /// Writes the store accepted.
    pub writes_completed: u64,
    /// Writes the store rejected (reported to the sink, not fatal).
    pub writes_failed: u64,
    /// Fragments seen since the last scheduled write.
    pub pending_fragments: usize,
}

/// Schedules debounced background writes for a single message.
pub struct WriteScheduler {
    message_id: MessageId,
    config: FlushConfig,
    tx: mpsc::UnboundedSender<WriteJob>,
    debounce: Mutex<DebounceState>,
    counters: Arc<Counters>,
}

impl WriteScheduler {
    /// Create a scheduler and spawn its writer task. Must be called within
    /// a tokio runtime.
    pub fn new(
        message_id: MessageId,
        store: Arc<dyn RecordStore>,
        sink: Arc<dyn DiagnosticSink>,
        config: FlushConfig,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let counters = Arc::new(Counters::default());
        tokio::spawn(writer_loop(
            message_id,
            store,
            sink,
            rx,
            Arc::clone(&counters),
        ));
        Self {
            message_id,
            config,
            tx,
            debounce: Mutex::new(DebounceState {
                pending_fragments: 0,
                last_flush: Instant::now(),
            }),
            counters,
        }
    }

    /// Record one fragment arrival. Schedules a write carrying the full
    /// content snapshot when either threshold is crossed; returns whether a
    /// write was scheduled.
    pub fn note_fragment(&self, content_snapshot: &str) -> bool {
        {
            let mut state = self.debounce.lock();
            state.pending_fragments += 1;
            let crossed = state.pending_fragments >= self.config.flush_after_fragments
                || state.last_flush.elapsed() >= self.config.flush_after;
            if !crossed {
                return false;
            }
            state.pending_fragments = 0;
            state.last_flush = Instant::now();
        }
        self.enqueue(MessagePatch::content(content_snapshot));
        true
    }

    /// Schedule a write unconditionally (used by scope release for the
    /// final accumulated patch). Resets the debounce window; empty patches
    /// are dropped.
    pub fn flush(&self, patch: MessagePatch) {
        {
            let mut state = self.debounce.lock();
            state.pending_fragments = 0;
            state.last_flush = Instant::now();
        }
        if patch.is_empty() {
            return;
        }
        self.enqueue(patch);
    }

    /// Wait until every write scheduled so far has been processed. The
    /// barrier itself performs no write, so calling this twice in a row
    /// does nothing the second time.
    pub async fn await_outstanding(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(WriteJob::Barrier(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }

    /// Current activity counters.
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            writes_scheduled: self.counters.scheduled.load(Ordering::SeqCst),
            writes_completed: self.counters.completed.load(Ordering::SeqCst),
            writes_failed: self.counters.failed.load(Ordering::SeqCst),
            pending_fragments: self.debounce.lock().pending_fragments,
        }
    }

    fn enqueue(&self, patch: MessagePatch) {
        self.counters.scheduled.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(WriteJob::Write(patch)).is_err() {
            // Writer task gone — only possible during shutdown.
            warn!(message = %self.message_id, "write dropped: writer task has exited");
        }
    }
}

/// Applies writes in schedule order; failures are sinked, never fatal.
async fn writer_loop(
    message_id: MessageId,
    store: Arc<dyn RecordStore>,
    sink: Arc<dyn DiagnosticSink>,
    mut rx: mpsc::UnboundedReceiver<WriteJob>,
    counters: Arc<Counters>,
) {
    while let Some(job) = rx.recv().await {
        match job {
            WriteJob::Write(patch) => match store.update(message_id, patch).await {
                Ok(_) => {
                    counters.completed.fetch_add(1, Ordering::SeqCst);
                }
                Err(err) => {
                    counters.failed.fetch_add(1, Ordering::SeqCst);
                    warn!(message = %message_id, error = %err, "background write failed");
                    sink.report(DiagnosticEvent::WriteFailed {
                        message: message_id,
                        error: err.to_string(),
                    });
                }
            },
            WriteJob::Barrier(ack) => {
                let _ = ack.send(());
            }
        }
    }
    debug!(message = %message_id, "writer task drained");
}
