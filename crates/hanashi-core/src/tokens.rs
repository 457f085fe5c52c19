//! Ordered fragment delivery from a producer to a single consumer.
//!
//! A token channel is an unbounded single-producer/single-consumer queue of
//! text fragments terminated by exactly one end marker. The producer never
//! blocks; the consumer awaits until a fragment or the end marker arrives.
//!
//! The stream also treats a vanished producer (all senders dropped) as end
//! of stream, so a consumer can never be left hanging by an aborted
//! generation. Fan-out to multiple consumers is unsupported — the receiving
//! half is handed out once.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;

enum Token {
    Fragment(String),
    End,
}

/// Create a connected sender/stream pair.
pub fn token_channel() -> (TokenSender, TokenStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        TokenSender {
            tx,
            closed: Arc::new(AtomicBool::new(false)),
        },
        TokenStream { rx, done: false },
    )
}

/// Producer half of a token channel.
#[derive(Clone)]
pub struct TokenSender {
    tx: mpsc::UnboundedSender<Token>,
    closed: Arc<AtomicBool>,
}

impl TokenSender {
    /// Push one fragment. Ignored after [`close`](Self::close) — the
    /// contract is that nothing follows the end marker, and this enforces
    /// it rather than trusting the producer.
    pub fn push(&self, fragment: impl Into<String>) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let _ = self.tx.send(Token::Fragment(fragment.into()));
    }

    /// Push the end marker. Idempotent — only the first call emits it.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.tx.send(Token::End);
        }
    }

    /// Whether the end marker has been pushed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Consumer half of a token channel.
///
/// Not restartable: a single traversal consumes the queue.
pub struct TokenStream {
    rx: mpsc::UnboundedReceiver<Token>,
    done: bool,
}

impl TokenStream {
    /// Await the next fragment. Returns `None` once the end marker arrives
    /// or the producer is gone; stays `None` afterwards.
    pub async fn next(&mut self) -> Option<String> {
        if self.done {
            return None;
        }
        match self.rx.recv().await {
            Some(Token::Fragment(text)) => Some(text),
            Some(Token::End) | None => {
                self.done = true;
                None
            }
        }
    }

    /// Drain the stream to completion, concatenating every fragment.
    pub async fn collect(mut self) -> String {
        let mut out = String::new();
        while let Some(fragment) = self.next().await {
            out.push_str(&fragment);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fragments_arrive_in_order() {
        let (tx, mut rx) = token_channel();
        tx.push("a");
        tx.push("b");
        tx.push("c");
        tx.close();

        assert_eq!(rx.next().await.as_deref(), Some("a"));
        assert_eq!(rx.next().await.as_deref(), Some("b"));
        assert_eq!(rx.next().await.as_deref(), Some("c"));
        assert_eq!(rx.next().await, None);
        // Terminated for good.
        assert_eq!(rx.next().await, None);
    }

    #[tokio::test]
    async fn test_push_after_close_is_dropped() {
        let (tx, rx) = token_channel();
        tx.push("kept");
        tx.close();
        tx.push("dropped");
        tx.close();

        assert_eq!(rx.collect().await, "kept");
    }

    #[tokio::test]
    async fn test_dropped_sender_terminates_stream() {
        let (tx, mut rx) = token_channel();
        tx.push("only");
        drop(tx);

        assert_eq!(rx.next().await.as_deref(), Some("only"));
        assert_eq!(rx.next().await, None);
    }

    #[tokio::test]
    async fn test_consumer_waits_for_producer() {
        let (tx, mut rx) = token_channel();

        let producer = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            tx.push("late");
            tx.close();
        });

        assert_eq!(rx.next().await.as_deref(), Some("late"));
        assert_eq!(rx.next().await, None);
        producer.await.unwrap();
    }

    #[tokio::test]
    async fn test_collect_concatenates() {
        let (tx, rx) = token_channel();
        for i in 0..10 {
            tx.push(i.to_string());
        }
        tx.close();
        assert_eq!(rx.collect().await, "0123456789");
    }
}
