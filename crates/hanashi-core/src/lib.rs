//! # hanashi-core
//!
//! Branching conversation engine with streamed, debounce-persisted
//! assistant replies.
//!
//! A conversation is a tree of messages. Assistant replies are produced
//! incrementally by a generation producer; the engine reconciles three
//! competing requirements around that stream:
//!
//! - a consumer reads fragments live, in order, exactly once
//!   ([`TokenStream`]);
//! - persisted state converges to the final content without one storage
//!   write per fragment ([`WriteScheduler`] with dual count/time
//!   thresholds);
//! - mutations made during generation become durably visible as whole
//!   increments ([`MessageEditor`], the scoped buffer with a guaranteed
//!   flush on release).
//!
//! ```ignore
//! let store = Arc::new(MemoryRecordStore::new());
//! let conv = Conversation::new(store, Arc::new(my_generator));
//!
//! let root = conv.append(None, AppendOptions::system("You are a helpful assistant.")).await?;
//! let user = conv.append(Some(root.id()), AppendOptions::user("Count from 0 to 9.")).await?;
//! let reply = conv.append(Some(user.id()), AppendOptions::assistant()).await?;
//!
//! let mut stream = reply.stream().unwrap();
//! while let Some(fragment) = stream.next().await {
//!     print!("{fragment}");
//! }
//! reply.sync().await?;
//! assert_eq!(reply.status(), Some(Status::Finished));
//! ```
//!
//! All concurrency is within a single process; multi-node coordination and
//! cancellation of an in-flight generation are out of scope.

pub mod batch;
pub mod conversation;
pub mod diag;
pub mod error;
pub mod message;
pub mod producer;
pub mod record_db;
pub mod store;
pub mod tokens;

pub use batch::{FlushConfig, SchedulerStats, WriteScheduler};
pub use conversation::{AppendOptions, Conversation};
pub use diag::{CollectingSink, DiagnosticEvent, DiagnosticSink, TracingSink};
pub use error::{CoreError, ValidationError};
pub use message::{Message, MessageEditor};
pub use producer::{AssistantStream, GenerateError, Generator, ScriptedGenerator};
pub use record_db::SqliteRecordStore;
pub use store::{MemoryRecordStore, RecordStore, StoreError};
pub use tokens::{TokenSender, TokenStream, token_channel};

// Re-export the shared types so downstream users need only one crate.
pub use hanashi_types::{MessageId, MessagePatch, MessageRecord, Role, Status};
