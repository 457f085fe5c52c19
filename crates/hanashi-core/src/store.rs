//! Record storage for messages.
//!
//! The engine consumes storage through the [`RecordStore`] trait — an
//! explicit dependency handed to [`Conversation`](crate::Conversation), never
//! an ambient singleton. Stores operate on whole [`MessageRecord`]s and
//! partial [`MessagePatch`]es; they have no knowledge of channels, scopes,
//! or debounce policy.
//!
//! A store must provide per-key read-your-writes consistency within a single
//! process, and last-write-wins per key. Both implementations here satisfy
//! that: [`MemoryRecordStore`] trivially, the SQLite store in
//! [`record_db`](crate::record_db) through a single connection.

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

use hanashi_types::{MessageId, MessagePatch, MessageRecord};

/// Errors from record storage.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No record with the given id.
    #[error("record not found: {0}")]
    NotFound(MessageId),

    /// A record with the given id already exists.
    #[error("record already exists: {0}")]
    Duplicate(MessageId),

    /// The backing store failed.
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Durable keyed storage of message records.
///
/// All methods take `&self` to support stores with internal locking.
#[async_trait]
pub trait RecordStore: Send + Sync + 'static {
    /// Persist a new record. Fails with [`StoreError::Duplicate`] if the id
    /// is already taken.
    async fn create(&self, record: MessageRecord) -> Result<MessageRecord, StoreError>;

    /// Fetch a record by id, or `None` if absent.
    async fn find_by_id(&self, id: MessageId) -> Result<Option<MessageRecord>, StoreError>;

    /// Apply a partial update and return the updated record.
    async fn update(&self, id: MessageId, patch: MessagePatch)
    -> Result<MessageRecord, StoreError>;

    /// All direct children of a message, in creation order.
    async fn find_by_parent(&self, parent: MessageId) -> Result<Vec<MessageRecord>, StoreError>;
}

/// An in-memory store backed by a DashMap.
///
/// Useful for testing and as a reference implementation.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: DashMap<MessageId, MessageRecord>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn create(&self, record: MessageRecord) -> Result<MessageRecord, StoreError> {
        if self.records.contains_key(&record.id) {
            return Err(StoreError::Duplicate(record.id));
        }
        self.records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_by_id(&self, id: MessageId) -> Result<Option<MessageRecord>, StoreError> {
        Ok(self.records.get(&id).map(|r| r.value().clone()))
    }

    async fn update(
        &self,
        id: MessageId,
        patch: MessagePatch,
    ) -> Result<MessageRecord, StoreError> {
        let mut entry = self.records.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        patch.apply_to(entry.value_mut());
        Ok(entry.value().clone())
    }

    async fn find_by_parent(&self, parent: MessageId) -> Result<Vec<MessageRecord>, StoreError> {
        let mut children: Vec<MessageRecord> = self
            .records
            .iter()
            .filter(|r| r.value().parent_id == Some(parent))
            .map(|r| r.value().clone())
            .collect();
        // MessageIds are UUIDv7, so id order is creation order.
        children.sort_by_key(|r| r.id);
        Ok(children)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hanashi_types::Status;

    #[tokio::test]
    async fn test_create_and_find() {
        let store = MemoryRecordStore::new();
        let rec = MessageRecord::system("hello");
        let id = rec.id;

        store.create(rec.clone()).await.unwrap();
        let found = store.find_by_id(id).await.unwrap();
        assert_eq!(found, Some(rec));
    }

    #[tokio::test]
    async fn test_find_missing_is_none() {
        let store = MemoryRecordStore::new();
        assert_eq!(store.find_by_id(MessageId::new()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_duplicate_create_fails() {
        let store = MemoryRecordStore::new();
        let rec = MessageRecord::system("hello");
        store.create(rec.clone()).await.unwrap();

        let err = store.create(rec).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_update_applies_patch() {
        let store = MemoryRecordStore::new();
        let rec = MessageRecord::assistant(MessageId::new());
        let id = rec.id;
        store.create(rec).await.unwrap();

        let updated = store
            .update(
                id,
                MessagePatch {
                    content: Some("0123".into()),
                    status: Some(Status::Generating),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.content.as_deref(), Some("0123"));
        assert_eq!(updated.status, Some(Status::Generating));
        // read-your-writes
        let found = store.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(found, updated);
    }

    #[tokio::test]
    async fn test_update_missing_fails() {
        let store = MemoryRecordStore::new();
        let err = store
            .update(MessageId::new(), MessagePatch::content("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_later_write_wins() {
        let store = MemoryRecordStore::new();
        let rec = MessageRecord::assistant(MessageId::new());
        let id = rec.id;
        store.create(rec).await.unwrap();

        store.update(id, MessagePatch::content("01234")).await.unwrap();
        store
            .update(id, MessagePatch::content("0123456789"))
            .await
            .unwrap();

        let found = store.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(found.content.as_deref(), Some("0123456789"));
    }

    #[tokio::test]
    async fn test_children_in_creation_order() {
        let store = MemoryRecordStore::new();
        let root = MessageRecord::system("root");
        let root_id = root.id;
        store.create(root).await.unwrap();

        let first = store
            .create(MessageRecord::user(root_id, "first"))
            .await
            .unwrap();
        let second = store
            .create(MessageRecord::user(root_id, "second"))
            .await
            .unwrap();

        let children = store.find_by_parent(root_id).await.unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].id, first.id);
        assert_eq!(children[1].id, second.id);

        // A leaf has no children.
        assert!(store.find_by_parent(first.id).await.unwrap().is_empty());
    }
}
