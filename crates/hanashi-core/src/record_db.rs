//! SQLite persistence for message records.
//!
//! One `messages` table, one row per tree node. The connection sits behind a
//! mutex; statements are short and the engine's write traffic is already
//! serialized per message by the scheduler, so contention is minimal.

use std::path::Path;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};

use hanashi_types::{MessageId, MessagePatch, MessageRecord, Role, Status};

use crate::store::{RecordStore, StoreError};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    role TEXT NOT NULL,
    content TEXT,
    parent_id TEXT REFERENCES messages(id),
    status TEXT,
    external_id TEXT,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_messages_parent ON messages(parent_id);
"#;

const SELECT_COLUMNS: &str = "id, role, content, parent_id, status, external_id, created_at";

/// Message store backed by SQLite.
pub struct SqliteRecordStore {
    conn: Mutex<Connection>,
}

// =============================================================================
// Row mapping
// =============================================================================

/// Maps a row from the messages table before typed conversion.
struct MessageRow {
    id: String,
    role: String,
    content: Option<String>,
    parent_id: Option<String>,
    status: Option<String>,
    external_id: Option<String>,
    created_at: i64,
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        role: row.get(1)?,
        content: row.get(2)?,
        parent_id: row.get(3)?,
        status: row.get(4)?,
        external_id: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn row_to_record(row: MessageRow) -> Result<MessageRecord, StoreError> {
    let id = MessageId::parse(&row.id)
        .map_err(|e| StoreError::Backend(format!("corrupt id '{}': {}", row.id, e)))?;
    let role = Role::from_str(&row.role)
        .ok_or_else(|| StoreError::Backend(format!("corrupt role '{}'", row.role)))?;
    let parent_id = row
        .parent_id
        .map(|p| {
            MessageId::parse(&p)
                .map_err(|e| StoreError::Backend(format!("corrupt parent id '{}': {}", p, e)))
        })
        .transpose()?;
    let status = row
        .status
        .map(|s| {
            Status::from_str(&s)
                .ok_or_else(|| StoreError::Backend(format!("corrupt status '{}'", s)))
        })
        .transpose()?;

    Ok(MessageRecord {
        id,
        role,
        content: row.content,
        parent_id,
        status,
        external_id: row.external_id,
        created_at: row.created_at as u64,
    })
}

fn sql_err(err: rusqlite::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

impl SqliteRecordStore {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(sql_err)?;
        Self::with_connection(conn)
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(sql_err)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;").map_err(sql_err)?;
        conn.execute_batch(SCHEMA).map_err(sql_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn fetch(conn: &Connection, id: MessageId) -> Result<Option<MessageRecord>, StoreError> {
        let row = conn
            .query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM messages WHERE id = ?1"),
                params![id.to_string()],
                read_row,
            )
            .optional()
            .map_err(sql_err)?;
        row.map(row_to_record).transpose()
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn create(&self, record: MessageRecord) -> Result<MessageRecord, StoreError> {
        let conn = self.conn.lock();
        if Self::fetch(&conn, record.id)?.is_some() {
            return Err(StoreError::Duplicate(record.id));
        }
        conn.execute(
            "INSERT INTO messages (id, role, content, parent_id, status, external_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.id.to_string(),
                record.role.as_str(),
                record.content,
                record.parent_id.map(|p| p.to_string()),
                record.status.map(|s| s.as_str()),
                record.external_id,
                record.created_at as i64,
            ],
        )
        .map_err(sql_err)?;
        Ok(record)
    }

    async fn find_by_id(&self, id: MessageId) -> Result<Option<MessageRecord>, StoreError> {
        let conn = self.conn.lock();
        Self::fetch(&conn, id)
    }

    async fn update(
        &self,
        id: MessageId,
        patch: MessagePatch,
    ) -> Result<MessageRecord, StoreError> {
        let conn = self.conn.lock();
        let tx = conn.unchecked_transaction().map_err(sql_err)?;

        let mut record = Self::fetch(&tx, id)?.ok_or(StoreError::NotFound(id))?;
        patch.apply_to(&mut record);

        tx.execute(
            "UPDATE messages SET content = ?1, parent_id = ?2, status = ?3, external_id = ?4
             WHERE id = ?5",
            params![
                record.content,
                record.parent_id.map(|p| p.to_string()),
                record.status.map(|s| s.as_str()),
                record.external_id,
                record.id.to_string(),
            ],
        )
        .map_err(sql_err)?;
        tx.commit().map_err(sql_err)?;
        Ok(record)
    }

    async fn find_by_parent(&self, parent: MessageId) -> Result<Vec<MessageRecord>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM messages WHERE parent_id = ?1
                 ORDER BY created_at ASC, id ASC"
            ))
            .map_err(sql_err)?;
        let rows = stmt
            .query_map(params![parent.to_string()], read_row)
            .map_err(sql_err)?;

        let mut children = Vec::new();
        for row in rows {
            children.push(row_to_record(row.map_err(sql_err)?)?);
        }
        Ok(children)
    }
}
