// Message stores: in-memory and SQLite
//
// Every store serializes its mutations behind a single mutex so that a
// listing never observes a half-applied append or deletion.

use crate::chat::clock::Clock;
use crate::chat::error::StorageError;
use crate::chat::message::Message;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

/// Append-only record of chat messages with time-indexed deletion
pub trait MessageStore: Send + Sync {
    /// Stamp and persist a new message
    fn append(&self, user: &str, text: &str) -> Result<Message, StorageError>;

    /// Snapshot of all retained messages, oldest first
    fn list_ordered(&self) -> Result<Vec<Message>, StorageError>;

    /// Remove every message with `sent_at < cutoff`, returning how many went
    fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, StorageError>;

    /// Remove every message regardless of age
    fn clear_all(&self) -> Result<usize, StorageError>;

    /// Number of retained messages
    fn count(&self) -> Result<usize, StorageError>;
}

/// Assigns non-decreasing, millisecond-precision timestamps
#[derive(Debug, Default)]
struct Stamper {
    last: Option<DateTime<Utc>>,
}

impl Stamper {
    fn seeded(last: Option<DateTime<Utc>>) -> Self {
        Self { last }
    }

    fn next(&mut self, now: DateTime<Utc>) -> DateTime<Utc> {
        let now = truncate_to_millis(now);
        let stamp = match self.last {
            Some(last) if last > now => last,
            _ => now,
        };
        self.last = Some(stamp);
        stamp
    }
}

fn truncate_to_millis(instant: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(instant.timestamp_millis()).unwrap_or(instant)
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, StorageError> {
    mutex.lock().map_err(|_| StorageError::Poisoned)
}

// ========== In-memory store ==========

struct MemoryState {
    messages: Vec<Message>,
    stamper: Stamper,
}

/// Process-local store; contents are lost on restart
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                messages: Vec::new(),
                stamper: Stamper::default(),
            }),
            clock,
        }
    }
}

impl MessageStore for MemoryStore {
    fn append(&self, user: &str, text: &str) -> Result<Message, StorageError> {
        let mut state = lock(&self.state)?;

        let message = Message {
            id: Uuid::new_v4(),
            user: user.to_string(),
            text: text.to_string(),
            sent_at: state.stamper.next(self.clock.now()),
        };

        state.messages.push(message.clone());
        Ok(message)
    }

    fn list_ordered(&self) -> Result<Vec<Message>, StorageError> {
        let state = lock(&self.state)?;
        Ok(state.messages.clone())
    }

    fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, StorageError> {
        let mut state = lock(&self.state)?;
        let before = state.messages.len();
        state.messages.retain(|m| m.sent_at >= cutoff);
        Ok(before - state.messages.len())
    }

    fn clear_all(&self) -> Result<usize, StorageError> {
        let mut state = lock(&self.state)?;
        let removed = state.messages.len();
        state.messages.clear();
        Ok(removed)
    }

    fn count(&self) -> Result<usize, StorageError> {
        Ok(lock(&self.state)?.messages.len())
    }
}

// ========== SQLite store ==========

struct SqliteState {
    conn: Connection,
    stamper: Stamper,
}

/// Durable store backed by a SQLite database
pub struct SqliteStore {
    state: Mutex<SqliteState>,
    clock: Arc<dyn Clock>,
}

impl SqliteStore {
    /// Open (or create) a database file
    pub fn open(path: &Path, clock: Arc<dyn Clock>) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        Self::with_connection(Connection::open(path)?, clock)
    }

    /// Private in-memory database, mostly for tests
    pub fn in_memory(clock: Arc<dyn Clock>) -> Result<Self, StorageError> {
        Self::with_connection(Connection::open_in_memory()?, clock)
    }

    fn with_connection(conn: Connection, clock: Arc<dyn Clock>) -> Result<Self, StorageError> {
        initialize_db(&conn)?;

        let last: Option<i64> =
            conn.query_row("SELECT MAX(sent_at) FROM messages", [], |row| row.get(0))?;
        let stamper = Stamper::seeded(last.and_then(DateTime::from_timestamp_millis));

        Ok(Self {
            state: Mutex::new(SqliteState { conn, stamper }),
            clock,
        })
    }
}

/// Initialize database schema
fn initialize_db(conn: &Connection) -> Result<(), StorageError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS messages (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT UNIQUE NOT NULL,
            user TEXT NOT NULL,
            text TEXT NOT NULL,
            sent_at INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_messages_sent_at ON messages(sent_at)",
        [],
    )?;

    Ok(())
}

impl MessageStore for SqliteStore {
    fn append(&self, user: &str, text: &str) -> Result<Message, StorageError> {
        let mut state = lock(&self.state)?;

        let message = Message {
            id: Uuid::new_v4(),
            user: user.to_string(),
            text: text.to_string(),
            sent_at: state.stamper.next(self.clock.now()),
        };

        state.conn.execute(
            "INSERT INTO messages (id, user, text, sent_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                message.id.to_string(),
                message.user,
                message.text,
                message.sent_at.timestamp_millis(),
            ],
        )?;

        Ok(message)
    }

    fn list_ordered(&self) -> Result<Vec<Message>, StorageError> {
        let state = lock(&self.state)?;

        let mut stmt = state.conn.prepare(
            "SELECT id, user, text, sent_at FROM messages ORDER BY sent_at ASC, seq ASC",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, user, text, sent_at)| {
                let parsed_id = Uuid::parse_str(&id).map_err(|e| StorageError::Corrupt {
                    id: id.clone(),
                    reason: e.to_string(),
                })?;
                let sent_at = DateTime::from_timestamp_millis(sent_at).ok_or_else(|| {
                    StorageError::Corrupt {
                        id: id.clone(),
                        reason: format!("timestamp {} out of range", sent_at),
                    }
                })?;

                Ok(Message {
                    id: parsed_id,
                    user,
                    text,
                    sent_at,
                })
            })
            .collect()
    }

    fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, StorageError> {
        let state = lock(&self.state)?;

        // sent_at is stored in whole milliseconds; round the cutoff up so a
        // sub-millisecond cutoff still removes the message stamped just below it
        let cutoff_millis = truncate_to_millis(cutoff).timestamp_millis()
            + i64::from(cutoff.timestamp_subsec_nanos() % 1_000_000 != 0);

        let removed = state.conn.execute(
            "DELETE FROM messages WHERE sent_at < ?1",
            params![cutoff_millis],
        )?;

        Ok(removed)
    }

    fn clear_all(&self) -> Result<usize, StorageError> {
        let state = lock(&self.state)?;
        Ok(state.conn.execute("DELETE FROM messages", [])?)
    }

    fn count(&self) -> Result<usize, StorageError> {
        let state = lock(&self.state)?;
        let count: i64 = state
            .conn
            .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

/// Memory store whose operations can be made to fail, for exercising
/// storage error paths
#[cfg(test)]
pub(crate) struct FailingStore {
    inner: MemoryStore,
    pub fail_append: std::sync::atomic::AtomicBool,
    pub fail_sweep: std::sync::atomic::AtomicBool,
    pub fail_list: std::sync::atomic::AtomicBool,
    pub fail_clear: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl FailingStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: MemoryStore::new(clock),
            fail_append: Default::default(),
            fail_sweep: Default::default(),
            fail_list: Default::default(),
            fail_clear: Default::default(),
        }
    }

    fn check(flag: &std::sync::atomic::AtomicBool) -> Result<(), StorageError> {
        if flag.load(std::sync::atomic::Ordering::SeqCst) {
            Err(StorageError::Poisoned)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
impl MessageStore for FailingStore {
    fn append(&self, user: &str, text: &str) -> Result<Message, StorageError> {
        Self::check(&self.fail_append)?;
        self.inner.append(user, text)
    }

    fn list_ordered(&self) -> Result<Vec<Message>, StorageError> {
        Self::check(&self.fail_list)?;
        self.inner.list_ordered()
    }

    fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, StorageError> {
        Self::check(&self.fail_sweep)?;
        self.inner.delete_older_than(cutoff)
    }

    fn clear_all(&self) -> Result<usize, StorageError> {
        Self::check(&self.fail_clear)?;
        self.inner.clear_all()
    }

    fn count(&self) -> Result<usize, StorageError> {
        self.inner.count()
    }
}
