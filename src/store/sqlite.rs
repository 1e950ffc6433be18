//! Append-only capture log backed by SQLite
//!
//! A single `log` table holds every capture ever taken. Rows are only ever
//! inserted; there is no update or delete path.

use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::schema::{LogEntry, LogKind, RevisionSummary};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS log (
    kind TEXT,
    content BLOB,
    revision TEXT,
    created_at INTEGER
);
CREATE INDEX IF NOT EXISTS log_kind_created_at ON log (kind, created_at);
";

/// How long a connection waits on a locked database before giving up
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to create database directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to open log database {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },
    #[error("no {kind} capture at {created_at}")]
    NotFound { kind: LogKind, created_at: i64 },
    #[error("log database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("log database task failed: {0}")]
    Task(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Long-lived handle on the capture database, shared by the collector and
/// the retrieval handlers
pub struct LogStore {
    conn: Mutex<Connection>,
}

impl LogStore {
    /// Open (or create) the database file at `path`
    ///
    /// Failing to open the file is fatal. Failing to create the schema is
    /// only logged: an existing schema keeps the read paths usable.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(path).map_err(|source| StoreError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Opened log database: {}", path.display());

        Ok(Self::with_connection(conn))
    }

    /// Throwaway store for tests and dry runs
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|source| StoreError::Open {
            path: PathBuf::from(":memory:"),
            source,
        })?;
        Ok(Self::with_connection(conn))
    }

    fn with_connection(conn: Connection) -> Self {
        if let Err(e) = conn.busy_timeout(BUSY_TIMEOUT) {
            warn!("Failed to set busy timeout: {}", e);
        }
        if let Err(e) = conn.execute_batch(SCHEMA) {
            warn!("Failed to initialize log schema: {}", e);
        }

        Self {
            conn: Mutex::new(conn),
        }
    }

    /// Run `op` against `store` on the blocking thread pool
    ///
    /// Queries hold the connection lock for their whole duration, so async
    /// callers go through here instead of touching the store directly.
    pub async fn blocking<T, F>(store: &Arc<LogStore>, op: F) -> Result<T, StoreError>
    where
        F: FnOnce(&LogStore) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(store);
        tokio::task::spawn_blocking(move || op(&store))
            .await
            .map_err(|err| StoreError::Task(err.to_string()))?
    }

    /// Every statement is a single implicit transaction, so a panic while the
    /// lock was held cannot leave the connection half-written.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append one capture. Duplicate `(kind, created_at)` pairs are accepted.
    pub fn insert(
        &self,
        kind: &LogKind,
        content: &[u8],
        revision: &str,
        created_at: i64,
    ) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT INTO log (kind, content, revision, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![kind.as_str(), content, revision, created_at],
        )?;
        debug!(
            "Stored {} capture ({} bytes, revision {:?}, created_at {})",
            kind,
            content.len(),
            revision,
            created_at
        );
        Ok(())
    }

    pub fn insert_entry(&self, entry: &LogEntry) -> Result<(), StoreError> {
        self.insert(&entry.kind, &entry.content, &entry.revision, entry.created_at)
    }

    /// Distinct revision/timestamp pairs, most recent capture first
    pub fn list_revisions(&self) -> Result<Vec<RevisionSummary>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT revision, created_at FROM log
             GROUP BY revision, created_at
             ORDER BY created_at DESC, revision ASC",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(RevisionSummary {
                revision: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
                created_at: row.get(1)?,
            })
        })?;

        let mut revisions = Vec::new();
        for row in rows {
            revisions.push(row?);
        }
        Ok(revisions)
    }

    /// Content of the first capture of `kind` taken at `created_at`
    pub fn get_content(&self, kind: &LogKind, created_at: i64) -> Result<Vec<u8>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT content FROM log WHERE kind = ?1 AND created_at = ?2 ORDER BY rowid LIMIT 1",
        )?;

        let content = stmt
            .query_row(params![kind.as_str(), created_at], |row| {
                // TEXT payloads come back as their UTF-8 bytes
                match row.get_ref(0)? {
                    ValueRef::Blob(bytes) | ValueRef::Text(bytes) => Ok(bytes.to_vec()),
                    ValueRef::Null => Ok(Vec::new()),
                    other => Err(rusqlite::Error::InvalidColumnType(
                        0,
                        "content".to_string(),
                        other.data_type(),
                    )),
                }
            })
            .optional()?;

        content.ok_or_else(|| StoreError::NotFound {
            kind: kind.clone(),
            created_at,
        })
    }

    /// Total number of stored captures
    pub fn count(&self) -> Result<usize, StoreError> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM log", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Every stored capture in insertion order
    pub fn entries(&self) -> Result<Vec<LogEntry>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT kind, content, revision, created_at FROM log ORDER BY rowid",
        )?;

        let rows = stmt.query_map([], |row| {
            let content = match row.get_ref(1)? {
                ValueRef::Blob(bytes) | ValueRef::Text(bytes) => bytes.to_vec(),
                _ => Vec::new(),
            };
            Ok(LogEntry {
                kind: LogKind::new(row.get::<_, Option<String>>(0)?.unwrap_or_default()),
                content,
                revision: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                created_at: row.get(3)?,
            })
        })?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_empty_store_lists_nothing() {
        let store = LogStore::open_in_memory().unwrap();
        assert!(store.list_revisions().unwrap().is_empty());
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_content_round_trip_is_byte_exact() {
        let store = LogStore::open_in_memory().unwrap();
        let content = b"\x00\xffquery\ttime\r\n\xe2\x82\xac".to_vec();
        store
            .insert(&LogKind::digest(), &content, "abc123", 1000)
            .unwrap();

        let fetched = store.get_content(&LogKind::digest(), 1000).unwrap();
        assert_eq!(fetched, content);
    }

    #[test]
    fn test_missing_content_is_not_found() {
        let store = LogStore::open_in_memory().unwrap();
        store
            .insert(&LogKind::digest(), b"{}", "abc123", 1000)
            .unwrap();

        let err = store.get_content(&LogKind::access_log(), 1000).unwrap_err();
        assert!(err.is_not_found());
        let err = store.get_content(&LogKind::digest(), 999).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_duplicates_are_accepted_and_first_wins() {
        let store = LogStore::open_in_memory().unwrap();
        store.insert(&LogKind::digest(), b"first", "r1", 1000).unwrap();
        store.insert(&LogKind::digest(), b"second", "r1", 1000).unwrap();

        assert_eq!(store.count().unwrap(), 2);
        assert_eq!(store.get_content(&LogKind::digest(), 1000).unwrap(), b"first");
        assert_eq!(store.list_revisions().unwrap().len(), 1);
    }

    #[test]
    fn test_list_revisions_newest_first_and_distinct() {
        let store = LogStore::open_in_memory().unwrap();
        store.insert(&LogKind::digest(), b"a", "rev1", 1000).unwrap();
        store.insert(&LogKind::access_log(), b"b", "rev1", 1000).unwrap();
        store.insert(&LogKind::digest(), b"c", "rev3", 3000).unwrap();
        store.insert(&LogKind::digest(), b"d", "rev2", 2000).unwrap();

        let revisions = store.list_revisions().unwrap();
        let pairs: Vec<(&str, i64)> = revisions
            .iter()
            .map(|r| (r.revision.as_str(), r.created_at))
            .collect();
        assert_eq!(pairs, vec![("rev3", 3000), ("rev2", 2000), ("rev1", 1000)]);
    }

    #[test]
    fn test_store_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("captures.db");

        {
            let store = LogStore::open(&path).unwrap();
            store.insert(&LogKind::access_log(), b"uri,count", "abc", 42).unwrap();
        }

        // Schema creation must be a no-op the second time round
        let store = LogStore::open(&path).unwrap();
        assert_eq!(store.get_content(&LogKind::access_log(), 42).unwrap(), b"uri,count");
        assert_eq!(
            store.list_revisions().unwrap(),
            vec![RevisionSummary {
                revision: "abc".to_string(),
                created_at: 42
            }]
        );
    }

    #[test]
    fn test_reads_text_payloads() {
        let store = LogStore::open_in_memory().unwrap();
        store
            .conn()
            .execute(
                "INSERT INTO log (kind, content, revision, created_at)
                 VALUES ('digest', 'as text', NULL, 7)",
                [],
            )
            .unwrap();

        assert_eq!(store.get_content(&LogKind::digest(), 7).unwrap(), b"as text");
        assert_eq!(store.list_revisions().unwrap()[0].revision, "");
    }

    #[test]
    fn test_schema_failure_keeps_store_readable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("captures.db");
        {
            // A view named `log` satisfies CREATE TABLE IF NOT EXISTS but
            // cannot be indexed
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE captures (kind TEXT, content BLOB, revision TEXT, created_at INTEGER);
                 INSERT INTO captures VALUES ('digest', x'7b7d', 'abc', 10);
                 CREATE VIEW log AS SELECT * FROM captures;",
            )
            .unwrap();
        }

        let store = LogStore::open(&path).unwrap();
        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(
            store.list_revisions().unwrap(),
            vec![RevisionSummary {
                revision: "abc".to_string(),
                created_at: 10
            }]
        );
    }

    #[tokio::test]
    async fn test_blocking_runs_off_the_calling_thread() {
        let store = Arc::new(LogStore::open_in_memory().unwrap());
        store.insert(&LogKind::digest(), b"{}", "r", 1).unwrap();

        let caller = std::thread::current().id();
        let (thread, content) = LogStore::blocking(&store, |store| {
            Ok((
                std::thread::current().id(),
                store.get_content(&LogKind::digest(), 1)?,
            ))
        })
        .await
        .unwrap();

        assert_ne!(thread, caller);
        assert_eq!(content, b"{}");
    }

    #[tokio::test]
    async fn test_blocking_panic_is_a_task_error() {
        let store = Arc::new(LogStore::open_in_memory().unwrap());
        let err = LogStore::blocking(&store, |_| -> Result<(), StoreError> {
            panic!("query blew up")
        })
        .await
        .unwrap_err();
        assert!(matches!(err, StoreError::Task(_)));
    }

    #[test]
    fn test_entries_in_insertion_order() {
        let store = LogStore::open_in_memory().unwrap();
        let entry = LogEntry {
            kind: LogKind::new("custom"),
            content: b"payload".to_vec(),
            revision: "r".to_string(),
            created_at: 5,
        };
        store.insert_entry(&entry).unwrap();
        store.insert(&LogKind::digest(), b"x", "r", 6).unwrap();

        let entries = store.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], entry);
        assert_eq!(entries[1].kind, LogKind::digest());
    }
}
