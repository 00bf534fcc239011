use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task;
use tracing::{debug, error, info};

use super::record::{sort_by_capture_time, CaptureMeta, CaptureRecord, RecordId};
use crate::error::StoreError;

/// Columns in the order `read_record` expects them
const RECORD_COLUMNS: &str =
    "id, owner_id, payload, file_name, created_at_ms, uploaded, meta_json";

/// `uploaded` is stored as an indexed integer, never exposed as such
const PENDING: i64 = 0;
const UPLOADED: i64 = 1;

/// The CaptureStore manages the SQLite database of queued captures.
/// It survives restarts and is the only shared mutable state of the queue.
///
/// If the database cannot be opened the store degrades to an unavailable
/// mode where every operation fails with `StoreError::Unavailable`.
#[derive(Clone)]
pub struct CaptureStore {
    conn: Option<Arc<Mutex<Connection>>>,
    db_path: Option<PathBuf>,
}

impl CaptureStore {
    /// Open (or create) the store at `db_path`.
    ///
    /// Initialization failure is logged once and yields a degraded store
    /// instead of an error, so capture keeps working online.
    pub fn open(db_path: impl AsRef<Path>) -> Self {
        match Self::try_open(db_path.as_ref()) {
            Ok(store) => store,
            Err(e) => {
                error!(
                    path = %db_path.as_ref().display(),
                    "Failed to initialize offline storage, offline capture is disabled: {e}"
                );
                Self::unavailable()
            }
        }
    }

    /// Open the store, reporting initialization errors to the caller
    pub fn try_open(db_path: &Path) -> Result<Self, StoreError> {
        // Ensure the parent directory exists
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;

        init_schema(&conn)?;
        info!(path = %db_path.display(), "Offline storage initialized");

        Ok(Self {
            conn: Some(Arc::new(Mutex::new(conn))),
            db_path: Some(db_path.to_path_buf()),
        })
    }

    /// A store that failed to initialize
    pub fn unavailable() -> Self {
        Self {
            conn: None,
            db_path: None,
        }
    }

    pub fn is_available(&self) -> bool {
        self.conn.is_some()
    }

    /// Get the path to the database file
    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Insert a new capture. Fails if the id already exists.
    pub async fn put(&self, record: &CaptureRecord) -> Result<(), StoreError> {
        let meta_json = serde_json::to_string(&record.meta)?;
        let id = record.id.clone();
        let owner_id = record.owner_id.clone();
        let payload = record.payload.clone();
        let file_name = record.file_name.clone();
        let created_at_ms = record.created_at_ms;
        let uploaded = if record.uploaded { UPLOADED } else { PENDING };

        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO captures (id, owner_id, payload, file_name, created_at_ms, uploaded, meta_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    id.as_str(),
                    owner_id,
                    payload,
                    file_name,
                    created_at_ms,
                    uploaded,
                    meta_json
                ],
            )?;
            debug!(record_id = %id, "Stored capture");
            Ok(())
        })
        .await
    }

    /// Get a capture by id, `None` if absent
    pub async fn get(&self, id: &RecordId) -> Result<Option<CaptureRecord>, StoreError> {
        let id = id.clone();
        self.with_conn(move |conn| {
            let raw = conn
                .query_row(
                    &format!("SELECT {RECORD_COLUMNS} FROM captures WHERE id = ?1"),
                    params![id.as_str()],
                    read_record,
                )
                .optional()?;
            raw.map(RawRecord::into_record).transpose()
        })
        .await
    }

    /// All captures for an owner, any status, oldest first
    pub async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<CaptureRecord>, StoreError> {
        let owner_id = owner_id.to_string();
        self.with_conn(move |conn| {
            query_records(
                conn,
                &format!("SELECT {RECORD_COLUMNS} FROM captures WHERE owner_id = ?1"),
                params![owner_id],
            )
        })
        .await
    }

    /// All captures that still need to be uploaded, oldest first
    pub async fn list_pending(&self) -> Result<Vec<CaptureRecord>, StoreError> {
        self.with_conn(|conn| {
            query_records(
                conn,
                &format!("SELECT {RECORD_COLUMNS} FROM captures WHERE uploaded = ?1"),
                params![PENDING],
            )
        })
        .await
    }

    /// Every capture in the store, oldest first
    pub async fn list_all(&self) -> Result<Vec<CaptureRecord>, StoreError> {
        self.with_conn(|conn| {
            query_records(conn, &format!("SELECT {RECORD_COLUMNS} FROM captures"), [])
        })
        .await
    }

    /// Flip a capture to uploaded. Marking an uploaded capture again is a no-op.
    pub async fn mark_uploaded(&self, id: &RecordId) -> Result<(), StoreError> {
        let id = id.clone();
        self.with_conn(move |conn| {
            // sqlite counts matched rows, so an already uploaded row still reports 1
            let changed = conn.execute(
                "UPDATE captures SET uploaded = ?1 WHERE id = ?2",
                params![UPLOADED, id.as_str()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(id));
            }
            Ok(())
        })
        .await
    }

    /// Permanently delete a capture. Removing a missing id succeeds.
    pub async fn remove(&self, id: &RecordId) -> Result<(), StoreError> {
        let id = id.clone();
        self.with_conn(move |conn| {
            let removed = conn.execute("DELETE FROM captures WHERE id = ?1", params![id.as_str()])?;
            debug!(record_id = %id, removed, "Removed capture");
            Ok(())
        })
        .await
    }

    /// Count pending captures without loading them
    pub async fn count_pending(&self) -> Result<usize, StoreError> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM captures WHERE uploaded = ?1",
                params![PENDING],
                |row| row.get(0),
            )?;
            Ok(count.max(0) as usize)
        })
        .await
    }

    /// Run a closure against the connection on the blocking pool
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = self.conn.clone().ok_or(StoreError::Unavailable)?;
        task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|_| StoreError::Poisoned)?;
            f(&conn)
        })
        .await?
    }
}

/// Create the table and indexes if they don't exist.
fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    // Create captures table
    // payload holds the image bytes, meta_json the capture context
    conn.execute(
        "CREATE TABLE IF NOT EXISTS captures (
            id              TEXT PRIMARY KEY NOT NULL,
            owner_id        TEXT NOT NULL,
            payload         BLOB NOT NULL,
            file_name       TEXT NOT NULL,
            created_at_ms   INTEGER NOT NULL,
            uploaded        INTEGER NOT NULL DEFAULT 0,
            meta_json       TEXT NOT NULL DEFAULT '{}'
        )",
        [],
    )?;

    // Indexes for listing by owner, draining the queue and display order
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_captures_owner_id
         ON captures(owner_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_captures_uploaded
         ON captures(uploaded)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_captures_created_at
         ON captures(created_at_ms)",
        [],
    )?;

    Ok(())
}

/// Row as read from sqlite, before the metadata json is decoded
struct RawRecord {
    id: String,
    owner_id: String,
    payload: Vec<u8>,
    file_name: String,
    created_at_ms: i64,
    uploaded: i64,
    meta_json: String,
}

impl RawRecord {
    fn into_record(self) -> Result<CaptureRecord, StoreError> {
        let meta: CaptureMeta = serde_json::from_str(&self.meta_json)?;
        Ok(CaptureRecord {
            id: RecordId::from(self.id),
            owner_id: self.owner_id,
            payload: self.payload,
            file_name: self.file_name,
            preview: None,
            created_at_ms: self.created_at_ms,
            uploaded: self.uploaded != PENDING,
            meta,
        })
    }
}

fn read_record(row: &Row<'_>) -> rusqlite::Result<RawRecord> {
    Ok(RawRecord {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        payload: row.get(2)?,
        file_name: row.get(3)?,
        created_at_ms: row.get(4)?,
        uploaded: row.get(5)?,
        meta_json: row.get(6)?,
    })
}

fn query_records<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Vec<CaptureRecord>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, read_record)?;

    let mut records = Vec::new();
    for raw in rows {
        records.push(raw?.into_record()?);
    }

    sort_by_capture_time(&mut records);
    Ok(records)
}

// Implement Debug for better error messages
impl std::fmt::Debug for CaptureStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureStore")
            .field("db_path", &self.db_path)
            .field("available", &self.is_available())
            .finish()
    }
}
