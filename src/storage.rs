use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::open_db_connection;

/// A detection result persisted in the outbox.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DetectionRecord {
    /// Assigned at insertion, strictly increasing. Defines FIFO order.
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub camera_id: String,
    pub count: u32,
    /// Serialized detector metadata. Never interpreted here.
    pub meta: String,
    pub frame_raw_path: Option<PathBuf>,
    /// Present only when the detector produced detections.
    pub frame_annotated_path: Option<PathBuf>,
    pub synced: bool,
}

/// Insert form of a record; id and synced flag are owned by the store.
#[derive(Clone, Debug)]
pub struct NewRecord {
    pub created_at: DateTime<Utc>,
    pub camera_id: String,
    pub count: u32,
    pub meta: String,
    pub frame_raw_path: Option<PathBuf>,
    pub frame_annotated_path: Option<PathBuf>,
}

/// Selects delivered records older than a cutoff.
///
/// Only `synced = true` rows can ever match.
#[derive(Clone, Copy, Debug)]
pub struct PurgeFilter {
    pub created_before: DateTime<Utc>,
    pub delete_frames: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OutboxCounts {
    pub pending: u64,
    pub synced: u64,
}

/// Durable local queue of detection records.
///
/// Every call is independently atomic; nothing spans several records
/// transactionally.
pub trait OutboxStore {
    fn append(&mut self, record: &NewRecord) -> Result<i64>;

    /// Oldest unsynced records first, ascending id.
    fn dequeue_unsynced(&self, limit: usize) -> Result<Vec<DetectionRecord>>;

    /// Returns false when no record with that id exists.
    fn mark_synced(&mut self, id: i64) -> Result<bool>;

    /// Deletes matching records (and their frames, when asked) and returns
    /// the number of records removed.
    fn purge(&mut self, filter: &PurgeFilter) -> Result<usize>;

    fn get(&self, id: i64) -> Result<Option<DetectionRecord>>;

    fn counts(&self) -> Result<OutboxCounts>;
}

/// Removes a frame file, ignoring a missing file. Returns true if something
/// was deleted.
pub fn remove_file_best_effort(path: &Path) -> bool {
    if path.as_os_str().is_empty() {
        return false;
    }
    match std::fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => {
            log::debug!("could not remove frame {}: {}", path.display(), e);
            false
        }
    }
}

fn remove_frames(raw: Option<&Path>, annotated: Option<&Path>) {
    for path in [raw, annotated].into_iter().flatten() {
        remove_file_best_effort(path);
    }
}

/// Adds nullable columns that older databases may lack.
pub(crate) fn ensure_columns(conn: &Connection, table: &str, columns: &[(&str, &str)]) -> Result<()> {
    let existing = {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        names
    };
    for (name, ty) in columns {
        if existing.iter().any(|c| c == name) {
            continue;
        }
        conn.execute_batch(&format!("ALTER TABLE {} ADD COLUMN {} {};", table, name, ty))?;
        log::info!("outbox schema: added column {}.{}", table, name);
    }
    Ok(())
}

fn to_epoch(ts: DateTime<Utc>) -> i64 {
    ts.timestamp()
}

fn from_epoch(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .ok_or_else(|| anyhow!("corrupt outbox: created_at {} out of range", secs))
}

fn path_to_sql(path: &Option<PathBuf>) -> Option<String> {
    path.as_ref().map(|p| p.to_string_lossy().into_owned())
}

fn path_from_sql(value: Option<String>) -> Option<PathBuf> {
    value.filter(|s| !s.is_empty()).map(PathBuf::from)
}

type RecordRow = (
    i64,
    i64,
    String,
    i64,
    Option<String>,
    Option<String>,
    Option<String>,
    bool,
);

const RECORD_COLUMNS: &str =
    "id, created_at, camera_id, count, meta_json, frame_raw_path, frame_annotated_path, synced";

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RecordRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get::<_, i64>(7)? != 0,
    ))
}

fn record_from_row(row: RecordRow) -> Result<DetectionRecord> {
    let (id, created_at, camera_id, count, meta, raw, annotated, synced) = row;
    let count =
        u32::try_from(count).map_err(|_| anyhow!("corrupt outbox: record {} count {}", id, count))?;
    Ok(DetectionRecord {
        id,
        created_at: from_epoch(created_at)?,
        camera_id,
        count,
        meta: meta.unwrap_or_default(),
        frame_raw_path: path_from_sql(raw),
        frame_annotated_path: path_from_sql(annotated),
        synced,
    })
}

pub struct SqliteOutbox {
    conn: Connection,
}

impl SqliteOutbox {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = open_db_connection(db_path)?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS detection_records (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              created_at INTEGER NOT NULL,
              camera_id TEXT NOT NULL,
              count INTEGER NOT NULL,
              meta_json TEXT,
              frame_raw_path TEXT,
              frame_annotated_path TEXT,
              synced INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )?;
        ensure_columns(
            &self.conn,
            "detection_records",
            &[
                ("meta_json", "TEXT"),
                ("frame_raw_path", "TEXT"),
                ("frame_annotated_path", "TEXT"),
            ],
        )?;
        self.conn.execute_batch(
            r#"
            CREATE INDEX IF NOT EXISTS idx_records_synced ON detection_records(synced);
            CREATE INDEX IF NOT EXISTS idx_records_created ON detection_records(created_at);
            "#,
        )?;
        Ok(())
    }
}

impl OutboxStore for SqliteOutbox {
    fn append(&mut self, record: &NewRecord) -> Result<i64> {
        self.conn.execute(
            r#"
            INSERT INTO detection_records(created_at, camera_id, count, meta_json, frame_raw_path, frame_annotated_path, synced)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)
            "#,
            params![
                to_epoch(record.created_at),
                record.camera_id,
                i64::from(record.count),
                record.meta,
                path_to_sql(&record.frame_raw_path),
                path_to_sql(&record.frame_annotated_path),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn dequeue_unsynced(&self, limit: usize) -> Result<Vec<DetectionRecord>> {
        let rows = {
            let mut stmt = self.conn.prepare(&format!(
                "SELECT {} FROM detection_records WHERE synced = 0 ORDER BY id ASC LIMIT ?1",
                RECORD_COLUMNS
            ))?;
            let limit = i64::try_from(limit).unwrap_or(i64::MAX);
            let rows = stmt
                .query_map(params![limit], read_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };
        rows.into_iter().map(record_from_row).collect()
    }

    fn mark_synced(&mut self, id: i64) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE detection_records SET synced = 1 WHERE id = ?1",
            params![id],
        )?;
        Ok(changed > 0)
    }

    fn purge(&mut self, filter: &PurgeFilter) -> Result<usize> {
        let cutoff = to_epoch(filter.created_before);

        if filter.delete_frames {
            let frames = {
                let mut stmt = self.conn.prepare(
                    "SELECT frame_raw_path, frame_annotated_path FROM detection_records WHERE synced = 1 AND created_at < ?1",
                )?;
                let frames = stmt
                    .query_map(params![cutoff], |row| {
                        Ok((
                            row.get::<_, Option<String>>(0)?,
                            row.get::<_, Option<String>>(1)?,
                        ))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                frames
            };
            for (raw, annotated) in frames {
                remove_frames(
                    path_from_sql(raw).as_deref(),
                    path_from_sql(annotated).as_deref(),
                );
            }
        }

        let deleted = self.conn.execute(
            "DELETE FROM detection_records WHERE synced = 1 AND created_at < ?1",
            params![cutoff],
        )?;
        Ok(deleted)
    }

    fn get(&self, id: i64) -> Result<Option<DetectionRecord>> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM detection_records WHERE id = ?1",
                    RECORD_COLUMNS
                ),
                params![id],
                read_row,
            )
            .optional()?;
        row.map(record_from_row).transpose()
    }

    fn counts(&self) -> Result<OutboxCounts> {
        let (pending, synced): (i64, i64) = self.conn.query_row(
            "SELECT COALESCE(SUM(synced = 0), 0), COALESCE(SUM(synced = 1), 0) FROM detection_records",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(OutboxCounts {
            pending: pending.max(0) as u64,
            synced: synced.max(0) as u64,
        })
    }
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryOutbox {
    records: Vec<DetectionRecord>,
    last_id: i64,
}

impl InMemoryOutbox {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OutboxStore for InMemoryOutbox {
    fn append(&mut self, record: &NewRecord) -> Result<i64> {
        // Ids are never reused, even after purges, same as AUTOINCREMENT.
        self.last_id += 1;
        self.records.push(DetectionRecord {
            id: self.last_id,
            created_at: record.created_at,
            camera_id: record.camera_id.clone(),
            count: record.count,
            meta: record.meta.clone(),
            frame_raw_path: record.frame_raw_path.clone(),
            frame_annotated_path: record.frame_annotated_path.clone(),
            synced: false,
        });
        Ok(self.last_id)
    }

    fn dequeue_unsynced(&self, limit: usize) -> Result<Vec<DetectionRecord>> {
        Ok(self
            .records
            .iter()
            .filter(|r| !r.synced)
            .take(limit)
            .cloned()
            .collect())
    }

    fn mark_synced(&mut self, id: i64) -> Result<bool> {
        match self.records.iter_mut().find(|r| r.id == id) {
            Some(record) => {
                record.synced = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn purge(&mut self, filter: &PurgeFilter) -> Result<usize> {
        let matches = |r: &DetectionRecord| r.synced && r.created_at < filter.created_before;

        if filter.delete_frames {
            for record in self.records.iter().filter(|r| matches(r)) {
                remove_frames(
                    record.frame_raw_path.as_deref(),
                    record.frame_annotated_path.as_deref(),
                );
            }
        }

        let before = self.records.len();
        self.records.retain(|r| !matches(r));
        Ok(before - self.records.len())
    }

    fn get(&self, id: i64) -> Result<Option<DetectionRecord>> {
        Ok(self.records.iter().find(|r| r.id == id).cloned())
    }

    fn counts(&self) -> Result<OutboxCounts> {
        let synced = self.records.iter().filter(|r| r.synced).count() as u64;
        Ok(OutboxCounts {
            pending: self.records.len() as u64 - synced,
            synced,
        })
    }
}
