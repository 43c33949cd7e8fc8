//! Edge Agent
//!
//! Local-first reliability pipeline for an edge camera agent: detection records
//! are written to a durable outbox first and forwarded to a remote collector
//! later, surviving intermittent connectivity.
//!
//! # Guarantees
//!
//! 1. **At-least-once delivery**: a record is marked synced only after the
//!    collector answers with HTTP 200.
//! 2. **Ordered attempts**: the sync engine never skips ahead of a record that
//!    failed to deliver.
//! 3. **Bounded staleness**: remote configuration is cached with a TTL and keeps
//!    its last good value on failure.
//! 4. **Delivered-only retention**: cleanup can only remove synced records.
//!
//! # Module Structure
//!
//! - `storage`: Outbox store (SQLite + in-memory)
//! - `remote`: HTTP transport seam, multipart encoding
//! - `cameras`, `targets`: TTL-cached remote configuration
//! - `sync`: Backoff-governed delivery
//! - `retention`: Delivered-record cleanup
//! - `detect`, `frame`: Detector contract and frame file layout
//! - `scheduler`, `shutdown`: Single cooperative control loop and its stop flag

use anyhow::Result;
use rusqlite::{Connection, OpenFlags};

pub mod cameras;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod remote;
pub mod retention;
pub mod scheduler;
pub mod shutdown;
pub mod storage;
pub mod sync;
pub mod targets;

pub use cameras::{CameraCache, CameraDescriptor, CameraPolicy};
pub use config::AgentConfig;
pub use detect::{DetectOutcome, Detector, SnapshotDetector};
pub use error::{AgentError, AgentResult, FailureClass};
pub use frame::FrameLayout;
pub use remote::{MultipartForm, RemoteTransport, UreqTransport};
pub use retention::RetentionPolicy;
pub use scheduler::{DaySchedule, Scheduler, TickReport};
pub use shutdown::ShutdownFlag;
pub use storage::{
    DetectionRecord, InMemoryOutbox, NewRecord, OutboxCounts, OutboxStore, PurgeFilter,
    SqliteOutbox,
};
pub use sync::{Backoff, SyncEngine, SyncReport, SyncSettings};
pub use targets::{parse_targets, TargetCache};

pub(crate) fn open_db_connection(db_path: &str) -> Result<Connection> {
    if db_path.starts_with("file:") {
        return Ok(Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?);
    }
    Ok(Connection::open(db_path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rand::RngCore;

    fn shared_memory_uri() -> String {
        let mut bytes = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut bytes);
        format!(
            "file:edge_agent_{:x}?mode=memory&cache=shared",
            u64::from_le_bytes(bytes)
        )
    }

    #[test]
    fn shared_memory_outbox_is_visible_across_handles() -> Result<()> {
        let uri = shared_memory_uri();
        let mut writer = SqliteOutbox::open(&uri)?;
        let reader = SqliteOutbox::open(&uri)?;
        let id = writer.append(&NewRecord {
            created_at: Utc::now(),
            camera_id: "cam-1".to_string(),
            count: 3,
            meta: "{}".to_string(),
            frame_raw_path: None,
            frame_annotated_path: None,
        })?;
        assert_eq!(reader.get(id)?.map(|r| r.count), Some(3));
        Ok(())
    }
}
