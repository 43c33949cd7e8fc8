use anyhow::Result;
use chrono::{DateTime, Duration, Utc};

use crate::storage::{OutboxStore, PurgeFilter};

/// Deletes delivered records older than `days`.
///
/// Unsynced records are never touched regardless of age.
#[derive(Clone, Copy, Debug)]
pub struct RetentionPolicy {
    pub days: u32,
    /// Also remove the frame files referenced by purged records.
    pub delete_frames: bool,
}

impl RetentionPolicy {
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::days(i64::from(self.days))
    }

    pub fn sweep(&self, store: &mut dyn OutboxStore, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = self.cutoff(now);
        let removed = store.purge(&PurgeFilter {
            created_before: cutoff,
            delete_frames: self.delete_frames,
        })?;
        if removed > 0 {
            log::warn!(
                "cleanup: removed {} synced records older than {}",
                removed,
                cutoff.to_rfc3339()
            );
        }
        Ok(removed)
    }
}
