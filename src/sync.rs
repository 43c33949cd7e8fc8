use std::time::Duration;

use anyhow::Result;
use chrono::SecondsFormat;
use serde_json::json;

use crate::remote::{MultipartForm, RemoteTransport};
use crate::shutdown::ShutdownFlag;
use crate::storage::{remove_file_best_effort, DetectionRecord, OutboxStore};

/// The only status the collector uses to acknowledge a record.
pub const HTTP_OK: u16 = 200;

/// Delay applied after a failed delivery.
///
/// Doubles on each failure and wraps back to `start` instead of capping once
/// doubling reaches `max`. Any success resets it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Backoff {
    start: Duration,
    max: Duration,
    current: Duration,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackoffStep {
    Grew(Duration),
    Wrapped,
}

impl Backoff {
    pub fn new(start: Duration, max: Duration) -> Self {
        Self {
            start,
            max,
            current: start,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn start(&self) -> Duration {
        self.start
    }

    pub fn reset(&mut self) {
        if self.current != self.start {
            log::info!("backoff: reset to {:?}", self.start);
        }
        self.current = self.start;
    }

    pub fn increase(&mut self) -> BackoffStep {
        let doubled = self.current.checked_mul(2).unwrap_or(Duration::MAX);
        if doubled >= self.max {
            log::warn!("backoff: reached max {:?}; resetting to {:?}", self.max, self.start);
            self.current = self.start;
            BackoffStep::Wrapped
        } else {
            log::warn!("backoff: increased to {:?}", doubled);
            self.current = doubled;
            BackoffStep::Grew(doubled)
        }
    }
}

#[derive(Clone, Debug)]
pub struct SyncSettings {
    pub url: String,
    pub batch_size: usize,
    pub backoff_start: Duration,
    pub backoff_max: Duration,
    /// Delete the raw frame once its record is delivered. Annotated frames stay.
    pub delete_raw_after_sync: bool,
    /// Skip frame attachments for zero-count records.
    pub frames_only_when_detected: bool,
    /// End the backoff wait early when shutdown is requested.
    pub interruptible_backoff: bool,
    /// Upper bound on a single backoff wait.
    pub max_backoff_wait: Option<Duration>,
}

/// Outcome of one sync pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub attempted: usize,
    pub delivered: usize,
    /// Record whose failure aborted the pass.
    pub failed_id: Option<i64>,
    pub waited: Duration,
}

/// Builds the collector payload: `meta` plus optional `frame_raw` and
/// `frame_annotated` attachments. Unreadable frames are left out.
pub fn build_payload(record: &DetectionRecord, frames_only_when_detected: bool) -> MultipartForm {
    let meta = if record.meta.trim().is_empty() {
        json!({
            "timestamp_utc": record.created_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            "camera_id": record.camera_id,
            "people": { "count": record.count },
        })
        .to_string()
    } else {
        record.meta.clone()
    };

    let mut form = MultipartForm::new().text("meta", "application/json", &meta);
    if frames_only_when_detected && record.count == 0 {
        return form;
    }
    for (field, file_name, path) in [
        ("frame_raw", "raw.jpg", record.frame_raw_path.as_deref()),
        (
            "frame_annotated",
            "annotated.jpg",
            record.frame_annotated_path.as_deref(),
        ),
    ] {
        let Some(path) = path else { continue };
        match std::fs::read(path) {
            Ok(bytes) => form = form.file(field, file_name, "image/jpeg", bytes),
            Err(e) => log::warn!(
                "sync: record {} cannot attach {} ({}): {}",
                record.id,
                field,
                path.display(),
                e
            ),
        }
    }
    form
}

/// Batched, strictly ordered delivery of outbox records.
pub struct SyncEngine {
    settings: SyncSettings,
    backoff: Backoff,
    shutdown: ShutdownFlag,
}

impl SyncEngine {
    pub fn new(settings: SyncSettings, shutdown: ShutdownFlag) -> Self {
        let backoff = Backoff::new(settings.backoff_start, settings.backoff_max);
        Self {
            settings,
            backoff,
            shutdown,
        }
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Delivers up to `batch_size` of the oldest unsynced records, in order.
    ///
    /// The first failure waits out the current backoff, grows it, and ends
    /// the pass; that record and everything after it stay unsynced.
    pub fn sync_pass(
        &mut self,
        store: &mut dyn OutboxStore,
        transport: &dyn RemoteTransport,
    ) -> Result<SyncReport> {
        let batch = store.dequeue_unsynced(self.settings.batch_size)?;
        let mut report = SyncReport::default();

        for record in batch {
            report.attempted += 1;
            let form = build_payload(&record, self.settings.frames_only_when_detected);

            let failure = match transport.post_multipart(&self.settings.url, &form) {
                Ok(HTTP_OK) => None,
                Ok(status) => Some(format!("collector returned status {}", status)),
                Err(e) => Some(e.to_string()),
            };

            if let Some(reason) = failure {
                let wait = self.backoff_wait();
                log::error!(
                    "sync: record {} failed ({}); waiting {:?}",
                    record.id,
                    reason,
                    wait
                );
                self.pause(wait);
                self.backoff.increase();
                report.failed_id = Some(record.id);
                report.waited = wait;
                break;
            }

            store.mark_synced(record.id)?;
            report.delivered += 1;
            log::info!("sync: delivered record {} ({})", record.id, record.camera_id);
            self.backoff.reset();

            if self.settings.delete_raw_after_sync {
                if let Some(raw) = &record.frame_raw_path {
                    remove_file_best_effort(raw);
                }
            }
        }

        Ok(report)
    }

    fn backoff_wait(&self) -> Duration {
        let wait = self.backoff.current();
        match self.settings.max_backoff_wait {
            Some(cap) => wait.min(cap),
            None => wait,
        }
    }

    fn pause(&self, wait: Duration) {
        if self.settings.interruptible_backoff {
            if !self.shutdown.wait(wait) {
                log::info!("sync: backoff wait cut short by shutdown");
            }
        } else {
            std::thread::sleep(wait);
        }
    }
}
