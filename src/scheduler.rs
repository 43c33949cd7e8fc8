//! Single cooperative control loop.
//!
//! One thread, one fixed tick. Each tick evaluates four independent cadences
//! in a fixed order: camera TTL poll, detection, sync, cleanup. Every activity
//! runs to completion before the next is considered, so a slow detection round
//! delays the sync and cleanup checks of the same tick.

use anyhow::Result;
use chrono::{DateTime, FixedOffset, Local, NaiveTime, Timelike, Utc};
use std::time::{Duration, Instant};

use crate::cameras::{CameraCache, CameraDescriptor, CameraRefresh};
use crate::config::{AgentConfig, ScheduleSettings};
use crate::detect::{DetectOutcome, Detector};
use crate::error::AgentResult;
use crate::remote::RemoteTransport;
use crate::retention::RetentionPolicy;
use crate::shutdown::ShutdownFlag;
use crate::storage::{NewRecord, OutboxStore};
use crate::sync::{Backoff, SyncEngine, SyncReport};
use crate::targets::TargetCache;

/// Detection cadence as a function of local time of day.
///
/// `[day_start_hour, day_end_hour)` is daytime. A start after the end wraps
/// past midnight; equal hours mean there is no daytime.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DaySchedule {
    pub day_start_hour: u32,
    pub day_end_hour: u32,
    pub day_interval: Duration,
    pub night_interval: Duration,
    /// Clock used for the window. System local time when unset.
    pub utc_offset: Option<FixedOffset>,
}

impl DaySchedule {
    pub fn is_daytime(&self, time: NaiveTime) -> bool {
        let hour = time.hour();
        if self.day_start_hour <= self.day_end_hour {
            self.day_start_hour <= hour && hour < self.day_end_hour
        } else {
            hour >= self.day_start_hour || hour < self.day_end_hour
        }
    }

    pub fn detect_interval(&self, time: NaiveTime) -> Duration {
        if self.is_daytime(time) {
            self.day_interval
        } else {
            self.night_interval
        }
    }

    pub fn local_time(&self, now: DateTime<Utc>) -> NaiveTime {
        match self.utc_offset {
            Some(offset) => now.with_timezone(&offset).time(),
            None => now.with_timezone(&Local).time(),
        }
    }
}

/// What a single tick did. `None` means the cadence was not due.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    pub camera_refresh: Option<CameraRefresh>,
    /// Records appended by the detection round.
    pub recorded: Option<usize>,
    pub sync: Option<SyncReport>,
    pub purged: Option<usize>,
}

fn due(last: Option<Instant>, every: Duration, now: Instant) -> bool {
    match last {
        None => true,
        Some(last) => now.saturating_duration_since(last) >= every,
    }
}

/// Owns every piece of mutable agent state and drives it from one thread.
pub struct Scheduler {
    settings: ScheduleSettings,
    camera_poll: Duration,
    store: Box<dyn OutboxStore>,
    transport: Box<dyn RemoteTransport>,
    detector: Box<dyn Detector>,
    cameras: CameraCache,
    targets: TargetCache,
    sync: SyncEngine,
    retention: RetentionPolicy,
    shutdown: ShutdownFlag,
    last_camera_poll: Option<Instant>,
    last_detect: Option<Instant>,
    last_sync: Option<Instant>,
    last_cleanup: Option<Instant>,
    last_health_log: Option<Instant>,
}

impl Scheduler {
    pub fn new(
        cfg: &AgentConfig,
        store: Box<dyn OutboxStore>,
        transport: Box<dyn RemoteTransport>,
        detector: Box<dyn Detector>,
        shutdown: ShutdownFlag,
    ) -> Self {
        Self {
            settings: cfg.schedule.clone(),
            camera_poll: cfg.cameras.poll_every,
            store,
            transport,
            detector,
            cameras: CameraCache::new(cfg.cameras.url.clone(), cfg.cameras.policy()),
            targets: TargetCache::new(
                cfg.targets.url.clone(),
                cfg.targets.ttl,
                cfg.targets.default_targets.clone(),
            ),
            sync: SyncEngine::new(cfg.sync.clone(), shutdown.clone()),
            retention: cfg.retention,
            shutdown,
            last_camera_poll: None,
            last_detect: None,
            last_sync: None,
            last_cleanup: None,
            last_health_log: None,
        }
    }

    /// Initial camera load. Errors here are fatal and must stop the process
    /// before the loop starts.
    pub fn start(&mut self) -> AgentResult<usize> {
        let now = Instant::now();
        self.cameras.refresh(self.transport.as_ref(), now, true)?;
        self.last_camera_poll = Some(now);
        Ok(self.cameras.cameras().len())
    }

    /// Ticks until the shutdown flag is observed at a tick boundary.
    pub fn run(&mut self) -> Result<()> {
        log::info!(
            "scheduler running: tick={:?} sync_every={:?} cleanup_every={:?}",
            self.settings.tick,
            self.settings.sync_every,
            self.settings.cleanup_every
        );
        while !self.shutdown.is_triggered() {
            self.tick();
            std::thread::sleep(self.settings.tick);
        }
        log::info!("scheduler stopped");
        Ok(())
    }

    pub fn tick(&mut self) -> TickReport {
        let wall = Utc::now();
        let local = self.settings.day.local_time(wall);
        self.tick_at(Instant::now(), local, wall)
    }

    /// One pass over all cadences at the given instant, local time of day,
    /// and wall clock. Activity errors are logged, never returned.
    pub fn tick_at(&mut self, now: Instant, local: NaiveTime, wall: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();

        if due(self.last_camera_poll, self.camera_poll, now) {
            match self.cameras.refresh(self.transport.as_ref(), now, false) {
                Ok(CameraRefresh::NotDue) => {}
                Ok(outcome) => report.camera_refresh = Some(outcome),
                Err(e) => log::warn!("cameras: refresh failed: {}", e),
            }
            self.last_camera_poll = Some(now);
        }

        let detect_interval = self.settings.day.detect_interval(local);
        if due(self.last_detect, detect_interval, now) {
            report.recorded = Some(self.detect_round(now, wall));
            self.last_detect = Some(now);
        }

        if due(self.last_sync, self.settings.sync_every, now) {
            match self
                .sync
                .sync_pass(self.store.as_mut(), self.transport.as_ref())
            {
                Ok(pass) => report.sync = Some(pass),
                Err(e) => log::error!("sync: pass aborted: {:#}", e),
            }
            self.last_sync = Some(now);
        }

        if due(self.last_cleanup, self.settings.cleanup_every, now) {
            match self.retention.sweep(self.store.as_mut(), wall) {
                Ok(removed) => report.purged = Some(removed),
                Err(e) => log::error!("cleanup: sweep failed: {:#}", e),
            }
            self.last_cleanup = Some(now);
        }

        if due(self.last_health_log, self.settings.health_every, now) {
            self.log_health();
            self.last_health_log = Some(now);
        }

        report
    }

    fn detect_round(&mut self, now: Instant, wall: DateTime<Utc>) -> usize {
        if self.cameras.cameras().is_empty() {
            log::warn!("detect: skipped, no cameras configured");
            return 0;
        }
        let cameras = self.cameras.cameras().to_vec();
        let mut recorded = 0;
        for camera in &cameras {
            let targets = self
                .targets
                .targets_for(self.transport.as_ref(), &camera.key, now);
            match self.record_detection(camera, &targets, wall) {
                Ok(()) => recorded += 1,
                Err(e) => log::error!("detect: camera {} not recorded: {:#}", camera.id, e),
            }
        }
        recorded
    }

    /// Appends exactly one record for `camera`. A failing detector still
    /// yields a zero-count record; only an outbox failure loses the round.
    fn record_detection(
        &mut self,
        camera: &CameraDescriptor,
        targets: &[String],
        wall: DateTime<Utc>,
    ) -> Result<()> {
        let outcome = match self.detector.detect_one(camera, targets) {
            Ok(outcome) => outcome,
            Err(e) => {
                log::error!("detect: camera {} failed: {:#}", camera.id, e);
                DetectOutcome::failed(
                    camera,
                    targets,
                    self.detector.name(),
                    &format!("{:#}", e),
                    wall,
                )
            }
        };
        let record = NewRecord {
            created_at: wall,
            camera_id: camera.record_camera_id().to_string(),
            count: outcome.count,
            meta: outcome.meta.to_string(),
            frame_raw_path: outcome.raw_frame,
            frame_annotated_path: outcome.annotated_frame,
        };
        let id = self.store.append(&record)?;
        log::info!(
            "detect: camera={} count={} saved as #{} (raw={} annotated={})",
            record.camera_id,
            record.count,
            id,
            record.frame_raw_path.is_some(),
            record.frame_annotated_path.is_some()
        );
        Ok(())
    }

    fn log_health(&self) {
        match self.store.counts() {
            Ok(counts) => log::info!(
                "outbox: pending={} synced={} cameras={} backoff={:?}",
                counts.pending,
                counts.synced,
                self.cameras.cameras().len(),
                self.sync.backoff().current()
            ),
            Err(e) => log::warn!("outbox: health check failed: {:#}", e),
        }
    }

    pub fn store(&self) -> &dyn OutboxStore {
        self.store.as_ref()
    }

    pub fn cameras(&self) -> &[CameraDescriptor] {
        self.cameras.cameras()
    }

    pub fn backoff(&self) -> &Backoff {
        self.sync.backoff()
    }

    pub fn shutdown_flag(&self) -> ShutdownFlag {
        self.shutdown.clone()
    }
}
