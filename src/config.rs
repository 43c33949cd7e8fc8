use anyhow::{anyhow, Result};
use chrono::FixedOffset;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cameras::CameraPolicy;
use crate::retention::RetentionPolicy;
use crate::scheduler::DaySchedule;
use crate::sync::SyncSettings;
use crate::targets::parse_targets_str;

const DEFAULT_DB_PATH: &str = "edge_data.db";
const DEFAULT_FRAME_ROOT: &str = "frames";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_REMOTE_TTL_SECS: u64 = 60;
const DEFAULT_CAMERA_POLL_SECS: u64 = 1;
const DEFAULT_TICK_MS: u64 = 200;
const DEFAULT_DAY_START_HOUR: u32 = 6;
const DEFAULT_DAY_END_HOUR: u32 = 18;
const DEFAULT_DAY_INTERVAL_SECS: u64 = 5 * 60;
const DEFAULT_NIGHT_INTERVAL_SECS: u64 = 60 * 60;
const DEFAULT_SYNC_EVERY_SECS: u64 = 5;
const DEFAULT_CLEANUP_EVERY_SECS: u64 = 60 * 60;
const DEFAULT_HEALTH_EVERY_SECS: u64 = 60;
const DEFAULT_RETENTION_DAYS: u32 = 30;
const DEFAULT_BATCH_SIZE: usize = 200;
const DEFAULT_BACKOFF_START_SECS: u64 = 10;
const DEFAULT_BACKOFF_MAX_SECS: u64 = 600;
const DEFAULT_TARGET: &str = "person";
/// Ceiling for every configured interval, wait, and TTL.
const MAX_INTERVAL: Duration = Duration::from_secs(30 * 24 * 60 * 60);
const MAX_RETENTION_DAYS: u32 = 100 * 365;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct AgentConfigFile {
    db_path: Option<String>,
    frame_root: Option<PathBuf>,
    http_timeout_secs: Option<u64>,
    cameras: Option<CamerasConfigFile>,
    targets: Option<TargetsConfigFile>,
    schedule: Option<ScheduleConfigFile>,
    sync: Option<SyncConfigFile>,
    retention: Option<RetentionConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct CamerasConfigFile {
    url: Option<String>,
    ttl_secs: Option<u64>,
    poll_secs: Option<u64>,
    required: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct TargetsConfigFile {
    url: Option<String>,
    ttl_secs: Option<u64>,
    default: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ScheduleConfigFile {
    tick_ms: Option<u64>,
    day_start_hour: Option<u32>,
    day_end_hour: Option<u32>,
    day_interval_secs: Option<u64>,
    night_interval_secs: Option<u64>,
    utc_offset_minutes: Option<i32>,
    sync_every_secs: Option<u64>,
    cleanup_every_secs: Option<u64>,
    health_every_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SyncConfigFile {
    url: Option<String>,
    batch_size: Option<usize>,
    backoff_start_secs: Option<u64>,
    backoff_max_secs: Option<u64>,
    delete_raw_after_sync: Option<bool>,
    frames_only_when_detected: Option<bool>,
    interruptible_backoff: Option<bool>,
    max_backoff_wait_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RetentionConfigFile {
    days: Option<u32>,
    delete_frames: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub db_path: String,
    pub frame_root: PathBuf,
    pub http_timeout: Duration,
    pub cameras: CameraSettings,
    pub targets: TargetSettings,
    pub schedule: ScheduleSettings,
    pub sync: SyncSettings,
    pub retention: RetentionPolicy,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub url: Option<String>,
    pub ttl: Duration,
    /// How often the TTL is checked.
    pub poll_every: Duration,
    pub required: bool,
}

impl CameraSettings {
    pub fn policy(&self) -> CameraPolicy {
        CameraPolicy {
            ttl: self.ttl,
            required: self.required,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TargetSettings {
    pub url: Option<String>,
    pub ttl: Duration,
    pub default_targets: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ScheduleSettings {
    pub tick: Duration,
    pub day: DaySchedule,
    pub sync_every: Duration,
    pub cleanup_every: Duration,
    pub health_every: Duration,
    /// Fixed offset for the day window; system local time when unset.
    pub utc_offset_minutes: Option<i32>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self::from_file(AgentConfigFile::default())
    }
}

impl AgentConfig {
    /// Loads `path` (if any), then env overrides, then validates.
    ///
    /// The file itself is named by `--config` or `EDGE_CONFIG` in `edged`.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => AgentConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: AgentConfigFile) -> Self {
        let cameras = file.cameras.unwrap_or_default();
        let targets = file.targets.unwrap_or_default();
        let schedule = file.schedule.unwrap_or_default();
        let sync = file.sync.unwrap_or_default();
        let retention = file.retention.unwrap_or_default();

        Self {
            db_path: file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            frame_root: file
                .frame_root
                .unwrap_or_else(|| PathBuf::from(DEFAULT_FRAME_ROOT)),
            http_timeout: secs(file.http_timeout_secs, DEFAULT_HTTP_TIMEOUT_SECS),
            cameras: CameraSettings {
                url: non_empty(cameras.url),
                ttl: secs(cameras.ttl_secs, DEFAULT_REMOTE_TTL_SECS),
                poll_every: secs(cameras.poll_secs, DEFAULT_CAMERA_POLL_SECS),
                required: cameras.required.unwrap_or(false),
            },
            targets: TargetSettings {
                url: non_empty(targets.url),
                ttl: secs(targets.ttl_secs, DEFAULT_REMOTE_TTL_SECS),
                default_targets: targets
                    .default
                    .unwrap_or_else(|| vec![DEFAULT_TARGET.to_string()]),
            },
            schedule: ScheduleSettings {
                tick: Duration::from_millis(schedule.tick_ms.unwrap_or(DEFAULT_TICK_MS)),
                day: DaySchedule {
                    day_start_hour: schedule.day_start_hour.unwrap_or(DEFAULT_DAY_START_HOUR),
                    day_end_hour: schedule.day_end_hour.unwrap_or(DEFAULT_DAY_END_HOUR),
                    day_interval: secs(schedule.day_interval_secs, DEFAULT_DAY_INTERVAL_SECS),
                    night_interval: secs(
                        schedule.night_interval_secs,
                        DEFAULT_NIGHT_INTERVAL_SECS,
                    ),
                    utc_offset: None,
                },
                utc_offset_minutes: schedule.utc_offset_minutes,
                sync_every: secs(schedule.sync_every_secs, DEFAULT_SYNC_EVERY_SECS),
                cleanup_every: secs(schedule.cleanup_every_secs, DEFAULT_CLEANUP_EVERY_SECS),
                health_every: secs(schedule.health_every_secs, DEFAULT_HEALTH_EVERY_SECS),
            },
            sync: SyncSettings {
                url: sync.url.unwrap_or_default(),
                batch_size: sync.batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
                backoff_start: secs(sync.backoff_start_secs, DEFAULT_BACKOFF_START_SECS),
                backoff_max: secs(sync.backoff_max_secs, DEFAULT_BACKOFF_MAX_SECS),
                delete_raw_after_sync: sync.delete_raw_after_sync.unwrap_or(true),
                frames_only_when_detected: sync.frames_only_when_detected.unwrap_or(false),
                interruptible_backoff: sync.interruptible_backoff.unwrap_or(true),
                max_backoff_wait: sync.max_backoff_wait_secs.map(Duration::from_secs),
            },
            retention: RetentionPolicy {
                days: retention.days.unwrap_or(DEFAULT_RETENTION_DAYS),
                delete_frames: retention.delete_frames.unwrap_or(true),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(path) = env_non_empty("EDGE_DB_PATH") {
            self.db_path = path;
        }
        if let Some(root) = env_non_empty("EDGE_FRAME_ROOT") {
            self.frame_root = PathBuf::from(root);
        }
        if let Some(url) = env_non_empty("EDGE_SYNC_URL") {
            self.sync.url = url;
        }
        if let Some(url) = env_non_empty("EDGE_CAMERAS_URL") {
            self.cameras.url = Some(url);
        }
        if let Some(url) = env_non_empty("EDGE_TARGETS_URL") {
            self.targets.url = Some(url);
        }
        if let Some(required) = env_non_empty("EDGE_CAMERAS_REQUIRED") {
            self.cameras.required = parse_bool(&required)
                .ok_or_else(|| anyhow!("EDGE_CAMERAS_REQUIRED must be true or false"))?;
        }
        if let Some(days) = env_non_empty("EDGE_RETENTION_DAYS") {
            self.retention.days = days
                .parse()
                .map_err(|_| anyhow!("EDGE_RETENTION_DAYS must be an integer number of days"))?;
        }
        if let Ok(targets) = std::env::var("EDGE_DEFAULT_TARGETS") {
            let parsed = split_csv(&targets);
            if !parsed.is_empty() {
                self.targets.default_targets = parsed;
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.sync.url.trim().is_empty() {
            return Err(anyhow!("sync url must be set (sync.url or EDGE_SYNC_URL)"));
        }
        if self.sync.batch_size == 0 {
            return Err(anyhow!("sync batch_size must be greater than zero"));
        }
        if self.sync.backoff_start.is_zero() {
            return Err(anyhow!("sync backoff_start_secs must be greater than zero"));
        }
        if self.sync.backoff_start >= self.sync.backoff_max {
            return Err(anyhow!(
                "sync backoff_start_secs must be less than backoff_max_secs"
            ));
        }
        if self.schedule.tick.is_zero() {
            return Err(anyhow!("schedule tick_ms must be greater than zero"));
        }
        if let Some(minutes) = self.schedule.utc_offset_minutes {
            let offset = minutes
                .checked_mul(60)
                .and_then(FixedOffset::east_opt)
                .ok_or_else(|| anyhow!("schedule.utc_offset_minutes {} is out of range", minutes))?;
            self.schedule.day.utc_offset = Some(offset);
        }
        let day = &self.schedule.day;
        if day.day_start_hour > 23 || day.day_end_hour > 23 {
            return Err(anyhow!("schedule day hours must be within 0..24"));
        }
        for (name, interval) in [
            ("schedule.day_interval_secs", day.day_interval),
            ("schedule.night_interval_secs", day.night_interval),
            ("schedule.sync_every_secs", self.schedule.sync_every),
            ("schedule.cleanup_every_secs", self.schedule.cleanup_every),
            ("schedule.health_every_secs", self.schedule.health_every),
            ("cameras.poll_secs", self.cameras.poll_every),
            ("cameras.ttl_secs", self.cameras.ttl),
            ("targets.ttl_secs", self.targets.ttl),
            ("http_timeout_secs", self.http_timeout),
        ] {
            if interval.is_zero() {
                return Err(anyhow!("{} must be greater than zero", name));
            }
        }
        for (name, interval) in [
            ("schedule.tick_ms", Some(self.schedule.tick)),
            ("schedule.day_interval_secs", Some(day.day_interval)),
            ("schedule.night_interval_secs", Some(day.night_interval)),
            ("schedule.sync_every_secs", Some(self.schedule.sync_every)),
            ("schedule.cleanup_every_secs", Some(self.schedule.cleanup_every)),
            ("schedule.health_every_secs", Some(self.schedule.health_every)),
            ("cameras.poll_secs", Some(self.cameras.poll_every)),
            ("cameras.ttl_secs", Some(self.cameras.ttl)),
            ("targets.ttl_secs", Some(self.targets.ttl)),
            ("http_timeout_secs", Some(self.http_timeout)),
            ("sync.backoff_max_secs", Some(self.sync.backoff_max)),
            ("sync.max_backoff_wait_secs", self.sync.max_backoff_wait),
        ] {
            if interval.is_some_and(|d| d > MAX_INTERVAL) {
                return Err(anyhow!(
                    "{} must be at most {} seconds",
                    name,
                    MAX_INTERVAL.as_secs()
                ));
            }
        }
        if self.retention.days == 0 || self.retention.days > MAX_RETENTION_DAYS {
            return Err(anyhow!(
                "retention days must be between 1 and {}",
                MAX_RETENTION_DAYS
            ));
        }

        let normalized = parse_targets_str(&self.targets.default_targets.join(","));
        if normalized.is_empty() {
            return Err(anyhow!("default targets must name at least one class"));
        }
        self.targets.default_targets = normalized;
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<AgentConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_json = path
        .extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("json"));
    let cfg: AgentConfigFile = if is_json {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn secs(value: Option<u64>, default: u64) -> Duration {
    Duration::from_secs(value.unwrap_or(default))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn env_non_empty(key: &str) -> Option<String> {
    non_empty(std::env::var(key).ok())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
