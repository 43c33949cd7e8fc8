use std::io::Write;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tempfile::NamedTempFile;

use edge_agent::config::AgentConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

const ENV_KEYS: [&str; 8] = [
    "EDGE_DB_PATH",
    "EDGE_FRAME_ROOT",
    "EDGE_SYNC_URL",
    "EDGE_CAMERAS_URL",
    "EDGE_TARGETS_URL",
    "EDGE_CAMERAS_REQUIRED",
    "EDGE_RETENTION_DAYS",
    "EDGE_DEFAULT_TARGETS",
];

fn clean_env() -> MutexGuard<'static, ()> {
    let guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    for key in ENV_KEYS {
        std::env::remove_var(key);
    }
    guard
}

fn config_file(suffix: &str, contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("temp config");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

#[test]
fn loads_toml_file_and_env_overrides() {
    let _guard = clean_env();

    let file = config_file(
        ".toml",
        r#"
            db_path = "edge_prod.db"
            frame_root = "/var/lib/edge/frames"
            http_timeout_secs = 12

            [cameras]
            url = "https://collector.example/cameras"
            ttl_secs = 120
            required = true

            [targets]
            url = "https://collector.example/targets"
            default = ["Person", "dog"]

            [schedule]
            tick_ms = 500
            day_start_hour = 7
            day_end_hour = 19
            utc_offset_minutes = -300

            [sync]
            url = "https://collector.example/edge"
            batch_size = 50
            backoff_start_secs = 5
            backoff_max_secs = 300
            max_backoff_wait_secs = 30

            [retention]
            days = 14
            delete_frames = false
        "#,
    );

    std::env::set_var("EDGE_SYNC_URL", "https://backup.example/edge");
    std::env::set_var("EDGE_RETENTION_DAYS", "7");

    let cfg = AgentConfig::load_from(Some(file.path())).expect("load config");

    assert_eq!(cfg.db_path, "edge_prod.db");
    assert_eq!(cfg.frame_root, PathBuf::from("/var/lib/edge/frames"));
    assert_eq!(cfg.http_timeout, Duration::from_secs(12));
    assert_eq!(
        cfg.cameras.url.as_deref(),
        Some("https://collector.example/cameras")
    );
    assert_eq!(cfg.cameras.ttl, Duration::from_secs(120));
    assert!(cfg.cameras.required);
    assert_eq!(cfg.targets.default_targets, vec!["person", "dog"]);
    assert_eq!(cfg.schedule.tick, Duration::from_millis(500));
    assert_eq!(cfg.schedule.day.day_start_hour, 7);
    assert_eq!(
        cfg.schedule.day.utc_offset.map(|o| o.local_minus_utc()),
        Some(-300 * 60)
    );
    assert_eq!(cfg.sync.url, "https://backup.example/edge");
    assert_eq!(cfg.sync.batch_size, 50);
    assert_eq!(cfg.sync.backoff_start, Duration::from_secs(5));
    assert_eq!(cfg.sync.max_backoff_wait, Some(Duration::from_secs(30)));
    assert_eq!(cfg.retention.days, 7);
    assert!(!cfg.retention.delete_frames);
}

#[test]
fn json_file_is_accepted() {
    let _guard = clean_env();

    let file = config_file(
        ".json",
        r#"{ "sync": { "url": "http://10.0.0.2/edge", "batch_size": 10 } }"#,
    );
    let cfg = AgentConfig::load_from(Some(file.path())).expect("load json config");
    assert_eq!(cfg.sync.url, "http://10.0.0.2/edge");
    assert_eq!(cfg.sync.batch_size, 10);
}

#[test]
fn defaults_apply_without_file() {
    let _guard = clean_env();
    std::env::set_var("EDGE_SYNC_URL", "http://collector/edge");

    let cfg = AgentConfig::load_from(None).expect("load defaults");

    assert_eq!(cfg.db_path, "edge_data.db");
    assert_eq!(cfg.frame_root, PathBuf::from("frames"));
    assert_eq!(cfg.cameras.ttl, Duration::from_secs(60));
    assert_eq!(cfg.cameras.poll_every, Duration::from_secs(1));
    assert!(!cfg.cameras.required);
    assert_eq!(cfg.targets.default_targets, vec!["person"]);
    assert_eq!(cfg.schedule.tick, Duration::from_millis(200));
    assert_eq!(cfg.schedule.day.day_interval, Duration::from_secs(300));
    assert_eq!(cfg.schedule.day.night_interval, Duration::from_secs(3600));
    assert_eq!(cfg.schedule.sync_every, Duration::from_secs(5));
    assert_eq!(cfg.schedule.cleanup_every, Duration::from_secs(3600));
    assert_eq!(cfg.sync.batch_size, 200);
    assert_eq!(cfg.sync.backoff_start, Duration::from_secs(10));
    assert_eq!(cfg.sync.backoff_max, Duration::from_secs(600));
    assert!(cfg.sync.delete_raw_after_sync);
    assert!(cfg.sync.interruptible_backoff);
    assert_eq!(cfg.retention.days, 30);
    assert!(cfg.retention.delete_frames);

    std::env::remove_var("EDGE_SYNC_URL");
}

#[test]
fn env_lists_and_flags_are_parsed() {
    let _guard = clean_env();
    std::env::set_var("EDGE_SYNC_URL", "http://collector/edge");
    std::env::set_var("EDGE_DEFAULT_TARGETS", " Person, CAR ,,person");
    std::env::set_var("EDGE_CAMERAS_REQUIRED", "yes");

    let cfg = AgentConfig::load_from(None).expect("load config");
    assert_eq!(cfg.targets.default_targets, vec!["person", "car"]);
    assert!(cfg.cameras.required);

    for key in ENV_KEYS {
        std::env::remove_var(key);
    }
}

#[test]
fn invalid_settings_are_rejected() {
    let _guard = clean_env();

    let err = AgentConfig::load_from(None).unwrap_err();
    assert!(err.to_string().contains("sync url"));

    std::env::set_var("EDGE_SYNC_URL", "http://collector/edge");
    std::env::set_var("EDGE_RETENTION_DAYS", "a month");
    assert!(AgentConfig::load_from(None).is_err());
    std::env::remove_var("EDGE_RETENTION_DAYS");

    std::env::set_var("EDGE_CAMERAS_REQUIRED", "maybe");
    assert!(AgentConfig::load_from(None).is_err());
    std::env::remove_var("EDGE_CAMERAS_REQUIRED");

    for contents in [
        "[sync]\nbackoff_start_secs = 600\nbackoff_max_secs = 600\n",
        "[sync]\nbatch_size = 0\n",
        "[schedule]\nday_end_hour = 24\n",
        "[schedule]\nutc_offset_minutes = 100000\n",
        "[retention]\ndays = 0\n",
        "[targets]\ndefault = [\"  \"]\n",
        "[sync]\nbogus = 1\n",
        "[retention]\ndays = 4000000000\n",
    ] {
        let file = config_file(".toml", contents);
        assert!(
            AgentConfig::load_from(Some(file.path())).is_err(),
            "accepted invalid config: {}",
            contents
        );
    }

    std::env::remove_var("EDGE_SYNC_URL");
}

#[test]
fn oversized_intervals_are_rejected() {
    let _guard = clean_env();
    std::env::set_var("EDGE_SYNC_URL", "http://collector/edge");

    for contents in [
        r#"{ "cameras": { "ttl_secs": 18446744073709551615 } }"#,
        r#"{ "targets": { "ttl_secs": 18446744073709551615 } }"#,
        r#"{ "schedule": { "night_interval_secs": 18446744073709551615 } }"#,
        r#"{ "schedule": { "tick_ms": 18446744073709551615 } }"#,
        r#"{ "sync": { "backoff_max_secs": 18446744073709551615 } }"#,
        r#"{ "sync": { "max_backoff_wait_secs": 18446744073709551615 } }"#,
        r#"{ "http_timeout_secs": 18446744073709551615 }"#,
    ] {
        let file = config_file(".json", contents);
        let err = AgentConfig::load_from(Some(file.path())).unwrap_err();
        assert!(
            err.to_string().contains("must be at most"),
            "unexpected error for {}: {}",
            contents,
            err
        );
    }

    // A month is still allowed.
    let file = config_file(".json", r#"{ "cameras": { "ttl_secs": 2592000 } }"#);
    let cfg = AgentConfig::load_from(Some(file.path())).expect("month-long ttl");
    assert_eq!(cfg.cameras.ttl, Duration::from_secs(2_592_000));

    std::env::remove_var("EDGE_SYNC_URL");
}
