//! Detector contract.
//!
//! The scheduler calls [`Detector::detect_one`] once per active camera per
//! detection round and persists whatever comes back. Model loading, frame
//! capture, and class filtering are the detector's business.

mod snapshot;

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};
use std::path::PathBuf;

use crate::cameras::CameraDescriptor;
use crate::targets::is_unrestricted;

pub use snapshot::SnapshotDetector;

/// What one detection run produced for one camera.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectOutcome {
    /// Detections after filtering to the requested classes.
    pub count: u32,
    pub raw_frame: Option<PathBuf>,
    /// Written only when `count > 0`.
    pub annotated_frame: Option<PathBuf>,
    /// Opaque metadata forwarded to the collector as-is.
    pub meta: Value,
}

impl DetectOutcome {
    /// Zero-count outcome for a camera whose detection run failed. The error
    /// text travels in `meta.error` so the collector still hears from the
    /// camera.
    pub fn failed(
        camera: &CameraDescriptor,
        targets: &[String],
        model: &str,
        error: &str,
        ts: DateTime<Utc>,
    ) -> Self {
        let mut meta = detection_meta(camera, targets, model, 0, ts);
        meta["error"] = Value::String(error.to_string());
        Self {
            count: 0,
            raw_frame: None,
            annotated_frame: None,
            meta,
        }
    }
}

pub trait Detector: Send {
    fn name(&self) -> &'static str;

    /// Runs one detection against `camera`, restricted to `targets`.
    ///
    /// `targets` may contain `all` or `*`, meaning no class restriction.
    fn detect_one(&mut self, camera: &CameraDescriptor, targets: &[String]) -> Result<DetectOutcome>;
}

/// Metadata document in the shape the collector expects.
pub fn detection_meta(
    camera: &CameraDescriptor,
    targets: &[String],
    model: &str,
    count: u32,
    ts: DateTime<Utc>,
) -> Value {
    json!({
        "timestamp_utc": ts.to_rfc3339_opts(SecondsFormat::Millis, true),
        "camera_id": camera.id,
        "camera_key": camera.key,
        "compute": { "model": model },
        "targets": targets,
        "all_classes": is_unrestricted(targets),
        "detections": [],
        "people": { "count": count },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn meta_carries_camera_and_targets() {
        let camera = CameraDescriptor {
            key: "gate".into(),
            id: "c1".into(),
            location: None,
            stream: None,
        };
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let meta = detection_meta(&camera, &["person".to_string()], "snapshot", 0, ts);
        assert_eq!(meta["timestamp_utc"], "2024-01-02T03:04:05.000Z");
        assert_eq!(meta["camera_id"], "c1");
        assert_eq!(meta["targets"], json!(["person"]));
        assert_eq!(meta["all_classes"], false);
        assert_eq!(meta["people"]["count"], 0);
        assert!(meta.get("error").is_none());

        let meta = detection_meta(&camera, &["all".to_string()], "snapshot", 0, ts);
        assert_eq!(meta["all_classes"], true);
    }

    #[test]
    fn failed_outcome_is_an_empty_record_with_the_error() {
        let camera = CameraDescriptor {
            key: "dock".into(),
            id: "c2".into(),
            location: None,
            stream: None,
        };
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let outcome = DetectOutcome::failed(&camera, &[], "yolo", "camera offline", ts);
        assert_eq!(outcome.count, 0);
        assert_eq!(outcome.raw_frame, None);
        assert_eq!(outcome.annotated_frame, None);
        assert_eq!(outcome.meta["camera_key"], "dock");
        assert_eq!(outcome.meta["error"], "camera offline");
    }
}
