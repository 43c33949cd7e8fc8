//! On-disk frame layout.
//!
//! Frames are grouped in one directory per UTC day:
//! `<root>/YYYY-MM-DD/<camera_id>_<YYYYmmddTHHMMSS>_<raw|annotated>.jpg`.
//!
//! The outbox stores these paths verbatim; sync and retention delete them
//! best-effort.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

use crate::error::AgentResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameKind {
    Raw,
    /// Frame with detection boxes drawn. Only written when something was detected.
    Annotated,
}

impl FrameKind {
    pub fn suffix(self) -> &'static str {
        match self {
            FrameKind::Raw => "raw",
            FrameKind::Annotated => "annotated",
        }
    }
}

#[derive(Clone, Debug)]
pub struct FrameLayout {
    root: PathBuf,
}

impl FrameLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn day_dir(&self, ts: DateTime<Utc>) -> PathBuf {
        self.root.join(ts.format("%Y-%m-%d").to_string())
    }

    pub fn frame_path(&self, camera_id: &str, ts: DateTime<Utc>, kind: FrameKind) -> PathBuf {
        self.day_dir(ts).join(format!(
            "{}_{}_{}.jpg",
            sanitize(camera_id),
            ts.format("%Y%m%dT%H%M%S"),
            kind.suffix()
        ))
    }

    /// Writes an encoded JPEG and returns its path, creating the day directory.
    ///
    /// Failures surface as [`AgentError::Io`](crate::error::AgentError::Io).
    pub fn write_frame(
        &self,
        camera_id: &str,
        ts: DateTime<Utc>,
        kind: FrameKind,
        jpeg: &[u8],
    ) -> AgentResult<PathBuf> {
        std::fs::create_dir_all(self.day_dir(ts))?;
        let path = self.frame_path(camera_id, ts, kind);
        std::fs::write(&path, jpeg)?;
        Ok(path)
    }
}

// Camera ids come from the remote list; keep them from escaping the day dir.
fn sanitize(camera_id: &str) -> String {
    camera_id
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            c => c,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureClass;
    use anyhow::Result;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap()
    }

    #[test]
    fn paths_follow_day_layout() {
        let layout = FrameLayout::new("frames");
        assert_eq!(layout.day_dir(ts()), PathBuf::from("frames/2024-03-09"));
        assert_eq!(
            layout.frame_path("cam-7", ts(), FrameKind::Raw),
            PathBuf::from("frames/2024-03-09/cam-7_20240309T070501_raw.jpg")
        );
        assert_eq!(
            layout.frame_path("cam-7", ts(), FrameKind::Annotated),
            PathBuf::from("frames/2024-03-09/cam-7_20240309T070501_annotated.jpg")
        );
    }

    #[test]
    fn camera_ids_cannot_escape_day_dir() {
        let layout = FrameLayout::new("frames");
        let path = layout.frame_path("../etc/x", ts(), FrameKind::Raw);
        assert_eq!(path.parent(), Some(Path::new("frames/2024-03-09")));
    }

    #[test]
    fn write_frame_creates_day_dir() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let layout = FrameLayout::new(dir.path().join("frames"));
        let path = layout.write_frame("gate", ts(), FrameKind::Raw, b"\xFF\xD8\xFF\xD9")?;
        assert!(path.starts_with(layout.day_dir(ts())));
        assert_eq!(std::fs::read(&path)?, b"\xFF\xD8\xFF\xD9");
        Ok(())
    }

    #[test]
    fn unwritable_root_is_an_ignorable_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let blocker = dir.path().join("frames");
        std::fs::write(&blocker, b"not a directory")?;
        let err = FrameLayout::new(&blocker)
            .write_frame("gate", ts(), FrameKind::Raw, b"\xFF\xD8")
            .unwrap_err();
        assert_eq!(err.class(), FailureClass::Ignorable);
        Ok(())
    }
}
