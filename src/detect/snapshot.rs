use anyhow::Result;
use chrono::{DateTime, Utc};
use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use super::{detection_meta, DetectOutcome, Detector};
use crate::cameras::CameraDescriptor;
use crate::error::{AgentError, AgentResult};
use crate::frame::{FrameKind, FrameLayout};
use crate::remote::transport_error;

const MAX_SNAPSHOT_BYTES: u64 = 16 * 1024 * 1024;

/// Frame-capture-only detector.
///
/// Grabs a JPEG snapshot from cameras whose stream is an `http(s)` URL and
/// stores it as the raw frame. It runs no model, so the count is always 0.
/// Cameras with other stream schemes (e.g. `rtsp`) get a record without a
/// frame. A snapshot that cannot be fetched or stored also yields a frameless
/// record, with the failure noted in `meta.error`.
pub struct SnapshotDetector {
    layout: FrameLayout,
    agent: ureq::Agent,
}

impl SnapshotDetector {
    pub fn new(layout: FrameLayout, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self { layout, agent }
    }

    fn fetch_snapshot(&self, url: &str) -> AgentResult<Vec<u8>> {
        let response = self.agent.get(url).call().map_err(transport_error)?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_SNAPSHOT_BYTES)
            .read_to_end(&mut bytes)
            .map_err(|e| AgentError::Transport(format!("read snapshot from {}: {}", url, e)))?;
        if !bytes.starts_with(&[0xFF, 0xD8]) {
            return Err(AgentError::MalformedPayload(format!(
                "snapshot from {} is not a jpeg",
                url
            )));
        }
        Ok(bytes)
    }

    fn capture(&self, camera: &CameraDescriptor, url: &str, ts: DateTime<Utc>) -> AgentResult<PathBuf> {
        let jpeg = self.fetch_snapshot(url)?;
        self.layout.write_frame(&camera.id, ts, FrameKind::Raw, &jpeg)
    }
}

fn snapshot_url(stream: &str) -> Option<&str> {
    let url = Url::parse(stream).ok()?;
    matches!(url.scheme(), "http" | "https").then_some(stream)
}

impl Detector for SnapshotDetector {
    fn name(&self) -> &'static str {
        "snapshot"
    }

    fn detect_one(&mut self, camera: &CameraDescriptor, targets: &[String]) -> Result<DetectOutcome> {
        let ts = Utc::now();
        let Some(url) = camera.stream.as_deref().and_then(snapshot_url) else {
            log::debug!("detect: camera {} stream has no snapshot support", camera.id);
            return Ok(DetectOutcome {
                count: 0,
                raw_frame: None,
                annotated_frame: None,
                meta: detection_meta(camera, targets, self.name(), 0, ts),
            });
        };

        match self.capture(camera, url, ts) {
            Ok(raw) => Ok(DetectOutcome {
                count: 0,
                raw_frame: Some(raw),
                annotated_frame: None,
                meta: detection_meta(camera, targets, self.name(), 0, ts),
            }),
            Err(e) => {
                log::warn!(
                    "detect: camera {} snapshot unavailable ({:?}): {}",
                    camera.id,
                    e.class(),
                    e
                );
                Ok(DetectOutcome::failed(
                    camera,
                    targets,
                    self.name(),
                    &e.to_string(),
                    ts,
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::TcpListener;

    const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0xFF, 0xD9];

    fn camera(stream: Option<String>) -> CameraDescriptor {
        CameraDescriptor {
            key: "gate".into(),
            id: "c1".into(),
            location: None,
            stream,
        }
    }

    fn serve_once(body: &'static [u8]) -> Result<(String, std::thread::JoinHandle<()>)> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let url = format!("http://{}/snapshot.jpg", listener.local_addr()?);
        let handle = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            let mut request = Vec::new();
            let mut buf = [0u8; 512];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut buf).expect("read request");
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let header = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            stream.write_all(header.as_bytes()).expect("write header");
            stream.write_all(body).expect("write body");
        });
        Ok((url, handle))
    }

    #[test]
    fn rtsp_and_missing_streams_yield_frameless_records() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut detector = SnapshotDetector::new(FrameLayout::new(dir.path()), Duration::from_secs(1));
        let targets = vec!["person".to_string()];

        for stream in [Some("rtsp://10.0.0.5/live".to_string()), None] {
            let outcome = detector.detect_one(&camera(stream), &targets)?;
            assert_eq!(outcome.count, 0);
            assert_eq!(outcome.raw_frame, None);
            assert_eq!(outcome.annotated_frame, None);
            assert_eq!(outcome.meta["targets"][0], "person");
        }
        Ok(())
    }

    #[test]
    fn http_stream_snapshot_is_saved_as_raw_frame() -> Result<()> {
        let (url, server) = serve_once(JPEG)?;
        let dir = tempfile::tempdir()?;
        let layout = FrameLayout::new(dir.path());
        let mut detector = SnapshotDetector::new(layout.clone(), Duration::from_secs(5));

        let outcome = detector.detect_one(&camera(Some(url)), &["all".to_string()])?;
        server.join().expect("server thread");

        let raw = outcome.raw_frame.expect("raw frame");
        assert!(raw.starts_with(layout.root()));
        assert!(raw.to_string_lossy().ends_with("_raw.jpg"));
        assert_eq!(std::fs::read(raw)?, JPEG);
        Ok(())
    }

    #[test]
    fn non_jpeg_snapshot_degrades_to_frameless_record() -> Result<()> {
        let (url, server) = serve_once(b"<html>login</html>")?;
        let dir = tempfile::tempdir()?;
        let mut detector = SnapshotDetector::new(FrameLayout::new(dir.path()), Duration::from_secs(5));
        let outcome = detector.detect_one(&camera(Some(url)), &[])?;
        server.join().expect("server thread");

        assert_eq!(outcome.count, 0);
        assert_eq!(outcome.raw_frame, None);
        assert!(outcome.meta["error"]
            .as_str()
            .expect("error text")
            .contains("not a jpeg"));
        Ok(())
    }

    #[test]
    fn unreachable_camera_degrades_to_frameless_record() -> Result<()> {
        // Bind then drop to get a local port nobody listens on.
        let port = TcpListener::bind("127.0.0.1:0")?.local_addr()?.port();
        let url = format!("http://127.0.0.1:{}/snapshot.jpg", port);
        let dir = tempfile::tempdir()?;
        let mut detector = SnapshotDetector::new(FrameLayout::new(dir.path()), Duration::from_secs(2));

        let outcome = detector.detect_one(&camera(Some(url)), &["person".to_string()])?;
        assert_eq!(outcome.count, 0);
        assert_eq!(outcome.raw_frame, None);
        assert_eq!(outcome.meta["camera_id"], "c1");
        assert!(outcome.meta["error"].is_string());
        Ok(())
    }
}
