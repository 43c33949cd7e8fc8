use std::collections::HashSet;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AgentError, AgentResult};
use crate::remote::{get_field, truthy, RemoteTransport};

/// A camera from the remote camera list, normalized at ingestion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraDescriptor {
    /// Looks up target classes; also the identity records are filed under.
    pub key: String,
    /// Unique within the active set. Never empty.
    pub id: String,
    pub location: Option<String>,
    /// Stream source reference (`rtsp` on the wire).
    pub stream: Option<String>,
}

impl CameraDescriptor {
    /// Identity used for outbox records: the key, or the id when the key is blank.
    pub fn record_camera_id(&self) -> &str {
        if self.key.is_empty() {
            &self.id
        } else {
            &self.key
        }
    }

    fn from_remote(entry: &Value) -> Self {
        Self {
            key: scalar_string(get_field(entry, "key")),
            id: scalar_string(get_field(entry, "id")),
            location: optional_string(get_field(entry, "location")),
            stream: optional_string(get_field(entry, "rtsp")),
        }
    }
}

fn scalar_string(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.trim().to_string(),
        Some(other) => other.to_string().trim().to_string(),
    }
}

fn optional_string(value: Option<&Value>) -> Option<String> {
    Some(scalar_string(value)).filter(|s| !s.is_empty())
}

/// Parses `{ result: [ { id, key, location, rtsp, isActive } ] }`.
///
/// Inactive entries and entries without an id are dropped. Any duplicate id
/// rejects the whole list.
pub fn parse_camera_list(payload: &Value) -> AgentResult<Vec<CameraDescriptor>> {
    let entries = get_field(payload, "result")
        .and_then(Value::as_array)
        .ok_or_else(|| AgentError::MalformedPayload("camera list: expected result array".into()))?;

    let cameras: Vec<CameraDescriptor> = entries
        .iter()
        .filter(|entry| entry.is_object() && truthy(get_field(entry, "isActive")))
        .map(CameraDescriptor::from_remote)
        .filter(|camera| !camera.id.is_empty())
        .collect();

    let mut seen = HashSet::new();
    for camera in &cameras {
        if !seen.insert(camera.id.as_str()) {
            return Err(AgentError::DuplicateCameraId(camera.id.clone()));
        }
    }
    Ok(cameras)
}

#[derive(Clone, Copy, Debug)]
pub struct CameraPolicy {
    pub ttl: Duration,
    /// Abort startup when the initial load yields no cameras.
    pub required: bool,
}

/// What a refresh call did to the active set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CameraRefresh {
    /// TTL not expired and not forced.
    NotDue,
    Replaced(usize),
    /// Fetch failed; the active set is now empty.
    Emptied,
    /// Duplicate ids; the previous set stays active.
    Rejected,
}

/// TTL-gated cache of the active camera set.
///
/// The expiry gate is a plain timestamp; all access happens on the loop thread.
pub struct CameraCache {
    url: Option<String>,
    policy: CameraPolicy,
    cameras: Vec<CameraDescriptor>,
    expires_at: Option<Instant>,
    loaded: bool,
}

impl CameraCache {
    pub fn new(url: Option<String>, policy: CameraPolicy) -> Self {
        Self {
            url,
            policy,
            cameras: Vec::new(),
            expires_at: None,
            loaded: false,
        }
    }

    pub fn cameras(&self) -> &[CameraDescriptor] {
        &self.cameras
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now >= at)
    }

    /// Replaces the active set from the remote list when the TTL expired (or
    /// when forced).
    ///
    /// Errors are returned only for the initial load, and only fatal ones:
    /// duplicate ids, or no cameras while `required` is set. Later failures
    /// degrade to a logged warning.
    pub fn refresh(
        &mut self,
        transport: &dyn RemoteTransport,
        now: Instant,
        force: bool,
    ) -> AgentResult<CameraRefresh> {
        if !force && !self.is_expired(now) {
            return Ok(CameraRefresh::NotDue);
        }
        let initial = !self.loaded;
        self.expires_at = Some(now + self.policy.ttl);

        let fetched = match &self.url {
            Some(url) => transport
                .get_json(url)
                .and_then(|payload| parse_camera_list(&payload)),
            None => Err(AgentError::Config("no camera list url configured".into())),
        };

        match fetched {
            Ok(cameras) => {
                if cameras.is_empty() {
                    if initial && self.policy.required {
                        return Err(AgentError::CamerasRequired(
                            "remote camera list has no active cameras".into(),
                        ));
                    }
                    log::warn!("cameras: none available; using empty list");
                } else {
                    log::info!("cameras: {} loaded from remote", cameras.len());
                }
                let count = cameras.len();
                self.cameras = cameras;
                self.loaded = true;
                Ok(CameraRefresh::Replaced(count))
            }
            Err(e @ AgentError::DuplicateCameraId(_)) => {
                if initial {
                    return Err(e);
                }
                log::warn!(
                    "cameras: refresh rejected ({}); keeping {} active cameras",
                    e,
                    self.cameras.len()
                );
                Ok(CameraRefresh::Rejected)
            }
            Err(e) => {
                if initial && self.policy.required {
                    return Err(AgentError::CamerasRequired(e.to_string()));
                }
                log::warn!("cameras: fetch failed ({}); using empty list", e);
                self.cameras.clear();
                self.loaded = true;
                Ok(CameraRefresh::Emptied)
            }
        }
    }
}
