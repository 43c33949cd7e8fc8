use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::error::{AgentError, AgentResult};
use crate::remote::{get_field, truthy, RemoteTransport};

/// Tokens the detector reads as "no class restriction". Kept verbatim.
const ALL_CLASSES_TOKENS: [&str; 2] = ["all", "*"];

/// Normalizes a remote `targets` value into a lowercase, order-preserving,
/// deduplicated list of class names.
///
/// Accepted shapes: a JSON list, a bracketed list in a string (`"[Person, Dog]"`),
/// a comma-separated string, or a single token. Anything else yields `[]`.
pub fn parse_targets(value: &Value) -> Vec<String> {
    let items = match value {
        Value::Array(values) => values.iter().map(item_string).collect(),
        Value::String(s) => split_target_string(s),
        _ => Vec::new(),
    };
    normalize(items)
}

/// Same as [`parse_targets`] for a plain string.
pub fn parse_targets_str(raw: &str) -> Vec<String> {
    normalize(split_target_string(raw))
}

/// Whether a target list asks for every class.
pub fn is_unrestricted(targets: &[String]) -> bool {
    targets
        .iter()
        .any(|t| ALL_CLASSES_TOKENS.contains(&t.as_str()))
}

fn item_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn split_target_string(raw: &str) -> Vec<String> {
    let s = raw.trim();
    if s.starts_with('[') && s.ends_with(']') {
        if let Ok(Value::Array(values)) = serde_json::from_str::<Value>(s) {
            return values.iter().map(item_string).collect();
        }
        // Not valid JSON, e.g. `[Person, Dog]`.
        return s
            .trim_start_matches('[')
            .trim_end_matches(']')
            .split(|c: char| c == ',' || c.is_whitespace())
            .map(str::to_string)
            .collect();
    }
    if s.contains(',') {
        return s.split(',').map(str::to_string).collect();
    }
    vec![s.to_string()]
}

fn normalize(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for item in items {
        let cleaned = item
            .trim()
            .trim_matches(|c| c == '"' || c == '\'')
            .trim()
            .to_lowercase();
        if !cleaned.is_empty() && seen.insert(cleaned.clone()) {
            out.push(cleaned);
        }
    }
    out
}

/// Parses `{ isSuccess, result: [ { cameraKey, targets } ] }` with
/// case-insensitive field names.
///
/// Rows with a blank key or an empty target list are skipped so those cameras
/// use the default list.
pub fn parse_target_mapping(payload: &Value) -> AgentResult<HashMap<String, Vec<String>>> {
    if !truthy(get_field(payload, "isSuccess")) {
        return Err(AgentError::MalformedPayload(
            "target list: isSuccess is not true".into(),
        ));
    }
    let rows = get_field(payload, "result")
        .and_then(Value::as_array)
        .ok_or_else(|| AgentError::MalformedPayload("target list: expected result array".into()))?;

    let mut by_camera = HashMap::new();
    for row in rows.iter().filter(|row| row.is_object()) {
        let key = match get_field(row, "cameraKey") {
            Some(Value::String(s)) => s.trim().to_string(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };
        if key.is_empty() {
            continue;
        }
        let targets = get_field(row, "targets").map(parse_targets).unwrap_or_default();
        if targets.is_empty() {
            continue;
        }
        by_camera.insert(key, targets);
    }
    Ok(by_camera)
}

/// TTL-cached per-camera target classes.
///
/// Stale-but-available: a failed refresh keeps the previous mapping and only
/// moves the expiry forward.
pub struct TargetCache {
    url: Option<String>,
    ttl: Duration,
    default_targets: Vec<String>,
    by_camera: HashMap<String, Vec<String>>,
    expires_at: Option<Instant>,
}

impl TargetCache {
    pub fn new(url: Option<String>, ttl: Duration, default_targets: Vec<String>) -> Self {
        Self {
            url,
            ttl,
            default_targets,
            by_camera: HashMap::new(),
            expires_at: None,
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now >= at)
    }

    /// Targets for a camera key, refreshing the mapping first if it expired.
    pub fn targets_for(
        &mut self,
        transport: &dyn RemoteTransport,
        camera_key: &str,
        now: Instant,
    ) -> Vec<String> {
        if self.is_expired(now) {
            if let Err(e) = self.refresh(transport, now) {
                log::warn!("targets: refresh failed ({}); keeping previous mapping", e);
            }
        }
        self.by_camera
            .get(camera_key)
            .cloned()
            .unwrap_or_else(|| self.default_targets.clone())
    }

    /// Fetches the full mapping in one call. Returns the number of cameras
    /// with explicit targets.
    pub fn refresh(&mut self, transport: &dyn RemoteTransport, now: Instant) -> AgentResult<usize> {
        self.expires_at = Some(now + self.ttl);
        let Some(url) = &self.url else {
            return Ok(self.by_camera.len());
        };
        let mapping = parse_target_mapping(&transport.get_json(url)?)?;
        log::debug!("targets: {} cameras with explicit targets", mapping.len());
        self.by_camera = mapping;
        Ok(self.by_camera.len())
    }
}
