//! Remote collector transport.
//!
//! All network access goes through [`RemoteTransport`] so the caches and the
//! sync engine can be driven by a scripted transport in tests. Calls are
//! synchronous and block the control loop.

mod multipart;

use std::time::Duration;

use serde_json::Value;

use crate::error::{AgentError, AgentResult};

pub use multipart::MultipartForm;

pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

pub trait RemoteTransport {
    /// GET a JSON document. Anything but HTTP 200 with a JSON body is an error.
    fn get_json(&self, url: &str) -> AgentResult<Value>;

    /// POST a multipart form and return the HTTP status. Transport failures
    /// are errors; non-200 statuses are returned as-is.
    fn post_multipart(&self, url: &str, form: &MultipartForm) -> AgentResult<u16>;
}

/// Blocking HTTP transport backed by a shared `ureq` agent.
#[derive(Clone)]
pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    pub fn new(timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self { agent }
    }
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new(DEFAULT_HTTP_TIMEOUT)
    }
}

pub(crate) fn transport_error(err: ureq::Error) -> AgentError {
    match err {
        ureq::Error::Status(code, _) => AgentError::Status(code),
        ureq::Error::Transport(t) => AgentError::Transport(t.to_string()),
    }
}

impl RemoteTransport for UreqTransport {
    fn get_json(&self, url: &str) -> AgentResult<Value> {
        let response = self.agent.get(url).call().map_err(transport_error)?;
        if response.status() != 200 {
            return Err(AgentError::Status(response.status()));
        }
        let body = response
            .into_string()
            .map_err(|e| AgentError::Transport(format!("read body from {}: {}", url, e)))?;
        serde_json::from_str(&body)
            .map_err(|e| AgentError::MalformedPayload(format!("{} is not JSON: {}", url, e)))
    }

    fn post_multipart(&self, url: &str, form: &MultipartForm) -> AgentResult<u16> {
        let result = self
            .agent
            .post(url)
            .set("Content-Type", &form.content_type())
            .send_bytes(&form.body());
        let response = match result {
            Ok(response) => response,
            Err(ureq::Error::Status(code, response)) => {
                log_response_excerpt(code, response);
                return Ok(code);
            }
            Err(e) => return Err(transport_error(e)),
        };
        let status = response.status();
        log_response_excerpt(status, response);
        Ok(status)
    }
}

fn log_response_excerpt(status: u16, response: ureq::Response) {
    if let Ok(text) = response.into_string() {
        let excerpt: String = text.chars().take(400).collect();
        if !excerpt.is_empty() {
            log::debug!("collector status {}: {}", status, excerpt);
        }
    }
}

/// Field lookup that tolerates differently-cased keys (`isSuccess`,
/// `IsSuccess`, `issuccess`). An exact match wins.
pub fn get_field<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    let obj = value.as_object()?;
    if let Some(v) = obj.get(key) {
        return Some(v);
    }
    obj.iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v)
}

/// Loose truthiness for flags coming from remote JSON.
pub fn truthy(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Some(Value::String(s)) => matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "1"),
        _ => false,
    }
}
