use regex::Regex;
use reqwest::{Client, Response};
use serde_json::{Map, Value};
use std::sync::OnceLock;
use std::time::Duration;

use crate::errors::{AgentError, AgentResult};

/// Build the HTTP client shared by the network adapters.
///
/// Only connecting is bounded; how long a turn may take is up to the caller.
pub fn http_client() -> AgentResult<Client> {
    Ok(Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .build()?)
}

/// Splits a byte stream into complete lines, holding back a partial last line.
///
/// Works on bytes rather than text so a chunk boundary falling inside a UTF-8
/// sequence cannot corrupt the line it belongs to.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed, without terminators
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..pos]);
            lines.push(line.trim_end_matches('\r').to_string());
        }
        lines
    }

    /// The unterminated remainder once the stream has ended
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = String::from_utf8_lossy(&self.pending)
            .trim_end_matches('\r')
            .to_string();
        self.pending.clear();
        Some(rest)
    }
}

/// Payload of an SSE `data:` line, or `None` for blank lines, comments,
/// other fields and the `[DONE]` sentinel
pub fn sse_data(line: &str) -> Option<&str> {
    let data = line.strip_prefix("data:")?;
    let data = data.strip_prefix(' ').unwrap_or(data);
    if data.trim().is_empty() || data.trim() == "[DONE]" {
        None
    } else {
        Some(data)
    }
}

/// Pull the human readable message out of a vendor error body
pub fn error_message(body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(value) => vendor_error(&value).unwrap_or_else(|| body.trim().to_string()),
        Err(_) => body.trim().to_string(),
    }
}

/// The message of an `error` field, whether it is a string or an object
pub fn vendor_error(value: &Value) -> Option<String> {
    let error = value.get("error").filter(|e| !e.is_null())?;
    if let Some(message) = error.as_str() {
        return Some(message.to_string());
    }
    error
        .get("message")
        .and_then(|m| m.as_str())
        .map(String::from)
        .or_else(|| Some(error.to_string()))
}

/// Turn a non-success status into a protocol error carrying the vendor message
pub async fn check_status(response: Response) -> AgentResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    tracing::debug!(%status, "provider returned an error body: {}", body);
    Err(AgentError::status(status, error_message(&body)))
}

/// Replace characters vendors reject in function names with `_`
pub fn sanitize_function_name(name: &str) -> String {
    static INVALID: OnceLock<Regex> = OnceLock::new();
    let re = INVALID.get_or_init(|| Regex::new(r"[^a-zA-Z0-9_-]").expect("valid regex"));
    re.replace_all(name.trim(), "_").to_string()
}

/// Decode tool arguments sent either as an object or as a JSON-encoded string.
///
/// Anything that does not decode to an object becomes an empty argument set.
pub fn parse_arguments(raw: &Value) -> Map<String, Value> {
    let decoded = match raw {
        Value::String(text) if text.trim().is_empty() => return Map::new(),
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!("ignoring undecodable tool arguments: {}", e);
                return Map::new();
            }
        },
        other => other.clone(),
    };
    match decoded {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Read an integer token count
pub fn token_count(value: &Value, key: &str) -> Option<i32> {
    value.get(key).and_then(|v| v.as_i64()).map(|v| v as i32)
}

/// Feed every line of a streamed body to `on_line`, as the bytes arrive
pub async fn for_each_line<F>(mut response: Response, mut on_line: F) -> AgentResult<()>
where
    F: FnMut(&str) -> AgentResult<()>,
{
    let mut lines = LineBuffer::new();
    while let Some(chunk) = response.chunk().await? {
        for line in lines.push(&chunk) {
            on_line(&line)?;
        }
    }
    if let Some(line) = lines.finish() {
        on_line(&line)?;
    }
    Ok(())
}
