//! HTTP request execution.
//!
//! One blocking client per run. Connect-level failures are retried with
//! backoff and then surfaced as a transport error so the engine can mark
//! the operation failed and move on. Other request failures are retried
//! once and then synthesized as status 700 with an empty body, keeping
//! the batch shape intact for the monitors.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use restprobe_core::ContentType;

/// Per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Connect retries before giving up on the target.
const TRANSPORT_ATTEMPTS: u32 = 3;
/// Initial backoff between connect retries, doubled each attempt.
const BACKOFF: Duration = Duration::from_millis(250);

/// Synthesized status for requests that failed without an HTTP response.
pub const STATUS_NO_RESPONSE: u16 = 700;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("cannot reach {url}: {reason}")]
    Transport { url: String, reason: String },
    #[error("http client setup failed: {0}")]
    Client(#[from] reqwest::Error),
}

/// A fully assembled request, ready to send.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub method: restprobe_core::Method,
    /// Resolved path, placeholders substituted.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
    pub content_type: ContentType,
}

pub struct Executor {
    client: reqwest::blocking::Client,
    base_url: String,
    headers: HashMap<String, String>,
    query_auth: HashMap<String, String>,
}

impl Executor {
    pub fn new(
        base_url: &str,
        headers: HashMap<String, String>,
        query_auth: HashMap<String, String>,
    ) -> Result<Self, ExecutorError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            headers,
            query_auth,
        })
    }

    /// Send one request and return `(status, parsed body)`. Non-JSON
    /// bodies come back as a JSON string.
    pub fn send(&self, request: &PreparedRequest) -> Result<(u16, Value), ExecutorError> {
        let url = format!("{}{}", self.base_url, request.path);
        let mut attempt = 0;
        let mut backoff = BACKOFF;
        loop {
            match self.send_once(&url, request) {
                Ok(result) => return Ok(result),
                Err(e) if e.is_connect() || e.is_builder() => {
                    attempt += 1;
                    if attempt >= TRANSPORT_ATTEMPTS {
                        return Err(ExecutorError::Transport {
                            url,
                            reason: e.to_string(),
                        });
                    }
                    tracing::warn!(url = %url, attempt, error = %e, "connect failed, retrying");
                    std::thread::sleep(backoff);
                    backoff *= 2;
                }
                Err(e) => {
                    // Timeouts, resets mid-response and the like: one more
                    // try, then a sentinel the monitors can count.
                    attempt += 1;
                    if attempt >= 2 {
                        tracing::warn!(url = %url, error = %e, "request failed, recording sentinel");
                        return Ok((STATUS_NO_RESPONSE, Value::String(String::new())));
                    }
                }
            }
        }
    }

    fn send_once(
        &self,
        url: &str,
        request: &PreparedRequest,
    ) -> Result<(u16, Value), reqwest::Error> {
        let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
            .unwrap_or(reqwest::Method::GET);
        let mut builder = self.client.request(method, url);

        let query: Vec<(&str, &str)> = request
            .query
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .chain(self.query_auth.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .collect();
        if !query.is_empty() {
            builder = builder.query(&query);
        }
        for (k, v) in &self.headers {
            builder = builder.header(k, v);
        }
        for (k, v) in &request.headers {
            builder = builder.header(k, v);
        }

        if let Some(body) = &request.body {
            builder = match request.content_type {
                ContentType::Json => builder.json(body),
                ContentType::Multipart => builder
                    .header(
                        "Content-Type",
                        "multipart/form-data; boundary=restprobe-boundary",
                    )
                    .body(encode_body(body, ContentType::Multipart)),
                other => builder
                    .header("Content-Type", other.header_value())
                    .body(encode_body(body, other)),
            };
        }

        let response = builder.send()?;
        let status = response.status().as_u16();
        let text = response.text().unwrap_or_default();
        let parsed = serde_json::from_str(&text).unwrap_or(Value::String(text));
        Ok((status, parsed))
    }
}

/// Encode a JSON body under an alternative content type. Used during
/// mutation for content-type confusion; fidelity to each format matters
/// less than sending plausibly shaped bytes.
fn encode_body(body: &Value, content_type: ContentType) -> String {
    match content_type {
        ContentType::Json => body.to_string(),
        ContentType::Form => match body.as_object() {
            Some(map) => map
                .iter()
                .map(|(k, v)| format!("{}={}", urlencode(k), urlencode(&scalar_string(v))))
                .collect::<Vec<_>>()
                .join("&"),
            None => format!("value={}", urlencode(&scalar_string(body))),
        },
        ContentType::Multipart => match body.as_object() {
            Some(map) => {
                let mut out = String::new();
                for (k, v) in map {
                    out.push_str("--restprobe-boundary\r\n");
                    out.push_str(&format!(
                        "Content-Disposition: form-data; name=\"{k}\"\r\n\r\n"
                    ));
                    out.push_str(&scalar_string(v));
                    out.push_str("\r\n");
                }
                out.push_str("--restprobe-boundary--\r\n");
                out
            }
            None => scalar_string(body),
        },
        ContentType::Xml => match body.as_object() {
            Some(map) => {
                let fields: String = map
                    .iter()
                    .map(|(k, v)| format!("<{k}>{}</{k}>", scalar_string(v)))
                    .collect();
                format!("<request>{fields}</request>")
            }
            None => format!("<request>{}</request>", scalar_string(body)),
        },
        ContentType::Text => scalar_string(body),
    }
}

fn scalar_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char);
            }
            b' ' => out.push('+'),
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}
