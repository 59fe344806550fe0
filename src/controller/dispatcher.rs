//! Terminal-event processing: response wrapping, error classification and
//! request logging.

use std::collections::BTreeMap;
use std::path::PathBuf;

use reqwest::Url;

use crate::error::{status_is_error, CourierError};
use crate::request::RequestDescriptor;
use crate::transport::{RawResponse, TransportError};

const LOG_BODY_LIMIT: usize = 2048;

/// The final response handed to a completion.
///
/// When the task failed before any HTTP response arrived, `status` is 0 and
/// the remaining fields are empty.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub url: Url,
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
    /// The body decoded as JSON, when it is JSON.
    pub parsed: Option<serde_json::Value>,
    /// The last intermediate response if the request was redirected.
    pub redirect: Option<RawResponse>,
    /// Where a download landed.
    pub file: Option<PathBuf>,
}

impl Response {
    /// A response for a request that never produced one.
    pub fn empty(url: Url) -> Self {
        Self {
            url,
            status: 0,
            headers: BTreeMap::new(),
            body: Vec::new(),
            parsed: None,
            redirect: None,
            file: None,
        }
    }

    pub fn from_raw(raw: RawResponse, redirect: Option<RawResponse>) -> Self {
        let parsed = parse_json(&raw);
        Self {
            url: raw.url,
            status: raw.status,
            headers: raw.headers,
            body: raw.body,
            parsed,
            redirect,
            file: raw.file,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn was_redirected(&self) -> bool {
        self.redirect.is_some()
    }
}

fn parse_json(raw: &RawResponse) -> Option<serde_json::Value> {
    let declared_json = raw
        .header("content-type")
        .is_some_and(|value| value.contains("json"));
    if !declared_json || raw.body.is_empty() {
        return None;
    }
    match serde_json::from_slice(&raw.body) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::debug!(error = %err, url = %raw.url, "response declared JSON but did not parse");
            None
        }
    }
}

/// Decide the error, if any, for a terminal transport result. Transport
/// failures take precedence; otherwise a 4xx/5xx status becomes
/// [`CourierError::HttpStatus`].
pub fn classify(result: &Result<RawResponse, TransportError>) -> Option<CourierError> {
    match result {
        Err(err) => Some(CourierError::Transport(err.clone())),
        Ok(raw) if status_is_error(raw.status) => Some(CourierError::http_status(raw.status)),
        Ok(_) => None,
    }
}

/// Build the caller-facing response and its classified error.
pub fn build(
    url: &Url,
    result: Result<RawResponse, TransportError>,
    redirect: Option<RawResponse>,
) -> (Response, Option<CourierError>) {
    let error = classify(&result);
    let response = match result {
        Ok(raw) => Response::from_raw(raw, redirect),
        Err(_) => Response {
            redirect,
            ..Response::empty(url.clone())
        },
    };
    (response, error)
}

/// Log one finished request: request line, sent headers, body, and the
/// status or error.
pub fn log_exchange(
    descriptor: &RequestDescriptor,
    sent_headers: &BTreeMap<String, String>,
    response: &Response,
    error: Option<&CourierError>,
) {
    let headers = redacted(sent_headers);
    let body = body_preview(descriptor.body());
    match error {
        None => tracing::info!(
            request = %descriptor.request_line(),
            headers = ?headers,
            body = %body,
            status = response.status,
            "request completed"
        ),
        Some(err @ CourierError::HttpStatus { .. }) => tracing::warn!(
            request = %descriptor.request_line(),
            headers = ?headers,
            body = %body,
            status = response.status,
            error = %err,
            "request completed with error status"
        ),
        Some(err) => tracing::warn!(
            request = %descriptor.request_line(),
            headers = ?headers,
            body = %body,
            error = %err,
            "request failed"
        ),
    }
}

fn redacted(headers: &BTreeMap<String, String>) -> BTreeMap<&str, &str> {
    headers
        .iter()
        .map(|(name, value)| match name.as_str() {
            "authorization" | "proxy-authorization" | "cookie" => (name.as_str(), "<redacted>"),
            _ => (name.as_str(), value.as_str()),
        })
        .collect()
}

pub(crate) fn body_preview(body: &[u8]) -> String {
    if body.len() <= LOG_BODY_LIMIT {
        return String::from_utf8_lossy(body).into_owned();
    }
    let mut preview = String::from_utf8_lossy(&body[..LOG_BODY_LIMIT]).into_owned();
    preview.push_str(&format!("... ({} bytes)", body.len()));
    preview
}
