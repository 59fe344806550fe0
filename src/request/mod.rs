//! Request descriptors: the immutable description of one outgoing request.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use reqwest::Url;
use strum::{Display, EnumString};
use tokio_util::sync::CancellationToken;

use crate::error::{CourierError, Result};

/// Process-wide User-Agent override.
static USER_AGENT: RwLock<Option<String>> = RwLock::new(None);

/// Set (or clear, with `None`) the User-Agent merged into every request.
pub fn set_user_agent(user_agent: Option<String>) {
    *USER_AGENT.write().unwrap_or_else(PoisonError::into_inner) = user_agent;
}

pub fn user_agent() -> Option<String> {
    USER_AGENT
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Opaque identifier correlating transport events with the request that
/// produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    /// Allocate a process-unique identifier.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
            HttpMethod::Head => reqwest::Method::HEAD,
        }
    }
}

/// Request payload handed to the descriptor builder.
#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Bytes {
        data: Vec<u8>,
        content_type: Option<String>,
    },
    Json(serde_json::Value),
}

impl RequestBody {
    pub fn bytes(data: impl Into<Vec<u8>>, content_type: impl Into<String>) -> Self {
        Self::Bytes {
            data: data.into(),
            content_type: Some(content_type.into()),
        }
    }

    /// Encode into raw bytes plus the content type it implies.
    fn encode(self) -> Result<(Vec<u8>, Option<String>)> {
        match self {
            Self::Empty => Ok((Vec::new(), None)),
            Self::Bytes { data, content_type } => Ok((data, content_type)),
            Self::Json(value) => Ok((
                serde_json::to_vec(&value)?,
                Some("application/json".to_string()),
            )),
        }
    }
}

/// Where an upload's payload comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadSource {
    Data(Vec<u8>),
    File(PathBuf),
}

/// What kind of transport task a descriptor becomes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferKind {
    Data,
    /// Download to `destination`, or to a fresh temporary file when `None`.
    Download { destination: Option<PathBuf> },
    Upload(UploadSource),
}

/// The immutable description of one outgoing request.
///
/// Built before dispatch and shared behind an `Arc` afterwards; the only
/// field that changes once dispatched is the assigned task identifier.
pub struct RequestDescriptor {
    method: HttpMethod,
    url: Url,
    headers: BTreeMap<String, String>,
    body: Vec<u8>,
    tag: i64,
    transfer: TransferKind,
    ephemeral: bool,
    not_before: Option<DateTime<Utc>>,
    cancellation: Option<CancellationToken>,
    task_id: AtomicU64,
}

impl RequestDescriptor {
    pub fn new(method: HttpMethod, url: Url) -> Self {
        Self {
            method,
            url,
            headers: BTreeMap::new(),
            body: Vec::new(),
            tag: 0,
            transfer: TransferKind::Data,
            ephemeral: false,
            not_before: None,
            cancellation: None,
            task_id: AtomicU64::new(0),
        }
    }

    /// Compose `base_url` + `path` + `query`.
    ///
    /// The base is treated as a directory even without a trailing slash, so
    /// `https://api.example.com/v1` + `users` gives `.../v1/users`.
    pub fn compose(
        method: HttpMethod,
        base_url: &Url,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Self> {
        let mut base = base_url.clone();
        if !base.path().ends_with('/') {
            let with_slash = format!("{}/", base.path());
            base.set_path(&with_slash);
        }
        let mut url = base
            .join(path.trim_start_matches('/'))
            .map_err(|err| CourierError::InvalidRequest(format!("{path}: {err}")))?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        Ok(Self::new(method, url))
    }

    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    /// Attach a body; its implied content type is set unless `content_type`
    /// overrides it.
    pub fn with_body(mut self, body: RequestBody, content_type: Option<&str>) -> Result<Self> {
        let (data, implied) = body.encode()?;
        self.body = data;
        if let Some(content_type) = content_type.map(str::to_string).or(implied) {
            self.headers.insert("content-type".to_string(), content_type);
        }
        Ok(self)
    }

    pub fn with_tag(mut self, tag: i64) -> Self {
        self.tag = tag;
        self
    }

    pub fn with_transfer(mut self, transfer: TransferKind) -> Self {
        self.transfer = transfer;
        self
    }

    /// Route a data request through the memory-only session.
    pub fn ephemeral(mut self) -> Self {
        self.ephemeral = true;
        self
    }

    pub fn with_not_before(mut self, not_before: DateTime<Utc>) -> Self {
        self.not_before = Some(not_before);
        self
    }

    /// Tie the dispatched task to a caller-owned cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn tag(&self) -> i64 {
        self.tag
    }

    pub fn transfer(&self) -> &TransferKind {
        &self.transfer
    }

    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral
    }

    pub fn not_before(&self) -> Option<DateTime<Utc>> {
        self.not_before
    }

    pub fn cancellation(&self) -> Option<&CancellationToken> {
        self.cancellation.as_ref()
    }

    /// The identifier of the most recent dispatch, if dispatched.
    pub fn task_id(&self) -> Option<TaskId> {
        match self.task_id.load(Ordering::Acquire) {
            0 => None,
            raw => Some(TaskId(raw)),
        }
    }

    pub(crate) fn assign_task_id(&self, id: TaskId) {
        self.task_id.store(id.0, Ordering::Release);
    }

    /// Request line used in logs.
    pub fn request_line(&self) -> String {
        format!("{} {}", self.method, self.url)
    }

    /// Headers as sent: defaults, then the User-Agent override, then the
    /// descriptor's own headers. GET never carries a `Content-Type`.
    pub fn merged_headers(&self, defaults: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut merged: BTreeMap<String, String> = defaults
            .iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value.clone()))
            .collect();
        if let Some(agent) = user_agent() {
            merged.insert("user-agent".to_string(), agent);
        }
        merged.extend(self.headers.iter().map(|(k, v)| (k.clone(), v.clone())));
        if self.method == HttpMethod::Get {
            merged.remove("content-type");
        }
        merged
    }
}

impl fmt::Debug for RequestDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestDescriptor")
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("tag", &self.tag)
            .field("transfer", &self.transfer)
            .field("task_id", &self.task_id())
            .finish()
    }
}
