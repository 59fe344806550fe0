//! Abstract transport capability consumed by the controller.
//!
//! The controller never touches sockets. It hands a [`TransportRequest`] to a
//! [`TransportEngine`], and the engine reports progress, redirects and
//! authentication challenges through the [`TaskEvents`] handle for that task.

pub mod pool;
pub mod reqwest_engine;

pub use pool::{ActivityIndicator, TaskHandle, TransportSessionPool};
pub use reqwest_engine::ReqwestEngine;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Weak;

use async_trait::async_trait;
use reqwest::Url;
use strum::Display;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::auth::{AuthChallenge, ChallengeDisposition};
use crate::request::{HttpMethod, RequestDescriptor, TaskId, TransferKind, UploadSource};

/// The three logical sessions a request can run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum SessionKind {
    /// Disk-cached, persistent credential storage.
    Standard,
    /// Memory-only; torn down on invalidate.
    Ephemeral,
    /// Out-of-process transfers. Once dispatched, a background task is
    /// expected to survive app suspension; that guarantee belongs to the
    /// engine.
    Background,
}

impl SessionKind {
    pub const ALL: [SessionKind; 3] = [Self::Standard, Self::Ephemeral, Self::Background];

    /// Data requests use the standard (or ephemeral) session, in-memory
    /// uploads use the standard session, downloads and file uploads use the
    /// background session.
    pub fn for_descriptor(descriptor: &RequestDescriptor, ephemeral_data: bool) -> Self {
        match descriptor.transfer() {
            TransferKind::Data if descriptor.is_ephemeral() || ephemeral_data => Self::Ephemeral,
            TransferKind::Data | TransferKind::Upload(UploadSource::Data(_)) => Self::Standard,
            TransferKind::Upload(UploadSource::File(_)) | TransferKind::Download { .. } => {
                Self::Background
            }
        }
    }
}

/// Fully-resolved request handed to the engine: merged headers, credential
/// applied.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub task_id: TaskId,
    pub session: SessionKind,
    pub method: HttpMethod,
    pub url: Url,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
    pub transfer: TransferKind,
}

/// What the engine saw on the wire for one response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub url: Url,
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
    /// Location of the downloaded file for download tasks.
    pub file: Option<PathBuf>,
}

impl RawResponse {
    pub fn new(url: Url, status: u16) -> Self {
        Self {
            url,
            status,
            headers: BTreeMap::new(),
            body: Vec::new(),
            file: None,
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum TransportErrorKind {
    Connect,
    Timeout,
    Tls,
    Cancelled,
    Io,
    Other,
}

/// Opaque failure reported by the transport engine.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::new(TransportErrorKind::Cancelled, "task was cancelled")
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(error: reqwest::Error) -> Self {
        let kind = if error.is_timeout() {
            TransportErrorKind::Timeout
        } else if error.is_connect() {
            TransportErrorKind::Connect
        } else if error.is_body() || error.is_decode() {
            TransportErrorKind::Io
        } else {
            TransportErrorKind::Other
        };
        Self::new(kind, error.to_string())
    }
}

impl From<std::io::Error> for TransportError {
    fn from(error: std::io::Error) -> Self {
        Self::new(TransportErrorKind::Io, error.to_string())
    }
}

/// Receiver of per-task transport events.
///
/// Progress, redirect and completion events for one session are delivered
/// serially on that session's event loop. Challenges are answered inline
/// because the engine waits on the answer.
pub trait SessionDelegate: Send + Sync {
    fn on_progress(&self, id: TaskId, done: u64, total: Option<u64>);
    fn on_redirect(&self, id: TaskId, response: RawResponse);
    fn on_challenge(&self, id: TaskId, challenge: &AuthChallenge) -> ChallengeDisposition;
    fn on_complete(&self, id: TaskId, result: Result<RawResponse, TransportError>);
}

#[derive(Debug)]
pub(crate) enum SessionEvent {
    Progress {
        id: TaskId,
        done: u64,
        total: Option<u64>,
    },
    Redirect {
        id: TaskId,
        response: RawResponse,
    },
    Complete {
        id: TaskId,
        result: Result<RawResponse, TransportError>,
    },
}

#[derive(Clone)]
enum EventRoute {
    Session(mpsc::UnboundedSender<SessionEvent>),
    Inline,
}

/// Event handle an engine uses to report on one task.
#[derive(Clone)]
pub struct TaskEvents {
    id: TaskId,
    route: EventRoute,
    delegate: Option<Weak<dyn SessionDelegate>>,
}

impl TaskEvents {
    pub(crate) fn queued(
        id: TaskId,
        sender: mpsc::UnboundedSender<SessionEvent>,
        delegate: Weak<dyn SessionDelegate>,
    ) -> Self {
        Self {
            id,
            route: EventRoute::Session(sender),
            delegate: Some(delegate),
        }
    }

    pub(crate) fn inline(id: TaskId, delegate: Weak<dyn SessionDelegate>) -> Self {
        Self {
            id,
            route: EventRoute::Inline,
            delegate: Some(delegate),
        }
    }

    /// Events go nowhere and challenges get default handling. For driving an
    /// engine outside a controller.
    pub fn detached(id: TaskId) -> Self {
        Self {
            id,
            route: EventRoute::Inline,
            delegate: None,
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.id
    }

    pub fn progress(&self, done: u64, total: Option<u64>) {
        self.emit(SessionEvent::Progress {
            id: self.id,
            done,
            total,
        });
    }

    pub fn redirect(&self, response: RawResponse) {
        self.emit(SessionEvent::Redirect {
            id: self.id,
            response,
        });
    }

    pub fn challenge(&self, challenge: &AuthChallenge) -> ChallengeDisposition {
        match self.delegate.as_ref().and_then(Weak::upgrade) {
            Some(delegate) => delegate.on_challenge(self.id, challenge),
            None => ChallengeDisposition::PerformDefaultHandling,
        }
    }

    pub(crate) fn complete(&self, result: Result<RawResponse, TransportError>) {
        self.emit(SessionEvent::Complete {
            id: self.id,
            result,
        });
    }

    fn emit(&self, event: SessionEvent) {
        match &self.route {
            EventRoute::Session(sender) => {
                if sender.send(event).is_err() {
                    tracing::debug!(task_id = %self.id, "session event loop closed; event dropped");
                }
            }
            EventRoute::Inline => {
                if let Some(delegate) = self.delegate.as_ref().and_then(Weak::upgrade) {
                    deliver(delegate.as_ref(), event);
                }
            }
        }
    }
}

pub(crate) fn deliver(delegate: &dyn SessionDelegate, event: SessionEvent) {
    match event {
        SessionEvent::Progress { id, done, total } => delegate.on_progress(id, done, total),
        SessionEvent::Redirect { id, response } => delegate.on_redirect(id, response),
        SessionEvent::Complete { id, result } => delegate.on_complete(id, result),
    }
}

/// Network capability the controller drives.
///
/// `perform` runs one task to its terminal response. Dropping the returned
/// future cancels the task.
#[async_trait]
pub trait TransportEngine: Send + Sync {
    async fn perform(
        &self,
        request: TransportRequest,
        events: &TaskEvents,
    ) -> Result<RawResponse, TransportError>;

    /// Drop per-session state (connection pools, caches) after the session
    /// has been invalidated.
    fn reset_session(&self, _kind: SessionKind) {}
}
