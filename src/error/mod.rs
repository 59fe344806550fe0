//! Error types for courier.

pub mod recovery;

pub use recovery::{ErrorRecoveryAttempter, RecoverableError, RecoveryAction, RecoveryHandler};

use thiserror::Error;

use crate::auth::AuthError;
use crate::transport::{TransportError, TransportErrorKind};

/// Primary error type for all courier operations.
#[derive(Error, Debug, Clone)]
pub enum CourierError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("HTTP {status}: {reason}")]
    HttpStatus { status: u16, reason: String },

    #[error("Credential refresh failed: {0}")]
    AuthRefreshFailed(AuthError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Transport sessions have been invalidated")]
    SessionInvalidated,

    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Broad classification surfaced to callers of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum ErrorKind {
    /// Opaque failure from the transport engine.
    Transport,
    /// Synthesized from a 4xx/5xx response that had no transport error.
    HttpStatus,
    /// The reauthentication collaborator reported an error.
    AuthRefreshFailed,
    Other,
}

impl CourierError {
    /// Build an `HttpStatus` error carrying the standard reason phrase.
    pub fn http_status(status: u16) -> Self {
        Self::HttpStatus {
            status,
            reason: reason_phrase(status).to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(_) => ErrorKind::Transport,
            Self::HttpStatus { .. } => ErrorKind::HttpStatus,
            Self::AuthRefreshFailed(_) => ErrorKind::AuthRefreshFailed,
            _ => ErrorKind::Other,
        }
    }

    /// The HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the same request has a reasonable chance of succeeding later.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(err) => err.kind != TransportErrorKind::Cancelled,
            Self::HttpStatus { status, .. } => matches!(status, 408 | 429 | 500..=599),
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Transport(err) if err.kind == TransportErrorKind::Cancelled)
    }
}

impl From<std::io::Error> for CourierError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error.to_string())
    }
}

impl From<serde_json::Error> for CourierError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

impl From<reqwest::Error> for CourierError {
    fn from(error: reqwest::Error) -> Self {
        Self::Transport(TransportError::from(error))
    }
}

/// True iff `400 <= status < 600`.
///
/// A status of 0 stands for "no HTTP response" (a transport-only failure) and
/// is never an HTTP error.
pub fn status_is_error(status: u16) -> bool {
    (400..600).contains(&status)
}

/// Standard reason phrase for a status code.
pub fn reason_phrase(status: u16) -> &'static str {
    reqwest::StatusCode::from_u16(status)
        .ok()
        .and_then(|code| code.canonical_reason())
        .unwrap_or(match status {
            400..=499 => "Client Error",
            500..=599 => "Server Error",
            _ => "Unknown Status",
        })
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, CourierError>;
