use thiserror::Error;

/// Credential and refresh failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Not authenticated")]
    NotAuthenticated,
    #[error("Expired or invalid grant")]
    ExpiredOrInvalidGrant,
    #[error("Credential has no refresh token")]
    MissingRefreshToken,
    #[error("Token endpoint rejected the request with status {status}")]
    Rejected { status: u16 },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Token request failed: {0}")]
    Request(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for AuthError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error.to_string())
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

impl From<toml::de::Error> for AuthError {
    fn from(error: toml::de::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

impl From<toml::ser::Error> for AuthError {
    fn from(error: toml::ser::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}
