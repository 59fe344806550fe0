//! Credential values and their HTTP authorization forms.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Authentication material held by the controller.
///
/// Either half may be present: a username/password pair, a bearer-style
/// token (with type, expiry and refresh token), or both.
///
/// # Example
/// ```
/// use chrono::{Duration, Utc};
/// use courier::auth::Credential;
///
/// let credential = Credential::bearer("access")
///     .with_refresh_token("refresh")
///     .with_expires_at(Utc::now() + Duration::hours(1));
/// assert!(!credential.has_expired());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub username: Option<String>,
    pub password: Option<String>,
    pub access_token: Option<String>,
    pub token_type: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
            ..Self::default()
        }
    }

    pub fn bearer(access_token: impl Into<String>) -> Self {
        Self {
            access_token: Some(access_token.into()),
            token_type: Some("Bearer".to_string()),
            ..Self::default()
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn with_token_type(mut self, token_type: impl Into<String>) -> Self {
        self.token_type = Some(token_type.into());
        self
    }

    /// `now > expires_at`; a credential without expiry never expires.
    pub fn has_expired(&self) -> bool {
        self.has_expired_at(Utc::now())
    }

    pub fn has_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|expiry| now > expiry).unwrap_or(false)
    }

    /// Value for the `Authorization` header, if this credential can produce one.
    ///
    /// Tokens win over username/password.
    pub fn authorization_header(&self) -> Option<String> {
        if let Some(token) = &self.access_token {
            let token_type = self.token_type.as_deref().unwrap_or("Bearer");
            return Some(format!("{token_type} {token}"));
        }
        self.transport_credential()
            .map(|basic| format!("Basic {}", STANDARD.encode(format!("{}:{}", basic.username, basic.password))))
    }

    /// The username/password pair offered to authentication challenges.
    pub fn transport_credential(&self) -> Option<TransportCredential> {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => Some(TransportCredential {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        }
    }
}

/// Username/password pair handed to the transport engine for a challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportCredential {
    pub username: String,
    pub password: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn absent_expiry_never_expires() {
        let credential = Credential::bearer("token");
        assert!(!credential.has_expired_at(Utc::now() + Duration::days(3650)));
    }

    #[test]
    fn expiry_is_strictly_after() {
        let expiry = Utc::now();
        let credential = Credential::bearer("token").with_expires_at(expiry);
        assert!(!credential.has_expired_at(expiry));
        assert!(credential.has_expired_at(expiry + Duration::seconds(1)));
    }

    #[test]
    fn authorization_header_prefers_token() {
        let mut credential = Credential::basic("alice", "secret");
        assert_eq!(
            credential.authorization_header().as_deref(),
            Some("Basic YWxpY2U6c2VjcmV0")
        );
        credential.access_token = Some("abc".to_string());
        credential.token_type = Some("MAC".to_string());
        assert_eq!(credential.authorization_header().as_deref(), Some("MAC abc"));
    }

    #[test]
    fn transport_credential_requires_both_halves() {
        let credential = Credential {
            username: Some("alice".to_string()),
            ..Credential::default()
        };
        assert!(credential.transport_credential().is_none());
        assert!(credential.authorization_header().is_none());
    }
}
