//! Reauthentication collaborators.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::Deserialize;

use super::credential::Credential;
use super::error::AuthError;
use crate::controller::RequestController;
use crate::error::CourierError;
use crate::request::{HttpMethod, RequestBody};

/// Produces a fresh credential when the current one is missing or expired.
///
/// The controller guarantees at most one `reauthenticate` call is in flight.
#[async_trait]
pub trait Reauthenticator: Send + Sync {
    /// Key under which the controller persists credentials. `None` lets the
    /// controller derive one from its base URL.
    fn credential_identifier(&self) -> Option<String> {
        None
    }

    async fn reauthenticate(&self, current: Option<Credential>) -> Result<Credential, AuthError>;
}

/// OAuth2 `refresh_token` grant against a token endpoint.
///
/// Token requests go through their own [`RequestController`], which should
/// not itself be configured with a reauthenticator.
///
/// # Example
/// ```no_run
/// use courier::auth::OAuth2RefreshClient;
/// use courier::config::ControllerConfig;
/// use courier::controller::RequestController;
///
/// # async fn demo() -> courier::Result<()> {
/// let tokens = RequestController::builder(ControllerConfig::new("https://auth.example.com")).build()?;
/// let refresh = OAuth2RefreshClient::new(tokens, "oauth/token", "my-client");
/// # Ok(())
/// # }
/// ```
pub struct OAuth2RefreshClient {
    controller: RequestController,
    token_path: String,
    client_id: String,
    client_secret: Option<String>,
    scope: Option<String>,
    identifier: Option<String>,
}

impl OAuth2RefreshClient {
    pub fn new(
        controller: RequestController,
        token_path: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Self {
        Self {
            controller,
            token_path: token_path.into(),
            client_id: client_id.into(),
            client_secret: None,
            scope: None,
            identifier: None,
        }
    }

    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn with_credential_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    fn form(&self, refresh_token: &str) -> String {
        let mut pairs = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.as_str()),
        ];
        if let Some(secret) = &self.client_secret {
            pairs.push(("client_secret", secret.as_str()));
        }
        if let Some(scope) = &self.scope {
            pairs.push(("scope", scope.as_str()));
        }
        form_encode(&pairs)
    }
}

#[async_trait]
impl Reauthenticator for OAuth2RefreshClient {
    fn credential_identifier(&self) -> Option<String> {
        self.identifier.clone()
    }

    async fn reauthenticate(&self, current: Option<Credential>) -> Result<Credential, AuthError> {
        let current = current.unwrap_or_default();
        let refresh_token = current
            .refresh_token
            .clone()
            .ok_or(AuthError::MissingRefreshToken)?;

        let descriptor = self
            .controller
            .descriptor(HttpMethod::Post, &self.token_path, &[])
            .and_then(|descriptor| {
                descriptor.with_header("accept", "application/json").with_body(
                    RequestBody::bytes(
                        self.form(&refresh_token),
                        "application/x-www-form-urlencoded",
                    ),
                    None,
                )
            })
            .map_err(|err| AuthError::Request(err.to_string()))?;

        let outcome = self.controller.send(descriptor).await;
        if let Some(error) = outcome.error {
            return Err(match error.into_inner() {
                CourierError::HttpStatus { status: 400 | 401, .. } => AuthError::ExpiredOrInvalidGrant,
                CourierError::HttpStatus { status, .. } => AuthError::Rejected { status },
                other => AuthError::Network(other.to_string()),
            });
        }

        let payload: TokenResponse = serde_json::from_slice(&outcome.response.body)
            .map_err(|err| AuthError::InvalidResponse(format!("token response: {err}")))?;
        tracing::info!(token_type = %payload.token_type, expires_in = ?payload.expires_in, "credential refreshed");
        Ok(payload.into_credential(current))
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_token_type")]
    token_type: String,
    expires_in: Option<i64>,
    refresh_token: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl TokenResponse {
    /// The server may omit a new refresh token; the old one stays valid then.
    fn into_credential(self, previous: Credential) -> Credential {
        Credential {
            username: previous.username,
            password: previous.password,
            access_token: Some(self.access_token),
            token_type: Some(self.token_type),
            refresh_token: self.refresh_token.or(previous.refresh_token),
            expires_at: self
                .expires_in
                .map(|seconds| Utc::now() + Duration::seconds(seconds)),
        }
    }
}

fn form_encode(pairs: &[(&str, &str)]) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}
