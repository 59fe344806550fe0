//! Authentication challenge policy.

use super::credential::{Credential, TransportCredential};

/// A server authentication challenge raised by the transport engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    pub host: String,
    pub scheme: String,
    pub realm: Option<String>,
    /// How many times this challenge has already been answered and failed.
    pub previous_failure_count: u32,
}

impl AuthChallenge {
    /// Parse a `WWW-Authenticate` header value (`Basic realm="api"`).
    pub fn from_header(host: impl Into<String>, header: &str, previous_failure_count: u32) -> Self {
        let header = header.trim();
        let (scheme, params) = header.split_once(' ').unwrap_or((header, ""));
        let realm = params.split(',').find_map(|param| {
            let (key, value) = param.trim().split_once('=')?;
            key.trim()
                .eq_ignore_ascii_case("realm")
                .then(|| value.trim().trim_matches('"').to_string())
        });
        Self {
            host: host.into(),
            scheme: scheme.to_string(),
            realm,
            previous_failure_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeDisposition {
    UseCredential(TransportCredential),
    PerformDefaultHandling,
}

/// Offer the current credential on the first failure only; defer to default
/// handling afterwards, or when there is nothing to offer.
pub fn respond_to_challenge(
    challenge: &AuthChallenge,
    credential: Option<&Credential>,
) -> ChallengeDisposition {
    if challenge.previous_failure_count > 0 {
        return ChallengeDisposition::PerformDefaultHandling;
    }
    credential
        .and_then(Credential::transport_credential)
        .map(ChallengeDisposition::UseCredential)
        .unwrap_or(ChallengeDisposition::PerformDefaultHandling)
}
