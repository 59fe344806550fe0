//! Credentials, their storage, and the OAuth2 refresh gate.

pub mod challenge;
pub mod credential;
pub mod error;
pub mod gate;
pub mod oauth2;
pub mod store;

pub use challenge::{respond_to_challenge, AuthChallenge, ChallengeDisposition};
pub use credential::{Credential, TransportCredential};
pub use error::AuthError;
pub use gate::{Admission, GateState, OAuth2Gate, Replay};
pub use oauth2::{OAuth2RefreshClient, Reauthenticator};
pub use store::{CredentialStore, FileCredentialStore, MemoryCredentialStore};
