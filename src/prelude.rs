//! Convenience re-exports for common use.

pub use crate::auth::{Credential, CredentialStore, FileCredentialStore, Reauthenticator};
pub use crate::config::ControllerConfig;
pub use crate::controller::{
    Completion, ControllerEvent, Outcome, Progress, ProgressHandler, RequestController, Response,
};
pub use crate::error::{CourierError, RecoverableError, RecoveryAction, Result};
pub use crate::request::{HttpMethod, RequestBody, RequestDescriptor, TransferKind, UploadSource};
pub use crate::transport::{SessionKind, TransportEngine};
