//! Errors bundled with named recovery actions.

use std::fmt;
use std::sync::Arc;

use strum::{Display, EnumString};

use super::{CourierError, ErrorKind};

/// Handler run when a recovery action is chosen.
pub type RecoveryHandler = Arc<dyn Fn() + Send + Sync>;

/// Named recovery options offered alongside a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum RecoveryAction {
    /// Re-run the full scheduling path with the identical request and completion.
    Retry,
    /// Dismiss the error. Does nothing.
    Cancel,
}

/// An ordered set of recovery actions and their handlers.
#[derive(Clone, Default)]
pub struct ErrorRecoveryAttempter {
    options: Vec<(RecoveryAction, RecoveryHandler)>,
}

impl ErrorRecoveryAttempter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) the handler for `action`.
    pub fn with_option(mut self, action: RecoveryAction, handler: RecoveryHandler) -> Self {
        self.options.retain(|(existing, _)| *existing != action);
        self.options.push((action, handler));
        self
    }

    pub fn options(&self) -> Vec<RecoveryAction> {
        self.options.iter().map(|(action, _)| *action).collect()
    }

    /// Run the handler for `action`. Returns `false` if the action is not offered.
    pub fn attempt(&self, action: RecoveryAction) -> bool {
        match self.options.iter().find(|(existing, _)| *existing == action) {
            Some((_, handler)) => {
                handler();
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for ErrorRecoveryAttempter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorRecoveryAttempter")
            .field("options", &self.options())
            .finish()
    }
}

/// The error value delivered to completions: the underlying failure plus
/// `retry`/`cancel` options.
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use courier::error::{CourierError, ErrorRecoveryAttempter, RecoverableError, RecoveryAction};
///
/// let attempter = ErrorRecoveryAttempter::new()
///     .with_option(RecoveryAction::Cancel, Arc::new(|| {}));
/// let err = RecoverableError::new(CourierError::http_status(404), attempter);
/// assert_eq!(err.options(), vec![RecoveryAction::Cancel]);
/// assert!(err.cancel());
/// assert!(!err.retry());
/// ```
#[derive(Clone)]
pub struct RecoverableError {
    error: CourierError,
    attempter: ErrorRecoveryAttempter,
}

impl RecoverableError {
    pub fn new(error: CourierError, attempter: ErrorRecoveryAttempter) -> Self {
        Self { error, attempter }
    }

    pub fn error(&self) -> &CourierError {
        &self.error
    }

    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }

    pub fn options(&self) -> Vec<RecoveryAction> {
        self.attempter.options()
    }

    pub fn attempt_recovery(&self, action: RecoveryAction) -> bool {
        self.attempter.attempt(action)
    }

    pub fn retry(&self) -> bool {
        self.attempt_recovery(RecoveryAction::Retry)
    }

    pub fn cancel(&self) -> bool {
        self.attempt_recovery(RecoveryAction::Cancel)
    }

    pub fn into_inner(self) -> CourierError {
        self.error
    }
}

impl fmt::Debug for RecoverableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoverableError")
            .field("error", &self.error)
            .field("options", &self.attempter.options())
            .finish()
    }
}

impl fmt::Display for RecoverableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.error.fmt(f)
    }
}

impl std::error::Error for RecoverableError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}
