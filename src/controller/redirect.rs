use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use crate::request::TaskId;
use crate::transport::RawResponse;

/// Remembers the pre-redirect response per task until the final response is built.
///
/// Redirects are always followed; recording never blocks them. When a task
/// redirects more than once, the most recent intermediate response is kept.
#[derive(Debug, Default)]
pub struct RedirectTracker {
    records: Mutex<HashMap<TaskId, RawResponse>>,
}

impl RedirectTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, id: TaskId, response: RawResponse) {
        tracing::debug!(task_id = %id, status = response.status, url = %response.url, "redirect");
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, response);
    }

    /// Return and forget the recorded response for `id`.
    pub fn take_and_clear(&self, id: TaskId) -> Option<RawResponse> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
