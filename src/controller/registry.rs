//! Per-task completion and progress handlers.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::request::TaskId;

/// Whether a registration replaced an existing entry for the same task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Inserted,
    Replaced,
}

struct Entry<C, P> {
    completion: C,
    progress: Option<P>,
}

/// Maps task identifiers to their `(completion, progress)` handlers.
///
/// Generic over the handler types so the delivery contract can be exercised
/// independently of the controller's callback signatures.
pub struct TaskRegistry<C, P> {
    entries: Mutex<HashMap<TaskId, Entry<C, P>>>,
}

impl<C, P> Default for TaskRegistry<C, P> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<C, P> TaskRegistry<C, P> {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TaskId, Entry<C, P>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store handlers for `id`. Task ids are unique per in-flight transfer, so
    /// a second registration is logged and the newer handlers replace the
    /// older ones.
    pub fn register(&self, id: TaskId, completion: C, progress: Option<P>) -> Registration {
        let previous = self.lock().insert(
            id,
            Entry {
                completion,
                progress,
            },
        );
        match previous {
            Some(_) => {
                tracing::warn!(task_id = %id, "task already registered; replacing its handlers");
                Registration::Replaced
            }
            None => Registration::Inserted,
        }
    }

    /// Invoke the progress handler for `id` if one is registered.
    ///
    /// The handler runs outside the registry lock.
    pub fn deliver_progress(&self, id: TaskId, invoke: impl FnOnce(&P)) -> bool
    where
        P: Clone,
    {
        let progress = self.lock().get(&id).and_then(|entry| entry.progress.clone());
        match progress {
            Some(progress) => {
                invoke(&progress);
                true
            }
            None => false,
        }
    }

    /// Remove the entry for `id` and hand its completion to `invoke`. A
    /// repeat terminal event for the same id finds nothing and does nothing.
    pub fn deliver_terminal(&self, id: TaskId, invoke: impl FnOnce(C)) -> bool {
        let entry = self.lock().remove(&id);
        match entry {
            Some(entry) => {
                invoke(entry.completion);
                true
            }
            None => {
                tracing::debug!(task_id = %id, "terminal event for unknown task ignored");
                false
            }
        }
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
