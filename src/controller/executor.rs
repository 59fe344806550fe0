//! Execution contexts for caller-facing callbacks.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};

use tokio::sync::mpsc;

/// A unit of callback work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Where completions, progress handlers and observers run.
pub trait CallbackExecutor: Send + Sync {
    fn execute(&self, job: Job);
}

/// Runs jobs one at a time, in submission order, on a dedicated thread.
pub struct SerialExecutor {
    sender: mpsc::UnboundedSender<Job>,
}

impl SerialExecutor {
    pub fn spawn(name: impl Into<String>) -> std::io::Result<Self> {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();
        let name = name.into();
        std::thread::Builder::new().name(name.clone()).spawn(move || {
            while let Some(job) = receiver.blocking_recv() {
                if catch_unwind(AssertUnwindSafe(job)).is_err() {
                    tracing::error!(executor = %name, "callback panicked");
                }
            }
        })?;
        Ok(Self { sender })
    }
}

impl CallbackExecutor for SerialExecutor {
    fn execute(&self, job: Job) {
        if self.sender.send(job).is_err() {
            tracing::error!("callback executor thread has exited; callback dropped");
        }
    }
}

/// Runs jobs immediately on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl CallbackExecutor for InlineExecutor {
    fn execute(&self, job: Job) {
        job();
    }
}

static MAIN_EXECUTOR: OnceLock<Arc<dyn CallbackExecutor>> = OnceLock::new();

/// The process-wide default callback context: a single serial thread.
pub fn main_executor() -> Arc<dyn CallbackExecutor> {
    MAIN_EXECUTOR
        .get_or_init(|| match SerialExecutor::spawn("courier-main") {
            Ok(executor) => Arc::new(executor),
            Err(err) => {
                tracing::warn!(error = %err, "could not start callback thread; running callbacks inline");
                Arc::new(InlineExecutor)
            }
        })
        .clone()
}
