//! The request controller: verb API, OAuth2 gating, transport dispatch and
//! completion delivery.
//!
//! Every request follows the same path. It passes the [`OAuth2Gate`], gets a
//! fresh [`TaskId`] and is registered, runs on one of the transport sessions,
//! and its terminal event is turned into an [`Outcome`] that is delivered
//! exactly once on the callback executor.

pub mod dispatcher;
pub mod events;
pub mod executor;
pub mod redirect;
pub mod registry;

pub use dispatcher::Response;
pub use events::{ControllerEvent, EventObserver, ObserverId, ObserverRegistry};
pub use executor::{main_executor, CallbackExecutor, InlineExecutor, Job, SerialExecutor};
pub use redirect::RedirectTracker;
pub use registry::{Registration, TaskRegistry};

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

use chrono::{DateTime, Utc};
use reqwest::Url;
use tokio::runtime::Handle;
use tokio::sync::oneshot;

use crate::auth::{
    respond_to_challenge, Admission, AuthChallenge, AuthError, ChallengeDisposition, Credential,
    CredentialStore, GateState, OAuth2Gate, Reauthenticator, Replay,
};
use crate::config::ControllerConfig;
use crate::error::{
    CourierError, ErrorRecoveryAttempter, RecoverableError, RecoveryAction, RecoveryHandler, Result,
};
use crate::request::{
    set_user_agent, HttpMethod, RequestBody, RequestDescriptor, TaskId, TransferKind, UploadSource,
};
use crate::transport::{
    ActivityIndicator, RawResponse, ReqwestEngine, SessionDelegate, SessionKind, TransportEngine,
    TransportError, TransportRequest, TransportSessionPool,
};

/// What a completion receives: the response (status 0 if none arrived) and,
/// on failure, the error with its recovery options.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub response: Response,
    pub error: Option<RecoverableError>,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn into_result(self) -> std::result::Result<Response, RecoverableError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.response),
        }
    }

    fn unrecoverable(url: Url, error: CourierError) -> Self {
        Self {
            response: Response::empty(url),
            error: Some(RecoverableError::new(error, ErrorRecoveryAttempter::new())),
        }
    }
}

/// Bytes transferred so far for one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub task_id: TaskId,
    pub bytes_done: u64,
    pub bytes_total: Option<u64>,
}

impl Progress {
    pub fn fraction(&self) -> Option<f64> {
        match self.bytes_total {
            Some(0) | None => None,
            Some(total) => Some(self.bytes_done as f64 / total as f64),
        }
    }
}

pub type Completion = Arc<dyn Fn(Outcome) + Send + Sync>;
pub type ProgressHandler = Arc<dyn Fn(Progress) + Send + Sync>;

type Waiter = Arc<Mutex<Option<oneshot::Sender<Outcome>>>>;

/// A request plus everything needed to deliver, retry or replay it.
#[derive(Clone)]
struct Submission {
    descriptor: Arc<RequestDescriptor>,
    completion: Completion,
    progress: Option<ProgressHandler>,
    /// Set for `send`/`send_blocking`: the first outcome goes to the waiting
    /// caller instead of the executor.
    waiter: Option<Waiter>,
}

impl Submission {
    fn new(
        descriptor: Arc<RequestDescriptor>,
        completion: Completion,
        progress: Option<ProgressHandler>,
    ) -> Self {
        Self {
            descriptor,
            completion,
            progress,
            waiter: None,
        }
    }

    fn waiting(descriptor: Arc<RequestDescriptor>) -> (Self, oneshot::Receiver<Outcome>) {
        let (tx, rx) = oneshot::channel();
        let submission = Self {
            descriptor,
            completion: Arc::new(|_: Outcome| {}),
            progress: None,
            waiter: Some(Arc::new(Mutex::new(Some(tx)))),
        };
        (submission, rx)
    }

    fn take_waiter(&self) -> Option<oneshot::Sender<Outcome>> {
        self.waiter
            .as_ref()
            .and_then(|waiter| waiter.lock().unwrap_or_else(PoisonError::into_inner).take())
    }
}

struct InFlight {
    submission: Submission,
    headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DispatchMode {
    /// Run on a session; events arrive on its loop.
    Session,
    /// Run on the calling task.
    Inline,
}

struct Prepared {
    id: TaskId,
    descriptor: Arc<RequestDescriptor>,
    request: TransportRequest,
}

/// Builder for [`RequestController`].
pub struct ControllerBuilder {
    config: ControllerConfig,
    engine: Option<Arc<dyn TransportEngine>>,
    reauthenticator: Option<Arc<dyn Reauthenticator>>,
    store: Option<Arc<dyn CredentialStore>>,
    credential: Option<Credential>,
    executor: Option<Arc<dyn CallbackExecutor>>,
    activity: Option<Arc<dyn ActivityIndicator>>,
    runtime: Option<Handle>,
}

impl ControllerBuilder {
    fn new(config: ControllerConfig) -> Self {
        Self {
            config,
            engine: None,
            reauthenticator: None,
            store: None,
            credential: None,
            executor: None,
            activity: None,
            runtime: None,
        }
    }

    /// Replace the default [`ReqwestEngine`].
    pub fn with_engine(mut self, engine: Arc<dyn TransportEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn with_reauthenticator(mut self, reauthenticator: Arc<dyn Reauthenticator>) -> Self {
        self.reauthenticator = Some(reauthenticator);
        self
    }

    pub fn with_credential_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Start with `credential` instead of loading one from the store.
    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    /// Where completions, progress and observers run. Defaults to
    /// [`main_executor`].
    pub fn with_executor(mut self, executor: Arc<dyn CallbackExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn with_activity_indicator(mut self, activity: Arc<dyn ActivityIndicator>) -> Self {
        self.activity = Some(activity);
        self
    }

    /// Runtime for transport tasks. Defaults to the current one.
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> Result<RequestController> {
        let base_url = self.config.parsed_base_url()?;
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|err| {
                CourierError::Configuration(format!("controller needs a tokio runtime: {err}"))
            })?,
        };
        if let Some(agent) = &self.config.user_agent {
            set_user_agent(Some(agent.clone()));
        }
        let identifier = self
            .reauthenticator
            .as_ref()
            .and_then(|reauthenticator| reauthenticator.credential_identifier())
            .unwrap_or_else(|| self.config.credential_identifier());
        let credential = match (self.credential, &self.store) {
            (Some(credential), _) => Some(credential),
            (None, Some(store)) => store.retrieve(&identifier).unwrap_or_else(|err| {
                tracing::warn!(identifier = %identifier, error = %err, "could not load stored credential");
                None
            }),
            (None, None) => None,
        };
        let engine = self.engine.unwrap_or_else(|| {
            Arc::new(ReqwestEngine::new(
                self.config.request_timeout(),
                self.config.download_directory(),
            ))
        });
        let executor = self.executor.unwrap_or_else(main_executor);
        let gate = OAuth2Gate::new(credential, self.reauthenticator.is_some());
        let default_headers = self
            .config
            .default_headers
            .iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value.clone()))
            .collect();
        let activity = self.activity;
        let config = self.config;
        let reauthenticator = self.reauthenticator;
        let store = self.store;

        let inner = Arc::new_cyclic(|this: &Weak<ControllerInner>| {
            let delegate: Weak<dyn SessionDelegate> = this.clone();
            ControllerInner {
                this: this.clone(),
                pool: TransportSessionPool::new(engine, runtime.clone(), delegate, activity),
                config,
                base_url,
                identifier,
                default_headers: RwLock::new(default_headers),
                gate,
                reauthenticator,
                store,
                registry: TaskRegistry::new(),
                in_flight: Mutex::new(HashMap::new()),
                redirects: RedirectTracker::new(),
                observers: Arc::new(ObserverRegistry::new()),
                executor,
                runtime,
            }
        });
        tracing::debug!(base_url = %inner.base_url, identifier = %inner.identifier, "request controller ready");
        Ok(RequestController { inner })
    }
}

/// Client-side HTTP request orchestration.
///
/// Cloning is cheap; clones share sessions, credential and registries.
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use courier::config::ControllerConfig;
/// use courier::controller::{Outcome, RequestController};
///
/// # async fn demo() -> courier::Result<()> {
/// let controller = RequestController::new(ControllerConfig::new("https://api.example.com"))?;
/// controller.get("users/1", &[("verbose", "true")], Arc::new(|outcome: Outcome| {
///     println!("status {}", outcome.response.status);
/// }))?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RequestController {
    inner: Arc<ControllerInner>,
}

impl RequestController {
    pub fn builder(config: ControllerConfig) -> ControllerBuilder {
        ControllerBuilder::new(config)
    }

    pub fn new(config: ControllerConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.inner.config
    }

    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    /// Key under which the credential is persisted.
    pub fn credential_identifier(&self) -> &str {
        &self.inner.identifier
    }

    /// A descriptor for `path` under the base URL, for callers that need to
    /// set a tag, headers or a cancellation token before [`submit`](Self::submit).
    pub fn descriptor(
        &self,
        method: HttpMethod,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<RequestDescriptor> {
        RequestDescriptor::compose(method, &self.inner.base_url, path, query)
    }

    pub fn get(
        &self,
        path: &str,
        query: &[(&str, &str)],
        completion: Completion,
    ) -> Result<Arc<RequestDescriptor>> {
        self.data(HttpMethod::Get, path, query, RequestBody::Empty, None, completion)
    }

    pub fn head(
        &self,
        path: &str,
        query: &[(&str, &str)],
        completion: Completion,
    ) -> Result<Arc<RequestDescriptor>> {
        self.data(HttpMethod::Head, path, query, RequestBody::Empty, None, completion)
    }

    pub fn delete(
        &self,
        path: &str,
        query: &[(&str, &str)],
        completion: Completion,
    ) -> Result<Arc<RequestDescriptor>> {
        self.data(HttpMethod::Delete, path, query, RequestBody::Empty, None, completion)
    }

    pub fn post(
        &self,
        path: &str,
        body: RequestBody,
        content_type: Option<&str>,
        completion: Completion,
    ) -> Result<Arc<RequestDescriptor>> {
        self.data(HttpMethod::Post, path, &[], body, content_type, completion)
    }

    pub fn put(
        &self,
        path: &str,
        body: RequestBody,
        content_type: Option<&str>,
        completion: Completion,
    ) -> Result<Arc<RequestDescriptor>> {
        self.data(HttpMethod::Put, path, &[], body, content_type, completion)
    }

    pub fn patch(
        &self,
        path: &str,
        body: RequestBody,
        content_type: Option<&str>,
        completion: Completion,
    ) -> Result<Arc<RequestDescriptor>> {
        self.data(HttpMethod::Patch, path, &[], body, content_type, completion)
    }

    fn data(
        &self,
        method: HttpMethod,
        path: &str,
        query: &[(&str, &str)],
        body: RequestBody,
        content_type: Option<&str>,
        completion: Completion,
    ) -> Result<Arc<RequestDescriptor>> {
        let descriptor = self
            .descriptor(method, path, query)?
            .with_body(body, content_type)?;
        Ok(self.submit(descriptor, completion, None))
    }

    /// Download `path` on the background session. The file lands at
    /// `destination`, or in the download directory when `None`; its location
    /// is reported in [`Response::file`].
    pub fn download_file(
        &self,
        path: &str,
        destination: Option<PathBuf>,
        not_before: Option<DateTime<Utc>>,
        on_progress: Option<ProgressHandler>,
        on_complete: Completion,
    ) -> Result<Arc<RequestDescriptor>> {
        let mut descriptor = self
            .descriptor(HttpMethod::Get, path, &[])?
            .with_transfer(TransferKind::Download { destination });
        if let Some(at) = not_before {
            descriptor = descriptor.with_not_before(at);
        }
        Ok(self.submit(descriptor, on_complete, on_progress))
    }

    /// Upload `source` to `path` with `method` (usually POST or PUT).
    /// In-memory payloads use the standard session, files the background one.
    pub fn upload_file(
        &self,
        method: HttpMethod,
        path: &str,
        source: UploadSource,
        content_type: Option<&str>,
        on_progress: Option<ProgressHandler>,
        on_complete: Completion,
    ) -> Result<Arc<RequestDescriptor>> {
        let mut descriptor = self
            .descriptor(method, path, &[])?
            .with_transfer(TransferKind::Upload(source));
        if let Some(content_type) = content_type {
            descriptor = descriptor.with_header("content-type", content_type);
        }
        Ok(self.submit(descriptor, on_complete, on_progress))
    }

    /// Schedule `descriptor` and return it for later cancellation by tag.
    pub fn submit(
        &self,
        descriptor: RequestDescriptor,
        completion: Completion,
        progress: Option<ProgressHandler>,
    ) -> Arc<RequestDescriptor> {
        let descriptor = Arc::new(descriptor);
        self.inner
            .schedule(Submission::new(descriptor.clone(), completion, progress));
        descriptor
    }

    /// Schedule `descriptor` and wait for its outcome.
    ///
    /// Choosing `retry` on the returned error re-runs the request; that
    /// outcome reaches observers and logs only.
    pub async fn send(&self, descriptor: RequestDescriptor) -> Outcome {
        let descriptor = Arc::new(descriptor);
        let url = descriptor.url().clone();
        let (submission, rx) = Submission::waiting(descriptor);
        self.inner.schedule(submission);
        rx.await.unwrap_or_else(|_| {
            Outcome::unrecoverable(url, CourierError::Transport(TransportError::cancelled()))
        })
    }

    /// Run `descriptor` on the calling thread: transport events and
    /// dispatcher logic are applied inline and the outcome is returned.
    ///
    /// Must be called from outside the runtime (it blocks on the runtime
    /// handle), and the runtime must be multi-threaded so that a request
    /// queued behind a refresh can still be replayed.
    pub fn send_blocking(&self, descriptor: RequestDescriptor) -> Outcome {
        let descriptor = Arc::new(descriptor);
        let url = descriptor.url().clone();
        let (submission, rx) = Submission::waiting(descriptor);
        let inner = self.inner.clone();
        let received = self.inner.runtime.block_on(async move {
            inner.run_blocking(submission).await;
            rx.await
        });
        received.unwrap_or_else(|_| {
            Outcome::unrecoverable(url, CourierError::Transport(TransportError::cancelled()))
        })
    }

    /// Cancel dispatched tasks and queued requests carrying `tag`. Returns
    /// how many were cancelled.
    pub fn cancel_by_tag(&self, tag: i64) -> usize {
        let cancelled = self.inner.pool.cancel_by_tag(tag);
        let purged = self.inner.purge_queued(|submission| submission.descriptor.tag() == tag);
        tracing::info!(tag, cancelled, purged, "cancelled by tag");
        cancelled + purged
    }

    /// Cancel everything and start over with fresh sessions.
    pub fn cancel_all(&self) {
        self.inner.pool.cancel_all();
        let purged = self.inner.purge_queued(|_| true);
        tracing::info!(purged, "cancelled all requests");
    }

    /// Cancel everything and refuse further requests.
    pub fn invalidate_and_cancel(&self) {
        self.inner.pool.invalidate_and_cancel();
        let purged = self.inner.purge_queued(|_| true);
        tracing::info!(purged, "transport sessions invalidated");
    }

    pub fn is_invalidated(&self) -> bool {
        self.inner.pool.is_invalidated()
    }

    pub fn credential(&self) -> Option<Credential> {
        self.inner.gate.credential()
    }

    /// Replace the credential and persist it (or clear it with `None`).
    pub fn set_credential(&self, credential: Option<Credential>) -> std::result::Result<(), AuthError> {
        self.inner.gate.set_credential(credential.clone());
        let Some(store) = &self.inner.store else {
            return Ok(());
        };
        match credential {
            Some(credential) => store.store(&credential, &self.inner.identifier),
            None => store.clear(&self.inner.identifier),
        }
    }

    pub fn default_headers(&self) -> BTreeMap<String, String> {
        self.inner
            .default_headers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Set (or remove, with `None`) a header merged into every request.
    pub fn set_default_header(&self, name: &str, value: Option<String>) {
        let mut headers = self
            .inner
            .default_headers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let name = name.to_ascii_lowercase();
        match value {
            Some(value) => headers.insert(name, value),
            None => headers.remove(&name),
        };
    }

    pub fn add_observer(&self, observer: EventObserver) -> ObserverId {
        self.inner.observers.add(observer)
    }

    pub fn remove_observer(&self, id: ObserverId) -> bool {
        self.inner.observers.remove(id)
    }

    pub fn gate_state(&self) -> GateState {
        self.inner.gate.state()
    }

    pub fn queued_len(&self) -> usize {
        self.inner.gate.queued_len()
    }

    /// Dispatched tasks that have not completed, as `(id, session, tag)`.
    pub fn live_tasks(&self) -> Vec<(TaskId, SessionKind, i64)> {
        self.inner.pool.live_tasks()
    }
}

struct ControllerInner {
    this: Weak<ControllerInner>,
    config: ControllerConfig,
    base_url: Url,
    identifier: String,
    default_headers: RwLock<BTreeMap<String, String>>,
    gate: OAuth2Gate<Submission>,
    reauthenticator: Option<Arc<dyn Reauthenticator>>,
    store: Option<Arc<dyn CredentialStore>>,
    pool: TransportSessionPool,
    registry: TaskRegistry<Completion, ProgressHandler>,
    in_flight: Mutex<HashMap<TaskId, InFlight>>,
    redirects: RedirectTracker,
    observers: Arc<ObserverRegistry>,
    executor: Arc<dyn CallbackExecutor>,
    runtime: Handle,
}

impl ControllerInner {
    fn in_flight(&self) -> MutexGuard<'_, HashMap<TaskId, InFlight>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn schedule(self: &Arc<Self>, submission: Submission) {
        match self.gate.admit(submission) {
            Admission::Proceed(submission) => self.dispatch(submission),
            Admission::Queued => {
                tracing::debug!(queued = self.gate.queued_len(), "request queued behind credential refresh");
            }
            Admission::Refresh { credential } => {
                let inner = self.clone();
                self.runtime
                    .spawn(inner.refresh(credential, DispatchMode::Session));
            }
        }
    }

    async fn run_blocking(self: &Arc<Self>, submission: Submission) {
        match self.gate.admit(submission) {
            Admission::Proceed(submission) => {
                let prepared = self.prepare(submission);
                self.perform_inline(prepared).await;
            }
            Admission::Queued => {
                tracing::debug!("blocking request queued behind credential refresh");
            }
            Admission::Refresh { credential } => {
                self.clone().refresh(credential, DispatchMode::Inline).await;
            }
        }
    }

    /// Run the reauthenticator, then dispatch the triggering request and
    /// replay the queue behind it in arrival order. A trigger cancelled while
    /// the refresh ran has already been completed by the purge.
    async fn refresh(self: Arc<Self>, credential: Option<Credential>, mode: DispatchMode) {
        tracing::info!("refreshing credential");
        let result = match &self.reauthenticator {
            Some(reauthenticator) => reauthenticator.reauthenticate(credential).await,
            None => Err(AuthError::NotAuthenticated),
        };
        let Replay { trigger, queued } = self.gate.finish_refresh(&result);
        if trigger.is_none() {
            tracing::debug!("refresh trigger was cancelled");
        }
        match result {
            Ok(credential) => {
                self.persist(&credential);
                let prepared = trigger.map(|trigger| self.prepare(trigger));
                match mode {
                    DispatchMode::Session => {
                        if let Some(prepared) = prepared {
                            self.start(prepared);
                        }
                        self.replay(queued);
                    }
                    DispatchMode::Inline => {
                        self.replay(queued);
                        if let Some(prepared) = prepared {
                            self.perform_inline(prepared).await;
                        }
                    }
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, queued = queued.len(), "credential refresh failed");
                if let Some(trigger) = trigger {
                    self.fail(trigger, CourierError::AuthRefreshFailed(err));
                }
                self.replay(queued);
            }
        }
    }

    fn replay(self: &Arc<Self>, queued: Vec<Submission>) {
        if !queued.is_empty() {
            tracing::debug!(count = queued.len(), "replaying queued requests");
        }
        for submission in queued {
            self.schedule(submission);
        }
    }

    fn persist(&self, credential: &Credential) {
        if let Some(store) = &self.store {
            if let Err(err) = store.store(credential, &self.identifier) {
                tracing::warn!(identifier = %self.identifier, error = %err, "could not persist credential");
            }
        }
    }

    fn outgoing_headers(&self, descriptor: &RequestDescriptor) -> BTreeMap<String, String> {
        let mut headers = {
            let defaults = self
                .default_headers
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            descriptor.merged_headers(&defaults)
        };
        if !headers.contains_key("authorization") {
            if let Some(value) = self
                .gate
                .credential()
                .and_then(|credential| credential.authorization_header())
            {
                headers.insert("authorization".to_string(), value);
            }
        }
        headers
    }

    /// Assign a fresh task id and register the submission's handlers before
    /// anything can complete.
    fn prepare(&self, submission: Submission) -> Prepared {
        let id = TaskId::next();
        let descriptor = submission.descriptor.clone();
        descriptor.assign_task_id(id);
        let headers = self.outgoing_headers(&descriptor);
        let request = TransportRequest {
            task_id: id,
            session: SessionKind::for_descriptor(&descriptor, self.config.ephemeral_data),
            method: descriptor.method(),
            url: descriptor.url().clone(),
            headers: headers.clone(),
            body: descriptor.body().to_vec(),
            transfer: descriptor.transfer().clone(),
        };
        self.registry.register(
            id,
            submission.completion.clone(),
            submission.progress.clone(),
        );
        self.in_flight().insert(
            id,
            InFlight {
                submission,
                headers,
            },
        );
        Prepared {
            id,
            descriptor,
            request,
        }
    }

    fn dispatch(self: &Arc<Self>, submission: Submission) {
        let prepared = self.prepare(submission);
        self.start(prepared);
    }

    fn start(&self, prepared: Prepared) {
        let Prepared {
            id,
            descriptor,
            request,
        } = prepared;
        if let Err(err) = self.pool.dispatch(&descriptor, request) {
            self.abort(id, err);
        }
    }

    async fn perform_inline(&self, prepared: Prepared) {
        let Prepared {
            id,
            descriptor,
            request,
        } = prepared;
        match self.pool.perform_inline(&descriptor, request).await {
            Ok(result) => self.complete(id, result),
            Err(err) => self.abort(id, err),
        }
    }

    /// The pool refused a prepared task; deliver `error` in its place.
    fn abort(&self, id: TaskId, error: CourierError) {
        let Some(flight) = self.in_flight().remove(&id) else {
            return;
        };
        tracing::warn!(task_id = %id, request = %flight.submission.descriptor.request_line(), error = %error, "dispatch failed");
        let response = Response::empty(flight.submission.descriptor.url().clone());
        self.registry.deliver_terminal(id, |completion| {
            self.deliver(&flight.submission, completion, response, Some(error))
        });
    }

    /// Complete a submission that never reached the transport.
    fn fail(&self, submission: Submission, error: CourierError) {
        tracing::warn!(request = %submission.descriptor.request_line(), error = %error, "request failed before dispatch");
        let response = Response::empty(submission.descriptor.url().clone());
        let completion = submission.completion.clone();
        self.deliver(&submission, completion, response, Some(error));
    }

    fn purge_queued(&self, predicate: impl FnMut(&Submission) -> bool) -> usize {
        let purged = self.gate.purge(predicate);
        let count = purged.len();
        for submission in purged {
            self.fail(submission, CourierError::Transport(TransportError::cancelled()));
        }
        count
    }

    fn complete(&self, id: TaskId, result: std::result::Result<RawResponse, TransportError>) {
        let Some(flight) = self.in_flight().remove(&id) else {
            tracing::debug!(task_id = %id, "completion for unknown task ignored");
            return;
        };
        let descriptor = flight.submission.descriptor.clone();
        let redirect = self.redirects.take_and_clear(id);
        let (response, error) = dispatcher::build(descriptor.url(), result, redirect);
        dispatcher::log_exchange(&descriptor, &flight.headers, &response, error.as_ref());
        self.notify_observers(&descriptor, &response, error.as_ref());
        self.registry.deliver_terminal(id, |completion| {
            self.deliver(&flight.submission, completion, response, error)
        });
    }

    fn notify_observers(
        &self,
        descriptor: &Arc<RequestDescriptor>,
        response: &Response,
        error: Option<&CourierError>,
    ) {
        if self.observers.is_empty() {
            return;
        }
        let response = Arc::new(response.clone());
        let received = ControllerEvent::ResponseReceived {
            descriptor: descriptor.clone(),
            response: response.clone(),
        };
        let server_error = match error {
            Some(error @ CourierError::HttpStatus { .. }) => Some(ControllerEvent::ServerError {
                descriptor: descriptor.clone(),
                response,
                error: error.clone(),
            }),
            _ => None,
        };
        let observers = self.observers.clone();
        self.executor.execute(Box::new(move || {
            observers.emit(&received);
            if let Some(event) = &server_error {
                observers.emit(event);
            }
        }));
    }

    fn deliver(
        &self,
        submission: &Submission,
        completion: Completion,
        response: Response,
        error: Option<CourierError>,
    ) {
        let outcome = Outcome {
            response,
            error: error.map(|error| self.recoverable(error, submission)),
        };
        let outcome = match submission.take_waiter() {
            Some(waiter) => match waiter.send(outcome) {
                Ok(()) => return,
                Err(outcome) => outcome,
            },
            None => outcome,
        };
        self.executor
            .execute(Box::new(move || completion(outcome)));
    }

    fn recoverable(&self, error: CourierError, submission: &Submission) -> RecoverableError {
        let cancel: RecoveryHandler = Arc::new(|| {});
        let mut attempter = ErrorRecoveryAttempter::new();
        // A waiter-backed submission has nobody left to receive a rerun.
        let retryable = submission.waiter.is_none();
        if let Some(inner) = self.this.upgrade().filter(|_| retryable) {
            let replay = submission.clone();
            let retry: RecoveryHandler = Arc::new(move || {
                tracing::info!(request = %replay.descriptor.request_line(), "retrying request");
                inner.schedule(replay.clone());
            });
            attempter = attempter.with_option(RecoveryAction::Retry, retry);
        }
        RecoverableError::new(error, attempter.with_option(RecoveryAction::Cancel, cancel))
    }
}

impl SessionDelegate for ControllerInner {
    fn on_progress(&self, id: TaskId, done: u64, total: Option<u64>) {
        let executor = self.executor.clone();
        self.registry.deliver_progress(id, |handler| {
            let handler = handler.clone();
            let progress = Progress {
                task_id: id,
                bytes_done: done,
                bytes_total: total,
            };
            executor.execute(Box::new(move || handler(progress)));
        });
    }

    fn on_redirect(&self, id: TaskId, response: RawResponse) {
        self.redirects.record(id, response);
    }

    fn on_challenge(&self, id: TaskId, challenge: &AuthChallenge) -> ChallengeDisposition {
        let disposition = respond_to_challenge(challenge, self.gate.credential().as_ref());
        tracing::debug!(
            task_id = %id,
            host = %challenge.host,
            failures = challenge.previous_failure_count,
            answered = matches!(disposition, ChallengeDisposition::UseCredential(_)),
            "authentication challenge"
        );
        disposition
    }

    fn on_complete(&self, id: TaskId, result: std::result::Result<RawResponse, TransportError>) {
        self.complete(id, result);
    }
}
