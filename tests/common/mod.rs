//! Shared test helpers: a scripted transport engine, a scripted
//! reauthenticator and a counting activity indicator.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use tokio::sync::mpsc;

use courier::auth::{AuthChallenge, AuthError, ChallengeDisposition, Credential, Reauthenticator};
use courier::config::ControllerConfig;
use courier::controller::{
    CallbackExecutor, Completion, ControllerBuilder, Outcome, SerialExecutor,
};
use courier::controller::RequestController;
use courier::transport::{
    ActivityIndicator, RawResponse, SessionKind, TaskEvents, TransportEngine, TransportError, TransportRequest,
};

pub const BASE_URL: &str = "https://api.example.com";

/// One scripted engine reply.
#[derive(Debug, Clone)]
pub struct MockReply {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub error: Option<TransportError>,
    pub redirect_status: Option<u16>,
    pub progress: Vec<(u64, Option<u64>)>,
    pub challenge: Option<String>,
    pub delay: Option<Duration>,
    pub hang: bool,
}

impl MockReply {
    pub fn status(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
            error: None,
            redirect_status: None,
            progress: Vec::new(),
            challenge: None,
            delay: None,
            hang: false,
        }
    }

    pub fn json(status: u16, value: serde_json::Value) -> Self {
        Self::status(status)
            .with_header("content-type", "application/json")
            .with_body(value.to_string())
    }

    pub fn failure(error: TransportError) -> Self {
        Self {
            error: Some(error),
            ..Self::status(0)
        }
    }

    /// Never completes on its own; only cancellation ends it.
    pub fn hang() -> Self {
        Self {
            hang: true,
            ..Self::status(200)
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Report an intermediate redirect response before the final one.
    pub fn redirected_from(mut self, status: u16) -> Self {
        self.redirect_status = Some(status);
        self
    }

    pub fn with_progress(mut self, done: u64, total: Option<u64>) -> Self {
        self.progress.push((done, total));
        self
    }

    /// Raise an authentication challenge with this `WWW-Authenticate` value
    /// twice, as a server rejecting the first answer would.
    pub fn with_challenge(mut self, header: &str) -> Self {
        self.challenge = Some(header.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// Transport engine that replays scripted replies keyed by URL path.
///
/// Replies for a path are consumed in order; the last one repeats. Paths
/// without a script get an empty 200.
#[derive(Default)]
pub struct MockEngine {
    scripts: Mutex<HashMap<String, VecDeque<MockReply>>>,
    requests: Mutex<Vec<TransportRequest>>,
    challenges: Mutex<Vec<ChallengeDisposition>>,
    resets: Mutex<Vec<SessionKind>>,
}

impl MockEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on(&self, path: &str, reply: MockReply) {
        self.scripts
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push_back(reply);
    }

    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_paths(&self) -> Vec<String> {
        self.requests()
            .iter()
            .map(|request| request.url.path().to_string())
            .collect()
    }

    pub fn challenges(&self) -> Vec<ChallengeDisposition> {
        self.challenges.lock().unwrap().clone()
    }

    pub fn resets(&self) -> Vec<SessionKind> {
        self.resets.lock().unwrap().clone()
    }

    fn next_reply(&self, path: &str) -> MockReply {
        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(path) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) => queue.front().cloned().unwrap_or_else(|| MockReply::status(200)),
            None => MockReply::status(200),
        }
    }
}

#[async_trait]
impl TransportEngine for MockEngine {
    async fn perform(
        &self,
        request: TransportRequest,
        events: &TaskEvents,
    ) -> Result<RawResponse, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        let reply = self.next_reply(request.url.path());
        if reply.hang {
            std::future::pending::<()>().await;
        }
        if let Some(delay) = reply.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(header) = &reply.challenge {
            let host = request.url.host_str().unwrap_or_default().to_string();
            for failures in 0..2 {
                let challenge = AuthChallenge::from_header(host.clone(), header, failures);
                let disposition = events.challenge(&challenge);
                self.challenges.lock().unwrap().push(disposition);
            }
        }
        if let Some(status) = reply.redirect_status {
            let mut origin = request.url.clone();
            origin.set_path(&format!("{}-old", request.url.path()));
            events.redirect(
                RawResponse::new(origin, status).with_header("location", request.url.as_str()),
            );
        }
        for (done, total) in &reply.progress {
            events.progress(*done, *total);
        }
        if let Some(error) = reply.error {
            return Err(error);
        }
        let mut response = RawResponse::new(request.url.clone(), reply.status).with_body(reply.body);
        for (name, value) in &reply.headers {
            response = response.with_header(name, value.as_str());
        }
        Ok(response)
    }

    fn reset_session(&self, kind: SessionKind) {
        self.resets.lock().unwrap().push(kind);
    }
}

/// Reauthenticator that answers with a fixed result after a delay and
/// counts its calls.
pub struct ScriptedReauth {
    calls: AtomicUsize,
    delay: Duration,
    result: Result<Credential, AuthError>,
    identifier: Option<String>,
}

impl ScriptedReauth {
    pub fn succeeding(credential: Credential, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay,
            result: Ok(credential),
            identifier: None,
        })
    }

    pub fn failing(error: AuthError, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay,
            result: Err(error),
            identifier: None,
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Reauthenticator for ScriptedReauth {
    fn credential_identifier(&self) -> Option<String> {
        self.identifier.clone()
    }

    async fn reauthenticate(&self, _current: Option<Credential>) -> Result<Credential, AuthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.result.clone()
    }
}

/// Activity indicator that counts `show` and `hide` calls.
#[derive(Default)]
pub struct CountingActivity {
    shows: AtomicUsize,
    hides: AtomicUsize,
}

impl CountingActivity {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn shows(&self) -> usize {
        self.shows.load(Ordering::SeqCst)
    }

    pub fn hides(&self) -> usize {
        self.hides.load(Ordering::SeqCst)
    }
}

impl ActivityIndicator for CountingActivity {
    fn show(&self) {
        self.shows.fetch_add(1, Ordering::SeqCst);
    }

    fn hide(&self) {
        self.hides.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn url(path: &str) -> Url {
    Url::parse(BASE_URL).unwrap().join(path).unwrap()
}

pub fn test_executor() -> Arc<dyn CallbackExecutor> {
    Arc::new(SerialExecutor::spawn("test-callbacks").expect("spawn callback thread"))
}

/// Builder wired to `engine` with a private serial callback executor.
pub fn builder(engine: &Arc<MockEngine>) -> ControllerBuilder {
    RequestController::builder(ControllerConfig::new(BASE_URL))
        .with_engine(engine.clone())
        .with_executor(test_executor())
}

pub fn controller(engine: &Arc<MockEngine>) -> RequestController {
    builder(engine).build().expect("controller")
}

/// A completion that forwards outcomes to a channel.
pub fn collector() -> (Completion, mpsc::UnboundedReceiver<Outcome>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let completion: Completion = Arc::new(move |outcome: Outcome| {
        let _ = tx.send(outcome);
    });
    (completion, rx)
}

pub async fn next_outcome(rx: &mut mpsc::UnboundedReceiver<Outcome>) -> Outcome {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("outcome within 5s")
        .expect("completion channel open")
}

/// Assert nothing further arrives within a short grace period.
pub async fn assert_no_more(rx: &mut mpsc::UnboundedReceiver<Outcome>) {
    let extra = tokio::time::timeout(Duration::from_millis(150), rx.recv()).await;
    assert!(!matches!(extra, Ok(Some(_))), "unexpected extra outcome: {extra:?}");
}
