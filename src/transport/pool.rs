//! The three transport sessions and their live tasks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

use chrono::{DateTime, Utc};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{
    deliver, RawResponse, SessionDelegate, SessionEvent, SessionKind, TaskEvents,
    TransportEngine, TransportError, TransportRequest,
};
use crate::error::{CourierError, Result};
use crate::request::{RequestDescriptor, TaskId};

/// External "network activity in progress" indicator. `show` and `hide` are
/// called once per task, paired.
pub trait ActivityIndicator: Send + Sync {
    fn show(&self);
    fn hide(&self);
}

/// Handle to a dispatched transport task.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    id: TaskId,
    session: SessionKind,
    token: CancellationToken,
}

impl TaskHandle {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn session(&self) -> SessionKind {
        self.session
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

struct LiveTask {
    tag: i64,
    token: CancellationToken,
}

type LiveTasks = Arc<Mutex<HashMap<TaskId, LiveTask>>>;

fn lock_live(live: &LiveTasks) -> MutexGuard<'_, HashMap<TaskId, LiveTask>> {
    live.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Session {
    kind: SessionKind,
    events: mpsc::UnboundedSender<SessionEvent>,
    live: LiveTasks,
}

impl Session {
    /// Open a session with its own serial event loop.
    fn open(kind: SessionKind, runtime: &Handle, delegate: Weak<dyn SessionDelegate>) -> Self {
        let (events, mut rx) = mpsc::unbounded_channel::<SessionEvent>();
        runtime.spawn(async move {
            while let Some(event) = rx.recv().await {
                let Some(delegate) = delegate.upgrade() else {
                    break;
                };
                deliver(delegate.as_ref(), event);
            }
            tracing::trace!(session = %kind, "session event loop finished");
        });
        Self {
            kind,
            events,
            live: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn cancel_matching(&self, mut predicate: impl FnMut(&LiveTask) -> bool) -> usize {
        let mut live = lock_live(&self.live);
        let matching: Vec<TaskId> = live
            .iter()
            .filter(|(_, task)| predicate(task))
            .map(|(id, _)| *id)
            .collect();
        for id in &matching {
            if let Some(task) = live.remove(id) {
                task.token.cancel();
            }
        }
        matching.len()
    }
}

struct SessionSet {
    standard: Session,
    ephemeral: Session,
    background: Session,
}

impl SessionSet {
    fn open(runtime: &Handle, delegate: &Weak<dyn SessionDelegate>) -> Self {
        Self {
            standard: Session::open(SessionKind::Standard, runtime, delegate.clone()),
            ephemeral: Session::open(SessionKind::Ephemeral, runtime, delegate.clone()),
            background: Session::open(SessionKind::Background, runtime, delegate.clone()),
        }
    }

    fn get(&self, kind: SessionKind) -> &Session {
        match kind {
            SessionKind::Standard => &self.standard,
            SessionKind::Ephemeral => &self.ephemeral,
            SessionKind::Background => &self.background,
        }
    }

    fn iter(&self) -> impl Iterator<Item = &Session> {
        [&self.standard, &self.ephemeral, &self.background].into_iter()
    }
}

/// Owns the standard, ephemeral and background sessions.
///
/// Each session has one serial event loop; events for different sessions may
/// interleave. After [`invalidate_and_cancel`](Self::invalidate_and_cancel)
/// every dispatch fails with [`CourierError::SessionInvalidated`].
pub struct TransportSessionPool {
    engine: Arc<dyn TransportEngine>,
    runtime: Handle,
    delegate: Weak<dyn SessionDelegate>,
    activity: Option<Arc<dyn ActivityIndicator>>,
    sessions: RwLock<Option<SessionSet>>,
}

impl TransportSessionPool {
    /// Tasks and session event loops are spawned onto `runtime`.
    pub fn new(
        engine: Arc<dyn TransportEngine>,
        runtime: Handle,
        delegate: Weak<dyn SessionDelegate>,
        activity: Option<Arc<dyn ActivityIndicator>>,
    ) -> Self {
        let sessions = SessionSet::open(&runtime, &delegate);
        Self {
            engine,
            runtime,
            delegate,
            activity,
            sessions: RwLock::new(Some(sessions)),
        }
    }

    /// Start `request` on its session. Terminal results arrive through the
    /// delegate's `on_complete`.
    pub fn dispatch(
        &self,
        descriptor: &RequestDescriptor,
        request: TransportRequest,
    ) -> Result<TaskHandle> {
        let (handle, live, sender) = self.register(descriptor, &request)?;
        let events = TaskEvents::queued(handle.id, sender, self.delegate.clone());
        let engine = self.engine.clone();
        let activity = self.activity.clone();
        let token = handle.token.clone();
        let not_before = descriptor.not_before();
        let id = handle.id;
        self.runtime.spawn(async move {
            let result = run_task(engine.as_ref(), request, &events, &token, not_before).await;
            lock_live(&live).remove(&id);
            if let Some(activity) = &activity {
                activity.hide();
            }
            events.complete(result);
        });
        Ok(handle)
    }

    /// Run `request` to completion on the current task, applying its
    /// progress and redirect events directly instead of via the session loop.
    pub async fn perform_inline(
        &self,
        descriptor: &RequestDescriptor,
        request: TransportRequest,
    ) -> Result<std::result::Result<RawResponse, TransportError>> {
        let (handle, live, _) = self.register(descriptor, &request)?;
        let events = TaskEvents::inline(handle.id, self.delegate.clone());
        let result = run_task(
            self.engine.as_ref(),
            request,
            &events,
            &handle.token,
            descriptor.not_before(),
        )
        .await;
        lock_live(&live).remove(&handle.id);
        if let Some(activity) = &self.activity {
            activity.hide();
        }
        Ok(result)
    }

    fn register(
        &self,
        descriptor: &RequestDescriptor,
        request: &TransportRequest,
    ) -> Result<(TaskHandle, LiveTasks, mpsc::UnboundedSender<SessionEvent>)> {
        let guard = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        let set = guard.as_ref().ok_or(CourierError::SessionInvalidated)?;
        let session = set.get(request.session);
        let token = descriptor
            .cancellation()
            .map(CancellationToken::child_token)
            .unwrap_or_default();
        lock_live(&session.live).insert(
            request.task_id,
            LiveTask {
                tag: descriptor.tag(),
                token: token.clone(),
            },
        );
        if let Some(activity) = &self.activity {
            activity.show();
        }
        tracing::debug!(
            task_id = %request.task_id,
            session = %session.kind,
            tag = descriptor.tag(),
            "task dispatched"
        );
        Ok((
            TaskHandle {
                id: request.task_id,
                session: session.kind,
                token,
            },
            session.live.clone(),
            session.events.clone(),
        ))
    }

    /// Cancel every live task whose descriptor carries `tag`. Returns how
    /// many were cancelled.
    pub fn cancel_by_tag(&self, tag: i64) -> usize {
        let guard = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        guard
            .as_ref()
            .map(|set| {
                set.iter()
                    .map(|session| session.cancel_matching(|task| task.tag == tag))
                    .sum()
            })
            .unwrap_or(0)
    }

    /// Cancel everything and replace all three sessions with fresh ones.
    pub fn cancel_all(&self) {
        let previous = {
            let mut guard = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
            if guard.is_none() {
                return;
            }
            guard.replace(SessionSet::open(&self.runtime, &self.delegate))
        };
        if let Some(previous) = previous {
            self.tear_down(previous);
        }
    }

    /// Cancel everything without reconstruction.
    pub fn invalidate_and_cancel(&self) {
        let previous = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(previous) = previous {
            self.tear_down(previous);
        }
    }

    fn tear_down(&self, sessions: SessionSet) {
        let cancelled: usize = sessions
            .iter()
            .map(|session| session.cancel_matching(|_| true))
            .sum();
        for kind in SessionKind::ALL {
            self.engine.reset_session(kind);
        }
        tracing::debug!(cancelled, "transport sessions torn down");
    }

    pub fn is_invalidated(&self) -> bool {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Live tasks per session, as `(id, session, tag)`.
    pub fn live_tasks(&self) -> Vec<(TaskId, SessionKind, i64)> {
        let guard = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        let Some(set) = guard.as_ref() else {
            return Vec::new();
        };
        let mut tasks: Vec<_> = set
            .iter()
            .flat_map(|session| {
                lock_live(&session.live)
                    .iter()
                    .map(|(id, task)| (*id, session.kind, task.tag))
                    .collect::<Vec<_>>()
            })
            .collect();
        tasks.sort_by_key(|(id, _, _)| *id);
        tasks
    }
}

async fn run_task(
    engine: &dyn TransportEngine,
    request: TransportRequest,
    events: &TaskEvents,
    token: &CancellationToken,
    not_before: Option<DateTime<Utc>>,
) -> std::result::Result<RawResponse, TransportError> {
    let work = async {
        if let Some(at) = not_before {
            let wait = (at - Utc::now()).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;
        }
        engine.perform(request, events).await
    };
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(TransportError::cancelled()),
        result = work => result,
    }
}
