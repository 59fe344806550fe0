//! OAuth2 refresh gate.
//!
//! Every outgoing request passes through [`OAuth2Gate::admit`]. When the
//! current credential is missing or expired, the first request flips the gate
//! to [`GateState::Refreshing`] and becomes responsible for running the
//! reauthenticator. That request is parked in the gate as the refresh
//! trigger; everything that arrives while the flag is set is queued under the
//! same lock. [`OAuth2Gate::finish_refresh`] hands back the trigger (unless it
//! was purged) and then the queue in arrival order.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use super::credential::Credential;
use super::error::AuthError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum GateState {
    Idle,
    Refreshing,
}

/// Result of presenting a request to the gate.
#[derive(Debug)]
pub enum Admission<T> {
    /// No reauthenticator configured, or the credential is valid.
    Proceed(T),
    /// A refresh is already in flight; the request now sits in the queue.
    Queued,
    /// This request started a refresh and is held as its trigger. The caller
    /// must run the reauthenticator with `credential` and report back through
    /// [`OAuth2Gate::finish_refresh`].
    Refresh { credential: Option<Credential> },
}

/// What a finished refresh hands back for dispatch.
#[derive(Debug, PartialEq, Eq)]
pub struct Replay<T> {
    /// The request that started the refresh; `None` if it was purged.
    pub trigger: Option<T>,
    /// Requests that arrived during the refresh, in arrival order.
    pub queued: Vec<T>,
}

struct GateInner<T> {
    state: GateState,
    credential: Option<Credential>,
    trigger: Option<T>,
    queue: VecDeque<T>,
}

/// Single-flight credential refresh state machine.
pub struct OAuth2Gate<T> {
    inner: Mutex<GateInner<T>>,
    reauthenticates: bool,
}

impl<T> OAuth2Gate<T> {
    /// `reauthenticates` is false when no OAuth2 collaborator is configured,
    /// in which case every request passes straight through.
    pub fn new(credential: Option<Credential>, reauthenticates: bool) -> Self {
        Self {
            inner: Mutex::new(GateInner {
                state: GateState::Idle,
                credential,
                trigger: None,
                queue: VecDeque::new(),
            }),
            reauthenticates,
        }
    }

    fn lock(&self) -> MutexGuard<'_, GateInner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn admit(&self, request: T) -> Admission<T> {
        self.admit_at(request, Utc::now())
    }

    pub fn admit_at(&self, request: T, now: DateTime<Utc>) -> Admission<T> {
        if !self.reauthenticates {
            return Admission::Proceed(request);
        }
        let mut inner = self.lock();
        match inner.state {
            GateState::Refreshing => {
                inner.queue.push_back(request);
                Admission::Queued
            }
            GateState::Idle => {
                let valid = inner
                    .credential
                    .as_ref()
                    .is_some_and(|credential| !credential.has_expired_at(now));
                if valid {
                    Admission::Proceed(request)
                } else {
                    // Set before the reauthenticator runs: a token request
                    // routed back through this gate must queue, not recurse.
                    inner.state = GateState::Refreshing;
                    inner.trigger = Some(request);
                    Admission::Refresh {
                        credential: inner.credential.clone(),
                    }
                }
            }
        }
    }

    /// Leave `Refreshing`, install the new credential on success, and return
    /// the trigger and the queued requests for replay.
    pub fn finish_refresh(&self, result: &Result<Credential, AuthError>) -> Replay<T> {
        let mut inner = self.lock();
        if let Ok(credential) = result {
            inner.credential = Some(credential.clone());
        }
        inner.state = GateState::Idle;
        Replay {
            trigger: inner.trigger.take(),
            queued: inner.queue.drain(..).collect(),
        }
    }

    pub fn state(&self) -> GateState {
        self.lock().state
    }

    pub fn credential(&self) -> Option<Credential> {
        self.lock().credential.clone()
    }

    pub fn set_credential(&self, credential: Option<Credential>) {
        self.lock().credential = credential;
    }

    pub fn queued_len(&self) -> usize {
        self.lock().queue.len()
    }

    /// Remove and return every waiting request matching `predicate`: the
    /// trigger first, then the queue in arrival order.
    pub fn purge(&self, mut predicate: impl FnMut(&T) -> bool) -> Vec<T> {
        let mut inner = self.lock();
        let mut purged = Vec::new();
        if inner.trigger.as_ref().is_some_and(&mut predicate) {
            purged.extend(inner.trigger.take());
        }
        let mut kept = VecDeque::with_capacity(inner.queue.len());
        for request in inner.queue.drain(..) {
            if predicate(&request) {
                purged.push(request);
            } else {
                kept.push_back(request);
            }
        }
        inner.queue = kept;
        purged
    }
}
