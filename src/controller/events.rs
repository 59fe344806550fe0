//! Controller-wide notifications for observers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use super::dispatcher::Response;
use crate::error::CourierError;
use crate::request::RequestDescriptor;

/// Broadcast after a request reaches its terminal state.
#[derive(Debug, Clone)]
pub enum ControllerEvent {
    /// Every completed request, successful or not.
    ResponseReceived {
        descriptor: Arc<RequestDescriptor>,
        response: Arc<Response>,
    },
    /// A completed request whose status was 4xx or 5xx.
    ServerError {
        descriptor: Arc<RequestDescriptor>,
        response: Arc<Response>,
        error: CourierError,
    },
}

impl ControllerEvent {
    pub fn descriptor(&self) -> &Arc<RequestDescriptor> {
        match self {
            Self::ResponseReceived { descriptor, .. } | Self::ServerError { descriptor, .. } => {
                descriptor
            }
        }
    }

    pub fn response(&self) -> &Arc<Response> {
        match self {
            Self::ResponseReceived { response, .. } | Self::ServerError { response, .. } => response,
        }
    }
}

pub type EventObserver = Arc<dyn Fn(&ControllerEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Subscribers to [`ControllerEvent`]s.
#[derive(Default)]
pub struct ObserverRegistry {
    next: AtomicU64,
    observers: RwLock<Vec<(ObserverId, EventObserver)>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, observer: EventObserver) -> ObserverId {
        let id = ObserverId(self.next.fetch_add(1, Ordering::Relaxed));
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, observer));
        id
    }

    pub fn remove(&self, id: ObserverId) -> bool {
        let mut observers = self
            .observers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    pub fn is_empty(&self) -> bool {
        self.observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    /// Call every observer in subscription order. The list is snapshotted
    /// first so an observer may subscribe or unsubscribe while handling.
    pub fn emit(&self, event: &ControllerEvent) {
        let observers: Vec<EventObserver> = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, observer)| observer.clone())
            .collect();
        for observer in observers {
            observer(event);
        }
    }
}
