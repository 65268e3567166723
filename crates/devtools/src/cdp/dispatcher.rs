//! Event Dispatcher - ordered callback registry
//!
//! Design decisions:
//! 1. Callbacks for one event name run strictly in registration order, each
//!    awaited to completion before the next starts
//! 2. Every event name gets its own queue + worker task, so a slow callback
//!    only delays later callbacks of the *same* event, never the socket read
//! 3. A failing or panicking callback is logged and skipped, never fatal
//!
//! Want fire-and-forget? Spawn your own task inside a thin callback.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::protocol::CDPEvent;

/// Outcome of one callback invocation
pub type CallbackResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Event subscriber callback
pub type EventCallback = Arc<dyn Fn(CDPEvent) -> BoxFuture<'static, CallbackResult> + Send + Sync>;

/// Opaque registration handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackId(u64);

impl fmt::Display for CallbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cb-{}", self.0)
    }
}

#[derive(Clone)]
struct CallbackRegistration {
    id: CallbackId,
    callback: EventCallback,
    temporary: bool,
}

/// Registrations per event name, plus the reverse index for removal
#[derive(Default)]
struct Registry {
    by_event: HashMap<String, Vec<CallbackRegistration>>,
    index: HashMap<CallbackId, String>,
}

impl Registry {
    fn remove(&mut self, id: CallbackId) -> bool {
        let Some(event_name) = self.index.remove(&id) else {
            return false;
        };
        if let Some(registrations) = self.by_event.get_mut(&event_name) {
            registrations.retain(|r| r.id != id);
            if registrations.is_empty() {
                self.by_event.remove(&event_name);
            }
        }
        true
    }
}

struct DispatcherInner {
    next_id: AtomicU64,
    registry: Mutex<Registry>,
    /// One sequential worker per event name
    queues: DashMap<String, mpsc::UnboundedSender<CDPEvent>>,
}

/// Event name → ordered callbacks
#[derive(Clone)]
pub struct EventDispatcher {
    inner: Arc<DispatcherInner>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                next_id: AtomicU64::new(1),
                registry: Mutex::new(Registry::default()),
                queues: DashMap::new(),
            }),
        }
    }

    /// Register a callback; temporary callbacks fire at most once
    pub fn register(
        &self,
        event_name: impl Into<String>,
        callback: EventCallback,
        temporary: bool,
    ) -> CallbackId {
        let event_name = event_name.into();
        let id = CallbackId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));

        let mut registry = self.inner.registry.lock();
        registry.index.insert(id, event_name.clone());
        registry
            .by_event
            .entry(event_name.clone())
            .or_default()
            .push(CallbackRegistration {
                id,
                callback,
                temporary,
            });
        drop(registry);

        tracing::debug!(%id, event = %event_name, temporary, "Registered callback");
        id
    }

    /// Register an async closure
    pub fn register_fn<F, Fut>(
        &self,
        event_name: impl Into<String>,
        callback: F,
        temporary: bool,
    ) -> CallbackId
    where
        F: Fn(CDPEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallbackResult> + Send + 'static,
    {
        let callback: EventCallback = Arc::new(move |event: CDPEvent| callback(event).boxed());
        self.register(event_name, callback, temporary)
    }

    /// Remove a registration; unknown ids are a no-op
    pub fn remove(&self, id: CallbackId) -> bool {
        let removed = self.inner.registry.lock().remove(id);
        if removed {
            tracing::debug!(%id, "Removed callback");
        }
        removed
    }

    /// Drop every registration
    pub fn clear(&self) {
        let mut registry = self.inner.registry.lock();
        registry.by_event.clear();
        registry.index.clear();
    }

    /// Drop registrations and stop the per-event workers
    pub fn shutdown(&self) {
        self.clear();
        self.inner.queues.clear();
    }

    pub fn callback_count(&self, event_name: &str) -> usize {
        self.inner
            .registry
            .lock()
            .by_event
            .get(event_name)
            .map_or(0, Vec::len)
    }

    pub fn is_registered(&self, id: CallbackId) -> bool {
        self.inner.registry.lock().index.contains_key(&id)
    }

    /// Hand an event to its name's worker without waiting for callbacks
    ///
    /// Called from the receive loop. Must run inside a tokio runtime.
    pub fn enqueue(&self, event: CDPEvent) {
        if self.callback_count(&event.method) == 0 {
            tracing::trace!(event = %event.method, "No callbacks registered");
            return;
        }

        let method = event.method.clone();
        let mut event = Some(event);

        // A worker whose receiver is gone hands the event back; respawn once
        for _ in 0..2 {
            let sender = self
                .inner
                .queues
                .entry(method.clone())
                .or_insert_with(|| self.spawn_worker(&method))
                .clone();

            let Some(pending) = event.take() else {
                return;
            };
            match sender.send(pending) {
                Ok(()) => return,
                Err(mpsc::error::SendError(returned)) => {
                    self.inner.queues.remove(&method);
                    event = Some(returned);
                }
            }
        }
        tracing::warn!(event = %method, "Dropping event, dispatch worker unavailable");
    }

    fn spawn_worker(&self, event_name: &str) -> mpsc::UnboundedSender<CDPEvent> {
        let (tx, mut rx) = mpsc::unbounded_channel::<CDPEvent>();
        let dispatcher = self.clone();
        let event_name = event_name.to_string();

        tokio::spawn(async move {
            tracing::trace!(event = %event_name, "Dispatch worker started");
            while let Some(event) = rx.recv().await {
                dispatcher.process_event(event).await;
            }
            tracing::trace!(event = %event_name, "Dispatch worker stopped");
        });

        tx
    }

    /// Run every matching callback in registration order, one at a time
    pub async fn process_event(&self, event: CDPEvent) {
        let snapshot: Vec<CallbackRegistration> = self
            .inner
            .registry
            .lock()
            .by_event
            .get(&event.method)
            .cloned()
            .unwrap_or_default();

        for registration in snapshot {
            // Skip callbacks removed by an earlier sibling; claim temporaries up front
            let still_registered = if registration.temporary {
                self.inner.registry.lock().remove(registration.id)
            } else {
                self.is_registered(registration.id)
            };
            if !still_registered {
                continue;
            }

            let callback = registration.callback.clone();
            let payload = event.clone();
            let outcome = AssertUnwindSafe(async move { callback(payload).await })
                .catch_unwind()
                .await;

            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(
                        id = %registration.id,
                        event = %event.method,
                        error = %e,
                        "Event callback failed"
                    );
                }
                Err(_) => {
                    tracing::error!(
                        id = %registration.id,
                        event = %event.method,
                        "Event callback panicked"
                    );
                }
            }
        }
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}
