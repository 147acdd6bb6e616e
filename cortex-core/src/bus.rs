//! Synchronous named-event bus with teardown callbacks.
//!
//! Handlers run in registration order on the caller's thread. A handler
//! returning an error is logged and does not stop later handlers, so
//! observers can veto by mutating the event payload rather than by
//! raising.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::errors::CortexResult;

pub type HandlerId = u64;

type Handler<T> = Arc<dyn Fn(&mut T) -> CortexResult<()> + Send + Sync>;
type FiniFn = Box<dyn FnOnce() + Send>;

/// Lifecycle + pub/sub substrate. Owned as an explicit value by its
/// consumer, never a process-wide singleton.
pub struct EventBus<T> {
    handlers: RwLock<HashMap<String, Vec<(HandlerId, Handler<T>)>>>,
    finis: Mutex<Vec<FiniFn>>,
    next_id: AtomicU64,
    done: AtomicBool,
}

impl<T> EventBus<T> {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            finis: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            done: AtomicBool::new(false),
        }
    }

    /// Register a handler for a named event. The returned id unregisters.
    pub fn on(
        &self,
        event: &str,
        handler: impl Fn(&mut T) -> CortexResult<()> + Send + Sync + 'static,
    ) -> HandlerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut map = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        map.entry(event.to_string())
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a previously registered handler.
    pub fn off(&self, event: &str, id: HandlerId) {
        let mut map = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        if let Some(list) = map.get_mut(event) {
            list.retain(|(hid, _)| *hid != id);
        }
    }

    /// Fire an event. Handlers run in registration order on this thread;
    /// a failing handler is logged and the rest still run.
    pub fn fire(&self, event: &str, info: &mut T) {
        let snapshot: Vec<(HandlerId, Handler<T>)> = {
            let map = self.handlers.read().unwrap_or_else(|e| e.into_inner());
            map.get(event).cloned().unwrap_or_default()
        };
        for (id, handler) in snapshot {
            if let Err(err) = handler(info) {
                tracing::warn!(event, handler = id, error = %err, "event handler failed");
            }
        }
    }

    /// Register a teardown callback, run once by `fini`.
    pub fn onfini(&self, callback: impl FnOnce() + Send + 'static) {
        let mut finis = self.finis.lock().unwrap_or_else(|e| e.into_inner());
        finis.push(Box::new(callback));
    }

    /// Idempotent teardown: the first call runs the callbacks in
    /// registration order, later calls are no-ops.
    pub fn fini(&self) {
        if self.done.swap(true, Ordering::SeqCst) {
            return;
        }
        let callbacks: Vec<FiniFn> = {
            let mut finis = self.finis.lock().unwrap_or_else(|e| e.into_inner());
            finis.drain(..).collect()
        };
        for callback in callbacks {
            callback();
        }
    }

    pub fn is_fini(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }
}

impl<T> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}
