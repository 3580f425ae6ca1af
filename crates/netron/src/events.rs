//! Reserved peer-scoped events.
//!
//! This is not a generic pub/sub bus: the event names are the four reserved
//! lifecycle notifications, delivered over the `event` packet frame between
//! peers and to local subscribers directly.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use netron_common::Value;

pub const PEER_CONNECT: &str = "peer:connect";
pub const PEER_DISCONNECT: &str = "peer:disconnect";
pub const CONTEXT_ATTACH: &str = "context:attach";
pub const CONTEXT_DETACH: &str = "context:detach";

/// Handlers run on the peer's event path; long work belongs in a task the
/// handler spawns itself.
pub type EventHandler = Arc<dyn Fn(&Value) + Send + Sync>;

#[derive(Default)]
pub struct EventEmitter {
    handlers: Mutex<HashMap<String, Vec<EventHandler>>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, event: &str, handler: EventHandler) {
        self.handlers
            .lock()
            .expect("event handler table poisoned")
            .entry(event.to_string())
            .or_default()
            .push(handler);
    }

    pub fn emit(&self, event: &str, payload: &Value) {
        // Snapshot outside the lock so a handler may subscribe re-entrantly.
        let snapshot: Vec<EventHandler> = {
            let handlers = self.handlers.lock().expect("event handler table poisoned");
            handlers.get(event).cloned().unwrap_or_default()
        };
        for handler in snapshot {
            handler(payload);
        }
    }
}
