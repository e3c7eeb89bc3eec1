use parking_lot::RwLock;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use super::events::SessionEvent;
use super::handler::{EventError, SessionEventListener};

const CHANNEL_CAPACITY: usize = 100;

/// Fans lifecycle events out to registered listeners and broadcast receivers
#[derive(Clone)]
pub struct EventBus {
    listeners: Arc<RwLock<Vec<Arc<dyn SessionEventListener>>>>,
    sender: broadcast::Sender<SessionEvent>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listeners.read().len())
            .field("receivers", &self.sender.receiver_count())
            .finish()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            listeners: Arc::new(RwLock::new(Vec::new())),
            sender,
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn SessionEventListener>) {
        debug!(listener = listener.name(), "Registering session event listener");
        self.listeners.write().push(listener);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Receiver for every event emitted after this call. Slow receivers
    /// lose the oldest events once the channel is full.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    /// Delivers `event` to every listener in registration order, then to
    /// broadcast receivers. Never fails.
    pub fn emit(&self, event: SessionEvent) {
        let event_type = event.event_type();
        // Snapshot so listeners may register further listeners
        let listeners: Vec<_> = self.listeners.read().iter().cloned().collect();

        for listener in listeners {
            let outcome = catch_unwind(AssertUnwindSafe(|| listener.handle(&event)))
                .unwrap_or_else(|panic| Err(EventError::Panic(panic_message(panic.as_ref()))));

            match outcome {
                Ok(()) => {}
                Err(e @ EventError::Panic(_)) => {
                    error!(
                        listener = listener.name(),
                        event_type,
                        error = %e,
                        "Session event listener panicked"
                    );
                }
                Err(e) => {
                    warn!(
                        listener = listener.name(),
                        event_type,
                        error = %e,
                        "Session event listener failed"
                    );
                }
            }
        }

        match self.sender.send(event) {
            Ok(receivers) => debug!(event_type, receivers, "Session event emitted"),
            Err(_) => debug!(event_type, "Session event emitted with no receivers"),
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
