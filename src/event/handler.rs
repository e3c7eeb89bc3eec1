use thiserror::Error;

use super::events::SessionEvent;

/// Errors a listener can report back to the bus
#[derive(Debug, Error)]
pub enum EventError {
    #[error("Listener failed: {0}")]
    Failed(String),

    #[error("Listener panicked: {0}")]
    Panic(String),
}

impl EventError {
    pub fn failed(msg: impl Into<String>) -> Self {
        EventError::Failed(msg.into())
    }
}

/// Observer of session lifecycle events
///
/// Listeners run synchronously inside the operation that emitted the event,
/// so they should return quickly. A failing or panicking listener is logged
/// and skipped; it never fails the operation.
pub trait SessionEventListener: Send + Sync {
    fn handle(&self, event: &SessionEvent) -> Result<(), EventError>;

    /// Name used in logs
    fn name(&self) -> &str {
        "anonymous"
    }
}

impl<F> SessionEventListener for F
where
    F: Fn(&SessionEvent) -> Result<(), EventError> + Send + Sync,
{
    fn handle(&self, event: &SessionEvent) -> Result<(), EventError> {
        self(event)
    }
}
