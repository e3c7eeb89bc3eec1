// Session lifecycle notifications
//
// Operations on `SessionControl` emit a `SessionEvent` after their storage
// write succeeds. Listeners run synchronously; broadcast receivers get a copy.

// Public API - what other modules can use
pub use bus::EventBus;
pub use events::SessionEvent;
pub use handler::{EventError, SessionEventListener};

// Internal modules
mod bus;
mod events;
mod handler;
