use crate::session::Session;
use crate::store::Register;

/// Lifecycle notifications emitted by `SessionControl`
///
/// Events are facts about things that already happened. They are emitted
/// after the corresponding storage write succeeded.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A registered session was stored
    SessionCreated { register: Register },

    /// A session's refresh nonce was rotated
    SessionRefreshed { register: Register },

    /// An access-token-only session was minted; nothing was stored
    UnregisteredSessionCreated { session: Session },

    /// One stored session was deleted
    SessionRevoked { session_id: String },

    /// Every stored session of a user was deleted
    AllSessionsRevoked { user_id: String },
}

impl SessionEvent {
    /// Wire name of the event
    pub fn event_type(&self) -> &'static str {
        match self {
            SessionEvent::SessionCreated { .. } => "create-session",
            SessionEvent::SessionRefreshed { .. } => "refresh-session",
            SessionEvent::UnregisteredSessionCreated { .. } => "create-unregister-session",
            SessionEvent::SessionRevoked { .. } => "revoke-session",
            SessionEvent::AllSessionsRevoked { .. } => "revoke-all-sessions",
        }
    }

    /// Session the event concerns, when it names exactly one
    pub fn session_id(&self) -> Option<&str> {
        match self {
            SessionEvent::SessionCreated { register }
            | SessionEvent::SessionRefreshed { register } => register.session_id.as_deref(),
            SessionEvent::UnregisteredSessionCreated { session } => session.session_id(),
            SessionEvent::SessionRevoked { session_id } => Some(session_id),
            SessionEvent::AllSessionsRevoked { .. } => None,
        }
    }
}
