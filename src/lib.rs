// Session lifecycle library: signed access/refresh token pairs, refresh-token
// rotation with replay protection, and pluggable storage engines

pub mod event;
pub mod session;
pub mod shared;
pub mod store;

// Re-export commonly used types for easier access in tests
pub use event::{EventBus, EventError, SessionEvent, SessionEventListener};
pub use session::{
    MetaUpdate, NewSession, RefreshOptions, Session, SessionControl, SessionControlConfig,
    SignOptions, TokenBundle, TokenCodec, TokenCodecConfig, TokenKind, VerifyOptions,
};
pub use shared::AppError;
pub use store::{
    ConnectionStore, EngineOptions, EngineRegistry, MemoryEngine, Register, RegisterUpdate,
    StorageEngine,
};
