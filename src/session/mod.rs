// Public API - what other modules can use
pub use creator::NewSession;
pub use generators::{SessionIdGenerator, UuidSessionIdGenerator};
pub use models::Session;
pub use service::{
    MetaUpdate, RefreshOptions, SessionControl, SessionControlConfig, StoreSelection, VerifyOptions,
};
pub use token::{
    demo_key_warning_emitted, parse_expiry, SignOptions, SigningKey, TokenCodec,
    TokenCodecConfig, VerifyOptions as TokenVerifyOptions, DEFAULT_ACCESS_TOKEN_EXPIRES,
    DEFAULT_REFRESH_TOKEN_EXPIRES,
};
pub use types::{
    scope_to_string, AccessToken, Data, RefreshToken, SessionPayload, TokenBundle, TokenClaims,
    TokenKind,
};

// Internal modules
mod creator;
mod generators;
mod models;
mod service;
mod token;
mod types;
