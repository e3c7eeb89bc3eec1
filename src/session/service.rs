use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use super::{
    creator::{now_millis, NewSession, SessionCreator},
    generators::{SessionIdGenerator, UuidSessionIdGenerator},
    models::Session,
    token::{SignOptions, TokenCodec, TokenCodecConfig, VerifyOptions as TokenVerifyOptions},
    types::{Data, TokenKind},
};
use crate::event::{EventBus, SessionEvent, SessionEventListener};
use crate::shared::AppError;
use crate::store::{
    ConnectionStore, EngineOptions, EngineRegistry, MemoryEngine, Meta, Register, RegisterUpdate,
};

/// Which storage backend a `SessionControl` binds to
#[derive(Debug, Clone)]
pub enum StoreSelection {
    /// Instantiate a registered engine by name
    Engine { name: String, options: EngineOptions },
    /// Use a store built by the caller
    Store(ConnectionStore),
}

impl Default for StoreSelection {
    fn default() -> Self {
        StoreSelection::Engine {
            name: MemoryEngine::NAME.to_string(),
            options: EngineOptions::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SessionControlConfig {
    pub token: TokenCodecConfig,
    pub store: StoreSelection,
}

impl SessionControlConfig {
    pub fn new(token: TokenCodecConfig) -> Self {
        Self {
            token,
            store: StoreSelection::default(),
        }
    }

    pub fn with_engine(mut self, name: impl Into<String>, options: EngineOptions) -> Self {
        self.store = StoreSelection::Engine {
            name: name.into(),
            options,
        };
        self
    }

    pub fn with_store(mut self, store: ConnectionStore) -> Self {
        self.store = StoreSelection::Store(store);
        self
    }
}

/// Options for `SessionControl::verify`
#[derive(Debug, Clone, Default)]
pub struct VerifyOptions {
    /// Read the register back from storage to fill in `meta`
    pub complete_meta: bool,
    pub token: TokenVerifyOptions,
}

impl VerifyOptions {
    pub fn complete_meta() -> Self {
        Self {
            complete_meta: true,
            ..Default::default()
        }
    }
}

/// How a refresh changes the stored `meta`
pub enum MetaUpdate {
    /// Shallow merge: keys in the update replace existing keys
    Merge(Meta),
    /// Replaces meta with the closure's result; an absent meta is passed as empty
    Transform(Box<dyn FnOnce(Meta) -> Meta + Send>),
}

impl MetaUpdate {
    pub fn transform<F>(f: F) -> Self
    where
        F: FnOnce(Meta) -> Meta + Send + 'static,
    {
        MetaUpdate::Transform(Box::new(f))
    }

    fn apply(self, current: Meta) -> Meta {
        match self {
            MetaUpdate::Merge(update) => {
                let mut merged = current;
                merged.extend(update);
                merged
            }
            MetaUpdate::Transform(f) => f(current),
        }
    }
}

impl fmt::Debug for MetaUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetaUpdate::Merge(meta) => f.debug_tuple("Merge").field(meta).finish(),
            MetaUpdate::Transform(_) => f.write_str("Transform(..)"),
        }
    }
}

/// Options for `SessionControl::refresh_session`
#[derive(Debug, Default)]
pub struct RefreshOptions {
    /// Ephemeral data for the new access token
    pub data: Option<Data>,
    pub meta: Option<MetaUpdate>,
    /// Sign overrides for the rotated pair. The refresh token does not carry
    /// the previous session's overrides, so codec defaults apply when unset.
    pub access_token_sign_options: Option<SignOptions>,
    pub refresh_token_sign_options: Option<SignOptions>,
}

impl RefreshOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data(mut self, data: Data) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_meta(mut self, meta: MetaUpdate) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn with_access_token_sign_options(mut self, options: SignOptions) -> Self {
        self.access_token_sign_options = Some(options);
        self
    }

    pub fn with_refresh_token_sign_options(mut self, options: SignOptions) -> Self {
        self.refresh_token_sign_options = Some(options);
        self
    }
}

/// Session lifecycle orchestrator: creation, verification, refresh-token
/// rotation, revocation and listing, backed by one storage engine.
pub struct SessionControl {
    codec: Arc<TokenCodec>,
    connection_store: ConnectionStore,
    session_creator: SessionCreator,
    events: EventBus,
}

impl fmt::Debug for SessionControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionControl")
            .field("codec", &self.codec)
            .field("connection_store", &self.connection_store)
            .field("events", &self.events)
            .finish()
    }
}

impl SessionControl {
    pub fn new(config: SessionControlConfig, registry: &EngineRegistry) -> Result<Self, AppError> {
        let codec = Arc::new(TokenCodec::new(config.token)?);
        let connection_store = match config.store {
            StoreSelection::Engine { name, options } => registry.connect(&name, &options)?,
            StoreSelection::Store(store) => store,
        };
        info!(
            engine = connection_store.engine_name(),
            algorithm = ?codec.algorithm(),
            "Session control ready"
        );
        Ok(Self::with_store(codec, connection_store))
    }

    /// Binds an existing codec and store, generating UUID session ids
    pub fn with_store(codec: Arc<TokenCodec>, connection_store: ConnectionStore) -> Self {
        let session_creator = SessionCreator::new(
            Arc::new(UuidSessionIdGenerator::new()),
            connection_store.clone(),
            codec.clone(),
        );
        Self {
            codec,
            connection_store,
            session_creator,
            events: EventBus::new(),
        }
    }

    pub fn with_id_generator(mut self, id_generator: Arc<dyn SessionIdGenerator>) -> Self {
        self.session_creator = SessionCreator::new(
            id_generator,
            self.connection_store.clone(),
            self.codec.clone(),
        );
        self
    }

    pub fn codec(&self) -> &Arc<TokenCodec> {
        &self.codec
    }

    pub fn connection_store(&self) -> &ConnectionStore {
        &self.connection_store
    }

    /// Registers a listener for lifecycle events
    pub fn on<L>(&self, listener: L)
    where
        L: SessionEventListener + 'static,
    {
        self.events.add_listener(Arc::new(listener));
    }

    /// Receiver for lifecycle events emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Creates and stores a session with both tokens
    #[instrument(skip(self, options))]
    pub async fn create_session(&self, options: NewSession) -> Result<Session, AppError> {
        let (session, register) = self.session_creator.create_session(options).await?;
        info!(
            session_id = ?session.session_id(),
            user_id = ?session.user_id(),
            "Session created"
        );
        self.events.emit(SessionEvent::SessionCreated { register });
        Ok(session)
    }

    /// Creates an access-token-only session. Nothing is stored.
    #[instrument(skip(self, options))]
    pub async fn create_unregister_session(
        &self,
        options: NewSession,
    ) -> Result<Session, AppError> {
        let session = self.session_creator.create_unregistered_session(options).await;
        info!(session_id = ?session.session_id(), "Unregistered session created");
        self.events.emit(SessionEvent::UnregisteredSessionCreated {
            session: session.clone(),
        });
        Ok(session)
    }

    /// Verifies `token` as `kind` and returns the session it describes.
    ///
    /// `meta` is only present with `complete_meta`, which also requires the
    /// register to still exist.
    #[instrument(skip(self, token, options))]
    pub async fn verify(
        &self,
        token: &str,
        kind: TokenKind,
        options: Option<&VerifyOptions>,
    ) -> Result<Session, AppError> {
        let claims = self
            .codec
            .verify(token, kind, options.map(|options| &options.token))?;
        let session = Session::from_claims(claims, self.codec.clone());

        if !options.is_some_and(|options| options.complete_meta) {
            return Ok(session);
        }

        let session_id = session
            .session_id()
            .ok_or_else(|| AppError::SessionNotFound("token carries no session id".to_string()))?;
        let register = self.find_register(session_id).await?;
        debug!(session_id = %session_id, "Hydrated session meta");
        Ok(session.with_meta(register.meta))
    }

    /// Rotates the refresh token: the stored `refresh_at` nonce must match
    /// the token's, and is advanced so the token cannot be used again.
    #[instrument(skip(self, refresh_token, options))]
    pub async fn refresh_session(
        &self,
        refresh_token: &str,
        options: RefreshOptions,
    ) -> Result<Session, AppError> {
        // Step 1: Verify the token itself
        let claims = self
            .codec
            .verify(refresh_token, TokenKind::RefreshToken, None)?;
        let session_id = claims.payload.session_id.clone().ok_or_else(|| {
            AppError::SessionNotFound("refresh token carries no session id".to_string())
        })?;

        // Step 2: Load the register
        let register = self.find_register(&session_id).await?;

        // Step 3: Check the rotation nonce
        if register.refresh_at != claims.payload.refresh_at {
            warn!(
                session_id = %session_id,
                token_refresh_at = ?claims.payload.refresh_at,
                stored_refresh_at = ?register.refresh_at,
                "Rejected stale refresh token"
            );
            return Err(AppError::StaleRefreshToken(session_id));
        }

        // Step 4: Advance the nonce and merge meta
        let now = now_millis();
        let next_refresh_at = match register.refresh_at {
            Some(previous) => now.max(previous.saturating_add(1)),
            None => now,
        };
        let mut sets = RegisterUpdate::new().with_refresh_at(next_refresh_at);
        if let Some(meta_update) = options.meta {
            let current = register.meta.clone().unwrap_or_default();
            sets = sets.with_meta(meta_update.apply(current));
        }

        // Step 5: Write only if no concurrent refresh got there first
        let updated = self
            .connection_store
            .compare_and_update(&session_id, register.refresh_at, &sets)
            .await?
            .ok_or_else(|| {
                warn!(session_id = %session_id, "Lost refresh race; token already consumed");
                AppError::StaleRefreshToken(session_id.clone())
            })?;

        info!(
            session_id = %session_id,
            refresh_at = next_refresh_at,
            "Session refreshed"
        );
        self.events.emit(SessionEvent::SessionRefreshed {
            register: updated.clone(),
        });

        let mut session = Session::from_register(updated, options.data, self.codec.clone());
        if let Some(sign_options) = options.access_token_sign_options {
            session = session.with_access_token_sign_options(sign_options);
        }
        if let Some(sign_options) = options.refresh_token_sign_options {
            session = session.with_refresh_token_sign_options(sign_options);
        }
        Ok(session)
    }

    /// Deletes the session's register. `false` when it has no id or nothing
    /// was deleted.
    #[instrument(skip(self, session), fields(session_id = ?session.session_id()))]
    pub async fn revoke_session(&self, session: &Session) -> Result<bool, AppError> {
        let Some(session_id) = session.session_id() else {
            debug!("Session has no id; nothing to revoke");
            return Ok(false);
        };

        let deleted = self.connection_store.delete_by_id(session_id).await?;
        if deleted {
            info!(session_id = %session_id, "Session revoked");
            self.events.emit(SessionEvent::SessionRevoked {
                session_id: session_id.to_string(),
            });
        }
        Ok(deleted)
    }

    /// Deletes every register of the session's user. `false` when the
    /// session has no user.
    #[instrument(skip(self, session), fields(user_id = ?session.user_id()))]
    pub async fn revoke_all_sessions(&self, session: &Session) -> Result<bool, AppError> {
        let Some(user_id) = session.user_id() else {
            debug!("Session has no user; nothing to revoke");
            return Ok(false);
        };

        let deleted = self.connection_store.delete_by_user_id(user_id).await?;
        if deleted {
            info!(user_id = %user_id, "All sessions revoked");
            self.events.emit(SessionEvent::AllSessionsRevoked {
                user_id: user_id.to_string(),
            });
        }
        Ok(deleted)
    }

    /// Every stored session of the session's user, without ephemeral data
    #[instrument(skip(self, session), fields(user_id = ?session.user_id()))]
    pub async fn get_all_sessions(&self, session: &Session) -> Result<Vec<Session>, AppError> {
        let Some(user_id) = session.user_id() else {
            return Ok(Vec::new());
        };

        let registers = self.connection_store.find_by_user_id(user_id).await?;
        debug!(user_id = %user_id, count = registers.len(), "Loaded user sessions");
        Ok(registers
            .into_iter()
            .map(|register| Session::from_register(register, None, self.codec.clone()))
            .collect())
    }

    async fn find_register(&self, session_id: &str) -> Result<Register, AppError> {
        self.connection_store
            .find_by_id(session_id)
            .await
            .map_err(|e| match e {
                AppError::NotFound(_) => {
                    warn!(session_id = %session_id, "Session register not found");
                    AppError::SessionNotFound(session_id.to_string())
                }
                other => other,
            })
    }
}
