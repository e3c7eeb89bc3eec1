use chrono::Utc;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, instrument};

use super::{
    generators::SessionIdGenerator,
    models::Session,
    token::{SignOptions, TokenCodec},
    types::{scope_to_string, Data},
};
use crate::shared::AppError;
use crate::store::{ConnectionStore, Meta, Mode, Register};

/// Caller-supplied fields for a new session
#[derive(Debug, Clone, Default)]
pub struct NewSession {
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub scope: Option<String>,
    pub data: Option<Data>,
    pub meta: Option<Meta>,
    pub client_id: Option<String>,
    pub token_type: Option<String>,
    pub created_at: Option<i64>,
    pub refresh_at: Option<i64>,
    pub extensions: Map<String, Value>,
    pub access_token_sign_options: Option<SignOptions>,
    pub refresh_token_sign_options: Option<SignOptions>,
}

impl NewSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self::new().with_user_id(user_id)
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Space-separated scope string, stored as given
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// List of scopes, joined with spaces
    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.scope = Some(scope_to_string(scopes));
        self
    }

    /// Ephemeral payload for access tokens; never stored
    pub fn with_data(mut self, data: Data) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_meta(mut self, meta: Meta) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn with_token_type(mut self, token_type: impl Into<String>) -> Self {
        self.token_type = Some(token_type.into());
        self
    }

    /// Uses a caller-chosen session id instead of a generated one
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_created_at(mut self, created_at: i64) -> Self {
        self.created_at = Some(created_at);
        self
    }

    pub fn with_refresh_at(mut self, refresh_at: i64) -> Self {
        self.refresh_at = Some(refresh_at);
        self
    }

    pub fn with_extension(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extensions.insert(key.into(), value);
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

/// Current time in milliseconds, the unit of `created_at` and `refresh_at`
pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Builds sessions from `NewSession` options and stores registered ones
pub struct SessionCreator {
    id_generator: Arc<dyn SessionIdGenerator>,
    connection_store: ConnectionStore,
    codec: Arc<TokenCodec>,
}

impl SessionCreator {
    pub fn new(
        id_generator: Arc<dyn SessionIdGenerator>,
        connection_store: ConnectionStore,
        codec: Arc<TokenCodec>,
    ) -> Self {
        Self {
            id_generator,
            connection_store,
            codec,
        }
    }

    /// Builds a `Token` session and writes its register through the store.
    /// Returns the stored register alongside the session built from it.
    #[instrument(skip(self, options), fields(user_id = ?options.user_id))]
    pub async fn create_session(
        &self,
        options: NewSession,
    ) -> Result<(Session, Register), AppError> {
        // Step 1: Build the session with a fresh id and timestamps
        let session = self.build_session(options, Mode::Token).await;
        debug!(session_id = ?session.session_id(), "Built session");

        // Step 2: Store its register
        let register = self.connection_store.create(session.register()).await?;
        info!(session_id = ?register.session_id, "Stored session register");

        // Step 3: Rebuild from what the engine returned, keeping ephemeral state
        Ok((session.rebuild_from(register.clone()), register))
    }

    /// Builds an `OnlyAccessToken` session without touching storage
    #[instrument(skip(self, options), fields(user_id = ?options.user_id))]
    pub async fn create_unregistered_session(&self, mut options: NewSession) -> Session {
        options.refresh_at = None;
        let session = self.build_session(options, Mode::OnlyAccessToken).await;
        debug!(session_id = ?session.session_id(), "Built unregistered session");
        session
    }

    async fn build_session(&self, options: NewSession, mode: Mode) -> Session {
        let now = now_millis();
        let session_id = match options.session_id {
            Some(session_id) => session_id,
            None => self.id_generator.generate().await,
        };
        let refresh_at = match mode {
            Mode::Token => Some(options.refresh_at.unwrap_or(now)),
            Mode::OnlyAccessToken => None,
        };

        let register = Register {
            session_id: Some(session_id),
            user_id: options.user_id,
            scope: options.scope,
            meta: options.meta,
            client_id: options.client_id,
            mode,
            token_type: options.token_type,
            refresh_at,
            created_at: Some(options.created_at.unwrap_or(now)),
            extensions: options.extensions,
        };

        let mut session = Session::from_register(register, options.data, self.codec.clone());
        if let Some(sign_options) = options.access_token_sign_options {
            session = session.with_access_token_sign_options(sign_options);
        }
        if let Some(sign_options) = options.refresh_token_sign_options {
            session = session.with_refresh_token_sign_options(sign_options);
        }
        session
    }
}
