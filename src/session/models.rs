use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

use super::token::{SignOptions, TokenCodec};
use super::types::{
    AccessToken, Data, RefreshToken, SessionPayload, TokenBundle, TokenClaims, TokenKind,
};
use crate::shared::AppError;
use crate::store::{Meta, Mode, Register};

/// Runtime view of a session: the durable register fields, the ephemeral
/// `data` payload, and the codec used to mint its tokens.
///
/// Tokens are signed on every call to `access_token`/`refresh_token`, so two
/// calls a second apart produce different strings.
#[derive(Clone)]
pub struct Session {
    session_id: Option<String>,
    user_id: Option<String>,
    scope: Option<String>,
    meta: Option<Meta>,
    client_id: Option<String>,
    mode: Mode,
    token_type: Option<String>,
    refresh_at: Option<i64>,
    created_at: Option<i64>,
    extensions: Map<String, Value>,
    data: Option<Data>,
    access_token_sign_options: Option<SignOptions>,
    refresh_token_sign_options: Option<SignOptions>,
    codec: Arc<TokenCodec>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.session_id)
            .field("user_id", &self.user_id)
            .field("scope", &self.scope)
            .field("mode", &self.mode)
            .field("refresh_at", &self.refresh_at)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Builds a session from a register plus optional ephemeral data
    pub fn from_register(register: Register, data: Option<Data>, codec: Arc<TokenCodec>) -> Self {
        Self {
            session_id: register.session_id,
            user_id: register.user_id,
            scope: register.scope,
            meta: register.meta,
            client_id: register.client_id,
            mode: register.mode,
            token_type: register.token_type,
            refresh_at: register.refresh_at,
            created_at: register.created_at,
            extensions: register.extensions,
            data,
            access_token_sign_options: None,
            refresh_token_sign_options: None,
            codec,
        }
    }

    /// Builds the verified view of a token. `meta` is not part of any token
    /// and stays empty.
    pub(crate) fn from_claims(claims: TokenClaims, codec: Arc<TokenCodec>) -> Self {
        let payload = claims.payload;
        Self {
            session_id: payload.session_id,
            user_id: payload.user_id,
            scope: payload.scope,
            meta: None,
            client_id: payload.client_id,
            mode: payload.mode,
            token_type: None,
            refresh_at: payload.refresh_at,
            created_at: payload.created_at,
            extensions: Map::new(),
            data: payload.data,
            access_token_sign_options: None,
            refresh_token_sign_options: None,
            codec,
        }
    }

    /// Same ephemeral data and sign options, register fields from `register`
    pub(crate) fn rebuild_from(&self, register: Register) -> Self {
        Self {
            data: self.data.clone(),
            access_token_sign_options: self.access_token_sign_options.clone(),
            refresh_token_sign_options: self.refresh_token_sign_options.clone(),
            ..Self::from_register(register, None, self.codec.clone())
        }
    }

    pub(crate) fn with_meta(mut self, meta: Option<Meta>) -> Self {
        self.meta = meta;
        self
    }

    /// Overrides expiry or algorithm for this session's access tokens
    pub fn with_access_token_sign_options(mut self, options: SignOptions) -> Self {
        self.access_token_sign_options = Some(options);
        self
    }

    /// Overrides expiry or algorithm for this session's refresh tokens
    pub fn with_refresh_token_sign_options(mut self, options: SignOptions) -> Self {
        self.refresh_token_sign_options = Some(options);
        self
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    pub fn meta(&self) -> Option<&Meta> {
        self.meta.as_ref()
    }

    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn token_type(&self) -> Option<&str> {
        self.token_type.as_deref()
    }

    pub fn refresh_at(&self) -> Option<i64> {
        self.refresh_at
    }

    pub fn created_at(&self) -> Option<i64> {
        self.created_at
    }

    pub fn extensions(&self) -> &Map<String, Value> {
        &self.extensions
    }

    pub fn data(&self) -> Option<&Data> {
        self.data.as_ref()
    }

    /// Durable projection of this session; `data` is left out
    pub fn register(&self) -> Register {
        Register {
            session_id: self.session_id.clone(),
            user_id: self.user_id.clone(),
            scope: self.scope.clone(),
            meta: self.meta.clone(),
            client_id: self.client_id.clone(),
            mode: self.mode,
            token_type: self.token_type.clone(),
            refresh_at: self.refresh_at,
            created_at: self.created_at,
            extensions: self.extensions.clone(),
        }
    }

    fn payload(&self, kind: TokenKind) -> SessionPayload {
        SessionPayload {
            user_id: self.user_id.clone(),
            scope: self.scope.clone(),
            session_id: self.session_id.clone(),
            data: match kind {
                TokenKind::AccessToken => self.data.clone(),
                TokenKind::RefreshToken => None,
            },
            refresh_at: self.refresh_at,
            created_at: self.created_at,
            client_id: self.client_id.clone(),
            mode: self.mode,
        }
    }

    fn sign_options(&self, kind: TokenKind) -> Option<&SignOptions> {
        match kind {
            TokenKind::AccessToken => self.access_token_sign_options.as_ref(),
            TokenKind::RefreshToken => self.refresh_token_sign_options.as_ref(),
        }
    }

    fn lifetime_secs(&self, kind: TokenKind) -> u64 {
        self.sign_options(kind)
            .and_then(|options| options.expires_in)
            .unwrap_or_else(|| self.codec.expires(kind))
            .as_secs()
    }

    pub fn access_token(&self) -> Result<AccessToken, AppError> {
        let kind = TokenKind::AccessToken;
        self.codec
            .sign(&self.payload(kind), kind, self.sign_options(kind))
    }

    /// Always `None` for `OnlyAccessToken` sessions
    pub fn refresh_token(&self) -> Result<Option<RefreshToken>, AppError> {
        if self.mode == Mode::OnlyAccessToken {
            return Ok(None);
        }
        let kind = TokenKind::RefreshToken;
        self.codec
            .sign(&self.payload(kind), kind, self.sign_options(kind))
            .map(Some)
    }

    /// Access-token lifetime in seconds
    pub fn expires_in(&self) -> u64 {
        self.lifetime_secs(TokenKind::AccessToken)
    }

    /// Refresh-token lifetime in seconds
    pub fn refresh_expires_in(&self) -> u64 {
        self.lifetime_secs(TokenKind::RefreshToken)
    }

    /// Public credential bundle for this session
    pub fn to_token(&self) -> Result<TokenBundle, AppError> {
        Ok(TokenBundle {
            token_type: self.token_type.clone(),
            access_token: self.access_token()?,
            refresh_token: self.refresh_token()?,
            expires_in: self.expires_in(),
            scope: self.scope.clone(),
        })
    }
}

/// Serializes as the public token bundle
impl Serialize for Session {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_token()
            .map_err(serde::ser::Error::custom)?
            .serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::test_utils::{map, test_codec};
    use serde_json::json;
    use std::time::Duration;

    fn register(mode: Mode) -> Register {
        Register {
            session_id: Some("session-1".to_string()),
            user_id: Some("me".to_string()),
            scope: Some("a b c".to_string()),
            meta: Some(map(json!({ "ips": ["a"] }))),
            client_id: Some("web".to_string()),
            mode,
            token_type: Some("Bearer".to_string()),
            refresh_at: Some(1_000),
            created_at: Some(500),
            ..Default::default()
        }
    }

    #[test]
    fn test_access_token_carries_session_fields_and_data() {
        let codec = test_codec();
        let session = Session::from_register(
            register(Mode::Token),
            Some(map(json!({ "role": "admin" }))),
            codec.clone(),
        );

        let token = session.access_token().unwrap();
        let claims = codec.verify(&token, TokenKind::AccessToken, None).unwrap();
        assert_eq!(claims.payload.user_id.as_deref(), Some("me"));
        assert_eq!(claims.payload.scope.as_deref(), Some("a b c"));
        assert_eq!(claims.payload.session_id.as_deref(), Some("session-1"));
        assert_eq!(claims.payload.client_id.as_deref(), Some("web"));
        assert_eq!(claims.payload.refresh_at, Some(1_000));
        assert_eq!(claims.payload.data, Some(map(json!({ "role": "admin" }))));
    }

    #[test]
    fn test_refresh_token_omits_data() {
        let codec = test_codec();
        let session = Session::from_register(
            register(Mode::Token),
            Some(map(json!({ "role": "admin" }))),
            codec.clone(),
        );

        let token = session.refresh_token().unwrap().unwrap();
        let claims = codec.verify(&token, TokenKind::RefreshToken, None).unwrap();
        assert!(claims.payload.data.is_none());
        assert_eq!(claims.payload.refresh_at, Some(1_000));
        assert_eq!(claims.payload.created_at, Some(500));
    }

    #[test]
    fn test_only_access_token_mode_has_no_refresh_token() {
        let session = Session::from_register(register(Mode::OnlyAccessToken), None, test_codec());

        assert!(session.refresh_token().unwrap().is_none());
        let bundle = session.to_token().unwrap();
        assert!(bundle.refresh_token.is_none());
        assert!(!bundle.access_token.is_empty());
    }

    #[test]
    fn test_register_projection_excludes_data() {
        let session = Session::from_register(
            register(Mode::Token),
            Some(map(json!({ "secret": "ephemeral" }))),
            test_codec(),
        );

        let projected = session.register();
        assert_eq!(projected, register(Mode::Token));
        assert!(!serde_json::to_string(&projected).unwrap().contains("ephemeral"));
    }

    #[test]
    fn test_to_token_bundle() {
        let session = Session::from_register(register(Mode::Token), None, test_codec());

        let bundle = session.to_token().unwrap();
        assert_eq!(bundle.token_type.as_deref(), Some("Bearer"));
        assert_eq!(bundle.expires_in, 3_600);
        assert_eq!(bundle.scope.as_deref(), Some("a b c"));
        assert!(bundle.refresh_token.is_some());

        let json = serde_json::to_value(&session).unwrap();
        assert!(json["access_token"].is_string());
        assert!(json["refresh_token"].is_string());
        assert_eq!(json["expires_in"], 3_600);
    }

    #[test]
    fn test_sign_options_change_reported_expiry() {
        let session = Session::from_register(register(Mode::Token), None, test_codec())
            .with_access_token_sign_options(SignOptions::expires_in(Duration::from_secs(300)))
            .with_refresh_token_sign_options(SignOptions::expires_in(Duration::from_secs(600)));

        assert_eq!(session.expires_in(), 300);
        assert_eq!(session.refresh_expires_in(), 600);
        assert_eq!(session.to_token().unwrap().expires_in, 300);
    }
}
