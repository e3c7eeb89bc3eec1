use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Durable key/value metadata attached to a session
pub type Meta = Map<String, Value>;

/// How a session hands out credentials
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    /// Access token plus refresh token, backed by a stored register
    #[default]
    Token,
    /// Access token only; nothing is stored and nothing can be refreshed
    OnlyAccessToken,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Token => "Token",
            Mode::OnlyAccessToken => "OnlyAccessToken",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Token" => Some(Mode::Token),
            "OnlyAccessToken" => Some(Mode::OnlyAccessToken),
            _ => None,
        }
    }

    pub(crate) fn is_default(&self) -> bool {
        *self == Mode::Token
    }
}

/// Durable record backing a session.
///
/// Everything here is written to the storage engine. Ephemeral session data
/// lives only in tokens and is never part of a register.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Register {
    /// Assigned by the engine on create when absent, immutable afterwards
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    /// Rotation nonce, replaced on every successful refresh
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    /// Engine- or application-specific columns outside the fixed schema
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extensions: Map<String, Value>,
}

impl Register {
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }
}

/// Partial set of fields to write over an existing register.
///
/// `None` leaves the stored value untouched. `session_id` and `created_at`
/// cannot be changed through an update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegisterUpdate {
    pub user_id: Option<String>,
    pub scope: Option<String>,
    pub meta: Option<Meta>,
    pub client_id: Option<String>,
    pub token_type: Option<String>,
    pub refresh_at: Option<i64>,
    pub extensions: Map<String, Value>,
}

impl RegisterUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Replaces the stored meta wholesale
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

    pub fn with_refresh_at(mut self, refresh_at: i64) -> Self {
        self.refresh_at = Some(refresh_at);
        self
    }

    pub fn with_extension(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extensions.insert(key.into(), value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Writes the set fields onto `register`. Extension keys are merged.
    pub fn apply(&self, register: &mut Register) {
        if let Some(user_id) = &self.user_id {
            register.user_id = Some(user_id.clone());
        }
        if let Some(scope) = &self.scope {
            register.scope = Some(scope.clone());
        }
        if let Some(meta) = &self.meta {
            register.meta = Some(meta.clone());
        }
        if let Some(client_id) = &self.client_id {
            register.client_id = Some(client_id.clone());
        }
        if let Some(token_type) = &self.token_type {
            register.token_type = Some(token_type.clone());
        }
        if let Some(refresh_at) = self.refresh_at {
            register.refresh_at = Some(refresh_at);
        }
        for (key, value) in &self.extensions {
            register.extensions.insert(key.clone(), value.clone());
        }
    }
}
