use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::store::Mode;

/// Ephemeral per-session payload carried in access tokens, never persisted
pub type Data = Map<String, Value>;

pub type AccessToken = String;
pub type RefreshToken = String;

/// The two token kinds, told apart by the `sub` claim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    AccessToken,
    RefreshToken,
}

impl TokenKind {
    /// Value of the `sub` claim for this kind
    pub fn subject(&self) -> &'static str {
        match self {
            TokenKind::AccessToken => "access_token",
            TokenKind::RefreshToken => "refresh_token",
        }
    }
}

/// Session fields embedded in a token
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Data>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Mode::is_default")]
    pub mode: Mode,
}

/// Full claim set of a signed token: session fields plus registered claims
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    #[serde(flatten)]
    pub payload: SessionPayload,
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

impl TokenClaims {
    /// Kind named by the `sub` claim, if it is one of ours
    pub fn kind(&self) -> Option<TokenKind> {
        match self.sub.as_str() {
            "access_token" => Some(TokenKind::AccessToken),
            "refresh_token" => Some(TokenKind::RefreshToken),
            _ => None,
        }
    }
}

/// Public credential bundle handed to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenBundle {
    pub token_type: Option<String>,
    pub access_token: AccessToken,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<RefreshToken>,
    /// Access-token lifetime in seconds
    pub expires_in: u64,
    pub scope: Option<String>,
}

/// Joins a list of scopes into the space-separated form stored on registers
pub fn scope_to_string<I, S>(scopes: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    scopes
        .into_iter()
        .map(|scope| scope.as_ref().to_string())
        .filter(|scope| !scope.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
