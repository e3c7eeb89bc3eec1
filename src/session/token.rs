use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, instrument, warn};

use super::types::{SessionPayload, TokenClaims, TokenKind};
use crate::shared::AppError;

pub const DEFAULT_ACCESS_TOKEN_EXPIRES: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_REFRESH_TOKEN_EXPIRES: Duration = Duration::from_secs(4 * 7 * 24 * 60 * 60);

const DEMO_PRIVATE_KEY: &[u8] = include_bytes!("keys/demo_private.pem");
const DEMO_PUBLIC_KEY: &[u8] = include_bytes!("keys/demo_public.pem");

static DEMO_KEY_WARNED: AtomicBool = AtomicBool::new(false);

/// Logs the insecure-key warning the first time it is called in this process.
/// Returns whether this call emitted it.
fn warn_demo_key_once() -> bool {
    if DEMO_KEY_WARNED.swap(true, Ordering::SeqCst) {
        return false;
    }
    warn!(
        "Token codec is using the bundled demonstration key pair; \
         configure a secret or key pair for production"
    );
    true
}

/// Whether the demonstration key warning has been emitted in this process
pub fn demo_key_warning_emitted() -> bool {
    DEMO_KEY_WARNED.load(Ordering::SeqCst)
}

/// Key material used to sign and verify tokens
#[derive(Clone, Default)]
pub enum SigningKey {
    /// Shared secret for HMAC algorithms
    Secret(Vec<u8>),
    /// PEM encoded private and public key for RSA, RSA-PSS, EC or Ed25519
    KeyPair {
        private_pem: Vec<u8>,
        public_pem: Vec<u8>,
    },
    /// Bundled RSA demonstration key pair. Never use in production.
    #[default]
    DemoKeyPair,
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SigningKey::Secret(_) => f.write_str("Secret(<redacted>)"),
            SigningKey::KeyPair { .. } => f.write_str("KeyPair(<redacted>)"),
            SigningKey::DemoKeyPair => f.write_str("DemoKeyPair"),
        }
    }
}

/// Configuration for the token codec
#[derive(Debug, Clone)]
pub struct TokenCodecConfig {
    /// Defaults to HS512 with a secret and RS512 otherwise
    pub algorithm: Option<Algorithm>,
    pub key: SigningKey,
    pub access_token_expires: Duration,
    pub refresh_token_expires: Duration,
    /// Clock skew tolerated when checking `exp`, in seconds
    pub leeway: u64,
}

impl Default for TokenCodecConfig {
    fn default() -> Self {
        Self {
            algorithm: None,
            key: SigningKey::default(),
            access_token_expires: DEFAULT_ACCESS_TOKEN_EXPIRES,
            refresh_token_expires: DEFAULT_REFRESH_TOKEN_EXPIRES,
            leeway: 0,
        }
    }
}

impl TokenCodecConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads `RAUTH_JWT_SECRET`, `RAUTH_JWT_ALGORITHM`,
    /// `RAUTH_ACCESS_TOKEN_EXPIRES` and `RAUTH_REFRESH_TOKEN_EXPIRES`,
    /// falling back to defaults for anything unset
    pub fn from_env() -> Result<Self, AppError> {
        let mut config = Self::new();

        if let Ok(secret) = std::env::var("RAUTH_JWT_SECRET") {
            config = config.with_secret(secret);
        }
        if let Ok(algorithm) = std::env::var("RAUTH_JWT_ALGORITHM") {
            let algorithm = Algorithm::from_str(&algorithm).map_err(|_| {
                AppError::InvalidConfig(format!("unknown signing algorithm `{algorithm}`"))
            })?;
            config = config.with_algorithm(algorithm);
        }
        if let Ok(expires) = std::env::var("RAUTH_ACCESS_TOKEN_EXPIRES") {
            config = config.with_access_token_expires(parse_expiry(&expires)?);
        }
        if let Ok(expires) = std::env::var("RAUTH_REFRESH_TOKEN_EXPIRES") {
            config = config.with_refresh_token_expires(parse_expiry(&expires)?);
        }

        Ok(config)
    }

    pub fn with_secret(mut self, secret: impl AsRef<[u8]>) -> Self {
        self.key = SigningKey::Secret(secret.as_ref().to_vec());
        self
    }

    pub fn with_key_pair(
        mut self,
        private_pem: impl AsRef<[u8]>,
        public_pem: impl AsRef<[u8]>,
    ) -> Self {
        self.key = SigningKey::KeyPair {
            private_pem: private_pem.as_ref().to_vec(),
            public_pem: public_pem.as_ref().to_vec(),
        };
        self
    }

    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = Some(algorithm);
        self
    }

    pub fn with_access_token_expires(mut self, expires: Duration) -> Self {
        self.access_token_expires = expires;
        self
    }

    pub fn with_refresh_token_expires(mut self, expires: Duration) -> Self {
        self.refresh_token_expires = expires;
        self
    }

    pub fn with_leeway(mut self, leeway_secs: u64) -> Self {
        self.leeway = leeway_secs;
        self
    }
}

/// Per-call overrides for `TokenCodec::sign`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignOptions {
    pub expires_in: Option<Duration>,
    /// Must belong to the same family as the configured key
    pub algorithm: Option<Algorithm>,
}

impl SignOptions {
    pub fn expires_in(expires_in: Duration) -> Self {
        Self {
            expires_in: Some(expires_in),
            algorithm: None,
        }
    }
}

/// Per-call overrides for `TokenCodec::verify`
#[derive(Debug, Clone, PartialEq)]
pub struct VerifyOptions {
    /// Accepted algorithms; the configured one when `None`
    pub algorithms: Option<Vec<Algorithm>>,
    pub leeway: Option<u64>,
    pub validate_exp: bool,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            algorithms: None,
            leeway: None,
            validate_exp: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyFamily {
    Hmac,
    Rsa,
    Ec,
    Ed,
}

#[allow(unreachable_patterns)]
fn key_family(algorithm: Algorithm) -> Result<KeyFamily, AppError> {
    match algorithm {
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => Ok(KeyFamily::Hmac),
        Algorithm::RS256
        | Algorithm::RS384
        | Algorithm::RS512
        | Algorithm::PS256
        | Algorithm::PS384
        | Algorithm::PS512 => Ok(KeyFamily::Rsa),
        Algorithm::ES256 | Algorithm::ES384 => Ok(KeyFamily::Ec),
        Algorithm::EdDSA => Ok(KeyFamily::Ed),
        other => Err(AppError::InvalidConfig(format!(
            "unsupported signing algorithm {other:?}"
        ))),
    }
}

fn pem_keys(
    family: KeyFamily,
    private_pem: &[u8],
    public_pem: &[u8],
) -> Result<(EncodingKey, DecodingKey), jsonwebtoken::errors::Error> {
    Ok(match family {
        KeyFamily::Rsa => (
            EncodingKey::from_rsa_pem(private_pem)?,
            DecodingKey::from_rsa_pem(public_pem)?,
        ),
        KeyFamily::Ec => (
            EncodingKey::from_ec_pem(private_pem)?,
            DecodingKey::from_ec_pem(public_pem)?,
        ),
        KeyFamily::Ed => (
            EncodingKey::from_ed_pem(private_pem)?,
            DecodingKey::from_ed_pem(public_pem)?,
        ),
        KeyFamily::Hmac => (
            EncodingKey::from_secret(private_pem),
            DecodingKey::from_secret(public_pem),
        ),
    })
}

#[derive(Serialize)]
struct SigningClaims<'a> {
    #[serde(flatten)]
    payload: &'a SessionPayload,
    sub: &'static str,
    iat: i64,
    exp: i64,
}

/// Signs, verifies and decodes session tokens
#[derive(Clone)]
pub struct TokenCodec {
    algorithm: Algorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_token_expires: Duration,
    refresh_token_expires: Duration,
    leeway: u64,
    uses_demo_key: bool,
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("algorithm", &self.algorithm)
            .field("access_token_expires", &self.access_token_expires)
            .field("refresh_token_expires", &self.refresh_token_expires)
            .field("uses_demo_key", &self.uses_demo_key)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    pub fn new(config: TokenCodecConfig) -> Result<Self, AppError> {
        let algorithm = config.algorithm.unwrap_or(match config.key {
            SigningKey::Secret(_) => Algorithm::HS512,
            _ => Algorithm::RS512,
        });
        let family = key_family(algorithm)?;
        let now = Utc::now().timestamp();
        expiry_timestamp(now, config.access_token_expires)?;
        expiry_timestamp(now, config.refresh_token_expires)?;

        let (encoding_key, decoding_key, uses_demo_key) = match &config.key {
            SigningKey::Secret(secret) => {
                if family != KeyFamily::Hmac {
                    return Err(AppError::InvalidConfig(format!(
                        "{algorithm:?} needs a key pair, not a shared secret"
                    )));
                }
                (
                    EncodingKey::from_secret(secret),
                    DecodingKey::from_secret(secret),
                    false,
                )
            }
            SigningKey::KeyPair {
                private_pem,
                public_pem,
            } => {
                if family == KeyFamily::Hmac {
                    return Err(AppError::InvalidConfig(format!(
                        "{algorithm:?} needs a shared secret, not a key pair"
                    )));
                }
                let (encoding, decoding) = pem_keys(family, private_pem, public_pem)
                    .map_err(|e| AppError::InvalidConfig(format!("invalid key pair: {e}")))?;
                (encoding, decoding, false)
            }
            SigningKey::DemoKeyPair => {
                if family != KeyFamily::Rsa {
                    return Err(AppError::InvalidConfig(format!(
                        "the demonstration key pair is RSA and cannot sign {algorithm:?}"
                    )));
                }
                warn_demo_key_once();
                let (encoding, decoding) = pem_keys(family, DEMO_PRIVATE_KEY, DEMO_PUBLIC_KEY)
                    .map_err(|e| AppError::InvalidConfig(format!("invalid demo key pair: {e}")))?;
                (encoding, decoding, true)
            }
        };

        debug!(algorithm = ?algorithm, uses_demo_key, "Token codec configured");

        Ok(Self {
            algorithm,
            encoding_key,
            decoding_key,
            access_token_expires: config.access_token_expires,
            refresh_token_expires: config.refresh_token_expires,
            leeway: config.leeway,
            uses_demo_key,
        })
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn uses_demo_key(&self) -> bool {
        self.uses_demo_key
    }

    /// Default lifetime of tokens of the given kind
    pub fn expires(&self, kind: TokenKind) -> Duration {
        match kind {
            TokenKind::AccessToken => self.access_token_expires,
            TokenKind::RefreshToken => self.refresh_token_expires,
        }
    }

    /// Signs `payload` as a token of `kind`. `sub`, `iat` and `exp` are set here.
    #[instrument(skip(self, payload, options), fields(session_id = ?payload.session_id))]
    pub fn sign(
        &self,
        payload: &SessionPayload,
        kind: TokenKind,
        options: Option<&SignOptions>,
    ) -> Result<String, AppError> {
        let expires_in = options
            .and_then(|o| o.expires_in)
            .unwrap_or_else(|| self.expires(kind));
        let algorithm = options.and_then(|o| o.algorithm).unwrap_or(self.algorithm);

        let now = Utc::now().timestamp();
        let claims = SigningClaims {
            payload,
            sub: kind.subject(),
            iat: now,
            exp: expiry_timestamp(now, expires_in)?,
        };

        encode(&Header::new(algorithm), &claims, &self.encoding_key).map_err(|e| {
            debug!(error = %e, "Failed to encode token");
            AppError::JwtError(e.to_string())
        })
    }

    /// Verifies signature, expiry and subject, returning the claims
    #[instrument(skip(self, token, options))]
    pub fn verify(
        &self,
        token: &str,
        kind: TokenKind,
        options: Option<&VerifyOptions>,
    ) -> Result<TokenClaims, AppError> {
        let defaults = VerifyOptions::default();
        let options = options.unwrap_or(&defaults);

        let mut validation = Validation::new(self.algorithm);
        if let Some(algorithms) = &options.algorithms {
            validation.algorithms = algorithms.clone();
        }
        validation.leeway = options.leeway.unwrap_or(self.leeway);
        validation.validate_exp = options.validate_exp;
        validation.validate_aud = false;
        validation.sub = Some(kind.subject().to_string());
        validation.set_required_spec_claims(&["exp", "sub"]);

        decode::<TokenClaims>(token, &self.decoding_key, &validation)
            .map(|data| {
                debug!(
                    session_id = ?data.claims.payload.session_id,
                    sub = %data.claims.sub,
                    "Token verified"
                );
                data.claims
            })
            .map_err(|e| {
                warn!(error = %e, kind = kind.subject(), "Token verification failed");
                AppError::InvalidToken(e.to_string())
            })
    }

    /// Parses claims WITHOUT checking signature or expiry. Only for trusted
    /// introspection of tokens this process issued.
    pub fn decode(&self, token: &str) -> Result<TokenClaims, AppError> {
        let mut validation = Validation::new(self.algorithm);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        decode::<TokenClaims>(token, &DecodingKey::from_secret(&[]), &validation)
            .map(|data| data.claims)
            .map_err(|e| AppError::InvalidToken(e.to_string()))
    }
}

/// `now + expires_in` in epoch seconds; fails when the sum leaves `i64`
fn expiry_timestamp(now: i64, expires_in: Duration) -> Result<i64, AppError> {
    i64::try_from(expires_in.as_secs())
        .ok()
        .and_then(|secs| now.checked_add(secs))
        .ok_or_else(|| {
            AppError::InvalidConfig(format!("token lifetime {expires_in:?} is out of range"))
        })
}

/// Parses an expiry such as `"1h"`, `"4w"`, `"90 s"`, `"2 days"` or bare
/// seconds (`"3600"`), truncated to whole seconds
pub fn parse_expiry(input: &str) -> Result<Duration, AppError> {
    let invalid = || AppError::InvalidConfig(format!("invalid expiry `{input}`"));
    let trimmed = input.trim();

    let split = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    let (amount, unit) = trimmed.split_at(split);
    let amount: f64 = amount.parse().map_err(|_| invalid())?;

    let millis_per_unit = match unit.trim().to_ascii_lowercase().as_str() {
        "" => 1_000.0,
        "ms" | "msec" | "msecs" | "millisecond" | "milliseconds" => 1.0,
        "s" | "sec" | "secs" | "second" | "seconds" => 1_000.0,
        "m" | "min" | "mins" | "minute" | "minutes" => 60_000.0,
        "h" | "hr" | "hrs" | "hour" | "hours" => 3_600_000.0,
        "d" | "day" | "days" => 86_400_000.0,
        "w" | "week" | "weeks" => 604_800_000.0,
        "y" | "yr" | "yrs" | "year" | "years" => 31_557_600_000.0,
        _ => return Err(invalid()),
    };

    let secs = (amount * millis_per_unit / 1_000.0).floor();
    if !secs.is_finite() || secs >= i64::MAX as f64 {
        return Err(invalid());
    }
    Ok(Duration::from_secs(secs as u64))
}
