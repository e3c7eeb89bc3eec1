use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Engine not found: {0}")]
    EngineNotFound(String),

    #[error("Engine already registered: {0}")]
    EngineAlreadyRegistered(String),

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Refresh token is stale for session: {0}")]
    StaleRefreshToken(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("JWT error: {0}")]
    JwtError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Internal error")]
    Internal,
}

impl AppError {
    /// Whether this error should be reported as a security event (replayed or
    /// superseded credentials) rather than an ordinary failure
    pub fn is_security_violation(&self) -> bool {
        matches!(self, AppError::StaleRefreshToken(_))
    }

    /// Whether a caller may reasonably retry the operation.
    ///
    /// Only storage faults qualify; token and nonce failures never do.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::DatabaseError(_))
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_stale_refresh_is_security_violation() {
        assert!(AppError::StaleRefreshToken("s".to_string()).is_security_violation());
        assert!(!AppError::InvalidToken("bad".to_string()).is_security_violation());
        assert!(!AppError::SessionNotFound("s".to_string()).is_security_violation());
    }

    #[test]
    fn test_token_errors_are_not_retryable() {
        assert!(!AppError::InvalidToken("expired".to_string()).is_retryable());
        assert!(!AppError::StaleRefreshToken("s".to_string()).is_retryable());
        assert!(AppError::DatabaseError("connection reset".to_string()).is_retryable());
    }
}
