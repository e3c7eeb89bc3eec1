use rauth::session::TokenClaims;
use rauth::{AppError, Session, TokenCodec};

pub fn decode_access(codec: &TokenCodec, session: &Session) -> TokenClaims {
    let token = session.access_token().expect("access token should sign");
    codec.decode(&token).expect("access token should decode")
}

pub fn assert_stale<T: std::fmt::Debug>(result: Result<T, AppError>) {
    match result {
        Err(error @ AppError::StaleRefreshToken(_)) => assert!(error.is_security_violation()),
        other => panic!("expected StaleRefreshToken, got {other:?}"),
    }
}

pub fn assert_session_not_found<T: std::fmt::Debug>(result: Result<T, AppError>) {
    assert!(
        matches!(result, Err(AppError::SessionNotFound(_))),
        "expected SessionNotFound, got {result:?}"
    );
}
