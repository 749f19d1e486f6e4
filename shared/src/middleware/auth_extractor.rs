use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::errors::{AppError, ErrorCode};
use crate::token::{self, TokenError, TokenSources};
use crate::types::auth::AuthedUser;

/// HTTP-route counterpart of the socket handshake verifier: every plain
/// REST endpoint (inbox, push subscriptions, stats) accepts a verified
/// end-user token presented either as `Authorization: Bearer` or the signed
/// `access_token` cookie, per spec.md 6 — the same two sources C1 accepts
/// for everything that isn't a live socket.
#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthedUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let auth_header = parts.headers.get("Authorization").and_then(|v| v.to_str().ok());
        let cookie_header = parts.headers.get("Cookie").and_then(|v| v.to_str().ok());

        let sources = TokenSources {
            auth_header,
            cookie_header,
            ..Default::default()
        };

        let jwt_secret = jwt_secret();
        let cookie_secret = cookie_secret(&jwt_secret);

        token::authenticate(&sources, &jwt_secret, &cookie_secret).map_err(map_token_error)
    }
}

fn jwt_secret() -> String {
    std::env::var("JWT_SECRET").unwrap_or_else(|_| "development-secret-change-in-production".to_string())
}

fn cookie_secret(jwt_secret: &str) -> String {
    std::env::var("COOKIE_SECRET").unwrap_or_else(|_| jwt_secret.to_string())
}

fn map_token_error(err: TokenError) -> AppError {
    match err {
        TokenError::Missing => AppError::new(ErrorCode::Unauthorized, "missing authorization token"),
        TokenError::BadCookieSignature => AppError::new(ErrorCode::Unauthorized, "cookie signature mismatch"),
        TokenError::Expired => AppError::new(ErrorCode::TokenExpired, "token has expired"),
        TokenError::Invalid(reason) => AppError::new(ErrorCode::InvalidToken, format!("invalid token: {reason}")),
    }
}

/// Optional auth extractor; never rejects, yields `None` on any failure.
pub struct OptionalAuthUser(pub Option<AuthedUser>);

#[axum::async_trait]
impl<S> FromRequestParts<S> for OptionalAuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match AuthedUser::from_request_parts(parts, state).await {
            Ok(user) => Ok(Self(Some(user))),
            Err(_) => Ok(Self(None)),
        }
    }
}
