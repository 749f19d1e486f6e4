//! C1 — token verifier.
//!
//! Resolves a compact signed claim from whichever of the five sources the
//! caller presented, optionally strips and checks a cookie signature, then
//! verifies the claim itself. See spec.md 4.1. Shared between the socket
//! handshake path (`relay-core`) and the plain REST extractor below, since
//! both accept the same bearer/cookie/handshake sources.

use hmac::{Hmac, Mac};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::types::auth::{AuthedUser, Claims};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("no token candidate present")]
    Missing,
    #[error("cookie signature mismatch")]
    BadCookieSignature,
    #[error("invalid token: {0}")]
    Invalid(String),
    #[error("token has expired")]
    Expired,
}

/// Every place a token could have arrived from, in spec.md 4.1 priority
/// order. All fields optional; the first `Some` non-empty wins.
#[derive(Debug, Default)]
pub struct TokenSources<'a> {
    pub message_token: Option<&'a str>,
    pub handshake_auth_token: Option<&'a str>,
    pub query_token: Option<&'a str>,
    pub auth_header: Option<&'a str>,
    pub cookie_header: Option<&'a str>,
}

/// Picks the winning raw token candidate. Does not yet validate it — a
/// cookie candidate still carries its signature suffix at this point.
pub fn resolve_token_candidate(sources: &TokenSources<'_>) -> Option<String> {
    if let Some(t) = non_empty(sources.message_token) {
        return Some(t.to_string());
    }
    if let Some(t) = non_empty(sources.handshake_auth_token) {
        return Some(t.to_string());
    }
    if let Some(t) = non_empty(sources.query_token) {
        return Some(t.to_string());
    }
    if let Some(header) = non_empty(sources.auth_header) {
        if let Some(rest) = header.strip_prefix("Bearer ") {
            if !rest.is_empty() {
                return Some(rest.to_string());
            }
        }
    }
    if let Some(cookie_header) = non_empty(sources.cookie_header) {
        return extract_access_token_cookie(cookie_header);
    }
    None
}

fn non_empty<'a>(value: Option<&'a str>) -> Option<&'a str> {
    value.filter(|v| !v.is_empty())
}

/// Parses the handshake `Cookie:` header and returns the percent-decoded
/// value of `access_token` or its `__Host-` prefixed variant.
fn extract_access_token_cookie(cookie_header: &str) -> Option<String> {
    for raw in cookie::Cookie::split_parse(cookie_header).flatten() {
        let name = raw.name();
        if name == "access_token" || name == "__Host-access_token" {
            return Some(raw.value().to_string());
        }
    }
    None
}

/// Computes the HMAC-SHA256 hex signature over `message` with `secret`.
pub fn sign_cookie_message(secret: &str, message: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time verification of a cookie signature.
pub fn verify_cookie_signature(secret: &str, message: &[u8], signature: &str) -> bool {
    let expected = sign_cookie_message(secret, message);
    expected.as_bytes().ct_eq(signature.as_bytes()).into()
}

/// If `candidate` carries an appended cookie signature (four dot-separated
/// segments where a bare compact signed claim has three), verifies and
/// strips it. Returns the bare claim string to hand to `verify_claims`.
///
/// A signature-mismatch is a hard rejection, per spec.md 4.1.
pub fn strip_cookie_signature(candidate: &str, cookie_secret: &str) -> Result<String, TokenError> {
    let segments: Vec<&str> = candidate.split('.').collect();
    if segments.len() != 4 {
        return Ok(candidate.to_string());
    }

    let jwt_part = segments[0..3].join(".");
    let signature = segments[3];

    if verify_cookie_signature(cookie_secret, jwt_part.as_bytes(), signature) {
        Ok(jwt_part)
    } else {
        Err(TokenError::BadCookieSignature)
    }
}

/// Verifies the compact signed claim and returns the resolved identity.
pub fn verify_claims(token: &str, jwt_secret: &str) -> Result<AuthedUser, TokenError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;

    let token_data = decode::<Claims>(token, &DecodingKey::from_secret(jwt_secret.as_bytes()), &validation)
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenError::Expired,
            _ => TokenError::Invalid(e.to_string()),
        })?;

    if token_data.claims.is_expired() {
        return Err(TokenError::Expired);
    }

    Ok(AuthedUser::from(token_data.claims))
}

/// End-to-end C1 entry point: resolve the winning candidate, verify any
/// cookie signature, decode the claim.
pub fn authenticate(
    sources: &TokenSources<'_>,
    jwt_secret: &str,
    cookie_secret: &str,
) -> Result<AuthedUser, TokenError> {
    let candidate = resolve_token_candidate(sources).ok_or(TokenError::Missing)?;
    let came_from_cookie = sources.message_token.filter(|v| !v.is_empty()).is_none()
        && sources.handshake_auth_token.filter(|v| !v.is_empty()).is_none()
        && sources.query_token.filter(|v| !v.is_empty()).is_none()
        && non_empty(sources.auth_header).is_none();

    let bare = if came_from_cookie {
        strip_cookie_signature(&candidate, cookie_secret)?
    } else {
        candidate
    };

    verify_claims(&bare, jwt_secret)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_token(secret: &str, user_id: i64, role: &str) -> String {
        let claims = Claims::new(user_id, role, 3600);
        jsonwebtoken::encode(
            &jsonwebtoken::Header::new(Algorithm::HS256),
            &claims,
            &jsonwebtoken::EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn priority_prefers_message_token_over_everything_else() {
        let sources = TokenSources {
            message_token: Some("from-message"),
            handshake_auth_token: Some("from-handshake"),
            query_token: Some("from-query"),
            auth_header: Some("Bearer from-header"),
            cookie_header: Some("access_token=from-cookie"),
        };
        assert_eq!(resolve_token_candidate(&sources).as_deref(), Some("from-message"));
    }

    #[test]
    fn falls_through_to_cookie_when_nothing_else_present() {
        let sources = TokenSources {
            cookie_header: Some("other=1; access_token=abc.def.ghi"),
            ..Default::default()
        };
        assert_eq!(resolve_token_candidate(&sources).as_deref(), Some("abc.def.ghi"));
    }

    #[test]
    fn host_prefixed_cookie_variant_is_recognized() {
        let sources = TokenSources {
            cookie_header: Some("__Host-access_token=xyz"),
            ..Default::default()
        };
        assert_eq!(resolve_token_candidate(&sources).as_deref(), Some("xyz"));
    }

    #[test]
    fn bearer_header_strips_scheme() {
        let sources = TokenSources {
            auth_header: Some("Bearer abc123"),
            ..Default::default()
        };
        assert_eq!(resolve_token_candidate(&sources).as_deref(), Some("abc123"));
    }

    #[test]
    fn cookie_signature_roundtrip() {
        let secret = "cookie-secret-at-least-32-chars!!";
        let jwt_part = "aaa.bbb.ccc";
        let sig = sign_cookie_message(secret, jwt_part.as_bytes());
        let signed = format!("{jwt_part}.{sig}");

        let stripped = strip_cookie_signature(&signed, secret).unwrap();
        assert_eq!(stripped, jwt_part);
    }

    #[test]
    fn cookie_signature_mismatch_is_hard_rejection() {
        let secret = "cookie-secret-at-least-32-chars!!";
        let signed = "aaa.bbb.ccc.deadbeef";
        assert!(matches!(
            strip_cookie_signature(signed, secret),
            Err(TokenError::BadCookieSignature)
        ));
    }

    #[test]
    fn three_segment_candidate_passes_through_unsigned() {
        let bare = "aaa.bbb.ccc";
        assert_eq!(strip_cookie_signature(bare, "whatever").unwrap(), bare);
    }

    #[test]
    fn end_to_end_authenticate_via_message_token() {
        let secret = "jwt-secret-at-least-32-characters!!";
        let token = make_token(secret, 7, "operator");
        let sources = TokenSources {
            message_token: Some(&token),
            ..Default::default()
        };
        let user = authenticate(&sources, secret, secret).unwrap();
        assert_eq!(user.user_id, 7);
        assert_eq!(user.role, "operator");
    }
}
