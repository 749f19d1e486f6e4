//! C6 — webhook ingress.
//!
//! Every publish endpoint carries a shared-secret `token` field in its JSON
//! body, compared in constant time against the configured secret (spec.md
//! 4.5). Mismatch returns 401 without echoing the submitted value, the way
//! `WEB_RTC::webhook::verify_signature` compares HMAC digests.

mod public;

pub use public::router;

use relay_shared::errors::{AppError, ErrorCode};
use subtle::ConstantTimeEq;

pub fn require_webhook_secret(configured: &str, provided: &str) -> Result<(), AppError> {
    let matches: bool = if configured.len() == provided.len() {
        configured.as_bytes().ct_eq(provided.as_bytes()).into()
    } else {
        false
    };

    if matches {
        Ok(())
    } else {
        Err(AppError::new(ErrorCode::WebhookUnauthorized, "unauthorized"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_secret_passes() {
        assert!(require_webhook_secret("shared-secret-value", "shared-secret-value").is_ok());
    }

    #[test]
    fn mismatched_secret_rejected() {
        assert!(require_webhook_secret("shared-secret-value", "wrong").is_err());
    }

    #[test]
    fn different_length_rejected_without_panicking() {
        assert!(require_webhook_secret("short", "a-much-longer-candidate").is_err());
    }
}
