use chrono::Utc;
use serde::{Deserialize, Serialize};

/// The compact signed claim issued by the external identity issuer.
///
/// Roles are open-ended strings (`operator`, `callcentre_operator`,
/// `director`, `technician`, ...) rather than a closed enum: the fan-out
/// engine does not own the identity model, it only reads `{userId, role}`
/// off a token minted elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,
    pub role: String,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    pub fn new(user_id: i64, role: impl Into<String>, duration_secs: i64) -> Self {
        let now = Utc::now().timestamp();
        Self {
            sub: user_id,
            role: role.into(),
            iat: now,
            exp: now + duration_secs,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() > self.exp
    }
}

/// A verified identity attached to an authenticated connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthedUser {
    pub user_id: i64,
    pub role: String,
}

impl From<Claims> for AuthedUser {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.sub,
            role: claims.role,
        }
    }
}
