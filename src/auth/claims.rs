/// Access token claims
///
/// A fixed structure: the user, the session it was issued for, and the
/// standard time claims. Tokens carrying any other field are rejected at
/// decode time.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// JWT claims for access tokens
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: Uuid,
    /// Session ID
    pub sid: Uuid,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issuer
    pub iss: String,
}

impl Claims {
    /// Create new claims for a session
    ///
    /// # Arguments
    /// * `user_id` - Owning user
    /// * `session_id` - Session the token is bound to
    /// * `ttl` - Lifetime from now
    /// * `issuer` - Issuer identifier
    pub fn new(user_id: Uuid, session_id: Uuid, ttl: chrono::Duration, issuer: String) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            sub: user_id,
            sid: session_id,
            iat: now,
            exp: now + ttl.num_seconds(),
            iss: issuer,
        }
    }

    pub fn user_id(&self) -> Uuid {
        self.sub
    }

    pub fn session_id(&self) -> Uuid {
        self.sid
    }
}
