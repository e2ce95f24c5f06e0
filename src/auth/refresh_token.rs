/// Refresh Token Generation
///
/// Refresh tokens are:
/// - 32 bytes from the operating system CSPRNG, hex encoded (256 bits)
/// - Opaque: no embedded user or session data
/// - Hashed with SHA-256 before storage; only the client holds the plaintext

use chrono::{DateTime, Duration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

const TOKEN_BYTES: usize = 32;

/// Generate a new opaque refresh token
pub fn generate_refresh_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// SHA-256 digest of a refresh token, as stored
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// A freshly minted refresh token, before it is persisted
#[derive(Debug, Clone)]
pub struct IssuedRefreshToken {
    /// Returned to the client, never stored
    pub token: String,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
}

impl IssuedRefreshToken {
    pub fn new(ttl: Duration) -> Self {
        let token = generate_refresh_token();
        let token_hash = hash_token(&token);
        Self {
            token,
            token_hash,
            expires_at: Utc::now() + ttl,
        }
    }
}
