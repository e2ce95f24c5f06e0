/// Access Token Codec
///
/// Issues and validates HS256-signed access tokens. Validation pins the
/// algorithm: a token whose header asserts anything other than HS256 is
/// rejected before its signature is looked at.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use uuid::Uuid;

use crate::auth::claims::Claims;
use crate::configuration::JwtSettings;
use crate::error::{AppError, AuthError};

const ALGORITHM: Algorithm = Algorithm::HS256;

/// Signs and verifies access tokens with a server secret.
///
/// Built once from configuration and shared; tests construct their own with
/// distinct secrets.
#[derive(Clone)]
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    access_ttl: chrono::Duration,
}

impl TokenCodec {
    pub fn new(config: &JwtSettings) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            issuer: config.issuer.clone(),
            access_ttl: chrono::Duration::seconds(config.access_token_expiry),
        }
    }

    /// Lifetime given to access tokens by default
    pub fn access_ttl(&self) -> chrono::Duration {
        self.access_ttl
    }

    /// Generate a signed access token for a session
    ///
    /// # Errors
    /// Returns an internal error if encoding fails
    pub fn issue_access(
        &self,
        user_id: Uuid,
        session_id: Uuid,
        ttl: chrono::Duration,
    ) -> Result<String, AppError> {
        let claims = Claims::new(user_id, session_id, ttl, self.issuer.clone());

        encode(&Header::new(ALGORITHM), &claims, &self.encoding_key)
            .map_err(|e| AppError::Internal(format!("Token generation failed: {}", e)))
    }

    /// Validate an access token and extract its claims
    ///
    /// Checks algorithm, signature, issuer and expiry. Session liveness is
    /// not checked here.
    pub fn parse_access(&self, token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(ALGORITHM);
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        validation.leeway = 0;

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!("Access token rejected: {}", e);
                match e.kind() {
                    ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                    ErrorKind::InvalidAlgorithm => AuthError::WrongAlgorithm,
                    _ => AuthError::TokenInvalid,
                }
            })
    }
}
