/// Password Hashing and Verification
///
/// bcrypt with a configurable work factor. Both operations are CPU-bound and
/// are run off the async executor by `SessionManager`.

use bcrypt::{hash, verify};

use crate::error::AppError;

/// Hash a password using bcrypt
///
/// # Arguments
/// * `password` - Plain text password to hash
/// * `cost` - bcrypt work factor
///
/// # Errors
/// Returns an internal error if bcrypt rejects the cost or fails to hash
pub fn hash_password(password: &str, cost: u32) -> Result<String, AppError> {
    hash(password, cost).map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))
}

/// Verify a candidate password against a stored hash
///
/// Comparison is constant-time inside bcrypt. A stored hash that cannot be
/// parsed counts as a mismatch, never as an error.
pub fn verify_password(stored_hash: &str, candidate: &str) -> bool {
    match verify(candidate, stored_hash) {
        Ok(matches) => matches,
        Err(e) => {
            tracing::warn!("Stored password hash could not be parsed: {}", e);
            false
        }
    }
}
