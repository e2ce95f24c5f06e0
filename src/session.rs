/// Session Lifecycle Manager
///
/// Composes the credential verifier, the token codec and the store into the
/// login / refresh / logout / delete state machine. Holds no mutable state of
/// its own; every decision that can race is delegated to a single conditional
/// store operation.

use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::auth::{
    hash_password, hash_token, verify_password, Claims, IssuedRefreshToken, TokenCodec,
};
use crate::configuration::{PasswordSettings, SessionSettings};
use crate::error::{AppError, AuthError, ErrorContext, StoreError};
use crate::store::{AuthStore, DeviceFingerprint, RefreshTokenState, Session, User};
use crate::validators::{is_valid_email, is_valid_password};

/// Verified against when the email is unknown, so both paths cost one bcrypt run.
const DUMMY_PASSWORD: &str = "timing-equaliser-not-a-real-password";

/// Tokens handed to the client after login or refresh
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub sessions_revoked: u64,
    pub refresh_tokens_revoked: u64,
}

#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn AuthStore>,
    codec: TokenCodec,
    hash_cost: u32,
    refresh_ttl: Duration,
    revoke_session_on_reuse: bool,
    reuse_grace: Duration,
    dummy_hash: String,
}

impl SessionManager {
    /// # Errors
    /// Fails if the session settings are out of bounds or the dummy hash
    /// cannot be computed with the configured cost
    pub fn new(
        store: Arc<dyn AuthStore>,
        codec: TokenCodec,
        password: &PasswordSettings,
        session: &SessionSettings,
    ) -> Result<Self, AppError> {
        session.validate()?;
        let dummy_hash = hash_password(DUMMY_PASSWORD, password.hash_cost)?;
        Ok(Self {
            store,
            codec,
            hash_cost: password.hash_cost,
            refresh_ttl: Duration::days(session.refresh_token_expiry_days),
            revoke_session_on_reuse: session.revoke_session_on_reuse,
            reuse_grace: Duration::seconds(session.reuse_grace_secs as i64),
            dummy_hash,
        })
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    /// Create a user. The email is normalised before it is stored.
    pub async fn register(&self, email: &str, password: &str) -> Result<User, AppError> {
        let email = is_valid_email(email)?;
        is_valid_password(password)?;

        let password_hash = self.hash(password).await?;

        match self.store.create_user(&email, &password_hash).await {
            Ok(user) => {
                tracing::info!(user_id = %user.id, "User registered");
                Ok(user)
            }
            Err(StoreError::UniqueViolation(_)) => {
                Err(AppError::Conflict("email already registered".to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Authenticate and open a fresh session for the device, superseding
    /// any session the device already had.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        device: &DeviceFingerprint,
    ) -> Result<TokenPair, AppError> {
        let email = email.trim().to_lowercase();

        let user = match self.store.find_user_by_email(&email).await? {
            Some(user) => user,
            None => {
                self.verify(self.dummy_hash.clone(), password).await?;
                return Err(AuthError::InvalidCredentials.into());
            }
        };

        if !self.verify(user.password_hash.clone(), password).await? {
            tracing::info!(user_id = %user.id, "Login rejected: wrong password");
            return Err(AuthError::InvalidCredentials.into());
        }

        let outcome = self.store.supersede_session(user.id, device).await?;
        if !outcome.superseded.is_empty() {
            tracing::info!(
                user_id = %user.id,
                session_id = %outcome.session.id,
                superseded = ?outcome.superseded,
                tokens_revoked = outcome.tokens_revoked,
                "Superseded previous session for device"
            );
        }

        let pair = self.issue_pair(user.id, outcome.session.id).await?;
        tracing::info!(user_id = %user.id, session_id = %outcome.session.id, "Login succeeded");
        Ok(pair)
    }

    /// Redeem a refresh token and rotate it
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AppError> {
        if refresh_token.is_empty() {
            return Err(AuthError::MissingToken.into());
        }
        let token_hash = hash_token(refresh_token);

        let record = match self.store.redeem_refresh_token(&token_hash).await? {
            Some(record) => record,
            None => return Err(self.reject_refresh(&token_hash).await.into()),
        };

        let session = match self.store.find_session(record.session_id).await? {
            Some(session) if session.is_active() => session,
            _ => {
                tracing::info!(
                    session_id = %record.session_id,
                    "Refresh rejected: session revoked"
                );
                return Err(AuthError::SessionRevoked.into());
            }
        };

        if self.store.find_user_by_id(session.user_id).await?.is_none() {
            return Err(AuthError::AccountDeleted.into());
        }

        let pair = self.issue_pair(session.user_id, session.id).await?;
        tracing::info!(
            user_id = %session.user_id,
            session_id = %session.id,
            "Refresh token rotated"
        );
        Ok(pair)
    }

    /// Resolve access token claims to a live user. Every protected operation
    /// goes through here, so a revoked session rejects otherwise valid tokens.
    pub async fn authorize(&self, claims: &Claims) -> Result<User, AppError> {
        let session = self.owned_session(claims).await?;
        if !session.is_active() {
            return Err(AuthError::SessionRevoked.into());
        }

        self.store
            .find_user_by_id(session.user_id)
            .await?
            .ok_or_else(|| AuthError::AccountDeleted.into())
    }

    pub async fn current_user(&self, claims: &Claims) -> Result<User, AppError> {
        self.authorize(claims).await
    }

    /// Revoke the token's session and its refresh tokens.
    ///
    /// Succeeds when the session is already revoked.
    pub async fn logout(&self, claims: &Claims) -> Result<(), AppError> {
        let session = self.owned_session(claims).await?;

        let revoked = self.store.revoke_session(session.id).await?;
        let tokens_revoked = self.store.revoke_refresh_tokens_for_session(session.id).await?;

        tracing::info!(
            user_id = %session.user_id,
            session_id = %session.id,
            revoked,
            tokens_revoked,
            "Logged out"
        );
        Ok(())
    }

    /// Revoke every session of the caller. Returns the number revoked.
    pub async fn logout_all(&self, claims: &Claims) -> Result<u64, AppError> {
        let user = self.authorize(claims).await?;

        let sessions_revoked = self.store.revoke_all_sessions_for_user(user.id).await?;
        let tokens_revoked = self.store.revoke_all_refresh_tokens_for_user(user.id).await?;

        tracing::info!(
            user_id = %user.id,
            sessions_revoked,
            tokens_revoked,
            "Logged out of all sessions"
        );
        Ok(sessions_revoked)
    }

    /// Re-verify the password, revoke all credentials, then soft-delete.
    ///
    /// Cascade failures are logged and left for `sweep`; only the soft delete
    /// decides the outcome.
    pub async fn delete_account(&self, claims: &Claims, password: &str) -> Result<(), AppError> {
        let user = self.authorize(claims).await?;

        if !self.verify(user.password_hash.clone(), password).await? {
            tracing::info!(user_id = %user.id, "Account deletion rejected: wrong password");
            return Err(AuthError::InvalidCredentials.into());
        }

        let ctx = ErrorContext::new("delete_account").with_user_id(user.id.to_string());
        if let Err(e) = self.store.revoke_all_sessions_for_user(user.id).await {
            ctx.log_suppressed(&e.into());
        }
        if let Err(e) = self.store.revoke_all_refresh_tokens_for_user(user.id).await {
            ctx.log_suppressed(&e.into());
        }

        if !self.store.soft_delete_user(user.id).await? {
            return Err(AppError::Conflict("account already deleted".to_string()));
        }

        tracing::info!(user_id = %user.id, "Account deleted");
        Ok(())
    }

    /// Revoke credentials that a failed cascade left behind
    pub async fn sweep(&self) -> Result<SweepReport, AppError> {
        let sessions_revoked = self.store.revoke_sessions_of_deleted_users().await?;
        let refresh_tokens_revoked = self.store.revoke_orphaned_refresh_tokens().await?;

        let report = SweepReport {
            sessions_revoked,
            refresh_tokens_revoked,
        };
        if report != SweepReport::default() {
            tracing::info!(
                sessions_revoked,
                refresh_tokens_revoked,
                "Sweep revoked orphaned credentials"
            );
        }
        Ok(report)
    }

    async fn owned_session(&self, claims: &Claims) -> Result<Session, AppError> {
        match self.store.find_session(claims.session_id()).await? {
            Some(session) if session.user_id == claims.user_id() => Ok(session),
            _ => Err(AuthError::SessionRevoked.into()),
        }
    }

    async fn issue_pair(&self, user_id: Uuid, session_id: Uuid) -> Result<TokenPair, AppError> {
        let issued = IssuedRefreshToken::new(self.refresh_ttl);
        self.store
            .create_refresh_token(session_id, &issued.token_hash, issued.expires_at)
            .await?;

        let access_token = self
            .codec
            .issue_access(user_id, session_id, self.codec.access_ttl())?;

        Ok(TokenPair {
            access_token,
            refresh_token: issued.token,
            expires_in: self.codec.access_ttl().num_seconds(),
        })
    }

    /// Classify a token that could not be redeemed, revoking its session if
    /// it was redeemed earlier and reuse handling is on.
    async fn reject_refresh(&self, token_hash: &str) -> AuthError {
        let record = match self.store.find_refresh_token(token_hash).await {
            Ok(Some(record)) => record,
            Ok(None) => return AuthError::RefreshTokenRejected,
            Err(e) => {
                ErrorContext::new("refresh").log_suppressed(&e.into());
                return AuthError::RefreshTokenRejected;
            }
        };

        let now = Utc::now();
        let redeemed_at = match (record.state_at(now), record.redeemed_at) {
            (RefreshTokenState::Redeemed, Some(redeemed_at)) => redeemed_at,
            _ => return AuthError::RefreshTokenRejected,
        };
        if !self.revoke_session_on_reuse || now - redeemed_at < self.reuse_grace {
            return AuthError::RefreshTokenRejected;
        }

        tracing::warn!(session_id = %record.session_id, "Refresh token reuse detected");
        let ctx = ErrorContext::new("refresh_reuse");
        match self.store.revoke_session(record.session_id).await {
            Ok(true) => {
                tracing::warn!(session_id = %record.session_id, "Session revoked after reuse")
            }
            Ok(false) => {}
            Err(e) => ctx.log_suppressed(&e.into()),
        }
        if let Err(e) = self.store.revoke_refresh_tokens_for_session(record.session_id).await {
            ctx.log_suppressed(&e.into());
        }
        AuthError::RefreshTokenReused
    }

    async fn hash(&self, password: &str) -> Result<String, AppError> {
        let password = password.to_owned();
        let cost = self.hash_cost;
        tokio::task::spawn_blocking(move || hash_password(&password, cost))
            .await
            .map_err(|e| AppError::Internal(format!("Password hashing task failed: {}", e)))?
    }

    async fn verify(&self, stored_hash: String, candidate: &str) -> Result<bool, AppError> {
        let candidate = candidate.to_owned();
        tokio::task::spawn_blocking(move || verify_password(&stored_hash, &candidate))
            .await
            .map_err(|e| AppError::Internal(format!("Password verification task failed: {}", e)))
    }
}
