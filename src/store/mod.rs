/// Persistence for users, sessions and refresh tokens
///
/// The store is the only shared state in the service and the sole arbiter
/// of concurrency. Every state change that must not race (redeeming a
/// refresh token, revoking a session, superseding a device's session) is a
/// single conditional operation that reports whether it took effect.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Coarse client identity used to scope one session per device
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceFingerprint {
    pub user_agent: String,
    pub ip: String,
}

impl DeviceFingerprint {
    pub fn new(user_agent: impl Into<String>, ip: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            ip: ip.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Revoked,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub user_agent: String,
    pub ip: String,
    pub created_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn state(&self) -> SessionState {
        match self.revoked_at {
            None => SessionState::Active,
            Some(_) => SessionState::Revoked,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }
}

/// State of a refresh token row, ignoring its session
///
/// Redemption sets both `redeemed_at` and `revoked_at`; cascade revocation
/// sets only `revoked_at`. A token that was redeemed reads as `Redeemed`
/// even if its session was revoked afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTokenState {
    Live,
    Expired,
    Redeemed,
    Revoked,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefreshTokenRecord {
    pub id: Uuid,
    pub session_id: Uuid,
    pub token_hash: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub redeemed_at: Option<DateTime<Utc>>,
}

impl RefreshTokenRecord {
    pub fn state_at(&self, now: DateTime<Utc>) -> RefreshTokenState {
        if self.redeemed_at.is_some() {
            RefreshTokenState::Redeemed
        } else if self.revoked_at.is_some() {
            RefreshTokenState::Revoked
        } else if now >= self.expires_at {
            RefreshTokenState::Expired
        } else {
            RefreshTokenState::Live
        }
    }
}

/// Outcome of replacing a device's session at login
#[derive(Debug, Clone)]
pub struct Supersession {
    pub session: Session,
    /// Sessions for the same device that were active and are now revoked
    pub superseded: Vec<Uuid>,
    pub tokens_revoked: u64,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a user. Fails with `UniqueViolation` if an undeleted user holds the email.
    async fn create_user(&self, email: &str, password_hash: &str) -> Result<User, StoreError>;

    /// Case-insensitive lookup that skips soft-deleted users
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    /// Lookup that skips soft-deleted users
    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, StoreError>;

    /// Mark the user deleted. Returns `false` if already deleted or unknown.
    async fn soft_delete_user(&self, user_id: Uuid) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert an active session. Fails with `UniqueViolation` if the device
    /// already has an active session; use `supersede_session` at login.
    async fn create_session(
        &self,
        user_id: Uuid,
        device: &DeviceFingerprint,
    ) -> Result<Session, StoreError>;

    async fn find_active_session(
        &self,
        user_id: Uuid,
        device: &DeviceFingerprint,
    ) -> Result<Option<Session>, StoreError>;

    async fn find_session(&self, session_id: Uuid) -> Result<Option<Session>, StoreError>;

    async fn is_session_active(&self, session_id: Uuid) -> Result<bool, StoreError>;

    /// Revoke iff currently active. Returns whether this call revoked it.
    async fn revoke_session(&self, session_id: Uuid) -> Result<bool, StoreError>;

    /// Returns the number of sessions this call revoked.
    async fn revoke_all_sessions_for_user(&self, user_id: Uuid) -> Result<u64, StoreError>;

    /// Atomically revoke the device's active session (and its refresh
    /// tokens) and create a new one. Concurrent calls for the same user and
    /// device are serialised; exactly one session survives.
    async fn supersede_session(
        &self,
        user_id: Uuid,
        device: &DeviceFingerprint,
    ) -> Result<Supersession, StoreError>;

    /// Revoke sessions still active for soft-deleted users
    async fn revoke_sessions_of_deleted_users(&self) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    async fn create_refresh_token(
        &self,
        session_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<RefreshTokenRecord, StoreError>;

    async fn find_refresh_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshTokenRecord>, StoreError>;

    /// Compare-and-swap a live token to redeemed (and so revoked).
    ///
    /// Returns the record only to the one caller that flipped it; every
    /// other caller (concurrent, later, expired, unknown) gets `None`.
    async fn redeem_refresh_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshTokenRecord>, StoreError>;

    async fn revoke_refresh_tokens_for_session(&self, session_id: Uuid)
        -> Result<u64, StoreError>;

    async fn revoke_all_refresh_tokens_for_user(&self, user_id: Uuid) -> Result<u64, StoreError>;

    /// Revoke live tokens whose session is already revoked
    async fn revoke_orphaned_refresh_tokens(&self) -> Result<u64, StoreError>;
}

/// Everything the session manager needs from storage
pub trait AuthStore: UserStore + SessionStore + RefreshTokenStore {}

impl<T: UserStore + SessionStore + RefreshTokenStore> AuthStore for T {}
