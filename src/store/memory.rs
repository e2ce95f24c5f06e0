/// In-process store with the same semantics as the Postgres store
///
/// One mutex guards all three tables, so every trait method is atomic with
/// respect to every other. Used by the test suite.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{
    DeviceFingerprint, RefreshTokenRecord, RefreshTokenStore, Session, SessionStore,
    Supersession, User, UserStore,
};
use crate::error::StoreError;

#[derive(Default)]
struct MemoryState {
    users: HashMap<Uuid, User>,
    sessions: HashMap<Uuid, Session>,
    /// Keyed by token hash
    refresh_tokens: HashMap<String, RefreshTokenRecord>,
}

impl MemoryState {
    fn active_session_for(&self, user_id: Uuid, device: &DeviceFingerprint) -> Option<&Session> {
        self.sessions.values().find(|s| {
            s.user_id == user_id
                && s.is_active()
                && s.user_agent == device.user_agent
                && s.ip == device.ip
        })
    }

    fn insert_session(&mut self, user_id: Uuid, device: &DeviceFingerprint) -> Session {
        let session = Session {
            id: Uuid::new_v4(),
            user_id,
            user_agent: device.user_agent.clone(),
            ip: device.ip.clone(),
            created_at: Utc::now(),
            revoked_at: None,
        };
        self.sessions.insert(session.id, session.clone());
        session
    }

    fn revoke_tokens_where<F>(&mut self, now: DateTime<Utc>, predicate: F) -> u64
    where
        F: Fn(&RefreshTokenRecord) -> bool,
    {
        let mut count = 0;
        for token in self.refresh_tokens.values_mut() {
            if token.revoked_at.is_none() && predicate(token) {
                token.revoked_at = Some(now);
                count += 1;
            }
        }
        count
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }

    /// Number of active sessions for a user and device
    pub fn active_session_count(
        &self,
        user_id: Uuid,
        device: &DeviceFingerprint,
    ) -> Result<usize, StoreError> {
        let state = self.lock()?;
        Ok(state
            .sessions
            .values()
            .filter(|s| {
                s.user_id == user_id
                    && s.is_active()
                    && s.user_agent == device.user_agent
                    && s.ip == device.ip
            })
            .count())
    }

    /// Soft-delete a user without touching its sessions, as an interrupted
    /// account deletion would leave it.
    pub fn mark_user_deleted(&self, user_id: Uuid) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        match state.users.get_mut(&user_id) {
            Some(user) if user.deleted_at.is_none() => {
                user.deleted_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn create_user(&self, email: &str, password_hash: &str) -> Result<User, StoreError> {
        let mut state = self.lock()?;
        let taken = state
            .users
            .values()
            .any(|u| !u.is_deleted() && u.email.eq_ignore_ascii_case(email));
        if taken {
            return Err(StoreError::UniqueViolation(
                "users_email_active_key".to_string(),
            ));
        }

        let user = User {
            id: Uuid::new_v4(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            created_at: Utc::now(),
            deleted_at: None,
        };
        state.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let state = self.lock()?;
        Ok(state
            .users
            .values()
            .find(|u| !u.is_deleted() && u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, StoreError> {
        let state = self.lock()?;
        Ok(state
            .users
            .get(&user_id)
            .filter(|u| !u.is_deleted())
            .cloned())
    }

    async fn soft_delete_user(&self, user_id: Uuid) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        match state.users.get_mut(&user_id) {
            Some(user) if user.deleted_at.is_none() => {
                user.deleted_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create_session(
        &self,
        user_id: Uuid,
        device: &DeviceFingerprint,
    ) -> Result<Session, StoreError> {
        let mut state = self.lock()?;
        if state.active_session_for(user_id, device).is_some() {
            return Err(StoreError::UniqueViolation(
                "sessions_active_device_key".to_string(),
            ));
        }
        Ok(state.insert_session(user_id, device))
    }

    async fn find_active_session(
        &self,
        user_id: Uuid,
        device: &DeviceFingerprint,
    ) -> Result<Option<Session>, StoreError> {
        let state = self.lock()?;
        Ok(state.active_session_for(user_id, device).cloned())
    }

    async fn find_session(&self, session_id: Uuid) -> Result<Option<Session>, StoreError> {
        let state = self.lock()?;
        Ok(state.sessions.get(&session_id).cloned())
    }

    async fn is_session_active(&self, session_id: Uuid) -> Result<bool, StoreError> {
        let state = self.lock()?;
        Ok(state
            .sessions
            .get(&session_id)
            .map(Session::is_active)
            .unwrap_or(false))
    }

    async fn revoke_session(&self, session_id: Uuid) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        match state.sessions.get_mut(&session_id) {
            Some(session) if session.revoked_at.is_none() => {
                session.revoked_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_all_sessions_for_user(&self, user_id: Uuid) -> Result<u64, StoreError> {
        let mut state = self.lock()?;
        let now = Utc::now();
        let mut count = 0;
        for session in state.sessions.values_mut() {
            if session.user_id == user_id && session.revoked_at.is_none() {
                session.revoked_at = Some(now);
                count += 1;
            }
        }
        Ok(count)
    }

    async fn supersede_session(
        &self,
        user_id: Uuid,
        device: &DeviceFingerprint,
    ) -> Result<Supersession, StoreError> {
        let mut state = self.lock()?;
        let now = Utc::now();

        let mut superseded = Vec::new();
        for session in state.sessions.values_mut() {
            if session.user_id == user_id
                && session.revoked_at.is_none()
                && session.user_agent == device.user_agent
                && session.ip == device.ip
            {
                session.revoked_at = Some(now);
                superseded.push(session.id);
            }
        }

        let tokens_revoked =
            state.revoke_tokens_where(now, |t| superseded.contains(&t.session_id));
        let session = state.insert_session(user_id, device);

        Ok(Supersession {
            session,
            superseded,
            tokens_revoked,
        })
    }

    async fn revoke_sessions_of_deleted_users(&self) -> Result<u64, StoreError> {
        let mut guard = self.lock()?;
        let state = &mut *guard;
        let now = Utc::now();
        let mut count = 0;
        for session in state.sessions.values_mut() {
            let owner_deleted = state
                .users
                .get(&session.user_id)
                .map(User::is_deleted)
                .unwrap_or(false);
            if owner_deleted && session.revoked_at.is_none() {
                session.revoked_at = Some(now);
                count += 1;
            }
        }
        Ok(count)
    }
}

#[async_trait]
impl RefreshTokenStore for MemoryStore {
    async fn create_refresh_token(
        &self,
        session_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<RefreshTokenRecord, StoreError> {
        let mut state = self.lock()?;
        if state.refresh_tokens.contains_key(token_hash) {
            return Err(StoreError::UniqueViolation(
                "refresh_tokens_token_hash_key".to_string(),
            ));
        }

        let record = RefreshTokenRecord {
            id: Uuid::new_v4(),
            session_id,
            token_hash: token_hash.to_string(),
            created_at: Utc::now(),
            expires_at,
            revoked_at: None,
            redeemed_at: None,
        };
        state
            .refresh_tokens
            .insert(record.token_hash.clone(), record.clone());
        Ok(record)
    }

    async fn find_refresh_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshTokenRecord>, StoreError> {
        let state = self.lock()?;
        Ok(state.refresh_tokens.get(token_hash).cloned())
    }

    async fn redeem_refresh_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshTokenRecord>, StoreError> {
        let mut state = self.lock()?;
        let now = Utc::now();
        match state.refresh_tokens.get_mut(token_hash) {
            Some(token) if token.revoked_at.is_none() && token.expires_at > now => {
                token.revoked_at = Some(now);
                token.redeemed_at = Some(now);
                Ok(Some(token.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn revoke_refresh_tokens_for_session(
        &self,
        session_id: Uuid,
    ) -> Result<u64, StoreError> {
        let mut state = self.lock()?;
        Ok(state.revoke_tokens_where(Utc::now(), |t| t.session_id == session_id))
    }

    async fn revoke_all_refresh_tokens_for_user(&self, user_id: Uuid) -> Result<u64, StoreError> {
        let mut state = self.lock()?;
        let sessions: Vec<Uuid> = state
            .sessions
            .values()
            .filter(|s| s.user_id == user_id)
            .map(|s| s.id)
            .collect();
        Ok(state.revoke_tokens_where(Utc::now(), |t| sessions.contains(&t.session_id)))
    }

    async fn revoke_orphaned_refresh_tokens(&self) -> Result<u64, StoreError> {
        let mut state = self.lock()?;
        let revoked_sessions: Vec<Uuid> = state
            .sessions
            .values()
            .filter(|s| !s.is_active())
            .map(|s| s.id)
            .collect();
        Ok(state.revoke_tokens_where(Utc::now(), |t| revoked_sessions.contains(&t.session_id)))
    }
}
