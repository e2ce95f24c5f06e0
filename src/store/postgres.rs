/// Postgres-backed store
///
/// Conditional updates (`... AND revoked_at IS NULL`) carry the concurrency
/// guarantees: the database decides which of two racing callers wins and
/// `rows_affected` / `RETURNING` tells each caller whether it did.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{
    DeviceFingerprint, RefreshTokenRecord, RefreshTokenStore, Session, SessionStore,
    Supersession, User, UserStore,
};
use crate::error::StoreError;

const USER_COLUMNS: &str = "id, email, password_hash, created_at, deleted_at";
const SESSION_COLUMNS: &str = "id, user_id, user_agent, ip, created_at, revoked_at";
const REFRESH_TOKEN_COLUMNS: &str =
    "id, session_id, token_hash, created_at, expires_at, revoked_at, redeemed_at";

type UserRow = (Uuid, String, String, DateTime<Utc>, Option<DateTime<Utc>>);
type SessionRow = (Uuid, Uuid, String, String, DateTime<Utc>, Option<DateTime<Utc>>);
type RefreshTokenRow = (
    Uuid,
    Uuid,
    String,
    DateTime<Utc>,
    DateTime<Utc>,
    Option<DateTime<Utc>>,
    Option<DateTime<Utc>>,
);

fn user_from_row(row: UserRow) -> User {
    let (id, email, password_hash, created_at, deleted_at) = row;
    User {
        id,
        email,
        password_hash,
        created_at,
        deleted_at,
    }
}

fn session_from_row(row: SessionRow) -> Session {
    let (id, user_id, user_agent, ip, created_at, revoked_at) = row;
    Session {
        id,
        user_id,
        user_agent,
        ip,
        created_at,
        revoked_at,
    }
}

fn refresh_token_from_row(row: RefreshTokenRow) -> RefreshTokenRecord {
    let (id, session_id, token_hash, created_at, expires_at, revoked_at, redeemed_at) = row;
    RefreshTokenRecord {
        id,
        session_id,
        token_hash,
        created_at,
        expires_at,
        revoked_at,
        redeemed_at,
    }
}

/// Store backed by a Postgres connection pool
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl UserStore for PgStore {
    async fn create_user(&self, email: &str, password_hash: &str) -> Result<User, StoreError> {
        let query = format!(
            "INSERT INTO users (id, email, password_hash, created_at)
             VALUES ($1, $2, $3, now())
             RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query_as::<_, UserRow>(&query)
            .bind(Uuid::new_v4())
            .bind(email)
            .bind(password_hash)
            .fetch_one(&self.pool)
            .await?;

        Ok(user_from_row(row))
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let query = format!(
            "SELECT {USER_COLUMNS} FROM users
             WHERE lower(email) = lower($1) AND deleted_at IS NULL"
        );
        let row = sqlx::query_as::<_, UserRow>(&query)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(user_from_row))
    }

    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, StoreError> {
        let query = format!(
            "SELECT {USER_COLUMNS} FROM users
             WHERE id = $1 AND deleted_at IS NULL"
        );
        let row = sqlx::query_as::<_, UserRow>(&query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(user_from_row))
    }

    async fn soft_delete_user(&self, user_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE users SET deleted_at = now()
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl SessionStore for PgStore {
    async fn create_session(
        &self,
        user_id: Uuid,
        device: &DeviceFingerprint,
    ) -> Result<Session, StoreError> {
        let query = format!(
            "INSERT INTO sessions (id, user_id, user_agent, ip, created_at)
             VALUES ($1, $2, $3, $4, now())
             RETURNING {SESSION_COLUMNS}"
        );
        let row = sqlx::query_as::<_, SessionRow>(&query)
            .bind(Uuid::new_v4())
            .bind(user_id)
            .bind(&device.user_agent)
            .bind(&device.ip)
            .fetch_one(&self.pool)
            .await?;

        Ok(session_from_row(row))
    }

    async fn find_active_session(
        &self,
        user_id: Uuid,
        device: &DeviceFingerprint,
    ) -> Result<Option<Session>, StoreError> {
        let query = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions
             WHERE user_id = $1 AND user_agent = $2 AND ip = $3 AND revoked_at IS NULL
             LIMIT 1"
        );
        let row = sqlx::query_as::<_, SessionRow>(&query)
            .bind(user_id)
            .bind(&device.user_agent)
            .bind(&device.ip)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(session_from_row))
    }

    async fn find_session(&self, session_id: Uuid) -> Result<Option<Session>, StoreError> {
        let query = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = $1");
        let row = sqlx::query_as::<_, SessionRow>(&query)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(session_from_row))
    }

    async fn is_session_active(&self, session_id: Uuid) -> Result<bool, StoreError> {
        let active = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (
                SELECT 1 FROM sessions WHERE id = $1 AND revoked_at IS NULL
             )",
        )
        .bind(session_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(active)
    }

    async fn revoke_session(&self, session_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE sessions SET revoked_at = now()
             WHERE id = $1 AND revoked_at IS NULL",
        )
        .bind(session_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn revoke_all_sessions_for_user(&self, user_id: Uuid) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE sessions SET revoked_at = now()
             WHERE user_id = $1 AND revoked_at IS NULL",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn supersede_session(
        &self,
        user_id: Uuid,
        device: &DeviceFingerprint,
    ) -> Result<Supersession, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Serialise logins for the same user and device until commit
        let lock_key = format!("{}|{}|{}", user_id, device.user_agent, device.ip);
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(&lock_key)
            .execute(&mut *tx)
            .await?;

        let superseded = sqlx::query_scalar::<_, Uuid>(
            "UPDATE sessions SET revoked_at = now()
             WHERE user_id = $1 AND user_agent = $2 AND ip = $3 AND revoked_at IS NULL
             RETURNING id",
        )
        .bind(user_id)
        .bind(&device.user_agent)
        .bind(&device.ip)
        .fetch_all(&mut *tx)
        .await?;

        let tokens_revoked = if superseded.is_empty() {
            0
        } else {
            sqlx::query(
                "UPDATE refresh_tokens SET revoked_at = now()
                 WHERE session_id = ANY($1) AND revoked_at IS NULL",
            )
            .bind(&superseded)
            .execute(&mut *tx)
            .await?
            .rows_affected()
        };

        let query = format!(
            "INSERT INTO sessions (id, user_id, user_agent, ip, created_at)
             VALUES ($1, $2, $3, $4, now())
             RETURNING {SESSION_COLUMNS}"
        );
        let row = sqlx::query_as::<_, SessionRow>(&query)
            .bind(Uuid::new_v4())
            .bind(user_id)
            .bind(&device.user_agent)
            .bind(&device.ip)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(Supersession {
            session: session_from_row(row),
            superseded,
            tokens_revoked,
        })
    }

    async fn revoke_sessions_of_deleted_users(&self) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE sessions s SET revoked_at = now()
             FROM users u
             WHERE s.user_id = u.id
               AND u.deleted_at IS NOT NULL
               AND s.revoked_at IS NULL",
        )
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl RefreshTokenStore for PgStore {
    async fn create_refresh_token(
        &self,
        session_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<RefreshTokenRecord, StoreError> {
        let query = format!(
            "INSERT INTO refresh_tokens (id, session_id, token_hash, created_at, expires_at)
             VALUES ($1, $2, $3, now(), $4)
             RETURNING {REFRESH_TOKEN_COLUMNS}"
        );
        let row = sqlx::query_as::<_, RefreshTokenRow>(&query)
            .bind(Uuid::new_v4())
            .bind(session_id)
            .bind(token_hash)
            .bind(expires_at)
            .fetch_one(&self.pool)
            .await?;

        Ok(refresh_token_from_row(row))
    }

    async fn find_refresh_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshTokenRecord>, StoreError> {
        let query = format!(
            "SELECT {REFRESH_TOKEN_COLUMNS} FROM refresh_tokens WHERE token_hash = $1"
        );
        let row = sqlx::query_as::<_, RefreshTokenRow>(&query)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(refresh_token_from_row))
    }

    async fn redeem_refresh_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshTokenRecord>, StoreError> {
        let query = format!(
            "UPDATE refresh_tokens SET revoked_at = now(), redeemed_at = now()
             WHERE token_hash = $1 AND revoked_at IS NULL AND expires_at > now()
             RETURNING {REFRESH_TOKEN_COLUMNS}"
        );
        let row = sqlx::query_as::<_, RefreshTokenRow>(&query)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(refresh_token_from_row))
    }

    async fn revoke_refresh_tokens_for_session(
        &self,
        session_id: Uuid,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked_at = now()
             WHERE session_id = $1 AND revoked_at IS NULL",
        )
        .bind(session_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn revoke_all_refresh_tokens_for_user(&self, user_id: Uuid) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE refresh_tokens rt SET revoked_at = now()
             FROM sessions s
             WHERE s.user_id = $1
               AND rt.session_id = s.id
               AND rt.revoked_at IS NULL",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn revoke_orphaned_refresh_tokens(&self) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE refresh_tokens rt SET revoked_at = now()
             FROM sessions s
             WHERE rt.session_id = s.id
               AND s.revoked_at IS NOT NULL
               AND rt.revoked_at IS NULL",
        )
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
