//! PostgreSQL-backed user repository.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use clavis_application::{NewUser, UserRecord, UserRepository};
use clavis_core::{AppError, AppResult, TenantId};
use clavis_domain::{PrincipalType, UserId, UserStatus};

/// PostgreSQL implementation of the user repository port.
#[derive(Clone)]
pub struct PostgresUserRepository {
    pool: PgPool,
}

impl PostgresUserRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const USER_COLUMNS: &str = r#"
    id, tenant_id, principal_type, username, email, status, mfa_enabled,
    password_hash, totp_secret_enc, totp_confirmed, totp_last_step,
    recovery_code_hashes, failed_attempt_count, locked_until, last_login_at,
    metadata, created_at
"#;

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: uuid::Uuid,
    tenant_id: Option<uuid::Uuid>,
    principal_type: String,
    username: String,
    email: String,
    status: String,
    mfa_enabled: bool,
    password_hash: Option<String>,
    totp_secret_enc: Option<Vec<u8>>,
    totp_confirmed: bool,
    totp_last_step: Option<i64>,
    recovery_code_hashes: Option<serde_json::Value>,
    failed_attempt_count: i32,
    locked_until: Option<DateTime<Utc>>,
    last_login_at: Option<DateTime<Utc>>,
    metadata: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for UserRecord {
    type Error = AppError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let recovery_code_hashes = match row.recovery_code_hashes {
            Some(value) => serde_json::from_value(value).map_err(|error| {
                AppError::Internal(format!("failed to parse recovery codes: {error}"))
            })?,
            None => Vec::new(),
        };

        Ok(Self {
            id: UserId::from_uuid(row.id),
            tenant_id: row.tenant_id.map(TenantId::from_uuid),
            principal_type: PrincipalType::from_str(&row.principal_type)?,
            username: row.username,
            email: row.email,
            status: UserStatus::parse(&row.status)?,
            mfa_enabled: row.mfa_enabled,
            password_hash: row.password_hash,
            totp_secret_enc: row.totp_secret_enc,
            totp_confirmed: row.totp_confirmed,
            totp_last_step: row.totp_last_step,
            recovery_code_hashes,
            failed_attempt_count: row.failed_attempt_count,
            locked_until: row.locked_until,
            last_login_at: row.last_login_at,
            metadata: row.metadata,
            created_at: row.created_at,
        })
    }
}

#[async_trait]
impl UserRepository for PostgresUserRepository {
    async fn find_by_id(&self, user_id: UserId) -> AppResult<Option<UserRecord>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1 LIMIT 1"
        ))
        .bind(user_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to find user by id: {error}")))?;

        row.map(UserRecord::try_from).transpose()
    }

    async fn find_by_username(
        &self,
        tenant_id: Option<TenantId>,
        username: &str,
    ) -> AppResult<Option<UserRecord>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            SELECT {USER_COLUMNS}
            FROM users
            WHERE tenant_id IS NOT DISTINCT FROM $1
                AND LOWER(username) = LOWER($2)
            LIMIT 1
            "#
        ))
        .bind(tenant_id.map(|tenant_id| tenant_id.as_uuid()))
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to find user by username: {error}")))?;

        row.map(UserRecord::try_from).transpose()
    }

    async fn create(&self, user: NewUser) -> AppResult<UserId> {
        let id = sqlx::query_scalar::<_, uuid::Uuid>(
            r#"
            INSERT INTO users (tenant_id, principal_type, username, email, status, password_hash)
            VALUES ($1, $2, LOWER($3), LOWER($4), $5, $6)
            RETURNING id
            "#,
        )
        .bind(user.tenant_id.map(|tenant_id| tenant_id.as_uuid()))
        .bind(user.principal_type.as_str())
        .bind(&user.username)
        .bind(&user.email)
        .bind(user.status.as_str())
        .bind(user.password_hash.as_deref())
        .fetch_one(&self.pool)
        .await
        .map_err(|error| {
            if let sqlx::Error::Database(ref database_error) = error
                && database_error.code().as_deref() == Some("23505")
            {
                return AppError::Conflict(
                    "a user with this username or email already exists".to_owned(),
                );
            }
            AppError::Internal(format!("failed to create user: {error}"))
        })?;

        Ok(UserId::from_uuid(id))
    }

    async fn list(
        &self,
        tenant_id: Option<TenantId>,
        page: u32,
        page_size: u32,
    ) -> AppResult<Vec<UserRecord>> {
        let offset = i64::from(page.saturating_sub(1)) * i64::from(page_size);
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            SELECT {USER_COLUMNS}
            FROM users
            WHERE tenant_id IS NOT DISTINCT FROM $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(tenant_id.map(|tenant_id| tenant_id.as_uuid()))
        .bind(i64::from(page_size))
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to list users: {error}")))?;

        rows.into_iter().map(UserRecord::try_from).collect()
    }

    async fn count_system_users(&self) -> AppResult<i64> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM users WHERE principal_type = 'SYSTEM'",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to count system users: {error}")))
    }

    async fn update_status(&self, user_id: UserId, status: UserStatus) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET status = $2, locked_until = NULL, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(status.as_str())
        .execute(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to update user status: {error}")))?;

        Ok(())
    }

    async fn delete(&self, user_id: UserId) -> AppResult<()> {
        sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(user_id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|error| AppError::Internal(format!("failed to delete user: {error}")))?;

        Ok(())
    }

    async fn update_password(&self, user_id: UserId, password_hash: &str) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET password_hash = $2, password_changed_at = now(), updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(password_hash)
        .execute(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to update password: {error}")))?;

        Ok(())
    }

    async fn record_failed_attempt(&self, user_id: UserId) -> AppResult<i32> {
        sqlx::query_scalar::<_, i32>(
            r#"
            UPDATE users
            SET failed_attempt_count = failed_attempt_count + 1, updated_at = now()
            WHERE id = $1
            RETURNING failed_attempt_count
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_one(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to record failed attempt: {error}")))
    }

    async fn reset_failed_attempts(&self, user_id: UserId) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET failed_attempt_count = 0, locked_until = NULL, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(user_id.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to reset failed attempts: {error}")))?;

        Ok(())
    }

    async fn lock(&self, user_id: UserId, until: DateTime<Utc>) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET status = 'locked', locked_until = $2, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(until)
        .execute(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to lock user: {error}")))?;

        Ok(())
    }

    async fn record_login(&self, user_id: UserId) -> AppResult<()> {
        // An expired lock clears itself on the next successful login;
        // administrator-set 'inactive' is never touched here.
        sqlx::query(
            r#"
            UPDATE users
            SET last_login_at = now(),
                failed_attempt_count = 0,
                locked_until = NULL,
                status = CASE WHEN status = 'locked' THEN 'active' ELSE status END,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(user_id.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to record login: {error}")))?;

        Ok(())
    }

    async fn store_totp_secret(
        &self,
        user_id: UserId,
        totp_secret_enc: &[u8],
        recovery_code_hashes: &[String],
    ) -> AppResult<()> {
        let hashes = serde_json::json!(recovery_code_hashes);
        sqlx::query(
            r#"
            UPDATE users
            SET totp_secret_enc = $2,
                recovery_code_hashes = $3,
                totp_confirmed = FALSE,
                totp_last_step = NULL,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(totp_secret_enc)
        .bind(hashes)
        .execute(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to store TOTP secret: {error}")))?;

        Ok(())
    }

    async fn confirm_totp(&self, user_id: UserId) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET totp_confirmed = TRUE, mfa_enabled = TRUE, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(user_id.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to confirm TOTP: {error}")))?;

        Ok(())
    }

    async fn clear_totp(&self, user_id: UserId) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET totp_confirmed = FALSE, mfa_enabled = FALSE, totp_secret_enc = NULL,
                totp_last_step = NULL, recovery_code_hashes = NULL, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(user_id.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to clear TOTP: {error}")))?;

        Ok(())
    }

    async fn record_totp_step(&self, user_id: UserId, step: i64) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET totp_last_step = $2, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(step)
        .execute(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to record TOTP step: {error}")))?;

        Ok(())
    }

    async fn update_recovery_codes(
        &self,
        user_id: UserId,
        recovery_code_hashes: &[String],
    ) -> AppResult<()> {
        let hashes = serde_json::json!(recovery_code_hashes);
        sqlx::query(
            r#"
            UPDATE users
            SET recovery_code_hashes = $2, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(hashes)
        .execute(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to update recovery codes: {error}")))?;

        Ok(())
    }
}
