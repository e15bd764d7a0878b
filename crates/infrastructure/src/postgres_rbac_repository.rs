//! PostgreSQL-backed role and permission repository.
//!
//! Tenant permissions live in the `permissions` table and attach to roles
//! through `role_permissions`. System roles carry their permission keys in
//! `role_system_permissions`, keeping the two planes in separate tables.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use clavis_application::{
    NewPermission, NewRole, PermissionRecord, RbacReader, RbacRepository, RoleRecord,
};
use clavis_core::{AppError, AppResult, TenantId};
use clavis_domain::UserId;

/// PostgreSQL implementation of the RBAC repository port.
#[derive(Clone)]
pub struct PostgresRbacRepository {
    pool: PgPool,
}

impl PostgresRbacRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RoleRow {
    id: uuid::Uuid,
    tenant_id: Option<uuid::Uuid>,
    name: String,
    description: Option<String>,
    is_system: bool,
    created_at: DateTime<Utc>,
}

impl From<RoleRow> for RoleRecord {
    fn from(row: RoleRow) -> Self {
        Self {
            id: row.id,
            tenant_id: row.tenant_id.map(TenantId::from_uuid),
            name: row.name,
            description: row.description,
            is_system: row.is_system,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PermissionRow {
    id: uuid::Uuid,
    tenant_id: Option<uuid::Uuid>,
    resource: String,
    action: String,
    description: Option<String>,
}

impl From<PermissionRow> for PermissionRecord {
    fn from(row: PermissionRow) -> Self {
        Self {
            id: row.id,
            tenant_id: row.tenant_id.map(TenantId::from_uuid),
            resource: row.resource,
            action: row.action,
            description: row.description,
        }
    }
}

#[async_trait]
impl RbacReader for PostgresRbacRepository {
    async fn role_names_for_user(&self, user_id: UserId) -> AppResult<Vec<String>> {
        sqlx::query_scalar::<_, String>(
            r#"
            SELECT r.name
            FROM user_roles ur
            JOIN roles r ON r.id = ur.role_id
            WHERE ur.user_id = $1 AND NOT r.is_system
            ORDER BY r.name
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to list user roles: {error}")))
    }

    async fn permission_keys_for_user(&self, user_id: UserId) -> AppResult<Vec<String>> {
        sqlx::query_scalar::<_, String>(
            r#"
            SELECT DISTINCT p.resource || ':' || p.action
            FROM user_roles ur
            JOIN role_permissions rp ON rp.role_id = ur.role_id
            JOIN permissions p ON p.id = rp.permission_id
            WHERE ur.user_id = $1
            ORDER BY 1
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to list user permissions: {error}")))
    }

    async fn system_role_names_for_user(&self, user_id: UserId) -> AppResult<Vec<String>> {
        sqlx::query_scalar::<_, String>(
            r#"
            SELECT r.name
            FROM user_roles ur
            JOIN roles r ON r.id = ur.role_id
            WHERE ur.user_id = $1 AND r.is_system
            ORDER BY r.name
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to list system roles: {error}")))
    }

    async fn system_permission_keys_for_user(&self, user_id: UserId) -> AppResult<Vec<String>> {
        sqlx::query_scalar::<_, String>(
            r#"
            SELECT DISTINCT rsp.permission
            FROM user_roles ur
            JOIN roles r ON r.id = ur.role_id
            JOIN role_system_permissions rsp ON rsp.role_id = r.id
            WHERE ur.user_id = $1 AND r.is_system
            ORDER BY 1
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to list system permissions: {error}"))
        })
    }
}

#[async_trait]
impl RbacRepository for PostgresRbacRepository {
    async fn create_role(&self, role: NewRole) -> AppResult<uuid::Uuid> {
        sqlx::query_scalar::<_, uuid::Uuid>(
            r#"
            INSERT INTO roles (tenant_id, name, description, is_system)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(role.tenant_id.map(|tenant_id| tenant_id.as_uuid()))
        .bind(&role.name)
        .bind(role.description.as_deref())
        .bind(role.is_system)
        .fetch_one(&self.pool)
        .await
        .map_err(|error| {
            if let sqlx::Error::Database(ref database_error) = error
                && database_error.code().as_deref() == Some("23505")
            {
                return AppError::Conflict("a role with this name already exists".to_owned());
            }
            AppError::Internal(format!("failed to create role: {error}"))
        })
    }

    async fn find_role(&self, role_id: uuid::Uuid) -> AppResult<Option<RoleRecord>> {
        let row = sqlx::query_as::<_, RoleRow>(
            r#"
            SELECT id, tenant_id, name, description, is_system, created_at
            FROM roles
            WHERE id = $1
            LIMIT 1
            "#,
        )
        .bind(role_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to find role: {error}")))?;

        Ok(row.map(RoleRecord::from))
    }

    async fn find_role_by_name(
        &self,
        tenant_id: Option<TenantId>,
        name: &str,
    ) -> AppResult<Option<RoleRecord>> {
        let row = sqlx::query_as::<_, RoleRow>(
            r#"
            SELECT id, tenant_id, name, description, is_system, created_at
            FROM roles
            WHERE tenant_id IS NOT DISTINCT FROM $1 AND name = $2
            LIMIT 1
            "#,
        )
        .bind(tenant_id.map(|tenant_id| tenant_id.as_uuid()))
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to find role by name: {error}")))?;

        Ok(row.map(RoleRecord::from))
    }

    async fn list_roles(&self, tenant_id: Option<TenantId>) -> AppResult<Vec<RoleRecord>> {
        let rows = sqlx::query_as::<_, RoleRow>(
            r#"
            SELECT id, tenant_id, name, description, is_system, created_at
            FROM roles
            WHERE tenant_id IS NOT DISTINCT FROM $1
            ORDER BY name
            "#,
        )
        .bind(tenant_id.map(|tenant_id| tenant_id.as_uuid()))
        .fetch_all(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to list roles: {error}")))?;

        Ok(rows.into_iter().map(RoleRecord::from).collect())
    }

    async fn update_role(&self, role_id: uuid::Uuid, description: Option<&str>) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE roles
            SET description = $2
            WHERE id = $1
            "#,
        )
        .bind(role_id)
        .bind(description)
        .execute(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to update role: {error}")))?;

        Ok(())
    }

    async fn delete_role(&self, role_id: uuid::Uuid) -> AppResult<()> {
        sqlx::query("DELETE FROM roles WHERE id = $1")
            .bind(role_id)
            .execute(&self.pool)
            .await
            .map_err(|error| AppError::Internal(format!("failed to delete role: {error}")))?;

        Ok(())
    }

    async fn create_permission(&self, permission: NewPermission) -> AppResult<uuid::Uuid> {
        sqlx::query_scalar::<_, uuid::Uuid>(
            r#"
            INSERT INTO permissions (tenant_id, resource, action, description)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(permission.tenant_id.map(|tenant_id| tenant_id.as_uuid()))
        .bind(&permission.resource)
        .bind(&permission.action)
        .bind(permission.description.as_deref())
        .fetch_one(&self.pool)
        .await
        .map_err(|error| {
            if let sqlx::Error::Database(ref database_error) = error
                && database_error.code().as_deref() == Some("23505")
            {
                return AppError::Conflict("this permission already exists".to_owned());
            }
            AppError::Internal(format!("failed to create permission: {error}"))
        })
    }

    async fn find_permission(
        &self,
        permission_id: uuid::Uuid,
    ) -> AppResult<Option<PermissionRecord>> {
        let row = sqlx::query_as::<_, PermissionRow>(
            r#"
            SELECT id, tenant_id, resource, action, description
            FROM permissions
            WHERE id = $1
            LIMIT 1
            "#,
        )
        .bind(permission_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to find permission: {error}")))?;

        Ok(row.map(PermissionRecord::from))
    }

    async fn list_permissions(
        &self,
        tenant_id: Option<TenantId>,
    ) -> AppResult<Vec<PermissionRecord>> {
        let rows = sqlx::query_as::<_, PermissionRow>(
            r#"
            SELECT id, tenant_id, resource, action, description
            FROM permissions
            WHERE tenant_id IS NOT DISTINCT FROM $1
            ORDER BY resource, action
            "#,
        )
        .bind(tenant_id.map(|tenant_id| tenant_id.as_uuid()))
        .fetch_all(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to list permissions: {error}")))?;

        Ok(rows.into_iter().map(PermissionRecord::from).collect())
    }

    async fn delete_permission(&self, permission_id: uuid::Uuid) -> AppResult<()> {
        sqlx::query("DELETE FROM permissions WHERE id = $1")
            .bind(permission_id)
            .execute(&self.pool)
            .await
            .map_err(|error| AppError::Internal(format!("failed to delete permission: {error}")))?;

        Ok(())
    }

    async fn attach_permission(
        &self,
        role_id: uuid::Uuid,
        permission_id: uuid::Uuid,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO role_permissions (role_id, permission_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(role_id)
        .bind(permission_id)
        .execute(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to attach permission: {error}")))?;

        Ok(())
    }

    async fn assign_role(&self, user_id: UserId, role_id: uuid::Uuid) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO user_roles (user_id, role_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(role_id)
        .execute(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to assign role: {error}")))?;

        Ok(())
    }

    async fn unassign_role(&self, user_id: UserId, role_id: uuid::Uuid) -> AppResult<()> {
        sqlx::query(
            r#"
            DELETE FROM user_roles
            WHERE user_id = $1 AND role_id = $2
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(role_id)
        .execute(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to unassign role: {error}")))?;

        Ok(())
    }

    async fn count_assignments(&self, role_id: uuid::Uuid) -> AppResult<i64> {
        sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM user_roles
            WHERE role_id = $1
            "#,
        )
        .bind(role_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to count assignments: {error}")))
    }

    async fn ensure_system_role(
        &self,
        name: &str,
        permissions: &[&str],
    ) -> AppResult<uuid::Uuid> {
        if let Some(existing) = self.find_role_by_name(None, name).await? {
            return Ok(existing.id);
        }

        let mut transaction = self.pool.begin().await.map_err(|error| {
            AppError::Internal(format!("failed to begin system role transaction: {error}"))
        })?;

        let role_id = sqlx::query_scalar::<_, uuid::Uuid>(
            r#"
            INSERT INTO roles (tenant_id, name, description, is_system)
            VALUES (NULL, $1, 'Built-in system role', TRUE)
            RETURNING id
            "#,
        )
        .bind(name)
        .fetch_one(&mut *transaction)
        .await
        .map_err(|error| AppError::Internal(format!("failed to create system role: {error}")))?;

        for permission in permissions {
            sqlx::query(
                r#"
                INSERT INTO role_system_permissions (role_id, permission)
                VALUES ($1, $2)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(role_id)
            .bind(permission)
            .execute(&mut *transaction)
            .await
            .map_err(|error| {
                AppError::Internal(format!("failed to grant system permission: {error}"))
            })?;
        }

        transaction.commit().await.map_err(|error| {
            AppError::Internal(format!("failed to commit system role: {error}"))
        })?;

        Ok(role_id)
    }
}
