//! Role and permission management.
//!
//! System roles are immutable through the tenant API. The `tenant_owner`
//! role always owns every tenant permission, and its last assignment can
//! never be removed.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use clavis_core::{AppError, AppResult, NonEmptyString, TenantId};
use clavis_domain::{
    AuditEventType, AuditResult, DEFAULT_TENANT_PERMISSIONS, PermissionKey, TENANT_OWNER_ROLE,
    UserId, validate_tenant_namespace,
};

use crate::audit_service::{AuditContext, AuditEvent, AuditService};

// ---------------------------------------------------------------------------
// Ports
// ---------------------------------------------------------------------------

/// Role record returned by repository queries.
#[derive(Debug, Clone)]
pub struct RoleRecord {
    /// Role identifier.
    pub id: Uuid,
    /// Owning tenant; `None` for system roles.
    pub tenant_id: Option<TenantId>,
    /// Role name, unique within its scope.
    pub name: String,
    /// Optional description.
    pub description: Option<String>,
    /// System roles have no tenant and cannot be mutated via the tenant API.
    pub is_system: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Permission record returned by repository queries.
#[derive(Debug, Clone)]
pub struct PermissionRecord {
    /// Permission identifier.
    pub id: Uuid,
    /// Owning tenant; `None` for system permissions.
    pub tenant_id: Option<TenantId>,
    /// Namespaced resource segment.
    pub resource: String,
    /// Action segment.
    pub action: String,
    /// Optional description.
    pub description: Option<String>,
}

impl PermissionRecord {
    /// Returns the `resource:action` key for this permission.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}:{}", self.resource, self.action)
    }
}

/// Parameters for creating a role.
#[derive(Debug, Clone)]
pub struct NewRole {
    /// Owning tenant; `None` for system roles.
    pub tenant_id: Option<TenantId>,
    /// Role name.
    pub name: String,
    /// Optional description.
    pub description: Option<String>,
    /// Whether this is a system role.
    pub is_system: bool,
}

/// Parameters for creating a permission.
#[derive(Debug, Clone)]
pub struct NewPermission {
    /// Owning tenant; `None` for system permissions.
    pub tenant_id: Option<TenantId>,
    /// Namespaced resource segment.
    pub resource: String,
    /// Action segment.
    pub action: String,
    /// Optional description.
    pub description: Option<String>,
}

/// Read side of the RBAC store, consumed by token issuance.
#[async_trait]
pub trait RbacReader: Send + Sync {
    /// Tenant role names assigned to a user.
    async fn role_names_for_user(&self, user_id: UserId) -> AppResult<Vec<String>>;

    /// Effective tenant permission keys for a user, deduplicated.
    async fn permission_keys_for_user(&self, user_id: UserId) -> AppResult<Vec<String>>;

    /// System role names assigned to a user.
    async fn system_role_names_for_user(&self, user_id: UserId) -> AppResult<Vec<String>>;

    /// Effective system permission keys for a user, deduplicated.
    async fn system_permission_keys_for_user(&self, user_id: UserId) -> AppResult<Vec<String>>;
}

/// Repository port for role and permission persistence.
#[async_trait]
pub trait RbacRepository: RbacReader {
    /// Creates a role. Returns the assigned id.
    async fn create_role(&self, role: NewRole) -> AppResult<Uuid>;

    /// Finds a role by id.
    async fn find_role(&self, role_id: Uuid) -> AppResult<Option<RoleRecord>>;

    /// Finds a role by name within a scope.
    async fn find_role_by_name(
        &self,
        tenant_id: Option<TenantId>,
        name: &str,
    ) -> AppResult<Option<RoleRecord>>;

    /// Lists roles within a scope.
    async fn list_roles(&self, tenant_id: Option<TenantId>) -> AppResult<Vec<RoleRecord>>;

    /// Updates a role's description.
    async fn update_role(&self, role_id: Uuid, description: Option<&str>) -> AppResult<()>;

    /// Deletes a role and its assignments.
    async fn delete_role(&self, role_id: Uuid) -> AppResult<()>;

    /// Creates a permission. Returns the assigned id.
    async fn create_permission(&self, permission: NewPermission) -> AppResult<Uuid>;

    /// Finds a permission by id.
    async fn find_permission(&self, permission_id: Uuid) -> AppResult<Option<PermissionRecord>>;

    /// Lists permissions within a scope.
    async fn list_permissions(
        &self,
        tenant_id: Option<TenantId>,
    ) -> AppResult<Vec<PermissionRecord>>;

    /// Deletes a permission and its role attachments.
    async fn delete_permission(&self, permission_id: Uuid) -> AppResult<()>;

    /// Attaches a permission to a role.
    async fn attach_permission(&self, role_id: Uuid, permission_id: Uuid) -> AppResult<()>;

    /// Assigns a role to a user.
    async fn assign_role(&self, user_id: UserId, role_id: Uuid) -> AppResult<()>;

    /// Removes a role assignment from a user.
    async fn unassign_role(&self, user_id: UserId, role_id: Uuid) -> AppResult<()>;

    /// Counts current assignments of a role.
    async fn count_assignments(&self, role_id: Uuid) -> AppResult<i64>;

    /// Creates a system role with the given permission keys when missing.
    async fn ensure_system_role(&self, name: &str, permissions: &[&str]) -> AppResult<Uuid>;
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// Application service for role and permission management.
#[derive(Clone)]
pub struct RbacService {
    repository: Arc<dyn RbacRepository>,
    audit: AuditService,
}

impl RbacService {
    /// Creates a new RBAC service.
    #[must_use]
    pub fn new(repository: Arc<dyn RbacRepository>, audit: AuditService) -> Self {
        Self { repository, audit }
    }

    /// Creates a tenant role.
    pub async fn create_role(
        &self,
        context: &AuditContext,
        tenant_id: TenantId,
        name: &str,
        description: Option<String>,
    ) -> AppResult<RoleRecord> {
        let name = NonEmptyString::new(name)?;

        let role_id = self
            .repository
            .create_role(NewRole {
                tenant_id: Some(tenant_id),
                name: name.as_str().to_owned(),
                description,
                is_system: false,
            })
            .await?;

        self.audit
            .record(
                AuditEvent::new(AuditEventType::RoleCreated, AuditResult::Success, context)
                    .target("role", role_id),
            )
            .await?;

        self.repository
            .find_role(role_id)
            .await?
            .ok_or_else(|| AppError::Internal("role vanished after creation".to_owned()))
    }

    /// Updates a tenant role's description.
    pub async fn update_role(
        &self,
        context: &AuditContext,
        tenant_id: TenantId,
        role_id: Uuid,
        description: Option<String>,
    ) -> AppResult<()> {
        let role = self.tenant_role(tenant_id, role_id).await?;

        self.repository
            .update_role(role.id, description.as_deref())
            .await?;

        self.audit
            .record(
                AuditEvent::new(AuditEventType::RoleUpdated, AuditResult::Success, context)
                    .target("role", role_id),
            )
            .await?;

        Ok(())
    }

    /// Deletes a tenant role.
    pub async fn delete_role(
        &self,
        context: &AuditContext,
        tenant_id: TenantId,
        role_id: Uuid,
    ) -> AppResult<()> {
        let role = self.tenant_role(tenant_id, role_id).await?;

        if role.name == TENANT_OWNER_ROLE {
            return Err(AppError::Conflict(
                "the tenant_owner role cannot be deleted".to_owned(),
            ));
        }

        self.repository.delete_role(role.id).await?;

        self.audit
            .record(
                AuditEvent::new(AuditEventType::RoleDeleted, AuditResult::Success, context)
                    .target("role", role_id),
            )
            .await?;

        Ok(())
    }

    /// Lists roles for a tenant.
    pub async fn list_roles(&self, tenant_id: TenantId) -> AppResult<Vec<RoleRecord>> {
        self.repository.list_roles(Some(tenant_id)).await
    }

    /// Assigns a tenant role to a user.
    pub async fn assign_role(
        &self,
        context: &AuditContext,
        tenant_id: TenantId,
        user_id: UserId,
        role_id: Uuid,
    ) -> AppResult<()> {
        let role = self.tenant_role(tenant_id, role_id).await?;
        self.repository.assign_role(user_id, role.id).await?;

        self.audit
            .record(
                AuditEvent::new(AuditEventType::RoleAssigned, AuditResult::Success, context)
                    .target("user", user_id)
                    .metadata(serde_json::json!({ "role": role.name })),
            )
            .await?;

        Ok(())
    }

    /// Removes a tenant role assignment.
    ///
    /// The last `tenant_owner` assignment is refused: losing it would lock
    /// the tenant out of its own administration.
    pub async fn unassign_role(
        &self,
        context: &AuditContext,
        tenant_id: TenantId,
        user_id: UserId,
        role_id: Uuid,
    ) -> AppResult<()> {
        let role = self.tenant_role(tenant_id, role_id).await?;

        if role.name == TENANT_OWNER_ROLE {
            let assignments = self.repository.count_assignments(role.id).await?;
            if assignments <= 1 {
                return Err(AppError::Conflict(
                    "cannot remove the last tenant_owner assignment".to_owned(),
                ));
            }
        }

        self.repository.unassign_role(user_id, role.id).await?;

        self.audit
            .record(
                AuditEvent::new(AuditEventType::RoleUnassigned, AuditResult::Success, context)
                    .target("user", user_id)
                    .metadata(serde_json::json!({ "role": role.name })),
            )
            .await?;

        Ok(())
    }

    /// Creates a tenant permission inside an allowed namespace.
    ///
    /// The new permission is attached to `tenant_owner` in the same call.
    pub async fn create_permission(
        &self,
        context: &AuditContext,
        tenant_id: TenantId,
        resource: &str,
        action: &str,
        description: Option<String>,
    ) -> AppResult<PermissionRecord> {
        let key = PermissionKey::new(resource, action)?;
        validate_tenant_namespace(key.resource())?;

        let permission_id = self
            .repository
            .create_permission(NewPermission {
                tenant_id: Some(tenant_id),
                resource: key.resource().to_owned(),
                action: key.action().to_owned(),
                description,
            })
            .await?;

        let owner_role = self
            .repository
            .find_role_by_name(Some(tenant_id), TENANT_OWNER_ROLE)
            .await?
            .ok_or_else(|| {
                AppError::Internal(format!("tenant '{tenant_id}' has no tenant_owner role"))
            })?;
        self.repository
            .attach_permission(owner_role.id, permission_id)
            .await?;

        self.audit
            .record(
                AuditEvent::new(
                    AuditEventType::PermissionCreated,
                    AuditResult::Success,
                    context,
                )
                .target("permission", permission_id)
                .metadata(serde_json::json!({ "key": key.as_string() })),
            )
            .await?;

        self.repository
            .find_permission(permission_id)
            .await?
            .ok_or_else(|| AppError::Internal("permission vanished after creation".to_owned()))
    }

    /// Deletes a tenant permission.
    pub async fn delete_permission(
        &self,
        context: &AuditContext,
        tenant_id: TenantId,
        permission_id: Uuid,
    ) -> AppResult<()> {
        let permission = self
            .repository
            .find_permission(permission_id)
            .await?
            .ok_or_else(|| AppError::NotFound("permission not found".to_owned()))?;

        if permission.tenant_id != Some(tenant_id) {
            return Err(AppError::ForbiddenTenant(format!(
                "permission does not belong to tenant '{tenant_id}'"
            )));
        }

        self.repository.delete_permission(permission_id).await?;

        self.audit
            .record(
                AuditEvent::new(
                    AuditEventType::PermissionDeleted,
                    AuditResult::Success,
                    context,
                )
                .target("permission", permission_id),
            )
            .await?;

        Ok(())
    }

    /// Lists permissions for a tenant.
    pub async fn list_permissions(&self, tenant_id: TenantId) -> AppResult<Vec<PermissionRecord>> {
        self.repository.list_permissions(Some(tenant_id)).await
    }

    /// Seeds the built-in permissions and the `tenant_owner` role for a new
    /// tenant, attaching every permission to the owner role.
    pub async fn seed_tenant(&self, tenant_id: TenantId) -> AppResult<Uuid> {
        let owner_role_id = self
            .repository
            .create_role(NewRole {
                tenant_id: Some(tenant_id),
                name: TENANT_OWNER_ROLE.to_owned(),
                description: Some("Owns every permission in the tenant".to_owned()),
                is_system: false,
            })
            .await?;

        for (resource, action, description) in DEFAULT_TENANT_PERMISSIONS {
            let permission_id = self
                .repository
                .create_permission(NewPermission {
                    tenant_id: Some(tenant_id),
                    resource: (*resource).to_owned(),
                    action: (*action).to_owned(),
                    description: Some((*description).to_owned()),
                })
                .await?;
            self.repository
                .attach_permission(owner_role_id, permission_id)
                .await?;
        }

        Ok(owner_role_id)
    }

    /// Returns a reference to the repository for use by other services.
    #[must_use]
    pub fn repository(&self) -> &Arc<dyn RbacRepository> {
        &self.repository
    }

    async fn tenant_role(&self, tenant_id: TenantId, role_id: Uuid) -> AppResult<RoleRecord> {
        let role = self
            .repository
            .find_role(role_id)
            .await?
            .ok_or_else(|| AppError::NotFound("role not found".to_owned()))?;

        if role.is_system {
            return Err(AppError::ForbiddenPermission(
                "system roles are immutable via the tenant API".to_owned(),
            ));
        }

        if role.tenant_id != Some(tenant_id) {
            return Err(AppError::ForbiddenTenant(format!(
                "role does not belong to tenant '{tenant_id}'"
            )));
        }

        Ok(role)
    }
}
