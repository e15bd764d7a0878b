//! First-start bootstrap.
//!
//! Creates the first SYSTEM principal and assigns it the `system_owner`
//! role with every system permission. Refused once any SYSTEM principal
//! exists, so the bootstrap path disables itself.

use std::sync::Arc;

use clavis_core::{AppError, AppResult};
use clavis_domain::{
    AuditEventType, AuditResult, EmailAddress, PrincipalType, SYSTEM_OWNER_ROLE, SystemPermission,
    UserId, UserStatus, Username, validate_password,
};

use crate::audit_service::{AuditContext, AuditEvent, AuditService};
use crate::rbac_service::RbacRepository;
use crate::user_service::{NewUser, PasswordHasher, UserRepository};

/// Application service for the one-shot bootstrap operation.
#[derive(Clone)]
pub struct BootstrapService {
    user_repository: Arc<dyn UserRepository>,
    rbac_repository: Arc<dyn RbacRepository>,
    password_hasher: Arc<dyn PasswordHasher>,
    audit: AuditService,
}

impl BootstrapService {
    /// Creates a new bootstrap service.
    #[must_use]
    pub fn new(
        user_repository: Arc<dyn UserRepository>,
        rbac_repository: Arc<dyn RbacRepository>,
        password_hasher: Arc<dyn PasswordHasher>,
        audit: AuditService,
    ) -> Self {
        Self {
            user_repository,
            rbac_repository,
            password_hasher,
            audit,
        }
    }

    /// Whether the platform still accepts bootstrap.
    pub async fn is_uninitialized(&self) -> AppResult<bool> {
        Ok(self.user_repository.count_system_users().await? == 0)
    }

    /// Creates the first SYSTEM principal with the `system_owner` role.
    pub async fn bootstrap(
        &self,
        context: &AuditContext,
        username: &str,
        email: &str,
        password: &str,
    ) -> AppResult<UserId> {
        if !self.is_uninitialized().await? {
            return Err(AppError::Conflict(
                "the platform is already initialized".to_owned(),
            ));
        }

        let username = Username::new(username)?;
        let email = EmailAddress::new(email)?;
        validate_password(password, false)?;

        let password_hash = self.password_hasher.hash_password(password)?;
        let user_id = self
            .user_repository
            .create(NewUser {
                tenant_id: None,
                principal_type: PrincipalType::System,
                username: username.as_str().to_owned(),
                email: email.as_str().to_owned(),
                password_hash: Some(password_hash),
                status: UserStatus::Active,
            })
            .await?;

        let permissions: Vec<&str> = SystemPermission::all()
            .iter()
            .map(SystemPermission::as_str)
            .collect();
        let owner_role_id = self
            .rbac_repository
            .ensure_system_role(SYSTEM_OWNER_ROLE, &permissions)
            .await?;
        self.rbac_repository.assign_role(user_id, owner_role_id).await?;

        self.audit
            .record(
                AuditEvent::new(
                    AuditEventType::SystemBootstrapped,
                    AuditResult::Success,
                    context,
                )
                .target("user", user_id),
            )
            .await?;

        Ok(user_id)
    }
}
