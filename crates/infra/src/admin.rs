//! Administrative operations: entitlements, roles, assignments, audit reads.
//!
//! Every operation is itself gated: the caller must pass [`Gate::authorize`]
//! for the matching administrative permission (see
//! `gatekeep_auth::permissions::admin`) before anything is read or written.
//! Writes always target the caller's resolved organization.
//!
//! ## Invalidation
//!
//! | Write | Cache invalidation |
//! |-------|--------------------|
//! | Entitlement upsert | every entitlement decision of the organization |
//! | Role update | every permission decision of the organization |
//! | Assign / revoke | every permission decision of the affected user |
//!
//! Invalidation completes before the operation returns. If it fails, the
//! operation returns [`AdminError::Invalidation`] even though the store write
//! went through; callers must not report such a write as effective.
//!
//! ## Privilege Escalation
//!
//! An actor may only create, update, assign or revoke a role whose effective
//! permissions (own plus inherited) are all covered by the actor's own
//! effective permissions.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use gatekeep_auth::permissions::admin;
use gatekeep_auth::{
    Denial, Entitlement, EntitlementStatus, ModuleClassification, Permission, Role, RoleForest,
    RoleGraphError, SessionIdentity,
};
use gatekeep_core::{DomainError, RoleId, UserId};

use crate::audit::{AuditError, AuditFilter, AuditPage, AuditQuery, Pagination};
use crate::cache::CacheError;
use crate::gate::{Gate, TenantContext};
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum AdminError {
    /// The caller failed the gate for the administrative permission.
    #[error(transparent)]
    Denied(#[from] Denial),

    #[error(transparent)]
    Validation(#[from] DomainError),

    #[error("role rejected: {0}")]
    RoleGraph(#[from] RoleGraphError),

    #[error("privilege escalation: {0}")]
    Escalation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("store error: {0}")]
    Store(StoreError),

    /// The write succeeded but the cache could not be invalidated.
    #[error("cache invalidation failed: {0}")]
    Invalidation(#[from] CacheError),

    #[error("audit query failed: {0}")]
    Audit(#[from] AuditError),
}

impl From<StoreError> for AdminError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Conflict(msg) => AdminError::Conflict(msg),
            other => AdminError::Store(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitlementRequest {
    pub module: String,
    #[serde(default)]
    pub submodule: Option<String>,
    pub status: EntitlementStatus,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRequest {
    pub name: String,
    #[serde(default)]
    pub parent_role_id: Option<RoleId>,
    #[serde(default)]
    pub permissions: Vec<Permission>,
}

pub struct AdminService {
    gate: Arc<Gate>,
    audit: Arc<dyn AuditQuery>,
}

impl AdminService {
    pub fn new(gate: Arc<Gate>, audit: Arc<dyn AuditQuery>) -> Self {
        Self { gate, audit }
    }

    async fn authorize(
        &self,
        session: &SessionIdentity,
        permission: &Permission,
    ) -> Result<TenantContext, AdminError> {
        Ok(self
            .gate
            .authorize(session, permission.module(), permission.action(), None)
            .await?)
    }

    // ─── entitlements ───────────────────────────────────────────────────────

    pub async fn set_entitlement(
        &self,
        session: &SessionIdentity,
        request: EntitlementRequest,
    ) -> Result<Entitlement, AdminError> {
        let tenant = self.authorize(session, &admin::ENTITLEMENTS_MANAGE).await?;
        let organization_id = tenant.organization_id;

        let definition = self.gate.catalog().get(&request.module).ok_or_else(|| {
            DomainError::validation(format!("unknown module '{}'", request.module))
        })?;
        if definition.classification != ModuleClassification::Billable {
            return Err(DomainError::validation(format!(
                "module '{}' is {}; entitlement rows do not apply",
                definition.key,
                definition.classification.as_str()
            ))
            .into());
        }
        if let Some(sub) = request.submodule.as_deref() {
            if !definition.has_submodule(sub) {
                return Err(DomainError::validation(format!(
                    "module '{}' has no submodule '{sub}'",
                    definition.key
                ))
                .into());
            }
        }

        let entitlement = Entitlement {
            organization_id,
            module: request.module,
            submodule: request.submodule,
            status: request.status,
            expires_at: request.expires_at,
        };
        entitlement.validate()?;

        self.gate
            .stores()
            .entitlements
            .upsert_entitlement(entitlement.clone())
            .await?;
        self.gate.cache().invalidate_organization(organization_id).await?;

        tracing::info!(
            organization_id = %organization_id,
            actor = %tenant.user_id,
            module = %entitlement.module,
            submodule = ?entitlement.submodule,
            status = entitlement.status.as_str(),
            "entitlement updated"
        );
        Ok(entitlement)
    }

    pub async fn list_entitlements(
        &self,
        session: &SessionIdentity,
    ) -> Result<Vec<Entitlement>, AdminError> {
        let tenant = self.authorize(session, &admin::ENTITLEMENTS_READ).await?;
        Ok(self
            .gate
            .stores()
            .entitlements
            .list_entitlements(tenant.organization_id)
            .await?)
    }

    // ─── roles ──────────────────────────────────────────────────────────────

    pub async fn list_roles(&self, session: &SessionIdentity) -> Result<Vec<Role>, AdminError> {
        let tenant = self.authorize(session, &admin::ROLES_READ).await?;
        Ok(self
            .gate
            .stores()
            .roles
            .list_roles(tenant.organization_id)
            .await?)
    }

    pub async fn create_role(
        &self,
        session: &SessionIdentity,
        request: RoleRequest,
    ) -> Result<Role, AdminError> {
        let tenant = self.authorize(session, &admin::ROLES_MANAGE).await?;
        let role = build_role(Role::new(tenant.organization_id, request.name.trim()), request);
        self.write_role(&tenant, role).await
    }

    /// Replace name, parent and permissions of an existing role. The actor must
    /// cover both the current and the new effective permissions. Every cached
    /// permission decision of the organization is dropped, since any user may
    /// inherit from the role.
    pub async fn update_role(
        &self,
        session: &SessionIdentity,
        role_id: RoleId,
        request: RoleRequest,
    ) -> Result<Role, AdminError> {
        let tenant = self.authorize(session, &admin::ROLES_MANAGE).await?;
        let organization_id = tenant.organization_id;
        let existing = self
            .gate
            .stores()
            .roles
            .role(organization_id, role_id)
            .await?
            .ok_or_else(|| AdminError::NotFound(format!("role {role_id}")))?;
        // The actor must already hold whatever the role grants today.
        self.check_assignable(&tenant, existing.id).await?;

        let mut role = Role::new(organization_id, request.name.trim());
        role.id = existing.id;
        let role = build_role(role, request);

        let saved = self.write_role(&tenant, role).await?;
        self.gate
            .cache()
            .invalidate_organization_permissions(organization_id)
            .await?;
        Ok(saved)
    }

    async fn write_role(&self, tenant: &TenantContext, role: Role) -> Result<Role, AdminError> {
        let roles = self
            .gate
            .stores()
            .roles
            .list_roles(tenant.organization_id)
            .await?;
        let forest = RoleForest::new(tenant.organization_id, roles);
        forest.validate_write(&role, self.gate.config().max_role_depth)?;

        let effective = forest.effective_permissions(&role);
        self.ensure_covered(tenant, &effective).await?;

        self.gate.stores().roles.save_role(role.clone()).await?;
        tracing::info!(
            organization_id = %tenant.organization_id,
            actor = %tenant.user_id,
            role_id = %role.id,
            role = %role.name,
            "role saved"
        );
        Ok(role)
    }

    // ─── assignments ────────────────────────────────────────────────────────

    /// Returns `false` when the user already held the role.
    pub async fn assign_role(
        &self,
        session: &SessionIdentity,
        user_id: UserId,
        role_id: RoleId,
    ) -> Result<bool, AdminError> {
        let tenant = self.authorize(session, &admin::ASSIGNMENTS_MANAGE).await?;
        self.check_assignable(&tenant, role_id).await?;

        let changed = self
            .gate
            .stores()
            .roles
            .assign_role(tenant.organization_id, user_id, role_id)
            .await?;
        self.gate
            .cache()
            .invalidate_user(tenant.organization_id, user_id)
            .await?;

        tracing::info!(
            organization_id = %tenant.organization_id,
            actor = %tenant.user_id,
            user_id = %user_id,
            role_id = %role_id,
            changed,
            "role assigned"
        );
        Ok(changed)
    }

    /// Returns `false` when the user did not hold the role. Once this returns
    /// `Ok`, no request evaluated afterwards can be granted through the role.
    pub async fn revoke_role(
        &self,
        session: &SessionIdentity,
        user_id: UserId,
        role_id: RoleId,
    ) -> Result<bool, AdminError> {
        let tenant = self.authorize(session, &admin::ASSIGNMENTS_MANAGE).await?;
        self.check_assignable(&tenant, role_id).await?;

        let changed = self
            .gate
            .stores()
            .roles
            .revoke_role(tenant.organization_id, user_id, role_id)
            .await?;
        self.gate
            .cache()
            .invalidate_user(tenant.organization_id, user_id)
            .await?;

        tracing::info!(
            organization_id = %tenant.organization_id,
            actor = %tenant.user_id,
            user_id = %user_id,
            role_id = %role_id,
            changed,
            "role revoked"
        );
        Ok(changed)
    }

    async fn check_assignable(&self, tenant: &TenantContext, role_id: RoleId) -> Result<(), AdminError> {
        let roles = self
            .gate
            .stores()
            .roles
            .list_roles(tenant.organization_id)
            .await?;
        let forest = RoleForest::new(tenant.organization_id, roles);
        let role = forest
            .get(&role_id)
            .ok_or_else(|| AdminError::NotFound(format!("role {role_id}")))?;
        let effective = forest.effective_permissions(role);
        self.ensure_covered(tenant, &effective).await
    }

    async fn ensure_covered<'a>(
        &self,
        tenant: &TenantContext,
        granted: impl IntoIterator<Item = &'a Permission>,
    ) -> Result<(), AdminError> {
        let actor = self
            .gate
            .permission_set(tenant.permission_organization_id, tenant.user_id)
            .await?;
        let uncovered: Vec<String> = granted
            .into_iter()
            .filter(|p| !actor.covers(p))
            .map(|p| p.to_string())
            .collect();
        if uncovered.is_empty() {
            Ok(())
        } else {
            Err(AdminError::Escalation(format!(
                "actor does not hold {}",
                uncovered.join(", ")
            )))
        }
    }

    // ─── audit ──────────────────────────────────────────────────────────────

    /// Audit entries of the caller's organization only.
    pub async fn query_audit(
        &self,
        session: &SessionIdentity,
        filter: AuditFilter,
        pagination: Pagination,
    ) -> Result<AuditPage, AdminError> {
        let tenant = self.authorize(session, &admin::AUDIT_READ).await?;
        Ok(self
            .audit
            .query(tenant.organization_id, filter, pagination)
            .await?)
    }
}

fn build_role(role: Role, request: RoleRequest) -> Role {
    let role = role.with_permissions(request.permissions);
    match request.parent_role_id {
        Some(parent) => role.with_parent(parent),
        None => role,
    }
}
