//! Persistence seams for organizations, entitlements and roles.
//!
//! All reads the gate performs are organization-scoped: every method takes the
//! organization id and implementations must never return a row belonging to a
//! different organization.

mod in_memory;
mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use gatekeep_auth::{Entitlement, Role, UserRoleGraph};
use gatekeep_core::{OrganizationId, RoleId, UserId};

pub use in_memory::InMemoryAuthzStore;
pub use postgres::PostgresAuthzStore;

/// Store operation error.
///
/// Infrastructure failures only. The gate converts every one of these into an
/// `EvaluationError` denial; it never treats them as "no rows".
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("store lock poisoned")]
    Poisoned,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: OrganizationId,
    pub name: String,
    pub active: bool,
}

#[async_trait]
pub trait OrganizationDirectory: Send + Sync {
    async fn organization(&self, id: OrganizationId) -> Result<Option<Organization>, StoreError>;
}

#[async_trait]
pub trait EntitlementStore: Send + Sync {
    /// The module row plus every submodule row of `module`, in one lookup.
    async fn module_entitlements(
        &self,
        organization_id: OrganizationId,
        module: &str,
    ) -> Result<Vec<Entitlement>, StoreError>;

    /// Insert or replace the row keyed by `(organization, module, submodule)`.
    async fn upsert_entitlement(&self, entitlement: Entitlement) -> Result<(), StoreError>;

    async fn list_entitlements(
        &self,
        organization_id: OrganizationId,
    ) -> Result<Vec<Entitlement>, StoreError>;
}

#[async_trait]
pub trait RoleStore: Send + Sync {
    /// Assigned roles of `user` in `organization_id` and every ancestor of
    /// them, in one lookup.
    async fn user_role_graph(
        &self,
        organization_id: OrganizationId,
        user_id: UserId,
    ) -> Result<UserRoleGraph, StoreError>;

    async fn role(
        &self,
        organization_id: OrganizationId,
        role_id: RoleId,
    ) -> Result<Option<Role>, StoreError>;

    async fn list_roles(&self, organization_id: OrganizationId) -> Result<Vec<Role>, StoreError>;

    /// Insert or replace a role. Names are unique per organization
    /// (`StoreError::Conflict`).
    async fn save_role(&self, role: Role) -> Result<(), StoreError>;

    /// Returns `false` when the assignment already existed.
    async fn assign_role(
        &self,
        organization_id: OrganizationId,
        user_id: UserId,
        role_id: RoleId,
    ) -> Result<bool, StoreError>;

    /// Returns `false` when there was nothing to revoke.
    async fn revoke_role(
        &self,
        organization_id: OrganizationId,
        user_id: UserId,
        role_id: RoleId,
    ) -> Result<bool, StoreError>;
}

#[async_trait]
impl<S> OrganizationDirectory for Arc<S>
where
    S: OrganizationDirectory + ?Sized,
{
    async fn organization(&self, id: OrganizationId) -> Result<Option<Organization>, StoreError> {
        (**self).organization(id).await
    }
}

#[async_trait]
impl<S> EntitlementStore for Arc<S>
where
    S: EntitlementStore + ?Sized,
{
    async fn module_entitlements(
        &self,
        organization_id: OrganizationId,
        module: &str,
    ) -> Result<Vec<Entitlement>, StoreError> {
        (**self).module_entitlements(organization_id, module).await
    }

    async fn upsert_entitlement(&self, entitlement: Entitlement) -> Result<(), StoreError> {
        (**self).upsert_entitlement(entitlement).await
    }

    async fn list_entitlements(
        &self,
        organization_id: OrganizationId,
    ) -> Result<Vec<Entitlement>, StoreError> {
        (**self).list_entitlements(organization_id).await
    }
}

#[async_trait]
impl<S> RoleStore for Arc<S>
where
    S: RoleStore + ?Sized,
{
    async fn user_role_graph(
        &self,
        organization_id: OrganizationId,
        user_id: UserId,
    ) -> Result<UserRoleGraph, StoreError> {
        (**self).user_role_graph(organization_id, user_id).await
    }

    async fn role(
        &self,
        organization_id: OrganizationId,
        role_id: RoleId,
    ) -> Result<Option<Role>, StoreError> {
        (**self).role(organization_id, role_id).await
    }

    async fn list_roles(&self, organization_id: OrganizationId) -> Result<Vec<Role>, StoreError> {
        (**self).list_roles(organization_id).await
    }

    async fn save_role(&self, role: Role) -> Result<(), StoreError> {
        (**self).save_role(role).await
    }

    async fn assign_role(
        &self,
        organization_id: OrganizationId,
        user_id: UserId,
        role_id: RoleId,
    ) -> Result<bool, StoreError> {
        (**self).assign_role(organization_id, user_id, role_id).await
    }

    async fn revoke_role(
        &self,
        organization_id: OrganizationId,
        user_id: UserId,
        role_id: RoleId,
    ) -> Result<bool, StoreError> {
        (**self).revoke_role(organization_id, user_id, role_id).await
    }
}

/// The three stores the gate reads, usually backed by one database.
#[derive(Clone)]
pub struct AuthzStores {
    pub organizations: Arc<dyn OrganizationDirectory>,
    pub entitlements: Arc<dyn EntitlementStore>,
    pub roles: Arc<dyn RoleStore>,
}

impl AuthzStores {
    pub fn from_shared<S>(store: Arc<S>) -> Self
    where
        S: OrganizationDirectory + EntitlementStore + RoleStore + 'static,
    {
        Self {
            organizations: store.clone(),
            entitlements: store.clone(),
            roles: store,
        }
    }
}
