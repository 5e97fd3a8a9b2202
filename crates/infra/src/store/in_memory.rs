use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;

use gatekeep_auth::{Entitlement, Role, UserRoleGraph};
use gatekeep_core::{OrganizationId, RoleId, UserId};

use super::{EntitlementStore, Organization, OrganizationDirectory, RoleStore, StoreError};

type EntitlementKey = (OrganizationId, String, Option<String>);

#[derive(Debug, Default)]
struct State {
    organizations: HashMap<OrganizationId, Organization>,
    entitlements: HashMap<EntitlementKey, Entitlement>,
    roles: HashMap<RoleId, Role>,
    assignments: HashMap<(OrganizationId, UserId), BTreeSet<RoleId>>,
}

/// In-memory store for tests/dev.
///
/// Implements every store trait behind one lock, so a test can seed data and
/// hand the same `Arc` to the gate.
#[derive(Debug, Default)]
pub struct InMemoryAuthzStore {
    inner: RwLock<State>,
}

impl InMemoryAuthzStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) an organization. Organizations are provisioned
    /// outside the core; this is the dev/test stand-in for that flow.
    pub fn upsert_organization(&self, organization: Organization) -> Result<(), StoreError> {
        let mut state = self.inner.write().map_err(|_| StoreError::Poisoned)?;
        state.organizations.insert(organization.id, organization);
        Ok(())
    }
}

#[async_trait]
impl OrganizationDirectory for InMemoryAuthzStore {
    async fn organization(&self, id: OrganizationId) -> Result<Option<Organization>, StoreError> {
        let state = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        Ok(state.organizations.get(&id).cloned())
    }
}

#[async_trait]
impl EntitlementStore for InMemoryAuthzStore {
    async fn module_entitlements(
        &self,
        organization_id: OrganizationId,
        module: &str,
    ) -> Result<Vec<Entitlement>, StoreError> {
        let state = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        Ok(state
            .entitlements
            .values()
            .filter(|e| e.organization_id == organization_id && e.module == module)
            .cloned()
            .collect())
    }

    async fn upsert_entitlement(&self, entitlement: Entitlement) -> Result<(), StoreError> {
        let mut state = self.inner.write().map_err(|_| StoreError::Poisoned)?;
        let key = (
            entitlement.organization_id,
            entitlement.module.clone(),
            entitlement.submodule.clone(),
        );
        state.entitlements.insert(key, entitlement);
        Ok(())
    }

    async fn list_entitlements(
        &self,
        organization_id: OrganizationId,
    ) -> Result<Vec<Entitlement>, StoreError> {
        let state = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        let mut rows: Vec<Entitlement> = state
            .entitlements
            .values()
            .filter(|e| e.organization_id == organization_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| (&a.module, &a.submodule).cmp(&(&b.module, &b.submodule)));
        Ok(rows)
    }
}

#[async_trait]
impl RoleStore for InMemoryAuthzStore {
    async fn user_role_graph(
        &self,
        organization_id: OrganizationId,
        user_id: UserId,
    ) -> Result<UserRoleGraph, StoreError> {
        let state = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        let assigned: Vec<RoleId> = state
            .assignments
            .get(&(organization_id, user_id))
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default();

        // Follow parent links without filtering by organization; the resolver
        // rejects anything foreign it is handed.
        let mut roles: HashMap<RoleId, Role> = HashMap::new();
        let mut frontier: Vec<RoleId> = assigned.clone();
        while let Some(id) = frontier.pop() {
            if roles.contains_key(&id) {
                continue;
            }
            if let Some(role) = state.roles.get(&id) {
                if let Some(parent) = role.parent_role_id {
                    frontier.push(parent);
                }
                roles.insert(id, role.clone());
            }
        }

        Ok(UserRoleGraph {
            assigned,
            roles: roles.into_values().collect(),
        })
    }

    async fn role(
        &self,
        organization_id: OrganizationId,
        role_id: RoleId,
    ) -> Result<Option<Role>, StoreError> {
        let state = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        Ok(state
            .roles
            .get(&role_id)
            .filter(|r| r.organization_id == organization_id)
            .cloned())
    }

    async fn list_roles(&self, organization_id: OrganizationId) -> Result<Vec<Role>, StoreError> {
        let state = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        let mut roles: Vec<Role> = state
            .roles
            .values()
            .filter(|r| r.organization_id == organization_id)
            .cloned()
            .collect();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roles)
    }

    async fn save_role(&self, role: Role) -> Result<(), StoreError> {
        let mut state = self.inner.write().map_err(|_| StoreError::Poisoned)?;
        let clash = state.roles.values().any(|r| {
            r.organization_id == role.organization_id && r.id != role.id && r.name == role.name
        });
        if clash {
            return Err(StoreError::Conflict(format!(
                "role name '{}' already exists",
                role.name
            )));
        }
        if let Some(existing) = state.roles.get(&role.id) {
            if existing.organization_id != role.organization_id {
                return Err(StoreError::Conflict("role id belongs to another organization".into()));
            }
        }
        state.roles.insert(role.id, role);
        Ok(())
    }

    async fn assign_role(
        &self,
        organization_id: OrganizationId,
        user_id: UserId,
        role_id: RoleId,
    ) -> Result<bool, StoreError> {
        let mut state = self.inner.write().map_err(|_| StoreError::Poisoned)?;
        Ok(state
            .assignments
            .entry((organization_id, user_id))
            .or_default()
            .insert(role_id))
    }

    async fn revoke_role(
        &self,
        organization_id: OrganizationId,
        user_id: UserId,
        role_id: RoleId,
    ) -> Result<bool, StoreError> {
        let mut state = self.inner.write().map_err(|_| StoreError::Poisoned)?;
        Ok(state
            .assignments
            .get_mut(&(organization_id, user_id))
            .map(|ids| ids.remove(&role_id))
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatekeep_auth::{EntitlementStatus, Permission};

    #[tokio::test]
    async fn role_graph_follows_parents_and_stays_in_scope() {
        let store = InMemoryAuthzStore::new();
        let org = OrganizationId::new();
        let other = OrganizationId::new();
        let user = UserId::new();

        let viewer = Role::new(org, "viewer").with_permissions([Permission::parse("reports.read").unwrap()]);
        let manager = Role::new(org, "manager").with_parent(viewer.id);
        store.save_role(viewer.clone()).await.unwrap();
        store.save_role(manager.clone()).await.unwrap();
        store.assign_role(org, user, manager.id).await.unwrap();

        let graph = store.user_role_graph(org, user).await.unwrap();
        assert_eq!(graph.assigned, vec![manager.id]);
        assert_eq!(graph.roles.len(), 2);

        // Same user, different organization: nothing.
        let elsewhere = store.user_role_graph(other, user).await.unwrap();
        assert!(elsewhere.assigned.is_empty());
        assert!(store.role(other, viewer.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn role_names_are_unique_per_organization() {
        let store = InMemoryAuthzStore::new();
        let org = OrganizationId::new();
        store.save_role(Role::new(org, "admin")).await.unwrap();
        let err = store.save_role(Role::new(org, "admin")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        // Another organization may reuse the name.
        store.save_role(Role::new(OrganizationId::new(), "admin")).await.unwrap();
    }

    #[tokio::test]
    async fn assignment_reports_changes() {
        let store = InMemoryAuthzStore::new();
        let (org, user, role) = (OrganizationId::new(), UserId::new(), RoleId::new());
        assert!(store.assign_role(org, user, role).await.unwrap());
        assert!(!store.assign_role(org, user, role).await.unwrap());
        assert!(store.revoke_role(org, user, role).await.unwrap());
        assert!(!store.revoke_role(org, user, role).await.unwrap());
    }

    #[tokio::test]
    async fn module_entitlements_include_submodule_rows_only_for_that_module() {
        let store = InMemoryAuthzStore::new();
        let org = OrganizationId::new();
        for (module, sub) in [("manufacturing", None), ("manufacturing", Some("bom")), ("sales", None)] {
            store
                .upsert_entitlement(Entitlement {
                    organization_id: org,
                    module: module.into(),
                    submodule: sub.map(Into::into),
                    status: EntitlementStatus::Enabled,
                    expires_at: None,
                })
                .await
                .unwrap();
        }
        let rows = store.module_entitlements(org, "manufacturing").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(store.list_entitlements(org).await.unwrap().len(), 3);
        assert!(store.list_entitlements(OrganizationId::new()).await.unwrap().is_empty());
    }
}
