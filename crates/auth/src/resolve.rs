//! Effective permission resolution.
//!
//! A user's effective set is the union over every assigned role and that
//! role's full ancestor chain. Matching is a fixed three-step lookup:
//! `module.action`, then `module.*`, then `*.*`. There is no glob engine and no
//! identity-based bypass; a super-administrator is simply someone whose role
//! carries `*.*`.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use gatekeep_core::{OrganizationId, RoleId};

use crate::Permission;
use crate::permissions::WILDCARD;
use crate::roles::{Role, RoleGraphError};

/// What the store hands over for one `(organization, user)`: the directly
/// assigned role ids plus every role reachable through parent links.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRoleGraph {
    pub assigned: Vec<RoleId>,
    pub roles: Vec<Role>,
}

/// How a request was matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Exact,
    ModuleWildcard,
    CatchAll,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionMatch {
    pub kind: MatchKind,
    pub granted_by: Permission,
}

/// Cached outcome of one permission check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum PermissionDecision {
    Granted { matched: Permission },
    Denied,
}

impl PermissionDecision {
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted { .. })
    }
}

impl From<Option<PermissionMatch>> for PermissionDecision {
    fn from(value: Option<PermissionMatch>) -> Self {
        match value {
            Some(m) => Self::Granted {
                matched: m.granted_by,
            },
            None => Self::Denied,
        }
    }
}

/// A user's resolved, effective permissions in one organization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PermissionSet {
    permissions: BTreeSet<Permission>,
    roles: BTreeSet<String>,
}

impl PermissionSet {
    /// Resolve the union over all assigned roles and their ancestors.
    ///
    /// Cycles are rejected when roles are written, but the traversal is still
    /// guarded: a cycle, a dangling parent, a role from another organization or
    /// a chain deeper than `max_depth` is an error, never a partial result.
    pub fn resolve(
        organization_id: OrganizationId,
        graph: &UserRoleGraph,
        max_depth: usize,
    ) -> Result<Self, RoleGraphError> {
        let by_id: HashMap<RoleId, &Role> = graph.roles.iter().map(|r| (r.id, r)).collect();

        let mut permissions = BTreeSet::new();
        let mut roles = BTreeSet::new();
        let mut collected: HashSet<RoleId> = HashSet::new();

        for assigned in &graph.assigned {
            let mut chain: HashSet<RoleId> = HashSet::new();
            let mut cursor = Some(*assigned);
            let mut depth = 0usize;

            while let Some(id) = cursor {
                if !chain.insert(id) {
                    return Err(RoleGraphError::Cycle {
                        role: *assigned,
                        parent: id,
                    });
                }
                depth += 1;
                if depth > max_depth {
                    return Err(RoleGraphError::DepthExceeded { max: max_depth });
                }

                let role = by_id.get(&id).ok_or(RoleGraphError::UnknownRole(id))?;
                if role.organization_id != organization_id {
                    return Err(RoleGraphError::CrossOrganization(id));
                }

                if collected.insert(id) {
                    permissions.extend(role.permissions.iter().cloned());
                    roles.insert(role.name.clone());
                }
                cursor = role.parent_role_id;
            }
        }

        Ok(Self { permissions, roles })
    }

    pub fn from_permissions(permissions: impl IntoIterator<Item = Permission>) -> Self {
        Self {
            permissions: permissions.into_iter().collect(),
            roles: BTreeSet::new(),
        }
    }

    /// Exact, then module wildcard, then catch-all.
    pub fn check(&self, module: &str, action: &str) -> Option<PermissionMatch> {
        if let Ok(exact) = Permission::exact(module, action) {
            if self.permissions.contains(&exact) {
                return Some(PermissionMatch {
                    kind: MatchKind::Exact,
                    granted_by: exact,
                });
            }
        }
        if let Ok(wildcard) = Permission::module_wildcard(module) {
            if !wildcard.is_catch_all() && self.permissions.contains(&wildcard) {
                return Some(PermissionMatch {
                    kind: MatchKind::ModuleWildcard,
                    granted_by: wildcard,
                });
            }
        }
        let all = Permission::catch_all();
        if self.permissions.contains(&all) {
            return Some(PermissionMatch {
                kind: MatchKind::CatchAll,
                granted_by: all,
            });
        }
        None
    }

    /// Whether every request `other` would grant is also granted by this set.
    pub fn covers(&self, other: &Permission) -> bool {
        if self.permissions.contains(&Permission::catch_all()) {
            return true;
        }
        if other.is_catch_all() {
            return false;
        }
        if other.is_module_wildcard() {
            return Permission::module_wildcard(other.module())
                .map(|w| self.permissions.contains(&w))
                .unwrap_or(false);
        }
        self.check(other.module(), other.action()).is_some()
    }

    pub fn covers_all<'a>(&self, others: impl IntoIterator<Item = &'a Permission>) -> bool {
        others.into_iter().all(|p| self.covers(p))
    }

    /// Whether anything in the set touches `module` (used for menu filtering).
    pub fn grants_any_in(&self, module: &str) -> bool {
        self.permissions
            .iter()
            .any(|p| p.is_catch_all() || p.module() == module)
    }

    pub fn is_empty(&self) -> bool {
        self.permissions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Permission> {
        self.permissions.iter()
    }

    pub fn role_names(&self) -> impl Iterator<Item = &str> {
        self.roles.iter().map(String::as_str)
    }

    pub fn has_catch_all(&self) -> bool {
        self.permissions.iter().any(|p| p.module() == WILDCARD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn perm(s: &'static str) -> Permission {
        Permission::parse(s).unwrap()
    }

    fn graph(assigned: &[&Role], all: &[&Role]) -> UserRoleGraph {
        UserRoleGraph {
            assigned: assigned.iter().map(|r| r.id).collect(),
            roles: all.iter().map(|r| (*r).clone()).collect(),
        }
    }

    #[test]
    fn inherits_parent_permissions() {
        let org = OrganizationId::new();
        let viewer = Role::new(org, "viewer").with_permissions([perm("reports.read")]);
        let manager = Role::new(org, "manager")
            .with_parent(viewer.id)
            .with_permissions([perm("sales.approve")]);

        let set = PermissionSet::resolve(org, &graph(&[&manager], &[&manager, &viewer]), 16).unwrap();
        let m = set.check("reports", "read").unwrap();
        assert_eq!(m.kind, MatchKind::Exact);
        assert_eq!(m.granted_by.as_str(), "reports.read");
        assert!(set.check("sales", "approve").is_some());
        assert!(set.check("sales", "delete").is_none());
        assert_eq!(set.role_names().collect::<Vec<_>>(), vec!["manager", "viewer"]);
    }

    #[test]
    fn exact_wins_over_wildcard_and_wildcard_over_catch_all() {
        let set = PermissionSet::from_permissions([perm("sales.read"), perm("sales.*"), perm("*.*")]);
        assert_eq!(set.check("sales", "read").unwrap().kind, MatchKind::Exact);
        assert_eq!(set.check("sales", "void").unwrap().kind, MatchKind::ModuleWildcard);
        assert_eq!(set.check("vouchers", "post").unwrap().kind, MatchKind::CatchAll);
    }

    #[test]
    fn wildcard_does_not_leak_across_modules() {
        let set = PermissionSet::from_permissions([perm("sales.*")]);
        assert!(set.check("purchases", "read").is_none());
        assert!(set.check("sales_reports", "read").is_none());
    }

    #[test]
    fn traversal_guard_rejects_corrupted_graphs() {
        let org = OrganizationId::new();
        let mut a = Role::new(org, "a");
        let b = Role::new(org, "b").with_parent(a.id);
        a.parent_role_id = Some(b.id);
        assert!(matches!(
            PermissionSet::resolve(org, &graph(&[&a], &[&a, &b]), 16),
            Err(RoleGraphError::Cycle { .. })
        ));

        let orphan = Role::new(org, "orphan").with_parent(RoleId::new());
        assert!(matches!(
            PermissionSet::resolve(org, &graph(&[&orphan], &[&orphan]), 16),
            Err(RoleGraphError::UnknownRole(_))
        ));

        let foreign = Role::new(OrganizationId::new(), "foreign");
        assert_eq!(
            PermissionSet::resolve(org, &graph(&[&foreign], &[&foreign]), 16),
            Err(RoleGraphError::CrossOrganization(foreign.id))
        );
    }

    #[test]
    fn depth_guard_applies_per_chain() {
        let org = OrganizationId::new();
        let root = Role::new(org, "root");
        let mid = Role::new(org, "mid").with_parent(root.id);
        let leaf = Role::new(org, "leaf").with_parent(mid.id);
        let g = graph(&[&leaf], &[&leaf, &mid, &root]);
        assert!(PermissionSet::resolve(org, &g, 3).is_ok());
        assert_eq!(
            PermissionSet::resolve(org, &g, 2),
            Err(RoleGraphError::DepthExceeded { max: 2 })
        );
    }

    #[test]
    fn covers_respects_wildcard_breadth() {
        let wildcard = PermissionSet::from_permissions([perm("sales.*")]);
        assert!(wildcard.covers(&perm("sales.read")));
        assert!(wildcard.covers(&perm("sales.*")));
        assert!(!wildcard.covers(&perm("*.*")));

        let narrow = PermissionSet::from_permissions([perm("sales.read")]);
        assert!(!narrow.covers(&perm("sales.*")));

        let admin = PermissionSet::from_permissions([perm("*.*")]);
        assert!(admin.covers(&perm("*.*")));
        assert!(admin.covers_all([&perm("rbac.roles.manage"), &perm("sales.*")]));
    }

    #[test]
    fn empty_graph_grants_nothing() {
        let org = OrganizationId::new();
        let set = PermissionSet::resolve(org, &UserRoleGraph::default(), 16).unwrap();
        assert!(set.is_empty());
        assert!(set.check("email", "send").is_none());
        assert!(!set.grants_any_in("email"));
    }

    fn segment() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_]{0,7}"
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, ..ProptestConfig::default() })]

        /// Without an exact grant, a module wildcard or a catch-all, every
        /// request is denied.
        #[test]
        fn no_covering_grant_means_deny(
            module in segment(),
            action in segment(),
            granted in proptest::collection::vec((segment(), segment()), 0..8),
        ) {
            let perms: Vec<Permission> = granted
                .iter()
                .filter(|(m, a)| !(m == &module && a == &action))
                .filter_map(|(m, a)| Permission::exact(m, a).ok())
                .collect();
            let set = PermissionSet::from_permissions(perms);
            prop_assert!(set.check(&module, &action).is_none());
        }

        /// `module.*` grants every action of that module.
        #[test]
        fn module_wildcard_grants_every_action(module in segment(), action in segment()) {
            let set = PermissionSet::from_permissions([Permission::module_wildcard(&module).unwrap()]);
            let m = set.check(&module, &action).unwrap();
            prop_assert_eq!(m.kind, MatchKind::ModuleWildcard);
        }

        /// Resolution over a linear chain collects every ancestor.
        #[test]
        fn chain_resolution_collects_every_ancestor(len in 1usize..12) {
            let org = OrganizationId::new();
            let mut roles: Vec<Role> = Vec::new();
            for i in 0..len {
                let mut role = Role::new(org, format!("r{i}"))
                    .with_permissions([Permission::exact(&format!("m{i}"), "read").unwrap()]);
                role.parent_role_id = roles.last().map(|r| r.id);
                roles.push(role);
            }
            let leaf = roles.last().unwrap().id;
            let g = UserRoleGraph { assigned: vec![leaf], roles: roles.clone() };
            let set = PermissionSet::resolve(org, &g, 16).unwrap();
            for i in 0..len {
                let module = format!("m{i}");
                prop_assert!(set.check(&module, "read").is_some());
            }
        }
    }
}
