use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use gatekeep_core::{OrganizationId, RoleId};

use crate::Permission;

/// Depth used when no limit is configured.
pub const DEFAULT_MAX_ROLE_DEPTH: usize = 16;

/// A role inside one organization.
///
/// Roles form a forest per organization through `parent_role_id`; a role
/// inherits every permission of its ancestors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub organization_id: OrganizationId,
    pub name: String,
    pub parent_role_id: Option<RoleId>,
    pub permissions: BTreeSet<Permission>,
}

impl Role {
    pub fn new(organization_id: OrganizationId, name: impl Into<String>) -> Self {
        Self {
            id: RoleId::new(),
            organization_id,
            name: name.into(),
            parent_role_id: None,
            permissions: BTreeSet::new(),
        }
    }

    pub fn with_parent(mut self, parent: RoleId) -> Self {
        self.parent_role_id = Some(parent);
        self
    }

    pub fn with_permissions(mut self, permissions: impl IntoIterator<Item = Permission>) -> Self {
        self.permissions.extend(permissions);
        self
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RoleGraphError {
    #[error("role {0} not found")]
    UnknownRole(RoleId),

    #[error("role {0} belongs to another organization")]
    CrossOrganization(RoleId),

    #[error("making {parent} the parent of {role} would create a cycle")]
    Cycle { role: RoleId, parent: RoleId },

    #[error("role hierarchy deeper than {max} levels")]
    DepthExceeded { max: usize },

    #[error("role name must not be empty")]
    EmptyName,
}

/// All roles of one organization, for validating a proposed write.
///
/// Checks run against the graph *as it would be* after the write, so they are
/// the same for a create and for an update that re-parents a subtree.
#[derive(Debug, Clone)]
pub struct RoleForest {
    organization_id: OrganizationId,
    roles: HashMap<RoleId, Role>,
}

impl RoleForest {
    pub fn new(organization_id: OrganizationId, roles: impl IntoIterator<Item = Role>) -> Self {
        let roles = roles
            .into_iter()
            .filter(|r| r.organization_id == organization_id)
            .map(|r| (r.id, r))
            .collect();
        Self {
            organization_id,
            roles,
        }
    }

    pub fn get(&self, id: &RoleId) -> Option<&Role> {
        self.roles.get(id)
    }

    /// Validate `candidate` as the new version of a role (create or update).
    pub fn validate_write(&self, candidate: &Role, max_depth: usize) -> Result<(), RoleGraphError> {
        if candidate.name.trim().is_empty() {
            return Err(RoleGraphError::EmptyName);
        }
        if candidate.organization_id != self.organization_id {
            return Err(RoleGraphError::CrossOrganization(candidate.id));
        }

        let Some(parent) = candidate.parent_role_id else {
            // A root: only the subtree below it counts.
            return self.check_depth(1 + self.subtree_height(candidate.id), max_depth);
        };

        if parent == candidate.id {
            return Err(RoleGraphError::Cycle {
                role: candidate.id,
                parent,
            });
        }
        if !self.roles.contains_key(&parent) {
            return Err(RoleGraphError::UnknownRole(parent));
        }

        // Walk up from the proposed parent. Reaching the candidate means the
        // candidate would become its own ancestor.
        let mut depth_above = 0usize;
        let mut visited = HashSet::new();
        let mut cursor = Some(parent);
        while let Some(id) = cursor {
            if id == candidate.id {
                return Err(RoleGraphError::Cycle {
                    role: candidate.id,
                    parent,
                });
            }
            if !visited.insert(id) {
                // Pre-existing corruption above the parent; refuse to build on it.
                return Err(RoleGraphError::Cycle { role: id, parent });
            }
            let role = self.roles.get(&id).ok_or(RoleGraphError::UnknownRole(id))?;
            depth_above += 1;
            if depth_above > max_depth {
                return Err(RoleGraphError::DepthExceeded { max: max_depth });
            }
            cursor = role.parent_role_id;
        }

        self.check_depth(depth_above + 1 + self.subtree_height(candidate.id), max_depth)
    }

    /// Permissions `role` would carry including everything inherited from its
    /// (proposed) ancestors. Call after [`Self::validate_write`].
    pub fn effective_permissions(&self, role: &Role) -> BTreeSet<Permission> {
        let mut out = role.permissions.clone();
        let mut seen = HashSet::from([role.id]);
        let mut cursor = role.parent_role_id;
        while let Some(id) = cursor {
            if !seen.insert(id) {
                break;
            }
            let Some(parent) = self.roles.get(&id) else {
                break;
            };
            out.extend(parent.permissions.iter().cloned());
            cursor = parent.parent_role_id;
        }
        out
    }

    fn check_depth(&self, depth: usize, max_depth: usize) -> Result<(), RoleGraphError> {
        if depth > max_depth {
            Err(RoleGraphError::DepthExceeded { max: max_depth })
        } else {
            Ok(())
        }
    }

    /// Number of levels strictly below `root` (0 for a leaf or a new role).
    fn subtree_height(&self, root: RoleId) -> usize {
        let mut children: HashMap<RoleId, Vec<RoleId>> = HashMap::new();
        for role in self.roles.values() {
            if let Some(parent) = role.parent_role_id {
                children.entry(parent).or_default().push(role.id);
            }
        }

        let mut height = 0;
        let mut frontier = vec![root];
        let mut seen = HashSet::from([root]);
        while !frontier.is_empty() {
            let next: Vec<RoleId> = frontier
                .iter()
                .filter_map(|id| children.get(id))
                .flatten()
                .copied()
                .filter(|id| seen.insert(*id))
                .collect();
            if next.is_empty() {
                break;
            }
            height += 1;
            frontier = next;
        }
        height
    }
}
