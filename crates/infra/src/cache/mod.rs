//! Decision cache.
//!
//! Two independent key spaces: entitlement decisions keyed by
//! `(organization, module, submodule?)` and permission decisions keyed by
//! `(organization, user, module, action)`.
//!
//! ## Generations
//!
//! Every read returns the generation of the key's invalidation scope alongside
//! the value. A fill must present the generation its read observed; if an
//! invalidation happened in between, the fill is discarded (or written under a
//! generation no reader will ever accept). That closes the race where a slow
//! request computes a grant from pre-revocation data and caches it after the
//! revocation was acknowledged.
//!
//! The cache is always passed explicitly; there is no process-wide instance.

mod in_memory;
#[cfg(feature = "redis")]
mod redis_cache;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use gatekeep_auth::{EntitlementDecision, PermissionDecision};
use gatekeep_core::{OrganizationId, UserId};

pub use in_memory::InMemoryDecisionCache;
#[cfg(feature = "redis")]
pub use redis_cache::RedisDecisionCache;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),

    #[error("cache payload could not be decoded: {0}")]
    Decode(String),

    #[error("cache lock poisoned")]
    Poisoned,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntitlementKey {
    pub organization_id: OrganizationId,
    pub module: String,
    pub submodule: Option<String>,
}

impl EntitlementKey {
    pub fn new(organization_id: OrganizationId, module: &str, submodule: Option<&str>) -> Self {
        Self {
            organization_id,
            module: module.to_string(),
            submodule: submodule.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PermissionKey {
    pub organization_id: OrganizationId,
    pub user_id: UserId,
    pub module: String,
    pub action: String,
}

impl PermissionKey {
    pub fn new(organization_id: OrganizationId, user_id: UserId, module: &str, action: &str) -> Self {
        Self {
            organization_id,
            user_id,
            module: module.to_string(),
            action: action.to_string(),
        }
    }
}

/// Invalidation counter observed by a read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(pub u64);

/// Result of a cache read: the value, if any, and the generation to present
/// when filling a miss.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRead<T> {
    pub value: Option<T>,
    pub generation: Generation,
}

impl<T> CacheRead<T> {
    pub fn miss(generation: Generation) -> Self {
        Self {
            value: None,
            generation,
        }
    }
}

#[async_trait]
pub trait DecisionCache: Send + Sync {
    async fn entitlement(
        &self,
        key: &EntitlementKey,
    ) -> Result<CacheRead<EntitlementDecision>, CacheError>;

    async fn fill_entitlement(
        &self,
        key: EntitlementKey,
        observed: Generation,
        value: EntitlementDecision,
        ttl: Duration,
    ) -> Result<(), CacheError>;

    async fn permission(
        &self,
        key: &PermissionKey,
    ) -> Result<CacheRead<PermissionDecision>, CacheError>;

    async fn fill_permission(
        &self,
        key: PermissionKey,
        observed: Generation,
        value: PermissionDecision,
        ttl: Duration,
    ) -> Result<(), CacheError>;

    /// Drop every entitlement decision of an organization.
    async fn invalidate_organization(&self, organization_id: OrganizationId)
    -> Result<(), CacheError>;

    /// Drop every permission decision of one user in one organization.
    async fn invalidate_user(
        &self,
        organization_id: OrganizationId,
        user_id: UserId,
    ) -> Result<(), CacheError>;

    /// Drop every permission decision in an organization (role edits).
    async fn invalidate_organization_permissions(
        &self,
        organization_id: OrganizationId,
    ) -> Result<(), CacheError>;
}

#[async_trait]
impl<C> DecisionCache for Arc<C>
where
    C: DecisionCache + ?Sized,
{
    async fn entitlement(
        &self,
        key: &EntitlementKey,
    ) -> Result<CacheRead<EntitlementDecision>, CacheError> {
        (**self).entitlement(key).await
    }

    async fn fill_entitlement(
        &self,
        key: EntitlementKey,
        observed: Generation,
        value: EntitlementDecision,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        (**self).fill_entitlement(key, observed, value, ttl).await
    }

    async fn permission(
        &self,
        key: &PermissionKey,
    ) -> Result<CacheRead<PermissionDecision>, CacheError> {
        (**self).permission(key).await
    }

    async fn fill_permission(
        &self,
        key: PermissionKey,
        observed: Generation,
        value: PermissionDecision,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        (**self).fill_permission(key, observed, value, ttl).await
    }

    async fn invalidate_organization(
        &self,
        organization_id: OrganizationId,
    ) -> Result<(), CacheError> {
        (**self).invalidate_organization(organization_id).await
    }

    async fn invalidate_user(
        &self,
        organization_id: OrganizationId,
        user_id: UserId,
    ) -> Result<(), CacheError> {
        (**self).invalidate_user(organization_id, user_id).await
    }

    async fn invalidate_organization_permissions(
        &self,
        organization_id: OrganizationId,
    ) -> Result<(), CacheError> {
        (**self).invalidate_organization_permissions(organization_id).await
    }
}

/// Cache that never holds anything. Every read is a miss.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDecisionCache;

#[async_trait]
impl DecisionCache for NoopDecisionCache {
    async fn entitlement(
        &self,
        _key: &EntitlementKey,
    ) -> Result<CacheRead<EntitlementDecision>, CacheError> {
        Ok(CacheRead::miss(Generation::default()))
    }

    async fn fill_entitlement(
        &self,
        _key: EntitlementKey,
        _observed: Generation,
        _value: EntitlementDecision,
        _ttl: Duration,
    ) -> Result<(), CacheError> {
        Ok(())
    }

    async fn permission(
        &self,
        _key: &PermissionKey,
    ) -> Result<CacheRead<PermissionDecision>, CacheError> {
        Ok(CacheRead::miss(Generation::default()))
    }

    async fn fill_permission(
        &self,
        _key: PermissionKey,
        _observed: Generation,
        _value: PermissionDecision,
        _ttl: Duration,
    ) -> Result<(), CacheError> {
        Ok(())
    }

    async fn invalidate_organization(&self, _organization_id: OrganizationId) -> Result<(), CacheError> {
        Ok(())
    }

    async fn invalidate_user(
        &self,
        _organization_id: OrganizationId,
        _user_id: UserId,
    ) -> Result<(), CacheError> {
        Ok(())
    }

    async fn invalidate_organization_permissions(
        &self,
        _organization_id: OrganizationId,
    ) -> Result<(), CacheError> {
        Ok(())
    }
}
