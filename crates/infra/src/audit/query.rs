//! Read-only audit queries. Always organization-scoped and paginated.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gatekeep_core::{OrganizationId, UserId};

use super::{AuditDecision, AuditError, AuditLogEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub limit: u32,
    /// 0-based.
    pub offset: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
        }
    }
}

impl Pagination {
    pub fn new(limit: Option<u32>, offset: Option<u32>) -> Self {
        Self {
            limit: limit.unwrap_or(50).min(1000),
            offset: offset.unwrap_or(0),
        }
    }

    pub(crate) fn has_more(&self, total: u64) -> bool {
        total > u64::from(self.offset) + u64::from(self.limit)
    }
}

/// Optional narrowing of an audit query. Time bounds are inclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditFilter {
    pub user_id: Option<UserId>,
    pub module: Option<String>,
    pub decision: Option<AuditDecision>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl AuditFilter {
    pub fn matches(&self, entry: &AuditLogEntry) -> bool {
        self.user_id.is_none_or(|u| entry.user_id == u)
            && self.module.as_deref().is_none_or(|m| entry.module == m)
            && self.decision.is_none_or(|d| entry.decision == d)
            && self.from.is_none_or(|from| entry.timestamp >= from)
            && self.to.is_none_or(|to| entry.timestamp <= to)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditPage {
    /// Newest first.
    pub entries: Vec<AuditLogEntry>,
    /// Matches across all pages.
    pub total: u64,
    pub pagination: Pagination,
    pub has_more: bool,
}

#[async_trait]
pub trait AuditQuery: Send + Sync {
    /// Entries recorded against `organization_id`, newest first.
    async fn query(
        &self,
        organization_id: OrganizationId,
        filter: AuditFilter,
        pagination: Pagination,
    ) -> Result<AuditPage, AuditError>;
}

#[async_trait]
impl<Q> AuditQuery for Arc<Q>
where
    Q: AuditQuery + ?Sized,
{
    async fn query(
        &self,
        organization_id: OrganizationId,
        filter: AuditFilter,
        pagination: Pagination,
    ) -> Result<AuditPage, AuditError> {
        (**self).query(organization_id, filter, pagination).await
    }
}
