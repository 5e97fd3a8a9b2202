use std::sync::RwLock;

use async_trait::async_trait;

use gatekeep_core::OrganizationId;

use super::{AuditError, AuditFilter, AuditLogEntry, AuditPage, AuditQuery, AuditSink, Pagination};

/// Append-only audit log held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryAuditLog {
    entries: RwLock<Vec<AuditLogEntry>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every entry in append order. Test helper.
    pub fn entries(&self) -> Vec<AuditLogEntry> {
        self.entries.read().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditLog {
    async fn append(&self, entry: AuditLogEntry) -> Result<(), AuditError> {
        let mut entries = self.entries.write().map_err(|_| AuditError::Poisoned)?;
        entries.push(entry);
        Ok(())
    }
}

#[async_trait]
impl AuditQuery for InMemoryAuditLog {
    async fn query(
        &self,
        organization_id: OrganizationId,
        filter: AuditFilter,
        pagination: Pagination,
    ) -> Result<AuditPage, AuditError> {
        let entries = self.entries.read().map_err(|_| AuditError::Poisoned)?;

        let mut matching: Vec<&AuditLogEntry> = entries
            .iter()
            .filter(|e| e.organization_id == Some(organization_id))
            .filter(|e| filter.matches(e))
            .collect();
        // Newest first; ids are time-ordered so they break timestamp ties.
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));

        let total = matching.len() as u64;
        let page = matching
            .into_iter()
            .skip(pagination.offset as usize)
            .take(pagination.limit as usize)
            .cloned()
            .collect();

        Ok(AuditPage {
            entries: page,
            total,
            has_more: pagination.has_more(total),
            pagination,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditDecision;
    use chrono::{Duration, Utc};
    use gatekeep_auth::Denial;
    use gatekeep_core::UserId;

    #[tokio::test]
    async fn query_is_scoped_filtered_and_paginated() {
        let log = InMemoryAuditLog::new();
        let org = OrganizationId::new();
        let other = OrganizationId::new();
        let alice = UserId::new();
        let bob = UserId::new();
        let t0 = Utc::now();

        for i in 0..5 {
            let at = t0 + Duration::seconds(i);
            log.append(AuditLogEntry::granted(at, alice, org, "sales", None, "read", "granted by 'sales.*'"))
                .await
                .unwrap();
        }
        let denial = Denial::permission_denied("sales", "delete");
        log.append(AuditLogEntry::denied(t0, bob, Some(org), "sales", None, "delete", &denial))
            .await
            .unwrap();
        log.append(AuditLogEntry::granted(t0, alice, other, "sales", None, "read", "x"))
            .await
            .unwrap();

        let all = log
            .query(org, AuditFilter::default(), Pagination::default())
            .await
            .unwrap();
        assert_eq!(all.total, 6);
        assert!(!all.has_more);

        let alice_only = AuditFilter {
            user_id: Some(alice),
            ..Default::default()
        };
        let page = log
            .query(org, alice_only, Pagination::new(Some(2), Some(0)))
            .await
            .unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.entries.len(), 2);
        assert!(page.has_more);
        assert_eq!(page.entries[0].timestamp, t0 + Duration::seconds(4));

        let denied = AuditFilter {
            decision: Some(AuditDecision::Denied),
            ..Default::default()
        };
        let page = log.query(org, denied, Pagination::default()).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.entries[0].user_id, bob);
    }

    #[tokio::test]
    async fn time_range_is_inclusive() {
        let log = InMemoryAuditLog::new();
        let org = OrganizationId::new();
        let user = UserId::new();
        let t0 = Utc::now();
        for i in 0..3 {
            log.append(AuditLogEntry::granted(
                t0 + Duration::minutes(i),
                user,
                org,
                "email",
                None,
                "send",
                "r",
            ))
            .await
            .unwrap();
        }
        let filter = AuditFilter {
            from: Some(t0 + Duration::minutes(1)),
            to: Some(t0 + Duration::minutes(2)),
            ..Default::default()
        };
        let page = log.query(org, filter, Pagination::default()).await.unwrap();
        assert_eq!(page.total, 2);
    }
}
