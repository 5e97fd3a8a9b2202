use async_trait::async_trait;

use super::{AuditError, AuditLogEntry, AuditSink};

/// Mirrors every entry into the log stream (target `audit`), then hands it to
/// the durable sink. The durable sink's result is the result.
#[derive(Debug, Clone)]
pub struct TracingAuditSink<S> {
    inner: S,
}

impl<S> TracingAuditSink<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S> AuditSink for TracingAuditSink<S>
where
    S: AuditSink,
{
    async fn append(&self, entry: AuditLogEntry) -> Result<(), AuditError> {
        tracing::info!(
            target: "audit",
            entry_id = %entry.id,
            user_id = %entry.user_id,
            organization_id = ?entry.organization_id.map(|o| o.to_string()),
            module = %entry.module,
            submodule = ?entry.submodule,
            action = %entry.action,
            decision = entry.decision.as_str(),
            kind = ?entry.denial_kind.map(|k| k.as_str()),
            reason = %entry.reason,
            "access decision"
        );
        self.inner.append(entry).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::InMemoryAuditLog;
    use chrono::Utc;
    use gatekeep_core::{OrganizationId, UserId};
    use std::sync::Arc;

    #[tokio::test]
    async fn delegates_to_inner_sink() {
        let log = Arc::new(InMemoryAuditLog::new());
        let sink = TracingAuditSink::new(log.clone());
        let entry = AuditLogEntry::granted(
            Utc::now(),
            UserId::new(),
            OrganizationId::new(),
            "email",
            None,
            "send",
            "always-on module",
        );
        sink.append(entry.clone()).await.unwrap();
        assert_eq!(log.entries(), vec![entry]);
    }
}
