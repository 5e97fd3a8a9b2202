//! Access audit log.
//!
//! Every gate evaluation appends exactly one [`AuditLogEntry`]. The log is
//! append-only: sinks insert, queries read, nothing updates or deletes.
//!
//! A failing sink never changes a decision. The gate reports the failure
//! (error-level log plus a counter) and returns the decision it already made.

mod in_memory;
mod postgres;
mod query;
mod tracing_sink;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use gatekeep_auth::{Denial, DenialKind};
use gatekeep_core::{DomainError, OrganizationId, UserId};

pub use in_memory::InMemoryAuditLog;
pub use postgres::PostgresAuditLog;
pub use query::{AuditFilter, AuditPage, AuditQuery, Pagination};
pub use tracing_sink::TracingAuditSink;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuditError {
    #[error("audit backend unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt audit record: {0}")]
    Corrupt(String),

    #[error("audit log lock poisoned")]
    Poisoned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditDecision {
    Granted,
    Denied,
}

impl AuditDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Granted => "granted",
            Self::Denied => "denied",
        }
    }
}

impl core::str::FromStr for AuditDecision {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "granted" => Ok(Self::Granted),
            "denied" => Ok(Self::Denied),
            other => Err(DomainError::validation(format!("unknown audit decision '{other}'"))),
        }
    }
}

/// One gate evaluation.
///
/// `organization_id` is `None` only for `TenantContextMissing` denials, where
/// no organization could be resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub user_id: UserId,
    pub organization_id: Option<OrganizationId>,
    pub module: String,
    pub submodule: Option<String>,
    pub action: String,
    pub decision: AuditDecision,
    pub denial_kind: Option<DenialKind>,
    pub reason: String,
}

impl AuditLogEntry {
    pub fn granted(
        timestamp: DateTime<Utc>,
        user_id: UserId,
        organization_id: OrganizationId,
        module: &str,
        submodule: Option<&str>,
        action: &str,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            timestamp,
            user_id,
            organization_id: Some(organization_id),
            module: module.to_string(),
            submodule: submodule.map(str::to_string),
            action: action.to_string(),
            decision: AuditDecision::Granted,
            denial_kind: None,
            reason: reason.into(),
        }
    }

    pub fn denied(
        timestamp: DateTime<Utc>,
        user_id: UserId,
        organization_id: Option<OrganizationId>,
        module: &str,
        submodule: Option<&str>,
        action: &str,
        denial: &Denial,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            timestamp,
            user_id,
            organization_id,
            module: module.to_string(),
            submodule: submodule.map(str::to_string),
            action: action.to_string(),
            decision: AuditDecision::Denied,
            denial_kind: Some(denial.kind),
            reason: denial.reason.clone(),
        }
    }

    /// Same decision about the same request, ignoring id and timestamp.
    pub fn same_content(&self, other: &Self) -> bool {
        self.user_id == other.user_id
            && self.organization_id == other.organization_id
            && self.module == other.module
            && self.submodule == other.submodule
            && self.action == other.action
            && self.decision == other.decision
            && self.denial_kind == other.denial_kind
            && self.reason == other.reason
    }
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, entry: AuditLogEntry) -> Result<(), AuditError>;
}

#[async_trait]
impl<S> AuditSink for Arc<S>
where
    S: AuditSink + ?Sized,
{
    async fn append(&self, entry: AuditLogEntry) -> Result<(), AuditError> {
        (**self).append(entry).await
    }
}
