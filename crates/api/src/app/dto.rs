use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gatekeep_core::{RoleId, UserId};
use gatekeep_infra::{AuditDecision, AuditFilter, Pagination};

#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    pub module: String,
    pub action: String,
    #[serde(default)]
    pub submodule: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ExplainQuery {
    pub user_id: UserId,
    pub module: String,
    pub action: String,
    #[serde(default)]
    pub submodule: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AuditQueryParams {
    pub user_id: Option<UserId>,
    pub module: Option<String>,
    pub decision: Option<AuditDecision>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl AuditQueryParams {
    pub fn into_parts(self) -> (AuditFilter, Pagination) {
        let pagination = Pagination::new(self.limit, self.offset);
        let filter = AuditFilter {
            user_id: self.user_id,
            module: self.module,
            decision: self.decision,
            from: self.from,
            to: self.to,
        };
        (filter, pagination)
    }
}

#[derive(Debug, Deserialize)]
pub struct AssignRoleRequest {
    pub role_id: RoleId,
}

#[derive(Debug, Serialize)]
pub struct AssignmentResponse {
    pub user_id: UserId,
    pub role_id: RoleId,
    pub changed: bool,
}
