//! Postgres-backed audit log (`audit_log` table, append-only).
//!
//! ## Error Mapping
//!
//! | SQLx Error | AuditError |
//! |------------|------------|
//! | Database / PoolClosed / Io / Timeout | `Unavailable` |
//! | Row decode failure | `Corrupt` |

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use gatekeep_core::{OrganizationId, UserId};

use super::{
    AuditDecision, AuditError, AuditFilter, AuditLogEntry, AuditPage, AuditQuery, AuditSink,
    Pagination,
};

#[derive(Debug, Clone)]
pub struct PostgresAuditLog {
    pool: Arc<PgPool>,
}

impl PostgresAuditLog {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl AuditSink for PostgresAuditLog {
    #[instrument(skip(self, entry), fields(entry_id = %entry.id), err)]
    async fn append(&self, entry: AuditLogEntry) -> Result<(), AuditError> {
        sqlx::query(
            r#"
            INSERT INTO audit_log (
                entry_id, occurred_at, user_id, organization_id, module,
                submodule, action, decision, denial_kind, reason
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(entry.id)
        .bind(entry.timestamp)
        .bind(entry.user_id.as_uuid())
        .bind(entry.organization_id.map(|o| *o.as_uuid()))
        .bind(&entry.module)
        .bind(entry.submodule.as_deref())
        .bind(&entry.action)
        .bind(entry.decision.as_str())
        .bind(entry.denial_kind.map(|k| k.as_str()))
        .bind(&entry.reason)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("append_audit", e))?;
        Ok(())
    }
}

#[async_trait]
impl AuditQuery for PostgresAuditLog {
    #[instrument(skip(self, filter), fields(organization_id = %organization_id), err)]
    async fn query(
        &self,
        organization_id: OrganizationId,
        filter: AuditFilter,
        pagination: Pagination,
    ) -> Result<AuditPage, AuditError> {
        let user_param: Option<Uuid> = filter.user_id.map(|u| *u.as_uuid());
        let module_param: Option<&str> = filter.module.as_deref();
        let decision_param: Option<&str> = filter.decision.map(|d| d.as_str());

        let count_row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total
            FROM audit_log
            WHERE organization_id = $1
                AND ($2::uuid IS NULL OR user_id = $2)
                AND ($3::text IS NULL OR module = $3)
                AND ($4::text IS NULL OR decision = $4)
                AND ($5::timestamptz IS NULL OR occurred_at >= $5)
                AND ($6::timestamptz IS NULL OR occurred_at <= $6)
            "#,
        )
        .bind(organization_id.as_uuid())
        .bind(user_param)
        .bind(module_param)
        .bind(decision_param)
        .bind(filter.from)
        .bind(filter.to)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("count_audit", e))?;

        let total: i64 = count_row.try_get("total").map_err(corrupt)?;

        let rows = sqlx::query(
            r#"
            SELECT
                entry_id, occurred_at, user_id, organization_id, module,
                submodule, action, decision, denial_kind, reason
            FROM audit_log
            WHERE organization_id = $1
                AND ($2::uuid IS NULL OR user_id = $2)
                AND ($3::text IS NULL OR module = $3)
                AND ($4::text IS NULL OR decision = $4)
                AND ($5::timestamptz IS NULL OR occurred_at >= $5)
                AND ($6::timestamptz IS NULL OR occurred_at <= $6)
            ORDER BY occurred_at DESC, entry_id DESC
            LIMIT $7 OFFSET $8
            "#,
        )
        .bind(organization_id.as_uuid())
        .bind(user_param)
        .bind(module_param)
        .bind(decision_param)
        .bind(filter.from)
        .bind(filter.to)
        .bind(i64::from(pagination.limit))
        .bind(i64::from(pagination.offset))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("query_audit", e))?;

        let entries = rows
            .iter()
            .map(entry_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        let total = total.max(0) as u64;

        Ok(AuditPage {
            entries,
            total,
            has_more: pagination.has_more(total),
            pagination,
        })
    }
}

fn entry_from_row(row: &sqlx::postgres::PgRow) -> Result<AuditLogEntry, AuditError> {
    let organization_id: Option<Uuid> = row.try_get("organization_id").map_err(corrupt)?;
    let decision: String = row.try_get("decision").map_err(corrupt)?;
    let denial_kind: Option<String> = row.try_get("denial_kind").map_err(corrupt)?;

    Ok(AuditLogEntry {
        id: row.try_get("entry_id").map_err(corrupt)?,
        timestamp: row.try_get("occurred_at").map_err(corrupt)?,
        user_id: UserId::from_uuid(row.try_get("user_id").map_err(corrupt)?),
        organization_id: organization_id.map(OrganizationId::from_uuid),
        module: row.try_get("module").map_err(corrupt)?,
        submodule: row.try_get("submodule").map_err(corrupt)?,
        action: row.try_get("action").map_err(corrupt)?,
        decision: decision
            .parse::<AuditDecision>()
            .map_err(|e| AuditError::Corrupt(e.to_string()))?,
        denial_kind: denial_kind
            .map(|k| k.parse())
            .transpose()
            .map_err(|e: gatekeep_core::DomainError| AuditError::Corrupt(e.to_string()))?,
        reason: row.try_get("reason").map_err(corrupt)?,
    })
}

fn corrupt(err: sqlx::Error) -> AuditError {
    AuditError::Corrupt(format!("failed to decode row: {err}"))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> AuditError {
    match err {
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            AuditError::Corrupt(format!("decode error in {operation}: {err}"))
        }
        _ => AuditError::Unavailable(format!("sqlx error in {operation}: {err}")),
    }
}
