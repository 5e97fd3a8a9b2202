//! Postgres-backed authorization store.
//!
//! Schema: `migrations/0001_authz.sql`.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (foreign key violation) | `23503` | `Conflict` |
//! | Database (other) | Any other | `Unavailable` |
//! | PoolClosed / Io / Timeout | N/A | `Unavailable` |
//! | Row decode failure | N/A | `Corrupt` |

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use gatekeep_auth::{Entitlement, EntitlementStatus, Permission, Role, UserRoleGraph};
use gatekeep_core::{OrganizationId, RoleId, UserId};

use super::{EntitlementStore, Organization, OrganizationDirectory, RoleStore, StoreError};

/// Hard stop for the recursive role query. Well above any configured depth
/// limit; the resolver enforces the real one and reports the overflow.
const ROLE_CHAIN_CAP: i32 = 64;

/// Postgres-backed organizations, entitlements, roles and assignments.
///
/// ## Tenant Isolation
///
/// Every query binds `organization_id`. The one exception is the parent walk
/// of the role CTE, which deliberately follows `parent_role_id` unfiltered so
/// the resolver can detect (and refuse) a role chain that crosses
/// organizations.
#[derive(Debug, Clone)]
pub struct PostgresAuthzStore {
    pool: Arc<PgPool>,
}

impl PostgresAuthzStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl OrganizationDirectory for PostgresAuthzStore {
    #[instrument(skip(self), fields(organization_id = %id), err)]
    async fn organization(&self, id: OrganizationId) -> Result<Option<Organization>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT organization_id, name, active
            FROM organizations
            WHERE organization_id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("organization", e))?;

        row.map(|row| {
            Ok(Organization {
                id: OrganizationId::from_uuid(row.try_get("organization_id").map_err(corrupt)?),
                name: row.try_get("name").map_err(corrupt)?,
                active: row.try_get("active").map_err(corrupt)?,
            })
        })
        .transpose()
    }
}

#[async_trait]
impl EntitlementStore for PostgresAuthzStore {
    #[instrument(skip(self), fields(organization_id = %organization_id), err)]
    async fn module_entitlements(
        &self,
        organization_id: OrganizationId,
        module: &str,
    ) -> Result<Vec<Entitlement>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT organization_id, module, submodule, status, expires_at
            FROM entitlements
            WHERE organization_id = $1 AND module = $2
            "#,
        )
        .bind(organization_id.as_uuid())
        .bind(module)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("module_entitlements", e))?;

        rows.iter().map(entitlement_from_row).collect()
    }

    #[instrument(
        skip(self, entitlement),
        fields(
            organization_id = %entitlement.organization_id,
            module = %entitlement.module,
            status = entitlement.status.as_str()
        ),
        err
    )]
    async fn upsert_entitlement(&self, entitlement: Entitlement) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO entitlements (organization_id, module, submodule, status, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (organization_id, module, submodule)
            DO UPDATE SET
                status = EXCLUDED.status,
                expires_at = EXCLUDED.expires_at,
                updated_at = NOW()
            "#,
        )
        .bind(entitlement.organization_id.as_uuid())
        .bind(&entitlement.module)
        .bind(entitlement.submodule.as_deref().unwrap_or(""))
        .bind(entitlement.status.as_str())
        .bind(entitlement.expires_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_entitlement", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(organization_id = %organization_id), err)]
    async fn list_entitlements(
        &self,
        organization_id: OrganizationId,
    ) -> Result<Vec<Entitlement>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT organization_id, module, submodule, status, expires_at
            FROM entitlements
            WHERE organization_id = $1
            ORDER BY module, submodule
            "#,
        )
        .bind(organization_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_entitlements", e))?;

        rows.iter().map(entitlement_from_row).collect()
    }
}

#[async_trait]
impl RoleStore for PostgresAuthzStore {
    #[instrument(
        skip(self),
        fields(organization_id = %organization_id, user_id = %user_id),
        err
    )]
    async fn user_role_graph(
        &self,
        organization_id: OrganizationId,
        user_id: UserId,
    ) -> Result<UserRoleGraph, StoreError> {
        let rows = sqlx::query(
            r#"
            WITH RECURSIVE chain AS (
                SELECT r.role_id, r.organization_id, r.name, r.parent_role_id, r.permissions,
                       TRUE AS assigned, 1 AS depth
                FROM user_roles ur
                JOIN roles r ON r.role_id = ur.role_id
                WHERE ur.organization_id = $1 AND ur.user_id = $2
              UNION ALL
                SELECT p.role_id, p.organization_id, p.name, p.parent_role_id, p.permissions,
                       FALSE AS assigned, c.depth + 1
                FROM chain c
                JOIN roles p ON p.role_id = c.parent_role_id
                WHERE c.depth < $3
            )
            SELECT role_id, organization_id, name, parent_role_id, permissions,
                   bool_or(assigned) AS assigned
            FROM chain
            GROUP BY role_id, organization_id, name, parent_role_id, permissions
            "#,
        )
        .bind(organization_id.as_uuid())
        .bind(user_id.as_uuid())
        .bind(ROLE_CHAIN_CAP)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("user_role_graph", e))?;

        let mut assigned = Vec::new();
        let mut roles = Vec::with_capacity(rows.len());
        let mut seen = HashSet::new();
        for row in &rows {
            let role = role_from_row(row)?;
            let is_assigned: bool = row.try_get("assigned").map_err(corrupt)?;
            if is_assigned {
                assigned.push(role.id);
            }
            if seen.insert(role.id) {
                roles.push(role);
            }
        }
        assigned.sort();

        Ok(UserRoleGraph { assigned, roles })
    }

    #[instrument(skip(self), fields(organization_id = %organization_id, role_id = %role_id), err)]
    async fn role(
        &self,
        organization_id: OrganizationId,
        role_id: RoleId,
    ) -> Result<Option<Role>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT role_id, organization_id, name, parent_role_id, permissions
            FROM roles
            WHERE organization_id = $1 AND role_id = $2
            "#,
        )
        .bind(organization_id.as_uuid())
        .bind(role_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("role", e))?;

        row.as_ref().map(role_from_row).transpose()
    }

    #[instrument(skip(self), fields(organization_id = %organization_id), err)]
    async fn list_roles(&self, organization_id: OrganizationId) -> Result<Vec<Role>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT role_id, organization_id, name, parent_role_id, permissions
            FROM roles
            WHERE organization_id = $1
            ORDER BY name
            "#,
        )
        .bind(organization_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_roles", e))?;

        rows.iter().map(role_from_row).collect()
    }

    #[instrument(
        skip(self, role),
        fields(organization_id = %role.organization_id, role_id = %role.id),
        err
    )]
    async fn save_role(&self, role: Role) -> Result<(), StoreError> {
        let permissions: Vec<String> = role.permissions.iter().map(|p| p.to_string()).collect();

        // The WHERE on the update arm keeps a role id from migrating between
        // organizations.
        let result = sqlx::query(
            r#"
            INSERT INTO roles (role_id, organization_id, name, parent_role_id, permissions)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (role_id)
            DO UPDATE SET
                name = EXCLUDED.name,
                parent_role_id = EXCLUDED.parent_role_id,
                permissions = EXCLUDED.permissions,
                updated_at = NOW()
            WHERE roles.organization_id = EXCLUDED.organization_id
            "#,
        )
        .bind(role.id.as_uuid())
        .bind(role.organization_id.as_uuid())
        .bind(&role.name)
        .bind(role.parent_role_id.map(Uuid::from))
        .bind(&permissions)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("save_role", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(
                "role id belongs to another organization".into(),
            ));
        }
        Ok(())
    }

    #[instrument(
        skip(self),
        fields(organization_id = %organization_id, user_id = %user_id, role_id = %role_id),
        err
    )]
    async fn assign_role(
        &self,
        organization_id: OrganizationId,
        user_id: UserId,
        role_id: RoleId,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO user_roles (organization_id, user_id, role_id)
            SELECT $1, $2, r.role_id
            FROM roles r
            WHERE r.role_id = $3 AND r.organization_id = $1
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(organization_id.as_uuid())
        .bind(user_id.as_uuid())
        .bind(role_id.as_uuid())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("assign_role", e))?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(
        skip(self),
        fields(organization_id = %organization_id, user_id = %user_id, role_id = %role_id),
        err
    )]
    async fn revoke_role(
        &self,
        organization_id: OrganizationId,
        user_id: UserId,
        role_id: RoleId,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM user_roles
            WHERE organization_id = $1 AND user_id = $2 AND role_id = $3
            "#,
        )
        .bind(organization_id.as_uuid())
        .bind(user_id.as_uuid())
        .bind(role_id.as_uuid())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("revoke_role", e))?;

        Ok(result.rows_affected() > 0)
    }
}

fn entitlement_from_row(row: &sqlx::postgres::PgRow) -> Result<Entitlement, StoreError> {
    let organization_id: Uuid = row.try_get("organization_id").map_err(corrupt)?;
    let submodule: String = row.try_get("submodule").map_err(corrupt)?;
    let status: String = row.try_get("status").map_err(corrupt)?;
    let expires_at: Option<DateTime<Utc>> = row.try_get("expires_at").map_err(corrupt)?;

    Ok(Entitlement {
        organization_id: OrganizationId::from_uuid(organization_id),
        module: row.try_get("module").map_err(corrupt)?,
        submodule: (!submodule.is_empty()).then_some(submodule),
        status: status
            .parse::<EntitlementStatus>()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?,
        expires_at,
    })
}

fn role_from_row(row: &sqlx::postgres::PgRow) -> Result<Role, StoreError> {
    let id: Uuid = row.try_get("role_id").map_err(corrupt)?;
    let organization_id: Uuid = row.try_get("organization_id").map_err(corrupt)?;
    let parent: Option<Uuid> = row.try_get("parent_role_id").map_err(corrupt)?;
    let raw: Vec<String> = row.try_get("permissions").map_err(corrupt)?;

    let permissions = raw
        .into_iter()
        .map(|p| Permission::parse(p).map_err(|e| StoreError::Corrupt(e.to_string())))
        .collect::<Result<BTreeSet<_>, _>>()?;

    Ok(Role {
        id: RoleId::from_uuid(id),
        organization_id: OrganizationId::from_uuid(organization_id),
        name: row.try_get("name").map_err(corrupt)?,
        parent_role_id: parent.map(RoleId::from_uuid),
        permissions,
    })
}

fn corrupt(err: sqlx::Error) -> StoreError {
    StoreError::Corrupt(format!("failed to decode row: {err}"))
}

pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") | Some("23503") => StoreError::Conflict(msg),
                _ => StoreError::Unavailable(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Unavailable(format!("connection pool closed in {operation}"))
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Corrupt(format!("decode error in {operation}: {err}"))
        }
        _ => StoreError::Unavailable(format!("sqlx error in {operation}: {err}")),
    }
}
