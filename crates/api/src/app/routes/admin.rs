//! Administrative routes.
//!
//! Every handler goes through [`AdminService`](gatekeep_infra::AdminService)
//! or the gate's diagnostics entry point, both of which authorize the caller
//! for the matching administrative permission first.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};

use gatekeep_auth::SessionIdentity;
use gatekeep_core::{RoleId, UserId};
use gatekeep_infra::{EntitlementRequest, RoleRequest};

use crate::app::dto::{AssignRoleRequest, AssignmentResponse, AuditQueryParams, ExplainQuery};
use crate::app::{errors, services::AppServices};

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

pub fn router() -> Router {
    Router::new()
        .route("/entitlements", get(list_entitlements).put(set_entitlement))
        .route("/roles", get(list_roles).post(create_role))
        .route("/roles/:id", put(update_role))
        .route("/users/:id/roles", post(assign_role))
        .route("/users/:id/roles/:role_id", delete(revoke_role))
        .route("/audit", get(query_audit))
        .route("/diagnostics/explain", get(explain))
}

// ─────────────────────────────────────────────────────────────────────────────
// Entitlements
// ─────────────────────────────────────────────────────────────────────────────

/// GET /admin/entitlements
pub async fn list_entitlements(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<SessionIdentity>,
) -> axum::response::Response {
    match services.admin.list_entitlements(&session).await {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => errors::admin_error_response(e),
    }
}

/// PUT /admin/entitlements - create or replace one entitlement row
pub async fn set_entitlement(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<SessionIdentity>,
    Json(body): Json<EntitlementRequest>,
) -> axum::response::Response {
    match services.admin.set_entitlement(&session, body).await {
        Ok(entitlement) => Json(entitlement).into_response(),
        Err(e) => errors::admin_error_response(e),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Roles
// ─────────────────────────────────────────────────────────────────────────────

/// GET /admin/roles
pub async fn list_roles(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<SessionIdentity>,
) -> axum::response::Response {
    match services.admin.list_roles(&session).await {
        Ok(roles) => Json(roles).into_response(),
        Err(e) => errors::admin_error_response(e),
    }
}

/// POST /admin/roles
pub async fn create_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<SessionIdentity>,
    Json(body): Json<RoleRequest>,
) -> axum::response::Response {
    match services.admin.create_role(&session, body).await {
        Ok(role) => (StatusCode::CREATED, Json(role)).into_response(),
        Err(e) => errors::admin_error_response(e),
    }
}

/// PUT /admin/roles/:id
pub async fn update_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<SessionIdentity>,
    Path(role_id): Path<RoleId>,
    Json(body): Json<RoleRequest>,
) -> axum::response::Response {
    match services.admin.update_role(&session, role_id, body).await {
        Ok(role) => Json(role).into_response(),
        Err(e) => errors::admin_error_response(e),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Assignments
// ─────────────────────────────────────────────────────────────────────────────

/// POST /admin/users/:id/roles
pub async fn assign_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<SessionIdentity>,
    Path(user_id): Path<UserId>,
    Json(body): Json<AssignRoleRequest>,
) -> axum::response::Response {
    match services.admin.assign_role(&session, user_id, body.role_id).await {
        Ok(changed) => Json(AssignmentResponse {
            user_id,
            role_id: body.role_id,
            changed,
        })
        .into_response(),
        Err(e) => errors::admin_error_response(e),
    }
}

/// DELETE /admin/users/:id/roles/:role_id
pub async fn revoke_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<SessionIdentity>,
    Path((user_id, role_id)): Path<(UserId, RoleId)>,
) -> axum::response::Response {
    match services.admin.revoke_role(&session, user_id, role_id).await {
        Ok(changed) => Json(AssignmentResponse {
            user_id,
            role_id,
            changed,
        })
        .into_response(),
        Err(e) => errors::admin_error_response(e),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Audit & diagnostics
// ─────────────────────────────────────────────────────────────────────────────

/// GET /admin/audit - paginated, newest first
pub async fn query_audit(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<SessionIdentity>,
    Query(params): Query<AuditQueryParams>,
) -> axum::response::Response {
    let (filter, pagination) = params.into_parts();
    match services.admin.query_audit(&session, filter, pagination).await {
        Ok(page) => Json(page).into_response(),
        Err(e) => errors::admin_error_response(e),
    }
}

/// GET /admin/diagnostics/explain
pub async fn explain(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<SessionIdentity>,
    Query(query): Query<ExplainQuery>,
) -> axum::response::Response {
    match services
        .gate
        .explain(
            &session,
            query.user_id,
            &query.module,
            &query.action,
            query.submodule.as_deref(),
        )
        .await
    {
        Ok(explanation) => Json(explanation).into_response(),
        Err(denial) => errors::denial_response(&denial),
    }
}
