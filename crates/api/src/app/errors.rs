use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use gatekeep_auth::{Denial, PublicDenial};
use gatekeep_infra::AdminError;

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

/// The response for anything the caller may not learn exists.
pub fn not_found() -> axum::response::Response {
    json_error(StatusCode::NOT_FOUND, "not_found", "not found")
}

/// Entitlement, permission and evaluation denials all render as the same
/// 404. The reason only goes to the log.
pub fn denial_response(denial: &Denial) -> axum::response::Response {
    tracing::debug!(kind = %denial.kind, reason = %denial.reason, "request denied");
    match denial.public() {
        PublicDenial::BadRequest => json_error(
            StatusCode::BAD_REQUEST,
            "tenant_context_missing",
            "no organization could be resolved for this session",
        ),
        PublicDenial::NotFound => not_found(),
    }
}

pub fn admin_error_response(err: AdminError) -> axum::response::Response {
    match err {
        AdminError::Denied(denial) => denial_response(&denial),
        AdminError::Validation(e) => json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string()),
        AdminError::RoleGraph(e) => json_error(StatusCode::UNPROCESSABLE_ENTITY, "invalid_role", e.to_string()),
        AdminError::Escalation(msg) => json_error(StatusCode::FORBIDDEN, "privilege_escalation", msg),
        AdminError::NotFound(_) => not_found(),
        AdminError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        AdminError::Store(e) => {
            tracing::error!(error = %e, "admin store write failed");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", "store error")
        }
        AdminError::Invalidation(e) => {
            tracing::error!(error = %e, "write applied but cache invalidation failed");
            json_error(
                StatusCode::SERVICE_UNAVAILABLE,
                "invalidation_failed",
                "change stored but not yet effective; retry",
            )
        }
        AdminError::Audit(e) => {
            tracing::error!(error = %e, "audit query failed");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "audit_error", "audit log unavailable")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatekeep_auth::DenialKind;

    #[test]
    fn hidden_denials_share_one_status() {
        for kind in [
            DenialKind::EntitlementDenied,
            DenialKind::PermissionDenied,
            DenialKind::EvaluationError,
        ] {
            let response = denial_response(&Denial::new(kind, "secret reason"));
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
        }

        let response = denial_response(&Denial::tenant_context_missing("no org"));
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn missing_role_is_plain_not_found() {
        let response = admin_error_response(AdminError::NotFound("role x".into()));
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
