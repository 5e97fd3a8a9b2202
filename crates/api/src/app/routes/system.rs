use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};

use gatekeep_auth::SessionIdentity;

use crate::app::{dto::CheckRequest, errors, services::AppServices};

pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// The identity the bearer token claims. Nothing here is checked against
/// the organization directory.
pub async fn whoami(Extension(session): Extension<SessionIdentity>) -> impl IntoResponse {
    Json(serde_json::json!({
        "user_id": session.user_id.to_string(),
        "organization_id": session.organization_id.map(|o| o.to_string()),
        "act_as_organization_id": session.override_organization_id.map(|o| o.to_string()),
    }))
}

/// GET /access - modules and permissions for UI filtering
pub async fn access(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<SessionIdentity>,
) -> axum::response::Response {
    match services.gate.access_summary(&session).await {
        Ok(summary) => Json(summary).into_response(),
        Err(denial) => errors::denial_response(&denial),
    }
}

/// POST /authz/check - enforce probe for host services
pub async fn check(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<SessionIdentity>,
    Json(body): Json<CheckRequest>,
) -> axum::response::Response {
    match services
        .gate
        .enforce(&session, &body.module, &body.action, body.submodule.as_deref())
        .await
    {
        Ok(context) => Json(context).into_response(),
        Err(denial) => errors::denial_response(&denial),
    }
}
