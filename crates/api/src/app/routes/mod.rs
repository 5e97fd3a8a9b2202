use axum::{
    routing::{get, post},
    Router,
};

pub mod admin;
pub mod system;

/// Router for all authenticated endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .route("/access", get(system::access))
        .route("/authz/check", post(system::check))
        .nest("/admin", admin::router())
}
