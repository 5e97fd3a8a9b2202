//! `gatekeep-infra`: the enforcement gate and everything it talks to.
//!
//! - [`store`]: organizations, entitlements, roles and assignments (in-memory, Postgres)
//! - [`cache`]: generation-stamped decision cache (no-op, in-memory, Redis)
//! - [`audit`]: append-only access log and its paginated query
//! - [`gate`]: tenant resolution, entitlement and permission evaluation, auditing
//! - [`admin`]: gated administrative writes with synchronous cache invalidation
//! - [`config`]: environment-driven tuning

pub mod admin;
pub mod audit;
pub mod cache;
pub mod config;
pub mod gate;
pub mod store;

pub use admin::{AdminError, AdminService, EntitlementRequest, RoleRequest};
pub use audit::{
    AuditDecision, AuditError, AuditFilter, AuditLogEntry, AuditPage, AuditQuery, AuditSink,
    InMemoryAuditLog, Pagination, PostgresAuditLog, TracingAuditSink,
};
pub use cache::{DecisionCache, InMemoryDecisionCache, NoopDecisionCache};
pub use config::{AuthzConfig, ConfigError};
pub use gate::{AccessSummary, Gate, ModuleAccess, TenantContext};
pub use store::{
    AuthzStores, EntitlementStore, InMemoryAuthzStore, Organization, OrganizationDirectory,
    PostgresAuthzStore, RoleStore, StoreError,
};
