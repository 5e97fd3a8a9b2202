//! `gatekeep-auth`: pure authorization policy.
//!
//! Everything here is synchronous and free of IO: the caller supplies the rows
//! and the clock. Stores, caching and the enforcement gate live in
//! `gatekeep-infra`.

pub mod claims;
pub mod denial;
pub mod entitlements;
pub mod explain;
pub mod modules;
pub mod permissions;
pub mod resolve;
pub mod roles;

pub use claims::{
    Hs256JwtValidator, JwtClaims, JwtValidator, SessionIdentity, TokenValidationError,
    validate_claims,
};
pub use denial::{AuthorizedContext, Denial, DenialKind, PublicDenial};
pub use entitlements::{
    DisabledCause, EntitledBasis, Entitlement, EntitlementDecision, EntitlementStatus,
    evaluate_entitlement,
};
pub use explain::{AccessExplanation, ExplainInput, explain_access};
pub use modules::{CatalogError, ModuleCatalog, ModuleClassification, ModuleDefinition};
pub use permissions::{Permission, PermissionParseError};
pub use resolve::{MatchKind, PermissionDecision, PermissionMatch, PermissionSet, UserRoleGraph};
pub use roles::{DEFAULT_MAX_ROLE_DEPTH, Role, RoleForest, RoleGraphError};
