use serde::{Deserialize, Serialize};
use thiserror::Error;

use gatekeep_core::{DomainError, OrganizationId, UserId};

/// Which step of the gate refused the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialKind {
    /// No organization could be resolved for the session.
    TenantContextMissing,
    /// The organization is not entitled to the module or submodule.
    EntitlementDenied,
    /// The user holds no permission covering the action.
    PermissionDenied,
    /// A lookup failed or timed out; the gate failed closed.
    EvaluationError,
}

impl DenialKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TenantContextMissing => "tenant_context_missing",
            Self::EntitlementDenied => "entitlement_denied",
            Self::PermissionDenied => "permission_denied",
            Self::EvaluationError => "evaluation_error",
        }
    }

    /// The only shape an external caller may see for this kind.
    pub fn public(&self) -> PublicDenial {
        match self {
            Self::TenantContextMissing => PublicDenial::BadRequest,
            Self::EntitlementDenied | Self::PermissionDenied | Self::EvaluationError => {
                PublicDenial::NotFound
            }
        }
    }
}

impl core::fmt::Display for DenialKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for DenialKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tenant_context_missing" => Ok(Self::TenantContextMissing),
            "entitlement_denied" => Ok(Self::EntitlementDenied),
            "permission_denied" => Ok(Self::PermissionDenied),
            "evaluation_error" => Ok(Self::EvaluationError),
            other => Err(DomainError::validation(format!("unknown denial kind '{other}'"))),
        }
    }
}

/// Structured refusal returned by the gate.
///
/// `reason` is for logs, audit and the separately permissioned diagnostics
/// view. It must never be rendered to the caller as-is.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {reason}")]
pub struct Denial {
    pub kind: DenialKind,
    pub reason: String,
}

impl Denial {
    pub fn new(kind: DenialKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }

    pub fn tenant_context_missing(reason: impl Into<String>) -> Self {
        Self::new(DenialKind::TenantContextMissing, reason)
    }

    pub fn entitlement_denied(module: &str, reason: impl AsRef<str>) -> Self {
        Self::new(
            DenialKind::EntitlementDenied,
            format!("{module}: {}", reason.as_ref()),
        )
    }

    pub fn permission_denied(module: &str, action: &str) -> Self {
        Self::new(
            DenialKind::PermissionDenied,
            format!("{module}.{action}: no matching permission"),
        )
    }

    pub fn evaluation_error(reason: impl Into<String>) -> Self {
        Self::new(DenialKind::EvaluationError, reason)
    }

    pub fn public(&self) -> PublicDenial {
        self.kind.public()
    }
}

/// Externally visible denial shape.
///
/// Entitlement, permission and evaluation failures all collapse into
/// `NotFound`, the same answer a nonexistent resource gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublicDenial {
    NotFound,
    BadRequest,
}

/// What the gate hands to business code on success. Every data access the
/// caller performs afterwards is scoped by `organization_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuthorizedContext {
    pub user_id: UserId,
    pub organization_id: OrganizationId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_missing_tenant_context_is_distinguishable() {
        assert_eq!(DenialKind::TenantContextMissing.public(), PublicDenial::BadRequest);
        for kind in [
            DenialKind::EntitlementDenied,
            DenialKind::PermissionDenied,
            DenialKind::EvaluationError,
        ] {
            assert_eq!(kind.public(), PublicDenial::NotFound);
        }
    }

    #[test]
    fn reasons_name_the_failing_subject() {
        let d = Denial::permission_denied("manufacturing", "delete");
        assert_eq!(d.kind, DenialKind::PermissionDenied);
        assert_eq!(d.reason, "manufacturing.delete: no matching permission");

        let e = Denial::entitlement_denied("sales", "trial expired");
        assert_eq!(e.to_string(), "entitlement_denied: sales: trial expired");
    }
}
