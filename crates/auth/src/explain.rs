//! Administrative explanation of an access decision.
//!
//! This is the richer view the anti-enumeration policy keeps away from
//! ordinary callers: it names the failing layer, the precise entitlement cause
//! (disabled vs. not provisioned vs. trial expired) and the permissions that
//! were considered. Serving it is itself a permissioned operation.

use chrono::{DateTime, Utc};
use serde::Serialize;

use gatekeep_core::{OrganizationId, UserId};

use crate::denial::DenialKind;
use crate::entitlements::EntitlementDecision;
use crate::modules::ModuleClassification;
use crate::resolve::{PermissionMatch, PermissionSet};

/// Detailed explanation of an authorization decision.
#[derive(Debug, Clone, Serialize)]
pub struct AccessExplanation {
    pub organization_id: OrganizationId,
    pub user_id: UserId,
    pub module: String,
    pub action: String,
    pub submodule: Option<String>,

    /// Whether the gate would let the request through.
    pub granted: bool,

    /// Human-readable reason for the decision.
    pub reason: String,

    /// Failing layer, if any.
    pub denial_kind: Option<DenialKind>,

    pub entitlement: EntitlementState,
    pub permissions: PermissionState,

    /// Hints for support staff when the request is denied.
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntitlementState {
    pub classification: ModuleClassification,
    pub status: &'static str,
    pub reason: String,
    pub trial_expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PermissionState {
    pub roles: Vec<String>,
    pub effective_permissions: Vec<String>,
    pub has_catch_all: bool,
    pub matched: Option<PermissionMatch>,
}

/// Inputs to [`explain_access`], already evaluated by the caller.
pub struct ExplainInput<'a> {
    pub organization_id: OrganizationId,
    pub user_id: UserId,
    pub module: &'a str,
    pub action: &'a str,
    pub submodule: Option<&'a str>,
    pub classification: ModuleClassification,
    pub entitlement: EntitlementDecision,
    pub permissions: &'a PermissionSet,
}

/// Explain what the gate would decide for these inputs, layer by layer.
///
/// Both layers are reported even when the first one already denies, so an
/// administrator sees everything that would have to change.
pub fn explain_access(input: ExplainInput<'_>) -> AccessExplanation {
    let matched = input.permissions.check(input.module, input.action);
    let required = format!("{}.{}", input.module, input.action);

    let entitlement = EntitlementState {
        classification: input.classification,
        status: input.entitlement.status_label(),
        reason: input.entitlement.reason(),
        trial_expires_at: input.entitlement.trial_expires_at(),
    };

    let permissions = PermissionState {
        roles: input.permissions.role_names().map(str::to_string).collect(),
        effective_permissions: input.permissions.iter().map(|p| p.to_string()).collect(),
        has_catch_all: input.permissions.has_catch_all(),
        matched: matched.clone(),
    };

    let mut suggestions = Vec::new();
    let (granted, denial_kind, reason) = if !input.entitlement.is_entitled() {
        suggestions.push(format!(
            "Provision or re-enable the '{}' entitlement for this organization",
            input.submodule
                .map(|s| format!("{}/{}", input.module, s))
                .unwrap_or_else(|| input.module.to_string())
        ));
        if matched.is_none() {
            suggestions.push(format!("Assign a role that grants '{required}'"));
        }
        (
            false,
            Some(DenialKind::EntitlementDenied),
            format!("entitlement: {}", entitlement.reason),
        )
    } else if let Some(m) = &matched {
        (true, None, format!("granted by '{}'", m.granted_by))
    } else {
        suggestions.push(format!("Assign a role that grants '{required}'"));
        suggestions.push(format!(
            "Or grant '{}.*' to a role the user already holds",
            input.module
        ));
        (
            false,
            Some(DenialKind::PermissionDenied),
            format!("no permission matches '{required}'"),
        )
    };

    AccessExplanation {
        organization_id: input.organization_id,
        user_id: input.user_id,
        module: input.module.to_string(),
        action: input.action.to_string(),
        submodule: input.submodule.map(str::to_string),
        granted,
        reason,
        denial_kind,
        entitlement,
        permissions,
        suggestions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Permission;
    use crate::entitlements::{DisabledCause, EntitledBasis};

    fn input<'a>(
        entitlement: EntitlementDecision,
        permissions: &'a PermissionSet,
        action: &'a str,
    ) -> ExplainInput<'a> {
        ExplainInput {
            organization_id: OrganizationId::new(),
            user_id: UserId::new(),
            module: "sales",
            action,
            submodule: None,
            classification: ModuleClassification::Billable,
            entitlement,
            permissions,
        }
    }

    #[test]
    fn entitlement_failure_is_reported_first_with_precise_cause() {
        let perms = PermissionSet::from_permissions([Permission::parse("sales.*").unwrap()]);
        let e = explain_access(input(
            EntitlementDecision::Disabled {
                cause: DisabledCause::TrialExpired,
            },
            &perms,
            "read",
        ));
        assert!(!e.granted);
        assert_eq!(e.denial_kind, Some(DenialKind::EntitlementDenied));
        assert_eq!(e.entitlement.status, "disabled");
        assert_eq!(e.reason, "entitlement: trial expired");
        // The permission layer is still shown.
        assert!(e.permissions.matched.is_some());
    }

    #[test]
    fn permission_failure_suggests_grants() {
        let perms = PermissionSet::default();
        let e = explain_access(input(
            EntitlementDecision::Enabled {
                basis: EntitledBasis::Record,
            },
            &perms,
            "void",
        ));
        assert_eq!(e.denial_kind, Some(DenialKind::PermissionDenied));
        assert!(e.suggestions.iter().any(|s| s.contains("sales.void")));
    }

    #[test]
    fn grant_names_the_matching_permission() {
        let perms = PermissionSet::from_permissions([Permission::parse("*.*").unwrap()]);
        let e = explain_access(input(
            EntitlementDecision::Enabled {
                basis: EntitledBasis::Record,
            },
            &perms,
            "read",
        ));
        assert!(e.granted);
        assert!(e.permissions.has_catch_all);
        assert_eq!(e.reason, "granted by '*.*'");
        assert!(e.suggestions.is_empty());
    }
}
