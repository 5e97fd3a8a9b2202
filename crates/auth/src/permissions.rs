use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Segment used for both the module wildcard (`module.*`) and the catch-all (`*.*`).
pub const WILDCARD: &str = "*";

/// Permission string granted to roles.
///
/// Three shapes are accepted, and nothing else:
/// - `module.action` (the action may itself be dotted, e.g. `rbac.roles.manage`)
/// - `module.*` grants every action of one module
/// - `*.*` is the explicit catch-all a super-administrator role carries
///
/// The string is validated on construction, so a `Permission` in hand is always
/// one of those shapes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Permission(Cow<'static, str>);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PermissionParseError {
    #[error("permission '{0}' must have the form module.action")]
    MissingAction(String),

    #[error("permission '{0}' contains an empty segment")]
    EmptySegment(String),

    #[error("permission '{0}' contains invalid character '{1}'")]
    InvalidCharacter(String, char),

    #[error("permission '{0}': a wildcard module is only allowed as '*.*'")]
    MisplacedWildcard(String),
}

impl Permission {
    pub fn parse(raw: impl Into<Cow<'static, str>>) -> Result<Self, PermissionParseError> {
        let raw = raw.into();
        validate(&raw)?;
        Ok(Self(raw))
    }

    /// `module.action` for a concrete request. Both halves are validated.
    pub fn exact(module: &str, action: &str) -> Result<Self, PermissionParseError> {
        let candidate = format!("{module}.{action}");
        if action == WILDCARD || module == WILDCARD {
            return Err(PermissionParseError::MisplacedWildcard(candidate));
        }
        Self::parse(candidate)
    }

    pub fn module_wildcard(module: &str) -> Result<Self, PermissionParseError> {
        if module == WILDCARD {
            return Ok(Self::catch_all());
        }
        Self::parse(format!("{module}.{WILDCARD}"))
    }

    pub fn catch_all() -> Self {
        Self(Cow::Borrowed("*.*"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn module(&self) -> &str {
        self.split().0
    }

    pub fn action(&self) -> &str {
        self.split().1
    }

    pub fn is_module_wildcard(&self) -> bool {
        self.action() == WILDCARD && self.module() != WILDCARD
    }

    pub fn is_catch_all(&self) -> bool {
        self.module() == WILDCARD
    }

    fn split(&self) -> (&str, &str) {
        // Validated on construction: there is always a '.'.
        self.0.split_once('.').unwrap_or((&self.0, ""))
    }
}

fn validate(raw: &str) -> Result<(), PermissionParseError> {
    let Some((module, action)) = raw.split_once('.') else {
        return Err(PermissionParseError::MissingAction(raw.to_string()));
    };

    if module == WILDCARD {
        return if action == WILDCARD {
            Ok(())
        } else {
            Err(PermissionParseError::MisplacedWildcard(raw.to_string()))
        };
    }

    validate_key(module).map_err(|e| e.with_input(raw))?;

    if action == WILDCARD {
        return Ok(());
    }
    for segment in action.split('.') {
        validate_key(segment).map_err(|e| e.with_input(raw))?;
    }
    Ok(())
}

/// Validate a single identifier segment: non-empty, `[a-z0-9_-]`.
///
/// Shared with the module catalog so module keys and permission segments can
/// never drift apart.
pub fn validate_key(segment: &str) -> Result<(), PermissionParseError> {
    if segment.is_empty() {
        return Err(PermissionParseError::EmptySegment(segment.to_string()));
    }
    if let Some(c) = segment
        .chars()
        .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_' || *c == '-'))
    {
        return Err(PermissionParseError::InvalidCharacter(segment.to_string(), c));
    }
    Ok(())
}

/// Validate an action name supplied by a caller of the gate (never a wildcard).
pub fn validate_action(action: &str) -> Result<(), PermissionParseError> {
    if action == WILDCARD {
        return Err(PermissionParseError::MisplacedWildcard(action.to_string()));
    }
    for segment in action.split('.') {
        validate_key(segment).map_err(|e| e.with_input(action))?;
    }
    Ok(())
}

impl PermissionParseError {
    fn with_input(self, raw: &str) -> Self {
        match self {
            Self::EmptySegment(_) => Self::EmptySegment(raw.to_string()),
            Self::InvalidCharacter(_, c) => Self::InvalidCharacter(raw.to_string(), c),
            other => other,
        }
    }
}

impl TryFrom<String> for Permission {
    type Error = PermissionParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<Permission> for String {
    fn from(value: Permission) -> Self {
        value.0.into_owned()
    }
}

impl core::str::FromStr for Permission {
    type Err = PermissionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s.trim().to_string())
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Permissions the administrative surfaces of the core itself require.
pub mod admin {
    use super::Permission;
    use std::borrow::Cow;

    const fn p(s: &'static str) -> Permission {
        Permission(Cow::Borrowed(s))
    }

    pub const ENTITLEMENTS_READ: Permission = p("subscriptions.read");
    pub const ENTITLEMENTS_MANAGE: Permission = p("subscriptions.manage");
    pub const ROLES_READ: Permission = p("rbac.roles.read");
    pub const ROLES_MANAGE: Permission = p("rbac.roles.manage");
    pub const ASSIGNMENTS_MANAGE: Permission = p("rbac.assignments.manage");
    pub const AUDIT_READ: Permission = p("audit.read");
    pub const DIAGNOSTICS_EXPLAIN: Permission = p("diagnostics.explain");
    pub const CROSS_ORGANIZATION: Permission = p("tenancy.cross_org");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_the_three_shapes() {
        let exact = Permission::parse("manufacturing.read").unwrap();
        assert_eq!(exact.module(), "manufacturing");
        assert_eq!(exact.action(), "read");
        assert!(!exact.is_module_wildcard());

        let wildcard = Permission::parse("sales.*").unwrap();
        assert!(wildcard.is_module_wildcard());
        assert!(!wildcard.is_catch_all());

        let all = Permission::parse("*.*").unwrap();
        assert!(all.is_catch_all());
        assert!(!all.is_module_wildcard());
    }

    #[test]
    fn dotted_actions_keep_the_first_segment_as_module() {
        let p = Permission::parse("rbac.roles.manage").unwrap();
        assert_eq!(p.module(), "rbac");
        assert_eq!(p.action(), "roles.manage");
    }

    #[test]
    fn rejects_bare_and_malformed_strings() {
        assert!(matches!(
            Permission::parse("*"),
            Err(PermissionParseError::MissingAction(_))
        ));
        assert!(matches!(
            Permission::parse("*.read"),
            Err(PermissionParseError::MisplacedWildcard(_))
        ));
        assert!(matches!(
            Permission::parse("sales."),
            Err(PermissionParseError::EmptySegment(_))
        ));
        assert!(matches!(
            Permission::parse("Sales.read"),
            Err(PermissionParseError::InvalidCharacter(_, 'S'))
        ));
        assert!(Permission::parse("sales.re ad").is_err());
    }

    #[test]
    fn exact_refuses_wildcards() {
        assert!(Permission::exact("sales", "*").is_err());
        assert!(Permission::exact("*", "read").is_err());
        assert_eq!(Permission::exact("sales", "read").unwrap().as_str(), "sales.read");
    }

    #[test]
    fn admin_constants_are_valid_permissions() {
        for p in [
            admin::ENTITLEMENTS_READ,
            admin::ENTITLEMENTS_MANAGE,
            admin::ROLES_READ,
            admin::ROLES_MANAGE,
            admin::ASSIGNMENTS_MANAGE,
            admin::AUDIT_READ,
            admin::DIAGNOSTICS_EXPLAIN,
            admin::CROSS_ORGANIZATION,
        ] {
            assert_eq!(Permission::parse(p.as_str().to_string()).unwrap(), p);
        }
    }

    #[test]
    fn serde_rejects_invalid_strings() {
        let ok: Permission = serde_json::from_str("\"sales.read\"").unwrap();
        assert_eq!(ok.as_str(), "sales.read");
        assert!(serde_json::from_str::<Permission>("\"sales\"").is_err());
    }
}
