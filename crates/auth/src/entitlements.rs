//! Entitlement evaluation.
//!
//! Pure: the caller supplies the stored rows and the evaluation instant. Trial
//! expiry is recomputed on every evaluation; nothing ever has to flip a stored
//! `trial` row to `disabled` for it to stop granting.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use gatekeep_core::{DomainError, DomainResult, OrganizationId};

use crate::modules::ModuleClassification;

/// Stored status of an entitlement row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntitlementStatus {
    Enabled,
    Trial,
    Disabled,
}

impl EntitlementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enabled => "enabled",
            Self::Trial => "trial",
            Self::Disabled => "disabled",
        }
    }
}

impl core::str::FromStr for EntitlementStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "enabled" => Ok(Self::Enabled),
            "trial" => Ok(Self::Trial),
            "disabled" => Ok(Self::Disabled),
            other => Err(DomainError::validation(format!(
                "unknown entitlement status '{other}'"
            ))),
        }
    }
}

/// One entitlement row: `(organization, module, submodule?) -> status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entitlement {
    pub organization_id: OrganizationId,
    pub module: String,
    pub submodule: Option<String>,
    pub status: EntitlementStatus,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Entitlement {
    /// Shape checks for an administrative write. Catalog checks happen elsewhere.
    pub fn validate(&self) -> DomainResult<()> {
        match (self.status, self.expires_at) {
            (EntitlementStatus::Trial, None) => Err(DomainError::validation(
                "trial entitlements require expires_at",
            )),
            (EntitlementStatus::Enabled | EntitlementStatus::Disabled, Some(_)) => Err(
                DomainError::validation("only trial entitlements carry expires_at"),
            ),
            _ => Ok(()),
        }
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == EntitlementStatus::Trial
            && self.expires_at.is_none_or(|expires_at| now >= expires_at)
    }
}

/// Why an organization is entitled without holding a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntitledBasis {
    AlwaysOn,
    RbacOnly,
    Record,
}

/// Why an entitlement evaluation came out negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisabledCause {
    NotProvisioned,
    Disabled,
    TrialExpired,
    SubmoduleNotProvisioned,
    SubmoduleDisabled,
    SubmoduleTrialExpired,
}

impl DisabledCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotProvisioned => "not provisioned",
            Self::Disabled => "disabled",
            Self::TrialExpired => "trial expired",
            Self::SubmoduleNotProvisioned => "submodule not provisioned",
            Self::SubmoduleDisabled => "submodule disabled",
            Self::SubmoduleTrialExpired => "submodule trial expired",
        }
    }

    /// True when no row exists at all (as opposed to a row that says no).
    pub fn is_missing_record(&self) -> bool {
        matches!(self, Self::NotProvisioned | Self::SubmoduleNotProvisioned)
    }
}

/// Outcome of evaluating one `(organization, module, submodule?)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EntitlementDecision {
    Enabled { basis: EntitledBasis },
    Trial { expires_at: DateTime<Utc> },
    Disabled { cause: DisabledCause },
}

impl EntitlementDecision {
    pub fn is_entitled(&self) -> bool {
        !matches!(self, Self::Disabled { .. })
    }

    pub fn trial_expires_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Trial { expires_at } => Some(*expires_at),
            _ => None,
        }
    }

    /// Status label used by the UI-filtering query: `enabled`, `trial`,
    /// `disabled` or `not_found` (no row at all).
    pub fn status_label(&self) -> &'static str {
        match self {
            Self::Enabled { .. } => "enabled",
            Self::Trial { .. } => "trial",
            Self::Disabled { cause } if cause.is_missing_record() => "not_found",
            Self::Disabled { .. } => "disabled",
        }
    }

    pub fn reason(&self) -> String {
        match self {
            Self::Enabled {
                basis: EntitledBasis::AlwaysOn,
            } => "module is always on".to_string(),
            Self::Enabled {
                basis: EntitledBasis::RbacOnly,
            } => "module is governed by permissions only".to_string(),
            Self::Enabled {
                basis: EntitledBasis::Record,
            } => "entitlement enabled".to_string(),
            Self::Trial { expires_at } => {
                format!("trial active until {}", expires_at.to_rfc3339())
            }
            Self::Disabled { cause } => cause.as_str().to_string(),
        }
    }

    /// Re-check a previously computed decision at `now`.
    ///
    /// A cached trial that has since expired turns into `TrialExpired`, so
    /// expiry stays exact even when the decision came out of a cache.
    pub fn at(self, now: DateTime<Utc>) -> Self {
        match self {
            Self::Trial { expires_at } if now >= expires_at => Self::Disabled {
                cause: DisabledCause::TrialExpired,
            },
            other => other,
        }
    }

    /// How long this decision may be cached, given the configured default.
    ///
    /// A trial decision never outlives its expiry. `None` means the decision
    /// must not be cached at all.
    pub fn cache_ttl(&self, now: DateTime<Utc>, default: Duration) -> Option<Duration> {
        match self {
            Self::Trial { expires_at } => {
                let remaining = *expires_at - now;
                if remaining <= Duration::zero() {
                    None
                } else {
                    Some(remaining.min(default))
                }
            }
            _ => Some(default),
        }
    }
}

/// Evaluate entitlement for a module and optional submodule.
///
/// `module_row` is the `(organization, module)` row, `submodule_row` the
/// `(organization, module, submodule)` row when a submodule was requested.
/// `submodule_requested` distinguishes "no submodule asked for" from "asked,
/// but no row".
pub fn evaluate_entitlement(
    classification: ModuleClassification,
    module_row: Option<&Entitlement>,
    submodule_requested: bool,
    submodule_row: Option<&Entitlement>,
    now: DateTime<Utc>,
) -> EntitlementDecision {
    match classification {
        ModuleClassification::AlwaysOn => {
            return EntitlementDecision::Enabled {
                basis: EntitledBasis::AlwaysOn,
            };
        }
        ModuleClassification::RbacOnly => {
            return EntitlementDecision::Enabled {
                basis: EntitledBasis::RbacOnly,
            };
        }
        ModuleClassification::Billable => {}
    }

    let module_expiry = match row_state(module_row, now) {
        RowState::Missing => return disabled(DisabledCause::NotProvisioned),
        RowState::Disabled => return disabled(DisabledCause::Disabled),
        RowState::Expired => return disabled(DisabledCause::TrialExpired),
        RowState::Enabled => None,
        RowState::Trial(expires_at) => Some(expires_at),
    };

    let submodule_expiry = if submodule_requested {
        match row_state(submodule_row, now) {
            RowState::Missing => return disabled(DisabledCause::SubmoduleNotProvisioned),
            RowState::Disabled => return disabled(DisabledCause::SubmoduleDisabled),
            RowState::Expired => return disabled(DisabledCause::SubmoduleTrialExpired),
            RowState::Enabled => None,
            RowState::Trial(expires_at) => Some(expires_at),
        }
    } else {
        None
    };

    // The effective trial ends at whichever expiry comes first.
    match (module_expiry, submodule_expiry) {
        (None, None) => EntitlementDecision::Enabled {
            basis: EntitledBasis::Record,
        },
        (Some(a), Some(b)) => EntitlementDecision::Trial {
            expires_at: a.min(b),
        },
        (Some(expires_at), None) | (None, Some(expires_at)) => {
            EntitlementDecision::Trial { expires_at }
        }
    }
}

enum RowState {
    Missing,
    Disabled,
    Expired,
    Enabled,
    Trial(DateTime<Utc>),
}

fn row_state(row: Option<&Entitlement>, now: DateTime<Utc>) -> RowState {
    let Some(row) = row else {
        return RowState::Missing;
    };
    match (row.status, row.expires_at) {
        (EntitlementStatus::Disabled, _) => RowState::Disabled,
        (EntitlementStatus::Enabled, _) => RowState::Enabled,
        (EntitlementStatus::Trial, Some(expires_at)) if !row.is_expired(now) => {
            RowState::Trial(expires_at)
        }
        // A trial without an expiry is malformed; fail closed.
        (EntitlementStatus::Trial, _) => RowState::Expired,
    }
}

fn disabled(cause: DisabledCause) -> EntitlementDecision {
    EntitlementDecision::Disabled { cause }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn row(status: EntitlementStatus, expires_at: Option<DateTime<Utc>>) -> Entitlement {
        Entitlement {
            organization_id: OrganizationId::new(),
            module: "sales".into(),
            submodule: None,
            status,
            expires_at,
        }
    }

    #[test]
    fn non_billable_modules_skip_the_lookup() {
        let d = evaluate_entitlement(ModuleClassification::AlwaysOn, None, false, None, now());
        assert_eq!(
            d,
            EntitlementDecision::Enabled {
                basis: EntitledBasis::AlwaysOn
            }
        );
        // Even an explicit disabled row does not matter for rbac-only modules.
        let disabled_row = row(EntitlementStatus::Disabled, None);
        let d = evaluate_entitlement(
            ModuleClassification::RbacOnly,
            Some(&disabled_row),
            false,
            None,
            now(),
        );
        assert!(d.is_entitled());
    }

    #[test]
    fn missing_row_is_not_provisioned() {
        let d = evaluate_entitlement(ModuleClassification::Billable, None, false, None, now());
        assert_eq!(
            d,
            EntitlementDecision::Disabled {
                cause: DisabledCause::NotProvisioned
            }
        );
        assert_eq!(d.status_label(), "not_found");
        assert_eq!(d.reason(), "not provisioned");
    }

    #[test]
    fn trial_expires_exactly_at_the_instant() {
        let trial = row(EntitlementStatus::Trial, Some(now()));
        let at = evaluate_entitlement(ModuleClassification::Billable, Some(&trial), false, None, now());
        assert_eq!(
            at,
            EntitlementDecision::Disabled {
                cause: DisabledCause::TrialExpired
            }
        );

        let before = now() - Duration::seconds(1);
        let still = evaluate_entitlement(ModuleClassification::Billable, Some(&trial), false, None, before);
        assert_eq!(still, EntitlementDecision::Trial { expires_at: now() });
    }

    #[test]
    fn submodules_fail_closed() {
        let module = row(EntitlementStatus::Enabled, None);
        let missing = evaluate_entitlement(ModuleClassification::Billable, Some(&module), true, None, now());
        assert_eq!(
            missing,
            EntitlementDecision::Disabled {
                cause: DisabledCause::SubmoduleNotProvisioned
            }
        );

        let sub_disabled = row(EntitlementStatus::Disabled, None);
        let d = evaluate_entitlement(
            ModuleClassification::Billable,
            Some(&module),
            true,
            Some(&sub_disabled),
            now(),
        );
        assert_eq!(d.status_label(), "disabled");
    }

    #[test]
    fn earliest_trial_expiry_wins() {
        let later = now() + Duration::days(10);
        let sooner = now() + Duration::days(2);
        let module = row(EntitlementStatus::Trial, Some(later));
        let sub = row(EntitlementStatus::Trial, Some(sooner));
        let d = evaluate_entitlement(ModuleClassification::Billable, Some(&module), true, Some(&sub), now());
        assert_eq!(d, EntitlementDecision::Trial { expires_at: sooner });
    }

    #[test]
    fn cache_ttl_is_clamped_to_trial_expiry() {
        let default = Duration::seconds(60);
        let soon = EntitlementDecision::Trial {
            expires_at: now() + Duration::seconds(5),
        };
        assert_eq!(soon.cache_ttl(now(), default), Some(Duration::seconds(5)));

        let far = EntitlementDecision::Trial {
            expires_at: now() + Duration::days(1),
        };
        assert_eq!(far.cache_ttl(now(), default), Some(default));

        let past = EntitlementDecision::Trial {
            expires_at: now() - Duration::seconds(1),
        };
        assert_eq!(past.cache_ttl(now(), default), None);
    }

    #[test]
    fn cached_trial_is_rechecked_against_the_clock() {
        let trial = EntitlementDecision::Trial { expires_at: now() };
        assert_eq!(trial.at(now() - Duration::seconds(1)), trial);
        assert_eq!(
            trial.at(now()),
            EntitlementDecision::Disabled {
                cause: DisabledCause::TrialExpired
            }
        );
    }

    #[test]
    fn write_validation_ties_expiry_to_trial() {
        assert!(row(EntitlementStatus::Trial, None).validate().is_err());
        assert!(row(EntitlementStatus::Enabled, Some(now())).validate().is_err());
        assert!(row(EntitlementStatus::Trial, Some(now())).validate().is_ok());
        assert!(row(EntitlementStatus::Disabled, None).validate().is_ok());
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, ..ProptestConfig::default() })]

        /// A trial grants iff the evaluation instant is strictly before expiry.
        #[test]
        fn trial_grants_only_before_expiry(offset_secs in -86_400i64..86_400i64) {
            let expires_at = now();
            let at = now() + Duration::seconds(offset_secs);
            let trial = row(EntitlementStatus::Trial, Some(expires_at));
            let d = evaluate_entitlement(ModuleClassification::Billable, Some(&trial), false, None, at);
            prop_assert_eq!(d.is_entitled(), at < expires_at);
        }

        /// A cached trial decision never survives past its expiry.
        #[test]
        fn cached_trial_never_outlives_expiry(
            remaining in 1i64..10_000i64,
            default in 1i64..10_000i64,
        ) {
            let decision = EntitlementDecision::Trial { expires_at: now() + Duration::seconds(remaining) };
            let ttl = decision.cache_ttl(now(), Duration::seconds(default)).unwrap();
            prop_assert!(now() + ttl <= now() + Duration::seconds(remaining));
        }
    }
}
