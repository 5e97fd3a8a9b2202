//! Runtime configuration for the authorization core.

use std::time::Duration;

use thiserror::Error;

use gatekeep_auth::DEFAULT_MAX_ROLE_DEPTH;

// Upper bounds for environment overrides.
const MAX_CACHE_TTL_SECS: u64 = 24 * 60 * 60;
const MAX_CACHE_CAPACITY: u64 = 10_000_000;
const MAX_LOOKUP_TIMEOUT_MS: u64 = 60_000;
const MAX_ROLE_DEPTH: u64 = 256;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be a positive integer within its bound, got '{value}'")]
    Invalid { name: &'static str, value: String },
}

/// Tunables for the gate and its cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthzConfig {
    /// Upper bound on how long a cached decision lives.
    pub cache_ttl: Duration,
    /// Maximum number of entries an in-process cache keeps per key space.
    pub cache_capacity: usize,
    /// Budget for each individual store or cache lookup.
    pub lookup_timeout: Duration,
    /// Maximum length of a role's parent chain, root included.
    pub max_role_depth: usize,
}

impl Default for AuthzConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(60),
            cache_capacity: 10_000,
            lookup_timeout: Duration::from_millis(250),
            max_role_depth: DEFAULT_MAX_ROLE_DEPTH,
        }
    }
}

impl AuthzConfig {
    /// Read `GATEKEEP_*` variables, falling back to defaults for unset ones.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let read = |name: &'static str, default: u64, max: u64| -> Result<u64, ConfigError> {
            match lookup(name) {
                None => Ok(default),
                Some(raw) => match raw.trim().parse::<u64>() {
                    Ok(v) if v > 0 && v <= max => Ok(v),
                    _ => Err(ConfigError::Invalid { name, value: raw }),
                },
            }
        };

        Ok(Self {
            cache_ttl: Duration::from_secs(read(
                "GATEKEEP_CACHE_TTL_SECS",
                defaults.cache_ttl.as_secs(),
                MAX_CACHE_TTL_SECS,
            )?),
            cache_capacity: read(
                "GATEKEEP_CACHE_CAPACITY",
                defaults.cache_capacity as u64,
                MAX_CACHE_CAPACITY,
            )? as usize,
            lookup_timeout: Duration::from_millis(read(
                "GATEKEEP_LOOKUP_TIMEOUT_MS",
                defaults.lookup_timeout.as_millis() as u64,
                MAX_LOOKUP_TIMEOUT_MS,
            )?),
            max_role_depth: read(
                "GATEKEEP_MAX_ROLE_DEPTH",
                defaults.max_role_depth as u64,
                MAX_ROLE_DEPTH,
            )? as usize,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn unset_variables_use_defaults() {
        assert_eq!(AuthzConfig::from_lookup(lookup(&[])).unwrap(), AuthzConfig::default());
    }

    #[test]
    fn reads_overrides() {
        let cfg = AuthzConfig::from_lookup(lookup(&[
            ("GATEKEEP_CACHE_TTL_SECS", "5"),
            ("GATEKEEP_LOOKUP_TIMEOUT_MS", " 40 "),
            ("GATEKEEP_MAX_ROLE_DEPTH", "4"),
        ]))
        .unwrap();
        assert_eq!(cfg.cache_ttl, Duration::from_secs(5));
        assert_eq!(cfg.lookup_timeout, Duration::from_millis(40));
        assert_eq!(cfg.max_role_depth, 4);
        assert_eq!(cfg.cache_capacity, 10_000);
    }

    #[test]
    fn rejects_zero_and_garbage() {
        let err = AuthzConfig::from_lookup(lookup(&[("GATEKEEP_CACHE_CAPACITY", "0")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                name: "GATEKEEP_CACHE_CAPACITY",
                value: "0".into()
            }
        );
        assert!(AuthzConfig::from_lookup(lookup(&[("GATEKEEP_CACHE_TTL_SECS", "soon")])).is_err());
    }

    #[test]
    fn rejects_values_past_their_bound() {
        let err = AuthzConfig::from_lookup(lookup(&[(
            "GATEKEEP_CACHE_TTL_SECS",
            "18446744073709551615",
        )]))
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                name: "GATEKEEP_CACHE_TTL_SECS",
                ..
            }
        ));
        assert!(AuthzConfig::from_lookup(lookup(&[("GATEKEEP_LOOKUP_TIMEOUT_MS", "60001")])).is_err());
        assert!(AuthzConfig::from_lookup(lookup(&[("GATEKEEP_CACHE_TTL_SECS", "86400")])).is_ok());
    }
}
