//! Module catalog: which product modules exist and how each one is gated.
//!
//! The catalog is static configuration validated once at startup. Every
//! enforcement call resolves its module (and optional submodule) here first; an
//! unknown key is a caller bug and surfaces as an evaluation error, never as a
//! silent allow.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::permissions::{PermissionParseError, validate_key};

/// How access to a module is gated before RBAC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleClassification {
    /// Needs an entitlement record (enabled or unexpired trial).
    Billable,
    /// Entitled for every organization; RBAC still applies.
    AlwaysOn,
    /// Administrative surface: entitlement is implied, permissions decide.
    RbacOnly,
}

impl ModuleClassification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Billable => "billable",
            Self::AlwaysOn => "always_on",
            Self::RbacOnly => "rbac_only",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDefinition {
    pub key: String,
    pub classification: ModuleClassification,
    #[serde(default)]
    pub submodules: BTreeSet<String>,
}

impl ModuleDefinition {
    pub fn new(key: impl Into<String>, classification: ModuleClassification) -> Self {
        Self {
            key: key.into(),
            classification,
            submodules: BTreeSet::new(),
        }
    }

    pub fn with_submodules<I, S>(mut self, submodules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.submodules.extend(submodules.into_iter().map(Into::into));
        self
    }

    pub fn has_submodule(&self, key: &str) -> bool {
        self.submodules.contains(key)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("unknown module '{0}'")]
    UnknownModule(String),

    #[error("module '{module}' has no submodule '{submodule}'")]
    UnknownSubmodule { module: String, submodule: String },

    #[error("module '{0}' is declared more than once")]
    DuplicateModule(String),

    #[error("invalid catalog key: {0}")]
    InvalidKey(#[from] PermissionParseError),

    #[error("catalog declares no modules")]
    Empty,
}

/// A module (and optional submodule) resolved against the catalog.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedModule<'a> {
    pub definition: &'a ModuleDefinition,
    pub submodule: Option<&'a str>,
}

impl ResolvedModule<'_> {
    pub fn key(&self) -> &str {
        &self.definition.key
    }

    pub fn classification(&self) -> ModuleClassification {
        self.definition.classification
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleCatalog {
    modules: BTreeMap<String, ModuleDefinition>,
}

impl ModuleCatalog {
    pub fn new(definitions: impl IntoIterator<Item = ModuleDefinition>) -> Result<Self, CatalogError> {
        let mut modules = BTreeMap::new();
        for def in definitions {
            validate_key(&def.key)?;
            for sub in &def.submodules {
                validate_key(sub)?;
            }
            if modules.contains_key(&def.key) {
                return Err(CatalogError::DuplicateModule(def.key));
            }
            modules.insert(def.key.clone(), def);
        }
        if modules.is_empty() {
            return Err(CatalogError::Empty);
        }
        Ok(Self { modules })
    }

    /// The module set of the suite this core was built for.
    pub fn standard() -> Self {
        let modules = standard_definitions()
            .into_iter()
            .map(|d| (d.key.clone(), d))
            .collect();
        Self { modules }
    }

    pub fn get(&self, key: &str) -> Option<&ModuleDefinition> {
        self.modules.get(key)
    }

    pub fn resolve<'a>(
        &'a self,
        module: &str,
        submodule: Option<&'a str>,
    ) -> Result<ResolvedModule<'a>, CatalogError> {
        let definition = self
            .modules
            .get(module)
            .ok_or_else(|| CatalogError::UnknownModule(module.to_string()))?;

        if let Some(sub) = submodule {
            if !definition.has_submodule(sub) {
                return Err(CatalogError::UnknownSubmodule {
                    module: module.to_string(),
                    submodule: sub.to_string(),
                });
            }
        }

        Ok(ResolvedModule {
            definition,
            submodule,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModuleDefinition> {
        self.modules.values()
    }
}

fn standard_definitions() -> Vec<ModuleDefinition> {
    use ModuleClassification::*;

    vec![
        ModuleDefinition::new("vouchers", Billable),
        ModuleDefinition::new("sales", Billable),
        ModuleDefinition::new("purchases", Billable),
        ModuleDefinition::new("inventory", Billable),
        ModuleDefinition::new("manufacturing", Billable)
            .with_submodules(["bom", "work_orders", "quality"]),
        ModuleDefinition::new("analytics", Billable),
        ModuleDefinition::new("email", AlwaysOn),
        ModuleDefinition::new("masters", AlwaysOn),
        ModuleDefinition::new("reports", RbacOnly),
        ModuleDefinition::new("subscriptions", RbacOnly),
        ModuleDefinition::new("rbac", RbacOnly),
        ModuleDefinition::new("audit", RbacOnly),
        ModuleDefinition::new("diagnostics", RbacOnly),
        ModuleDefinition::new("tenancy", RbacOnly),
    ]
}
