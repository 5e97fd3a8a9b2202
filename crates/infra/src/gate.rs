//! Access enforcement gate.
//!
//! The single entry point business modules call before touching data. It
//! composes the tenant resolver, the entitlement evaluator and the permission
//! resolver, caches their answers, and audits every decision.
//!
//! ## Evaluation Flow
//!
//! ```text
//! (session, module, action, submodule?)
//!   ↓
//! 1. Resolve tenant context        → TenantContextMissing
//!   ↓
//! 2. Evaluate entitlement          → EntitlementDenied(module, reason)
//!   ↓
//! 3. Resolve permission            → PermissionDenied(module.action, reason)
//!   ↓
//! 4. AuthorizedContext { user_id, organization_id }
//! ```
//!
//! Each step short-circuits. Exactly one audit entry is appended per call,
//! whatever the outcome.
//!
//! ## Failure Semantics
//!
//! - **Fail closed**: any store error, any lookup exceeding
//!   `AuthzConfig::lookup_timeout`, an unknown module key or a corrupted role
//!   graph becomes an `EvaluationError` denial. Nothing is retried.
//! - **Cache is advisory**: a cache read failure is treated as a miss; a fill
//!   failure is logged and ignored. The stores stay the source of truth.
//! - **Audit never flips a decision**: a failed append is logged at error
//!   level and counted in [`Gate::audit_failures`]; the decision is returned
//!   unchanged.
//!
//! ## Cross-Organization Override
//!
//! A session may carry an override organization. It is honored only when the
//! caller holds `tenancy.cross_org` in their home organization. Entitlement
//! and data scoping then use the override organization while the permission
//! layer keeps evaluating the caller's home-organization roles.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use gatekeep_auth::permissions::{admin, validate_action};
use gatekeep_auth::{
    AccessExplanation, AuthorizedContext, Denial, EntitlementDecision, ExplainInput,
    ModuleCatalog, ModuleClassification, PermissionDecision, PermissionSet, SessionIdentity,
    evaluate_entitlement, explain_access,
};
use gatekeep_auth::modules::ResolvedModule;
use gatekeep_core::{OrganizationId, UserId};

use crate::audit::{AuditLogEntry, AuditSink};
use crate::cache::{CacheError, CacheRead, DecisionCache, EntitlementKey, PermissionKey};
use crate::config::AuthzConfig;
use crate::store::AuthzStores;

/// A resolved tenant context.
///
/// `organization_id` scopes entitlements and data; `permission_organization_id`
/// is where the caller's roles are read. They differ only under an honored
/// cross-organization override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantContext {
    pub user_id: UserId,
    pub organization_id: OrganizationId,
    pub permission_organization_id: OrganizationId,
}

impl TenantContext {
    pub fn context(&self) -> AuthorizedContext {
        AuthorizedContext {
            user_id: self.user_id,
            organization_id: self.organization_id,
        }
    }

    pub fn is_override(&self) -> bool {
        self.organization_id != self.permission_organization_id
    }
}

/// One row of the UI-filtering summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleAccess {
    pub module: String,
    pub submodule: Option<String>,
    pub status: &'static str,
    pub is_trial: bool,
    pub trial_expires_at: Option<DateTime<Utc>>,
}

/// What a user may see in an organization. Advisory only; every actual access
/// still goes through [`Gate::enforce`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessSummary {
    pub user_id: UserId,
    pub organization_id: OrganizationId,
    pub modules: Vec<ModuleAccess>,
    pub permissions: Vec<String>,
}

pub struct Gate {
    catalog: Arc<ModuleCatalog>,
    stores: AuthzStores,
    cache: Arc<dyn DecisionCache>,
    audit: Arc<dyn AuditSink>,
    config: AuthzConfig,
    entitlement_ttl: chrono::Duration,
    audit_failures: AtomicU64,
}

impl Gate {
    pub fn new(
        catalog: Arc<ModuleCatalog>,
        stores: AuthzStores,
        cache: Arc<dyn DecisionCache>,
        audit: Arc<dyn AuditSink>,
        config: AuthzConfig,
    ) -> Self {
        // An unrepresentable TTL disables entitlement caching rather than failing.
        let entitlement_ttl =
            chrono::Duration::from_std(config.cache_ttl).unwrap_or(chrono::Duration::zero());
        Self {
            catalog,
            stores,
            cache,
            audit,
            config,
            entitlement_ttl,
            audit_failures: AtomicU64::new(0),
        }
    }

    pub fn catalog(&self) -> &ModuleCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &AuthzConfig {
        &self.config
    }

    pub(crate) fn stores(&self) -> &AuthzStores {
        &self.stores
    }

    pub(crate) fn cache(&self) -> &dyn DecisionCache {
        self.cache.as_ref()
    }

    /// Audit appends that failed since this gate was built.
    pub fn audit_failures(&self) -> u64 {
        self.audit_failures.load(Ordering::Relaxed)
    }

    // ─── enforcement ────────────────────────────────────────────────────────

    pub async fn enforce(
        &self,
        session: &SessionIdentity,
        module: &str,
        action: &str,
        submodule: Option<&str>,
    ) -> Result<AuthorizedContext, Denial> {
        self.enforce_at(session, module, action, submodule, Utc::now())
            .await
    }

    /// [`Gate::enforce`] with an explicit evaluation instant.
    pub async fn enforce_at(
        &self,
        session: &SessionIdentity,
        module: &str,
        action: &str,
        submodule: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<AuthorizedContext, Denial> {
        self.authorize_at(session, module, action, submodule, now)
            .await
            .map(|tenant| tenant.context())
    }

    /// Like [`Gate::enforce`] but returns the full tenant context, including
    /// the organization the caller's permissions were read from.
    pub async fn authorize(
        &self,
        session: &SessionIdentity,
        module: &str,
        action: &str,
        submodule: Option<&str>,
    ) -> Result<TenantContext, Denial> {
        self.authorize_at(session, module, action, submodule, Utc::now())
            .await
    }

    #[instrument(
        skip_all,
        fields(user_id = %session.user_id, module = %module, action = %action, submodule = ?submodule)
    )]
    pub async fn authorize_at(
        &self,
        session: &SessionIdentity,
        module: &str,
        action: &str,
        submodule: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<TenantContext, Denial> {
        let tenant = match self.resolve_tenant(session).await {
            Ok(tenant) => tenant,
            Err(denial) => {
                let entry = AuditLogEntry::denied(
                    now,
                    session.user_id,
                    None,
                    module,
                    submodule,
                    action,
                    &denial,
                );
                self.record(entry).await;
                return Err(denial);
            }
        };

        match self.decide(&tenant, module, action, submodule, now).await {
            Ok(reason) => {
                tracing::debug!(organization_id = %tenant.organization_id, decision = "granted", %reason);
                let entry = AuditLogEntry::granted(
                    now,
                    tenant.user_id,
                    tenant.organization_id,
                    module,
                    submodule,
                    action,
                    reason,
                );
                self.record(entry).await;
                Ok(tenant)
            }
            Err(denial) => {
                tracing::debug!(
                    organization_id = %tenant.organization_id,
                    decision = "denied",
                    kind = denial.kind.as_str(),
                    reason = %denial.reason
                );
                let entry = AuditLogEntry::denied(
                    now,
                    tenant.user_id,
                    Some(tenant.organization_id),
                    module,
                    submodule,
                    action,
                    &denial,
                );
                self.record(entry).await;
                Err(denial)
            }
        }
    }

    /// Steps 2 and 3. Returns the audit reason of a grant.
    async fn decide(
        &self,
        tenant: &TenantContext,
        module: &str,
        action: &str,
        submodule: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<String, Denial> {
        let resolved = self.resolve_module(module, submodule, action)?;

        let entitlement = self
            .entitlement_decision(tenant.organization_id, resolved, now)
            .await?;
        if !entitlement.is_entitled() {
            return Err(Denial::entitlement_denied(module, entitlement.reason()));
        }

        let permission = self
            .permission_decision(tenant.permission_organization_id, tenant.user_id, module, action)
            .await?;
        match permission {
            PermissionDecision::Granted { matched } => Ok(format!("granted by '{matched}'")),
            PermissionDecision::Denied => Err(Denial::permission_denied(module, action)),
        }
    }

    fn resolve_module<'a>(
        &'a self,
        module: &str,
        submodule: Option<&'a str>,
        action: &str,
    ) -> Result<ResolvedModule<'a>, Denial> {
        let resolved = self.catalog.resolve(module, submodule).map_err(|e| {
            tracing::warn!(error = %e, "request names a module outside the catalog");
            Denial::evaluation_error(e.to_string())
        })?;
        validate_action(action)
            .map_err(|e| Denial::evaluation_error(format!("invalid action '{action}': {e}")))?;
        Ok(resolved)
    }

    // ─── tenant resolution ──────────────────────────────────────────────────

    /// Step 1. Never falls back to a default organization.
    pub async fn resolve_tenant(&self, session: &SessionIdentity) -> Result<TenantContext, Denial> {
        let user_id = session.user_id;
        match (session.organization_id, session.override_organization_id) {
            (home, Some(target)) if home != Some(target) => {
                let Some(home) = home else {
                    return Err(Denial::tenant_context_missing(
                        "organization override requires a home organization",
                    ));
                };
                self.require_active(home, "home organization").await?;

                let allowed = self
                    .permission_decision(
                        home,
                        user_id,
                        admin::CROSS_ORGANIZATION.module(),
                        admin::CROSS_ORGANIZATION.action(),
                    )
                    .await?;
                if !allowed.is_granted() {
                    return Err(Denial::tenant_context_missing(
                        "organization override not permitted",
                    ));
                }

                self.require_active(target, "override organization").await?;
                tracing::info!(
                    user_id = %user_id,
                    home_organization_id = %home,
                    organization_id = %target,
                    "cross-organization override honored"
                );
                Ok(TenantContext {
                    user_id,
                    organization_id: target,
                    permission_organization_id: home,
                })
            }
            (Some(home), _) => {
                self.require_active(home, "organization").await?;
                Ok(TenantContext {
                    user_id,
                    organization_id: home,
                    permission_organization_id: home,
                })
            }
            (None, _) => Err(Denial::tenant_context_missing(
                "session carries no organization",
            )),
        }
    }

    async fn require_active(&self, id: OrganizationId, what: &str) -> Result<(), Denial> {
        let organization = self
            .bounded("organization", self.stores.organizations.organization(id))
            .await?;
        match organization {
            Some(org) if org.active => Ok(()),
            _ => Err(Denial::tenant_context_missing(format!(
                "{what} is unknown or inactive"
            ))),
        }
    }

    // ─── entitlement ────────────────────────────────────────────────────────

    async fn entitlement_decision(
        &self,
        organization_id: OrganizationId,
        resolved: ResolvedModule<'_>,
        now: DateTime<Utc>,
    ) -> Result<EntitlementDecision, Denial> {
        // Static classifications are decided without a lookup.
        if resolved.classification() != ModuleClassification::Billable {
            return Ok(evaluate_entitlement(resolved.classification(), None, false, None, now));
        }

        let key = EntitlementKey::new(organization_id, resolved.key(), resolved.submodule);
        let observed = match self.cache_read("entitlement", self.cache.entitlement(&key)).await {
            Some(CacheRead {
                value: Some(decision),
                ..
            }) => return Ok(decision.at(now)),
            Some(miss) => Some(miss.generation),
            None => None,
        };

        let decision = self.load_entitlement(organization_id, resolved, now).await?;

        if let Some(observed) = observed {
            let ttl = decision
                .cache_ttl(now, self.entitlement_ttl)
                .and_then(|ttl| ttl.to_std().ok());
            if let Some(ttl) = ttl {
                self.cache_fill(
                    "entitlement",
                    self.cache.fill_entitlement(key, observed, decision, ttl),
                )
                .await;
            }
        }
        Ok(decision)
    }

    /// Uncached evaluation straight from the entitlement store.
    async fn load_entitlement(
        &self,
        organization_id: OrganizationId,
        resolved: ResolvedModule<'_>,
        now: DateTime<Utc>,
    ) -> Result<EntitlementDecision, Denial> {
        if resolved.classification() != ModuleClassification::Billable {
            return Ok(evaluate_entitlement(resolved.classification(), None, false, None, now));
        }
        let rows = self
            .bounded(
                "entitlement",
                self.stores
                    .entitlements
                    .module_entitlements(organization_id, resolved.key()),
            )
            .await?;

        let module_row = rows.iter().find(|r| r.submodule.is_none());
        let submodule_row = resolved
            .submodule
            .and_then(|sub| rows.iter().find(|r| r.submodule.as_deref() == Some(sub)));

        Ok(evaluate_entitlement(
            resolved.classification(),
            module_row,
            resolved.submodule.is_some(),
            submodule_row,
            now,
        ))
    }

    // ─── permission ─────────────────────────────────────────────────────────

    async fn permission_decision(
        &self,
        organization_id: OrganizationId,
        user_id: UserId,
        module: &str,
        action: &str,
    ) -> Result<PermissionDecision, Denial> {
        let key = PermissionKey::new(organization_id, user_id, module, action);
        let observed = match self.cache_read("permission", self.cache.permission(&key)).await {
            Some(CacheRead {
                value: Some(decision),
                ..
            }) => return Ok(decision),
            Some(miss) => Some(miss.generation),
            None => None,
        };

        let permissions = self.permission_set(organization_id, user_id).await?;
        let decision = PermissionDecision::from(permissions.check(module, action));

        if let Some(observed) = observed {
            if !self.config.cache_ttl.is_zero() {
                self.cache_fill(
                    "permission",
                    self.cache.fill_permission(
                        key,
                        observed,
                        decision.clone(),
                        self.config.cache_ttl,
                    ),
                )
                .await;
            }
        }
        Ok(decision)
    }

    /// Effective permissions of `user_id` in `organization_id`, uncached.
    pub async fn permission_set(
        &self,
        organization_id: OrganizationId,
        user_id: UserId,
    ) -> Result<PermissionSet, Denial> {
        let graph = self
            .bounded("role graph", self.stores.roles.user_role_graph(organization_id, user_id))
            .await?;
        PermissionSet::resolve(organization_id, &graph, self.config.max_role_depth).map_err(|e| {
            tracing::error!(
                organization_id = %organization_id,
                user_id = %user_id,
                error = %e,
                "stored role graph rejected"
            );
            Denial::evaluation_error(format!("role graph rejected: {e}"))
        })
    }

    // ─── secondary queries ──────────────────────────────────────────────────

    /// Modules the caller may see, with entitlement status, plus their
    /// granted permission strings. Not audited.
    #[instrument(skip(self, session), fields(user_id = %session.user_id))]
    pub async fn access_summary(&self, session: &SessionIdentity) -> Result<AccessSummary, Denial> {
        let now = Utc::now();
        let tenant = self.resolve_tenant(session).await?;
        let permissions = self
            .permission_set(tenant.permission_organization_id, tenant.user_id)
            .await?;

        let mut modules = Vec::new();
        for definition in self.catalog.iter() {
            if !permissions.grants_any_in(&definition.key) {
                continue;
            }
            let targets = std::iter::once(None).chain(definition.submodules.iter().map(Some));
            for submodule in targets {
                let resolved = ResolvedModule {
                    definition,
                    submodule: submodule.map(String::as_str),
                };
                let decision = self
                    .entitlement_decision(tenant.organization_id, resolved, now)
                    .await?;
                modules.push(ModuleAccess {
                    module: definition.key.clone(),
                    submodule: submodule.cloned(),
                    status: decision.status_label(),
                    is_trial: decision.trial_expires_at().is_some(),
                    trial_expires_at: decision.trial_expires_at(),
                });
            }
        }

        Ok(AccessSummary {
            user_id: tenant.user_id,
            organization_id: tenant.organization_id,
            modules,
            permissions: permissions.iter().map(|p| p.to_string()).collect(),
        })
    }

    /// Why `target_user` would be granted or denied `module.action` in the
    /// caller's organization. Roles are read where the caller's own are, so
    /// under an override the answer matches what `enforce` does for that
    /// user with the same override. Requires `diagnostics.explain`; the check
    /// itself is audited. Reads bypass the cache.
    pub async fn explain(
        &self,
        session: &SessionIdentity,
        target_user: UserId,
        module: &str,
        action: &str,
        submodule: Option<&str>,
    ) -> Result<AccessExplanation, Denial> {
        let tenant = self
            .authorize(
                session,
                admin::DIAGNOSTICS_EXPLAIN.module(),
                admin::DIAGNOSTICS_EXPLAIN.action(),
                None,
            )
            .await?;
        let now = Utc::now();
        let organization_id = tenant.organization_id;

        let resolved = self.resolve_module(module, submodule, action)?;
        let entitlement = self.load_entitlement(organization_id, resolved, now).await?;
        let permissions = self
            .permission_set(tenant.permission_organization_id, target_user)
            .await?;

        Ok(explain_access(ExplainInput {
            organization_id,
            user_id: target_user,
            module,
            action,
            submodule,
            classification: resolved.classification(),
            entitlement,
            permissions: &permissions,
        }))
    }

    // ─── plumbing ───────────────────────────────────────────────────────────

    /// Run a store lookup under the lookup budget. Errors and timeouts fail
    /// closed.
    async fn bounded<T, E>(
        &self,
        what: &str,
        lookup: impl Future<Output = Result<T, E>>,
    ) -> Result<T, Denial>
    where
        E: Display,
    {
        match tokio::time::timeout(self.config.lookup_timeout, lookup).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                tracing::warn!(lookup = what, error = %e, "lookup failed");
                Err(Denial::evaluation_error(format!("{what} lookup failed")))
            }
            Err(_) => {
                tracing::warn!(lookup = what, "lookup timed out");
                Err(Denial::evaluation_error(format!("{what} lookup timed out")))
            }
        }
    }

    async fn cache_read<T>(
        &self,
        what: &str,
        read: impl Future<Output = Result<CacheRead<T>, CacheError>>,
    ) -> Option<CacheRead<T>> {
        match tokio::time::timeout(self.config.lookup_timeout, read).await {
            Ok(Ok(read)) => Some(read),
            Ok(Err(e)) => {
                tracing::warn!(cache = what, error = %e, "cache read failed; computing uncached");
                None
            }
            Err(_) => {
                tracing::warn!(cache = what, "cache read timed out; computing uncached");
                None
            }
        }
    }

    async fn cache_fill(&self, what: &str, fill: impl Future<Output = Result<(), CacheError>>) {
        match tokio::time::timeout(self.config.lookup_timeout, fill).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(cache = what, error = %e, "cache fill failed"),
            Err(_) => tracing::warn!(cache = what, "cache fill timed out"),
        }
    }

    async fn record(&self, entry: AuditLogEntry) {
        let entry_id = entry.id;
        let failure = match tokio::time::timeout(self.config.lookup_timeout, self.audit.append(entry)).await {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e.to_string(),
            Err(_) => "append timed out".to_string(),
        };
        self.audit_failures.fetch_add(1, Ordering::Relaxed);
        tracing::error!(%entry_id, error = %failure, "audit append failed; decision stands");
    }
}
