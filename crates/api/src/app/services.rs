//! Service wiring: stores, decision cache and audit log behind one [`Gate`].
//!
//! `USE_PERSISTENT_STORES=true` selects Postgres (`DATABASE_URL`) for stores
//! and the audit log. With persistent stores the decision cache is Redis when
//! the `redis` feature is compiled in and `REDIS_URL` is set, otherwise no
//! decisions are cached. In-memory mode keeps an in-process cache.

use std::sync::Arc;

use anyhow::Context;

use gatekeep_auth::ModuleCatalog;
use gatekeep_infra::{
    AdminService, AuditQuery, AuditSink, AuthzConfig, AuthzStores, DecisionCache, Gate,
    InMemoryAuditLog, InMemoryAuthzStore, InMemoryDecisionCache, NoopDecisionCache, PostgresAuditLog,
    PostgresAuthzStore, TracingAuditSink,
};

use crate::config::ApiConfig;

#[derive(Clone)]
pub struct AppServices {
    pub gate: Arc<Gate>,
    pub admin: Arc<AdminService>,
}

impl AppServices {
    fn assemble(
        stores: AuthzStores,
        cache: Arc<dyn DecisionCache>,
        audit_sink: Arc<dyn AuditSink>,
        audit_query: Arc<dyn AuditQuery>,
        config: AuthzConfig,
    ) -> Self {
        let gate = Arc::new(Gate::new(
            Arc::new(ModuleCatalog::standard()),
            stores,
            cache,
            audit_sink,
            config,
        ));
        let admin = Arc::new(AdminService::new(gate.clone(), audit_query));
        Self { gate, admin }
    }

    /// Fully in-memory services over `store`. Organizations, entitlements and
    /// roles are seeded through the store itself.
    pub fn in_memory(store: Arc<InMemoryAuthzStore>, config: AuthzConfig) -> Self {
        let log = Arc::new(InMemoryAuditLog::new());
        Self::assemble(
            AuthzStores::from_shared(store),
            Arc::new(InMemoryDecisionCache::new(config.cache_capacity)),
            Arc::new(TracingAuditSink::new(log.clone())),
            log,
            config,
        )
    }
}

pub async fn build_services(config: &ApiConfig) -> anyhow::Result<AppServices> {
    if !config.use_persistent_stores {
        tracing::info!("using in-memory stores");
        return Ok(AppServices::in_memory(
            Arc::new(InMemoryAuthzStore::new()),
            config.authz,
        ));
    }

    let database_url = config
        .database_url
        .as_deref()
        .context("USE_PERSISTENT_STORES=true requires DATABASE_URL")?;
    let pool = sqlx::PgPool::connect(database_url)
        .await
        .context("failed to connect to Postgres")?;
    tracing::info!("using Postgres stores");

    let store = Arc::new(PostgresAuthzStore::new(pool.clone()));
    let log = Arc::new(PostgresAuditLog::new(pool));
    let cache = build_cache(config).await?;

    Ok(AppServices::assemble(
        AuthzStores::from_shared(store),
        cache,
        Arc::new(TracingAuditSink::new(log.clone())),
        log,
        config.authz,
    ))
}

/// Decision cache used alongside the persistent stores.
#[derive(Debug, Clone, PartialEq, Eq)]
enum CacheBackend {
    Redis(String),
    /// No shared cache is reachable. A per-process cache would keep serving
    /// grants on other replicas after a revocation, so every check reads
    /// the stores instead.
    Disabled,
}

fn cache_backend(config: &ApiConfig, redis_compiled: bool) -> CacheBackend {
    match config.redis_url.as_deref() {
        Some(url) if redis_compiled => CacheBackend::Redis(url.to_string()),
        Some(_) => {
            tracing::warn!("REDIS_URL set but redis feature not enabled; decision cache disabled");
            CacheBackend::Disabled
        }
        None => {
            tracing::warn!("REDIS_URL not set; decision cache disabled");
            CacheBackend::Disabled
        }
    }
}

async fn build_cache(config: &ApiConfig) -> anyhow::Result<Arc<dyn DecisionCache>> {
    match cache_backend(config, cfg!(feature = "redis")) {
        CacheBackend::Redis(url) => connect_redis(&url).await,
        CacheBackend::Disabled => Ok(Arc::new(NoopDecisionCache)),
    }
}

#[cfg(feature = "redis")]
async fn connect_redis(url: &str) -> anyhow::Result<Arc<dyn DecisionCache>> {
    let cache = gatekeep_infra::cache::RedisDecisionCache::connect(url)
        .await
        .context("failed to connect to Redis")?;
    tracing::info!("using Redis decision cache");
    Ok(Arc::new(cache))
}

#[cfg(not(feature = "redis"))]
async fn connect_redis(_url: &str) -> anyhow::Result<Arc<dyn DecisionCache>> {
    anyhow::bail!("redis feature not enabled")
}
