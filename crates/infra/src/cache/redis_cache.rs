//! Redis-backed decision cache (optional, `redis` feature).
//!
//! Shared by every node of a deployment. Invalidation is an `INCR` on a
//! generation key; cached values carry the generation they were computed
//! under and a read only accepts a value whose generation still matches. Old
//! values are never deleted explicitly, they age out through their TTL.

use std::time::Duration;

use async_trait::async_trait;
use redis::{Client, aio::ConnectionManager};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use gatekeep_auth::{EntitlementDecision, PermissionDecision};
use gatekeep_core::{OrganizationId, UserId};

use super::{CacheError, CacheRead, DecisionCache, EntitlementKey, Generation, PermissionKey};

const PREFIX: &str = "gatekeep";

#[derive(Serialize, Deserialize)]
struct Stamped<T> {
    generation: u64,
    value: T,
}

#[derive(Clone)]
pub struct RedisDecisionCache {
    manager: ConnectionManager,
}

impl RedisDecisionCache {
    pub async fn connect(redis_url: &str) -> Result<Self, CacheError> {
        tracing::info!(url = %redis_url, "connecting decision cache to redis");
        let client = Client::open(redis_url).map_err(backend)?;
        let manager = client.get_connection_manager().await.map_err(backend)?;
        Ok(Self { manager })
    }

    fn entitlement_generation_key(organization_id: OrganizationId) -> String {
        format!("{PREFIX}:gen:ent:{organization_id}")
    }

    fn organization_permission_generation_key(organization_id: OrganizationId) -> String {
        format!("{PREFIX}:gen:perm:{organization_id}")
    }

    fn user_permission_generation_key(organization_id: OrganizationId, user_id: UserId) -> String {
        format!("{PREFIX}:gen:perm:{organization_id}:{user_id}")
    }

    fn entitlement_key(key: &EntitlementKey) -> String {
        format!(
            "{PREFIX}:ent:{}:{}:{}",
            key.organization_id,
            key.module,
            key.submodule.as_deref().unwrap_or("-")
        )
    }

    fn permission_key(key: &PermissionKey) -> String {
        format!(
            "{PREFIX}:perm:{}:{}:{}:{}",
            key.organization_id, key.user_id, key.module, key.action
        )
    }

    /// One round trip: every generation key followed by the value key.
    async fn read_stamped<T: DeserializeOwned>(
        &self,
        generation_keys: &[String],
        value_key: &str,
    ) -> Result<CacheRead<T>, CacheError> {
        let mut conn = self.manager.clone();
        let mut keys: Vec<&str> = generation_keys.iter().map(String::as_str).collect();
        keys.push(value_key);

        let mut raw: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await
            .map_err(backend)?;

        let value = raw.pop().flatten();
        let mut generation = 0u64;
        for g in raw.into_iter().flatten() {
            generation += g
                .parse::<u64>()
                .map_err(|e| CacheError::Decode(format!("generation '{g}': {e}")))?;
        }
        let generation = Generation(generation);

        let Some(value) = value else {
            return Ok(CacheRead::miss(generation));
        };
        let stamped: Stamped<T> =
            serde_json::from_str(&value).map_err(|e| CacheError::Decode(e.to_string()))?;
        if stamped.generation != generation.0 {
            return Ok(CacheRead::miss(generation));
        }
        Ok(CacheRead {
            value: Some(stamped.value),
            generation,
        })
    }

    async fn write_stamped<T: Serialize + Send + Sync>(
        &self,
        value_key: String,
        observed: Generation,
        value: &T,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let seconds = ttl.as_secs();
        if seconds == 0 {
            return Ok(());
        }
        let payload = serde_json::to_string(&Stamped {
            generation: observed.0,
            value,
        })
        .map_err(|e| CacheError::Decode(e.to_string()))?;

        let mut conn = self.manager.clone();
        redis::cmd("SET")
            .arg(&value_key)
            .arg(payload)
            .arg("EX")
            .arg(seconds)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(backend)
    }

    async fn bump(&self, generation_key: String) -> Result<(), CacheError> {
        let mut conn = self.manager.clone();
        redis::cmd("INCR")
            .arg(&generation_key)
            .query_async::<_, i64>(&mut conn)
            .await
            .map(|_| ())
            .map_err(backend)
    }
}

fn backend(err: redis::RedisError) -> CacheError {
    CacheError::Backend(err.to_string())
}

#[async_trait]
impl DecisionCache for RedisDecisionCache {
    async fn entitlement(
        &self,
        key: &EntitlementKey,
    ) -> Result<CacheRead<EntitlementDecision>, CacheError> {
        let gens = [Self::entitlement_generation_key(key.organization_id)];
        self.read_stamped(&gens, &Self::entitlement_key(key)).await
    }

    async fn fill_entitlement(
        &self,
        key: EntitlementKey,
        observed: Generation,
        value: EntitlementDecision,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        self.write_stamped(Self::entitlement_key(&key), observed, &value, ttl)
            .await
    }

    async fn permission(
        &self,
        key: &PermissionKey,
    ) -> Result<CacheRead<PermissionDecision>, CacheError> {
        let gens = [
            Self::organization_permission_generation_key(key.organization_id),
            Self::user_permission_generation_key(key.organization_id, key.user_id),
        ];
        self.read_stamped(&gens, &Self::permission_key(key)).await
    }

    async fn fill_permission(
        &self,
        key: PermissionKey,
        observed: Generation,
        value: PermissionDecision,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        self.write_stamped(Self::permission_key(&key), observed, &value, ttl)
            .await
    }

    async fn invalidate_organization(&self, organization_id: OrganizationId) -> Result<(), CacheError> {
        self.bump(Self::entitlement_generation_key(organization_id)).await
    }

    async fn invalidate_user(
        &self,
        organization_id: OrganizationId,
        user_id: UserId,
    ) -> Result<(), CacheError> {
        self.bump(Self::user_permission_generation_key(organization_id, user_id))
            .await
    }

    async fn invalidate_organization_permissions(
        &self,
        organization_id: OrganizationId,
    ) -> Result<(), CacheError> {
        self.bump(Self::organization_permission_generation_key(organization_id))
            .await
    }
}
