use std::collections::HashMap;
use std::hash::Hash;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use gatekeep_auth::{EntitlementDecision, PermissionDecision};
use gatekeep_core::{OrganizationId, UserId};

use super::{CacheError, CacheRead, DecisionCache, EntitlementKey, Generation, PermissionKey};

#[derive(Debug, Clone)]
struct Entry<T> {
    value: T,
    generation: Generation,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct State {
    entitlements: HashMap<EntitlementKey, Entry<EntitlementDecision>>,
    permissions: HashMap<PermissionKey, Entry<PermissionDecision>>,
    // Counters only ever grow; resetting one would let a stale fill through.
    // Scopes without a counter read as `floor`, which `compact` raises past
    // every generation handed out before it dropped the counters.
    organization_entitlements: HashMap<OrganizationId, u64>,
    organization_permissions: HashMap<OrganizationId, u64>,
    user_permissions: HashMap<(OrganizationId, UserId), u64>,
    floor: u64,
}

impl State {
    fn entitlement_generation(&self, organization_id: OrganizationId) -> Generation {
        Generation(
            self.organization_entitlements
                .get(&organization_id)
                .copied()
                .unwrap_or(self.floor),
        )
    }

    // Sum of two monotonic counters: bumping either one changes the result.
    fn permission_generation(&self, organization_id: OrganizationId, user_id: UserId) -> Generation {
        let org = self
            .organization_permissions
            .get(&organization_id)
            .copied()
            .unwrap_or(self.floor);
        let user = self
            .user_permissions
            .get(&(organization_id, user_id))
            .copied()
            .unwrap_or(self.floor);
        Generation(org.saturating_add(user))
    }

    fn scope_count(&self) -> usize {
        self.organization_entitlements.len()
            + self.organization_permissions.len()
            + self.user_permissions.len()
    }

    /// Drop every counter and cached entry once the counters outnumber
    /// `capacity`. The new floor exceeds every counter, so each generation
    /// observed earlier (entitlement: one counter; permission: the sum of two)
    /// differs from anything read afterwards.
    fn compact(&mut self, capacity: usize) {
        if self.scope_count() <= capacity {
            return;
        }
        let floor = self.floor;
        fn highest<K>(m: &HashMap<K, u64>, floor: u64) -> u64 {
            m.values().copied().max().unwrap_or(floor).max(floor)
        }
        let next = highest(&self.organization_entitlements, floor)
            .max(highest(&self.organization_permissions, floor))
            .max(highest(&self.user_permissions, floor))
            .saturating_add(1);

        tracing::debug!(scopes = self.scope_count(), floor = next, "compacting decision cache generations");
        self.organization_entitlements.clear();
        self.organization_permissions.clear();
        self.user_permissions.clear();
        self.entitlements.clear();
        self.permissions.clear();
        self.floor = next;
    }

    fn bump<K: Eq + Hash>(map: &mut HashMap<K, u64>, key: K, floor: u64) {
        let counter = map.entry(key).or_insert(floor);
        *counter = counter.saturating_add(1);
    }
}

/// In-process decision cache for single-node deployments and tests.
///
/// Bounded per key space; when full, expired entries are purged first and then
/// the entry closest to expiry is evicted.
#[derive(Debug)]
pub struct InMemoryDecisionCache {
    capacity: usize,
    inner: RwLock<State>,
}

impl InMemoryDecisionCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: RwLock::new(State::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .map(|s| s.entitlements.len() + s.permissions.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn read_entry<K, T>(map: &HashMap<K, Entry<T>>, key: &K, current: Generation) -> Option<T>
where
    K: Eq + Hash,
    T: Clone,
{
    map.get(key)
        .filter(|e| e.generation == current && e.expires_at > Instant::now())
        .map(|e| e.value.clone())
}

fn insert_bounded<K, T>(map: &mut HashMap<K, Entry<T>>, capacity: usize, key: K, entry: Entry<T>)
where
    K: Eq + Hash + Clone,
{
    if map.len() >= capacity && !map.contains_key(&key) {
        let now = Instant::now();
        map.retain(|_, e| e.expires_at > now);
        if map.len() >= capacity {
            let victim = map
                .iter()
                .min_by_key(|(_, e)| e.expires_at)
                .map(|(k, _)| k.clone());
            if let Some(victim) = victim {
                map.remove(&victim);
            }
        }
    }
    map.insert(key, entry);
}

#[async_trait]
impl DecisionCache for InMemoryDecisionCache {
    async fn entitlement(
        &self,
        key: &EntitlementKey,
    ) -> Result<CacheRead<EntitlementDecision>, CacheError> {
        let state = self.inner.read().map_err(|_| CacheError::Poisoned)?;
        let generation = state.entitlement_generation(key.organization_id);
        Ok(CacheRead {
            value: read_entry(&state.entitlements, key, generation),
            generation,
        })
    }

    async fn fill_entitlement(
        &self,
        key: EntitlementKey,
        observed: Generation,
        value: EntitlementDecision,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let mut state = self.inner.write().map_err(|_| CacheError::Poisoned)?;
        if state.entitlement_generation(key.organization_id) != observed {
            tracing::debug!(organization_id = %key.organization_id, "discarding stale entitlement fill");
            return Ok(());
        }
        let Some(expires_at) = Instant::now().checked_add(ttl) else {
            return Ok(());
        };
        let entry = Entry {
            value,
            generation: observed,
            expires_at,
        };
        insert_bounded(&mut state.entitlements, self.capacity, key, entry);
        Ok(())
    }

    async fn permission(
        &self,
        key: &PermissionKey,
    ) -> Result<CacheRead<PermissionDecision>, CacheError> {
        let state = self.inner.read().map_err(|_| CacheError::Poisoned)?;
        let generation = state.permission_generation(key.organization_id, key.user_id);
        Ok(CacheRead {
            value: read_entry(&state.permissions, key, generation),
            generation,
        })
    }

    async fn fill_permission(
        &self,
        key: PermissionKey,
        observed: Generation,
        value: PermissionDecision,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let mut state = self.inner.write().map_err(|_| CacheError::Poisoned)?;
        if state.permission_generation(key.organization_id, key.user_id) != observed {
            tracing::debug!(
                organization_id = %key.organization_id,
                user_id = %key.user_id,
                "discarding stale permission fill"
            );
            return Ok(());
        }
        let Some(expires_at) = Instant::now().checked_add(ttl) else {
            return Ok(());
        };
        let entry = Entry {
            value,
            generation: observed,
            expires_at,
        };
        insert_bounded(&mut state.permissions, self.capacity, key, entry);
        Ok(())
    }

    async fn invalidate_organization(&self, organization_id: OrganizationId) -> Result<(), CacheError> {
        let mut state = self.inner.write().map_err(|_| CacheError::Poisoned)?;
        let floor = state.floor;
        State::bump(&mut state.organization_entitlements, organization_id, floor);
        state
            .entitlements
            .retain(|k, _| k.organization_id != organization_id);
        state.compact(self.capacity);
        Ok(())
    }

    async fn invalidate_user(
        &self,
        organization_id: OrganizationId,
        user_id: UserId,
    ) -> Result<(), CacheError> {
        let mut state = self.inner.write().map_err(|_| CacheError::Poisoned)?;
        let floor = state.floor;
        State::bump(&mut state.user_permissions, (organization_id, user_id), floor);
        state
            .permissions
            .retain(|k, _| !(k.organization_id == organization_id && k.user_id == user_id));
        state.compact(self.capacity);
        Ok(())
    }

    async fn invalidate_organization_permissions(
        &self,
        organization_id: OrganizationId,
    ) -> Result<(), CacheError> {
        let mut state = self.inner.write().map_err(|_| CacheError::Poisoned)?;
        let floor = state.floor;
        State::bump(&mut state.organization_permissions, organization_id, floor);
        state
            .permissions
            .retain(|k, _| k.organization_id != organization_id);
        state.compact(self.capacity);
        Ok(())
    }
}
