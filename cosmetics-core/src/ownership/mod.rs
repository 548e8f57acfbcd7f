//! Ownership: who owns which item, and the persisted active set.
//!
//! [`OwnershipStore`] is the durable collaborator (memory or JSON files).
//! [`OwnershipOracle`] sits in front of it, answering ownership queries with
//! a free-item short-circuit, a per-entity cache, a bounded wait and a
//! fail-closed policy.

mod file;
mod memory;

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::catalog::ItemDefinition;
use crate::config::OracleConfig;
use crate::error::{CosmeticsError, Result, StoreError};
use crate::types::{EntityId, ItemId};

pub use file::JsonFileStore;
pub use memory::MemoryOwnershipStore;

/// Durable per-entity record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRecord {
    /// Items bought or granted
    #[serde(default)]
    pub owned: BTreeSet<ItemId>,
    /// Items active at last save
    #[serde(default)]
    pub active: BTreeSet<ItemId>,
}

/// Persistent store of ownership and active sets.
///
/// All calls may suspend on I/O and may fail transiently.
#[async_trait]
pub trait OwnershipStore: Send + Sync {
    /// Whether the ownership relation holds.
    async fn owns(&self, entity: &EntityId, item: &ItemId) -> std::result::Result<bool, StoreError>;

    /// Record ownership. Granting twice succeeds.
    async fn grant(&self, entity: &EntityId, item: &ItemId) -> std::result::Result<(), StoreError>;

    /// Active set written at the entity's last session end.
    async fn load_active_set(&self, entity: &EntityId) -> std::result::Result<BTreeSet<ItemId>, StoreError>;

    /// Replace the persisted active set.
    async fn save_active_set(
        &self,
        entity: &EntityId,
        active: &BTreeSet<ItemId>,
    ) -> std::result::Result<(), StoreError>;
}

/// Counters for oracle behavior.
#[derive(Debug, Default)]
pub struct OracleStats {
    /// Answers served from cache
    pub hits: AtomicU64,
    /// Answers fetched from the store
    pub misses: AtomicU64,
    /// Store errors
    pub failures: AtomicU64,
    /// Store calls that exceeded the bounded wait
    pub timeouts: AtomicU64,
}

impl OracleStats {
    /// Get snapshot of current stats.
    pub fn snapshot(&self) -> OracleStatsSnapshot {
        OracleStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of oracle statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub failures: u64,
    pub timeouts: u64,
}

/// Answers "does entity E own item I".
pub struct OwnershipOracle {
    store: Arc<dyn OwnershipStore>,
    config: OracleConfig,
    /// Cached answers, dropped when the entity's session ends
    cache: DashMap<EntityId, HashMap<ItemId, bool>>,
    /// Bumped by every grant. A store answer read across a bump is not cached.
    grant_epoch: AtomicU64,
    stats: OracleStats,
}

impl OwnershipOracle {
    pub fn new(store: Arc<dyn OwnershipStore>, config: OracleConfig) -> Self {
        Self {
            store,
            config,
            cache: DashMap::new(),
            grant_epoch: AtomicU64::new(0),
            stats: OracleStats::default(),
        }
    }

    /// Create with default configuration.
    pub fn with_defaults(store: Arc<dyn OwnershipStore>) -> Self {
        Self::new(store, OracleConfig::default())
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<dyn OwnershipStore> {
        &self.store
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.config.timeout_ms)
    }

    /// Whether the entity owns the item.
    ///
    /// Free items are always owned without consulting the store. Store
    /// failures and timeouts answer `false` and are logged; this never errors.
    pub async fn owns(&self, entity: &EntityId, item: &ItemDefinition) -> bool {
        if item.is_free() {
            return true;
        }

        match self.query(entity, &item.id, true).await {
            Ok(owned) => owned,
            Err(e) => {
                warn!(entity = %entity, item = %item.id, error = %e, "Ownership unknown, treating as not owned");
                false
            }
        }
    }

    /// Ownership query that reports `OracleUnavailable` instead of failing
    /// closed. Used where a wrong "no" costs more than an error, e.g. before
    /// charging for a purchase.
    ///
    /// Never fills the cache: callers may ask about entities with no session,
    /// whose cache entries would never be invalidated.
    pub async fn try_owns(&self, entity: &EntityId, item: &ItemDefinition) -> Result<bool> {
        if item.is_free() {
            return Ok(true);
        }
        self.query(entity, &item.id, false).await
    }

    /// Like [`owns`](Self::owns) but never fills the cache, so read-only
    /// evaluators leave no trace on the oracle.
    pub async fn probe(&self, entity: &EntityId, item: &ItemDefinition) -> bool {
        if item.is_free() {
            return true;
        }
        self.query(entity, &item.id, false).await.unwrap_or(false)
    }

    async fn query(&self, entity: &EntityId, item: &ItemId, populate: bool) -> Result<bool> {
        if self.config.cache_enabled {
            if let Some(owned) = self.cache.get(entity).and_then(|c| c.get(item).copied()) {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(owned);
            }
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);

        let epoch = self.grant_epoch.load(Ordering::SeqCst);
        let owned = match tokio::time::timeout(self.timeout(), self.store.owns(entity, item)).await {
            Ok(Ok(owned)) => owned,
            Ok(Err(e)) => {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                warn!(entity = %entity, item = %item, error = %e, "Ownership store failed");
                return Err(CosmeticsError::OracleUnavailable(e.to_string()));
            }
            Err(_) => {
                self.stats.timeouts.fetch_add(1, Ordering::Relaxed);
                warn!(
                    entity = %entity,
                    item = %item,
                    timeout_ms = self.config.timeout_ms,
                    "Ownership store timed out"
                );
                return Err(CosmeticsError::OracleUnavailable(format!(
                    "timed out after {}ms",
                    self.config.timeout_ms
                )));
            }
        };

        if populate && self.config.cache_enabled {
            // The entry guard orders this insert against a grant's patch
            let entry = self.cache.entry(*entity);
            if self.grant_epoch.load(Ordering::SeqCst) != epoch {
                debug!(entity = %entity, item = %item, "Grant raced the query, answer not cached");
            } else {
                let mut cached = entry.or_default();
                let answer = cached.entry(item.clone()).or_insert(owned);
                *answer |= owned;
            }
        }
        Ok(owned)
    }

    /// Grant ownership. Idempotent.
    ///
    /// A grant wins over any query that read the store before it: such a
    /// query sees the epoch move and leaves the cache alone.
    pub async fn grant(&self, entity: &EntityId, item: &ItemId) -> Result<()> {
        self.store.grant(entity, item).await?;

        self.grant_epoch.fetch_add(1, Ordering::SeqCst);
        if let Some(mut cached) = self.cache.get_mut(entity) {
            cached.insert(item.clone(), true);
        }
        debug!(entity = %entity, item = %item, "Ownership granted");
        Ok(())
    }

    /// Forget cached answers for an entity.
    pub fn invalidate(&self, entity: &EntityId) {
        self.cache.remove(entity);
    }

    /// Number of entities with cached answers.
    pub fn cached_entities(&self) -> usize {
        self.cache.len()
    }

    pub fn stats(&self) -> OracleStatsSnapshot {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::NoopEffect;
    use crate::types::Category;
    use std::sync::atomic::AtomicBool;
    use tokio::sync::Notify;

    /// Store whose first `owns` call parks after reading its answer.
    #[derive(Default)]
    struct GatedStore {
        inner: MemoryOwnershipStore,
        used: AtomicBool,
        parked: Notify,
        release: Notify,
    }

    #[async_trait]
    impl OwnershipStore for GatedStore {
        async fn owns(&self, entity: &EntityId, item: &ItemId) -> std::result::Result<bool, StoreError> {
            let answer = self.inner.owns(entity, item).await?;
            if !self.used.swap(true, Ordering::SeqCst) {
                self.parked.notify_one();
                self.release.notified().await;
            }
            Ok(answer)
        }

        async fn grant(&self, entity: &EntityId, item: &ItemId) -> std::result::Result<(), StoreError> {
            self.inner.grant(entity, item).await
        }

        async fn load_active_set(&self, entity: &EntityId) -> std::result::Result<BTreeSet<ItemId>, StoreError> {
            self.inner.load_active_set(entity).await
        }

        async fn save_active_set(
            &self,
            entity: &EntityId,
            active: &BTreeSet<ItemId>,
        ) -> std::result::Result<(), StoreError> {
            self.inner.save_active_set(entity, active).await
        }
    }

    fn paid(id: &str) -> ItemDefinition {
        ItemDefinition::new(id, Category::Hat, 100, Arc::new(NoopEffect))
    }

    fn free(id: &str) -> ItemDefinition {
        ItemDefinition::new(id, Category::Hat, 0, Arc::new(NoopEffect))
    }

    #[tokio::test]
    async fn test_free_items_short_circuit() {
        let store = Arc::new(MemoryOwnershipStore::new().with_available(false));
        let oracle = OwnershipOracle::with_defaults(store);
        let entity = EntityId::new();

        assert!(oracle.owns(&entity, &free("hat_red")).await);
        assert_eq!(oracle.stats().misses, 0);
    }

    #[tokio::test]
    async fn test_cache_hit_after_first_query() {
        let store = Arc::new(MemoryOwnershipStore::new());
        let oracle = OwnershipOracle::with_defaults(store.clone());
        let entity = EntityId::new();
        store.grant(&entity, &"hat_blue".into()).await.unwrap();

        assert!(oracle.owns(&entity, &paid("hat_blue")).await);
        assert!(oracle.owns(&entity, &paid("hat_blue")).await);

        let stats = oracle.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
    }

    #[tokio::test]
    async fn test_grant_updates_cached_answer() {
        let store = Arc::new(MemoryOwnershipStore::new());
        let oracle = OwnershipOracle::with_defaults(store);
        let entity = EntityId::new();
        let item = paid("hat_blue");

        assert!(!oracle.owns(&entity, &item).await);
        oracle.grant(&entity, &item.id).await.unwrap();
        oracle.grant(&entity, &item.id).await.unwrap();
        assert!(oracle.owns(&entity, &item).await);
    }

    #[tokio::test]
    async fn test_grant_wins_over_in_flight_query() {
        let store = Arc::new(GatedStore::default());
        let oracle = Arc::new(OwnershipOracle::with_defaults(store.clone()));
        let entity = EntityId::new();

        let query = {
            let oracle = Arc::clone(&oracle);
            tokio::spawn(async move { oracle.owns(&entity, &paid("hat_blue")).await })
        };
        store.parked.notified().await;
        oracle.grant(&entity, &"hat_blue".into()).await.unwrap();
        store.release.notify_one();

        // The in-flight answer predates the grant
        assert!(!query.await.unwrap());
        assert!(oracle.owns(&entity, &paid("hat_blue")).await);
        assert!(oracle.owns(&entity, &paid("hat_blue")).await);
        assert!(store.inner.owns(&entity, &"hat_blue".into()).await.unwrap());
    }

    #[tokio::test]
    async fn test_try_owns_does_not_fill_cache() {
        let store = Arc::new(MemoryOwnershipStore::new());
        let oracle = OwnershipOracle::with_defaults(store);
        let entity = EntityId::new();

        assert!(!oracle.try_owns(&entity, &paid("hat_blue")).await.unwrap());
        assert_eq!(oracle.cached_entities(), 0);
    }

    #[tokio::test]
    async fn test_store_failure_fails_closed() {
        let store = Arc::new(MemoryOwnershipStore::new());
        let entity = EntityId::new();
        store.grant(&entity, &"hat_blue".into()).await.unwrap();
        store.set_available(false);

        let oracle = OwnershipOracle::with_defaults(store);
        assert!(!oracle.owns(&entity, &paid("hat_blue")).await);

        let err = oracle.try_owns(&entity, &paid("hat_blue")).await.unwrap_err();
        assert!(matches!(err, CosmeticsError::OracleUnavailable(_)));
        assert_eq!(oracle.stats().failures, 2);
        assert_eq!(oracle.cached_entities(), 0);
    }

    #[tokio::test]
    async fn test_slow_store_times_out() {
        let store = Arc::new(MemoryOwnershipStore::new().with_latency(Duration::from_millis(200)));
        let entity = EntityId::new();
        store.grant(&entity, &"hat_blue".into()).await.unwrap();

        let config = OracleConfig {
            timeout_ms: 20,
            ..Default::default()
        };
        let oracle = OwnershipOracle::new(store, config);

        assert!(!oracle.owns(&entity, &paid("hat_blue")).await);
        assert_eq!(oracle.stats().timeouts, 1);
    }

    #[tokio::test]
    async fn test_invalidate_drops_cache() {
        let store = Arc::new(MemoryOwnershipStore::new());
        let oracle = OwnershipOracle::with_defaults(store);
        let entity = EntityId::new();

        oracle.owns(&entity, &paid("hat_blue")).await;
        assert_eq!(oracle.cached_entities(), 1);
        oracle.invalidate(&entity);
        assert_eq!(oracle.cached_entities(), 0);
    }

    #[tokio::test]
    async fn test_probe_leaves_cache_untouched() {
        let store = Arc::new(MemoryOwnershipStore::new());
        let oracle = OwnershipOracle::with_defaults(store.clone());
        let entity = EntityId::new();
        store.grant(&entity, &"hat_blue".into()).await.unwrap();

        assert!(oracle.probe(&entity, &paid("hat_blue")).await);
        assert!(!oracle.probe(&entity, &paid("dragon")).await);
        assert_eq!(oracle.cached_entities(), 0);
    }
}
