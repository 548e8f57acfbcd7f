//! Wiring of every component from configuration.

use std::sync::Arc;

use tracing::info;

use crate::access::{PermissionResolver, StaticPermissions};
use crate::achievements::{AchievementEvaluator, AchievementStore, MemoryAchievementStore};
use crate::catalog::{Catalog, CatalogStore};
use crate::config::{CosmeticsConfig, StorageBackend};
use crate::effects::EffectBinder;
use crate::error::Result;
use crate::events::{EventSink, FanoutSink, LoggingSink};
use crate::lifecycle::LifecycleCoordinator;
use crate::ownership::{JsonFileStore, MemoryOwnershipStore, OwnershipOracle, OwnershipStore};
use crate::primary::PrimaryContext;
use crate::registry::ActivationRegistry;
use crate::shop::{CreditLedger, MemoryCreditLedger, RewardPayout, Shop};
use crate::stats::StatsLedger;

/// Builder for [`CosmeticsService`].
///
/// Collaborators not supplied fall back to the in-memory implementations,
/// except the ownership store, which follows `storage.backend`.
pub struct CosmeticsBuilder {
    config: CosmeticsConfig,
    store: Option<Arc<dyn OwnershipStore>>,
    permissions: Option<Arc<dyn PermissionResolver>>,
    credits: Option<Arc<dyn CreditLedger>>,
    achievements: Option<Arc<dyn AchievementStore>>,
    binder: Option<EffectBinder>,
    sinks: Vec<Arc<dyn EventSink>>,
}

impl CosmeticsBuilder {
    pub fn new(config: CosmeticsConfig) -> Self {
        Self {
            config,
            store: None,
            permissions: None,
            credits: None,
            achievements: None,
            binder: None,
            sinks: Vec::new(),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn OwnershipStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_permissions(mut self, permissions: Arc<dyn PermissionResolver>) -> Self {
        self.permissions = Some(permissions);
        self
    }

    pub fn with_credits(mut self, credits: Arc<dyn CreditLedger>) -> Self {
        self.credits = Some(credits);
        self
    }

    pub fn with_achievement_store(mut self, store: Arc<dyn AchievementStore>) -> Self {
        self.achievements = Some(store);
        self
    }

    pub fn with_binder(mut self, binder: EffectBinder) -> Self {
        self.binder = Some(binder);
        self
    }

    /// Extra event sink, after the built-in ones.
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub async fn build(self) -> Result<CosmeticsService> {
        let config = self.config;

        let store: Arc<dyn OwnershipStore> = match self.store {
            Some(store) => store,
            None => match config.storage.backend {
                StorageBackend::Memory => Arc::new(MemoryOwnershipStore::new()),
                StorageBackend::File => Arc::new(JsonFileStore::open(&config.storage.data_dir).await?),
            },
        };
        let permissions = self
            .permissions
            .unwrap_or_else(|| Arc::new(StaticPermissions::new()));
        let credits = self
            .credits
            .unwrap_or_else(|| Arc::new(MemoryCreditLedger::new()));
        let unlocks = self
            .achievements
            .unwrap_or_else(|| Arc::new(MemoryAchievementStore::new()));
        let binder = self
            .binder
            .unwrap_or_else(|| EffectBinder::standard(&config.effects));

        let catalog = Arc::new(Catalog::new(CatalogStore::from_config(&config.items, &binder)?));
        let oracle = Arc::new(OwnershipOracle::new(Arc::clone(&store), config.oracle.clone()));
        let primary = Arc::new(PrimaryContext::start("cosmetics-primary")?);

        let stats = Arc::new(StatsLedger::new());
        let mut fanout = FanoutSink::new()
            .with(Arc::new(LoggingSink))
            .with(stats.clone())
            .with(Arc::new(RewardPayout::new(Arc::clone(&credits))));
        for sink in self.sinks {
            fanout = fanout.with(sink);
        }
        let events: Arc<dyn EventSink> = Arc::new(fanout);

        let registry = Arc::new(ActivationRegistry::new(
            Arc::clone(&catalog),
            Arc::clone(&oracle),
            Arc::clone(&permissions),
            Arc::clone(&events),
            primary,
        ));
        let lifecycle = Arc::new(LifecycleCoordinator::new(
            Arc::clone(&registry),
            Arc::clone(&store),
            config.lifecycle.clone(),
        ));
        let achievements = Arc::new(
            AchievementEvaluator::new(
                Arc::clone(&registry),
                stats.clone(),
                unlocks,
                Arc::clone(&events),
            )
            .with_config(&config.achievements)?,
        );
        let shop = Arc::new(Shop::new(
            Arc::clone(&registry),
            permissions,
            Arc::clone(&credits),
            events,
        ));

        info!(
            items = catalog.snapshot().count(),
            achievements = achievements.definitions().len(),
            backend = ?config.storage.backend,
            "Cosmetics service ready"
        );

        Ok(CosmeticsService {
            config,
            catalog,
            oracle,
            registry,
            lifecycle,
            achievements,
            shop,
            stats,
            credits,
        })
    }
}

/// Every component, wired together.
pub struct CosmeticsService {
    pub config: CosmeticsConfig,
    pub catalog: Arc<Catalog>,
    pub oracle: Arc<OwnershipOracle>,
    pub registry: Arc<ActivationRegistry>,
    pub lifecycle: Arc<LifecycleCoordinator>,
    pub achievements: Arc<AchievementEvaluator>,
    pub shop: Arc<Shop>,
    pub stats: Arc<StatsLedger>,
    pub credits: Arc<dyn CreditLedger>,
}

impl CosmeticsService {
    pub fn builder(config: CosmeticsConfig) -> CosmeticsBuilder {
        CosmeticsBuilder::new(config)
    }

    /// End every session and flush pending saves.
    pub async fn shutdown(&self) {
        self.lifecycle.shutdown().await;
        info!("Cosmetics service stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EntityId;
    use tempfile::TempDir;

    const CONFIG: &str = r#"
items:
  - id: hat_red
    category: hat
  - id: sparkle
    category: particle
achievements:
  - id: dressed
    name: Dressed Up
    reward: 10
    condition:
      type: active_count
      at_least: 2
"#;

    #[tokio::test]
    async fn test_build_from_yaml() {
        let config = CosmeticsConfig::from_yaml(CONFIG).unwrap();
        let service = CosmeticsService::builder(config).build().await.unwrap();
        let entity = EntityId::new();

        service.lifecycle.on_session_start(entity).await.await.unwrap();
        service.registry.activate(&entity, &"hat_red".into()).await.unwrap();
        service.registry.activate(&entity, &"sparkle".into()).await.unwrap();

        let unlocked = service.achievements.check_all(&entity).await.unwrap();
        assert_eq!(unlocked.len(), 1);
        assert_eq!(service.stats.get(&entity, crate::achievements::ScoreCounter::Unlocks), 1);

        service.shutdown().await;
        assert!(!service.registry.has_entity(&entity));
    }

    #[tokio::test]
    async fn test_file_backend_persists() {
        let dir = TempDir::new().unwrap();
        let mut config = CosmeticsConfig::from_yaml(CONFIG).unwrap();
        config.storage.backend = StorageBackend::File;
        config.storage.data_dir = dir.path().to_path_buf();
        let entity = EntityId::new();

        {
            let service = CosmeticsService::builder(config.clone()).build().await.unwrap();
            service.lifecycle.on_session_start(entity).await.await.unwrap();
            service.registry.activate(&entity, &"hat_red".into()).await.unwrap();
            service.shutdown().await;
        }

        let service = CosmeticsService::builder(config).build().await.unwrap();
        let summary = service.lifecycle.on_session_start(entity).await.await.unwrap();
        assert_eq!(summary.restored, vec![crate::types::ItemId::from("hat_red")]);
        service.shutdown().await;
    }
}
