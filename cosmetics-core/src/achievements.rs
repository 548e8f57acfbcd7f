//! Achievements - predicate-based unlocks with credit rewards.
//!
//! Each definition pairs a [`Condition`] with a reward. [`AchievementEvaluator::check_all`]
//! gathers a read-only view of the entity (owned items, active items,
//! scores), evaluates every definition not yet granted in insertion order,
//! and records each unlock exactly once.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::catalog::{Catalog, CatalogStore};
use crate::config::AchievementConfig;
use crate::error::{CosmeticsError, Result, StoreError};
use crate::events::EventSink;
use crate::ownership::OwnershipOracle;
use crate::registry::ActivationRegistry;
use crate::types::{AchievementId, Category, EntityId, ItemId};

// ============================================================================
// Scores
// ============================================================================

/// Running per-entity counters kept by the statistics collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreCounter {
    ItemsActivated,
    ItemsPurchased,
    CreditsSpent,
    CreditsEarned,
    Unlocks,
}

impl ScoreCounter {
    pub const ALL: [ScoreCounter; 5] = [
        ScoreCounter::ItemsActivated,
        ScoreCounter::ItemsPurchased,
        ScoreCounter::CreditsSpent,
        ScoreCounter::CreditsEarned,
        ScoreCounter::Unlocks,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScoreCounter::ItemsActivated => "items_activated",
            ScoreCounter::ItemsPurchased => "items_purchased",
            ScoreCounter::CreditsSpent => "credits_spent",
            ScoreCounter::CreditsEarned => "credits_earned",
            ScoreCounter::Unlocks => "unlocks",
        }
    }
}

/// Read access to score counters.
pub trait ScoreSource: Send + Sync {
    fn score(&self, entity: &EntityId, counter: ScoreCounter) -> u64;
}

// ============================================================================
// Conditions
// ============================================================================

/// Unlock predicate, written in configuration with a `type` tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    /// Owns one specific item
    OwnsItem { item: ItemId },
    /// Owns every item of a category. An empty category never satisfies it.
    Collector { category: Category },
    /// Owns at least this many paid items
    OwnedCount { at_least: usize },
    /// Has at least this many items active
    ActiveCount { at_least: usize },
    /// A score counter reached a threshold
    Score { counter: ScoreCounter, at_least: u64 },
    /// Every nested condition holds
    All { of: Vec<Condition> },
    /// At least one nested condition holds
    Any { of: Vec<Condition> },
}

/// Everything a condition may look at for one entity.
pub struct Facts<'a> {
    pub entity: EntityId,
    /// Owned items, free ones included
    pub owned: HashSet<ItemId>,
    pub active: BTreeSet<ItemId>,
    pub catalog: Arc<CatalogStore>,
    pub scores: &'a dyn ScoreSource,
}

impl Condition {
    pub fn evaluate(&self, facts: &Facts<'_>) -> bool {
        match self {
            Condition::OwnsItem { item } => facts.owned.contains(item),
            Condition::Collector { category } => {
                let items = facts.catalog.list_by_category(*category);
                !items.is_empty() && items.iter().all(|d| facts.owned.contains(&d.id))
            }
            Condition::OwnedCount { at_least } => {
                let paid = facts
                    .owned
                    .iter()
                    .filter(|id| facts.catalog.get(id).map_or(false, |d| !d.is_free()))
                    .count();
                paid >= *at_least
            }
            Condition::ActiveCount { at_least } => facts.active.len() >= *at_least,
            Condition::Score { counter, at_least } => {
                facts.scores.score(&facts.entity, *counter) >= *at_least
            }
            Condition::All { of } => of.iter().all(|c| c.evaluate(facts)),
            Condition::Any { of } => of.iter().any(|c| c.evaluate(facts)),
        }
    }

    /// Whether evaluation needs the owned set.
    fn reads_ownership(&self) -> bool {
        match self {
            Condition::OwnsItem { .. } | Condition::Collector { .. } | Condition::OwnedCount { .. } => true,
            Condition::ActiveCount { .. } | Condition::Score { .. } => false,
            Condition::All { of } | Condition::Any { of } => of.iter().any(Condition::reads_ownership),
        }
    }
}

// ============================================================================
// Definitions and unlock records
// ============================================================================

/// Immutable achievement definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AchievementDefinition {
    pub id: AchievementId,
    pub name: String,
    /// Credits paid out on unlock
    pub reward: u64,
    pub condition: Condition,
}

impl AchievementDefinition {
    pub fn new(id: impl Into<AchievementId>, condition: Condition) -> Self {
        let id = id.into();
        Self {
            name: id.to_string(),
            id,
            reward: 0,
            condition,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_reward(mut self, reward: u64) -> Self {
        self.reward = reward;
        self
    }
}

impl From<&AchievementConfig> for AchievementDefinition {
    fn from(config: &AchievementConfig) -> Self {
        AchievementDefinition::new(config.id.as_str(), config.condition.clone())
            .with_name(config.name.clone())
            .with_reward(config.reward)
    }
}

/// One granted achievement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlockRecord {
    pub achievement: AchievementId,
    pub granted_at: DateTime<Utc>,
}

/// Append-only record of granted achievements.
#[async_trait]
pub trait AchievementStore: Send + Sync {
    async fn is_granted(&self, entity: &EntityId, id: &AchievementId) -> std::result::Result<bool, StoreError>;

    /// Record a grant. Returns false if it was already recorded.
    async fn try_grant(&self, entity: &EntityId, id: &AchievementId) -> std::result::Result<bool, StoreError>;

    /// Every grant for an entity.
    async fn granted(&self, entity: &EntityId) -> std::result::Result<Vec<UnlockRecord>, StoreError>;
}

/// Achievement store held in memory.
#[derive(Default)]
pub struct MemoryAchievementStore {
    unlocks: DashMap<EntityId, BTreeMap<AchievementId, DateTime<Utc>>>,
}

impl MemoryAchievementStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AchievementStore for MemoryAchievementStore {
    async fn is_granted(&self, entity: &EntityId, id: &AchievementId) -> std::result::Result<bool, StoreError> {
        Ok(self
            .unlocks
            .get(entity)
            .map(|u| u.contains_key(id))
            .unwrap_or(false))
    }

    async fn try_grant(&self, entity: &EntityId, id: &AchievementId) -> std::result::Result<bool, StoreError> {
        // The entry guard makes check-and-insert atomic per entity
        let mut unlocks = self.unlocks.entry(*entity).or_default();
        if unlocks.contains_key(id) {
            return Ok(false);
        }
        unlocks.insert(id.clone(), Utc::now());
        Ok(true)
    }

    async fn granted(&self, entity: &EntityId) -> std::result::Result<Vec<UnlockRecord>, StoreError> {
        let mut records: Vec<UnlockRecord> = self
            .unlocks
            .get(entity)
            .map(|u| {
                u.iter()
                    .map(|(id, at)| UnlockRecord {
                        achievement: id.clone(),
                        granted_at: *at,
                    })
                    .collect()
            })
            .unwrap_or_default();
        records.sort_by_key(|r| r.granted_at);
        Ok(records)
    }
}

// ============================================================================
// Evaluator
// ============================================================================

/// Evaluates achievement conditions and grants unlocks.
pub struct AchievementEvaluator {
    definitions: Vec<AchievementDefinition>,
    catalog: Arc<Catalog>,
    oracle: Arc<OwnershipOracle>,
    registry: Arc<ActivationRegistry>,
    scores: Arc<dyn ScoreSource>,
    store: Arc<dyn AchievementStore>,
    events: Arc<dyn EventSink>,
}

impl AchievementEvaluator {
    pub fn new(
        registry: Arc<ActivationRegistry>,
        scores: Arc<dyn ScoreSource>,
        store: Arc<dyn AchievementStore>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            definitions: Vec::new(),
            catalog: Arc::clone(registry.catalog()),
            oracle: Arc::clone(registry.oracle()),
            registry,
            scores,
            store,
            events,
        }
    }

    /// Add a definition. Evaluation follows registration order.
    pub fn register(&mut self, definition: AchievementDefinition) -> Result<()> {
        if self.definitions.iter().any(|d| d.id == definition.id) {
            return Err(CosmeticsError::Config(format!(
                "duplicate achievement id: {}",
                definition.id
            )));
        }
        self.definitions.push(definition);
        Ok(())
    }

    /// Register every configured achievement.
    pub fn with_config(mut self, achievements: &[AchievementConfig]) -> Result<Self> {
        for config in achievements {
            self.register(AchievementDefinition::from(config))?;
        }
        debug!(count = self.definitions.len(), "Achievements registered");
        Ok(self)
    }

    pub fn definitions(&self) -> &[AchievementDefinition] {
        &self.definitions
    }

    pub fn get(&self, id: &AchievementId) -> Option<&AchievementDefinition> {
        self.definitions.iter().find(|d| &d.id == id)
    }

    /// Unlocks recorded for an entity.
    pub async fn granted(&self, entity: &EntityId) -> Result<Vec<UnlockRecord>> {
        Ok(self.store.granted(entity).await?)
    }

    /// Grant every achievement whose condition now holds.
    ///
    /// Already-granted achievements are skipped without evaluation. Returns
    /// the ids granted by this call.
    pub async fn check_all(&self, entity: &EntityId) -> Result<Vec<AchievementId>> {
        let mut pending = Vec::new();
        for definition in &self.definitions {
            if !self.store.is_granted(entity, &definition.id).await? {
                pending.push(definition);
            }
        }
        if pending.is_empty() {
            return Ok(Vec::new());
        }

        let needs_ownership = pending.iter().any(|d| d.condition.reads_ownership());
        let facts = self.gather(entity, needs_ownership).await;

        let mut granted = Vec::new();
        for definition in pending {
            if !definition.condition.evaluate(&facts) {
                continue;
            }
            if self.store.try_grant(entity, &definition.id).await? {
                info!(
                    entity = %entity,
                    achievement = %definition.id,
                    reward = definition.reward,
                    "Achievement unlocked"
                );
                self.events
                    .on_achievement_granted(entity, &definition.id, definition.reward);
                granted.push(definition.id.clone());
            }
        }
        Ok(granted)
    }

    async fn gather(&self, entity: &EntityId, with_ownership: bool) -> Facts<'_> {
        let catalog = self.catalog.snapshot();
        let mut owned = HashSet::new();
        if with_ownership {
            for definition in catalog.all() {
                if self.oracle.probe(entity, &definition).await {
                    owned.insert(definition.id.clone());
                }
            }
        }

        Facts {
            entity: *entity,
            owned,
            active: self.registry.get_active(entity),
            catalog,
            scores: self.scores.as_ref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::StaticPermissions;
    use crate::catalog::ItemDefinition;
    use crate::effects::NoopEffect;
    use crate::ownership::{MemoryOwnershipStore, OwnershipStore};
    use crate::primary::PrimaryContext;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    #[derive(Default)]
    struct FixedScores {
        spent: AtomicU64,
    }

    impl ScoreSource for FixedScores {
        fn score(&self, _entity: &EntityId, counter: ScoreCounter) -> u64 {
            match counter {
                ScoreCounter::CreditsSpent => self.spent.load(Ordering::SeqCst),
                _ => 0,
            }
        }
    }

    #[derive(Default)]
    struct Rewards {
        granted: AtomicUsize,
        credits: AtomicU64,
    }

    impl EventSink for Rewards {
        fn on_activated(&self, _entity: &EntityId, _item: &ItemId) {}
        fn on_deactivated(&self, _entity: &EntityId, _item: &ItemId) {}
        fn on_achievement_granted(&self, _entity: &EntityId, _achievement: &AchievementId, reward: u64) {
            self.granted.fetch_add(1, Ordering::SeqCst);
            self.credits.fetch_add(reward, Ordering::SeqCst);
        }
    }

    struct Fixture {
        evaluator: AchievementEvaluator,
        ownership: Arc<MemoryOwnershipStore>,
        scores: Arc<FixedScores>,
        rewards: Arc<Rewards>,
    }

    fn fixture(definitions: Vec<AchievementDefinition>) -> Fixture {
        let mut catalog = CatalogStore::new();
        for (id, category, cost) in [
            ("hat_red", Category::Hat, 0),
            ("hat_blue", Category::Hat, 100),
            ("dragon", Category::Pet, 300),
        ] {
            catalog
                .register(ItemDefinition::new(id, category, cost, Arc::new(NoopEffect)))
                .unwrap();
        }

        let ownership = Arc::new(MemoryOwnershipStore::new());
        let registry = Arc::new(ActivationRegistry::new(
            Arc::new(Catalog::new(catalog)),
            Arc::new(OwnershipOracle::with_defaults(ownership.clone())),
            Arc::new(StaticPermissions::new()),
            Arc::new(crate::events::NullSink),
            Arc::new(PrimaryContext::start("achievement-test").unwrap()),
        ));

        let scores = Arc::new(FixedScores::default());
        let rewards = Arc::new(Rewards::default());
        let mut evaluator = AchievementEvaluator::new(
            registry,
            scores.clone(),
            Arc::new(MemoryAchievementStore::new()),
            rewards.clone(),
        );
        for definition in definitions {
            evaluator.register(definition).unwrap();
        }

        Fixture {
            evaluator,
            ownership,
            scores,
            rewards,
        }
    }

    #[tokio::test]
    async fn test_grants_once() {
        let f = fixture(vec![AchievementDefinition::new(
            "first_hat",
            Condition::OwnsItem { item: "hat_red".into() },
        )
        .with_reward(25)]);
        let entity = EntityId::new();

        let first = f.evaluator.check_all(&entity).await.unwrap();
        let second = f.evaluator.check_all(&entity).await.unwrap();

        assert_eq!(first, vec![AchievementId::from("first_hat")]);
        assert!(second.is_empty());
        assert_eq!(f.rewards.granted.load(Ordering::SeqCst), 1);
        assert_eq!(f.rewards.credits.load(Ordering::SeqCst), 25);
        assert_eq!(f.evaluator.granted(&entity).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_collector_requires_every_item() {
        let f = fixture(vec![
            AchievementDefinition::new("milliner", Condition::Collector { category: Category::Hat }),
            AchievementDefinition::new("emoter", Condition::Collector { category: Category::Emote }),
        ]);
        let entity = EntityId::new();

        assert!(f.evaluator.check_all(&entity).await.unwrap().is_empty());

        f.ownership.grant(&entity, &"hat_blue".into()).await.unwrap();
        let granted = f.evaluator.check_all(&entity).await.unwrap();
        assert_eq!(granted, vec![AchievementId::from("milliner")]);
    }

    #[tokio::test]
    async fn test_owned_count_ignores_free_items() {
        let f = fixture(vec![AchievementDefinition::new(
            "shopper",
            Condition::OwnedCount { at_least: 1 },
        )]);
        let entity = EntityId::new();

        assert!(f.evaluator.check_all(&entity).await.unwrap().is_empty());
        f.ownership.grant(&entity, &"dragon".into()).await.unwrap();
        assert_eq!(f.evaluator.check_all(&entity).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_composite_and_score() {
        let f = fixture(vec![AchievementDefinition::new(
            "patron",
            Condition::All {
                of: vec![
                    Condition::Score {
                        counter: ScoreCounter::CreditsSpent,
                        at_least: 1000,
                    },
                    Condition::Any {
                        of: vec![
                            Condition::OwnsItem { item: "dragon".into() },
                            Condition::ActiveCount { at_least: 5 },
                        ],
                    },
                ],
            },
        )]);
        let entity = EntityId::new();
        f.ownership.grant(&entity, &"dragon".into()).await.unwrap();

        assert!(f.evaluator.check_all(&entity).await.unwrap().is_empty());
        f.scores.spent.store(1000, Ordering::SeqCst);
        assert_eq!(f.evaluator.check_all(&entity).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_evaluation_leaves_oracle_cache_empty() {
        let f = fixture(vec![AchievementDefinition::new(
            "dragon_tamer",
            Condition::OwnsItem { item: "dragon".into() },
        )]);
        f.evaluator.check_all(&EntityId::new()).await.unwrap();
        assert_eq!(f.evaluator.oracle.cached_entities(), 0);
    }

    #[test]
    fn test_duplicate_definition_rejected() {
        let mut f = fixture(vec![AchievementDefinition::new(
            "a",
            Condition::ActiveCount { at_least: 1 },
        )]);
        let err = f
            .evaluator
            .register(AchievementDefinition::new("a", Condition::ActiveCount { at_least: 2 }))
            .unwrap_err();
        assert!(matches!(err, CosmeticsError::Config(_)));
    }

    #[test]
    fn test_condition_yaml() {
        let yaml = r#"
type: any
of:
  - type: owns_item
    item: dragon
  - type: score
    counter: unlocks
    at_least: 3
"#;
        let condition: Condition = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            condition,
            Condition::Any {
                of: vec![
                    Condition::OwnsItem { item: "dragon".into() },
                    Condition::Score {
                        counter: ScoreCounter::Unlocks,
                        at_least: 3,
                    },
                ],
            }
        );
    }
}
