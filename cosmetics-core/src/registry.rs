//! Activation registry - which items each entity currently has active.
//!
//! Per entity the registry holds a category -> item map with at most one
//! item per category. Every transition (activate, deactivate, toggle,
//! clear) runs inside that entity's exclusion scope, so commands for one
//! entity apply in arrival order and never interleave their
//! read-modify-write of a slot. Reads never take the scope: they clone the
//! entity's current immutable snapshot, which transitions replace wholesale.
//!
//! Side effects are invoked on the primary execution context. An activation
//! whose side effect fails is not recorded; a deactivation always clears
//! state even if its side effect fails.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::access::PermissionResolver;
use crate::catalog::{Catalog, ItemDefinition};
use crate::effects::EffectContext;
use crate::error::{CosmeticsError, Result, SideEffectError};
use crate::events::EventSink;
use crate::locks::EntityLocks;
use crate::ownership::OwnershipOracle;
use crate::primary::PrimaryContext;
use crate::types::{ActivationOutcome, Category, EntityId, ItemId};

/// One entity's active items, at most one per category.
///
/// Each slot keeps the definition the item was activated with, so teardown
/// runs the same side effect even after a catalog reload rebinds or drops
/// the item.
#[derive(Clone, Default)]
pub struct ActiveSlots {
    by_category: BTreeMap<Category, Arc<ItemDefinition>>,
    by_item: HashMap<ItemId, Category>,
}

impl ActiveSlots {
    /// Definition active in a category.
    pub fn get(&self, category: Category) -> Option<&Arc<ItemDefinition>> {
        self.by_category.get(&category)
    }

    pub fn contains(&self, item: &ItemId) -> bool {
        self.by_item.contains_key(item)
    }

    /// Category an active item occupies.
    pub fn category_of(&self, item: &ItemId) -> Option<Category> {
        self.by_item.get(item).copied()
    }

    pub fn item_ids(&self) -> BTreeSet<ItemId> {
        self.by_item.keys().cloned().collect()
    }

    pub fn definitions(&self) -> impl Iterator<Item = &Arc<ItemDefinition>> {
        self.by_category.values()
    }

    pub fn len(&self) -> usize {
        self.by_category.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_category.is_empty()
    }

    fn insert(&mut self, definition: Arc<ItemDefinition>) {
        self.remove(definition.category);
        self.by_item.insert(definition.id.clone(), definition.category);
        self.by_category.insert(definition.category, definition);
    }

    fn remove(&mut self, category: Category) -> Option<Arc<ItemDefinition>> {
        let removed = self.by_category.remove(&category)?;
        self.by_item.remove(&removed.id);
        Some(removed)
    }
}

#[derive(Clone, Copy)]
enum Phase {
    Activate,
    Deactivate,
}

/// Tracks and mutates per-entity activation state.
pub struct ActivationRegistry {
    catalog: Arc<Catalog>,
    oracle: Arc<OwnershipOracle>,
    permissions: Arc<dyn PermissionResolver>,
    events: Arc<dyn EventSink>,
    primary: Arc<PrimaryContext>,
    locks: EntityLocks,
    /// Immutable snapshot per tracked entity
    states: DashMap<EntityId, Arc<ActiveSlots>>,
}

impl ActivationRegistry {
    pub fn new(
        catalog: Arc<Catalog>,
        oracle: Arc<OwnershipOracle>,
        permissions: Arc<dyn PermissionResolver>,
        events: Arc<dyn EventSink>,
        primary: Arc<PrimaryContext>,
    ) -> Self {
        Self {
            catalog,
            oracle,
            permissions,
            events,
            primary,
            locks: EntityLocks::new(),
            states: DashMap::new(),
        }
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn oracle(&self) -> &Arc<OwnershipOracle> {
        &self.oracle
    }

    /// Exclusion scopes shared with periodic effects and the shop.
    pub fn locks(&self) -> &EntityLocks {
        &self.locks
    }

    // =========================================================================
    // Tracking
    // =========================================================================

    /// Start tracking an entity with no active items.
    ///
    /// Returns false if the entity was already tracked.
    pub fn open(&self, entity: &EntityId) -> bool {
        let mut opened = false;
        self.states.entry(*entity).or_insert_with(|| {
            opened = true;
            Arc::new(ActiveSlots::default())
        });
        if opened {
            debug!(entity = %entity, "Tracking entity");
        }
        opened
    }

    pub fn has_entity(&self, entity: &EntityId) -> bool {
        self.states.contains_key(entity)
    }

    /// Entities currently tracked.
    pub fn tracked_entities(&self) -> Vec<EntityId> {
        self.states.iter().map(|e| *e.key()).collect()
    }

    /// Tear down every active item and stop tracking the entity.
    ///
    /// Returns the set that was active just before teardown, or `None` if
    /// the entity was not tracked. Snapshot, teardown and removal happen in
    /// one exclusion scope, so nothing activated concurrently is lost from
    /// the snapshot or left running.
    pub async fn release(&self, entity: &EntityId) -> Option<BTreeSet<ItemId>> {
        let guard = self.locks.lock(entity).await;
        let slots = self.slots(entity)?;
        let snapshot = slots.item_ids();

        self.teardown_all(entity, &slots).await;
        self.states.remove(entity);
        drop(guard);
        self.locks.forget(entity);

        debug!(entity = %entity, items = snapshot.len(), "Stopped tracking entity");
        Some(snapshot)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Copy of the entity's active item ids.
    pub fn get_active(&self, entity: &EntityId) -> BTreeSet<ItemId> {
        self.slots(entity)
            .map(|s| s.item_ids())
            .unwrap_or_default()
    }

    /// The entity's current slots snapshot.
    pub fn slots(&self, entity: &EntityId) -> Option<Arc<ActiveSlots>> {
        self.states.get(entity).map(|s| s.value().clone())
    }

    pub fn is_active(&self, entity: &EntityId, item: &ItemId) -> bool {
        self.states
            .get(entity)
            .map(|s| s.contains(item))
            .unwrap_or(false)
    }

    /// Item active in a category, if any.
    pub fn active_in(&self, entity: &EntityId, category: Category) -> Option<ItemId> {
        self.states
            .get(entity)
            .and_then(|s| s.get(category).map(|d| d.id.clone()))
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Activate an item, pre-empting whatever is active in its category.
    ///
    /// Re-activating the active item is a no-op that runs no side effect.
    pub async fn activate(&self, entity: &EntityId, item: &ItemId) -> Result<ActivationOutcome> {
        let _guard = self.locks.lock(entity).await;
        self.activate_locked(entity, item).await
    }

    /// Activate only if `admit` still holds once the entity's scope is held.
    ///
    /// Returns `Ok(None)` when not admitted. Session restoration uses this to
    /// become a no-op once the session it belongs to has ended.
    pub async fn activate_if<F>(
        &self,
        entity: &EntityId,
        item: &ItemId,
        admit: F,
    ) -> Result<Option<ActivationOutcome>>
    where
        F: FnOnce() -> bool + Send,
    {
        let _guard = self.locks.lock(entity).await;
        if !admit() {
            debug!(entity = %entity, item = %item, "Activation no longer admitted");
            return Ok(None);
        }
        self.activate_locked(entity, item).await.map(Some)
    }

    /// Deactivate an item. Returns false if it was not active.
    pub async fn deactivate(&self, entity: &EntityId, item: &ItemId) -> Result<bool> {
        let _guard = self.locks.lock(entity).await;
        Ok(self.deactivate_locked(entity, item).await)
    }

    /// Flip an item's state. Returns whether it is active afterwards.
    pub async fn toggle(&self, entity: &EntityId, item: &ItemId) -> Result<bool> {
        let _guard = self.locks.lock(entity).await;
        if self.is_active(entity, item) {
            self.deactivate_locked(entity, item).await;
            Ok(false)
        } else {
            self.activate_locked(entity, item).await?;
            Ok(true)
        }
    }

    /// Deactivate everything active for the entity.
    ///
    /// Best effort: a failing teardown is logged and the rest continue.
    /// Returns the ids that were cleared.
    pub async fn clear_all(&self, entity: &EntityId) -> BTreeSet<ItemId> {
        let _guard = self.locks.lock(entity).await;
        let Some(slots) = self.slots(entity) else {
            return BTreeSet::new();
        };

        self.teardown_all(entity, &slots).await;
        self.states.insert(*entity, Arc::new(ActiveSlots::default()));
        slots.item_ids()
    }

    // =========================================================================
    // Transitions (entity scope held)
    // =========================================================================

    async fn activate_locked(&self, entity: &EntityId, item: &ItemId) -> Result<ActivationOutcome> {
        let slots = self
            .slots(entity)
            .ok_or(CosmeticsError::NoSession(*entity))?;
        let definition = self.catalog.snapshot().require(item)?;

        if slots.category_of(item) == Some(definition.category) {
            return Ok(ActivationOutcome::AlreadyActive);
        }

        if !self.oracle.owns(entity, &definition).await {
            return Err(CosmeticsError::NotOwned {
                entity: *entity,
                item: item.clone(),
            });
        }

        let attrs = self.permissions.attributes(entity);
        if !definition.access.allows(&attrs) {
            return Err(CosmeticsError::AccessDenied {
                entity: *entity,
                item: item.clone(),
            });
        }

        // Pre-empt the category's occupant, and the item itself if a reload
        // moved it to another category
        let mut next = (*slots).clone();
        let moved = next.category_of(item).and_then(|c| next.remove(c));
        let occupant = next.remove(definition.category);
        let displaced: Vec<Arc<ItemDefinition>> = moved.into_iter().chain(occupant.clone()).collect();
        for previous in &displaced {
            self.teardown(entity, previous).await;
        }

        if let Err(source) = self.run_effect(entity, &definition, Phase::Activate).await {
            warn!(entity = %entity, item = %item, error = %source, "Activation side effect failed");
            self.restore_displaced(entity, &slots, displaced).await;
            return Err(CosmeticsError::ActivationSideEffectFailed {
                item: item.clone(),
                source,
            });
        }

        next.insert(Arc::clone(&definition));
        self.states.insert(*entity, Arc::new(next));
        for previous in &displaced {
            self.events.on_deactivated(entity, &previous.id);
        }
        self.events.on_activated(entity, item);

        let replaced = occupant.map(|d| d.id.clone());
        info!(
            entity = %entity,
            item = %item,
            category = %definition.category,
            replaced = ?replaced.as_ref().map(|r| r.as_str()),
            "Activated"
        );
        Ok(ActivationOutcome::Activated { replaced })
    }

    /// Put pre-empted items back after their replacement failed to activate.
    ///
    /// A restored item never left as far as observers are concerned, so no
    /// event is emitted for it. One that cannot be restored is gone and is
    /// reported as deactivated.
    async fn restore_displaced(
        &self,
        entity: &EntityId,
        original: &ActiveSlots,
        displaced: Vec<Arc<ItemDefinition>>,
    ) {
        let mut restored = original.clone();
        for previous in displaced {
            match self.run_effect(entity, &previous, Phase::Activate).await {
                Ok(()) => {
                    debug!(entity = %entity, item = %previous.id, "Restored pre-empted item");
                }
                Err(e) => {
                    warn!(entity = %entity, item = %previous.id, error = %e, "Could not restore pre-empted item");
                    restored.remove(previous.category);
                    self.events.on_deactivated(entity, &previous.id);
                }
            }
        }
        self.states.insert(*entity, Arc::new(restored));
    }

    async fn deactivate_locked(&self, entity: &EntityId, item: &ItemId) -> bool {
        let Some(slots) = self.slots(entity) else {
            return false;
        };
        let Some(category) = slots.category_of(item) else {
            return false;
        };

        let mut next = (*slots).clone();
        let Some(definition) = next.remove(category) else {
            return false;
        };
        self.teardown(entity, &definition).await;

        self.states.insert(*entity, Arc::new(next));
        self.events.on_deactivated(entity, item);

        info!(entity = %entity, item = %item, "Deactivated");
        true
    }

    async fn teardown_all(&self, entity: &EntityId, slots: &ActiveSlots) {
        for definition in slots.definitions() {
            self.teardown(entity, definition).await;
            self.events.on_deactivated(entity, &definition.id);
        }
    }

    /// Run an item's deactivation side effect, logging instead of failing.
    async fn teardown(&self, entity: &EntityId, definition: &Arc<ItemDefinition>) {
        if let Err(e) = self.run_effect(entity, definition, Phase::Deactivate).await {
            warn!(entity = %entity, item = %definition.id, error = %e, "Deactivation side effect failed, state cleared anyway");
        }
    }

    async fn run_effect(
        &self,
        entity: &EntityId,
        definition: &Arc<ItemDefinition>,
        phase: Phase,
    ) -> std::result::Result<(), SideEffectError> {
        let ctx = EffectContext::new(
            *entity,
            definition.id.clone(),
            definition.category,
            self.locks.clone(),
            Arc::clone(&self.primary),
        );
        let effect = Arc::clone(&definition.side_effect);
        let invoke = move || match phase {
            Phase::Activate => effect.on_activate(&ctx),
            Phase::Deactivate => effect.on_deactivate(&ctx),
        };

        if self.primary.is_current() {
            return invoke();
        }
        self.primary.run(invoke).await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::StaticPermissions;
    use crate::catalog::CatalogStore;
    use crate::events::NullSink;
    use crate::mock::{EffectCall, EffectLog, MockEffect};
    use crate::ownership::{MemoryOwnershipStore, OwnershipStore};
    use crate::types::{AccessRule, EntityAttributes};

    struct Fixture {
        registry: ActivationRegistry,
        store: Arc<MemoryOwnershipStore>,
        permissions: Arc<StaticPermissions>,
        log: Arc<EffectLog>,
        flaky: Arc<MockEffect>,
    }

    fn fixture() -> Fixture {
        let log = EffectLog::new();
        let effect = Arc::new(MockEffect::new("mock", log.clone()));
        let flaky = Arc::new(MockEffect::new("flaky", log.clone()));

        let mut store = CatalogStore::new();
        store.register(ItemDefinition::new("hat_red", Category::Hat, 0, effect.clone())).unwrap();
        store.register(ItemDefinition::new("hat_blue", Category::Hat, 100, effect.clone())).unwrap();
        store.register(ItemDefinition::new("hat_glitch", Category::Hat, 0, flaky.clone())).unwrap();
        store.register(ItemDefinition::new("flame", Category::Trail, 0, effect.clone())).unwrap();
        store
            .register(
                ItemDefinition::new("wings_gold", Category::Wings, 0, effect.clone()).with_access(
                    AccessRule {
                        required_flags: vec!["vip".to_string()],
                        min_tier: None,
                    },
                ),
            )
            .unwrap();

        let ownership = Arc::new(MemoryOwnershipStore::new());
        let permissions = Arc::new(StaticPermissions::new());
        let registry = ActivationRegistry::new(
            Arc::new(Catalog::new(store)),
            Arc::new(OwnershipOracle::with_defaults(ownership.clone())),
            permissions.clone(),
            Arc::new(NullSink),
            Arc::new(PrimaryContext::start("registry-test").unwrap()),
        );

        Fixture {
            registry,
            store: ownership,
            permissions,
            log,
            flaky,
        }
    }

    fn id(s: &str) -> ItemId {
        ItemId::new(s)
    }

    #[tokio::test]
    async fn test_activate_requires_session() {
        let f = fixture();
        let entity = EntityId::new();

        let err = f.registry.activate(&entity, &id("hat_red")).await.unwrap_err();
        assert!(matches!(err, CosmeticsError::NoSession(_)));
    }

    #[tokio::test]
    async fn test_activate_unknown_item() {
        let f = fixture();
        let entity = EntityId::new();
        f.registry.open(&entity);

        let err = f.registry.activate(&entity, &id("cape")).await.unwrap_err();
        assert!(matches!(err, CosmeticsError::UnknownItem(_)));
        assert!(f.log.calls().is_empty());
    }

    #[tokio::test]
    async fn test_activate_is_idempotent() {
        let f = fixture();
        let entity = EntityId::new();
        f.registry.open(&entity);

        let first = f.registry.activate(&entity, &id("hat_red")).await.unwrap();
        let second = f.registry.activate(&entity, &id("hat_red")).await.unwrap();

        assert_eq!(first, ActivationOutcome::Activated { replaced: None });
        assert_eq!(second, ActivationOutcome::AlreadyActive);
        assert_eq!(f.log.activations("hat_red"), 1);
        assert!(f.registry.is_active(&entity, &id("hat_red")));
    }

    #[tokio::test]
    async fn test_preemption_order() {
        let f = fixture();
        let entity = EntityId::new();
        f.registry.open(&entity);
        f.store.grant(&entity, &id("hat_blue")).await.unwrap();

        f.registry.activate(&entity, &id("hat_red")).await.unwrap();
        f.log.clear();
        let outcome = f.registry.activate(&entity, &id("hat_blue")).await.unwrap();

        assert_eq!(outcome, ActivationOutcome::Activated { replaced: Some(id("hat_red")) });
        assert_eq!(
            f.log.calls(),
            vec![
                EffectCall::Deactivate { entity, item: id("hat_red") },
                EffectCall::Activate { entity, item: id("hat_blue") },
            ]
        );
        assert_eq!(f.registry.get_active(&entity), BTreeSet::from([id("hat_blue")]));
    }

    #[tokio::test]
    async fn test_access_rule_denies() {
        let f = fixture();
        let entity = EntityId::new();
        f.registry.open(&entity);

        let err = f.registry.activate(&entity, &id("wings_gold")).await.unwrap_err();
        assert!(matches!(err, CosmeticsError::AccessDenied { .. }));

        f.permissions.set(entity, EntityAttributes::default().with_flag("vip"));
        assert!(f.registry.activate(&entity, &id("wings_gold")).await.unwrap().changed());
    }

    #[tokio::test]
    async fn test_failed_side_effect_leaves_state_unchanged() {
        let f = fixture();
        let entity = EntityId::new();
        f.registry.open(&entity);
        f.flaky.set_fail_activate(true);

        let err = f.registry.activate(&entity, &id("hat_glitch")).await.unwrap_err();
        assert!(matches!(err, CosmeticsError::ActivationSideEffectFailed { .. }));
        assert!(f.registry.get_active(&entity).is_empty());
    }

    #[tokio::test]
    async fn test_failed_replacement_restores_previous() {
        let f = fixture();
        let entity = EntityId::new();
        f.registry.open(&entity);
        f.flaky.set_fail_activate(true);

        f.registry.activate(&entity, &id("hat_red")).await.unwrap();
        let err = f.registry.activate(&entity, &id("hat_glitch")).await.unwrap_err();

        assert!(matches!(err, CosmeticsError::ActivationSideEffectFailed { .. }));
        assert_eq!(f.registry.get_active(&entity), BTreeSet::from([id("hat_red")]));
        assert_eq!(f.log.activations("hat_red"), 2);
        assert_eq!(f.log.deactivations("hat_red"), 1);
    }

    #[tokio::test]
    async fn test_deactivate_failure_still_clears() {
        let f = fixture();
        let entity = EntityId::new();
        f.registry.open(&entity);

        f.registry.activate(&entity, &id("hat_glitch")).await.unwrap();
        f.flaky.set_fail_deactivate(true);

        assert!(f.registry.deactivate(&entity, &id("hat_glitch")).await.unwrap());
        assert!(f.registry.get_active(&entity).is_empty());
        assert!(!f.registry.deactivate(&entity, &id("hat_glitch")).await.unwrap());
    }

    #[tokio::test]
    async fn test_toggle() {
        let f = fixture();
        let entity = EntityId::new();
        f.registry.open(&entity);

        assert!(f.registry.toggle(&entity, &id("flame")).await.unwrap());
        assert!(f.registry.is_active(&entity, &id("flame")));
        assert!(!f.registry.toggle(&entity, &id("flame")).await.unwrap());
        assert!(!f.registry.is_active(&entity, &id("flame")));
    }

    #[tokio::test]
    async fn test_clear_all_continues_past_failures() {
        let f = fixture();
        let entity = EntityId::new();
        f.registry.open(&entity);

        f.registry.activate(&entity, &id("hat_glitch")).await.unwrap();
        f.registry.activate(&entity, &id("flame")).await.unwrap();
        f.flaky.set_fail_deactivate(true);

        let cleared = f.registry.clear_all(&entity).await;
        assert_eq!(cleared.len(), 2);
        assert_eq!(f.log.deactivations("flame"), 1);
        assert!(f.registry.get_active(&entity).is_empty());
        assert!(f.registry.has_entity(&entity));
    }

    #[tokio::test]
    async fn test_release_returns_snapshot_and_stops_tracking() {
        let f = fixture();
        let entity = EntityId::new();
        f.registry.open(&entity);
        f.registry.activate(&entity, &id("hat_red")).await.unwrap();
        f.registry.activate(&entity, &id("flame")).await.unwrap();

        let snapshot = f.registry.release(&entity).await.unwrap();
        assert_eq!(snapshot, BTreeSet::from([id("hat_red"), id("flame")]));
        assert!(!f.registry.has_entity(&entity));
        assert_eq!(f.log.deactivations("hat_red"), 1);
        assert_eq!(f.log.deactivations("flame"), 1);
        assert!(f.registry.release(&entity).await.is_none());
    }

    #[tokio::test]
    async fn test_teardown_survives_catalog_reload() {
        let f = fixture();
        let entity = EntityId::new();
        f.registry.open(&entity);
        f.registry.activate(&entity, &id("flame")).await.unwrap();

        f.registry.catalog().reload(CatalogStore::new());
        assert!(f.registry.is_active(&entity, &id("flame")));
        assert_eq!(f.registry.active_in(&entity, Category::Trail), Some(id("flame")));

        assert!(f.registry.deactivate(&entity, &id("flame")).await.unwrap());
        assert_eq!(f.log.deactivations("flame"), 1);
        assert!(!f.registry.is_active(&entity, &id("flame")));
    }

    #[tokio::test]
    async fn test_reload_moving_item_to_other_category() {
        let f = fixture();
        let entity = EntityId::new();
        f.registry.open(&entity);
        f.registry.activate(&entity, &id("hat_red")).await.unwrap();

        let effect = Arc::new(MockEffect::new("moved", f.log.clone()));
        let mut store = CatalogStore::new();
        store.register(ItemDefinition::new("hat_red", Category::Pet, 0, effect)).unwrap();
        f.registry.catalog().reload(store);

        let outcome = f.registry.activate(&entity, &id("hat_red")).await.unwrap();
        assert_eq!(outcome, ActivationOutcome::Activated { replaced: None });
        assert_eq!(f.registry.active_in(&entity, Category::Hat), None);
        assert_eq!(f.registry.active_in(&entity, Category::Pet), Some(id("hat_red")));
        assert_eq!(f.registry.get_active(&entity).len(), 1);
        assert_eq!(f.log.deactivations("hat_red"), 1);
    }

    #[tokio::test]
    async fn test_activate_if_not_admitted() {
        let f = fixture();
        let entity = EntityId::new();
        f.registry.open(&entity);

        let outcome = f.registry.activate_if(&entity, &id("hat_red"), || false).await.unwrap();
        assert!(outcome.is_none());
        assert!(f.log.calls().is_empty());
    }
}
