//! Side effects bound to catalog items.
//!
//! A side effect is the category-specific behavior that runs when an item is
//! activated or deactivated for an entity (a particle loop, an inventory slot
//! swap, a spawned companion). Implementations are supplied by the host's
//! rendering layer; the core composes them into item definitions and invokes
//! them on the primary execution context.

mod repeating;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::trace;

use crate::config::EffectsConfig;
use crate::error::SideEffectError;
use crate::locks::EntityLocks;
use crate::primary::PrimaryContext;
use crate::types::{Category, EntityId, ItemId};

pub use repeating::{RepeatingEffect, TickFn};

/// Behavior run on activation and deactivation of an item.
///
/// Both hooks run on the primary context while the registry holds the
/// entity's exclusion scope. They must not block on that scope themselves.
pub trait SideEffect: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Apply the effect. A failure aborts the activation.
    fn on_activate(&self, ctx: &EffectContext) -> Result<(), SideEffectError>;

    /// Tear the effect down. A failure is logged and state is cleared anyway.
    fn on_deactivate(&self, ctx: &EffectContext) -> Result<(), SideEffectError>;
}

/// Everything a side effect needs to know about one activation.
#[derive(Clone)]
pub struct EffectContext {
    /// Entity the effect applies to
    pub entity: EntityId,
    /// Item being (de)activated
    pub item: ItemId,
    /// Category of the item
    pub category: Category,
    locks: EntityLocks,
    primary: Arc<PrimaryContext>,
}

impl EffectContext {
    pub fn new(
        entity: EntityId,
        item: ItemId,
        category: Category,
        locks: EntityLocks,
        primary: Arc<PrimaryContext>,
    ) -> Self {
        Self {
            entity,
            item,
            category,
            locks,
            primary,
        }
    }

    /// Per-entity exclusion scopes shared with the registry.
    pub fn locks(&self) -> &EntityLocks {
        &self.locks
    }

    /// The primary execution context.
    pub fn primary(&self) -> &Arc<PrimaryContext> {
        &self.primary
    }
}

/// Effect that does nothing. Default binding for unbound categories.
pub struct NoopEffect;

impl SideEffect for NoopEffect {
    fn name(&self) -> &str {
        "noop"
    }

    fn on_activate(&self, _ctx: &EffectContext) -> Result<(), SideEffectError> {
        Ok(())
    }

    fn on_deactivate(&self, _ctx: &EffectContext) -> Result<(), SideEffectError> {
        Ok(())
    }
}

/// Maps categories (and optionally single items) to side effects.
///
/// Used when building a catalog from configuration: each item gets the
/// effect bound to its id, else the one bound to its category, else
/// [`NoopEffect`].
#[derive(Clone)]
pub struct EffectBinder {
    by_category: HashMap<Category, Arc<dyn SideEffect>>,
    by_item: HashMap<ItemId, Arc<dyn SideEffect>>,
    fallback: Arc<dyn SideEffect>,
}

impl EffectBinder {
    pub fn new() -> Self {
        Self {
            by_category: HashMap::new(),
            by_item: HashMap::new(),
            fallback: Arc::new(NoopEffect),
        }
    }

    /// Bind an effect to every item of a category.
    pub fn bind(mut self, category: Category, effect: Arc<dyn SideEffect>) -> Self {
        self.by_category.insert(category, effect);
        self
    }

    /// Bind an effect to a single item, overriding its category binding.
    pub fn bind_item(mut self, item: impl Into<ItemId>, effect: Arc<dyn SideEffect>) -> Self {
        self.by_item.insert(item.into(), effect);
        self
    }

    /// Binder for a host without a rendering layer: particles and trails
    /// tick at the configured interval and log each frame, everything else
    /// is a no-op.
    pub fn standard(config: &EffectsConfig) -> Self {
        let interval = Duration::from_millis(config.tick_interval_ms.max(1));
        let frame: TickFn = Arc::new(|entity: &EntityId, item: &ItemId| {
            trace!(entity = %entity, item = %item, "Effect frame");
            Ok(())
        });

        Self::new()
            .bind(
                Category::Particle,
                Arc::new(RepeatingEffect::new("particle", interval, Arc::clone(&frame))),
            )
            .bind(
                Category::Trail,
                Arc::new(RepeatingEffect::new("trail", interval, frame)),
            )
    }

    /// Resolve the effect for an item.
    pub fn effect_for(&self, item: &ItemId, category: Category) -> Arc<dyn SideEffect> {
        self.by_item
            .get(item)
            .or_else(|| self.by_category.get(&category))
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.fallback))
    }
}

impl Default for EffectBinder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    impl SideEffect for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn on_activate(&self, _ctx: &EffectContext) -> Result<(), SideEffectError> {
            Ok(())
        }

        fn on_deactivate(&self, _ctx: &EffectContext) -> Result<(), SideEffectError> {
            Ok(())
        }
    }

    #[test]
    fn test_binder_resolution_order() {
        let binder = EffectBinder::new()
            .bind(Category::Pet, Arc::new(Named("pet")))
            .bind_item("dragon", Arc::new(Named("dragon")));

        assert_eq!(binder.effect_for(&"dragon".into(), Category::Pet).name(), "dragon");
        assert_eq!(binder.effect_for(&"cat".into(), Category::Pet).name(), "pet");
        assert_eq!(binder.effect_for(&"crown".into(), Category::Hat).name(), "noop");
    }

    #[test]
    fn test_standard_binder() {
        let binder = EffectBinder::standard(&EffectsConfig::default());
        assert_eq!(binder.effect_for(&"sparkle".into(), Category::Particle).name(), "particle");
        assert_eq!(binder.effect_for(&"flame".into(), Category::Trail).name(), "trail");
        assert_eq!(binder.effect_for(&"dragon".into(), Category::Pet).name(), "noop");
    }
}
