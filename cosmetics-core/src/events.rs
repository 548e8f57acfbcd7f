//! Events emitted by the core.
//!
//! Statistics, rewards and any other bookkeeping hang off these hooks; the
//! core itself never writes to a score ledger.

use std::sync::Arc;

use tracing::info;

use crate::types::{AchievementId, EntityId, ItemId};

/// Receiver of core events. Hooks are synchronous and must not block.
pub trait EventSink: Send + Sync {
    /// An item became active.
    fn on_activated(&self, entity: &EntityId, item: &ItemId);

    /// An item stopped being active.
    fn on_deactivated(&self, entity: &EntityId, item: &ItemId);

    /// An achievement was unlocked; `reward` credits are due.
    fn on_achievement_granted(&self, entity: &EntityId, achievement: &AchievementId, reward: u64);

    /// An item was bought.
    fn on_purchased(&self, _entity: &EntityId, _item: &ItemId, _cost: u64) {}
}

/// Sink that drops every event.
pub struct NullSink;

impl EventSink for NullSink {
    fn on_activated(&self, _entity: &EntityId, _item: &ItemId) {}
    fn on_deactivated(&self, _entity: &EntityId, _item: &ItemId) {}
    fn on_achievement_granted(&self, _entity: &EntityId, _achievement: &AchievementId, _reward: u64) {}
}

/// Sink that logs every event at info level.
pub struct LoggingSink;

impl EventSink for LoggingSink {
    fn on_activated(&self, entity: &EntityId, item: &ItemId) {
        info!(entity = %entity, item = %item, "Cosmetic activated");
    }

    fn on_deactivated(&self, entity: &EntityId, item: &ItemId) {
        info!(entity = %entity, item = %item, "Cosmetic deactivated");
    }

    fn on_achievement_granted(&self, entity: &EntityId, achievement: &AchievementId, reward: u64) {
        info!(entity = %entity, achievement = %achievement, reward, "Achievement granted");
    }

    fn on_purchased(&self, entity: &EntityId, item: &ItemId, cost: u64) {
        info!(entity = %entity, item = %item, cost, "Cosmetic purchased");
    }
}

/// Forwards each event to every registered sink, in registration order.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl EventSink for FanoutSink {
    fn on_activated(&self, entity: &EntityId, item: &ItemId) {
        for sink in &self.sinks {
            sink.on_activated(entity, item);
        }
    }

    fn on_deactivated(&self, entity: &EntityId, item: &ItemId) {
        for sink in &self.sinks {
            sink.on_deactivated(entity, item);
        }
    }

    fn on_achievement_granted(&self, entity: &EntityId, achievement: &AchievementId, reward: u64) {
        for sink in &self.sinks {
            sink.on_achievement_granted(entity, achievement, reward);
        }
    }

    fn on_purchased(&self, entity: &EntityId, item: &ItemId, cost: u64) {
        for sink in &self.sinks {
            sink.on_purchased(entity, item, cost);
        }
    }
}
