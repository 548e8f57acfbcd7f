//! Per-entity statistics, driven entirely by core events.

use std::collections::BTreeMap;

use dashmap::DashMap;

use crate::achievements::{ScoreCounter, ScoreSource};
use crate::events::EventSink;
use crate::types::{AchievementId, EntityId, ItemId};

/// Append-only counters per entity.
///
/// Plugged into the event fan-out as an [`EventSink`] and read back by
/// achievements as a [`ScoreSource`].
#[derive(Default)]
pub struct StatsLedger {
    counters: DashMap<EntityId, BTreeMap<ScoreCounter, u64>>,
}

impl StatsLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `by` to a counter.
    pub fn increment(&self, entity: &EntityId, counter: ScoreCounter, by: u64) {
        if by == 0 {
            return;
        }
        let mut counters = self.counters.entry(*entity).or_default();
        let value = counters.entry(counter).or_insert(0);
        *value = value.saturating_add(by);
    }

    pub fn get(&self, entity: &EntityId, counter: ScoreCounter) -> u64 {
        self.counters
            .get(entity)
            .and_then(|c| c.get(&counter).copied())
            .unwrap_or(0)
    }

    /// Every counter of an entity, zeroes included.
    pub fn snapshot(&self, entity: &EntityId) -> BTreeMap<ScoreCounter, u64> {
        ScoreCounter::ALL
            .into_iter()
            .map(|counter| (counter, self.get(entity, counter)))
            .collect()
    }
}

impl ScoreSource for StatsLedger {
    fn score(&self, entity: &EntityId, counter: ScoreCounter) -> u64 {
        self.get(entity, counter)
    }
}

impl EventSink for StatsLedger {
    fn on_activated(&self, entity: &EntityId, _item: &ItemId) {
        self.increment(entity, ScoreCounter::ItemsActivated, 1);
    }

    fn on_deactivated(&self, _entity: &EntityId, _item: &ItemId) {}

    fn on_achievement_granted(&self, entity: &EntityId, _achievement: &AchievementId, reward: u64) {
        self.increment(entity, ScoreCounter::Unlocks, 1);
        self.increment(entity, ScoreCounter::CreditsEarned, reward);
    }

    fn on_purchased(&self, entity: &EntityId, _item: &ItemId, cost: u64) {
        self.increment(entity, ScoreCounter::ItemsPurchased, 1);
        self.increment(entity, ScoreCounter::CreditsSpent, cost);
    }
}
