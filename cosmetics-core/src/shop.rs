//! Credits and purchases.
//!
//! The credit balance lives in an external [`CreditLedger`]. [`Shop`] turns
//! credits into ownership; [`RewardPayout`] turns achievement rewards into
//! credits.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{info, warn};

use crate::access::PermissionResolver;
use crate::error::{CosmeticsError, Result};
use crate::events::EventSink;
use crate::registry::ActivationRegistry;
use crate::types::{AchievementId, EntityId, ItemId};

/// Persistent credit balances.
#[async_trait]
pub trait CreditLedger: Send + Sync {
    async fn balance(&self, entity: &EntityId) -> Result<u64>;

    /// Take `amount` credits. Fails with `InsufficientCredits` and leaves the
    /// balance untouched if it cannot be covered. Returns the new balance.
    async fn withdraw(&self, entity: &EntityId, amount: u64) -> Result<u64>;

    /// Add `amount` credits. Returns the new balance.
    async fn deposit(&self, entity: &EntityId, amount: u64) -> Result<u64>;
}

/// Credit balances held in memory.
#[derive(Default)]
pub struct MemoryCreditLedger {
    balances: DashMap<EntityId, u64>,
    starting_balance: u64,
}

impl MemoryCreditLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Balance credited to entities on first sight.
    pub fn with_starting_balance(mut self, credits: u64) -> Self {
        self.starting_balance = credits;
        self
    }
}

#[async_trait]
impl CreditLedger for MemoryCreditLedger {
    async fn balance(&self, entity: &EntityId) -> Result<u64> {
        Ok(self
            .balances
            .get(entity)
            .map(|b| *b)
            .unwrap_or(self.starting_balance))
    }

    async fn withdraw(&self, entity: &EntityId, amount: u64) -> Result<u64> {
        let mut balance = self.balances.entry(*entity).or_insert(self.starting_balance);
        if *balance < amount {
            return Err(CosmeticsError::InsufficientCredits {
                needed: amount,
                available: *balance,
            });
        }
        *balance -= amount;
        Ok(*balance)
    }

    async fn deposit(&self, entity: &EntityId, amount: u64) -> Result<u64> {
        let mut balance = self.balances.entry(*entity).or_insert(self.starting_balance);
        *balance = balance.saturating_add(amount);
        Ok(*balance)
    }
}

/// Result of a completed purchase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseReceipt {
    pub item: ItemId,
    pub cost: u64,
    /// Balance after the withdrawal
    pub balance: u64,
}

/// Sells catalog items for credits.
///
/// Purchases run in the registry's exclusion scope for the entity, so a
/// purchase and an activation for one entity never interleave.
pub struct Shop {
    registry: Arc<ActivationRegistry>,
    permissions: Arc<dyn PermissionResolver>,
    credits: Arc<dyn CreditLedger>,
    events: Arc<dyn EventSink>,
}

impl Shop {
    pub fn new(
        registry: Arc<ActivationRegistry>,
        permissions: Arc<dyn PermissionResolver>,
        credits: Arc<dyn CreditLedger>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            registry,
            permissions,
            credits,
            events,
        }
    }

    pub fn credits(&self) -> &Arc<dyn CreditLedger> {
        &self.credits
    }

    /// Buy an item.
    ///
    /// Free items are owned by everyone and cannot be bought. Ownership is
    /// checked strictly: if the oracle cannot answer, nothing is charged.
    pub async fn purchase(&self, entity: &EntityId, item: &ItemId) -> Result<PurchaseReceipt> {
        let locks = self.registry.locks();
        let guard = locks.lock(entity).await;
        let result = self.purchase_locked(entity, item).await;
        drop(guard);

        // Entities without a session have nobody to forget their slot
        if !self.registry.has_entity(entity) {
            locks.forget(entity);
        }
        result
    }

    async fn purchase_locked(&self, entity: &EntityId, item: &ItemId) -> Result<PurchaseReceipt> {
        let oracle = self.registry.oracle();
        let definition = self.registry.catalog().snapshot().require(item)?;

        if definition.is_free() || oracle.try_owns(entity, &definition).await? {
            return Err(CosmeticsError::AlreadyOwned(item.clone()));
        }

        let attrs = self.permissions.attributes(entity);
        if !definition.access.allows(&attrs) {
            return Err(CosmeticsError::AccessDenied {
                entity: *entity,
                item: item.clone(),
            });
        }

        let balance = self.credits.withdraw(entity, definition.cost).await?;

        if let Err(e) = oracle.grant(entity, item).await {
            warn!(entity = %entity, item = %item, error = %e, "Grant failed after charge, refunding");
            if let Err(refund) = self.credits.deposit(entity, definition.cost).await {
                warn!(entity = %entity, cost = definition.cost, error = %refund, "Refund failed");
            }
            return Err(e);
        }

        self.events.on_purchased(entity, item, definition.cost);
        info!(entity = %entity, item = %item, cost = definition.cost, balance, "Purchase completed");

        Ok(PurchaseReceipt {
            item: item.clone(),
            cost: definition.cost,
            balance,
        })
    }
}

/// Deposits achievement rewards into the credit ledger.
///
/// Event hooks are synchronous, so each deposit runs as a background task
/// on the current tokio runtime.
pub struct RewardPayout {
    credits: Arc<dyn CreditLedger>,
}

impl RewardPayout {
    pub fn new(credits: Arc<dyn CreditLedger>) -> Self {
        Self { credits }
    }
}

impl EventSink for RewardPayout {
    fn on_activated(&self, _entity: &EntityId, _item: &ItemId) {}

    fn on_deactivated(&self, _entity: &EntityId, _item: &ItemId) {}

    fn on_achievement_granted(&self, entity: &EntityId, achievement: &AchievementId, reward: u64) {
        if reward == 0 {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(entity = %entity, achievement = %achievement, reward, "No runtime, reward not paid");
            return;
        };

        let credits = Arc::clone(&self.credits);
        let (entity, achievement) = (*entity, achievement.clone());
        runtime.spawn(async move {
            match credits.deposit(&entity, reward).await {
                Ok(balance) => info!(entity = %entity, achievement = %achievement, reward, balance, "Reward paid"),
                Err(e) => warn!(entity = %entity, achievement = %achievement, error = %e, "Reward payout failed"),
            }
        });
    }
}
