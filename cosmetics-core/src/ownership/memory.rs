//! In-memory ownership store.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use super::{EntityRecord, OwnershipStore};
use crate::error::StoreError;
use crate::types::{EntityId, ItemId};

/// Ownership store held entirely in memory.
///
/// Availability and latency are adjustable so callers can exercise the
/// oracle's fail-closed and timeout paths.
pub struct MemoryOwnershipStore {
    records: DashMap<EntityId, EntityRecord>,
    available: AtomicBool,
    latency: Option<Duration>,
}

impl MemoryOwnershipStore {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            available: AtomicBool::new(true),
            latency: None,
        }
    }

    /// Set availability.
    pub fn with_available(self, available: bool) -> Self {
        self.available.store(available, Ordering::SeqCst);
        self
    }

    /// Delay every call by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Copy of an entity's record.
    pub fn record(&self, entity: &EntityId) -> EntityRecord {
        self.records
            .get(entity)
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    async fn enter(&self) -> Result<(), StoreError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store disabled".to_string()))
        }
    }
}

impl Default for MemoryOwnershipStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OwnershipStore for MemoryOwnershipStore {
    async fn owns(&self, entity: &EntityId, item: &ItemId) -> Result<bool, StoreError> {
        self.enter().await?;
        Ok(self
            .records
            .get(entity)
            .map(|r| r.owned.contains(item))
            .unwrap_or(false))
    }

    async fn grant(&self, entity: &EntityId, item: &ItemId) -> Result<(), StoreError> {
        self.enter().await?;
        self.records
            .entry(*entity)
            .or_default()
            .owned
            .insert(item.clone());
        Ok(())
    }

    async fn load_active_set(&self, entity: &EntityId) -> Result<BTreeSet<ItemId>, StoreError> {
        self.enter().await?;
        Ok(self.record(entity).active)
    }

    async fn save_active_set(
        &self,
        entity: &EntityId,
        active: &BTreeSet<ItemId>,
    ) -> Result<(), StoreError> {
        self.enter().await?;
        self.records.entry(*entity).or_default().active = active.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_grant_is_idempotent() {
        let store = MemoryOwnershipStore::new();
        let entity = EntityId::new();
        let item = ItemId::new("hat_blue");

        store.grant(&entity, &item).await.unwrap();
        store.grant(&entity, &item).await.unwrap();

        assert!(store.owns(&entity, &item).await.unwrap());
        assert_eq!(store.record(&entity).owned.len(), 1);
    }

    #[tokio::test]
    async fn test_active_set_roundtrip() {
        let store = MemoryOwnershipStore::new();
        let entity = EntityId::new();
        let active: BTreeSet<ItemId> = ["hat_red", "flame"].into_iter().map(ItemId::from).collect();

        assert!(store.load_active_set(&entity).await.unwrap().is_empty());
        store.save_active_set(&entity, &active).await.unwrap();
        assert_eq!(store.load_active_set(&entity).await.unwrap(), active);
    }

    #[tokio::test]
    async fn test_unavailable_store_errors() {
        let store = MemoryOwnershipStore::new().with_available(false);
        let err = store.owns(&EntityId::new(), &"x".into()).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }
}
