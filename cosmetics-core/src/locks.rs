//! Per-entity exclusion scopes.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::types::EntityId;

/// Guard held for the duration of one entity's state transition.
pub type EntityGuard = OwnedMutexGuard<()>;

/// One async mutex per entity.
///
/// Transitions for the same entity queue in arrival order (tokio's mutex is
/// fair); different entities never contend.
#[derive(Clone, Default)]
pub struct EntityLocks {
    locks: Arc<DashMap<EntityId, Arc<Mutex<()>>>>,
}

impl EntityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, entity: &EntityId) -> Arc<Mutex<()>> {
        self.locks.entry(*entity).or_default().clone()
    }

    /// Wait for the entity's scope.
    pub async fn lock(&self, entity: &EntityId) -> EntityGuard {
        self.slot(entity).lock_owned().await
    }

    /// Take the entity's scope only if it is free right now.
    pub fn try_lock(&self, entity: &EntityId) -> Option<EntityGuard> {
        self.slot(entity).try_lock_owned().ok()
    }

    /// Drop the entity's slot once its session is gone.
    ///
    /// The slot is kept while anyone still holds or waits on it, so two
    /// holders can never exist for one entity.
    pub fn forget(&self, entity: &EntityId) {
        self.locks
            .remove_if(entity, |_, slot| Arc::strong_count(slot) == 1);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_same_entity_excludes() {
        let locks = EntityLocks::new();
        let entity = EntityId::new();

        let guard = locks.lock(&entity).await;
        assert!(locks.try_lock(&entity).is_none());
        drop(guard);
        assert!(locks.try_lock(&entity).is_some());
    }

    #[tokio::test]
    async fn test_different_entities_do_not_contend() {
        let locks = EntityLocks::new();
        let a = EntityId::new();
        let b = EntityId::new();

        let _guard = locks.lock(&a).await;
        assert!(locks.try_lock(&b).is_some());
    }

    #[tokio::test]
    async fn test_forget_removes_slot() {
        let locks = EntityLocks::new();
        let entity = EntityId::new();

        let guard = locks.lock(&entity).await;
        locks.forget(&entity);
        assert_eq!(locks.len(), 1);

        drop(guard);
        locks.forget(&entity);
        assert!(locks.is_empty());
    }
}
