//! Entity attribute resolution for access rules.

use dashmap::DashMap;

use crate::types::{EntityAttributes, EntityId};

/// Resolves the attributes (flags, tier) of an entity.
///
/// The host's permission system implements this; the core only compares the
/// result against each item's [`AccessRule`](crate::types::AccessRule).
pub trait PermissionResolver: Send + Sync {
    fn attributes(&self, entity: &EntityId) -> EntityAttributes;
}

/// Resolver backed by an explicit table, with a default for unknown entities.
#[derive(Default)]
pub struct StaticPermissions {
    table: DashMap<EntityId, EntityAttributes>,
    fallback: EntityAttributes,
}

impl StaticPermissions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attributes for entities without an entry.
    pub fn with_fallback(mut self, fallback: EntityAttributes) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn set(&self, entity: EntityId, attrs: EntityAttributes) {
        self.table.insert(entity, attrs);
    }

    pub fn remove(&self, entity: &EntityId) {
        self.table.remove(entity);
    }
}

impl PermissionResolver for StaticPermissions {
    fn attributes(&self, entity: &EntityId) -> EntityAttributes {
        self.table
            .get(entity)
            .map(|a| a.clone())
            .unwrap_or_else(|| self.fallback.clone())
    }
}
