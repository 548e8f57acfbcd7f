//! Catalog of known cosmetic items.
//!
//! Definitions are registered once at startup (or reload) and never mutated.
//! Steady-state reads go through an immutable [`CatalogStore`] snapshot; a
//! reload builds a fresh store and swaps it in through [`Catalog`].

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use tracing::info;

use crate::config::ItemConfig;
use crate::effects::{EffectBinder, SideEffect};
use crate::error::{CosmeticsError, Result};
use crate::types::{AccessRule, Category, ItemId};

/// Immutable definition of one cosmetic item.
#[derive(Clone)]
pub struct ItemDefinition {
    /// Globally unique id
    pub id: ItemId,
    /// Display name
    pub name: String,
    /// Category (one active per category)
    pub category: Category,
    /// Price in credits; 0 = free
    pub cost: u64,
    /// Attribute gate checked on activation
    pub access: AccessRule,
    /// Activation/deactivation behavior
    pub side_effect: Arc<dyn SideEffect>,
}

impl ItemDefinition {
    pub fn new(
        id: impl Into<ItemId>,
        category: Category,
        cost: u64,
        side_effect: Arc<dyn SideEffect>,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.to_string(),
            id,
            category,
            cost,
            access: AccessRule::open(),
            side_effect,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_access(mut self, access: AccessRule) -> Self {
        self.access = access;
        self
    }

    /// Free items count as owned by everyone.
    pub fn is_free(&self) -> bool {
        self.cost == 0
    }
}

impl fmt::Debug for ItemDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ItemDefinition")
            .field("id", &self.id)
            .field("category", &self.category)
            .field("cost", &self.cost)
            .field("access", &self.access)
            .field("side_effect", &self.side_effect.name())
            .finish()
    }
}

/// Read access to item definitions.
pub trait CatalogLookup: Send + Sync {
    /// Look up an item by id.
    fn get(&self, id: &ItemId) -> Option<Arc<ItemDefinition>>;

    /// Items of a category, in registration order.
    fn list_by_category(&self, category: Category) -> Vec<Arc<ItemDefinition>>;
}

/// Registry of item definitions, grouped by category.
#[derive(Default)]
pub struct CatalogStore {
    items: HashMap<ItemId, Arc<ItemDefinition>>,
    by_category: HashMap<Category, Vec<ItemId>>,
    order: Vec<ItemId>,
}

impl CatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from configured items, binding side effects by category.
    pub fn from_config(items: &[ItemConfig], binder: &EffectBinder) -> Result<Self> {
        let mut store = Self::new();
        for item in items {
            let id = ItemId::new(item.id.clone());
            let effect = binder.effect_for(&id, item.category);
            let definition = ItemDefinition::new(id, item.category, item.cost, effect)
                .with_name(item.name.clone().unwrap_or_else(|| item.id.clone()))
                .with_access(item.access.clone());
            store.register(definition)?;
        }
        info!(items = store.count(), "Catalog built from configuration");
        Ok(store)
    }

    /// Register a definition. Fails if the id is already present.
    pub fn register(&mut self, definition: ItemDefinition) -> Result<()> {
        if self.items.contains_key(&definition.id) {
            return Err(CosmeticsError::DuplicateId(definition.id));
        }

        let id = definition.id.clone();
        self.by_category
            .entry(definition.category)
            .or_default()
            .push(id.clone());
        self.order.push(id.clone());
        self.items.insert(id, Arc::new(definition));
        Ok(())
    }

    pub fn get(&self, id: &ItemId) -> Option<Arc<ItemDefinition>> {
        self.items.get(id).cloned()
    }

    /// Like [`get`](Self::get) but reports `UnknownItem`.
    pub fn require(&self, id: &ItemId) -> Result<Arc<ItemDefinition>> {
        self.get(id)
            .ok_or_else(|| CosmeticsError::UnknownItem(id.clone()))
    }

    pub fn contains(&self, id: &ItemId) -> bool {
        self.items.contains_key(id)
    }

    pub fn list_by_category(&self, category: Category) -> Vec<Arc<ItemDefinition>> {
        self.by_category
            .get(&category)
            .map(|ids| ids.iter().filter_map(|id| self.items.get(id).cloned()).collect())
            .unwrap_or_default()
    }

    /// All items in registration order.
    pub fn all(&self) -> Vec<Arc<ItemDefinition>> {
        self.order
            .iter()
            .filter_map(|id| self.items.get(id).cloned())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.items.len()
    }

    pub fn count_by_category(&self, category: Category) -> usize {
        self.by_category.get(&category).map_or(0, Vec::len)
    }

    /// Categories that have at least one item.
    pub fn categories(&self) -> Vec<Category> {
        Category::ALL
            .into_iter()
            .filter(|c| self.count_by_category(*c) > 0)
            .collect()
    }
}

impl CatalogLookup for CatalogStore {
    fn get(&self, id: &ItemId) -> Option<Arc<ItemDefinition>> {
        CatalogStore::get(self, id)
    }

    fn list_by_category(&self, category: Category) -> Vec<Arc<ItemDefinition>> {
        CatalogStore::list_by_category(self, category)
    }
}

/// Shared handle to the current catalog.
///
/// Readers take a snapshot `Arc` and work from it; `reload` swaps in a fresh
/// store without disturbing snapshots already handed out.
pub struct Catalog {
    current: RwLock<Arc<CatalogStore>>,
}

impl Catalog {
    pub fn new(store: CatalogStore) -> Self {
        Self {
            current: RwLock::new(Arc::new(store)),
        }
    }

    /// The current store.
    pub fn snapshot(&self) -> Arc<CatalogStore> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        guard.clone()
    }

    /// Swap in a freshly built store.
    pub fn reload(&self, store: CatalogStore) {
        let count = store.count();
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(store);
        info!(items = count, "Catalog reloaded");
    }
}

impl CatalogLookup for Catalog {
    fn get(&self, id: &ItemId) -> Option<Arc<ItemDefinition>> {
        self.snapshot().get(id)
    }

    fn list_by_category(&self, category: Category) -> Vec<Arc<ItemDefinition>> {
        self.snapshot().list_by_category(category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::NoopEffect;

    fn item(id: &str, category: Category, cost: u64) -> ItemDefinition {
        ItemDefinition::new(id, category, cost, Arc::new(NoopEffect))
    }

    #[test]
    fn test_register_and_lookup() {
        let mut store = CatalogStore::new();
        store.register(item("hat_red", Category::Hat, 0)).unwrap();
        store.register(item("hat_blue", Category::Hat, 100)).unwrap();
        store.register(item("flame", Category::Trail, 50)).unwrap();

        assert_eq!(store.count(), 3);
        assert_eq!(store.count_by_category(Category::Hat), 2);
        assert_eq!(store.count_by_category(Category::Pet), 0);
        assert!(store.get(&"flame".into()).is_some());
        assert!(store.get(&"missing".into()).is_none());

        let hats: Vec<_> = store
            .list_by_category(Category::Hat)
            .iter()
            .map(|d| d.id.to_string())
            .collect();
        assert_eq!(hats, vec!["hat_red", "hat_blue"]);
        assert_eq!(store.categories(), vec![Category::Hat, Category::Trail]);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut store = CatalogStore::new();
        store.register(item("hat_red", Category::Hat, 0)).unwrap();

        let err = store.register(item("hat_red", Category::Pet, 5)).unwrap_err();
        assert!(matches!(err, CosmeticsError::DuplicateId(id) if id.as_str() == "hat_red"));
        assert_eq!(store.count_by_category(Category::Pet), 0);
    }

    #[test]
    fn test_require_reports_unknown_item() {
        let store = CatalogStore::new();
        let err = store.require(&"ghost".into()).unwrap_err();
        assert!(matches!(err, CosmeticsError::UnknownItem(_)));
    }

    #[test]
    fn test_reload_keeps_old_snapshots() {
        let mut first = CatalogStore::new();
        first.register(item("hat_red", Category::Hat, 0)).unwrap();
        let catalog = Catalog::new(first);

        let old = catalog.snapshot();
        let mut second = CatalogStore::new();
        second.register(item("wings_gold", Category::Wings, 500)).unwrap();
        catalog.reload(second);

        assert!(old.contains(&"hat_red".into()));
        assert!(!catalog.snapshot().contains(&"hat_red".into()));
        assert!(CatalogLookup::get(&catalog, &"wings_gold".into()).is_some());
    }
}
