//! JSON file ownership store.
//!
//! One file per entity under the data directory, named `<uuid>.json`:
//!
//! ```json
//! { "owned": ["hat_blue"], "active": ["hat_blue", "flame"] }
//! ```
//!
//! Writes go to a temporary file and are renamed into place, so a crash
//! mid-write leaves the previous record intact.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use super::{EntityRecord, OwnershipStore};
use crate::error::StoreError;
use crate::types::{EntityId, ItemId};

pub struct JsonFileStore {
    dir: PathBuf,
    /// Serialises read-modify-write cycles
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        debug!(dir = %dir.display(), "Opened JSON ownership store");
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, entity: &EntityId) -> PathBuf {
        self.dir.join(format!("{}.json", entity))
    }

    /// Read an entity's record; a missing file is an empty record.
    pub async fn read(&self, entity: &EntityId) -> Result<EntityRecord, StoreError> {
        match tokio::fs::read(self.path_for(entity)).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(EntityRecord::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, entity: &EntityId, record: &EntityRecord) -> Result<(), StoreError> {
        let path = self.path_for(entity);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(record)?;
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn update<F>(&self, entity: &EntityId, apply: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut EntityRecord) -> bool + Send,
    {
        let _guard = self.write_lock.lock().await;
        let mut record = self.read(entity).await?;
        if apply(&mut record) {
            self.write(entity, &record).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl OwnershipStore for JsonFileStore {
    async fn owns(&self, entity: &EntityId, item: &ItemId) -> Result<bool, StoreError> {
        Ok(self.read(entity).await?.owned.contains(item))
    }

    async fn grant(&self, entity: &EntityId, item: &ItemId) -> Result<(), StoreError> {
        self.update(entity, |record| record.owned.insert(item.clone()))
            .await
    }

    async fn load_active_set(&self, entity: &EntityId) -> Result<BTreeSet<ItemId>, StoreError> {
        Ok(self.read(entity).await?.active)
    }

    async fn save_active_set(
        &self,
        entity: &EntityId,
        active: &BTreeSet<ItemId>,
    ) -> Result<(), StoreError> {
        self.update(entity, |record| {
            record.active = active.clone();
            true
        })
        .await
    }
}
