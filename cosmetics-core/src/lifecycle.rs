//! Session lifecycle - restore on join, persist and tear down on leave.
//!
//! Per entity: `Absent -> Loading -> Active -> Saving -> Absent`.
//!
//! Restoration runs as a background task: it waits for any save still in
//! flight for the entity, loads the persisted active set off the primary
//! context, then activates each item through the registry. Every
//! restoration step is tagged with the session's generation and re-checked
//! inside the entity's exclusion scope, so a restoration that completes
//! after its session ended is a no-op.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::LifecycleConfig;
use crate::locks::EntityLocks;
use crate::ownership::OwnershipStore;
use crate::registry::ActivationRegistry;
use crate::types::{EntityId, ItemId, SessionState};

/// Outcome of restoring one session's persisted items.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreSummary {
    /// Items active again
    pub restored: Vec<ItemId>,
    /// Items that failed re-validation and were dropped
    pub dropped: Vec<ItemId>,
    /// The session ended before restoration finished
    pub cancelled: bool,
    /// A session was already live, nothing was started
    pub already_live: bool,
}

#[derive(Debug, Clone, Copy)]
struct Session {
    generation: u64,
    state: SessionState,
}

/// Save spawned at session end. The task removes its own entry when done,
/// unless a newer session's save has replaced it.
struct PendingSave {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Reacts to session boundaries for every entity.
pub struct LifecycleCoordinator {
    registry: Arc<ActivationRegistry>,
    store: Arc<dyn OwnershipStore>,
    config: LifecycleConfig,
    sessions: Arc<DashMap<EntityId, Session>>,
    generation: AtomicU64,
    /// Serialises start/end for one entity
    transitions: EntityLocks,
    /// Saves spawned at session end and still running
    pending_saves: Arc<DashMap<EntityId, PendingSave>>,
}

impl LifecycleCoordinator {
    pub fn new(
        registry: Arc<ActivationRegistry>,
        store: Arc<dyn OwnershipStore>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            registry,
            store,
            config,
            sessions: Arc::new(DashMap::new()),
            generation: AtomicU64::new(0),
            transitions: EntityLocks::new(),
            pending_saves: Arc::new(DashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<ActivationRegistry> {
        &self.registry
    }

    /// Current session state of an entity.
    pub fn state(&self, entity: &EntityId) -> SessionState {
        self.sessions
            .get(entity)
            .map(|s| s.state)
            .unwrap_or_default()
    }

    /// Entities with a live session.
    pub fn sessions(&self) -> Vec<EntityId> {
        self.sessions.iter().map(|s| *s.key()).collect()
    }

    /// Number of saves still in flight.
    pub fn pending_saves(&self) -> usize {
        self.pending_saves.len()
    }

    /// Begin a session and restore its persisted items in the background.
    ///
    /// Commands may be issued as soon as this returns. The handle resolves
    /// once every persisted item has been attempted.
    pub async fn on_session_start(&self, entity: EntityId) -> JoinHandle<RestoreSummary> {
        let _transition = self.transitions.lock(&entity).await;

        if self.sessions.contains_key(&entity) {
            debug!(entity = %entity, "Session already live, ignoring start");
            return tokio::spawn(async {
                RestoreSummary {
                    already_live: true,
                    ..RestoreSummary::default()
                }
            });
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.sessions.insert(
            entity,
            Session {
                generation,
                state: SessionState::Loading,
            },
        );
        self.registry.open(&entity);
        info!(entity = %entity, generation, "Session started");

        let previous_save = self.pending_saves.remove(&entity).map(|(_, save)| save.handle);
        let restore = Restore {
            entity,
            generation,
            enabled: self.config.restore_on_join,
            registry: Arc::clone(&self.registry),
            store: Arc::clone(&self.store),
            sessions: Arc::clone(&self.sessions),
        };

        tokio::spawn(async move {
            if let Some(save) = previous_save {
                if let Err(e) = save.await {
                    warn!(entity = %entity, error = %e, "Previous save task failed");
                }
            }
            restore.run().await
        })
    }

    /// End a session: snapshot, tear down, release state, persist.
    ///
    /// Teardown completes before this returns; the write to the store runs
    /// in the background. Returns the snapshot, or `None` if the entity had
    /// no session.
    pub async fn on_session_end(&self, entity: EntityId) -> Option<BTreeSet<ItemId>> {
        let transition = self.transitions.lock(&entity).await;

        let (was, generation) = {
            let mut session = self.sessions.get_mut(&entity)?;
            let was = session.state;
            session.state = SessionState::Saving;
            (was, session.generation)
        };

        let snapshot = self.registry.release(&entity).await.unwrap_or_default();
        self.registry.oracle().invalidate(&entity);

        if !self.config.persist_on_leave {
            debug!(entity = %entity, "Persistence on leave disabled");
        } else if was == SessionState::Loading {
            // The persisted set was never fully restored, keep it as is
            debug!(entity = %entity, "Session ended while loading, keeping persisted set");
        } else {
            let store = Arc::clone(&self.store);
            let saves = Arc::clone(&self.pending_saves);
            let active = snapshot.clone();
            let (registered_tx, registered_rx) = oneshot::channel::<()>();
            let handle = tokio::spawn(async move {
                // Wait until the entry exists so the removal below cannot miss it
                let _ = registered_rx.await;
                match store.save_active_set(&entity, &active).await {
                    Ok(()) => debug!(entity = %entity, items = active.len(), "Active set saved"),
                    Err(e) => warn!(entity = %entity, error = %e, "Failed to save active set"),
                }
                saves.remove_if(&entity, |_, save| save.generation == generation);
            });
            self.pending_saves
                .insert(entity, PendingSave { generation, handle });
            let _ = registered_tx.send(());
        }

        self.sessions.remove(&entity);
        drop(transition);
        self.transitions.forget(&entity);

        info!(entity = %entity, items = snapshot.len(), "Session ended");
        Some(snapshot)
    }

    /// End every live session and wait for all pending saves.
    pub async fn shutdown(&self) {
        let live = self.sessions();
        info!(sessions = live.len(), "Shutting down lifecycle coordinator");

        for entity in live {
            self.on_session_end(entity).await;
        }

        let entities: Vec<EntityId> = self.pending_saves.iter().map(|e| *e.key()).collect();
        let saves: Vec<JoinHandle<()>> = entities
            .iter()
            .filter_map(|e| self.pending_saves.remove(e).map(|(_, save)| save.handle))
            .collect();

        for result in join_all(saves).await {
            if let Err(e) = result {
                warn!(error = %e, "Save task failed during shutdown");
            }
        }
    }
}

/// One session's restoration task.
struct Restore {
    entity: EntityId,
    generation: u64,
    enabled: bool,
    registry: Arc<ActivationRegistry>,
    store: Arc<dyn OwnershipStore>,
    sessions: Arc<DashMap<EntityId, Session>>,
}

impl Restore {
    fn is_loading(sessions: &DashMap<EntityId, Session>, entity: &EntityId, generation: u64) -> bool {
        sessions
            .get(entity)
            .map(|s| s.generation == generation && s.state == SessionState::Loading)
            .unwrap_or(false)
    }

    async fn run(self) -> RestoreSummary {
        let mut summary = RestoreSummary::default();

        let persisted = if self.enabled {
            match self.store.load_active_set(&self.entity).await {
                Ok(items) => items,
                Err(e) => {
                    warn!(entity = %self.entity, error = %e, "Failed to load active set");
                    BTreeSet::new()
                }
            }
        } else {
            BTreeSet::new()
        };

        for item in persisted {
            let sessions = Arc::clone(&self.sessions);
            let (entity, generation) = (self.entity, self.generation);
            let admit = move || Self::is_loading(&sessions, &entity, generation);

            match self.registry.activate_if(&self.entity, &item, admit).await {
                Ok(Some(_)) => summary.restored.push(item),
                Ok(None) => {
                    summary.cancelled = true;
                    break;
                }
                Err(e) => {
                    warn!(entity = %self.entity, item = %item, error = %e, "Dropping item that failed to restore");
                    summary.dropped.push(item);
                }
            }
        }

        let activated = match self.sessions.get_mut(&self.entity) {
            Some(mut session)
                if session.generation == self.generation
                    && session.state == SessionState::Loading =>
            {
                session.state = SessionState::Active;
                true
            }
            _ => false,
        };

        if activated {
            info!(
                entity = %self.entity,
                restored = summary.restored.len(),
                dropped = summary.dropped.len(),
                "Session restored"
            );
        } else {
            summary.cancelled = true;
            debug!(entity = %self.entity, generation = self.generation, "Restoration outlived its session");
        }
        summary
    }
}
