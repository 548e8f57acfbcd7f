//! Periodic effects bound to the lifetime of one activation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{EffectContext, SideEffect};
use crate::error::SideEffectError;
use crate::locks::EntityLocks;
use crate::primary::PrimaryContext;
use crate::types::{EntityId, ItemId};

/// Body of one tick. Runs on the primary context.
pub type TickFn = Arc<dyn Fn(&EntityId, &ItemId) -> Result<(), SideEffectError> + Send + Sync>;

struct TickTask {
    cancelled: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl TickTask {
    fn cancel(self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.handle.abort();
    }
}

/// Side effect that runs a tick body at a fixed interval while active.
///
/// Each tick checks cancellation, takes the entity's exclusion scope
/// (skipping the tick if a transition holds it), checks cancellation again,
/// then runs the body on the primary context with the scope still held.
/// Deactivation happens under the same scope and cancels synchronously, so
/// no tick can fire after the item is logically inactive.
pub struct RepeatingEffect {
    name: String,
    interval: Duration,
    tick: TickFn,
    tasks: DashMap<(EntityId, ItemId), TickTask>,
}

impl RepeatingEffect {
    pub fn new(name: impl Into<String>, interval: Duration, tick: TickFn) -> Self {
        Self {
            name: name.into(),
            interval,
            tick,
            tasks: DashMap::new(),
        }
    }

    /// Number of running tick tasks.
    pub fn running(&self) -> usize {
        self.tasks.len()
    }

    /// Whether a tick task is running for this activation.
    pub fn is_running(&self, entity: &EntityId, item: &ItemId) -> bool {
        self.tasks.contains_key(&(*entity, item.clone()))
    }
}

impl SideEffect for RepeatingEffect {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_activate(&self, ctx: &EffectContext) -> Result<(), SideEffectError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SideEffectError::new(format!("no runtime for {}: {}", self.name, e)))?;

        let cancelled = Arc::new(AtomicBool::new(false));
        let handle = runtime.spawn(run_ticks(
            ctx.entity,
            ctx.item.clone(),
            self.interval,
            Arc::clone(&self.tick),
            Arc::clone(&cancelled),
            ctx.locks().clone(),
            Arc::clone(ctx.primary()),
        ));

        let task = TickTask { cancelled, handle };
        if let Some(stale) = self.tasks.insert((ctx.entity, ctx.item.clone()), task) {
            stale.cancel();
        }

        debug!(effect = %self.name, entity = %ctx.entity, item = %ctx.item, "Tick task started");
        Ok(())
    }

    fn on_deactivate(&self, ctx: &EffectContext) -> Result<(), SideEffectError> {
        if let Some((_, task)) = self.tasks.remove(&(ctx.entity, ctx.item.clone())) {
            task.cancel();
            debug!(effect = %self.name, entity = %ctx.entity, item = %ctx.item, "Tick task cancelled");
        }
        Ok(())
    }
}

async fn run_ticks(
    entity: EntityId,
    item: ItemId,
    interval: Duration,
    tick: TickFn,
    cancelled: Arc<AtomicBool>,
    locks: EntityLocks,
    primary: Arc<PrimaryContext>,
) {
    let mut timer = tokio::time::interval(interval);
    // First tick completes immediately
    timer.tick().await;

    loop {
        timer.tick().await;
        if cancelled.load(Ordering::SeqCst) {
            break;
        }

        let Some(guard) = locks.try_lock(&entity) else {
            continue;
        };
        if cancelled.load(Ordering::SeqCst) {
            break;
        }

        let body = Arc::clone(&tick);
        let (e, i) = (entity, item.clone());
        let result = primary.run(move || body(&e, &i)).await;
        drop(guard);

        match result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(entity = %entity, item = %item, error = %err, "Tick failed");
            }
            Err(_) => break,
        }
    }
}
