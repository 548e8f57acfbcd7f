//! Mock side effects for testing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::effects::{EffectContext, SideEffect};
use crate::error::SideEffectError;
use crate::types::{EntityId, ItemId};

/// One recorded side-effect invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EffectCall {
    Activate { entity: EntityId, item: ItemId },
    Deactivate { entity: EntityId, item: ItemId },
}

/// Shared, ordered log of side-effect invocations.
#[derive(Debug, Default)]
pub struct EffectLog {
    calls: Mutex<Vec<EffectCall>>,
}

impl EffectLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push(&self, call: EffectCall) {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).push(call);
    }

    /// All calls so far, in invocation order.
    pub fn calls(&self) -> Vec<EffectCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of activations recorded for an item.
    pub fn activations(&self, item: &str) -> usize {
        self.count(|c| matches!(c, EffectCall::Activate { item: i, .. } if i.as_str() == item))
    }

    /// Number of deactivations recorded for an item.
    pub fn deactivations(&self, item: &str) -> usize {
        self.count(|c| matches!(c, EffectCall::Deactivate { item: i, .. } if i.as_str() == item))
    }

    fn count(&self, pred: impl Fn(&EffectCall) -> bool) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|c| pred(c))
            .count()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

/// Side effect that records its invocations and can be told to fail.
pub struct MockEffect {
    name: String,
    log: Arc<EffectLog>,
    fail_activate: AtomicBool,
    fail_deactivate: AtomicBool,
}

impl MockEffect {
    pub fn new(name: impl Into<String>, log: Arc<EffectLog>) -> Self {
        Self {
            name: name.into(),
            log,
            fail_activate: AtomicBool::new(false),
            fail_deactivate: AtomicBool::new(false),
        }
    }

    /// Make `on_activate` fail.
    pub fn failing_activate(self) -> Self {
        self.fail_activate.store(true, Ordering::SeqCst);
        self
    }

    /// Make `on_deactivate` fail.
    pub fn failing_deactivate(self) -> Self {
        self.fail_deactivate.store(true, Ordering::SeqCst);
        self
    }

    pub fn set_fail_activate(&self, fail: bool) {
        self.fail_activate.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_deactivate(&self, fail: bool) {
        self.fail_deactivate.store(fail, Ordering::SeqCst);
    }
}

impl SideEffect for MockEffect {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_activate(&self, ctx: &EffectContext) -> Result<(), SideEffectError> {
        if self.fail_activate.load(Ordering::SeqCst) {
            return Err(SideEffectError::new(format!("{} refused to activate", self.name)));
        }
        self.log.push(EffectCall::Activate {
            entity: ctx.entity,
            item: ctx.item.clone(),
        });
        Ok(())
    }

    fn on_deactivate(&self, ctx: &EffectContext) -> Result<(), SideEffectError> {
        // Teardown is recorded even when it then reports failure
        self.log.push(EffectCall::Deactivate {
            entity: ctx.entity,
            item: ctx.item.clone(),
        });
        if self.fail_deactivate.load(Ordering::SeqCst) {
            return Err(SideEffectError::new(format!("{} failed to tear down", self.name)));
        }
        Ok(())
    }
}
