//! Cosmetics Core - per-entity ownership and single-active-slot activation
//!
//! Decides, for each entity (player), which cosmetic items it owns and which
//! are active, with at most one active item per category:
//!
//! - **Catalog**: immutable item definitions grouped by category
//! - **Ownership oracle**: cached, bounded, fail-closed ownership answers
//! - **Activation registry**: activate/deactivate/toggle under a per-entity
//!   exclusion scope, side effects marshalled onto the primary context
//! - **Lifecycle**: restore on session start, persist and tear down on end
//! - **Achievements**: predicate unlocks granted exactly once
//!
//! # Architecture
//!
//! ```text
//!  session events          commands                 purchases
//!        │                    │                         │
//!  ┌─────▼──────┐      ┌──────▼───────┐           ┌─────▼────┐
//!  │ Lifecycle  │─────▶│  Activation  │           │   Shop   │
//!  └─────┬──────┘      │   Registry   │           └─────┬────┘
//!        │             └──┬───────┬───┘                 │
//!        │       ┌────────▼─┐   ┌─▼────────┐            │
//!        │       │ Catalog  │   │  Oracle  │◀───────────┘
//!        │       └──────────┘   └────┬─────┘
//!        └──────────────────────────▶│ OwnershipStore
//!                                    ▼
//!  side effects ──▶ PrimaryContext      events ──▶ Stats / Rewards / Achievements
//! ```

pub mod access;
pub mod achievements;
pub mod catalog;
pub mod config;
pub mod effects;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod locks;
pub mod mock;
pub mod ownership;
pub mod primary;
pub mod registry;
pub mod service;
pub mod shop;
pub mod stats;
pub mod types;

// Re-export main types
pub use access::{PermissionResolver, StaticPermissions};
pub use achievements::{
    AchievementDefinition, AchievementEvaluator, AchievementStore, Condition,
    MemoryAchievementStore, ScoreCounter, ScoreSource, UnlockRecord,
};
pub use catalog::{Catalog, CatalogLookup, CatalogStore, ItemDefinition};
pub use config::CosmeticsConfig;
pub use effects::{EffectBinder, EffectContext, NoopEffect, RepeatingEffect, SideEffect};
pub use error::{CosmeticsError, Result, SideEffectError, StoreError};
pub use events::{EventSink, FanoutSink, LoggingSink, NullSink};
pub use lifecycle::{LifecycleCoordinator, RestoreSummary};
pub use ownership::{JsonFileStore, MemoryOwnershipStore, OwnershipOracle, OwnershipStore};
pub use primary::PrimaryContext;
pub use registry::ActivationRegistry;
pub use service::{CosmeticsBuilder, CosmeticsService};
pub use shop::{CreditLedger, MemoryCreditLedger, PurchaseReceipt, RewardPayout, Shop};
pub use stats::StatsLedger;
pub use types::*;
