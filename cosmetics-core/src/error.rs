//! Error types for the cosmetics core.

use crate::types::{EntityId, ItemId};

/// Errors surfaced by commands and queries.
///
/// Each variant maps to a distinct user-facing message in the host, so
/// "you don't own this" and "denied" stay distinguishable.
#[derive(Debug, thiserror::Error)]
pub enum CosmeticsError {
    /// Item id not present in the catalog
    #[error("Unknown item: {0}")]
    UnknownItem(ItemId),

    /// Entity does not own the item
    #[error("Item {item} is not owned by {entity}")]
    NotOwned { entity: EntityId, item: ItemId },

    /// Entity attributes fail the item's access rule
    #[error("Access denied to {item} for {entity}")]
    AccessDenied { entity: EntityId, item: ItemId },

    /// Activation side effect failed; state left unchanged
    #[error("Activation of {item} failed: {source}")]
    ActivationSideEffectFailed {
        item: ItemId,
        #[source]
        source: SideEffectError,
    },

    /// Conflicting concurrent operation. Never produced while the per-entity
    /// exclusion scope serialises transitions.
    #[error("Entity {0} is already in transition")]
    AlreadyInTransition(EntityId),

    /// Ownership backend could not answer
    #[error("Ownership oracle unavailable: {0}")]
    OracleUnavailable(String),

    /// Entity has no tracked activation state (no live session)
    #[error("No session for entity {0}")]
    NoSession(EntityId),

    /// Catalog already holds this id
    #[error("Duplicate item id: {0}")]
    DuplicateId(ItemId),

    /// Not enough credits to complete a purchase
    #[error("Insufficient credits: need {needed}, have {available}")]
    InsufficientCredits { needed: u64, available: u64 },

    /// Purchase of an item already owned (free items included)
    #[error("Item {0} is already owned")]
    AlreadyOwned(ItemId),

    /// Persistence collaborator error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Runtime setup error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by persistence collaborators.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Backend is not reachable
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Record could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure raised by a side-effect implementation.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct SideEffectError {
    pub message: String,
}

impl SideEffectError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// The primary execution context is no longer accepting work.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Primary execution context has shut down")]
pub struct PrimaryError;

impl From<PrimaryError> for SideEffectError {
    fn from(err: PrimaryError) -> Self {
        SideEffectError::new(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CosmeticsError>;
