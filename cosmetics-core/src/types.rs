//! Core types shared across the cosmetics core.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Opaque, stable identifier of an entity (a player).
///
/// Registry state is keyed by this rather than by any host-side object, so
/// it survives host object churn and serializes cleanly for persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub uuid::Uuid);

impl EntityId {
    /// Create a fresh random identifier.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Parse from the hyphenated UUID form.
    pub fn parse(s: &str) -> Option<Self> {
        uuid::Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Catalog-unique item identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub String);

impl ItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Achievement identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AchievementId(pub String);

impl AchievementId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for AchievementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AchievementId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Closed set of cosmetic categories.
///
/// At most one item per category may be active for an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Hat,
    Particle,
    Trail,
    Pet,
    Wings,
    Gadget,
    Emote,
}

impl Category {
    /// All categories in declaration order.
    pub const ALL: [Category; 7] = [
        Category::Hat,
        Category::Particle,
        Category::Trail,
        Category::Pet,
        Category::Wings,
        Category::Gadget,
        Category::Emote,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Hat => "hat",
            Category::Particle => "particle",
            Category::Trail => "trail",
            Category::Pet => "pet",
            Category::Wings => "wings",
            Category::Gadget => "gadget",
            Category::Emote => "emote",
        }
    }

    /// Parse from the lowercase name used in configuration.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attributes of an entity that access rules are evaluated against.
///
/// Resolved by the host's permission layer; the core never interprets
/// permission strings itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityAttributes {
    /// Flags granted to the entity (e.g. rank or permission names)
    pub flags: HashSet<String>,
    /// Tier level (0 = default)
    pub tier: u32,
}

impl EntityAttributes {
    /// Attributes with a tier and no flags.
    pub fn with_tier(tier: u32) -> Self {
        Self {
            flags: HashSet::new(),
            tier,
        }
    }

    /// Add a flag.
    pub fn with_flag(mut self, flag: impl Into<String>) -> Self {
        self.flags.insert(flag.into());
        self
    }
}

/// Gate over entity attributes that must pass before an item activates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRule {
    /// Every flag listed here must be present
    #[serde(default)]
    pub required_flags: Vec<String>,
    /// Minimum tier, if any
    #[serde(default)]
    pub min_tier: Option<u32>,
}

impl AccessRule {
    /// A rule that always passes.
    pub fn open() -> Self {
        Self::default()
    }

    /// Check the rule against entity attributes.
    pub fn allows(&self, attrs: &EntityAttributes) -> bool {
        let tier_ok = self.min_tier.map_or(true, |min| attrs.tier >= min);
        tier_ok && self.required_flags.iter().all(|f| attrs.flags.contains(f))
    }

    pub fn is_open(&self) -> bool {
        self.required_flags.is_empty() && self.min_tier.is_none()
    }
}

/// Result of a successful `activate` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivationOutcome {
    /// The item is now active; `replaced` names the item it pre-empted
    Activated { replaced: Option<ItemId> },
    /// The item was already active; nothing ran
    AlreadyActive,
}

impl ActivationOutcome {
    /// Whether the call changed state.
    pub fn changed(&self) -> bool {
        matches!(self, ActivationOutcome::Activated { .. })
    }
}

/// Per-entity session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Absent,
    Loading,
    Active,
    Saving,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::Absent
    }
}
