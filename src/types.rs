//! Core data types shared across Strata
//!
//! Identifiers, unit tiers and residency, and the fixed set of resource kinds
//! tracked by the ledger. Everything else builds on these.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for knowledge units (DTUs)
///
/// Wraps a UUID so unit ids cannot be mixed up with entity ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(pub Uuid);

impl UnitId {
    /// Create a new random unit ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a unit ID from a string
    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for UnitId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for simulated entities
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub Uuid);

impl EntityId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Consolidation tier of a unit
///
/// Transitions only move forward: `Regular → Aggregate → MetaAggregate`,
/// or `Regular → Tombstone` through the forgetting engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Raw unit produced by an entity or by ingestion
    Regular,

    /// "MEGA": consolidated from regular units
    Aggregate,

    /// "HYPER": consolidated from aggregates
    MetaAggregate,

    /// Payload discarded, identity and lineage retained
    Tombstone,
}

impl Tier {
    /// Tier produced by consolidating units of this tier
    pub fn next(&self) -> Option<Tier> {
        match self {
            Tier::Regular => Some(Tier::Aggregate),
            Tier::Aggregate => Some(Tier::MetaAggregate),
            Tier::MetaAggregate | Tier::Tombstone => None,
        }
    }

    /// Whether a unit may move from `self` to `target`
    pub fn can_transition_to(&self, target: Tier) -> bool {
        matches!(
            (self, target),
            (Tier::Regular, Tier::Aggregate)
                | (Tier::Aggregate, Tier::MetaAggregate)
                | (Tier::Regular, Tier::Tombstone)
        )
    }

    /// Whether units of this tier can be clustered at all
    pub fn is_consolidatable(&self) -> bool {
        self.next().is_some()
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Regular => write!(f, "regular"),
            Tier::Aggregate => write!(f, "aggregate"),
            Tier::MetaAggregate => write!(f, "meta_aggregate"),
            Tier::Tombstone => write!(f, "tombstone"),
        }
    }
}

/// Where a unit's payload currently lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Residency {
    /// Full payload held in memory and counted against the heap ceiling
    InHeap,

    /// Payload moved to durable storage (or discarded); only a stub remains
    Archived,
}

/// Resource kinds tracked per entity account
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Compute,
    Energy,
    Attention,
    SocialCapital,
    Data,
    Innovation,
    Influence,
    Memory,
}

impl ResourceKind {
    /// Every kind, in ledger slot order
    pub const ALL: [ResourceKind; 8] = [
        ResourceKind::Compute,
        ResourceKind::Energy,
        ResourceKind::Attention,
        ResourceKind::SocialCapital,
        ResourceKind::Data,
        ResourceKind::Innovation,
        ResourceKind::Influence,
        ResourceKind::Memory,
    ];

    /// Slot of this kind in fixed-size balance arrays
    pub fn index(&self) -> usize {
        match self {
            ResourceKind::Compute => 0,
            ResourceKind::Energy => 1,
            ResourceKind::Attention => 2,
            ResourceKind::SocialCapital => 3,
            ResourceKind::Data => 4,
            ResourceKind::Innovation => 5,
            ResourceKind::Influence => 6,
            ResourceKind::Memory => 7,
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ResourceKind::Compute => "compute",
            ResourceKind::Energy => "energy",
            ResourceKind::Attention => "attention",
            ResourceKind::SocialCapital => "social_capital",
            ResourceKind::Data => "data",
            ResourceKind::Innovation => "innovation",
            ResourceKind::Influence => "influence",
            ResourceKind::Memory => "memory",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_transitions_are_forward_only() {
        assert!(Tier::Regular.can_transition_to(Tier::Aggregate));
        assert!(Tier::Aggregate.can_transition_to(Tier::MetaAggregate));
        assert!(Tier::Regular.can_transition_to(Tier::Tombstone));

        assert!(!Tier::Aggregate.can_transition_to(Tier::Regular));
        assert!(!Tier::MetaAggregate.can_transition_to(Tier::Aggregate));
        assert!(!Tier::Aggregate.can_transition_to(Tier::Tombstone));
        assert!(!Tier::Tombstone.can_transition_to(Tier::Regular));
        assert!(!Tier::Regular.can_transition_to(Tier::MetaAggregate));
    }

    #[test]
    fn test_tier_next() {
        assert_eq!(Tier::Regular.next(), Some(Tier::Aggregate));
        assert_eq!(Tier::Aggregate.next(), Some(Tier::MetaAggregate));
        assert_eq!(Tier::MetaAggregate.next(), None);
        assert_eq!(Tier::Tombstone.next(), None);
    }

    #[test]
    fn test_resource_kind_indices_are_dense() {
        for (i, kind) in ResourceKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
        }
    }

    #[test]
    fn test_unit_id_roundtrip_string() {
        let id = UnitId::new();
        let parsed = UnitId::from_string(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }
}
