//! The knowledge unit (DTU) record
//!
//! A unit carries its payload while resident in heap. Once archived or
//! tombstoned the payload is gone from memory and only the id, timestamps,
//! tier and lineage stub remain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::archive::ArchiveHandle;
use crate::types::{EntityId, Residency, Tier, UnitId};

/// Fixed per-unit bookkeeping overhead counted by `size_estimate`
const UNIT_OVERHEAD_BYTES: usize = 160;

/// Content carried by a unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitPayload {
    pub content: String,
    pub summary: String,
    pub tags: BTreeSet<String>,
}

impl UnitPayload {
    pub fn new(content: impl Into<String>, summary: impl Into<String>, tags: BTreeSet<String>) -> Self {
        Self {
            content: content.into(),
            summary: summary.into(),
            tags,
        }
    }

    fn size_estimate(&self) -> usize {
        self.content.len()
            + self.summary.len()
            + self.tags.iter().map(|t| t.len() + 24).sum::<usize>()
    }
}

/// Consolidation lineage: id based, forms a DAG
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lineage {
    /// Units this one was consolidated from
    pub parents: BTreeSet<UnitId>,

    /// Aggregates this one was consolidated into (at most one)
    pub children: BTreeSet<UnitId>,
}

impl Lineage {
    pub fn is_consolidated(&self) -> bool {
        !self.children.is_empty()
    }
}

/// A single knowledge unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Unit {
    pub id: UnitId,
    pub created_at: DateTime<Utc>,
    pub owner: Option<EntityId>,
    pub tier: Tier,

    /// Present only while `residency` is `InHeap`
    pub payload: Option<UnitPayload>,

    /// Relevance score in `[0, 1]`
    pub salience: f32,

    /// Last time salience was boosted (creation counts)
    pub last_touched: DateTime<Utc>,

    /// Last time decay was applied
    pub salience_updated_at: DateTime<Utc>,

    pub access_count: u32,
    pub lineage: Lineage,
    pub residency: Residency,

    /// Where the payload went when archived by consolidation
    pub archive_handle: Option<ArchiveHandle>,
}

impl Unit {
    /// Create a new in-heap regular unit
    pub fn new(payload: UnitPayload, owner: Option<EntityId>, salience: f32, now: DateTime<Utc>) -> Self {
        Self {
            id: UnitId::new(),
            created_at: now,
            owner,
            tier: Tier::Regular,
            payload: Some(payload),
            salience: salience.clamp(0.0, 1.0),
            last_touched: now,
            salience_updated_at: now,
            access_count: 0,
            lineage: Lineage::default(),
            residency: Residency::InHeap,
            archive_handle: None,
        }
    }

    /// Tags of the resident payload (empty for stubs)
    pub fn tags(&self) -> impl Iterator<Item = &String> {
        self.payload.iter().flat_map(|p| p.tags.iter())
    }

    pub fn summary(&self) -> Option<&str> {
        self.payload.as_ref().map(|p| p.summary.as_str())
    }

    pub fn is_resident(&self) -> bool {
        self.residency == Residency::InHeap
    }

    pub fn is_tombstone(&self) -> bool {
        self.tier == Tier::Tombstone
    }

    /// Whether the unit can still take part in a consolidation at its tier
    pub fn is_consolidation_eligible(&self) -> bool {
        self.tier.is_consolidatable() && self.is_resident() && !self.lineage.is_consolidated()
    }

    /// Heap footprint estimate used for budget accounting
    pub fn size_estimate(&self) -> usize {
        let lineage = (self.lineage.parents.len() + self.lineage.children.len()) * 16;
        UNIT_OVERHEAD_BYTES + lineage + self.payload.as_ref().map_or(0, |p| p.size_estimate())
    }

    pub fn set_salience(&mut self, salience: f32) {
        self.salience = salience.clamp(0.0, 1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> UnitPayload {
        UnitPayload::new(
            "Observed the tide table",
            "tide table",
            ["tides".to_string(), "sea".to_string()].into_iter().collect(),
        )
    }

    #[test]
    fn test_unit_new_defaults() {
        let now = Utc::now();
        let unit = Unit::new(payload(), None, 0.4, now);

        assert_eq!(unit.tier, Tier::Regular);
        assert_eq!(unit.residency, Residency::InHeap);
        assert_eq!(unit.created_at, now);
        assert_eq!(unit.last_touched, now);
        assert!(unit.lineage.parents.is_empty());
        assert!(unit.is_consolidation_eligible());
        assert_eq!(unit.tags().count(), 2);
    }

    #[test]
    fn test_salience_is_clamped() {
        let mut unit = Unit::new(payload(), None, 3.0, Utc::now());
        assert_eq!(unit.salience, 1.0);

        unit.set_salience(-1.0);
        assert_eq!(unit.salience, 0.0);
    }

    #[test]
    fn test_stub_is_smaller_than_resident() {
        let mut unit = Unit::new(payload(), None, 0.5, Utc::now());
        let resident = unit.size_estimate();

        unit.payload = None;
        unit.residency = Residency::Archived;
        assert!(unit.size_estimate() < resident);
        assert!(!unit.is_consolidation_eligible());
    }
}
