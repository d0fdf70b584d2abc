//! In-memory unit store
//!
//! Holds every unit known to the system keyed by id, with running counters
//! for in-heap units and heap bytes so budget checks stay O(1). Tier changes
//! only happen through `apply` (staged consolidation commits) and
//! `tombstone` (forgetting), both crate-private.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

use super::salience;
use super::unit::Unit;
use crate::types::{Residency, Tier, UnitId};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum StoreError {
    #[error("In-heap ceiling of {ceiling} units reached")]
    Capacity { ceiling: usize },

    #[error("Unit not found: {0}")]
    NotFound(UnitId),

    #[error("Duplicate unit id: {0}")]
    Duplicate(UnitId),

    #[error("Illegal tier transition for {id}: {from} -> {to}")]
    IllegalTransition { id: UnitId, from: Tier, to: Tier },

    #[error("Unit {0} is not resident in heap")]
    NotResident(UnitId),

    #[error("Unit {0} has already been consolidated")]
    AlreadyConsolidated(UnitId),
}

/// Unit counts per tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierCounts {
    pub regular: usize,
    pub aggregate: usize,
    pub meta_aggregate: usize,
    pub tombstone: usize,
}

impl TierCounts {
    pub fn get(&self, tier: Tier) -> usize {
        match tier {
            Tier::Regular => self.regular,
            Tier::Aggregate => self.aggregate,
            Tier::MetaAggregate => self.meta_aggregate,
            Tier::Tombstone => self.tombstone,
        }
    }

    fn bump(&mut self, tier: Tier) {
        match tier {
            Tier::Regular => self.regular += 1,
            Tier::Aggregate => self.aggregate += 1,
            Tier::MetaAggregate => self.meta_aggregate += 1,
            Tier::Tombstone => self.tombstone += 1,
        }
    }
}

/// A fully built next state for a set of units, swapped in at once
#[derive(Debug, Default)]
pub(crate) struct StagedCommit {
    /// New versions of existing units
    pub replace: Vec<Unit>,
    /// Brand new units
    pub insert: Vec<Unit>,
}

/// Store for all units, resident or stubbed
#[derive(Debug)]
pub struct UnitStore {
    units: HashMap<UnitId, Unit>,
    max_in_heap: usize,
    in_heap: usize,
    heap_bytes: usize,
}

impl UnitStore {
    pub fn new(max_in_heap: usize) -> Self {
        Self {
            units: HashMap::new(),
            max_in_heap,
            in_heap: 0,
            heap_bytes: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn max_in_heap(&self) -> usize {
        self.max_in_heap
    }

    /// Units counted against the heap ceiling
    pub fn in_heap_count(&self) -> usize {
        self.in_heap
    }

    pub fn heap_bytes(&self) -> usize {
        self.heap_bytes
    }

    pub fn has_capacity(&self) -> bool {
        self.in_heap < self.max_in_heap
    }

    /// Whether the in-heap count has reached `ratio` of the ceiling
    pub fn under_pressure(&self, ratio: f32) -> bool {
        let threshold = (self.max_in_heap as f64 * ratio as f64).ceil() as usize;
        self.in_heap >= threshold.max(1)
    }

    /// Insert a new unit. Resident units count against the ceiling.
    pub fn insert(&mut self, unit: Unit) -> Result<UnitId, StoreError> {
        if self.units.contains_key(&unit.id) {
            return Err(StoreError::Duplicate(unit.id));
        }
        if unit.is_resident() && !self.has_capacity() {
            return Err(StoreError::Capacity {
                ceiling: self.max_in_heap,
            });
        }

        let id = unit.id;
        self.account_add(&unit);
        self.units.insert(id, unit);
        Ok(id)
    }

    pub fn get(&self, id: &UnitId) -> Option<&Unit> {
        self.units.get(id)
    }

    pub fn contains(&self, id: &UnitId) -> bool {
        self.units.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Unit> {
        self.units.values()
    }

    /// Resident units of `tier` that have not been consolidated yet
    pub fn eligible(&self, tier: Tier) -> impl Iterator<Item = &Unit> {
        self.units
            .values()
            .filter(move |u| u.tier == tier && u.is_consolidation_eligible())
    }

    /// Units owned by an entity, most salient first
    pub fn owned_by(&self, owner: crate::types::EntityId) -> Vec<&Unit> {
        let mut owned: Vec<&Unit> = self
            .units
            .values()
            .filter(|u| u.owner == Some(owner) && u.is_resident() && !u.is_tombstone())
            .collect();
        owned.sort_by(|a, b| {
            b.salience
                .total_cmp(&a.salience)
                .then(a.created_at.cmp(&b.created_at))
        });
        owned
    }

    /// Boost salience on access. Tombstones cannot be touched.
    pub fn touch(&mut self, id: &UnitId, amount: f32, now: DateTime<Utc>) -> Result<f32, StoreError> {
        let unit = self.units.get_mut(id).ok_or(StoreError::NotFound(*id))?;
        if unit.is_tombstone() {
            return Err(StoreError::NotResident(*id));
        }
        Ok(salience::boost(unit, amount, now))
    }

    /// Decay salience of every live unit up to `now`. Returns units visited.
    pub fn decay_all(&mut self, now: DateTime<Utc>, half_life: Duration) -> usize {
        let mut visited = 0;
        for unit in self.units.values_mut().filter(|u| !u.is_tombstone()) {
            salience::apply_decay(unit, now, half_life);
            visited += 1;
        }
        visited
    }

    pub fn tier_counts(&self) -> TierCounts {
        let mut counts = TierCounts::default();
        for unit in self.units.values() {
            counts.bump(unit.tier);
        }
        counts
    }

    pub fn archived_count(&self) -> usize {
        self.units.len() - self.in_heap
    }

    /// Turn a regular unit into a tombstone: payload dropped, id and lineage kept.
    pub(crate) fn tombstone(&mut self, id: &UnitId) -> Result<(), StoreError> {
        let unit = self.units.get(id).ok_or(StoreError::NotFound(*id))?;
        if !unit.tier.can_transition_to(Tier::Tombstone) {
            return Err(StoreError::IllegalTransition {
                id: *id,
                from: unit.tier,
                to: Tier::Tombstone,
            });
        }
        if !unit.is_resident() {
            return Err(StoreError::NotResident(*id));
        }
        if unit.lineage.is_consolidated() {
            return Err(StoreError::AlreadyConsolidated(*id));
        }

        let mut next = unit.clone();
        next.tier = Tier::Tombstone;
        next.payload = None;
        next.residency = Residency::Archived;

        self.replace(next);
        Ok(())
    }

    /// Swap in a staged commit. Callers validate the commit beforehand;
    /// once here nothing can fail, so either all of it lands or none was built.
    pub(crate) fn apply(&mut self, commit: StagedCommit) {
        for unit in commit.replace {
            self.replace(unit);
        }
        for unit in commit.insert {
            self.account_add(&unit);
            self.units.insert(unit.id, unit);
        }
        debug_assert!(self.in_heap <= self.max_in_heap);
    }

    fn replace(&mut self, unit: Unit) {
        self.account_add(&unit);
        if let Some(old) = self.units.insert(unit.id, unit) {
            self.account_remove(&old);
        }
    }

    fn account_add(&mut self, unit: &Unit) {
        if unit.is_resident() {
            self.in_heap += 1;
        }
        self.heap_bytes += unit.size_estimate();
    }

    fn account_remove(&mut self, unit: &Unit) {
        if unit.is_resident() {
            self.in_heap -= 1;
        }
        self.heap_bytes = self.heap_bytes.saturating_sub(unit.size_estimate());
    }
}
