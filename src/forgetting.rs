// Forgetting engine
//
// Tombstones regular units nobody wants. A unit is forgotten when:
// - it is regular tier, resident and not yet consolidated
// - its salience (decayed up to now) is below the threshold
// - it has not been touched for at least the configured duration
// - it is not protected, not a pending cluster member, and the detector
//   examined it and could not place it in any in-band cluster
//
// Salience only rises on touch, and a touch resets the clock, so "below the
// threshold for the whole duration" reduces to the two checks above. The
// decision reads state without changing it, so a second pass over the same
// units picks exactly the same set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::time::Duration;

use crate::config::ForgettingConfig;
use crate::consolidation::Placement;
use crate::types::{Tier, UnitId};
use crate::units::salience::decay_factor;
use crate::units::{Unit, UnitStore};

/// Outcome of one forgetting pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForgettingReport {
    pub examined: usize,
    pub tombstoned: Vec<UnitId>,
    pub skipped_protected: usize,
    pub skipped_pending: usize,
    /// Outside the detector's batch, so clusterability is unknown
    pub skipped_unexamined: usize,
    pub skipped_clusterable: usize,
}

#[derive(Debug, Clone)]
pub struct ForgettingEngine {
    config: ForgettingConfig,
    half_life: Duration,
    protected: BTreeSet<UnitId>,
}

impl ForgettingEngine {
    pub fn new(config: ForgettingConfig, half_life: Duration) -> Self {
        Self {
            config,
            half_life,
            protected: BTreeSet::new(),
        }
    }

    /// Exempt a unit from forgetting. Returns false if it already was.
    pub fn protect(&mut self, id: UnitId) -> bool {
        self.protected.insert(id)
    }

    /// Lift an exemption. Returns false if the unit was not protected.
    pub fn unprotect(&mut self, id: &UnitId) -> bool {
        self.protected.remove(id)
    }

    pub fn is_protected(&self, id: &UnitId) -> bool {
        self.protected.contains(id)
    }

    pub fn protected_count(&self) -> usize {
        self.protected.len()
    }

    /// Salience decayed to `now`, without mutating the unit
    fn effective_salience(&self, unit: &Unit, now: DateTime<Utc>) -> f32 {
        let elapsed = now
            .signed_duration_since(unit.salience_updated_at)
            .to_std()
            .unwrap_or_default();
        unit.salience * decay_factor(elapsed, self.half_life)
    }

    fn is_forgettable(&self, unit: &Unit, now: DateTime<Utc>) -> bool {
        if unit.tier != Tier::Regular || !unit.is_resident() || unit.lineage.is_consolidated() {
            return false;
        }
        let idle = now
            .signed_duration_since(unit.last_touched)
            .to_std()
            .unwrap_or_default();
        idle >= self.config.after && self.effective_salience(unit, now) < self.config.threshold
    }

    /// Units the next pass would tombstone, in id order
    pub fn candidates(
        &self,
        store: &UnitStore,
        pending: &HashSet<UnitId>,
        placement: &Placement,
        now: DateTime<Utc>,
    ) -> (Vec<UnitId>, ForgettingReport) {
        let mut report = ForgettingReport::default();
        let mut ids = Vec::new();

        for unit in store.iter().filter(|u| u.tier == Tier::Regular) {
            report.examined += 1;
            if !self.is_forgettable(unit, now) {
                continue;
            }
            if self.protected.contains(&unit.id) {
                report.skipped_protected += 1;
            } else if pending.contains(&unit.id) {
                report.skipped_pending += 1;
            } else if !placement.was_examined(&unit.id) {
                report.skipped_unexamined += 1;
            } else if placement.is_placed(&unit.id) {
                report.skipped_clusterable += 1;
            } else {
                ids.push(unit.id);
            }
        }

        ids.sort();
        (ids, report)
    }

    /// Tombstone every forgettable unit
    pub fn run(
        &self,
        store: &mut UnitStore,
        pending: &HashSet<UnitId>,
        placement: &Placement,
        now: DateTime<Utc>,
    ) -> ForgettingReport {
        let (ids, mut report) = self.candidates(store, pending, placement, now);

        for id in ids {
            match store.tombstone(&id) {
                Ok(()) => report.tombstoned.push(id),
                Err(e) => tracing::warn!("Could not tombstone {}: {}", id, e),
            }
        }

        if !report.tombstoned.is_empty() {
            tracing::info!(
                "Forgetting pass tombstoned {} of {} regular units",
                report.tombstoned.len(),
                report.examined
            );
        }
        report
    }
}
