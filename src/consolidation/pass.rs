// Consolidation pass
//
// One pass walks both levels, regular then aggregate. For each level it
// collects candidates (detecting inline for small pools, on a blocking worker
// for large ones) and commits queued candidates in order. Candidates that are
// queued but not yet committed are the pending set the forgetting engine must
// leave alone.
//
// Offloaded detection works on a snapshot. Its results are picked up on a
// later pass and go through the same stale check as everything else.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet, VecDeque};
use tokio::task::JoinHandle;

use super::detector::{ClusterCandidate, ClusterDetector, Placement};
use super::engine::{ConsolidationEngine, ConsolidationError};
use super::scorer::UnitView;
use crate::archive::ArchiveBackend;
use crate::brain::BrainGateway;
use crate::config::ConsolidationConfig;
use crate::types::{Tier, UnitId};
use crate::units::UnitStore;

const LEVELS: [Tier; 2] = [Tier::Regular, Tier::Aggregate];

/// Outcome of one pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassReport {
    pub proposed: usize,
    pub committed: usize,
    pub stale: usize,
    pub failed: usize,
    pub offloaded: usize,
    pub units_archived: usize,
}

impl PassReport {
    fn absorb(&mut self, other: PassReport) {
        self.proposed += other.proposed;
        self.committed += other.committed;
        self.stale += other.stale;
        self.failed += other.failed;
        self.offloaded += other.offloaded;
        self.units_archived += other.units_archived;
    }
}

/// Detector + engine + the queue between them
#[derive(Debug)]
pub struct Consolidator {
    detector: ClusterDetector,
    engine: ConsolidationEngine,
    queue: VecDeque<ClusterCandidate>,
    offloaded: BTreeMap<Tier, JoinHandle<Vec<ClusterCandidate>>>,
    totals: PassReport,
}

impl Consolidator {
    pub fn new(config: ConsolidationConfig) -> Self {
        Self::with_detector(ClusterDetector::new(config.clone()), config)
    }

    pub fn with_detector(detector: ClusterDetector, config: ConsolidationConfig) -> Self {
        Self {
            detector,
            engine: ConsolidationEngine::new(config),
            queue: VecDeque::new(),
            offloaded: BTreeMap::new(),
            totals: PassReport::default(),
        }
    }

    pub fn detector(&self) -> &ClusterDetector {
        &self.detector
    }

    pub fn engine(&self) -> &ConsolidationEngine {
        &self.engine
    }

    /// Lifetime totals across all passes
    pub fn totals(&self) -> PassReport {
        self.totals
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Whether a detection for `tier` is running on a worker
    pub fn is_offloaded(&self, tier: Tier) -> bool {
        self.offloaded.contains_key(&tier)
    }

    /// Members of queued, uncommitted candidates
    pub fn pending_members(&self) -> HashSet<UnitId> {
        self.queue
            .iter()
            .flat_map(|c| c.members.iter().copied())
            .collect()
    }

    /// Queue a candidate for the next commit round
    pub fn enqueue(&mut self, candidate: ClusterCandidate) {
        self.queue.push_back(candidate);
    }

    /// Regular units a detection run would examine right now, and which of
    /// them could go into some in-band cluster
    pub fn clusterable(&self, store: &UnitStore) -> Placement {
        let views = self.views(store, Tier::Regular);
        self.detector.placement(&views, Tier::Regular)
    }

    fn views(&self, store: &UnitStore, tier: Tier) -> Vec<UnitView> {
        let pending = self.pending_members();
        store
            .eligible(tier)
            .filter(|u| !pending.contains(&u.id))
            .map(UnitView::from_unit)
            .collect()
    }

    /// Queue fresh candidates for `tier`. Returns how many were queued now.
    async fn propose(&mut self, store: &UnitStore, tier: Tier, report: &mut PassReport) -> usize {
        if let Some(handle) = self.offloaded.get(&tier) {
            if !handle.is_finished() {
                return 0;
            }
            if let Some(handle) = self.offloaded.remove(&tier) {
                return match handle.await {
                    Ok(candidates) => self.queue_all(candidates),
                    Err(e) => {
                        tracing::error!("Offloaded {} detection failed: {}", tier, e);
                        report.failed += 1;
                        0
                    }
                };
            }
        }

        let views = self.views(store, tier);
        if views.len() > self.detector.config().offload_threshold {
            let detector = self.detector.clone();
            let count = views.len();
            let handle = tokio::task::spawn_blocking(move || detector.detect(&views, tier));
            self.offloaded.insert(tier, handle);
            report.offloaded += 1;
            tracing::debug!("Offloaded {} detection over {} units", tier, count);
            return 0;
        }

        let candidates = self.detector.detect(&views, tier);
        self.queue_all(candidates)
    }

    fn queue_all(&mut self, candidates: Vec<ClusterCandidate>) -> usize {
        let count = candidates.len();
        self.queue.extend(candidates);
        count
    }

    /// Commit every queued candidate. A candidate leaves the queue only once
    /// its commit attempt finished.
    pub async fn drain(
        &mut self,
        store: &mut UnitStore,
        archive: &dyn ArchiveBackend,
        gateway: &BrainGateway,
        now: DateTime<Utc>,
    ) -> PassReport {
        let mut report = PassReport::default();

        while let Some(candidate) = self.queue.front().cloned() {
            let result = self.engine.commit(store, archive, gateway, &candidate, now).await;
            self.queue.pop_front();

            match result {
                Ok(done) => {
                    report.committed += 1;
                    report.units_archived += done.members;
                }
                Err(e @ ConsolidationError::Stale { .. }) => {
                    tracing::debug!("Dropping stale candidate: {}", e);
                    report.stale += 1;
                }
                Err(e) => {
                    tracing::warn!("Consolidation candidate failed: {}", e);
                    report.failed += 1;
                }
            }
        }

        self.totals.absorb(report);
        report
    }

    /// Full pass over both levels
    pub async fn run_pass(
        &mut self,
        store: &mut UnitStore,
        archive: &dyn ArchiveBackend,
        gateway: &BrainGateway,
        now: DateTime<Utc>,
    ) -> PassReport {
        let mut report = PassReport::default();

        for tier in LEVELS {
            let mut level = PassReport::default();
            let proposed = self.propose(store, tier, &mut level).await;
            level.proposed = proposed;
            let committed = self.drain(store, archive, gateway, now).await;
            // drain already folded its part into totals
            self.totals.proposed += level.proposed;
            self.totals.offloaded += level.offloaded;
            self.totals.failed += level.failed;
            level.absorb(committed);
            report.absorb(level);
        }

        if report.committed > 0 || report.stale > 0 {
            tracing::info!(
                "Consolidation pass: {} committed, {} stale, {} units archived",
                report.committed,
                report.stale,
                report.units_archived
            );
        }
        report
    }
}
