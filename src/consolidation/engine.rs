// Consolidation engine
//
// Turns one validated candidate into exactly one aggregate:
// 1. Stale check: band, and every member still exists at the source tier,
//    resident and unconsolidated
// 2. Synthesize the aggregate payload
// 3. Aggregate parents = member ids
// 4. Each member gains the aggregate as its child
// 5. Member payloads move to the archive; stubs stay in the store
// 6. Insert the aggregate
//
// Steps 3-6 are built as a staged commit and swapped into the store at once.
// If any archive write fails, the blobs already written are discarded and the
// store is left untouched.

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::detector::ClusterCandidate;
use super::synthesis::synthesize;
use crate::archive::{ArchiveBackend, ArchiveError, ArchiveHandle};
use crate::brain::BrainGateway;
use crate::config::{Band, ConsolidationConfig};
use crate::types::{Residency, Tier, UnitId};
use crate::units::{StagedCommit, StoreError, Unit, UnitPayload, UnitStore};

#[derive(Error, Debug)]
pub enum ConsolidationError {
    #[error("Stale candidate: member {id} {reason}")]
    Stale { id: UnitId, reason: String },

    #[error("Candidate of {count} members outside band {min}..={max}")]
    BandViolation { count: usize, min: usize, max: usize },

    #[error("Tier {0} cannot be consolidated")]
    NotConsolidatable(Tier),

    #[error("Archive failed during consolidation: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Store rejected consolidation: {0}")]
    Store(#[from] StoreError),
}

impl ConsolidationError {
    fn stale(id: UnitId, reason: impl Into<String>) -> Self {
        ConsolidationError::Stale {
            id,
            reason: reason.into(),
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, ConsolidationError::Stale { .. })
    }
}

/// Result of a committed consolidation
#[derive(Debug, Clone, PartialEq)]
pub struct Consolidated {
    pub aggregate: UnitId,
    pub tier: Tier,
    pub members: usize,
    pub used_brain: bool,
}

#[derive(Debug, Clone)]
pub struct ConsolidationEngine {
    config: ConsolidationConfig,
}

impl ConsolidationEngine {
    pub fn new(config: ConsolidationConfig) -> Self {
        Self { config }
    }

    fn band_for(&self, tier: Tier) -> Result<Band, ConsolidationError> {
        match tier {
            Tier::Regular => Ok(self.config.aggregate_band),
            Tier::Aggregate => Ok(self.config.meta_band),
            other => Err(ConsolidationError::NotConsolidatable(other)),
        }
    }

    /// Optimistic stale check against the current store
    pub fn validate(&self, store: &UnitStore, candidate: &ClusterCandidate) -> Result<(), ConsolidationError> {
        let band = self.band_for(candidate.source_tier)?;
        if !band.contains(candidate.members.len()) {
            return Err(ConsolidationError::BandViolation {
                count: candidate.members.len(),
                min: band.min,
                max: band.max,
            });
        }
        if candidate.source_tier.next() != Some(candidate.proposed_tier) {
            return Err(ConsolidationError::NotConsolidatable(candidate.source_tier));
        }

        for id in &candidate.members {
            let unit = store
                .get(id)
                .ok_or_else(|| ConsolidationError::stale(*id, "no longer exists"))?;
            if unit.tier != candidate.source_tier {
                return Err(ConsolidationError::stale(
                    *id,
                    format!("changed tier to {}", unit.tier),
                ));
            }
            if !unit.is_resident() || unit.payload.is_none() {
                return Err(ConsolidationError::stale(*id, "is no longer resident"));
            }
            if unit.lineage.is_consolidated() {
                return Err(ConsolidationError::stale(*id, "was already consolidated"));
            }
        }
        Ok(())
    }

    /// Validate, synthesize, archive and swap in one aggregate
    pub async fn commit(
        &self,
        store: &mut UnitStore,
        archive: &dyn ArchiveBackend,
        gateway: &BrainGateway,
        candidate: &ClusterCandidate,
        now: DateTime<Utc>,
    ) -> Result<Consolidated, ConsolidationError> {
        self.validate(store, candidate)?;

        let members: Vec<Unit> = candidate
            .members
            .iter()
            .filter_map(|id| store.get(id).cloned())
            .collect();
        let payloads: Vec<&UnitPayload> = members.iter().filter_map(|u| u.payload.as_ref()).collect();

        let synthesis = synthesize(gateway, &payloads, candidate.proposed_tier, self.config.max_tags).await;

        let salience = members.iter().map(|u| u.salience).sum::<f32>() / members.len() as f32;
        let owner = members
            .first()
            .and_then(|u| u.owner)
            .filter(|o| members.iter().all(|u| u.owner == Some(*o)));

        let mut aggregate = Unit::new(synthesis.payload, owner, salience, now);
        aggregate.tier = candidate.proposed_tier;
        aggregate.lineage.parents = candidate.members.clone();

        let handles = archive_all(archive, &members)?;

        let replace = members
            .into_iter()
            .zip(handles)
            .map(|(mut member, handle)| {
                member.lineage.children.insert(aggregate.id);
                member.payload = None;
                member.residency = Residency::Archived;
                member.archive_handle = Some(handle);
                member
            })
            .collect::<Vec<_>>();

        let outcome = Consolidated {
            aggregate: aggregate.id,
            tier: aggregate.tier,
            members: replace.len(),
            used_brain: synthesis.used_brain,
        };

        store.apply(StagedCommit {
            replace,
            insert: vec![aggregate],
        });

        tracing::debug!(
            "Consolidated {} {} units into {} {}",
            outcome.members,
            candidate.source_tier,
            outcome.tier,
            outcome.aggregate
        );
        Ok(outcome)
    }
}

/// Archive every member payload, rolling back written blobs on failure
fn archive_all(archive: &dyn ArchiveBackend, members: &[Unit]) -> Result<Vec<ArchiveHandle>, ConsolidationError> {
    let mut handles = Vec::with_capacity(members.len());
    for member in members {
        let result = match &member.payload {
            Some(payload) => archive.archive(member.id, payload),
            None => Err(ArchiveError::NotFound(ArchiveHandle(member.id.to_string()))),
        };
        match result {
            Ok(handle) => handles.push(handle),
            Err(e) => {
                for handle in &handles {
                    if let Err(discard_err) = archive.discard(handle) {
                        tracing::warn!("Failed to discard archived blob {}: {}", handle, discard_err);
                    }
                }
                return Err(e.into());
            }
        }
    }
    Ok(handles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::InMemoryArchive;
    use crate::config::BrainConfig;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn seeded_store(n: usize) -> (UnitStore, BTreeSet<UnitId>) {
        let mut store = UnitStore::new(100);
        let mut ids = BTreeSet::new();
        for i in 0..n {
            let tags = ["harbor".to_string()].into_iter().collect();
            let unit = Unit::new(
                UnitPayload::new(format!("note {}", i), format!("note {}", i), tags),
                None,
                0.6,
                Utc::now(),
            );
            ids.insert(store.insert(unit).unwrap());
        }
        (store, ids)
    }

    fn candidate(members: BTreeSet<UnitId>) -> ClusterCandidate {
        ClusterCandidate {
            members,
            source_tier: Tier::Regular,
            proposed_tier: Tier::Aggregate,
            cohesion: 1.0,
        }
    }

    #[tokio::test]
    async fn test_commit_links_lineage_both_ways() {
        let (mut store, ids) = seeded_store(6);
        let archive = InMemoryArchive::new();
        let gateway = BrainGateway::offline(&BrainConfig::default());
        let engine = ConsolidationEngine::new(ConsolidationConfig::default());

        let done = engine
            .commit(&mut store, &archive, &gateway, &candidate(ids.clone()), Utc::now())
            .await
            .unwrap();

        let aggregate = store.get(&done.aggregate).unwrap();
        assert_eq!(aggregate.tier, Tier::Aggregate);
        assert_eq!(aggregate.lineage.parents, ids);
        assert!(aggregate.is_resident());

        for id in &ids {
            let member = store.get(id).unwrap();
            assert_eq!(member.tier, Tier::Regular);
            assert!(member.lineage.children.contains(&done.aggregate));
            assert_eq!(member.residency, Residency::Archived);
            assert!(member.payload.is_none());
            let handle = member.archive_handle.as_ref().unwrap();
            assert!(archive.rehydrate(handle).is_ok());
        }
        assert_eq!(store.in_heap_count(), 1);
    }

    #[tokio::test]
    async fn test_band_violation_rejected() {
        let (mut store, ids) = seeded_store(4);
        let archive = InMemoryArchive::new();
        let gateway = BrainGateway::offline(&BrainConfig::default());
        let engine = ConsolidationEngine::new(ConsolidationConfig::default());

        let err = engine
            .commit(&mut store, &archive, &gateway, &candidate(ids), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, ConsolidationError::BandViolation { count: 4, .. }));
        assert!(archive.is_empty());
        assert_eq!(store.len(), 4);
    }

    #[tokio::test]
    async fn test_missing_member_aborts_whole_candidate() {
        let (mut store, mut ids) = seeded_store(5);
        ids.insert(UnitId::new());
        let archive = InMemoryArchive::new();
        let gateway = BrainGateway::offline(&BrainConfig::default());
        let engine = ConsolidationEngine::new(ConsolidationConfig::default());

        let err = engine
            .commit(&mut store, &archive, &gateway, &candidate(ids), Utc::now())
            .await
            .unwrap_err();
        assert!(err.is_stale());
        assert!(store.iter().all(|u| !u.lineage.is_consolidated()));
        assert!(archive.is_empty());
    }

    struct FlakyArchive {
        inner: InMemoryArchive,
        fail_after: usize,
        writes: AtomicUsize,
    }

    impl ArchiveBackend for FlakyArchive {
        fn archive(&self, unit_id: UnitId, payload: &UnitPayload) -> Result<ArchiveHandle, ArchiveError> {
            if self.writes.fetch_add(1, Ordering::SeqCst) >= self.fail_after {
                return Err(ArchiveError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk full")));
            }
            self.inner.archive(unit_id, payload)
        }

        fn rehydrate(&self, handle: &ArchiveHandle) -> Result<UnitPayload, ArchiveError> {
            self.inner.rehydrate(handle)
        }

        fn discard(&self, handle: &ArchiveHandle) -> Result<(), ArchiveError> {
            self.inner.discard(handle)
        }
    }

    #[tokio::test]
    async fn test_archive_failure_rolls_back() {
        let (mut store, ids) = seeded_store(6);
        let archive = FlakyArchive {
            inner: InMemoryArchive::new(),
            fail_after: 3,
            writes: AtomicUsize::new(0),
        };
        let gateway = BrainGateway::offline(&BrainConfig::default());
        let engine = ConsolidationEngine::new(ConsolidationConfig::default());

        let err = engine
            .commit(&mut store, &archive, &gateway, &candidate(ids.clone()), Utc::now())
            .await
            .unwrap_err();

        assert!(matches!(err, ConsolidationError::Archive(_)));
        assert!(archive.inner.is_empty());
        assert_eq!(store.len(), 6);
        for id in &ids {
            let unit = store.get(id).unwrap();
            assert!(unit.is_resident());
            assert!(unit.payload.is_some());
        }
    }

    #[tokio::test]
    async fn test_owner_kept_only_when_shared() {
        let (mut store, ids) = seeded_store(5);
        let archive = InMemoryArchive::new();
        let gateway = BrainGateway::offline(&BrainConfig::default());
        let engine = ConsolidationEngine::new(ConsolidationConfig::default());

        let done = engine
            .commit(&mut store, &archive, &gateway, &candidate(ids), Utc::now())
            .await
            .unwrap();
        assert_eq!(store.get(&done.aggregate).unwrap().owner, None);
        assert!((store.get(&done.aggregate).unwrap().salience - 0.6).abs() < 1e-6);
    }
}
