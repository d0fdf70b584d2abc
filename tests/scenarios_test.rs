//! End-to-end scenarios across the unit store, consolidation, forgetting,
//! ledger and heartbeat

mod common;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use common::{long_ago, seed_units, test_config, test_world};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use strata_core::archive::InMemoryArchive;
use strata_core::brain::BrainGateway;
use strata_core::config::{Band, BrainConfig, ForgettingConfig};
use strata_core::consolidation::{ClusterDetector, ConsolidationEngine, Placement, UnitView};
use strata_core::heartbeat::{TaskContext, TaskError, TaskReport};
use strata_core::units::{Unit, UnitPayload, UnitStore};
use strata_core::{
    ForgettingEngine, Heartbeat, HeartbeatTask, LedgerError, Phase, ResourceKind, Tier, UnitId,
};

#[tokio::test]
async fn test_scenario_a_twenty_units_become_one_aggregate() {
    let mut world = test_world(test_config());
    let now = Utc::now();
    let ids = seed_units(&mut world, 20, &["tides", "moon"], 0.8, now);

    let report = world.run_consolidation(now).await;
    assert_eq!(report.committed, 1);

    let aggregates: Vec<&Unit> = world
        .units()
        .iter()
        .filter(|u| u.tier == Tier::Aggregate)
        .collect();
    assert_eq!(aggregates.len(), 1);

    let aggregate = aggregates[0];
    let expected: std::collections::BTreeSet<UnitId> = ids.iter().copied().collect();
    assert_eq!(aggregate.lineage.parents, expected);
    assert!(aggregate.payload.is_some());

    for id in &ids {
        let unit = world.units().get(id).unwrap();
        assert!(unit.lineage.children.contains(&aggregate.id));
        assert!(!unit.is_resident());
        assert!(unit.archive_handle.is_some());
    }
    assert_eq!(world.units().eligible(Tier::Regular).count(), 0);

    // archived parents stay readable
    let payload = world.rehydrate(&ids[0]).unwrap();
    assert_eq!(payload.summary, "note 0");
}

#[tokio::test]
async fn test_scenario_b_undersized_group_is_forgotten_not_consolidated() {
    let mut world = test_world(test_config());
    let ids = seed_units(&mut world, 4, &["tides", "moon"], 0.05, long_ago());

    let now = Utc::now();
    let consolidation = world.run_consolidation(now).await;
    assert_eq!(consolidation.committed, 0);

    let report = world.run_forgetting(now);
    let mut forgotten = report.tombstoned.clone();
    forgotten.sort();
    let mut expected = ids.clone();
    expected.sort();
    assert_eq!(forgotten, expected);

    for id in &ids {
        let unit = world.units().get(id).unwrap();
        assert_eq!(unit.id, *id);
        assert_eq!(unit.tier, Tier::Tombstone);
        assert!(unit.payload.is_none());
    }
    assert_eq!(world.units().tier_counts().tombstone, 4);
}

#[test]
fn test_forgetting_spares_units_outside_the_detection_batch() {
    let mut config = test_config();
    config.consolidation.batch_size = 5;
    let mut world = test_world(config);

    // Five older, unrelated, salient units fill the detection batch
    let older = long_ago() - Duration::hours(1);
    for tag in ["amber", "basalt", "cinder", "dune", "ember"] {
        seed_units(&mut world, 1, &[tag], 0.9, older);
    }
    // A valid six-unit cluster the batch never reaches
    seed_units(&mut world, 1, &["lantern", "harbor"], 0.8, long_ago());
    let faint = seed_units(&mut world, 5, &["lantern", "harbor"], 0.05, long_ago());

    let report = world.run_forgetting(Utc::now());

    assert!(report.tombstoned.is_empty());
    assert_eq!(report.skipped_unexamined, 5);
    for id in &faint {
        assert_eq!(world.units().get(id).unwrap().tier, Tier::Regular);
    }
}

#[test]
fn test_scenario_c_overdraw_changes_nothing() {
    let mut world = test_world(test_config());
    let id = world.spawn_entity(None, 0).unwrap();

    let held = world.ledger().balance(id, ResourceKind::Compute).unwrap();
    world.ledger_mut().debit(id, ResourceKind::Compute, held).unwrap();
    assert_eq!(world.ledger().balance(id, ResourceKind::Compute).unwrap(), 0);

    let supply = world.ledger().supply();
    let units = world.units().len();
    let entity_before = serde_json::to_value(world.population().get(&id).unwrap()).unwrap();

    let err = world.ledger_mut().debit(id, ResourceKind::Compute, 1).unwrap_err();
    assert!(matches!(
        err,
        LedgerError::InsufficientFunds {
            available: 0,
            requested: 1,
            ..
        }
    ));

    assert_eq!(world.ledger().balance(id, ResourceKind::Compute).unwrap(), 0);
    assert_eq!(world.ledger().supply(), supply);
    assert_eq!(world.units().len(), units);
    let entity_after = serde_json::to_value(world.population().get(&id).unwrap()).unwrap();
    assert_eq!(entity_before, entity_after);
}

fn tagged(summary: &str) -> UnitPayload {
    UnitPayload::new(
        format!("{} content", summary),
        summary,
        ["orbit", "comet"].iter().map(|t| t.to_string()).collect(),
    )
}

#[tokio::test]
async fn test_scenario_d_forgotten_member_makes_candidate_stale() {
    let mut config = test_config();
    config.consolidation.aggregate_band = Band::new(3, 20);

    let now = Utc::now();
    let old = now - Duration::hours(6);
    let mut store = UnitStore::new(100);
    let a = store.insert(Unit::new(tagged("a"), None, 0.9, now)).unwrap();
    let b = store.insert(Unit::new(tagged("b"), None, 0.05, old)).unwrap();
    let c = store.insert(Unit::new(tagged("c"), None, 0.9, now)).unwrap();

    let views: Vec<UnitView> = store.eligible(Tier::Regular).map(UnitView::from_unit).collect();
    let detector = ClusterDetector::new(config.consolidation.clone());
    let candidates = detector.detect(&views, Tier::Regular);
    assert_eq!(candidates.len(), 1);
    let candidate = candidates[0].clone();
    assert_eq!(candidate.members, [a, b, c].into_iter().collect());

    // a forgetting pass that does not know about the candidate
    let forgetting = ForgettingEngine::new(ForgettingConfig::default(), config.units.salience_half_life);
    let report = forgetting.run(&mut store, &HashSet::new(), &Placement::unplaceable(), now);
    assert_eq!(report.tombstoned, vec![b]);

    let archive = InMemoryArchive::new();
    let gateway = BrainGateway::offline(&BrainConfig::default());
    let engine = ConsolidationEngine::new(config.consolidation.clone());
    let err = engine
        .commit(&mut store, &archive, &gateway, &candidate, now)
        .await
        .unwrap_err();
    assert!(err.is_stale());

    for id in [a, c] {
        let unit = store.get(&id).unwrap();
        assert_eq!(unit.tier, Tier::Regular);
        assert!(unit.is_resident());
        assert!(!unit.lineage.is_consolidated());
    }
    assert_eq!(store.tier_counts().aggregate, 0);
    assert!(archive.is_empty());
}

#[tokio::test]
async fn test_queued_candidate_shields_members_from_forgetting() {
    let mut config = test_config();
    config.consolidation.aggregate_band = Band::new(3, 20);
    let mut world = test_world(config);

    let now = Utc::now();
    let fresh = seed_units(&mut world, 2, &["orbit", "comet"], 0.9, now);
    let stale = seed_units(&mut world, 1, &["orbit", "comet"], 0.05, long_ago());

    let views: Vec<UnitView> = world
        .units()
        .eligible(Tier::Regular)
        .map(UnitView::from_unit)
        .collect();
    let candidate = world.consolidator().detector().detect(&views, Tier::Regular).remove(0);
    world.enqueue_candidate(candidate);
    assert!(world.consolidator().pending_members().contains(&stale[0]));

    let report = world.run_forgetting(now);
    assert!(report.tombstoned.is_empty());
    assert_eq!(report.skipped_pending, 1);

    let pass = world.run_consolidation(now).await;
    assert_eq!(pass.committed, 1);
    for id in fresh.iter().chain(stale.iter()) {
        assert!(world.units().get(id).unwrap().lineage.is_consolidated());
    }
    assert!(world.consolidator().pending_members().is_empty());
}

struct Recorder {
    name: &'static str,
    every: u64,
    fail: bool,
    ticks: Arc<Mutex<Vec<u64>>>,
}

#[async_trait]
impl HeartbeatTask for Recorder {
    fn name(&self) -> &str {
        self.name
    }

    fn phase(&self) -> Phase {
        Phase::System
    }

    fn frequency(&self) -> u64 {
        self.every
    }

    async fn run(&mut self, ctx: &mut TaskContext<'_>) -> Result<TaskReport, TaskError> {
        self.ticks.lock().unwrap().push(ctx.tick);
        if self.fail {
            return Err(TaskError::Failed("always fails".to_string()));
        }
        Ok(TaskReport::new(1, 0))
    }
}

#[tokio::test]
async fn test_scenario_e_frequency_and_failure_isolation() {
    let mut heartbeat = Heartbeat::new(test_world(test_config()));

    let every_five = Arc::new(Mutex::new(Vec::new()));
    let failing = Arc::new(Mutex::new(Vec::new()));
    let every_tick = Arc::new(Mutex::new(Vec::new()));

    heartbeat.register(Box::new(Recorder {
        name: "failing",
        every: 1,
        fail: true,
        ticks: failing.clone(),
    }));
    heartbeat.register(Box::new(Recorder {
        name: "every_five",
        every: 5,
        fail: false,
        ticks: every_five.clone(),
    }));
    heartbeat.register(Box::new(Recorder {
        name: "every_tick",
        every: 1,
        fail: false,
        ticks: every_tick.clone(),
    }));

    let mut last = None;
    for _ in 0..10 {
        last = Some(heartbeat.tick().await);
    }

    assert_eq!(*every_five.lock().unwrap(), vec![5, 10]);
    assert_eq!(every_tick.lock().unwrap().len(), 10);
    assert_eq!(failing.lock().unwrap().len(), 10);

    let snapshot = last.unwrap();
    assert_eq!(snapshot.task("failing").unwrap().failures, 10);
    assert_eq!(snapshot.task("every_tick").unwrap().failures, 0);
    assert_eq!(snapshot.task("every_five").unwrap().runs, 2);
}
