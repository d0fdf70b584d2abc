//! Entity lifecycle through the heartbeat

mod common;

use chrono::Utc;
use common::{test_config, test_world};
use strata_core::{DeathCause, Heartbeat, IngestRequest, StrataError, Tier};

#[tokio::test]
async fn test_telomere_exhaustion_kills_with_memorials() {
    let mut config = test_config();
    config.lifecycle.initial_population = 4;
    for species in &mut config.lifecycle.species {
        species.telomere = 3;
    }

    let mut world = test_world(config);
    world.populate(0).unwrap();
    let born = world.population().alive_ids();
    assert_eq!(born.len(), 4);

    let mut heartbeat = Heartbeat::with_default_tasks(world);
    for _ in 0..5 {
        heartbeat.tick().await;
    }

    let world = heartbeat.world();
    assert_eq!(world.population().len(), 0);
    assert_eq!(world.population().deceased_count(), 4);
    assert_eq!(world.ledger().account_count(), 0);
    assert_eq!(heartbeat.ledger_violations(), 0);

    for id in &born {
        let record = world.population().death_record(id).unwrap();
        assert_eq!(record.cause, DeathCause::TelomereExhausted);
        let memorial = record.memorial.expect("memorial unit");
        let unit = world.units().get(&memorial).unwrap();
        assert_eq!(unit.tier, Tier::Regular);
        assert!(unit.tags().any(|t| t == "memorial"));
    }
}

#[test]
fn test_dead_entities_stay_dead() {
    let mut world = test_world(test_config());
    let id = world.spawn_entity(None, 0).unwrap();
    let now = Utc::now();

    let record = world.decree_death(id, 2, now).unwrap();
    assert_eq!(record.cause, DeathCause::Decree);
    assert!(world.population().is_dead(&id));

    assert!(matches!(
        world.decree_death(id, 3, now),
        Err(StrataError::InvalidOperation(_))
    ));
    assert!(matches!(
        world.ingest(IngestRequest::new("late", "late", ["x"]).with_owner(id), now),
        Err(StrataError::EntityNotFound(_))
    ));
    assert_eq!(world.counters().deaths, 1);
}

#[tokio::test]
async fn test_population_floor_task_refills() {
    let mut config = test_config();
    config.lifecycle.min_population = 3;
    config.lifecycle.population_every = 1;

    let mut heartbeat = Heartbeat::with_default_tasks(test_world(config));
    assert_eq!(heartbeat.world().population().len(), 0);

    let snapshot = heartbeat.tick().await;
    assert_eq!(snapshot.alive, 3);
    assert_eq!(snapshot.world.births, 3);
}

#[tokio::test]
async fn test_entities_produce_owned_units() {
    let mut config = test_config();
    config.lifecycle.initial_population = 5;
    // no aggregates, so every owned unit is a direct contribution
    config.heartbeat.consolidation_every = 1_000;
    let mut world = test_world(config);
    world.populate(0).unwrap();

    let mut heartbeat = Heartbeat::with_default_tasks(world);
    for _ in 0..6 {
        heartbeat.tick().await;
    }

    let world = heartbeat.world();
    let contributed: usize = world.population().iter().map(|e| e.contributions.len()).sum();
    let owned = world.units().iter().filter(|u| u.owner.is_some()).count();
    assert!(contributed > 0);
    assert_eq!(owned, contributed);
}
