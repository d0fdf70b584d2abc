//! Property tests for the invariants that must hold for any input

mod common;

use chrono::{Duration, Utc};
use common::{test_config, test_world};
use proptest::prelude::*;
use std::collections::{BTreeSet, HashSet};
use strata_core::config::{
    Band, ConsolidationConfig, ForgettingConfig, InflationConfig, ResourceAmounts, TaxPolicy, UbiConfig,
    WealthCapConfig,
};
use strata_core::consolidation::{ClusterDetector, Placement, UnitView};
use strata_core::ledger::{apply_inflation_tax, enforce_wealth_cap, issue_ubi};
use strata_core::units::{Unit, UnitPayload, UnitStore};
use strata_core::{EntityId, ForgettingEngine, IngestRequest, Ledger, ResourceKind, Tier, UnitId};

const TAGS: [&str; 5] = ["salt", "wind", "reef", "gull", "kelp"];

fn unit_strategy() -> impl Strategy<Value = (Vec<usize>, f32)> {
    (prop::collection::vec(0..TAGS.len(), 1..3), 0.0f32..1.0)
}

fn make_unit(tags: &[usize], salience: f32, age_minutes: i64) -> Unit {
    let tags: BTreeSet<String> = tags.iter().map(|i| TAGS[*i].to_string()).collect();
    let at = Utc::now() - Duration::minutes(age_minutes);
    Unit::new(UnitPayload::new("body", "summary", tags), None, salience, at)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn detector_respects_band_and_disjointness(
        units in prop::collection::vec(unit_strategy(), 0..80),
        min in 2usize..6,
        extra in 0usize..10,
    ) {
        let band = Band::new(min, min + extra);
        let config = ConsolidationConfig {
            aggregate_band: band,
            ..ConsolidationConfig::default()
        };
        let views: Vec<UnitView> = units
            .iter()
            .map(|(tags, salience)| UnitView::from_unit(&make_unit(tags, *salience, 0)))
            .collect();
        let known: HashSet<UnitId> = views.iter().map(|v| v.id).collect();

        let candidates = ClusterDetector::new(config).detect(&views, Tier::Regular);

        let mut seen = HashSet::new();
        for candidate in &candidates {
            prop_assert!(band.contains(candidate.len()));
            prop_assert_eq!(candidate.source_tier, Tier::Regular);
            prop_assert_eq!(candidate.proposed_tier, Tier::Aggregate);
            for id in &candidate.members {
                prop_assert!(known.contains(id));
                prop_assert!(seen.insert(*id), "unit in two clusters");
            }
        }
    }

    #[test]
    fn forgetting_is_idempotent(
        units in prop::collection::vec((unit_strategy(), 0i64..600), 0..40),
    ) {
        let mut store = UnitStore::new(1_000);
        for ((tags, salience), age) in &units {
            store.insert(make_unit(tags, *salience * 0.3, *age)).unwrap();
        }
        let engine = ForgettingEngine::new(
            ForgettingConfig::default(),
            std::time::Duration::from_secs(3_600),
        );
        let now = Utc::now();
        let none = HashSet::new();
        let unplaceable = Placement::unplaceable();

        let (planned, _) = engine.candidates(&store, &none, &unplaceable, now);
        let first = engine.run(&mut store, &none, &unplaceable, now);
        prop_assert_eq!(&first.tombstoned, &planned);

        let second = engine.run(&mut store, &none, &unplaceable, now);
        prop_assert!(second.tombstoned.is_empty());
        prop_assert_eq!(store.tier_counts().tombstone, planned.len());
        for id in &planned {
            prop_assert!(store.get(id).unwrap().payload.is_none());
        }
    }

    #[test]
    fn lineage_links_both_ways(count in 0usize..70, seed in any::<u64>()) {
        let mut config = test_config();
        config.seed = Some(seed);
        let mut world = test_world(config);
        let now = Utc::now();
        for i in 0..count {
            let tag = TAGS[i % 2];
            world
                .ingest(IngestRequest::new(format!("n{}", i), format!("n{}", i), [tag]).with_salience(0.8), now)
                .unwrap();
        }

        tokio_test::block_on(world.run_consolidation(now));

        let config = &world.config().consolidation;
        let mut parented = HashSet::new();
        for upper in world.units().iter().filter(|u| !u.lineage.parents.is_empty()) {
            let (band, below) = match upper.tier {
                Tier::Aggregate => (config.aggregate_band, Tier::Regular),
                Tier::MetaAggregate => (config.meta_band, Tier::Aggregate),
                other => return Err(TestCaseError::fail(format!("{} unit with parents", other))),
            };
            prop_assert!(band.contains(upper.lineage.parents.len()));
            for parent in &upper.lineage.parents {
                prop_assert!(parented.insert(*parent), "parent in two aggregates");
                let unit = world.units().get(parent).unwrap();
                prop_assert_eq!(unit.tier, below);
                prop_assert_eq!(unit.lineage.children.len(), 1);
                prop_assert!(unit.lineage.children.contains(&upper.id));
            }
        }
        let consolidated = world.units().iter().filter(|u| u.lineage.is_consolidated()).count();
        prop_assert_eq!(consolidated, parented.len());
    }

    #[test]
    fn ledger_operations_conserve_supply(
        ops in prop::collection::vec((0u8..6, 0usize..4, 0usize..4, 0u64..200), 1..60),
    ) {
        let mut ledger = Ledger::new(&ResourceAmounts::uniform(10_000));
        let accounts: Vec<EntityId> = (0..4).map(|_| EntityId::new()).collect();
        for id in &accounts {
            ledger.open_account(*id, &ResourceAmounts::uniform(500)).unwrap();
        }
        let start = ledger.snapshot();

        let ubi = UbiConfig { every: 1, kind: ResourceKind::Data, amount: 7 };
        let tax = InflationConfig {
            every: 1,
            growth_threshold_bps: 1,
            tax_bps: 500,
            wealthy_share_bps: 1,
            policy: TaxPolicy::Burn,
        };
        let cap = WealthCapConfig { every: 1, cap_bps: 3_000, redistribute_bps: 5_000 };

        for (op, a, b, amount) in ops {
            let kind = ResourceKind::ALL[(amount as usize) % ResourceKind::ALL.len()];
            let before = ledger.clone();
            let result = match op {
                0 => ledger.credit(accounts[a], kind, amount).map(|_| ()),
                1 => ledger.debit(accounts[a], kind, amount).map(|_| ()),
                2 => ledger.transfer(accounts[a], accounts[b], kind, amount).map(|_| ()),
                3 => issue_ubi(&mut ledger, &ubi).map(|_| ()),
                4 => apply_inflation_tax(&mut ledger, &tax).map(|_| ()),
                _ => enforce_wealth_cap(&mut ledger, &cap).map(|_| ()),
            };
            if result.is_err() {
                // rejected operations leave no trace
                prop_assert_eq!(ledger.supply(), before.supply());
                for id in &accounts {
                    prop_assert_eq!(ledger.balances(*id).unwrap(), before.balances(*id).unwrap());
                }
            }
            prop_assert!(ledger.verify_since(&start).is_ok());
        }
    }
}
