//! Per-tick metrics snapshot
//!
//! Read-only view of the world published after every tick.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::task::Phase;
use crate::brain::BrainStats;
use crate::consolidation::PassReport;
use crate::ledger::Balances;
use crate::types::ResourceKind;
use crate::units::TierCounts;
use crate::world::{World, WorldCounters};

/// Invocation counters for one task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMetrics {
    pub name: String,
    pub phase: Phase,
    pub runs: u64,
    pub failures: u64,
    pub panics: u64,
    pub timeouts: u64,
    pub skipped: u64,
    pub last_duration_ms: u64,
}

impl TaskMetrics {
    pub fn new(name: impl Into<String>, phase: Phase) -> Self {
        Self {
            name: name.into(),
            phase,
            runs: 0,
            failures: 0,
            panics: 0,
            timeouts: 0,
            skipped: 0,
            last_duration_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub tick: u64,
    pub at: DateTime<Utc>,
    pub tiers: TierCounts,
    pub in_heap: usize,
    pub max_in_heap: usize,
    pub archived: usize,
    pub heap_bytes: usize,
    pub backlog: usize,
    pub under_pressure: bool,
    pub supply: BTreeMap<ResourceKind, u64>,
    pub pool: BTreeMap<ResourceKind, u64>,
    pub issued: BTreeMap<ResourceKind, u64>,
    pub burned: BTreeMap<ResourceKind, u64>,
    pub ledger_violations: u64,
    pub alive: usize,
    pub dead: usize,
    pub protected: usize,
    pub consolidation: PassReport,
    pub world: WorldCounters,
    pub brain: BrainStats,
    pub tasks: Vec<TaskMetrics>,
}

fn by_kind(balances: &Balances) -> BTreeMap<ResourceKind, u64> {
    balances.iter().collect()
}

impl MetricsSnapshot {
    pub fn capture(
        tick: u64,
        at: DateTime<Utc>,
        world: &World,
        tasks: Vec<TaskMetrics>,
        ledger_violations: u64,
    ) -> Self {
        let units = world.units();
        let ledger = world.ledger();

        let mut pool = Balances::default();
        for kind in ResourceKind::ALL {
            pool[kind] = ledger.pool(kind);
        }
        let journal = ledger.journal();

        Self {
            tick,
            at,
            tiers: units.tier_counts(),
            in_heap: units.in_heap_count(),
            max_in_heap: units.max_in_heap(),
            archived: units.archived_count(),
            heap_bytes: units.heap_bytes(),
            backlog: world.backlog_len(),
            under_pressure: world.under_pressure(),
            supply: by_kind(&ledger.supply()),
            pool: by_kind(&pool),
            issued: by_kind(&journal.issued),
            burned: by_kind(&journal.burned),
            ledger_violations,
            alive: world.population().len(),
            dead: world.population().deceased_count(),
            protected: world.forgetting().protected_count(),
            consolidation: world.consolidator().totals(),
            world: world.counters(),
            brain: world.brain().stats(),
            tasks,
        }
    }

    /// Total failures across all tasks
    pub fn task_failures(&self) -> u64 {
        self.tasks.iter().map(|t| t.failures).sum()
    }

    pub fn task(&self, name: &str) -> Option<&TaskMetrics> {
        self.tasks.iter().find(|t| t.name == name)
    }
}
