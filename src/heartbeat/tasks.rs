// Standard heartbeat tasks
//
// Thin adapters from the scheduler onto `World` operations. Frequencies
// come from configuration at construction time.

use async_trait::async_trait;

use super::task::{HeartbeatTask, Phase, TaskContext, TaskError, TaskReport};
use crate::config::StrataConfig;
use crate::entities::SleepTransition;

/// One behavior per awake entity
#[derive(Debug, Default)]
pub struct BehaviorTask;

#[async_trait]
impl HeartbeatTask for BehaviorTask {
    fn name(&self) -> &str {
        "behavior"
    }

    fn phase(&self) -> Phase {
        Phase::Entity
    }

    async fn run(&mut self, ctx: &mut TaskContext<'_>) -> Result<TaskReport, TaskError> {
        let id = ctx.entity()?;
        let report = match ctx.world.entity_behave(id, ctx.now).await? {
            Some(behavior) => TaskReport::new(1, usize::from(behavior.is_active())).with_note(behavior.to_string()),
            None => TaskReport::new(1, 0).with_note("asleep"),
        };
        Ok(report)
    }
}

/// Sleep and wake transitions
#[derive(Debug, Default)]
pub struct SleepCycleTask;

#[async_trait]
impl HeartbeatTask for SleepCycleTask {
    fn name(&self) -> &str {
        "sleep_cycle"
    }

    fn phase(&self) -> Phase {
        Phase::Entity
    }

    async fn run(&mut self, ctx: &mut TaskContext<'_>) -> Result<TaskReport, TaskError> {
        let id = ctx.entity()?;
        let transition = ctx.world.entity_sleep_cycle(id, ctx.now)?;
        Ok(TaskReport::new(1, usize::from(transition != SleepTransition::None)))
    }
}

/// Stage update and survival check
#[derive(Debug, Default)]
pub struct HomeostasisTask;

#[async_trait]
impl HeartbeatTask for HomeostasisTask {
    fn name(&self) -> &str {
        "homeostasis"
    }

    fn phase(&self) -> Phase {
        Phase::Entity
    }

    async fn run(&mut self, ctx: &mut TaskContext<'_>) -> Result<TaskReport, TaskError> {
        let id = ctx.entity()?;
        let report = match ctx.world.entity_homeostasis(id, ctx.tick, ctx.now)? {
            Some(cause) => TaskReport::new(1, 1).with_note(format!("died: {:?}", cause)),
            None => TaskReport::new(1, 0),
        };
        Ok(report)
    }
}

/// Decays salience of every resident unit
#[derive(Debug)]
pub struct SalienceDecayTask {
    every: u64,
}

impl SalienceDecayTask {
    pub fn new(every: u64) -> Self {
        Self { every }
    }
}

#[async_trait]
impl HeartbeatTask for SalienceDecayTask {
    fn name(&self) -> &str {
        "salience_decay"
    }

    fn phase(&self) -> Phase {
        Phase::System
    }

    fn frequency(&self) -> u64 {
        self.every
    }

    async fn run(&mut self, ctx: &mut TaskContext<'_>) -> Result<TaskReport, TaskError> {
        let decayed = ctx.world.decay_salience(ctx.now);
        Ok(TaskReport::new(ctx.world.units().in_heap_count(), decayed))
    }
}

#[derive(Debug)]
pub struct ReproductionTask {
    every: u64,
}

impl ReproductionTask {
    pub fn new(every: u64) -> Self {
        Self { every }
    }
}

#[async_trait]
impl HeartbeatTask for ReproductionTask {
    fn name(&self) -> &str {
        "reproduction"
    }

    fn phase(&self) -> Phase {
        Phase::System
    }

    fn frequency(&self) -> u64 {
        self.every
    }

    async fn run(&mut self, ctx: &mut TaskContext<'_>) -> Result<TaskReport, TaskError> {
        let alive = ctx.world.population().len();
        let born = ctx.world.reproduce(ctx.tick)?;
        Ok(TaskReport::new(alive, born))
    }
}

/// Spawns entities until the minimum population is met
#[derive(Debug)]
pub struct PopulationFloorTask {
    every: u64,
}

impl PopulationFloorTask {
    pub fn new(every: u64) -> Self {
        Self { every }
    }
}

#[async_trait]
impl HeartbeatTask for PopulationFloorTask {
    fn name(&self) -> &str {
        "population_floor"
    }

    fn phase(&self) -> Phase {
        Phase::System
    }

    fn frequency(&self) -> u64 {
        self.every
    }

    async fn run(&mut self, ctx: &mut TaskContext<'_>) -> Result<TaskReport, TaskError> {
        let alive = ctx.world.population().len();
        let born = ctx.world.enforce_population_floor(ctx.tick)?;
        Ok(TaskReport::new(alive, born))
    }
}

#[derive(Debug)]
pub struct UbiTask {
    every: u64,
}

impl UbiTask {
    pub fn new(every: u64) -> Self {
        Self { every }
    }
}

#[async_trait]
impl HeartbeatTask for UbiTask {
    fn name(&self) -> &str {
        "ubi"
    }

    fn phase(&self) -> Phase {
        Phase::System
    }

    fn frequency(&self) -> u64 {
        self.every
    }

    async fn run(&mut self, ctx: &mut TaskContext<'_>) -> Result<TaskReport, TaskError> {
        let outcome = ctx.world.issue_ubi()?;
        Ok(TaskReport::new(ctx.world.ledger().account_count(), outcome.accounts_affected))
    }
}

#[derive(Debug)]
pub struct InflationTaxTask {
    every: u64,
}

impl InflationTaxTask {
    pub fn new(every: u64) -> Self {
        Self { every }
    }
}

#[async_trait]
impl HeartbeatTask for InflationTaxTask {
    fn name(&self) -> &str {
        "inflation_tax"
    }

    fn phase(&self) -> Phase {
        Phase::System
    }

    fn frequency(&self) -> u64 {
        self.every
    }

    async fn run(&mut self, ctx: &mut TaskContext<'_>) -> Result<TaskReport, TaskError> {
        let outcome = ctx.world.apply_inflation_tax()?;
        Ok(TaskReport::new(ctx.world.ledger().account_count(), outcome.accounts_affected))
    }
}

#[derive(Debug)]
pub struct WealthCapTask {
    every: u64,
}

impl WealthCapTask {
    pub fn new(every: u64) -> Self {
        Self { every }
    }
}

#[async_trait]
impl HeartbeatTask for WealthCapTask {
    fn name(&self) -> &str {
        "wealth_cap"
    }

    fn phase(&self) -> Phase {
        Phase::System
    }

    fn frequency(&self) -> u64 {
        self.every
    }

    async fn run(&mut self, ctx: &mut TaskContext<'_>) -> Result<TaskReport, TaskError> {
        let outcome = ctx.world.enforce_wealth_cap()?;
        Ok(TaskReport::new(ctx.world.ledger().account_count(), outcome.accounts_affected))
    }
}

#[derive(Debug)]
pub struct ConsolidationTask {
    every: u64,
}

impl ConsolidationTask {
    pub fn new(every: u64) -> Self {
        Self { every }
    }
}

#[async_trait]
impl HeartbeatTask for ConsolidationTask {
    fn name(&self) -> &str {
        "consolidation"
    }

    fn phase(&self) -> Phase {
        Phase::Consolidation
    }

    fn frequency(&self) -> u64 {
        self.every
    }

    async fn run(&mut self, ctx: &mut TaskContext<'_>) -> Result<TaskReport, TaskError> {
        let pass = ctx.world.run_consolidation(ctx.now).await;
        let mut report = TaskReport::new(pass.proposed, pass.committed);
        if pass.stale + pass.failed > 0 {
            report = report.with_note(format!("{} stale, {} failed", pass.stale, pass.failed));
        }
        Ok(report)
    }
}

#[derive(Debug)]
pub struct ForgettingTask {
    every: u64,
}

impl ForgettingTask {
    pub fn new(every: u64) -> Self {
        Self { every }
    }
}

#[async_trait]
impl HeartbeatTask for ForgettingTask {
    fn name(&self) -> &str {
        "forgetting"
    }

    fn phase(&self) -> Phase {
        Phase::Forgetting
    }

    fn frequency(&self) -> u64 {
        self.every
    }

    async fn run(&mut self, ctx: &mut TaskContext<'_>) -> Result<TaskReport, TaskError> {
        let pass = ctx.world.run_forgetting(ctx.now);
        Ok(TaskReport::new(pass.examined, pass.tombstoned.len()))
    }
}

/// The standard task set, in execution order within each phase.
/// The inflation tax runs before the wealth cap.
pub fn default_tasks(config: &StrataConfig) -> Vec<Box<dyn HeartbeatTask>> {
    let ledger = &config.ledger;
    vec![
        Box::new(BehaviorTask),
        Box::new(SleepCycleTask),
        Box::new(HomeostasisTask),
        Box::new(SalienceDecayTask::new(config.units.decay_every)),
        Box::new(ReproductionTask::new(config.lifecycle.reproduction_every)),
        Box::new(PopulationFloorTask::new(config.lifecycle.population_every)),
        Box::new(UbiTask::new(ledger.ubi.every)),
        Box::new(InflationTaxTask::new(ledger.inflation.every)),
        Box::new(WealthCapTask::new(ledger.wealth_cap.every)),
        Box::new(ConsolidationTask::new(config.heartbeat.consolidation_every)),
        Box::new(ForgettingTask::new(config.heartbeat.forgetting_every)),
    ]
}
