// Heartbeat scheduler
//
// Drives the world one tick at a time. Each task invocation runs inside its
// own slot: a timeout plus panic isolation, so one misbehaving task never
// stops the tick. A task that overruns its slot is excluded from the next
// tick.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::metrics::{MetricsSnapshot, TaskMetrics};
use super::task::{HeartbeatTask, Phase, TaskContext, TaskError, TaskReport};
use super::tasks::default_tasks;
use crate::config::HeartbeatConfig;
use crate::entities::DeathRecord;
use crate::error::{Result, StrataError};
use crate::types::{EntityId, UnitId};
use crate::world::{IngestReceipt, IngestRequest, World};

const COMMAND_BUFFER: usize = 64;

/// Outcome of a forced phase run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseRun {
    pub ran: usize,
    pub failed: usize,
    /// Items changed by the tasks that completed
    pub changed: usize,
}

/// Requests accepted by a running heartbeat
#[derive(Debug)]
pub enum AdminCommand {
    ForceConsolidation(oneshot::Sender<PhaseRun>),
    ForceForgetting(oneshot::Sender<PhaseRun>),
    Protect(UnitId, oneshot::Sender<Result<bool>>),
    Unprotect(UnitId, oneshot::Sender<bool>),
    Ingest(IngestRequest, oneshot::Sender<Result<IngestReceipt>>),
    Decree(EntityId, oneshot::Sender<Result<DeathRecord>>),
    Shutdown,
}

struct TaskSlot {
    task: Box<dyn HeartbeatTask>,
    metrics: TaskMetrics,
    /// Overran during the current tick
    overran: bool,
    /// Overran during the previous tick; skipped for this one
    excluded: bool,
}

enum SlotOutcome {
    Done(TaskReport),
    Failed,
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Tick scheduler owning the world
pub struct Heartbeat {
    config: HeartbeatConfig,
    world: World,
    slots: Vec<TaskSlot>,
    tick: u64,
    ledger_violations: u64,
    metrics_tx: watch::Sender<MetricsSnapshot>,
    commands_tx: mpsc::Sender<AdminCommand>,
    commands_rx: mpsc::Receiver<AdminCommand>,
}

impl Heartbeat {
    /// Scheduler with no tasks registered
    pub fn new(world: World) -> Self {
        let config = world.config().heartbeat.clone();
        let (metrics_tx, _) = watch::channel(MetricsSnapshot::default());
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);

        Self {
            config,
            world,
            slots: Vec::new(),
            tick: 0,
            ledger_violations: 0,
            metrics_tx,
            commands_tx,
            commands_rx,
        }
    }

    /// Scheduler with the standard task set
    pub fn with_default_tasks(world: World) -> Self {
        let tasks = default_tasks(world.config());
        let mut heartbeat = Self::new(world);
        for task in tasks {
            heartbeat.register(task);
        }
        heartbeat
    }

    /// Register a task. Tasks run grouped by phase, in registration order
    /// within a phase.
    pub fn register(&mut self, task: Box<dyn HeartbeatTask>) {
        let phase = task.phase();
        let metrics = TaskMetrics::new(task.name(), phase);
        let at = self
            .slots
            .iter()
            .position(|slot| slot.task.phase() > phase)
            .unwrap_or(self.slots.len());

        debug!("Registered heartbeat task {} ({})", metrics.name, phase);
        self.slots.insert(
            at,
            TaskSlot {
                task,
                metrics,
                overran: false,
                excluded: false,
            },
        );
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn into_world(self) -> World {
        self.world
    }

    /// Ticks completed so far
    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    pub fn ledger_violations(&self) -> u64 {
        self.ledger_violations
    }

    pub fn task_metrics(&self) -> Vec<TaskMetrics> {
        self.slots.iter().map(|slot| slot.metrics.clone()).collect()
    }

    /// Receiver for per-tick metrics
    pub fn subscribe(&self) -> watch::Receiver<MetricsSnapshot> {
        self.metrics_tx.subscribe()
    }

    /// Handle for sending admin commands to a running heartbeat
    pub fn handle(&self) -> HeartbeatHandle {
        HeartbeatHandle {
            commands: self.commands_tx.clone(),
            metrics: self.metrics_tx.subscribe(),
        }
    }

    /// Run one full tick
    pub async fn tick(&mut self) -> MetricsSnapshot {
        self.tick += 1;
        let tick = self.tick;
        let now = Utc::now();
        let started = Instant::now();
        let supply_before = self.world.ledger().snapshot();

        for slot in &mut self.slots {
            slot.excluded = slot.overran;
            slot.overran = false;
            if slot.excluded {
                slot.metrics.skipped += 1;
                warn!(
                    "Skipping {} on tick {}: previous invocation overran its slot",
                    slot.metrics.name, tick
                );
            }
        }

        self.run_entity_phase(tick, now).await;

        for idx in self.phase_slots(Phase::System) {
            let frequency = self.slots[idx].task.frequency().max(1);
            if tick % frequency == 0 && !self.slots[idx].excluded {
                self.run_slot(idx, tick, now, None).await;
            }
        }

        let pressure = self.world.under_pressure();
        if pressure {
            info!("Memory pressure on tick {}, forcing consolidation and forgetting", tick);
        }
        for phase in [Phase::Consolidation, Phase::Forgetting] {
            for idx in self.phase_slots(phase) {
                let frequency = self.slots[idx].task.frequency().max(1);
                let due = tick % frequency == 0 || (pressure && phase.runs_under_pressure());
                if due && !self.slots[idx].excluded {
                    self.run_slot(idx, tick, now, None).await;
                }
            }
        }

        let admitted = self.world.admit_backlog();
        if admitted > 0 {
            debug!("Admitted {} backlog units on tick {}", admitted, tick);
        }

        if let Err(e) = self.world.ledger().verify_since(&supply_before) {
            self.ledger_violations += 1;
            error!("Ledger audit failed on tick {}: {}", tick, e);
        }

        let snapshot = MetricsSnapshot::capture(
            tick,
            now,
            &self.world,
            self.task_metrics(),
            self.ledger_violations,
        );
        self.metrics_tx.send_replace(snapshot.clone());

        info!(
            tick,
            alive = snapshot.alive,
            in_heap = snapshot.in_heap,
            archived = snapshot.archived,
            backlog = snapshot.backlog,
            task_failures = snapshot.task_failures(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Heartbeat tick complete"
        );

        snapshot
    }

    async fn run_entity_phase(&mut self, tick: u64, now: DateTime<Utc>) {
        let entity_slots = self.phase_slots(Phase::Entity);
        if entity_slots.is_empty() {
            return;
        }

        for id in self.world.population().alive_ids() {
            for &idx in &entity_slots {
                if !self.world.population().is_alive(&id) {
                    break;
                }
                if self.slots[idx].excluded {
                    continue;
                }
                self.run_slot(idx, tick, now, Some(id)).await;
            }
        }
    }

    fn phase_slots(&self, phase: Phase) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.task.phase() == phase)
            .map(|(idx, _)| idx)
            .collect()
    }

    /// Run one invocation inside its slot
    async fn run_slot(
        &mut self,
        idx: usize,
        tick: u64,
        now: DateTime<Utc>,
        entity: Option<EntityId>,
    ) -> SlotOutcome {
        let budget = self.config.task_slot();
        let slot = &mut self.slots[idx];
        let mut ctx = TaskContext {
            world: &mut self.world,
            tick,
            now,
            entity,
        };

        let started = Instant::now();
        let result = timeout(
            budget,
            AssertUnwindSafe(slot.task.run(&mut ctx)).catch_unwind(),
        )
        .await;
        let elapsed = started.elapsed();
        slot.metrics.last_duration_ms = elapsed.as_millis() as u64;

        let outcome = match result {
            Ok(Ok(Ok(report))) => {
                slot.metrics.runs += 1;
                debug!(
                    "{} processed {} changed {} on tick {}",
                    slot.metrics.name, report.processed, report.changed, tick
                );
                SlotOutcome::Done(report)
            }
            Ok(Ok(Err(e))) => {
                slot.metrics.runs += 1;
                slot.metrics.failures += 1;
                warn!("Task {} failed on tick {}: {}", slot.metrics.name, tick, e);
                SlotOutcome::Failed
            }
            Ok(Err(payload)) => {
                slot.metrics.runs += 1;
                slot.metrics.failures += 1;
                slot.metrics.panics += 1;
                let err = TaskError::Panicked(panic_message(payload));
                error!("Task {} on tick {}: {}", slot.metrics.name, tick, err);
                SlotOutcome::Failed
            }
            Err(_) => {
                slot.metrics.runs += 1;
                slot.metrics.failures += 1;
                slot.metrics.timeouts += 1;
                slot.overran = true;
                warn!("Task {} on tick {}: {}", slot.metrics.name, tick, TaskError::Timeout(budget));
                SlotOutcome::Failed
            }
        };

        if elapsed > budget && !slot.overran {
            slot.overran = true;
            warn!(
                "Task {} took {:?} against a {:?} slot on tick {}",
                slot.metrics.name, elapsed, budget, tick
            );
        }

        outcome
    }

    /// Run every task of a phase now, regardless of frequency
    pub async fn force_phase(&mut self, phase: Phase) -> PhaseRun {
        let now = Utc::now();
        let tick = self.tick;
        let mut run = PhaseRun::default();

        for idx in self.phase_slots(phase) {
            run.ran += 1;
            match self.run_slot(idx, tick, now, None).await {
                SlotOutcome::Done(report) => run.changed += report.changed,
                SlotOutcome::Failed => run.failed += 1,
            }
        }
        self.world.admit_backlog();

        info!("Forced {} phase: {} tasks, {} failed", phase, run.ran, run.failed);
        run
    }

    pub async fn force_consolidation_cycle(&mut self) -> PhaseRun {
        self.force_phase(Phase::Consolidation).await
    }

    pub async fn force_forgetting_cycle(&mut self) -> PhaseRun {
        self.force_phase(Phase::Forgetting).await
    }

    /// Handle an admin command; returns false on shutdown
    async fn handle_command(&mut self, command: AdminCommand) -> bool {
        match command {
            AdminCommand::ForceConsolidation(reply) => {
                let run = self.force_consolidation_cycle().await;
                let _ = reply.send(run);
            }
            AdminCommand::ForceForgetting(reply) => {
                let run = self.force_forgetting_cycle().await;
                let _ = reply.send(run);
            }
            AdminCommand::Protect(id, reply) => {
                let _ = reply.send(self.world.protect(id));
            }
            AdminCommand::Unprotect(id, reply) => {
                let _ = reply.send(self.world.unprotect(&id));
            }
            AdminCommand::Ingest(request, reply) => {
                let _ = reply.send(self.world.ingest(request, Utc::now()));
            }
            AdminCommand::Decree(id, reply) => {
                let _ = reply.send(self.world.decree_death(id, self.tick, Utc::now()));
            }
            AdminCommand::Shutdown => {
                info!("Heartbeat shutdown requested");
                return false;
            }
        }
        true
    }

    /// Tick on the configured interval until shutdown or `max_ticks`.
    /// Returns the number of ticks completed.
    pub async fn run(&mut self, max_ticks: Option<u64>) -> u64 {
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // First tick fires immediately
        interval.tick().await;

        info!(
            "Starting heartbeat: interval {:?}, {} tasks",
            self.config.interval,
            self.slots.len()
        );

        let start = self.tick;
        loop {
            if max_ticks.is_some_and(|max| self.tick - start >= max) {
                break;
            }

            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }
                Some(command) = self.commands_rx.recv() => {
                    if !self.handle_command(command).await {
                        break;
                    }
                }
            }
        }

        info!("Heartbeat stopped after {} ticks", self.tick - start);
        self.tick - start
    }
}

/// Client side of a running heartbeat
#[derive(Clone)]
pub struct HeartbeatHandle {
    commands: mpsc::Sender<AdminCommand>,
    metrics: watch::Receiver<MetricsSnapshot>,
}

fn stopped() -> StrataError {
    StrataError::Other("heartbeat is not running".to_string())
}

impl HeartbeatHandle {
    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> AdminCommand) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(make(tx)).await.map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())
    }

    pub async fn force_consolidation(&self) -> Result<PhaseRun> {
        self.request(AdminCommand::ForceConsolidation).await
    }

    pub async fn force_forgetting(&self) -> Result<PhaseRun> {
        self.request(AdminCommand::ForceForgetting).await
    }

    pub async fn protect(&self, id: UnitId) -> Result<bool> {
        self.request(|tx| AdminCommand::Protect(id, tx)).await?
    }

    pub async fn unprotect(&self, id: UnitId) -> Result<bool> {
        self.request(|tx| AdminCommand::Unprotect(id, tx)).await
    }

    pub async fn ingest(&self, request: IngestRequest) -> Result<IngestReceipt> {
        self.request(|tx| AdminCommand::Ingest(request, tx)).await?
    }

    pub async fn decree_death(&self, id: EntityId) -> Result<DeathRecord> {
        self.request(|tx| AdminCommand::Decree(id, tx)).await?
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.commands
            .send(AdminCommand::Shutdown)
            .await
            .map_err(|_| stopped())
    }

    /// Latest published metrics
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.borrow().clone()
    }

    /// Wait for the next tick's metrics
    pub async fn next_metrics(&mut self) -> Result<MetricsSnapshot> {
        self.metrics.changed().await.map_err(|_| stopped())?;
        Ok(self.metrics.borrow_and_update().clone())
    }

    /// Wait until the heartbeat has completed `tick`
    pub async fn wait_for_tick(&mut self, tick: u64, limit: Duration) -> Result<MetricsSnapshot> {
        let wait = async {
            loop {
                let snapshot = self.metrics.borrow_and_update().clone();
                if snapshot.tick >= tick {
                    return Ok::<MetricsSnapshot, StrataError>(snapshot);
                }
                self.metrics.changed().await.map_err(|_| stopped())?;
            }
        };
        timeout(limit, wait)
            .await
            .map_err(|_| StrataError::Other(format!("tick {} not reached within {:?}", tick, limit)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StrataConfig;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    struct ScriptedTask {
        name: &'static str,
        phase: Phase,
        every: u64,
        runs: Arc<AtomicU64>,
        behavior: Script,
    }

    #[derive(Clone, Copy)]
    enum Script {
        Succeed,
        Fail,
        Panic,
        Sleep(Duration),
    }

    impl ScriptedTask {
        fn new(name: &'static str, phase: Phase, every: u64, behavior: Script) -> (Self, Arc<AtomicU64>) {
            let runs = Arc::new(AtomicU64::new(0));
            let task = Self {
                name,
                phase,
                every,
                runs: runs.clone(),
                behavior,
            };
            (task, runs)
        }
    }

    #[async_trait]
    impl HeartbeatTask for ScriptedTask {
        fn name(&self) -> &str {
            self.name
        }

        fn phase(&self) -> Phase {
            self.phase
        }

        fn frequency(&self) -> u64 {
            self.every
        }

        async fn run(&mut self, _ctx: &mut TaskContext<'_>) -> std::result::Result<TaskReport, TaskError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                Script::Succeed => Ok(TaskReport::new(1, 1)),
                Script::Fail => Err(TaskError::Failed("scripted failure".to_string())),
                Script::Panic => panic!("scripted panic"),
                Script::Sleep(d) => {
                    tokio::time::sleep(d).await;
                    Ok(TaskReport::default())
                }
            }
        }
    }

    fn heartbeat(budget: Option<Duration>) -> Heartbeat {
        let mut config = StrataConfig::default();
        config.heartbeat.interval = Duration::from_millis(10);
        config.heartbeat.task_budget = budget;
        Heartbeat::new(World::ephemeral(config).unwrap())
    }

    #[test]
    fn test_register_orders_by_phase() {
        let mut hb = heartbeat(None);
        let (forget, _) = ScriptedTask::new("forget", Phase::Forgetting, 1, Script::Succeed);
        let (system, _) = ScriptedTask::new("system", Phase::System, 1, Script::Succeed);
        let (entity, _) = ScriptedTask::new("entity", Phase::Entity, 1, Script::Succeed);
        hb.register(Box::new(forget));
        hb.register(Box::new(system));
        hb.register(Box::new(entity));

        let names: Vec<String> = hb.task_metrics().into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["entity", "system", "forget"]);
    }

    #[tokio::test]
    async fn test_frequency_gates_system_tasks() {
        let mut hb = heartbeat(None);
        let (every_five, runs) = ScriptedTask::new("every_five", Phase::System, 5, Script::Succeed);
        hb.register(Box::new(every_five));

        for _ in 0..10 {
            hb.tick().await;
        }
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(hb.tick_count(), 10);
    }

    #[tokio::test]
    async fn test_failures_and_panics_are_isolated() {
        let mut hb = heartbeat(None);
        let (failing, failing_runs) = ScriptedTask::new("failing", Phase::System, 1, Script::Fail);
        let (panicking, panic_runs) = ScriptedTask::new("panicking", Phase::System, 1, Script::Panic);
        let (healthy, healthy_runs) = ScriptedTask::new("healthy", Phase::System, 1, Script::Succeed);
        hb.register(Box::new(failing));
        hb.register(Box::new(panicking));
        hb.register(Box::new(healthy));

        let mut snapshot = MetricsSnapshot::default();
        for _ in 0..3 {
            snapshot = hb.tick().await;
        }

        assert_eq!(failing_runs.load(Ordering::SeqCst), 3);
        assert_eq!(panic_runs.load(Ordering::SeqCst), 3);
        assert_eq!(healthy_runs.load(Ordering::SeqCst), 3);
        assert_eq!(snapshot.task("panicking").unwrap().panics, 3);
        assert_eq!(snapshot.task("failing").unwrap().failures, 3);
        assert_eq!(snapshot.task("healthy").unwrap().failures, 0);
        assert_eq!(snapshot.tick, 3);
    }

    #[tokio::test]
    async fn test_overrun_skips_next_tick() {
        let mut hb = heartbeat(Some(Duration::from_millis(20)));
        let (slow, runs) = ScriptedTask::new(
            "slow",
            Phase::System,
            1,
            Script::Sleep(Duration::from_millis(200)),
        );
        hb.register(Box::new(slow));

        hb.tick().await;
        hb.tick().await;
        hb.tick().await;

        // ran on ticks 1 and 3, skipped on 2
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        let metrics = &hb.task_metrics()[0];
        assert_eq!(metrics.timeouts, 2);
        assert_eq!(metrics.skipped, 1);
    }

    #[tokio::test]
    async fn test_force_phase_ignores_frequency() {
        let mut hb = heartbeat(None);
        let (consolidate, runs) = ScriptedTask::new("consolidate", Phase::Consolidation, 1000, Script::Succeed);
        hb.register(Box::new(consolidate));

        let run = hb.force_consolidation_cycle().await;
        assert_eq!(run, PhaseRun { ran: 1, failed: 0, changed: 1 });
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_stops_at_max_ticks_and_publishes_metrics() {
        let mut hb = heartbeat(None);
        let mut metrics = hb.subscribe();

        let ticks = hb.run(Some(3)).await;
        assert_eq!(ticks, 3);
        assert!(metrics.has_changed().unwrap());
        assert_eq!(metrics.borrow_and_update().tick, 3);
        assert_eq!(hb.ledger_violations(), 0);
    }

    #[tokio::test]
    async fn test_handle_commands_and_shutdown() {
        let mut hb = heartbeat(None);
        let handle = hb.handle();

        let client = tokio::spawn(async move {
            let receipt = handle
                .ingest(IngestRequest::new("body", "summary", ["tag".to_string()]))
                .await
                .unwrap();
            let protected = handle.protect(receipt.id).await.unwrap();
            handle.shutdown().await.unwrap();
            (receipt, protected)
        });

        hb.run(None).await;
        let (receipt, protected) = client.await.unwrap();
        assert!(protected);
        assert!(hb.world().units().contains(&receipt.id));
        assert!(hb.world().forgetting().is_protected(&receipt.id));
    }
}
