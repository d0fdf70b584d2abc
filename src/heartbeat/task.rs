// Heartbeat task contract
//
// Every unit of periodic work implements `HeartbeatTask`. The scheduler
// decides when a task runs from its phase and frequency; the task only does
// the work and reports what it did.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::error::StrataError;
use crate::types::EntityId;
use crate::world::World;

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Task failed: {0}")]
    Failed(String),

    #[error("{0}")]
    Strata(#[from] StrataError),

    #[error("Task panicked: {0}")]
    Panicked(String),

    #[error("Task exceeded its {0:?} slot")]
    Timeout(Duration),
}

impl From<crate::ledger::LedgerError> for TaskError {
    fn from(err: crate::ledger::LedgerError) -> Self {
        TaskError::Strata(err.into())
    }
}

/// Execution order within a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Runs once per alive entity, every tick
    Entity,
    /// System-wide, gated by frequency
    System,
    /// Gated by frequency, or forced under memory pressure
    Consolidation,
    /// Gated by frequency, or forced under memory pressure
    Forgetting,
}

impl Phase {
    /// Whether memory pressure overrides the frequency gate
    pub fn runs_under_pressure(&self) -> bool {
        matches!(self, Phase::Consolidation | Phase::Forgetting)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Entity => "entity",
            Phase::System => "system",
            Phase::Consolidation => "consolidation",
            Phase::Forgetting => "forgetting",
        };
        write!(f, "{}", name)
    }
}

/// What a task invocation sees
pub struct TaskContext<'a> {
    pub world: &'a mut World,
    pub tick: u64,
    pub now: DateTime<Utc>,
    /// Set for entity-phase invocations
    pub entity: Option<EntityId>,
}

impl TaskContext<'_> {
    /// The entity this invocation is for
    pub fn entity(&self) -> Result<EntityId, TaskError> {
        self.entity
            .ok_or_else(|| TaskError::Failed("entity task invoked without an entity".to_string()))
    }
}

/// Report generated after a task invocation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskReport {
    /// Items looked at
    pub processed: usize,

    /// Items changed
    pub changed: usize,

    pub note: Option<String>,
}

impl TaskReport {
    pub fn new(processed: usize, changed: usize) -> Self {
        Self {
            processed,
            changed,
            note: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Trait for periodic work
#[async_trait]
pub trait HeartbeatTask: Send {
    /// Task name (for logging and metrics)
    fn name(&self) -> &str;

    fn phase(&self) -> Phase;

    /// Run on ticks where `tick % frequency == 0`. Ignored for entity tasks.
    fn frequency(&self) -> u64 {
        1
    }

    async fn run(&mut self, ctx: &mut TaskContext<'_>) -> Result<TaskReport, TaskError>;
}
