// Heartbeat Module
//
// Drives the world forward in discrete ticks.
//
// Components:
// - task: the `HeartbeatTask` contract, phases and reports
// - scheduler: tick ordering, slot isolation, admin commands
// - tasks: the standard task set
// - metrics: per-tick snapshot published on a watch channel

pub mod metrics;
pub mod scheduler;
pub mod task;
pub mod tasks;

pub use metrics::{MetricsSnapshot, TaskMetrics};
pub use scheduler::{AdminCommand, Heartbeat, HeartbeatHandle, PhaseRun};
pub use task::{HeartbeatTask, Phase, TaskContext, TaskError, TaskReport};
pub use tasks::default_tasks;
