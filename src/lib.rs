//! Strata - tiered knowledge consolidation for simulated populations
//!
//! A population of simulated entities produces knowledge units. Strata keeps
//! that knowledge bounded:
//! - Related units are compressed into aggregates, and aggregates into
//!   meta-aggregates, with lineage preserved and payloads archived
//! - Low-salience, idle units are forgotten (tombstoned)
//! - A resource ledger funds entity behavior, with UBI, an inflation tax and
//!   a wealth cap
//! - A heartbeat drives everything in discrete ticks
//!
//! # Architecture
//!
//! - **Units**: the unit record, salience dynamics and the bounded store
//! - **Consolidation**: similarity scoring, cluster detection, commit
//! - **Forgetting**: eviction of idle, low-salience units
//! - **Ledger**: accounts, pool, supply journal and economic policy
//! - **Entities**: bodies, behaviors and the lifecycle state machine
//! - **World**: owns every subsystem; the single mutation surface
//! - **Heartbeat**: tick scheduler with per-task isolation
//!
//! # Example
//!
//! ```ignore
//! use strata_core::{Heartbeat, StrataConfig, World};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = StrataConfig::default();
//!     let mut world = World::from_config(config)?;
//!     world.populate(0)?;
//!
//!     let mut heartbeat = Heartbeat::with_default_tasks(world);
//!     heartbeat.run(Some(100)).await;
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod brain;
pub mod config;
pub mod consolidation;
pub mod entities;
pub mod error;
pub mod forgetting;
pub mod heartbeat;
pub mod ledger;
pub mod types;
pub mod units;
pub mod world;

// Re-export commonly used types
pub use archive::{ArchiveBackend, ArchiveError, ArchiveHandle, FileArchive, InMemoryArchive};
pub use brain::{Brain, BrainError, BrainGateway, BrainStats, HttpBrain, OfflineBrain};
pub use config::StrataConfig;
pub use consolidation::{ClusterCandidate, ClusterDetector, ConsolidationEngine, Consolidator, PassReport};
pub use entities::{Behavior, DeathCause, DeathRecord, Entity, LifecycleStage};
pub use error::{Result, StrataError};
pub use forgetting::{ForgettingEngine, ForgettingReport};
pub use heartbeat::{Heartbeat, HeartbeatHandle, HeartbeatTask, MetricsSnapshot, Phase};
pub use ledger::{Balances, Ledger, LedgerError};
pub use types::{EntityId, Residency, ResourceKind, Tier, UnitId};
pub use units::{Unit, UnitPayload, UnitStore};
pub use world::{IngestReceipt, IngestRequest, IngestStatus, World};
