//! Knowledge units and the in-memory unit store
//!
//! Components:
//! - unit: the DTU record, payload and lineage
//! - salience: decay and boost rules
//! - store: the id-keyed store with heap budget accounting

pub mod salience;
pub mod store;
pub mod unit;

pub use store::{StoreError, TierCounts, UnitStore};
pub(crate) use store::StagedCommit;
pub use unit::{Lineage, Unit, UnitPayload};
