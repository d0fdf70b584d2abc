//! Error types for Strata
//!
//! Subsystems define their own `thiserror` enums next to the code that raises
//! them; `StrataError` wraps them for callers that cross subsystem lines.

use thiserror::Error;

use crate::archive::ArchiveError;
use crate::config::ConfigError;
use crate::consolidation::ConsolidationError;
use crate::ledger::LedgerError;
use crate::types::{EntityId, UnitId};
use crate::units::StoreError;

/// Main error type for Strata operations
#[derive(Error, Debug)]
pub enum StrataError {
    /// Invalid or unreadable configuration (fatal at startup)
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Rejected ledger operation
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Unit store rejected a mutation
    #[error("Unit store error: {0}")]
    Store(#[from] StoreError),

    /// Consolidation candidate rejected
    #[error("Consolidation error: {0}")]
    Consolidation(#[from] ConsolidationError),

    /// Durable archive failure
    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    /// Unit not found
    #[error("Unit not found: {0}")]
    UnitNotFound(UnitId),

    /// Entity not found or no longer alive
    #[error("Entity not found: {0}")]
    EntityNotFound(EntityId),

    /// Invalid operation (e.g. reviving a dead entity)
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Result type alias for Strata operations
pub type Result<T> = std::result::Result<T, StrataError>;

/// Convert anyhow::Error to StrataError
impl From<anyhow::Error> for StrataError {
    fn from(err: anyhow::Error) -> Self {
        StrataError::Other(err.to_string())
    }
}
