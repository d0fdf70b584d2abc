//! Durable archive for unit payloads
//!
//! When consolidation archives a member, its payload is written here and the
//! unit keeps only a handle. Archived payloads must stay rehydratable for as
//! long as the lineage that references them exists, which is forever.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use thiserror::Error;

use crate::types::UnitId;
use crate::units::UnitPayload;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Archived payload not found: {0}")]
    NotFound(ArchiveHandle),

    #[error("Archive I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Opaque reference to an archived payload
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArchiveHandle(pub String);

impl std::fmt::Display for ArchiveHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Archived record as written to durable storage
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ArchivedPayload {
    unit_id: UnitId,
    payload: UnitPayload,
}

/// Persistence boundary
pub trait ArchiveBackend: Send + Sync {
    /// Store a payload, returning a handle that rehydrates it later
    fn archive(&self, unit_id: UnitId, payload: &UnitPayload) -> Result<ArchiveHandle, ArchiveError>;

    /// Load a previously archived payload
    fn rehydrate(&self, handle: &ArchiveHandle) -> Result<UnitPayload, ArchiveError>;

    /// Remove a payload. Only used to roll back an archive write whose
    /// consolidation never committed.
    fn discard(&self, handle: &ArchiveHandle) -> Result<(), ArchiveError>;
}

/// Archive kept in process memory (tests, ephemeral runs)
#[derive(Debug, Default)]
pub struct InMemoryArchive {
    blobs: RwLock<HashMap<ArchiveHandle, ArchivedPayload>>,
}

impl InMemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ArchiveBackend for InMemoryArchive {
    fn archive(&self, unit_id: UnitId, payload: &UnitPayload) -> Result<ArchiveHandle, ArchiveError> {
        let handle = ArchiveHandle(unit_id.to_string());
        let record = ArchivedPayload {
            unit_id,
            payload: payload.clone(),
        };
        self.blobs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(handle.clone(), record);
        Ok(handle)
    }

    fn rehydrate(&self, handle: &ArchiveHandle) -> Result<UnitPayload, ArchiveError> {
        self.blobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(handle)
            .map(|r| r.payload.clone())
            .ok_or_else(|| ArchiveError::NotFound(handle.clone()))
    }

    fn discard(&self, handle: &ArchiveHandle) -> Result<(), ArchiveError> {
        self.blobs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(handle);
        Ok(())
    }
}

/// Archive writing one JSON file per unit under a directory
#[derive(Debug)]
pub struct FileArchive {
    root: PathBuf,
}

impl FileArchive {
    /// Open (creating if needed) an archive directory
    pub fn open(root: impl AsRef<Path>) -> Result<Self, ArchiveError> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        tracing::debug!("Opened file archive at {}", root.display());
        Ok(Self { root })
    }

    fn path_for(&self, handle: &ArchiveHandle) -> PathBuf {
        self.root.join(format!("{}.json", handle.0))
    }
}

impl ArchiveBackend for FileArchive {
    fn archive(&self, unit_id: UnitId, payload: &UnitPayload) -> Result<ArchiveHandle, ArchiveError> {
        let handle = ArchiveHandle(unit_id.to_string());
        let record = ArchivedPayload {
            unit_id,
            payload: payload.clone(),
        };
        let path = self.path_for(&handle);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec(&record)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(handle)
    }

    fn rehydrate(&self, handle: &ArchiveHandle) -> Result<UnitPayload, ArchiveError> {
        let path = self.path_for(handle);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ArchiveError::NotFound(handle.clone()))
            }
            Err(e) => return Err(e.into()),
        };
        let record: ArchivedPayload = serde_json::from_slice(&bytes)?;
        Ok(record.payload)
    }

    fn discard(&self, handle: &ArchiveHandle) -> Result<(), ArchiveError> {
        match std::fs::remove_file(self.path_for(handle)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
