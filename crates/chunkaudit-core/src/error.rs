use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Step of the empty-collection recreation that was running when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStage {
    WriteMarker,
    DropCollection,
    RemoveSegments,
    Recreate,
    ClearMarker,
}

impl fmt::Display for RecoveryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::WriteMarker => "write recovery marker",
            Self::DropCollection => "drop collection",
            Self::RemoveSegments => "remove segment directory",
            Self::Recreate => "recreate collection",
            Self::ClearMarker => "clear recovery marker",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Cannot open store at {}: {reason}", path.display())]
    Connection { path: PathBuf, reason: String },

    #[error("Collection '{collection}' has an unfinished recreation; run `repair` before reconnecting")]
    RecoveryPending { collection: String },

    #[error("Applied to {applied} of {requested} chunks; {} ids not found", missing.len())]
    PartialOperation {
        requested: usize,
        applied: usize,
        missing: Vec<String>,
    },

    #[error("Recreating empty collection '{collection}' failed at step '{stage}': {reason}. The collection may be absent and need manual recreation")]
    Recovery {
        collection: String,
        stage: RecoveryStage,
        reason: String,
    },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Store operation failed: {0}")]
    Store(String),

    #[error("Pipeline request failed: {0}")]
    Pipeline(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

impl Error {
    pub fn store(e: impl fmt::Display) -> Self {
        Self::Store(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
