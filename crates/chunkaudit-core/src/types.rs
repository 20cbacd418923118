//! Domain types shared by the store adapter, the grouping policy and the console.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Error, Result};

pub type ChunkId = String;
pub type Metadata = BTreeMap<String, MetaValue>;

/// A single metadata value as stored in a chunk's JSON metadata object.
///
/// Multi-value entries are either a JSON list or a pipe-delimited string;
/// see [`crate::metadata`] for how both are interpreted. Anything else the
/// pipeline wrote (null, objects, mixed lists) is kept verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    List(Vec<String>),
    Other(serde_json::Value),
}

impl From<&str> for MetaValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for MetaValue {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl fmt::Display for MetaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{n}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Text(s) => f.write_str(s),
            Self::List(items) => f.write_str(&items.join(crate::metadata::DELIMITER)),
            Self::Other(v) => write!(f, "{v}"),
        }
    }
}

/// A chunk as read back from a collection.
///
/// - `id`: opaque store identifier
/// - `document`: the chunk text, never edited by the console
/// - `metadata`: mutable key/value mapping
/// - `embedding`: vector, absent when the pipeline wrote none
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub document: String,
    pub metadata: Metadata,
    pub embedding: Option<Vec<f32>>,
}

/// A chunk to insert. A missing id is assigned by the store.
#[derive(Debug, Clone, Default)]
pub struct NewChunk {
    pub id: Option<ChunkId>,
    pub document: String,
    pub metadata: Metadata,
    pub embedding: Option<Vec<f32>>,
}

impl NewChunk {
    pub fn new(document: impl Into<String>) -> Self {
        Self { document: document.into(), ..Self::default() }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<MetaValue>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn with_embedding(mut self, v: Vec<f32>) -> Self {
        self.embedding = Some(v);
        self
    }
}

/// Outcome of a per-id operation. Ids that do not exist are reported in
/// `missing` instead of failing the whole call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpReport {
    pub requested: usize,
    pub applied: usize,
    pub missing: Vec<ChunkId>,
}

impl OpReport {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    /// Turns a count mismatch into [`Error::PartialOperation`].
    pub fn ensure_complete(self) -> Result<Self> {
        if self.is_complete() {
            Ok(self)
        } else {
            Err(Error::PartialOperation {
                requested: self.requested,
                applied: self.applied,
                missing: self.missing,
            })
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteReport {
    pub op: OpReport,
    /// The collection became empty and was dropped and recreated.
    pub recreated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionInfo {
    pub name: String,
    pub count: usize,
    pub dimension: i32,
    pub version: u64,
}

/// What the operator is currently looking at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewKind {
    Collection,
    File(String),
    FileSet(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionHealth {
    Empty,
    /// Chunks exist but none carries `source_file`.
    NoFiles { chunks: usize },
    HasFiles { chunks: usize, files: usize },
}
