//! Shared model for the chunk audit console.
//!
//! Holds the chunk and metadata types, the grouping rules that derive files
//! and file sets from metadata, configuration loading, and the CSV sheet
//! format. Nothing in here touches the vector store.

pub mod config;
pub mod error;
pub mod export;
pub mod metadata;
pub mod selection;
pub mod types;

pub use error::{Error, RecoveryStage, Result};
pub use selection::Selection;
pub use types::{
    Chunk, ChunkId, CollectionHealth, CollectionInfo, DeleteReport, MetaValue, Metadata, NewChunk,
    OpReport, ViewKind,
};
