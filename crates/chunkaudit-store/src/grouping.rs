//! Files and file sets as views over chunk metadata.
//!
//! Every function re-reads the collection; there is no grouping index to keep
//! in sync with edits.

use tracing::debug;

use chunkaudit_core::metadata::{self, FILESET, SOURCE_FILE};
use chunkaudit_core::{Chunk, ChunkId, CollectionHealth, OpReport, Result, ViewKind};

use crate::Store;

/// Sorted distinct values of `key`; multi-value entries contribute each part.
pub async fn list_distinct_values(store: &Store, collection: &str, key: &str) -> Result<Vec<String>> {
    let chunks = store.load_collection(collection).await?;
    let values = metadata::distinct_values(chunks.iter().map(|c| &c.metadata), key);
    debug!(collection, key, distinct = values.len(), "listed values");
    Ok(values)
}

/// Chunks matching `key = value` in reading order.
pub async fn load_group(store: &Store, collection: &str, key: &str, value: &str) -> Result<Vec<Chunk>> {
    let mut chunks = store.query_by_metadata(collection, key, value).await?;
    metadata::sort_for_reading(&mut chunks);
    Ok(chunks)
}

pub async fn list_files(store: &Store, collection: &str) -> Result<Vec<String>> {
    list_distinct_values(store, collection, SOURCE_FILE).await
}

pub async fn list_filesets(store: &Store, collection: &str) -> Result<Vec<String>> {
    list_distinct_values(store, collection, FILESET).await
}

pub async fn load_view(store: &Store, collection: &str, view: &ViewKind) -> Result<Vec<Chunk>> {
    match view {
        ViewKind::Collection => {
            let mut chunks = store.load_collection(collection).await?;
            metadata::sort_for_reading(&mut chunks);
            Ok(chunks)
        }
        ViewKind::File(name) => load_group(store, collection, SOURCE_FILE, name).await,
        ViewKind::FileSet(name) => load_group(store, collection, FILESET, name).await,
    }
}

pub async fn check_collection(store: &Store, collection: &str) -> Result<CollectionHealth> {
    let chunks = store.load_collection(collection).await?;
    if chunks.is_empty() {
        return Ok(CollectionHealth::Empty);
    }
    let files = metadata::distinct_values(chunks.iter().map(|c| &c.metadata), SOURCE_FILE).len();
    Ok(if files == 0 {
        CollectionHealth::NoFiles { chunks: chunks.len() }
    } else {
        CollectionHealth::HasFiles { chunks: chunks.len(), files }
    })
}

pub async fn add_to_fileset(store: &mut Store, collection: &str, ids: &[ChunkId], fileset: &str) -> Result<OpReport> {
    store.upsert_metadata(collection, ids, FILESET, fileset).await
}

pub async fn remove_from_fileset(
    store: &mut Store,
    collection: &str,
    ids: &[ChunkId],
    fileset: &str,
) -> Result<OpReport> {
    store.delete_metadata_key(collection, ids, FILESET, Some(fileset)).await
}
