//! Upload a file through the runner, then tag the chunks it produced.

use chrono::Utc;
use std::collections::HashSet;
use std::path::Path;
use tracing::{info, warn};

use chunkaudit_core::metadata::{self, CHUNK_INDEX, FILESET, SOURCE_FILE, TOTAL_CHUNKS, UPLOAD_TIMESTAMP};
use chunkaudit_core::{ChunkId, Error, MetaValue, OpReport, Result};
use chunkaudit_store::Store;

use crate::client::PipelineClient;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestOutcome {
    pub new_chunks: usize,
    pub tagged: OpReport,
}

/// Uploads `path` and tags every chunk that appeared in `collection` while
/// the flow ran.
pub async fn ingest_file(
    client: &PipelineClient,
    store: &mut Store,
    collection: &str,
    path: &Path,
    fileset: Option<&str>,
) -> Result<IngestOutcome> {
    if let Some(name) = fileset {
        metadata::validate_edit(FILESET, Some(name))?;
    }
    let source = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| Error::Validation(format!("'{}' has no file name", path.display())))?;

    let before: HashSet<ChunkId> = store.chunk_ids(collection).await?.into_iter().collect();
    client.upload(path).await?;
    tag_new_chunks(store, collection, &before, &source, fileset).await
}

/// Tags chunks whose ids are not in `before`, numbering them 1..=n in scan
/// order.
pub async fn tag_new_chunks(
    store: &mut Store,
    collection: &str,
    before: &HashSet<ChunkId>,
    source: &str,
    fileset: Option<&str>,
) -> Result<IngestOutcome> {
    let new_ids: Vec<ChunkId> = store
        .chunk_ids(collection)
        .await?
        .into_iter()
        .filter(|id| !before.contains(id))
        .collect();
    if new_ids.is_empty() {
        warn!(collection, source, "no new chunks after ingestion");
        return Ok(IngestOutcome::default());
    }

    let total = new_ids.len();
    let uploaded_at = Utc::now().to_rfc3339();
    let rows = store
        .get_chunks(collection, &new_ids)
        .await?
        .into_iter()
        .zip(1_i64..)
        .map(|(chunk, index)| {
            let mut meta = chunk.metadata;
            meta.insert(CHUNK_INDEX.into(), MetaValue::Int(index));
            meta.insert(TOTAL_CHUNKS.into(), MetaValue::Int(i64::try_from(total).unwrap_or(i64::MAX)));
            meta.insert(SOURCE_FILE.into(), source.into());
            meta.insert(UPLOAD_TIMESTAMP.into(), uploaded_at.clone().into());
            if let Some(name) = fileset {
                meta.insert(FILESET.into(), name.into());
            }
            (chunk.id, meta)
        })
        .collect();

    let tagged = store.replace_metadata(collection, rows).await?;
    info!(collection, source, chunks = total, "tagged new chunks");
    Ok(IngestOutcome { new_chunks: total, tagged })
}
