//! LanceDB-backed store adapter.
//!
//! A [`Store`] wraps one connection to a directory of collections (one LanceDB
//! table each). Reads borrow the handle shared; every mutation borrows it
//! exclusively, so a delete and the recreation it may trigger cannot
//! interleave with anything else issued through the same handle.

pub mod grouping;
pub mod recovery;
pub mod schema;
mod table;

use lancedb::Connection;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use chunkaudit_core::config::StoreSettings;
use chunkaudit_core::metadata;
use chunkaudit_core::{
    Chunk, ChunkId, CollectionInfo, DeleteReport, Error, Metadata, NewChunk, OpReport, Result,
};

pub use recovery::RecoveryMarker;

#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub timeout: Duration,
    /// Vector width for collections whose own width cannot be read.
    pub default_dim: i32,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self { timeout: Duration::from_millis(2000), default_dim: 1024 }
    }
}

impl From<&StoreSettings> for ConnectOptions {
    fn from(s: &StoreSettings) -> Self {
        Self { timeout: Duration::from_millis(s.connect_timeout_ms), default_dim: s.embedding_dim }
    }
}

pub struct Store {
    conn: Connection,
    root: PathBuf,
    default_dim: i32,
}

fn connection_error(path: &Path, reason: impl Into<String>) -> Error {
    Error::Connection { path: path.to_path_buf(), reason: reason.into() }
}

/// Checks that `path` looks like a store before any client is opened.
fn validate_layout(path: &Path) -> Result<usize> {
    if path.as_os_str().is_empty() {
        return Err(connection_error(path, "no store path given"));
    }
    if !path.exists() {
        return Err(connection_error(path, "path does not exist"));
    }
    if !path.is_dir() {
        return Err(connection_error(path, "path is not a directory"));
    }
    if let Some(marker) = recovery::pending(path)?.into_iter().next() {
        return Err(Error::RecoveryPending { collection: marker.collection });
    }

    let mut collections = 0usize;
    for entry in std::fs::read_dir(path)? {
        let entry_path = entry?.path();
        if entry_path.extension().and_then(|e| e.to_str()) != Some("lance") {
            continue;
        }
        let name = entry_path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        if !entry_path.is_dir() {
            return Err(connection_error(path, format!("'{name}' is not a directory")));
        }
        if !entry_path.join("_versions").is_dir() {
            return Err(connection_error(path, format!("'{name}' has no _versions directory")));
        }
        collections += 1;
    }
    if collections == 0 {
        return Err(connection_error(path, "no collections found; run `init` to create one"));
    }
    Ok(collections)
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() || name.contains(['/', '\\']) || name.starts_with('.') || name.starts_with('_') {
        return Err(Error::Validation(format!("invalid collection name '{name}'")));
    }
    Ok(())
}

/// Keeps first occurrences, preserving order.
fn dedup_ids(ids: &[ChunkId]) -> Vec<ChunkId> {
    let mut seen = HashSet::new();
    ids.iter().filter(|id| seen.insert(id.as_str())).cloned().collect()
}

async fn open_connection(path: &Path, timeout: Duration) -> Result<Connection> {
    let uri = path.to_string_lossy();
    match tokio::time::timeout(timeout, lancedb::connect(&uri).execute()).await {
        Ok(conn) => conn.map_err(|e| connection_error(path, e.to_string())),
        Err(_) => Err(connection_error(path, format!("timed out after {} ms", timeout.as_millis()))),
    }
}

impl Store {
    /// Opens an existing store with default options.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        Self::connect_with(path, ConnectOptions::default()).await
    }

    pub async fn connect_with(path: impl AsRef<Path>, opts: ConnectOptions) -> Result<Self> {
        let path = path.as_ref();
        let found = validate_layout(path)?;
        let conn = open_connection(path, opts.timeout).await?;
        info!(path = %path.display(), collections = found, "connected");
        Ok(Self { conn, root: path.to_path_buf(), default_dim: opts.default_dim })
    }

    /// Creates the store directory and `collection` when either is missing.
    pub async fn initialize(path: impl AsRef<Path>, collection: &str, opts: ConnectOptions) -> Result<Self> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(connection_error(path, "no store path given"));
        }
        validate_name(collection)?;
        std::fs::create_dir_all(path)?;
        if let Some(marker) = recovery::pending(path)?.into_iter().next() {
            return Err(Error::RecoveryPending { collection: marker.collection });
        }
        let conn = open_connection(path, opts.timeout).await?;
        if !table::table_exists(&conn, collection).await? {
            table::create_empty(&conn, collection, opts.default_dim).await?;
            info!(collection, dim = opts.default_dim, "created default collection");
        }
        Ok(Self { conn, root: path.to_path_buf(), default_dim: opts.default_dim })
    }

    /// Finishes every recreation a crash left pending and returns the
    /// collections it touched.
    pub async fn repair(path: impl AsRef<Path>, opts: ConnectOptions) -> Result<Vec<String>> {
        let path = path.as_ref();
        if !path.is_dir() {
            return Err(connection_error(path, "path is not a directory"));
        }
        let markers = recovery::pending(path)?;
        if markers.is_empty() {
            return Ok(Vec::new());
        }
        let conn = open_connection(path, opts.timeout).await?;
        let mut repaired = Vec::with_capacity(markers.len());
        for marker in &markers {
            recovery::resume(&conn, path, marker, opts.default_dim).await?;
            repaired.push(marker.collection.clone());
        }
        Ok(repaired)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn list_collections(&self) -> Result<Vec<String>> {
        let mut names = self.conn.table_names().execute().await.map_err(Error::store)?;
        names.sort();
        Ok(names)
    }

    pub async fn create_collection(&mut self, name: &str, dim: Option<i32>) -> Result<()> {
        validate_name(name)?;
        if table::table_exists(&self.conn, name).await? {
            return Err(Error::Validation(format!("collection '{name}' already exists")));
        }
        let dim = dim.unwrap_or(self.default_dim);
        if dim <= 0 {
            return Err(Error::Validation(format!("embedding dimension must be positive, got {dim}")));
        }
        table::create_empty(&self.conn, name, dim).await?;
        info!(collection = name, dim, "created collection");
        Ok(())
    }

    pub async fn drop_collection(&mut self, name: &str) -> Result<()> {
        if !table::table_exists(&self.conn, name).await? {
            return Err(Error::CollectionNotFound(name.to_string()));
        }
        self.conn.drop_table(name, &[]).await.map_err(Error::store)?;
        let seg = recovery::segment_dir(&self.root, name);
        if seg.exists() {
            std::fs::remove_dir_all(&seg)?;
        }
        info!(collection = name, "dropped collection");
        Ok(())
    }

    pub async fn collection_info(&self, name: &str) -> Result<CollectionInfo> {
        let t = table::open(&self.conn, name).await?;
        let count = t.count_rows(None).await.map_err(Error::store)?;
        let dimension = table::dimension(&t).await?.unwrap_or(self.default_dim);
        let version = t.version().await.map_err(Error::store)?;
        Ok(CollectionInfo { name: name.to_string(), count, dimension, version })
    }

    /// Appends chunks, assigning a UUID to any without an id.
    pub async fn insert_chunks(&mut self, collection: &str, chunks: Vec<NewChunk>) -> Result<Vec<ChunkId>> {
        let t = table::open(&self.conn, collection).await?;
        let dim = table::dimension(&t).await?.unwrap_or(self.default_dim);
        let mut rows = Vec::with_capacity(chunks.len());
        for c in chunks {
            if let Some(v) = &c.embedding {
                if i32::try_from(v.len()).ok() != Some(dim) {
                    return Err(Error::Validation(format!(
                        "embedding has {} values, collection '{collection}' expects {dim}",
                        v.len()
                    )));
                }
            }
            rows.push(Chunk {
                id: c.id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
                document: c.document,
                metadata: c.metadata,
                embedding: c.embedding,
            });
        }
        table::append(&t, &rows).await?;
        debug!(collection, inserted = rows.len(), "inserted chunks");
        Ok(rows.into_iter().map(|c| c.id).collect())
    }

    pub async fn load_collection(&self, collection: &str) -> Result<Vec<Chunk>> {
        let t = table::open(&self.conn, collection).await?;
        let chunks = table::scan(&t, None).await?;
        debug!(collection, rows = chunks.len(), "scanned collection");
        Ok(chunks)
    }

    pub async fn get_chunks(&self, collection: &str, ids: &[ChunkId]) -> Result<Vec<Chunk>> {
        let t = table::open(&self.conn, collection).await?;
        table::fetch(&t, &dedup_ids(ids)).await
    }

    pub async fn chunk_ids(&self, collection: &str) -> Result<Vec<ChunkId>> {
        Ok(self.load_collection(collection).await?.into_iter().map(|c| c.id).collect())
    }

    /// Chunks whose `key` equals `value`, or contains it when multi-valued.
    pub async fn query_by_metadata(&self, collection: &str, key: &str, value: &str) -> Result<Vec<Chunk>> {
        let all = self.load_collection(collection).await?;
        Ok(all.into_iter().filter(|c| metadata::matches(&c.metadata, key, value)).collect())
    }

    pub async fn upsert_metadata(
        &mut self,
        collection: &str,
        ids: &[ChunkId],
        key: &str,
        value: &str,
    ) -> Result<OpReport> {
        metadata::validate_edit(key, Some(value))?;
        self.edit_metadata(collection, ids, |c| metadata::upsert(&mut c.metadata, key, value)).await
    }

    /// Removes `key`, or only `value` from it when given.
    pub async fn delete_metadata_key(
        &mut self,
        collection: &str,
        ids: &[ChunkId],
        key: &str,
        value: Option<&str>,
    ) -> Result<OpReport> {
        metadata::validate_edit(key, value)?;
        self.edit_metadata(collection, ids, |c| metadata::remove(&mut c.metadata, key, value)).await
    }

    /// Overwrites whole metadata maps.
    pub async fn replace_metadata(&mut self, collection: &str, rows: Vec<(ChunkId, Metadata)>) -> Result<OpReport> {
        let ids: Vec<ChunkId> = rows.iter().map(|(id, _)| id.clone()).collect();
        let mut wanted: HashMap<ChunkId, Metadata> = rows.into_iter().collect();
        self.edit_metadata(collection, &ids, |c| match wanted.remove(&c.id) {
            Some(m) if m != c.metadata => {
                c.metadata = m;
                true
            }
            _ => false,
        })
        .await
    }

    async fn edit_metadata<F>(&mut self, collection: &str, ids: &[ChunkId], mut edit: F) -> Result<OpReport>
    where
        F: FnMut(&mut Chunk) -> bool,
    {
        let t = table::open(&self.conn, collection).await?;
        let ids = dedup_ids(ids);
        let mut found = table::fetch(&t, &ids).await?;
        let present: HashSet<&str> = found.iter().map(|c| c.id.as_str()).collect();
        let missing: Vec<ChunkId> = ids.iter().filter(|id| !present.contains(id.as_str())).cloned().collect();

        let applied = found.len();
        found.retain_mut(|c| edit(c));
        self.write_metadata(&t, &found).await?;

        let report = OpReport { requested: ids.len(), applied, missing };
        if !report.is_complete() {
            warn!(collection, requested = report.requested, missing = report.missing.len(), "ids not found");
        }
        debug!(collection, applied, rewritten = found.len(), "metadata edit");
        Ok(report)
    }

    async fn write_metadata(&self, t: &lancedb::Table, chunks: &[Chunk]) -> Result<()> {
        table::rewrite(t, chunks).await
    }

    /// Deletes `ids`; a collection left empty is dropped and recreated under
    /// the same name.
    pub async fn delete_chunks(&mut self, collection: &str, ids: &[ChunkId]) -> Result<DeleteReport> {
        let t = table::open(&self.conn, collection).await?;
        let ids = dedup_ids(ids);
        let found: Vec<ChunkId> = table::fetch(&t, &ids).await?.into_iter().map(|c| c.id).collect();
        let present: HashSet<&str> = found.iter().map(String::as_str).collect();
        let missing: Vec<ChunkId> = ids.iter().filter(|id| !present.contains(id.as_str())).cloned().collect();

        table::delete_ids(&t, &found).await?;
        let op = OpReport { requested: ids.len(), applied: found.len(), missing };
        if !op.is_complete() {
            warn!(collection, requested = op.requested, missing = op.missing.len(), "ids not found");
        }
        info!(collection, deleted = op.applied, "deleted chunks");

        let mut recreated = false;
        if op.applied > 0 {
            let remaining = t.count_rows(None).await.map_err(Error::store)?;
            if remaining == 0 {
                let dim = table::dimension(&t).await?.unwrap_or(self.default_dim);
                drop(t);
                recovery::recreate_empty(&self.conn, &self.root, collection, dim).await?;
                recreated = true;
            }
        }
        Ok(DeleteReport { op, recreated })
    }
}
