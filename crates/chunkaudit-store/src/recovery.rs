//! Recreation of a collection that a delete left empty.
//!
//! The steps are drop, remove whatever is left of `<name>.lance/`, then create
//! a fresh table under the same name. A marker under `_recovery/` is written
//! before the drop and removed after the create, so a crash in between is
//! visible to the next `connect`.

use chrono::{DateTime, Utc};
use lancedb::Connection;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use chunkaudit_core::{Error, RecoveryStage, Result};

use crate::table;

pub const MARKER_DIR: &str = "_recovery";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryMarker {
    pub collection: String,
    /// `None` when the marker file could not be read back.
    pub dimension: Option<i32>,
    pub started_at: DateTime<Utc>,
}

pub fn segment_dir(root: &Path, collection: &str) -> PathBuf {
    root.join(format!("{collection}.lance"))
}

fn marker_path(root: &Path, collection: &str) -> PathBuf {
    root.join(MARKER_DIR).join(format!("{collection}.json"))
}

/// Markers left by recreations that never finished, sorted by collection.
/// A marker that cannot be parsed still counts, named after its file.
pub fn pending(root: &Path) -> Result<Vec<RecoveryMarker>> {
    let dir = root.join(MARKER_DIR);
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for entry in fs::read_dir(&dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let parsed = fs::read_to_string(&path)
            .map_err(Error::from)
            .and_then(|body| serde_json::from_str::<RecoveryMarker>(&body).map_err(Error::from));
        match parsed {
            Ok(marker) => out.push(marker),
            Err(e) => {
                let Some(collection) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
                    continue;
                };
                warn!(marker = %path.display(), error = %e, "unreadable recovery marker");
                let started_at = fs::metadata(&path)
                    .and_then(|m| m.modified())
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now());
                out.push(RecoveryMarker { collection, dimension: None, started_at });
            }
        }
    }
    out.sort_by(|a, b| a.collection.cmp(&b.collection));
    Ok(out)
}

fn write_marker(root: &Path, marker: &RecoveryMarker) -> std::io::Result<()> {
    let path = marker_path(root, &marker.collection);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let body = serde_json::to_vec_pretty(marker).map_err(std::io::Error::other)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, body)?;
    fs::rename(tmp, path)
}

fn clear_marker(root: &Path, collection: &str) -> std::io::Result<()> {
    let path = marker_path(root, collection);
    if path.exists() {
        fs::remove_file(&path)?;
    }
    let _ = fs::remove_file(path.with_extension("json.tmp"));
    // Leaves the directory in place when other markers remain.
    let _ = fs::remove_dir(root.join(MARKER_DIR));
    Ok(())
}

fn failed(collection: &str, stage: RecoveryStage, reason: impl std::fmt::Display) -> Error {
    Error::Recovery { collection: collection.to_string(), stage, reason: reason.to_string() }
}

/// Drops `collection`, clears its segment directory and recreates it empty
/// with `dimension`. Each failure names the step it stopped at; nothing is
/// retried.
pub async fn recreate_empty(conn: &Connection, root: &Path, collection: &str, dimension: i32) -> Result<()> {
    let marker = RecoveryMarker {
        collection: collection.to_string(),
        dimension: Some(dimension),
        started_at: Utc::now(),
    };
    write_marker(root, &marker).map_err(|e| failed(collection, RecoveryStage::WriteMarker, e))?;
    info!(collection, dimension, "collection is empty; recreating");

    conn.drop_table(collection, &[])
        .await
        .map_err(|e| failed(collection, RecoveryStage::DropCollection, e))?;
    info!(collection, "dropped");

    let seg = segment_dir(root, collection);
    if seg.exists() {
        fs::remove_dir_all(&seg).map_err(|e| failed(collection, RecoveryStage::RemoveSegments, e))?;
        info!(collection, dir = %seg.display(), "removed leftover segment directory");
    }

    table::create_empty(conn, collection, dimension)
        .await
        .map_err(|e| failed(collection, RecoveryStage::Recreate, e))?;
    info!(collection, "recreated");

    clear_marker(root, collection).map_err(|e| failed(collection, RecoveryStage::ClearMarker, e))?;
    Ok(())
}

/// Brings the collection named by `marker` to the state a finished recreation
/// leaves, then clears the marker. An existing table that opens and counts is
/// kept as is; anything else is dropped, wiped and created again, with
/// `default_dim` when the marker lost its dimension.
pub async fn resume(conn: &Connection, root: &Path, marker: &RecoveryMarker, default_dim: i32) -> Result<()> {
    let name = marker.collection.as_str();
    let dimension = marker.dimension.unwrap_or(default_dim);
    let healthy = match table::open(conn, name).await {
        Ok(t) => t.count_rows(None).await.is_ok(),
        Err(_) => false,
    };

    if healthy {
        info!(collection = name, "table already recreated; clearing marker");
    } else {
        if table::table_exists(conn, name).await.unwrap_or(false) {
            if let Err(e) = conn.drop_table(name, &[]).await {
                warn!(collection = name, error = %e, "drop during repair failed; removing directory");
            }
        }
        let seg = segment_dir(root, name);
        if seg.exists() {
            fs::remove_dir_all(&seg).map_err(|e| failed(name, RecoveryStage::RemoveSegments, e))?;
        }
        table::create_empty(conn, name, dimension)
            .await
            .map_err(|e| failed(name, RecoveryStage::Recreate, e))?;
        info!(collection = name, dimension, "recreated during repair");
    }

    clear_marker(root, name).map_err(|e| failed(name, RecoveryStage::ClearMarker, e))
}
