//! Grouping rules over flat chunk metadata.
//!
//! A "file" is every chunk whose `source_file` equals a name and a "file set"
//! is every chunk whose `fileset` contains a name. Nothing here is cached; the
//! store re-scans and applies these functions on every query.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use crate::error::{Error, Result};
use crate::types::{Chunk, MetaValue, Metadata};

pub const DELIMITER: &str = "|";

pub const SOURCE_FILE: &str = "source_file";
pub const FILESET: &str = "fileset";
pub const CHUNK_INDEX: &str = "chunk_index";
pub const TOTAL_CHUNKS: &str = "total_chunks";
pub const UPLOAD_TIMESTAMP: &str = "upload_timestamp";

/// The individual values carried by one metadata entry. Delimited strings are
/// split and trimmed, empty parts are dropped. Values outside the scalar and
/// string-list shapes take no part in grouping.
pub fn parts(value: &MetaValue) -> Vec<String> {
    match value {
        MetaValue::Other(_) => Vec::new(),
        MetaValue::Text(s) => split(s),
        MetaValue::List(items) => items
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        other => vec![other.to_string()],
    }
}

fn split(s: &str) -> Vec<String> {
    s.split(DELIMITER)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn is_multi_valued(value: &MetaValue) -> bool {
    match value {
        MetaValue::List(_) => true,
        MetaValue::Text(s) => s.contains(DELIMITER),
        _ => false,
    }
}

/// Exact match, or membership for multi-value entries.
pub fn matches(metadata: &Metadata, key: &str, value: &str) -> bool {
    let needle = value.trim();
    metadata
        .get(key)
        .is_some_and(|v| parts(v).iter().any(|p| p == needle))
}

/// Rejects edits the grouping rules cannot represent.
pub fn validate_edit(key: &str, value: Option<&str>) -> Result<()> {
    if key.trim().is_empty() {
        return Err(Error::Validation("metadata key is empty".into()));
    }
    if let Some(v) = value {
        if v.trim().is_empty() {
            return Err(Error::Validation(format!("value for '{key}' is empty")));
        }
        if v.contains(DELIMITER) {
            return Err(Error::Validation(format!(
                "value '{v}' contains the reserved delimiter '{DELIMITER}'"
            )));
        }
    }
    Ok(())
}

/// Sets `key = value`. `fileset` and keys that are already multi-valued get
/// the value appended instead, without duplicates. Returns whether the map
/// changed.
pub fn upsert(metadata: &mut Metadata, key: &str, value: &str) -> bool {
    let value = value.trim();
    let appending = key == FILESET || metadata.get(key).is_some_and(is_multi_valued);

    let Some(existing) = metadata.get(key).filter(|_| appending) else {
        let next = MetaValue::Text(value.to_string());
        let changed = metadata.get(key) != Some(&next);
        metadata.insert(key.to_string(), next);
        return changed;
    };

    let mut values = parts(existing);
    if values.iter().any(|p| p == value) {
        return false;
    }
    values.push(value.to_string());
    let next = match existing {
        MetaValue::List(_) => MetaValue::List(values),
        _ => MetaValue::Text(values.join(DELIMITER)),
    };
    metadata.insert(key.to_string(), next);
    true
}

/// Without a value drops the key. With a value removes that value from a
/// multi-value entry (dropping the key once nothing is left) or drops a
/// single-valued key only when it equals the value. Returns whether the map
/// changed.
pub fn remove(metadata: &mut Metadata, key: &str, value: Option<&str>) -> bool {
    let Some(value) = value.map(str::trim) else {
        return metadata.remove(key).is_some();
    };
    let Some(existing) = metadata.get(key) else {
        return false;
    };

    if !is_multi_valued(existing) {
        if parts(existing).iter().any(|p| p == value) {
            metadata.remove(key);
            return true;
        }
        return false;
    }

    let before = parts(existing);
    let rest: Vec<String> = before.iter().filter(|p| *p != value).cloned().collect();
    if rest.len() == before.len() {
        return false;
    }
    if rest.is_empty() {
        metadata.remove(key);
        return true;
    }
    let next = match existing {
        MetaValue::List(_) => MetaValue::List(rest),
        _ => MetaValue::Text(rest.join(DELIMITER)),
    };
    metadata.insert(key.to_string(), next);
    true
}

/// `chunk_index` as an integer, accepting numeric strings.
#[allow(clippy::cast_possible_truncation)]
pub fn chunk_index(metadata: &Metadata) -> Option<i64> {
    match metadata.get(CHUNK_INDEX)? {
        MetaValue::Int(n) => Some(*n),
        MetaValue::Float(x) if x.is_finite() && x.fract() == 0.0 => Some(*x as i64),
        MetaValue::Text(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn source_file(metadata: &Metadata) -> String {
    metadata.get(SOURCE_FILE).map(ToString::to_string).unwrap_or_default()
}

/// Reading order: source file (missing sorts as empty), then numeric chunk
/// index with unindexed chunks last, then id.
pub fn reading_order(a: &Chunk, b: &Chunk) -> Ordering {
    let key = |c: &Chunk| {
        let idx = chunk_index(&c.metadata);
        (source_file(&c.metadata), idx.is_none(), idx.unwrap_or_default())
    };
    key(a).cmp(&key(b)).then_with(|| a.id.cmp(&b.id))
}

pub fn sort_for_reading(chunks: &mut [Chunk]) {
    chunks.sort_by(reading_order);
}

/// Every value of `key` across `chunks`, split, deduplicated and sorted.
pub fn distinct_values<'a, I>(chunks: I, key: &str) -> Vec<String>
where
    I: IntoIterator<Item = &'a Metadata>,
{
    let mut seen = BTreeSet::new();
    for metadata in chunks {
        if let Some(v) = metadata.get(key) {
            seen.extend(parts(v));
        }
    }
    seen.into_iter().collect()
}
