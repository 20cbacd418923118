//! Spreadsheet export of a view and re-import of edited metadata.
//!
//! Columns are `id,selected,document,metadata`, with the metadata cell holding
//! the JSON object exactly as stored.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use crate::error::{Error, Result};
use crate::selection::Selection;
use crate::types::{Chunk, ChunkId, Metadata};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Record {
    id: String,
    selected: bool,
    document: String,
    metadata: String,
}

/// One parsed row of an exported sheet.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportRow {
    pub id: ChunkId,
    pub selected: bool,
    pub document: String,
    pub metadata: Metadata,
}

pub fn write_csv<W: Write>(out: W, chunks: &[Chunk], selection: &Selection) -> Result<usize> {
    let mut wtr = csv::Writer::from_writer(out);
    for chunk in chunks {
        wtr.serialize(Record {
            id: chunk.id.clone(),
            selected: selection.contains(&chunk.id),
            document: chunk.document.clone(),
            metadata: serde_json::to_string(&chunk.metadata)?,
        })?;
    }
    wtr.flush()?;
    Ok(chunks.len())
}

pub fn read_csv<R: Read>(input: R) -> Result<Vec<ExportRow>> {
    let mut rdr = csv::Reader::from_reader(input);
    let mut rows = Vec::new();
    for (line, rec) in rdr.deserialize::<Record>().enumerate() {
        let rec = rec?;
        let cell = rec.metadata.trim();
        let metadata: Metadata = if cell.is_empty() {
            Metadata::new()
        } else {
            serde_json::from_str(cell).map_err(|e| {
                Error::Validation(format!("row {} ({}): metadata is not a JSON object: {e}", line + 1, rec.id))
            })?
        };
        rows.push(ExportRow {
            id: rec.id,
            selected: rec.selected,
            document: rec.document,
            metadata,
        });
    }
    Ok(rows)
}

pub fn export_to_path(path: &Path, chunks: &[Chunk], selection: &Selection) -> Result<usize> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    write_csv(File::create(path)?, chunks, selection)
}

pub fn import_from_path(path: &Path) -> Result<Vec<ExportRow>> {
    read_csv(File::open(path)?)
}
