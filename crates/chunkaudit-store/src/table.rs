//! LanceDB table helpers: open/create, scans, and conversion between record
//! batches and chunks.

use arrow_array::cast::AsArray;
use arrow_array::types::Float32Type;
use arrow_array::{Array, FixedSizeListArray, RecordBatch, RecordBatchIterator, StringArray};
use arrow_schema::SchemaRef;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{Connection, Table};
use std::sync::Arc;

use chunkaudit_core::{Chunk, ChunkId, Error, Metadata, Result};

use crate::schema::{chunk_schema, dimension_of, DOCUMENT, ID, METADATA, VECTOR};

/// Ids per `IN (...)` filter.
const FILTER_BATCH: usize = 256;

pub async fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let names = conn.table_names().execute().await.map_err(Error::store)?;
    Ok(names.iter().any(|n| n == name))
}

pub async fn open(conn: &Connection, name: &str) -> Result<Table> {
    if !table_exists(conn, name).await? {
        return Err(Error::CollectionNotFound(name.to_string()));
    }
    conn.open_table(name).execute().await.map_err(Error::store)
}

/// Creates an empty collection table with the chunk layout.
pub async fn create_empty(conn: &Connection, name: &str, dim: i32) -> Result<Table> {
    let schema = chunk_schema(dim);
    let reader = RecordBatchIterator::new(vec![Ok(RecordBatch::new_empty(schema.clone()))], schema);
    conn.create_table(name, reader).execute().await.map_err(Error::store)
}

pub async fn dimension(table: &Table) -> Result<Option<i32>> {
    let schema = table.schema().await.map_err(Error::store)?;
    Ok(dimension_of(&schema))
}

/// `id IN ('a','b')` with quotes escaped.
pub fn id_filter(ids: &[ChunkId]) -> String {
    let list = ids
        .iter()
        .map(|id| format!("'{}'", id.replace('\'', "''")))
        .collect::<Vec<_>>()
        .join(",");
    format!("{ID} IN ({list})")
}

/// Every row matching `filter` (all rows when `None`), in scan order.
pub async fn scan(table: &Table, filter: Option<&str>) -> Result<Vec<Chunk>> {
    let mut query = table.query();
    if let Some(f) = filter {
        query = query.only_if(f);
    }
    let mut stream = query.execute().await.map_err(Error::store)?;
    let mut out = Vec::new();
    while let Some(batch) = futures::TryStreamExt::try_next(&mut stream).await.map_err(Error::store)? {
        out.extend(batch_to_chunks(&batch)?);
    }
    Ok(out)
}

/// Rows for `ids` in scan order. Unknown ids are simply absent.
pub async fn fetch(table: &Table, ids: &[ChunkId]) -> Result<Vec<Chunk>> {
    let mut out = Vec::new();
    for part in ids.chunks(FILTER_BATCH) {
        out.extend(scan(table, Some(&id_filter(part))).await?);
    }
    Ok(out)
}

pub async fn delete_ids(table: &Table, ids: &[ChunkId]) -> Result<()> {
    for part in ids.chunks(FILTER_BATCH) {
        table.delete(&id_filter(part)).await.map_err(Error::store)?;
    }
    Ok(())
}

pub async fn append(table: &Table, chunks: &[Chunk]) -> Result<()> {
    if chunks.is_empty() {
        return Ok(());
    }
    let schema = table.schema().await.map_err(Error::store)?;
    let batch = chunks_to_batch(schema.clone(), chunks)?;
    let reader = Box::new(RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema));
    table.add(reader).execute().await.map_err(Error::store)?;
    Ok(())
}

/// Rewrites existing rows keyed on `id`. Rows whose id is gone are skipped.
pub async fn rewrite(table: &Table, chunks: &[Chunk]) -> Result<()> {
    if chunks.is_empty() {
        return Ok(());
    }
    let schema = table.schema().await.map_err(Error::store)?;
    let batch = chunks_to_batch(schema.clone(), chunks)?;
    let reader = Box::new(RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema));
    let mut mi = table.merge_insert(&[ID]);
    mi.when_matched_update_all(None);
    mi.execute(reader).await.map_err(Error::store)?;
    Ok(())
}

pub fn chunks_to_batch(schema: SchemaRef, chunks: &[Chunk]) -> Result<RecordBatch> {
    let dim = dimension_of(&schema)
        .ok_or_else(|| Error::Store(format!("collection schema has no '{VECTOR}' column")))?;

    let mut ids = Vec::with_capacity(chunks.len());
    let mut documents = Vec::with_capacity(chunks.len());
    let mut metadata = Vec::with_capacity(chunks.len());
    let mut vectors: Vec<Option<Vec<Option<f32>>>> = Vec::with_capacity(chunks.len());
    for c in chunks {
        ids.push(c.id.clone());
        documents.push(c.document.clone());
        metadata.push(serde_json::to_string(&c.metadata)?);
        vectors.push(c.embedding.as_ref().map(|v| v.iter().map(|&x| Some(x)).collect()));
    }

    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(StringArray::from(ids)),
            Arc::new(StringArray::from(documents)),
            Arc::new(StringArray::from(metadata)),
            Arc::new(FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(vectors, dim)),
        ],
    )
    .map_err(Error::store)
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| Error::Store(format!("column '{name}' missing or not utf8")))
}

pub fn batch_to_chunks(batch: &RecordBatch) -> Result<Vec<Chunk>> {
    let ids = string_column(batch, ID)?;
    let documents = string_column(batch, DOCUMENT)?;
    let metadata = string_column(batch, METADATA)?;
    let vectors = batch
        .column_by_name(VECTOR)
        .and_then(|c| c.as_any().downcast_ref::<FixedSizeListArray>());

    let mut out = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        let meta: Metadata = if metadata.is_null(i) || metadata.value(i).trim().is_empty() {
            Metadata::new()
        } else {
            serde_json::from_str(metadata.value(i))?
        };
        let embedding = vectors
            .filter(|v| v.is_valid(i))
            .map(|v| v.value(i).as_primitive::<Float32Type>().values().to_vec());
        out.push(Chunk {
            id: ids.value(i).to_string(),
            document: if documents.is_null(i) { String::new() } else { documents.value(i).to_string() },
            metadata: meta,
            embedding,
        });
    }
    Ok(out)
}
