use std::sync::Arc;

use arrow_array::{new_null_array, ArrayRef, RecordBatch, RecordBatchIterator, StringArray};
use pretty_assertions::assert_eq;

use chunkaudit_core::metadata::{CHUNK_INDEX, FILESET, SOURCE_FILE};
use chunkaudit_core::{CollectionHealth, MetaValue, NewChunk, ViewKind};
use chunkaudit_store::grouping::{
    add_to_fileset, check_collection, list_distinct_values, list_filesets, list_files, load_group,
    load_view, remove_from_fileset,
};
use chunkaudit_store::schema::chunk_schema;
use chunkaudit_store::{ConnectOptions, Store};

fn opts() -> ConnectOptions {
    ConnectOptions { default_dim: 2, ..ConnectOptions::default() }
}

fn row(id: &str) -> NewChunk {
    NewChunk::new(format!("text {id}")).with_id(id).with_embedding(vec![0.1, 0.2])
}

fn ids(chunks: &[chunkaudit_core::Chunk]) -> Vec<&str> {
    chunks.iter().map(|c| c.id.as_str()).collect()
}

fn owned(v: &[&str]) -> Vec<String> {
    v.iter().map(|s| (*s).to_string()).collect()
}

#[tokio::test]
async fn load_group_orders_by_file_then_index() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let mut store = Store::initialize(tmp.path(), "docs", opts()).await?;
    store
        .insert_chunks(
            "docs",
            vec![
                row("k").with_meta(SOURCE_FILE, "b.pdf").with_meta(CHUNK_INDEX, 1_i64).with_meta(FILESET, "set"),
                row("j").with_meta(SOURCE_FILE, "a.pdf").with_meta(FILESET, "set"),
                row("i").with_meta(SOURCE_FILE, "a.pdf").with_meta(CHUNK_INDEX, "10").with_meta(FILESET, "set"),
                row("h").with_meta(SOURCE_FILE, "a.pdf").with_meta(CHUNK_INDEX, 2_i64).with_meta(FILESET, "set|x"),
                row("g").with_meta(CHUNK_INDEX, 3_i64).with_meta(FILESET, "set"),
                row("f").with_meta(SOURCE_FILE, "a.pdf").with_meta(FILESET, "set"),
                row("e").with_meta(SOURCE_FILE, "a.pdf").with_meta(CHUNK_INDEX, 2_i64).with_meta(FILESET, "set"),
            ],
        )
        .await?;

    let group = load_group(&store, "docs", FILESET, "set").await?;
    assert_eq!(ids(&group), vec!["g", "e", "h", "i", "f", "j", "k"]);

    let again = load_group(&store, "docs", FILESET, "set").await?;
    assert_eq!(ids(&again), ids(&group));

    let file = load_view(&store, "docs", &ViewKind::File("a.pdf".into())).await?;
    assert_eq!(ids(&file), vec!["e", "h", "i", "f", "j"]);

    let everything = load_view(&store, "docs", &ViewKind::Collection).await?;
    assert_eq!(ids(&everything), ids(&group));
    Ok(())
}

#[tokio::test]
async fn distinct_values_track_edits() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let mut store = Store::initialize(tmp.path(), "docs", opts()).await?;
    store
        .insert_chunks(
            "docs",
            vec![
                row("1").with_meta(SOURCE_FILE, "notes.md").with_meta(FILESET, "reading"),
                row("2").with_meta(SOURCE_FILE, "notes.md"),
                row("3").with_meta(SOURCE_FILE, "plan.md").with_meta(FILESET, " reading | archive |"),
                row("4"),
            ],
        )
        .await?;

    assert_eq!(list_files(&store, "docs").await?, owned(&["notes.md", "plan.md"]));
    assert_eq!(list_filesets(&store, "docs").await?, owned(&["archive", "reading"]));

    add_to_fileset(&mut store, "docs", &owned(&["1"]), "reference").await?;
    assert!(load_group(&store, "docs", FILESET, "reading").await?.iter().any(|c| c.id == "1"));
    assert!(load_group(&store, "docs", FILESET, "reference").await?.iter().any(|c| c.id == "1"));
    assert_eq!(list_filesets(&store, "docs").await?, owned(&["archive", "reading", "reference"]));

    remove_from_fileset(&mut store, "docs", &owned(&["3"]), "archive").await?;
    remove_from_fileset(&mut store, "docs", &owned(&["1", "3"]), "reading").await?;
    assert_eq!(list_filesets(&store, "docs").await?, owned(&["reference"]));

    store.delete_metadata_key("docs", &owned(&["1"]), FILESET, None).await?;
    assert!(list_filesets(&store, "docs").await?.is_empty());

    store.upsert_metadata("docs", &owned(&["4"]), "topic", "alpha").await?;
    store.upsert_metadata("docs", &owned(&["4"]), "topic", "beta").await?;
    assert_eq!(list_distinct_values(&store, "docs", "topic").await?, owned(&["beta"]));

    let three = store.get_chunks("docs", &owned(&["3"])).await?.remove(0);
    assert!(!three.metadata.contains_key(FILESET));
    assert_eq!(three.metadata[SOURCE_FILE], MetaValue::from("plan.md"));
    Ok(())
}

#[tokio::test]
async fn health_check_distinguishes_states() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let mut store = Store::initialize(tmp.path(), "docs", opts()).await?;
    assert_eq!(check_collection(&store, "docs").await?, CollectionHealth::Empty);

    store.insert_chunks("docs", vec![row("1"), row("2")]).await?;
    assert_eq!(check_collection(&store, "docs").await?, CollectionHealth::NoFiles { chunks: 2 });

    store.upsert_metadata("docs", &owned(&["1"]), SOURCE_FILE, "one.txt").await?;
    assert_eq!(
        check_collection(&store, "docs").await?,
        CollectionHealth::HasFiles { chunks: 2, files: 1 }
    );
    Ok(())
}

/// Appends one row the way an outside writer would, bypassing the store.
async fn write_raw(root: &std::path::Path, id: &str, metadata: &str) -> anyhow::Result<()> {
    let schema = chunk_schema(2);
    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from(vec![id])),
        Arc::new(StringArray::from(vec!["written by the pipeline"])),
        Arc::new(StringArray::from(vec![metadata])),
        new_null_array(schema.field(3).data_type(), 1),
    ];
    let batch = RecordBatch::try_new(schema.clone(), columns)?;
    let conn = lancedb::connect(&root.to_string_lossy()).execute().await?;
    let table = conn.open_table("docs").execute().await?;
    table
        .add(Box::new(RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema)))
        .execute()
        .await?;
    Ok(())
}

#[tokio::test]
async fn rows_with_null_or_nested_metadata_stay_readable() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let mut store = Store::initialize(tmp.path(), "docs", opts()).await?;
    store.insert_chunks("docs", vec![row("a1").with_meta(SOURCE_FILE, "a.txt")]).await?;
    write_raw(tmp.path(), "b1", r#"{"source_file":"b.txt","page":null,"layout":{"cols":[1,2]}}"#).await?;

    assert_eq!(list_files(&store, "docs").await?, owned(&["a.txt", "b.txt"]));
    assert_eq!(
        check_collection(&store, "docs").await?,
        CollectionHealth::HasFiles { chunks: 2, files: 2 }
    );

    store.upsert_metadata("docs", &owned(&["b1"]), FILESET, "reading").await?;
    let b1 = store.get_chunks("docs", &owned(&["b1"])).await?.remove(0);
    assert_eq!(b1.metadata["page"], MetaValue::Other(serde_json::Value::Null));
    assert_eq!(b1.metadata["layout"].to_string(), r#"{"cols":[1,2]}"#);
    assert_eq!(b1.metadata[FILESET], MetaValue::from("reading"));

    let report = store.delete_chunks("docs", &owned(&["b1"])).await?;
    assert_eq!(report.op.applied, 1);
    assert_eq!(list_files(&store, "docs").await?, owned(&["a.txt"]));
    Ok(())
}
