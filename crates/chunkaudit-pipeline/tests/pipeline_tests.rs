use std::collections::HashSet;

use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use chunkaudit_core::config::PipelineSettings;
use chunkaudit_core::metadata::{CHUNK_INDEX, FILESET, SOURCE_FILE, TOTAL_CHUNKS, UPLOAD_TIMESTAMP};
use chunkaudit_core::{Error, MetaValue, NewChunk};
use chunkaudit_pipeline::{ingest_file, tag_new_chunks, ChatScope, PipelineClient};
use chunkaudit_store::{ConnectOptions, Store};

fn settings(server: &MockServer) -> PipelineSettings {
    PipelineSettings {
        base_url: server.uri(),
        ingest_flow_id: "ingest-flow".into(),
        chat_flow_id: "chat-flow".into(),
        file_input_component: "File-abc".into(),
        chat_input_component: "ChatInput-abc".into(),
        store_query_component: "Store-abc".into(),
        ..PipelineSettings::default()
    }
}

fn row(id: &str) -> NewChunk {
    NewChunk::new(format!("text {id}")).with_id(id).with_embedding(vec![1.0, 0.0])
}

async fn store_with(tmp: &tempfile::TempDir, ids: &[&str]) -> anyhow::Result<Store> {
    let opts = ConnectOptions { default_dim: 2, ..ConnectOptions::default() };
    let mut store = Store::initialize(tmp.path(), "docs", opts).await?;
    store.insert_chunks("docs", ids.iter().map(|id| row(id)).collect()).await?;
    Ok(store)
}

#[tokio::test]
async fn upload_posts_file_as_base64_tweak() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/run/ingest-flow"))
        .and(query_param("stream", "false"))
        .and(body_partial_json(json!({
            "input_type": "text",
            "output_type": "text",
            "tweaks": { "File-abc": { "name": "notes.txt", "content": "aGVsbG8=" } }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"outputs": []})))
        .expect(1)
        .mount(&server)
        .await;

    let tmp = tempfile::tempdir()?;
    let file = tmp.path().join("notes.txt");
    std::fs::write(&file, "hello")?;

    let client = PipelineClient::new(&settings(&server))?;
    client.upload(&file).await?;

    let requests = server.received_requests().await.unwrap_or_default();
    let body: Value = serde_json::from_slice(&requests[0].body)?;
    let input: Value = serde_json::from_str(body["input_value"].as_str().unwrap_or_default())?;
    assert_eq!(input["name"], json!("notes.txt"));
    Ok(())
}

#[tokio::test]
async fn failed_flow_is_a_pipeline_error() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("flow crashed"))
        .mount(&server)
        .await;

    let tmp = tempfile::tempdir()?;
    let file = tmp.path().join("a.txt");
    std::fs::write(&file, "x")?;
    let client = PipelineClient::new(&settings(&server))?;
    match client.upload(&file).await {
        Err(Error::Pipeline(msg)) => assert!(msg.contains("flow crashed")),
        other => panic!("expected pipeline error, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn non_json_chat_reply_is_reported_as_such() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/run/chat-flow"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
        .mount(&server)
        .await;

    let client = PipelineClient::new(&settings(&server))?;
    let scope = ChatScope::File("a.txt".into());
    match client.chat("hello", Some(&scope), "docs", std::path::Path::new("/data/db")).await {
        Err(Error::Pipeline(msg)) => assert!(msg.contains("non-JSON body"), "{msg}"),
        other => panic!("expected pipeline error, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn chat_sends_scope_filter_and_reads_answer() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/run/chat-flow"))
        .and(body_partial_json(json!({
            "input_value": "What is inside?",
            "input_type": "chat",
            "tweaks": {
                "ChatInput-abc": { "input": "What is inside?" },
                "Store-abc": {
                    "collection_name": "docs",
                    "search_documents": {
                        "where": { "fileset": { "$contains": "reading" } },
                        "n_results": 4
                    }
                }
            }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "outputs": [{ "outputs": [{ "results": {
                "message": { "text": "Two chapters." },
                "context": [{ "metadata": { "source_file": "book.pdf" }, "page_content": "Chapter one" }]
            }}]}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = PipelineClient::new(&settings(&server))?;
    let scope = ChatScope::FileSet("reading".into());
    let answer = client
        .chat("What is inside?", Some(&scope), "docs", std::path::Path::new("/data/db"))
        .await?;
    assert_eq!(answer.text, "Two chapters.");
    assert_eq!(answer.references.len(), 1);
    assert_eq!(answer.references[0].source_file, "book.pdf");
    assert_eq!(answer.references[0].excerpt, "Chapter one");
    Ok(())
}

#[tokio::test]
async fn chat_rejects_missing_scope_and_blank_question() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    let client = PipelineClient::new(&settings(&server))?;
    let db = std::path::Path::new("/data/db");
    let scope = ChatScope::File("a.txt".into());

    assert!(matches!(client.chat("  ", Some(&scope), "docs", db).await, Err(Error::Validation(_))));
    assert!(matches!(client.chat("hello", None, "docs", db).await, Err(Error::Validation(_))));
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
    Ok(())
}

#[tokio::test]
async fn new_chunks_are_numbered_and_tagged() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let mut store = store_with(&tmp, &["old"]).await?;
    let before: HashSet<String> = store.chunk_ids("docs").await?.into_iter().collect();

    store.insert_chunks("docs", vec![row("n1"), row("n2"), row("n3")]).await?;
    let outcome = tag_new_chunks(&mut store, "docs", &before, "report.pdf", Some("reading")).await?;
    assert_eq!(outcome.new_chunks, 3);
    assert!(outcome.tagged.is_complete());

    let tagged = store
        .get_chunks("docs", &["n1".to_string(), "n2".to_string(), "n3".to_string()])
        .await?;
    let mut indexes: Vec<i64> = tagged
        .iter()
        .filter_map(|c| match c.metadata.get(CHUNK_INDEX) {
            Some(MetaValue::Int(n)) => Some(*n),
            _ => None,
        })
        .collect();
    indexes.sort_unstable();
    assert_eq!(indexes, vec![1, 2, 3]);
    for c in &tagged {
        assert_eq!(c.metadata[TOTAL_CHUNKS], MetaValue::Int(3));
        assert_eq!(c.metadata[SOURCE_FILE], MetaValue::from("report.pdf"));
        assert_eq!(c.metadata[FILESET], MetaValue::from("reading"));
        assert!(c.metadata.contains_key(UPLOAD_TIMESTAMP));
    }

    let old = store.get_chunks("docs", &["old".to_string()]).await?.remove(0);
    assert!(old.metadata.is_empty());
    Ok(())
}

#[tokio::test]
async fn ingest_without_new_chunks_tags_nothing() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/run/ingest-flow"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let tmp = tempfile::tempdir()?;
    let mut store = store_with(&tmp, &["old"]).await?;
    let file = tmp.path().join("empty.txt");
    std::fs::write(&file, "")?;

    let client = PipelineClient::new(&settings(&server))?;
    let outcome = ingest_file(&client, &mut store, "docs", &file, None).await?;
    assert_eq!(outcome.new_chunks, 0);

    let bad = ingest_file(&client, &mut store, "docs", &file, Some("a|b")).await;
    assert!(matches!(bad, Err(Error::Validation(_))));
    Ok(())
}
