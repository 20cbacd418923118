use base64::Engine;
use serde::Serialize;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use chunkaudit_core::config::PipelineSettings;
use chunkaudit_core::{Error, Result};

/// Longest excerpt kept from each retrieved passage.
const EXCERPT_CHARS: usize = 200;

/// What a chat question is restricted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatScope {
    File(String),
    FileSet(String),
}

impl ChatScope {
    fn name(&self) -> &str {
        match self {
            Self::File(n) | Self::FileSet(n) => n,
        }
    }

    /// Metadata filter handed to the runner's store query.
    pub fn where_clause(&self) -> Value {
        match self {
            Self::File(name) => json!({ "source_file": name }),
            Self::FileSet(name) => json!({ "fileset": { "$contains": name } }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextRef {
    pub source_file: String,
    pub excerpt: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatAnswer {
    pub text: String,
    pub references: Vec<ContextRef>,
}

#[derive(Debug, Serialize)]
struct FileData {
    path: String,
    content: String,
    name: String,
}

pub struct PipelineClient {
    http: reqwest::Client,
    settings: PipelineSettings,
}

impl PipelineClient {
    pub fn new(settings: &PipelineSettings) -> Result<Self> {
        url::Url::parse(&settings.base_url)
            .map_err(|e| Error::InvalidConfig(format!("pipeline.base_url '{}': {e}", settings.base_url)))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| Error::Pipeline(e.to_string()))?;
        Ok(Self { http, settings: settings.clone() })
    }

    fn run_url(&self, flow_id: &str) -> Result<String> {
        if flow_id.trim().is_empty() {
            return Err(Error::InvalidConfig("pipeline flow id is not configured".into()));
        }
        Ok(format!(
            "{}/api/v1/run/{flow_id}?stream=false",
            self.settings.base_url.trim_end_matches('/')
        ))
    }

    async fn run(&self, flow_id: &str, payload: &Value) -> Result<Value> {
        let url = self.run_url(flow_id)?;
        debug!(%url, "running flow");
        let response = self
            .http
            .post(&url)
            .json(payload)
            .send()
            .await
            .map_err(|e| Error::Pipeline(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| Error::Pipeline(e.to_string()))?;
        if !status.is_success() {
            return Err(Error::Pipeline(format!("flow {flow_id} returned {status}: {body}")));
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body)
            .map_err(|e| Error::Pipeline(format!("flow {flow_id} returned non-JSON body: {e}")))
    }

    /// Sends one file through the ingestion flow. Returns once the runner
    /// reports the flow finished, which is after its chunks are written.
    pub async fn upload(&self, path: &Path) -> Result<Value> {
        let bytes = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::Validation(format!("'{}' has no file name", path.display())))?;
        let file_data = FileData {
            path: path.to_string_lossy().into_owned(),
            content: base64::engine::general_purpose::STANDARD.encode(&bytes),
            name,
        };
        let payload = json!({
            "input_value": serde_json::to_string(&file_data)?,
            "input_type": "text",
            "output_type": "text",
            "tweaks": { self.settings.file_input_component.clone(): file_data },
        });
        info!(file = %path.display(), bytes = bytes.len(), "uploading");
        self.run(&self.settings.ingest_flow_id, &payload).await
    }

    /// Asks the chat flow a question restricted to one file or file set.
    pub async fn chat(
        &self,
        question: &str,
        scope: Option<&ChatScope>,
        collection: &str,
        persist_directory: &Path,
    ) -> Result<ChatAnswer> {
        let question = question.trim();
        if question.is_empty() {
            return Err(Error::Validation("question is empty".into()));
        }
        let scope = scope.ok_or_else(|| Error::Validation("choose a file or a file set to chat with".into()))?;
        if scope.name().trim().is_empty() {
            return Err(Error::Validation("chat scope has no name".into()));
        }

        let payload = json!({
            "input_value": question,
            "input_type": "chat",
            "output_type": "chat",
            "tweaks": {
                self.settings.chat_input_component.clone(): { "input": question },
                self.settings.store_query_component.clone(): {
                    "collection_name": collection,
                    "persist_directory": persist_directory.to_string_lossy(),
                    "search_documents": {
                        "query": question,
                        "where": scope.where_clause(),
                        "n_results": self.settings.n_results,
                        "search_type": "similarity",
                        "include": ["documents", "metadatas", "distances"],
                    },
                },
            },
        });
        let response = self.run(&self.settings.chat_flow_id, &payload).await?;
        parse_answer(&response)
            .ok_or_else(|| Error::Pipeline("no answer text in chat response".into()))
    }
}

/// Reads `outputs[0].outputs[0].results` of a run response. The message is
/// either an object with `text` or a bare string.
pub fn parse_answer(response: &Value) -> Option<ChatAnswer> {
    let results = response.pointer("/outputs/0/outputs/0/results")?;
    let text = match results.get("message")? {
        Value::String(s) => s.clone(),
        Value::Object(m) => m.get("text")?.as_str()?.to_string(),
        _ => return None,
    };
    if text.is_empty() {
        return None;
    }
    let references = results
        .get("context")
        .and_then(Value::as_array)
        .map(|docs| {
            docs.iter()
                .map(|doc| ContextRef {
                    source_file: doc
                        .pointer("/metadata/source_file")
                        .and_then(Value::as_str)
                        .unwrap_or("Unknown")
                        .to_string(),
                    excerpt: doc
                        .get("page_content")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .chars()
                        .take(EXCERPT_CHARS)
                        .collect(),
                })
                .collect()
        })
        .unwrap_or_default();
    Some(ChatAnswer { text, references })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answer_accepts_object_or_string_message() {
        let obj = json!({"outputs":[{"outputs":[{"results":{"message":{"text":"hi"}}}]}]});
        assert_eq!(parse_answer(&obj).map(|a| a.text), Some("hi".to_string()));
        let bare = json!({"outputs":[{"outputs":[{"results":{"message":"plain"}}]}]});
        assert_eq!(parse_answer(&bare).map(|a| a.text), Some("plain".to_string()));
        assert!(parse_answer(&json!({"outputs": []})).is_none());
    }

    #[test]
    fn references_are_truncated() {
        let long = "x".repeat(500);
        let v = json!({"outputs":[{"outputs":[{"results":{
            "message": "ok",
            "context": [
                {"metadata": {"source_file": "a.pdf"}, "page_content": long},
                {"page_content": "short"}
            ]
        }}]}]});
        let answer = parse_answer(&v).unwrap();
        assert_eq!(answer.references[0].source_file, "a.pdf");
        assert_eq!(answer.references[0].excerpt.len(), EXCERPT_CHARS);
        assert_eq!(answer.references[1].source_file, "Unknown");
    }

    #[test]
    fn scopes_build_where_clauses() {
        assert_eq!(ChatScope::File("a.txt".into()).where_clause(), json!({"source_file": "a.txt"}));
        assert_eq!(
            ChatScope::FileSet("reading".into()).where_clause(),
            json!({"fileset": {"$contains": "reading"}})
        );
    }
}
