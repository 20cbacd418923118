//! Client for the external ingestion and chat flows.

pub mod client;
pub mod ingest;

pub use client::{ChatAnswer, ChatScope, ContextRef, PipelineClient};
pub use ingest::{ingest_file, tag_new_chunks, IngestOutcome};
