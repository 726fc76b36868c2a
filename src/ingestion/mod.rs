//! Ingestion Processors (§4.5) — pluggable per-source-type extraction into a
//! uniform chunked document model. Every processor implements the same
//! `process(source, router?) -> SourceDocument` contract; `router` is only
//! passed to processors that need LLM capability (slide vision, video vision).

mod presentation;
mod text;
mod video;
mod web;

pub use presentation::PresentationProcessor;
pub use text::TextProcessor;
pub use video::{CompositeVideoProcessor, GeminiVideoProcessor, WhisperLocalProcessor};
pub use web::WebProcessor;

use crate::error::{CoreError, Result};
use crate::router::ModelRouter;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Video,
    Presentation,
    Text,
    Web,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Transcript,
    SlideText,
    SlideDescription,
    Paragraph,
    Heading,
    WebContent,
    Metadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentChunk {
    pub chunk_type: ChunkType,
    pub text: String,
    pub index: usize,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ContentChunk {
    pub fn new(chunk_type: ChunkType, text: impl Into<String>, index: usize) -> Self {
        Self { chunk_type, text: text.into(), index, metadata: Map::new() }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDocument {
    pub source_type: SourceType,
    pub source_url: Option<String>,
    pub title: Option<String>,
    pub chunks: Vec<ContentChunk>,
    pub processed_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// What a processor is given to work with. Exactly one of `file_path` /
/// `bytes` / `url` is meaningful per source type; processors validate this
/// themselves rather than the caller enforcing it generically.
#[derive(Debug, Clone)]
pub struct RawSource {
    pub source_type: SourceType,
    pub source_url: Option<String>,
    pub file_path: Option<PathBuf>,
    pub bytes: Option<Vec<u8>>,
    pub extension: Option<String>,
}

impl RawSource {
    pub fn require_matching_type(&self, expected: SourceType) -> Result<()> {
        if self.source_type != expected {
            return Err(CoreError::UnsupportedFormat(format!(
                "processor expects source_type {expected:?}, got {:?}",
                self.source_type
            )));
        }
        Ok(())
    }

    pub fn text_bytes(&self) -> Result<&[u8]> {
        self.bytes
            .as_deref()
            .ok_or_else(|| CoreError::InvalidRequest("source has no in-memory bytes".to_string()))
    }
}

#[async_trait]
pub trait SourceProcessor: Send + Sync {
    async fn process(&self, source: &RawSource, router: Option<&ModelRouter>) -> Result<SourceDocument>;
}
