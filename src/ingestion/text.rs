//! Text processor (§4.5): markdown, structured word-processing documents,
//! hypertext, and plain text. Pure extraction — no LLM involvement.

use super::{ChunkType, ContentChunk, RawSource, SourceDocument, SourceProcessor, SourceType};
use crate::error::{CoreError, Result};
use crate::router::ModelRouter;
use async_trait::async_trait;
use chrono::Utc;
use docx_rust::document::{BodyContent, ParagraphContent, RunContent};
use docx_rust::DocxFile;
use regex::Regex;
use serde_json::Map;

pub struct TextProcessor {
    heading_regex: Regex,
}

impl Default for TextProcessor {
    fn default() -> Self {
        Self {
            heading_regex: Regex::new(r"(?m)^(#{1,6})\s+(.*)$").unwrap(),
        }
    }
}

impl TextProcessor {
    fn split_markdown(&self, content: &str) -> Vec<ContentChunk> {
        let mut chunks = Vec::new();
        let mut index = 0;

        let mut last_end = 0;
        let mut matches: Vec<(usize, usize, usize, String)> = Vec::new();
        for capture in self.heading_regex.captures_iter(content) {
            let whole = capture.get(0).unwrap();
            let level = capture.get(1).unwrap().as_str().len();
            let title = capture.get(2).unwrap().as_str().trim().to_string();
            matches.push((whole.start(), whole.end(), level, title));
        }

        for (start, end, level, title) in &matches {
            let body_start = *end;
            chunks.push(
                ContentChunk::new(ChunkType::Heading, title.clone(), index)
                    .with_metadata("level", *level as i64),
            );
            index += 1;
            last_end = body_start;
            let _ = start;
        }

        if matches.is_empty() {
            if !content.trim().is_empty() {
                chunks.push(ContentChunk::new(ChunkType::Paragraph, content.trim(), index));
            }
            return chunks;
        }

        // Attach the body following each heading up to the next heading as a
        // paragraph chunk, preserving document order.
        let mut bodies = Vec::new();
        for (i, (_, end, _, _)) in matches.iter().enumerate() {
            let next_start = matches.get(i + 1).map(|m| m.0).unwrap_or(content.len());
            let body = content[*end..next_start].trim();
            bodies.push(body.to_string());
        }
        let _ = last_end;

        let mut rebuilt = Vec::new();
        let mut heading_idx = 0;
        for chunk in chunks {
            let body = bodies.get(heading_idx).cloned().unwrap_or_default();
            heading_idx += 1;
            let heading_index = chunk.index;
            rebuilt.push(chunk);
            if !body.is_empty() {
                rebuilt.push(ContentChunk::new(ChunkType::Paragraph, body, heading_index + 1));
            }
        }

        // Re-index contiguously.
        for (i, chunk) in rebuilt.iter_mut().enumerate() {
            chunk.index = i;
        }
        rebuilt
    }

    /// The structured word-processing format exposes paragraph style names;
    /// we infer heading level from a `HeadingN` style, otherwise treat the
    /// paragraph as body text.
    fn split_structured_doc(&self, paragraphs: &[(String, Option<String>)]) -> Vec<ContentChunk> {
        let mut chunks = Vec::new();
        for (text, style) in paragraphs.iter() {
            if text.trim().is_empty() {
                continue;
            }
            let level = style
                .as_deref()
                .and_then(|s| s.strip_prefix("Heading"))
                .and_then(|n| n.trim().parse::<i64>().ok());

            let chunk = match level {
                Some(level) => ContentChunk::new(ChunkType::Heading, text.trim(), chunks.len())
                    .with_metadata("level", level),
                None => ContentChunk::new(ChunkType::Paragraph, text.trim(), chunks.len()),
            };
            chunks.push(chunk);
        }
        chunks
    }

    /// Extracts `(paragraph_text, style_name)` pairs from a `.docx` file on
    /// disk. Word-processing style ids look like `Heading1`/`Heading2`.
    fn read_structured_doc(path: &std::path::Path) -> Result<Vec<(String, Option<String>)>> {
        let docx_file = DocxFile::from_file(path)
            .map_err(|e| CoreError::ProcessingFailed(format!("failed to open docx: {e}")))?;
        let docx = docx_file
            .parse()
            .map_err(|e| CoreError::ProcessingFailed(format!("failed to parse docx: {e}")))?;

        let mut paragraphs = Vec::new();
        for content in &docx.document.body.content {
            if let BodyContent::Paragraph(paragraph) = content {
                let style = paragraph.property.as_ref().and_then(|p| p.style.as_ref()).map(|s| s.value.to_string());
                let mut text = String::new();
                for run in &paragraph.content {
                    if let ParagraphContent::Run(run) = run {
                        for piece in &run.content {
                            if let RunContent::Text(t) = piece {
                                text.push_str(&t.text);
                            }
                        }
                    }
                }
                paragraphs.push((text, style));
            }
        }
        Ok(paragraphs)
    }

    fn split_hypertext(&self, html: &str) -> Vec<ContentChunk> {
        let document = scraper::Html::parse_document(html);
        let selector = scraper::Selector::parse("h1, h2, h3, h4, h5, h6, p").unwrap();

        let mut chunks = Vec::new();
        for element in document.select(&selector) {
            let text: String = element.text().collect::<Vec<_>>().join(" ").trim().to_string();
            if text.is_empty() {
                continue;
            }
            let tag = element.value().name();
            let chunk = if let Some(level) = tag.strip_prefix('h').and_then(|n| n.parse::<i64>().ok()) {
                ContentChunk::new(ChunkType::Heading, text, chunks.len()).with_metadata("level", level)
            } else {
                ContentChunk::new(ChunkType::Paragraph, text, chunks.len())
            };
            chunks.push(chunk);
        }
        chunks
    }
}

#[async_trait]
impl SourceProcessor for TextProcessor {
    async fn process(&self, source: &RawSource, _router: Option<&ModelRouter>) -> Result<SourceDocument> {
        source.require_matching_type(SourceType::Text)?;

        let extension = source.extension.as_deref().unwrap_or("");
        let chunks = match extension {
            "md" | "markdown" => {
                let content = String::from_utf8_lossy(source.text_bytes()?).to_string();
                self.split_markdown(&content)
            }
            "docx" => {
                let path = source.file_path.as_deref().ok_or_else(|| {
                    CoreError::InvalidRequest("docx ingestion requires a file path, not in-memory bytes".to_string())
                })?;
                let paragraphs = Self::read_structured_doc(path)?;
                self.split_structured_doc(&paragraphs)
            }
            "html" | "htm" => {
                let content = String::from_utf8_lossy(source.text_bytes()?).to_string();
                self.split_hypertext(&content)
            }
            "txt" => {
                let content = String::from_utf8_lossy(source.text_bytes()?).to_string();
                if content.trim().is_empty() {
                    Vec::new()
                } else {
                    vec![ContentChunk::new(ChunkType::Paragraph, content.trim(), 0)]
                }
            }
            other => {
                return Err(CoreError::UnsupportedFormat(format!("text processor cannot handle '.{other}'")))
            }
        };

        Ok(SourceDocument {
            source_type: SourceType::Text,
            source_url: source.source_url.clone(),
            title: None,
            chunks,
            processed_at: Utc::now(),
            metadata: Map::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(content: &str, extension: &str) -> RawSource {
        RawSource {
            source_type: SourceType::Text,
            source_url: None,
            file_path: None,
            bytes: Some(content.as_bytes().to_vec()),
            extension: Some(extension.to_string()),
        }
    }

    #[tokio::test]
    async fn markdown_splits_on_headings() {
        let processor = TextProcessor::default();
        let doc = processor
            .process(&source("# Intro\nhello\n## Details\nworld", "md"), None)
            .await
            .unwrap();

        let headings: Vec<_> = doc
            .chunks
            .iter()
            .filter(|c| matches!(c.chunk_type, ChunkType::Heading))
            .collect();
        assert_eq!(headings.len(), 2);
        assert_eq!(headings[0].text, "Intro");
        assert_eq!(headings[1].text, "Details");
    }

    #[tokio::test]
    async fn plain_text_is_a_single_paragraph() {
        let processor = TextProcessor::default();
        let doc = processor.process(&source("just some text", "txt"), None).await.unwrap();
        assert_eq!(doc.chunks.len(), 1);
        assert!(matches!(doc.chunks[0].chunk_type, ChunkType::Paragraph));
    }

    #[tokio::test]
    async fn empty_content_yields_no_chunks() {
        let processor = TextProcessor::default();
        let doc = processor.process(&source("   ", "txt"), None).await.unwrap();
        assert!(doc.chunks.is_empty());
    }

    #[tokio::test]
    async fn unknown_extension_is_unsupported_format() {
        let processor = TextProcessor::default();
        let err = processor.process(&source("x", "rtf"), None).await.unwrap_err();
        assert!(matches!(err, CoreError::UnsupportedFormat(_)));
    }

    #[tokio::test]
    async fn hypertext_walks_headings_and_paragraphs() {
        let processor = TextProcessor::default();
        let html = "<html><body><h1>Title</h1><p>Body text</p></body></html>";
        let doc = processor.process(&source(html, "html"), None).await.unwrap();
        assert_eq!(doc.chunks.len(), 2);
        assert!(matches!(doc.chunks[0].chunk_type, ChunkType::Heading));
        assert!(matches!(doc.chunks[1].chunk_type, ChunkType::Paragraph));
    }
}
