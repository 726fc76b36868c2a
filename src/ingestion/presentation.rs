//! Presentation processor (§4.5): PDF (page-wise text) and PPTX (per-slide
//! text), both 1-based in `metadata.slide_number`. When a router is supplied,
//! an optional visual-analysis call may add a `slide_description` chunk
//! alongside the text chunk; a vision failure never takes the text chunk
//! down with it.

use super::{ChunkType, ContentChunk, RawSource, SourceDocument, SourceProcessor, SourceType};
use crate::error::{CoreError, Result};
use crate::router::ModelRouter;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Map;
use tracing::warn;

pub struct PresentationProcessor;

impl PresentationProcessor {
    fn read_pdf_pages(path: &std::path::Path) -> Result<Vec<String>> {
        pdf_extract::extract_text_by_pages(path)
            .map_err(|e| CoreError::ProcessingFailed(format!("failed to extract pdf text: {e}")))
    }

    fn read_pptx_slides(path: &std::path::Path) -> Result<Vec<String>> {
        pptx_to_md::extract_slide_text(path)
            .map_err(|e| CoreError::ProcessingFailed(format!("failed to extract pptx text: {e}")))
    }

    async fn describe_slide(router: &ModelRouter, slide_text: &str, slide_number: usize) -> Option<String> {
        let prompt = format!(
            "Describe the key visual elements of presentation slide {slide_number}, whose extracted text is:\n{slide_text}"
        );
        match router.complete("presentation_summary", &prompt, None, 0.0, 512, "default").await {
            Ok(response) => Some(response.content),
            Err(e) => {
                warn!(slide_number, error = %e, "slide vision description failed, keeping text chunk only");
                None
            }
        }
    }
}

#[async_trait]
impl SourceProcessor for PresentationProcessor {
    async fn process(&self, source: &RawSource, router: Option<&ModelRouter>) -> Result<SourceDocument> {
        source.require_matching_type(SourceType::Presentation)?;

        let path = source
            .file_path
            .as_deref()
            .ok_or_else(|| CoreError::InvalidRequest("presentation ingestion requires a file path".to_string()))?;
        let extension = source.extension.as_deref().unwrap_or("");

        let slides: Vec<String> = match extension {
            "pdf" => Self::read_pdf_pages(path)?,
            "pptx" => Self::read_pptx_slides(path)?,
            other => {
                return Err(CoreError::UnsupportedFormat(format!(
                    "presentation processor cannot handle '.{other}'"
                )))
            }
        };

        let mut chunks = Vec::new();
        for (zero_based, text) in slides.into_iter().enumerate() {
            let slide_number = zero_based + 1;
            let trimmed = text.trim();
            if trimmed.is_empty() {
                continue;
            }

            chunks.push(
                ContentChunk::new(ChunkType::SlideText, trimmed, chunks.len())
                    .with_metadata("slide_number", slide_number as i64),
            );

            if let Some(router) = router {
                if let Some(description) = Self::describe_slide(router, trimmed, slide_number).await {
                    chunks.push(
                        ContentChunk::new(ChunkType::SlideDescription, description, chunks.len())
                            .with_metadata("slide_number", slide_number as i64),
                    );
                }
            }
        }

        Ok(SourceDocument {
            source_type: SourceType::Presentation,
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

    #[test]
    fn empty_trailing_slide_is_dropped() {
        // A presentation deck frequently ends with a blank slide; the
        // numbering of retained slides should still reflect their original
        // 1-based position among all slides, not the retained count.
        let slides = vec!["Slide one".to_string(), "   ".to_string(), "Slide three".to_string()];
        let mut chunks = Vec::new();
        for (zero_based, text) in slides.into_iter().enumerate() {
            let slide_number = zero_based + 1;
            let trimmed = text.trim().to_string();
            if trimmed.is_empty() {
                continue;
            }
            chunks.push(
                ContentChunk::new(ChunkType::SlideText, trimmed, chunks.len())
                    .with_metadata("slide_number", slide_number as i64),
            );
        }
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].metadata.get("slide_number").unwrap(), 3);
    }
}
