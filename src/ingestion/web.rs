//! Web processor (§4.5): fetch HTML, extract main content, chunk by
//! paragraph breaks. Fetch failure is a processing error; empty extraction is
//! not an error.

use super::{ChunkType, ContentChunk, RawSource, SourceDocument, SourceProcessor, SourceType};
use crate::error::{CoreError, Result};
use crate::router::ModelRouter;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Map;
use url::Url;

pub struct WebProcessor {
    http: reqwest::Client,
}

impl Default for WebProcessor {
    fn default() -> Self {
        Self { http: reqwest::Client::new() }
    }
}

impl WebProcessor {
    /// Pulls paragraph-ish text out of the main content areas, preferring
    /// `<article>`/`<main>` over the full `<body>` when present.
    fn extract_paragraphs(html: &str) -> Vec<String> {
        let document = scraper::Html::parse_document(html);

        let container_selector = scraper::Selector::parse("article, main").unwrap();
        let paragraph_selector = scraper::Selector::parse("p").unwrap();

        let root = document
            .select(&container_selector)
            .next()
            .map(|el| el.select(&paragraph_selector).collect::<Vec<_>>())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| document.select(&paragraph_selector).collect());

        root.into_iter()
            .filter_map(|el| {
                let text: String = el.text().collect::<Vec<_>>().join(" ").trim().to_string();
                (!text.is_empty()).then_some(text)
            })
            .collect()
    }
}

#[async_trait]
impl SourceProcessor for WebProcessor {
    async fn process(&self, source: &RawSource, _router: Option<&ModelRouter>) -> Result<SourceDocument> {
        source.require_matching_type(SourceType::Web)?;

        let url_str = source
            .source_url
            .clone()
            .ok_or_else(|| CoreError::InvalidRequest("web processor requires a source_url".to_string()))?;

        let html = self
            .http
            .get(&url_str)
            .send()
            .await
            .map_err(|e| CoreError::ProcessingFailed(format!("failed to fetch {url_str}: {e}")))?
            .error_for_status()
            .map_err(|e| CoreError::ProcessingFailed(format!("{url_str} returned an error status: {e}")))?
            .text()
            .await
            .map_err(|e| CoreError::ProcessingFailed(format!("failed to read body of {url_str}: {e}")))?;

        let paragraphs = Self::extract_paragraphs(&html);
        let chunks = paragraphs
            .into_iter()
            .enumerate()
            .map(|(index, text)| ContentChunk::new(ChunkType::WebContent, text, index))
            .collect();

        let domain = Url::parse(&url_str).ok().and_then(|u| u.host_str().map(|h| h.to_string()));

        let mut metadata = Map::new();
        metadata.insert("content_snapshot".to_string(), html.into());
        if let Some(domain) = domain {
            metadata.insert("domain".to_string(), domain.into());
        }

        Ok(SourceDocument {
            source_type: SourceType::Web,
            source_url: Some(url_str),
            title: None,
            chunks,
            processed_at: Utc::now(),
            metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_paragraphs_from_article() {
        let html = "<html><body><article><p>One</p><p>Two</p></article><p>Outside</p></body></html>";
        let paragraphs = WebProcessor::extract_paragraphs(html);
        assert_eq!(paragraphs, vec!["One".to_string(), "Two".to_string()]);
    }

    #[test]
    fn falls_back_to_all_paragraphs_without_a_container() {
        let html = "<html><body><p>Only</p></body></html>";
        let paragraphs = WebProcessor::extract_paragraphs(html);
        assert_eq!(paragraphs, vec!["Only".to_string()]);
    }

    #[test]
    fn empty_body_yields_no_paragraphs() {
        let html = "<html><body></body></html>";
        assert!(WebProcessor::extract_paragraphs(html).is_empty());
    }
}
