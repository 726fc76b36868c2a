//! Merge Step (§4.6) — pure, synchronous, copy-on-update composition of
//! ingested documents into a single `CourseContext` handed to the architect.

use crate::error::{CoreError, Result};
use crate::ingestion::{ChunkType, SourceDocument, SourceType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlideVideoMapEntry {
    pub slide_number: i64,
    pub video_timecode: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseContext {
    pub documents: Vec<SourceDocument>,
    pub slide_video_mappings: Vec<SlideVideoMapEntry>,
    pub created_at: DateTime<Utc>,
}

fn source_type_priority(source_type: SourceType) -> u8 {
    match source_type {
        SourceType::Video => 0,
        SourceType::Presentation => 1,
        SourceType::Text => 2,
        SourceType::Web => 3,
    }
}

pub struct MergeStep;

impl MergeStep {
    pub fn merge(documents: Vec<SourceDocument>, mappings: Vec<SlideVideoMapEntry>) -> Result<CourseContext> {
        if documents.is_empty() {
            return Err(CoreError::InvalidRequest("cannot merge an empty document list".to_string()));
        }

        let mut sorted = documents;
        sorted.sort_by_key(|doc| source_type_priority(doc.source_type));

        if !mappings.is_empty() {
            let lookup: std::collections::HashMap<i64, &str> =
                mappings.iter().map(|entry| (entry.slide_number, entry.video_timecode.as_str())).collect();

            for document in &mut sorted {
                if document.source_type != SourceType::Presentation {
                    continue;
                }
                for chunk in &mut document.chunks {
                    if chunk.chunk_type != ChunkType::SlideText {
                        continue;
                    }
                    let Some(slide_number) = chunk.metadata.get("slide_number").and_then(|v| v.as_i64()) else {
                        continue;
                    };
                    if let Some(timecode) = lookup.get(&slide_number) {
                        chunk.metadata.insert("video_timecode".to_string(), (*timecode).into());
                    }
                }
            }
        }

        Ok(CourseContext { documents: sorted, slide_video_mappings: mappings, created_at: Utc::now() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::ContentChunk;
    use serde_json::Map;

    fn doc(source_type: SourceType, chunks: Vec<ContentChunk>) -> SourceDocument {
        SourceDocument { source_type, source_url: None, title: None, chunks, processed_at: Utc::now(), metadata: Map::new() }
    }

    #[test]
    fn rejects_empty_document_list() {
        let err = MergeStep::merge(vec![], vec![]).unwrap_err();
        assert!(matches!(err, CoreError::InvalidRequest(_)));
    }

    #[test]
    fn sorts_by_source_type_priority() {
        let documents = vec![
            doc(SourceType::Web, vec![]),
            doc(SourceType::Video, vec![]),
            doc(SourceType::Text, vec![]),
            doc(SourceType::Presentation, vec![]),
        ];
        let context = MergeStep::merge(documents, vec![]).unwrap();
        let order: Vec<_> = context.documents.iter().map(|d| d.source_type).collect();
        assert_eq!(order, vec![SourceType::Video, SourceType::Presentation, SourceType::Text, SourceType::Web]);
    }

    #[test]
    fn cross_references_matching_slide_with_video_timecode() {
        let slide = ContentChunk::new(ChunkType::SlideText, "Overview", 0).with_metadata("slide_number", 3i64);
        let documents = vec![doc(SourceType::Presentation, vec![slide])];
        let mappings = vec![SlideVideoMapEntry { slide_number: 3, video_timecode: "00:04:10".to_string() }];

        let context = MergeStep::merge(documents, mappings).unwrap();
        let chunk = &context.documents[0].chunks[0];
        assert_eq!(chunk.metadata.get("video_timecode").unwrap(), "00:04:10");
    }

    #[test]
    fn non_matching_slide_is_untouched() {
        let slide = ContentChunk::new(ChunkType::SlideText, "Overview", 0).with_metadata("slide_number", 5i64);
        let documents = vec![doc(SourceType::Presentation, vec![slide])];
        let mappings = vec![SlideVideoMapEntry { slide_number: 3, video_timecode: "00:04:10".to_string() }];

        let context = MergeStep::merge(documents, mappings).unwrap();
        assert!(context.documents[0].chunks[0].metadata.get("video_timecode").is_none());
    }

    #[test]
    fn merge_does_not_mutate_inputs() {
        let slide = ContentChunk::new(ChunkType::SlideText, "Overview", 0).with_metadata("slide_number", 3i64);
        let documents = vec![doc(SourceType::Presentation, vec![slide.clone()])];
        let original = documents.clone();
        let mappings = vec![SlideVideoMapEntry { slide_number: 3, video_timecode: "00:04:10".to_string() }];

        let _context = MergeStep::merge(documents.clone(), mappings).unwrap();
        assert!(original[0].chunks[0].metadata.get("video_timecode").is_none());
    }
}
