//! Document-level citations for retrieved chunks

use crate::retrieval::fusion::FusedChunk;
use crate::storage::Document;
use ahash::{AHashMap, AHashSet};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Title given to chunks whose document cannot be resolved
pub const UNKNOWN_DOCUMENT_TITLE: &str = "Unknown Document";

/// File type given to chunks whose document cannot be resolved
pub const UNKNOWN_FILE_TYPE: &str = "unknown";

/// One cited document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    pub document_id: String,
    pub title: String,
    pub file_type: String,
    pub upload_date: Option<DateTime<Utc>>,
    /// Best score among the document's surviving chunks
    pub similarity: f32,
}

impl Source {
    fn unresolved(document_id: &str, similarity: f32) -> Self {
        Self {
            document_id: document_id.to_string(),
            title: UNKNOWN_DOCUMENT_TITLE.to_string(),
            file_type: UNKNOWN_FILE_TYPE.to_string(),
            upload_date: None,
            similarity,
        }
    }
}

/// Distinct document ids in first-seen order
pub fn distinct_document_ids(chunks: &[FusedChunk]) -> Vec<String> {
    let mut seen: AHashSet<&str> = AHashSet::new();
    chunks
        .iter()
        .filter(|chunk| seen.insert(chunk.document_id.as_str()))
        .map(|chunk| chunk.document_id.clone())
        .collect()
}

/// One source per distinct document, keeping the first occurrence's score
///
/// `chunks` must already be ranked, so the first occurrence is the best.
pub fn assemble_sources(
    chunks: &[FusedChunk],
    documents: &AHashMap<String, Document>,
) -> Vec<Source> {
    let mut seen: AHashSet<&str> = AHashSet::new();

    chunks
        .iter()
        .filter(|chunk| seen.insert(chunk.document_id.as_str()))
        .map(|chunk| match documents.get(&chunk.document_id) {
            Some(doc) => Source {
                document_id: chunk.document_id.clone(),
                title: doc.title.clone(),
                file_type: doc.file_type.clone(),
                upload_date: doc.upload_date,
                similarity: chunk.combined_score,
            },
            None => Source::unresolved(&chunk.document_id, chunk.combined_score),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::fusion::SearchType;

    fn chunk(id: &str, doc: &str, score: f32) -> FusedChunk {
        FusedChunk {
            id: id.to_string(),
            document_id: doc.to_string(),
            text: id.to_string(),
            chunk_index: 0,
            created_at: Utc::now(),
            similarity: score,
            keyword_similarity: None,
            combined_score: score,
            search_type: SearchType::Vector,
        }
    }

    #[test]
    fn test_deduplication_keeps_first_score() {
        let mut documents = AHashMap::new();
        documents.insert(
            "d1".to_string(),
            Document {
                id: "d1".to_string(),
                title: "Returns".to_string(),
                file_type: "pdf".to_string(),
                upload_date: None,
            },
        );

        let chunks = vec![chunk("a", "d1", 0.9), chunk("b", "d2", 0.8), chunk("c", "d1", 0.7)];
        let sources = assemble_sources(&chunks, &documents);

        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].document_id, "d1");
        assert_eq!(sources[0].title, "Returns");
        assert_eq!(sources[0].similarity, 0.9);
        assert_eq!(sources[1].title, UNKNOWN_DOCUMENT_TITLE);
        assert_eq!(sources[1].file_type, UNKNOWN_FILE_TYPE);
        assert!(sources[1].upload_date.is_none());
    }

    #[test]
    fn test_distinct_document_ids() {
        let chunks = vec![chunk("a", "d2", 0.9), chunk("b", "d1", 0.8), chunk("c", "d2", 0.7)];
        assert_eq!(distinct_document_ids(&chunks), vec!["d2", "d1"]);
        assert!(distinct_document_ids(&[]).is_empty());
    }
}
