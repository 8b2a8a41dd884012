//! Query-scoped filters applied after ranking

use crate::config::RetrievalConfig;
use crate::retrieval::fusion::FusedChunk;
use crate::storage::Document;
use ahash::AHashMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FilterError {
    #[error("min_similarity must be between 0.0 and 1.0, got {0}")]
    MinSimilarityOutOfRange(f32),

    #[error("max_results must be greater than 0")]
    ZeroMaxResults,

    #[error("date range start {start} is after end {end}")]
    InvertedDateRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

/// Inclusive window on a document's upload date
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, date: DateTime<Utc>) -> bool {
        date >= self.start && date <= self.end
    }
}

/// Caller-supplied filters; unset fields fall back to configured defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchFilters {
    pub document_types: Option<Vec<String>>,
    pub date_range: Option<DateRange>,
    pub min_similarity: Option<f32>,
    pub max_results: Option<usize>,
}

impl SearchFilters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.document_types = Some(types.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_date_range(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.date_range = Some(DateRange::new(start, end));
        self
    }

    pub fn with_min_similarity(mut self, min_similarity: f32) -> Self {
        self.min_similarity = Some(min_similarity);
        self
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = Some(max_results);
        self
    }

    /// Fill unset fields from configuration and validate the result
    pub fn resolve(&self, config: &RetrievalConfig) -> Result<ResolvedFilters, FilterError> {
        let min_similarity = self
            .min_similarity
            .unwrap_or(config.default_min_similarity);
        let max_results = self.max_results.unwrap_or(config.default_max_results);

        if !(0.0..=1.0).contains(&min_similarity) {
            return Err(FilterError::MinSimilarityOutOfRange(min_similarity));
        }

        if max_results == 0 {
            return Err(FilterError::ZeroMaxResults);
        }

        if let Some(range) = &self.date_range {
            if range.start > range.end {
                return Err(FilterError::InvertedDateRange {
                    start: range.start,
                    end: range.end,
                });
            }
        }

        let document_types = self
            .document_types
            .as_ref()
            .filter(|types| !types.is_empty())
            .map(|types| types.iter().map(|t| t.to_lowercase()).collect());

        Ok(ResolvedFilters {
            document_types,
            date_range: self.date_range,
            min_similarity,
            max_results,
        })
    }
}

/// Filters with every default applied
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedFilters {
    /// Lower-cased allow-list; `None` when no type filter is active
    pub document_types: Option<Vec<String>>,
    pub date_range: Option<DateRange>,
    pub min_similarity: f32,
    pub max_results: usize,
}

impl ResolvedFilters {
    /// Whether filtering needs document metadata for every candidate
    pub fn needs_documents(&self) -> bool {
        self.document_types.is_some() || self.date_range.is_some()
    }

    /// Apply type, date, similarity-floor and size filters, in that order
    ///
    /// Chunks whose document cannot be resolved fail any active type or date
    /// filter.
    pub fn apply(
        &self,
        chunks: Vec<FusedChunk>,
        documents: &AHashMap<String, Document>,
    ) -> Vec<FusedChunk> {
        chunks
            .into_iter()
            .filter(|chunk| match &self.document_types {
                Some(types) => documents
                    .get(&chunk.document_id)
                    .map(|doc| types.contains(&doc.file_type.to_lowercase()))
                    .unwrap_or(false),
                None => true,
            })
            .filter(|chunk| match &self.date_range {
                Some(range) => documents
                    .get(&chunk.document_id)
                    .and_then(|doc| doc.upload_date)
                    .map(|date| range.contains(date))
                    .unwrap_or(false),
                None => true,
            })
            .filter(|chunk| chunk.combined_score >= self.min_similarity)
            .take(self.max_results)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::fusion::SearchType;
    use chrono::TimeZone;

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

    fn documents() -> AHashMap<String, Document> {
        let mut docs = AHashMap::new();
        docs.insert(
            "pdf".to_string(),
            Document {
                id: "pdf".to_string(),
                title: "Manual".to_string(),
                file_type: "PDF".to_string(),
                upload_date: Some(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()),
            },
        );
        docs.insert(
            "docx".to_string(),
            Document {
                id: "docx".to_string(),
                title: "Notes".to_string(),
                file_type: "docx".to_string(),
                upload_date: None,
            },
        );
        docs
    }

    fn resolve(filters: SearchFilters) -> ResolvedFilters {
        filters.resolve(&RetrievalConfig::default()).unwrap()
    }

    #[test]
    fn test_defaults() {
        let resolved = resolve(SearchFilters::new());
        assert_eq!(resolved.min_similarity, 0.7);
        assert_eq!(resolved.max_results, 5);
        assert!(!resolved.needs_documents());
    }

    #[test]
    fn test_empty_type_list_is_inactive() {
        let resolved = resolve(SearchFilters::new().with_document_types(Vec::<String>::new()));
        assert!(resolved.document_types.is_none());
    }

    #[test]
    fn test_invalid_filters() {
        let config = RetrievalConfig::default();
        assert_eq!(
            SearchFilters::new().with_max_results(0).resolve(&config),
            Err(FilterError::ZeroMaxResults)
        );
        assert!(matches!(
            SearchFilters::new().with_min_similarity(1.2).resolve(&config),
            Err(FilterError::MinSimilarityOutOfRange(_))
        ));

        let start = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert!(matches!(
            SearchFilters::new().with_date_range(start, end).resolve(&config),
            Err(FilterError::InvertedDateRange { .. })
        ));
    }

    #[test]
    fn test_document_type_filter_case_insensitive() {
        let resolved = resolve(
            SearchFilters::new()
                .with_document_types(["pdf"])
                .with_min_similarity(0.0),
        );
        let kept = resolved.apply(
            vec![chunk("a", "pdf", 0.9), chunk("b", "docx", 0.95), chunk("c", "missing", 0.9)],
            &documents(),
        );
        let ids: Vec<_> = kept.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a"]);
    }

    #[test]
    fn test_date_range_inclusive_and_undated_dropped() {
        let day = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let resolved = resolve(
            SearchFilters::new()
                .with_date_range(day, day)
                .with_min_similarity(0.0),
        );
        let kept = resolved.apply(
            vec![chunk("a", "pdf", 0.9), chunk("b", "docx", 0.9)],
            &documents(),
        );
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, "a");
    }

    #[test]
    fn test_floor_then_truncate() {
        let resolved = resolve(
            SearchFilters::new()
                .with_min_similarity(0.5)
                .with_max_results(2),
        );
        let kept = resolved.apply(
            vec![
                chunk("a", "pdf", 0.9),
                chunk("b", "pdf", 0.4),
                chunk("c", "pdf", 0.8),
                chunk("d", "pdf", 0.7),
            ],
            &AHashMap::new(),
        );
        let ids: Vec<_> = kept.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }
}
