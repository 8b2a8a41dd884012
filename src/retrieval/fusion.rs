//! Weighted fusion of vector and keyword hits

use crate::config::ScoringWeights;
use crate::retrieval::keywords::{jaccard_similarity, KeywordExtractor};
use crate::storage::{KeywordMatch, VectorMatch};
use ahash::AHashMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Which channel(s) surfaced a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchType {
    Vector,
    Keyword,
    Hybrid,
}

/// Which channels contributed results to a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchStrategy {
    Vector,
    Keyword,
    Hybrid,
}

impl SearchStrategy {
    fn from_counts(vector_hits: usize, keyword_hits: usize) -> Self {
        match (vector_hits > 0, keyword_hits > 0) {
            (true, true) => SearchStrategy::Hybrid,
            (true, false) => SearchStrategy::Vector,
            _ => SearchStrategy::Keyword,
        }
    }
}

/// A chunk after fusion, carrying both its raw and combined scores
#[derive(Debug, Clone, PartialEq)]
pub struct FusedChunk {
    pub id: String,
    pub document_id: String,
    pub text: String,
    pub chunk_index: i64,
    pub created_at: DateTime<Utc>,
    /// Similarity from the channel that first found the chunk
    pub similarity: f32,
    pub keyword_similarity: Option<f32>,
    pub combined_score: f32,
    pub search_type: SearchType,
}

/// Fused and ranked candidates for one query
#[derive(Debug, Clone)]
pub struct FusionResult {
    pub chunks: Vec<FusedChunk>,
    pub strategy: SearchStrategy,
}

/// Score for a chunk found only by vector search
pub fn vector_score(similarity: f32, weights: &ScoringWeights) -> f32 {
    similarity * weights.vector_weight + weights.vector_floor
}

/// Score for a chunk found only by keyword search
pub fn keyword_score(keyword_similarity: f32, weights: &ScoringWeights) -> f32 {
    keyword_similarity * weights.keyword_only_weight
}

/// Score for a chunk confirmed by both channels
///
/// Never lower than what either channel alone would give.
pub fn hybrid_score(
    existing_score: f32,
    vector_similarity: f32,
    keyword_similarity: f32,
    weights: &ScoringWeights,
) -> f32 {
    let blended = vector_similarity * weights.hybrid_vector_weight
        + keyword_similarity * weights.hybrid_keyword_weight;
    existing_score
        .max(blended)
        .max(keyword_score(keyword_similarity, weights))
}

/// Merge vector and keyword hits into one list ranked by combined score
///
/// Keyword similarity is the Jaccard index between the query keywords and
/// each hit's own keyword set. Ties keep discovery order: vector hits in
/// backend order, then keyword-only hits.
pub fn fuse(
    vector_hits: Vec<VectorMatch>,
    keyword_hits: Vec<KeywordMatch>,
    query_keywords: &HashSet<String>,
    extractor: &KeywordExtractor,
    weights: &ScoringWeights,
) -> FusionResult {
    let strategy = SearchStrategy::from_counts(vector_hits.len(), keyword_hits.len());

    let mut chunks: Vec<FusedChunk> = Vec::with_capacity(vector_hits.len() + keyword_hits.len());
    let mut index: AHashMap<String, usize> = AHashMap::new();

    for hit in vector_hits {
        if index.contains_key(&hit.id) {
            continue;
        }
        index.insert(hit.id.clone(), chunks.len());
        chunks.push(FusedChunk {
            combined_score: vector_score(hit.similarity, weights),
            id: hit.id,
            document_id: hit.document_id,
            text: hit.chunk_text,
            chunk_index: hit.chunk_index,
            created_at: hit.created_at,
            similarity: hit.similarity,
            keyword_similarity: None,
            search_type: SearchType::Vector,
        });
    }

    for hit in keyword_hits {
        let chunk_keywords = extractor.keyword_set(&hit.chunk_text);
        let keyword_similarity = jaccard_similarity(query_keywords, &chunk_keywords);

        match index.get(&hit.id) {
            Some(&position) => {
                let existing = &mut chunks[position];
                existing.combined_score = match existing.search_type {
                    SearchType::Keyword => existing
                        .combined_score
                        .max(keyword_score(keyword_similarity, weights)),
                    _ => hybrid_score(
                        existing.combined_score,
                        existing.similarity,
                        keyword_similarity,
                        weights,
                    ),
                };
                if existing.search_type == SearchType::Vector {
                    existing.search_type = SearchType::Hybrid;
                }
                existing.keyword_similarity = Some(
                    existing
                        .keyword_similarity
                        .map_or(keyword_similarity, |k| k.max(keyword_similarity)),
                );
            }
            None => {
                index.insert(hit.id.clone(), chunks.len());
                chunks.push(FusedChunk {
                    combined_score: keyword_score(keyword_similarity, weights),
                    id: hit.id,
                    document_id: hit.document_id,
                    text: hit.chunk_text,
                    chunk_index: hit.chunk_index,
                    created_at: hit.created_at,
                    similarity: keyword_similarity,
                    keyword_similarity: Some(keyword_similarity),
                    search_type: SearchType::Keyword,
                });
            }
        }
    }

    rank(&mut chunks);

    FusionResult { chunks, strategy }
}

/// Stable sort by combined score descending
pub fn rank(chunks: &mut [FusedChunk]) {
    chunks.sort_by(|a, b| {
        b.combined_score
            .partial_cmp(&a.combined_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}
