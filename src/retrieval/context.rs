//! Retrieval output handed to the chat caller

use crate::retrieval::fusion::{FusedChunk, SearchType};
use crate::retrieval::sources::Source;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Separator between chunk texts in the prompt context
pub const CONTEXT_SEPARATOR: &str = "\n\n";

/// A surviving chunk with its scores, in final rank order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedChunk {
    pub chunk_id: String,
    pub document_id: String,
    pub text: String,
    pub chunk_index: i64,
    pub created_at: DateTime<Utc>,
    pub similarity: f32,
    pub combined_score: f32,
    pub search_type: SearchType,
}

impl From<FusedChunk> for RankedChunk {
    fn from(chunk: FusedChunk) -> Self {
        Self {
            chunk_id: chunk.id,
            document_id: chunk.document_id,
            text: chunk.text,
            chunk_index: chunk.chunk_index,
            created_at: chunk.created_at,
            similarity: chunk.similarity,
            combined_score: chunk.combined_score,
            search_type: chunk.search_type,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchMetrics {
    pub total_chunks: usize,
    pub average_similarity: f32,
    /// Wall-clock milliseconds from call start to assembly
    pub search_time_ms: u64,
}

/// Context window plus citations for one query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievedContext {
    pub relevant_chunks: Vec<RankedChunk>,
    pub context_text: String,
    pub sources: Vec<Source>,
    pub search_metrics: SearchMetrics,
}

impl RetrievedContext {
    /// Build the context from ranked, filtered chunks
    pub fn assemble(chunks: Vec<FusedChunk>, sources: Vec<Source>, search_time_ms: u64) -> Self {
        let relevant_chunks: Vec<RankedChunk> = chunks.into_iter().map(RankedChunk::from).collect();

        let context_text = relevant_chunks
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join(CONTEXT_SEPARATOR);

        let total_chunks = relevant_chunks.len();
        let average_similarity = if total_chunks == 0 {
            0.0
        } else {
            relevant_chunks.iter().map(|c| c.combined_score).sum::<f32>() / total_chunks as f32
        };

        Self {
            relevant_chunks,
            context_text,
            sources,
            search_metrics: SearchMetrics {
                total_chunks,
                average_similarity,
                search_time_ms,
            },
        }
    }

    /// Empty context carrying only the elapsed time
    pub fn empty(search_time_ms: u64) -> Self {
        Self {
            search_metrics: SearchMetrics {
                search_time_ms,
                ..SearchMetrics::default()
            },
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.relevant_chunks.is_empty()
    }

    /// Chunk texts in rank order
    pub fn chunk_texts(&self) -> Vec<&str> {
        self.relevant_chunks.iter().map(|c| c.text.as_str()).collect()
    }
}
