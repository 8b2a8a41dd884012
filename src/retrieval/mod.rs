//! Hybrid context retrieval
//!
//! Combines embedding similarity with keyword overlap, applies caller
//! filters, and assembles a prompt-ready context with document citations.

mod context;
mod filters;
mod fusion;
mod hybrid;
mod keywords;
mod sources;
mod summary;

pub use context::{RankedChunk, RetrievedContext, SearchMetrics, CONTEXT_SEPARATOR};
pub use filters::{DateRange, FilterError, ResolvedFilters, SearchFilters};
pub use fusion::{
    fuse, hybrid_score, keyword_score, rank, vector_score, FusedChunk, FusionResult, SearchStrategy,
    SearchType,
};
pub use hybrid::{
    Degradation, HybridRetriever, RetrievalFailure, RetrievalOutcome, RetrievalStatus,
};
pub use keywords::{jaccard_similarity, KeywordExtractor, TextNormalizer, STOP_WORDS};
pub use sources::{
    assemble_sources, distinct_document_ids, Source, UNKNOWN_DOCUMENT_TITLE, UNKNOWN_FILE_TYPE,
};
pub use summary::format_summary;
