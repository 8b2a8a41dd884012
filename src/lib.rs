//! Hybrid Context - retrieval-augmented context for chat agents
//!
//! Given an agent's knowledge base and a user query, retrieves the most
//! relevant document chunks by combining embedding similarity with keyword
//! overlap, and assembles a prompt-ready context with per-document citations.

pub mod config;
pub mod embedding;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod retrieval;
pub mod storage;

pub use error::{ContextError, Result};
pub use ingest::{IngestReport, Ingestor};
pub use retrieval::{
    HybridRetriever, RetrievalOutcome, RetrievalStatus, RetrievedContext, SearchFilters, Source,
};
