//! Storage layer: the corpus collaborators consumed by the retriever
//!
//! The retriever only sees the three traits below. `SqliteStore` is the
//! persistent backend; `MemoryStore` keeps everything in process.

pub mod database;
pub mod memory;
pub mod vector_index;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use database::{DbPool, DbStats, SqliteStore};
pub use memory::MemoryStore;
pub use vector_index::{IndexHit, VectorIndex, VectorIndexError};

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Search backend error ({backend}): {message}")]
    Backend { backend: String, message: String },

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Background task failed: {0}")]
    Task(String),

    #[error("Vector index error: {0}")]
    Index(#[from] VectorIndexError),
}

/// Document metadata owning a set of chunks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub title: String,
    pub file_type: String,
    pub upload_date: Option<DateTime<Utc>>,
}

/// Document to be inserted into a store
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub agent_id: String,
    pub title: String,
    pub file_type: String,
    pub upload_date: Option<DateTime<Utc>>,
}

/// Chunk to be inserted into a store
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub document_id: String,
    pub text: String,
    pub chunk_index: i64,
    /// Chunks without an embedding are only reachable by keyword search
    pub embedding: Option<Vec<f32>>,
}

/// Chunk content written together with its document
#[derive(Debug, Clone)]
pub struct ChunkContent {
    pub text: String,
    pub chunk_index: i64,
    pub embedding: Option<Vec<f32>>,
}

/// A chunk returned by vector search
#[derive(Debug, Clone, PartialEq)]
pub struct VectorMatch {
    pub id: String,
    pub document_id: String,
    pub chunk_text: String,
    pub chunk_index: i64,
    pub created_at: DateTime<Utc>,
    pub similarity: f32,
}

/// A chunk returned by keyword search, with its document metadata joined in
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordMatch {
    pub id: String,
    pub document_id: String,
    pub chunk_text: String,
    pub chunk_index: i64,
    pub created_at: DateTime<Utc>,
    pub document_title: Option<String>,
    pub document_file_type: Option<String>,
    pub document_upload_date: Option<DateTime<Utc>>,
}

impl KeywordMatch {
    /// Document metadata carried by the match, when the backend joined it
    pub fn document(&self) -> Option<Document> {
        Some(Document {
            id: self.document_id.clone(),
            title: self.document_title.clone()?,
            file_type: self.document_file_type.clone()?,
            upload_date: self.document_upload_date,
        })
    }
}

/// Keyword terms combined with OR semantics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordQuery {
    terms: Vec<String>,
}

impl KeywordQuery {
    pub fn new(terms: Vec<String>) -> Self {
        Self { terms }
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Render the terms joined by a backend-specific OR operator (e.g. `|`, `OR`)
    pub fn or_expression(&self, operator: &str) -> String {
        self.terms.join(&format!(" {} ", operator))
    }
}

/// Nearest-neighbour lookup over chunk embeddings, scoped to one agent
#[async_trait]
pub trait VectorSearch: Send + Sync {
    async fn vector_search(
        &self,
        agent_id: &str,
        vector: &[f32],
        similarity_threshold: f32,
        limit: usize,
    ) -> Result<Vec<VectorMatch>, SearchError>;
}

/// Full-text lookup over chunk text, scoped to one agent
#[async_trait]
pub trait KeywordSearch: Send + Sync {
    async fn keyword_search(
        &self,
        agent_id: &str,
        query: &KeywordQuery,
        limit: usize,
    ) -> Result<Vec<KeywordMatch>, SearchError>;
}

/// Document metadata lookups
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch documents by id; unknown ids are silently absent from the result
    async fn get_documents(&self, ids: &[String]) -> Result<Vec<Document>, SearchError>;

    /// Most recently uploaded documents for an agent, newest first
    async fn recent_documents(
        &self,
        agent_id: &str,
        limit: usize,
    ) -> Result<Vec<Document>, SearchError>;
}
