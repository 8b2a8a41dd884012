//! In-memory corpus using cosine similarity and term matching.
//!
//! Backed by maps behind a `tokio::sync::RwLock`. Suitable for tests and for
//! small corpora embedded directly in a chat service.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{
    Document, DocumentStore, KeywordMatch, KeywordQuery, KeywordSearch, NewChunk, NewDocument,
    SearchError, VectorMatch, VectorSearch,
};
use crate::embedding::{cosine_similarity, normalize_similarity};
use crate::error::Result as ContextResult;
use crate::retrieval::TextNormalizer;

#[derive(Debug, Clone)]
struct StoredDocument {
    agent_id: String,
    document: Document,
    seq: usize,
}

#[derive(Debug, Clone)]
struct StoredChunk {
    id: String,
    agent_id: String,
    document_id: String,
    text: String,
    chunk_index: i64,
    created_at: DateTime<Utc>,
    embedding: Option<Vec<f32>>,
    /// Normalized tokens matched against query keywords
    terms: HashSet<String>,
    seq: usize,
}

#[derive(Debug, Default)]
struct Corpus {
    documents: HashMap<String, StoredDocument>,
    chunks: HashMap<String, StoredChunk>,
    next_seq: usize,
}

impl Corpus {
    fn next_seq(&mut self) -> usize {
        self.next_seq += 1;
        self.next_seq
    }

    /// Chunks for an agent in insertion order
    fn agent_chunks(&self, agent_id: &str) -> Vec<&StoredChunk> {
        let mut chunks: Vec<&StoredChunk> = self
            .chunks
            .values()
            .filter(|c| c.agent_id == agent_id)
            .collect();
        chunks.sort_by_key(|c| c.seq);
        chunks
    }
}

/// In-memory implementation of every search collaborator
#[derive(Debug)]
pub struct MemoryStore {
    corpus: RwLock<Corpus>,
    normalizer: TextNormalizer,
}

impl MemoryStore {
    pub fn new() -> ContextResult<Self> {
        Ok(Self {
            corpus: RwLock::new(Corpus::default()),
            normalizer: TextNormalizer::new()?,
        })
    }

    /// Insert a document and return its stored metadata
    pub async fn add_document(&self, document: NewDocument) -> Document {
        let mut corpus = self.corpus.write().await;
        let stored = Document {
            id: uuid::Uuid::new_v4().to_string(),
            title: document.title,
            file_type: document.file_type,
            upload_date: document.upload_date,
        };
        let seq = corpus.next_seq();
        corpus.documents.insert(
            stored.id.clone(),
            StoredDocument {
                agent_id: document.agent_id,
                document: stored.clone(),
                seq,
            },
        );
        stored
    }

    /// Insert a chunk under an existing document and return its id
    pub async fn add_chunk(&self, chunk: NewChunk) -> Result<String, SearchError> {
        let mut corpus = self.corpus.write().await;
        let agent_id = corpus
            .documents
            .get(&chunk.document_id)
            .map(|d| d.agent_id.clone())
            .ok_or_else(|| SearchError::Backend {
                backend: "memory".to_string(),
                message: format!("document '{}' does not exist", chunk.document_id),
            })?;

        let id = uuid::Uuid::new_v4().to_string();
        let terms = self.normalizer.tokens(&chunk.text);
        let seq = corpus.next_seq();
        corpus.chunks.insert(
            id.clone(),
            StoredChunk {
                id: id.clone(),
                agent_id,
                document_id: chunk.document_id,
                text: chunk.text,
                chunk_index: chunk.chunk_index,
                created_at: Utc::now(),
                embedding: chunk.embedding,
                terms,
                seq,
            },
        );
        Ok(id)
    }
}

#[async_trait]
impl VectorSearch for MemoryStore {
    async fn vector_search(
        &self,
        agent_id: &str,
        vector: &[f32],
        similarity_threshold: f32,
        limit: usize,
    ) -> Result<Vec<VectorMatch>, SearchError> {
        let corpus = self.corpus.read().await;

        let mut matches: Vec<VectorMatch> = corpus
            .agent_chunks(agent_id)
            .into_iter()
            .filter_map(|chunk| {
                let embedding = chunk.embedding.as_ref()?;
                if embedding.len() != vector.len() {
                    return None;
                }
                let similarity = normalize_similarity(cosine_similarity(embedding, vector));
                (similarity >= similarity_threshold).then(|| VectorMatch {
                    id: chunk.id.clone(),
                    document_id: chunk.document_id.clone(),
                    chunk_text: chunk.text.clone(),
                    chunk_index: chunk.chunk_index,
                    created_at: chunk.created_at,
                    similarity,
                })
            })
            .collect();

        matches.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(limit);
        Ok(matches)
    }
}

#[async_trait]
impl KeywordSearch for MemoryStore {
    async fn keyword_search(
        &self,
        agent_id: &str,
        query: &KeywordQuery,
        limit: usize,
    ) -> Result<Vec<KeywordMatch>, SearchError> {
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let corpus = self.corpus.read().await;

        let matches = corpus
            .agent_chunks(agent_id)
            .into_iter()
            .filter(|chunk| query.terms().iter().any(|term| chunk.terms.contains(term)))
            .take(limit)
            .map(|chunk| {
                let document = corpus.documents.get(&chunk.document_id);
                KeywordMatch {
                    id: chunk.id.clone(),
                    document_id: chunk.document_id.clone(),
                    chunk_text: chunk.text.clone(),
                    chunk_index: chunk.chunk_index,
                    created_at: chunk.created_at,
                    document_title: document.map(|d| d.document.title.clone()),
                    document_file_type: document.map(|d| d.document.file_type.clone()),
                    document_upload_date: document.and_then(|d| d.document.upload_date),
                }
            })
            .collect();

        Ok(matches)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get_documents(&self, ids: &[String]) -> Result<Vec<Document>, SearchError> {
        let corpus = self.corpus.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| corpus.documents.get(id))
            .map(|d| d.document.clone())
            .collect())
    }

    async fn recent_documents(
        &self,
        agent_id: &str,
        limit: usize,
    ) -> Result<Vec<Document>, SearchError> {
        let corpus = self.corpus.read().await;
        let mut documents: Vec<&StoredDocument> = corpus
            .documents
            .values()
            .filter(|d| d.agent_id == agent_id)
            .collect();

        // Newest first; undated documents last; ties by newest insertion
        documents.sort_by(|a, b| {
            match (a.document.upload_date, b.document.upload_date) {
                (Some(x), Some(y)) => y.cmp(&x),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            }
            .then(b.seq.cmp(&a.seq))
        });

        Ok(documents
            .into_iter()
            .take(limit)
            .map(|d| d.document.clone())
            .collect())
    }
}
