//! Hybrid retrieval combining vector and keyword search

use crate::config::{Config, ConfigValidator, RetrievalConfig};
use crate::embedding::{is_valid_vector, normalize_similarity, EmbeddingProvider};
use crate::error::Result;
use crate::retrieval::context::RetrievedContext;
use crate::retrieval::filters::{FilterError, ResolvedFilters, SearchFilters};
use crate::retrieval::fusion::{fuse, FusedChunk, SearchStrategy};
use crate::retrieval::keywords::KeywordExtractor;
use crate::retrieval::sources::{assemble_sources, distinct_document_ids};
use crate::retrieval::summary::format_summary;
use crate::storage::{
    Document, DocumentStore, KeywordMatch, KeywordQuery, KeywordSearch, VectorMatch, VectorSearch,
};
use ahash::AHashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

/// A collaborator failure that was recovered by returning fewer results
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Degradation {
    #[error("Embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("Embedding timed out after {timeout_ms}ms")]
    EmbeddingTimedOut { timeout_ms: u64 },

    #[error("Vector search failed: {0}")]
    VectorSearchFailed(String),

    #[error("Keyword search failed: {0}")]
    KeywordSearchFailed(String),

    #[error("Document metadata fetch failed: {0}")]
    DocumentFetchFailed(String),
}

/// A request that could not be served at all
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RetrievalFailure {
    #[error("Agent id cannot be empty")]
    EmptyAgentId,

    #[error("Invalid filters: {0}")]
    InvalidFilters(#[from] FilterError),
}

/// Why a context looks the way it does
#[derive(Debug, Clone, PartialEq)]
pub enum RetrievalStatus {
    /// Every collaborator answered
    Complete,
    /// Some collaborators failed; the context holds what the rest returned
    Degraded(Vec<Degradation>),
    /// Nothing was searched; the context is empty
    Failed(RetrievalFailure),
}

/// Retrieved context together with how it was produced
#[derive(Debug, Clone)]
pub struct RetrievalOutcome {
    pub context: RetrievedContext,
    pub status: RetrievalStatus,
    pub strategy: SearchStrategy,
    /// Keywords extracted from the query, in order
    pub keywords: Vec<String>,
}

impl RetrievalOutcome {
    pub fn is_complete(&self) -> bool {
        self.status == RetrievalStatus::Complete
    }

    pub fn degradations(&self) -> &[Degradation] {
        match &self.status {
            RetrievalStatus::Degraded(reasons) => reasons,
            _ => &[],
        }
    }
}

/// Hybrid retriever over one corpus
///
/// Stateless between calls; share it behind an `Arc`.
pub struct HybridRetriever {
    embedding_provider: Arc<dyn EmbeddingProvider>,
    vector_index: Arc<dyn VectorSearch>,
    keyword_index: Arc<dyn KeywordSearch>,
    document_store: Arc<dyn DocumentStore>,
    extractor: KeywordExtractor,
    config: RetrievalConfig,
    embedding_timeout: Duration,
    summary_limit: usize,
}

impl HybridRetriever {
    /// Create a retriever from its four collaborators
    pub fn new(
        embedding_provider: Arc<dyn EmbeddingProvider>,
        vector_index: Arc<dyn VectorSearch>,
        keyword_index: Arc<dyn KeywordSearch>,
        document_store: Arc<dyn DocumentStore>,
        config: &Config,
    ) -> Result<Self> {
        ConfigValidator::validate(config)?;

        let extractor = KeywordExtractor::new(
            config.retrieval.max_keywords,
            config.retrieval.min_keyword_len,
        )?;

        Ok(Self {
            embedding_provider,
            vector_index,
            keyword_index,
            document_store,
            extractor,
            config: config.retrieval.clone(),
            embedding_timeout: Duration::from_millis(config.embedding.timeout_ms),
            summary_limit: config.summary.max_documents,
        })
    }

    /// Create a retriever whose three search collaborators are one store
    pub fn from_store<S>(
        embedding_provider: Arc<dyn EmbeddingProvider>,
        store: Arc<S>,
        config: &Config,
    ) -> Result<Self>
    where
        S: VectorSearch + KeywordSearch + DocumentStore + 'static,
    {
        Self::new(
            embedding_provider,
            store.clone(),
            store.clone(),
            store,
            config,
        )
    }

    /// Retrieve a context window for `query`, never failing
    ///
    /// Collaborator failures shrink the result instead of surfacing; use
    /// [`retrieve`](Self::retrieve) to see why a result is small.
    pub async fn retrieve_relevant_context(
        &self,
        agent_id: &str,
        query: &str,
        filters: Option<&SearchFilters>,
    ) -> RetrievedContext {
        self.retrieve(agent_id, query, filters).await.context
    }

    /// Retrieve a context window and report how it was produced
    pub async fn retrieve(
        &self,
        agent_id: &str,
        query: &str,
        filters: Option<&SearchFilters>,
    ) -> RetrievalOutcome {
        let started = Instant::now();
        let keywords = self.extractor.extract(query);

        if agent_id.trim().is_empty() {
            return Self::failed(RetrievalFailure::EmptyAgentId, keywords, started);
        }

        let filters = match filters.cloned().unwrap_or_default().resolve(&self.config) {
            Ok(filters) => filters,
            Err(e) => return Self::failed(e.into(), keywords, started),
        };

        let keyword_query = KeywordQuery::new(keywords.clone());
        let (vector_result, keyword_result) = tokio::join!(
            self.vector_channel(agent_id, query, &filters),
            self.keyword_channel(agent_id, &keyword_query, &filters),
        );

        let mut degradations = Vec::new();
        let vector_hits = recover(vector_result, &mut degradations);
        let keyword_hits = recover(keyword_result, &mut degradations);

        debug!(
            "Agent {}: {} vector hits, {} keyword hits for {} keywords",
            agent_id,
            vector_hits.len(),
            keyword_hits.len(),
            keywords.len()
        );

        let mut documents = joined_documents(&keyword_hits);
        let query_keywords: HashSet<String> = keywords.iter().cloned().collect();
        let fused = fuse(
            vector_hits,
            keyword_hits,
            &query_keywords,
            &self.extractor,
            &self.config.scoring,
        );

        // Type and date filters need metadata for every candidate; otherwise
        // only the survivors are looked up
        let survivors = if filters.needs_documents() {
            self.load_documents(&fused.chunks, &mut documents, &mut degradations)
                .await;
            filters.apply(fused.chunks, &documents)
        } else {
            let survivors = filters.apply(fused.chunks, &documents);
            self.load_documents(&survivors, &mut documents, &mut degradations)
                .await;
            survivors
        };

        let sources = assemble_sources(&survivors, &documents);
        let context = RetrievedContext::assemble(survivors, sources, elapsed_ms(started));

        debug!(
            "Agent {}: {} chunks from {} sources in {}ms ({:?})",
            agent_id,
            context.search_metrics.total_chunks,
            context.sources.len(),
            context.search_metrics.search_time_ms,
            fused.strategy
        );

        let status = if degradations.is_empty() {
            RetrievalStatus::Complete
        } else {
            RetrievalStatus::Degraded(degradations)
        };

        RetrievalOutcome {
            context,
            status,
            strategy: fused.strategy,
            keywords,
        }
    }

    /// Describe the agent's most recently uploaded documents
    ///
    /// Returns an empty string when there are none or the lookup fails.
    pub async fn knowledge_base_summary(&self, agent_id: &str) -> String {
        if agent_id.trim().is_empty() {
            return String::new();
        }

        match self
            .document_store
            .recent_documents(agent_id, self.summary_limit)
            .await
        {
            Ok(documents) => format_summary(&documents),
            Err(e) => {
                warn!("Knowledge base summary failed for agent {}: {}", agent_id, e);
                String::new()
            }
        }
    }

    /// Embed the query, then search the vector index
    async fn vector_channel(
        &self,
        agent_id: &str,
        query: &str,
        filters: &ResolvedFilters,
    ) -> std::result::Result<Vec<VectorMatch>, Degradation> {
        let embedding = self.embed_query(query).await?;
        let limit = filters
            .max_results
            .saturating_mul(self.config.vector_overfetch);

        let hits = self
            .vector_index
            .vector_search(agent_id, &embedding, filters.min_similarity, limit)
            .await
            .map_err(|e| {
                warn!("Vector search failed for agent {}: {}", agent_id, e);
                Degradation::VectorSearchFailed(e.to_string())
            })?;

        Ok(hits
            .into_iter()
            .filter(|hit| !hit.id.is_empty() && hit.similarity.is_finite())
            .map(|mut hit| {
                hit.similarity = normalize_similarity(hit.similarity);
                hit
            })
            .collect())
    }

    async fn embed_query(&self, query: &str) -> std::result::Result<Vec<f32>, Degradation> {
        let timeout_ms = u64::try_from(self.embedding_timeout.as_millis()).unwrap_or(u64::MAX);

        match tokio::time::timeout(self.embedding_timeout, self.embedding_provider.embed(query))
            .await
        {
            Ok(Ok(vector)) if is_valid_vector(&vector) => Ok(vector),
            Ok(Ok(_)) => {
                warn!("Embedding provider returned an empty or malformed vector; keyword-only search");
                Err(Degradation::EmbeddingUnavailable(
                    "empty or malformed vector".to_string(),
                ))
            }
            Ok(Err(e)) => {
                warn!("Embedding failed, falling back to keyword-only search: {}", e);
                Err(Degradation::EmbeddingUnavailable(e.to_string()))
            }
            Err(_) => {
                warn!(
                    "Embedding timed out after {}ms, falling back to keyword-only search",
                    timeout_ms
                );
                Err(Degradation::EmbeddingTimedOut { timeout_ms })
            }
        }
    }

    async fn keyword_channel(
        &self,
        agent_id: &str,
        query: &KeywordQuery,
        filters: &ResolvedFilters,
    ) -> std::result::Result<Vec<KeywordMatch>, Degradation> {
        if query.is_empty() {
            debug!("No keywords extracted; skipping keyword search");
            return Ok(Vec::new());
        }

        let hits = self
            .keyword_index
            .keyword_search(agent_id, query, filters.max_results)
            .await
            .map_err(|e| {
                warn!("Keyword search failed for agent {}: {}", agent_id, e);
                Degradation::KeywordSearchFailed(e.to_string())
            })?;

        Ok(hits.into_iter().filter(|hit| !hit.id.is_empty()).collect())
    }

    /// Fetch metadata for documents not already known; at most one lookup
    async fn load_documents(
        &self,
        chunks: &[FusedChunk],
        documents: &mut AHashMap<String, Document>,
        degradations: &mut Vec<Degradation>,
    ) {
        let missing: Vec<String> = distinct_document_ids(chunks)
            .into_iter()
            .filter(|id| !documents.contains_key(id))
            .collect();

        if missing.is_empty() {
            return;
        }

        match self.document_store.get_documents(&missing).await {
            Ok(found) => {
                for doc in found {
                    documents.insert(doc.id.clone(), doc);
                }
            }
            Err(e) => {
                warn!("Document metadata fetch failed: {}", e);
                degradations.push(Degradation::DocumentFetchFailed(e.to_string()));
            }
        }
    }

    fn failed(
        failure: RetrievalFailure,
        keywords: Vec<String>,
        started: Instant,
    ) -> RetrievalOutcome {
        warn!("Retrieval rejected: {}", failure);
        RetrievalOutcome {
            context: RetrievedContext::empty(elapsed_ms(started)),
            status: RetrievalStatus::Failed(failure),
            strategy: SearchStrategy::Keyword,
            keywords,
        }
    }
}

fn recover<T>(
    result: std::result::Result<Vec<T>, Degradation>,
    degradations: &mut Vec<Degradation>,
) -> Vec<T> {
    result.unwrap_or_else(|reason| {
        degradations.push(reason);
        Vec::new()
    })
}

/// Document metadata the keyword backend already joined onto its hits
fn joined_documents(hits: &[KeywordMatch]) -> AHashMap<String, Document> {
    hits.iter()
        .filter_map(KeywordMatch::document)
        .map(|doc| (doc.id.clone(), doc))
        .collect()
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
