//! End-to-end retrieval over the in-memory corpus

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use hybrid_context::config::Config;
use hybrid_context::embedding::{EmbeddingError, EmbeddingProvider};
use hybrid_context::retrieval::{
    Degradation, HybridRetriever, SearchFilters, SearchStrategy, SearchType, UNKNOWN_DOCUMENT_TITLE,
};
use hybrid_context::storage::{MemoryStore, NewChunk, NewDocument};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const AGENT: &str = "support-bot";

/// Returns a preset vector per query text
struct TableEmbedder {
    vectors: HashMap<String, Vec<f32>>,
}

impl TableEmbedder {
    fn new(entries: &[(&str, Vec<f32>)]) -> Arc<Self> {
        Arc::new(Self {
            vectors: entries
                .iter()
                .map(|(text, v)| (text.to_string(), v.clone()))
                .collect(),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for TableEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.vectors
            .get(text)
            .cloned()
            .ok_or_else(|| EmbeddingError::GenerationError(format!("no vector for '{}'", text)))
    }

    fn dimension(&self) -> usize {
        2
    }

    fn model_name(&self) -> &str {
        "table"
    }
}

struct DownEmbedder;

#[async_trait]
impl EmbeddingProvider for DownEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Err(EmbeddingError::GenerationError("provider unreachable".to_string()))
    }

    fn dimension(&self) -> usize {
        2
    }

    fn model_name(&self) -> &str {
        "down"
    }
}

struct SlowEmbedder;

#[async_trait]
impl EmbeddingProvider for SlowEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(vec![1.0, 0.0])
    }

    fn dimension(&self) -> usize {
        2
    }

    fn model_name(&self) -> &str {
        "slow"
    }
}

struct Corpus {
    store: Arc<MemoryStore>,
    returns_doc: String,
    shipping_doc: String,
}

/// C1 sits at cosine 0.85 from the query vector `[1, 0]`; C2 is orthogonal
async fn scenario_corpus() -> Corpus {
    let store = Arc::new(MemoryStore::new().unwrap());

    let returns = store
        .add_document(NewDocument {
            agent_id: AGENT.to_string(),
            title: "Returns Handbook".to_string(),
            file_type: "pdf".to_string(),
            upload_date: Some(Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap()),
        })
        .await;
    let shipping = store
        .add_document(NewDocument {
            agent_id: AGENT.to_string(),
            title: "Shipping Guide".to_string(),
            file_type: "pdf".to_string(),
            upload_date: Some(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()),
        })
        .await;

    let off_axis = (1.0f32 - 0.85 * 0.85).sqrt();
    store
        .add_chunk(NewChunk {
            document_id: returns.id.clone(),
            text: "refund policy for returns".to_string(),
            chunk_index: 0,
            embedding: Some(vec![0.85, off_axis]),
        })
        .await
        .unwrap();
    store
        .add_chunk(NewChunk {
            document_id: shipping.id.clone(),
            text: "shipping and refund timelines".to_string(),
            chunk_index: 0,
            embedding: Some(vec![0.0, 1.0]),
        })
        .await
        .unwrap();

    Corpus {
        store,
        returns_doc: returns.id,
        shipping_doc: shipping.id,
    }
}

fn retriever(embedder: Arc<dyn EmbeddingProvider>, store: Arc<MemoryStore>) -> HybridRetriever {
    HybridRetriever::from_store(embedder, store, &Config::default()).unwrap()
}

fn refund_embedder() -> Arc<TableEmbedder> {
    TableEmbedder::new(&[("refund policy", vec![1.0, 0.0])])
}

#[tokio::test]
async fn test_vector_and_keyword_hits_fuse() {
    let corpus = scenario_corpus().await;
    let retriever = retriever(refund_embedder(), corpus.store.clone());

    // Keyword-only C2 scores 0.25 * 0.6 = 0.15, so the floor must sit below it
    let filters = SearchFilters::new()
        .with_min_similarity(0.1)
        .with_max_results(5);
    let outcome = retriever
        .retrieve(AGENT, "refund policy", Some(&filters))
        .await;
    let context = &outcome.context;

    assert!(outcome.is_complete());
    assert_eq!(outcome.strategy, SearchStrategy::Hybrid);
    assert_eq!(
        context.chunk_texts(),
        vec!["refund policy for returns", "shipping and refund timelines"]
    );

    let c1 = &context.relevant_chunks[0];
    assert_eq!(c1.search_type, SearchType::Hybrid);
    assert!((c1.combined_score - 0.895).abs() < 1e-4);

    let c2 = &context.relevant_chunks[1];
    assert_eq!(c2.search_type, SearchType::Keyword);
    assert!((c2.combined_score - 0.15).abs() < 1e-4);
    assert!(c1.combined_score >= c2.combined_score);

    assert_eq!(context.sources.len(), 2);
    assert_eq!(context.sources[0].document_id, corpus.returns_doc);
    assert_eq!(context.sources[0].title, "Returns Handbook");
    assert_eq!(context.sources[1].document_id, corpus.shipping_doc);
    assert_eq!(
        context.context_text,
        "refund policy for returns\n\nshipping and refund timelines"
    );
    assert_eq!(context.search_metrics.total_chunks, 2);
}

#[tokio::test]
async fn test_weak_keyword_only_hit_falls_below_floor() {
    let corpus = scenario_corpus().await;
    let retriever = retriever(refund_embedder(), corpus.store.clone());

    let filters = SearchFilters::new().with_min_similarity(0.5);
    let context = retriever
        .retrieve_relevant_context(AGENT, "refund policy", Some(&filters))
        .await;

    assert_eq!(context.chunk_texts(), vec!["refund policy for returns"]);
    assert_eq!(context.sources.len(), 1);
}

#[tokio::test]
async fn test_embedding_failure_keeps_keyword_results() {
    let corpus = scenario_corpus().await;
    let retriever = retriever(Arc::new(DownEmbedder), corpus.store.clone());

    let filters = SearchFilters::new().with_min_similarity(0.1);
    let outcome = retriever
        .retrieve(AGENT, "refund policy", Some(&filters))
        .await;

    assert_eq!(outcome.strategy, SearchStrategy::Keyword);
    assert!(matches!(
        outcome.degradations(),
        [Degradation::EmbeddingUnavailable(_)]
    ));
    assert!(!outcome.context.is_empty());
    assert_eq!(
        outcome.context.search_metrics.total_chunks,
        outcome.context.relevant_chunks.len()
    );
    assert!(outcome
        .context
        .relevant_chunks
        .iter()
        .all(|c| c.search_type == SearchType::Keyword));
}

#[tokio::test]
async fn test_unreachable_floor_yields_empty_context() {
    let corpus = scenario_corpus().await;
    let retriever = retriever(refund_embedder(), corpus.store.clone());

    let filters = SearchFilters::new().with_min_similarity(0.99);
    let outcome = retriever
        .retrieve(AGENT, "refund policy", Some(&filters))
        .await;

    assert!(outcome.is_complete());
    assert!(outcome.context.relevant_chunks.is_empty());
    assert!(outcome.context.sources.is_empty());
    assert_eq!(outcome.context.search_metrics.average_similarity, 0.0);
}

#[tokio::test]
async fn test_empty_query_without_embedding() {
    let corpus = scenario_corpus().await;
    let retriever = retriever(Arc::new(DownEmbedder), corpus.store.clone());

    let outcome = retriever.retrieve(AGENT, "", None).await;

    assert!(outcome.keywords.is_empty());
    assert!(outcome.context.relevant_chunks.is_empty());
    assert_eq!(outcome.context.context_text, "");
    assert_eq!(outcome.context.search_metrics.total_chunks, 0);
    assert_eq!(outcome.context.search_metrics.average_similarity, 0.0);
}

#[tokio::test(start_paused = true)]
async fn test_slow_embedding_times_out() {
    let corpus = scenario_corpus().await;
    let mut config = Config::default();
    config.embedding.timeout_ms = 50;
    let retriever =
        HybridRetriever::from_store(Arc::new(SlowEmbedder), corpus.store.clone(), &config)
            .unwrap();

    let filters = SearchFilters::new().with_min_similarity(0.1);
    let outcome = retriever
        .retrieve(AGENT, "refund policy", Some(&filters))
        .await;

    assert_eq!(
        outcome.degradations(),
        &[Degradation::EmbeddingTimedOut { timeout_ms: 50 }]
    );
    assert_eq!(outcome.strategy, SearchStrategy::Keyword);
    assert_eq!(outcome.context.relevant_chunks.len(), 2);
}

#[tokio::test]
async fn test_agents_are_isolated() {
    let corpus = scenario_corpus().await;
    let retriever = retriever(refund_embedder(), corpus.store.clone());

    let filters = SearchFilters::new().with_min_similarity(0.0);
    let context = retriever
        .retrieve_relevant_context("another-agent", "refund policy", Some(&filters))
        .await;

    assert!(context.is_empty());
}

#[tokio::test]
async fn test_max_results_and_source_deduplication() {
    let store = Arc::new(MemoryStore::new().unwrap());
    let manual = store
        .add_document(NewDocument {
            agent_id: AGENT.to_string(),
            title: "Manual".to_string(),
            file_type: "pdf".to_string(),
            upload_date: None,
        })
        .await;

    for i in 0..8 {
        let angle = i as f32 * 0.05;
        store
            .add_chunk(NewChunk {
                document_id: manual.id.clone(),
                text: format!("warranty section {}", i),
                chunk_index: i,
                embedding: Some(vec![angle.cos(), angle.sin()]),
            })
            .await
            .unwrap();
    }

    let embedder = TableEmbedder::new(&[("warranty", vec![1.0, 0.0])]);
    let retriever = retriever(embedder, store);

    let filters = SearchFilters::new()
        .with_min_similarity(0.0)
        .with_max_results(3);
    let context = retriever
        .retrieve_relevant_context(AGENT, "warranty", Some(&filters))
        .await;

    assert_eq!(context.relevant_chunks.len(), 3);
    assert_eq!(context.chunk_texts()[0], "warranty section 0");
    assert_eq!(context.sources.len(), 1);
    assert_eq!(context.sources[0].title, "Manual");
    assert_eq!(
        context.sources[0].similarity,
        context.relevant_chunks[0].combined_score
    );
}

#[tokio::test]
async fn test_type_and_date_filters_compose() {
    let corpus = scenario_corpus().await;
    let notes = corpus
        .store
        .add_document(NewDocument {
            agent_id: AGENT.to_string(),
            title: "Refund Notes".to_string(),
            file_type: "docx".to_string(),
            upload_date: Some(Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap()),
        })
        .await;
    corpus
        .store
        .add_chunk(NewChunk {
            document_id: notes.id.clone(),
            text: "refund policy exceptions".to_string(),
            chunk_index: 0,
            embedding: Some(vec![1.0, 0.0]),
        })
        .await
        .unwrap();

    let retriever = retriever(refund_embedder(), corpus.store.clone());

    // Only the January PDF survives both filters
    let filters = SearchFilters::new()
        .with_document_types(["PDF"])
        .with_date_range(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap(),
        )
        .with_min_similarity(0.1);
    let context = retriever
        .retrieve_relevant_context(AGENT, "refund policy", Some(&filters))
        .await;

    assert_eq!(context.chunk_texts(), vec!["refund policy for returns"]);
    assert_eq!(context.sources.len(), 1);
    assert_eq!(context.sources[0].document_id, corpus.returns_doc);
}

#[tokio::test]
async fn test_repeated_calls_are_deterministic() {
    let corpus = scenario_corpus().await;
    let retriever = retriever(refund_embedder(), corpus.store.clone());
    let filters = SearchFilters::new().with_min_similarity(0.1);

    let first = retriever
        .retrieve_relevant_context(AGENT, "refund policy", Some(&filters))
        .await;
    let second = retriever
        .retrieve_relevant_context(AGENT, "refund policy", Some(&filters))
        .await;

    assert_eq!(first.relevant_chunks, second.relevant_chunks);
    assert_eq!(first.sources, second.sources);
    assert_eq!(first.context_text, second.context_text);
}

#[tokio::test]
async fn test_summary_lists_recent_documents() {
    let corpus = scenario_corpus().await;
    let retriever = retriever(refund_embedder(), corpus.store.clone());

    assert_eq!(
        retriever.knowledge_base_summary(AGENT).await,
        "Knowledge base contains 2 documents: PDF files (2): Shipping Guide, Returns Handbook"
    );
    assert_eq!(retriever.knowledge_base_summary("nobody").await, "");
}

#[test]
fn test_placeholder_title_is_stable() {
    assert_eq!(UNKNOWN_DOCUMENT_TITLE, "Unknown Document");
}
