//! Document ingestion into a SQLite corpus

use crate::config::EmbeddingConfig;
use crate::embedding::{is_valid_vector, EmbeddingError, EmbeddingProvider};
use crate::error::{ContextError, Result};
use crate::storage::{ChunkContent, Document, NewDocument, SqliteStore};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of ingesting one document
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub document: Document,
    pub chunk_ids: Vec<String>,
    /// Chunks stored with an embedding
    pub embedded: usize,
    /// Chunks stored without one; still reachable by keyword search
    pub unembedded: usize,
    pub duration_ms: u64,
}

/// Splits, embeds and stores documents
pub struct Ingestor {
    provider: Arc<dyn EmbeddingProvider>,
    store: SqliteStore,
    chunk_size: usize,
}

impl Ingestor {
    /// Create an ingestor writing chunks of at most `chunk_size` characters
    pub fn new(provider: Arc<dyn EmbeddingProvider>, store: SqliteStore, chunk_size: usize) -> Self {
        Self {
            provider,
            store,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Create an ingestor from the embedding section of the configuration
    ///
    /// Fails when the provider's vectors would not match the configured dimension.
    pub fn from_config(
        provider: Arc<dyn EmbeddingProvider>,
        store: SqliteStore,
        config: &EmbeddingConfig,
    ) -> Result<Self> {
        if provider.dimension() != config.dimension {
            return Err(EmbeddingError::DimensionMismatch {
                expected: config.dimension,
                actual: provider.dimension(),
            }
            .into());
        }

        Ok(Self::new(provider, store, config.chunk_size))
    }

    /// Store a document and its chunks
    pub async fn ingest(&self, document: NewDocument, text: &str) -> Result<IngestReport> {
        let start = std::time::Instant::now();
        let chunks = split_into_chunks(text, self.chunk_size);

        info!(
            "Ingesting '{}' for agent {} ({} chunks)",
            document.title,
            document.agent_id,
            chunks.len()
        );

        let embeddings = self.embed_chunks(&chunks).await;
        let embedded = embeddings.iter().filter(|e| e.is_some()).count();

        let store = self.store.clone();
        let contents: Vec<ChunkContent> = chunks
            .into_iter()
            .zip(embeddings)
            .zip(0i64..)
            .map(|((text, embedding), chunk_index)| ChunkContent {
                text,
                chunk_index,
                embedding,
            })
            .collect();
        let (document, chunk_ids) = tokio::task::spawn_blocking(move || {
            store.add_document_with_chunks(document, contents)
        })
        .await
        .map_err(|e| ContextError::Other(anyhow::anyhow!("Ingestion task failed: {}", e)))??;

        let report = IngestReport {
            unembedded: chunk_ids.len() - embedded,
            embedded,
            chunk_ids,
            document,
            duration_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
        };

        info!(
            "Ingested document {}: {} embedded, {} keyword-only in {}ms",
            report.document.id, report.embedded, report.unembedded, report.duration_ms
        );

        Ok(report)
    }

    /// Embed every chunk, falling back to one call per chunk if the batch fails
    async fn embed_chunks(&self, chunks: &[String]) -> Vec<Option<Vec<f32>>> {
        if chunks.is_empty() {
            return Vec::new();
        }

        match self.provider.embed_batch(chunks).await {
            Ok(vectors) if vectors.len() == chunks.len() => {
                return vectors
                    .into_iter()
                    .map(|v| self.usable(&v).then_some(v))
                    .collect();
            }
            Ok(vectors) => warn!(
                "Batch embedding returned {} vectors for {} chunks, retrying individually",
                vectors.len(),
                chunks.len()
            ),
            Err(e) => warn!("Batch embedding failed, retrying individually: {}", e),
        }

        let mut embeddings = Vec::with_capacity(chunks.len());
        for (index, chunk) in chunks.iter().enumerate() {
            match self.provider.embed(chunk).await {
                Ok(vector) if self.usable(&vector) => embeddings.push(Some(vector)),
                Ok(_) => {
                    debug!("Chunk {} produced an invalid vector", index);
                    embeddings.push(None);
                }
                Err(e) => {
                    warn!("Failed to embed chunk {}: {}", index, e);
                    embeddings.push(None);
                }
            }
        }
        embeddings
    }

    fn usable(&self, vector: &[f32]) -> bool {
        is_valid_vector(vector) && vector.len() == self.provider.dimension()
    }
}

/// Split text into paragraph-bounded chunks of at most `max_chars` characters
///
/// Paragraphs are packed greedily; a paragraph longer than `max_chars` is
/// split on whitespace, and a single overlong word is cut by characters.
pub fn split_into_chunks(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();

    for paragraph in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        for piece in split_paragraph(paragraph, max_chars) {
            let needed = if current.is_empty() {
                piece.chars().count()
            } else {
                current.chars().count() + 2 + piece.chars().count()
            };

            if needed > max_chars && !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }

            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(&piece);
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

fn split_paragraph(paragraph: &str, max_chars: usize) -> Vec<String> {
    if paragraph.chars().count() <= max_chars {
        return vec![paragraph.to_string()];
    }

    let mut pieces = Vec::new();
    let mut current = String::new();

    for word in paragraph.split_whitespace() {
        let word_len = word.chars().count();

        if word_len > max_chars {
            if !current.is_empty() {
                pieces.push(std::mem::take(&mut current));
            }
            let chars: Vec<char> = word.chars().collect();
            for part in chars.chunks(max_chars) {
                pieces.push(part.iter().collect());
            }
            continue;
        }

        let needed = if current.is_empty() {
            word_len
        } else {
            current.chars().count() + 1 + word_len
        };

        if needed > max_chars {
            pieces.push(std::mem::take(&mut current));
        }

        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }

    if !current.is_empty() {
        pieces.push(current);
    }

    pieces
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct ShortEmbedder;

    #[async_trait]
    impl EmbeddingProvider for ShortEmbedder {
        async fn embed(&self, _text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
            Ok(vec![1.0, 0.0, 0.0])
        }

        fn dimension(&self) -> usize {
            3
        }

        fn model_name(&self) -> &str {
            "short"
        }
    }

    fn store(temp: &TempDir) -> SqliteStore {
        SqliteStore::open(&temp.path().join("corpus.sqlite"), 2).unwrap()
    }

    #[test]
    fn test_from_config_rejects_dimension_mismatch() {
        let temp = TempDir::new().unwrap();
        let config = crate::config::Config::default().embedding;

        let result = Ingestor::from_config(Arc::new(ShortEmbedder), store(&temp), &config);
        assert!(matches!(
            result,
            Err(ContextError::Embedding(EmbeddingError::DimensionMismatch {
                expected: 384,
                actual: 3
            }))
        ));
    }

    #[tokio::test]
    async fn test_from_config_uses_chunk_size() {
        let temp = TempDir::new().unwrap();
        let mut config = crate::config::Config::default().embedding;
        config.dimension = 3;
        config.chunk_size = 11;

        let ingestor = Ingestor::from_config(Arc::new(ShortEmbedder), store(&temp), &config).unwrap();
        let report = ingestor
            .ingest(
                NewDocument {
                    agent_id: "agent".to_string(),
                    title: "Words".to_string(),
                    file_type: "text".to_string(),
                    upload_date: None,
                },
                "alpha beta gamma delta",
            )
            .await
            .unwrap();

        assert_eq!(report.chunk_ids.len(), 2);
        assert_eq!(report.embedded, 2);
    }

    #[test]
    fn test_paragraphs_are_packed() {
        let text = "First paragraph.\n\nSecond one.\n\n\n\nThird paragraph here.";
        let chunks = split_into_chunks(text, 30);
        assert_eq!(chunks, vec!["First paragraph.\n\nSecond one.", "Third paragraph here."]);
    }

    #[test]
    fn test_long_paragraph_split_on_words() {
        let chunks = split_into_chunks("alpha beta gamma delta", 11);
        assert_eq!(chunks, vec!["alpha beta", "gamma delta"]);
        assert!(chunks.iter().all(|c| c.chars().count() <= 11));
    }

    #[test]
    fn test_overlong_word_cut() {
        let chunks = split_into_chunks("abcdefghij", 4);
        assert_eq!(chunks, vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn test_blank_text() {
        assert!(split_into_chunks("  \n\n  ", 100).is_empty());
    }
}
