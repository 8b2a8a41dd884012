//! SQLite corpus store with migrations
//!
//! Chunks keep their embedding as an f32 blob, mirrored into an in-memory
//! HNSW index that is rebuilt on open. Keyword search runs against an FTS5
//! table kept in step with the `chunks` table.

use super::{
    ChunkContent, Document, DocumentStore, KeywordMatch, KeywordQuery, KeywordSearch, NewChunk,
    NewDocument, SearchError, VectorIndex, VectorMatch, VectorSearch,
};
use crate::config::{StorageConfig, VectorIndexConfig};
use crate::embedding::{cosine_similarity, decode_vector, encode_vector, normalize_similarity};
use crate::error::{ContextError, Result};
use ahash::AHashSet;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Transaction};
use std::path::Path;

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

const BACKEND: &str = "sqlite";

/// SQLite-backed corpus implementing every search collaborator
#[derive(Clone)]
pub struct SqliteStore {
    pool: DbPool,
    index: VectorIndex,
}

impl SqliteStore {
    /// Open (or create) a database file with default index parameters
    pub fn open(db_path: &Path, pool_size: u32) -> Result<Self> {
        Self::open_with_index(db_path, pool_size, VectorIndexConfig::default())
    }

    /// Open (or create) a database file and rebuild its vector index
    pub fn open_with_index(
        db_path: &Path,
        pool_size: u32,
        index_config: VectorIndexConfig,
    ) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| ContextError::Io {
                    source: e,
                    context: format!("Failed to create database directory: {:?}", parent),
                })?;
            }
        }

        let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                PRAGMA foreign_keys = ON;
                PRAGMA busy_timeout = 5000;
                ",
            )
        });

        let pool = Pool::builder().max_size(pool_size).build(manager)?;

        let store = Self {
            pool,
            index: VectorIndex::new(index_config),
        };
        store.migrate()?;
        store.rebuild_index(None)?;
        Ok(store)
    }

    /// Open the database described by the storage configuration
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        Self::open_with_index(&config.database_path, config.pool_size, config.vector_index)
    }

    /// Get a connection from the pool
    pub fn get_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.get_conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )?;

        let current_version: i32 = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM _migrations",
            [],
            |row| row.get(0),
        )?;

        for (version, migration) in (1i32..).zip(MIGRATIONS.iter()) {
            if version > current_version {
                tracing::info!("Applying migration {}", version);

                conn.execute_batch(migration)?;
                conn.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, datetime('now'))",
                    params![version],
                )?;
            }
        }

        Ok(())
    }

    /// Insert a document and return its stored metadata
    pub fn add_document(&self, document: NewDocument) -> Result<Document> {
        let (document, _) = self.add_document_with_chunks(document, Vec::new())?;
        Ok(document)
    }

    /// Insert a document and all of its chunks in one transaction
    ///
    /// Either every row lands or none does. Returns the document and the
    /// chunk ids in input order.
    pub fn add_document_with_chunks(
        &self,
        document: NewDocument,
        chunks: Vec<ChunkContent>,
    ) -> Result<(Document, Vec<String>)> {
        let id = uuid::Uuid::new_v4().to_string();
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO documents (id, agent_id, title, file_type, upload_date)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                id,
                document.agent_id,
                document.title,
                document.file_type,
                document.upload_date.map(|d| d.timestamp()),
            ],
        )?;

        let mut inserted = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            inserted.push(insert_chunk(&tx, &document.agent_id, &id, chunk)?);
        }

        tx.commit()?;

        let mut chunk_ids = Vec::with_capacity(inserted.len());
        for ((chunk_id, rowid), chunk) in inserted.into_iter().zip(&chunks) {
            if let Some(embedding) = &chunk.embedding {
                self.index_chunk(&document.agent_id, rowid, embedding);
            }
            chunk_ids.push(chunk_id);
        }

        Ok((
            Document {
                id,
                title: document.title,
                file_type: document.file_type,
                upload_date: document.upload_date,
            },
            chunk_ids,
        ))
    }

    /// Insert a chunk for an existing document and return its id
    ///
    /// The chunk inherits the owning document's agent scope.
    pub fn add_chunk(&self, chunk: NewChunk) -> Result<String> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let agent_id: String = tx
            .query_row(
                "SELECT agent_id FROM documents WHERE id = ?1",
                params![chunk.document_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| ContextError::DocumentNotFound {
                id: chunk.document_id.clone(),
            })?;

        let content = ChunkContent {
            text: chunk.text,
            chunk_index: chunk.chunk_index,
            embedding: chunk.embedding,
        };
        let (id, rowid) = insert_chunk(&tx, &agent_id, &chunk.document_id, &content)?;
        tx.commit()?;

        if let Some(embedding) = &content.embedding {
            self.index_chunk(&agent_id, rowid, embedding);
        }
        Ok(id)
    }

    fn index_chunk(&self, agent_id: &str, rowid: i64, embedding: &[f32]) {
        if let Err(e) = self.index.insert(agent_id, rowid, embedding) {
            tracing::warn!("Chunk {} left out of the vector index: {}", rowid, e);
        }
    }

    /// Reload embeddings from the `chunks` table into the vector index
    ///
    /// With an agent id only that agent's graphs are rebuilt.
    fn rebuild_index(&self, agent_id: Option<&str>) -> Result<()> {
        let conn = self.get_conn()?;

        if let Some(agent_id) = agent_id {
            self.index.remove_agent(agent_id).map_err(SearchError::from)?;
        }

        let mut stmt = conn.prepare(
            "SELECT rowid, agent_id, embedding FROM chunks
             WHERE embedding IS NOT NULL AND (?1 IS NULL OR agent_id = ?1)
             ORDER BY rowid",
        )?;
        let rows = stmt.query_map(params![agent_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Vec<u8>>(2)?,
            ))
        })?;

        let mut indexed = 0usize;
        for row in rows {
            let (rowid, agent, blob) = row?;
            self.index_chunk(&agent, rowid, &decode_vector(&blob));
            indexed += 1;
        }

        tracing::debug!("Vector index loaded {} embeddings", indexed);
        Ok(())
    }

    /// Number of vectors currently held by the index
    pub fn indexed_vectors(&self) -> usize {
        self.index.len()
    }

    /// Delete a document together with its chunks and keyword entries
    pub fn delete_document(&self, document_id: &str) -> Result<bool> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let agent_id: Option<String> = tx
            .query_row(
                "SELECT agent_id FROM documents WHERE id = ?1",
                params![document_id],
                |row| row.get(0),
            )
            .optional()?;

        tx.execute(
            "DELETE FROM chunks_fts WHERE chunk_id IN (SELECT id FROM chunks WHERE document_id = ?1)",
            params![document_id],
        )?;
        tx.execute(
            "DELETE FROM chunks WHERE document_id = ?1",
            params![document_id],
        )?;
        let removed = tx.execute("DELETE FROM documents WHERE id = ?1", params![document_id])?;

        tx.commit()?;
        drop(conn);

        // HNSW graphs cannot drop points, so the agent's graphs are rebuilt
        if let Some(agent_id) = agent_id {
            self.rebuild_index(Some(&agent_id))?;
        }
        Ok(removed > 0)
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats> {
        let conn = self.get_conn()?;

        let document_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;

        let chunk_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;

        let embedded_chunk_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM chunks WHERE embedding IS NOT NULL",
            [],
            |row| row.get(0),
        )?;

        Ok(DbStats {
            document_count: count(document_count),
            chunk_count: count(chunk_count),
            embedded_chunk_count: count(embedded_chunk_count),
        })
    }

    /// Run a query on the blocking pool
    async fn with_conn<T, F>(&self, f: F) -> std::result::Result<T, SearchError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> std::result::Result<T, SearchError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            f(&*conn)
        })
        .await
        .map_err(|e| SearchError::Task(e.to_string()))?
    }
}

/// Database statistics
#[derive(Debug)]
pub struct DbStats {
    pub document_count: usize,
    pub chunk_count: usize,
    pub embedded_chunk_count: usize,
}

/// Insert one chunk row plus its keyword entry, returning its id and rowid
fn insert_chunk(
    tx: &Transaction<'_>,
    agent_id: &str,
    document_id: &str,
    chunk: &ChunkContent,
) -> rusqlite::Result<(String, i64)> {
    let id = uuid::Uuid::new_v4().to_string();

    tx.execute(
        "INSERT INTO chunks (id, agent_id, document_id, chunk_text, chunk_index, created_at, embedding)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            id,
            agent_id,
            document_id,
            chunk.text,
            chunk.chunk_index,
            Utc::now().timestamp(),
            chunk.embedding.as_deref().map(encode_vector),
        ],
    )?;
    let rowid = tx.last_insert_rowid();

    tx.execute(
        "INSERT INTO chunks_fts (chunk_id, agent_id, chunk_text) VALUES (?1, ?2, ?3)",
        params![id, agent_id, chunk.text],
    )?;

    Ok((id, rowid))
}

fn count(value: i64) -> usize {
    usize::try_from(value).unwrap_or(0)
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
}

fn optional_timestamp(secs: Option<i64>) -> Option<DateTime<Utc>> {
    secs.and_then(|s| DateTime::from_timestamp(s, 0))
}

fn fts_match_expression(query: &KeywordQuery) -> String {
    let quoted = KeywordQuery::new(
        query
            .terms()
            .iter()
            .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
            .collect(),
    );
    quoted.or_expression("OR")
}

fn read_document(row: &rusqlite::Row<'_>) -> rusqlite::Result<Document> {
    Ok(Document {
        id: row.get(0)?,
        title: row.get(1)?,
        file_type: row.get(2)?,
        upload_date: optional_timestamp(row.get(3)?),
    })
}

#[async_trait]
impl VectorSearch for SqliteStore {
    async fn vector_search(
        &self,
        agent_id: &str,
        vector: &[f32],
        similarity_threshold: f32,
        limit: usize,
    ) -> std::result::Result<Vec<VectorMatch>, SearchError> {
        if vector.is_empty() {
            return Err(SearchError::InvalidQuery("Empty query vector".to_string()));
        }

        if limit == 0 {
            return Ok(Vec::new());
        }

        // Graph scores are approximate; candidates are re-scored from the stored blob
        let candidates = self
            .index
            .search(agent_id, vector, limit.saturating_mul(2))?;
        let mut seen = AHashSet::new();
        let rowids: Vec<i64> = candidates
            .into_iter()
            .map(|hit| hit.id)
            .filter(|id| seen.insert(*id))
            .collect();
        if rowids.is_empty() {
            return Ok(Vec::new());
        }

        let agent_id = agent_id.to_string();
        let query = vector.to_vec();

        self.with_conn(move |conn| {
            let placeholders = vec!["?"; rowids.len()].join(", ");
            let sql = format!(
                "SELECT id, document_id, chunk_text, chunk_index, created_at, embedding
                 FROM chunks
                 WHERE agent_id = ? AND embedding IS NOT NULL AND rowid IN ({})
                 ORDER BY rowid",
                placeholders
            );
            let mut stmt = conn.prepare(&sql)?;

            let mut bound: Vec<rusqlite::types::Value> = Vec::with_capacity(rowids.len() + 1);
            bound.push(agent_id.into());
            bound.extend(rowids.into_iter().map(rusqlite::types::Value::from));

            let rows = stmt.query_map(params_from_iter(bound), |row| {
                let embedding: Vec<u8> = row.get(5)?;
                Ok((
                    VectorMatch {
                        id: row.get(0)?,
                        document_id: row.get(1)?,
                        chunk_text: row.get(2)?,
                        chunk_index: row.get(3)?,
                        created_at: timestamp(row.get(4)?),
                        similarity: 0.0,
                    },
                    decode_vector(&embedding),
                ))
            })?;

            let mut matches = Vec::new();
            for row in rows {
                let (mut hit, stored) = row?;
                if stored.len() != query.len() {
                    continue;
                }
                hit.similarity = normalize_similarity(cosine_similarity(&query, &stored));
                if hit.similarity >= similarity_threshold {
                    matches.push(hit);
                }
            }

            matches.sort_by(|a, b| {
                b.similarity
                    .partial_cmp(&a.similarity)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            matches.truncate(limit);
            Ok(matches)
        })
        .await
    }
}

#[async_trait]
impl KeywordSearch for SqliteStore {
    async fn keyword_search(
        &self,
        agent_id: &str,
        query: &KeywordQuery,
        limit: usize,
    ) -> std::result::Result<Vec<KeywordMatch>, SearchError> {
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let agent_id = agent_id.to_string();
        let expression = fts_match_expression(query);

        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.document_id, c.chunk_text, c.chunk_index, c.created_at,
                        d.title, d.file_type, d.upload_date
                 FROM chunks_fts
                 JOIN chunks c ON c.id = chunks_fts.chunk_id
                 LEFT JOIN documents d ON d.id = c.document_id
                 WHERE chunks_fts MATCH ?1 AND chunks_fts.agent_id = ?2
                 ORDER BY rank
                 LIMIT ?3",
            )?;

            let rows = stmt.query_map(params![expression, agent_id, sql_limit(limit)], |row| {
                Ok(KeywordMatch {
                    id: row.get(0)?,
                    document_id: row.get(1)?,
                    chunk_text: row.get(2)?,
                    chunk_index: row.get(3)?,
                    created_at: timestamp(row.get(4)?),
                    document_title: row.get(5)?,
                    document_file_type: row.get(6)?,
                    document_upload_date: optional_timestamp(row.get(7)?),
                })
            })?;

            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn get_documents(
        &self,
        ids: &[String],
    ) -> std::result::Result<Vec<Document>, SearchError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let ids = ids.to_vec();
        self.with_conn(move |conn| {
            let placeholders = vec!["?"; ids.len()].join(", ");
            let sql = format!(
                "SELECT id, title, file_type, upload_date FROM documents WHERE id IN ({})",
                placeholders
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(ids.iter()), read_document)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn recent_documents(
        &self,
        agent_id: &str,
        limit: usize,
    ) -> std::result::Result<Vec<Document>, SearchError> {
        let agent_id = agent_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, title, file_type, upload_date
                 FROM documents
                 WHERE agent_id = ?1
                 ORDER BY upload_date DESC NULLS LAST, rowid DESC
                 LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![agent_id, sql_limit(limit)], read_document)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("backend", &BACKEND)
            .field("connections", &self.pool.state().connections)
            .field("index", &self.index)
            .finish()
    }
}

/// Database migrations (each string is one migration)
const MIGRATIONS: &[&str] = &[
    // Migration 1: Initial schema
    r#"
    CREATE TABLE documents (
        id TEXT PRIMARY KEY,
        agent_id TEXT NOT NULL,
        title TEXT NOT NULL,
        file_type TEXT NOT NULL,
        upload_date INTEGER
    );

    CREATE INDEX idx_documents_agent ON documents(agent_id, upload_date);

    CREATE TABLE chunks (
        id TEXT PRIMARY KEY,
        agent_id TEXT NOT NULL,
        document_id TEXT NOT NULL,
        chunk_text TEXT NOT NULL,
        chunk_index INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        embedding BLOB,
        FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
    );

    CREATE INDEX idx_chunks_agent ON chunks(agent_id);
    CREATE INDEX idx_chunks_document ON chunks(document_id);

    CREATE VIRTUAL TABLE chunks_fts USING fts5(
        chunk_id UNINDEXED,
        agent_id UNINDEXED,
        chunk_text
    );
    "#,
];
