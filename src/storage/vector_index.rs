//! HNSW index over stored chunk embeddings
//!
//! One graph per (agent, dimension) pair, so a query only ever meets vectors
//! of its own agent and length. Ids are chunk rowids; the store maps
//! neighbours back to rows and re-scores them from the stored embedding.

use crate::config::VectorIndexConfig;
use crate::embedding::is_valid_vector;
use hnsw_rs::prelude::*;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;

/// hnsw_rs caps the layer count at 16
const MAX_LAYERS: usize = 16;

#[derive(Error, Debug)]
pub enum VectorIndexError {
    #[error("Invalid vector for chunk {id}")]
    InvalidVector { id: i64 },

    #[error("Invalid chunk id: {0}")]
    InvalidId(i64),

    #[error("Vector index lock poisoned")]
    Poisoned,
}

/// Nearest-neighbour candidate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexHit {
    /// Rowid of the chunk
    pub id: i64,
    /// Approximate cosine similarity reported by the graph
    pub score: f32,
}

type Graph = Hnsw<'static, f32, DistCosine>;
type GraphKey = (String, usize);

/// Per-agent HNSW graphs behind a shared lock
#[derive(Clone)]
pub struct VectorIndex {
    graphs: Arc<RwLock<HashMap<GraphKey, Arc<Graph>>>>,
    config: VectorIndexConfig,
}

impl VectorIndex {
    pub fn new(config: VectorIndexConfig) -> Self {
        Self {
            graphs: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    /// Insert a chunk embedding into its agent's graph
    pub fn insert(&self, agent_id: &str, id: i64, vector: &[f32]) -> Result<(), VectorIndexError> {
        if !is_valid_vector(vector) {
            return Err(VectorIndexError::InvalidVector { id });
        }
        let data_id = usize::try_from(id).map_err(|_| VectorIndexError::InvalidId(id))?;

        let graph = self.graph_for(agent_id, vector.len())?;
        graph.insert((vector, data_id));
        Ok(())
    }

    /// Up to `k` neighbours of `query` among the agent's vectors of the same length
    pub fn search(
        &self,
        agent_id: &str,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<IndexHit>, VectorIndexError> {
        if k == 0 || query.is_empty() {
            return Ok(Vec::new());
        }

        let graph = {
            let graphs = self.graphs.read().map_err(|_| VectorIndexError::Poisoned)?;
            match graphs.get(&(agent_id.to_string(), query.len())) {
                Some(graph) => Arc::clone(graph),
                None => return Ok(Vec::new()),
            }
        };

        let k = k.min(graph.get_nb_point());
        if k == 0 {
            return Ok(Vec::new());
        }
        let ef_search = self.config.hnsw_ef_search.max(k);
        let hits = graph
            .search(query, k, ef_search)
            .into_iter()
            .filter_map(|neighbour| {
                i64::try_from(neighbour.d_id).ok().map(|id| IndexHit {
                    id,
                    score: 1.0 - neighbour.distance,
                })
            })
            .collect();

        Ok(hits)
    }

    /// Drop every graph belonging to an agent
    pub fn remove_agent(&self, agent_id: &str) -> Result<(), VectorIndexError> {
        let mut graphs = self.graphs.write().map_err(|_| VectorIndexError::Poisoned)?;
        graphs.retain(|(agent, _), _| agent != agent_id);
        Ok(())
    }

    /// Number of indexed vectors across all graphs
    pub fn len(&self) -> usize {
        self.graphs
            .read()
            .map(|graphs| graphs.values().map(|g| g.get_nb_point()).sum())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn graph_for(&self, agent_id: &str, dimension: usize) -> Result<Arc<Graph>, VectorIndexError> {
        let key = (agent_id.to_string(), dimension);
        {
            let graphs = self.graphs.read().map_err(|_| VectorIndexError::Poisoned)?;
            if let Some(graph) = graphs.get(&key) {
                return Ok(Arc::clone(graph));
            }
        }

        let mut graphs = self.graphs.write().map_err(|_| VectorIndexError::Poisoned)?;
        let config = self.config;
        let graph = graphs.entry(key).or_insert_with(|| {
            Arc::new(Hnsw::<f32, DistCosine>::new(
                config.hnsw_m,
                config.max_elements,
                MAX_LAYERS,
                config.hnsw_ef_construction,
                DistCosine,
            ))
        });
        Ok(Arc::clone(graph))
    }
}

impl std::fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex")
            .field("vectors", &self.len())
            .field("config", &self.config)
            .finish()
    }
}
