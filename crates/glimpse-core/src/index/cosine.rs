// Sharded cosine index with an HNSW graph for approximate search

use super::persist::{self, PersistedIndex};
use super::{validate_dimension, IndexOptions, SearchStrategy, VectorIndex};
use crate::corpus::EmbeddingMatrix;
use crate::error::IndexError;
use crate::similarity::{cosine_similarity, sort_by_descending_score};
use hnsw::{Hnsw, Searcher};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use rand::rngs::StdRng;
use rayon::prelude::*;
use space::{Metric, Neighbor};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::{debug, info, instrument};

/// Number of independently locked key shards.
const SHARD_COUNT: usize = 16;

/// Cosine distance metric for embedding vectors.
///
/// Computes `1 - cosine_similarity` in `[0, 2]`, scaled to `u32`. A zero
/// vector is maximally distant from everything.
struct CosineDistance;

impl Metric<Box<[f32]>> for CosineDistance {
    type Unit = u32;

    fn distance(&self, a: &Box<[f32]>, b: &Box<[f32]>) -> u32 {
        let a: &[f32] = a;
        let b: &[f32] = b;

        let dot: f32 = a.iter().zip(b.iter()).map(|(&x, &y)| x * y).sum();
        let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let mag_b: f32 = b.iter().map(|y| y * y).sum::<f32>().sqrt();

        if mag_a == 0.0 || mag_b == 0.0 {
            return u32::MAX;
        }

        let distance = 1.0 - (dot / (mag_a * mag_b)).clamp(-1.0, 1.0);
        (distance * (u32::MAX as f32 / 2.0)) as u32
    }
}

/// HNSW graph over a snapshot of the stored vectors.
///
/// Type parameters follow the usual M = 16, M0 = 2 * M.
struct Graph {
    hnsw: Hnsw<CosineDistance, Box<[f32]>, StdRng, 16, 32>,
    /// Graph position -> key
    keys: Vec<u64>,
}

type Shard = RwLock<HashMap<u64, Box<[f32]>>>;

/// In-memory cosine index.
///
/// Vectors live in [`SHARD_COUNT`] hash maps keyed by row, each behind its own
/// lock, so parallel inserts with distinct keys rarely contend. With
/// [`SearchStrategy::Approximate`] an HNSW graph is built from the shards on
/// [`CosineIndex::seal`] or on the first search after a mutation; candidates
/// found through the graph are rescored exactly before ranking.
pub struct CosineIndex {
    dimensions: usize,
    options: IndexOptions,
    shards: Box<[Shard]>,
    len: AtomicUsize,
    graph: RwLock<Option<Graph>>,
    /// Set by every mutation, cleared when the graph is rebuilt
    stale: AtomicBool,
}

impl CosineIndex {
    pub fn new(dimensions: usize, options: IndexOptions) -> Self {
        let shards = (0..SHARD_COUNT)
            .map(|_| RwLock::new(HashMap::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            dimensions,
            options,
            shards,
            len: AtomicUsize::new(0),
            graph: RwLock::new(None),
            stale: AtomicBool::new(true),
        }
    }

    /// Builds an index from every matrix row, keyed by row index.
    ///
    /// Rows are inserted in parallel.
    #[instrument(skip_all, fields(rows = matrix.rows(), dims = matrix.columns()))]
    pub fn from_matrix(matrix: &EmbeddingMatrix, options: IndexOptions) -> Result<Self, IndexError> {
        let index = Self::new(matrix.dimensions(), options);
        let rows = matrix.rows() as usize;
        index.reserve(rows);

        (0..rows).into_par_iter().try_for_each(|row| match matrix.row(row) {
            Some(vector) => index.add(row as u64, vector),
            None => Ok(()),
        })?;

        info!("Inserted {} rows", index.len());
        Ok(index)
    }

    /// Restores an index from a file written by [`VectorIndex::save`].
    ///
    /// Dimensions come from the file.
    pub fn open(path: &Path, options: IndexOptions) -> Result<Self, IndexError> {
        let persisted = persist::read_index(path)?;
        let index = Self::new(persisted.dimensions, options);
        index.replace_entries(persisted)?;
        Ok(index)
    }

    pub fn options(&self) -> IndexOptions {
        self.options
    }

    /// Builds the search graph now instead of on the next search.
    ///
    /// A no-op for [`SearchStrategy::Exact`].
    pub fn seal(&self) {
        if matches!(self.options.strategy, SearchStrategy::Approximate { .. }) {
            drop(self.graph());
        }
    }

    /// Whether `key` is stored.
    pub fn contains(&self, key: u64) -> bool {
        self.shard(key).read().contains_key(&key)
    }

    /// Whether `key` is stored with exactly `vector`, compared bit for bit.
    pub fn stores(&self, key: u64, vector: &[f32]) -> bool {
        self.shard(key).read().get(&key).is_some_and(|stored| {
            stored.len() == vector.len()
                && stored
                    .iter()
                    .zip(vector)
                    .all(|(a, b)| a.to_bits() == b.to_bits())
        })
    }

    fn shard(&self, key: u64) -> &Shard {
        &self.shards[(key % SHARD_COUNT as u64) as usize]
    }

    fn vector_score(&self, key: u64, query: &[f32]) -> Option<f32> {
        self.shard(key)
            .read()
            .get(&key)
            .map(|v| cosine_similarity(v, query))
    }

    /// All entries sorted by key.
    fn snapshot(&self) -> Vec<(u64, Box<[f32]>)> {
        let mut entries: Vec<(u64, Box<[f32]>)> = self
            .shards
            .iter()
            .flat_map(|shard| {
                shard
                    .read()
                    .iter()
                    .map(|(k, v)| (*k, v.clone()))
                    .collect::<Vec<_>>()
            })
            .collect();
        entries.sort_unstable_by_key(|(k, _)| *k);
        entries
    }

    /// Swaps in `persisted` only once every entry has been validated.
    fn replace_entries(&self, persisted: PersistedIndex) -> Result<(), IndexError> {
        validate_dimension(self.dimensions, persisted.dimensions)?;

        let mut staged: Vec<HashMap<u64, Box<[f32]>>> =
            (0..SHARD_COUNT).map(|_| HashMap::new()).collect();
        let count = persisted.entries.len();
        for (key, vector) in persisted.entries {
            validate_dimension(self.dimensions, vector.len())?;
            let slot = (key % SHARD_COUNT as u64) as usize;
            if staged[slot].insert(key, vector).is_some() {
                return Err(IndexError::DuplicateKey(key));
            }
        }

        let mut guards: Vec<_> = self.shards.iter().map(|s| s.write()).collect();
        for (guard, shard) in guards.iter_mut().zip(staged) {
            **guard = shard;
        }
        self.len.store(count, Ordering::SeqCst);
        self.stale.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Current graph, rebuilt first if any mutation happened since the last build.
    fn graph(&self) -> RwLockReadGuard<'_, Option<Graph>> {
        if self.stale.load(Ordering::SeqCst) {
            let mut graph = self.graph.write();
            // Cleared before the snapshot so inserts racing the build mark it stale again
            if self.stale.swap(false, Ordering::SeqCst) {
                *graph = Some(self.build_graph());
            }
            return RwLockWriteGuard::downgrade(graph);
        }
        self.graph.read()
    }

    fn build_graph(&self) -> Graph {
        let entries = self.snapshot();
        let mut hnsw = Hnsw::new(CosineDistance);
        let mut searcher = Searcher::default();
        let mut keys = Vec::with_capacity(entries.len());

        for (key, vector) in entries {
            hnsw.insert(vector, &mut searcher);
            keys.push(key);
        }

        debug!("Built HNSW graph over {} vectors", keys.len());
        Graph { hnsw, keys }
    }

    fn search_exact(&self, query: &[f32], k: usize) -> Vec<(u64, f32)> {
        let mut hits: Vec<(u64, f32)> = self
            .shards
            .par_iter()
            .flat_map_iter(|shard| {
                shard
                    .read()
                    .iter()
                    .map(|(key, v)| (*key, cosine_similarity(v, query)))
                    .collect::<Vec<_>>()
            })
            .collect();

        sort_by_descending_score(&mut hits);
        hits.truncate(k);
        hits
    }

    fn search_approximate(&self, query: &[f32], k: usize, ef_search: usize) -> Vec<(u64, f32)> {
        let guard = self.graph();
        let graph = match guard.as_ref() {
            Some(graph) if !graph.keys.is_empty() => graph,
            _ => return Vec::new(),
        };

        let actual_k = k.min(graph.keys.len());
        let mut neighbors = vec![
            Neighbor {
                index: !0,
                distance: !0
            };
            actual_k
        ];
        let ef = ef_search.max(actual_k.saturating_mul(2));
        let query_box: Box<[f32]> = query.into();

        graph
            .hnsw
            .nearest(&query_box, ef, &mut Searcher::default(), &mut neighbors);

        let mut hits: Vec<(u64, f32)> = neighbors
            .iter()
            .filter(|n| n.index != !0)
            .filter_map(|n| graph.keys.get(n.index).copied())
            .filter_map(|key| self.vector_score(key, query).map(|score| (key, score)))
            .collect();

        sort_by_descending_score(&mut hits);
        hits
    }
}

impl VectorIndex for CosineIndex {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn len(&self) -> usize {
        self.len.load(Ordering::SeqCst)
    }

    fn reserve(&self, additional: usize) {
        let per_shard = additional.div_ceil(SHARD_COUNT);
        for shard in self.shards.iter() {
            shard.write().reserve(per_shard);
        }
    }

    fn add(&self, key: u64, vector: &[f32]) -> Result<(), IndexError> {
        validate_dimension(self.dimensions, vector.len())?;

        {
            let mut shard = self.shard(key).write();
            if shard.contains_key(&key) {
                return Err(IndexError::DuplicateKey(key));
            }
            shard.insert(key, vector.into());
        }

        self.len.fetch_add(1, Ordering::SeqCst);
        self.stale.store(true, Ordering::SeqCst);
        Ok(())
    }

    #[instrument(skip_all, fields(k = k, index_size = self.len()))]
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<(u64, f32)>, IndexError> {
        validate_dimension(self.dimensions, query.len())?;

        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        Ok(match self.options.strategy {
            SearchStrategy::Exact => self.search_exact(query, k),
            SearchStrategy::Approximate { ef_search } => {
                self.search_approximate(query, k, ef_search)
            }
        })
    }

    #[instrument(skip_all, fields(path = %path.display()))]
    fn load(&self, path: &Path) -> Result<(), IndexError> {
        let persisted = persist::read_index(path)?;
        self.replace_entries(persisted)?;
        info!("Restored {} vectors", self.len());
        Ok(())
    }

    #[instrument(skip_all, fields(path = %path.display()))]
    fn save(&self, path: &Path) -> Result<(), IndexError> {
        let entries = self.snapshot();
        let borrowed: Vec<(u64, &[f32])> = entries.iter().map(|(k, v)| (*k, &v[..])).collect();
        persist::write_index(path, self.dimensions, &borrowed)
    }
}
