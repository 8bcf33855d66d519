//! Shared, concurrently mergeable graph

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::debug;

use super::model::{Graph, GraphBatch, GraphRecord, MergeStats, NodeCategory};
use crate::{Error, Result};

/// The only writer of an investigation's graph.
///
/// Every [`clear`](Self::clear) starts a new generation; batches produced
/// for an older generation are rejected by [`merge_scoped`](Self::merge_scoped).
#[derive(Debug, Default)]
pub struct GraphBuilder {
    graph: RwLock<Graph>,
    generation: AtomicU64,
}

impl GraphBuilder {
    /// Empty builder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current generation
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Merge a batch into the current graph
    ///
    /// # Errors
    ///
    /// Returns [`Error::Invariant`] for a malformed batch.
    pub fn merge(&self, batch: GraphBatch) -> Result<MergeStats> {
        let mut graph = self.graph.write();
        graph.merge(batch)
    }

    /// Merge only if the graph has not been cleared since `generation`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] for a stale generation and
    /// [`Error::Invariant`] for a malformed batch.
    pub fn merge_scoped(&self, generation: u64, batch: GraphBatch) -> Result<MergeStats> {
        let mut graph = self.graph.write();
        let current = self.generation.load(Ordering::SeqCst);
        if current != generation {
            debug!(generation, current, "Dropping batch from a cleared graph");
            return Err(Error::Cancelled);
        }
        let stats = graph.merge(batch)?;
        debug!(
            nodes_added = stats.nodes_added,
            edges_added = stats.edges_added,
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "Merged batch"
        );
        Ok(stats)
    }

    /// Explicit re-categorization pass
    pub fn recategorize(&self, id: &str, category: NodeCategory) -> bool {
        self.graph.write().recategorize(id, category)
    }

    /// Drop everything and start a new generation
    pub fn clear(&self) -> u64 {
        let mut graph = self.graph.write();
        *graph = Graph::new();
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Replace the graph with a stored record (starts a new generation)
    ///
    /// # Errors
    ///
    /// Returns [`Error::Invariant`] if the record is malformed.
    pub fn restore(&self, record: GraphRecord) -> Result<u64> {
        let restored = Graph::from_record(record)?;
        let mut graph = self.graph.write();
        *graph = restored;
        Ok(self.generation.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Copy of the current graph
    #[must_use]
    pub fn snapshot(&self) -> Graph {
        self.graph.read().clone()
    }

    /// Serializable copy of the current graph
    #[must_use]
    pub fn record(&self) -> GraphRecord {
        self.graph.read().to_record()
    }

    /// Node and edge counts
    #[must_use]
    pub fn size(&self) -> (usize, usize) {
        let graph = self.graph.read();
        (graph.node_count(), graph.edge_count())
    }
}
