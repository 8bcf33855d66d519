//! Investigation graph: model, concurrent builder and persistence

mod builder;
mod model;
mod store;

pub use builder::GraphBuilder;
pub use model::{
    CATEGORIZATION_FAILED_TAG, Edge, EdgeKey, EdgeType, Graph, GraphBatch, GraphRecord, MergeStats,
    Node, NodeCategory,
};
pub use store::{GraphStore, JsonFileGraphStore, MemoryGraphStore};
