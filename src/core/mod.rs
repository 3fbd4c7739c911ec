pub mod graph;
pub mod nlp;
pub mod partition;

// Re-export the main types for convenience
pub use graph::{
    BlockId, ColRef, Edge, EdgeId, EdgeModel, GraphError, GraphLayout, GraphResult,
    GraphStatistics, Node, NodeId, ProblemGraph,
};
pub use nlp::NlpAdapter;
pub use partition::derive_partition;
