//! Hierarchical problem graph.
//!
//! A [`ProblemGraph`] describes a structured nonlinear program as a root
//! block of *nodes* (each contributing primal variables) and *edges* (each
//! contributing constraint rows over the variables of the nodes it
//! references), optionally grouped into disjoint *sub-blocks*. Cross
//! sub-block coupling is only expressible through edges attached to the
//! root block, which is what makes the induced KKT system bordered
//! block-diagonal.
//!
//! Blocks, nodes, and edges live in arenas addressed by integer ids, so the
//! mutually referencing structure carries no ownership cycles. The
//! hierarchy is limited to two levels: sub-blocks cannot nest.

use std::fmt;

use nalgebra::DVector;
use thiserror::Error;

/// Result type for problem graph operations.
pub type GraphResult<T> = Result<T, GraphError>;

/// Problem graph error type.
#[derive(Debug, Clone, Error)]
pub enum GraphError {
    #[error("unknown node id {0}")]
    UnknownNode(usize),

    #[error("unknown block id {0}")]
    UnknownBlock(usize),

    #[error("sub-blocks cannot hold their own sub-blocks")]
    NestedSubBlock,

    #[error("edge on sub-block {block} references node {node} outside the block")]
    CrossBlockEdge { block: usize, node: usize },

    #[error("edge model dimension mismatch: expected {expected}, got {actual}")]
    ModelDimension { expected: usize, actual: usize },

    #[error("variable reference out of range: slot {slot}, index {index}")]
    BadColumnRef { slot: usize, index: usize },

    #[error("node bounds are inconsistent at index {0} (lower > upper)")]
    BadBounds(usize),

    #[error("problem graph has no nodes")]
    EmptyGraph,
}

/// Identifier of a node in the graph arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub usize);

/// Identifier of an edge in the graph arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EdgeId(pub usize);

/// Identifier of a block in the graph arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub usize);

/// A node contributes primal variables with bounds and an optional start.
#[derive(Debug, Clone)]
pub struct Node {
    num_vars: usize,
    lower: Vec<f64>,
    upper: Vec<f64>,
    start: Option<Vec<f64>>,
}

impl Node {
    /// Unbounded node with `num_vars` variables.
    pub fn new(num_vars: usize) -> Self {
        Self {
            num_vars,
            lower: vec![f64::NEG_INFINITY; num_vars],
            upper: vec![f64::INFINITY; num_vars],
            start: None,
        }
    }

    pub fn with_bounds(mut self, lower: Vec<f64>, upper: Vec<f64>) -> Self {
        assert_eq!(lower.len(), self.num_vars);
        assert_eq!(upper.len(), self.num_vars);
        self.lower = lower;
        self.upper = upper;
        self
    }

    pub fn with_start(mut self, start: Vec<f64>) -> Self {
        assert_eq!(start.len(), self.num_vars);
        self.start = Some(start);
        self
    }

    pub fn num_vars(&self) -> usize {
        self.num_vars
    }

    pub fn lower(&self) -> &[f64] {
        &self.lower
    }

    pub fn upper(&self) -> &[f64] {
        &self.upper
    }

    pub fn start(&self) -> Option<&[f64]> {
        self.start.as_deref()
    }
}

/// Reference to a variable column in edge-local coordinates: `slot` names
/// a position in the edge's node list, `index` a variable of that node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ColRef {
    pub slot: usize,
    pub index: usize,
}

impl ColRef {
    pub fn new(slot: usize, index: usize) -> Self {
        Self { slot, index }
    }
}

/// Per-edge evaluation model.
///
/// `x` passed to the evaluators is the concatenation of the referenced
/// nodes' variables in slot order. Structure methods are called once at
/// adapter construction; value methods once per iteration.
pub trait EdgeModel: Send + Sync {
    /// Number of constraint rows contributed by this edge.
    fn num_rows(&self) -> usize;

    /// Lower/upper bounds per row; equal bounds mark an equality row.
    fn bounds(&self) -> (Vec<f64>, Vec<f64>);

    /// Constraint values.
    fn constraints(&self, x: &DVector<f64>, out: &mut [f64]);

    /// Jacobian coordinate structure as `(local row, column)` pairs.
    fn jacobian_structure(&self) -> Vec<(usize, ColRef)>;

    /// Jacobian values in the order of [`EdgeModel::jacobian_structure`].
    fn jacobian(&self, x: &DVector<f64>, out: &mut [f64]);

    /// Hessian-of-Lagrangian coordinate structure (either triangle).
    fn hessian_structure(&self) -> Vec<(ColRef, ColRef)> {
        Vec::new()
    }

    /// Hessian values in the order of [`EdgeModel::hessian_structure`];
    /// `multipliers` holds this edge's row duals.
    fn hessian(&self, _x: &DVector<f64>, _multipliers: &[f64], _out: &mut [f64]) {}

    /// Objective contribution of this edge.
    fn objective(&self, _x: &DVector<f64>) -> f64 {
        0.0
    }

    /// Objective gradient in edge-local coordinates, accumulated into `out`.
    fn gradient(&self, _x: &DVector<f64>, _out: &mut [f64]) {}

    /// Variable columns this edge couples. The default derives them from
    /// the Jacobian structure; linking edges with non-constraint coupling
    /// can widen the set.
    fn coupled_columns(&self) -> Vec<ColRef> {
        let mut cols: Vec<ColRef> = self
            .jacobian_structure()
            .into_iter()
            .map(|(_, col)| col)
            .collect();
        cols.sort_unstable();
        cols.dedup();
        cols
    }

    /// User-provided dual start per row.
    fn dual_start(&self) -> Option<Vec<f64>> {
        None
    }
}

/// An edge couples the variables of the nodes it references.
pub struct Edge {
    nodes: Vec<NodeId>,
    model: Box<dyn EdgeModel>,
}

impl Edge {
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    pub fn model(&self) -> &dyn EdgeModel {
        self.model.as_ref()
    }
}

#[derive(Debug, Default)]
struct Block {
    nodes: Vec<NodeId>,
    edges: Vec<EdgeId>,
    children: Vec<BlockId>,
}

/// Arena-allocated two-level problem graph.
pub struct ProblemGraph {
    blocks: Vec<Block>,
    nodes: Vec<Node>,
    edges: Vec<Edge>,
}

impl Default for ProblemGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl ProblemGraph {
    /// Empty graph with a root block.
    pub fn new() -> Self {
        Self {
            blocks: vec![Block::default()],
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn root(&self) -> BlockId {
        BlockId(0)
    }

    /// Add a sub-block under the root.
    pub fn add_sub_block(&mut self, parent: BlockId) -> GraphResult<BlockId> {
        if parent != self.root() {
            return Err(GraphError::NestedSubBlock);
        }
        let id = BlockId(self.blocks.len());
        self.blocks.push(Block::default());
        self.blocks[parent.0].children.push(id);
        Ok(id)
    }

    /// Add a node to a block and return its id.
    pub fn add_node(&mut self, block: BlockId, node: Node) -> GraphResult<NodeId> {
        if block.0 >= self.blocks.len() {
            return Err(GraphError::UnknownBlock(block.0));
        }
        for i in 0..node.num_vars {
            if node.lower[i] > node.upper[i] {
                return Err(GraphError::BadBounds(i));
            }
        }
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        self.blocks[block.0].nodes.push(id);
        Ok(id)
    }

    /// Add an edge to a block and return its id.
    ///
    /// Edges on a sub-block may only reference that block's nodes; edges on
    /// the root may reference any node and are the only way to couple
    /// sub-blocks.
    pub fn add_edge(
        &mut self,
        block: BlockId,
        nodes: Vec<NodeId>,
        model: Box<dyn EdgeModel>,
    ) -> GraphResult<EdgeId> {
        if block.0 >= self.blocks.len() {
            return Err(GraphError::UnknownBlock(block.0));
        }
        for &nid in &nodes {
            if nid.0 >= self.nodes.len() {
                return Err(GraphError::UnknownNode(nid.0));
            }
            if block != self.root() && !self.blocks[block.0].nodes.contains(&nid) {
                return Err(GraphError::CrossBlockEdge {
                    block: block.0,
                    node: nid.0,
                });
            }
        }

        let num_rows = model.num_rows();
        let (lower, upper) = model.bounds();
        if lower.len() != num_rows || upper.len() != num_rows {
            return Err(GraphError::ModelDimension {
                expected: num_rows,
                actual: lower.len().min(upper.len()),
            });
        }
        for (row, col) in model.jacobian_structure() {
            if row >= num_rows {
                return Err(GraphError::ModelDimension {
                    expected: num_rows,
                    actual: row + 1,
                });
            }
            self.check_col_ref(&nodes, col)?;
        }
        for (a, b) in model.hessian_structure() {
            self.check_col_ref(&nodes, a)?;
            self.check_col_ref(&nodes, b)?;
        }

        let id = EdgeId(self.edges.len());
        self.edges.push(Edge { nodes, model });
        self.blocks[block.0].edges.push(id);
        Ok(id)
    }

    fn check_col_ref(&self, nodes: &[NodeId], col: ColRef) -> GraphResult<()> {
        let node = nodes
            .get(col.slot)
            .ok_or(GraphError::BadColumnRef {
                slot: col.slot,
                index: col.index,
            })?;
        if col.index >= self.nodes[node.0].num_vars {
            return Err(GraphError::BadColumnRef {
                slot: col.slot,
                index: col.index,
            });
        }
        Ok(())
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn edge(&self, id: EdgeId) -> &Edge {
        &self.edges[id.0]
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    /// Sub-blocks of the root, in creation order.
    pub fn sub_blocks(&self) -> &[BlockId] {
        &self.blocks[0].children
    }

    pub fn block_nodes(&self, block: BlockId) -> &[NodeId] {
        &self.blocks[block.0].nodes
    }

    pub fn block_edges(&self, block: BlockId) -> &[EdgeId] {
        &self.blocks[block.0].edges
    }

    /// All edges with their ids, in arena order.
    pub fn edges(&self) -> impl Iterator<Item = (EdgeId, &Edge)> {
        self.edges.iter().enumerate().map(|(i, e)| (EdgeId(i), e))
    }

    /// All nodes with their ids, in arena order.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }

    pub fn statistics(&self) -> GraphStatistics {
        let num_variables = self.nodes.iter().map(|n| n.num_vars).sum();
        let mut num_constraints = 0;
        let mut num_inequalities = 0;
        for edge in &self.edges {
            let (lower, upper) = edge.model.bounds();
            num_constraints += edge.model.num_rows();
            num_inequalities += lower
                .iter()
                .zip(&upper)
                .filter(|(l, u)| l != u)
                .count();
        }
        GraphStatistics {
            num_nodes: self.nodes.len(),
            num_edges: self.edges.len(),
            num_sub_blocks: self.blocks[0].children.len(),
            num_variables,
            num_constraints,
            num_inequalities,
        }
    }
}

/// Summary counts of a problem graph.
#[derive(Debug, Clone)]
pub struct GraphStatistics {
    pub num_nodes: usize,
    pub num_edges: usize,
    pub num_sub_blocks: usize,
    pub num_variables: usize,
    pub num_constraints: usize,
    pub num_inequalities: usize,
}

impl fmt::Display for GraphStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ProblemGraph Statistics:\n\
             Nodes: {} (sub-blocks: {})\n\
             Edges: {}\n\
             Variables: {}\n\
             Constraints: {} (inequalities: {})",
            self.num_nodes,
            self.num_sub_blocks,
            self.num_edges,
            self.num_variables,
            self.num_constraints,
            self.num_inequalities
        )
    }
}

/// Global index layout induced by a graph: variable columns in node order,
/// one slack column per inequality row, constraint rows in edge order. The
/// KKT system is laid out as `[columns ; slacks ; rows]`.
#[derive(Debug, Clone)]
pub struct GraphLayout {
    pub col_offset: Vec<usize>,
    pub row_offset: Vec<usize>,
    pub num_cols: usize,
    pub num_rows: usize,
    pub num_slacks: usize,
    /// Slack ordinal per constraint row, `None` for equality rows.
    pub slack_of_row: Vec<Option<usize>>,
}

impl GraphLayout {
    pub fn new(graph: &ProblemGraph) -> Self {
        let mut col_offset = Vec::with_capacity(graph.num_nodes());
        let mut num_cols = 0;
        for (_, node) in graph.nodes() {
            col_offset.push(num_cols);
            num_cols += node.num_vars();
        }

        let mut row_offset = Vec::with_capacity(graph.num_edges());
        let mut num_rows = 0;
        for (_, edge) in graph.edges() {
            row_offset.push(num_rows);
            num_rows += edge.model().num_rows();
        }

        let mut slack_of_row = vec![None; num_rows];
        let mut num_slacks = 0;
        for (id, edge) in graph.edges() {
            let (lower, upper) = edge.model().bounds();
            for r in 0..edge.model().num_rows() {
                if lower[r] != upper[r] {
                    slack_of_row[row_offset[id.0] + r] = Some(num_slacks);
                    num_slacks += 1;
                }
            }
        }

        Self {
            col_offset,
            row_offset,
            num_cols,
            num_rows,
            num_slacks,
            slack_of_row,
        }
    }

    /// Dimension of the assembled KKT system.
    pub fn kkt_dim(&self) -> usize {
        self.num_cols + self.num_slacks + self.num_rows
    }

    /// Global variable column of an edge-local reference.
    pub fn column(&self, edge: &Edge, col: ColRef) -> usize {
        self.col_offset[edge.nodes()[col.slot].0] + col.index
    }

    /// Global KKT index of a slack ordinal.
    pub fn slack_index(&self, ordinal: usize) -> usize {
        self.num_cols + ordinal
    }

    /// Global KKT index of a constraint row.
    pub fn row_index(&self, row: usize) -> usize {
        self.num_cols + self.num_slacks + row
    }
}
