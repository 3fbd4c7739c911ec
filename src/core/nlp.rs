//! Bridge between the problem graph and the outer interior-point solver.
//!
//! [`NlpAdapter`] walks the graph once to fix the global index layout and
//! the Jacobian/Hessian coordinate structures, then forwards every numeric
//! evaluation to the per-edge models. Starting points, bound vectors, and
//! the KKT partition vector are assembled here as well.

use nalgebra::DVector;
use tracing::debug;

use crate::core::graph::{Edge, GraphError, GraphLayout, GraphResult, ProblemGraph};
use crate::core::partition::derive_partition;

/// Adapter exposing a problem graph through the flat vector interface the
/// outer solver consumes.
pub struct NlpAdapter<'g> {
    graph: &'g ProblemGraph,
    layout: GraphLayout,

    // Coordinate structures, enumerated once
    jac_rows: Vec<usize>,
    jac_cols: Vec<usize>,
    jac_spans: Vec<(usize, usize)>,
    hess_rows: Vec<usize>,
    hess_cols: Vec<usize>,
    hess_spans: Vec<(usize, usize)>,
}

impl<'g> NlpAdapter<'g> {
    pub fn new(graph: &'g ProblemGraph) -> GraphResult<Self> {
        if graph.num_nodes() == 0 {
            return Err(GraphError::EmptyGraph);
        }
        let layout = GraphLayout::new(graph);

        let mut jac_rows = Vec::new();
        let mut jac_cols = Vec::new();
        let mut jac_spans = Vec::with_capacity(graph.num_edges());
        let mut hess_rows = Vec::new();
        let mut hess_cols = Vec::new();
        let mut hess_spans = Vec::with_capacity(graph.num_edges());
        for (id, edge) in graph.edges() {
            let row_offset = layout.row_offset[id.0];

            let start = jac_rows.len();
            for (row, col) in edge.model().jacobian_structure() {
                jac_rows.push(row_offset + row);
                jac_cols.push(layout.column(edge, col));
            }
            jac_spans.push((start, jac_rows.len()));

            let start = hess_rows.len();
            for (a, b) in edge.model().hessian_structure() {
                let ca = layout.column(edge, a);
                let cb = layout.column(edge, b);
                // store the lower triangle
                hess_rows.push(ca.max(cb));
                hess_cols.push(ca.min(cb));
            }
            hess_spans.push((start, hess_rows.len()));
        }

        debug!(
            variables = layout.num_cols,
            constraints = layout.num_rows,
            slacks = layout.num_slacks,
            jacobian_nnz = jac_rows.len(),
            hessian_nnz = hess_rows.len(),
            "problem graph structure enumerated"
        );

        Ok(Self {
            graph,
            layout,
            jac_rows,
            jac_cols,
            jac_spans,
            hess_rows,
            hess_cols,
            hess_spans,
        })
    }

    pub fn layout(&self) -> &GraphLayout {
        &self.layout
    }

    pub fn num_variables(&self) -> usize {
        self.layout.num_cols
    }

    pub fn num_constraints(&self) -> usize {
        self.layout.num_rows
    }

    pub fn num_slacks(&self) -> usize {
        self.layout.num_slacks
    }

    /// Dimension of the KKT system: `[columns ; slacks ; rows]`.
    pub fn kkt_dim(&self) -> usize {
        self.layout.kkt_dim()
    }

    /// Partition vector for the Schur solver.
    pub fn kkt_partition(&self) -> GraphResult<Vec<usize>> {
        derive_partition(self.graph)
    }

    /// Starting primal point: the user start where one was given, otherwise
    /// zero clamped into the variable bounds.
    pub fn starting_primals(&self) -> Vec<f64> {
        let mut x = vec![0.0; self.layout.num_cols];
        for (id, node) in self.graph.nodes() {
            let offset = self.layout.col_offset[id.0];
            match node.start() {
                Some(start) => x[offset..offset + node.num_vars()].copy_from_slice(start),
                None => {
                    for i in 0..node.num_vars() {
                        x[offset + i] = 0.0f64.max(node.lower()[i]).min(node.upper()[i]);
                    }
                }
            }
        }
        x
    }

    /// Starting duals per constraint row: the edge's start where one was
    /// given, otherwise zero. Equality-row multipliers are sign-flipped to
    /// the solver's convention.
    pub fn starting_duals(&self) -> Vec<f64> {
        let mut duals = vec![0.0; self.layout.num_rows];
        for (id, edge) in self.graph.edges() {
            let offset = self.layout.row_offset[id.0];
            let start = edge
                .model()
                .dual_start()
                .unwrap_or_else(|| vec![0.0; edge.model().num_rows()]);
            debug_assert_eq!(start.len(), edge.model().num_rows());
            for (row, &value) in start.iter().enumerate() {
                duals[offset + row] = equality_dual_sign(edge, row) * value;
            }
        }
        duals
    }

    /// Variable bounds as `(lower, upper)` vectors.
    pub fn variable_bounds(&self) -> (Vec<f64>, Vec<f64>) {
        let mut lower = vec![f64::NEG_INFINITY; self.layout.num_cols];
        let mut upper = vec![f64::INFINITY; self.layout.num_cols];
        for (id, node) in self.graph.nodes() {
            let offset = self.layout.col_offset[id.0];
            lower[offset..offset + node.num_vars()].copy_from_slice(node.lower());
            upper[offset..offset + node.num_vars()].copy_from_slice(node.upper());
        }
        (lower, upper)
    }

    /// Constraint bounds as `(lower, upper)` vectors.
    pub fn constraint_bounds(&self) -> (Vec<f64>, Vec<f64>) {
        let mut lower = vec![0.0; self.layout.num_rows];
        let mut upper = vec![0.0; self.layout.num_rows];
        for (id, edge) in self.graph.edges() {
            let offset = self.layout.row_offset[id.0];
            let (lo, up) = edge.model().bounds();
            lower[offset..offset + lo.len()].copy_from_slice(&lo);
            upper[offset..offset + up.len()].copy_from_slice(&up);
        }
        (lower, upper)
    }

    /// Objective value at `x`.
    pub fn objective(&self, x: &[f64]) -> f64 {
        self.graph
            .edges()
            .map(|(_, edge)| edge.model().objective(&self.gather(edge, x)))
            .sum()
    }

    /// Objective gradient at `x`, written into `grad`.
    pub fn gradient(&self, x: &[f64], grad: &mut [f64]) {
        assert_eq!(grad.len(), self.layout.num_cols);
        grad.fill(0.0);
        let mut local = Vec::new();
        for (_, edge) in self.graph.edges() {
            let locals = self.gather(edge, x);
            local.clear();
            local.resize(locals.len(), 0.0);
            edge.model().gradient(&locals, &mut local);
            self.scatter_add(edge, &local, grad);
        }
    }

    /// Constraint values at `x`, written into `out`.
    pub fn eval_constraints(&self, x: &[f64], out: &mut [f64]) {
        assert_eq!(out.len(), self.layout.num_rows);
        for (id, edge) in self.graph.edges() {
            let offset = self.layout.row_offset[id.0];
            let locals = self.gather(edge, x);
            edge.model()
                .constraints(&locals, &mut out[offset..offset + edge.model().num_rows()]);
        }
    }

    /// Jacobian coordinate structure `(rows, cols)` in global indices.
    pub fn jacobian_structure(&self) -> (&[usize], &[usize]) {
        (&self.jac_rows, &self.jac_cols)
    }

    /// Jacobian values at `x` in structure order.
    pub fn eval_jacobian(&self, x: &[f64], values: &mut [f64]) {
        assert_eq!(values.len(), self.jac_rows.len());
        for (id, edge) in self.graph.edges() {
            let (start, end) = self.jac_spans[id.0];
            let locals = self.gather(edge, x);
            edge.model().jacobian(&locals, &mut values[start..end]);
        }
    }

    /// Hessian-of-Lagrangian coordinate structure `(rows, cols)`, lower
    /// triangle, in global variable indices.
    pub fn hessian_structure(&self) -> (&[usize], &[usize]) {
        (&self.hess_rows, &self.hess_cols)
    }

    /// Hessian values at `(x, duals)` in structure order.
    pub fn eval_hessian(&self, x: &[f64], duals: &[f64], values: &mut [f64]) {
        assert_eq!(duals.len(), self.layout.num_rows);
        assert_eq!(values.len(), self.hess_rows.len());
        for (id, edge) in self.graph.edges() {
            let (start, end) = self.hess_spans[id.0];
            if start == end {
                continue;
            }
            let offset = self.layout.row_offset[id.0];
            let locals = self.gather(edge, x);
            edge.model().hessian(
                &locals,
                &duals[offset..offset + edge.model().num_rows()],
                &mut values[start..end],
            );
        }
    }

    /// Concatenate the referenced nodes' variables in slot order.
    fn gather(&self, edge: &Edge, x: &[f64]) -> DVector<f64> {
        let total: usize = edge
            .nodes()
            .iter()
            .map(|&n| self.graph.node(n).num_vars())
            .sum();
        let mut locals = DVector::zeros(total);
        let mut at = 0;
        for &nid in edge.nodes() {
            let node = self.graph.node(nid);
            let offset = self.layout.col_offset[nid.0];
            for i in 0..node.num_vars() {
                locals[at + i] = x[offset + i];
            }
            at += node.num_vars();
        }
        locals
    }

    /// Accumulate an edge-local vector back into global columns.
    fn scatter_add(&self, edge: &Edge, local: &[f64], global: &mut [f64]) {
        let mut at = 0;
        for &nid in edge.nodes() {
            let node = self.graph.node(nid);
            let offset = self.layout.col_offset[nid.0];
            for i in 0..node.num_vars() {
                global[offset + i] += local[at + i];
            }
            at += node.num_vars();
        }
    }
}

/// Sign applied to a user-provided dual start: equality-row multipliers are
/// flipped to the solver's convention, inequality rows pass through.
fn equality_dual_sign(edge: &Edge, row: usize) -> f64 {
    let (lower, upper) = edge.model().bounds();
    if lower[row] == upper[row] {
        -1.0
    } else {
        1.0
    }
}
