//! Partition derivation from the problem graph.
//!
//! Classifies every KKT row and column of a structured problem into the
//! coupling border (partition 0) or one of the independent sub-problems
//! (partitions `1..=K`), producing the partition vector the Schur solver
//! consumes. The vector is laid out `[columns ; slacks ; rows]`, matching
//! the assembled KKT system.
//!
//! Two regimes exist. Without sub-blocks, every node forms its own
//! partition: self-edges inherit the node's id, while linking edges are
//! promoted to the border together with the specific variable columns they
//! reference. With sub-blocks, each sub-block's whole span of columns and
//! rows takes the sub-block's id, root columns sit on the border, and root
//! edges promote their rows and referenced columns to the border.
//!
//! Because any constraint row spanning multiple partitions is promoted
//! along with the offending columns, no KKT non-zero ever ties two distinct
//! non-border partitions.

use crate::core::graph::{GraphError, GraphLayout, GraphResult, ProblemGraph};

/// Derive the partition vector `[columns ; slacks ; rows]` for the KKT
/// system induced by `graph`. Slack columns inherit the partition of their
/// constraint row.
pub fn derive_partition(graph: &ProblemGraph) -> GraphResult<Vec<usize>> {
    if graph.num_nodes() == 0 {
        return Err(GraphError::EmptyGraph);
    }
    let layout = GraphLayout::new(graph);
    let mut col_part = vec![0usize; layout.num_cols];
    let mut row_part = vec![0usize; layout.num_rows];

    if graph.sub_blocks().is_empty() {
        derive_one_level(graph, &layout, &mut col_part, &mut row_part);
    } else {
        derive_two_level(graph, &layout, &mut col_part, &mut row_part);
    }

    let mut partition = col_part;
    partition.reserve(layout.num_slacks + layout.num_rows);
    for row in 0..layout.num_rows {
        if layout.slack_of_row[row].is_some() {
            partition.push(row_part[row]);
        }
    }
    partition.extend_from_slice(&row_part);
    Ok(partition)
}

/// One-level regime: each root node is its own partition.
fn derive_one_level(
    graph: &ProblemGraph,
    layout: &GraphLayout,
    col_part: &mut [usize],
    row_part: &mut [usize],
) {
    let mut node_part = vec![0usize; graph.num_nodes()];
    for (position, &nid) in graph.block_nodes(graph.root()).iter().enumerate() {
        let pid = position + 1;
        node_part[nid.0] = pid;
        let offset = layout.col_offset[nid.0];
        for col in offset..offset + graph.node(nid).num_vars() {
            col_part[col] = pid;
        }
    }

    for &eid in graph.block_edges(graph.root()) {
        let edge = graph.edge(eid);
        let mut touched = edge.nodes().to_vec();
        touched.sort_unstable();
        touched.dedup();

        let offset = layout.row_offset[eid.0];
        let rows = offset..offset + edge.model().num_rows();
        if touched.len() == 1 {
            // self-edge: rows stay with the node
            let pid = node_part[touched[0].0];
            for row in rows {
                row_part[row] = pid;
            }
        } else {
            // linking edge: rows and the referenced columns join the border
            for row in rows {
                row_part[row] = 0;
            }
            for col_ref in edge.model().coupled_columns() {
                col_part[layout.column(edge, col_ref)] = 0;
            }
        }
    }
}

/// Two-level regime: each sub-block is one partition, the root is the
/// border.
fn derive_two_level(
    graph: &ProblemGraph,
    layout: &GraphLayout,
    col_part: &mut [usize],
    row_part: &mut [usize],
) {
    for (position, &bid) in graph.sub_blocks().iter().enumerate() {
        let pid = position + 1;
        for &nid in graph.block_nodes(bid) {
            let offset = layout.col_offset[nid.0];
            for col in offset..offset + graph.node(nid).num_vars() {
                col_part[col] = pid;
            }
        }
        for &eid in graph.block_edges(bid) {
            let offset = layout.row_offset[eid.0];
            for row in offset..offset + graph.edge(eid).model().num_rows() {
                row_part[row] = pid;
            }
        }
    }

    // Root columns are already 0; root edges pull their referenced columns
    // back onto the border even when those sit inside a sub-block.
    for &eid in graph.block_edges(graph.root()) {
        let edge = graph.edge(eid);
        let offset = layout.row_offset[eid.0];
        for row in offset..offset + edge.model().num_rows() {
            row_part[row] = 0;
        }
        for col_ref in edge.model().coupled_columns() {
            col_part[layout.column(edge, col_ref)] = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::graph::{ColRef, EdgeModel, Node, ProblemGraph};
    use nalgebra::DVector;

    struct StubEdge {
        rows: usize,
        lower: Vec<f64>,
        upper: Vec<f64>,
        structure: Vec<(usize, ColRef)>,
    }

    impl StubEdge {
        fn equality(rows: usize, structure: Vec<(usize, ColRef)>) -> Self {
            Self {
                rows,
                lower: vec![0.0; rows],
                upper: vec![0.0; rows],
                structure,
            }
        }

        fn inequality(rows: usize, structure: Vec<(usize, ColRef)>) -> Self {
            Self {
                upper: vec![1.0; rows],
                ..Self::equality(rows, structure)
            }
        }
    }

    impl EdgeModel for StubEdge {
        fn num_rows(&self) -> usize {
            self.rows
        }

        fn bounds(&self) -> (Vec<f64>, Vec<f64>) {
            (self.lower.clone(), self.upper.clone())
        }

        fn constraints(&self, _x: &DVector<f64>, out: &mut [f64]) {
            out.fill(0.0);
        }

        fn jacobian_structure(&self) -> Vec<(usize, ColRef)> {
            self.structure.clone()
        }

        fn jacobian(&self, _x: &DVector<f64>, out: &mut [f64]) {
            out.fill(1.0);
        }
    }

    #[test]
    fn test_one_level_self_and_linking_edges() {
        // Two nodes of two variables, one self-edge each, one linking edge
        // touching column 0 of both nodes.
        let mut graph = ProblemGraph::new();
        let root = graph.root();
        let a = graph.add_node(root, Node::new(2)).unwrap();
        let b = graph.add_node(root, Node::new(2)).unwrap();

        graph
            .add_edge(
                root,
                vec![a],
                Box::new(StubEdge::equality(1, vec![(0, ColRef::new(0, 0))])),
            )
            .unwrap();
        graph
            .add_edge(
                root,
                vec![b],
                Box::new(StubEdge::equality(1, vec![(0, ColRef::new(0, 1))])),
            )
            .unwrap();
        graph
            .add_edge(
                root,
                vec![a, b],
                Box::new(StubEdge::equality(
                    1,
                    vec![(0, ColRef::new(0, 0)), (0, ColRef::new(1, 0))],
                )),
            )
            .unwrap();

        let partition = derive_partition(&graph).unwrap();
        // columns: a0 promoted to border by the linking edge, a1 stays in 1,
        // b0 promoted, b1 stays in 2
        assert_eq!(&partition[..4], &[0, 1, 0, 2]);
        // no slacks; rows: self(1), self(2), linking(0)
        assert_eq!(&partition[4..], &[1, 2, 0]);
    }

    #[test]
    fn test_one_level_four_partitions_linking_edge() {
        // Four nodes of three variables; a root linking edge couples two
        // columns of each node. Exactly those eight columns join the border.
        let mut graph = ProblemGraph::new();
        let root = graph.root();
        let nodes: Vec<_> = (0..4)
            .map(|_| graph.add_node(root, Node::new(3)).unwrap())
            .collect();
        for &n in &nodes {
            graph
                .add_edge(
                    root,
                    vec![n],
                    Box::new(StubEdge::equality(1, vec![(0, ColRef::new(0, 2))])),
                )
                .unwrap();
        }
        let structure: Vec<(usize, ColRef)> = (0..4)
            .flat_map(|slot| [(0, ColRef::new(slot, 0)), (0, ColRef::new(slot, 1))])
            .collect();
        graph
            .add_edge(root, nodes.clone(), Box::new(StubEdge::equality(1, structure)))
            .unwrap();

        let partition = derive_partition(&graph).unwrap();
        for (i, &n) in nodes.iter().enumerate() {
            let pid = i + 1;
            let offset = n.0 * 3;
            assert_eq!(partition[offset], 0, "column 0 of node {i}");
            assert_eq!(partition[offset + 1], 0, "column 1 of node {i}");
            assert_eq!(partition[offset + 2], pid, "column 2 of node {i}");
        }
        // four self rows then the linking row
        assert_eq!(&partition[12..], &[1, 2, 3, 4, 0]);
    }

    #[test]
    fn test_two_level_spans_and_root_promotion() {
        let mut graph = ProblemGraph::new();
        let root = graph.root();
        let shared = graph.add_node(root, Node::new(1)).unwrap();

        let sub1 = graph.add_sub_block(root).unwrap();
        let n1 = graph.add_node(sub1, Node::new(2)).unwrap();
        graph
            .add_edge(
                sub1,
                vec![n1],
                Box::new(StubEdge::equality(1, vec![(0, ColRef::new(0, 0))])),
            )
            .unwrap();

        let sub2 = graph.add_sub_block(root).unwrap();
        let n2 = graph.add_node(sub2, Node::new(2)).unwrap();
        graph
            .add_edge(
                sub2,
                vec![n2],
                Box::new(StubEdge::equality(1, vec![(0, ColRef::new(0, 1))])),
            )
            .unwrap();

        // root edge couples the shared variable with column 0 of each block
        graph
            .add_edge(
                root,
                vec![shared, n1, n2],
                Box::new(StubEdge::equality(
                    1,
                    vec![
                        (0, ColRef::new(0, 0)),
                        (0, ColRef::new(1, 0)),
                        (0, ColRef::new(2, 0)),
                    ],
                )),
            )
            .unwrap();

        let partition = derive_partition(&graph).unwrap();
        // columns: shared=0 | n1 = [promoted, 1] | n2 = [promoted, 2]
        assert_eq!(&partition[..5], &[0, 0, 1, 0, 2]);
        // rows: sub1 edge, sub2 edge, root edge
        assert_eq!(&partition[5..], &[1, 2, 0]);
    }

    #[test]
    fn test_slacks_inherit_row_partition() {
        let mut graph = ProblemGraph::new();
        let root = graph.root();
        let a = graph.add_node(root, Node::new(1)).unwrap();
        let b = graph.add_node(root, Node::new(1)).unwrap();

        // inequality self-edge on b: its slack must land in b's partition
        graph
            .add_edge(
                root,
                vec![a],
                Box::new(StubEdge::equality(1, vec![(0, ColRef::new(0, 0))])),
            )
            .unwrap();
        graph
            .add_edge(
                root,
                vec![b],
                Box::new(StubEdge::inequality(1, vec![(0, ColRef::new(0, 0))])),
            )
            .unwrap();

        let partition = derive_partition(&graph).unwrap();
        // [col a, col b, slack of row 1, row 0, row 1]
        assert_eq!(partition, vec![1, 2, 2, 1, 2]);
    }

    #[test]
    fn test_empty_graph_is_rejected() {
        let graph = ProblemGraph::new();
        assert!(matches!(
            derive_partition(&graph),
            Err(GraphError::EmptyGraph)
        ));
    }
}
