//! Error types for the strata-solver library
//!
//! This module provides the main error and result types used throughout the
//! library. All errors use the `thiserror` crate for automatic trait
//! implementations.

use crate::core::graph;
use crate::linalg;
use thiserror::Error;

/// Main result type used throughout the strata-solver library
pub type SolverResult<T> = Result<T, SolverError>;

/// Main error type for the strata-solver library
#[derive(Debug, Clone, Error)]
pub enum SolverError {
    /// Linear algebra related errors (factorization, views, partitions)
    #[error("Linear algebra error: {0}")]
    LinearAlgebra(String),

    /// Problem graph construction or traversal errors
    #[error("Problem graph error: {0}")]
    Graph(String),

    /// Invalid input parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

// Convert module-specific errors to SolverError

impl From<linalg::LinAlgError> for SolverError {
    fn from(err: linalg::LinAlgError) -> Self {
        SolverError::LinearAlgebra(err.to_string())
    }
}

impl From<graph::GraphError> for SolverError {
    fn from(err: graph::GraphError) -> Self {
        SolverError::Graph(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solver_error_display() {
        let error = SolverError::LinearAlgebra("matrix is singular".to_string());
        assert_eq!(error.to_string(), "Linear algebra error: matrix is singular");
    }

    #[test]
    fn test_solver_error_from_linalg() {
        let inner = linalg::LinAlgError::SchurSingular;
        let error = SolverError::from(inner);
        match error {
            SolverError::LinearAlgebra(msg) => assert!(msg.contains("Schur")),
            _ => panic!("expected a linear algebra error"),
        }
    }

    #[test]
    fn test_solver_error_from_graph() {
        let inner = graph::GraphError::UnknownNode(7);
        let error = SolverError::from(inner);
        match error {
            SolverError::Graph(msg) => assert!(msg.contains('7')),
            _ => panic!("expected a graph error"),
        }
    }
}
