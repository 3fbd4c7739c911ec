//! # Strata Solver
//!
//! A Rust library for the linear algebra core of structured nonlinear
//! optimization: a parallel Schur-complement solver for the symmetric
//! indefinite KKT systems arising at interior-point iterations of
//! block-structured programs (multi-stage stochastic problems,
//! network-coupled subsystems, decomposable engineering models).
//!
//! ## Features
//!
//! - **Partitioned factorization**: per-partition diagonal blocks are
//!   factorized concurrently and condensed into a dense Schur complement
//!   over the coupling border
//! - **Pluggable block solvers**: sparse LDL^T (with inertia and
//!   regularization) or sparse Cholesky per sub-problem, dense LDL^T or LU
//!   for the border system
//! - **Partition derivation**: the partition vector is derived from a
//!   hierarchical problem graph of nodes, edges, and sub-blocks
//! - **Inertia and refinement**: inertia by Haynsworth additivity and an
//!   iterative-refinement hook, as required by interior-point outer loops
//!
//! ## Layout
//!
//! - [`core`](crate::core): problem graph, partition derivation, and the
//!   adapter feeding the outer solver
//! - [`linalg`]: sparse storage and views, block solvers, the
//!   Schur-complement solver itself

pub mod core;
pub mod error;
pub mod linalg;
pub mod logger;

// Re-export core types
pub use crate::core::{
    derive_partition, ColRef, EdgeModel, GraphLayout, Node, NlpAdapter, ProblemGraph,
};
pub use error::{SolverError, SolverResult};
pub use linalg::{
    DenseSolverKind, Inertia, KktSolver, SchurOptions, SchurSolver, SparseSolverKind,
    SymmetricCsc,
};
pub use logger::{init_logging, init_logging_with_level};
