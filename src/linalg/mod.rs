//! Linear algebra layer: sparse storage, block solvers, and the
//! Schur-complement KKT solver.
//!
//! The layer is organized around capability contracts: each diagonal block
//! of the partitioned KKT matrix is handled by a [`BlockSolver`], and the
//! dense Schur complement by a [`DenseSolver`]. Concrete implementations are
//! selected once at construction through the [`SparseSolverKind`] and
//! [`DenseSolverKind`] factories.

pub mod cholesky;
pub mod csc;
pub mod dense;
pub mod ldl;
pub mod schur;

use thiserror::Error;

pub use cholesky::CholeskyBlockSolver;
pub use csc::{BlockView, CouplingView, SymmetricCsc};
pub use dense::{DenseLdlSolver, DenseLuSolver};
pub use ldl::SparseLdlSolver;
pub use schur::{ColorSchedule, SchurSolver, SubproblemWorker};

/// Linear algebra error type.
#[derive(Debug, Clone, Error)]
pub enum LinAlgError {
    /// Partition vector missing, empty, or inconsistent with the matrix
    #[error("invalid partition: {0}")]
    InvalidPartition(String),

    /// A diagonal sub-block could not be factorized
    #[error("diagonal block of partition {partition} is singular")]
    SingularBlock { partition: usize },

    /// The dense Schur complement could not be factorized
    #[error("dense Schur complement factorization failed")]
    SchurSingular,

    /// Inertia was requested from a solver that cannot provide it
    #[error("inertia requested but the '{0}' solver does not provide it")]
    InertiaUnavailable(&'static str),

    /// Iterative refinement could not improve the residual
    #[error("iterative refinement stalled without improving the residual")]
    RefinementStalled,

    /// Right-hand side or matrix dimension does not match the solver
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Malformed CSC arrays
    #[error("matrix structure error: {0}")]
    BadStructure(String),

    /// Inner solver failure that is not a plain singularity report
    #[error("factorization failed: {0}")]
    FactorizationFailed(String),
}

/// Result type for the linear algebra layer.
pub type LinAlgResult<T> = Result<T, LinAlgError>;

/// Inertia of a symmetric matrix: counts of positive, zero, and negative
/// eigenvalues.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Inertia {
    pub positive: usize,
    pub zero: usize,
    pub negative: usize,
}

impl Inertia {
    pub fn add(self, other: Inertia) -> Inertia {
        Inertia {
            positive: self.positive + other.positive,
            zero: self.zero + other.zero,
            negative: self.negative + other.negative,
        }
    }

    /// Inertia from the diagonal of an LDL^T factorization.
    pub fn from_pivots(d: &[f64]) -> Inertia {
        let mut inertia = Inertia::default();
        for &di in d {
            if di > 0.0 {
                inertia.positive += 1;
            } else if di < 0.0 {
                inertia.negative += 1;
            } else {
                inertia.zero += 1;
            }
        }
        inertia
    }
}

/// Floating point widths a solver implementation may accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dtype {
    F32,
    F64,
}

/// Capability contract for per-partition sparse direct solvers.
///
/// A block solver is constructed from the non-zero pattern of its block
/// (symbolic phase); `factorize` consumes the current gathered values.
pub trait BlockSolver: Send {
    /// Numeric factorization of the block's current values.
    fn factorize(&mut self, block: &BlockView) -> LinAlgResult<()>;

    /// In-place solve with the most recent factorization.
    fn solve_in_place(&self, x: &mut [f64]);

    /// Inertia of the factored block, if this solver can report it.
    fn inertia(&self) -> Option<Inertia>;

    /// Whether this implementation is able to report inertia at all,
    /// independent of factorization state.
    fn provides_inertia(&self) -> bool;

    /// Iterative refinement hook: adjust internal parameters so that the
    /// next factorization is more robust. Returns `false` when no further
    /// improvement is possible.
    fn improve(&mut self) -> bool;

    /// Whether concurrent use from multiple worker threads is safe.
    /// Solvers wrapping non-reentrant native handles return `false`,
    /// which switches the worker loops to serial execution.
    fn is_thread_safe(&self) -> bool {
        true
    }

    /// Whether this solver accepts the given floating point width.
    fn supports(&self, dtype: Dtype) -> bool;

    fn name(&self) -> &'static str;
}

/// Capability contract for the dense Schur complement solver.
pub trait DenseSolver: Send {
    /// Factorize the `n` x `n` column-major matrix `a`.
    fn factorize(&mut self, a: &[f64], n: usize) -> LinAlgResult<()>;

    /// In-place solve with the most recent factorization.
    fn solve_in_place(&self, x: &mut [f64]);

    /// Inertia of the factored matrix, if this solver can report it.
    fn inertia(&self) -> Option<Inertia>;

    /// Whether this implementation is able to report inertia at all,
    /// independent of factorization state.
    fn provides_inertia(&self) -> bool;

    fn name(&self) -> &'static str;
}

/// Options forwarded to every per-partition block solver.
#[derive(Debug, Clone)]
pub struct SparseSolverOptions {
    /// Static regularization added to every diagonal entry before
    /// factorization.
    pub static_reg: f64,
    /// Pivots smaller in magnitude than this threshold are replaced,
    /// preserving their sign.
    pub min_pivot: f64,
    /// Upper bound for the regularization escalation driven by
    /// [`BlockSolver::improve`].
    pub max_static_reg: f64,
}

impl Default for SparseSolverOptions {
    fn default() -> Self {
        Self {
            static_reg: 0.0,
            min_pivot: 0.0,
            max_static_reg: 1e-4,
        }
    }
}

/// Options forwarded to the dense Schur solver.
#[derive(Debug, Clone)]
pub struct DenseSolverOptions {
    /// Relative pivot tolerance below which the matrix is declared singular.
    pub pivot_tol: f64,
}

impl Default for DenseSolverOptions {
    fn default() -> Self {
        Self { pivot_tol: 1e-14 }
    }
}

/// Factory for per-partition sparse direct solvers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SparseSolverKind {
    /// LDL^T factorization; reports inertia, handles indefinite blocks.
    #[default]
    Ldl,
    /// Sparse Cholesky (faer); positive definite blocks only, no inertia.
    Cholesky,
}

impl SparseSolverKind {
    pub fn build(
        &self,
        block: &BlockView,
        options: &SparseSolverOptions,
    ) -> LinAlgResult<Box<dyn BlockSolver>> {
        match self {
            SparseSolverKind::Ldl => Ok(Box::new(SparseLdlSolver::new(block, options.clone())?)),
            SparseSolverKind::Cholesky => Ok(Box::new(CholeskyBlockSolver::new(block))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SparseSolverKind::Ldl => "ldl",
            SparseSolverKind::Cholesky => "cholesky",
        }
    }
}

/// Factory for the dense Schur complement solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DenseSolverKind {
    /// Symmetric LDL^T; reports inertia.
    #[default]
    Ldl,
    /// LU with partial pivoting; robust, no inertia.
    Lu,
}

impl DenseSolverKind {
    pub fn build(&self, options: &DenseSolverOptions) -> Box<dyn DenseSolver> {
        match self {
            DenseSolverKind::Ldl => Box::new(DenseLdlSolver::new(options.clone())),
            DenseSolverKind::Lu => Box::new(DenseLuSolver::new(options.clone())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DenseSolverKind::Ldl => "dense-ldl",
            DenseSolverKind::Lu => "dense-lu",
        }
    }
}

/// Configuration of the Schur-complement solver.
///
/// All recognized settings are fields of this struct; there is no
/// string-keyed option dictionary, so unknown settings cannot be passed
/// silently.
#[derive(Debug, Clone)]
pub struct SchurOptions {
    /// Partition id per KKT row/column: `0` is the coupling border,
    /// `1..=K` are the independent sub-problems. Required.
    pub partition: Vec<usize>,
    /// Factory for the per-partition sparse solver.
    pub subproblem_solver: SparseSolverKind,
    /// Options forwarded to every per-partition solver.
    pub subproblem_solver_options: SparseSolverOptions,
    /// Factory for the dense Schur solver.
    pub dense_solver: DenseSolverKind,
    /// Options forwarded to the dense solver.
    pub dense_solver_options: DenseSolverOptions,
    /// Most verbose level this solver is allowed to log at.
    pub print_level: tracing::Level,
    /// Soft wall-clock budget in seconds; consumed by the outer solver,
    /// carried here so it travels with the rest of the configuration.
    pub max_cpu_time: f64,
    /// Post-solve iterative refinement sweeps (0 disables).
    pub refine_iters: usize,
}

impl Default for SchurOptions {
    fn default() -> Self {
        Self {
            partition: Vec::new(),
            subproblem_solver: SparseSolverKind::default(),
            subproblem_solver_options: SparseSolverOptions::default(),
            dense_solver: DenseSolverKind::default(),
            dense_solver_options: DenseSolverOptions::default(),
            print_level: tracing::Level::INFO,
            max_cpu_time: f64::INFINITY,
            refine_iters: 0,
        }
    }
}

impl SchurOptions {
    pub fn with_partition(partition: Vec<usize>) -> Self {
        Self {
            partition,
            ..Self::default()
        }
    }
}

/// Interface consumed by the outer interior-point solver.
pub trait KktSolver {
    /// Factorize the KKT matrix. The matrix must keep the non-zero
    /// pattern the solver was constructed with; only values may change.
    fn factorize(&mut self, kkt: &SymmetricCsc) -> LinAlgResult<()>;

    /// Solve `K x = rhs` in place using the current factorization.
    fn solve_in_place(&mut self, rhs: &mut [f64]) -> LinAlgResult<()>;

    /// Whether [`KktSolver::inertia`] is available with the configured
    /// backends.
    fn is_inertia(&self) -> bool;

    /// Inertia of the factored KKT matrix.
    fn inertia(&self) -> LinAlgResult<Inertia>;

    /// Iterative refinement hook; `false` when any backend is out of
    /// head-room.
    fn improve(&mut self) -> bool;

    /// Human-readable description of the configured solver.
    fn introduce(&self) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inertia_from_pivots() {
        let inertia = Inertia::from_pivots(&[2.0, -1.0, 3.0, 0.0]);
        assert_eq!(
            inertia,
            Inertia {
                positive: 2,
                zero: 1,
                negative: 1
            }
        );
    }

    #[test]
    fn test_inertia_add() {
        let a = Inertia {
            positive: 2,
            zero: 0,
            negative: 1,
        };
        let b = Inertia {
            positive: 1,
            zero: 1,
            negative: 0,
        };
        assert_eq!(
            a.add(b),
            Inertia {
                positive: 3,
                zero: 1,
                negative: 1
            }
        );
    }

    #[test]
    fn test_default_options() {
        let options = SchurOptions::default();
        assert!(options.partition.is_empty());
        assert_eq!(options.subproblem_solver, SparseSolverKind::Ldl);
        assert_eq!(options.dense_solver, DenseSolverKind::Ldl);
        assert_eq!(options.refine_iters, 0);
    }

    #[test]
    fn test_error_display() {
        let err = LinAlgError::SingularBlock { partition: 3 };
        assert_eq!(err.to_string(), "diagonal block of partition 3 is singular");
        let err = LinAlgError::DimensionMismatch {
            expected: 5,
            actual: 4,
        };
        assert_eq!(err.to_string(), "dimension mismatch: expected 5, got 4");
    }
}
