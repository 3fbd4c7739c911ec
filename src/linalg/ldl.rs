//! Sparse LDL^T block solver.
//!
//! Wraps the `ldl` crate's factorization routines for the symmetric
//! indefinite diagonal blocks of the partitioned KKT matrix. The blocks
//! arrive as lower-triangle views; the `ldl` kernel consumes the upper
//! triangle in CSC form, so this solver builds the transposed skeleton once
//! at construction together with a gather map back into the view's values.
//! Structurally missing diagonal entries are inserted as explicit zeros so
//! the factorization can regularize them.
//!
//! The diagonal `D` of the factorization yields both the singularity check
//! and the block's inertia.

use crate::linalg::csc::BlockView;
use crate::linalg::{
    BlockSolver, Dtype, Inertia, LinAlgError, LinAlgResult, SparseSolverOptions,
};

/// Gather index marking a synthetic (structurally absent) diagonal entry.
const SYNTHETIC: usize = usize::MAX;

/// First regularization magnitude tried by [`BlockSolver::improve`].
const INITIAL_REG: f64 = 1e-8;

/// LDL^T factorization of one diagonal block.
pub struct SparseLdlSolver {
    n: usize,

    // Upper-triangle CSC skeleton consumed by the ldl kernel
    up_colptr: Vec<usize>,
    up_rowind: Vec<usize>,
    up_values: Vec<f64>,
    /// Upper position -> position in the block view's values
    gather: Vec<usize>,

    // Symbolic factorization (fixed pattern)
    etree: Vec<Option<usize>>,
    l_nz: Vec<usize>,

    // Numeric factors
    l_p: Vec<usize>,
    l_i: Vec<usize>,
    l_x: Vec<f64>,
    d: Vec<f64>,
    d_inv: Vec<f64>,

    // Reusable factorization workspaces
    bwork: Vec<ldl::Marker>,
    iwork: Vec<usize>,
    fwork: Vec<f64>,

    static_reg: f64,
    min_pivot: f64,
    max_static_reg: f64,
    dynamic_bumps: u64,
    factored: bool,
}

impl SparseLdlSolver {
    /// Symbolic setup from the block's non-zero pattern.
    pub fn new(block: &BlockView, options: SparseSolverOptions) -> LinAlgResult<Self> {
        let n = block.dim();
        let (up_colptr, up_rowind, gather) = transpose_to_upper(block);

        let mut work = vec![0usize; n];
        let mut l_nz = vec![0usize; n];
        let mut etree = vec![None; n];
        if ldl::etree(n, &up_colptr, &up_rowind, &mut work, &mut l_nz, &mut etree).is_err() {
            return Err(LinAlgError::FactorizationFailed(
                "elimination tree computation failed".to_string(),
            ));
        }

        let nnz_l: usize = l_nz.iter().sum();
        let nnz_up = up_rowind.len();
        Ok(Self {
            n,
            up_colptr,
            up_rowind,
            up_values: vec![0.0; nnz_up],
            gather,
            etree,
            l_nz,
            l_p: vec![0; n + 1],
            l_i: vec![0; nnz_l],
            l_x: vec![0.0; nnz_l],
            d: vec![0.0; n],
            d_inv: vec![0.0; n],
            bwork: vec![ldl::Marker::Unused; n],
            iwork: vec![0; 3 * n],
            fwork: vec![0.0; n],
            static_reg: options.static_reg,
            min_pivot: options.min_pivot,
            max_static_reg: options.max_static_reg,
            dynamic_bumps: 0,
            factored: false,
        })
    }

    /// Current static regularization value.
    pub fn static_reg(&self) -> f64 {
        self.static_reg
    }

    /// Number of pivots replaced by dynamic regularization in the last
    /// factorization.
    pub fn dynamic_bumps(&self) -> u64 {
        self.dynamic_bumps
    }

    /// Diagonal of the most recent factorization.
    pub fn d_values(&self) -> Option<&[f64]> {
        self.factored.then_some(self.d.as_slice())
    }
}

/// Build the upper-triangle CSC skeleton of a lower-triangle block view,
/// with a gather map into the view's values. Inserts explicit diagonal
/// entries where the pattern lacks them ([`SYNTHETIC`] gather index).
fn transpose_to_upper(block: &BlockView) -> (Vec<usize>, Vec<usize>, Vec<usize>) {
    let n = block.dim();
    let colptr = block.colptr();
    let rowind = block.rowind();

    // A lower entry (i, j) lands in upper column i; a missing (c, c)
    // diagonal adds one synthetic entry to column c.
    let mut has_diag = vec![false; n];
    let mut counts = vec![0usize; n];
    for j in 0..n {
        for p in colptr[j]..colptr[j + 1] {
            let i = rowind[p];
            counts[i] += 1;
            if i == j {
                has_diag[j] = true;
            }
        }
    }
    for c in 0..n {
        if !has_diag[c] {
            counts[c] += 1;
        }
    }

    let mut up_colptr = vec![0usize; n + 1];
    for c in 0..n {
        up_colptr[c + 1] = up_colptr[c] + counts[c];
    }
    let nnz_up = up_colptr[n];
    let mut up_rowind = vec![0usize; nnz_up];
    let mut gather = vec![0usize; nnz_up];

    // Scanning lower columns in ascending order fills each upper column
    // with ascending rows; the diagonal is always the last entry.
    let mut head = up_colptr[..n].to_vec();
    for j in 0..n {
        for p in colptr[j]..colptr[j + 1] {
            let i = rowind[p];
            up_rowind[head[i]] = j;
            gather[head[i]] = p;
            head[i] += 1;
        }
    }
    for c in 0..n {
        if !has_diag[c] {
            up_rowind[head[c]] = c;
            gather[head[c]] = SYNTHETIC;
            head[c] += 1;
        }
    }

    (up_colptr, up_rowind, gather)
}

impl BlockSolver for SparseLdlSolver {
    fn factorize(&mut self, block: &BlockView) -> LinAlgResult<()> {
        self.factored = false;
        let values = block.values();
        for (dst, &src) in self.up_values.iter_mut().zip(&self.gather) {
            *dst = if src == SYNTHETIC { 0.0 } else { values[src] };
        }
        if self.static_reg != 0.0 {
            for c in 0..self.n {
                // rows are sorted, so the diagonal closes each column
                self.up_values[self.up_colptr[c + 1] - 1] += self.static_reg;
            }
        }

        self.bwork.fill(ldl::Marker::Unused);
        self.iwork.fill(0);
        self.fwork.fill(0.0);

        let result = ldl::factor(
            self.n,
            &self.up_colptr,
            &self.up_rowind,
            &self.up_values,
            &mut self.l_p,
            &mut self.l_i,
            &mut self.l_x,
            &mut self.d,
            &mut self.d_inv,
            &self.l_nz,
            &self.etree,
            &mut self.bwork,
            &mut self.iwork,
            &mut self.fwork,
        );
        if result.is_err() {
            return Err(LinAlgError::FactorizationFailed(
                "LDL^T factorization hit a zero pivot".to_string(),
            ));
        }
        if self.d.iter().any(|di| !di.is_finite()) {
            return Err(LinAlgError::FactorizationFailed(
                "LDL^T factorization produced non-finite pivots".to_string(),
            ));
        }

        self.dynamic_bumps = 0;
        if self.min_pivot > 0.0 {
            let replacement = (self.min_pivot * 2e6).min(1e-6);
            for i in 0..self.n {
                if self.d[i].abs() < self.min_pivot {
                    self.d[i] = if self.d[i] >= 0.0 {
                        replacement
                    } else {
                        -replacement
                    };
                    self.d_inv[i] = 1.0 / self.d[i];
                    self.dynamic_bumps += 1;
                }
            }
        }

        self.factored = true;
        Ok(())
    }

    fn solve_in_place(&self, x: &mut [f64]) {
        debug_assert!(self.factored);
        debug_assert_eq!(x.len(), self.n);
        ldl::solve(self.n, &self.l_p, &self.l_i, &self.l_x, &self.d_inv, x);
    }

    fn inertia(&self) -> Option<Inertia> {
        self.factored.then(|| Inertia::from_pivots(&self.d))
    }

    fn provides_inertia(&self) -> bool {
        true
    }

    fn improve(&mut self) -> bool {
        let next = if self.static_reg == 0.0 {
            INITIAL_REG
        } else {
            self.static_reg * 10.0
        };
        if next > self.max_static_reg {
            return false;
        }
        self.static_reg = next;
        self.factored = false;
        true
    }

    fn supports(&self, dtype: Dtype) -> bool {
        matches!(dtype, Dtype::F64)
    }

    fn name(&self) -> &'static str {
        "ldl"
    }
}
