//! Parallel Schur-complement solver for partitioned KKT systems.
//!
//! Given a symmetric KKT matrix in bordered block-diagonal form and a
//! partition vector assigning every row/column either to the coupling
//! border (id 0) or to one of `K` independent sub-problems (ids `1..=K`),
//! this solver factorizes
//!
//! ```text
//! S = K_0 - sum_k B_k^T K_k^{-1} B_k
//! ```
//!
//! with the diagonal blocks `K_k` handled concurrently by per-partition
//! workers and the dense Schur complement `S` assembled through a round of
//! color groups, so that no two workers ever write the same column of `S`
//! at the same time. Solves run the bordered forward/back substitution with
//! a sequential accumulation step in the middle.
//!
//! The matrix views, the workers, and their inner solvers are created once
//! at construction; subsequent factorizations only re-gather values.

use std::time::Instant;

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::linalg::csc::{BlockView, CouplingView, SymmetricCsc};
use crate::linalg::{
    BlockSolver, DenseSolver, Inertia, KktSolver, LinAlgError, LinAlgResult, SchurOptions,
};

/// Deterministic assignment of Schur columns to `(worker, round)` pairs.
///
/// Column `j` belongs to color `j mod K`; in round `q`, worker `k` owns
/// color `(q + k) mod K`. Over the `K` rounds every worker visits every
/// color exactly once, while within a round the workers hold pairwise
/// distinct colors.
#[derive(Debug, Clone, Copy)]
pub struct ColorSchedule {
    num_cols: usize,
    num_workers: usize,
}

impl ColorSchedule {
    pub fn new(num_cols: usize, num_workers: usize) -> Self {
        assert!(num_workers >= 1);
        Self {
            num_cols,
            num_workers,
        }
    }

    /// Number of sequential rounds in one factorization.
    pub fn rounds(&self) -> usize {
        self.num_workers
    }

    pub fn color_of(&self, col: usize) -> usize {
        col % self.num_workers
    }

    /// Color owned by `worker` during `round`.
    pub fn color_for(&self, worker: usize, round: usize) -> usize {
        (worker + round) % self.num_workers
    }

    /// Worker owning `color` during `round`.
    pub fn worker_for(&self, color: usize, round: usize) -> usize {
        (color + self.num_workers - round % self.num_workers) % self.num_workers
    }

    /// Columns of one color, ascending.
    pub fn columns(&self, color: usize) -> impl Iterator<Item = usize> + '_ {
        (color..self.num_cols).step_by(self.num_workers)
    }
}

/// One partition's state: the diagonal block, the coupling block into the
/// border, the inner sparse solver, and a scratch vector of the block's
/// dimension.
pub struct SubproblemWorker {
    index: usize,
    rows: Vec<usize>,
    block: BlockView,
    coupling: CouplingView,
    solver: Box<dyn BlockSolver>,
    scratch: Vec<f64>,
}

impl SubproblemWorker {
    /// Partition id (1-based).
    pub fn partition(&self) -> usize {
        self.index
    }

    pub fn dim(&self) -> usize {
        self.rows.len()
    }

    fn refresh(&mut self, parent_values: &[f64]) {
        self.block.refresh(parent_values);
        self.coupling.refresh(parent_values);
    }

    fn factorize_block(&mut self) -> LinAlgResult<()> {
        self.solver
            .factorize(&self.block)
            .map_err(|_| LinAlgError::SingularBlock {
                partition: self.index,
            })
    }

    /// Subtract this worker's contribution from the given Schur columns:
    /// for each column `j` with a non-empty coupling column,
    /// `S[:, j] -= B_k^T K_k^{-1} B_k[:, j]`. The caller guarantees that no
    /// other worker holds any of these columns concurrently.
    fn update_schur(&mut self, columns: &mut [(usize, &mut [f64])]) {
        for (col, s_col) in columns.iter_mut() {
            if !self.coupling.has_col(*col) {
                continue;
            }
            self.coupling.scatter_col(*col, &mut self.scratch);
            self.solver.solve_in_place(&mut self.scratch);
            for &c in self.coupling.nz_cols() {
                s_col[c] -= self.coupling.col_dot(c, &self.scratch);
            }
        }
    }

    /// `w_k = K_k^{-1} x[V_k]`.
    fn forward(&mut self, x: &[f64]) {
        for (li, &g) in self.rows.iter().enumerate() {
            self.scratch[li] = x[g];
        }
        self.solver.solve_in_place(&mut self.scratch);
    }

    /// `w_0 -= B_k^T w_k`.
    fn contrib(&self, w0: &mut [f64]) {
        self.coupling.transpose_matvec_sub(&self.scratch, w0);
    }

    /// `w_k = K_k^{-1} (x[V_k] - B_k w_0)` with `w_0` the solved border.
    fn back(&mut self, x: &[f64], w0: &[f64]) {
        for (li, &g) in self.rows.iter().enumerate() {
            self.scratch[li] = x[g];
        }
        self.coupling.matvec_sub(w0, &mut self.scratch);
        self.solver.solve_in_place(&mut self.scratch);
    }

    fn scatter_solution(&self, x: &mut [f64]) {
        for (li, &g) in self.rows.iter().enumerate() {
            x[g] = self.scratch[li];
        }
    }
}

impl std::fmt::Debug for SchurSolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchurSolver")
            .field("dim", &self.dim)
            .field("nnz", &self.nnz)
            .field("factorized", &self.factorized)
            .finish()
    }
}

/// Schur-complement solver over a partitioned symmetric KKT matrix.
pub struct SchurSolver {
    options: SchurOptions,
    dim: usize,
    nnz: usize,
    border: Vec<usize>,
    k0: BlockView,
    workers: Vec<SubproblemWorker>,
    schedule: ColorSchedule,
    /// Dense Schur complement, column-major `|V_0| x |V_0|`.
    schur: Vec<f64>,
    dense: Box<dyn DenseSolver>,
    w0: Vec<f64>,
    parallel: bool,
    factorized: bool,
}

impl SchurSolver {
    /// Build workers and views from the matrix pattern and the partition
    /// vector. Only the pattern of `kkt` matters here; values are consumed
    /// by [`SchurSolver::factorize`].
    pub fn new(kkt: &SymmetricCsc, options: SchurOptions) -> LinAlgResult<Self> {
        let partition = &options.partition;
        if partition.is_empty() {
            return Err(LinAlgError::InvalidPartition(
                "partition vector is required".to_string(),
            ));
        }
        if partition.len() != kkt.dim() {
            return Err(LinAlgError::InvalidPartition(format!(
                "partition length {} does not match matrix dimension {}",
                partition.len(),
                kkt.dim()
            )));
        }
        let num_workers = *partition.iter().max().unwrap();
        if num_workers == 0 {
            return Err(LinAlgError::InvalidPartition(
                "at least one sub-problem partition is required".to_string(),
            ));
        }

        let mut sets: Vec<Vec<usize>> = vec![Vec::new(); num_workers + 1];
        for (i, &p) in partition.iter().enumerate() {
            sets[p].push(i);
        }
        for (k, set) in sets.iter().enumerate().skip(1) {
            if set.is_empty() {
                return Err(LinAlgError::InvalidPartition(format!(
                    "partition {k} has no rows"
                )));
            }
        }

        let border = sets[0].clone();
        let mut consumed = vec![false; kkt.nnz()];
        let k0 = BlockView::extract(kkt, &border, &mut consumed);

        let mut workers = Vec::with_capacity(num_workers);
        for k in 1..=num_workers {
            let rows = std::mem::take(&mut sets[k]);
            let block = BlockView::extract(kkt, &rows, &mut consumed);
            let coupling = CouplingView::extract(kkt, &rows, &border, &mut consumed);
            let solver = options
                .subproblem_solver
                .build(&block, &options.subproblem_solver_options)?;
            let dim = rows.len();
            workers.push(SubproblemWorker {
                index: k,
                rows,
                block,
                coupling,
                solver,
                scratch: vec![0.0; dim],
            });
        }

        if let Some(pos) = consumed.iter().position(|&c| !c) {
            let (row, col) = locate_entry(kkt, pos);
            return Err(LinAlgError::InvalidPartition(format!(
                "entry ({row}, {col}) couples partitions {} and {} away from the border",
                partition[row], partition[col]
            )));
        }

        let parallel = workers.iter().all(|w| w.solver.is_thread_safe());
        if !parallel {
            warn!("a sub-problem solver is not thread-safe; worker loops run serially");
        }

        let n0 = border.len();
        let schedule = ColorSchedule::new(n0, num_workers);
        let dense = options.dense_solver.build(&options.dense_solver_options);

        Ok(Self {
            options,
            dim: kkt.dim(),
            nnz: kkt.nnz(),
            border,
            k0,
            workers,
            schedule,
            schur: vec![0.0; n0 * n0],
            dense,
            w0: vec![0.0; n0],
            parallel,
            factorized: false,
        })
    }

    pub fn num_partitions(&self) -> usize {
        self.workers.len()
    }

    pub fn border_dim(&self) -> usize {
        self.border.len()
    }

    pub fn schedule(&self) -> &ColorSchedule {
        &self.schedule
    }

    fn verbose(&self, level: tracing::Level) -> bool {
        level <= self.options.print_level
    }

    fn check_matrix(&self, kkt: &SymmetricCsc) -> LinAlgResult<()> {
        if kkt.dim() != self.dim {
            return Err(LinAlgError::DimensionMismatch {
                expected: self.dim,
                actual: kkt.dim(),
            });
        }
        if kkt.nnz() != self.nnz {
            return Err(LinAlgError::DimensionMismatch {
                expected: self.nnz,
                actual: kkt.nnz(),
            });
        }
        Ok(())
    }

    /// Refresh the views from `kkt`, factorize every diagonal block,
    /// assemble and factorize the dense Schur complement.
    pub fn factorize(&mut self, kkt: &SymmetricCsc) -> LinAlgResult<()> {
        self.check_matrix(kkt)?;
        self.factorized = false;
        let start = Instant::now();
        let values = kkt.values();
        let parallel = self.parallel;

        // Block factorizations come first: a singular block must leave the
        // Schur complement untouched. Failures are collected per worker and
        // the lowest failing partition wins.
        let results: Vec<LinAlgResult<()>> = if parallel {
            self.workers
                .par_iter_mut()
                .map(|w| {
                    w.refresh(values);
                    w.factorize_block()
                })
                .collect()
        } else {
            self.workers
                .iter_mut()
                .map(|w| {
                    w.refresh(values);
                    w.factorize_block()
                })
                .collect()
        };
        for result in results {
            result?;
        }

        let n0 = self.border.len();
        if n0 > 0 {
            self.k0.refresh(values);
            self.schur.fill(0.0);
            for (lr, lc, v) in self.k0.entries() {
                self.schur[lr + lc * n0] = v;
                if lr != lc {
                    self.schur[lc + lr * n0] = v;
                }
            }

            // Sequential color rounds; within a round, each worker receives
            // its color's columns as disjoint mutable slices of S.
            let workers = &mut self.workers;
            let schedule = &self.schedule;
            let schur = &mut self.schur;
            let num_workers = workers.len();
            for round in 0..schedule.rounds() {
                let mut buckets: Vec<Vec<(usize, &mut [f64])>> =
                    (0..num_workers).map(|_| Vec::new()).collect();
                for (col, chunk) in schur.chunks_mut(n0).enumerate() {
                    let owner = schedule.worker_for(schedule.color_of(col), round);
                    buckets[owner].push((col, chunk));
                }
                if parallel {
                    workers
                        .par_iter_mut()
                        .zip(buckets)
                        .for_each(|(w, mut cols)| w.update_schur(&mut cols));
                } else {
                    for (w, mut cols) in workers.iter_mut().zip(buckets) {
                        w.update_schur(&mut cols);
                    }
                }
            }
        }

        self.dense
            .factorize(&self.schur, n0)
            .map_err(|_| LinAlgError::SchurSingular)?;

        self.factorized = true;
        if self.verbose(tracing::Level::DEBUG) {
            debug!(
                partitions = self.workers.len(),
                border = n0,
                elapsed = ?start.elapsed(),
                "factorized partitioned KKT system"
            );
        }
        Ok(())
    }

    /// Bordered block elimination: forward solves per worker, sequential
    /// border accumulation, dense border solve, back substitution.
    fn bordered_solve(&mut self, x: &mut [f64]) {
        let parallel = self.parallel;

        for (li, &g) in self.border.iter().enumerate() {
            self.w0[li] = x[g];
        }

        {
            let x_ro: &[f64] = &*x;
            if parallel {
                self.workers.par_iter_mut().for_each(|w| w.forward(x_ro));
            } else {
                for w in &mut self.workers {
                    w.forward(x_ro);
                }
            }
        }

        // Accumulating into the shared border vector would race; this loop
        // stays sequential and is dominated by the solves above.
        for w in &self.workers {
            w.contrib(&mut self.w0);
        }

        if !self.border.is_empty() {
            self.dense.solve_in_place(&mut self.w0);
            for (li, &g) in self.border.iter().enumerate() {
                x[g] = self.w0[li];
            }
        }

        {
            let x_ro: &[f64] = &*x;
            let w0 = &self.w0;
            let workers = &mut self.workers;
            if parallel {
                workers.par_iter_mut().for_each(|w| w.back(x_ro, w0));
            } else {
                for w in workers.iter_mut() {
                    w.back(x_ro, w0);
                }
            }
        }
        for w in &self.workers {
            w.scatter_solution(x);
        }
    }

    /// Solve `K x = rhs` in place.
    pub fn solve_in_place(&mut self, x: &mut [f64]) -> LinAlgResult<()> {
        if !self.factorized {
            return Err(LinAlgError::FactorizationFailed(
                "solve requested before a successful factorization".to_string(),
            ));
        }
        if x.len() != self.dim {
            return Err(LinAlgError::DimensionMismatch {
                expected: self.dim,
                actual: x.len(),
            });
        }

        let rhs_backup = (self.options.refine_iters > 0).then(|| x.to_vec());
        self.bordered_solve(x);
        if let Some(b) = rhs_backup {
            self.refine_solution(x, &b);
        }
        Ok(())
    }

    /// Residual-correction sweeps using the carved views to rebuild `K x`.
    fn refine_solution(&mut self, x: &mut [f64], b: &[f64]) {
        let mut residual = vec![0.0; self.dim];
        let b_norm = norm2(b);
        let mut prev_norm = f64::INFINITY;

        for sweep in 0..self.options.refine_iters {
            self.apply_kkt(x, &mut residual);
            for (ri, &bi) in residual.iter_mut().zip(b) {
                *ri = bi - *ri;
            }
            let res_norm = norm2(&residual);
            if !res_norm.is_finite() || res_norm <= 1e-14 * (1.0 + b_norm) {
                break;
            }
            if res_norm >= prev_norm {
                if self.verbose(tracing::Level::WARN) {
                    warn!(sweep, res_norm, "iterative refinement stalled");
                }
                break;
            }
            prev_norm = res_norm;

            self.bordered_solve(&mut residual);
            for (xi, &di) in x.iter_mut().zip(&residual) {
                *xi += di;
            }
        }
    }

    /// `y = K x` reconstructed from the border, block, and coupling views.
    fn apply_kkt(&self, x: &[f64], y: &mut [f64]) {
        y.fill(0.0);
        self.k0.matvec_scattered(&self.border, x, y);
        for w in &self.workers {
            w.block.matvec_scattered(&w.rows, x, y);
            w.coupling.matvec_scattered(&w.rows, &self.border, x, y);
        }
    }

    /// Inertia of `K` as the Haynsworth sum of the block inertias and the
    /// inertia of the Schur complement.
    pub fn inertia(&self) -> LinAlgResult<Inertia> {
        if !self.factorized {
            return Err(LinAlgError::FactorizationFailed(
                "inertia requested before a successful factorization".to_string(),
            ));
        }
        let mut total = if self.border.is_empty() {
            Inertia::default()
        } else {
            self.dense
                .inertia()
                .ok_or(LinAlgError::InertiaUnavailable(self.dense.name()))?
        };
        for w in &self.workers {
            let block = w
                .solver
                .inertia()
                .ok_or(LinAlgError::InertiaUnavailable(w.solver.name()))?;
            total = total.add(block);
        }
        Ok(total)
    }

    pub fn is_inertia(&self) -> bool {
        let dense_ok = self.border.is_empty() || self.dense.provides_inertia();
        dense_ok && self.workers.iter().all(|w| w.solver.provides_inertia())
    }

    /// Ask every sub-problem solver to improve its next factorization.
    /// Returns `false` if any of them has no head-room left.
    pub fn improve(&mut self) -> bool {
        let mut all = true;
        let mut any = false;
        for w in &mut self.workers {
            let improved = w.solver.improve();
            all &= improved;
            any |= improved;
        }
        if any {
            self.factorized = false;
        }
        all
    }

    pub fn introduce(&self) -> String {
        format!(
            "Schur-complement KKT solver: {} sub-problems, border dimension {}, '{}' block solver, '{}' dense solver",
            self.workers.len(),
            self.border.len(),
            self.options.subproblem_solver.name(),
            self.options.dense_solver.name(),
        )
    }
}

impl KktSolver for SchurSolver {
    fn factorize(&mut self, kkt: &SymmetricCsc) -> LinAlgResult<()> {
        SchurSolver::factorize(self, kkt)
    }

    fn solve_in_place(&mut self, rhs: &mut [f64]) -> LinAlgResult<()> {
        SchurSolver::solve_in_place(self, rhs)
    }

    fn is_inertia(&self) -> bool {
        SchurSolver::is_inertia(self)
    }

    fn inertia(&self) -> LinAlgResult<Inertia> {
        SchurSolver::inertia(self)
    }

    fn improve(&mut self) -> bool {
        SchurSolver::improve(self)
    }

    fn introduce(&self) -> String {
        SchurSolver::introduce(self)
    }
}

fn locate_entry(kkt: &SymmetricCsc, pos: usize) -> (usize, usize) {
    let col = kkt
        .colptr()
        .partition_point(|&p| p <= pos)
        .saturating_sub(1);
    (kkt.rowind()[pos], col)
}

fn norm2(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::{DenseSolverKind, SchurOptions, SparseSolverKind};

    fn solver_for(kkt: &SymmetricCsc, partition: Vec<usize>) -> LinAlgResult<SchurSolver> {
        SchurSolver::new(kkt, SchurOptions::with_partition(partition))
    }

    #[test]
    fn test_diagonal_system_without_border() {
        // K = diag(2, 3, 2, 3) with two partitions and no coupling rows.
        let kkt = SymmetricCsc::from_triplets(
            4,
            &[(0, 0, 2.0), (1, 1, 3.0), (2, 2, 2.0), (3, 3, 3.0)],
        )
        .unwrap();
        let mut solver = solver_for(&kkt, vec![1, 1, 2, 2]).unwrap();
        assert_eq!(solver.border_dim(), 0);

        solver.factorize(&kkt).unwrap();
        let mut x = vec![1.0; 4];
        solver.solve_in_place(&mut x).unwrap();
        let expected = [0.5, 1.0 / 3.0, 0.5, 1.0 / 3.0];
        for i in 0..4 {
            assert!((x[i] - expected[i]).abs() < 1e-12, "x[{i}] = {}", x[i]);
        }
    }

    #[test]
    fn test_single_border_row() {
        // K = [[2, 0, 1], [0, 2, 1], [1, 1, 2]], border is the third row.
        let kkt = SymmetricCsc::from_triplets(
            3,
            &[(0, 0, 2.0), (1, 1, 2.0), (2, 0, 1.0), (2, 1, 1.0), (2, 2, 2.0)],
        )
        .unwrap();
        let mut solver = solver_for(&kkt, vec![1, 2, 0]).unwrap();
        solver.factorize(&kkt).unwrap();

        let mut x = vec![1.0, 1.0, 1.0];
        solver.solve_in_place(&mut x).unwrap();
        assert!((x[0] - 0.5).abs() < 1e-12);
        assert!((x[1] - 0.5).abs() < 1e-12);
        assert!(x[2].abs() < 1e-12);
    }

    #[test]
    fn test_indefinite_inertia() {
        // Same pattern with the border diagonal flipped negative.
        let kkt = SymmetricCsc::from_triplets(
            3,
            &[(0, 0, 2.0), (1, 1, 2.0), (2, 0, 1.0), (2, 1, 1.0), (2, 2, -4.0)],
        )
        .unwrap();
        let mut solver = solver_for(&kkt, vec![1, 2, 0]).unwrap();
        solver.factorize(&kkt).unwrap();

        assert!(solver.is_inertia());
        assert_eq!(
            solver.inertia().unwrap(),
            Inertia {
                positive: 2,
                zero: 0,
                negative: 1
            }
        );
    }

    #[test]
    fn test_singular_block_leaves_schur_untouched() {
        // Partition 2 carries an all-zero row.
        let kkt = SymmetricCsc::from_triplets(
            4,
            &[
                (0, 0, 2.0),
                (1, 1, 0.0),
                (2, 2, 3.0),
                (3, 3, 1.0),
                (3, 0, 1.0),
            ],
        )
        .unwrap();
        let mut solver = solver_for(&kkt, vec![1, 2, 2, 0]).unwrap();

        match solver.factorize(&kkt) {
            Err(LinAlgError::SingularBlock { partition }) => assert_eq!(partition, 2),
            other => panic!("expected SingularBlock, got {other:?}"),
        }
        assert!(solver.schur.iter().all(|&v| v == 0.0));
        assert!(solver.solve_in_place(&mut [0.0; 4]).is_err());
    }

    #[test]
    fn test_hollow_border_block_factorizes() {
        // The border block has no diagonal entries, so S = [[0, 1], [1, 0]]
        // and the default dense solver must pivot 2x2 instead of reporting
        // a singular Schur complement.
        let kkt =
            SymmetricCsc::from_triplets(4, &[(0, 0, 2.0), (1, 1, 2.0), (3, 2, 1.0)]).unwrap();
        let mut solver = solver_for(&kkt, vec![1, 2, 0, 0]).unwrap();
        solver.factorize(&kkt).unwrap();

        let mut x = vec![1.0; 4];
        solver.solve_in_place(&mut x).unwrap();
        assert!((x[0] - 0.5).abs() < 1e-12);
        assert!((x[1] - 0.5).abs() < 1e-12);
        assert!((x[2] - 1.0).abs() < 1e-12);
        assert!((x[3] - 1.0).abs() < 1e-12);

        assert_eq!(
            solver.inertia().unwrap(),
            Inertia {
                positive: 3,
                zero: 0,
                negative: 1
            }
        );
    }

    #[test]
    fn test_singular_schur_complement() {
        // S = 1 - 1 * 1 * 1 = 0
        let kkt =
            SymmetricCsc::from_triplets(2, &[(0, 0, 1.0), (1, 0, 1.0), (1, 1, 1.0)]).unwrap();
        let mut solver = solver_for(&kkt, vec![1, 0]).unwrap();
        match solver.factorize(&kkt) {
            Err(LinAlgError::SchurSingular) => {}
            other => panic!("expected SchurSingular, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_partition_cross_coupling() {
        // Entry (1, 0) ties partitions 1 and 2 without passing the border.
        let kkt =
            SymmetricCsc::from_triplets(2, &[(0, 0, 1.0), (1, 0, 1.0), (1, 1, 1.0)]).unwrap();
        match solver_for(&kkt, vec![1, 2]) {
            Err(LinAlgError::InvalidPartition(msg)) => {
                assert!(msg.contains("(1, 0)"), "message: {msg}")
            }
            other => panic!("expected InvalidPartition, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_partition_shapes() {
        let kkt = SymmetricCsc::from_triplets(2, &[(0, 0, 1.0), (1, 1, 1.0)]).unwrap();
        assert!(matches!(
            solver_for(&kkt, vec![]),
            Err(LinAlgError::InvalidPartition(_))
        ));
        assert!(matches!(
            solver_for(&kkt, vec![1]),
            Err(LinAlgError::InvalidPartition(_))
        ));
        assert!(matches!(
            solver_for(&kkt, vec![0, 0]),
            Err(LinAlgError::InvalidPartition(_))
        ));
        // id 2 present but id 1 empty
        assert!(matches!(
            solver_for(&kkt, vec![2, 0]),
            Err(LinAlgError::InvalidPartition(_))
        ));
    }

    #[test]
    fn test_rhs_dimension_mismatch() {
        let kkt = SymmetricCsc::from_triplets(2, &[(0, 0, 1.0), (1, 1, 1.0)]).unwrap();
        let mut solver = solver_for(&kkt, vec![1, 2]).unwrap();
        solver.factorize(&kkt).unwrap();
        let mut short = vec![1.0];
        assert!(matches!(
            solver.solve_in_place(&mut short),
            Err(LinAlgError::DimensionMismatch {
                expected: 2,
                actual: 1
            })
        ));
    }

    #[test]
    fn test_color_schedule_disjoint_within_rounds() {
        let schedule = ColorSchedule::new(11, 4);
        for round in 0..schedule.rounds() {
            let mut colors: Vec<usize> = (0..4).map(|w| schedule.color_for(w, round)).collect();
            colors.sort_unstable();
            colors.dedup();
            assert_eq!(colors.len(), 4, "colors collide in round {round}");
        }
        // Each worker visits every color exactly once across the rounds.
        for worker in 0..4 {
            let mut seen: Vec<usize> = (0..schedule.rounds())
                .map(|round| schedule.color_for(worker, round))
                .collect();
            seen.sort_unstable();
            assert_eq!(seen, vec![0, 1, 2, 3]);
        }
        // Colors partition the columns.
        let mut all: Vec<usize> = (0..4).flat_map(|c| schedule.columns(c)).collect();
        all.sort_unstable();
        assert_eq!(all, (0..11).collect::<Vec<_>>());
        assert_eq!(schedule.worker_for(schedule.color_for(2, 3), 3), 2);
    }

    #[test]
    fn test_refactorize_is_bit_for_bit_idempotent() {
        let kkt = SymmetricCsc::from_triplets(
            5,
            &[
                (0, 0, 4.0),
                (1, 1, 3.0),
                (2, 2, 5.0),
                (3, 3, 4.0),
                (4, 4, 6.0),
                (4, 0, 1.0),
                (4, 1, -2.0),
                (4, 2, 0.5),
                (4, 3, 1.5),
            ],
        )
        .unwrap();
        let mut solver = solver_for(&kkt, vec![1, 1, 2, 2, 0]).unwrap();
        let b = vec![1.0, -2.0, 3.0, 0.25, -1.0];

        solver.factorize(&kkt).unwrap();
        let mut x1 = b.clone();
        solver.solve_in_place(&mut x1).unwrap();
        let schur1 = solver.schur.clone();

        solver.factorize(&kkt).unwrap();
        let mut x2 = b.clone();
        solver.solve_in_place(&mut x2).unwrap();

        assert_eq!(solver.schur, schur1);
        assert_eq!(x1, x2);
    }

    #[test]
    fn test_refinement_tightens_solution() {
        let kkt = SymmetricCsc::from_triplets(
            3,
            &[(0, 0, 2.0), (1, 1, 2.0), (2, 0, 1.0), (2, 1, 1.0), (2, 2, 2.0)],
        )
        .unwrap();
        let mut options = SchurOptions::with_partition(vec![1, 2, 0]);
        options.refine_iters = 2;
        let mut solver = SchurSolver::new(&kkt, options).unwrap();
        solver.factorize(&kkt).unwrap();

        let b = vec![1.0, 2.0, -1.0];
        let mut x = b.clone();
        solver.solve_in_place(&mut x).unwrap();

        let mut kx = vec![0.0; 3];
        kkt.matvec(&x, &mut kx);
        for i in 0..3 {
            assert!((kx[i] - b[i]).abs() < 1e-12);
        }
    }

    #[test]
    fn test_cholesky_subproblem_solver() {
        let kkt = SymmetricCsc::from_triplets(
            3,
            &[(0, 0, 2.0), (1, 1, 2.0), (2, 0, 1.0), (2, 1, 1.0), (2, 2, 2.0)],
        )
        .unwrap();
        let mut options = SchurOptions::with_partition(vec![1, 2, 0]);
        options.subproblem_solver = SparseSolverKind::Cholesky;
        let mut solver = SchurSolver::new(&kkt, options).unwrap();
        solver.factorize(&kkt).unwrap();

        let mut x = vec![1.0, 1.0, 1.0];
        solver.solve_in_place(&mut x).unwrap();
        assert!((x[0] - 0.5).abs() < 1e-10);
        assert!((x[1] - 0.5).abs() < 1e-10);
        assert!(x[2].abs() < 1e-10);

        assert!(!solver.is_inertia());
        assert!(matches!(
            solver.inertia(),
            Err(LinAlgError::InertiaUnavailable("cholesky"))
        ));
    }

    #[test]
    fn test_lu_dense_solver_has_no_inertia() {
        let kkt = SymmetricCsc::from_triplets(
            3,
            &[(0, 0, 2.0), (1, 1, 2.0), (2, 0, 1.0), (2, 1, 1.0), (2, 2, 2.0)],
        )
        .unwrap();
        let mut options = SchurOptions::with_partition(vec![1, 2, 0]);
        options.dense_solver = DenseSolverKind::Lu;
        let mut solver = SchurSolver::new(&kkt, options).unwrap();
        solver.factorize(&kkt).unwrap();

        let mut x = vec![1.0, 1.0, 1.0];
        solver.solve_in_place(&mut x).unwrap();
        assert!(x[2].abs() < 1e-10);
        assert!(!solver.is_inertia());
        assert!(matches!(
            solver.inertia(),
            Err(LinAlgError::InertiaUnavailable("dense-lu"))
        ));
    }

    #[test]
    fn test_improve_invalidates_factorization() {
        let kkt = SymmetricCsc::from_triplets(2, &[(0, 0, 1.0), (1, 1, 1.0)]).unwrap();
        let mut solver = solver_for(&kkt, vec![1, 2]).unwrap();
        solver.factorize(&kkt).unwrap();

        assert!(solver.improve());
        assert!(solver.solve_in_place(&mut [1.0, 1.0]).is_err());

        solver.factorize(&kkt).unwrap();
        solver.solve_in_place(&mut [1.0, 1.0]).unwrap();

        // Escalation is bounded.
        let mut rounds = 0;
        while solver.improve() {
            rounds += 1;
            assert!(rounds < 64);
        }
    }

    #[test]
    fn test_introduce_describes_configuration() {
        let kkt = SymmetricCsc::from_triplets(2, &[(0, 0, 1.0), (1, 1, 1.0)]).unwrap();
        let solver = solver_for(&kkt, vec![1, 2]).unwrap();
        let description = solver.introduce();
        assert!(description.contains("2 sub-problems"));
        assert!(description.contains("ldl"));
    }
}
