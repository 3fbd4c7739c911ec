//! Sparse Cholesky block solver backed by faer.
//!
//! Suitable when a partition's diagonal block is positive definite (pure
//! least-squares stages, convex sub-problems without equality duals). The
//! factorization has no inertia capability; configurations that need
//! inertia should use the LDL^T solver instead.

use faer::linalg::solvers::Solve;
use faer::sparse::linalg::solvers;
use faer::sparse::{SparseColMat, Triplet};

use crate::linalg::csc::BlockView;
use crate::linalg::{BlockSolver, Dtype, Inertia, LinAlgError, LinAlgResult};

pub struct CholeskyBlockSolver {
    n: usize,
    symbolic_pattern: Option<solvers::SymbolicLlt<usize>>,
    factor: Option<solvers::Llt<usize, f64>>,
}

impl CholeskyBlockSolver {
    pub fn new(block: &BlockView) -> Self {
        Self {
            n: block.dim(),
            symbolic_pattern: None,
            factor: None,
        }
    }

    fn assemble(&self, block: &BlockView) -> LinAlgResult<SparseColMat<usize, f64>> {
        let triplets: Vec<Triplet<usize, usize, f64>> = block
            .entries()
            .map(|(r, c, v)| Triplet::new(r, c, v))
            .collect();
        SparseColMat::try_new_from_triplets(self.n, self.n, &triplets).map_err(|e| {
            LinAlgError::BadStructure(format!("block assembly for Cholesky failed: {e:?}"))
        })
    }
}

impl BlockSolver for CholeskyBlockSolver {
    fn factorize(&mut self, block: &BlockView) -> LinAlgResult<()> {
        self.factor = None;
        let matrix = self.assemble(block)?;

        if self.symbolic_pattern.is_none() {
            let symbolic = solvers::SymbolicLlt::try_new(matrix.symbolic(), faer::Side::Lower)
                .map_err(|e| {
                    LinAlgError::FactorizationFailed(format!(
                        "symbolic Cholesky analysis failed: {e:?}"
                    ))
                })?;
            self.symbolic_pattern = Some(symbolic);
        }

        let symbolic = self.symbolic_pattern.as_ref().unwrap();
        match solvers::Llt::try_new_with_symbolic(
            symbolic.clone(),
            matrix.as_ref(),
            faer::Side::Lower,
        ) {
            Ok(cholesky) => {
                self.factor = Some(cholesky);
                Ok(())
            }
            Err(e) => Err(LinAlgError::FactorizationFailed(format!(
                "Cholesky factorization failed (block not positive definite?): {e:?}"
            ))),
        }
    }

    fn solve_in_place(&self, x: &mut [f64]) {
        debug_assert_eq!(x.len(), self.n);
        let factor = self.factor.as_ref().expect("factorize before solve");
        let rhs = faer::Mat::from_fn(self.n, 1, |i, _| x[i]);
        let solution = factor.solve(rhs);
        for (i, xi) in x.iter_mut().enumerate() {
            *xi = solution[(i, 0)];
        }
    }

    fn inertia(&self) -> Option<Inertia> {
        None
    }

    fn provides_inertia(&self) -> bool {
        false
    }

    fn improve(&mut self) -> bool {
        false
    }

    fn supports(&self, dtype: Dtype) -> bool {
        matches!(dtype, Dtype::F32 | Dtype::F64)
    }

    fn name(&self) -> &'static str {
        "cholesky"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::csc::SymmetricCsc;

    fn whole_matrix_view(k: &SymmetricCsc) -> BlockView {
        let set: Vec<usize> = (0..k.dim()).collect();
        let mut consumed = vec![false; k.nnz()];
        let mut view = BlockView::extract(k, &set, &mut consumed);
        view.refresh(k.values());
        view
    }

    #[test]
    fn test_cholesky_solve() {
        let k = SymmetricCsc::from_triplets(2, &[(0, 0, 2.0), (1, 0, 1.0), (1, 1, 2.0)]).unwrap();
        let view = whole_matrix_view(&k);
        let mut solver = CholeskyBlockSolver::new(&view);
        solver.factorize(&view).unwrap();

        let mut x = vec![3.0, 3.0];
        solver.solve_in_place(&mut x);
        assert!((x[0] - 1.0).abs() < 1e-10);
        assert!((x[1] - 1.0).abs() < 1e-10);
        assert_eq!(solver.inertia(), None);
    }

    #[test]
    fn test_cholesky_rejects_indefinite_block() {
        let k = SymmetricCsc::from_triplets(2, &[(0, 0, 1.0), (1, 0, 2.0), (1, 1, 1.0)]).unwrap();
        let view = whole_matrix_view(&k);
        let mut solver = CholeskyBlockSolver::new(&view);
        assert!(solver.factorize(&view).is_err());
    }
}
