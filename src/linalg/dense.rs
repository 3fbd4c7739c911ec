//! Dense factorizations for the Schur complement.
//!
//! The border system `S x = w` is dense, symmetric indefinite, and small
//! relative to the full KKT matrix, so it is handled in place with
//! column-major storage. Two implementations are provided: a symmetric
//! LDL^T with 1x1/2x2 diagonal pivoting whose pivot blocks give the
//! inertia of `S` (the default), and an LU with partial pivoting for
//! callers that do not need inertia.

use crate::linalg::{DenseSolver, DenseSolverOptions, Inertia, LinAlgError, LinAlgResult};

/// Balance point between a 1x1 and a 2x2 pivot, `(1 + sqrt(17)) / 8`.
const ALPHA: f64 = 0.6404;

/// One diagonal block of the factorization.
#[derive(Debug, Clone, Copy)]
enum PivotBlock {
    Single(f64),
    Double { a11: f64, a21: f64, a22: f64 },
}

/// Symmetric indefinite LDL^T factorization of a dense matrix.
///
/// Factors `P S P^T = L D L^T` with `L` unit lower triangular and `D`
/// block diagonal. At each step the largest remaining diagonal magnitude
/// is weighed against the largest remaining off-diagonal magnitude; when
/// the off-diagonal dominates, a symmetric 2x2 pivot is taken instead of
/// a 1x1. Border systems of interior-point KKT matrices routinely carry
/// zero or tiny diagonal entries next to healthy couplings, and only the
/// 2x2 pivots keep those factorizable. The pivot blocks expose the
/// inertia of `S`.
pub struct DenseLdlSolver {
    n: usize,
    /// Unit lower triangular factor, diagonal implicit, column-major.
    lower: Vec<f64>,
    /// Trailing-matrix workspace, both triangles kept in sync.
    work: Vec<f64>,
    /// Factor position -> original index.
    perm: Vec<usize>,
    pivots: Vec<PivotBlock>,
    pivot_tol: f64,
    factored: bool,
}

impl DenseLdlSolver {
    pub fn new(options: DenseSolverOptions) -> Self {
        Self {
            n: 0,
            lower: Vec::new(),
            work: Vec::new(),
            perm: Vec::new(),
            pivots: Vec::new(),
            pivot_tol: options.pivot_tol,
            factored: false,
        }
    }

    /// Symmetric interchange of rows/columns `i` and `j`, restricted to the
    /// active trailing block starting at `k`; carries the computed rows of
    /// `L` and the permutation along.
    fn interchange(&mut self, i: usize, j: usize, k: usize) {
        if i == j {
            return;
        }
        let n = self.n;
        self.perm.swap(i, j);
        for c in 0..k {
            self.lower.swap(i + c * n, j + c * n);
        }
        for t in k..n {
            self.work.swap(i + t * n, j + t * n);
        }
        for t in k..n {
            self.work.swap(t + i * n, t + j * n);
        }
    }
}

impl DenseSolver for DenseLdlSolver {
    fn factorize(&mut self, a: &[f64], n: usize) -> LinAlgResult<()> {
        assert_eq!(a.len(), n * n);
        self.n = n;
        self.factored = false;
        self.work.resize(n * n, 0.0);
        self.work.copy_from_slice(a);
        self.lower.clear();
        self.lower.resize(n * n, 0.0);
        self.perm.clear();
        self.perm.extend(0..n);
        self.pivots.clear();

        let scale = a.iter().fold(0.0f64, |m, &v| m.max(v.abs()));
        let threshold = self.pivot_tol * scale;

        let mut k = 0;
        while k < n {
            // Largest remaining diagonal and off-diagonal magnitudes.
            let mut mu0 = 0.0;
            let mut r = k;
            for i in k..n {
                let v = self.work[i + i * n].abs();
                if v > mu0 {
                    mu0 = v;
                    r = i;
                }
            }
            let mut mu1 = 0.0;
            let (mut p, mut q) = (k, k);
            for j in k..n {
                for i in (j + 1)..n {
                    let v = self.work[i + j * n].abs();
                    if v > mu1 {
                        mu1 = v;
                        p = i;
                        q = j;
                    }
                }
            }
            let largest = mu0.max(mu1);
            if largest <= threshold || !largest.is_finite() {
                return Err(LinAlgError::FactorizationFailed(format!(
                    "dense LDL^T factorization is rank deficient at column {k}"
                )));
            }

            if mu0 >= ALPHA * mu1 {
                // 1x1 pivot on the largest diagonal entry.
                self.interchange(k, r, k);
                let d = self.work[k + k * n];
                self.pivots.push(PivotBlock::Single(d));
                for i in (k + 1)..n {
                    self.lower[i + k * n] = self.work[i + k * n] / d;
                }
                for j in (k + 1)..n {
                    let bj = self.work[j + k * n];
                    for i in j..n {
                        let v = self.work[i + j * n] - self.lower[i + k * n] * bj;
                        self.work[i + j * n] = v;
                        self.work[j + i * n] = v;
                    }
                }
                k += 1;
            } else {
                // 2x2 pivot on the dominant off-diagonal pair.
                self.interchange(k, q, k);
                self.interchange(k + 1, p, k);
                let a11 = self.work[k + k * n];
                let a21 = self.work[(k + 1) + k * n];
                let a22 = self.work[(k + 1) + (k + 1) * n];
                // |a21| > mu0 / ALPHA here, so the block determinant is
                // bounded away from zero.
                let det = a11 * a22 - a21 * a21;
                self.pivots.push(PivotBlock::Double { a11, a21, a22 });
                for i in (k + 2)..n {
                    let b1 = self.work[i + k * n];
                    let b2 = self.work[i + (k + 1) * n];
                    self.lower[i + k * n] = (b1 * a22 - b2 * a21) / det;
                    self.lower[i + (k + 1) * n] = (b2 * a11 - b1 * a21) / det;
                }
                for j in (k + 2)..n {
                    let bj1 = self.work[j + k * n];
                    let bj2 = self.work[j + (k + 1) * n];
                    for i in j..n {
                        let v = self.work[i + j * n]
                            - self.lower[i + k * n] * bj1
                            - self.lower[i + (k + 1) * n] * bj2;
                        self.work[i + j * n] = v;
                        self.work[j + i * n] = v;
                    }
                }
                k += 2;
            }
        }

        self.factored = true;
        Ok(())
    }

    fn solve_in_place(&self, x: &mut [f64]) {
        debug_assert!(self.factored);
        debug_assert_eq!(x.len(), self.n);
        let n = self.n;
        let mut y = vec![0.0; n];
        for (pos, &orig) in self.perm.iter().enumerate() {
            y[pos] = x[orig];
        }

        // L z = P b (unit diagonal; the 2x2 blocks leave L identity there)
        for c in 0..n {
            let yc = y[c];
            for i in (c + 1)..n {
                y[i] -= self.lower[i + c * n] * yc;
            }
        }
        // D w = z, block by block
        let mut pos = 0;
        for pivot in &self.pivots {
            match *pivot {
                PivotBlock::Single(d) => {
                    y[pos] /= d;
                    pos += 1;
                }
                PivotBlock::Double { a11, a21, a22 } => {
                    let det = a11 * a22 - a21 * a21;
                    let (z1, z2) = (y[pos], y[pos + 1]);
                    y[pos] = (a22 * z1 - a21 * z2) / det;
                    y[pos + 1] = (a11 * z2 - a21 * z1) / det;
                    pos += 2;
                }
            }
        }
        // L^T x = w
        for c in (0..n).rev() {
            let mut yc = y[c];
            for i in (c + 1)..n {
                yc -= self.lower[i + c * n] * y[i];
            }
            y[c] = yc;
        }

        for (pos, &orig) in self.perm.iter().enumerate() {
            x[orig] = y[pos];
        }
    }

    fn inertia(&self) -> Option<Inertia> {
        if !self.factored {
            return None;
        }
        let mut inertia = Inertia::default();
        for pivot in &self.pivots {
            match *pivot {
                PivotBlock::Single(d) => {
                    if d > 0.0 {
                        inertia.positive += 1;
                    } else if d < 0.0 {
                        inertia.negative += 1;
                    } else {
                        inertia.zero += 1;
                    }
                }
                PivotBlock::Double { a11, a21, a22 } => {
                    let det = a11 * a22 - a21 * a21;
                    let trace = a11 + a22;
                    if det < 0.0 {
                        inertia.positive += 1;
                        inertia.negative += 1;
                    } else if det > 0.0 {
                        if trace > 0.0 {
                            inertia.positive += 2;
                        } else {
                            inertia.negative += 2;
                        }
                    } else {
                        inertia.zero += 1;
                        if trace > 0.0 {
                            inertia.positive += 1;
                        } else if trace < 0.0 {
                            inertia.negative += 1;
                        } else {
                            inertia.zero += 1;
                        }
                    }
                }
            }
        }
        Some(inertia)
    }

    fn provides_inertia(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "dense-ldl"
    }
}

/// Dense LU with partial pivoting.
pub struct DenseLuSolver {
    n: usize,
    lu: Vec<f64>,
    pivots: Vec<usize>,
    pivot_tol: f64,
    factored: bool,
}

impl DenseLuSolver {
    pub fn new(options: DenseSolverOptions) -> Self {
        Self {
            n: 0,
            lu: Vec::new(),
            pivots: Vec::new(),
            pivot_tol: options.pivot_tol,
            factored: false,
        }
    }
}

impl DenseSolver for DenseLuSolver {
    fn factorize(&mut self, a: &[f64], n: usize) -> LinAlgResult<()> {
        assert_eq!(a.len(), n * n);
        self.n = n;
        self.factored = false;
        self.lu.resize(n * n, 0.0);
        self.lu.copy_from_slice(a);
        self.pivots.clear();
        self.pivots.extend(0..n);

        let scale = a.iter().fold(0.0f64, |m, &v| m.max(v.abs()));
        let threshold = self.pivot_tol * scale;

        let lu = &mut self.lu;
        for k in 0..n {
            // Find pivot in column k
            let mut pivot = k;
            let mut max_val = lu[k + k * n].abs();
            for i in (k + 1)..n {
                let val = lu[i + k * n].abs();
                if val > max_val {
                    max_val = val;
                    pivot = i;
                }
            }
            if max_val <= threshold || !max_val.is_finite() {
                return Err(LinAlgError::FactorizationFailed(format!(
                    "zero pivot at column {k} of the dense LU factorization"
                )));
            }
            if pivot != k {
                for c in 0..n {
                    lu.swap(k + c * n, pivot + c * n);
                }
            }
            self.pivots[k] = pivot;

            let diag = lu[k + k * n];
            for i in (k + 1)..n {
                lu[i + k * n] /= diag;
            }
            for c in (k + 1)..n {
                let ukc = lu[k + c * n];
                if ukc == 0.0 {
                    continue;
                }
                for i in (k + 1)..n {
                    lu[i + c * n] -= lu[i + k * n] * ukc;
                }
            }
        }

        self.factored = true;
        Ok(())
    }

    fn solve_in_place(&self, x: &mut [f64]) {
        debug_assert!(self.factored);
        debug_assert_eq!(x.len(), self.n);
        let n = self.n;
        let lu = &self.lu;

        for k in 0..n {
            x.swap(k, self.pivots[k]);
        }
        // L z = P b (unit diagonal)
        for k in 0..n {
            let xk = x[k];
            for i in (k + 1)..n {
                x[i] -= lu[i + k * n] * xk;
            }
        }
        // U x = z
        for k in (0..n).rev() {
            x[k] /= lu[k + k * n];
            let xk = x[k];
            for i in 0..k {
                x[i] -= lu[i + k * n] * xk;
            }
        }
    }

    fn inertia(&self) -> Option<Inertia> {
        None
    }

    fn provides_inertia(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "dense-lu"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col_major(rows: &[&[f64]]) -> (Vec<f64>, usize) {
        let n = rows.len();
        let mut a = vec![0.0; n * n];
        for (i, row) in rows.iter().enumerate() {
            for (j, &v) in row.iter().enumerate() {
                a[i + j * n] = v;
            }
        }
        (a, n)
    }

    fn residual(a: &[f64], n: usize, x: &[f64], b: &[f64]) -> f64 {
        (0..n)
            .map(|i| {
                let ri: f64 = (0..n).map(|j| a[i + j * n] * x[j]).sum::<f64>() - b[i];
                ri * ri
            })
            .sum::<f64>()
            .sqrt()
    }

    #[test]
    fn test_ldl_solve_spd() {
        let (a, n) = col_major(&[&[4.0, 1.0, 0.0], &[1.0, 3.0, 1.0], &[0.0, 1.0, 2.0]]);
        let mut solver = DenseLdlSolver::new(DenseSolverOptions::default());
        solver.factorize(&a, n).unwrap();

        let b = [5.0, 5.0, 3.0];
        let mut x = b;
        solver.solve_in_place(&mut x);
        assert!(residual(&a, n, &x, &b) < 1e-12);
        assert_eq!(
            solver.inertia(),
            Some(Inertia {
                positive: 3,
                zero: 0,
                negative: 0
            })
        );
    }

    #[test]
    fn test_ldl_indefinite_inertia() {
        let (a, n) = col_major(&[&[2.0, 1.0], &[1.0, -3.0]]);
        let mut solver = DenseLdlSolver::new(DenseSolverOptions::default());
        solver.factorize(&a, n).unwrap();
        assert_eq!(
            solver.inertia(),
            Some(Inertia {
                positive: 1,
                zero: 0,
                negative: 1
            })
        );
    }

    #[test]
    fn test_ldl_two_by_two_pivot_on_hollow_matrix() {
        // Zero diagonal, nonsingular: only a 2x2 pivot factorizes this.
        let (a, n) = col_major(&[&[0.0, 1.0], &[1.0, 0.0]]);
        let mut solver = DenseLdlSolver::new(DenseSolverOptions::default());
        solver.factorize(&a, n).unwrap();

        let b = [1.0, 2.0];
        let mut x = b;
        solver.solve_in_place(&mut x);
        assert!((x[0] - 2.0).abs() < 1e-12);
        assert!((x[1] - 1.0).abs() < 1e-12);
        assert_eq!(
            solver.inertia(),
            Some(Inertia {
                positive: 1,
                zero: 0,
                negative: 1
            })
        );
    }

    #[test]
    fn test_ldl_mixed_pivot_sizes() {
        // Hollow 2x2 block next to an SPD block; eigenvalues {-2, 2, 2, 4}.
        let (a, n) = col_major(&[
            &[0.0, 2.0, 0.0, 0.0],
            &[2.0, 0.0, 0.0, 0.0],
            &[0.0, 0.0, 3.0, 1.0],
            &[0.0, 0.0, 1.0, 3.0],
        ]);
        let mut solver = DenseLdlSolver::new(DenseSolverOptions::default());
        solver.factorize(&a, n).unwrap();

        let b = [1.0, -1.0, 2.0, 0.5];
        let mut x = b;
        solver.solve_in_place(&mut x);
        assert!(residual(&a, n, &x, &b) < 1e-12);
        assert_eq!(
            solver.inertia(),
            Some(Inertia {
                positive: 3,
                zero: 0,
                negative: 1
            })
        );
    }

    #[test]
    fn test_ldl_tiny_diagonal_prefers_coupling_pivot() {
        // A weak diagonal next to a strong coupling must not be chosen as
        // the pivot; the solve stays accurate.
        let eps = 1e-13;
        let (a, n) = col_major(&[&[eps, 1.0, 0.0], &[1.0, eps, 0.5], &[0.0, 0.5, 2.0]]);
        let mut solver = DenseLdlSolver::new(DenseSolverOptions::default());
        solver.factorize(&a, n).unwrap();

        let b = [1.0, 0.0, 1.0];
        let mut x = b;
        solver.solve_in_place(&mut x);
        assert!(residual(&a, n, &x, &b) < 1e-10);
    }

    #[test]
    fn test_ldl_singular() {
        let (a, n) = col_major(&[&[1.0, 1.0], &[1.0, 1.0]]);
        let mut solver = DenseLdlSolver::new(DenseSolverOptions::default());
        assert!(solver.factorize(&a, n).is_err());
        assert_eq!(solver.inertia(), None);
    }

    #[test]
    fn test_ldl_empty_system() {
        let mut solver = DenseLdlSolver::new(DenseSolverOptions::default());
        solver.factorize(&[], 0).unwrap();
        let mut x: [f64; 0] = [];
        solver.solve_in_place(&mut x);
        assert_eq!(solver.inertia(), Some(Inertia::default()));
    }

    #[test]
    fn test_lu_solve_requires_pivoting() {
        // Leading diagonal entry is zero; partial pivoting must reorder.
        let (a, n) = col_major(&[&[0.0, 2.0], &[3.0, 1.0]]);
        let mut solver = DenseLuSolver::new(DenseSolverOptions::default());
        solver.factorize(&a, n).unwrap();

        let b = [4.0, 5.0];
        let mut x = b;
        solver.solve_in_place(&mut x);
        // 2*x1 = 4 -> x1 = 2; 3*x0 + x1 = 5 -> x0 = 1
        assert!((x[0] - 1.0).abs() < 1e-12);
        assert!((x[1] - 2.0).abs() < 1e-12);
        assert_eq!(solver.inertia(), None);
    }

    #[test]
    fn test_lu_singular() {
        let (a, n) = col_major(&[&[1.0, 2.0], &[2.0, 4.0]]);
        let mut solver = DenseLuSolver::new(DenseSolverOptions::default());
        assert!(solver.factorize(&a, n).is_err());
    }
}
