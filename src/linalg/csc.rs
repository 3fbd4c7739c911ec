//! Sparse symmetric storage and sub-matrix views.
//!
//! The KKT matrix is held in CSC format with only the lower triangle stored;
//! the upper triangle is implied by symmetry. Sub-matrices (the border block,
//! the per-partition diagonal blocks, and the coupling blocks) are *views*:
//! they own a small CSC skeleton over local indices plus a gather list into
//! the parent's value array, so refreshing a view after the outer solver has
//! rewritten the KKT values is a single bulk copy. The non-zero pattern is
//! fixed for the lifetime of the views.

use crate::linalg::{LinAlgError, LinAlgResult};

/// Symmetric sparse matrix in CSC format, lower triangle only.
#[derive(Debug, Clone)]
pub struct SymmetricCsc {
    dim: usize,
    colptr: Vec<usize>,
    rowind: Vec<usize>,
    values: Vec<f64>,
}

impl SymmetricCsc {
    /// Build from raw CSC arrays. Row indices must be sorted within each
    /// column and lie in the lower triangle (`row >= col`).
    pub fn new(
        dim: usize,
        colptr: Vec<usize>,
        rowind: Vec<usize>,
        values: Vec<f64>,
    ) -> LinAlgResult<Self> {
        if colptr.len() != dim + 1 {
            return Err(LinAlgError::BadStructure(format!(
                "column pointer length {} does not match dimension {}",
                colptr.len(),
                dim
            )));
        }
        let nnz = *colptr.last().unwrap_or(&0);
        if rowind.len() != nnz || values.len() != nnz {
            return Err(LinAlgError::BadStructure(format!(
                "expected {} stored entries, got {} indices and {} values",
                nnz,
                rowind.len(),
                values.len()
            )));
        }
        for col in 0..dim {
            if colptr[col] > colptr[col + 1] {
                return Err(LinAlgError::BadStructure(format!(
                    "column pointers are not monotone at column {col}"
                )));
            }
            let mut prev = None;
            for &row in &rowind[colptr[col]..colptr[col + 1]] {
                if row < col || row >= dim {
                    return Err(LinAlgError::BadStructure(format!(
                        "entry ({row}, {col}) is outside the stored lower triangle"
                    )));
                }
                if prev.is_some_and(|p| p >= row) {
                    return Err(LinAlgError::BadStructure(format!(
                        "row indices of column {col} are not strictly increasing"
                    )));
                }
                prev = Some(row);
            }
        }
        Ok(Self {
            dim,
            colptr,
            rowind,
            values,
        })
    }

    /// Build from coordinate triplets. Entries from either triangle are
    /// folded into the lower one; duplicates are summed.
    pub fn from_triplets(dim: usize, triplets: &[(usize, usize, f64)]) -> LinAlgResult<Self> {
        let mut entries: Vec<(usize, usize, f64)> = triplets
            .iter()
            .map(|&(r, c, v)| if r >= c { (c, r, v) } else { (r, c, v) })
            .collect();
        // (col, row) order gives CSC with sorted rows per column.
        entries.sort_by_key(|&(c, r, _)| (c, r));

        let mut colptr = vec![0usize; dim + 1];
        let mut rowind = Vec::with_capacity(entries.len());
        let mut values = Vec::with_capacity(entries.len());
        let mut last: Option<(usize, usize)> = None;
        for (c, r, v) in entries {
            if r >= dim {
                return Err(LinAlgError::BadStructure(format!(
                    "triplet ({r}, {c}) is outside a {dim}x{dim} matrix"
                )));
            }
            if last == Some((c, r)) {
                *values.last_mut().unwrap() += v;
            } else {
                rowind.push(r);
                values.push(v);
                colptr[c + 1] += 1;
                last = Some((c, r));
            }
        }
        for c in 0..dim {
            colptr[c + 1] += colptr[c];
        }
        Self::new(dim, colptr, rowind, values)
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn nnz(&self) -> usize {
        self.rowind.len()
    }

    pub fn colptr(&self) -> &[usize] {
        &self.colptr
    }

    pub fn rowind(&self) -> &[usize] {
        &self.rowind
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Mutable access to the stored values. The outer solver rewrites these
    /// between factorizations; the pattern must not change.
    pub fn values_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }

    /// `y = K x` with the upper triangle implied by symmetry.
    pub fn matvec(&self, x: &[f64], y: &mut [f64]) {
        assert_eq!(x.len(), self.dim);
        assert_eq!(y.len(), self.dim);
        y.fill(0.0);
        for col in 0..self.dim {
            for p in self.colptr[col]..self.colptr[col + 1] {
                let row = self.rowind[p];
                let v = self.values[p];
                y[row] += v * x[col];
                if row != col {
                    y[col] += v * x[row];
                }
            }
        }
    }
}

/// Symmetric view of a `SymmetricCsc` restricted to an index set.
///
/// Owns a lower-triangular CSC skeleton over local indices and a gather
/// list into the parent's value array. Values are undefined until the
/// first [`BlockView::refresh`].
#[derive(Debug, Clone)]
pub struct BlockView {
    dim: usize,
    colptr: Vec<usize>,
    rowind: Vec<usize>,
    values: Vec<f64>,
    gather: Vec<usize>,
}

impl BlockView {
    /// Extract the symmetric sub-matrix on `set` (sorted ascending).
    ///
    /// Every parent position used by this view is marked in `consumed`;
    /// repeated extraction with the same bitmap carves the parent into
    /// disjoint pieces.
    pub fn extract(parent: &SymmetricCsc, set: &[usize], consumed: &mut [bool]) -> Self {
        debug_assert!(set.windows(2).all(|w| w[0] < w[1]));
        let mut local_of = vec![usize::MAX; parent.dim()];
        for (li, &gi) in set.iter().enumerate() {
            local_of[gi] = li;
        }

        let mut colptr = vec![0usize; set.len() + 1];
        let mut rowind = Vec::new();
        let mut gather = Vec::new();
        for (lj, &gj) in set.iter().enumerate() {
            for p in parent.colptr[gj]..parent.colptr[gj + 1] {
                let li = local_of[parent.rowind[p]];
                if li != usize::MAX && !consumed[p] {
                    consumed[p] = true;
                    rowind.push(li);
                    gather.push(p);
                }
            }
            colptr[lj + 1] = rowind.len();
        }
        let nnz = rowind.len();
        Self {
            dim: set.len(),
            colptr,
            rowind,
            values: vec![0.0; nnz],
            gather,
        }
    }

    /// Gather the current parent values into this view.
    pub fn refresh(&mut self, parent_values: &[f64]) {
        for (dst, &src) in self.values.iter_mut().zip(&self.gather) {
            *dst = parent_values[src];
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn nnz(&self) -> usize {
        self.rowind.len()
    }

    pub fn colptr(&self) -> &[usize] {
        &self.colptr
    }

    pub fn rowind(&self) -> &[usize] {
        &self.rowind
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Iterate stored entries as `(local_row, local_col, value)`.
    pub fn entries(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        (0..self.dim).flat_map(move |col| {
            (self.colptr[col]..self.colptr[col + 1])
                .map(move |p| (self.rowind[p], col, self.values[p]))
        })
    }

    /// `y[map[i]] += sum_j K[i, j] x[map[j]]` over the view, symmetric.
    /// Used to rebuild residuals of the full system from the carved views.
    pub fn matvec_scattered(&self, map: &[usize], x: &[f64], y: &mut [f64]) {
        for (lr, lc, v) in self.entries() {
            let gr = map[lr];
            let gc = map[lc];
            y[gr] += v * x[gc];
            if lr != lc {
                y[gc] += v * x[gr];
            }
        }
    }
}

/// Rectangular view of a `SymmetricCsc` on a row set and a column set.
///
/// Both storage orientations of the parent's lower triangle contribute,
/// so the view holds every non-zero `K[rows[i], cols[j]]`. Also records
/// which local columns are non-empty, letting the triangular solves skip
/// structurally zero columns.
#[derive(Debug, Clone)]
pub struct CouplingView {
    nrows: usize,
    ncols: usize,
    colptr: Vec<usize>,
    rowind: Vec<usize>,
    values: Vec<f64>,
    gather: Vec<usize>,
    nz_cols: Vec<usize>,
}

impl CouplingView {
    /// Extract the rectangular sub-matrix on `rows` x `cols` (both sorted,
    /// disjoint). Consumes parent positions like [`BlockView::extract`].
    pub fn extract(
        parent: &SymmetricCsc,
        rows: &[usize],
        cols: &[usize],
        consumed: &mut [bool],
    ) -> Self {
        let mut row_of = vec![usize::MAX; parent.dim()];
        for (li, &gi) in rows.iter().enumerate() {
            row_of[gi] = li;
        }
        let mut col_of = vec![usize::MAX; parent.dim()];
        for (lj, &gj) in cols.iter().enumerate() {
            col_of[gj] = lj;
        }

        // (local col, local row, parent position)
        let mut triplets: Vec<(usize, usize, usize)> = Vec::new();
        for gj in 0..parent.dim() {
            for p in parent.colptr[gj]..parent.colptr[gj + 1] {
                if consumed[p] {
                    continue;
                }
                let gi = parent.rowind[p];
                if row_of[gi] != usize::MAX && col_of[gj] != usize::MAX {
                    consumed[p] = true;
                    triplets.push((col_of[gj], row_of[gi], p));
                } else if col_of[gi] != usize::MAX && row_of[gj] != usize::MAX {
                    // transposed orientation of the stored lower triangle
                    consumed[p] = true;
                    triplets.push((col_of[gi], row_of[gj], p));
                }
            }
        }
        triplets.sort_unstable();

        let mut colptr = vec![0usize; cols.len() + 1];
        let mut rowind = Vec::with_capacity(triplets.len());
        let mut gather = Vec::with_capacity(triplets.len());
        for &(lc, lr, p) in &triplets {
            rowind.push(lr);
            gather.push(p);
            colptr[lc + 1] += 1;
        }
        for c in 0..cols.len() {
            colptr[c + 1] += colptr[c];
        }
        let nz_cols = (0..cols.len())
            .filter(|&c| colptr[c + 1] > colptr[c])
            .collect();
        let nnz = rowind.len();
        Self {
            nrows: rows.len(),
            ncols: cols.len(),
            colptr,
            rowind,
            values: vec![0.0; nnz],
            gather,
            nz_cols,
        }
    }

    pub fn refresh(&mut self, parent_values: &[f64]) {
        for (dst, &src) in self.values.iter_mut().zip(&self.gather) {
            *dst = parent_values[src];
        }
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn nnz(&self) -> usize {
        self.rowind.len()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Local column indices with at least one stored entry, ascending.
    pub fn nz_cols(&self) -> &[usize] {
        &self.nz_cols
    }

    pub fn has_col(&self, col: usize) -> bool {
        self.colptr[col + 1] > self.colptr[col]
    }

    /// Write column `col` into the dense vector `out` (zeroed first).
    pub fn scatter_col(&self, col: usize, out: &mut [f64]) {
        out.fill(0.0);
        for p in self.colptr[col]..self.colptr[col + 1] {
            out[self.rowind[p]] = self.values[p];
        }
    }

    /// Dot product of column `col` with the dense vector `y`.
    pub fn col_dot(&self, col: usize, y: &[f64]) -> f64 {
        let mut acc = 0.0;
        for p in self.colptr[col]..self.colptr[col + 1] {
            acc += self.values[p] * y[self.rowind[p]];
        }
        acc
    }

    /// `y += B x`.
    pub fn matvec_add(&self, x: &[f64], y: &mut [f64]) {
        for &col in &self.nz_cols {
            let xc = x[col];
            if xc == 0.0 {
                continue;
            }
            for p in self.colptr[col]..self.colptr[col + 1] {
                y[self.rowind[p]] += self.values[p] * xc;
            }
        }
    }

    /// `y -= B x`.
    pub fn matvec_sub(&self, x: &[f64], y: &mut [f64]) {
        for &col in &self.nz_cols {
            let xc = x[col];
            if xc == 0.0 {
                continue;
            }
            for p in self.colptr[col]..self.colptr[col + 1] {
                y[self.rowind[p]] -= self.values[p] * xc;
            }
        }
    }

    /// `y -= B^T x`.
    pub fn transpose_matvec_sub(&self, x: &[f64], y: &mut [f64]) {
        for &col in &self.nz_cols {
            y[col] -= self.col_dot(col, x);
        }
    }

    /// Symmetric scatter product for residual reconstruction: for every
    /// stored entry `B[i, j]`, adds `B[i,j] * x[cols[j]]` to `y[rows[i]]`
    /// and `B[i,j] * x[rows[i]]` to `y[cols[j]]`.
    pub fn matvec_scattered(&self, rows: &[usize], cols: &[usize], x: &[f64], y: &mut [f64]) {
        for &col in &self.nz_cols {
            let gc = cols[col];
            for p in self.colptr[col]..self.colptr[col + 1] {
                let gr = rows[self.rowind[p]];
                let v = self.values[p];
                y[gr] += v * x[gc];
                y[gc] += v * x[gr];
            }
        }
    }
}
