//! Core value types shared across the crate.
//!
//! Provides [`CsrMatrix`], the scalar compressed-row format a host hands to
//! the solver, plus the classification and result types produced by
//! coarsening and solving.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AmgError;
use crate::events::AmgEvent;

// ---------------------------------------------------------------------------
// CsrMatrix<T>
// ---------------------------------------------------------------------------

/// Compressed Sparse Row (CSR) matrix.
///
/// # Layout
///
/// For a matrix with `m` rows and `nnz` non-zeros:
/// - `row_ptr` has length `m + 1`
/// - `col_indices` and `values` each have length `nnz`
/// - Row `i` spans indices `row_ptr[i]..row_ptr[i+1]`
#[derive(Debug, Clone, PartialEq)]
pub struct CsrMatrix<T> {
    /// Row pointers: `row_ptr[i]` is the start index in `col_indices`/`values`
    /// for row `i`.
    pub row_ptr: Vec<usize>,
    /// Column indices for each non-zero entry.
    pub col_indices: Vec<usize>,
    /// Values for each non-zero entry.
    pub values: Vec<T>,
    /// Number of rows.
    pub rows: usize,
    /// Number of columns.
    pub cols: usize,
}

impl<T: Copy + Default + std::ops::Mul<Output = T> + std::ops::AddAssign> CsrMatrix<T> {
    /// Sparse matrix-vector multiply: `y = A * x`.
    #[inline]
    pub fn spmv(&self, x: &[T], y: &mut [T]) {
        debug_assert!(x.len() >= self.cols, "spmv: x.len()={} < cols={}", x.len(), self.cols);
        debug_assert!(y.len() >= self.rows, "spmv: y.len()={} < rows={}", y.len(), self.rows);

        for i in 0..self.rows {
            let mut sum = T::default();
            for idx in self.row_ptr[i]..self.row_ptr[i + 1] {
                sum += self.values[idx] * x[self.col_indices[idx]];
            }
            y[i] = sum;
        }
    }
}

impl<T> CsrMatrix<T> {
    /// Number of non-zero entries.
    #[inline]
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Iterate over `(col_index, &value)` pairs for the given row.
    #[inline]
    pub fn row_entries(&self, row: usize) -> impl Iterator<Item = (usize, &T)> {
        let start = self.row_ptr[row];
        let end = self.row_ptr[row + 1];
        self.col_indices[start..end]
            .iter()
            .copied()
            .zip(self.values[start..end].iter())
    }
}

impl<T: Copy + Default> CsrMatrix<T> {
    /// Transpose: produces `A^T` in CSR form.
    ///
    /// Two-pass counting sort in O(nnz + rows + cols).
    pub fn transpose(&self) -> CsrMatrix<T> {
        let nnz = self.nnz();
        let t_rows = self.cols;

        let mut row_ptr = vec![0usize; t_rows + 1];
        for &c in &self.col_indices {
            row_ptr[c + 1] += 1;
        }
        for i in 1..=t_rows {
            row_ptr[i] += row_ptr[i - 1];
        }

        let mut col_indices = vec![0usize; nnz];
        let mut values = vec![T::default(); nnz];
        let mut cursor = row_ptr.clone();

        for row in 0..self.rows {
            for idx in self.row_ptr[row]..self.row_ptr[row + 1] {
                let c = self.col_indices[idx];
                let dest = cursor[c];
                col_indices[dest] = row;
                values[dest] = self.values[idx];
                cursor[c] += 1;
            }
        }

        CsrMatrix {
            row_ptr,
            col_indices,
            values,
            rows: t_rows,
            cols: self.rows,
        }
    }
}

impl<T: Copy + Default + std::ops::AddAssign> CsrMatrix<T> {
    /// Build a CSR matrix from COO (coordinate) triplets.
    ///
    /// Entries are sorted by (row, col); duplicate positions are summed.
    ///
    /// # Panics
    ///
    /// Panics if an index is out of bounds.
    pub fn from_coo_generic(
        rows: usize,
        cols: usize,
        entries: impl IntoIterator<Item = (usize, usize, T)>,
    ) -> Self {
        let mut sorted: Vec<_> = entries.into_iter().collect();
        sorted.sort_by_key(|(r, c, _)| (*r, *c));

        let mut row_ptr = vec![0usize; rows + 1];
        let mut col_indices: Vec<usize> = Vec::with_capacity(sorted.len());
        let mut values: Vec<T> = Vec::with_capacity(sorted.len());
        let mut last: Option<(usize, usize)> = None;

        for (r, c, v) in sorted {
            assert!(r < rows, "row index {} out of bounds (rows={})", r, rows);
            assert!(c < cols, "col index {} out of bounds (cols={})", c, cols);
            if last == Some((r, c)) {
                if let Some(slot) = values.last_mut() {
                    *slot += v;
                }
                continue;
            }
            row_ptr[r + 1] += 1;
            col_indices.push(c);
            values.push(v);
            last = Some((r, c));
        }
        for i in 1..=rows {
            row_ptr[i] += row_ptr[i - 1];
        }

        Self {
            row_ptr,
            col_indices,
            values,
            rows,
            cols,
        }
    }
}

impl CsrMatrix<f64> {
    /// Build a CSR matrix from COO (coordinate) triplets.
    pub fn from_coo(
        rows: usize,
        cols: usize,
        entries: impl IntoIterator<Item = (usize, usize, f64)>,
    ) -> Self {
        Self::from_coo_generic(rows, cols, entries)
    }

    /// Square identity matrix of dimension `n`.
    pub fn identity(n: usize) -> Self {
        Self {
            row_ptr: (0..=n).collect(),
            col_indices: (0..n).collect(),
            values: vec![1.0; n],
            rows: n,
            cols: n,
        }
    }

    /// Value stored at `(row, col)`, or `None` if structurally absent.
    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        let start = self.row_ptr[row];
        let end = self.row_ptr[row + 1];
        self.col_indices[start..end]
            .binary_search(&col)
            .ok()
            .map(|k| self.values[start + k])
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Classification of an unknown during coarsening.
///
/// `Undecided` is the only non-terminal state. Once an unknown is `Coarse`
/// or `Fine` it never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum NodeClass {
    /// Not yet classified.
    #[default]
    Undecided,
    /// Retained on the next coarser level.
    Coarse,
    /// Eliminated; its value is interpolated from Coarse parents.
    Fine,
}

impl NodeClass {
    /// `true` for `Coarse` and `Fine`.
    #[inline]
    pub fn is_decided(self) -> bool {
        self != NodeClass::Undecided
    }
}

// ---------------------------------------------------------------------------
// Solve results
// ---------------------------------------------------------------------------

/// Per-iteration convergence snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceInfo {
    /// Iteration index (1-based; 0 is the initial defect).
    pub iteration: usize,
    /// Defect (residual) L2 norm after this iteration.
    pub defect: f64,
}

/// How an outer solve ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolveStatus {
    /// A stopping criterion (`alimit`, `rlimit` or `reduction`) was met.
    Converged,
    /// The defect grew beyond `divlimit` times the initial defect.
    Diverged,
    /// `maxit` iterations ran without meeting a stopping criterion.
    MaxIterations,
    /// A Krylov recurrence broke down (zero denominator).
    Breakdown,
}

/// Result of an outer solve.
///
/// Non-convergence is a normal outcome carried in [`status`](Self::status);
/// use [`into_result`](Self::into_result) to turn it into an error.
#[derive(Debug, Clone)]
pub struct SolveReport {
    /// Final iterate.
    pub solution: Vec<f64>,
    /// How the iteration ended.
    pub status: SolveStatus,
    /// Iterations performed.
    pub iterations: usize,
    /// Initial defect norm.
    pub initial_defect: f64,
    /// Final defect norm.
    pub final_defect: f64,
    /// Defect history, starting with the initial defect.
    pub history: Vec<ConvergenceInfo>,
    /// Wall-clock time of the solve.
    pub wall_time: Duration,
    /// Events recorded during the solve.
    pub events: Vec<AmgEvent>,
}

impl SolveReport {
    /// `true` if the solve met a stopping criterion.
    pub fn converged(&self) -> bool {
        self.status == SolveStatus::Converged
    }

    /// Geometric mean defect reduction per iteration.
    pub fn convergence_rate(&self) -> f64 {
        if self.iterations == 0 || self.initial_defect <= 0.0 {
            return 0.0;
        }
        (self.final_defect / self.initial_defect).powf(1.0 / self.iterations as f64)
    }

    /// Convert a non-converged report into [`AmgError::NonConvergence`].
    pub fn into_result(self) -> Result<SolveReport, AmgError> {
        if self.converged() {
            Ok(self)
        } else {
            Err(AmgError::NonConvergence {
                iterations: self.iterations,
                defect: self.final_defect,
                initial: self.initial_defect,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_coo_sums_duplicates() {
        let m = CsrMatrix::<f64>::from_coo(2, 2, vec![(0, 0, 1.0), (1, 1, 2.0), (0, 0, 3.0)]);
        assert_eq!(m.nnz(), 2);
        assert_eq!(m.get(0, 0), Some(4.0));
        assert_eq!(m.get(0, 1), None);
    }

    #[test]
    fn transpose_round_trips_structure() {
        let m = CsrMatrix::<f64>::from_coo(2, 3, vec![(0, 2, 1.0), (1, 0, 5.0)]);
        let t = m.transpose();
        assert_eq!((t.rows, t.cols), (3, 2));
        assert_eq!(t.get(2, 0), Some(1.0));
        assert_eq!(t.get(0, 1), Some(5.0));
    }

    #[test]
    fn non_converged_report_becomes_error() {
        let report = SolveReport {
            solution: vec![],
            status: SolveStatus::Diverged,
            iterations: 3,
            initial_defect: 1.0,
            final_defect: 1e4,
            history: vec![],
            wall_time: Duration::ZERO,
            events: vec![],
        };
        assert!(matches!(
            report.into_result(),
            Err(AmgError::NonConvergence { iterations: 3, .. })
        ));
    }
}
