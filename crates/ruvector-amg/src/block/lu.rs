//! Dense LU with partial pivoting.
//!
//! The in-place functions work on caller-provided storage, which is how the
//! parent-candidate generator factors its local patch matrices inside an
//! arena scope. [`DenseLu`] owns its storage and serves the smoothers and the
//! dense coarsest-level solve.
//!
//! Matrices are row-major. Pivot swaps are recorded LAPACK style: `piv[k]` is
//! the row exchanged with row `k` at step `k`.

use crate::error::{AmgError, Result};

/// Pivots at or below this fraction of the largest input magnitude count as
/// zero.
pub const PIVOT_EPS: f64 = 1e-13;

/// Factor `a` (row-major, `n x n`) in place into `P A = L U`.
///
/// # Errors
///
/// [`AmgError::SingularPivot`] when a pivot is numerically zero. The
/// contents of `a` are unspecified afterwards.
pub fn factor_in_place(n: usize, a: &mut [f64], piv: &mut [usize]) -> Result<()> {
    debug_assert_eq!(a.len(), n * n);
    debug_assert_eq!(piv.len(), n);

    let scale = a.iter().fold(0.0f64, |m, v| m.max(v.abs()));
    if n > 0 && scale == 0.0 {
        return Err(AmgError::SingularPivot {
            column: 0,
            dim: n,
            pivot: 0.0,
        });
    }
    let threshold = PIVOT_EPS * scale;

    for k in 0..n {
        let (p, pmax) = (k..n)
            .map(|r| (r, a[r * n + k].abs()))
            .fold((k, -1.0), |best, cur| if cur.1 > best.1 { cur } else { best });
        if pmax <= threshold {
            return Err(AmgError::SingularPivot {
                column: k,
                dim: n,
                pivot: pmax,
            });
        }
        piv[k] = p;
        if p != k {
            for c in 0..n {
                a.swap(k * n + c, p * n + c);
            }
        }
        let pivot = a[k * n + k];
        for r in k + 1..n {
            let l = a[r * n + k] / pivot;
            a[r * n + k] = l;
            if l != 0.0 {
                for c in k + 1..n {
                    a[r * n + c] -= l * a[k * n + c];
                }
            }
        }
    }
    Ok(())
}

/// Solve `A x = b` with factors from [`factor_in_place`]; `b` is overwritten.
pub fn solve_in_place(n: usize, lu: &[f64], piv: &[usize], b: &mut [f64]) {
    for k in 0..n {
        b.swap(k, piv[k]);
    }
    for r in 1..n {
        let s: f64 = (0..r).map(|c| lu[r * n + c] * b[c]).sum();
        b[r] -= s;
    }
    for r in (0..n).rev() {
        let s: f64 = (r + 1..n).map(|c| lu[r * n + c] * b[c]).sum();
        b[r] = (b[r] - s) / lu[r * n + r];
    }
}

/// Solve `A^T x = b` with factors from [`factor_in_place`].
pub fn solve_transpose_in_place(n: usize, lu: &[f64], piv: &[usize], b: &mut [f64]) {
    // U^T y = b
    for r in 0..n {
        let s: f64 = (0..r).map(|c| lu[c * n + r] * b[c]).sum();
        b[r] = (b[r] - s) / lu[r * n + r];
    }
    // L^T z = y
    for r in (0..n).rev() {
        let s: f64 = (r + 1..n).map(|c| lu[c * n + r] * b[c]).sum();
        b[r] -= s;
    }
    for k in (0..n).rev() {
        b.swap(k, piv[k]);
    }
}

/// Owned dense LU factorisation.
#[derive(Debug, Clone)]
pub struct DenseLu {
    n: usize,
    lu: Vec<f64>,
    piv: Vec<usize>,
}

impl DenseLu {
    /// Factor a row-major `n x n` matrix.
    ///
    /// # Errors
    ///
    /// [`AmgError::SingularPivot`] for a numerically singular matrix,
    /// [`AmgError::StructuralInconsistency`] if `a.len() != n * n`.
    pub fn factor(n: usize, a: Vec<f64>) -> Result<Self> {
        if a.len() != n * n {
            return Err(AmgError::StructuralInconsistency(format!(
                "dense LU expects {} values for n = {}, got {}",
                n * n,
                n,
                a.len()
            )));
        }
        let mut lu = a;
        let mut piv = vec![0; n];
        factor_in_place(n, &mut lu, &mut piv)?;
        Ok(Self { n, lu, piv })
    }

    /// Dimension.
    pub fn dim(&self) -> usize {
        self.n
    }

    /// Solve `A x = b` in place.
    pub fn solve(&self, b: &mut [f64]) {
        solve_in_place(self.n, &self.lu, &self.piv, b);
    }

    /// Solve `A^T x = b` in place.
    pub fn solve_transpose(&self, b: &mut [f64]) {
        solve_transpose_in_place(self.n, &self.lu, &self.piv, b);
    }

    /// Row-major `A^{-1}`.
    pub fn inverse(&self) -> Vec<f64> {
        let n = self.n;
        let mut inv = vec![0.0; n * n];
        let mut col = vec![0.0; n];
        for c in 0..n {
            col.fill(0.0);
            col[c] = 1.0;
            self.solve(&mut col);
            for r in 0..n {
                inv[r * n + c] = col[r];
            }
        }
        inv
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn solves_with_pivoting() {
        // Zero leading entry forces a row swap.
        let lu = DenseLu::factor(3, vec![0.0, 2.0, 1.0, 1.0, 1.0, 0.0, 3.0, 0.0, 1.0]).unwrap();
        let mut b = vec![7.0, 3.0, 6.0];
        lu.solve(&mut b);
        // x = (1, 2, 3)
        assert_relative_eq!(b[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(b[1], 2.0, epsilon = 1e-12);
        assert_relative_eq!(b[2], 3.0, epsilon = 1e-12);
    }

    #[test]
    fn transpose_solve_matches_explicit_transpose() {
        let a = vec![4.0, 1.0, 2.0, 0.5, 3.0, 1.0, 1.0, 0.0, 5.0];
        let at: Vec<f64> = (0..9).map(|k| a[(k % 3) * 3 + k / 3]).collect();
        let f = DenseLu::factor(3, a).unwrap();
        let ft = DenseLu::factor(3, at).unwrap();
        let mut x = vec![1.0, -2.0, 0.5];
        let mut y = x.clone();
        f.solve_transpose(&mut x);
        ft.solve(&mut y);
        for (u, v) in x.iter().zip(&y) {
            assert_relative_eq!(u, v, epsilon = 1e-12);
        }
    }

    #[test]
    fn inverse_times_matrix_is_identity() {
        let a = vec![2.0, -1.0, -1.0, 2.0];
        let inv = DenseLu::factor(2, a.clone()).unwrap().inverse();
        for r in 0..2 {
            for c in 0..2 {
                let v: f64 = (0..2).map(|k| a[r * 2 + k] * inv[k * 2 + c]).sum();
                assert_relative_eq!(v, if r == c { 1.0 } else { 0.0 }, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn singular_matrix_reports_column() {
        let err = DenseLu::factor(2, vec![1.0, 2.0, 2.0, 4.0]).unwrap_err();
        assert!(matches!(err, AmgError::SingularPivot { column: 1, dim: 2, .. }));
    }
}
