//! Sparse block algebra.
//!
//! Matrix entries of a systems-of-PDE problem are small blocks whose
//! sparsity pattern ([`SparseBlock`]) is shared by many entries. The free
//! functions here are the primitives coarsening, Galerkin projection and the
//! smoothers are written against; they take a descriptor plus packed values,
//! so the same code serves the scalar case (1x1 blocks) and block systems.

pub mod descriptor;
pub mod lu;

pub use descriptor::{BlockMatVec, BlockProduct, SparseBlock, SparseVector};
pub use lu::DenseLu;

use crate::error::{AmgError, Result};

/// `dst = src` for two value slices of the same descriptor.
#[inline]
pub fn copy(src: &[f64], dst: &mut [f64]) {
    dst.copy_from_slice(src);
}

/// `values *= s`.
#[inline]
pub fn scale(values: &mut [f64], s: f64) {
    for v in values {
        *v *= s;
    }
}

/// `y += alpha * x` for value slices of the same descriptor.
#[inline]
pub fn axpy(alpha: f64, x: &[f64], y: &mut [f64]) {
    debug_assert_eq!(x.len(), y.len());
    for (yi, &xi) in y.iter_mut().zip(x) {
        *yi += alpha * xi;
    }
}

/// `dst += alpha * src` where `dst` uses a pattern that contains `src`'s.
///
/// # Errors
///
/// [`AmgError::StructuralInconsistency`] if the shapes differ or `src` has
/// a position missing from `dst_desc`.
pub fn embed_add(
    alpha: f64,
    src_desc: &SparseBlock,
    src: &[f64],
    dst_desc: &SparseBlock,
    dst: &mut [f64],
) -> Result<()> {
    if src_desc.rows() != dst_desc.rows() || src_desc.cols() != dst_desc.cols() {
        return Err(AmgError::StructuralInconsistency(format!(
            "cannot embed {}x{} block into {}x{}",
            src_desc.rows(),
            src_desc.cols(),
            dst_desc.rows(),
            dst_desc.cols()
        )));
    }
    for (k, &(r, c)) in src_desc.positions().iter().enumerate() {
        let off = dst_desc.offset(r, c).ok_or_else(|| {
            AmgError::StructuralInconsistency(format!(
                "block position ({r}, {c}) missing from target pattern"
            ))
        })?;
        dst[off] += alpha * src[k];
    }
    Ok(())
}

/// `y += alpha * A x` through a precomputed descriptor.
#[inline]
pub fn mat_vec_add(mv: &BlockMatVec, alpha: f64, a: &[f64], x: &[f64], y: &mut [f64]) {
    mv.apply_add(alpha, a, x, y);
}

/// `y += alpha * A^T x`; `mv` must come from
/// [`BlockMatVec::analyse_transposed`].
#[inline]
pub fn mat_vec_transposed_add(mv: &BlockMatVec, alpha: f64, a: &[f64], x: &[f64], y: &mut [f64]) {
    mv.apply_add(alpha, a, x, y);
}

/// `C += alpha * A B` through a precomputed descriptor.
#[inline]
pub fn product_add(p: &BlockProduct, alpha: f64, a: &[f64], b: &[f64], c: &mut [f64]) {
    p.apply_add(alpha, a, b, c);
}

/// Frobenius norm of packed values.
#[inline]
pub fn frobenius_norm(values: &[f64]) -> f64 {
    values.iter().map(|v| v * v).sum::<f64>().sqrt()
}

/// Dense row-major `y += alpha * M x` for an `n x n` block.
#[inline]
pub fn dense_mat_vec_add(n: usize, alpha: f64, m: &[f64], x: &[f64], y: &mut [f64]) {
    for r in 0..n {
        let s: f64 = (0..n).map(|c| m[r * n + c] * x[c]).sum();
        y[r] += alpha * s;
    }
}

/// Row-major dense inverse of a square block.
///
/// # Errors
///
/// [`AmgError::SingularPivot`] if the block is singular,
/// [`AmgError::StructuralInconsistency`] if it is not square.
pub fn invert(desc: &SparseBlock, values: &[f64]) -> Result<Vec<f64>> {
    if !desc.is_square() {
        return Err(AmgError::StructuralInconsistency(format!(
            "cannot invert a {}x{} block",
            desc.rows(),
            desc.cols()
        )));
    }
    let n = desc.rows();
    let mut dense = vec![0.0; n * n];
    desc.scatter_dense(values, &mut dense);
    Ok(DenseLu::factor(n, dense)?.inverse())
}
