//! Level smoothers.
//!
//! A [`Smoother`] is set up once per level from the level matrix and then
//! applied for a number of sweeps to `A x = b`. All variants work on node
//! blocks: the diagonal block is inverted densely, so block systems are
//! smoothed point-block-wise.

use std::fmt;

use crate::block::{self, BlockProduct, DenseLu, SparseBlock};
use crate::config::SmootherKind;
use crate::error::Result;
use crate::matrix::BlockMatrix;

/// Relaxation applied on one level.
pub trait Smoother: fmt::Debug + Send + Sync {
    /// Apply `sweeps` sweeps to `x`. `scratch` has the length of `x`.
    fn smooth(&self, a: &BlockMatrix, rhs: &[f64], x: &mut [f64], sweeps: usize, scratch: &mut [f64]);

    /// The configured kind.
    fn kind(&self) -> SmootherKind;
}

/// Set up a smoother of `kind` for `a`.
///
/// # Errors
///
/// [`crate::error::AmgError::SingularPivot`] if a diagonal block (or an
/// ILU pivot block) is singular.
pub fn build(kind: SmootherKind, a: &BlockMatrix, omega: f64) -> Result<Box<dyn Smoother>> {
    Ok(match kind {
        SmootherKind::Jacobi => Box::new(Jacobi {
            dinv: a.diag_inverse_blocks()?,
            omega,
        }),
        SmootherKind::ForwardGs | SmootherKind::BackwardGs | SmootherKind::SymmetricGs => {
            Box::new(GaussSeidel {
                dinv: a.diag_inverse_blocks()?,
                kind,
            })
        }
        SmootherKind::Ilu => Box::new(BlockIlu::factor(a)?),
    })
}

// ---------------------------------------------------------------------------
// Jacobi
// ---------------------------------------------------------------------------

/// Damped block Jacobi: `x += omega D^{-1} (b - A x)`.
#[derive(Debug, Clone)]
pub struct Jacobi {
    dinv: Vec<f64>,
    omega: f64,
}

impl Smoother for Jacobi {
    fn smooth(&self, a: &BlockMatrix, rhs: &[f64], x: &mut [f64], sweeps: usize, scratch: &mut [f64]) {
        let b = a.block_size();
        let bb = b * b;
        for _ in 0..sweeps {
            a.residual(rhs, x, scratch);
            for i in 0..a.nodes() {
                block::dense_mat_vec_add(
                    b,
                    self.omega,
                    &self.dinv[i * bb..(i + 1) * bb],
                    &scratch[i * b..(i + 1) * b],
                    &mut x[i * b..(i + 1) * b],
                );
            }
        }
    }

    fn kind(&self) -> SmootherKind {
        SmootherKind::Jacobi
    }
}

// ---------------------------------------------------------------------------
// Gauss-Seidel
// ---------------------------------------------------------------------------

/// Block Gauss-Seidel in forward, backward or symmetric order.
#[derive(Debug, Clone)]
pub struct GaussSeidel {
    dinv: Vec<f64>,
    kind: SmootherKind,
}

impl GaussSeidel {
    fn relax_node(&self, a: &BlockMatrix, rhs: &[f64], x: &mut [f64], i: usize, tmp: &mut [f64]) {
        let b = a.block_size();
        let bb = b * b;
        tmp.copy_from_slice(&rhs[i * b..(i + 1) * b]);
        a.row_off_diagonal_add(i, -1.0, x, tmp);
        let xi = &mut x[i * b..(i + 1) * b];
        xi.fill(0.0);
        block::dense_mat_vec_add(b, 1.0, &self.dinv[i * bb..(i + 1) * bb], tmp, xi);
    }
}

impl Smoother for GaussSeidel {
    fn smooth(&self, a: &BlockMatrix, rhs: &[f64], x: &mut [f64], sweeps: usize, scratch: &mut [f64]) {
        let b = a.block_size();
        let n = a.nodes();
        let tmp = &mut scratch[..b];
        for _ in 0..sweeps {
            if self.kind != SmootherKind::BackwardGs {
                for i in 0..n {
                    self.relax_node(a, rhs, x, i, tmp);
                }
            }
            if self.kind != SmootherKind::ForwardGs {
                for i in (0..n).rev() {
                    self.relax_node(a, rhs, x, i, tmp);
                }
            }
        }
    }

    fn kind(&self) -> SmootherKind {
        self.kind
    }
}

// ---------------------------------------------------------------------------
// Block ILU(0)
// ---------------------------------------------------------------------------

/// Incomplete block LU factorisation on the pattern of `A`, dense within
/// each block.
#[derive(Debug, Clone)]
pub struct BlockIlu {
    block_size: usize,
    /// `L` (strict lower, unit diagonal implied) and `U` blocks, one dense
    /// `b x b` block per matrix entry.
    factors: Vec<f64>,
    /// Dense inverse of every `U_ii`.
    uinv: Vec<f64>,
}

impl BlockIlu {
    /// Factor `a` without fill.
    ///
    /// # Errors
    ///
    /// [`crate::error::AmgError::SingularPivot`] on a singular pivot block.
    pub fn factor(a: &BlockMatrix) -> Result<Self> {
        let b = a.block_size();
        let bb = b * b;
        let n = a.nodes();
        let full = SparseBlock::dense(b, b);
        let product = BlockProduct::into_target(&full, &full, &full)?;

        let mut factors = vec![0.0; a.nnz() * bb];
        for k in 0..a.nnz() {
            a.descriptor(k).scatter_dense(a.block(k), &mut factors[k * bb..(k + 1) * bb]);
        }
        let mut uinv = vec![0.0; n * bb];
        let mut l = vec![0.0; bb];

        for i in 0..n {
            let row = a.row_range(i);
            for k in row.clone() {
                let j = a.col(k);
                if j >= i {
                    break;
                }
                // L_ij = A_ij U_jj^{-1}
                l.fill(0.0);
                product.apply_add(1.0, &factors[k * bb..(k + 1) * bb], &uinv[j * bb..(j + 1) * bb], &mut l);
                factors[k * bb..(k + 1) * bb].copy_from_slice(&l);
                for m in k + 1..row.end {
                    let c = a.col(m);
                    if let Some(q) = a.find(j, c) {
                        let (head, tail) = factors.split_at_mut(m * bb);
                        let target = &mut tail[..bb];
                        // q lies in row j < i, so before m.
                        product.apply_add(-1.0, &l, &head[q * bb..(q + 1) * bb], target);
                    }
                }
            }
            let d = a.diag_pos(i);
            let lu = DenseLu::factor(b, factors[d * bb..(d + 1) * bb].to_vec())?;
            uinv[i * bb..(i + 1) * bb].copy_from_slice(&lu.inverse());
        }

        Ok(Self {
            block_size: b,
            factors,
            uinv,
        })
    }

    /// `z = (LU)^{-1} r`.
    pub fn solve(&self, a: &BlockMatrix, r: &[f64], z: &mut [f64]) {
        let b = self.block_size;
        let bb = b * b;
        let n = a.nodes();
        let mut acc = vec![0.0; b];

        for i in 0..n {
            acc.copy_from_slice(&r[i * b..(i + 1) * b]);
            for k in a.row_range(i) {
                let j = a.col(k);
                if j >= i {
                    break;
                }
                block::dense_mat_vec_add(b, -1.0, &self.factors[k * bb..(k + 1) * bb], &z[j * b..(j + 1) * b], &mut acc);
            }
            z[i * b..(i + 1) * b].copy_from_slice(&acc);
        }
        for i in (0..n).rev() {
            acc.copy_from_slice(&z[i * b..(i + 1) * b]);
            for k in a.row_range(i) {
                let j = a.col(k);
                if j <= i {
                    continue;
                }
                block::dense_mat_vec_add(b, -1.0, &self.factors[k * bb..(k + 1) * bb], &z[j * b..(j + 1) * b], &mut acc);
            }
            let zi = &mut z[i * b..(i + 1) * b];
            zi.fill(0.0);
            block::dense_mat_vec_add(b, 1.0, &self.uinv[i * bb..(i + 1) * bb], &acc, zi);
        }
    }
}

impl Smoother for BlockIlu {
    fn smooth(&self, a: &BlockMatrix, rhs: &[f64], x: &mut [f64], sweeps: usize, scratch: &mut [f64]) {
        let mut z = vec![0.0; x.len()];
        for _ in 0..sweeps {
            a.residual(rhs, x, scratch);
            self.solve(a, scratch, &mut z);
            block::axpy(1.0, &z, x);
        }
    }

    fn kind(&self) -> SmootherKind {
        SmootherKind::Ilu
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CsrMatrix;
    use approx::assert_relative_eq;

    fn path(n: usize) -> BlockMatrix {
        let mut e = Vec::new();
        for i in 0..n {
            e.push((i, i, 2.0));
            if i + 1 < n {
                e.push((i, i + 1, -1.0));
                e.push((i + 1, i, -1.0));
            }
        }
        BlockMatrix::from_csr(&CsrMatrix::from_coo(n, n, e)).unwrap()
    }

    fn defect(a: &BlockMatrix, rhs: &[f64], x: &[f64]) -> f64 {
        let mut r = vec![0.0; x.len()];
        a.residual(rhs, x, &mut r);
        r.iter().map(|v| v * v).sum::<f64>().sqrt()
    }

    #[test]
    fn every_smoother_reduces_the_defect() {
        let a = path(16);
        let rhs = vec![1.0; 16];
        let start = defect(&a, &rhs, &[0.0; 16]);
        for kind in [
            SmootherKind::Jacobi,
            SmootherKind::ForwardGs,
            SmootherKind::BackwardGs,
            SmootherKind::SymmetricGs,
            SmootherKind::Ilu,
        ] {
            let s = build(kind, &a, 0.6).unwrap();
            assert_eq!(s.kind(), kind);
            let mut x = vec![0.0; 16];
            let mut scratch = vec![0.0; 16];
            s.smooth(&a, &rhs, &mut x, 3, &mut scratch);
            assert!(defect(&a, &rhs, &x) < start, "{kind:?} did not reduce the defect");
        }
    }

    #[test]
    fn ilu_is_exact_on_tridiagonal() {
        // No fill is dropped for a tridiagonal matrix.
        let a = path(8);
        let ilu = BlockIlu::factor(&a).unwrap();
        let rhs: Vec<f64> = (0..8).map(|i| i as f64).collect();
        let mut x = vec![0.0; 8];
        ilu.solve(&a, &rhs, &mut x);
        let mut ax = vec![0.0; 8];
        a.spmv(&x, &mut ax);
        for (l, r) in ax.iter().zip(&rhs) {
            assert_relative_eq!(l, r, epsilon = 1e-12);
        }
    }

    #[test]
    fn forward_gs_on_lower_triangular_is_exact() {
        let csr = CsrMatrix::from_coo(3, 3, vec![(0, 0, 2.0), (1, 0, 1.0), (1, 1, 4.0), (2, 1, 1.0), (2, 2, 1.0)]);
        let a = BlockMatrix::from_csr(&csr).unwrap();
        let gs = build(SmootherKind::ForwardGs, &a, 1.0).unwrap();
        let mut x = vec![0.0; 3];
        let mut scratch = vec![0.0; 3];
        gs.smooth(&a, &[2.0, 5.0, 2.0], &mut x, 1, &mut scratch);
        assert_relative_eq!(x[0], 1.0);
        assert_relative_eq!(x[1], 1.0);
        assert_relative_eq!(x[2], 1.0);
    }
}
