//! Test vectors.
//!
//! Each level carries two test vectors: `ta` for the prolongation side
//! (near-kernel of `A`) and `tb` for the restriction side (near-kernel of
//! `A^T`). They start as ones or seeded random values, are relaxed for `stv`
//! damped Jacobi sweeps on `A t = 0` (resp. `A^T t = 0`) and scaled to unit
//! max-norm. Coarse test vectors are taken by injection.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::block;
use crate::config::TestVectorInit;
use crate::error::Result;
use crate::matrix::{BlockMatrix, BlockVector};
use crate::transfer::TransferOperator;
use crate::validation::validate_test_vector;

/// Initial test vector for `nodes` nodes of `block_size` components.
///
/// Random vectors are drawn from `[0.5, 1.5)` so that no entry starts at
/// zero.
pub fn initial(nodes: usize, block_size: usize, init: TestVectorInit, seed: u64) -> BlockVector {
    let mut t = BlockVector::zeros(nodes, block_size);
    match init {
        TestVectorInit::Ones => t.as_mut_slice().fill(1.0),
        TestVectorInit::Random => {
            let mut rng = StdRng::seed_from_u64(seed);
            for v in t.as_mut_slice() {
                *v = rng.gen_range(0.5..1.5);
            }
        }
    }
    t
}

/// Which operator a relaxation smooths against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// `A t = 0`.
    Prolongation,
    /// `A^T t = 0`.
    Restriction,
}

/// `sweeps` damped Jacobi sweeps `t -= omega D^{-1} A t` (or with `A^T`
/// and `D^T`), followed by max-norm scaling.
///
/// # Errors
///
/// [`crate::error::AmgError::SingularPivot`] for a singular diagonal block,
/// [`crate::error::AmgError::InvalidInput`] if the vector collapses to zero.
pub fn relax(a: &BlockMatrix, t: &mut BlockVector, side: Side, sweeps: usize, omega: f64) -> Result<()> {
    if sweeps > 0 {
        let b = a.block_size();
        let bb = b * b;
        let mut dinv = a.diag_inverse_blocks()?;
        if side == Side::Restriction {
            for blk in dinv.chunks_exact_mut(bb) {
                transpose_in_place(b, blk);
            }
        }
        let mut at = vec![0.0; a.scalar_dim()];
        for _ in 0..sweeps {
            match side {
                Side::Prolongation => a.spmv(t.as_slice(), &mut at),
                Side::Restriction => a.spmv_transpose(t.as_slice(), &mut at),
            }
            let tv = t.as_mut_slice();
            for i in 0..a.nodes() {
                block::dense_mat_vec_add(b, -omega, &dinv[i * bb..(i + 1) * bb], &at[i * b..(i + 1) * b], &mut tv[i * b..(i + 1) * b]);
            }
        }
    }
    t.normalize_max();
    validate_test_vector("test vector", t.as_slice(), a.scalar_dim())?;
    debug!(?side, sweeps, omega, nodes = a.nodes(), "test vector relaxed");
    Ok(())
}

/// Coarse test vector by injection.
pub fn inject(transfer: &TransferOperator, t: &BlockVector) -> BlockVector {
    let mut tc = BlockVector::zeros(transfer.coarse_len(), t.block_size());
    transfer.inject(t.as_slice(), tc.as_mut_slice());
    tc
}

fn transpose_in_place(n: usize, m: &mut [f64]) {
    for r in 0..n {
        for c in r + 1..n {
            m.swap(r * n + c, c * n + r);
        }
    }
}
