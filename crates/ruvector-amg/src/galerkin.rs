//! Galerkin triple product `A_c = R A P`.
//!
//! The projection runs in two passes over the fine matrix. The symbolic pass
//! finds every coarse position `(I, J)` some fine entry `(i, j)` reaches
//! through a restriction weight of `i` and a prolongation weight of `j`, and
//! unites the block descriptors of all entries landing there. The numeric
//! pass visits each fine entry once and scatter-adds `r_iI * A_ij * p_jJ`.
//!
//! With [`CoarsePattern::Restricted`] a coarse position survives only if
//! some contribution has a Coarse fine node at one of its ends (or it is a
//! diagonal); everything else is lumped onto the coarse diagonal scaled by
//! the coarse test vector, so the row action `A_c t_c` is unchanged.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::block::{self, SparseBlock};
use crate::config::CoarsePattern;
use crate::error::{AmgError, Result};
use crate::matrix::{BlockMatrix, BlockTriplet, BlockVector};
use crate::transfer::{TransferOperator, TransferRow};

/// Relative size under which a test-vector entry cannot carry lumped mass.
const LUMP_EPS: f64 = 1e-12;

/// Largest relative deviation [`check_test_vector`] accepts.
pub const CHECK_TOL: f64 = 1e-8;

/// `A_c = R A P`.
///
/// `tc` is the coarse prolongation-side test vector; it is only read for
/// [`CoarsePattern::Restricted`].
///
/// # Errors
///
/// [`AmgError::StructuralInconsistency`] if the operator sizes disagree or a
/// block cannot be embedded, plus whatever the coarse matrix constructor
/// rejects.
pub fn project(
    a: &BlockMatrix,
    transfer: &TransferOperator,
    tc: &BlockVector,
    pattern: CoarsePattern,
) -> Result<BlockMatrix> {
    let n = a.nodes();
    let b = a.block_size();
    let nc = transfer.coarse_len();
    if transfer.fine_len() != n || transfer.block_size() != b {
        return Err(AmgError::StructuralInconsistency(format!(
            "transfer operator for {} nodes of size {} applied to {} nodes of size {}",
            transfer.fine_len(),
            transfer.block_size(),
            n,
            b
        )));
    }
    let restricted = pattern == CoarsePattern::Restricted;
    let is_coarse = |i: usize| matches!(transfer.row(i), TransferRow::Coarse(_));

    // Symbolic pass.
    let mut shape: BTreeMap<(usize, usize), (Arc<SparseBlock>, bool)> = BTreeMap::new();
    for i in 0..n {
        for (ci, _) in transfer.restriction_row(i) {
            for k in a.row_range(i) {
                let j = a.col(k);
                let direct = is_coarse(i) || is_coarse(j);
                for (cj, _) in transfer.prolongation_row(j) {
                    let desc = a.descriptor(k);
                    match shape.get_mut(&(ci, cj)) {
                        Some((d, keep)) => {
                            if !d.contains(desc) {
                                *d = d.union(desc)?;
                            }
                            *keep |= direct;
                        }
                        None => {
                            shape.insert((ci, cj), (Arc::clone(desc), direct || ci == cj));
                        }
                    }
                }
            }
        }
    }
    if restricted {
        let diag = SparseBlock::diagonal(b);
        for ci in 0..nc {
            if let Some((d, _)) = shape.get_mut(&(ci, ci)) {
                if !d.contains(&diag) {
                    *d = d.union(&diag)?;
                }
            }
        }
    }

    let mut values: BTreeMap<(usize, usize), (Arc<SparseBlock>, Vec<f64>)> = shape
        .into_iter()
        .filter(|(_, (_, keep))| *keep || !restricted)
        .map(|(key, (d, _))| {
            let len = d.nnz();
            (key, (d, vec![0.0; len]))
        })
        .collect();

    // Numeric pass.
    let mut lumped = vec![0.0; nc * b];
    let tcv = tc.as_slice();
    for i in 0..n {
        for (ci, r) in transfer.restriction_row(i) {
            for k in a.row_range(i) {
                let j = a.col(k);
                let desc = a.descriptor(k);
                let vals = a.block(k);
                for (cj, p) in transfer.prolongation_row(j) {
                    let w = r * p;
                    match values.get_mut(&(ci, cj)) {
                        Some((d, dst)) => block::embed_add(w, desc, vals, d, dst)?,
                        None => {
                            let tj = &tcv[cj * b..(cj + 1) * b];
                            for (&(rr, cc), v) in desc.positions().iter().zip(vals) {
                                lumped[ci * b + rr] += w * v * tj[cc];
                            }
                        }
                    }
                }
            }
        }
    }

    if restricted {
        let scale = tcv.iter().fold(0.0f64, |m, v| m.max(v.abs()));
        let mut skipped = 0usize;
        for ci in 0..nc {
            for rr in 0..b {
                let mass = lumped[ci * b + rr];
                if mass == 0.0 {
                    continue;
                }
                let t = tcv[ci * b + rr];
                if t.abs() <= LUMP_EPS * scale {
                    skipped += 1;
                    continue;
                }
                let (d, dst) = values.get_mut(&(ci, ci)).ok_or_else(|| {
                    AmgError::StructuralInconsistency(format!("coarse node {ci} has no diagonal"))
                })?;
                let off = d.offset(rr, rr).ok_or_else(|| {
                    AmgError::StructuralInconsistency(format!("coarse diagonal {ci} lacks ({rr}, {rr})"))
                })?;
                dst[off] += mass / t;
            }
        }
        if skipped > 0 {
            warn!(skipped, "test vector vanishes on coarse rows, lumped entries dropped");
        }
    }

    let kept = values.len();
    let triplets: Vec<BlockTriplet> = values
        .into_iter()
        .map(|((ci, cj), (d, v))| (ci, cj, d, v))
        .collect();
    let coarse = BlockMatrix::from_block_triplets(nc, b, triplets)?;
    debug!(
        fine_nodes = n,
        coarse_nodes = nc,
        kept,
        coarse_nnz = coarse.nnz(),
        ?pattern,
        "galerkin product"
    );
    Ok(coarse)
}

/// Verify `A_c t_c == R (A (P t_c))` and return the relative deviation.
///
/// # Errors
///
/// [`AmgError::StructuralInconsistency`] if the deviation exceeds
/// [`CHECK_TOL`].
pub fn check_test_vector(
    a: &BlockMatrix,
    transfer: &TransferOperator,
    coarse: &BlockMatrix,
    tc: &BlockVector,
) -> Result<f64> {
    let tcv = tc.as_slice();
    let mut lhs = vec![0.0; tcv.len()];
    coarse.spmv(tcv, &mut lhs);

    let mut fine = vec![0.0; a.scalar_dim()];
    transfer.prolongate(tcv, &mut fine);
    let mut af = vec![0.0; a.scalar_dim()];
    a.spmv(&fine, &mut af);
    let mut rhs = vec![0.0; tcv.len()];
    transfer.restrict(&af, &mut rhs);

    let scale = rhs.iter().chain(lhs.iter()).fold(0.0f64, |m, v| m.max(v.abs()));
    let diff = lhs
        .iter()
        .zip(&rhs)
        .fold(0.0f64, |m, (l, r)| m.max((l - r).abs()));
    let deviation = if scale > 0.0 { diff / scale } else { diff };
    if deviation > CHECK_TOL {
        return Err(AmgError::StructuralInconsistency(format!(
            "coarse operator breaks the test vector: relative deviation {deviation:.3e}"
        )));
    }
    Ok(deviation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidates::Candidate;
    use crate::types::{CsrMatrix, NodeClass};
    use approx::assert_relative_eq;
    use NodeClass::{Coarse as C, Fine as F};

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

    fn alternating() -> TransferOperator {
        let accepted = vec![
            Some(Candidate::one(1, [1.0], [1.0], 0.0)),
            None,
            Some(Candidate::two(1, 3, [0.5, 0.5], [0.5, 0.5], 0.0)),
            None,
            Some(Candidate::one(3, [1.0], [1.0], 0.0)),
        ];
        TransferOperator::from_decisions(&[F, C, F, C, F], &accepted, 1).unwrap()
    }

    #[test]
    fn five_point_path_coarse_operator() {
        let a = path(5);
        let t = alternating();
        let tc = BlockVector::from_flat(1, vec![1.0; 2]).unwrap();
        let ac = project(&a, &t, &tc, CoarsePattern::Full).unwrap();
        let dense = ac.to_dense();
        assert_relative_eq!(dense[0], 1.5, epsilon = 1e-14);
        assert_relative_eq!(dense[1], -0.5, epsilon = 1e-14);
        assert_relative_eq!(dense[2], -0.5, epsilon = 1e-14);
        assert_relative_eq!(dense[3], 1.5, epsilon = 1e-14);
        check_test_vector(&a, &t, &ac, &tc).unwrap();
    }

    #[test]
    fn identity_on_a_subset_restricts_the_matrix() {
        let a = path(5);
        let tc3 = BlockVector::from_flat(1, vec![1.0; 3]).unwrap();

        // Kept nodes {0, 1, 3}; the others interpolate with zero weight.
        let accepted = vec![
            None,
            None,
            Some(Candidate::one(1, [0.0], [0.0], 0.0)),
            None,
            Some(Candidate::one(3, [0.0], [0.0], 0.0)),
        ];
        let t = TransferOperator::from_decisions(&[C, C, F, C, F], &accepted, 1).unwrap();
        let ac = project(&a, &t, &tc3, CoarsePattern::Full).unwrap();
        assert_eq!(ac.to_dense(), vec![2.0, -1.0, 0.0, -1.0, 2.0, 0.0, 0.0, 0.0, 2.0]);

        // Every node kept: the product is the matrix itself.
        let t = TransferOperator::from_decisions(&[C; 5], &[None; 5], 1).unwrap();
        let tc5 = BlockVector::from_flat(1, vec![1.0; 5]).unwrap();
        let ac = project(&a, &t, &tc5, CoarsePattern::Full).unwrap();
        assert_eq!(ac.to_dense(), a.to_dense());
    }

    #[test]
    fn restricted_pattern_lumps_far_couplings() {
        // Coarse nodes 1 and 4 are linked only through the fine pair (2, 3).
        let a = path(7);
        let accepted = vec![
            Some(Candidate::one(1, [1.0], [1.0], 0.0)),
            None,
            Some(Candidate::one(1, [1.0], [1.0], 0.0)),
            Some(Candidate::one(4, [1.0], [1.0], 0.0)),
            None,
            Some(Candidate::one(4, [1.0], [1.0], 0.0)),
            Some(Candidate::one(4, [1.0], [1.0], 0.0)),
        ];
        let t = TransferOperator::from_decisions(&[F, C, F, F, C, F, F], &accepted, 1).unwrap();
        let tc = BlockVector::from_flat(1, vec![1.0, 2.0]).unwrap();

        let full = project(&a, &t, &tc, CoarsePattern::Full).unwrap();
        let restricted = project(&a, &t, &tc, CoarsePattern::Restricted).unwrap();
        assert!(full.find(0, 1).is_some());
        let k = restricted.find(0, 1).map(|k| restricted.block(k)[0]).unwrap_or(0.0);
        assert_eq!(k, 0.0);
        check_test_vector(&a, &t, &full, &tc).unwrap();
        check_test_vector(&a, &t, &restricted, &tc).unwrap();
    }

    #[test]
    fn broken_coarse_operator_is_detected() {
        let a = path(5);
        let t = alternating();
        let tc = BlockVector::from_flat(1, vec![1.0, 2.0]).unwrap();
        let wrong = BlockMatrix::from_csr(&CsrMatrix::<f64>::identity(2)).unwrap();
        assert!(check_test_vector(&a, &t, &wrong, &tc).is_err());
    }

    #[test]
    fn block_entries_are_united() {
        let d = SparseBlock::diagonal(2);
        let f = SparseBlock::dense(2, 2);
        let a = BlockMatrix::from_block_triplets(
            2,
            2,
            vec![
                (0, 0, Arc::clone(&d), vec![2.0, 2.0]),
                (0, 1, Arc::clone(&f), vec![-1.0, 0.5, 0.5, -1.0]),
                (1, 0, Arc::clone(&d), vec![-1.0, -1.0]),
                (1, 1, Arc::clone(&d), vec![2.0, 2.0]),
            ],
        )
        .unwrap();
        let accepted = vec![None, Some(Candidate::one(0, [1.0], [1.0], 0.0))];
        let t = TransferOperator::from_decisions(&[C, F], &accepted, 2).unwrap();
        let tc = BlockVector::from_flat(2, vec![1.0, 1.0]).unwrap();
        let ac = project(&a, &t, &tc, CoarsePattern::Full).unwrap();
        assert_eq!(ac.nodes(), 1);
        assert!(ac.descriptor(0).is_dense());
        // 2I + B + I*(-1) + 2I = [[2, 0.5], [0.5, 2]]
        assert_eq!(ac.block(0), &[2.0, 0.5, 0.5, 2.0]);
        check_test_vector(&a, &t, &ac, &tc).unwrap();
    }
}
