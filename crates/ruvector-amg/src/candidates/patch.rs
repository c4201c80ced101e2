//! Local patch operators and their inverses.
//!
//! A patch is a small set of nodes around the node being interpolated. Its
//! operator is the matrix restricted to the patch, with couplings that leave
//! the patch either lumped onto the diagonal scaled by the test vector
//! ([`Boundary::Filtered`]) or dropped ([`Boundary::Dirichlet`]). A filtered
//! operator annihilates the test vector, so it is stabilised by adding the
//! rank-one term `alpha * t t^T / |t|^2` before it is inverted.
//!
//! Everything here lives in an arena scope owned by the caller.

use crate::arena::ArenaScope;
use crate::block::lu;
use crate::error::{AmgError, Result};
use crate::traits::RowAccess;

use super::weights::Green;

/// Treatment of couplings that leave the patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    /// Lump `a_rm * t_m / t_r` onto `a_rr`, then stabilise.
    Filtered,
    /// Drop the coupling.
    Dirichlet,
}

/// Which operator a patch is cut from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Side {
    /// `A`, paired with the prolongation test vector.
    Prolongation,
    /// `A^T`, paired with the restriction test vector.
    Restriction,
    /// `(A + A^T) / 2`.
    Symmetric,
}

/// Position of global node `g` in `patch` (`patch[0]` is the centre, the
/// rest sorted).
#[inline]
pub(crate) fn local_index(patch: &[usize], g: usize) -> Option<usize> {
    if patch.first() == Some(&g) {
        return Some(0);
    }
    patch[1..].binary_search(&g).ok().map(|k| k + 1)
}

/// Inverse patch operator restricted to the nodes of interest, symmetrised.
#[derive(Debug)]
pub(crate) struct LocalGreen<'s> {
    interest: &'s [usize],
    g: &'s [f64],
}

impl LocalGreen<'_> {
    fn pos(&self, a: usize) -> Result<usize> {
        self.interest
            .iter()
            .position(|&x| x == a)
            .ok_or_else(|| AmgError::StructuralInconsistency(format!("node {a} is not in the local system")))
    }
}

impl Green for LocalGreen<'_> {
    #[inline]
    fn g(&self, a: usize, b: usize) -> Result<f64> {
        let q = self.interest.len();
        Ok(self.g[self.pos(a)? * q + self.pos(b)?])
    }
}

/// Assemble, stabilise and factor the patch operator, then extract its
/// inverse on `interest` (every node of which must lie in `patch`).
///
/// Returns `Ok(None)` when the patch operator is singular; the caller treats
/// that as "no candidate". Arena failures are returned as errors.
#[allow(clippy::too_many_arguments)]
pub(crate) fn local_green<'s>(
    scope: &'s ArenaScope<'_>,
    view: &dyn RowAccess,
    side: Side,
    t: &[f64],
    boundary: Boundary,
    patch: &[usize],
    interest: &[usize],
) -> Result<Option<LocalGreen<'s>>> {
    let n = patch.len();
    let m: &mut [f64] = scope.alloc_slice(n * n)?;
    assemble(view, side, t, boundary, patch, m);
    if boundary == Boundary::Filtered {
        stabilise(t, patch, n, m);
    }

    let piv: &mut [usize] = scope.alloc_slice(n)?;
    match lu::factor_in_place(n, m, piv) {
        Ok(()) => {}
        Err(AmgError::SingularPivot { column, pivot, .. }) => {
            tracing::trace!(centre = patch[0], column, pivot, "singular patch operator");
            return Ok(None);
        }
        Err(e) => return Err(e),
    }

    let q = interest.len();
    let ids: &mut [usize] = scope.alloc_slice(q)?;
    ids.copy_from_slice(interest);
    let g: &mut [f64] = scope.alloc_slice(q * q)?;
    let col: &mut [f64] = scope.alloc_slice(n)?;
    for (b, &node_b) in interest.iter().enumerate() {
        let lb = local_index(patch, node_b).ok_or_else(|| {
            AmgError::StructuralInconsistency(format!("node {node_b} of interest outside patch"))
        })?;
        col.fill(0.0);
        col[lb] = 1.0;
        lu::solve_in_place(n, m, piv, col);
        for (a, &node_a) in interest.iter().enumerate() {
            let la = local_index(patch, node_a).ok_or_else(|| {
                AmgError::StructuralInconsistency(format!("node {node_a} of interest outside patch"))
            })?;
            g[a * q + b] = col[la];
        }
    }
    for a in 0..q {
        for b in a + 1..q {
            let s = 0.5 * (g[a * q + b] + g[b * q + a]);
            g[a * q + b] = s;
            g[b * q + a] = s;
        }
    }

    Ok(Some(LocalGreen { interest: ids, g }))
}

fn assemble(view: &dyn RowAccess, side: Side, t: &[f64], boundary: Boundary, patch: &[usize], m: &mut [f64]) {
    let n = patch.len();
    m.fill(0.0);
    for (lr, &r) in patch.iter().enumerate() {
        let (cols, vals) = view.row(r);
        let adj = view.adjoint_row(r);
        for (k, &c) in cols.iter().enumerate() {
            let a = match side {
                Side::Prolongation => vals[k],
                Side::Restriction => adj[k],
                Side::Symmetric => 0.5 * (vals[k] + adj[k]),
            };
            match local_index(patch, c) {
                Some(lc) => m[lr * n + lc] += a,
                None => {
                    if boundary == Boundary::Filtered && t[r] != 0.0 {
                        m[lr * n + lr] += a * t[c] / t[r];
                    }
                }
            }
        }
    }
}

fn stabilise(t: &[f64], patch: &[usize], n: usize, m: &mut [f64]) {
    let alpha = (0..n).fold(0.0f64, |acc, r| acc.max(m[r * n + r].abs()));
    let norm2: f64 = patch.iter().map(|&g| t[g] * t[g]).sum();
    if alpha == 0.0 || norm2 == 0.0 {
        return;
    }
    let s = alpha / norm2;
    for (lr, &r) in patch.iter().enumerate() {
        for (lc, &c) in patch.iter().enumerate() {
            m[lr * n + lc] += s * t[r] * t[c];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::{Arena, Region};
    use crate::matrix::{BlockMatrix, BlockVector};
    use crate::types::CsrMatrix;
    use approx::assert_relative_eq;

    fn path(n: usize) -> crate::matrix::ScalarView {
        let mut e = Vec::new();
        for i in 0..n {
            e.push((i, i, 2.0));
            if i + 1 < n {
                e.push((i, i + 1, -1.0));
                e.push((i + 1, i, -1.0));
            }
        }
        let a = BlockMatrix::from_csr(&CsrMatrix::from_coo(n, n, e)).unwrap();
        let t = BlockVector::from_flat(1, vec![1.0; n]).unwrap();
        a.condense(&t, &t)
    }

    #[test]
    fn filtered_boundary_patch_is_stabilised_diagonal() {
        // Patch {0, 1} of a 5-point path: lumped and stabilised operator is
        // diag(3, 2), so G = diag(1/3, 1/2).
        let view = path(5);
        let t = vec![1.0; 5];
        let arena = Arena::with_capacity(4096);
        let scope = arena.scope(Region::Bottom).unwrap();
        let g = local_green(&scope, &view, Side::Prolongation, &t, Boundary::Filtered, &[0, 1], &[0, 1])
            .unwrap()
            .unwrap();
        assert_relative_eq!(g.g(0, 0).unwrap(), 1.0 / 3.0, epsilon = 1e-14);
        assert_relative_eq!(g.g(1, 1).unwrap(), 0.5, epsilon = 1e-14);
        assert_relative_eq!(g.g(0, 1).unwrap(), 0.0, epsilon = 1e-14);
    }

    #[test]
    fn dirichlet_patch_drops_outside_couplings() {
        let view = path(5);
        let t = vec![1.0; 5];
        let arena = Arena::with_capacity(4096);
        let scope = arena.scope(Region::Bottom).unwrap();
        // [[2, -1], [-1, 2]]^-1 = [[2, 1], [1, 2]] / 3
        let g = local_green(&scope, &view, Side::Restriction, &t, Boundary::Dirichlet, &[2, 3], &[2, 3])
            .unwrap()
            .unwrap();
        assert_relative_eq!(g.g(2, 2).unwrap(), 2.0 / 3.0, epsilon = 1e-14);
        assert_relative_eq!(g.g(2, 3).unwrap(), 1.0 / 3.0, epsilon = 1e-14);
    }

    #[test]
    fn lookup_outside_the_local_system_is_an_error() {
        let view = path(5);
        let t = vec![1.0; 5];
        let arena = Arena::with_capacity(4096);
        let scope = arena.scope(Region::Bottom).unwrap();
        let g = local_green(&scope, &view, Side::Prolongation, &t, Boundary::Dirichlet, &[2, 1, 3], &[2, 1])
            .unwrap()
            .unwrap();
        assert!(g.g(2, 1).is_ok());
        assert!(matches!(g.g(2, 3), Err(AmgError::StructuralInconsistency(_))));
        assert!(matches!(g.g(4, 4), Err(AmgError::StructuralInconsistency(_))));
    }

    #[test]
    fn scratch_is_returned_with_the_scope() {
        let view = path(5);
        let t = vec![1.0; 5];
        let arena = Arena::with_capacity(4096);
        {
            let scope = arena.scope(Region::Bottom).unwrap();
            let _ = local_green(&scope, &view, Side::Symmetric, &t, Boundary::Filtered, &[2, 1, 3], &[2, 1, 3]).unwrap();
            assert!(arena.used(Region::Bottom) > 0);
        }
        assert_eq!(arena.used(Region::Bottom), 0);
    }

    #[test]
    fn local_index_checks_centre_then_sorted_rest() {
        let patch = [4, 1, 3, 7];
        assert_eq!(local_index(&patch, 4), Some(0));
        assert_eq!(local_index(&patch, 7), Some(3));
        assert_eq!(local_index(&patch, 2), None);
    }
}
