//! Prolongation and restriction between two levels.
//!
//! A [`TransferOperator`] stores one [`TransferRow`] per fine node. Coarse
//! nodes are injected; Fine nodes interpolate from at most two coarse
//! parents with separate prolongation and restriction weights. Weights are
//! scalar and act on every component of a node block alike, so
//! `P = W (x) I_b`.

use serde::{Deserialize, Serialize};

use crate::candidates::Candidate;
use crate::error::{AmgError, Result};
use crate::types::NodeClass;

/// Interpolation of one Fine node from coarse parents.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interpolation {
    len: u8,
    parents: [usize; 2],
    prolongation: [f64; 2],
    restriction: [f64; 2],
}

impl Interpolation {
    /// Coarse indices of the parents.
    #[inline]
    pub fn parents(&self) -> &[usize] {
        &self.parents[..self.len as usize]
    }

    /// Prolongation weights, aligned with [`parents`](Self::parents).
    #[inline]
    pub fn prolongation(&self) -> &[f64] {
        &self.prolongation[..self.len as usize]
    }

    /// Restriction weights, aligned with [`parents`](Self::parents).
    #[inline]
    pub fn restriction(&self) -> &[f64] {
        &self.restriction[..self.len as usize]
    }
}

/// How one fine node is reached from the coarse level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TransferRow {
    /// The node survives as coarse node `I`.
    Coarse(usize),
    /// The node is interpolated.
    Interpolated(Interpolation),
}

/// Per-level transfer operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferOperator {
    rows: Vec<TransferRow>,
    coarse_nodes: Vec<usize>,
    block_size: usize,
}

impl TransferOperator {
    /// Build from final classes and the accepted candidate of every Fine
    /// node (indexed by fine node; ignored for Coarse nodes).
    ///
    /// # Errors
    ///
    /// [`AmgError::StructuralInconsistency`] if a node is Undecided, a Fine
    /// node has no accepted candidate, or a parent is not Coarse.
    pub fn from_decisions(
        classes: &[NodeClass],
        accepted: &[Option<Candidate>],
        block_size: usize,
    ) -> Result<Self> {
        if classes.len() != accepted.len() {
            return Err(AmgError::StructuralInconsistency(format!(
                "{} classes but {} accepted entries",
                classes.len(),
                accepted.len()
            )));
        }
        let mut coarse_index = vec![usize::MAX; classes.len()];
        let mut coarse_nodes = Vec::new();
        for (i, class) in classes.iter().enumerate() {
            if *class == NodeClass::Coarse {
                coarse_index[i] = coarse_nodes.len();
                coarse_nodes.push(i);
            }
        }

        let mut rows = Vec::with_capacity(classes.len());
        for (i, class) in classes.iter().enumerate() {
            let row = match class {
                NodeClass::Coarse => TransferRow::Coarse(coarse_index[i]),
                NodeClass::Undecided => {
                    return Err(AmgError::StructuralInconsistency(format!(
                        "node {i} left undecided"
                    )))
                }
                NodeClass::Fine => {
                    let c = accepted[i].ok_or_else(|| {
                        AmgError::StructuralInconsistency(format!("fine node {i} has no parents"))
                    })?;
                    let mut interp = Interpolation {
                        len: c.parents().len() as u8,
                        parents: [0; 2],
                        prolongation: [0.0; 2],
                        restriction: [0.0; 2],
                    };
                    for (k, &p) in c.parents().iter().enumerate() {
                        if classes[p] != NodeClass::Coarse {
                            return Err(AmgError::StructuralInconsistency(format!(
                                "parent {p} of fine node {i} is {:?}",
                                classes[p]
                            )));
                        }
                        interp.parents[k] = coarse_index[p];
                        interp.prolongation[k] = c.prolongation()[k];
                        interp.restriction[k] = c.restriction()[k];
                    }
                    TransferRow::Interpolated(interp)
                }
            };
            rows.push(row);
        }

        Ok(Self {
            rows,
            coarse_nodes,
            block_size,
        })
    }

    /// Number of fine nodes.
    #[inline]
    pub fn fine_len(&self) -> usize {
        self.rows.len()
    }

    /// Number of coarse nodes.
    #[inline]
    pub fn coarse_len(&self) -> usize {
        self.coarse_nodes.len()
    }

    /// Components per node.
    #[inline]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Row of fine node `i`.
    #[inline]
    pub fn row(&self, i: usize) -> &TransferRow {
        &self.rows[i]
    }

    /// All rows.
    pub fn rows(&self) -> &[TransferRow] {
        &self.rows
    }

    /// Fine index of every coarse node.
    pub fn coarse_nodes(&self) -> &[usize] {
        &self.coarse_nodes
    }

    /// Number of interpolated nodes.
    pub fn interpolated(&self) -> usize {
        self.rows.len() - self.coarse_nodes.len()
    }

    /// Stored node weights of `P`.
    pub fn nnz(&self) -> usize {
        self.rows
            .iter()
            .map(|r| match r {
                TransferRow::Coarse(_) => 1,
                TransferRow::Interpolated(p) => p.parents().len(),
            })
            .sum()
    }

    /// Prolongation weights of row `i` as `(coarse index, weight)` pairs.
    pub fn prolongation_row(&self, i: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.weights(i, false)
    }

    /// Restriction weights of fine node `i` as `(coarse index, weight)`
    /// pairs, i.e. column `i` of `R`.
    pub fn restriction_row(&self, i: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.weights(i, true)
    }

    fn weights(&self, i: usize, restriction: bool) -> impl Iterator<Item = (usize, f64)> + '_ {
        let (parents, w): (&[usize], &[f64]) = match &self.rows[i] {
            TransferRow::Coarse(c) => (std::slice::from_ref(c), &[1.0]),
            TransferRow::Interpolated(p) if restriction => (p.parents(), p.restriction()),
            TransferRow::Interpolated(p) => (p.parents(), p.prolongation()),
        };
        parents.iter().copied().zip(w.iter().copied())
    }

    /// `xf += P xc`.
    pub fn prolongate_add(&self, xc: &[f64], xf: &mut [f64]) {
        let b = self.block_size;
        debug_assert_eq!(xc.len(), self.coarse_len() * b);
        debug_assert_eq!(xf.len(), self.fine_len() * b);
        for i in 0..self.rows.len() {
            let dst = &mut xf[i * b..(i + 1) * b];
            for (c, w) in self.prolongation_row(i) {
                for (d, s) in dst.iter_mut().zip(&xc[c * b..(c + 1) * b]) {
                    *d += w * s;
                }
            }
        }
    }

    /// `xf = P xc`.
    pub fn prolongate(&self, xc: &[f64], xf: &mut [f64]) {
        xf.fill(0.0);
        self.prolongate_add(xc, xf);
    }

    /// `xc = R xf`.
    pub fn restrict(&self, xf: &[f64], xc: &mut [f64]) {
        let b = self.block_size;
        debug_assert_eq!(xc.len(), self.coarse_len() * b);
        debug_assert_eq!(xf.len(), self.fine_len() * b);
        xc.fill(0.0);
        for i in 0..self.rows.len() {
            let src = &xf[i * b..(i + 1) * b];
            for (c, w) in self.restriction_row(i) {
                for (d, s) in xc[c * b..(c + 1) * b].iter_mut().zip(src) {
                    *d += w * s;
                }
            }
        }
    }

    /// `xc[I] = xf[fine(I)]`.
    pub fn inject(&self, xf: &[f64], xc: &mut [f64]) {
        let b = self.block_size;
        for (c, &i) in self.coarse_nodes.iter().enumerate() {
            xc[c * b..(c + 1) * b].copy_from_slice(&xf[i * b..(i + 1) * b]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use NodeClass::{Coarse as C, Fine as F};

    fn one_d() -> TransferOperator {
        let accepted = vec![
            Some(Candidate::one(1, [1.0], [1.0], 1.0)),
            None,
            Some(Candidate::two(1, 3, [0.25, 0.75], [0.5, 0.5], 1.0)),
            None,
            Some(Candidate::one(3, [1.0], [2.0], 1.0)),
        ];
        TransferOperator::from_decisions(&[F, C, F, C, F], &accepted, 1).unwrap()
    }

    #[test]
    fn coarse_indices_follow_fine_order() {
        let t = one_d();
        assert_eq!(t.coarse_nodes(), &[1, 3]);
        assert_eq!(t.row(3), &TransferRow::Coarse(1));
        assert_eq!(t.nnz(), 6);
        assert_eq!(t.interpolated(), 3);
    }

    #[test]
    fn prolongation_and_restriction_use_their_own_weights() {
        let t = one_d();
        let mut xf = [0.0; 5];
        t.prolongate(&[4.0, 8.0], &mut xf);
        assert_eq!(xf, [4.0, 4.0, 7.0, 8.0, 8.0]);

        let mut xc = [0.0; 2];
        t.restrict(&[1.0, 1.0, 1.0, 1.0, 1.0], &mut xc);
        assert_eq!(xc, [2.5, 3.5]);

        t.inject(&[0.0, 5.0, 0.0, 6.0, 0.0], &mut xc);
        assert_eq!(xc, [5.0, 6.0]);
    }

    #[test]
    fn fine_parent_is_rejected() {
        let accepted = vec![None, Some(Candidate::one(2, [1.0], [1.0], 0.0)), Some(Candidate::one(0, [1.0], [1.0], 0.0))];
        let err = TransferOperator::from_decisions(&[C, F, F], &accepted, 1).unwrap_err();
        assert!(matches!(err, AmgError::StructuralInconsistency(_)));
    }

    #[test]
    fn blocks_share_node_weights() {
        let accepted = vec![None, Some(Candidate::one(0, [0.5], [0.5], 0.0))];
        let t = TransferOperator::from_decisions(&[C, F], &accepted, 2).unwrap();
        let mut xf = [0.0; 4];
        t.prolongate(&[2.0, 4.0], &mut xf);
        assert_eq!(xf, [2.0, 4.0, 1.0, 2.0]);
    }
}
