//! Capability traits at the seams between coarsening, the host data and the
//! solvers.
//!
//! Coarsening never sees a concrete matrix type: it reads rows through
//! [`RowAccess`] and node states through [`ClassFlags`]. The Krylov methods
//! see the operator through [`LinearOperator`] and the multigrid cycle
//! through [`Preconditioner`].

use crate::error::Result;
use crate::types::NodeClass;

/// Row-wise read access to a scalar (or condensed) square matrix.
pub trait RowAccess {
    /// Number of rows (= columns).
    fn dim(&self) -> usize;

    /// Sorted column indices and values of row `i`, diagonal included.
    fn row(&self, i: usize) -> (&[usize], &[f64]);

    /// For every entry `(i, j)` of row `i`, the value at `(j, i)`; aligned
    /// with [`row`](Self::row). Zero where the transpose position was
    /// structurally absent in the input.
    fn adjoint_row(&self, i: usize) -> &[f64];

    /// Diagonal entry `a_ii`.
    fn diagonal(&self, i: usize) -> f64;

    /// Value at `(i, j)`, if stored.
    fn entry(&self, i: usize, j: usize) -> Option<f64> {
        let (cols, vals) = self.row(i);
        cols.binary_search(&j).ok().map(|k| vals[k])
    }
}

/// Read access to the current classification of every node.
pub trait ClassFlags {
    /// Class of node `i`.
    fn class(&self, i: usize) -> NodeClass;

    /// `true` if node `i` is Fine.
    #[inline]
    fn is_fine(&self, i: usize) -> bool {
        self.class(i) == NodeClass::Fine
    }

    /// `true` if node `i` is Coarse.
    #[inline]
    fn is_coarse(&self, i: usize) -> bool {
        self.class(i) == NodeClass::Coarse
    }
}

impl ClassFlags for [NodeClass] {
    fn class(&self, i: usize) -> NodeClass {
        self[i]
    }
}

/// A square linear operator on flat vectors.
pub trait LinearOperator {
    /// Length of the vectors the operator acts on.
    fn len(&self) -> usize;

    /// `y = A x`.
    fn apply(&self, x: &[f64], y: &mut [f64]);

    /// `true` for a zero-dimensional operator.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Approximate inverse applied once per Krylov iteration.
pub trait Preconditioner {
    /// `z ~= A^{-1} r`. `z` is overwritten.
    ///
    /// # Errors
    ///
    /// Propagates failures of the underlying solve.
    fn precondition(&mut self, r: &[f64], z: &mut [f64]) -> Result<()>;
}

/// The identity preconditioner.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl Preconditioner for Identity {
    fn precondition(&mut self, r: &[f64], z: &mut [f64]) -> Result<()> {
        z.copy_from_slice(r);
        Ok(())
    }
}
