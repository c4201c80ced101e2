//! Immutable structural descriptors for sparse blocks.
//!
//! A [`SparseBlock`] records which `(row, col)` positions of a small dense
//! block exist and at which scalar offset each one is stored. Every matrix
//! entry of the same type shares one descriptor behind an `Arc`, so nodes
//! carry only their packed values. [`SparseVector`] does the same for the
//! components of a per-node vector block.
//!
//! Structure and numbers are kept apart: [`BlockProduct`] and
//! [`BlockMatVec`] are analysed once from descriptors and then evaluated
//! against many value slices without re-deriving anything.

use std::sync::Arc;

use crate::error::{AmgError, Result};

// ---------------------------------------------------------------------------
// SparseBlock
// ---------------------------------------------------------------------------

/// Sparsity pattern of a `rows x cols` block.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SparseBlock {
    rows: usize,
    cols: usize,
    /// Row-major `rows * cols` table of packed offsets.
    offsets: Vec<Option<usize>>,
    /// Packed offset -> position, row-major order.
    entries: Vec<(usize, usize)>,
}

impl SparseBlock {
    /// Build a descriptor from the positions that exist.
    ///
    /// Positions are sorted row-major and deduplicated, so the packed order
    /// does not depend on the input order.
    ///
    /// # Errors
    ///
    /// [`AmgError::StructuralInconsistency`] if a position lies outside the
    /// block or the block has a zero dimension.
    pub fn from_entries(
        rows: usize,
        cols: usize,
        positions: impl IntoIterator<Item = (usize, usize)>,
    ) -> Result<Arc<Self>> {
        if rows == 0 || cols == 0 {
            return Err(AmgError::StructuralInconsistency(format!(
                "block descriptor with zero dimension {rows}x{cols}"
            )));
        }
        let mut entries: Vec<(usize, usize)> = positions.into_iter().collect();
        if let Some(&(r, c)) = entries.iter().find(|&&(r, c)| r >= rows || c >= cols) {
            return Err(AmgError::StructuralInconsistency(format!(
                "block position ({r}, {c}) outside {rows}x{cols}"
            )));
        }
        entries.sort_unstable();
        entries.dedup();

        let mut offsets = vec![None; rows * cols];
        for (k, &(r, c)) in entries.iter().enumerate() {
            offsets[r * cols + c] = Some(k);
        }
        Ok(Arc::new(Self {
            rows,
            cols,
            offsets,
            entries,
        }))
    }

    /// Fully populated block.
    pub fn dense(rows: usize, cols: usize) -> Arc<Self> {
        let rows = rows.max(1);
        let cols = cols.max(1);
        let entries: Vec<_> = (0..rows)
            .flat_map(|r| (0..cols).map(move |c| (r, c)))
            .collect();
        Arc::new(Self {
            rows,
            cols,
            offsets: (0..rows * cols).map(Some).collect(),
            entries,
        })
    }

    /// Square block holding only its diagonal.
    pub fn diagonal(n: usize) -> Arc<Self> {
        let n = n.max(1);
        let mut offsets = vec![None; n * n];
        for r in 0..n {
            offsets[r * n + r] = Some(r);
        }
        Arc::new(Self {
            rows: n,
            cols: n,
            offsets,
            entries: (0..n).map(|r| (r, r)).collect(),
        })
    }

    /// The 1x1 block of a scalar problem.
    pub fn scalar() -> Arc<Self> {
        Self::dense(1, 1)
    }

    /// Number of block rows.
    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of block columns.
    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Number of stored scalars.
    #[inline]
    pub fn nnz(&self) -> usize {
        self.entries.len()
    }

    /// Packed offset of `(r, c)`, if present.
    #[inline]
    pub fn offset(&self, r: usize, c: usize) -> Option<usize> {
        if r < self.rows && c < self.cols {
            self.offsets[r * self.cols + c]
        } else {
            None
        }
    }

    /// Position stored at packed offset `k`.
    #[inline]
    pub fn position(&self, k: usize) -> (usize, usize) {
        self.entries[k]
    }

    /// All positions in packed order.
    #[inline]
    pub fn positions(&self) -> &[(usize, usize)] {
        &self.entries
    }

    /// `true` for a square block.
    pub fn is_square(&self) -> bool {
        self.rows == self.cols
    }

    /// `true` if every position exists.
    pub fn is_dense(&self) -> bool {
        self.entries.len() == self.rows * self.cols
    }

    /// `true` for a square block whose diagonal is fully present.
    pub fn has_full_diagonal(&self) -> bool {
        self.is_square() && (0..self.rows).all(|r| self.offset(r, r).is_some())
    }

    /// `true` if every position of `other` exists in `self`.
    pub fn contains(&self, other: &SparseBlock) -> bool {
        self.rows == other.rows
            && self.cols == other.cols
            && other.entries.iter().all(|&(r, c)| self.offset(r, c).is_some())
    }

    /// Union of two patterns of equal shape.
    ///
    /// # Errors
    ///
    /// [`AmgError::StructuralInconsistency`] on a shape mismatch.
    pub fn union(&self, other: &SparseBlock) -> Result<Arc<Self>> {
        if self.rows != other.rows || self.cols != other.cols {
            return Err(AmgError::StructuralInconsistency(format!(
                "cannot unite {}x{} and {}x{} blocks",
                self.rows, self.cols, other.rows, other.cols
            )));
        }
        Self::from_entries(
            self.rows,
            self.cols,
            self.entries.iter().chain(other.entries.iter()).copied(),
        )
    }

    /// Transposed pattern, packed row-major in the transposed block.
    pub fn transpose(&self) -> Arc<Self> {
        let mut offsets = vec![None; self.rows * self.cols];
        let mut entries: Vec<(usize, usize)> = self.entries.iter().map(|&(r, c)| (c, r)).collect();
        entries.sort_unstable();
        for (k, &(r, c)) in entries.iter().enumerate() {
            offsets[r * self.rows + c] = Some(k);
        }
        Arc::new(Self {
            rows: self.cols,
            cols: self.rows,
            offsets,
            entries,
        })
    }

    /// Expand packed values into a row-major dense buffer.
    pub fn scatter_dense(&self, values: &[f64], dense: &mut [f64]) {
        debug_assert_eq!(values.len(), self.nnz());
        debug_assert_eq!(dense.len(), self.rows * self.cols);
        dense.fill(0.0);
        for (k, &(r, c)) in self.entries.iter().enumerate() {
            dense[r * self.cols + c] = values[k];
        }
    }

    /// Gather packed values from a row-major dense buffer. Positions outside
    /// the pattern are returned as the largest magnitude dropped.
    pub fn gather_dense(&self, dense: &[f64], values: &mut [f64]) -> f64 {
        debug_assert_eq!(values.len(), self.nnz());
        let mut dropped = 0.0f64;
        for r in 0..self.rows {
            for c in 0..self.cols {
                let v = dense[r * self.cols + c];
                match self.offset(r, c) {
                    Some(k) => values[k] = v,
                    None => dropped = dropped.max(v.abs()),
                }
            }
        }
        dropped
    }
}

// ---------------------------------------------------------------------------
// SparseVector
// ---------------------------------------------------------------------------

/// Components present in a per-node vector block.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SparseVector {
    len: usize,
    offsets: Vec<Option<usize>>,
    components: Vec<usize>,
}

impl SparseVector {
    /// All `len` components present.
    pub fn full(len: usize) -> Arc<Self> {
        let len = len.max(1);
        Arc::new(Self {
            len,
            offsets: (0..len).map(Some).collect(),
            components: (0..len).collect(),
        })
    }

    /// Only `components` present.
    ///
    /// # Errors
    ///
    /// [`AmgError::StructuralInconsistency`] if a component is out of range
    /// or none is given.
    pub fn from_components(len: usize, components: impl IntoIterator<Item = usize>) -> Result<Arc<Self>> {
        let mut components: Vec<usize> = components.into_iter().collect();
        components.sort_unstable();
        components.dedup();
        if components.is_empty() || components.last().map_or(false, |&c| c >= len) {
            return Err(AmgError::StructuralInconsistency(format!(
                "invalid vector components {components:?} for block length {len}"
            )));
        }
        let mut offsets = vec![None; len];
        for (k, &c) in components.iter().enumerate() {
            offsets[c] = Some(k);
        }
        Ok(Arc::new(Self {
            len,
            offsets,
            components,
        }))
    }

    /// Logical block length.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always `false`; a vector block has at least one component.
    #[inline]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Number of stored components.
    #[inline]
    pub fn nnz(&self) -> usize {
        self.components.len()
    }

    /// Packed offset of component `c`.
    #[inline]
    pub fn offset(&self, c: usize) -> Option<usize> {
        self.offsets.get(c).copied().flatten()
    }

    /// Stored components in packed order.
    #[inline]
    pub fn components(&self) -> &[usize] {
        &self.components
    }
}

// ---------------------------------------------------------------------------
// Product descriptors
// ---------------------------------------------------------------------------

/// Precomputed `C (+)= alpha * A * B` for fixed block patterns.
#[derive(Debug, Clone)]
pub struct BlockProduct {
    result: Arc<SparseBlock>,
    /// `(c_off, a_off, b_off)` triples.
    terms: Vec<(usize, usize, usize)>,
}

impl BlockProduct {
    /// Analyse `A * B` and derive the pattern of the product.
    ///
    /// # Errors
    ///
    /// [`AmgError::StructuralInconsistency`] if the inner dimensions differ
    /// or the product is structurally empty.
    pub fn analyse(a: &SparseBlock, b: &SparseBlock) -> Result<Self> {
        let positions = Self::product_positions(a, b)?;
        let result = SparseBlock::from_entries(a.rows(), b.cols(), positions.iter().map(|&(r, c, _, _)| (r, c)))?;
        Self::bind(result, &positions)
    }

    /// Analyse `A * B` accumulated into an existing pattern.
    ///
    /// # Errors
    ///
    /// [`AmgError::StructuralInconsistency`] if the product has an entry the
    /// target pattern lacks.
    pub fn into_target(a: &SparseBlock, b: &SparseBlock, target: &Arc<SparseBlock>) -> Result<Self> {
        let positions = Self::product_positions(a, b)?;
        if target.rows() != a.rows() || target.cols() != b.cols() {
            return Err(AmgError::StructuralInconsistency(format!(
                "product target {}x{} does not match {}x{}",
                target.rows(),
                target.cols(),
                a.rows(),
                b.cols()
            )));
        }
        Self::bind(Arc::clone(target), &positions)
    }

    fn product_positions(a: &SparseBlock, b: &SparseBlock) -> Result<Vec<(usize, usize, usize, usize)>> {
        if a.cols() != b.rows() {
            return Err(AmgError::StructuralInconsistency(format!(
                "block product inner dimensions differ: {}x{} * {}x{}",
                a.rows(),
                a.cols(),
                b.rows(),
                b.cols()
            )));
        }
        let mut positions = Vec::new();
        for (a_off, &(r, k)) in a.positions().iter().enumerate() {
            for c in 0..b.cols() {
                if let Some(b_off) = b.offset(k, c) {
                    positions.push((r, c, a_off, b_off));
                }
            }
        }
        if positions.is_empty() {
            return Err(AmgError::StructuralInconsistency(
                "block product is structurally empty".into(),
            ));
        }
        Ok(positions)
    }

    fn bind(result: Arc<SparseBlock>, positions: &[(usize, usize, usize, usize)]) -> Result<Self> {
        let mut terms: Vec<(usize, usize, usize)> = positions
            .iter()
            .map(|&(r, c, a_off, b_off)| {
                let c_off = result.offset(r, c).ok_or_else(|| {
                    AmgError::StructuralInconsistency(format!("product entry ({r}, {c}) missing from target pattern"))
                })?;
                Ok((c_off, a_off, b_off))
            })
            .collect::<Result<_>>()?;
        terms.sort_unstable();
        Ok(Self { result, terms })
    }

    /// Pattern of the product (or of the target it accumulates into).
    pub fn result(&self) -> &Arc<SparseBlock> {
        &self.result
    }

    /// `c += alpha * a * b`.
    #[inline]
    pub fn apply_add(&self, alpha: f64, a: &[f64], b: &[f64], c: &mut [f64]) {
        for &(c_off, a_off, b_off) in &self.terms {
            c[c_off] += alpha * a[a_off] * b[b_off];
        }
    }
}

/// Precomputed block mat-vec `y (+)= alpha * A x` (or `A^T x`).
#[derive(Debug, Clone)]
pub struct BlockMatVec {
    /// `(y_off, a_off, x_off)` triples.
    terms: Vec<(usize, usize, usize)>,
}

impl BlockMatVec {
    /// Analyse `y = A x`.
    ///
    /// # Errors
    ///
    /// [`AmgError::StructuralInconsistency`] if the shapes disagree or a
    /// product term would land on a component `y` does not store.
    pub fn analyse(a: &SparseBlock, x: &SparseVector, y: &SparseVector) -> Result<Self> {
        Self::build(a, x, y, false)
    }

    /// Analyse `y = A^T x`.
    ///
    /// # Errors
    ///
    /// Same as [`analyse`](Self::analyse).
    pub fn analyse_transposed(a: &SparseBlock, x: &SparseVector, y: &SparseVector) -> Result<Self> {
        Self::build(a, x, y, true)
    }

    fn build(a: &SparseBlock, x: &SparseVector, y: &SparseVector, transposed: bool) -> Result<Self> {
        let (out_len, in_len) = if transposed {
            (a.cols(), a.rows())
        } else {
            (a.rows(), a.cols())
        };
        if x.len() != in_len || y.len() != out_len {
            return Err(AmgError::StructuralInconsistency(format!(
                "mat-vec shape mismatch: block {}x{}, x {}, y {}",
                a.rows(),
                a.cols(),
                x.len(),
                y.len()
            )));
        }
        let mut terms = Vec::with_capacity(a.nnz());
        for (a_off, &(r, c)) in a.positions().iter().enumerate() {
            let (out, inp) = if transposed { (c, r) } else { (r, c) };
            let Some(x_off) = x.offset(inp) else { continue };
            let y_off = y.offset(out).ok_or_else(|| {
                AmgError::StructuralInconsistency(format!(
                    "mat-vec writes component {out} that the result block does not store"
                ))
            })?;
            terms.push((y_off, a_off, x_off));
        }
        terms.sort_unstable();
        Ok(Self { terms })
    }

    /// `y += alpha * A x` on packed values.
    #[inline]
    pub fn apply_add(&self, alpha: f64, a: &[f64], x: &[f64], y: &mut [f64]) {
        for &(y_off, a_off, x_off) in &self.terms {
            y[y_off] += alpha * a[a_off] * x[x_off];
        }
    }
}
