//! Block sparse matrices and vectors.
//!
//! [`BlockMatrix`] is CSR over nodes whose entries are small blocks. Each
//! entry references an interned [`SparseBlock`] descriptor and a packed run
//! of values. Every entry `(i, j)` also knows the position of `(j, i)`, its
//! adjoint; the constructor inserts explicit zero blocks where the transpose
//! position is structurally absent, so the transposed product and the
//! restriction-side heuristics can walk rows only.
//!
//! Coarsening does not work on blocks. [`BlockMatrix::condense`] collapses
//! every block to one scalar weighted by the test vector, giving a
//! [`ScalarView`] that implements [`RowAccess`].

use std::collections::HashMap;
use std::sync::Arc;

use crate::block::{self, BlockMatVec, SparseBlock, SparseVector};
use crate::error::{AmgError, Result, ValidationError};
use crate::traits::{LinearOperator, RowAccess};
use crate::types::CsrMatrix;
use crate::validation::validate_system_matrix;

/// `|t|` below this is treated as zero when condensing.
const CONDENSE_EPS: f64 = 1e-300;

// ---------------------------------------------------------------------------
// BlockVector
// ---------------------------------------------------------------------------

/// A vector with one fully populated block per node.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockVector {
    block: Arc<SparseVector>,
    values: Vec<f64>,
}

impl BlockVector {
    /// Zero vector over `nodes` nodes.
    pub fn zeros(nodes: usize, block_size: usize) -> Self {
        let block = SparseVector::full(block_size);
        let values = vec![0.0; nodes * block.len()];
        Self { block, values }
    }

    /// Wrap flat storage of `nodes * block_size` values.
    ///
    /// # Errors
    ///
    /// [`ValidationError::DimensionMismatch`] if the length is not a
    /// multiple of the block size.
    pub fn from_flat(block_size: usize, values: Vec<f64>) -> Result<Self> {
        if block_size == 0 || values.len() % block_size != 0 {
            return Err(ValidationError::DimensionMismatch(format!(
                "vector of length {} is not a multiple of block size {}",
                values.len(),
                block_size
            ))
            .into());
        }
        Ok(Self {
            block: SparseVector::full(block_size),
            values,
        })
    }

    /// Number of nodes.
    #[inline]
    pub fn nodes(&self) -> usize {
        self.values.len() / self.block.len()
    }

    /// Components per node.
    #[inline]
    pub fn block_size(&self) -> usize {
        self.block.len()
    }

    /// Block descriptor.
    pub fn descriptor(&self) -> &Arc<SparseVector> {
        &self.block
    }

    /// Block of node `i`.
    #[inline]
    pub fn node(&self, i: usize) -> &[f64] {
        let b = self.block.len();
        &self.values[i * b..(i + 1) * b]
    }

    /// Mutable block of node `i`.
    #[inline]
    pub fn node_mut(&mut self, i: usize) -> &mut [f64] {
        let b = self.block.len();
        &mut self.values[i * b..(i + 1) * b]
    }

    /// Mean of the components of each node.
    pub fn node_means(&self) -> Vec<f64> {
        let b = self.block.len() as f64;
        self.values
            .chunks_exact(self.block.len())
            .map(|c| c.iter().sum::<f64>() / b)
            .collect()
    }

    /// Scale so the largest magnitude is one. A zero vector is left alone.
    pub fn normalize_max(&mut self) {
        let m = self.values.iter().fold(0.0f64, |m, v| m.max(v.abs()));
        if m > 0.0 {
            block::scale(&mut self.values, 1.0 / m);
        }
    }

    /// Flat values.
    #[inline]
    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    /// Mutable flat values.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.values
    }

    /// Consume into flat values.
    pub fn into_vec(self) -> Vec<f64> {
        self.values
    }
}

// ---------------------------------------------------------------------------
// SparsityPattern
// ---------------------------------------------------------------------------

/// Structure-only CSR pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SparsityPattern {
    row_ptr: Vec<usize>,
    col_indices: Vec<usize>,
}

impl SparsityPattern {
    /// Sorted columns of row `i`.
    #[inline]
    pub fn row(&self, i: usize) -> &[usize] {
        &self.col_indices[self.row_ptr[i]..self.row_ptr[i + 1]]
    }

    /// Number of rows.
    pub fn rows(&self) -> usize {
        self.row_ptr.len() - 1
    }

    /// Number of stored positions.
    pub fn nnz(&self) -> usize {
        self.col_indices.len()
    }
}

// ---------------------------------------------------------------------------
// BlockMatrix
// ---------------------------------------------------------------------------

/// Square block sparse matrix with adjoint positions.
#[derive(Debug, Clone)]
pub struct BlockMatrix {
    n: usize,
    block_size: usize,
    row_ptr: Vec<usize>,
    col_idx: Vec<usize>,
    diag_pos: Vec<usize>,
    adjoint: Vec<usize>,
    /// Start of each entry's packed values; length `nnz + 1`.
    value_offset: Vec<usize>,
    desc_id: Vec<u32>,
    descs: Vec<Arc<SparseBlock>>,
    matvec: Vec<BlockMatVec>,
    matvec_t: Vec<BlockMatVec>,
    values: Vec<f64>,
}

/// One block entry handed to [`BlockMatrix::from_block_triplets`].
pub type BlockTriplet = (usize, usize, Arc<SparseBlock>, Vec<f64>);

impl BlockMatrix {
    /// Build a scalar (1x1 block) matrix from CSR.
    ///
    /// # Errors
    ///
    /// [`AmgError::InvalidInput`] if the matrix is not square, has a bad
    /// structure, non-finite values or a missing diagonal.
    pub fn from_csr(csr: &CsrMatrix<f64>) -> Result<Self> {
        validate_system_matrix(csr)?;
        let scalar = SparseBlock::scalar();
        let triplets = (0..csr.rows).flat_map(|i| {
            let scalar = Arc::clone(&scalar);
            csr.row_entries(i)
                .map(move |(j, &v)| (i, j, Arc::clone(&scalar), vec![v]))
        });
        Self::from_block_triplets(csr.rows, 1, triplets)
    }

    /// Build from `(row, col, descriptor, packed values)` entries.
    ///
    /// Entries at the same position are added (their patterns united).
    /// Missing adjoint positions are filled with zero blocks.
    ///
    /// # Errors
    ///
    /// [`AmgError::StructuralInconsistency`] for descriptors of the wrong
    /// shape or value runs of the wrong length,
    /// [`AmgError::InvalidInput`] for out-of-range indices, non-finite
    /// values or a missing diagonal block.
    pub fn from_block_triplets(
        n: usize,
        block_size: usize,
        entries: impl IntoIterator<Item = BlockTriplet>,
    ) -> Result<Self> {
        if block_size == 0 {
            return Err(ValidationError::out_of_range("block_size", 0, ">= 1").into());
        }
        let mut merged: Vec<BlockTriplet> = Vec::new();
        {
            let mut entries: Vec<BlockTriplet> = entries.into_iter().collect();
            for (i, j, desc, vals) in &entries {
                if *i >= n || *j >= n {
                    return Err(ValidationError::IndexOutOfBounds {
                        index: *j,
                        row: *i,
                        cols: n,
                    }
                    .into());
                }
                if desc.rows() != block_size || desc.cols() != block_size {
                    return Err(AmgError::StructuralInconsistency(format!(
                        "entry ({i}, {j}) has a {}x{} block in a {block_size}x{block_size} matrix",
                        desc.rows(),
                        desc.cols()
                    )));
                }
                if vals.len() != desc.nnz() {
                    return Err(AmgError::StructuralInconsistency(format!(
                        "entry ({i}, {j}) has {} values for a pattern of {}",
                        vals.len(),
                        desc.nnz()
                    )));
                }
                if let Some(v) = vals.iter().find(|v| !v.is_finite()) {
                    return Err(ValidationError::NonFiniteValue(format!("block ({i}, {j}) holds {v}")).into());
                }
            }
            entries.sort_by_key(|e| (e.0, e.1));
            for e in entries {
                match merged.last_mut() {
                    Some(last) if last.0 == e.0 && last.1 == e.1 => {
                        let union = last.2.union(&e.2)?;
                        let mut vals = vec![0.0; union.nnz()];
                        block::embed_add(1.0, &last.2, &last.3, &union, &mut vals)?;
                        block::embed_add(1.0, &e.2, &e.3, &union, &mut vals)?;
                        *last = (e.0, e.1, union, vals);
                    }
                    _ => merged.push(e),
                }
            }
        }

        // Explicit zero adjoints.
        let present: std::collections::HashSet<(usize, usize)> =
            merged.iter().map(|e| (e.0, e.1)).collect();
        let missing: Vec<BlockTriplet> = merged
            .iter()
            .filter(|e| !present.contains(&(e.1, e.0)))
            .map(|e| {
                let desc = e.2.transpose();
                let zeros = vec![0.0; desc.nnz()];
                (e.1, e.0, desc, zeros)
            })
            .collect();
        if !missing.is_empty() {
            tracing::trace!(count = missing.len(), "inserted explicit zero adjoint blocks");
            merged.extend(missing);
            merged.sort_by_key(|e| (e.0, e.1));
        }

        Self::assemble(n, block_size, merged)
    }

    fn assemble(n: usize, block_size: usize, merged: Vec<BlockTriplet>) -> Result<Self> {
        let nnz = merged.len();
        let mut row_ptr = vec![0usize; n + 1];
        for e in &merged {
            row_ptr[e.0 + 1] += 1;
        }
        for i in 1..=n {
            row_ptr[i] += row_ptr[i - 1];
        }

        let full = SparseVector::full(block_size);
        let mut intern: HashMap<Arc<SparseBlock>, u32> = HashMap::new();
        let mut descs: Vec<Arc<SparseBlock>> = Vec::new();
        let mut matvec = Vec::new();
        let mut matvec_t = Vec::new();

        let mut col_idx = Vec::with_capacity(nnz);
        let mut desc_id = Vec::with_capacity(nnz);
        let mut value_offset = Vec::with_capacity(nnz + 1);
        let mut values = Vec::new();
        for (_, j, desc, vals) in merged {
            let id = match intern.get(&desc) {
                Some(&id) => id,
                None => {
                    let id = descs.len() as u32;
                    matvec.push(BlockMatVec::analyse(&desc, &full, &full)?);
                    matvec_t.push(BlockMatVec::analyse_transposed(&desc, &full, &full)?);
                    descs.push(Arc::clone(&desc));
                    intern.insert(desc, id);
                    id
                }
            };
            col_idx.push(j);
            desc_id.push(id);
            value_offset.push(values.len());
            values.extend_from_slice(&vals);
        }
        value_offset.push(values.len());

        let mut diag_pos = Vec::with_capacity(n);
        for i in 0..n {
            let cols = &col_idx[row_ptr[i]..row_ptr[i + 1]];
            let k = cols
                .binary_search(&i)
                .map_err(|_| ValidationError::MissingDiagonal { row: i })?;
            diag_pos.push(row_ptr[i] + k);
        }

        let mut adjoint = vec![0usize; nnz];
        for i in 0..n {
            for k in row_ptr[i]..row_ptr[i + 1] {
                let j = col_idx[k];
                let cols = &col_idx[row_ptr[j]..row_ptr[j + 1]];
                let kk = cols.binary_search(&i).map_err(|_| {
                    AmgError::StructuralInconsistency(format!("entry ({i}, {j}) has no adjoint"))
                })?;
                adjoint[k] = row_ptr[j] + kk;
            }
        }

        Ok(Self {
            n,
            block_size,
            row_ptr,
            col_idx,
            diag_pos,
            adjoint,
            value_offset,
            desc_id,
            descs,
            matvec,
            matvec_t,
            values,
        })
    }

    // -- accessors ----------------------------------------------------------

    /// Number of block rows.
    #[inline]
    pub fn nodes(&self) -> usize {
        self.n
    }

    /// Block size `b`.
    #[inline]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Scalar dimension `n * b`.
    #[inline]
    pub fn scalar_dim(&self) -> usize {
        self.n * self.block_size
    }

    /// Number of stored block entries.
    #[inline]
    pub fn nnz(&self) -> usize {
        self.col_idx.len()
    }

    /// Number of stored scalars.
    #[inline]
    pub fn scalar_nnz(&self) -> usize {
        self.values.len()
    }

    /// Entry positions of row `i`.
    #[inline]
    pub fn row_range(&self, i: usize) -> std::ops::Range<usize> {
        self.row_ptr[i]..self.row_ptr[i + 1]
    }

    /// Column of entry `k`.
    #[inline]
    pub fn col(&self, k: usize) -> usize {
        self.col_idx[k]
    }

    /// Sorted columns of row `i`.
    #[inline]
    pub fn row_cols(&self, i: usize) -> &[usize] {
        &self.col_idx[self.row_ptr[i]..self.row_ptr[i + 1]]
    }

    /// Position of the diagonal entry of row `i`.
    #[inline]
    pub fn diag_pos(&self, i: usize) -> usize {
        self.diag_pos[i]
    }

    /// Position of the adjoint of entry `k`.
    #[inline]
    pub fn adjoint(&self, k: usize) -> usize {
        self.adjoint[k]
    }

    /// Descriptor of entry `k`.
    #[inline]
    pub fn descriptor(&self, k: usize) -> &Arc<SparseBlock> {
        &self.descs[self.desc_id[k] as usize]
    }

    /// Packed values of entry `k`.
    #[inline]
    pub fn block(&self, k: usize) -> &[f64] {
        &self.values[self.value_offset[k]..self.value_offset[k + 1]]
    }

    /// Position of entry `(i, j)`.
    pub fn find(&self, i: usize, j: usize) -> Option<usize> {
        self.row_cols(i)
            .binary_search(&j)
            .ok()
            .map(|k| self.row_ptr[i] + k)
    }

    /// Distinct descriptors in use.
    pub fn descriptors(&self) -> &[Arc<SparseBlock>] {
        &self.descs
    }

    // -- products -----------------------------------------------------------

    /// `y = A x` on flat vectors of length `n * b`.
    pub fn spmv(&self, x: &[f64], y: &mut [f64]) {
        y.fill(0.0);
        self.spmv_add(1.0, x, y);
    }

    /// `y += alpha * A x`.
    pub fn spmv_add(&self, alpha: f64, x: &[f64], y: &mut [f64]) {
        let b = self.block_size;
        debug_assert_eq!(x.len(), self.scalar_dim());
        debug_assert_eq!(y.len(), self.scalar_dim());
        for i in 0..self.n {
            let yi = &mut y[i * b..(i + 1) * b];
            for k in self.row_range(i) {
                let j = self.col_idx[k];
                let mv = &self.matvec[self.desc_id[k] as usize];
                block::mat_vec_add(mv, alpha, self.block(k), &x[j * b..(j + 1) * b], yi);
            }
        }
    }

    /// `y = A^T x`, evaluated row by row through the adjoint positions.
    pub fn spmv_transpose(&self, x: &[f64], y: &mut [f64]) {
        let b = self.block_size;
        y.fill(0.0);
        for i in 0..self.n {
            let yi = &mut y[i * b..(i + 1) * b];
            for k in self.row_range(i) {
                let j = self.col_idx[k];
                let adj = self.adjoint[k];
                let mv = &self.matvec_t[self.desc_id[adj] as usize];
                block::mat_vec_transposed_add(mv, 1.0, self.block(adj), &x[j * b..(j + 1) * b], yi);
            }
        }
    }

    /// `r = b - A x`.
    pub fn residual(&self, rhs: &[f64], x: &[f64], r: &mut [f64]) {
        r.copy_from_slice(rhs);
        self.spmv_add(-1.0, x, r);
    }

    /// Block row `i` times `x`, excluding the diagonal, accumulated into `y`
    /// with factor `alpha`. Used by the Gauss-Seidel sweeps.
    pub fn row_off_diagonal_add(&self, i: usize, alpha: f64, x: &[f64], y: &mut [f64]) {
        let b = self.block_size;
        let d = self.diag_pos[i];
        for k in self.row_range(i) {
            if k == d {
                continue;
            }
            let j = self.col_idx[k];
            let mv = &self.matvec[self.desc_id[k] as usize];
            block::mat_vec_add(mv, alpha, self.block(k), &x[j * b..(j + 1) * b], y);
        }
    }

    /// Block `(i, k)` times `x` accumulated into `y`.
    pub fn entry_mat_vec_add(&self, k: usize, alpha: f64, x: &[f64], y: &mut [f64]) {
        let mv = &self.matvec[self.desc_id[k] as usize];
        block::mat_vec_add(mv, alpha, self.block(k), x, y);
    }

    /// Row-major dense inverse of every diagonal block.
    ///
    /// # Errors
    ///
    /// [`AmgError::SingularPivot`] if a diagonal block is singular.
    pub fn diag_inverse_blocks(&self) -> Result<Vec<f64>> {
        let b = self.block_size;
        let mut out = Vec::with_capacity(self.n * b * b);
        for i in 0..self.n {
            let k = self.diag_pos[i];
            out.extend(block::invert(self.descriptor(k), self.block(k))?);
        }
        Ok(out)
    }

    /// Row-major dense copy of the whole matrix (`n*b` square).
    pub fn to_dense(&self) -> Vec<f64> {
        let b = self.block_size;
        let dim = self.scalar_dim();
        let mut dense = vec![0.0; dim * dim];
        for i in 0..self.n {
            for k in self.row_range(i) {
                let j = self.col_idx[k];
                let desc = self.descriptor(k);
                for (off, &(r, c)) in desc.positions().iter().enumerate() {
                    dense[(i * b + r) * dim + j * b + c] += self.block(k)[off];
                }
            }
        }
        dense
    }

    /// Scalar CSR expansion, explicit zeros included.
    pub fn to_csr(&self) -> CsrMatrix<f64> {
        let b = self.block_size;
        let dim = self.scalar_dim();
        let mut entries = Vec::with_capacity(self.values.len());
        for i in 0..self.n {
            for k in self.row_range(i) {
                let j = self.col_idx[k];
                for (off, &(r, c)) in self.descriptor(k).positions().iter().enumerate() {
                    entries.push((i * b + r, j * b + c, self.block(k)[off]));
                }
            }
        }
        CsrMatrix::from_coo(dim, dim, entries)
    }

    // -- structure ----------------------------------------------------------

    /// Node pattern of `A * A` (structural product, no cancellation).
    pub fn square_pattern(&self) -> SparsityPattern {
        let mut row_ptr = Vec::with_capacity(self.n + 1);
        row_ptr.push(0);
        let mut col_indices = Vec::new();
        let mut seen = vec![usize::MAX; self.n];
        let mut row = Vec::new();
        for i in 0..self.n {
            row.clear();
            for &j in self.row_cols(i) {
                for &m in self.row_cols(j) {
                    if seen[m] != i {
                        seen[m] = i;
                        row.push(m);
                    }
                }
            }
            row.sort_unstable();
            col_indices.extend_from_slice(&row);
            row_ptr.push(col_indices.len());
        }
        SparsityPattern { row_ptr, col_indices }
    }

    /// Verify the internal invariants: mirrored adjoints, diagonal
    /// presence, descriptor shapes and finite values.
    ///
    /// # Errors
    ///
    /// [`AmgError::StructuralInconsistency`] naming the first violation.
    pub fn check_consistency(&self) -> Result<()> {
        let bad = |msg: String| Err(AmgError::StructuralInconsistency(msg));
        if self.row_ptr.len() != self.n + 1 || self.row_ptr[self.n] != self.col_idx.len() {
            return bad("row pointers do not cover the entries".into());
        }
        for i in 0..self.n {
            let d = self.diag_pos[i];
            if !self.row_range(i).contains(&d) || self.col_idx[d] != i {
                return bad(format!("row {i} lost its diagonal"));
            }
            for k in self.row_range(i) {
                let j = self.col_idx[k];
                let adj = self.adjoint[k];
                if !self.row_range(j).contains(&adj) || self.col_idx[adj] != i || self.adjoint[adj] != k {
                    return bad(format!("entry ({i}, {j}) has a broken adjoint"));
                }
                let desc = self.descriptor(k);
                if desc.rows() != self.block_size || desc.cols() != self.block_size {
                    return bad(format!("entry ({i}, {j}) has a mis-shaped block"));
                }
                if self.value_offset[k + 1] - self.value_offset[k] != desc.nnz() {
                    return bad(format!("entry ({i}, {j}) has a mis-sized value run"));
                }
                if self.block(k).iter().any(|v| !v.is_finite()) {
                    return bad(format!("entry ({i}, {j}) holds a non-finite value"));
                }
            }
        }
        Ok(())
    }

    // -- condensation -------------------------------------------------------

    /// Collapse blocks to scalars weighted by test vector `ta`:
    /// `c_ij = sum_{r,c} A_ij[r,c] * ta_j[c] / (mean(ta_j) * b)`, falling
    /// back to `sum A_ij / b` where the mean vanishes. For `b = 1` this is
    /// the matrix itself.
    pub fn condense(&self, ta: &BlockVector, tb: &BlockVector) -> ScalarView {
        let b = self.block_size;
        let bf = b as f64;
        let mean_a = ta.node_means();
        let mean_b = tb.node_means();

        let mut values = Vec::with_capacity(self.nnz());
        for i in 0..self.n {
            for k in self.row_range(i) {
                let j = self.col_idx[k];
                let desc = self.descriptor(k);
                let vals = self.block(k);
                let tj = ta.node(j);
                let c = if b == 1 {
                    vals[0]
                } else if mean_a[j].abs() > CONDENSE_EPS {
                    let s: f64 = desc
                        .positions()
                        .iter()
                        .zip(vals)
                        .map(|(&(_, c), v)| v * tj[c])
                        .sum();
                    s / (mean_a[j] * bf)
                } else {
                    vals.iter().sum::<f64>() / bf
                };
                values.push(c);
            }
        }
        let adj_values = (0..self.nnz()).map(|k| values[self.adjoint[k]]).collect();
        let diag = self.diag_pos.iter().map(|&d| values[d]).collect();

        ScalarView {
            n: self.n,
            row_ptr: self.row_ptr.clone(),
            col_idx: self.col_idx.clone(),
            values,
            adj_values,
            diag,
            ta: mean_a,
            tb: mean_b,
        }
    }
}

impl LinearOperator for BlockMatrix {
    fn len(&self) -> usize {
        self.scalar_dim()
    }

    fn apply(&self, x: &[f64], y: &mut [f64]) {
        self.spmv(x, y);
    }
}

// ---------------------------------------------------------------------------
// ScalarView
// ---------------------------------------------------------------------------

/// Scalar condensation of a [`BlockMatrix`] plus the condensed test vectors.
#[derive(Debug, Clone)]
pub struct ScalarView {
    n: usize,
    row_ptr: Vec<usize>,
    col_idx: Vec<usize>,
    values: Vec<f64>,
    adj_values: Vec<f64>,
    diag: Vec<f64>,
    ta: Vec<f64>,
    tb: Vec<f64>,
}

impl ScalarView {
    /// Condensed prolongation-side test vector.
    #[inline]
    pub fn ta(&self) -> &[f64] {
        &self.ta
    }

    /// Condensed restriction-side test vector.
    #[inline]
    pub fn tb(&self) -> &[f64] {
        &self.tb
    }

    /// Number of stored entries.
    pub fn nnz(&self) -> usize {
        self.values.len()
    }
}

impl RowAccess for ScalarView {
    #[inline]
    fn dim(&self) -> usize {
        self.n
    }

    #[inline]
    fn row(&self, i: usize) -> (&[usize], &[f64]) {
        let r = self.row_ptr[i]..self.row_ptr[i + 1];
        (&self.col_idx[r.clone()], &self.values[r])
    }

    #[inline]
    fn adjoint_row(&self, i: usize) -> &[f64] {
        &self.adj_values[self.row_ptr[i]..self.row_ptr[i + 1]]
    }

    #[inline]
    fn diagonal(&self, i: usize) -> f64 {
        self.diag[i]
    }
}
