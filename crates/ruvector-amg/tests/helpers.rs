//! Shared helpers for the ruvector-amg integration tests.
//!
//! Deterministic problem generators (Laplacians, anisotropic and block
//! systems), a dense reference solver and a few vector utilities.

#![allow(dead_code)]

use std::sync::Arc;

use ruvector_amg::block::SparseBlock;
use ruvector_amg::matrix::BlockMatrix;
use ruvector_amg::types::CsrMatrix;

// ---------------------------------------------------------------------------
// Random number generator (simple LCG for deterministic reproducibility)
// ---------------------------------------------------------------------------

/// A minimal linear congruential generator for deterministic test data.
pub struct Lcg {
    state: u64,
}

impl Lcg {
    /// Create a new LCG with the given seed.
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Generate the next u64 value.
    pub fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        self.state
    }

    /// Generate a uniform f64 in [0, 1).
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Generate a uniform f64 in [lo, hi).
    pub fn next_f64_range(&mut self, lo: f64, hi: f64) -> f64 {
        lo + (hi - lo) * self.next_f64()
    }
}

// ---------------------------------------------------------------------------
// Problem generators
// ---------------------------------------------------------------------------

/// 1-D Dirichlet Laplacian `[-1, 2, -1]` on `n` points.
pub fn laplacian_1d(n: usize) -> CsrMatrix<f64> {
    let mut entries = Vec::with_capacity(3 * n);
    for i in 0..n {
        entries.push((i, i, 2.0));
        if i + 1 < n {
            entries.push((i, i + 1, -1.0));
            entries.push((i + 1, i, -1.0));
        }
    }
    CsrMatrix::from_coo(n, n, entries)
}

/// 5-point Laplacian on an `nx x ny` grid with coupling `eps` in y, so
/// `eps != 1` gives an anisotropic operator.
pub fn laplacian_2d(nx: usize, ny: usize, eps: f64) -> CsrMatrix<f64> {
    let n = nx * ny;
    let idx = |x: usize, y: usize| y * nx + x;
    let mut entries = Vec::with_capacity(5 * n);
    for y in 0..ny {
        for x in 0..nx {
            let i = idx(x, y);
            entries.push((i, i, 2.0 + 2.0 * eps));
            if x > 0 {
                entries.push((i, idx(x - 1, y), -1.0));
            }
            if x + 1 < nx {
                entries.push((i, idx(x + 1, y), -1.0));
            }
            if y > 0 {
                entries.push((i, idx(x, y - 1), -eps));
            }
            if y + 1 < ny {
                entries.push((i, idx(x, y + 1), -eps));
            }
        }
    }
    CsrMatrix::from_coo(n, n, entries)
}

/// 1-D convection-diffusion with upwinded convection `c`; nonsymmetric for
/// `c != 0`.
pub fn convection_diffusion_1d(n: usize, c: f64) -> CsrMatrix<f64> {
    let mut entries = Vec::with_capacity(3 * n);
    for i in 0..n {
        entries.push((i, i, 2.0 + c));
        if i > 0 {
            entries.push((i, i - 1, -1.0 - c));
        }
        if i + 1 < n {
            entries.push((i, i + 1, -1.0));
        }
    }
    CsrMatrix::from_coo(n, n, entries)
}

/// Random weighted graph Laplacian on a path backbone plus `extra` random
/// edges, shifted by `shift` on the diagonal.
pub fn random_graph_laplacian(n: usize, extra: usize, shift: f64, seed: u64) -> CsrMatrix<f64> {
    let mut rng = Lcg::new(seed);
    let mut edges: Vec<(usize, usize, f64)> = (0..n.saturating_sub(1))
        .map(|i| (i, i + 1, rng.next_f64_range(0.5, 1.5)))
        .collect();
    for _ in 0..extra {
        let a = (rng.next_u64() % n as u64) as usize;
        let b = (rng.next_u64() % n as u64) as usize;
        if a != b {
            edges.push((a.min(b), a.max(b), rng.next_f64_range(0.1, 1.0)));
        }
    }
    let mut degree = vec![shift; n];
    let mut entries = Vec::new();
    for (a, b, w) in edges {
        entries.push((a, b, -w));
        entries.push((b, a, -w));
        degree[a] += w;
        degree[b] += w;
    }
    for (i, d) in degree.into_iter().enumerate() {
        entries.push((i, i, d));
    }
    CsrMatrix::from_coo(n, n, entries)
}

/// Two-component 1-D system: each node carries a dense `2 x 2` diagonal
/// block `[[2 + s, -s], [-s, 2 + s]]` and `-I` couplings to its neighbours.
pub fn block_laplacian_1d(n: usize, s: f64) -> BlockMatrix {
    let dense = SparseBlock::dense(2, 2);
    let ident = SparseBlock::diagonal(2);
    let mut entries: Vec<(usize, usize, Arc<SparseBlock>, Vec<f64>)> = Vec::new();
    for i in 0..n {
        entries.push((i, i, dense.clone(), vec![2.0 + s, -s, -s, 2.0 + s]));
        if i + 1 < n {
            entries.push((i, i + 1, ident.clone(), vec![-1.0, -1.0]));
            entries.push((i + 1, i, ident.clone(), vec![-1.0, -1.0]));
        }
    }
    BlockMatrix::from_block_triplets(n, 2, entries).expect("valid block matrix")
}

/// Deterministic vector in `[-1, 1)`.
pub fn random_vector(n: usize, seed: u64) -> Vec<f64> {
    let mut rng = Lcg::new(seed);
    (0..n).map(|_| rng.next_f64_range(-1.0, 1.0)).collect()
}

// ---------------------------------------------------------------------------
// Dense reference solver
// ---------------------------------------------------------------------------

/// Solve a row-major dense `n x n` system by Gaussian elimination with
/// partial pivoting.
///
/// # Panics
///
/// Panics if the matrix is singular.
pub fn dense_solve(n: usize, a: &[f64], rhs: &[f64]) -> Vec<f64> {
    let mut aug: Vec<Vec<f64>> = (0..n)
        .map(|i| {
            let mut row = a[i * n..(i + 1) * n].to_vec();
            row.push(rhs[i]);
            row
        })
        .collect();
    for col in 0..n {
        let pivot_row = (col..n)
            .max_by(|&p, &q| aug[p][col].abs().total_cmp(&aug[q][col].abs()))
            .expect("non-empty range");
        assert!(aug[pivot_row][col].abs() > 1e-14, "matrix is singular");
        aug.swap(col, pivot_row);
        for row in col + 1..n {
            let factor = aug[row][col] / aug[col][col];
            for j in col..=n {
                aug[row][j] -= factor * aug[col][j];
            }
        }
    }
    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let mut sum = aug[i][n];
        for j in i + 1..n {
            sum -= aug[i][j] * x[j];
        }
        x[i] = sum / aug[i][i];
    }
    x
}

/// Dense reference solve of a CSR system.
pub fn dense_solve_csr(matrix: &CsrMatrix<f64>, rhs: &[f64]) -> Vec<f64> {
    let n = matrix.rows;
    let mut a = vec![0.0; n * n];
    for i in 0..n {
        for (j, &v) in matrix.row_entries(i) {
            a[i * n + j] += v;
        }
    }
    dense_solve(n, &a, rhs)
}

// ---------------------------------------------------------------------------
// Vector utilities
// ---------------------------------------------------------------------------

/// L2 norm.
pub fn l2_norm(v: &[f64]) -> f64 {
    v.iter().map(|&x| x * x).sum::<f64>().sqrt()
}

/// `||approx - exact|| / ||exact||`, or the absolute error for a zero
/// `exact`.
pub fn relative_error(approx: &[f64], exact: &[f64]) -> f64 {
    let diff: f64 = approx
        .iter()
        .zip(exact)
        .map(|(a, e)| (a - e) * (a - e))
        .sum::<f64>()
        .sqrt();
    let norm = l2_norm(exact);
    if norm > 1e-15 {
        diff / norm
    } else {
        diff
    }
}

/// `b - A x` for a CSR system.
pub fn residual(matrix: &CsrMatrix<f64>, x: &[f64], rhs: &[f64]) -> Vec<f64> {
    let mut ax = vec![0.0; matrix.rows];
    matrix.spmv(x, &mut ax);
    rhs.iter().zip(&ax).map(|(b, v)| b - v).collect()
}

/// Row-major dense product of an `n x m` and an `m x k` matrix.
pub fn dense_mul(n: usize, m: usize, k: usize, a: &[f64], b: &[f64]) -> Vec<f64> {
    let mut c = vec![0.0; n * k];
    for i in 0..n {
        for l in 0..m {
            let ail = a[i * m + l];
            if ail == 0.0 {
                continue;
            }
            for j in 0..k {
                c[i * k + j] += ail * b[l * k + j];
            }
        }
    }
    c
}
