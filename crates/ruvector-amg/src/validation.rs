//! Input validation for hierarchy setup and solving.
//!
//! All validation runs eagerly before any computation begins, so callers get
//! clear diagnostics instead of numerical failures deep inside coarsening.
//! Every function returns [`ValidationError`] on failure, which converts into
//! [`AmgError::InvalidInput`](crate::error::AmgError::InvalidInput) via `From`.
//!
//! # Limits
//!
//! | Resource      | Limit        | Constant          |
//! |---------------|--------------|-------------------|
//! | Nodes (rows)  | 10,000,000   | [`MAX_NODES`]     |
//! | Entries (nnz) | 100,000,000  | [`MAX_EDGES`]     |
//! | Iterations    | 1,000,000    | [`MAX_ITERATIONS`]|
//! | Levels        | 64           | [`MAX_LEVELS`]    |

use crate::config::AmgConfig;
use crate::error::ValidationError;
use crate::types::CsrMatrix;

// ---------------------------------------------------------------------------
// Resource limits
// ---------------------------------------------------------------------------

/// Maximum number of rows or columns.
pub const MAX_NODES: usize = 10_000_000;

/// Maximum number of stored entries.
pub const MAX_EDGES: usize = 100_000_000;

/// Maximum outer or coarse-solve iterations.
pub const MAX_ITERATIONS: usize = 1_000_000;

/// Maximum hierarchy depth.
pub const MAX_LEVELS: usize = 64;

// ---------------------------------------------------------------------------
// CSR matrix validation
// ---------------------------------------------------------------------------

/// Validate the structural integrity of a CSR matrix.
///
/// Checks, in order:
///
/// 1. `rows` and `cols` are within [`MAX_NODES`], `nnz` within [`MAX_EDGES`].
/// 2. `row_ptr` has length `rows + 1`, starts at 0, ends at `nnz` and is
///    non-decreasing.
/// 3. `col_indices` and `values` have equal length.
/// 4. Every column index is below `cols`.
/// 5. No `NaN` or `Inf` values.
/// 6. Column indices are strictly increasing within each row.
///
/// # Errors
///
/// Returns [`ValidationError`] describing the first violation found.
///
/// # Examples
///
/// ```
/// use ruvector_amg::types::CsrMatrix;
/// use ruvector_amg::validation::validate_csr_matrix;
///
/// let m = CsrMatrix::<f64>::from_coo(2, 2, vec![(0, 0, 1.0), (1, 1, 2.0)]);
/// assert!(validate_csr_matrix(&m).is_ok());
/// ```
pub fn validate_csr_matrix(matrix: &CsrMatrix<f64>) -> Result<(), ValidationError> {
    if matrix.rows > MAX_NODES || matrix.cols > MAX_NODES {
        return Err(ValidationError::DimensionMismatch(format!(
            "matrix {}x{} exceeds maximum dimension {}",
            matrix.rows, matrix.cols, MAX_NODES,
        )));
    }

    let nnz = matrix.values.len();
    if nnz > MAX_EDGES {
        return Err(ValidationError::DimensionMismatch(format!(
            "nnz {} exceeds maximum allowed {}",
            nnz, MAX_EDGES,
        )));
    }

    if matrix.row_ptr.len() != matrix.rows + 1 {
        return Err(ValidationError::DimensionMismatch(format!(
            "row_ptr length {} does not equal rows + 1 = {}",
            matrix.row_ptr.len(),
            matrix.rows + 1,
        )));
    }

    for i in 1..matrix.row_ptr.len() {
        if matrix.row_ptr[i] < matrix.row_ptr[i - 1] {
            return Err(ValidationError::NonMonotonicRowPtrs { position: i });
        }
    }

    if matrix.row_ptr[0] != 0 {
        return Err(ValidationError::DimensionMismatch(format!(
            "row_ptr[0] = {} (expected 0)",
            matrix.row_ptr[0],
        )));
    }
    if matrix.row_ptr[matrix.rows] != nnz {
        return Err(ValidationError::DimensionMismatch(format!(
            "values length {} does not match row_ptr[rows] = {}",
            nnz, matrix.row_ptr[matrix.rows],
        )));
    }
    if matrix.col_indices.len() != nnz {
        return Err(ValidationError::DimensionMismatch(format!(
            "col_indices length {} does not match values length {}",
            matrix.col_indices.len(),
            nnz,
        )));
    }

    for row in 0..matrix.rows {
        let mut prev_col: Option<usize> = None;
        for (col, &val) in matrix.row_entries(row) {
            if col >= matrix.cols {
                return Err(ValidationError::IndexOutOfBounds {
                    index: col,
                    row,
                    cols: matrix.cols,
                });
            }
            if !val.is_finite() {
                return Err(ValidationError::NonFiniteValue(format!(
                    "matrix[{}, {}] = {}",
                    row, col, val,
                )));
            }
            if let Some(pc) = prev_col {
                if col <= pc {
                    return Err(ValidationError::DimensionMismatch(format!(
                        "row {row}: column {col} follows {pc}; columns must be sorted and unique",
                    )));
                }
            }
            prev_col = Some(col);
        }
    }

    Ok(())
}

/// Validate a matrix the hierarchy can be built on: structurally sound,
/// square, and with a stored diagonal entry in every row.
///
/// # Errors
///
/// Returns [`ValidationError`] on the first failing check.
pub fn validate_system_matrix(matrix: &CsrMatrix<f64>) -> Result<(), ValidationError> {
    validate_csr_matrix(matrix)?;
    if matrix.rows != matrix.cols {
        return Err(ValidationError::DimensionMismatch(format!(
            "multigrid requires a square matrix but got {}x{}",
            matrix.rows, matrix.cols,
        )));
    }
    for row in 0..matrix.rows {
        if matrix.get(row, row).is_none() {
            return Err(ValidationError::MissingDiagonal { row });
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Vector validation
// ---------------------------------------------------------------------------

/// Validate a right-hand side or initial guess.
///
/// An all-zero vector is accepted but logged, since it usually means the
/// caller forgot to fill it.
///
/// # Errors
///
/// [`ValidationError::DimensionMismatch`] or
/// [`ValidationError::NonFiniteValue`].
pub fn validate_rhs(rhs: &[f64], expected_len: usize) -> Result<(), ValidationError> {
    check_len_and_finite("rhs", rhs, expected_len)?;
    if !rhs.is_empty() && rhs.iter().all(|&v| v == 0.0) {
        tracing::warn!("rhs vector is all zeros; solution will be trivially zero");
    }
    Ok(())
}

/// Validate a test vector. Unlike a right-hand side it may not vanish
/// identically, since interpolation weights are fitted to reproduce it.
///
/// # Errors
///
/// [`ValidationError::DimensionMismatch`],
/// [`ValidationError::NonFiniteValue`], or
/// [`ValidationError::ParameterOutOfRange`] for a zero vector.
pub fn validate_test_vector(name: &str, tv: &[f64], expected_len: usize) -> Result<(), ValidationError> {
    check_len_and_finite(name, tv, expected_len)?;
    if !tv.is_empty() && tv.iter().all(|&v| v == 0.0) {
        return Err(ValidationError::out_of_range(name, "0", "a non-zero vector"));
    }
    Ok(())
}

fn check_len_and_finite(name: &str, v: &[f64], expected_len: usize) -> Result<(), ValidationError> {
    if v.len() != expected_len {
        return Err(ValidationError::DimensionMismatch(format!(
            "{} length {} does not match expected {}",
            name,
            v.len(),
            expected_len,
        )));
    }
    if let Some((i, x)) = v.iter().enumerate().find(|(_, x)| !x.is_finite()) {
        return Err(ValidationError::NonFiniteValue(format!("{name}[{i}] = {x}")));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Configuration validation
// ---------------------------------------------------------------------------

/// Validate every option of an [`AmgConfig`].
///
/// # Errors
///
/// [`ValidationError::ParameterOutOfRange`] naming the first bad option.
pub fn validate_config(cfg: &AmgConfig) -> Result<(), ValidationError> {
    unit_interval("sigma", cfg.sigma)?;
    unit_interval("tol", cfg.tol)?;
    positive("error1", cfg.error1)?;
    positive("error2", cfg.error2)?;
    if cfg.maxpatch < 2 {
        return Err(ValidationError::out_of_range("maxpatch", cfg.maxpatch, ">= 2"));
    }
    if !(1..=2).contains(&cfg.gamma) {
        return Err(ValidationError::out_of_range("gamma", cfg.gamma, "1 (V) or 2 (W)"));
    }
    if cfg.n1 + cfg.n2 == 0 {
        return Err(ValidationError::out_of_range("n1 + n2", 0, ">= 1"));
    }
    if cfg.cgnodes == 0 {
        return Err(ValidationError::out_of_range("cgnodes", 0, ">= 1"));
    }
    unit_interval("mincoarse", cfg.mincoarse)?;
    if cfg.maxlevels == 0 || cfg.maxlevels > MAX_LEVELS {
        return Err(ValidationError::out_of_range(
            "maxlevels",
            cfg.maxlevels,
            &format!("[1, {MAX_LEVELS}]"),
        ));
    }
    damping("omegar", cfg.omegar)?;
    damping("omegal", cfg.omegal)?;
    damping("omega", cfg.omega)?;
    unit_interval("cgtol", cfg.cgtol)?;
    iterations("cgmaxit", cfg.cgmaxit)?;
    iterations("maxit", cfg.maxit)?;
    non_negative("alimit", cfg.alimit)?;
    non_negative("rlimit", cfg.rlimit)?;
    non_negative("reduction", cfg.reduction)?;
    if !cfg.divlimit.is_finite() || cfg.divlimit <= 1.0 {
        return Err(ValidationError::out_of_range("divlimit", cfg.divlimit, "finite and > 1"));
    }
    if cfg.arena < 4096 {
        return Err(ValidationError::out_of_range("arena", cfg.arena, ">= 4096 bytes"));
    }
    Ok(())
}

fn unit_interval(name: &str, v: f64) -> Result<(), ValidationError> {
    if v.is_finite() && v > 0.0 && v <= 1.0 {
        Ok(())
    } else {
        Err(ValidationError::out_of_range(name, v, "(0, 1]"))
    }
}

fn positive(name: &str, v: f64) -> Result<(), ValidationError> {
    if v.is_finite() && v > 0.0 {
        Ok(())
    } else {
        Err(ValidationError::out_of_range(name, v, "finite and > 0"))
    }
}

fn non_negative(name: &str, v: f64) -> Result<(), ValidationError> {
    if v.is_finite() && v >= 0.0 {
        Ok(())
    } else {
        Err(ValidationError::out_of_range(name, v, "finite and >= 0"))
    }
}

fn damping(name: &str, v: f64) -> Result<(), ValidationError> {
    if v.is_finite() && v > 0.0 && v < 2.0 {
        Ok(())
    } else {
        Err(ValidationError::out_of_range(name, v, "(0, 2)"))
    }
}

fn iterations(name: &str, v: usize) -> Result<(), ValidationError> {
    if v == 0 || v > MAX_ITERATIONS {
        Err(ValidationError::out_of_range(
            name,
            v,
            &format!("[1, {MAX_ITERATIONS}]"),
        ))
    } else {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn laplacian(n: usize) -> CsrMatrix<f64> {
        let mut entries = Vec::new();
        for i in 0..n {
            entries.push((i, i, 2.0));
            if i > 0 {
                entries.push((i, i - 1, -1.0));
            }
            if i + 1 < n {
                entries.push((i, i + 1, -1.0));
            }
        }
        CsrMatrix::from_coo(n, n, entries)
    }

    // -- validate_csr_matrix ------------------------------------------------

    #[test]
    fn valid_laplacian() {
        assert!(validate_system_matrix(&laplacian(5)).is_ok());
    }

    #[test]
    fn valid_empty_matrix() {
        let m = CsrMatrix::<f64> {
            row_ptr: vec![0],
            col_indices: vec![],
            values: vec![],
            rows: 0,
            cols: 0,
        };
        assert!(validate_csr_matrix(&m).is_ok());
    }

    #[test]
    fn non_monotonic_row_ptr() {
        let mut m = laplacian(3);
        // [0, 2, 1, 7]
        m.row_ptr[2] = 1;
        assert!(matches!(
            validate_csr_matrix(&m),
            Err(ValidationError::NonMonotonicRowPtrs { position: 2 })
        ));
    }

    #[test]
    fn col_index_out_of_bounds() {
        let mut m = laplacian(3);
        m.col_indices[0] = 9;
        assert!(matches!(
            validate_csr_matrix(&m),
            Err(ValidationError::IndexOutOfBounds { index: 9, row: 0, cols: 3 })
        ));
    }

    #[test]
    fn unsorted_columns_rejected() {
        let mut m = laplacian(3);
        m.col_indices.swap(0, 1);
        assert!(matches!(
            validate_csr_matrix(&m),
            Err(ValidationError::DimensionMismatch(_))
        ));
    }

    #[test]
    fn nan_value_rejected() {
        let mut m = laplacian(3);
        m.values[2] = f64::NAN;
        assert!(matches!(
            validate_csr_matrix(&m),
            Err(ValidationError::NonFiniteValue(_))
        ));
    }

    #[test]
    fn missing_diagonal_rejected() {
        let m = CsrMatrix::from_coo(2, 2, vec![(0, 0, 1.0), (1, 0, 1.0)]);
        assert!(matches!(
            validate_system_matrix(&m),
            Err(ValidationError::MissingDiagonal { row: 1 })
        ));
    }

    #[test]
    fn non_square_rejected() {
        let m = CsrMatrix::from_coo(2, 3, vec![(0, 0, 1.0), (1, 1, 1.0)]);
        assert!(validate_system_matrix(&m).is_err());
    }

    // -- vectors ------------------------------------------------------------

    #[test]
    fn rhs_dimension_mismatch() {
        assert!(validate_rhs(&[1.0, 2.0], 3).is_err());
    }

    #[test]
    fn zero_rhs_is_accepted() {
        assert!(validate_rhs(&[0.0; 4], 4).is_ok());
    }

    #[test]
    fn zero_test_vector_is_rejected() {
        assert!(matches!(
            validate_test_vector("tv_a", &[0.0; 4], 4),
            Err(ValidationError::ParameterOutOfRange { .. })
        ));
    }

    #[test]
    fn infinite_test_vector_is_rejected() {
        assert!(validate_test_vector("tv_b", &[1.0, f64::INFINITY], 2).is_err());
    }

    // -- config -------------------------------------------------------------

    #[test]
    fn rejects_gamma_three() {
        let cfg = AmgConfig {
            gamma: 3,
            ..Default::default()
        };
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn rejects_zero_sweeps() {
        let cfg = AmgConfig {
            n1: 0,
            n2: 0,
            ..Default::default()
        };
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn rejects_overrelaxed_jacobi() {
        let cfg = AmgConfig {
            omega: 2.5,
            ..Default::default()
        };
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn rejects_tiny_arena() {
        let cfg = AmgConfig {
            arena: 16,
            ..Default::default()
        };
        assert!(validate_config(&cfg).is_err());
    }
}
