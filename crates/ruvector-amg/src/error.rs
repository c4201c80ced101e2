//! Error types for the AMG crate.
//!
//! Failures fall into four families, and callers are expected to treat them
//! differently:
//!
//! - **Resource** errors ([`AmgError::ArenaExhausted`],
//!   [`AmgError::MarkStackOverflow`], [`AmgError::MarkMismatch`]) abort the
//!   current build or solve. Arena scopes unwind on the way out.
//! - **Numerical** errors ([`AmgError::SingularPivot`]) are recoverable inside
//!   the parent-candidate generator, where they only reject a candidate. They
//!   surface to the caller only from smoother or coarse-solver setup.
//! - **Structural** errors ([`AmgError::StructuralInconsistency`],
//!   [`AmgError::InvalidInput`]) point at a configuration or upstream-data
//!   bug.
//! - **Convergence** problems are not errors at all while solving; they are
//!   reported through [`SolveStatus`](crate::types::SolveStatus).
//!   [`AmgError::NonConvergence`] only appears when a caller asks for a
//!   `Result` via [`SolveReport::into_result`](crate::types::SolveReport::into_result).

use crate::arena::Region;

/// Primary error type for AMG setup and solve operations.
#[derive(Debug, thiserror::Error)]
pub enum AmgError {
    /// The two arena regions would overlap.
    #[error(
        "arena exhausted: {requested} bytes requested from {region} region, {available} available"
    )]
    ArenaExhausted {
        /// Region the allocation was requested from.
        region: Region,
        /// Bytes requested (after alignment padding).
        requested: usize,
        /// Bytes still free between the two regions.
        available: usize,
    },

    /// A region's mark stack is full.
    #[error("mark stack overflow in {region} region (depth limit {limit})")]
    MarkStackOverflow {
        /// Region whose stack overflowed.
        region: Region,
        /// Maximum nesting depth.
        limit: usize,
    },

    /// A release did not match the innermost open mark of its region.
    #[error("out-of-order release in {region} region: mark depth {depth}, open depth {open}")]
    MarkMismatch {
        /// Region of the rejected release.
        region: Region,
        /// Depth recorded in the released mark.
        depth: usize,
        /// Number of marks currently open in that region.
        open: usize,
    },

    /// A dense factorisation met a (near) zero pivot.
    #[error("singular pivot {pivot:.3e} at column {column} of a {dim}x{dim} system")]
    SingularPivot {
        /// Column where elimination broke down.
        column: usize,
        /// Dimension of the dense system.
        dim: usize,
        /// Magnitude of the rejected pivot.
        pivot: f64,
    },

    /// Operands or descriptors that must agree structurally do not.
    #[error("structural inconsistency: {0}")]
    StructuralInconsistency(String),

    /// The caller supplied invalid input (dimensions, parameters, etc.).
    #[error("invalid input: {0}")]
    InvalidInput(#[from] ValidationError),

    /// A peer exchange in partitioned mode failed.
    #[error("communication failure: {0}")]
    Communication(String),

    /// The outer iteration did not reach its target.
    #[error(
        "solver did not converge after {iterations} iterations (defect={defect:.2e}, initial={initial:.2e})"
    )]
    NonConvergence {
        /// Iterations performed.
        iterations: usize,
        /// Final defect norm.
        defect: f64,
        /// Initial defect norm.
        initial: f64,
    },
}

/// Validation errors for inputs and configuration.
///
/// Raised eagerly before any computation begins so that callers get clear
/// diagnostics rather than mysterious numerical failures.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    /// Matrix or vector dimensions are inconsistent.
    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// A value is NaN or infinite where a finite number is required.
    #[error("non-finite value detected: {0}")]
    NonFiniteValue(String),

    /// A column index is out of bounds for the declared number of columns.
    #[error("column index {index} out of bounds for {cols} columns (row {row})")]
    IndexOutOfBounds {
        /// Offending column index.
        index: usize,
        /// Row containing the offending entry.
        row: usize,
        /// Declared column count.
        cols: usize,
    },

    /// The `row_ptr` array is not monotonically non-decreasing.
    #[error("row_ptr is not monotonically non-decreasing at position {position}")]
    NonMonotonicRowPtrs {
        /// Position in `row_ptr` where the violation was detected.
        position: usize,
    },

    /// A row has no diagonal entry.
    #[error("row {row} has no diagonal entry")]
    MissingDiagonal {
        /// Offending row.
        row: usize,
    },

    /// A parameter is outside its valid range.
    #[error("parameter out of range: {name} = {value} (expected {expected})")]
    ParameterOutOfRange {
        /// Name of the parameter.
        name: String,
        /// The invalid value (as a string for flexibility).
        value: String,
        /// Human-readable description of the valid range.
        expected: String,
    },

    /// A configuration document could not be parsed.
    #[error("malformed configuration: {0}")]
    MalformedConfig(String),
}

impl ValidationError {
    pub(crate) fn out_of_range(
        name: &str,
        value: impl ToString,
        expected: &str,
    ) -> Self {
        ValidationError::ParameterOutOfRange {
            name: name.into(),
            value: value.to_string(),
            expected: expected.into(),
        }
    }
}

/// Shorthand used throughout the crate.
pub type Result<T, E = AmgError> = std::result::Result<T, E>;
