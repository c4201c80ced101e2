//! Configuration for hierarchy setup and solving.
//!
//! [`AmgConfig`] is a plain `Default` struct. Field serde names are the
//! option names a parameter file uses (`sigma`, `type`, `cgnodes`, ...), so a
//! JSON document can override any subset of them:
//!
//! ```rust
//! use ruvector_amg::config::{AmgConfig, CandidateVariant};
//!
//! let cfg = AmgConfig::from_json_str(r#"{ "type": 4, "gamma": 2 }"#).unwrap();
//! assert_eq!(cfg.variant, CandidateVariant::TwoHopFiltered);
//! assert_eq!(cfg.gamma, 2);
//! assert_eq!(cfg.sigma, 0.25);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{Result, ValidationError};
use crate::validation::validate_config;

// ---------------------------------------------------------------------------
// Strategy selectors
// ---------------------------------------------------------------------------

/// Parent-candidate heuristic, option `type` (0..=6).
///
/// The variants are interchangeable accuracy/cost trade-offs over the same
/// contract: each produces ranked parent lists whose weights reproduce the
/// test vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum CandidateVariant {
    /// 0: local patch = node + parents, outside couplings lumped.
    ParentsFiltered,
    /// 1: local patch = node + parents, outside couplings dropped.
    ParentsDirichlet,
    /// 2: local patch = node + its whole row, outside couplings lumped.
    #[default]
    NeighbourhoodFiltered,
    /// 3: local patch = node + its whole row, outside couplings dropped.
    NeighbourhoodDirichlet,
    /// 4: local patch = two-hop pattern of the structural square, lumped.
    TwoHopFiltered,
    /// 5: two-hop patch of the symmetric part; one weight set for both sides.
    TwoHopSymmetric,
    /// 6: estimate from the matrix row alone, no local solve.
    RowOnly,
}

impl CandidateVariant {
    /// All variants in option order.
    pub const ALL: [CandidateVariant; 7] = [
        CandidateVariant::ParentsFiltered,
        CandidateVariant::ParentsDirichlet,
        CandidateVariant::NeighbourhoodFiltered,
        CandidateVariant::NeighbourhoodDirichlet,
        CandidateVariant::TwoHopFiltered,
        CandidateVariant::TwoHopSymmetric,
        CandidateVariant::RowOnly,
    ];
}

impl TryFrom<u8> for CandidateVariant {
    type Error = ValidationError;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        Self::ALL
            .get(value as usize)
            .copied()
            .ok_or_else(|| ValidationError::out_of_range("type", value, "0..=6"))
    }
}

impl From<CandidateVariant> for u8 {
    fn from(v: CandidateVariant) -> u8 {
        v as u8
    }
}

/// Smoother bound to a level (`presmoother`, `postsmoother`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SmootherKind {
    /// Damped block Jacobi with `omega`.
    Jacobi,
    /// Forward block Gauss-Seidel.
    #[serde(alias = "gs")]
    ForwardGs,
    /// Backward block Gauss-Seidel.
    #[serde(alias = "bgs")]
    BackwardGs,
    /// Forward then backward sweep.
    #[serde(alias = "sgs")]
    SymmetricGs,
    /// Block incomplete LU without fill.
    Ilu,
}

/// Outer iteration (`solver`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverKind {
    /// Stationary multigrid iteration `x += cycle(b - A x)`.
    Mg,
    /// Conjugate gradients preconditioned by one cycle (symmetric problems).
    Cg,
    /// BiCGStab preconditioned by one cycle.
    #[default]
    Bicgstab,
}

/// Coarsest-level solve (`cgsmoother`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoarseSolverKind {
    /// BiCGStab to a relative residual of `cgtol`, at most `cgmaxit` steps.
    #[default]
    Bicgstab,
    /// Dense LU of the (small) coarsest matrix.
    DenseLu,
    /// `cgmaxit` sweeps of the pre-smoother.
    Smoother,
}

/// Pattern of coarse-level matrices (`pattern`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoarsePattern {
    /// Every Galerkin entry is kept.
    #[default]
    Full,
    /// Entries coupling two interpolated unknowns are lumped onto the
    /// diagonal, preserving the row action on the first test vector.
    Restricted,
}

/// Initial test vectors (`tv`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestVectorInit {
    /// All components one.
    #[default]
    Ones,
    /// Uniform in `[0.5, 1.5)` from a seeded generator (`seed`).
    Random,
}

// ---------------------------------------------------------------------------
// AmgConfig
// ---------------------------------------------------------------------------

/// Every tunable of setup and solve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AmgConfig {
    /// Strength threshold relative to the row's largest scaled coupling.
    ///
    /// Default: `0.25`.
    pub sigma: f64,

    /// Candidates with `best_error / error < tol` are dropped.
    ///
    /// Default: `0.95`.
    pub tol: f64,

    /// Acceptance threshold for one-parent candidates.
    ///
    /// Default: `2.5`.
    pub error1: f64,

    /// Acceptance threshold for two-parent candidates.
    ///
    /// Default: `3.0`.
    pub error2: f64,

    /// Parent-candidate heuristic.
    #[serde(rename = "type")]
    pub variant: CandidateVariant,

    /// Largest two-hop patch before falling back to the direct
    /// neighbourhood.
    ///
    /// Default: `64`.
    pub maxpatch: usize,

    /// Recursive coarse visits per cycle: 1 = V, 2 = W.
    pub gamma: usize,
    /// Pre-smoothing sweeps.
    pub n1: usize,
    /// Post-smoothing sweeps.
    pub n2: usize,

    /// A level with at most this many nodes is the coarsest.
    ///
    /// Default: `40`.
    pub cgnodes: usize,

    /// Stop when `coarse > mincoarse * fine`.
    ///
    /// Default: `0.9`.
    pub mincoarse: f64,

    /// Maximum number of levels including the finest.
    pub maxlevels: usize,

    /// Damping of the test-vector relaxation on `A` (prolongation side).
    pub omegar: f64,
    /// Damping of the test-vector relaxation on `A^T` (restriction side).
    pub omegal: f64,
    /// Jacobi smoother damping.
    pub omega: f64,
    /// Test-vector relaxation sweeps per level.
    pub stv: usize,
    /// Initial test vectors.
    pub tv: TestVectorInit,
    /// Seed for [`TestVectorInit::Random`].
    pub seed: u64,

    /// Outer iteration.
    pub solver: SolverKind,
    /// Pre-smoother.
    pub presmoother: SmootherKind,
    /// Post-smoother.
    pub postsmoother: SmootherKind,
    /// Coarsest-level solve.
    pub cgsmoother: CoarseSolverKind,
    /// Relative residual target of the coarsest-level solve.
    pub cgtol: f64,
    /// Iteration (or sweep) cap of the coarsest-level solve.
    pub cgmaxit: usize,

    /// Outer iteration cap.
    pub maxit: usize,
    /// Absolute defect target.
    pub alimit: f64,
    /// Defect target relative to `||b||`.
    pub rlimit: f64,
    /// Divergence when the defect exceeds `divlimit * initial`.
    pub divlimit: f64,
    /// Defect target relative to the initial defect.
    pub reduction: f64,

    /// Coarse matrix pattern.
    pub pattern: CoarsePattern,
    /// Verify `A_c t_c == R (A t)` after every projection.
    pub check: bool,
    /// Arena capacity in bytes for one coarsening pass.
    pub arena: usize,
}

impl Default for AmgConfig {
    fn default() -> Self {
        Self {
            sigma: 0.25,
            tol: 0.95,
            error1: 2.5,
            error2: 3.0,
            variant: CandidateVariant::default(),
            maxpatch: 64,
            gamma: 1,
            n1: 2,
            n2: 2,
            cgnodes: 40,
            mincoarse: 0.9,
            maxlevels: 25,
            omegar: 0.6,
            omegal: 0.6,
            omega: 0.6,
            stv: 0,
            tv: TestVectorInit::default(),
            seed: 0x5eed,
            solver: SolverKind::default(),
            presmoother: SmootherKind::ForwardGs,
            postsmoother: SmootherKind::BackwardGs,
            cgsmoother: CoarseSolverKind::default(),
            cgtol: 1e-10,
            cgmaxit: 500,
            maxit: 200,
            alimit: 1e-14,
            rlimit: 1e-10,
            divlimit: 1e10,
            reduction: 1e-8,
            pattern: CoarsePattern::default(),
            check: cfg!(debug_assertions),
            arena: 64 * 1024 * 1024,
        }
    }
}

impl AmgConfig {
    /// Parse a JSON document of option overrides and validate the result.
    ///
    /// # Errors
    ///
    /// [`ValidationError::MalformedConfig`] for unparsable JSON or unknown
    /// option names, [`ValidationError::ParameterOutOfRange`] for values
    /// outside their domain.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let cfg: AmgConfig = serde_json::from_str(json)
            .map_err(|e| ValidationError::MalformedConfig(e.to_string()))?;
        validate_config(&cfg)?;
        Ok(cfg)
    }

    /// Serialise the full option set.
    pub fn to_json_string(&self) -> String {
        // Plain data with string keys; serialisation cannot fail.
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}
