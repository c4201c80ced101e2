//! Parent-candidate generation.
//!
//! For an unknown `i`, [`CandidateGenerator::generate`] separates strong from
//! weak couplings, forms every one- and two-parent set from the strong,
//! non-Fine neighbours, fits interpolation weights for each set with the
//! configured [`CandidateStrategy`], and returns the accepted candidates
//! ranked by error.
//!
//! A coupling `a_im` is strong when `|a_im * ta_m| >= sigma * max_m' |a_im' * ta_m'|`.
//! One-parent candidates are kept if their error is at most `error1`,
//! two-parent ones if at most `error2`; of those, only candidates within a
//! factor `tol` of the best survive.

pub mod patch;
pub mod variants;
pub(crate) mod weights;

pub use patch::Boundary;
pub use variants::{strategy_for, CandidateStrategy, NodeContext, ParentSet, PatchShape};

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::arena::Arena;
use crate::config::{AmgConfig, CandidateVariant};
use crate::error::Result;
use crate::matrix::{ScalarView, SparsityPattern};
use crate::traits::{ClassFlags, RowAccess};

// ---------------------------------------------------------------------------
// Candidate
// ---------------------------------------------------------------------------

/// One proposed interpolation of a node from one or two parents.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    len: u8,
    parents: [usize; 2],
    prolongation: [f64; 2],
    restriction: [f64; 2],
    error: f64,
}

impl Candidate {
    /// Single-parent candidate.
    pub fn one(parent: usize, prolongation: [f64; 1], restriction: [f64; 1], error: f64) -> Self {
        Self {
            len: 1,
            parents: [parent, parent],
            prolongation: [prolongation[0], 0.0],
            restriction: [restriction[0], 0.0],
            error,
        }
    }

    /// Two-parent candidate.
    pub fn two(j: usize, k: usize, prolongation: [f64; 2], restriction: [f64; 2], error: f64) -> Self {
        Self {
            len: 2,
            parents: [j, k],
            prolongation,
            restriction,
            error,
        }
    }

    pub(crate) fn from_set(set: ParentSet, prolongation: [f64; 2], restriction: [f64; 2], error: f64) -> Self {
        match set {
            ParentSet::One(j) => Self::one(j, [prolongation[0]], [restriction[0]], error),
            ParentSet::Two(j, k) => Self::two(j, k, prolongation, restriction, error),
        }
    }

    /// Parent node ids.
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

    /// Local interpolation error estimate.
    #[inline]
    pub fn error(&self) -> f64 {
        self.error
    }
}

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// The options that steer candidate generation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandidateParams {
    /// Strength threshold.
    pub sigma: f64,
    /// Ranking tolerance.
    pub tol: f64,
    /// One-parent acceptance threshold.
    pub error1: f64,
    /// Two-parent acceptance threshold.
    pub error2: f64,
    /// Heuristic variant.
    pub variant: CandidateVariant,
    /// Largest two-hop patch.
    pub maxpatch: usize,
}

impl Default for CandidateParams {
    fn default() -> Self {
        Self::from(&AmgConfig::default())
    }
}

impl From<&AmgConfig> for CandidateParams {
    fn from(cfg: &AmgConfig) -> Self {
        Self {
            sigma: cfg.sigma,
            tol: cfg.tol,
            error1: cfg.error1,
            error2: cfg.error2,
            variant: cfg.variant,
            maxpatch: cfg.maxpatch,
        }
    }
}

// ---------------------------------------------------------------------------
// CandidateGenerator
// ---------------------------------------------------------------------------

/// Produces ranked parent candidates for the nodes of one level.
#[derive(Debug)]
pub struct CandidateGenerator<'v> {
    view: &'v ScalarView,
    square: Option<&'v SparsityPattern>,
    params: CandidateParams,
    strategy: Box<dyn CandidateStrategy>,
}

impl<'v> CandidateGenerator<'v> {
    /// Generator over a condensed matrix. `square` is the structural square
    /// pattern used by the two-hop variants; it is computed on the fly per
    /// node when absent.
    pub fn new(view: &'v ScalarView, square: Option<&'v SparsityPattern>, params: CandidateParams) -> Self {
        Self {
            view,
            square,
            params,
            strategy: strategy_for(params.variant),
        }
    }

    /// The parameters in use.
    pub fn params(&self) -> &CandidateParams {
        &self.params
    }

    /// The condensed matrix.
    pub fn view(&self) -> &'v ScalarView {
        self.view
    }

    /// Strong off-diagonal neighbours of `i` that are not Fine, sorted.
    pub fn strong_neighbours<C: ClassFlags + ?Sized>(&self, i: usize, classes: &C) -> Vec<usize> {
        let ta = self.view.ta();
        let (cols, vals) = self.view.row(i);
        let scaled = |k: usize| (vals[k] * ta[cols[k]]).abs();
        let max = (0..cols.len())
            .filter(|&k| cols[k] != i)
            .map(scaled)
            .fold(0.0f64, f64::max);
        if max == 0.0 {
            return Vec::new();
        }
        let threshold = self.params.sigma * max;
        (0..cols.len())
            .filter(|&k| cols[k] != i && scaled(k) >= threshold && !classes.is_fine(cols[k]))
            .map(|k| cols[k])
            .collect()
    }

    /// Accepted candidates of node `i`, best first.
    ///
    /// # Errors
    ///
    /// Arena failures. Degenerate local problems only drop candidates.
    pub fn generate<C: ClassFlags + ?Sized>(&self, i: usize, classes: &C, arena: &Arena) -> Result<Vec<Candidate>> {
        let strong = self.strong_neighbours(i, classes);
        if strong.is_empty() {
            return Ok(Vec::new());
        }

        let mut sets: Vec<ParentSet> = strong.iter().map(|&j| ParentSet::One(j)).collect();
        for (a, &j) in strong.iter().enumerate() {
            for &k in &strong[a + 1..] {
                sets.push(ParentSet::Two(j, k));
            }
        }

        let ctx = NodeContext {
            view: self.view,
            ta: self.view.ta(),
            tb: self.view.tb(),
            square: self.square,
            maxpatch: self.params.maxpatch,
            arena,
            node: i,
            strong: &strong,
        };
        let mut accepted: Vec<Candidate> = self
            .strategy
            .evaluate(&ctx, &sets)?
            .into_iter()
            .filter(|c| {
                let limit = if c.parents().len() == 1 {
                    self.params.error1
                } else {
                    self.params.error2
                };
                c.error().is_finite() && c.error() <= limit
            })
            .collect();
        accepted.sort_by(|a, b| a.error().total_cmp(&b.error()));

        if let Some(best) = accepted.first().map(Candidate::error) {
            let tol = self.params.tol;
            accepted.retain(|c| c.error() * tol <= best);
        }
        trace!(
            node = i,
            strong = strong.len(),
            kept = accepted.len(),
            best = accepted.first().map(Candidate::error),
            "candidates"
        );
        Ok(accepted)
    }
}
