//! Multigrid hierarchy construction.
//!
//! Starting from the fine matrix, every pass
//!
//! 1. relaxes the two test vectors on the current level,
//! 2. condenses the block matrix to a [`ScalarView`],
//! 3. classifies the unknowns through a [`Coarsener`],
//! 4. forms the coarse operator `R A P` and injects the test vectors,
//!
//! until the level is small enough, coarsening stalls, nothing is
//! eliminated, or `maxlevels` is reached. Each level keeps its matrix, its
//! smoothers and the transfer operator to the next coarser level.

use std::fmt;
use std::time::Instant;

use tracing::{debug, warn};

use crate::arena::Arena;
use crate::candidates::CandidateParams;
use crate::coarsen::{self, Coarsening};
use crate::config::{AmgConfig, CandidateVariant};
use crate::error::Result;
use crate::events::{AmgEvent, StopReason};
use crate::galerkin;
use crate::matrix::{BlockMatrix, BlockVector, ScalarView, SparsityPattern};
use crate::smoother::{self, Smoother};
use crate::testvec::{self, Side};
use crate::transfer::TransferOperator;
use crate::types::{CsrMatrix, NodeClass};
use crate::validation::{validate_config, validate_system_matrix};

// ---------------------------------------------------------------------------
// Coarsener strategy
// ---------------------------------------------------------------------------

/// Classifies the unknowns of one level.
pub trait Coarsener: fmt::Debug {
    /// Coarsen `view`, whose block matrix has `block_size` components per
    /// node. `square` is the pattern of `A * A` for the two-hop variants.
    ///
    /// # Errors
    ///
    /// Arena, structural and communication failures.
    fn coarsen(
        &mut self,
        view: &ScalarView,
        square: Option<&SparsityPattern>,
        params: CandidateParams,
        block_size: usize,
        arena: &Arena,
    ) -> Result<Coarsening>;
}

/// The single-process greedy driver.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialCoarsener;

impl Coarsener for SerialCoarsener {
    fn coarsen(
        &mut self,
        view: &ScalarView,
        square: Option<&SparsityPattern>,
        params: CandidateParams,
        block_size: usize,
        arena: &Arena,
    ) -> Result<Coarsening> {
        coarsen::coarsen(view, square, params, block_size, arena)
    }
}

// ---------------------------------------------------------------------------
// GridLevel
// ---------------------------------------------------------------------------

/// One level of the hierarchy.
#[derive(Debug)]
pub struct GridLevel {
    matrix: BlockMatrix,
    ta: BlockVector,
    tb: BlockVector,
    presmoother: Box<dyn Smoother>,
    postsmoother: Box<dyn Smoother>,
    coarsening: Option<Coarsening>,
}

impl GridLevel {
    fn new(
        matrix: BlockMatrix,
        ta: BlockVector,
        tb: BlockVector,
        coarsening: Option<Coarsening>,
        cfg: &AmgConfig,
    ) -> Result<Self> {
        let presmoother = smoother::build(cfg.presmoother, &matrix, cfg.omega)?;
        let postsmoother = smoother::build(cfg.postsmoother, &matrix, cfg.omega)?;
        Ok(Self {
            matrix,
            ta,
            tb,
            presmoother,
            postsmoother,
            coarsening,
        })
    }

    /// Level operator.
    pub fn matrix(&self) -> &BlockMatrix {
        &self.matrix
    }

    /// Prolongation-side test vector the level was coarsened with.
    pub fn ta(&self) -> &BlockVector {
        &self.ta
    }

    /// Restriction-side test vector.
    pub fn tb(&self) -> &BlockVector {
        &self.tb
    }

    /// Smoother applied before the coarse correction.
    pub fn presmoother(&self) -> &dyn Smoother {
        self.presmoother.as_ref()
    }

    /// Smoother applied after the coarse correction.
    pub fn postsmoother(&self) -> &dyn Smoother {
        self.postsmoother.as_ref()
    }

    /// Transfer to the next coarser level; `None` on the coarsest.
    pub fn transfer(&self) -> Option<&TransferOperator> {
        self.coarsening.as_ref().map(|c| &c.transfer)
    }

    /// Coarse/Fine class of every node; `None` on the coarsest.
    pub fn classes(&self) -> Option<&[NodeClass]> {
        self.coarsening.as_ref().map(|c| c.classes.as_slice())
    }

    /// Number of block nodes.
    pub fn nodes(&self) -> usize {
        self.matrix.nodes()
    }
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Size of one level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelStats {
    /// Block nodes.
    pub nodes: usize,
    /// Scalar unknowns.
    pub unknowns: usize,
    /// Stored block entries.
    pub nnz: usize,
    /// Stored scalar entries.
    pub scalar_nnz: usize,
}

/// Size summary of a hierarchy.
#[derive(Debug, Clone, PartialEq)]
pub struct HierarchyStats {
    /// Per level, finest first.
    pub levels: Vec<LevelStats>,
    /// Total unknowns over fine unknowns.
    pub grid_complexity: f64,
    /// Total stored scalar entries over fine stored entries.
    pub operator_complexity: f64,
    /// Largest arena occupancy of any coarsening pass.
    pub arena_peak: usize,
}

impl HierarchyStats {
    fn collect(levels: &[GridLevel], arena_peak: usize) -> Self {
        let levels: Vec<LevelStats> = levels
            .iter()
            .map(|l| LevelStats {
                nodes: l.matrix.nodes(),
                unknowns: l.matrix.scalar_dim(),
                nnz: l.matrix.nnz(),
                scalar_nnz: l.matrix.scalar_nnz(),
            })
            .collect();
        let ratio = |f: fn(&LevelStats) -> usize| match levels.first().map(f) {
            Some(fine) if fine > 0 => levels.iter().map(f).sum::<usize>() as f64 / fine as f64,
            _ => 1.0,
        };
        let grid_complexity = ratio(|s| s.unknowns);
        let operator_complexity = ratio(|s| s.scalar_nnz);
        Self {
            levels,
            grid_complexity,
            operator_complexity,
            arena_peak,
        }
    }
}

// ---------------------------------------------------------------------------
// Hierarchy
// ---------------------------------------------------------------------------

/// The levels of a multigrid method, finest first.
#[derive(Debug)]
pub struct Hierarchy {
    levels: Vec<GridLevel>,
    config: AmgConfig,
    events: Vec<AmgEvent>,
    stats: HierarchyStats,
}

impl Hierarchy {
    /// Build from a scalar CSR matrix.
    ///
    /// # Errors
    ///
    /// Invalid matrix or configuration, plus any [`Hierarchy::build`]
    /// failure.
    pub fn from_csr(matrix: &CsrMatrix<f64>, cfg: &AmgConfig) -> Result<Self> {
        validate_system_matrix(matrix)?;
        Self::build(BlockMatrix::from_csr(matrix)?, cfg)
    }

    /// Build with the serial coarsener.
    ///
    /// # Errors
    ///
    /// See [`Hierarchy::build_with`].
    pub fn build(matrix: BlockMatrix, cfg: &AmgConfig) -> Result<Self> {
        Self::build_with(matrix, cfg, &mut SerialCoarsener)
    }

    /// Build with an arbitrary coarsener.
    ///
    /// # Errors
    ///
    /// Invalid configuration, an inconsistent fine matrix, arena exhaustion,
    /// a singular smoother diagonal, or (with `check`) a coarse operator
    /// that does not reproduce the test vector.
    pub fn build_with(matrix: BlockMatrix, cfg: &AmgConfig, coarsener: &mut dyn Coarsener) -> Result<Self> {
        validate_config(cfg)?;
        matrix.check_consistency()?;

        let block_size = matrix.block_size();
        let params = CandidateParams::from(cfg);
        let arena = Arena::with_capacity(cfg.arena);
        let two_hop = matches!(
            cfg.variant,
            CandidateVariant::TwoHopFiltered | CandidateVariant::TwoHopSymmetric
        );

        let mut ta = testvec::initial(matrix.nodes(), block_size, cfg.tv, cfg.seed);
        let mut tb = testvec::initial(matrix.nodes(), block_size, cfg.tv, cfg.seed.wrapping_add(1));
        let mut current = matrix;
        let mut levels = Vec::new();
        let mut events = Vec::new();

        loop {
            let level = levels.len();
            let n = current.nodes();

            let reason = if n <= cfg.cgnodes {
                Some(StopReason::SmallEnough)
            } else if level + 1 >= cfg.maxlevels {
                Some(StopReason::MaxLevels)
            } else {
                None
            };
            if let Some(reason) = reason {
                events.push(AmgEvent::CoarseningStopped { level, reason });
                levels.push(GridLevel::new(current, ta, tb, None, cfg)?);
                break;
            }

            let started = Instant::now();
            testvec::relax(&current, &mut ta, Side::Prolongation, cfg.stv, cfg.omegar)?;
            testvec::relax(&current, &mut tb, Side::Restriction, cfg.stv, cfg.omegal)?;
            let view = current.condense(&ta, &tb);
            let square = two_hop.then(|| current.square_pattern());

            let coarsening = coarsener.coarsen(&view, square.as_ref(), params, block_size, &arena)?;
            let nc = coarsening.coarse_len();
            let stop = if coarsening.fine_count() == 0 {
                Some(StopReason::NothingEliminated)
            } else if nc as f64 > cfg.mincoarse * n as f64 {
                Some(StopReason::Stalled)
            } else {
                None
            };
            if let Some(reason) = stop {
                warn!(level, nodes = n, coarse = nc, ?reason, "coarsening stopped early");
                events.push(AmgEvent::CoarseningStopped { level, reason });
                levels.push(GridLevel::new(current, ta, tb, None, cfg)?);
                break;
            }

            let tca = testvec::inject(&coarsening.transfer, &ta);
            let tcb = testvec::inject(&coarsening.transfer, &tb);
            let coarse = galerkin::project(&current, &coarsening.transfer, &tca, cfg.pattern)?;
            if cfg.check {
                let dev = galerkin::check_test_vector(&current, &coarsening.transfer, &coarse, &tca)?;
                debug!(level, deviation = dev, "coarse operator reproduces the test vector");
            }

            let elapsed = started.elapsed();
            debug!(
                level = level + 1,
                fine = n,
                coarse = nc,
                nnz = coarse.nnz(),
                ?elapsed,
                "level built"
            );
            events.push(AmgEvent::LevelBuilt {
                level: level + 1,
                fine_nodes: n,
                coarse_nodes: nc,
                coarse_nnz: coarse.nnz(),
                elapsed,
            });
            levels.push(GridLevel::new(current, ta, tb, Some(coarsening), cfg)?);
            current = coarse;
            ta = tca;
            tb = tcb;
        }

        let stats = HierarchyStats::collect(&levels, arena.peak());
        debug!(
            levels = levels.len(),
            grid_complexity = stats.grid_complexity,
            operator_complexity = stats.operator_complexity,
            arena_peak = stats.arena_peak,
            "hierarchy built"
        );
        Ok(Self {
            levels,
            config: cfg.clone(),
            events,
            stats,
        })
    }

    /// All levels, finest first.
    pub fn levels(&self) -> &[GridLevel] {
        &self.levels
    }

    /// Level `l`.
    pub fn level(&self, l: usize) -> &GridLevel {
        &self.levels[l]
    }

    /// Number of levels (at least one).
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    /// Always `false`; a hierarchy has a finest level.
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// The finest level.
    pub fn finest(&self) -> &GridLevel {
        &self.levels[0]
    }

    /// The coarsest level.
    pub fn coarsest(&self) -> &GridLevel {
        &self.levels[self.levels.len() - 1]
    }

    /// Configuration the hierarchy was built with.
    pub fn config(&self) -> &AmgConfig {
        &self.config
    }

    /// Setup events in order.
    pub fn events(&self) -> &[AmgEvent] {
        &self.events
    }

    /// Size summary.
    pub fn stats(&self) -> &HierarchyStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn path(n: usize) -> CsrMatrix<f64> {
        let mut e = Vec::new();
        for i in 0..n {
            e.push((i, i, 2.0));
            if i + 1 < n {
                e.push((i, i + 1, -1.0));
                e.push((i + 1, i, -1.0));
            }
        }
        CsrMatrix::from_coo(n, n, e)
    }

    #[test]
    fn five_point_path_gives_two_levels() {
        let cfg = AmgConfig {
            cgnodes: 2,
            check: true,
            ..AmgConfig::default()
        };
        let h = Hierarchy::from_csr(&path(5), &cfg).unwrap();
        assert_eq!(h.len(), 2);
        use NodeClass::{Coarse as C, Fine as F};
        assert_eq!(h.finest().classes().unwrap(), &[F, C, F, C, F]);

        let dense = h.coarsest().matrix().to_dense();
        assert_relative_eq!(dense[0], 1.5, epsilon = 1e-12);
        assert_relative_eq!(dense[1], -0.5, epsilon = 1e-12);
        assert_relative_eq!(dense[2], -0.5, epsilon = 1e-12);
        assert_relative_eq!(dense[3], 1.5, epsilon = 1e-12);

        assert!(matches!(
            h.events(),
            [
                AmgEvent::LevelBuilt { level: 1, fine_nodes: 5, coarse_nodes: 2, .. },
                AmgEvent::CoarseningStopped { level: 1, reason: StopReason::SmallEnough },
            ]
        ));
    }

    #[test]
    fn small_matrix_is_a_single_level() {
        let h = Hierarchy::from_csr(&path(10), &AmgConfig::default()).unwrap();
        assert_eq!(h.len(), 1);
        assert!(h.finest().transfer().is_none());
        assert_relative_eq!(h.stats().grid_complexity, 1.0);
    }

    #[test]
    fn maxlevels_caps_the_depth() {
        let cfg = AmgConfig {
            cgnodes: 2,
            maxlevels: 2,
            ..AmgConfig::default()
        };
        let h = Hierarchy::from_csr(&path(64), &cfg).unwrap();
        assert_eq!(h.len(), 2);
        assert!(matches!(
            h.events().last(),
            Some(AmgEvent::CoarseningStopped { level: 1, reason: StopReason::MaxLevels })
        ));
    }

    #[test]
    fn complexities_are_accumulated() {
        let cfg = AmgConfig {
            cgnodes: 4,
            ..AmgConfig::default()
        };
        let h = Hierarchy::from_csr(&path(100), &cfg).unwrap();
        assert!(h.len() >= 3);
        let stats = h.stats();
        assert_eq!(stats.levels.len(), h.len());
        assert!(stats.grid_complexity > 1.0 && stats.grid_complexity < 2.0);
        assert!(stats.operator_complexity > 1.0);
        assert!(stats.arena_peak > 0);
        for pair in stats.levels.windows(2) {
            assert!(pair[1].nodes < pair[0].nodes);
        }
    }

    #[test]
    fn identity_eliminates_nothing() {
        let cfg = AmgConfig {
            cgnodes: 2,
            ..AmgConfig::default()
        };
        let h = Hierarchy::from_csr(&CsrMatrix::identity(8), &cfg).unwrap();
        assert_eq!(h.len(), 1);
        assert!(matches!(
            h.events(),
            [AmgEvent::CoarseningStopped { level: 0, reason: StopReason::NothingEliminated }]
        ));
    }
}
