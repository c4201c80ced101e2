//! Multigrid cycle and the outer solver.
//!
//! One cycle on level `l` (with `rhs_l` given and `x_l` as the start):
//!
//! ```text
//! x_l = S_pre^{n1}(x_l)
//! rhs_{l+1} = R (rhs_l - A_l x_l);  x_{l+1} = 0
//! repeat gamma times: cycle(l + 1)
//! x_l += P x_{l+1}
//! x_l = S_post^{n2}(x_l)
//! ```
//!
//! The coarsest level is solved directly (dense LU), iteratively (BiCGStab
//! to `cgtol`) or by smoother sweeps. [`AmgSolver`] wraps a cycle from a
//! zero guess as a [`Preconditioner`] and drives the configured outer
//! iteration with it.

use std::time::Instant;

use tracing::{debug, trace};

use crate::block::DenseLu;
use crate::config::{AmgConfig, CoarseSolverKind, SolverKind};
use crate::error::{AmgError, Result};
use crate::events::AmgEvent;
use crate::hierarchy::{GridLevel, Hierarchy};
use crate::krylov::{self, StoppingCriteria};
use crate::matrix::BlockMatrix;
use crate::traits::{Identity, Preconditioner};
use crate::types::{CsrMatrix, SolveReport};
use crate::validation::validate_rhs;

// ---------------------------------------------------------------------------
// Coarsest-level solve
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum CoarseSolver {
    Krylov(StoppingCriteria),
    Dense(DenseLu),
    Sweeps(usize),
}

impl CoarseSolver {
    fn new(level: &GridLevel, cfg: &AmgConfig) -> Result<Self> {
        Ok(match cfg.cgsmoother {
            CoarseSolverKind::Bicgstab => CoarseSolver::Krylov(StoppingCriteria::coarse(cfg)),
            CoarseSolverKind::DenseLu => {
                let a = level.matrix();
                CoarseSolver::Dense(DenseLu::factor(a.scalar_dim(), a.to_dense())?)
            }
            CoarseSolverKind::Smoother => CoarseSolver::Sweeps(cfg.cgmaxit),
        })
    }

    fn solve(&self, level: &GridLevel, w: &mut LevelWork) -> Result<()> {
        match self {
            CoarseSolver::Krylov(crit) => {
                let out = krylov::bicgstab(level.matrix(), &mut Identity, &w.rhs, &mut w.x, crit)?;
                trace!(
                    status = ?out.status,
                    iterations = out.iterations,
                    defect = out.final_defect,
                    "coarse solve"
                );
            }
            CoarseSolver::Dense(lu) => {
                w.x.copy_from_slice(&w.rhs);
                lu.solve(&mut w.x);
            }
            CoarseSolver::Sweeps(n) => {
                level.presmoother().smooth(level.matrix(), &w.rhs, &mut w.x, *n, &mut w.scratch);
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Cycle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct LevelWork {
    x: Vec<f64>,
    rhs: Vec<f64>,
    r: Vec<f64>,
    scratch: Vec<f64>,
}

impl LevelWork {
    fn new(n: usize) -> Self {
        Self {
            x: vec![0.0; n],
            rhs: vec![0.0; n],
            r: vec![0.0; n],
            scratch: vec![0.0; n],
        }
    }
}

/// Mutable cycle state: per-level vectors and the coarse solver.
#[derive(Debug)]
struct CycleState {
    work: Vec<LevelWork>,
    coarse: CoarseSolver,
    gamma: usize,
    n1: usize,
    n2: usize,
}

/// A V- or W-cycle over borrowed levels.
#[derive(Debug)]
pub struct Cycle<'h> {
    levels: &'h [GridLevel],
    state: &'h mut CycleState,
}

impl Cycle<'_> {
    /// Run one cycle on level `l` for the right-hand side and start vector
    /// already placed in its work vectors.
    ///
    /// # Errors
    ///
    /// Propagates coarse-solve failures.
    pub fn step(&mut self, l: usize) -> Result<()> {
        let levels = self.levels;
        let level = &levels[l];
        let Some(transfer) = level.transfer() else {
            return self.state.coarse.solve(level, &mut self.state.work[l]);
        };
        let a = level.matrix();
        let (n1, n2, gamma) = (self.state.n1, self.state.n2, self.state.gamma);

        {
            let (head, tail) = self.state.work.split_at_mut(l + 1);
            let w = &mut head[l];
            level.presmoother().smooth(a, &w.rhs, &mut w.x, n1, &mut w.scratch);
            a.residual(&w.rhs, &w.x, &mut w.r);
            let c = &mut tail[0];
            transfer.restrict(&w.r, &mut c.rhs);
            c.x.fill(0.0);
        }
        for _ in 0..gamma {
            self.step(l + 1)?;
        }
        let (head, tail) = self.state.work.split_at_mut(l + 1);
        let w = &mut head[l];
        transfer.prolongate_add(&tail[0].x, &mut w.x);
        level.postsmoother().smooth(a, &w.rhs, &mut w.x, n2, &mut w.scratch);
        Ok(())
    }
}

impl Preconditioner for Cycle<'_> {
    fn precondition(&mut self, r: &[f64], z: &mut [f64]) -> Result<()> {
        let w = &mut self.state.work[0];
        w.rhs.copy_from_slice(r);
        w.x.fill(0.0);
        self.step(0)?;
        z.copy_from_slice(&self.state.work[0].x);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// AmgSolver
// ---------------------------------------------------------------------------

/// A built hierarchy plus everything needed to cycle with it.
#[derive(Debug)]
pub struct AmgSolver {
    hierarchy: Hierarchy,
    state: CycleState,
}

impl AmgSolver {
    /// Set up the cycle on a built hierarchy.
    ///
    /// # Errors
    ///
    /// [`AmgError::SingularPivot`] if the dense coarse solver cannot factor
    /// the coarsest matrix.
    pub fn new(hierarchy: Hierarchy) -> Result<Self> {
        let cfg = hierarchy.config();
        let coarse = CoarseSolver::new(hierarchy.coarsest(), cfg)?;
        let state = CycleState {
            work: hierarchy
                .levels()
                .iter()
                .map(|l| LevelWork::new(l.matrix().scalar_dim()))
                .collect(),
            coarse,
            gamma: cfg.gamma,
            n1: cfg.n1,
            n2: cfg.n2,
        };
        Ok(Self { hierarchy, state })
    }

    /// Build the hierarchy and the cycle for a block matrix.
    ///
    /// # Errors
    ///
    /// Setup failures from [`Hierarchy::build`] and [`AmgSolver::new`].
    pub fn build(matrix: BlockMatrix, cfg: &AmgConfig) -> Result<Self> {
        Self::new(Hierarchy::build(matrix, cfg)?)
    }

    /// Build the hierarchy and the cycle for a scalar CSR matrix.
    ///
    /// # Errors
    ///
    /// Setup failures from [`Hierarchy::from_csr`] and [`AmgSolver::new`].
    pub fn from_csr(matrix: &CsrMatrix<f64>, cfg: &AmgConfig) -> Result<Self> {
        Self::new(Hierarchy::from_csr(matrix, cfg)?)
    }

    /// The hierarchy.
    pub fn hierarchy(&self) -> &Hierarchy {
        &self.hierarchy
    }

    /// Borrow the cycle, e.g. to precondition an external iteration.
    pub fn cycle(&mut self) -> Cycle<'_> {
        Cycle {
            levels: self.hierarchy.levels(),
            state: &mut self.state,
        }
    }

    /// Solve `A x = b` from a zero start.
    ///
    /// # Errors
    ///
    /// Invalid right-hand side or a failing cycle; non-convergence is
    /// reported in [`SolveReport::status`].
    pub fn solve(&mut self, b: &[f64]) -> Result<SolveReport> {
        let mut x = vec![0.0; b.len()];
        let mut report = self.solve_into(b, &mut x)?;
        report.solution = x;
        Ok(report)
    }

    /// Solve `A x = b` starting from (and overwriting) `x`.
    ///
    /// The returned report's `solution` is empty; the iterate is `x`.
    ///
    /// # Errors
    ///
    /// See [`AmgSolver::solve`].
    pub fn solve_into(&mut self, b: &[f64], x: &mut [f64]) -> Result<SolveReport> {
        let a = self.hierarchy.finest().matrix();
        validate_rhs(b, a.scalar_dim())?;
        if x.len() != b.len() {
            return Err(AmgError::StructuralInconsistency(format!(
                "initial guess has length {}, right-hand side {}",
                x.len(),
                b.len()
            )));
        }

        let cfg = self.hierarchy.config();
        let crit = StoppingCriteria::outer(cfg);
        let kind = cfg.solver;
        let started = Instant::now();
        let mut cycle = Cycle {
            levels: self.hierarchy.levels(),
            state: &mut self.state,
        };
        let outcome = match kind {
            SolverKind::Mg => krylov::stationary(a, &mut cycle, b, x, &crit)?,
            SolverKind::Cg => krylov::cg(a, &mut cycle, b, x, &crit)?,
            SolverKind::Bicgstab => krylov::bicgstab(a, &mut cycle, b, x, &crit)?,
        };
        let wall_time = started.elapsed();

        let mut events: Vec<AmgEvent> = outcome
            .history
            .iter()
            .skip(1)
            .map(|h| AmgEvent::CycleCompleted {
                iteration: h.iteration,
                defect: h.defect,
            })
            .collect();
        events.push(AmgEvent::SolveFinished {
            status: outcome.status,
            iterations: outcome.iterations,
            defect: outcome.final_defect,
            wall_time,
        });
        debug!(
            solver = ?kind,
            status = ?outcome.status,
            iterations = outcome.iterations,
            defect = outcome.final_defect,
            ?wall_time,
            "solve finished"
        );

        Ok(SolveReport {
            solution: Vec::new(),
            status: outcome.status,
            iterations: outcome.iterations,
            initial_defect: outcome.initial_defect,
            final_defect: outcome.final_defect,
            history: outcome.history,
            wall_time,
            events,
        })
    }
}

impl Preconditioner for AmgSolver {
    fn precondition(&mut self, r: &[f64], z: &mut [f64]) -> Result<()> {
        self.cycle().precondition(r, z)
    }
}
