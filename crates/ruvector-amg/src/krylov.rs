//! Outer iterations: stationary, preconditioned CG and preconditioned
//! BiCGStab.
//!
//! All three solve `A x = b` starting from the `x` passed in, with the
//! preconditioner applied once per iteration (twice for BiCGStab). The
//! multigrid cycle is the usual preconditioner, but any
//! [`Preconditioner`] works.
//!
//! # Stopping
//!
//! With `d_k = ||b - A x_k||_2`, an iteration stops as
//!
//! - converged when `d_k <= alimit`, `d_k <= rlimit * ||b||` or
//!   `d_k <= reduction * d_0`,
//! - diverged when `d_k > divlimit * d_0`,
//! - broken down when a recurrence denominator vanishes,
//!
//! and otherwise after `maxit` iterations. None of these outcomes is an
//! error; they are reported in [`KrylovOutcome::status`].
//!
//! # CG
//!
//! ```text
//! r = b - A x;  z = M^{-1} r;  p = z;  rz = r . z
//! loop:
//!     Ap = A p;  alpha = rz / (p . Ap)
//!     x += alpha p;  r -= alpha Ap
//!     z = M^{-1} r;  beta = (r . z) / rz;  p = z + beta p
//! ```
//!
//! CG assumes a symmetric positive-definite operator and preconditioner;
//! `p . Ap <= 0` is reported as a breakdown.

use tracing::{debug, trace, warn};

use crate::config::AmgConfig;
use crate::error::Result;
use crate::traits::{LinearOperator, Preconditioner};
use crate::types::{ConvergenceInfo, SolveStatus};

// ---------------------------------------------------------------------------
// f64 primitives
// ---------------------------------------------------------------------------

/// Dot product with 4-wide accumulation.
///
/// # Panics
///
/// Panics if the lengths differ.
#[inline]
pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    assert_eq!(a.len(), b.len(), "dot: length mismatch");

    let n = a.len();
    let chunks = n / 4;

    let mut acc0: f64 = 0.0;
    let mut acc1: f64 = 0.0;
    let mut acc2: f64 = 0.0;
    let mut acc3: f64 = 0.0;

    for i in 0..chunks {
        let j = i * 4;
        acc0 += a[j] * b[j];
        acc1 += a[j + 1] * b[j + 1];
        acc2 += a[j + 2] * b[j + 2];
        acc3 += a[j + 3] * b[j + 3];
    }
    for j in chunks * 4..n {
        acc0 += a[j] * b[j];
    }

    (acc0 + acc1) + (acc2 + acc3)
}

/// `y += alpha * x`.
#[inline]
pub fn axpy(alpha: f64, x: &[f64], y: &mut [f64]) {
    debug_assert_eq!(x.len(), y.len(), "axpy: length mismatch");
    for (yi, &xi) in y.iter_mut().zip(x) {
        *yi += alpha * xi;
    }
}

/// Euclidean norm.
#[inline]
pub fn norm2(x: &[f64]) -> f64 {
    dot(x, x).sqrt()
}

// ---------------------------------------------------------------------------
// Stopping criteria
// ---------------------------------------------------------------------------

/// When an iteration stops.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StoppingCriteria {
    /// Absolute defect target.
    pub alimit: f64,
    /// Defect target relative to `||b||`.
    pub rlimit: f64,
    /// Defect target relative to the initial defect.
    pub reduction: f64,
    /// Divergence factor over the initial defect.
    pub divlimit: f64,
    /// Iteration cap.
    pub maxit: usize,
}

impl StoppingCriteria {
    /// Outer-solve criteria from the configuration.
    pub fn outer(cfg: &AmgConfig) -> Self {
        Self {
            alimit: cfg.alimit,
            rlimit: cfg.rlimit,
            reduction: cfg.reduction,
            divlimit: cfg.divlimit,
            maxit: cfg.maxit,
        }
    }

    /// Coarsest-level criteria: `cgtol` relative defect within `cgmaxit`.
    pub fn coarse(cfg: &AmgConfig) -> Self {
        Self {
            alimit: 0.0,
            rlimit: 0.0,
            reduction: cfg.cgtol,
            divlimit: cfg.divlimit,
            maxit: cfg.cgmaxit,
        }
    }

    fn converged(&self, d: f64, d0: f64, bnorm: f64) -> bool {
        d <= self.alimit || d <= self.rlimit * bnorm || d <= self.reduction * d0
    }

    fn diverged(&self, d: f64, d0: f64) -> bool {
        !d.is_finite() || d > self.divlimit * d0
    }
}

impl Default for StoppingCriteria {
    fn default() -> Self {
        Self::outer(&AmgConfig::default())
    }
}

/// How an iteration ended.
#[derive(Debug, Clone, PartialEq)]
pub struct KrylovOutcome {
    /// Reason for stopping.
    pub status: SolveStatus,
    /// Iterations performed.
    pub iterations: usize,
    /// `||b - A x_0||`.
    pub initial_defect: f64,
    /// Defect at exit.
    pub final_defect: f64,
    /// Defect per iteration, starting with iteration 0.
    pub history: Vec<ConvergenceInfo>,
}

struct Monitor<'c> {
    crit: &'c StoppingCriteria,
    bnorm: f64,
    d0: f64,
    history: Vec<ConvergenceInfo>,
    label: &'static str,
}

impl<'c> Monitor<'c> {
    fn new(crit: &'c StoppingCriteria, label: &'static str, bnorm: f64, d0: f64) -> Self {
        let mut history = Vec::with_capacity(crit.maxit.min(256) + 1);
        history.push(ConvergenceInfo {
            iteration: 0,
            defect: d0,
        });
        Self {
            crit,
            bnorm,
            d0,
            history,
            label,
        }
    }

    /// Record iteration `k`; `Some(status)` when it should stop.
    fn check(&mut self, k: usize, d: f64) -> Option<SolveStatus> {
        self.history.push(ConvergenceInfo {
            iteration: k,
            defect: d,
        });
        trace!(solver = self.label, iteration = k, defect = d, "iteration");
        if self.crit.converged(d, self.d0, self.bnorm) {
            return Some(SolveStatus::Converged);
        }
        if self.crit.diverged(d, self.d0) {
            warn!(solver = self.label, iteration = k, defect = d, initial = self.d0, "diverged");
            return Some(SolveStatus::Diverged);
        }
        None
    }

    fn finish(self, status: SolveStatus, iterations: usize, d: f64) -> KrylovOutcome {
        debug!(
            solver = self.label,
            ?status,
            iterations,
            defect = d,
            initial = self.d0,
            "iteration finished"
        );
        KrylovOutcome {
            status,
            iterations,
            initial_defect: self.d0,
            final_defect: d,
            history: self.history,
        }
    }

    /// Outcome when the initial defect already satisfies the criteria.
    fn initial(&self) -> Option<SolveStatus> {
        let d0 = self.d0;
        if d0 == 0.0 || d0 <= self.crit.alimit || d0 <= self.crit.rlimit * self.bnorm {
            Some(SolveStatus::Converged)
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Iterations
// ---------------------------------------------------------------------------

/// Stationary iteration `x += M^{-1} (b - A x)`.
///
/// # Errors
///
/// Propagates preconditioner failures.
pub fn stationary(
    op: &impl LinearOperator,
    pc: &mut impl Preconditioner,
    b: &[f64],
    x: &mut [f64],
    crit: &StoppingCriteria,
) -> Result<KrylovOutcome> {
    let n = op.len();
    let mut r = vec![0.0; n];
    let mut z = vec![0.0; n];
    residual(op, b, x, &mut r);
    let d0 = norm2(&r);
    let mut mon = Monitor::new(crit, "mg", norm2(b), d0);
    if let Some(status) = mon.initial() {
        return Ok(mon.finish(status, 0, d0));
    }

    let mut d = d0;
    for k in 1..=crit.maxit {
        pc.precondition(&r, &mut z)?;
        axpy(1.0, &z, x);
        residual(op, b, x, &mut r);
        d = norm2(&r);
        if let Some(status) = mon.check(k, d) {
            return Ok(mon.finish(status, k, d));
        }
    }
    Ok(mon.finish(SolveStatus::MaxIterations, crit.maxit, d))
}

/// Preconditioned conjugate gradients.
///
/// # Errors
///
/// Propagates preconditioner failures.
pub fn cg(
    op: &impl LinearOperator,
    pc: &mut impl Preconditioner,
    b: &[f64],
    x: &mut [f64],
    crit: &StoppingCriteria,
) -> Result<KrylovOutcome> {
    let n = op.len();
    let mut r = vec![0.0; n];
    let mut z = vec![0.0; n];
    let mut p = vec![0.0; n];
    let mut ap = vec![0.0; n];

    residual(op, b, x, &mut r);
    let d0 = norm2(&r);
    let mut mon = Monitor::new(crit, "cg", norm2(b), d0);
    if let Some(status) = mon.initial() {
        return Ok(mon.finish(status, 0, d0));
    }

    pc.precondition(&r, &mut z)?;
    p.copy_from_slice(&z);
    let mut rz = dot(&r, &z);
    let mut d = d0;

    for k in 1..=crit.maxit {
        op.apply(&p, &mut ap);
        let p_ap = dot(&p, &ap);
        if p_ap <= 0.0 || !p_ap.is_finite() {
            warn!(iteration = k, p_ap, "cg: non-positive curvature");
            return Ok(mon.finish(SolveStatus::Breakdown, k - 1, d));
        }
        let alpha = rz / p_ap;
        axpy(alpha, &p, x);
        axpy(-alpha, &ap, &mut r);

        d = norm2(&r);
        if let Some(status) = mon.check(k, d) {
            return Ok(mon.finish(status, k, d));
        }

        pc.precondition(&r, &mut z)?;
        let rz_new = dot(&r, &z);
        if rz.abs() < f64::MIN_POSITIVE {
            warn!(iteration = k, rz, "cg: stagnation");
            return Ok(mon.finish(SolveStatus::Breakdown, k, d));
        }
        let beta = rz_new / rz;
        for (pi, &zi) in p.iter_mut().zip(&z) {
            *pi = zi + beta * *pi;
        }
        rz = rz_new;
    }
    Ok(mon.finish(SolveStatus::MaxIterations, crit.maxit, d))
}

/// Right-preconditioned BiCGStab.
///
/// # Errors
///
/// Propagates preconditioner failures.
pub fn bicgstab(
    op: &impl LinearOperator,
    pc: &mut impl Preconditioner,
    b: &[f64],
    x: &mut [f64],
    crit: &StoppingCriteria,
) -> Result<KrylovOutcome> {
    let n = op.len();
    let mut r = vec![0.0; n];
    residual(op, b, x, &mut r);
    let d0 = norm2(&r);
    let mut mon = Monitor::new(crit, "bicgstab", norm2(b), d0);
    if let Some(status) = mon.initial() {
        return Ok(mon.finish(status, 0, d0));
    }

    let r_hat = r.clone();
    let mut p = vec![0.0; n];
    let mut v = vec![0.0; n];
    let mut y = vec![0.0; n];
    let mut s = vec![0.0; n];
    let mut z = vec![0.0; n];
    let mut t = vec![0.0; n];
    let (mut rho, mut alpha, mut omega) = (1.0f64, 1.0f64, 1.0f64);
    let mut d = d0;

    for k in 1..=crit.maxit {
        let rho_new = dot(&r_hat, &r);
        if rho_new.abs() < f64::MIN_POSITIVE || omega.abs() < f64::MIN_POSITIVE {
            warn!(iteration = k, rho_new, omega, "bicgstab: breakdown");
            return Ok(mon.finish(SolveStatus::Breakdown, k - 1, d));
        }
        let beta = (rho_new / rho) * (alpha / omega);
        rho = rho_new;
        for ((pi, &ri), &vi) in p.iter_mut().zip(&r).zip(&v) {
            *pi = ri + beta * (*pi - omega * vi);
        }

        pc.precondition(&p, &mut y)?;
        op.apply(&y, &mut v);
        let rv = dot(&r_hat, &v);
        if rv.abs() < f64::MIN_POSITIVE {
            warn!(iteration = k, "bicgstab: r_hat . v vanished");
            return Ok(mon.finish(SolveStatus::Breakdown, k - 1, d));
        }
        alpha = rho / rv;
        s.copy_from_slice(&r);
        axpy(-alpha, &v, &mut s);

        let sn = norm2(&s);
        if crit.converged(sn, d0, mon.bnorm) {
            axpy(alpha, &y, x);
            residual(op, b, x, &mut r);
            d = norm2(&r);
            let status = mon.check(k, d).unwrap_or(SolveStatus::Converged);
            return Ok(mon.finish(status, k, d));
        }

        pc.precondition(&s, &mut z)?;
        op.apply(&z, &mut t);
        let tt = dot(&t, &t);
        omega = if tt > 0.0 { dot(&t, &s) / tt } else { 0.0 };
        axpy(alpha, &y, x);
        axpy(omega, &z, x);
        r.copy_from_slice(&s);
        axpy(-omega, &t, &mut r);

        d = norm2(&r);
        if let Some(status) = mon.check(k, d) {
            return Ok(mon.finish(status, k, d));
        }
    }
    Ok(mon.finish(SolveStatus::MaxIterations, crit.maxit, d))
}

fn residual(op: &impl LinearOperator, b: &[f64], x: &[f64], r: &mut [f64]) {
    op.apply(x, r);
    for (ri, &bi) in r.iter_mut().zip(b) {
        *ri = bi - *ri;
    }
}
