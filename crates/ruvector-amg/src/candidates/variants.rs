//! The candidate heuristics behind option `type`.
//!
//! Variants 0-5 differ only in the patch they cut around the node and in how
//! couplings leaving it are treated; they share [`PatchStrategy`]. Variant 6
//! skips the local solve and estimates everything from the matrix row
//! ([`RowOnlyStrategy`]).

use std::fmt;

use crate::arena::{Arena, Region};
use crate::config::CandidateVariant;
use crate::error::Result;
use crate::matrix::SparsityPattern;
use crate::traits::RowAccess;

use super::patch::{local_green, Boundary, LocalGreen, Side};
use super::weights::{fit_one, fit_row, fit_two};
use super::Candidate;

/// A parent set to evaluate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentSet {
    /// One parent.
    One(usize),
    /// Two parents, `j < k`.
    Two(usize, usize),
}

impl ParentSet {
    /// Parent ids.
    pub fn parents(&self) -> ([usize; 2], usize) {
        match *self {
            ParentSet::One(j) => ([j, j], 1),
            ParentSet::Two(j, k) => ([j, k], 2),
        }
    }
}

/// Everything a strategy may read about one node.
pub struct NodeContext<'c> {
    pub(crate) view: &'c dyn RowAccess,
    pub(crate) ta: &'c [f64],
    pub(crate) tb: &'c [f64],
    pub(crate) square: Option<&'c SparsityPattern>,
    pub(crate) maxpatch: usize,
    pub(crate) arena: &'c Arena,
    pub(crate) node: usize,
    pub(crate) strong: &'c [usize],
}

/// An interchangeable way to turn parent sets into weighted candidates.
///
/// Implementations return one [`Candidate`] per set they can fit; sets whose
/// local problem is degenerate are left out. Filtering and ranking happen in
/// the generator.
pub trait CandidateStrategy: fmt::Debug + Send + Sync {
    /// Fit every set in `sets` for `ctx.node`.
    ///
    /// # Errors
    ///
    /// Arena failures only.
    fn evaluate(&self, ctx: &NodeContext<'_>, sets: &[ParentSet]) -> Result<Vec<Candidate>>;
}

/// Strategy object for a configured variant.
pub fn strategy_for(variant: CandidateVariant) -> Box<dyn CandidateStrategy> {
    use CandidateVariant as V;
    let patch = |shape, boundary, shared| -> Box<dyn CandidateStrategy> {
        Box::new(PatchStrategy {
            shape,
            boundary,
            shared,
        })
    };
    match variant {
        V::ParentsFiltered => patch(PatchShape::Parents, Boundary::Filtered, false),
        V::ParentsDirichlet => patch(PatchShape::Parents, Boundary::Dirichlet, false),
        V::NeighbourhoodFiltered => patch(PatchShape::Neighbourhood, Boundary::Filtered, false),
        V::NeighbourhoodDirichlet => patch(PatchShape::Neighbourhood, Boundary::Dirichlet, false),
        V::TwoHopFiltered => patch(PatchShape::TwoHop, Boundary::Filtered, false),
        V::TwoHopSymmetric => patch(PatchShape::TwoHop, Boundary::Filtered, true),
        V::RowOnly => Box::new(RowOnlyStrategy),
    }
}

// ---------------------------------------------------------------------------
// Patch-based variants
// ---------------------------------------------------------------------------

/// Nodes a local patch covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchShape {
    /// The node and the parents being tried.
    Parents,
    /// The node and its whole matrix row.
    Neighbourhood,
    /// The node's row of the structural square of the pattern.
    TwoHop,
}

/// Local-solve heuristic (variants 0-5).
#[derive(Debug, Clone, Copy)]
pub struct PatchStrategy {
    shape: PatchShape,
    boundary: Boundary,
    /// One symmetric fit serves both prolongation and restriction.
    shared: bool,
}

impl PatchStrategy {
    fn sides<'t>(&self, ctx: &NodeContext<'t>) -> Vec<(Side, &'t [f64])> {
        if self.shared {
            vec![(Side::Symmetric, ctx.ta)]
        } else {
            vec![(Side::Prolongation, ctx.ta), (Side::Restriction, ctx.tb)]
        }
    }

    /// Centre first, the rest sorted.
    fn fixed_patch(&self, ctx: &NodeContext<'_>) -> Vec<usize> {
        let i = ctx.node;
        let neighbourhood = || {
            let (cols, _) = ctx.view.row(i);
            std::iter::once(i)
                .chain(cols.iter().copied().filter(|&c| c != i))
                .collect::<Vec<_>>()
        };
        match self.shape {
            PatchShape::TwoHop => {
                let mut rest: Vec<usize> = match ctx.square {
                    Some(sq) => sq.row(i).iter().copied().filter(|&c| c != i).collect(),
                    None => {
                        let (cols, _) = ctx.view.row(i);
                        let mut v: Vec<usize> = cols
                            .iter()
                            .flat_map(|&j| ctx.view.row(j).0.iter().copied())
                            .filter(|&c| c != i)
                            .collect();
                        v.sort_unstable();
                        v.dedup();
                        v
                    }
                };
                if rest.len() + 1 > ctx.maxpatch {
                    tracing::trace!(node = i, size = rest.len() + 1, "two-hop patch too large, using row");
                    return neighbourhood();
                }
                rest.insert(0, i);
                rest
            }
            _ => neighbourhood(),
        }
    }

    fn fit(
        &self,
        greens: &[(LocalGreen<'_>, &[f64])],
        ctx: &NodeContext<'_>,
        set: ParentSet,
    ) -> Result<Option<Candidate>> {
        let i = ctx.node;
        let aii = ctx.view.diagonal(i).abs();
        let mut weights = [[0.0f64; 2]; 2];
        let mut error = 0.0f64;
        for (side, (green, t)) in greens.iter().enumerate() {
            let fitted = match set {
                ParentSet::One(j) => fit_one(green, t, i, j)?.map(|(w, e)| ([w[0], 0.0], e)),
                ParentSet::Two(j, k) => fit_two(green, t, i, j, k)?,
            };
            let Some((w, e)) = fitted else {
                return Ok(None);
            };
            weights[side] = w;
            error = error.max(aii * e);
        }
        let restriction = if greens.len() == 1 { weights[0] } else { weights[1] };
        Ok(Some(Candidate::from_set(set, weights[0], restriction, error)))
    }
}

impl CandidateStrategy for PatchStrategy {
    fn evaluate(&self, ctx: &NodeContext<'_>, sets: &[ParentSet]) -> Result<Vec<Candidate>> {
        let mut out = Vec::with_capacity(sets.len());
        let sides = self.sides(ctx);

        if self.shape == PatchShape::Parents {
            for &set in sets {
                let (p, len) = set.parents();
                let mut patch = vec![ctx.node];
                patch.extend_from_slice(&p[..len]);
                patch[1..].sort_unstable();
                let scope = ctx.arena.scope(Region::Bottom)?;
                let mut greens = Vec::with_capacity(sides.len());
                for &(side, t) in &sides {
                    match local_green(&scope, ctx.view, side, t, self.boundary, &patch, &patch)? {
                        Some(g) => greens.push((g, t)),
                        None => break,
                    }
                }
                if greens.len() == sides.len() {
                    out.extend(self.fit(&greens, ctx, set)?);
                }
            }
            return Ok(out);
        }

        let patch = self.fixed_patch(ctx);
        let mut interest = Vec::with_capacity(ctx.strong.len() + 1);
        interest.push(ctx.node);
        interest.extend_from_slice(ctx.strong);

        let scope = ctx.arena.scope(Region::Bottom)?;
        let mut greens = Vec::with_capacity(sides.len());
        for &(side, t) in &sides {
            match local_green(&scope, ctx.view, side, t, self.boundary, &patch, &interest)? {
                Some(g) => greens.push((g, t)),
                None => return Ok(out),
            }
        }
        for &set in sets {
            out.extend(self.fit(&greens, ctx, set)?);
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Row-only variant
// ---------------------------------------------------------------------------

/// Matrix-row estimate without a local solve (variant 6).
///
/// Weights distribute `t_i` over the parents in proportion to `a_ij t_j`;
/// the error is the share of the row's scaled coupling that misses the
/// parents.
#[derive(Debug, Clone, Copy, Default)]
pub struct RowOnlyStrategy;

impl RowOnlyStrategy {
    fn side(cols: &[usize], vals: &[f64], t: &[f64], i: usize, parents: &[usize]) -> Option<([f64; 2], f64)> {
        let mut a_ip = [0.0; 2];
        let mut t_p = [0.0; 2];
        for (k, &p) in parents.iter().enumerate() {
            let pos = cols.binary_search(&p).ok()?;
            a_ip[k] = vals[pos];
            t_p[k] = t[p];
        }
        let n = parents.len();
        let mut w = [0.0; 2];
        fit_row(&a_ip[..n], &t_p[..n], t[i], &mut w[..n])?;

        let caught: f64 = a_ip[..n].iter().zip(&t_p[..n]).map(|(a, t)| (a * t).abs()).sum();
        let missed: f64 = cols
            .iter()
            .zip(vals)
            .filter(|&(&c, _)| c != i && !parents.contains(&c))
            .map(|(&c, a)| (a * t[c]).abs())
            .sum();
        Some((w, missed / caught))
    }
}

impl CandidateStrategy for RowOnlyStrategy {
    fn evaluate(&self, ctx: &NodeContext<'_>, sets: &[ParentSet]) -> Result<Vec<Candidate>> {
        let i = ctx.node;
        let (cols, vals) = ctx.view.row(i);
        let adj = ctx.view.adjoint_row(i);
        let out = sets
            .iter()
            .filter_map(|&set| {
                let (p, len) = set.parents();
                let parents = &p[..len];
                let (wp, ep) = Self::side(cols, vals, ctx.ta, i, parents)?;
                let (wr, er) = Self::side(cols, adj, ctx.tb, i, parents)?;
                Some(Candidate::from_set(set, wp, wr, ep.max(er)))
            })
            .collect();
        Ok(out)
    }
}
