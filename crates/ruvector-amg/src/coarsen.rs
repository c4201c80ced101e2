//! Greedy coarsening driver.
//!
//! The driver repeatedly takes the node with the smallest rating from the
//! [`Graph`] and decides it:
//!
//! - a node without any parent candidate becomes Coarse;
//! - otherwise its best parent list is accepted: the node becomes Fine, its
//!   parents become Coarse and the topology is updated; every Undecided node
//!   within two hops is then re-rated (lists with Fine parents are dropped
//!   and the node's candidates regenerated);
//! - if the best list has gone stale in the meantime the node's candidates
//!   are regenerated and it is queued again.
//!
//! Ratings are integers, so decisions depend only on the matrix pattern,
//! the candidate errors and the node order; two runs over the same input
//! produce the same classification.

use std::time::Instant;

use tracing::{debug, trace};

use crate::arena::{Arena, Region};
use crate::candidates::{Candidate, CandidateGenerator, CandidateParams};
use crate::error::Result;
use crate::graph::{Graph, Location, Node};
use crate::matrix::{ScalarView, SparsityPattern};
use crate::traits::ClassFlags;
use crate::transfer::TransferOperator;
use crate::types::NodeClass;

/// What one call to [`CoarseningDriver::step`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// The node had no candidate and became Coarse.
    Coarse(usize),
    /// The node became Fine with the listed parents.
    Fine {
        /// The decided node.
        node: usize,
        /// Its parents, now Coarse.
        parents: Vec<usize>,
    },
    /// The best list referenced a Fine node; candidates were regenerated and
    /// the node re-queued.
    Retried(usize),
}

/// Result of a coarsening pass.
#[derive(Debug, Clone)]
pub struct Coarsening {
    /// Final class per fine node.
    pub classes: Vec<NodeClass>,
    /// Accepted candidate per Fine node (fine-level node ids).
    pub accepted: Vec<Option<Candidate>>,
    /// Transfer operator built from the classification.
    pub transfer: TransferOperator,
}

impl Coarsening {
    /// Assemble from per-node decisions.
    ///
    /// # Errors
    ///
    /// Whatever [`TransferOperator::from_decisions`] rejects.
    pub fn from_decisions(
        classes: Vec<NodeClass>,
        accepted: Vec<Option<Candidate>>,
        block_size: usize,
    ) -> Result<Self> {
        let transfer = TransferOperator::from_decisions(&classes, &accepted, block_size)?;
        Ok(Self {
            classes,
            accepted,
            transfer,
        })
    }

    /// Number of Coarse nodes.
    pub fn coarse_len(&self) -> usize {
        self.transfer.coarse_len()
    }

    /// Number of Fine nodes.
    pub fn fine_count(&self) -> usize {
        self.transfer.interpolated()
    }
}

/// Counters of one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoarseningStats {
    /// Nodes popped from the heap.
    pub steps: usize,
    /// Nodes made Fine.
    pub fine: usize,
    /// Nodes made Coarse, parents included.
    pub coarse: usize,
    /// Stale best lists that forced a regeneration.
    pub retries: usize,
    /// Candidate generator invocations.
    pub evaluations: usize,
}

/// Drives the greedy classification of one level.
#[derive(Debug)]
pub struct CoarseningDriver<'v> {
    generator: CandidateGenerator<'v>,
    arena: &'v Arena,
    stats: CoarseningStats,
}

impl<'v> CoarseningDriver<'v> {
    /// Driver over a condensed matrix.
    pub fn new(
        view: &'v ScalarView,
        square: Option<&'v SparsityPattern>,
        params: CandidateParams,
        arena: &'v Arena,
    ) -> Self {
        Self {
            generator: CandidateGenerator::new(view, square, params),
            arena,
            stats: CoarseningStats::default(),
        }
    }

    /// Counters so far.
    pub fn stats(&self) -> CoarseningStats {
        self.stats
    }

    /// The candidate generator in use.
    pub fn generator(&self) -> &CandidateGenerator<'v> {
        &self.generator
    }

    /// Generate candidates for every eligible Undecided node that is not yet
    /// queued, rate it and insert it into the heap, in index order.
    ///
    /// # Errors
    ///
    /// Arena failures from the candidate generator.
    pub fn prepare(&mut self, graph: &mut Graph<'_>) -> Result<()> {
        let mut queued = 0usize;
        for i in 0..graph.len() {
            let node = graph.node(i);
            if node.class != NodeClass::Undecided || !node.is_eligible() || node.location != Location::Detached {
                continue;
            }
            self.evaluate(graph, i)?;
            graph.insert(i);
            queued += 1;
        }
        debug!(queued, heap = graph.heap_len(), "coarsening prepared");
        Ok(())
    }

    /// Decide the node with the smallest rating. `Ok(None)` once the heap
    /// is empty.
    ///
    /// # Errors
    ///
    /// Arena failures and [`crate::error::AmgError::StructuralInconsistency`]
    /// if the graph state is corrupt.
    pub fn step(&mut self, graph: &mut Graph<'_>) -> Result<Option<StepOutcome>> {
        let Some(i) = graph.get_first_node() else {
            return Ok(None);
        };
        self.stats.steps += 1;

        let Some(id) = graph.best_palist(i) else {
            let affected = graph.collect_two_hop(i);
            graph.make_coarse(i)?;
            self.stats.coarse += 1;
            self.reevaluate(graph, &affected)?;
            return Ok(Some(StepOutcome::Coarse(i)));
        };

        let candidate = graph.palist(id).candidate;
        if candidate.parents().iter().any(|&p| graph.is_fine(p)) {
            self.stats.retries += 1;
            trace!(node = i, "stale parent list, regenerating");
            self.evaluate(graph, i)?;
            graph.insert(i);
            return Ok(Some(StepOutcome::Retried(i)));
        }

        // Collected before elimination changes the topology.
        let affected = graph.collect_two_hop(i);
        for &p in candidate.parents() {
            if !graph.is_coarse(p) {
                graph.make_coarse(p)?;
                self.stats.coarse += 1;
            }
        }
        graph.make_fine(i, id)?;
        self.stats.fine += 1;
        self.reevaluate(graph, &affected)?;

        Ok(Some(StepOutcome::Fine {
            node: i,
            parents: candidate.parents().to_vec(),
        }))
    }

    /// Step until the heap is empty. Returns the number of steps taken; zero
    /// on a graph with nothing queued.
    ///
    /// # Errors
    ///
    /// See [`step`](Self::step).
    pub fn run(&mut self, graph: &mut Graph<'_>) -> Result<usize> {
        let start = Instant::now();
        let mut steps = 0usize;
        while self.step(graph)?.is_some() {
            steps += 1;
        }
        debug!(
            steps,
            fine = self.stats.fine,
            coarse = self.stats.coarse,
            retries = self.stats.retries,
            elapsed_us = start.elapsed().as_micros() as u64,
            "coarsening pass finished"
        );
        Ok(steps)
    }

    /// Collect classes and accepted lists into a [`Coarsening`]. Nodes left
    /// Undecided (never eligible) are made Coarse.
    ///
    /// # Errors
    ///
    /// [`crate::error::AmgError::StructuralInconsistency`] if a Fine node
    /// lost its accepted list.
    pub fn finish(graph: &Graph<'_>, block_size: usize) -> Result<Coarsening> {
        let (classes, accepted) = decisions(graph);
        Coarsening::from_decisions(classes, accepted, block_size)
    }

    fn evaluate(&mut self, graph: &mut Graph<'_>, i: usize) -> Result<()> {
        let ranked = self.generator.generate(i, &*graph, self.arena)?;
        self.stats.evaluations += 1;
        graph.set_palists(i, &ranked);
        Ok(())
    }

    fn reevaluate(&mut self, graph: &mut Graph<'_>, affected: &[usize]) -> Result<()> {
        for &v in affected {
            if graph.class(v) != NodeClass::Undecided {
                continue;
            }
            graph.store(v);
            let before = graph.palists(v).count();
            let kept = graph.prune_palists(v);
            if kept < before {
                self.evaluate(graph, v)?;
            } else {
                graph.recount(v);
            }
        }
        graph.insert_helplist();
        Ok(())
    }
}

/// Classes and accepted candidates of every node; Undecided nodes are
/// reported as Coarse.
pub(crate) fn decisions(graph: &Graph<'_>) -> (Vec<NodeClass>, Vec<Option<Candidate>>) {
    let classes = graph
        .classes()
        .into_iter()
        .map(|c| match c {
            NodeClass::Undecided => NodeClass::Coarse,
            c => c,
        })
        .collect();
    let accepted = (0..graph.len())
        .map(|i| graph.accepted(i).map(|l| l.candidate))
        .collect();
    (classes, accepted)
}

/// One complete serial coarsening pass over `view`.
///
/// The node table lives in a Top scope of `arena`; candidate scratch uses
/// Bottom scopes. Both are released before returning.
///
/// # Errors
///
/// Arena exhaustion and structural failures.
pub fn coarsen(
    view: &ScalarView,
    square: Option<&SparsityPattern>,
    params: CandidateParams,
    block_size: usize,
    arena: &Arena,
) -> Result<Coarsening> {
    use crate::traits::RowAccess;

    let scope = arena.scope(Region::Top)?;
    let nodes: &mut [Node] = scope.alloc_slice(view.dim())?;
    let mut graph = Graph::new(nodes, view)?;
    let mut driver = CoarseningDriver::new(view, square, params, arena);
    driver.prepare(&mut graph)?;
    driver.run(&mut graph)?;
    CoarseningDriver::finish(&graph, block_size)
}
