//! Integration tests for greedy coarsening.
//!
//! Covers the 1-D reference run, idempotence, ratings and topology against
//! an independent elimination replay, and the parent invariant and arena
//! discipline over every candidate variant.

mod helpers;

use std::collections::BTreeSet;

use approx::assert_relative_eq;
use ruvector_amg::arena::{Arena, Region};
use ruvector_amg::candidates::CandidateParams;
use ruvector_amg::coarsen::{self, CoarseningDriver, StepOutcome};
use ruvector_amg::config::{AmgConfig, CandidateVariant};
use ruvector_amg::graph::{Graph, Node};
use ruvector_amg::matrix::{BlockMatrix, BlockVector, ScalarView};
use ruvector_amg::types::{CsrMatrix, NodeClass};
use ruvector_amg::Hierarchy;

use helpers::{laplacian_1d, laplacian_2d, random_graph_laplacian};

use NodeClass::{Coarse as C, Fine as F};

fn view_of(csr: &CsrMatrix<f64>) -> (BlockMatrix, ScalarView) {
    let a = BlockMatrix::from_csr(csr).unwrap();
    let t = BlockVector::from_flat(1, vec![1.0; csr.rows]).unwrap();
    let view = a.condense(&t, &t);
    (a, view)
}

fn params(variant: CandidateVariant) -> CandidateParams {
    CandidateParams::from(&AmgConfig {
        variant,
        ..AmgConfig::default()
    })
}

fn problems() -> Vec<CsrMatrix<f64>> {
    vec![
        laplacian_1d(33),
        laplacian_2d(9, 8, 1.0),
        laplacian_2d(8, 8, 0.01),
        random_graph_laplacian(60, 40, 0.05, 7),
    ]
}

// ---------------------------------------------------------------------------
// 1-D reference
// ---------------------------------------------------------------------------

#[test]
fn test_five_point_laplacian_end_to_end() {
    let (_, view) = view_of(&laplacian_1d(5));
    let arena = Arena::with_capacity(1 << 16);
    let result = coarsen::coarsen(&view, None, CandidateParams::default(), 1, &arena).unwrap();
    assert_eq!(result.classes, vec![F, C, F, C, F]);

    let t = &result.transfer;
    assert_eq!(t.coarse_nodes(), &[1, 3]);
    assert_eq!(t.prolongation_row(0).collect::<Vec<_>>(), vec![(0, 1.0)]);
    let middle: Vec<_> = t.prolongation_row(2).collect();
    assert_eq!(middle.len(), 2);
    assert_relative_eq!(middle[0].1, 0.5, epsilon = 1e-12);
    assert_relative_eq!(middle[1].1, 0.5, epsilon = 1e-12);

    let cfg = AmgConfig {
        cgnodes: 2,
        ..AmgConfig::default()
    };
    let h = Hierarchy::from_csr(&laplacian_1d(5), &cfg).unwrap();
    let coarse = h.coarsest().matrix().to_dense();
    for (got, want) in coarse.iter().zip([1.5, -0.5, -0.5, 1.5]) {
        assert_relative_eq!(*got, want, epsilon = 1e-12);
    }
}

// ---------------------------------------------------------------------------
// Driver invariants
// ---------------------------------------------------------------------------

/// Elimination replay kept apart from the graph: adjacency rebuilt from the
/// matrix pattern, classes taken only from step outcomes.
struct Replay {
    adj: Vec<BTreeSet<usize>>,
    classes: Vec<NodeClass>,
}

impl Replay {
    fn new(csr: &CsrMatrix<f64>) -> Self {
        let mut adj = vec![BTreeSet::new(); csr.rows];
        for i in 0..csr.rows {
            for &j in &csr.col_indices[csr.row_ptr[i]..csr.row_ptr[i + 1]] {
                if i != j {
                    adj[i].insert(j);
                    adj[j].insert(i);
                }
            }
        }
        Self {
            adj,
            classes: vec![NodeClass::Undecided; csr.rows],
        }
    }

    fn apply(&mut self, outcome: &StepOutcome) {
        match outcome {
            StepOutcome::Coarse(i) => self.classes[*i] = C,
            StepOutcome::Fine { node, parents } => {
                let x = *node;
                self.classes[x] = F;
                let neighbours: Vec<usize> = self.adj[x].iter().copied().collect();
                for &p in parents {
                    self.classes[p] = C;
                    for &m in &neighbours {
                        if m != p {
                            self.adj[p].insert(m);
                            self.adj[m].insert(p);
                        }
                    }
                }
                for m in neighbours {
                    self.adj[m].remove(&x);
                }
                self.adj[x].clear();
            }
            StepOutcome::Retried(_) => {}
        }
    }

    /// `2 * undecided parents + missing parent-neighbour links`, minimised
    /// over the candidates; -1 without any.
    fn rating(&self, i: usize, candidates: &[Vec<usize>]) -> i32 {
        candidates
            .iter()
            .map(|parents| {
                let new_cg = parents.iter().filter(|&&p| self.classes[p] == NodeClass::Undecided).count();
                let mut missing = BTreeSet::new();
                for &p in parents {
                    for &m in &self.adj[i] {
                        if m != p && !self.adj[p].contains(&m) {
                            missing.insert((p.min(m), p.max(m)));
                        }
                    }
                }
                (2 * new_cg + missing.len()) as i32
            })
            .min()
            .unwrap_or(-1)
    }
}

#[test]
fn test_stored_ratings_match_an_independent_replay() {
    for csr in problems() {
        let (_, view) = view_of(&csr);
        let n = csr.rows;
        let arena = Arena::with_capacity(1 << 22);
        let scope = arena.scope(Region::Top).unwrap();
        let nodes: &mut [Node] = scope.alloc_slice(n).unwrap();
        let mut graph = Graph::new(nodes, &view).unwrap();
        let mut driver = CoarseningDriver::new(&view, None, CandidateParams::default(), &arena);
        driver.prepare(&mut graph).unwrap();
        let mut replay = Replay::new(&csr);

        while let Some(outcome) = driver.step(&mut graph).unwrap() {
            replay.apply(&outcome);
            for i in 0..n {
                let got: Vec<usize> = graph.topology().neighbours(i).to_vec();
                let want: Vec<usize> = replay.adj[i].iter().copied().collect();
                assert_eq!(got, want, "neighbours of {i} after {outcome:?}");
                assert_eq!(graph.node(i).class(), replay.classes[i], "class of {i} after {outcome:?}");

                if replay.classes[i] == NodeClass::Undecided {
                    let candidates: Vec<Vec<usize>> = graph
                        .palists(i)
                        .map(|(_, l)| l.candidate().parents().to_vec())
                        .collect();
                    let stored = graph.node(i).rating();
                    assert_eq!(stored, replay.rating(i, &candidates), "node {i} after {outcome:?}");
                    assert_eq!(stored, graph.reference_rating(i), "cached counters of {i}");
                }
            }
        }
        assert_eq!(graph.heap_len(), 0);
    }
}

#[test]
fn test_coarsening_is_idempotent() {
    for csr in problems() {
        let (_, view) = view_of(&csr);
        let arena = Arena::with_capacity(1 << 22);
        let scope = arena.scope(Region::Top).unwrap();
        let nodes: &mut [Node] = scope.alloc_slice(csr.rows).unwrap();
        let mut graph = Graph::new(nodes, &view).unwrap();
        let mut driver = CoarseningDriver::new(&view, None, CandidateParams::default(), &arena);
        driver.prepare(&mut graph).unwrap();
        driver.run(&mut graph).unwrap();
        let first = CoarseningDriver::finish(&graph, 1).unwrap();

        driver.prepare(&mut graph).unwrap();
        assert_eq!(driver.run(&mut graph).unwrap(), 0);
        let second = CoarseningDriver::finish(&graph, 1).unwrap();
        assert_eq!(first.classes, second.classes);
        assert_eq!(first.accepted, second.accepted);
    }
}

#[test]
fn test_runs_are_deterministic() {
    let (_, view) = view_of(&random_graph_laplacian(80, 60, 0.0, 3));
    let arena = Arena::with_capacity(1 << 22);
    let a = coarsen::coarsen(&view, None, CandidateParams::default(), 1, &arena).unwrap();
    let b = coarsen::coarsen(&view, None, CandidateParams::default(), 1, &arena).unwrap();
    assert_eq!(a.classes, b.classes);
    assert_eq!(a.accepted, b.accepted);
}

#[test]
fn test_parent_invariant_for_every_variant() {
    for csr in problems() {
        let (a, view) = view_of(&csr);
        let square = a.square_pattern();
        for variant in CandidateVariant::ALL {
            let arena = Arena::with_capacity(1 << 22);
            let result = coarsen::coarsen(&view, Some(&square), params(variant), 1, &arena).unwrap();

            assert!(result.classes.iter().all(|c| c.is_decided()), "{variant:?}");
            assert!(result.fine_count() > 0, "{variant:?} eliminated nothing");
            for (i, class) in result.classes.iter().enumerate() {
                match class {
                    NodeClass::Fine => {
                        let cand = result.accepted[i].expect("Fine node without parents");
                        assert!((1..=2).contains(&cand.parents().len()));
                        for &p in cand.parents() {
                            assert_eq!(result.classes[p], C, "{variant:?}: parent {p} of {i}");
                            assert!(csr.get(i, p).is_some(), "{variant:?}: parent {p} is not a neighbour of {i}");
                        }
                    }
                    _ => assert!(result.accepted[i].is_none()),
                }
            }

            assert_eq!(arena.used(Region::Top), 0);
            assert_eq!(arena.used(Region::Bottom), 0);
            assert!(arena.peak() > 0);
        }
    }
}

#[test]
fn test_step_outcomes_cover_every_node_once() {
    let (_, view) = view_of(&laplacian_2d(6, 6, 1.0));
    let arena = Arena::with_capacity(1 << 20);
    let scope = arena.scope(Region::Top).unwrap();
    let nodes: &mut [Node] = scope.alloc_slice(36).unwrap();
    let mut graph = Graph::new(nodes, &view).unwrap();
    let mut driver = CoarseningDriver::new(&view, None, CandidateParams::default(), &arena);
    driver.prepare(&mut graph).unwrap();

    let mut decided = vec![0usize; 36];
    while let Some(outcome) = driver.step(&mut graph).unwrap() {
        match outcome {
            StepOutcome::Coarse(i) => decided[i] += 1,
            StepOutcome::Fine { node, .. } => decided[node] += 1,
            StepOutcome::Retried(i) => assert_eq!(graph.node(i).class(), NodeClass::Undecided),
        }
    }
    // Popped nodes are decided exactly once; parents are forced Coarse
    // without being popped.
    assert!(decided.iter().all(|&d| d <= 1));
    let stats = driver.stats();
    assert_eq!(stats.fine + stats.coarse, 36);
    assert!(stats.evaluations >= 36);
}
