//! Two-phase partitioned coarsening.
//!
//! Phase 1 classifies the border (owned nodes with a neighbour on another
//! rank). The border sets of all ranks are gathered and every rank runs the
//! same greedy pass over their union; since the pass is deterministic all
//! ranks reach the same classification, which is confirmed by exchanging a
//! digest. Phase 2 classifies each rank's own interior with the border
//! fixed. The owners' decisions are then gathered into one global
//! [`Coarsening`].
//!
//! Candidate parents are row neighbours, and every neighbour of an interior
//! node has the same owner, so phase 2 never touches another rank's nodes.
//! With a single rank the border is empty and the result equals the serial
//! driver's.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{gather, Communicator};
use crate::arena::{Arena, Region};
use crate::candidates::{Candidate, CandidateParams};
use crate::coarsen::{self, Coarsening, CoarseningDriver};
use crate::error::{AmgError, Result, ValidationError};
use crate::graph::{Graph, Node};
use crate::hierarchy::Coarsener;
use crate::matrix::{ScalarView, SparsityPattern};
use crate::traits::RowAccess;
use crate::types::NodeClass;

// ---------------------------------------------------------------------------
// Partition
// ---------------------------------------------------------------------------

/// Owner rank of every node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    owner: Vec<usize>,
    ranks: usize,
}

impl Partition {
    /// `nodes` split into `ranks` consecutive ranges of near-equal size.
    pub fn contiguous(nodes: usize, ranks: usize) -> Self {
        let ranks = ranks.max(1);
        Self {
            owner: (0..nodes).map(|i| i * ranks / nodes).collect(),
            ranks,
        }
    }

    /// Explicit owners.
    ///
    /// # Errors
    ///
    /// [`ValidationError::ParameterOutOfRange`] for an owner `>= ranks`.
    pub fn from_owners(owner: Vec<usize>, ranks: usize) -> Result<Self> {
        if let Some((i, &r)) = owner.iter().enumerate().find(|&(_, &r)| r >= ranks) {
            return Err(ValidationError::out_of_range(&format!("owner[{i}]"), r, &format!("< {ranks}")).into());
        }
        Ok(Self { owner, ranks })
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.owner.len()
    }

    /// `true` without nodes.
    pub fn is_empty(&self) -> bool {
        self.owner.is_empty()
    }

    /// Number of ranks.
    pub fn ranks(&self) -> usize {
        self.ranks
    }

    /// Owner of node `i`.
    pub fn owner(&self, i: usize) -> usize {
        self.owner[i]
    }

    /// Nodes owned by `rank`, ascending.
    pub fn owned(&self, rank: usize) -> impl Iterator<Item = usize> + '_ {
        (0..self.owner.len()).filter(move |&i| self.owner[i] == rank)
    }

    /// Nodes owned by `rank` with a neighbour owned elsewhere.
    pub fn border(&self, rank: usize, view: &impl RowAccess) -> Vec<usize> {
        self.owned(rank)
            .filter(|&i| view.row(i).0.iter().any(|&j| self.owner[j] != rank))
            .collect()
    }

    /// Ownership on the next level: a coarse node keeps its fine owner.
    fn restrict(&self, coarse_nodes: &[usize]) -> Self {
        Self {
            owner: coarse_nodes.iter().map(|&f| self.owner[f]).collect(),
            ranks: self.ranks,
        }
    }
}

// ---------------------------------------------------------------------------
// Coarsener
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct Decision {
    node: usize,
    class: NodeClass,
    candidate: Option<Candidate>,
}

/// [`Coarsener`] for one rank of a partitioned run. Every rank must call
/// [`Hierarchy::build_with`](crate::hierarchy::Hierarchy::build_with) on the
/// same matrix and configuration.
#[derive(Debug)]
pub struct PartitionedCoarsener<C> {
    comm: C,
    partition: Partition,
    tag: u64,
}

impl<C: Communicator> PartitionedCoarsener<C> {
    /// Coarsener for the fine level partitioned by `partition`.
    ///
    /// # Errors
    ///
    /// [`AmgError::StructuralInconsistency`] if the partition and the
    /// communicator disagree on the number of ranks.
    pub fn new(comm: C, partition: Partition) -> Result<Self> {
        if partition.ranks() != comm.size() {
            return Err(AmgError::StructuralInconsistency(format!(
                "partition over {} ranks for a group of {}",
                partition.ranks(),
                comm.size()
            )));
        }
        Ok(Self {
            comm,
            partition,
            tag: 0,
        })
    }

    /// The communicator.
    pub fn communicator(&self) -> &C {
        &self.comm
    }

    /// Ownership on the level that will be coarsened next.
    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    fn gather<T: Serialize + serde::de::DeserializeOwned>(&mut self, value: &T) -> Result<Vec<T>> {
        self.tag += 1;
        gather(&self.comm, self.tag, value)
    }
}

impl<C: Communicator + fmt::Debug> Coarsener for PartitionedCoarsener<C> {
    fn coarsen(
        &mut self,
        view: &ScalarView,
        square: Option<&SparsityPattern>,
        params: CandidateParams,
        block_size: usize,
        arena: &Arena,
    ) -> Result<Coarsening> {
        let n = view.dim();
        if self.partition.len() != n {
            return Err(AmgError::StructuralInconsistency(format!(
                "partition of {} nodes for a level of {n}",
                self.partition.len()
            )));
        }
        let rank = self.comm.rank();

        let local_border = self.partition.border(rank, view);
        let mut in_border = vec![false; n];
        for list in self.gather(&local_border)? {
            for i in list {
                *in_border.get_mut(i).ok_or_else(|| {
                    AmgError::Communication(format!("border node {i} outside a level of {n}"))
                })? = true;
            }
        }

        let scope = arena.scope(Region::Top)?;
        let nodes: &mut [Node] = scope.alloc_slice(n)?;
        let mut graph = Graph::new(nodes, view)?;
        let mut driver = CoarseningDriver::new(view, square, params, arena);

        // Phase 1: the shared border, replicated on every rank.
        for (i, &b) in in_border.iter().enumerate() {
            graph.set_eligible(i, b);
        }
        driver.prepare(&mut graph)?;
        let border_steps = driver.run(&mut graph)?;
        let digest = class_digest(&graph.classes());
        let digests = self.gather(&digest)?;
        if let Some(q) = digests.iter().position(|&d| d != digest) {
            return Err(AmgError::Communication(format!(
                "rank {q} classified the border differently from rank {rank}"
            )));
        }

        // Phase 2: own interior.
        for (i, &b) in in_border.iter().enumerate() {
            graph.set_eligible(i, !b && self.partition.owner(i) == rank);
        }
        driver.prepare(&mut graph)?;
        let interior_steps = driver.run(&mut graph)?;

        let (local_classes, local_accepted) = coarsen::decisions(&graph);
        let mine: Vec<Decision> = self
            .partition
            .owned(rank)
            .map(|i| Decision {
                node: i,
                class: local_classes[i],
                candidate: local_accepted[i],
            })
            .collect();
        drop(graph);
        scope.release()?;

        let mut classes = vec![NodeClass::Undecided; n];
        let mut accepted = vec![None; n];
        for d in self.gather(&mine)?.into_iter().flatten() {
            let slot = classes
                .get_mut(d.node)
                .ok_or_else(|| AmgError::Communication(format!("decision for node {} outside a level of {n}", d.node)))?;
            *slot = d.class;
            accepted[d.node] = d.candidate;
        }
        let coarsening = Coarsening::from_decisions(classes, accepted, block_size)?;

        debug!(
            rank,
            nodes = n,
            border = in_border.iter().filter(|&&b| b).count(),
            border_steps,
            interior_steps,
            coarse = coarsening.coarse_len(),
            "partitioned coarsening finished"
        );
        self.partition = self.partition.restrict(coarsening.transfer.coarse_nodes());
        Ok(coarsening)
    }
}

/// FNV-1a over the class sequence.
fn class_digest(classes: &[NodeClass]) -> u64 {
    classes.iter().fold(0xcbf2_9ce4_8422_2325u64, |h, c| {
        let byte = match c {
            NodeClass::Undecided => 0u64,
            NodeClass::Coarse => 1,
            NodeClass::Fine => 2,
        };
        (h ^ byte).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::ChannelCommunicator;
    use crate::matrix::{BlockMatrix, BlockVector};
    use crate::types::CsrMatrix;
    use std::thread;

    fn path(n: usize) -> ScalarView {
        let mut e = Vec::new();
        for i in 0..n {
            e.push((i, i, 2.0));
            if i + 1 < n {
                e.push((i, i + 1, -1.0));
                e.push((i + 1, i, -1.0));
            }
        }
        let a = BlockMatrix::from_csr(&CsrMatrix::from_coo(n, n, e)).unwrap();
        let t = BlockVector::from_flat(1, vec![1.0; n]).unwrap();
        a.condense(&t, &t)
    }

    #[test]
    fn contiguous_ranges_and_border() {
        let p = Partition::contiguous(8, 2);
        assert_eq!(p.owned(0).collect::<Vec<_>>(), vec![0, 1, 2, 3]);
        assert_eq!(p.owned(1).collect::<Vec<_>>(), vec![4, 5, 6, 7]);
        let view = path(8);
        assert_eq!(p.border(0, &view), vec![3]);
        assert_eq!(p.border(1, &view), vec![4]);
    }

    #[test]
    fn owners_are_range_checked() {
        assert!(Partition::from_owners(vec![0, 1, 2], 2).is_err());
        assert!(PartitionedCoarsener::new(ChannelCommunicator::group(2).remove(0), Partition::contiguous(4, 3)).is_err());
    }

    #[test]
    fn one_rank_matches_the_serial_driver() {
        let view = path(21);
        let arena = Arena::with_capacity(1 << 20);
        let serial = coarsen::coarsen(&view, None, CandidateParams::default(), 1, &arena).unwrap();

        let comm = ChannelCommunicator::group(1).remove(0);
        let mut pc = PartitionedCoarsener::new(comm, Partition::contiguous(21, 1)).unwrap();
        let part = pc.coarsen(&view, None, CandidateParams::default(), 1, &arena).unwrap();
        assert_eq!(part.classes, serial.classes);
        assert_eq!(part.accepted, serial.accepted);
        assert_eq!(arena.used(Region::Top), 0);
        assert_eq!(pc.partition().len(), part.coarse_len());
    }

    #[test]
    fn ranks_agree_on_one_global_coarsening() {
        let n = 40;
        let handles: Vec<_> = ChannelCommunicator::group(3)
            .into_iter()
            .map(|comm| {
                thread::spawn(move || {
                    let view = path(n);
                    let arena = Arena::with_capacity(1 << 20);
                    let mut pc = PartitionedCoarsener::new(comm, Partition::contiguous(n, 3)).unwrap();
                    pc.coarsen(&view, None, CandidateParams::default(), 1, &arena).unwrap()
                })
            })
            .collect();
        let results: Vec<Coarsening> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for r in &results[1..] {
            assert_eq!(r.classes, results[0].classes);
        }
        let c = &results[0];
        assert!(c.classes.iter().all(|cl| cl.is_decided()));
        for (i, acc) in c.accepted.iter().enumerate() {
            if c.classes[i] == NodeClass::Fine {
                let cand = acc.expect("fine node has parents");
                assert!(cand.parents().iter().all(|&p| c.classes[p] == NodeClass::Coarse));
            }
        }
        assert!(c.fine_count() > n / 3);
    }

    #[test]
    fn digest_tells_classes_apart() {
        use NodeClass::*;
        assert_ne!(class_digest(&[Coarse, Fine]), class_digest(&[Fine, Coarse]));
        assert_eq!(class_digest(&[Fine, Coarse]), class_digest(&[Fine, Coarse]));
    }
}
