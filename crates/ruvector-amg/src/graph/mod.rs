//! Graph priority structure for greedy coarsening.
//!
//! [`Graph`] owns the per-node state of one coarsening pass: a bucket queue
//! ordered by integer rating (smallest first, FIFO within a rating), the
//! helplist that stages nodes whose rating is being recomputed, a pool of
//! ranked parent lists per node, and the evolving [`Topology`] the ratings
//! are computed on.
//!
//! The node table itself is borrowed from an arena scope, so the graph's
//! lifetime is bounded by the coarsening pass.

pub mod bucket;
pub mod node;
pub mod palist;
pub mod topology;

pub use node::{BucketId, Location, Node};
pub use palist::{PaList, PaListId};
pub use topology::Topology;

use tracing::trace;

use crate::candidates::Candidate;
use crate::error::{AmgError, Result};
use crate::traits::{ClassFlags, RowAccess};
use crate::types::NodeClass;

use bucket::BucketList;
use node::{FLAG_ELIGIBLE, FLAG_VISITED};
use palist::PaListPool;

/// Rating of a node without any parent candidate.
pub const NO_CANDIDATE: i32 = -1;

/// Priority structure over the nodes of one level.
#[derive(Debug)]
pub struct Graph<'a> {
    nodes: &'a mut [Node],
    pool: PaListPool,
    buckets: BucketList,
    helplist: Vec<usize>,
    topology: Topology,
    heap_len: usize,
}

impl<'a> Graph<'a> {
    /// Initialise `nodes` (Undecided, eligible, detached) and the topology
    /// from the row pattern of `view`.
    ///
    /// # Errors
    ///
    /// [`AmgError::StructuralInconsistency`] if the node table and the view
    /// disagree in size.
    pub fn new(nodes: &'a mut [Node], view: &impl RowAccess) -> Result<Self> {
        if nodes.len() != view.dim() {
            return Err(AmgError::StructuralInconsistency(format!(
                "node table of {} for a matrix of {} rows",
                nodes.len(),
                view.dim()
            )));
        }
        for n in nodes.iter_mut() {
            *n = Node {
                flags: FLAG_ELIGIBLE,
                ..Node::default()
            };
        }
        Ok(Self {
            nodes,
            pool: PaListPool::default(),
            buckets: BucketList::default(),
            helplist: Vec::new(),
            topology: Topology::from_rows(view),
            heap_len: 0,
        })
    }

    /// Number of nodes.
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// `true` for a graph without nodes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of nodes currently in the heap.
    #[inline]
    pub fn heap_len(&self) -> usize {
        self.heap_len
    }

    /// State of node `i`.
    #[inline]
    pub fn node(&self, i: usize) -> &Node {
        &self.nodes[i]
    }

    /// The current topology.
    #[inline]
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Classes of all nodes.
    pub fn classes(&self) -> Vec<NodeClass> {
        self.nodes.iter().map(|n| n.class).collect()
    }

    /// Include or exclude node `i` from the current pass.
    pub fn set_eligible(&mut self, i: usize, on: bool) {
        self.nodes[i].set_flag(FLAG_ELIGIBLE, on);
    }

    // -----------------------------------------------------------------------
    // Heap
    // -----------------------------------------------------------------------

    /// Insert node `i` at the tail of the bucket of its rating.
    pub fn insert(&mut self, i: usize) {
        debug_assert_eq!(self.nodes[i].location, Location::Detached);
        let b = self.buckets.find_or_create(self.nodes[i].rating);
        let tail = self.buckets.get(b).tail;
        {
            let node = &mut self.nodes[i];
            node.location = Location::Heap(b);
            node.pred = tail;
            node.succ = None;
        }
        match tail {
            Some(t) => self.nodes[t as usize].succ = Some(i as u32),
            None => self.buckets.get_mut(b).head = Some(i as u32),
        }
        self.buckets.get_mut(b).tail = Some(i as u32);
        self.heap_len += 1;
    }

    /// Detach node `i` from the heap or the helplist. A no-op for detached
    /// nodes.
    pub fn remove(&mut self, i: usize) {
        match self.nodes[i].location {
            Location::Detached => {}
            // Helplist entries are dropped lazily by `insert_helplist`.
            Location::Help => self.nodes[i].location = Location::Detached,
            Location::Heap(b) => {
                let Node { pred, succ, .. } = self.nodes[i];
                match pred {
                    Some(p) => self.nodes[p as usize].succ = succ,
                    None => self.buckets.get_mut(b).head = succ,
                }
                match succ {
                    Some(s) => self.nodes[s as usize].pred = pred,
                    None => self.buckets.get_mut(b).tail = pred,
                }
                let node = &mut self.nodes[i];
                node.location = Location::Detached;
                node.pred = None;
                node.succ = None;
                if self.buckets.get(b).head.is_none() {
                    self.buckets.release(b);
                }
                self.heap_len -= 1;
            }
        }
    }

    /// Pop the node with the smallest rating; FIFO among equal ratings.
    pub fn get_first_node(&mut self) -> Option<usize> {
        let b = self.buckets.first?;
        let i = self.buckets.get(b).head? as usize;
        self.remove(i);
        Some(i)
    }

    /// Move node `i` out of the heap onto the helplist.
    pub fn store(&mut self, i: usize) {
        if self.nodes[i].location == Location::Help {
            return;
        }
        self.remove(i);
        self.nodes[i].location = Location::Help;
        self.helplist.push(i);
    }

    /// Re-insert every staged node at its current rating, in staging order.
    pub fn insert_helplist(&mut self) {
        let staged = std::mem::take(&mut self.helplist);
        for &i in &staged {
            if self.nodes[i].location == Location::Help {
                self.nodes[i].location = Location::Detached;
                self.insert(i);
            }
        }
        // Reuse the allocation.
        self.helplist = staged;
        self.helplist.clear();
    }

    /// Ratings of the non-empty buckets, smallest first.
    pub fn bucket_ratings(&self) -> Vec<i32> {
        self.buckets.ratings()
    }

    // -----------------------------------------------------------------------
    // Parent lists
    // -----------------------------------------------------------------------

    /// Replace the candidate chain of node `i` with `ranked` (best first) and
    /// recount its rating. The node must not be in the heap.
    pub fn set_palists(&mut self, i: usize, ranked: &[Candidate]) {
        debug_assert!(!matches!(self.nodes[i].location, Location::Heap(_)));
        let old = self.nodes[i].palists.take();
        self.free_palist_chain(old);
        let mut head: Option<PaListId> = None;
        for c in ranked.iter().rev() {
            let mut list = PaList::new(*c);
            list.next = head;
            head = Some(self.pool.alloc(list));
        }
        self.nodes[i].palists = head;
        self.recount(i);
    }

    /// Iterate the candidate chain of node `i`.
    pub fn palists(&self, i: usize) -> PaListIter<'_> {
        PaListIter {
            pool: &self.pool,
            cur: self.nodes[i].palists,
        }
    }

    /// PaList behind a handle.
    #[inline]
    pub fn palist(&self, id: PaListId) -> &PaList {
        self.pool.get(id)
    }

    /// Frozen PaList of a Fine node.
    pub fn accepted(&self, i: usize) -> Option<&PaList> {
        self.nodes[i].accepted.map(|id| self.pool.get(id))
    }

    /// The PaList with the smallest `(cost, error)`; the earliest wins ties.
    pub fn best_palist(&self, i: usize) -> Option<PaListId> {
        let mut best: Option<(PaListId, i32, f64)> = None;
        for (id, list) in self.palists(i) {
            let key = (list.cost(), list.candidate.error());
            match best {
                Some((_, c, e)) if (c, e) <= key => {}
                _ => best = Some((id, key.0, key.1)),
            }
        }
        best.map(|b| b.0)
    }

    /// Drop every PaList of `i` that references a Fine node. Returns the
    /// number left.
    pub fn prune_palists(&mut self, i: usize) -> usize {
        let mut kept = 0;
        let mut prev: Option<PaListId> = None;
        let mut cur = self.nodes[i].palists;
        while let Some(id) = cur {
            let next = self.pool.get(id).next;
            let stale = self
                .pool
                .get(id)
                .candidate
                .parents()
                .iter()
                .any(|&p| self.nodes[p].class == NodeClass::Fine);
            if stale {
                match prev {
                    Some(p) => self.pool.get_mut(p).next = next,
                    None => self.nodes[i].palists = next,
                }
                self.pool.free(id);
            } else {
                kept += 1;
                prev = Some(id);
            }
            cur = next;
        }
        kept
    }

    fn free_palist_chain(&mut self, head: Option<PaListId>) {
        let mut cur = head;
        while let Some(id) = cur {
            cur = self.pool.get(id).next;
            self.pool.free(id);
        }
    }

    /// PaLists currently allocated (chains plus frozen lists).
    pub fn live_palists(&self) -> usize {
        self.pool.live()
    }

    // -----------------------------------------------------------------------
    // Rating
    // -----------------------------------------------------------------------

    /// Parents of `c` that are still Undecided.
    pub fn count_new_cg(&self, c: &Candidate) -> i32 {
        c.parents()
            .iter()
            .filter(|&&p| self.nodes[p].class == NodeClass::Undecided)
            .count() as i32
    }

    /// Unordered pairs `{p, m}` with `p` a parent of `c` and `m` another
    /// current neighbour of `i` that are not linked yet.
    pub fn count_new_links(&self, i: usize, c: &Candidate) -> i32 {
        let parents = c.parents();
        let mut count = 0;
        for &p in parents {
            for &m in self.topology.neighbours(i) {
                if m == p || self.topology.linked(p, m) {
                    continue;
                }
                // A pair of two parents is seen from both ends.
                if parents.contains(&m) && m < p {
                    continue;
                }
                count += 1;
            }
        }
        count
    }

    /// Recompute the counters of every PaList of `i` and its rating.
    pub fn recount(&mut self, i: usize) -> i32 {
        let mut rating: Option<i32> = None;
        let mut cur = self.nodes[i].palists;
        while let Some(id) = cur {
            let c = self.pool.get(id).candidate;
            let new_cg = self.count_new_cg(&c);
            let new_links = self.count_new_links(i, &c);
            let list = self.pool.get_mut(id);
            list.new_cg = new_cg;
            list.new_links = new_links;
            rating = Some(rating.map_or(list.cost(), |r| r.min(list.cost())));
            cur = list.next;
        }
        let rating = rating.unwrap_or(NO_CANDIDATE);
        self.nodes[i].rating = rating;
        rating
    }

    /// Rating of `i` computed from scratch without touching stored counters.
    pub fn reference_rating(&self, i: usize) -> i32 {
        self.palists(i)
            .map(|(_, l)| 2 * self.count_new_cg(&l.candidate) + self.count_new_links(i, &l.candidate))
            .min()
            .unwrap_or(NO_CANDIDATE)
    }

    // -----------------------------------------------------------------------
    // Decisions
    // -----------------------------------------------------------------------

    /// Make `i` Coarse. A no-op for a node that already is.
    ///
    /// # Errors
    ///
    /// [`AmgError::StructuralInconsistency`] if `i` is Fine.
    pub fn make_coarse(&mut self, i: usize) -> Result<()> {
        match self.nodes[i].class {
            NodeClass::Coarse => Ok(()),
            NodeClass::Fine => Err(AmgError::StructuralInconsistency(format!(
                "node {i} is Fine and cannot become Coarse"
            ))),
            NodeClass::Undecided => {
                self.remove(i);
                let old = self.nodes[i].palists.take();
                self.free_palist_chain(old);
                self.nodes[i].class = NodeClass::Coarse;
                trace!(node = i, "coarse");
                Ok(())
            }
        }
    }

    /// Make `i` Fine with the PaList `id` from its chain: the list is frozen,
    /// the rest freed, and the topology updated.
    ///
    /// # Errors
    ///
    /// [`AmgError::StructuralInconsistency`] if `i` is not Undecided or `id`
    /// is not in its chain.
    pub fn make_fine(&mut self, i: usize, id: PaListId) -> Result<()> {
        if self.nodes[i].class != NodeClass::Undecided {
            return Err(AmgError::StructuralInconsistency(format!(
                "node {i} is already {:?}",
                self.nodes[i].class
            )));
        }
        if !self.palists(i).any(|(k, _)| k == id) {
            return Err(AmgError::StructuralInconsistency(format!(
                "PaList {id:?} does not belong to node {i}"
            )));
        }
        self.remove(i);

        let mut cur = self.nodes[i].palists.take();
        while let Some(k) = cur {
            cur = self.pool.get(k).next;
            if k != id {
                self.pool.free(k);
            }
        }
        self.pool.get_mut(id).next = None;
        self.nodes[i].accepted = Some(id);
        self.nodes[i].class = NodeClass::Fine;

        let candidate = self.pool.get(id).candidate;
        self.topology.eliminate(i, candidate.parents());
        trace!(node = i, parents = ?candidate.parents(), "fine");
        Ok(())
    }

    /// Undecided eligible nodes within two hops of `x` in the current
    /// topology, `x` excluded, in discovery order.
    pub fn collect_two_hop(&mut self, x: usize) -> Vec<usize> {
        let mut touched = vec![x];
        self.nodes[x].set_flag(FLAG_VISITED, true);
        let mut frontier = 0;
        for _hop in 0..2 {
            let end = touched.len();
            for t in frontier..end {
                let v = touched[t];
                for k in 0..self.topology.neighbours(v).len() {
                    let m = self.topology.neighbours(v)[k];
                    if !self.nodes[m].has_flag(FLAG_VISITED) {
                        self.nodes[m].set_flag(FLAG_VISITED, true);
                        touched.push(m);
                    }
                }
            }
            frontier = end;
        }
        // Sweep.
        for &v in &touched {
            self.nodes[v].set_flag(FLAG_VISITED, false);
        }
        touched
            .into_iter()
            .skip(1)
            .filter(|&v| {
                let n = &self.nodes[v];
                n.class == NodeClass::Undecided && n.is_eligible()
            })
            .collect()
    }
}

impl ClassFlags for Graph<'_> {
    #[inline]
    fn class(&self, i: usize) -> NodeClass {
        self.nodes[i].class
    }
}

/// Iterator over a node's PaList chain.
pub struct PaListIter<'g> {
    pool: &'g PaListPool,
    cur: Option<PaListId>,
}

impl<'g> Iterator for PaListIter<'g> {
    type Item = (PaListId, &'g PaList);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.cur?;
        let list = self.pool.get(id);
        self.cur = list.next;
        Some((id, list))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::BlockMatrix;
    use crate::matrix::BlockVector;
    use crate::types::CsrMatrix;

    fn path_view(n: usize) -> crate::matrix::ScalarView {
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
    fn fifo_within_rating_and_sorted_across() {
        let view = path_view(4);
        let mut nodes = vec![Node::default(); 4];
        let mut g = Graph::new(&mut nodes, &view).unwrap();
        for (i, r) in [(0, 3), (1, 1), (2, 3), (3, 1)] {
            g.nodes[i].rating = r;
            g.insert(i);
        }
        assert_eq!(g.bucket_ratings(), vec![1, 3]);
        let order: Vec<_> = std::iter::from_fn(|| g.get_first_node()).collect();
        assert_eq!(order, vec![1, 3, 0, 2]);
        assert_eq!(g.heap_len(), 0);
        assert!(g.bucket_ratings().is_empty());
    }

    #[test]
    fn helplist_reinserts_at_new_rating() {
        let view = path_view(3);
        let mut nodes = vec![Node::default(); 3];
        let mut g = Graph::new(&mut nodes, &view).unwrap();
        for i in 0..3 {
            g.nodes[i].rating = 4;
            g.insert(i);
        }
        g.store(2);
        g.store(2);
        g.nodes[2].rating = 0;
        g.insert_helplist();
        assert_eq!(g.get_first_node(), Some(2));
        assert_eq!(g.heap_len(), 2);
    }

    #[test]
    fn ratings_count_links_and_new_coarse() {
        let view = path_view(5);
        let mut nodes = vec![Node::default(); 5];
        let mut g = Graph::new(&mut nodes, &view).unwrap();
        let c = Candidate::two(1, 3, [0.5, 0.5], [0.5, 0.5], 1.0);
        g.set_palists(2, &[c]);
        assert_eq!(g.node(2).rating(), 2 * 2 + 1);

        g.make_coarse(1).unwrap();
        assert_eq!(g.recount(2), 2 + 1);
        assert_eq!(g.reference_rating(2), 3);
    }

    #[test]
    fn pruning_drops_lists_with_fine_parents() {
        let view = path_view(5);
        let mut nodes = vec![Node::default(); 5];
        let mut g = Graph::new(&mut nodes, &view).unwrap();
        g.set_palists(
            1,
            &[
                Candidate::one(0, [1.0], [1.0], 1.5),
                Candidate::one(2, [1.0], [1.0], 1.6),
            ],
        );
        g.set_palists(2, &[Candidate::one(3, [1.0], [1.0], 1.0)]);
        let id = g.best_palist(2).unwrap();
        g.make_fine(2, id).unwrap();
        assert_eq!(g.prune_palists(1), 1);
        assert_eq!(g.palists(1).next().unwrap().1.candidate().parents(), &[0]);
        assert!(g.accepted(2).is_some());
        assert!(g.make_coarse(2).is_err());
    }

    #[test]
    fn two_hop_collection_clears_marks() {
        let view = path_view(6);
        let mut nodes = vec![Node::default(); 6];
        let mut g = Graph::new(&mut nodes, &view).unwrap();
        g.make_coarse(1).unwrap();
        let near = g.collect_two_hop(2);
        assert_eq!(near, vec![3, 0, 4]);
        assert!(g.nodes.iter().all(|n| !n.has_flag(FLAG_VISITED)));
    }
}
