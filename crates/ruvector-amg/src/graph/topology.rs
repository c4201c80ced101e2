//! The evolving coarse-graph topology used for rating.
//!
//! Starts as the symmetrised matrix pattern without the diagonal. Eliminating
//! a node links each of its parents to each of its remaining neighbours and
//! removes the node, so the topology always approximates the pattern of the
//! Galerkin operator on the nodes still alive.

use crate::traits::RowAccess;

/// Symmetric adjacency with sorted neighbour lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    adj: Vec<Vec<usize>>,
}

impl Topology {
    /// Symmetrised pattern of `view` without self links.
    pub fn from_rows(view: &impl RowAccess) -> Self {
        let n = view.dim();
        let mut adj: Vec<Vec<usize>> = vec![Vec::new(); n];
        for i in 0..n {
            let (cols, _) = view.row(i);
            for &j in cols {
                if j != i {
                    adj[i].push(j);
                    adj[j].push(i);
                }
            }
        }
        for list in &mut adj {
            list.sort_unstable();
            list.dedup();
        }
        Self { adj }
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.adj.len()
    }

    /// `true` if there are no nodes.
    pub fn is_empty(&self) -> bool {
        self.adj.is_empty()
    }

    /// Sorted neighbours of `i`.
    #[inline]
    pub fn neighbours(&self, i: usize) -> &[usize] {
        &self.adj[i]
    }

    /// `true` if `a` and `b` are linked.
    #[inline]
    pub fn linked(&self, a: usize, b: usize) -> bool {
        self.adj[a].binary_search(&b).is_ok()
    }

    /// Link `a` and `b`. Returns `false` if they already were.
    pub fn link(&mut self, a: usize, b: usize) -> bool {
        if a == b {
            return false;
        }
        match self.adj[a].binary_search(&b) {
            Ok(_) => false,
            Err(pos) => {
                self.adj[a].insert(pos, b);
                if let Err(pos) = self.adj[b].binary_search(&a) {
                    self.adj[b].insert(pos, a);
                }
                true
            }
        }
    }

    /// Remove every link of `x`.
    pub fn isolate(&mut self, x: usize) {
        let list = std::mem::take(&mut self.adj[x]);
        for m in list {
            if let Ok(pos) = self.adj[m].binary_search(&x) {
                self.adj[m].remove(pos);
            }
        }
    }

    /// Eliminate `x` with the given parents: fill, then isolate.
    pub fn eliminate(&mut self, x: usize, parents: &[usize]) {
        let neighbours = self.adj[x].clone();
        for &p in parents {
            for &m in &neighbours {
                self.link(p, m);
            }
        }
        self.isolate(x);
    }
}
