//! Pooled parent lists.

use crate::candidates::Candidate;

/// Handle of a [`PaList`] in the graph's pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PaListId(pub(crate) u32);

/// A parent candidate of one node together with its rating counters.
#[derive(Debug, Clone, Copy)]
pub struct PaList {
    pub(crate) candidate: Candidate,
    /// Parents that would newly become Coarse.
    pub(crate) new_cg: i32,
    /// Links eliminating the node would add to the coarse topology.
    pub(crate) new_links: i32,
    pub(crate) next: Option<PaListId>,
}

impl PaList {
    pub(crate) fn new(candidate: Candidate) -> Self {
        Self {
            candidate,
            new_cg: 0,
            new_links: 0,
            next: None,
        }
    }

    /// The interpolation this list proposes.
    #[inline]
    pub fn candidate(&self) -> &Candidate {
        &self.candidate
    }

    /// Parents that are still Undecided.
    #[inline]
    pub fn new_cg(&self) -> i32 {
        self.new_cg
    }

    /// Links that eliminating the node with this list would add.
    #[inline]
    pub fn new_links(&self) -> i32 {
        self.new_links
    }

    /// `2 * new_cg + new_links`.
    #[inline]
    pub fn cost(&self) -> i32 {
        2 * self.new_cg + self.new_links
    }
}

/// Index pool with a free list.
#[derive(Debug, Default)]
pub(crate) struct PaListPool {
    slots: Vec<PaList>,
    free: Vec<u32>,
}

impl PaListPool {
    pub(crate) fn alloc(&mut self, list: PaList) -> PaListId {
        match self.free.pop() {
            Some(k) => {
                self.slots[k as usize] = list;
                PaListId(k)
            }
            None => {
                self.slots.push(list);
                PaListId(self.slots.len() as u32 - 1)
            }
        }
    }

    pub(crate) fn free(&mut self, id: PaListId) {
        self.free.push(id.0);
    }

    #[inline]
    pub(crate) fn get(&self, id: PaListId) -> &PaList {
        &self.slots[id.0 as usize]
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, id: PaListId) -> &mut PaList {
        &mut self.slots[id.0 as usize]
    }

    /// Slots handed out and not freed.
    pub(crate) fn live(&self) -> usize {
        self.slots.len() - self.free.len()
    }
}
