//! Per-node coarsening state.
//!
//! Nodes live in an arena slice for the duration of one coarsening pass, so
//! they are plain `Copy` data linked by indices.

use crate::types::NodeClass;

use super::palist::PaListId;

/// Index of a bucket in the graph's bucket pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BucketId(pub(crate) u32);

/// Where a node currently sits in the priority structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Location {
    /// In no list.
    #[default]
    Detached,
    /// In the bucket with the given id.
    Heap(BucketId),
    /// Staged on the helplist for re-insertion.
    Help,
}

pub(crate) const FLAG_ELIGIBLE: u8 = 0b01;
pub(crate) const FLAG_VISITED: u8 = 0b10;

/// Coarsening state of one unknown.
#[derive(Debug, Clone, Copy, Default)]
pub struct Node {
    pub(crate) rating: i32,
    pub(crate) class: NodeClass,
    pub(crate) location: Location,
    pub(crate) pred: Option<u32>,
    pub(crate) succ: Option<u32>,
    /// Head of the ranked candidate chain.
    pub(crate) palists: Option<PaListId>,
    /// The frozen PaList of a Fine node.
    pub(crate) accepted: Option<PaListId>,
    pub(crate) flags: u8,
}

impl Node {
    /// Current rating (`-1` when the node has no candidate).
    #[inline]
    pub fn rating(&self) -> i32 {
        self.rating
    }

    /// Current class.
    #[inline]
    pub fn class(&self) -> NodeClass {
        self.class
    }

    /// Current location.
    #[inline]
    pub fn location(&self) -> Location {
        self.location
    }

    /// `true` if the node takes part in the current pass.
    #[inline]
    pub fn is_eligible(&self) -> bool {
        self.flags & FLAG_ELIGIBLE != 0
    }

    #[inline]
    pub(crate) fn set_flag(&mut self, flag: u8, on: bool) {
        if on {
            self.flags |= flag;
        } else {
            self.flags &= !flag;
        }
    }

    #[inline]
    pub(crate) fn has_flag(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }
}
