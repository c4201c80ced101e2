//! Rating buckets.
//!
//! Buckets form a doubly linked list sorted by rating; each bucket holds a
//! FIFO doubly linked list of nodes threaded through the nodes' own
//! `pred`/`succ` fields. Empty buckets go back to a free list.

use super::node::BucketId;

#[derive(Debug, Clone, Copy)]
pub(crate) struct Bucket {
    pub(crate) rating: i32,
    pub(crate) head: Option<u32>,
    pub(crate) tail: Option<u32>,
    pub(crate) prev: Option<BucketId>,
    pub(crate) next: Option<BucketId>,
}

/// Sorted bucket list plus its slot pool.
#[derive(Debug, Default)]
pub(crate) struct BucketList {
    slots: Vec<Bucket>,
    free: Vec<u32>,
    pub(crate) first: Option<BucketId>,
}

impl BucketList {
    #[inline]
    pub(crate) fn get(&self, id: BucketId) -> &Bucket {
        &self.slots[id.0 as usize]
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, id: BucketId) -> &mut Bucket {
        &mut self.slots[id.0 as usize]
    }

    /// Bucket for `rating`, created in sorted position if absent.
    pub(crate) fn find_or_create(&mut self, rating: i32) -> BucketId {
        let mut prev: Option<BucketId> = None;
        let mut cur = self.first;
        while let Some(id) = cur {
            let b = self.get(id);
            if b.rating == rating {
                return id;
            }
            if b.rating > rating {
                break;
            }
            prev = Some(id);
            cur = b.next;
        }

        let bucket = Bucket {
            rating,
            head: None,
            tail: None,
            prev,
            next: cur,
        };
        let id = match self.free.pop() {
            Some(k) => {
                self.slots[k as usize] = bucket;
                BucketId(k)
            }
            None => {
                self.slots.push(bucket);
                BucketId(self.slots.len() as u32 - 1)
            }
        };
        match prev {
            Some(p) => self.get_mut(p).next = Some(id),
            None => self.first = Some(id),
        }
        if let Some(n) = cur {
            self.get_mut(n).prev = Some(id);
        }
        id
    }

    /// Unlink an empty bucket and recycle its slot.
    pub(crate) fn release(&mut self, id: BucketId) {
        let Bucket { prev, next, .. } = *self.get(id);
        debug_assert!(self.get(id).head.is_none());
        match prev {
            Some(p) => self.get_mut(p).next = next,
            None => self.first = next,
        }
        if let Some(n) = next {
            self.get_mut(n).prev = prev;
        }
        self.free.push(id.0);
    }

    /// Ratings of the live buckets in order.
    pub(crate) fn ratings(&self) -> Vec<i32> {
        let mut out = Vec::new();
        let mut cur = self.first;
        while let Some(id) = cur {
            out.push(self.get(id).rating);
            cur = self.get(id).next;
        }
        out
    }
}
