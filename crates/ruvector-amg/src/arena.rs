//! Dual-direction bump arena with nested mark/release scopes.
//!
//! [`Arena`] hands out scratch memory from one fixed buffer. Two regions grow
//! toward each other: [`Region::Top`] from the start of the buffer upward and
//! [`Region::Bottom`] from the end downward. Each region keeps its own stack
//! of up to [`MAX_MARK_DEPTH`] checkpoints; releasing a checkpoint frees
//! everything allocated in that region since the matching mark in O(1).
//!
//! The coarsening pass keeps its node table in a Top scope for the lifetime
//! of one level, while the parent-candidate generator opens a short Bottom
//! scope per unknown for its dense local systems. Neither side ever frees an
//! individual allocation.
//!
//! # Scopes
//!
//! Allocation is only possible through an [`ArenaScope`], the RAII form of a
//! mark: the scope marks its region on creation and releases it on drop.
//! Slices borrow the scope, so the borrow checker rejects any slice that
//! would outlive its release. Allocating through a scope that is not the
//! innermost open scope of its region is refused, because the inner release
//! would otherwise reclaim memory the outer scope still hands out.
//!
//! ```
//! use ruvector_amg::arena::{Arena, Region};
//!
//! let arena = Arena::with_capacity(4096);
//! {
//!     let scope = arena.scope(Region::Bottom).unwrap();
//!     let gram: &mut [f64] = scope.alloc_slice(9).unwrap();
//!     gram[4] = 1.0;
//!     assert!(arena.used(Region::Bottom) >= 72);
//! }
//! assert_eq!(arena.used(Region::Bottom), 0);
//! ```
//!
//! Memory goes back to the arena only when a scope ends. There is no public
//! way to rewind a region under a live slice:
//!
//! ```compile_fail
//! use ruvector_amg::arena::{Arena, Region};
//!
//! let arena = Arena::with_capacity(256);
//! let scope = arena.scope(Region::Top).unwrap();
//! let a: &mut [u64] = scope.alloc_slice(4).unwrap();
//! arena.release(scope.mark()).unwrap();
//! a.fill(1);
//! ```

use std::alloc::{alloc, dealloc, Layout};
use std::cell::RefCell;
use std::fmt;
use std::ptr::NonNull;

use serde::{Deserialize, Serialize};

use crate::error::{AmgError, Result};

/// Maximum nesting depth of marks per region.
pub const MAX_MARK_DEPTH: usize = 8;

/// Alignment of the backing buffer and the largest supported element
/// alignment.
const MAX_ALIGN: usize = 16;

/// Growth direction of an allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Region {
    /// Grows upward from the start of the buffer. Holds long-lived,
    /// per-level data.
    Top,
    /// Grows downward from the end of the buffer. Holds short-lived,
    /// per-node scratch.
    Bottom,
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Region::Top => write!(f, "top"),
            Region::Bottom => write!(f, "bottom"),
        }
    }
}

/// Checkpoint pushed by `Arena::mark`.
///
/// Marks never leave the crate: the only public way to release one is to end
/// the [`ArenaScope`] holding it, after every slice borrowing the scope is
/// gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MarkId {
    region: Region,
    depth: usize,
    serial: u64,
}

impl MarkId {
    /// Region this mark belongs to.
    pub(crate) fn region(&self) -> Region {
        self.region
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Checkpoint {
    position: usize,
    serial: u64,
}

#[derive(Debug)]
struct MarkStack {
    entries: [Checkpoint; MAX_MARK_DEPTH],
    len: usize,
}

impl MarkStack {
    fn new() -> Self {
        Self {
            entries: [Checkpoint::default(); MAX_MARK_DEPTH],
            len: 0,
        }
    }

    fn innermost(&self) -> Option<&Checkpoint> {
        self.len.checked_sub(1).map(|i| &self.entries[i])
    }
}

#[derive(Debug)]
struct Cursor {
    /// First free byte of the top region.
    top: usize,
    /// First byte owned by the bottom region.
    bottom: usize,
    top_marks: MarkStack,
    bottom_marks: MarkStack,
    next_serial: u64,
    peak: usize,
}

impl Cursor {
    fn marks(&self, region: Region) -> &MarkStack {
        match region {
            Region::Top => &self.top_marks,
            Region::Bottom => &self.bottom_marks,
        }
    }

    fn marks_mut(&mut self, region: Region) -> &mut MarkStack {
        match region {
            Region::Top => &mut self.top_marks,
            Region::Bottom => &mut self.bottom_marks,
        }
    }
}

/// Fixed-capacity, dual-direction bump allocator.
///
/// Interior mutability lets a shared `&Arena` serve both the coarsening
/// graph (Top) and the candidate generator (Bottom) at the same time.
pub struct Arena {
    base: NonNull<u8>,
    layout: Layout,
    capacity: usize,
    cursor: RefCell<Cursor>,
}

impl Arena {
    /// Create an arena with at least `capacity` bytes.
    ///
    /// The capacity is rounded up to a multiple of 16 bytes. The buffer is
    /// allocated once and never grows: exhausting it is an error, not a
    /// reallocation, so every slice handed out stays at a fixed address.
    ///
    /// # Panics
    ///
    /// Panics if the global allocator fails.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(MAX_ALIGN).div_ceil(MAX_ALIGN) * MAX_ALIGN;
        let layout = Layout::from_size_align(capacity, MAX_ALIGN)
            .unwrap_or_else(|_| panic!("arena capacity {capacity} overflows a layout"));
        // SAFETY: `layout` has non-zero size (at least MAX_ALIGN bytes).
        let raw = unsafe { alloc(layout) };
        let base = NonNull::new(raw)
            .unwrap_or_else(|| std::alloc::handle_alloc_error(layout));

        Self {
            base,
            layout,
            capacity,
            cursor: RefCell::new(Cursor {
                top: 0,
                bottom: capacity,
                top_marks: MarkStack::new(),
                bottom_marks: MarkStack::new(),
                next_serial: 0,
                peak: 0,
            }),
        }
    }

    /// Total capacity of the backing buffer in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently allocated in `region`.
    pub fn used(&self, region: Region) -> usize {
        let cur = self.cursor.borrow();
        match region {
            Region::Top => cur.top,
            Region::Bottom => self.capacity - cur.bottom,
        }
    }

    /// Bytes still free between the two regions.
    pub fn available(&self) -> usize {
        let cur = self.cursor.borrow();
        cur.bottom - cur.top
    }

    /// Largest combined footprint of both regions seen so far.
    pub fn peak(&self) -> usize {
        self.cursor.borrow().peak
    }

    /// Number of open marks in `region`.
    pub fn depth(&self, region: Region) -> usize {
        self.cursor.borrow().marks(region).len
    }

    /// Push a checkpoint onto `region`'s mark stack.
    ///
    /// # Errors
    ///
    /// [`AmgError::MarkStackOverflow`] if [`MAX_MARK_DEPTH`] marks are
    /// already open in that region.
    pub(crate) fn mark(&self, region: Region) -> Result<MarkId> {
        let mut cur = self.cursor.borrow_mut();
        let position = match region {
            Region::Top => cur.top,
            Region::Bottom => cur.bottom,
        };
        let serial = cur.next_serial;
        let stack = cur.marks_mut(region);
        if stack.len == MAX_MARK_DEPTH {
            return Err(AmgError::MarkStackOverflow {
                region,
                limit: MAX_MARK_DEPTH,
            });
        }
        let depth = stack.len;
        stack.entries[depth] = Checkpoint { position, serial };
        stack.len += 1;
        cur.next_serial += 1;
        Ok(MarkId {
            region,
            depth,
            serial,
        })
    }

    /// Pop `mark`, freeing everything its region allocated since.
    ///
    /// # Errors
    ///
    /// [`AmgError::MarkMismatch`] unless `mark` is the innermost open mark of
    /// its region. A rejected release changes nothing.
    pub(crate) fn release(&self, mark: MarkId) -> Result<()> {
        let mut cur = self.cursor.borrow_mut();
        let stack = cur.marks_mut(mark.region);
        let open = stack.len;
        let matches = stack
            .innermost()
            .map_or(false, |cp| cp.serial == mark.serial && open == mark.depth + 1);
        if !matches {
            return Err(AmgError::MarkMismatch {
                region: mark.region,
                depth: mark.depth,
                open,
            });
        }
        let position = stack.entries[mark.depth].position;
        stack.len -= 1;
        match mark.region {
            Region::Top => cur.top = position,
            Region::Bottom => cur.bottom = position,
        }
        Ok(())
    }

    /// Open an RAII scope on `region`.
    ///
    /// # Errors
    ///
    /// [`AmgError::MarkStackOverflow`] if [`MAX_MARK_DEPTH`] scopes are
    /// already open in that region.
    pub fn scope(&self, region: Region) -> Result<ArenaScope<'_>> {
        let mark = self.mark(region)?;
        Ok(ArenaScope {
            arena: self,
            mark,
            released: false,
        })
    }

    /// Bump-allocate `bytes` bytes aligned to `align` from `region`.
    fn get_mem(&self, bytes: usize, align: usize, region: Region) -> Result<NonNull<u8>> {
        debug_assert!(align.is_power_of_two() && align <= MAX_ALIGN);
        let mut cur = self.cursor.borrow_mut();
        let available = cur.bottom - cur.top;
        let exhausted = |requested| AmgError::ArenaExhausted {
            region,
            requested,
            available,
        };

        let offset = match region {
            Region::Top => {
                let start = (cur.top + align - 1) & !(align - 1);
                let end = start.checked_add(bytes).ok_or_else(|| exhausted(bytes))?;
                if end > cur.bottom {
                    return Err(exhausted(end - cur.top));
                }
                cur.top = end;
                start
            }
            Region::Bottom => {
                let start = cur
                    .bottom
                    .checked_sub(bytes)
                    .map(|s| s & !(align - 1))
                    .filter(|&s| s >= cur.top)
                    .ok_or_else(|| exhausted(bytes))?;
                cur.bottom = start;
                start
            }
        };
        cur.peak = cur.peak.max(cur.top + (self.capacity - cur.bottom));

        // SAFETY: `offset + bytes <= capacity`, so the pointer stays inside
        // (or one past the end of) the allocation behind `base`.
        Ok(unsafe { NonNull::new_unchecked(self.base.as_ptr().add(offset)) })
    }

    fn is_innermost(&self, mark: MarkId) -> bool {
        let cur = self.cursor.borrow();
        let stack = cur.marks(mark.region);
        stack.len == mark.depth + 1
            && stack.innermost().map_or(false, |cp| cp.serial == mark.serial)
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        // SAFETY: `base` was returned by `alloc(self.layout)` in
        // `with_capacity` and is freed exactly once here.
        unsafe { dealloc(self.base.as_ptr(), self.layout) }
    }
}

impl fmt::Debug for Arena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cur = self.cursor.borrow();
        f.debug_struct("Arena")
            .field("capacity", &self.capacity)
            .field("top", &cur.top)
            .field("bottom", &cur.bottom)
            .field("top_depth", &cur.top_marks.len)
            .field("bottom_depth", &cur.bottom_marks.len)
            .finish()
    }
}

// SAFETY: `Arena` exclusively owns its buffer; moving it to another thread
// moves that ownership. It is not `Sync` because the cursor lives in a
// `RefCell`, and scopes borrow the arena so none can cross threads with it.
unsafe impl Send for Arena {}

// ---------------------------------------------------------------------------
// ArenaScope
// ---------------------------------------------------------------------------

/// RAII mark on one arena region.
///
/// Dropping the scope releases the mark. Scopes of the same region must be
/// dropped innermost first; an out-of-order drop is logged and leaves the
/// mark open (nothing is freed), which is safe but leaks until the arena is
/// dropped. Use [`release`](Self::release) to observe the error instead.
pub struct ArenaScope<'a> {
    arena: &'a Arena,
    mark: MarkId,
    released: bool,
}

impl<'a> ArenaScope<'a> {
    /// Region this scope allocates from.
    pub fn region(&self) -> Region {
        self.mark.region()
    }

    /// Nesting depth of this scope inside its region, zero-based.
    pub fn depth(&self) -> usize {
        self.mark.depth
    }

    /// The arena behind this scope.
    pub fn arena(&self) -> &'a Arena {
        self.arena
    }

    /// Allocate `len` default-initialised values of `T`.
    ///
    /// `T: Copy` guarantees there are no destructors to run when the scope
    /// is released.
    ///
    /// # Errors
    ///
    /// - [`AmgError::MarkMismatch`] if a nested scope of the same region is
    ///   still open.
    /// - [`AmgError::ArenaExhausted`] if the regions would overlap.
    ///
    /// # Panics
    ///
    /// Panics if `T` requires an alignment above 16 bytes.
    #[allow(clippy::mut_from_ref)]
    pub fn alloc_slice<T: Copy + Default>(&self, len: usize) -> Result<&mut [T]> {
        let size = std::mem::size_of::<T>();
        let align = std::mem::align_of::<T>();
        assert!(align <= MAX_ALIGN, "Arena does not support alignment > {MAX_ALIGN}");

        if !self.arena.is_innermost(self.mark) {
            return Err(AmgError::MarkMismatch {
                region: self.mark.region,
                depth: self.mark.depth,
                open: self.arena.depth(self.mark.region),
            });
        }
        if size == 0 || len == 0 {
            // SAFETY: a dangling, well-aligned pointer is valid for an empty
            // slice and for zero-sized element types.
            return Ok(unsafe { std::slice::from_raw_parts_mut(NonNull::<T>::dangling().as_ptr(), len) });
        }

        let bytes = size.checked_mul(len).ok_or(AmgError::ArenaExhausted {
            region: self.mark.region,
            requested: usize::MAX,
            available: self.arena.available(),
        })?;
        let ptr = self.arena.get_mem(bytes, align, self.mark.region)?.as_ptr() as *mut T;

        // SAFETY:
        // 1. `get_mem` returned `bytes` fresh bytes aligned for `T` that no
        //    other live slice covers: regions never overlap and released
        //    memory is only reused after every slice borrowing the releasing
        //    scope has ended.
        // 2. Every element is initialised with `T::default()` before the
        //    slice is formed.
        // 3. The slice borrows `self`, so it cannot outlive the release.
        unsafe {
            for k in 0..len {
                ptr.add(k).write(T::default());
            }
            Ok(std::slice::from_raw_parts_mut(ptr, len))
        }
    }

    /// Release the scope explicitly, reporting an out-of-order release.
    ///
    /// # Errors
    ///
    /// [`AmgError::MarkMismatch`] if a nested scope of the same region is
    /// still open; the mark then stays open.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.arena.release(self.mark)
    }
}

impl Drop for ArenaScope<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(err) = self.arena.release(self.mark) {
            tracing::error!(%err, "arena scope dropped out of order");
        }
    }
}

impl fmt::Debug for ArenaScope<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArenaScope").field("mark", &self.mark).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regions_grow_toward_each_other() {
        let arena = Arena::with_capacity(1024);
        let top = arena.scope(Region::Top).unwrap();
        let bottom = arena.scope(Region::Bottom).unwrap();

        let a: &mut [f64] = top.alloc_slice(10).unwrap();
        let b: &mut [f64] = bottom.alloc_slice(10).unwrap();
        a.fill(1.0);
        b.fill(2.0);

        assert_eq!(arena.used(Region::Top), 80);
        assert_eq!(arena.used(Region::Bottom), 80);
        assert_eq!(arena.available(), 1024 - 160);
        assert!(a.iter().all(|&v| v == 1.0));
        assert!(b.iter().all(|&v| v == 2.0));
    }

    #[test]
    fn overlap_is_exhaustion() {
        let arena = Arena::with_capacity(256);
        let top = arena.scope(Region::Top).unwrap();
        let bottom = arena.scope(Region::Bottom).unwrap();
        let _a: &mut [u64] = top.alloc_slice(20).unwrap();
        let err = bottom.alloc_slice::<u64>(20).unwrap_err();
        assert!(matches!(err, AmgError::ArenaExhausted { region: Region::Bottom, .. }));
    }

    #[test]
    fn release_restores_position() {
        let arena = Arena::with_capacity(4096);
        let outer = arena.scope(Region::Top).unwrap();
        let _x: &mut [u32] = outer.alloc_slice(3).unwrap();
        let before = arena.used(Region::Top);
        {
            let inner = arena.scope(Region::Top).unwrap();
            let _y: &mut [f64] = inner.alloc_slice(17).unwrap();
            assert!(arena.used(Region::Top) > before);
        }
        assert_eq!(arena.used(Region::Top), before);
    }

    #[test]
    fn mark_depth_is_bounded() {
        let arena = Arena::with_capacity(64);
        let marks: Vec<_> = (0..MAX_MARK_DEPTH)
            .map(|_| arena.mark(Region::Bottom).unwrap())
            .collect();
        assert!(matches!(
            arena.mark(Region::Bottom),
            Err(AmgError::MarkStackOverflow { .. })
        ));
        // The other region has its own stack.
        assert!(arena.mark(Region::Top).is_ok());
        for m in marks.into_iter().rev() {
            arena.release(m).unwrap();
        }
    }

    #[test]
    fn out_of_order_release_is_rejected() {
        let arena = Arena::with_capacity(64);
        let a = arena.mark(Region::Top).unwrap();
        let b = arena.mark(Region::Top).unwrap();
        assert!(matches!(arena.release(a), Err(AmgError::MarkMismatch { .. })));
        arena.release(b).unwrap();
        arena.release(a).unwrap();
        assert!(arena.release(a).is_err());
    }

    #[test]
    fn outer_scope_cannot_allocate_under_inner() {
        let arena = Arena::with_capacity(512);
        let outer = arena.scope(Region::Bottom).unwrap();
        let inner = arena.scope(Region::Bottom).unwrap();
        assert!(outer.alloc_slice::<f64>(4).is_err());
        let _ok: &mut [f64] = inner.alloc_slice(4).unwrap();
        drop(inner);
        assert!(outer.alloc_slice::<f64>(4).is_ok());
    }

    #[test]
    fn nested_scope_never_reuses_live_memory() {
        let arena = Arena::with_capacity(1024);
        let outer = arena.scope(Region::Top).unwrap();
        let a: &mut [u64] = outer.alloc_slice(4).unwrap();
        a.fill(1);
        let a_range = a.as_ptr_range();
        {
            let inner = arena.scope(Region::Top).unwrap();
            assert_eq!(inner.depth(), 1);
            let b: &mut [u64] = inner.alloc_slice(4).unwrap();
            b.fill(2);
            assert!(!a_range.contains(&b.as_ptr()));
            assert!(b.as_ptr() >= a_range.end);
        }
        assert_eq!(a, &[1, 1, 1, 1]);
    }

    #[test]
    fn slices_are_default_initialised() {
        let arena = Arena::with_capacity(256);
        {
            let s = arena.scope(Region::Top).unwrap();
            let v: &mut [i64] = s.alloc_slice(8).unwrap();
            v.fill(-7);
        }
        let s = arena.scope(Region::Top).unwrap();
        let v: &mut [i64] = s.alloc_slice(8).unwrap();
        assert!(v.iter().all(|&x| x == 0));
    }
}
