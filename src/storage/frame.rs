//! Frame arena and residency primitives for the buffer pool.
//!
//! The pager owns a single contiguous allocation aligned to `PAGE_SIZE` so
//! that every frame is a legal direct-I/O buffer. Residency bookkeeping is
//! arena-plus-index: the free, unpinned, and pinned lists are intrusive
//! doubly-linked lists over frame indices, and a page's back-pointer to its
//! pager is implicit because only the owning pager touches its frames.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::sync::atomic::{AtomicBool, AtomicU32};

use eyre::{ensure, Result};
use parking_lot::{Mutex, RwLock};

use crate::config::PAGE_SIZE;

/// Null link in the intrusive frame lists.
pub(crate) const NIL: usize = usize::MAX;

/// One contiguous `PAGE_SIZE`-aligned slab holding every frame's payload.
#[derive(Debug)]
pub(crate) struct FrameArena {
    ptr: *mut u8,
    layout: Layout,
    frames: usize,
}

impl FrameArena {
    pub(crate) fn new(frames: usize) -> Result<Self> {
        ensure!(frames > 0, "frame arena requires at least one frame");
        let layout = Layout::from_size_align(frames * PAGE_SIZE, PAGE_SIZE)
            .map_err(|e| eyre::eyre!("invalid frame arena layout: {e}"))?;

        // SAFETY: the layout has a nonzero size and power-of-two alignment.
        let ptr = unsafe { alloc_zeroed(layout) };
        ensure!(
            !ptr.is_null(),
            "failed to allocate {} page frames ({} bytes)",
            frames,
            layout.size()
        );

        Ok(Self { ptr, layout, frames })
    }

    /// Borrows frame `idx` for reading.
    ///
    /// # Safety
    ///
    /// The caller must guarantee no concurrent mutable access to this frame.
    /// The pager enforces this through pinning plus the bucket latch and
    /// update-lock protocols.
    pub(crate) unsafe fn frame(&self, idx: usize) -> &[u8] {
        debug_assert!(idx < self.frames);
        std::slice::from_raw_parts(self.ptr.add(idx * PAGE_SIZE), PAGE_SIZE)
    }

    /// Borrows frame `idx` for writing.
    ///
    /// # Safety
    ///
    /// The caller must guarantee exclusive access to this frame, either by
    /// holding the residency mutex while the frame is unreachable or by
    /// holding the frame's update lock under the bucket write latch.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn frame_mut(&self, idx: usize) -> &mut [u8] {
        debug_assert!(idx < self.frames);
        std::slice::from_raw_parts_mut(self.ptr.add(idx * PAGE_SIZE), PAGE_SIZE)
    }
}

// SAFETY: the arena is a plain byte slab. All aliasing discipline is imposed
// by the pager's pinning and locking protocols, not by the arena itself.
unsafe impl Send for FrameArena {}
unsafe impl Sync for FrameArena {}

impl Drop for FrameArena {
    fn drop(&mut self) {
        // SAFETY: ptr was allocated with exactly this layout in `new`.
        unsafe { dealloc(self.ptr, self.layout) };
    }
}

/// Per-frame state shared outside the residency mutex.
///
/// Pin count and dirty flag follow the lock-free marking style of the page
/// cache; the latch is the per-bucket reader/writer lock and the update lock
/// is what checkpoint quiescence acquires.
#[derive(Debug)]
pub(crate) struct FrameState {
    pub(crate) pin_count: AtomicU32,
    pub(crate) dirty: AtomicBool,
    pub(crate) latch: RwLock<()>,
    pub(crate) update_lock: Mutex<()>,
}

impl FrameState {
    pub(crate) fn new() -> Self {
        Self {
            pin_count: AtomicU32::new(0),
            dirty: AtomicBool::new(false),
            latch: RwLock::new(()),
            update_lock: Mutex::new(()),
        }
    }
}

/// Intrusive list links, guarded by the residency mutex.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FrameLinks {
    pub(crate) page_num: i64,
    pub(crate) prev: usize,
    pub(crate) next: usize,
}

impl FrameLinks {
    pub(crate) fn unbound() -> Self {
        Self {
            page_num: crate::config::NO_PAGE,
            prev: NIL,
            next: NIL,
        }
    }
}

/// A doubly-linked list of frame indices with FIFO discipline: frames enter
/// at the tail and leave from the head unless spliced out explicitly.
#[derive(Debug)]
pub(crate) struct FrameList {
    head: usize,
    tail: usize,
    len: usize,
}

impl FrameList {
    pub(crate) fn new() -> Self {
        Self {
            head: NIL,
            tail: NIL,
            len: 0,
        }
    }

    pub(crate) fn head(&self) -> usize {
        self.head
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn push_tail(&mut self, links: &mut [FrameLinks], idx: usize) {
        links[idx].prev = self.tail;
        links[idx].next = NIL;
        if self.tail != NIL {
            links[self.tail].next = idx;
        } else {
            self.head = idx;
        }
        self.tail = idx;
        self.len += 1;
    }

    pub(crate) fn pop_head(&mut self, links: &mut [FrameLinks]) -> Option<usize> {
        if self.head == NIL {
            return None;
        }
        let idx = self.head;
        self.unlink(links, idx);
        Some(idx)
    }

    pub(crate) fn unlink(&mut self, links: &mut [FrameLinks], idx: usize) {
        let FrameLinks { prev, next, .. } = links[idx];
        if prev != NIL {
            links[prev].next = next;
        } else {
            self.head = next;
        }
        if next != NIL {
            links[next].prev = prev;
        } else {
            self.tail = prev;
        }
        links[idx].prev = NIL;
        links[idx].next = NIL;
        self.len -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_links(n: usize) -> Box<[FrameLinks]> {
        vec![FrameLinks::unbound(); n].into_boxed_slice()
    }

    #[test]
    fn list_is_fifo() {
        let mut links = fresh_links(4);
        let mut list = FrameList::new();
        for idx in 0..4 {
            list.push_tail(&mut links, idx);
        }
        assert_eq!(list.len(), 4);
        assert_eq!(list.pop_head(&mut links), Some(0));
        assert_eq!(list.pop_head(&mut links), Some(1));
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn unlink_from_middle_and_ends() {
        let mut links = fresh_links(3);
        let mut list = FrameList::new();
        for idx in 0..3 {
            list.push_tail(&mut links, idx);
        }

        list.unlink(&mut links, 1);
        assert_eq!(list.len(), 2);
        assert_eq!(list.pop_head(&mut links), Some(0));
        assert_eq!(list.pop_head(&mut links), Some(2));
        assert!(list.is_empty());
        assert_eq!(list.head(), NIL);
    }

    #[test]
    fn unlink_sole_element_clears_both_ends() {
        let mut links = fresh_links(1);
        let mut list = FrameList::new();
        list.push_tail(&mut links, 0);
        list.unlink(&mut links, 0);
        assert!(list.is_empty());
        assert_eq!(list.pop_head(&mut links), None);
    }

    #[test]
    fn arena_frames_are_zeroed_and_disjoint() {
        let arena = FrameArena::new(2).unwrap();
        // SAFETY: single-threaded test with no other frame references.
        unsafe {
            assert!(arena.frame(0).iter().all(|&b| b == 0));
            arena.frame_mut(0)[0] = 0xAB;
            assert_eq!(arena.frame(0)[0], 0xAB);
            assert_eq!(arena.frame(1)[0], 0);
        }
    }
}
