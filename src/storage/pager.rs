//! # Buffer-Pool Pager
//!
//! This module implements a fixed-capacity buffer pool over a direct-I/O
//! aligned database file. It is the only component that performs raw file
//! I/O for data pages; every higher layer reads and writes pages through
//! pinned frame handles.
//!
//! ## Residency
//!
//! Frames are carved from one contiguous `PAGE_SIZE`-aligned arena and move
//! between three intrusive lists plus a page table:
//!
//! ```text
//! ┌──────┐  bound   ┌────────┐  pin count hits 0  ┌──────────┐
//! │ FREE │ ───────► │ PINNED │ ─────────────────► │ UNPINNED │
//! └──────┘          └────────┘ ◄───────────────── └────┬─────┘
//!     ▲                          re-pinned (splice)    │
//!     └────────────────── evicted (flush if dirty) ◄───┘
//! ```
//!
//! A single residency mutex serializes every transition. At all times each
//! frame belongs to exactly one list, every bound frame appears in the page
//! table under its page number, and |free| + |unpinned| + |pinned| equals
//! the pool capacity.
//!
//! ## Eviction
//!
//! FIFO over the unpinned list: the oldest unpinned frame is flushed (if
//! dirty), removed from the page table, and rebound. Memory-backed pagers
//! never evict; they fail with a no-frame-available error once the free
//! list is exhausted.
//!
//! ## Pin/Unpin Protocol
//!
//! `get_page` returns a [`PageGuard`] that holds one pin. Reads go through
//! `data`; mutations go through `update`, which takes the frame's update
//! lock and marks the frame dirty. The guard's drop decrements the pin
//! count and splices the frame onto the unpinned tail when it reaches zero.
//!
//! ## Checkpoint Quiescence
//!
//! [`Pager::lock_all_updates`] acquires the residency mutex and every
//! resident frame's update lock in one sweep and returns an RAII freeze
//! guard. While the guard lives, no page can be mutated, paged in, or paged
//! out, so recovery can flush a consistent image.
//!
//! ## Direct I/O
//!
//! On Linux the data file is opened with `O_DIRECT`; filesystems that
//! reject the flag (tmpfs, some network mounts) fall back to buffered I/O.
//! Frames remain aligned either way.

use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use eyre::{ensure, Result, WrapErr};
use hashbrown::HashMap;
use parking_lot::{Mutex, MutexGuard, RwLock};
use tracing::warn;

use super::frame::{FrameArena, FrameLinks, FrameList, FrameState, NIL};
use crate::config::{NO_PAGE, NUM_PAGES, PAGE_SIZE};

#[derive(Debug)]
struct Residency {
    links: Box<[FrameLinks]>,
    free: FrameList,
    unpinned: FrameList,
    pinned: FrameList,
    page_table: HashMap<i64, usize>,
    max_page_num: i64,
}

/// Fixed-capacity buffer pool over an optional data file.
#[derive(Debug)]
pub struct Pager {
    file: Option<File>,
    path: Option<PathBuf>,
    arena: FrameArena,
    states: Box<[FrameState]>,
    capacity: usize,
    residency: Mutex<Residency>,
}

/// Snapshot of the residency lists, used to audit pool invariants.
#[derive(Debug, Clone, Copy)]
pub struct ResidencyStats {
    pub free: usize,
    pub unpinned: usize,
    pub pinned: usize,
    pub total_pins: u64,
}

impl Pager {
    /// Opens (or creates) a database file with the default pool capacity.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_capacity(path, NUM_PAGES)
    }

    /// Opens (or creates) a database file with an explicit pool capacity.
    pub fn with_capacity(path: impl AsRef<Path>, capacity: usize) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).wrap_err_with(|| {
                    format!("failed to create parent directories for '{}'", path.display())
                })?;
            }
        }

        let file = open_data_file(path)?;
        let len = file
            .metadata()
            .wrap_err_with(|| format!("failed to stat '{}'", path.display()))?
            .len();
        ensure!(
            len % PAGE_SIZE as u64 == 0,
            "open: database file '{}' has been corrupted (length {} is not a multiple of the page size)",
            path.display(),
            len
        );

        Self::build(
            Some(file),
            Some(path.to_path_buf()),
            (len / PAGE_SIZE as u64) as i64,
            capacity,
        )
    }

    /// Creates a pager with no backing file. Pages live only in the pool
    /// and the pool cannot evict, so it holds at most `capacity` pages.
    pub fn in_memory() -> Result<Self> {
        Self::in_memory_with_capacity(NUM_PAGES)
    }

    pub fn in_memory_with_capacity(capacity: usize) -> Result<Self> {
        Self::build(None, None, 0, capacity)
    }

    fn build(
        file: Option<File>,
        path: Option<PathBuf>,
        max_page_num: i64,
        capacity: usize,
    ) -> Result<Self> {
        let arena = FrameArena::new(capacity)?;
        let states: Box<[FrameState]> = (0..capacity).map(|_| FrameState::new()).collect();
        let mut links: Box<[FrameLinks]> =
            vec![FrameLinks::unbound(); capacity].into_boxed_slice();

        let mut free = FrameList::new();
        for idx in 0..capacity {
            free.push_tail(&mut links, idx);
        }

        Ok(Self {
            file,
            path,
            arena,
            states,
            capacity,
            residency: Mutex::new(Residency {
                links,
                free,
                unpinned: FrameList::new(),
                pinned: FrameList::new(),
                page_table: HashMap::with_capacity(capacity),
                max_page_num,
            }),
        })
    }

    pub fn has_file(&self) -> bool {
        self.file.is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of pages this database uses, counting pages not yet flushed.
    pub fn num_pages(&self) -> i64 {
        self.residency.lock().max_page_num
    }

    /// The next unused page number. Fetching it with `get_page` binds it.
    pub fn free_page_num(&self) -> i64 {
        self.num_pages()
    }

    pub(crate) fn state(&self, idx: usize) -> &FrameState {
        &self.states[idx]
    }

    /// Pins page `page_num` and returns a guard for it, paging it in from
    /// disk or binding a fresh page as needed.
    pub fn get_page(&self, page_num: i64) -> Result<PageGuard<'_>> {
        ensure!(page_num >= 0, "invalid page number {page_num}");

        let mut res = self.residency.lock();
        let res = &mut *res;

        if let Some(&idx) = res.page_table.get(&page_num) {
            let state = &self.states[idx];
            if state.pin_count.load(Ordering::Acquire) == 0 {
                res.unpinned.unlink(&mut res.links, idx);
                res.pinned.push_tail(&mut res.links, idx);
            }
            state.pin_count.fetch_add(1, Ordering::AcqRel);
            return Ok(PageGuard {
                pager: self,
                frame: idx,
                page_num,
            });
        }

        let idx = self.acquire_frame(res)?;
        let state = &self.states[idx];
        res.links[idx].page_num = page_num;
        state.pin_count.store(1, Ordering::Release);
        state.dirty.store(false, Ordering::Release);

        // SAFETY: the frame is in no residency list and absent from the
        // page table, so no other thread can reach it while the residency
        // mutex is held.
        let frame = unsafe { self.arena.frame_mut(idx) };
        frame.fill(0);

        if page_num < res.max_page_num {
            if let Err(err) = self.read_from_disk(frame, page_num) {
                res.links[idx].page_num = NO_PAGE;
                state.pin_count.store(0, Ordering::Release);
                res.free.push_tail(&mut res.links, idx);
                return Err(err);
            }
        } else {
            state.dirty.store(true, Ordering::Release);
            res.max_page_num += 1;
        }

        res.pinned.push_tail(&mut res.links, idx);
        res.page_table.insert(page_num, idx);
        Ok(PageGuard {
            pager: self,
            frame: idx,
            page_num,
        })
    }

    /// Hands back an unused frame: free list first, then FIFO eviction
    /// from the unpinned list. The residency mutex must be held.
    fn acquire_frame(&self, res: &mut Residency) -> Result<usize> {
        if let Some(idx) = res.free.pop_head(&mut res.links) {
            return Ok(idx);
        }

        ensure!(
            self.file.is_some(),
            "no frame available: pager is not backed by disk"
        );

        let idx = res
            .unpinned
            .pop_head(&mut res.links)
            .ok_or_else(|| eyre::eyre!("no frame available: every page is pinned"))?;

        if let Err(err) = self.flush_frame(&res.links, idx) {
            res.unpinned.push_tail(&mut res.links, idx);
            return Err(err);
        }

        let victim = res.links[idx].page_num;
        res.page_table.remove(&victim);
        Ok(idx)
    }

    fn read_from_disk(&self, frame: &mut [u8], page_num: i64) -> Result<()> {
        let file = self
            .file
            .as_ref()
            .ok_or_else(|| eyre::eyre!("cannot read page {page_num}: pager has no file"))?;

        let base = page_num as u64 * PAGE_SIZE as u64;
        let mut filled = 0usize;
        while filled < frame.len() {
            match file.read_at(&mut frame[filled..], base + filled as u64) {
                // Short file: the page was bound but never flushed. The
                // remainder of the frame stays zeroed.
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(e)
                        .wrap_err_with(|| format!("failed to read page {page_num} from disk"))
                }
            }
        }
        Ok(())
    }

    /// Writes frame `idx` to its page offset if it is dirty. No-op for
    /// memory-backed pagers. The residency mutex must be held.
    fn flush_frame(&self, links: &[FrameLinks], idx: usize) -> Result<()> {
        let Some(file) = self.file.as_ref() else {
            return Ok(());
        };
        let state = &self.states[idx];
        if !state.dirty.load(Ordering::Acquire) {
            return Ok(());
        }

        let page_num = links[idx].page_num;
        // SAFETY: callers hold the residency mutex, and writers are
        // excluded either because the frame is unpinned (no guards exist)
        // or because the checkpoint freeze holds its update lock.
        let data = unsafe { self.arena.frame(idx) };
        file.write_all_at(data, page_num as u64 * PAGE_SIZE as u64)
            .wrap_err_with(|| format!("failed to write page {page_num} to disk"))?;
        state.dirty.store(false, Ordering::Release);
        Ok(())
    }

    fn flush_all_locked(&self, res: &Residency) -> Result<()> {
        for &idx in res.page_table.values() {
            self.flush_frame(&res.links, idx)?;
        }
        Ok(())
    }

    /// Flushes one resident page if it is dirty.
    pub fn flush_page(&self, page_num: i64) -> Result<()> {
        let res = self.residency.lock();
        if let Some(&idx) = res.page_table.get(&page_num) {
            self.flush_frame(&res.links, idx)?;
        }
        Ok(())
    }

    /// Flushes every dirty resident page.
    pub fn flush_all(&self) -> Result<()> {
        let res = self.residency.lock();
        self.flush_all_locked(&res)
    }

    /// Flushes everything to disk. Pages still pinned are reported but do
    /// not prevent shutdown.
    pub fn close(&self) -> Result<()> {
        let res = self.residency.lock();
        if !res.pinned.is_empty() {
            warn!(pinned = res.pinned.len(), "pages are still pinned on close");
        }
        self.flush_all_locked(&res)
    }

    /// Blocks all page updates, page-ins, and page-outs until the returned
    /// freeze guard is dropped. Used by recovery to quiesce writers around
    /// a checkpoint.
    pub fn lock_all_updates(&self) -> UpdateFreeze<'_> {
        let residency = self.residency.lock();
        let mut updates = Vec::with_capacity(residency.page_table.len());
        for &idx in residency.page_table.values() {
            updates.push(self.states[idx].update_lock.lock());
        }
        UpdateFreeze {
            pager: self,
            residency,
            _updates: updates,
        }
    }

    pub(crate) fn put(&self, idx: usize) {
        let mut res = self.residency.lock();
        let res = &mut *res;
        let state = &self.states[idx];
        let previous = state.pin_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "put on an unpinned page");
        if previous == 1 {
            res.pinned.unlink(&mut res.links, idx);
            res.unpinned.push_tail(&mut res.links, idx);
        }
    }

    /// Whether `page_num` is currently resident in the pool.
    pub fn is_resident(&self, page_num: i64) -> bool {
        self.residency.lock().page_table.contains_key(&page_num)
    }

    pub fn residency_stats(&self) -> ResidencyStats {
        let res = self.residency.lock();
        let mut total_pins = 0u64;
        let mut cursor = res.pinned.head();
        while cursor != NIL {
            total_pins += self.states[cursor].pin_count.load(Ordering::Acquire) as u64;
            cursor = res.links[cursor].next;
        }
        ResidencyStats {
            free: res.free.len(),
            unpinned: res.unpinned.len(),
            pinned: res.pinned.len(),
            total_pins,
        }
    }
}

fn open_data_file(path: &Path) -> Result<File> {
    #[cfg(target_os = "linux")]
    {
        use std::os::unix::fs::OpenOptionsExt;
        let mut opts = OpenOptions::new();
        opts.read(true)
            .write(true)
            .create(true)
            .custom_flags(libc::O_DIRECT);
        if let Ok(file) = opts.open(path) {
            return Ok(file);
        }
        // Fall through: the filesystem rejected O_DIRECT (tmpfs and some
        // network mounts); buffered I/O preserves correctness.
    }

    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(path)
        .wrap_err_with(|| format!("failed to open database file '{}'", path.display()))
}

/// Pinned handle to one resident page. Dropping the guard releases the pin
/// and, at pin count zero, moves the frame to the unpinned tail.
#[derive(Debug)]
pub struct PageGuard<'a> {
    pager: &'a Pager,
    frame: usize,
    page_num: i64,
}

impl<'a> PageGuard<'a> {
    pub fn page_num(&self) -> i64 {
        self.page_num
    }

    pub fn data(&self) -> &[u8] {
        // SAFETY: the pin held by this guard keeps the frame bound to this
        // page number, and all mutation goes through `update`, whose
        // callers exclude concurrent readers with the bucket latch.
        unsafe { self.pager.arena.frame(self.frame) }
    }

    /// Mutates the page under its update lock and marks it dirty.
    pub fn update<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let state = self.pager.state(self.frame);
        let _quiesced = state.update_lock.lock();
        state.dirty.store(true, Ordering::Release);
        // SAFETY: the pin keeps the frame bound, the update lock excludes
        // checkpoint flushes, and the caller's write latch on this bucket
        // excludes every other reader and writer of the page.
        f(unsafe { self.pager.arena.frame_mut(self.frame) })
    }

    /// The reader/writer latch attached to this page's frame. The hash
    /// layer uses it as the per-bucket lock.
    pub fn latch(&self) -> &'a RwLock<()> {
        let pager = self.pager;
        &pager.state(self.frame).latch
    }
}

impl Drop for PageGuard<'_> {
    fn drop(&mut self) {
        self.pager.put(self.frame);
    }
}

/// RAII checkpoint freeze: holds the residency mutex and every resident
/// page's update lock.
pub struct UpdateFreeze<'a> {
    pager: &'a Pager,
    residency: MutexGuard<'a, Residency>,
    _updates: Vec<parking_lot::MutexGuard<'a, ()>>,
}

impl UpdateFreeze<'_> {
    /// Flushes every dirty resident page while the freeze is held.
    pub fn flush_all(&mut self) -> Result<()> {
        self.pager.flush_all_locked(&self.residency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn stats_sum(pager: &Pager) -> usize {
        let s = pager.residency_stats();
        s.free + s.unpinned + s.pinned
    }

    #[test]
    fn rejects_negative_page_numbers() {
        let pager = Pager::in_memory_with_capacity(2).unwrap();
        let err = pager.get_page(-1).unwrap_err();
        assert!(err.to_string().contains("invalid page number"));
    }

    #[test]
    fn rejects_unaligned_file_as_corrupted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("torn.hsh");
        std::fs::write(&path, vec![0u8; 100]).unwrap();

        let err = Pager::open(&path).unwrap_err();
        assert!(err.to_string().contains("corrupted"));
    }

    #[test]
    fn fifo_eviction_drops_oldest_unpinned() {
        let dir = tempdir().unwrap();
        let pager = Pager::with_capacity(dir.path().join("evict.hsh"), 3).unwrap();

        for n in 0..3 {
            let page = pager.get_page(n).unwrap();
            drop(page);
        }
        assert!(pager.is_resident(0));

        let page = pager.get_page(3).unwrap();
        assert_eq!(page.page_num(), 3);
        drop(page);

        // Page 0 was the oldest unpinned frame, so it went first.
        assert!(!pager.is_resident(0));
        assert!(pager.is_resident(1));
        assert!(pager.is_resident(2));
        assert!(pager.is_resident(3));
    }

    #[test]
    fn residency_counts_always_sum_to_capacity() {
        let dir = tempdir().unwrap();
        let pager = Pager::with_capacity(dir.path().join("counts.hsh"), 4).unwrap();
        assert_eq!(stats_sum(&pager), 4);

        let a = pager.get_page(0).unwrap();
        let b = pager.get_page(1).unwrap();
        let a2 = pager.get_page(0).unwrap();
        let s = pager.residency_stats();
        assert_eq!(s.pinned, 2);
        assert_eq!(s.total_pins, 3);
        assert_eq!(stats_sum(&pager), 4);

        drop(a2);
        drop(a);
        drop(b);
        let s = pager.residency_stats();
        assert_eq!(s.pinned, 0);
        assert_eq!(s.unpinned, 2);
        assert_eq!(s.total_pins, 0);
        assert_eq!(stats_sum(&pager), 4);
    }

    #[test]
    fn memory_pager_fails_once_frames_run_out() {
        let pager = Pager::in_memory_with_capacity(2).unwrap();
        let _a = pager.get_page(0).unwrap();
        let _b = pager.get_page(1).unwrap();

        let err = pager.get_page(2).unwrap_err();
        assert!(err.to_string().contains("not backed by disk"));
    }

    #[test]
    fn eviction_persists_dirty_pages() {
        let dir = tempdir().unwrap();
        let pager = Pager::with_capacity(dir.path().join("persist.hsh"), 2).unwrap();

        {
            let page = pager.get_page(0).unwrap();
            page.update(|data| data[7] = 0x5A);
        }

        // Force page 0 out of the pool.
        for n in 1..3 {
            drop(pager.get_page(n).unwrap());
        }
        assert!(!pager.is_resident(0));

        let page = pager.get_page(0).unwrap();
        assert_eq!(page.data()[7], 0x5A);
    }

    #[test]
    fn close_flushes_and_reopen_sees_data() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("reopen.hsh");

        {
            let pager = Pager::with_capacity(&path, 2).unwrap();
            let page = pager.get_page(0).unwrap();
            page.update(|data| data[..4].copy_from_slice(b"brrw"));
            drop(page);
            pager.close().unwrap();
        }

        let pager = Pager::with_capacity(&path, 2).unwrap();
        assert_eq!(pager.num_pages(), 1);
        let page = pager.get_page(0).unwrap();
        assert_eq!(&page.data()[..4], b"brrw");
    }

    #[test]
    fn new_pages_extend_the_page_count() {
        let dir = tempdir().unwrap();
        let pager = Pager::with_capacity(dir.path().join("grow.hsh"), 4).unwrap();
        assert_eq!(pager.num_pages(), 0);
        assert_eq!(pager.free_page_num(), 0);

        drop(pager.get_page(0).unwrap());
        drop(pager.get_page(1).unwrap());
        assert_eq!(pager.num_pages(), 2);
        assert_eq!(pager.free_page_num(), 2);
    }

    #[test]
    fn update_freeze_flushes_while_held() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("freeze.hsh");
        let pager = Pager::with_capacity(&path, 2).unwrap();

        {
            let page = pager.get_page(0).unwrap();
            page.update(|data| data[0] = 9);
        }

        let mut freeze = pager.lock_all_updates();
        freeze.flush_all().unwrap();
        drop(freeze);

        let len = std::fs::metadata(&path).unwrap().len();
        assert_eq!(len, PAGE_SIZE as u64);
    }
}
