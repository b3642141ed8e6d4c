//! One extendible-hash bucket per page.
//!
//! ## Page Layout
//!
//! ```text
//! Offset  Size  Field        Description
//! ------  ----  -----------  ----------------------------------------
//! 0       8     local_depth  Bits of the hash this bucket claims
//! 8       8     num_keys     Live entries in this bucket
//! 16      8     overflow     Reserved NO_PAGE sentinel (growth is by
//!                            split, never by overflow chaining)
//! 24      ...   entries      BUCKET_CAPACITY fixed (key, value) pairs
//! ```
//!
//! A [`HashBucket`] handle owns a pinned page plus the page's reader or
//! writer latch, so the entries it exposes cannot change underneath it.

use eyre::{bail, ensure, Result};
use parking_lot::{RwLockReadGuard, RwLockWriteGuard};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::config::{BUCKET_CAPACITY, BUCKET_HEADER_SIZE, ENTRY_SIZE, NO_PAGE};
use crate::storage::{parse_zerocopy, parse_zerocopy_mut, PageGuard};

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
struct BucketHeader {
    local_depth: i64,
    num_keys: i64,
    overflow: i64,
}

/// A fixed-width key/value pair as stored in a bucket page.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct HashEntry {
    pub key: i64,
    pub value: i64,
}

const _: () = assert!(std::mem::size_of::<BucketHeader>() == BUCKET_HEADER_SIZE);
const _: () = assert!(std::mem::size_of::<HashEntry>() == ENTRY_SIZE);

enum BucketLatch<'a> {
    Read(#[allow(dead_code)] RwLockReadGuard<'a, ()>),
    Write(#[allow(dead_code)] RwLockWriteGuard<'a, ()>),
}

/// A pinned, latched bucket page.
pub struct HashBucket<'a> {
    page: PageGuard<'a>,
    latch: BucketLatch<'a>,
}

impl<'a> HashBucket<'a> {
    pub(crate) fn read(page: PageGuard<'a>) -> Self {
        let latch = BucketLatch::Read(page.latch().read());
        Self { page, latch }
    }

    pub(crate) fn write(page: PageGuard<'a>) -> Self {
        let latch = BucketLatch::Write(page.latch().write());
        Self { page, latch }
    }

    fn writable(&self) -> bool {
        matches!(self.latch, BucketLatch::Write(_))
    }

    fn header(&self) -> Result<BucketHeader> {
        parse_zerocopy::<BucketHeader>(self.page.data(), "BucketHeader").map(|h| *h)
    }

    fn entries_of(data: &[u8]) -> Result<&[HashEntry]> {
        let region = &data[BUCKET_HEADER_SIZE..BUCKET_HEADER_SIZE + BUCKET_CAPACITY * ENTRY_SIZE];
        <[HashEntry]>::ref_from_bytes(region)
            .map_err(|e| eyre::eyre!("failed to parse bucket entries: {:?}", e))
    }

    fn parts_mut(data: &mut [u8]) -> Result<(&mut BucketHeader, &mut [HashEntry])> {
        let (head, rest) = data.split_at_mut(BUCKET_HEADER_SIZE);
        let header = parse_zerocopy_mut::<BucketHeader>(head, "BucketHeader")?;
        let entries = <[HashEntry]>::mut_from_bytes(&mut rest[..BUCKET_CAPACITY * ENTRY_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse bucket entries: {:?}", e))?;
        Ok((header, entries))
    }

    pub(crate) fn init(&mut self, local_depth: i64) -> Result<()> {
        debug_assert!(self.writable(), "bucket init requires the write latch");
        self.page.update(|data| {
            let (header, _) = Self::parts_mut(data)?;
            header.local_depth = local_depth;
            header.num_keys = 0;
            header.overflow = NO_PAGE;
            Ok(())
        })
    }

    pub fn page_num(&self) -> i64 {
        self.page.page_num()
    }

    pub fn local_depth(&self) -> Result<i64> {
        Ok(self.header()?.local_depth)
    }

    pub fn num_keys(&self) -> Result<i64> {
        Ok(self.header()?.num_keys)
    }

    /// Linear scan for `key`. `None` on a miss.
    pub fn find(&self, key: i64) -> Result<Option<i64>> {
        let n = self.num_keys()? as usize;
        let entries = Self::entries_of(self.page.data())?;
        Ok(entries[..n].iter().find(|e| e.key == key).map(|e| e.value))
    }

    /// Copies out every live entry.
    pub fn select(&self) -> Result<Vec<HashEntry>> {
        let n = self.num_keys()? as usize;
        Ok(Self::entries_of(self.page.data())?[..n].to_vec())
    }

    /// Appends an entry. Returns true when the bucket reached capacity and
    /// must be split before the directory lock is released.
    pub fn insert(&mut self, key: i64, value: i64) -> Result<bool> {
        debug_assert!(self.writable(), "bucket insert requires the write latch");
        let page_num = self.page.page_num();
        self.page.update(|data| {
            let (header, entries) = Self::parts_mut(data)?;
            ensure!(
                header.num_keys < BUCKET_CAPACITY as i64,
                "bucket page {page_num} overflowed its fixed capacity"
            );
            entries[header.num_keys as usize] = HashEntry { key, value };
            header.num_keys += 1;
            Ok(header.num_keys >= BUCKET_CAPACITY as i64)
        })
    }

    /// Replaces the value of the first entry with this key.
    pub fn update(&mut self, key: i64, value: i64) -> Result<()> {
        debug_assert!(self.writable(), "bucket update requires the write latch");
        self.page.update(|data| {
            let (header, entries) = Self::parts_mut(data)?;
            let n = header.num_keys as usize;
            match entries[..n].iter_mut().find(|e| e.key == key) {
                Some(entry) => {
                    entry.value = value;
                    Ok(())
                }
                None => bail!("update: key {key} not found"),
            }
        })
    }

    /// Removes the first entry with this key, compacting the tail down.
    pub fn delete(&mut self, key: i64) -> Result<()> {
        debug_assert!(self.writable(), "bucket delete requires the write latch");
        self.page.update(|data| {
            let (header, entries) = Self::parts_mut(data)?;
            let n = header.num_keys as usize;
            let Some(pos) = entries[..n].iter().position(|e| e.key == key) else {
                bail!("delete: key {key} not found");
            };
            entries.copy_within(pos + 1..n, pos);
            header.num_keys -= 1;
            Ok(())
        })
    }

    /// Replaces the bucket's contents wholesale. Used when a split
    /// repartitions entries.
    pub(crate) fn load(&mut self, new_entries: &[HashEntry]) -> Result<()> {
        debug_assert!(self.writable(), "bucket load requires the write latch");
        ensure!(
            new_entries.len() <= BUCKET_CAPACITY,
            "bucket load of {} entries exceeds capacity {}",
            new_entries.len(),
            BUCKET_CAPACITY
        );
        self.page.update(|data| {
            let (header, entries) = Self::parts_mut(data)?;
            entries[..new_entries.len()].copy_from_slice(new_entries);
            header.num_keys = new_entries.len() as i64;
            Ok(())
        })
    }

    pub(crate) fn set_local_depth(&mut self, depth: i64) -> Result<()> {
        debug_assert!(self.writable(), "depth change requires the write latch");
        self.page.update(|data| {
            let (header, _) = Self::parts_mut(data)?;
            header.local_depth = depth;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Pager;
    use std::sync::Arc;

    fn bucket_on(pager: &Arc<Pager>) -> HashBucket<'_> {
        let page = pager.get_page(pager.free_page_num()).unwrap();
        let mut bucket = HashBucket::write(page);
        bucket.init(2).unwrap();
        bucket
    }

    #[test]
    fn insert_find_update_delete_round_trip() {
        let pager = Arc::new(Pager::in_memory_with_capacity(4).unwrap());
        let mut bucket = bucket_on(&pager);

        assert!(!bucket.insert(10, 100).unwrap());
        assert!(!bucket.insert(20, 200).unwrap());
        assert_eq!(bucket.find(10).unwrap(), Some(100));
        assert_eq!(bucket.find(30).unwrap(), None);

        bucket.update(10, 111).unwrap();
        assert_eq!(bucket.find(10).unwrap(), Some(111));
        assert!(bucket.update(99, 0).is_err());

        bucket.delete(10).unwrap();
        assert_eq!(bucket.find(10).unwrap(), None);
        assert_eq!(bucket.num_keys().unwrap(), 1);
        assert!(bucket.delete(10).is_err());
    }

    #[test]
    fn insert_reports_full_at_capacity() {
        let pager = Arc::new(Pager::in_memory_with_capacity(4).unwrap());
        let mut bucket = bucket_on(&pager);

        for i in 0..BUCKET_CAPACITY as i64 - 1 {
            assert!(!bucket.insert(i, i).unwrap(), "premature split at {i}");
        }
        assert!(bucket.insert(9999, 9999).unwrap());
        assert_eq!(bucket.num_keys().unwrap(), BUCKET_CAPACITY as i64);
    }

    #[test]
    fn delete_compacts_and_preserves_order() {
        let pager = Arc::new(Pager::in_memory_with_capacity(4).unwrap());
        let mut bucket = bucket_on(&pager);

        for i in 0..5 {
            bucket.insert(i, i * 10).unwrap();
        }
        bucket.delete(2).unwrap();

        let keys: Vec<i64> = bucket.select().unwrap().iter().map(|e| e.key).collect();
        assert_eq!(keys, vec![0, 1, 3, 4]);
    }

    #[test]
    fn duplicate_keys_are_permitted() {
        let pager = Arc::new(Pager::in_memory_with_capacity(4).unwrap());
        let mut bucket = bucket_on(&pager);

        bucket.insert(7, 1).unwrap();
        bucket.insert(7, 2).unwrap();
        assert_eq!(bucket.num_keys().unwrap(), 2);
        // Find returns the first match.
        assert_eq!(bucket.find(7).unwrap(), Some(1));
    }
}
