//! # Extendible Hash Table
//!
//! An on-disk extendible hash index: an in-memory directory of `2^D` bucket
//! page numbers over bucket pages managed by the pager. Buckets carry a
//! local depth `d <= D`; when `d < D`, several directory slots alias the
//! same bucket page.
//!
//! ## Growth
//!
//! Buckets grow by splitting, never by overflow chaining, and the directory
//! grows by doubling:
//!
//! ```text
//! insert ──► bucket full?
//!               │ yes
//!               ▼
//!         local == global? ──► double the directory (D += 1)
//!               │
//!               ▼
//!         bump local depth, allocate a sibling bucket,
//!         repartition entries by hash(key, d+1),
//!         redirect every slot congruent to oldHash + 2^d
//!               │
//!               ▼
//!         either half still full? ──► split again (bounded by
//!                                     MAX_GLOBAL_DEPTH)
//! ```
//!
//! Delete never coalesces buckets and the directory never shrinks; index
//! size is monotonically non-decreasing by design trade-off for simpler
//! locking and recovery.
//!
//! ## Concurrency
//!
//! A table-level `RwLock` guards the directory; each bucket page carries
//! its own reader/writer latch. Lock coupling on insert: the directory
//! write lock is released as soon as the target bucket is proven unable to
//! split (at least one free slot beyond the incoming entry); otherwise it
//! is held through the recursive split. Latches are always acquired
//! directory-then-bucket, never the reverse.

use std::sync::Arc;

use eyre::{ensure, Result};
use parking_lot::RwLock;

use super::bucket::{HashBucket, HashEntry};
use super::hasher::slot_hash;
use crate::config::{BUCKET_CAPACITY, INITIAL_GLOBAL_DEPTH, MAX_GLOBAL_DEPTH};
use crate::storage::Pager;

#[derive(Debug)]
struct Directory {
    global_depth: i64,
    buckets: Vec<i64>,
}

impl Directory {
    fn extend(&mut self) {
        self.global_depth += 1;
        let doubled = self.buckets.clone();
        self.buckets.extend(doubled);
    }

    fn slot_count(&self) -> i64 {
        self.buckets.len() as i64
    }
}

/// Extendible hash index over one pager's bucket pages.
#[derive(Debug)]
pub struct HashTable {
    pager: Arc<Pager>,
    directory: RwLock<Directory>,
}

impl HashTable {
    /// Creates a fresh table: global depth 2 over four empty depth-2
    /// buckets.
    pub fn new(pager: Arc<Pager>) -> Result<Self> {
        let table = Self {
            pager,
            directory: RwLock::new(Directory {
                global_depth: INITIAL_GLOBAL_DEPTH,
                buckets: Vec::new(),
            }),
        };

        let mut buckets = Vec::with_capacity(1 << INITIAL_GLOBAL_DEPTH);
        for _ in 0..(1i64 << INITIAL_GLOBAL_DEPTH) {
            let bucket = table.alloc_bucket(INITIAL_GLOBAL_DEPTH)?;
            buckets.push(bucket.page_num());
        }
        table.directory.write().buckets = buckets;
        Ok(table)
    }

    /// Rebuilds a table from a persisted directory.
    pub fn from_parts(pager: Arc<Pager>, global_depth: i64, buckets: Vec<i64>) -> Result<Self> {
        ensure!(
            (0..=MAX_GLOBAL_DEPTH).contains(&global_depth),
            "directory depth {global_depth} out of range"
        );
        ensure!(
            buckets.len() as u128 == 1u128 << global_depth,
            "directory has {} slots but depth {} requires {}",
            buckets.len(),
            global_depth,
            1u128 << global_depth
        );
        Ok(Self {
            pager,
            directory: RwLock::new(Directory {
                global_depth,
                buckets,
            }),
        })
    }

    pub fn pager(&self) -> &Arc<Pager> {
        &self.pager
    }

    pub fn global_depth(&self) -> i64 {
        self.directory.read().global_depth
    }

    /// A point-in-time copy of the directory's bucket page numbers.
    pub fn directory_snapshot(&self) -> Vec<i64> {
        self.directory.read().buckets.clone()
    }

    pub(crate) fn directory_parts(&self) -> (i64, Vec<i64>) {
        let dir = self.directory.read();
        (dir.global_depth, dir.buckets.clone())
    }

    /// Doubles the directory without splitting any bucket. The join uses
    /// this to align two tables' global depths.
    pub fn extend(&self) -> Result<()> {
        let mut dir = self.directory.write();
        ensure!(
            dir.global_depth < MAX_GLOBAL_DEPTH,
            "hash directory overflow: global depth {} cannot grow past {}",
            dir.global_depth,
            MAX_GLOBAL_DEPTH
        );
        dir.extend();
        Ok(())
    }

    /// Pins and read-latches the bucket page `page_num`.
    pub fn read_bucket(&self, page_num: i64) -> Result<HashBucket<'_>> {
        Ok(HashBucket::read(self.pager.get_page(page_num)?))
    }

    fn write_bucket(&self, page_num: i64) -> Result<HashBucket<'_>> {
        Ok(HashBucket::write(self.pager.get_page(page_num)?))
    }

    /// Allocates and initializes a fresh bucket page. Callers hold the
    /// directory write lock (or are constructing the table), so the page
    /// number assignment cannot race.
    fn alloc_bucket(&self, local_depth: i64) -> Result<HashBucket<'_>> {
        let page = self.pager.get_page(self.pager.free_page_num())?;
        let mut bucket = HashBucket::write(page);
        bucket.init(local_depth)?;
        Ok(bucket)
    }

    /// Looks up `key`. `Ok(None)` on a miss.
    pub fn find(&self, key: i64) -> Result<Option<i64>> {
        let dir = self.directory.read();
        let slot = slot_hash(key, dir.global_depth);
        let page_num = dir.buckets[slot as usize];
        let bucket = self.read_bucket(page_num)?;
        drop(dir);
        bucket.find(key)
    }

    /// Inserts a key/value pair, splitting the target bucket (and doubling
    /// the directory) as needed. Duplicate keys are permitted here;
    /// uniqueness is a Database-level concern.
    pub fn insert(&self, key: i64, value: i64) -> Result<()> {
        let mut dir = self.directory.write();
        let slot = slot_hash(key, dir.global_depth);
        let page_num = dir.buckets[slot as usize];
        let mut bucket = self.write_bucket(page_num)?;

        // Lock coupling: a bucket with a free slot beyond this entry cannot
        // split, so the directory lock can go early.
        if bucket.num_keys()? < BUCKET_CAPACITY as i64 - 1 {
            drop(dir);
            bucket.insert(key, value)?;
            return Ok(());
        }

        let full = bucket.insert(key, value)?;
        if full {
            self.split(&mut dir, &mut bucket, slot)?;
        }
        Ok(())
    }

    fn split(&self, dir: &mut Directory, bucket: &mut HashBucket<'_>, hash: i64) -> Result<()> {
        let local_depth = bucket.local_depth()?;
        ensure!(
            local_depth < MAX_GLOBAL_DEPTH,
            "hash directory overflow: bucket depth {} cannot grow past {}",
            local_depth,
            MAX_GLOBAL_DEPTH
        );
        let old_hash = hash % (1i64 << local_depth);
        let new_hash = old_hash + (1i64 << local_depth);

        if local_depth == dir.global_depth {
            ensure!(
                dir.global_depth < MAX_GLOBAL_DEPTH,
                "hash directory overflow: global depth {} cannot grow past {}",
                dir.global_depth,
                MAX_GLOBAL_DEPTH
            );
            dir.extend();
        }

        bucket.set_local_depth(local_depth + 1)?;
        let mut new_bucket = self.alloc_bucket(local_depth + 1)?;

        let mut kept = Vec::new();
        let mut moved = Vec::new();
        for entry in bucket.select()? {
            if slot_hash(entry.key, local_depth + 1) == new_hash {
                moved.push(entry);
            } else {
                kept.push(entry);
            }
        }
        bucket.load(&kept)?;
        new_bucket.load(&moved)?;

        // Redirect every slot congruent to the new hash at the split depth.
        let step = 1i64 << (local_depth + 1);
        let mut slot = new_hash;
        while slot < dir.slot_count() {
            dir.buckets[slot as usize] = new_bucket.page_num();
            slot += step;
        }

        // Pathological keys can leave one half still full; keep splitting.
        if kept.len() >= BUCKET_CAPACITY {
            return self.split(dir, bucket, old_hash);
        }
        if moved.len() >= BUCKET_CAPACITY {
            return self.split(dir, &mut new_bucket, new_hash);
        }
        Ok(())
    }

    /// Replaces the value of an existing key in place. No split, no shrink.
    pub fn update(&self, key: i64, value: i64) -> Result<()> {
        let dir = self.directory.read();
        let slot = slot_hash(key, dir.global_depth);
        let page_num = dir.buckets[slot as usize];
        let mut bucket = self.write_bucket(page_num)?;
        drop(dir);
        bucket.update(key, value)
    }

    /// Removes a key. Buckets are never coalesced and the directory never
    /// shrinks.
    pub fn delete(&self, key: i64) -> Result<()> {
        let dir = self.directory.read();
        let slot = slot_hash(key, dir.global_depth);
        let page_num = dir.buckets[slot as usize];
        let mut bucket = self.write_bucket(page_num)?;
        drop(dir);
        bucket.delete(key)
    }

    /// Collects every entry by walking physical bucket pages rather than
    /// directory slots, so aliased buckets are visited exactly once.
    pub fn select(&self) -> Result<Vec<HashEntry>> {
        let dir = self.directory.read();
        let mut all = Vec::new();
        for page_num in 0..self.pager.num_pages() {
            let bucket = self.read_bucket(page_num)?;
            all.extend(bucket.select()?);
        }
        drop(dir);
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NUM_PAGES;

    fn fresh_table() -> HashTable {
        let pager = Arc::new(Pager::in_memory_with_capacity(NUM_PAGES).unwrap());
        HashTable::new(pager).unwrap()
    }

    /// The first `n` non-negative keys that land in the same depth-2 slot.
    fn colliding_keys(n: usize) -> (i64, Vec<i64>) {
        let target = slot_hash(0, INITIAL_GLOBAL_DEPTH);
        let keys = (0i64..)
            .filter(|&k| slot_hash(k, INITIAL_GLOBAL_DEPTH) == target)
            .take(n)
            .collect();
        (target, keys)
    }

    #[test]
    fn fresh_table_has_four_depth_two_buckets() {
        let table = fresh_table();
        assert_eq!(table.global_depth(), 2);
        let dir = table.directory_snapshot();
        assert_eq!(dir.len(), 4);
        for &pn in &dir {
            let bucket = table.read_bucket(pn).unwrap();
            assert_eq!(bucket.local_depth().unwrap(), 2);
            assert_eq!(bucket.num_keys().unwrap(), 0);
        }
    }

    #[test]
    fn insert_then_find() {
        let table = fresh_table();
        for key in 0..100 {
            table.insert(key, key * 7).unwrap();
        }
        for key in 0..100 {
            assert_eq!(table.find(key).unwrap(), Some(key * 7));
        }
        assert_eq!(table.find(1234).unwrap(), None);
    }

    #[test]
    fn overflowing_one_bucket_doubles_the_directory() {
        let table = fresh_table();
        let (target, keys) = colliding_keys(BUCKET_CAPACITY);

        for (i, &key) in keys.iter().enumerate() {
            table.insert(key, i as i64).unwrap();
            if i < BUCKET_CAPACITY - 1 {
                assert_eq!(table.global_depth(), 2, "split too early at {i}");
            }
        }

        // The final insert filled the bucket; its local depth equalled the
        // global depth, so the directory doubled.
        assert_eq!(table.global_depth(), 3);
        let dir = table.directory_snapshot();
        assert_eq!(dir.len(), 8);
        assert_ne!(
            dir[target as usize],
            dir[(target + 4) as usize],
            "the overflowed slot should have gained a sibling bucket"
        );

        for (i, &key) in keys.iter().enumerate() {
            assert_eq!(table.find(key).unwrap(), Some(i as i64));
        }
    }

    #[test]
    fn directory_invariant_holds_after_many_splits() {
        let table = fresh_table();
        for key in 0..3000 {
            table.insert(key, key).unwrap();
        }
        assert!(table.global_depth() > 2);

        let dir = table.directory_snapshot();
        for (slot, &pn) in dir.iter().enumerate() {
            let bucket = table.read_bucket(pn).unwrap();
            let depth = bucket.local_depth().unwrap();
            for entry in bucket.select().unwrap() {
                assert_eq!(
                    slot_hash(entry.key, depth),
                    (slot as i64) % (1 << depth),
                    "slot {slot} points at a bucket holding a foreign key"
                );
            }
        }
    }

    #[test]
    fn update_and_delete_do_not_resize() {
        let table = fresh_table();
        for key in 0..50 {
            table.insert(key, key).unwrap();
        }
        let depth_before = table.global_depth();
        let pages_before = table.pager().num_pages();

        for key in 0..50 {
            table.update(key, key + 1000).unwrap();
        }
        for key in 0..25 {
            table.delete(key).unwrap();
        }

        assert_eq!(table.global_depth(), depth_before);
        assert_eq!(table.pager().num_pages(), pages_before);
        assert_eq!(table.find(0).unwrap(), None);
        assert_eq!(table.find(30).unwrap(), Some(1030));
    }

    #[test]
    fn select_visits_aliased_buckets_once() {
        let table = fresh_table();
        let mut expected = 0;
        for key in 0..500 {
            table.insert(key, key).unwrap();
            expected += 1;
        }
        let entries = table.select().unwrap();
        assert_eq!(entries.len(), expected);
    }

    #[test]
    fn extend_reports_hash_overflow_at_the_depth_cap() {
        let pager = Arc::new(Pager::in_memory_with_capacity(8).unwrap());
        // A directory already at the cap; extend must refuse to double it.
        let table = HashTable {
            pager,
            directory: RwLock::new(Directory {
                global_depth: MAX_GLOBAL_DEPTH,
                buckets: vec![0, 1, 2, 3],
            }),
        };

        let err = table.extend().unwrap_err();
        assert!(
            err.to_string().contains("hash directory overflow"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn split_reports_hash_overflow_at_the_depth_cap() {
        let pager = Arc::new(Pager::in_memory_with_capacity(8).unwrap());
        let table = HashTable {
            pager,
            directory: RwLock::new(Directory {
                global_depth: MAX_GLOBAL_DEPTH,
                buckets: vec![0, 1, 2, 3],
            }),
        };

        // A bucket whose local depth already equals the cap cannot divide
        // its keys any further.
        let mut bucket = table.alloc_bucket(MAX_GLOBAL_DEPTH).unwrap();
        let mut dir = table.directory.write();
        let err = table.split(&mut dir, &mut bucket, 0).unwrap_err();
        assert!(
            err.to_string().contains("hash directory overflow"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn find_after_insert_matches_a_model() {
        use std::collections::HashMap;
        let table = fresh_table();
        let mut model: HashMap<i64, i64> = HashMap::new();

        for i in 0..800i64 {
            let key = (i * 37) % 600;
            if model.contains_key(&key) {
                table.update(key, i).unwrap();
                model.insert(key, i);
            } else {
                table.insert(key, i).unwrap();
                model.insert(key, i);
            }
        }
        for (key, value) in &model {
            assert_eq!(table.find(*key).unwrap(), Some(*value));
        }
    }
}
