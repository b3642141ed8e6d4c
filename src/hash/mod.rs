//! # Extendible Hash Index
//!
//! On-disk extendible hashing: a global-depth directory of bucket page
//! numbers, one bucket per pager page, growth by bucket splits and
//! directory doubling.
//!
//! ## Module Organization
//!
//! - `hasher`: the stable 64-bit hash family (directory slotting plus the
//!   two independent Bloom hashes)
//! - `bucket`: bucket page layout and single-bucket operations
//! - `table`: the directory, lock coupling, and the split algorithm
//! - `index`: a named index file with its persisted directory sidecar

mod bucket;
mod hasher;
mod index;
mod table;

pub use bucket::{HashBucket, HashEntry};
pub use hasher::{filter_hash_a, filter_hash_b, hash_key, slot_hash};
pub use index::HashIndex;
pub use table::HashTable;
