//! Two-hash Bloom filter used as a speculative gate during bucket probes.

use roaring::RoaringBitmap;

use crate::config::DEFAULT_FILTER_SIZE;
use crate::hash::{filter_hash_a, filter_hash_b};

/// Fixed-width membership sketch. False positives are tolerated; false
/// negatives cannot happen because bits are never cleared.
pub struct BloomFilter {
    bits: RoaringBitmap,
    size: u64,
}

impl BloomFilter {
    pub fn new(size: u64) -> Self {
        Self {
            bits: RoaringBitmap::new(),
            size,
        }
    }

    pub fn with_default_size() -> Self {
        Self::new(DEFAULT_FILTER_SIZE)
    }

    /// Sets the key's two bit positions.
    pub fn insert(&mut self, key: i64) {
        self.bits.insert(filter_hash_a(key, self.size) as u32);
        self.bits.insert(filter_hash_b(key, self.size) as u32);
    }

    /// True when both of the key's positions are set.
    pub fn contains(&self, key: i64) -> bool {
        self.bits.contains(filter_hash_a(key, self.size) as u32)
            && self.bits.contains(filter_hash_b(key, self.size) as u32)
    }
}
