//! # Query Operators
//!
//! The engine's single query operator: a grace hash equi-join over two
//! hash indexes, accelerated by a per-bucket Bloom filter.

mod bloom;
mod join;

pub use bloom::BloomFilter;
pub use join::{grace_hash_join, EntryPair, JoinRun};
