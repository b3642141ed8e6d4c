//! Stable hash family shared by the directory and the Bloom filter.
//!
//! Directory slotting uses xxh64; the Bloom filter needs a second,
//! independent hash and gets SipHash-1-3 with fixed keys. All hashes are
//! deterministic across processes so on-disk placement survives restarts.

use std::hash::Hasher;

use siphasher::sip::SipHasher13;
use xxhash_rust::xxh64::xxh64;

const SLOT_SEED: u64 = 0;
const FILTER_SEED: u64 = 0x9E37_79B9_7F4A_7C15;
const SIP_KEY_0: u64 = 0x0706_0504_0302_0100;
const SIP_KEY_1: u64 = 0x0F0E_0D0C_0B0A_0908;

/// The stable 64-bit hash of a key.
pub fn hash_key(key: i64) -> u64 {
    xxh64(&key.to_le_bytes(), SLOT_SEED)
}

/// Directory slot of `key` at the given depth: `H(key) mod 2^depth`.
pub fn slot_hash(key: i64, depth: i64) -> i64 {
    debug_assert!((0..=crate::config::MAX_GLOBAL_DEPTH).contains(&depth));
    ((hash_key(key) as u128) % (1u128 << depth)) as i64
}

/// First Bloom position for `key` in a filter of `bits` bits.
pub fn filter_hash_a(key: i64, bits: u64) -> u64 {
    xxh64(&key.to_le_bytes(), FILTER_SEED) % bits
}

/// Second, independent Bloom position for `key`.
pub fn filter_hash_b(key: i64, bits: u64) -> u64 {
    let mut hasher = SipHasher13::new_with_keys(SIP_KEY_0, SIP_KEY_1);
    hasher.write(&key.to_le_bytes());
    hasher.finish() % bits
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_hash_stays_in_range() {
        for depth in 0..16 {
            for key in [-5i64, 0, 1, 42, i64::MAX, i64::MIN] {
                let slot = slot_hash(key, depth);
                assert!((0..(1i64 << depth)).contains(&slot));
            }
        }
    }

    #[test]
    fn slot_hash_is_consistent_across_depths() {
        // Deepening a slot only adds high bits: slot at depth d is the low
        // d bits of the slot at depth d+1.
        for key in 0..200i64 {
            for depth in 1..12 {
                let narrow = slot_hash(key, depth);
                let wide = slot_hash(key, depth + 1);
                assert_eq!(wide % (1 << depth), narrow);
            }
        }
    }

    #[test]
    fn filter_hashes_are_independent() {
        let agree = (0..1000i64)
            .filter(|&k| filter_hash_a(k, 1024) == filter_hash_b(k, 1024))
            .count();
        // Two independent hashes collide on ~1/1024 of inputs.
        assert!(agree < 20, "hashes agree on {agree} of 1000 keys");
    }
}
