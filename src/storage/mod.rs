//! # Storage Module
//!
//! The foundational layer of the engine: a fixed-capacity buffer pool over
//! a direct-I/O aligned file. Higher layers never touch the file directly;
//! they pin pages through the [`Pager`] and read or mutate the returned
//! frame handles.
//!
//! ## Module Organization
//!
//! - `frame`: aligned frame arena, per-frame state, intrusive residency lists
//! - `pager`: the buffer pool itself (page table, pinning, FIFO eviction,
//!   flushing, checkpoint quiescence)
//!
//! ## Thread Safety
//!
//! [`Pager`] is `Send + Sync`. Residency transitions are serialized by one
//! mutex; frame payload access is governed by pin counts plus the per-frame
//! latch and update lock.

mod frame;
mod pager;

pub use pager::{PageGuard, Pager, ResidencyStats, UpdateFreeze};

pub use crate::config::{NO_PAGE, NUM_PAGES, PAGE_SIZE};

use eyre::{ensure, Result};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Parses a zerocopy struct from a byte slice with size validation.
#[inline]
pub fn parse_zerocopy<'a, T: FromBytes + KnownLayout + Immutable>(
    bytes: &'a [u8],
    type_name: &str,
) -> Result<&'a T> {
    let size = std::mem::size_of::<T>();
    ensure!(
        bytes.len() >= size,
        "buffer too small for {}: {} < {}",
        type_name,
        bytes.len(),
        size
    );
    T::ref_from_bytes(&bytes[..size])
        .map_err(|e| eyre::eyre!("failed to parse {}: {:?}", type_name, e))
}

/// Parses a mutable zerocopy struct from a byte slice with size validation.
#[inline]
pub fn parse_zerocopy_mut<'a, T: FromBytes + KnownLayout + Immutable + IntoBytes>(
    bytes: &'a mut [u8],
    type_name: &str,
) -> Result<&'a mut T> {
    let size = std::mem::size_of::<T>();
    ensure!(
        bytes.len() >= size,
        "buffer too small for {}: {} < {}",
        type_name,
        bytes.len(),
        size
    );
    T::mut_from_bytes(&mut bytes[..size])
        .map_err(|e| eyre::eyre!("failed to parse {}: {:?}", type_name, e))
}
