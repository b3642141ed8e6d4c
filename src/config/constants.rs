//! # Burrow Configuration Constants
//!
//! This module centralizes all configuration constants, grouping
//! interdependent values together. Constants that depend on each other are
//! co-located to prevent mismatch bugs.
//!
//! ## Dependency Graph
//!
//! ```text
//! PAGE_SIZE (4096 bytes, the direct-I/O block size)
//!       │
//!       ├─> NUM_PAGES (buffer pool frames, all carved from one
//!       │   PAGE_SIZE-aligned arena so O_DIRECT is legal on every frame)
//!       │
//!       └─> BUCKET_CAPACITY (derived: how many 16-byte hash entries fit
//!             after the 24-byte bucket header)
//!
//! DEFAULT_FILTER_SIZE (1024 bits)
//!       │
//!       └─> Bloom positions are H1(k) % size and H2(k) % size; both
//!           hashes must agree on this width
//!
//! INITIAL_GLOBAL_DEPTH (2)
//!       │
//!       └─> A fresh index has 2^2 directory slots and four buckets,
//!           each at local depth 2
//! ```
//!
//! ## Critical Invariants
//!
//! Enforced by compile-time assertions below:
//!
//! 1. `PAGE_SIZE` is a power of two (required for aligned direct I/O)
//! 2. The bucket header plus `BUCKET_CAPACITY` entries fit in one page
//! 3. `INITIAL_GLOBAL_DEPTH <= MAX_GLOBAL_DEPTH`

// ============================================================================
// PAGE LAYOUT
// The fundamental unit of I/O. Matches the conventional block-device
// preferred alignment so every frame is a legal O_DIRECT buffer.
// ============================================================================

/// Size of each database page in bytes.
pub const PAGE_SIZE: usize = 4096;

/// Number of frames in the buffer pool.
pub const NUM_PAGES: usize = 256;

/// Sentinel page number for an unassigned frame.
pub const NO_PAGE: i64 = -1;

const _: () = assert!(PAGE_SIZE.is_power_of_two(), "PAGE_SIZE must be a power of two");

// ============================================================================
// HASH BUCKET LAYOUT
// One bucket per page: a fixed header followed by fixed-width entries.
// ============================================================================

/// Size of the bucket page header (local depth, key count, overflow sentinel).
pub const BUCKET_HEADER_SIZE: usize = 24;

/// Size of one hash entry (64-bit key plus 64-bit value).
pub const ENTRY_SIZE: usize = 16;

/// Entries per bucket. A bucket splits the moment it reaches this count.
pub const BUCKET_CAPACITY: usize = (PAGE_SIZE - BUCKET_HEADER_SIZE) / ENTRY_SIZE;

/// Global depth of a freshly created index.
pub const INITIAL_GLOBAL_DEPTH: i64 = 2;

/// Hard cap on the directory's global depth. Splitting past this fails
/// with a hash-overflow error instead of recursing forever on adversarial
/// keys that collide modulo a large power of two.
pub const MAX_GLOBAL_DEPTH: i64 = 64;

const _: () = assert!(
    BUCKET_HEADER_SIZE + BUCKET_CAPACITY * ENTRY_SIZE <= PAGE_SIZE,
    "bucket header and entries must fit in one page"
);

const _: () = assert!(
    INITIAL_GLOBAL_DEPTH <= MAX_GLOBAL_DEPTH,
    "initial depth exceeds the directory cap"
);

// ============================================================================
// QUERY EXECUTION
// ============================================================================

/// Width of the per-bucket Bloom filter in bits.
pub const DEFAULT_FILTER_SIZE: u64 = 1024;

/// Capacity of the bounded join result channel.
pub const RESULT_CHANNEL_CAPACITY: usize = 1024;

// ============================================================================
// FILE NAMING
// ============================================================================

/// Extension of an index data file inside a database directory.
pub const INDEX_FILE_EXTENSION: &str = "hsh";

/// Extension of the directory-metadata sidecar next to each data file.
pub const META_FILE_EXTENSION: &str = "meta";

/// Suffix appended to the base directory name for the checkpoint snapshot.
pub const RECOVERY_DIR_SUFFIX: &str = "-recovery";

/// Subdirectory of the database used for the join's temporary indexes.
pub const TEMP_DIR_NAME: &str = "tmp";
