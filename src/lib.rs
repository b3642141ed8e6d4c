//! # Burrow - Embedded Hash-Indexed Storage Engine
//!
//! Burrow is a single-node relational-style storage core: a buffer-managed
//! paged store with an extendible-hash index, a grace-hash-join operator
//! accelerated by per-bucket Bloom filters, and a write-ahead log with
//! ARIES-lite recovery.
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use burrow::{log_path_for, prime, RecoveryManager, TransactionManager};
//!
//! let db = Arc::new(prime("./data/db")?);
//! let tm = Arc::new(TransactionManager::new());
//! let rm = RecoveryManager::new(db.clone(), tm.clone(), log_path_for("./data/db"))?;
//! rm.recover()?;
//!
//! rm.create_table("movies")?;
//! tm.begin(1)?;
//! rm.start(1)?;
//! rm.apply_insert(1, "movies", 5, 50)?;
//! rm.commit(1)?;
//! tm.commit(1)?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │   Recovery (WAL, checkpoint, redo/  │
//! │   undo, snapshot promotion)         │
//! ├─────────────────────────────────────┤
//! │   Database (named tables, logical   │
//! │   ops) │ TransactionManager         │
//! ├─────────────────────────────────────┤
//! │   Query (Bloom filter, grace hash   │
//! │   join over temp indexes)           │
//! ├─────────────────────────────────────┤
//! │   Extendible hash (directory,       │
//! │   buckets, splits)                  │
//! ├─────────────────────────────────────┤
//! │   Pager (aligned frame arena,       │
//! │   residency lists, FIFO eviction)   │
//! └─────────────────────────────────────┘
//! ```
//!
//! The pager is the only component that touches the data file; recovery is
//! the only component that touches the log. Each database instance owns
//! its pager, indexes, transaction manager, and recovery manager; there is
//! no process-wide state.
//!
//! ## Module Overview
//!
//! - [`storage`]: aligned buffer pool with pinning and FIFO eviction
//! - [`hash`]: extendible hashing, one bucket per page
//! - [`query`]: grace hash join and its Bloom-filter gate
//! - [`database`]: named tables and the logical operations recovery replays
//! - [`recovery`]: write-ahead log, checkpointing, crash recovery
//! - [`config`]: compile-time tunables

pub mod config;
pub mod database;
pub mod hash;
pub mod query;
pub mod recovery;
pub mod storage;

pub use database::{Database, TransactionManager, TxnId};
pub use hash::{HashEntry, HashIndex, HashTable};
pub use query::{grace_hash_join, BloomFilter, EntryPair, JoinRun};
pub use recovery::{log_path_for, prime, EditAction, LogRecord, RecoveryManager};
pub use storage::{PageGuard, Pager};
