//! # Grace Hash Join
//!
//! Equi-joins two hash indexes by partitioning both sides into
//! hash-aligned buckets and probing paired buckets independently.
//!
//! ## Phases
//!
//! ```text
//! Build   materialize each source into a temporary hash index, keyed by
//!         the join side (the pair is transposed when joining on values)
//!    │
//! Align   extend the shallower directory until global depths match, so
//!         slot i hashes the same keys on both sides
//!    │
//! Probe   one task per unique physical bucket pair: pin both pages,
//!         build a Bloom filter over left keys, scan right entries
//!         through the filter, emit matches on a bounded channel
//!    │
//! Drain   the caller consumes the channel, then finish() joins the
//!         workers and removes the temporary files
//! ```
//!
//! Aliased directory slots are deduplicated by the `(left page, right
//! page)` pair so no physical bucket pair is probed twice. The inner scan
//! deliberately does not short-circuit after the first match: duplicate
//! keys on the join side fan out with bag semantics.
//!
//! ## Backpressure and Cancellation
//!
//! The result channel is bounded; a blocked send resumes when the consumer
//! drains or fails permanently when the consumer goes away. Every send
//! first checks a shared cancellation flag, and any task error raises that
//! flag, cancelling all peers.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use eyre::{bail, Result};
use hashbrown::HashSet;
use tracing::debug;

use super::bloom::BloomFilter;
use crate::config::{DEFAULT_FILTER_SIZE, META_FILE_EXTENSION, RESULT_CHANNEL_CAPACITY};
use crate::database::Database;
use crate::hash::{HashEntry, HashIndex};

/// One emitted join match, both sides restored to their original
/// key/value orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryPair {
    pub left: HashEntry,
    pub right: HashEntry,
}

/// Best-effort removal of the join's temporary files. Runs on drop so the
/// files disappear regardless of success or failure.
#[derive(Default)]
struct TempCleanup {
    paths: Vec<PathBuf>,
}

impl TempCleanup {
    fn register(&mut self, path: &Path) {
        self.paths.push(path.to_path_buf());
        self.paths.push(path.with_extension(META_FILE_EXTENSION));
    }

    fn run(&mut self) {
        for path in self.paths.drain(..) {
            let _ = fs::remove_file(path);
        }
    }
}

impl Drop for TempCleanup {
    fn drop(&mut self) {
        self.run();
    }
}

/// A running join: a bounded stream of results plus the worker handles.
pub struct JoinRun {
    receiver: Option<Receiver<EntryPair>>,
    workers: Vec<JoinHandle<Result<()>>>,
    cancel: Arc<AtomicBool>,
    cleanup: TempCleanup,
}

impl JoinRun {
    /// The bounded result channel. No ordering is promised between pairs.
    pub fn results(&self) -> &Receiver<EntryPair> {
        // INVARIANT: the receiver is present until finish() consumes self.
        self.receiver.as_ref().expect("join results already consumed")
    }

    /// Signals every probe task to stop at its next send.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    /// Waits for every probe task, removes the temporary indexes, and
    /// reports the first task error if any.
    pub fn finish(mut self) -> Result<()> {
        drop(self.receiver.take());

        let mut first_error = None;
        for handle in self.workers.drain(..) {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
                Err(_) => {
                    if first_error.is_none() {
                        first_error = Some(eyre::eyre!("join probe task panicked"));
                    }
                }
            }
        }

        self.cleanup.run();
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Drop for JoinRun {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::Release);
        drop(self.receiver.take());
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

/// Joins `left` and `right` with grace hash join. The flags choose which
/// side of each `(key, value)` pair the equi-join is on.
pub fn grace_hash_join(
    db: &Database,
    left: &HashIndex,
    right: &HashIndex,
    join_on_left_key: bool,
    join_on_right_key: bool,
) -> Result<JoinRun> {
    let mut cleanup = TempCleanup::default();
    let left_temp = build_hash_index(db, left, join_on_left_key, &mut cleanup)?;
    let right_temp = build_hash_index(db, right, join_on_right_key, &mut cleanup)?;

    // Align global depths so directory slot i covers the same keys on
    // both sides.
    while left_temp.table().global_depth() != right_temp.table().global_depth() {
        if left_temp.table().global_depth() < right_temp.table().global_depth() {
            left_temp.table().extend()?;
        } else {
            right_temp.table().extend()?;
        }
    }

    let left_dir = left_temp.table().directory_snapshot();
    let right_dir = right_temp.table().directory_snapshot();

    let (sender, receiver) = sync_channel(RESULT_CHANNEL_CAPACITY);
    let cancel = Arc::new(AtomicBool::new(false));
    let mut seen: HashSet<(i64, i64)> = HashSet::new();
    let mut workers = Vec::new();

    for (slot, &left_pn) in left_dir.iter().enumerate() {
        let right_pn = right_dir[slot];
        if !seen.insert((left_pn, right_pn)) {
            continue;
        }

        let left_temp = Arc::clone(&left_temp);
        let right_temp = Arc::clone(&right_temp);
        let sender = sender.clone();
        let cancel = Arc::clone(&cancel);
        workers.push(thread::spawn(move || {
            let outcome = probe_buckets(
                &left_temp,
                &right_temp,
                left_pn,
                right_pn,
                join_on_left_key,
                join_on_right_key,
                &sender,
                &cancel,
            );
            if outcome.is_err() {
                cancel.store(true, Ordering::Release);
            }
            outcome
        }));
    }
    drop(sender);

    debug!(probes = workers.len(), "grace hash join probe phase started");
    Ok(JoinRun {
        receiver: Some(receiver),
        workers,
        cancel,
        cleanup,
    })
}

/// Copies a source index into a fresh temporary index, hashing on the
/// requested join side.
fn build_hash_index(
    db: &Database,
    source: &HashIndex,
    use_key: bool,
    cleanup: &mut TempCleanup,
) -> Result<Arc<HashIndex>> {
    let path = db.temp_index_path()?;
    cleanup.register(&path);

    let temp = HashIndex::open(&path)?;
    for entry in source.select()? {
        if use_key {
            temp.insert(entry.key, entry.value)?;
        } else {
            temp.insert(entry.value, entry.key)?;
        }
    }
    Ok(Arc::new(temp))
}

/// Restores a temp-index entry to its source orientation.
fn orient(entry: HashEntry, joined_on_key: bool) -> HashEntry {
    if joined_on_key {
        entry
    } else {
        HashEntry {
            key: entry.value,
            value: entry.key,
        }
    }
}

fn send_result(
    sender: &SyncSender<EntryPair>,
    cancel: &AtomicBool,
    pair: EntryPair,
) -> Result<()> {
    if cancel.load(Ordering::Acquire) {
        bail!("hash join cancelled");
    }
    if sender.send(pair).is_err() {
        bail!("hash join cancelled: result channel closed");
    }
    Ok(())
}

/// Emits every match between one aligned bucket pair.
#[allow(clippy::too_many_arguments)]
fn probe_buckets(
    left: &HashIndex,
    right: &HashIndex,
    left_pn: i64,
    right_pn: i64,
    join_on_left_key: bool,
    join_on_right_key: bool,
    sender: &SyncSender<EntryPair>,
    cancel: &AtomicBool,
) -> Result<()> {
    // Both pages stay pinned for the whole probe; the guards put them back
    // on exit.
    let left_bucket = left.table().read_bucket(left_pn)?;
    let right_bucket = right.table().read_bucket(right_pn)?;

    let left_entries = left_bucket.select()?;
    let right_entries = right_bucket.select()?;

    let mut filter = BloomFilter::new(DEFAULT_FILTER_SIZE);
    for entry in &left_entries {
        filter.insert(entry.key);
    }

    for right_entry in &right_entries {
        if !filter.contains(right_entry.key) {
            continue;
        }
        // No short-circuit: duplicate join keys fan out (bag semantics).
        for left_entry in &left_entries {
            if left_entry.key == right_entry.key {
                let pair = EntryPair {
                    left: orient(*left_entry, join_on_left_key),
                    right: orient(*right_entry, join_on_right_key),
                };
                send_result(sender, cancel, pair)?;
            }
        }
    }
    Ok(())
}
