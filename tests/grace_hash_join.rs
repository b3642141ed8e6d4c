//! Grace hash join integration tests: exact match sets, key/value
//! orientation, duplicate fan-out, directory alignment, and temp-file
//! cleanup.

use std::collections::HashSet;

use burrow::{grace_hash_join, Database, EntryPair};
use tempfile::tempdir;

fn drain(run: &burrow::JoinRun) -> Vec<EntryPair> {
    let mut pairs = Vec::new();
    while let Ok(pair) = run.results().recv() {
        pairs.push(pair);
    }
    pairs
}

fn as_tuples(pairs: &[EntryPair]) -> HashSet<(i64, i64, i64, i64)> {
    pairs
        .iter()
        .map(|p| (p.left.key, p.left.value, p.right.key, p.right.value))
        .collect()
}

#[test]
fn key_key_join_emits_exactly_the_common_keys() {
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path().join("db")).unwrap();
    let left = db.create_table("left").unwrap();
    let right = db.create_table("right").unwrap();

    for (k, v) in [(1, 10), (2, 20), (3, 30)] {
        left.insert(k, v).unwrap();
    }
    for (k, v) in [(2, 200), (3, 300), (4, 400)] {
        right.insert(k, v).unwrap();
    }

    let run = grace_hash_join(&db, &left, &right, true, true).unwrap();
    let pairs = drain(&run);
    run.finish().unwrap();

    assert_eq!(pairs.len(), 2);
    let tuples = as_tuples(&pairs);
    assert!(tuples.contains(&(2, 20, 2, 200)));
    assert!(tuples.contains(&(3, 30, 3, 300)));
}

#[test]
fn value_side_join_restores_original_orientation() {
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path().join("db")).unwrap();
    let left = db.create_table("left").unwrap();
    let right = db.create_table("right").unwrap();

    // Join left values against right keys.
    left.insert(1, 100).unwrap();
    left.insert(2, 200).unwrap();
    right.insert(100, 7).unwrap();
    right.insert(300, 8).unwrap();

    let run = grace_hash_join(&db, &left, &right, false, true).unwrap();
    let pairs = drain(&run);
    run.finish().unwrap();

    assert_eq!(pairs.len(), 1);
    // The emitted pair keeps each side's stored (key, value) orientation.
    assert_eq!(as_tuples(&pairs), HashSet::from([(1, 100, 100, 7)]));
}

#[test]
fn duplicate_join_keys_fan_out() {
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path().join("db")).unwrap();
    let left = db.create_table("left").unwrap();
    let right = db.create_table("right").unwrap();

    // The index layer permits duplicate keys; the probe must emit the
    // full cross product for a duplicated join key.
    left.insert(5, 1).unwrap();
    left.insert(5, 2).unwrap();
    right.insert(5, 9).unwrap();
    right.insert(6, 0).unwrap();

    let run = grace_hash_join(&db, &left, &right, true, true).unwrap();
    let pairs = drain(&run);
    run.finish().unwrap();

    assert_eq!(pairs.len(), 2);
    let tuples = as_tuples(&pairs);
    assert!(tuples.contains(&(5, 1, 5, 9)));
    assert!(tuples.contains(&(5, 2, 5, 9)));
}

#[test]
fn lopsided_inputs_align_depths_and_match_fully() {
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path().join("db")).unwrap();
    let left = db.create_table("left").unwrap();
    let right = db.create_table("right").unwrap();

    // The left build index splits far past the right one, forcing the
    // align phase to extend the right directory.
    for key in 0..5_000 {
        left.insert(key, key).unwrap();
    }
    for key in 4_990..5_010 {
        right.insert(key, -key).unwrap();
    }

    let run = grace_hash_join(&db, &left, &right, true, true).unwrap();
    let pairs = drain(&run);
    run.finish().unwrap();

    // Overlap is 4990..5000; with unique keys every match appears once.
    assert_eq!(pairs.len(), 10);
    let keys: HashSet<i64> = pairs.iter().map(|p| p.left.key).collect();
    assert_eq!(keys, (4_990..5_000).collect::<HashSet<i64>>());
}

#[test]
fn disjoint_inputs_produce_nothing() {
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path().join("db")).unwrap();
    let left = db.create_table("left").unwrap();
    let right = db.create_table("right").unwrap();

    for key in 0..100 {
        left.insert(key, key).unwrap();
        right.insert(key + 1_000, key).unwrap();
    }

    let run = grace_hash_join(&db, &left, &right, true, true).unwrap();
    let pairs = drain(&run);
    run.finish().unwrap();
    assert!(pairs.is_empty());
}

#[test]
fn abandoned_run_surfaces_probe_errors_through_finish() {
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path().join("db")).unwrap();
    let left = db.create_table("left").unwrap();
    let right = db.create_table("right").unwrap();

    // Far more matches than the bounded channel can hold, so probe tasks
    // are still sending when the receiver disappears.
    for key in 0..3_000 {
        left.insert(key, key).unwrap();
        right.insert(key, -key).unwrap();
    }

    let run = grace_hash_join(&db, &left, &right, true, true).unwrap();

    // Finish without draining: the receiver drops, the blocked sends
    // fail, and the shared flag cancels every remaining peer. The first
    // task error must come back out of finish().
    let err = run.finish().unwrap_err();
    assert!(
        err.to_string().contains("cancelled"),
        "unexpected error: {err}"
    );

    let temp_dir = db.base_path().join("tmp");
    let leftovers = std::fs::read_dir(&temp_dir)
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(leftovers, 0, "failed join left temporary files behind");
}

#[test]
fn cancel_stops_probe_tasks_before_the_stream_is_exhausted() {
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path().join("db")).unwrap();
    let left = db.create_table("left").unwrap();
    let right = db.create_table("right").unwrap();

    let total = 5_000i64;
    for key in 0..total {
        left.insert(key, key).unwrap();
        right.insert(key, key + 1).unwrap();
    }

    let run = grace_hash_join(&db, &left, &right, true, true).unwrap();
    run.cancel();

    // After the flag fires, each task delivers at most the send it was
    // already blocked in, then stops; the channel can never carry the
    // full result set.
    let mut received = 0i64;
    while run.results().recv().is_ok() {
        received += 1;
    }
    assert!(
        received < total,
        "cancellation did not stop the probe tasks ({received} of {total} delivered)"
    );

    let err = run.finish().unwrap_err();
    assert!(
        err.to_string().contains("cancelled"),
        "unexpected error: {err}"
    );
}

#[test]
fn temporary_indexes_are_removed_after_finish() {
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path().join("db")).unwrap();
    let left = db.create_table("left").unwrap();
    let right = db.create_table("right").unwrap();
    left.insert(1, 1).unwrap();
    right.insert(1, 2).unwrap();

    let run = grace_hash_join(&db, &left, &right, true, true).unwrap();
    let _ = drain(&run);
    run.finish().unwrap();

    let temp_dir = db.base_path().join("tmp");
    let leftovers = std::fs::read_dir(&temp_dir)
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(leftovers, 0, "join left temporary files behind");
}

#[test]
fn temporary_indexes_are_removed_on_drop_too() {
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path().join("db")).unwrap();
    let left = db.create_table("left").unwrap();
    let right = db.create_table("right").unwrap();
    left.insert(1, 1).unwrap();
    right.insert(1, 2).unwrap();

    {
        let run = grace_hash_join(&db, &left, &right, true, true).unwrap();
        let _ = drain(&run);
        // Dropped without finish(); cleanup is best-effort on drop.
    }

    let temp_dir = db.base_path().join("tmp");
    let leftovers = std::fs::read_dir(&temp_dir)
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(leftovers, 0, "dropped join left temporary files behind");
}
