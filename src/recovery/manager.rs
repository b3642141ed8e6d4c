//! # Recovery Manager
//!
//! Write-ahead logging with ARIES-lite recovery: logical records, redo of
//! everything since the most recent checkpoint, then undo of losers in
//! reverse log order. There are no LSNs and no compensation log records;
//! idempotence comes from the redo fallbacks (insert converges to update
//! on a duplicate, update converges to insert on a miss) and from undo
//! writing its inverse edits through the ordinary logged handlers.
//!
//! ## Write-Ahead Discipline
//!
//! Every edit is appended and fsynced before the in-memory index mutation;
//! dirty pages may trail the log arbitrarily until a checkpoint or an
//! eviction flushes them.
//!
//! ## Recovery Flow
//!
//! ```text
//!   startup
//!      │
//!      ▼
//!   prime()          promote <base>-recovery/ over <base>/ when both
//!      │             exist; the log lives beside them and is untouched
//!      ▼
//!   recover()
//!      │  phase R: forward from the most recent CHECKPOINT
//!      │    TABLE      -> recreate the table
//!      │    EDIT       -> logical redo with conflict fallbacks
//!      │    START      -> txn becomes active
//!      │    COMMIT     -> txn resolved
//!      │    CHECKPOINT -> seed the active set
//!      │
//!      │  phase U: reverse over the whole log
//!      │    EDIT of a loser  -> logical inverse via the logged handlers
//!      │    START of a loser -> synthetic COMMIT marks it resolved
//!      ▼
//!   ready
//! ```
//!
//! ## Checkpoint
//!
//! Quiesce each table's pager (residency mutex plus every resident page's
//! update lock), flush its dirty pages, persist its directory sidecar,
//! release, append `CHECKPOINT{active}`, and snapshot the database
//! directory to `<base>-recovery/`. The snapshot is the durable baseline
//! the next crash falls back to.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use eyre::{bail, ensure, Result, WrapErr};
use hashbrown::{HashMap, HashSet};
use parking_lot::Mutex;
use tracing::info;

use super::log_record::{EditAction, LogRecord};
use crate::config::RECOVERY_DIR_SUFFIX;
use crate::database::{Database, TransactionManager, TxnId};
use crate::hash::HashIndex;

/// Owns the write-ahead log and the per-transaction record stacks.
pub struct RecoveryManager {
    db: Arc<Database>,
    tm: Arc<TransactionManager>,
    log_path: PathBuf,
    log: Mutex<File>,
    tx_stack: Mutex<HashMap<TxnId, Vec<LogRecord>>>,
}

impl RecoveryManager {
    pub fn new(
        db: Arc<Database>,
        tm: Arc<TransactionManager>,
        log_path: impl AsRef<Path>,
    ) -> Result<Self> {
        let log_path = log_path.as_ref().to_path_buf();
        if let Some(parent) = log_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).wrap_err_with(|| {
                    format!("failed to create log directory for '{}'", log_path.display())
                })?;
            }
        }
        let log = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&log_path)
            .wrap_err_with(|| format!("failed to open log file '{}'", log_path.display()))?;

        Ok(Self {
            db,
            tm,
            log_path,
            log: Mutex::new(log),
            tx_stack: Mutex::new(HashMap::new()),
        })
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Appends one record and fsyncs. The log mutex must be held.
    fn append(log: &mut File, record: &LogRecord) -> Result<()> {
        writeln!(log, "{record}").wrap_err("failed to append a log record")?;
        log.sync_data().wrap_err("failed to sync the log")?;
        Ok(())
    }

    /// Logs the creation of a table.
    pub fn table(&self, table_type: &str, name: &str) -> Result<()> {
        let mut log = self.log.lock();
        Self::append(
            &mut log,
            &LogRecord::Table {
                table_type: table_type.to_string(),
                name: name.to_string(),
            },
        )
    }

    /// Logs one logical edit and remembers it on the transaction's stack.
    pub fn edit(
        &self,
        txn: TxnId,
        table: &str,
        action: EditAction,
        key: i64,
        old_value: i64,
        new_value: i64,
    ) -> Result<()> {
        let record = LogRecord::Edit {
            txn,
            table: table.to_string(),
            action,
            key,
            old_value,
            new_value,
        };
        let mut log = self.log.lock();
        Self::append(&mut log, &record)?;
        self.tx_stack.lock().entry(txn).or_default().push(record);
        Ok(())
    }

    /// Logs the start of a transaction.
    pub fn start(&self, txn: TxnId) -> Result<()> {
        let record = LogRecord::Start { txn };
        let mut log = self.log.lock();
        Self::append(&mut log, &record)?;
        self.tx_stack.lock().entry(txn).or_default().push(record);
        Ok(())
    }

    /// Logs a commit. The transaction's stack is discarded first; nothing
    /// is ever appended to a committed transaction's stack.
    pub fn commit(&self, txn: TxnId) -> Result<()> {
        let mut log = self.log.lock();
        self.tx_stack.lock().remove(&txn);
        Self::append(&mut log, &LogRecord::Commit { txn })
    }

    /// Logs and performs a table creation.
    pub fn create_table(&self, name: &str) -> Result<Arc<HashIndex>> {
        self.table("hash", name)?;
        self.db.create_table(name)
    }

    /// Logged insert: validate, append the edit, then mutate.
    pub fn apply_insert(&self, txn: TxnId, table: &str, key: i64, value: i64) -> Result<()> {
        ensure!(
            self.db.find(table, key)?.is_none(),
            "insert: key {key} already exists in table '{table}'"
        );
        self.edit(txn, table, EditAction::Insert, key, 0, value)?;
        self.db.insert(table, key, value)
    }

    /// Logged update: the previous value rides along for undo.
    pub fn apply_update(&self, txn: TxnId, table: &str, key: i64, value: i64) -> Result<()> {
        let old_value = self
            .db
            .find(table, key)?
            .ok_or_else(|| eyre::eyre!("update: key {key} not found in table '{table}'"))?;
        self.edit(txn, table, EditAction::Update, key, old_value, value)?;
        self.db.update(table, key, value)
    }

    /// Logged delete: the deleted value rides along for undo.
    pub fn apply_delete(&self, txn: TxnId, table: &str, key: i64) -> Result<()> {
        let old_value = self
            .db
            .find(table, key)?
            .ok_or_else(|| eyre::eyre!("delete: key {key} not found in table '{table}'"))?;
        self.edit(txn, table, EditAction::Delete, key, old_value, 0)?;
        self.db.delete(table, key)
    }

    /// Replays one record logically, bypassing the logger. The fallbacks
    /// make a second replay converge instead of failing.
    fn redo(&self, record: &LogRecord) -> Result<()> {
        match record {
            LogRecord::Table { name, .. } => {
                if !self.db.has_table(name) {
                    self.db.create_table(name)?;
                }
                Ok(())
            }
            LogRecord::Edit {
                table,
                action,
                key,
                new_value,
                ..
            } => match action {
                EditAction::Insert => {
                    if self.db.insert(table, *key, *new_value).is_err() {
                        // The entry already exists; converge with an update.
                        self.db.update(table, *key, *new_value)?;
                    }
                    Ok(())
                }
                EditAction::Update => {
                    if self.db.update(table, *key, *new_value).is_err() {
                        // The entry is gone; converge with an insert.
                        self.db.insert(table, *key, *new_value)?;
                    }
                    Ok(())
                }
                EditAction::Delete => {
                    if self.db.find(table, *key)?.is_some() {
                        self.db.delete(table, *key)?;
                    }
                    Ok(())
                }
            },
            _ => bail!("can only redo table and edit records"),
        }
    }

    /// Applies the logical inverse of an edit through the logged handlers,
    /// so the compensation itself lands in the log.
    fn undo(&self, record: &LogRecord) -> Result<()> {
        let LogRecord::Edit {
            txn,
            table,
            action,
            key,
            old_value,
            ..
        } = record
        else {
            bail!("can only undo edit records");
        };
        match action {
            EditAction::Insert => self.apply_delete(*txn, table, *key),
            EditAction::Update => self.apply_update(*txn, table, *key, *old_value),
            EditAction::Delete => self.apply_insert(*txn, table, *key, *old_value),
        }
    }

    /// Parses the whole log and locates the most recent checkpoint.
    fn read_log(&self) -> Result<(Vec<LogRecord>, usize)> {
        let _guard = self.log.lock();
        let text = fs::read_to_string(&self.log_path)
            .wrap_err_with(|| format!("failed to read log file '{}'", self.log_path.display()))?;

        let mut records = Vec::new();
        for (line_no, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record: LogRecord = line
                .parse()
                .wrap_err_with(|| format!("log line {}", line_no + 1))?;
            records.push(record);
        }

        let checkpoint = records
            .iter()
            .rposition(|r| matches!(r, LogRecord::Checkpoint { .. }))
            .unwrap_or(0);
        Ok((records, checkpoint))
    }

    /// Full recovery to the most recent checkpoint: redo forward, then
    /// undo every transaction that never committed, sealing each with a
    /// synthetic COMMIT.
    pub fn recover(&self) -> Result<()> {
        let (records, checkpoint) = self.read_log()?;
        if records.is_empty() {
            return Ok(());
        }

        let mut active: HashSet<TxnId> = HashSet::new();
        let mut redone = 0usize;

        for record in &records[checkpoint..] {
            match record {
                LogRecord::Table { .. } => {
                    self.redo(record)?;
                    redone += 1;
                }
                LogRecord::Checkpoint { active: ids } => {
                    for &txn in ids {
                        if active.insert(txn) {
                            self.tm.begin(txn)?;
                        }
                    }
                }
                LogRecord::Edit { txn, .. } => {
                    active.insert(*txn);
                    self.redo(record)?;
                    redone += 1;
                }
                LogRecord::Start { txn } => {
                    active.insert(*txn);
                    self.tm.begin(*txn)?;
                }
                LogRecord::Commit { txn } => {
                    active.remove(txn);
                    self.tm.commit(*txn)?;
                }
            }
        }

        let mut undone = 0usize;
        for record in records.iter().rev() {
            match record {
                LogRecord::Edit { txn, .. } if active.contains(txn) => {
                    self.undo(record)?;
                    undone += 1;
                }
                LogRecord::Start { txn } if active.contains(txn) => {
                    active.remove(txn);
                    self.commit(*txn)?;
                    self.tm.commit(*txn)?;
                }
                _ => {}
            }
        }

        info!(redone, undone, "recovery complete");
        Ok(())
    }

    /// Rolls one transaction back from its in-memory record stack, LIFO,
    /// and seals it with a COMMIT.
    pub fn rollback(&self, txn: TxnId) -> Result<()> {
        let stack = match self.tx_stack.lock().get(&txn) {
            Some(records) => records.clone(),
            None => return Ok(()),
        };

        if let Some(first) = stack.first() {
            ensure!(
                matches!(first, LogRecord::Start { .. }),
                "malformed transaction {txn}: its first record is not a start"
            );
        }

        for record in stack.iter().rev() {
            if matches!(record, LogRecord::Edit { .. }) {
                self.undo(record)?;
            }
        }

        self.commit(txn)?;
        self.tm.commit(txn)
    }

    /// Flushes every table under full quiescence, records the active
    /// transaction set, and snapshots the database directory. The log
    /// mutex is held for the whole operation: no edit, start, or commit
    /// can be logged while a table flush is in flight, so every record
    /// before the CHECKPOINT line is captured by the snapshot.
    pub fn checkpoint(&self) -> Result<()> {
        let mut log = self.log.lock();

        for table in self.db.get_tables() {
            let mut freeze = table.pager().lock_all_updates();
            freeze.flush_all()?;
            drop(freeze);
            table.sync_metadata()?;
        }

        let active: Vec<TxnId> = self.tx_stack.lock().keys().copied().collect();
        Self::append(&mut log, &LogRecord::Checkpoint { active })?;
        self.delta()?;
        info!("checkpoint complete");
        Ok(())
    }

    /// Copies the live database directory over the recovery snapshot.
    /// Runs with the log mutex held so no record lands mid-copy.
    fn delta(&self) -> Result<()> {
        let base = self.db.base_path();
        let snapshot = recovery_dir_for(base)?;
        if snapshot.exists() {
            fs::remove_dir_all(&snapshot).wrap_err_with(|| {
                format!("failed to clear old snapshot '{}'", snapshot.display())
            })?;
        }
        copy_dir_all(base, &snapshot)
    }
}

/// Readies a database directory for use, promoting the recovery snapshot
/// over the live tree when both exist.
pub fn prime(base: impl AsRef<Path>) -> Result<Database> {
    let base = base.as_ref();
    let snapshot = recovery_dir_for(base)?;

    if !base.exists() {
        fs::create_dir_all(&snapshot).wrap_err_with(|| {
            format!("failed to create recovery directory '{}'", snapshot.display())
        })?;
        return Database::open(base);
    }
    if !snapshot.exists() {
        return Database::open(base);
    }

    // Both exist: the live tree may be mid-write; the snapshot is the
    // durable baseline from the last checkpoint.
    fs::remove_dir_all(base)
        .wrap_err_with(|| format!("failed to discard live directory '{}'", base.display()))?;
    copy_dir_all(&snapshot, base)?;
    Database::open(base)
}

/// The log file sits beside the database directory so snapshots and
/// snapshot promotion never touch it.
pub fn log_path_for(base: impl AsRef<Path>) -> PathBuf {
    let base = base.as_ref();
    match base.file_name().and_then(|n| n.to_str()) {
        Some(name) => base.with_file_name(format!("{name}.log")),
        None => base.with_extension("log"),
    }
}

fn recovery_dir_for(base: &Path) -> Result<PathBuf> {
    let name = base
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| eyre::eyre!("database path '{}' has no directory name", base.display()))?;
    Ok(base.with_file_name(format!("{name}{RECOVERY_DIR_SUFFIX}")))
}

fn copy_dir_all(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst)
        .wrap_err_with(|| format!("failed to create directory '{}'", dst.display()))?;
    for entry in fs::read_dir(src)
        .wrap_err_with(|| format!("failed to read directory '{}'", src.display()))?
    {
        let entry = entry.wrap_err("failed to read directory entry")?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        if entry
            .file_type()
            .wrap_err("failed to stat directory entry")?
            .is_dir()
        {
            copy_dir_all(&from, &to)?;
        } else {
            fs::copy(&from, &to)
                .wrap_err_with(|| format!("failed to copy '{}'", from.display()))?;
        }
    }
    Ok(())
}
