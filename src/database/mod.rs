//! # Database
//!
//! A database is a directory of named hash indexes, one `<name>.hsh` data
//! file (plus its `.meta` sidecar) per table. This module supplies the
//! logical operations the recovery manager replays: create-table, insert,
//! update, delete, and find. The operations here never write the log;
//! write-ahead logging wraps them one layer up so the recovery path can
//! replay without re-logging.
//!
//! Uniqueness lives here rather than in the index: `insert` rejects a
//! duplicate key, which is exactly the conflict that redo converts into an
//! update.

mod transaction;

pub use transaction::{TransactionManager, TxnId};

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use eyre::{ensure, Result, WrapErr};
use hashbrown::HashMap;
use parking_lot::RwLock;
use tracing::info;

use crate::config::{INDEX_FILE_EXTENSION, TEMP_DIR_NAME};
use crate::hash::HashIndex;

/// A directory of named hash-indexed tables.
pub struct Database {
    base_path: PathBuf,
    tables: RwLock<HashMap<String, Arc<HashIndex>>>,
    temp_counter: AtomicU64,
}

impl Database {
    /// Opens the database directory, creating it if needed, and reloads
    /// every index file found inside.
    pub fn open(base_path: impl AsRef<Path>) -> Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path).wrap_err_with(|| {
            format!("failed to create database directory '{}'", base_path.display())
        })?;

        let mut tables = HashMap::new();
        for entry in fs::read_dir(&base_path).wrap_err_with(|| {
            format!("failed to read database directory '{}'", base_path.display())
        })? {
            let entry = entry.wrap_err("failed to read directory entry")?;
            let path = entry.path();
            if path.extension().map(|e| e == INDEX_FILE_EXTENSION) != Some(true) {
                continue;
            }
            let index = Arc::new(HashIndex::open(&path)?);
            tables.insert(index.name().to_string(), index);
        }

        if !tables.is_empty() {
            info!(tables = tables.len(), path = %base_path.display(), "database opened");
        }

        Ok(Self {
            base_path,
            tables: RwLock::new(tables),
            temp_counter: AtomicU64::new(0),
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn get_tables(&self) -> Vec<Arc<HashIndex>> {
        self.tables.read().values().cloned().collect()
    }

    pub fn get_table(&self, name: &str) -> Result<Arc<HashIndex>> {
        self.tables
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| eyre::eyre!("no table named '{name}'"))
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.tables.read().contains_key(name)
    }

    /// Creates a new hash-indexed table.
    pub fn create_table(&self, name: &str) -> Result<Arc<HashIndex>> {
        ensure!(
            !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'),
            "invalid table name '{name}'"
        );

        let mut tables = self.tables.write();
        ensure!(!tables.contains_key(name), "table '{name}' already exists");

        let path = self
            .base_path
            .join(format!("{name}.{INDEX_FILE_EXTENSION}"));
        let index = Arc::new(HashIndex::open(&path)?);
        tables.insert(name.to_string(), Arc::clone(&index));
        Ok(index)
    }

    /// Inserts a key/value pair, rejecting duplicate keys.
    pub fn insert(&self, table: &str, key: i64, value: i64) -> Result<()> {
        let table = self.get_table(table)?;
        ensure!(
            table.find(key)?.is_none(),
            "insert: key {key} already exists in table '{}'",
            table.name()
        );
        table.insert(key, value)
    }

    /// Replaces the value of an existing key.
    pub fn update(&self, table: &str, key: i64, value: i64) -> Result<()> {
        self.get_table(table)?.update(key, value)
    }

    /// Removes a key.
    pub fn delete(&self, table: &str, key: i64) -> Result<()> {
        self.get_table(table)?.delete(key)
    }

    /// Looks up a key. `Ok(None)` on a miss.
    pub fn find(&self, table: &str, key: i64) -> Result<Option<i64>> {
        self.get_table(table)?.find(key)
    }

    /// Hands out a unique path for a temporary index under `<base>/tmp/`.
    /// The hash join builds its transient indexes there and removes them
    /// when it finishes.
    pub fn temp_index_path(&self) -> Result<PathBuf> {
        let temp_dir = self.base_path.join(TEMP_DIR_NAME);
        fs::create_dir_all(&temp_dir).wrap_err_with(|| {
            format!("failed to create temp directory '{}'", temp_dir.display())
        })?;
        let serial = self.temp_counter.fetch_add(1, Ordering::Relaxed);
        Ok(temp_dir.join(format!(
            "t{}_{serial}.{INDEX_FILE_EXTENSION}",
            std::process::id()
        )))
    }

    /// Persists every table's metadata and flushes every dirty page.
    pub fn close(&self) -> Result<()> {
        for table in self.get_tables() {
            table.close()?;
        }
        Ok(())
    }
}
