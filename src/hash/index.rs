//! Named hash index bound to a data file and a metadata sidecar.
//!
//! The bucket pages live in `<name>.hsh` behind the pager; the directory
//! (global depth plus slot array) is persisted in a `<name>.meta` sidecar
//! with a magic number and a CRC-64 checksum. The sidecar is rewritten on
//! close and at every checkpoint so a snapshot of the database directory is
//! self-contained.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crc::{Crc, CRC_64_ECMA_182};
use eyre::{ensure, Result, WrapErr};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use super::bucket::HashEntry;
use super::table::HashTable;
use crate::config::META_FILE_EXTENSION;
use crate::storage::Pager;

const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_ECMA_182);
const META_MAGIC: [u8; 8] = *b"BRWIDX01";

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
struct IndexMetaHeader {
    magic: [u8; 8],
    global_depth: i64,
    slot_count: i64,
    checksum: u64,
}

/// A named extendible-hash index over one data file.
#[derive(Debug)]
pub struct HashIndex {
    name: String,
    path: PathBuf,
    meta_path: PathBuf,
    table: HashTable,
}

impl HashIndex {
    /// Opens an existing index or creates a fresh one at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| eyre::eyre!("index path '{}' has no usable name", path.display()))?
            .to_string();
        let meta_path = path.with_extension(META_FILE_EXTENSION);

        let pager = Arc::new(Pager::open(&path)?);
        let fresh = !meta_path.exists();
        let table = if fresh {
            ensure!(
                pager.num_pages() == 0,
                "index '{}' has data but its metadata sidecar is missing",
                path.display()
            );
            HashTable::new(Arc::clone(&pager))?
        } else {
            let (global_depth, buckets) = read_metadata(&meta_path)?;
            HashTable::from_parts(Arc::clone(&pager), global_depth, buckets)?
        };

        let index = Self {
            name,
            path,
            meta_path,
            table,
        };
        if fresh {
            index.sync_metadata()?;
        }
        Ok(index)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn meta_path(&self) -> &Path {
        &self.meta_path
    }

    pub fn table(&self) -> &HashTable {
        &self.table
    }

    pub fn pager(&self) -> &Arc<Pager> {
        self.table.pager()
    }

    pub fn find(&self, key: i64) -> Result<Option<i64>> {
        self.table.find(key)
    }

    pub fn insert(&self, key: i64, value: i64) -> Result<()> {
        self.table.insert(key, value)
    }

    pub fn update(&self, key: i64, value: i64) -> Result<()> {
        self.table.update(key, value)
    }

    pub fn delete(&self, key: i64) -> Result<()> {
        self.table.delete(key)
    }

    pub fn select(&self) -> Result<Vec<HashEntry>> {
        self.table.select()
    }

    /// Persists the directory to the metadata sidecar.
    pub fn sync_metadata(&self) -> Result<()> {
        let (global_depth, buckets) = self.table.directory_parts();
        let mut payload = Vec::with_capacity(buckets.len() * 8);
        for page_num in &buckets {
            payload.extend_from_slice(&page_num.to_le_bytes());
        }

        let header = IndexMetaHeader {
            magic: META_MAGIC,
            global_depth,
            slot_count: buckets.len() as i64,
            checksum: metadata_checksum(global_depth, &payload),
        };

        let mut bytes = Vec::with_capacity(std::mem::size_of::<IndexMetaHeader>() + payload.len());
        bytes.extend_from_slice(header.as_bytes());
        bytes.extend_from_slice(&payload);

        let mut file = File::create(&self.meta_path).wrap_err_with(|| {
            format!("failed to create metadata sidecar '{}'", self.meta_path.display())
        })?;
        file.write_all(&bytes).wrap_err_with(|| {
            format!("failed to write metadata sidecar '{}'", self.meta_path.display())
        })?;
        file.sync_all().wrap_err_with(|| {
            format!("failed to sync metadata sidecar '{}'", self.meta_path.display())
        })?;
        Ok(())
    }

    /// Persists metadata and flushes every dirty page.
    pub fn close(&self) -> Result<()> {
        self.sync_metadata()?;
        self.pager().close()
    }
}

fn metadata_checksum(global_depth: i64, payload: &[u8]) -> u64 {
    let mut digest = CRC64.digest();
    digest.update(&global_depth.to_le_bytes());
    digest.update(payload);
    digest.finalize()
}

fn read_metadata(path: &Path) -> Result<(i64, Vec<i64>)> {
    let bytes = fs::read(path)
        .wrap_err_with(|| format!("failed to read metadata sidecar '{}'", path.display()))?;
    let header_size = std::mem::size_of::<IndexMetaHeader>();
    ensure!(
        bytes.len() >= header_size,
        "metadata sidecar '{}' is too short to hold a header",
        path.display()
    );
    // A by-value read: the byte buffer carries no alignment guarantee.
    let header = IndexMetaHeader::read_from_bytes(&bytes[..header_size])
        .map_err(|e| eyre::eyre!("failed to parse IndexMetaHeader: {:?}", e))?;
    ensure!(
        header.magic == META_MAGIC,
        "metadata sidecar '{}' has a bad magic number",
        path.display()
    );

    let payload = &bytes[header_size..];
    ensure!(
        header.slot_count >= 0 && header.slot_count as usize <= payload.len(),
        "metadata sidecar '{}' claims an impossible slot count {}",
        path.display(),
        header.slot_count
    );
    ensure!(
        payload.len() == header.slot_count as usize * 8,
        "metadata sidecar '{}' is truncated: {} slots do not match {} payload bytes",
        path.display(),
        header.slot_count,
        payload.len()
    );
    ensure!(
        metadata_checksum(header.global_depth, payload) == header.checksum,
        "metadata sidecar '{}' failed its checksum",
        path.display()
    );

    let buckets = payload
        .chunks_exact(8)
        .map(|chunk| i64::from_le_bytes(chunk.try_into().unwrap()))
        .collect();
    Ok((header.global_depth, buckets))
}
