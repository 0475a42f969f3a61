//! RocksDB-backed workspace store.
//!
//! Column families:
//! - `tabs`     : Live tab rows (bincode, keyed by tab id)
//! - `history`  : Content versions (LZ4 compressed, keyed by tab_id:seq)
//! - `snapshots`: Whole-workspace captures (LZ4 compressed, keyed by seq)
//! - `images`   : Uploaded binaries (bincode, keyed by image id)
//! - `meta`     : Id sequences
//!
//! History keys are `<len:4 BE><tab_id bytes><seq:8 BE>` so that one tab's
//! versions are contiguous and ordered oldest to newest.

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    Direction, IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::Utc;

use super::records::{self, HistoryRecord, ImageRecord, SnapshotRecord, TabRecord};
use super::{StoreError, TabStore};
use crate::tabs::Tab;

const CF_TABS: &str = "tabs";
const CF_HISTORY: &str = "history";
const CF_SNAPSHOTS: &str = "snapshots";
const CF_IMAGES: &str = "images";
const CF_META: &str = "meta";

const COLUMN_FAMILIES: &[&str] = &[CF_TABS, CF_HISTORY, CF_SNAPSHOTS, CF_IMAGES, CF_META];

const SEQ_HISTORY: &[u8] = b"seq:history";
const SEQ_SNAPSHOT: &[u8] = b"seq:snapshot";

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// Enable fsync on every write (default: false)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 512)
    pub max_open_files: i32,
    /// Write buffer size per column family (default: 16MB)
    pub write_buffer_size: usize,
    /// Largest accepted image upload in bytes (default: 10MB)
    pub max_image_bytes: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("boardcast_data"),
            block_cache_size: 64 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 512,
            write_buffer_size: 16 * 1024 * 1024,
            max_image_bytes: 10 * 1024 * 1024,
        }
    }
}

impl StoreConfig {
    /// Create config for testing (small caches, caller-provided directory).
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 4 * 1024 * 1024,
            max_image_bytes: 10 * 1024 * 1024,
        }
    }
}

/// RocksDB-backed store for tabs, history, snapshots and images.
///
/// Safe to share between the hub, the autosave scheduler and request
/// handlers: multi-key writes are serialized by an internal lock.
pub struct WorkspaceStore {
    db: DBWithThreadMode<SingleThreaded>,
    /// One block cache for every column family
    block_cache: Cache,
    config: StoreConfig,
    write_lock: Mutex<()>,
    history_seq: AtomicU64,
    snapshot_seq: AtomicU64,
}

impl WorkspaceStore {
    /// Open the store at the configured path.
    ///
    /// Creates the database and column families if they don't exist.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);
        db_opts.increase_parallelism(num_cpus());

        let block_cache = Cache::new_lru_cache(config.block_cache_size);
        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| {
                ColumnFamilyDescriptor::new(*name, Self::cf_options(name, &config, &block_cache))
            })
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;

        let history_seq = Self::recover_sequence(&db, SEQ_HISTORY)?;
        let snapshot_seq = Self::recover_sequence(&db, SEQ_SNAPSHOT)?;
        log::debug!(
            "Opened store at {} (next history id {history_seq}, next snapshot id {snapshot_seq})",
            config.path.display()
        );

        Ok(Self {
            db,
            block_cache,
            config,
            write_lock: Mutex::new(()),
            history_seq: AtomicU64::new(history_seq),
            snapshot_seq: AtomicU64::new(snapshot_seq),
        })
    }

    fn cf_options(name: &str, config: &StoreConfig, cache: &Cache) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        block_opts.set_block_cache(cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        block_opts.set_block_size(16 * 1024);
        opts.set_block_based_table_factory(&block_opts);

        opts.set_compression_type(DBCompressionType::Lz4);
        opts.set_write_buffer_size(config.write_buffer_size);

        match name {
            CF_TABS | CF_META => {
                // Point lookups only; the bloom filter covers them. A point-lookup
                // profile would install its own cache in place of the shared one.
                opts.set_max_write_buffer_number(2);
            }
            CF_HISTORY => {
                // Many appends, range-scanned per tab
                opts.set_max_write_buffer_number(4);
            }
            CF_SNAPSHOTS => {
                // Values are compressed by us already
                opts.set_max_write_buffer_number(2);
                opts.set_compression_type(DBCompressionType::None);
            }
            CF_IMAGES => {
                opts.set_max_write_buffer_number(2);
                opts.set_compression_type(DBCompressionType::None);
            }
            _ => {}
        }

        opts
    }

    /// Read the next id for a sequence from the `meta` column family.
    fn recover_sequence(
        db: &DBWithThreadMode<SingleThreaded>,
        key: &[u8],
    ) -> Result<u64, StoreError> {
        let cf = db
            .cf_handle(CF_META)
            .ok_or_else(|| StoreError::DatabaseError(format!("Column family '{CF_META}' not found")))?;
        match db.get_cf(&cf, key)? {
            Some(bytes) => Ok(read_u64(&bytes).unwrap_or(1)),
            None => Ok(1),
        }
    }

    // ─── Tabs ─────────────────────────────────────────────────────────

    /// Load a single tab row.
    pub fn get_tab(&self, tab_id: &str) -> Result<TabRecord, StoreError> {
        let cf = self.cf(CF_TABS)?;
        match self.db.get_cf(&cf, tab_id.as_bytes())? {
            Some(bytes) => records::decode(&bytes),
            None => Err(StoreError::not_found("Tab", tab_id)),
        }
    }

    fn load_tab_records(&self) -> Result<Vec<TabRecord>, StoreError> {
        let cf = self.cf(CF_TABS)?;
        let mut rows = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_, value) = item?;
            rows.push(records::decode::<TabRecord>(&value)?);
        }
        rows.sort_by(|a, b| b.updated.cmp(&a.updated));
        Ok(rows)
    }

    // ─── History ──────────────────────────────────────────────────────

    /// Most recent history records of a tab, newest first.
    pub fn list_history(&self, tab_id: &str, limit: usize) -> Result<Vec<HistoryRecord>, StoreError> {
        let cf = self.cf(CF_HISTORY)?;
        let prefix = history_prefix(tab_id);
        let start = history_key(tab_id, u64::MAX);

        let mut out = Vec::new();
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(&start, Direction::Reverse));
        for item in iter {
            if out.len() >= limit {
                break;
            }
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            out.push(records::decode_compressed::<HistoryRecord>(&value)?);
        }
        Ok(out)
    }

    /// Number of history records held for a tab.
    pub fn history_count(&self, tab_id: &str) -> Result<usize, StoreError> {
        Ok(self.history_keys_newest_first(tab_id)?.len())
    }

    fn history_keys_newest_first(&self, tab_id: &str) -> Result<Vec<Box<[u8]>>, StoreError> {
        let cf = self.cf(CF_HISTORY)?;
        let prefix = history_prefix(tab_id);
        let start = history_key(tab_id, u64::MAX);

        let mut keys = Vec::new();
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(&start, Direction::Reverse));
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            keys.push(key);
        }
        Ok(keys)
    }

    // ─── Snapshots ────────────────────────────────────────────────────

    /// Capture the given tabs as a new immutable snapshot.
    pub fn create_snapshot(
        &self,
        name: &str,
        description: Option<String>,
        tabs: &[Tab],
    ) -> Result<SnapshotRecord, StoreError> {
        let tabs_data = serde_json::to_string(tabs)
            .map_err(|e| StoreError::SerializationError(e.to_string()))?;

        let _guard = self.lock();
        let id = self.snapshot_seq.fetch_add(1, Ordering::SeqCst);
        let record = SnapshotRecord {
            id,
            name: name.to_string(),
            description,
            tabs_data,
            created: Utc::now(),
        };

        let mut batch = WriteBatch::default();
        batch.put_cf(&self.cf(CF_SNAPSHOTS)?, id.to_be_bytes(), records::encode_compressed(&record)?);
        batch.put_cf(&self.cf(CF_META)?, SEQ_SNAPSHOT, (id + 1).to_be_bytes());
        self.write(batch)?;

        Ok(record)
    }

    /// Most recent snapshots, newest first.
    pub fn list_snapshots(&self, limit: usize) -> Result<Vec<SnapshotRecord>, StoreError> {
        let cf = self.cf(CF_SNAPSHOTS)?;
        let mut out = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::End) {
            if out.len() >= limit {
                break;
            }
            let (_, value) = item?;
            out.push(records::decode_compressed::<SnapshotRecord>(&value)?);
        }
        Ok(out)
    }

    pub fn get_snapshot(&self, id: u64) -> Result<SnapshotRecord, StoreError> {
        let cf = self.cf(CF_SNAPSHOTS)?;
        match self.db.get_cf(&cf, id.to_be_bytes())? {
            Some(bytes) => records::decode_compressed(&bytes),
            None => Err(StoreError::not_found("Snapshot", id)),
        }
    }

    pub fn delete_snapshot(&self, id: u64) -> Result<(), StoreError> {
        let cf = self.cf(CF_SNAPSHOTS)?;
        let _guard = self.lock();
        if self.db.get_cf(&cf, id.to_be_bytes())?.is_none() {
            return Err(StoreError::not_found("Snapshot", id));
        }
        self.db.delete_cf_opt(&cf, id.to_be_bytes(), &self.write_options())?;
        Ok(())
    }

    // ─── Images ───────────────────────────────────────────────────────

    /// Store an upload. Rejects anything over the configured cap before
    /// touching the database.
    pub fn save_image(&self, image: &ImageRecord) -> Result<(), StoreError> {
        let size = image.size.max(image.data.len() as u64);
        if size > self.config.max_image_bytes {
            return Err(StoreError::ImageTooLarge {
                size,
                limit: self.config.max_image_bytes,
            });
        }
        let cf = self.cf(CF_IMAGES)?;
        self.db
            .put_cf_opt(&cf, image.id.as_bytes(), records::encode(image)?, &self.write_options())?;
        Ok(())
    }

    pub fn get_image(&self, id: &str) -> Result<ImageRecord, StoreError> {
        let cf = self.cf(CF_IMAGES)?;
        match self.db.get_cf(&cf, id.as_bytes())? {
            Some(bytes) => records::decode(&bytes),
            None => Err(StoreError::not_found("Image", id)),
        }
    }

    /// Number of stored images.
    pub fn image_count(&self) -> Result<usize, StoreError> {
        let cf = self.cf(CF_IMAGES)?;
        let mut count = 0;
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            item?;
            count += 1;
        }
        Ok(count)
    }

    pub fn max_image_bytes(&self) -> u64 {
        self.config.max_image_bytes
    }

    /// Flush every column family's memtable to disk.
    pub fn sync(&self) -> Result<(), StoreError> {
        for name in COLUMN_FAMILIES {
            self.db.flush_cf(self.cf(name)?)?;
        }
        Ok(())
    }

    /// Bytes currently held by the shared block cache.
    pub fn block_cache_usage(&self) -> usize {
        self.block_cache.get_usage()
    }

    /// Get the database path.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    // ─── Helpers ──────────────────────────────────────────────────────

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::DatabaseError(format!("Column family '{name}' not found")))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ()> {
        // The guarded value is (), so a poisoned lock carries no broken state.
        self.write_lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn write_options(&self) -> WriteOptions {
        let mut opts = WriteOptions::default();
        opts.set_sync(self.config.sync_writes);
        opts
    }

    fn write(&self, batch: WriteBatch) -> Result<(), StoreError> {
        self.db.write_opt(batch, &self.write_options())?;
        Ok(())
    }
}

impl TabStore for WorkspaceStore {
    fn upsert_tab(&self, tab: &Tab) -> Result<(), StoreError> {
        let cf = self.cf(CF_TABS)?;
        let value = records::encode(&TabRecord::from_tab(tab))?;
        self.db
            .put_cf_opt(&cf, tab.id.as_bytes(), value, &self.write_options())?;
        Ok(())
    }

    fn load_all_tabs(&self) -> Result<Vec<Tab>, StoreError> {
        Ok(self
            .load_tab_records()?
            .into_iter()
            .map(TabRecord::into_tab)
            .collect())
    }

    fn delete_tab(&self, tab_id: &str) -> Result<(), StoreError> {
        let cf = self.cf(CF_TABS)?;
        self.db
            .delete_cf_opt(&cf, tab_id.as_bytes(), &self.write_options())?;
        Ok(())
    }

    fn append_history(&self, tab_id: &str, content: &str) -> Result<HistoryRecord, StoreError> {
        let _guard = self.lock();
        let id = self.history_seq.fetch_add(1, Ordering::SeqCst);
        let record = HistoryRecord {
            id,
            tab_id: tab_id.to_string(),
            content: content.to_string(),
            created: Utc::now(),
        };

        let mut batch = WriteBatch::default();
        batch.put_cf(
            &self.cf(CF_HISTORY)?,
            history_key(tab_id, id),
            records::encode_compressed(&record)?,
        );
        batch.put_cf(&self.cf(CF_META)?, SEQ_HISTORY, (id + 1).to_be_bytes());
        self.write(batch)?;

        Ok(record)
    }

    fn prune_history(&self, tab_id: &str, keep: usize) -> Result<u64, StoreError> {
        let _guard = self.lock();
        let keys = self.history_keys_newest_first(tab_id)?;
        if keys.len() <= keep {
            return Ok(0);
        }

        let cf = self.cf(CF_HISTORY)?;
        let mut batch = WriteBatch::default();
        let mut removed = 0u64;
        for key in keys.iter().skip(keep) {
            batch.delete_cf(&cf, key);
            removed += 1;
        }
        self.write(batch)?;
        Ok(removed)
    }
}

fn history_prefix(tab_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(4 + tab_id.len() + 8);
    key.extend_from_slice(&(tab_id.len() as u32).to_be_bytes());
    key.extend_from_slice(tab_id.as_bytes());
    key
}

fn history_key(tab_id: &str, seq: u64) -> Vec<u8> {
    let mut key = history_prefix(tab_id);
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

fn read_u64(bytes: &[u8]) -> Option<u64> {
    let buf: [u8; 8] = bytes.get(..8)?.try_into().ok()?;
    Some(u64::from_be_bytes(buf))
}

fn num_cpus() -> i32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as i32)
        .unwrap_or(4)
}
