//! RocksDB-backed room snapshot store.
//!
//! Column families:
//! - `rooms`   : latest `{code, language}` per room (bincode, LZ4 compressed)
//! - `metadata`: per-room save bookkeeping (bincode)
//!
//! Keys are the UTF-8 bytes of the room id. A save writes both column
//! families in one batch.

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::SystemTime;

use super::{RoomSnapshot, SnapshotStore, StoreError};

const CF_ROOMS: &str = "rooms";
const CF_METADATA: &str = "metadata";

const COLUMN_FAMILIES: &[&str] = &[CF_ROOMS, CF_METADATA];

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// Enable fsync on every write
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 256)
    pub max_open_files: i32,
    /// Write buffer size per column family (default: 16MB)
    pub write_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("codeshare_data"),
            block_cache_size: 64 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 256,
            write_buffer_size: 16 * 1024 * 1024,
        }
    }
}

impl StoreConfig {
    /// Config at `path` with production defaults.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Create config for testing (small caches).
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 4 * 1024 * 1024,
        }
    }
}

/// Bookkeeping stored alongside each snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomMetadata {
    pub room_id: String,
    /// Number of saves so far (1 after the first save)
    pub version: u64,
    /// Last save (seconds since epoch)
    pub saved_at: u64,
    /// Encoded snapshot size in bytes
    pub snapshot_size: u64,
    /// Compressed snapshot size in bytes
    pub compressed_size: u64,
}

impl RoomMetadata {
    fn encode(&self) -> Result<Vec<u8>, StoreError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| StoreError::SerializationError(e.to_string()))
    }

    fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        let (meta, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| StoreError::DeserializationError(e.to_string()))?;
        Ok(meta)
    }
}

/// Durable [`SnapshotStore`].
pub struct RocksStore {
    db: DBWithThreadMode<SingleThreaded>,
    config: StoreConfig,
    /// Serializes the metadata read-then-write of saves and deletes.
    writes: Mutex<()>,
}

impl RocksStore {
    /// Open the store, creating the database and column families if needed.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);
        db_opts.increase_parallelism(num_cpus());

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(&config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;
        log::info!("Opened room store at {}", config.path.display());

        Ok(Self {
            db,
            config,
            writes: Mutex::new(()),
        })
    }

    fn cf_options(config: &StoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        opts.set_block_based_table_factory(&block_opts);

        // Values are already LZ4 framed by us.
        opts.set_compression_type(DBCompressionType::None);
        opts.set_write_buffer_size(config.write_buffer_size);
        opts.set_max_write_buffer_number(2);
        opts.optimize_for_point_lookup(config.block_cache_size as u64);
        opts
    }

    // ─── Snapshots ────────────────────────────────────────────────────

    /// Save the latest snapshot of a room and bump its metadata.
    pub fn save_snapshot(
        &self,
        room_id: &str,
        snapshot: &RoomSnapshot,
    ) -> Result<RoomMetadata, StoreError> {
        let cf_rooms = self.cf(CF_ROOMS)?;
        let cf_meta = self.cf(CF_METADATA)?;

        let encoded = snapshot.encode()?;
        let compressed = lz4_flex::compress_prepend_size(&encoded);

        let _writes = self.writes.lock().unwrap_or_else(PoisonError::into_inner);
        let version = self.metadata(room_id)?.map_or(0, |m| m.version) + 1;
        let meta = RoomMetadata {
            room_id: room_id.to_string(),
            version,
            saved_at: SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            snapshot_size: encoded.len() as u64,
            compressed_size: compressed.len() as u64,
        };

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_rooms, room_id.as_bytes(), &compressed);
        batch.put_cf(&cf_meta, room_id.as_bytes(), meta.encode()?);

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db.write_opt(batch, &write_opts)?;

        log::debug!("Saved room {room_id} v{version} ({} bytes)", meta.compressed_size);
        Ok(meta)
    }

    /// Load the latest snapshot of a room, if one was saved.
    pub fn load_snapshot(&self, room_id: &str) -> Result<Option<RoomSnapshot>, StoreError> {
        let cf = self.cf(CF_ROOMS)?;
        let Some(compressed) = self.db.get_cf(&cf, room_id.as_bytes())? else {
            return Ok(None);
        };
        let encoded = lz4_flex::decompress_size_prepended(&compressed)
            .map_err(|e| StoreError::CompressionError(e.to_string()))?;
        RoomSnapshot::decode(&encoded).map(Some)
    }

    // ─── Metadata ─────────────────────────────────────────────────────

    pub fn metadata(&self, room_id: &str) -> Result<Option<RoomMetadata>, StoreError> {
        let cf = self.cf(CF_METADATA)?;
        match self.db.get_cf(&cf, room_id.as_bytes())? {
            Some(bytes) => RoomMetadata::decode(&bytes).map(Some),
            None => Ok(None),
        }
    }

    /// All room ids with a saved snapshot, in key order.
    pub fn list_rooms(&self) -> Result<Vec<String>, StoreError> {
        let cf = self.cf(CF_METADATA)?;
        let mut rooms = Vec::new();

        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (key, _) = item?;
            let room_id = String::from_utf8(key.to_vec())
                .map_err(|e| StoreError::DeserializationError(e.to_string()))?;
            rooms.push(room_id);
        }

        Ok(rooms)
    }

    /// Delete a room's snapshot and metadata.
    pub fn delete_room(&self, room_id: &str) -> Result<(), StoreError> {
        let cf_rooms = self.cf(CF_ROOMS)?;
        let cf_meta = self.cf(CF_METADATA)?;

        let _writes = self.writes.lock().unwrap_or_else(PoisonError::into_inner);
        let mut batch = WriteBatch::default();
        batch.delete_cf(&cf_rooms, room_id.as_bytes());
        batch.delete_cf(&cf_meta, room_id.as_bytes());
        self.db.write(batch)?;
        Ok(())
    }

    /// Flush memtables to disk.
    pub fn sync(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::DatabaseError(format!("Column family '{name}' not found")))
    }
}

impl SnapshotStore for RocksStore {
    fn put(&self, room_id: &str, snapshot: &RoomSnapshot) -> Result<(), StoreError> {
        self.save_snapshot(room_id, snapshot).map(|_| ())
    }

    fn get(&self, room_id: &str) -> Result<Option<RoomSnapshot>, StoreError> {
        self.load_snapshot(room_id)
    }
}

/// Number of CPU cores for RocksDB parallelism.
fn num_cpus() -> i32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as i32)
        .unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Language;
    use tempfile::tempdir;

    #[test]
    fn test_store_open() {
        let dir = tempdir().unwrap();
        let store = RocksStore::open(StoreConfig::for_testing(dir.path())).unwrap();
        assert!(store.path().exists());
        assert!(store.list_rooms().unwrap().is_empty());
    }

    #[test]
    fn test_snapshot_save_load() {
        let dir = tempdir().unwrap();
        let store = RocksStore::open(StoreConfig::for_testing(dir.path())).unwrap();

        let snapshot = RoomSnapshot::new("console.log(\"saved\");", Language::JavaScript);
        let meta = store.save_snapshot("room-a", &snapshot).unwrap();
        assert_eq!(meta.room_id, "room-a");
        assert_eq!(meta.version, 1);
        assert!(meta.compressed_size > 0);

        assert_eq!(store.load_snapshot("room-a").unwrap(), Some(snapshot));
        assert_eq!(store.load_snapshot("room-b").unwrap(), None);
    }

    #[test]
    fn test_version_increments() {
        let dir = tempdir().unwrap();
        let store = RocksStore::open(StoreConfig::for_testing(dir.path())).unwrap();

        for i in 1..=3 {
            let snapshot = RoomSnapshot::new(format!("v{i}"), Language::Python);
            assert_eq!(store.save_snapshot("r", &snapshot).unwrap().version, i);
        }
        assert_eq!(store.metadata("r").unwrap().unwrap().version, 3);
        assert_eq!(store.load_snapshot("r").unwrap().unwrap().code, "v3");
    }

    #[test]
    fn test_concurrent_saves_get_distinct_versions() {
        let dir = tempdir().unwrap();
        let store = RocksStore::open(StoreConfig::for_testing(dir.path())).unwrap();

        std::thread::scope(|scope| {
            for writer in 0..8 {
                let store = &store;
                scope.spawn(move || {
                    for i in 0..5 {
                        let snapshot = RoomSnapshot::new(format!("{writer}-{i}"), Language::Go);
                        store.save_snapshot("shared", &snapshot).unwrap();
                    }
                });
            }
        });

        assert_eq!(store.metadata("shared").unwrap().unwrap().version, 40);
    }

    #[test]
    fn test_list_and_delete() {
        let dir = tempdir().unwrap();
        let store = RocksStore::open(StoreConfig::for_testing(dir.path())).unwrap();
        let snapshot = RoomSnapshot::new("x", Language::Go);

        store.save_snapshot("beta", &snapshot).unwrap();
        store.save_snapshot("alpha", &snapshot).unwrap();
        assert_eq!(store.list_rooms().unwrap(), vec!["alpha", "beta"]);

        store.delete_room("alpha").unwrap();
        assert_eq!(store.list_rooms().unwrap(), vec!["beta"]);
        assert_eq!(store.load_snapshot("alpha").unwrap(), None);
        assert_eq!(store.metadata("alpha").unwrap(), None);
    }

    #[test]
    fn test_large_snapshot_compresses() {
        let dir = tempdir().unwrap();
        let store = RocksStore::open(StoreConfig::for_testing(dir.path())).unwrap();

        let code = "console.log(\"line\");\n".repeat(2_000);
        let meta = store
            .save_snapshot("big", &RoomSnapshot::new(code.clone(), Language::JavaScript))
            .unwrap();
        assert!(meta.compressed_size < meta.snapshot_size / 5);
        assert_eq!(store.load_snapshot("big").unwrap().unwrap().code, code);
    }

    #[test]
    fn test_reopen_keeps_snapshots() {
        let dir = tempdir().unwrap();
        let snapshot = RoomSnapshot::new("puts 1", Language::Ruby);
        {
            let store = RocksStore::open(StoreConfig::for_testing(dir.path())).unwrap();
            store.save_snapshot("persist", &snapshot).unwrap();
            store.sync().unwrap();
        }
        let store = RocksStore::open(StoreConfig::for_testing(dir.path())).unwrap();
        assert_eq!(store.load_snapshot("persist").unwrap(), Some(snapshot));
    }

    #[test]
    fn test_store_config_default() {
        let config = StoreConfig::default();
        assert_eq!(config.path, PathBuf::from("codeshare_data"));
        assert_eq!(StoreConfig::at("/data").path, PathBuf::from("/data"));
    }
}
