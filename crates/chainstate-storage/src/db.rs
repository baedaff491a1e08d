use crate::{Result, StorageError};
use rocksdb::{Options, WriteBatch as RocksWriteBatch, DB};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// A single put or delete queued for an atomic [`Storage::write_batch`].
pub enum WriteOp {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

/// Opaque byte-key/byte-value store with atomic batch writes.
///
/// The trie and account-state layers depend on this trait rather than on a
/// concrete backend, so tests can run against [`InMemoryStorage`] while
/// production code runs against [`RocksDbStorage`].
pub trait Storage: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;
    fn delete(&self, key: &[u8]) -> Result<()>;
    fn write_batch(&self, ops: Vec<WriteOp>) -> Result<()>;
}

/// RocksDB-backed [`Storage`] implementation.
pub struct RocksDbStorage {
    db: Arc<DB>,
}

impl RocksDbStorage {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let db = DB::open(&opts, path.as_ref())?;
        tracing::info!(path = %path.as_ref().display(), "rocksdb storage opened");
        Ok(Self { db: Arc::new(db) })
    }

    /// Open with an explicit max-open-files and cache size, as set by
    /// `chainstate-config`'s `StorageConfig`.
    pub fn open_with_options<P: AsRef<Path>>(
        path: P,
        max_open_files: i32,
        cache_size_mb: usize,
    ) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts.set_max_open_files(max_open_files);
        let cache = rocksdb::Cache::new_lru_cache(cache_size_mb * 1024 * 1024);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_block_cache(&cache);
        opts.set_block_based_table_factory(&block_opts);

        let db = DB::open(&opts, path.as_ref())?;
        tracing::info!(
            path = %path.as_ref().display(),
            max_open_files,
            cache_size_mb,
            "rocksdb storage opened"
        );
        Ok(Self { db: Arc::new(db) })
    }
}

impl Storage for RocksDbStorage {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(key)?)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        Ok(self.db.put(key, value)?)
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        Ok(self.db.delete(key)?)
    }

    fn write_batch(&self, ops: Vec<WriteOp>) -> Result<()> {
        let op_count = ops.len();
        let mut batch = RocksWriteBatch::default();
        for op in ops {
            match op {
                WriteOp::Put(k, v) => batch.put(k, v),
                WriteOp::Delete(k) => batch.delete(k),
            }
        }
        self.db.write(batch).map_err(|e| {
            tracing::warn!(ops = op_count, error = %e, "rocksdb write_batch failed");
            StorageError::from(e)
        })
    }
}

/// In-memory [`Storage`] implementation used by tests and by the trie's own
/// dev-dependencies.
#[derive(Default)]
pub struct InMemoryStorage {
    map: parking_lot::RwLock<HashMap<Vec<u8>, Vec<u8>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for InMemoryStorage {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.map.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.map.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.map.write().remove(key);
        Ok(())
    }

    fn write_batch(&self, ops: Vec<WriteOp>) -> Result<()> {
        let mut map = self.map.write();
        for op in ops {
            match op {
                WriteOp::Put(k, v) => {
                    map.insert(k, v);
                }
                WriteOp::Delete(k) => {
                    map.remove(&k);
                }
            }
        }
        Ok(())
    }
}
