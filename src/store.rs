use crate::error::{ChainError, Result};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Durable key-value storage keyed by block height.
///
/// The store never interprets values. Overwrites are allowed at this layer;
/// append-only discipline is enforced by the chain.
pub trait KvStore: Send + Sync {
    /// Write `value` under `key`.
    fn put(&self, key: u64, value: &[u8]) -> Result<()>;

    /// Read the value under `key`, or `ChainError::NotFound`.
    fn get(&self, key: u64) -> Result<Vec<u8>>;

    /// Total number of stored entries.
    fn count(&self) -> Result<u64>;
}

/// In-memory store for tests and embedding.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<u64, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> ChainError {
    ChainError::Persistence("store lock poisoned".into())
}

impl KvStore for MemoryStore {
    fn put(&self, key: u64, value: &[u8]) -> Result<()> {
        self.entries
            .write()
            .map_err(poisoned)?
            .insert(key, value.to_vec());
        Ok(())
    }

    fn get(&self, key: u64) -> Result<Vec<u8>> {
        self.entries
            .read()
            .map_err(poisoned)?
            .get(&key)
            .cloned()
            .ok_or(ChainError::NotFound(key))
    }

    fn count(&self) -> Result<u64> {
        Ok(self.entries.read().map_err(poisoned)?.len() as u64)
    }
}

/// File-backed store: one file per key, named by the decimal key.
///
/// Writes go to a temporary file that is synced and then renamed into place,
/// so a crashed write never leaves a half-written entry under a real key.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open or create a store at the given directory.
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    fn entry_path(&self, key: u64) -> PathBuf {
        self.dir.join(key.to_string())
    }
}

impl KvStore for FileStore {
    fn put(&self, key: u64, value: &[u8]) -> Result<()> {
        let tmp = self.dir.join(format!(".{}.tmp", key));
        let mut f = fs::File::create(&tmp)?;
        f.write_all(value)?;
        f.sync_all()?;
        fs::rename(&tmp, self.entry_path(key))?;
        Ok(())
    }

    fn get(&self, key: u64) -> Result<Vec<u8>> {
        match fs::read(self.entry_path(key)) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(ChainError::NotFound(key)),
            Err(e) => Err(e.into()),
        }
    }

    fn count(&self) -> Result<u64> {
        let mut n = 0u64;
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            // Only names `entry_path` would produce; "007" is not key 7.
            let is_key = entry.file_name().to_str().is_some_and(|name| {
                name.parse::<u64>().is_ok_and(|key| key.to_string() == name)
            });
            if is_key && entry.file_type()?.is_file() {
                n += 1;
            }
        }
        Ok(n)
    }
}
