//! Dataset blobs

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use meshbank_crypto::SymmetricKey;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{StoreError, StoreResult};

/// Whole-dataset storage
pub trait BlobStore: Send + Sync {
    /// Read a dataset, `None` if it was never written
    fn load(&self, dataset: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Replace a dataset
    fn save(&self, dataset: &str, bytes: &[u8]) -> StoreResult<()>;
}

/// Load and decode a JSON dataset
pub fn load_json<T: DeserializeOwned>(store: &dyn BlobStore, dataset: &str) -> StoreResult<Option<T>> {
    match store.load(dataset)? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

/// Encode and save a JSON dataset
pub fn save_json<T: Serialize>(store: &dyn BlobStore, dataset: &str, value: &T) -> StoreResult<()> {
    let bytes = serde_json::to_vec(value)?;
    store.save(dataset, &bytes)
}

/// One file per dataset under a directory, optionally sealed
pub struct FileStore {
    dir: PathBuf,
    key: Option<SymmetricKey>,
}

impl FileStore {
    /// Plain JSON files
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            key: None,
        }
    }

    /// Files sealed with `key`
    pub fn encrypted(dir: impl Into<PathBuf>, key: SymmetricKey) -> Self {
        Self {
            dir: dir.into(),
            key: Some(key),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, dataset: &str) -> PathBuf {
        self.dir.join(format!("{dataset}.blob"))
    }
}

impl BlobStore for FileStore {
    fn load(&self, dataset: &str) -> StoreResult<Option<Vec<u8>>> {
        let path = self.path_for(dataset);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read(&path)?;
        match &self.key {
            Some(key) => {
                let text = String::from_utf8(raw)
                    .map_err(|_| StoreError::Decryption(dataset.to_string()))?;
                let plain = key
                    .open(text.trim())
                    .map_err(|_| StoreError::Decryption(dataset.to_string()))?;
                Ok(Some(plain))
            }
            None => Ok(Some(raw)),
        }
    }

    fn save(&self, dataset: &str, bytes: &[u8]) -> StoreResult<()> {
        fs::create_dir_all(&self.dir)?;

        let contents = match &self.key {
            Some(key) => key
                .seal(bytes)
                .map_err(|e| StoreError::Encryption(e.to_string()))?
                .into_bytes(),
            None => bytes.to_vec(),
        };

        let path = self.path_for(dataset);
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, contents)?;
        fs::rename(tmp_path, &path)?;

        tracing::debug!(dataset, path = %path.display(), "Dataset persisted");
        Ok(())
    }
}

/// In-memory store for tests
#[derive(Default)]
pub struct MemoryStore {
    datasets: RwLock<HashMap<String, Vec<u8>>>,
    writes: RwLock<HashMap<String, u64>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times a dataset has been saved
    pub fn write_count(&self, dataset: &str) -> u64 {
        self.writes.read().get(dataset).copied().unwrap_or(0)
    }
}

impl BlobStore for MemoryStore {
    fn load(&self, dataset: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.datasets.read().get(dataset).cloned())
    }

    fn save(&self, dataset: &str, bytes: &[u8]) -> StoreResult<()> {
        self.datasets
            .write()
            .insert(dataset.to_string(), bytes.to_vec());
        *self.writes.write().entry(dataset.to_string()).or_insert(0) += 1;
        Ok(())
    }
}
