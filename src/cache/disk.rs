// src/cache/disk.rs

//! On-disk result cache.
//!
//! Layout under the cache directory:
//!
//! ```text
//! <dir>/index.toml      cache key -> content hashes
//! <dir>/blobs/<hash>    content, addressed by blake3 hash
//! ```
//!
//! The index is read in `setup` and written back in `teardown`; in between it
//! lives in memory. Blobs are written eagerly by `store`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{CacheLifecycle, CachedResult, ResultCache};
use crate::fs::FileSystem;
use crate::types::FileHandle;

const INDEX_FILE: &str = "index.toml";
const BLOB_DIR: &str = "blobs";

#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexFile {
    #[serde(default)]
    entries: BTreeMap<String, IndexEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    stdout: String,
    stderr: String,
    #[serde(default)]
    outputs: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct IndexState {
    entries: BTreeMap<String, IndexEntry>,
    dirty: bool,
}

#[derive(Debug)]
pub struct DiskCache {
    dir: PathBuf,
    fs: Arc<dyn FileSystem>,
    index: Mutex<IndexState>,
}

impl DiskCache {
    pub fn new(dir: impl Into<PathBuf>, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            dir: dir.into(),
            fs,
            index: Mutex::new(IndexState::default()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of entries currently known.
    pub fn len(&self) -> usize {
        self.index.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    fn blob_path(&self, hash: &str) -> PathBuf {
        self.dir.join(BLOB_DIR).join(hash)
    }

    fn write_blob(&self, handle: &FileHandle) -> Result<String> {
        let hash = handle.hash().to_string();
        let path = self.blob_path(&hash);
        // A blob that fails verification is rewritten, not trusted.
        if !self.fs.is_file(&path) || self.read_blob(&hash).is_none() {
            self.fs
                .write(&path, handle.bytes())
                .with_context(|| format!("writing cache blob {hash}"))?;
        }
        Ok(hash)
    }

    fn read_blob(&self, hash: &str) -> Option<FileHandle> {
        let bytes = match self.fs.read(&self.blob_path(hash)) {
            Ok(bytes) => bytes,
            Err(err) => {
                debug!(hash, error = %err, "cache blob unreadable");
                return None;
            }
        };
        let handle = FileHandle::from_bytes(bytes);
        if handle.hash() != hash {
            warn!(hash, actual = handle.hash(), "cache blob corrupted; ignoring entry");
            return None;
        }
        Some(handle)
    }

    fn load_index(&self) -> Result<BTreeMap<String, IndexEntry>> {
        let path = self.index_path();
        if !self.fs.exists(&path) {
            return Ok(BTreeMap::new());
        }
        let text = self.fs.read_to_string(&path)?;
        let index: IndexFile =
            toml::from_str(&text).with_context(|| format!("parsing cache index {:?}", path))?;
        Ok(index.entries)
    }

    fn save_index(&self, entries: &BTreeMap<String, IndexEntry>) -> Result<()> {
        let index = IndexFile {
            entries: entries.clone(),
        };
        let text = toml::to_string(&index).context("serializing cache index")?;
        self.fs.write(&self.index_path(), text.as_bytes())
    }
}

impl CacheLifecycle for DiskCache {
    fn setup(&self) -> Result<()> {
        self.fs
            .create_dir_all(&self.dir.join(BLOB_DIR))
            .with_context(|| format!("creating cache directory {:?}", self.dir))?;
        let entries = self.load_index()?;
        info!(dir = ?self.dir, entries = entries.len(), "cache ready");
        *self.index.lock() = IndexState {
            entries,
            dirty: false,
        };
        Ok(())
    }

    fn teardown(&self) {
        let mut index = self.index.lock();
        if !index.dirty {
            return;
        }
        match self.save_index(&index.entries) {
            Ok(()) => {
                index.dirty = false;
                debug!(dir = ?self.dir, entries = index.entries.len(), "cache index written");
            }
            Err(err) => warn!(dir = ?self.dir, error = %format!("{err:#}"), "failed to write cache index"),
        }
    }
}

impl ResultCache for DiskCache {
    fn lookup(&self, key: &str) -> Option<CachedResult> {
        let entry = self.index.lock().entries.get(key).cloned()?;

        let stdout = self.read_blob(&entry.stdout)?;
        let stderr = self.read_blob(&entry.stderr)?;
        let mut outputs = BTreeMap::new();
        for (path, hash) in &entry.outputs {
            outputs.insert(path.clone(), self.read_blob(hash)?);
        }

        Some(CachedResult {
            stdout,
            stderr,
            outputs,
        })
    }

    fn store(&self, key: &str, result: &CachedResult) -> Result<()> {
        let mut outputs = BTreeMap::new();
        for (path, handle) in &result.outputs {
            outputs.insert(path.clone(), self.write_blob(handle)?);
        }
        let entry = IndexEntry {
            stdout: self.write_blob(&result.stdout)?,
            stderr: self.write_blob(&result.stderr)?,
            outputs,
        };

        let mut index = self.index.lock();
        index.entries.insert(key.to_string(), entry);
        index.dirty = true;
        Ok(())
    }
}
