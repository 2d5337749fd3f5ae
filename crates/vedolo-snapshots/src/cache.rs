//! File-backed memo of resolved records
//!
//! Entries are immutable once written: receipts and finalized contract reads
//! never change, so the cache only grows. The map is ordered so the file is
//! byte-stable across runs with the same content.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::CacheError;

/// Persistent `id -> record` map stored as one JSON object
#[derive(Debug)]
pub struct JsonCache<V> {
    path: PathBuf,
    entries: BTreeMap<String, V>,
    dirty: bool,
}

impl<V> JsonCache<V>
where
    V: Serialize + DeserializeOwned,
{
    /// Open the cache at `path`. A missing file is an empty cache; an
    /// unreadable or corrupt file is an error, never a silent reset.
    pub fn load(path: &Path) -> Result<Self, CacheError> {
        let entries = if path.exists() {
            let content = fs::read_to_string(path).map_err(|source| CacheError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            serde_json::from_str(&content).map_err(|source| CacheError::Corrupt {
                path: path.to_path_buf(),
                source,
            })?
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path: path.to_path_buf(),
            entries,
            dirty: false,
        })
    }

    pub fn get(&self, id: &str) -> Option<&V> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Insert `record` unless `id` is already present. Returns whether it was inserted.
    pub fn put(&mut self, id: String, record: V) -> bool {
        match self.entries.entry(id) {
            std::collections::btree_map::Entry::Occupied(_) => false,
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(record);
                self.dirty = true;
                true
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &V)> {
        self.entries.iter()
    }

    /// Write the whole cache atomically. No-op when nothing changed since the last persist.
    pub fn persist(&mut self) -> Result<(), CacheError> {
        if !self.dirty && self.path.exists() {
            return Ok(());
        }
        let bytes = serde_json::to_vec(&self.entries)?;
        write_atomic(&self.path, &bytes)?;
        self.dirty = false;
        Ok(())
    }
}

/// Write `bytes` to `path` via a sibling temp file, fsync and rename.
/// A crash at any point leaves either the old file or the new one.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), CacheError> {
    let io_err = |source| CacheError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);

    let mut file = fs::File::create(&tmp).map_err(io_err)?;
    file.write_all(bytes).map_err(io_err)?;
    file.sync_all().map_err(io_err)?;
    drop(file);

    fs::rename(&tmp, path).map_err(io_err)
}
