use crate::{write_atomic, StoreError};
use flotilla_schema::FolderId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

const CACHE_FILE: &str = "synced_folders.json";

/// One applied synced folder as remembered between runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CachedFolder {
    pub guest_path: String,
    pub host_path: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

/// Folders grouped by implementation key, then by folder id.
pub type FolderMap = BTreeMap<String, BTreeMap<FolderId, CachedFolder>>;

/// The synced folder set applied at the last successful enable.
#[derive(Debug, Clone)]
pub struct FolderCacheStore {
    path: PathBuf,
}

impl FolderCacheStore {
    pub fn new(machine_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: machine_dir.into().join(CACHE_FILE),
        }
    }

    /// An absent cache is an empty set.
    pub fn load(&self) -> Result<FolderMap, StoreError> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(FolderMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, folders: &FolderMap) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(folders)?;
        write_atomic(&self.path, content.as_bytes())
    }

    pub fn clear(&self) -> Result<(), StoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
