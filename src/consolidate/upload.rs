use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

use super::Quantity;

pub const KEY_PREFIX: &str = "consolidated";

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("cannot read artifact {}", .path.display())]
    ReadArtifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("object store write failed for {key}")]
    Write {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("object store rejected {key}: {reason}")]
    Rejected { key: String, reason: String },
}

pub fn object_key(quantity: Quantity, file_name: &str) -> String {
    format!("{KEY_PREFIX}/{}/{file_name}", quantity.as_str())
}

/// Remote destination for golden artifacts.
pub trait ObjectStore {
    fn put(&self, key: &str, body: &[u8]) -> Result<(), UploadError>;

    fn describe(&self) -> String;
}

/// Uploads one artifact file; returns the key it was stored under.
pub fn upload_file(store: &dyn ObjectStore, quantity: Quantity, path: &Path) -> Result<String, UploadError> {
    let body = fs::read(path).map_err(|source| UploadError::ReadArtifact {
        path: path.to_path_buf(),
        source,
    })?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let key = object_key(quantity, &file_name);
    store.put(&key, &body)?;
    debug!(store = %store.describe(), %key, bytes = body.len(), "uploaded artifact");
    Ok(key)
}

/// Mirrors keys as files under a root directory.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

impl ObjectStore for LocalObjectStore {
    fn put(&self, key: &str, body: &[u8]) -> Result<(), UploadError> {
        let path = self.path_for(key);
        let write_err = |source| UploadError::Write {
            key: key.to_string(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        fs::write(&path, body).map_err(write_err)
    }

    fn describe(&self) -> String {
        format!("local:{}", self.root.display())
    }
}

/// Process-local store; clones share the same objects.
#[derive(Debug, Clone, Default)]
pub struct MemoryObjectStore {
    objects: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
    reject_all: bool,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose every put fails.
    pub fn rejecting() -> Self {
        Self {
            reject_all: true,
            ..Self::default()
        }
    }

    pub fn keys(&self) -> Vec<String> {
        let objects = self.objects.lock().unwrap_or_else(|e| e.into_inner());
        objects.keys().cloned().collect()
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let objects = self.objects.lock().unwrap_or_else(|e| e.into_inner());
        objects.get(key).cloned()
    }
}

impl ObjectStore for MemoryObjectStore {
    fn put(&self, key: &str, body: &[u8]) -> Result<(), UploadError> {
        if self.reject_all {
            return Err(UploadError::Rejected {
                key: key.to_string(),
                reason: "store is read-only".into(),
            });
        }
        let mut objects = self.objects.lock().unwrap_or_else(|e| e.into_inner());
        objects.insert(key.to_string(), body.to_vec());
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".into()
    }
}
