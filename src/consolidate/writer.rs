use ndarray::Array4;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use super::codec::Codec;
use super::scatter::ConsolidatedTensors;
use super::upload::{ObjectStore, upload_file};
use super::{ConsolidationError, Quantity};
use crate::staging::ContentId;

#[derive(Debug, Clone, PartialEq)]
pub struct GoldenArtifact {
    pub quantity: Quantity,
    pub path: PathBuf,
    pub remote_key: Option<String>,
}

/// Persists consolidated tensors and optionally mirrors them remotely.
pub struct GoldenWriter {
    codec: Codec,
    store: Option<Box<dyn ObjectStore>>,
}

impl GoldenWriter {
    pub fn new(codec: Codec) -> Self {
        Self { codec, store: None }
    }

    pub fn with_store(mut self, store: Box<dyn ObjectStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn path_for(&self, dir: &Path, quantity: Quantity, id: &ContentId) -> PathBuf {
        dir.join(self.codec.file_name(quantity, id))
    }

    /// Writes all three quantities. An upload failure fails the call.
    pub fn write(&self, dir: &Path, id: &ContentId, tensors: &ConsolidatedTensors) -> crate::Result<Vec<GoldenArtifact>> {
        fs::create_dir_all(dir).map_err(|source| ConsolidationError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut artifacts = Vec::with_capacity(Quantity::ALL.len());
        for (quantity, tensor) in tensors.iter() {
            let path = self.path_for(dir, quantity, id);
            self.codec.encode(&path, tensor)?;
            let remote_key = match &self.store {
                Some(store) => Some(upload_file(store.as_ref(), quantity, &path)?),
                None => None,
            };
            artifacts.push(GoldenArtifact {
                quantity,
                path,
                remote_key,
            });
        }
        info!(content_id = %id, codec = ?self.codec, files = artifacts.len(), "wrote golden tensors");
        Ok(artifacts)
    }

    pub fn read(&self, dir: &Path, quantity: Quantity, id: &ContentId) -> Result<Array4<f64>, ConsolidationError> {
        self.codec.decode(&self.path_for(dir, quantity, id))
    }
}
