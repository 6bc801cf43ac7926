use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::LakeError;

/// Data lake layers in the order a batch visits them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    Staging,
    Bronze,
    Silver,
    Golden,
    Tabular,
}

impl Layer {
    pub const ORDER: [Layer; 5] = [Layer::Staging, Layer::Bronze, Layer::Silver, Layer::Golden, Layer::Tabular];

    pub fn dir_name(self) -> &'static str {
        match self {
            Layer::Staging => "staging",
            Layer::Bronze => "bronze_data",
            Layer::Silver => "silver_data",
            Layer::Golden => "golden_data",
            Layer::Tabular => "tabular_data",
        }
    }

    /// Layer whose contents this layer's stage consumes.
    pub fn input(self) -> Option<Layer> {
        match self {
            Layer::Staging => None,
            Layer::Bronze => Some(Layer::Staging),
            Layer::Silver => Some(Layer::Bronze),
            Layer::Golden => Some(Layer::Silver),
            Layer::Tabular => Some(Layer::Golden),
        }
    }

    /// Staging, bronze and silver only feed later stages; golden and tabular
    /// are the batch's output.
    pub fn is_intermediate(self) -> bool {
        matches!(self, Layer::Staging | Layer::Bronze | Layer::Silver)
    }

    pub fn parse(raw: &str) -> Option<Layer> {
        let raw = raw.trim().to_ascii_lowercase();
        let raw = raw.strip_suffix("_data").unwrap_or(&raw);
        Layer::ORDER.into_iter().find(|l| {
            let name = l.dir_name();
            name.strip_suffix("_data").unwrap_or(name) == raw
        })
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LakeEvent {
    Cleaned,
    StageCompleted(Layer),
    Purged(Layer),
}

/// Layer directories under one root, plus a log of what happened to them.
#[derive(Debug)]
pub struct DataLake {
    root: PathBuf,
    keep: BTreeSet<Layer>,
    events: Vec<LakeEvent>,
}

fn clear_dir(path: &Path) -> Result<(), LakeError> {
    let io_err = |source| LakeError::Io {
        path: path.to_path_buf(),
        source,
    };
    if path.exists() {
        fs::remove_dir_all(path).map_err(io_err)?;
    }
    fs::create_dir_all(path).map_err(io_err)
}

impl DataLake {
    pub fn new(root: impl Into<PathBuf>, keep: BTreeSet<Layer>) -> Self {
        Self {
            root: root.into(),
            keep,
            events: Vec::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, layer: Layer) -> PathBuf {
        self.root.join(layer.dir_name())
    }

    pub fn events(&self) -> &[LakeEvent] {
        &self.events
    }

    pub fn create(&self) -> Result<(), LakeError> {
        for layer in Layer::ORDER {
            let path = self.path(layer);
            fs::create_dir_all(&path).map_err(|source| LakeError::Io { path, source })?;
        }
        Ok(())
    }

    /// Empties every layer before a fresh batch.
    pub fn clean_older_files(&mut self) -> Result<(), LakeError> {
        for layer in Layer::ORDER {
            clear_dir(&self.path(layer))?;
        }
        self.events.push(LakeEvent::Cleaned);
        info!(root = %self.root.display(), "cleaned all data lake layers");
        Ok(())
    }

    /// Records a stage as finished and purges its input layer unless kept.
    /// Output layers (golden, tabular) are never purged.
    ///
    /// Pass `purge_input = false` when the stage finished with per-run
    /// failures, so their inputs stay available for inspection.
    pub fn stage_completed(&mut self, layer: Layer, purge_input: bool) -> Result<(), LakeError> {
        self.events.push(LakeEvent::StageCompleted(layer));
        debug!(%layer, "stage completed");
        let Some(input) = layer.input().filter(|l| l.is_intermediate()) else {
            return Ok(());
        };
        if self.keep.contains(&input) {
            debug!(layer = %input, "layer retained");
            return Ok(());
        }
        if !purge_input {
            info!(layer = %input, "stage had failures; layer retained");
            return Ok(());
        }
        clear_dir(&self.path(input))?;
        self.events.push(LakeEvent::Purged(input));
        info!(layer = %input, "purged layer");
        Ok(())
    }
}
