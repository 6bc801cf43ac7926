use ahash::AHashSet;
use std::fs;
use std::path::{Path, PathBuf};

use super::PlanError;

/// Record of combinations already emitted by earlier sweeps.
///
/// One line per combination: its `field_value` tokens, sorted and joined
/// with `|`. A combination is skippable only when its whole token set was
/// seen before; sharing a single token with an earlier run is not enough.
#[derive(Debug, Default)]
pub struct DedupCache {
    path: Option<PathBuf>,
    entries: AHashSet<String>,
    dirty: bool,
}

pub fn token(field: &str, value: f64) -> String {
    format!("{field}_{value}")
}

pub fn combination_key(tokens: &[String]) -> String {
    let mut sorted: Vec<&str> = tokens.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted.join("|")
}

impl DedupCache {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Loads the cache file if it exists; a missing file is an empty cache.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PlanError> {
        let path = path.as_ref().to_path_buf();
        let entries = match fs::read_to_string(&path) {
            Ok(text) => text
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => AHashSet::new(),
            Err(source) => return Err(PlanError::Cache { path, source }),
        };
        Ok(Self {
            path: Some(path),
            entries,
            dirty: false,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains(key)
    }

    /// Returns true when the key was new.
    pub fn record(&mut self, key: String) -> bool {
        let inserted = self.entries.insert(key);
        self.dirty |= inserted;
        inserted
    }

    pub fn flush(&mut self) -> Result<(), PlanError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if !self.dirty {
            return Ok(());
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| PlanError::Cache {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let mut lines: Vec<&str> = self.entries.iter().map(String::as_str).collect();
        lines.sort_unstable();
        let mut body = lines.join("\n");
        body.push('\n');
        fs::write(path, body).map_err(|source| PlanError::Cache {
            path: path.clone(),
            source,
        })?;
        self.dirty = false;
        Ok(())
    }
}
