//! TOML configuration: the per-study setup file and the pipeline file.

use serde::Deserialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::consolidate::{Codec, Quantity};
use crate::error::ErrorKind;
use crate::lake::Layer;
use crate::params::{ParameterSet, SectionName, VariationConfig};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration in {}", .path.display())]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("setup is missing required sections {sections:?}")]
    MissingSections { sections: Vec<SectionName> },

    #[error("setup section {section} must be a table")]
    NotATable { section: SectionName },

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl ConfigError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConfigError::MissingSections { .. } => ErrorKind::MissingSection,
            _ => ErrorKind::Configuration,
        }
    }
}

fn read(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Loads a setup file; every known section must be present.
pub fn load_setup(path: &Path) -> Result<ParameterSet, ConfigError> {
    parse_setup(&read(path)?, path)
}

pub fn parse_setup(text: &str, origin: &Path) -> Result<ParameterSet, ConfigError> {
    let toml_err = |source| ConfigError::Toml {
        path: origin.to_path_buf(),
        source,
    };
    let table: toml::Table = toml::from_str(text).map_err(toml_err)?;

    let mut missing = Vec::new();
    for section in SectionName::ALL {
        match table.get(section.as_str()) {
            None => missing.push(section),
            Some(toml::Value::Table(_)) => {}
            Some(_) => return Err(ConfigError::NotATable { section }),
        }
    }
    if !missing.is_empty() {
        return Err(ConfigError::MissingSections { sections: missing });
    }
    for key in table.keys() {
        if !SectionName::ALL.iter().any(|s| s.as_str() == key) {
            warn!(section = %key, "ignoring unknown setup section");
        }
    }

    toml::Value::Table(table).try_into().map_err(toml_err)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SweepConfig {
    #[serde(default = "default_sweep_section")]
    pub section: String,
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default)]
    pub delta: f64,
    #[serde(default = "default_max_points")]
    pub max_points: usize,
    #[serde(default)]
    pub dedup_cache: Option<PathBuf>,
    /// Section hashed into the content id; defaults to the swept section.
    #[serde(default)]
    pub hash_section: Option<String>,
}

fn default_sweep_section() -> String {
    SectionName::Fluid.as_str().to_string()
}

fn default_max_points() -> usize {
    VariationConfig::default().max_points
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodecName {
    #[default]
    DenseBlob,
    ChunkedStore,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineSection {
    pub data_lake_root: PathBuf,
    pub layers_to_keep: Vec<Layer>,
    pub clean_older_files: bool,
    pub codec: CodecName,
    pub chunk_timesteps: usize,
    pub num_threads: Option<usize>,
    pub solver_deadline_secs: Option<u64>,
    pub status_db: PathBuf,
    pub max_tensor_mb: Option<u64>,
    pub long_format_quantity: Option<Quantity>,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            data_lake_root: PathBuf::from("data_lake"),
            layers_to_keep: Vec::new(),
            clean_older_files: false,
            codec: CodecName::DenseBlob,
            chunk_timesteps: 16,
            num_threads: None,
            solver_deadline_secs: None,
            status_db: PathBuf::from("status.sqlite"),
            max_tensor_mb: None,
            long_format_quantity: Some(Quantity::GasSaturation),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SolverConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UploadConfig {
    pub root: PathBuf,
}

/// Contents of the pipeline file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    pub sweep: SweepConfig,
    #[serde(default)]
    pub pipeline: PipelineSection,
    pub solver: SolverConfig,
    #[serde(default)]
    pub upload: Option<UploadConfig>,
}

fn section_named(key: &'static str, raw: &str) -> Result<SectionName, ConfigError> {
    SectionName::parse(raw).ok_or_else(|| ConfigError::Invalid {
        key,
        reason: format!("unknown section {raw:?}"),
    })
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::parse(&read(path)?, path)
    }

    pub fn parse(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        let cfg: PipelineConfig = toml::from_str(text).map_err(|source| ConfigError::Toml {
            path: origin.to_path_buf(),
            source,
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.sweep.delta) {
            return Err(ConfigError::Invalid {
                key: "sweep.delta",
                reason: format!("{} is outside [0, 1]", self.sweep.delta),
            });
        }
        if self.sweep.max_points < 2 {
            return Err(ConfigError::Invalid {
                key: "sweep.max_points",
                reason: "at least two points are needed to span a range".into(),
            });
        }
        self.sweep_section()?;
        self.hash_section()?;
        if self.pipeline.codec == CodecName::ChunkedStore && self.pipeline.chunk_timesteps == 0 {
            return Err(ConfigError::Invalid {
                key: "pipeline.chunk_timesteps",
                reason: "must be positive".into(),
            });
        }
        if self.pipeline.solver_deadline_secs == Some(0) {
            return Err(ConfigError::Invalid {
                key: "pipeline.solver_deadline_secs",
                reason: "must be positive".into(),
            });
        }
        if self.solver.program.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "solver.program",
                reason: "empty".into(),
            });
        }
        Ok(())
    }

    pub fn sweep_section(&self) -> Result<SectionName, ConfigError> {
        section_named("sweep.section", &self.sweep.section)
    }

    pub fn hash_section(&self) -> Result<SectionName, ConfigError> {
        match &self.sweep.hash_section {
            Some(raw) => section_named("sweep.hash_section", raw),
            None => self.sweep_section(),
        }
    }

    pub fn variation(&self) -> VariationConfig {
        VariationConfig {
            max_points: self.sweep.max_points,
            ..VariationConfig::default()
        }
    }

    pub fn codec(&self) -> Codec {
        match self.pipeline.codec {
            CodecName::DenseBlob => Codec::DenseBlob,
            CodecName::ChunkedStore => Codec::ChunkedStore {
                chunk_timesteps: self.pipeline.chunk_timesteps,
            },
        }
    }

    pub fn layers_to_keep(&self) -> BTreeSet<Layer> {
        self.pipeline.layers_to_keep.iter().copied().collect()
    }

    pub fn max_tensor_bytes(&self) -> Option<u64> {
        self.pipeline.max_tensor_mb.map(|mb| mb.saturating_mul(1024 * 1024))
    }

    pub fn solver_deadline(&self) -> Option<Duration> {
        self.pipeline.solver_deadline_secs.map(Duration::from_secs)
    }
}
