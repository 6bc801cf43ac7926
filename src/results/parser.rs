use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::ParseError;
use super::types::{GridShape, ParsedRun, StateMetadata, StateSnapshot};
use crate::staging::ContentId;

#[derive(Deserialize)]
#[serde(untagged)]
enum MaskCell {
    Flag(bool),
    Number(f64),
}

impl MaskCell {
    fn is_active(&self) -> bool {
        match self {
            MaskCell::Flag(b) => *b,
            MaskCell::Number(v) => *v != 0.0,
        }
    }
}

#[derive(Deserialize)]
struct RawState {
    pressure: Vec<f64>,
    #[serde(rename = "s")]
    saturation: Vec<[f64; 2]>,
}

pub fn grid_file_names(case: &str, id: &ContentId) -> [String; 2] {
    [format!("g_{case}_{id}.json"), format!("g_{case}.json")]
}

pub fn mask_file_name(case: &str, id: &ContentId) -> String {
    format!("grdecl_{case}_{id}.json")
}

pub fn states_file_name(case: &str, id: &ContentId) -> String {
    format!("states_{case}_{id}.json")
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ParseError> {
    let file = File::open(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            ParseError::MissingResultsFile { path: path.to_path_buf() }
        } else {
            ParseError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;
    serde_json::from_reader(BufReader::new(file)).map_err(|source| ParseError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Reads one run's solver output from the bronze layer.
pub struct ResultsParser {
    bronze: PathBuf,
}

impl ResultsParser {
    pub fn new(bronze: impl Into<PathBuf>) -> Self {
        Self { bronze: bronze.into() }
    }

    fn grid_shape(&self, case: &str, id: &ContentId) -> Result<GridShape, ParseError> {
        let [own, shared] = grid_file_names(case, id);
        let own = self.bronze.join(own);
        let path = if own.is_file() { own } else { self.bronze.join(shared) };
        let raw: Vec<i64> = read_json(&path)?;
        match raw.as_slice() {
            [ni, nj, nk] if *ni > 0 && *nj > 0 && *nk > 0 => {
                Ok(GridShape::new(*ni as usize, *nj as usize, *nk as usize))
            }
            _ => Err(ParseError::InvalidGrid { path, values: raw }),
        }
    }

    fn active_cells(&self, case: &str, id: &ContentId) -> Result<Vec<usize>, ParseError> {
        let mask: Vec<MaskCell> = read_json(&self.bronze.join(mask_file_name(case, id)))?;
        Ok(mask
            .iter()
            .enumerate()
            .filter(|(_, cell)| cell.is_active())
            .map(|(idx, _)| idx)
            .collect())
    }

    pub fn parse(&self, case: &str, id: &ContentId) -> Result<ParsedRun, ParseError> {
        let dims = self.grid_shape(case, id)?;
        let active = self.active_cells(case, id)?;
        let raw: Vec<RawState> = read_json(&self.bronze.join(states_file_name(case, id)))?;
        debug!(content_id = %id, ?dims, active = active.len(), timesteps = raw.len(), "read solver output");

        // every step must line up with the full mask before any clamping
        for (timestep, step) in raw.iter().enumerate() {
            if step.pressure.len() != active.len() || step.saturation.len() != active.len() {
                return Err(ParseError::DataConsistency {
                    content_id: id.clone(),
                    timestep,
                    pressure: step.pressure.len(),
                    saturation: step.saturation.len(),
                    active: active.len(),
                });
            }
        }

        let total = dims.total_cells();
        let keep = active.partition_point(|&idx| idx < total);
        if keep < active.len() {
            warn!(
                content_id = %id,
                dropped = active.len() - keep,
                total_cells = total,
                "active cells beyond grid extent dropped"
            );
        }
        let metadata = StateMetadata {
            dimensions: dims,
            active_cell_indices: active[..keep].to_vec(),
            total_cells: total,
        };

        let states = raw
            .into_iter()
            .map(|mut step| {
                step.pressure.truncate(keep);
                step.saturation.truncate(keep);
                StateSnapshot {
                    pressure: step.pressure,
                    saturation: step.saturation,
                    metadata: metadata.clone(),
                }
            })
            .collect::<Vec<_>>();

        info!(content_id = %id, timesteps = states.len(), "parsed run");
        Ok(ParsedRun {
            content_id: id.clone(),
            case_name: case.to_string(),
            states,
        })
    }
}
