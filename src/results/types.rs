use serde::{Deserialize, Serialize};

use crate::staging::ContentId;

/// Grid extent along x, y and z.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridShape {
    pub ni: usize,
    pub nj: usize,
    pub nk: usize,
}

impl GridShape {
    pub fn new(ni: usize, nj: usize, nk: usize) -> Self {
        Self { ni, nj, nk }
    }

    pub fn total_cells(&self) -> usize {
        self.ni * self.nj * self.nk
    }

    pub fn is_valid(&self) -> bool {
        self.ni > 0 && self.nj > 0 && self.nk > 0
    }

    /// (i, j, k) of a flattened cell ordinal, x fastest.
    pub fn unravel(&self, cell: usize) -> (usize, usize, usize) {
        let i = cell % self.ni;
        let j = (cell / self.ni) % self.nj;
        let k = cell / (self.ni * self.nj);
        (i, j, k)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateMetadata {
    pub dimensions: GridShape,
    /// Sorted flattened ordinals of the active cells.
    pub active_cell_indices: Vec<usize>,
    pub total_cells: usize,
}

/// One timestep of sparse solver output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub pressure: Vec<f64>,
    /// Water and gas saturation per active cell.
    pub saturation: Vec<[f64; 2]>,
    pub metadata: StateMetadata,
}

/// Fully materialized solver output of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedRun {
    pub content_id: ContentId,
    pub case_name: String,
    pub states: Vec<StateSnapshot>,
}

impl ParsedRun {
    pub fn dimensions(&self) -> Option<GridShape> {
        self.states.first().map(|s| s.metadata.dimensions)
    }

    pub fn timesteps(&self) -> usize {
        self.states.len()
    }
}
