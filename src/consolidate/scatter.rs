use ndarray::{Array4, ShapeBuilder};
use tracing::debug;

use super::{ConsolidationError, Quantity};
use crate::results::{GridShape, StateSnapshot};

const F64_BYTES: u64 = std::mem::size_of::<f64>() as u64;

/// Dense (ni, nj, nk, T) arrays, one per quantity, NaN at inactive cells.
#[derive(Debug, Clone)]
pub struct ConsolidatedTensors {
    pub pressure: Array4<f64>,
    pub water_saturation: Array4<f64>,
    pub gas_saturation: Array4<f64>,
}

impl ConsolidatedTensors {
    pub fn get(&self, quantity: Quantity) -> &Array4<f64> {
        match quantity {
            Quantity::Pressure => &self.pressure,
            Quantity::WaterSaturation => &self.water_saturation,
            Quantity::GasSaturation => &self.gas_saturation,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Quantity, &Array4<f64>)> {
        Quantity::ALL.into_iter().map(move |q| (q, self.get(q)))
    }

    pub fn timesteps(&self) -> usize {
        self.pressure.dim().3
    }
}

/// Memory needed for the three dense buffers.
pub fn required_bytes(dims: GridShape, timesteps: usize) -> u64 {
    3 * dims.total_cells() as u64 * timesteps as u64 * F64_BYTES
}

/// Scatters sparse per-timestep states into dense tensors.
///
/// Buffers are laid out cell-fastest so that the final (ni, nj, nk, T) view
/// is column-major, matching the grid's own x-fastest cell numbering.
pub fn consolidate(states: &[StateSnapshot], budget_bytes: Option<u64>) -> Result<ConsolidatedTensors, ConsolidationError> {
    let first = states.first().ok_or(ConsolidationError::NoTimesteps)?;
    let dims = first.metadata.dimensions;
    if !dims.is_valid() {
        return Err(ConsolidationError::InvalidDimensions { dims });
    }
    let ncells = dims.total_cells();
    let steps = states.len();

    if let Some(budget) = budget_bytes {
        let required = required_bytes(dims, steps);
        if required > budget {
            return Err(ConsolidationError::OverBudget {
                required_bytes: required,
                budget_bytes: budget,
            });
        }
    }

    let mut pressure = vec![f64::NAN; ncells * steps];
    let mut water = vec![f64::NAN; ncells * steps];
    let mut gas = vec![f64::NAN; ncells * steps];

    for (t, state) in states.iter().enumerate() {
        let meta = &state.metadata;
        if meta.dimensions != dims {
            return Err(ConsolidationError::DimensionMismatch {
                timestep: t,
                expected: dims,
                found: meta.dimensions,
            });
        }
        let active = meta.active_cell_indices.len();
        if state.pressure.len() != active || state.saturation.len() != active {
            return Err(ConsolidationError::SizeMismatch {
                timestep: t,
                pressure: state.pressure.len(),
                saturation: state.saturation.len(),
                active,
            });
        }

        let column = t * ncells;
        for (n, &cell) in meta.active_cell_indices.iter().enumerate() {
            if cell >= ncells {
                return Err(ConsolidationError::IndexOutOfRange {
                    timestep: t,
                    index: cell,
                    total: ncells,
                });
            }
            let [sw, sg] = state.saturation[n];
            pressure[column + cell] = state.pressure[n];
            water[column + cell] = sw;
            gas[column + cell] = sg;
        }
    }

    let shape = (dims.ni, dims.nj, dims.nk, steps).f();
    let tensors = ConsolidatedTensors {
        pressure: Array4::from_shape_vec(shape.clone(), pressure)?,
        water_saturation: Array4::from_shape_vec(shape.clone(), water)?,
        gas_saturation: Array4::from_shape_vec(shape, gas)?,
    };
    debug!(?dims, timesteps = steps, "consolidated tensors");
    Ok(tensors)
}

/// Values of `tensor` at the given flattened cells for timestep `t`.
pub fn gather_active(tensor: &Array4<f64>, indices: &[usize], t: usize) -> Vec<f64> {
    let (ni, nj, nk, _) = tensor.dim();
    let dims = GridShape::new(ni, nj, nk);
    indices
        .iter()
        .map(|&cell| {
            let (i, j, k) = dims.unravel(cell);
            tensor[[i, j, k, t]]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::StateMetadata;

    fn state(dims: GridShape, active: Vec<usize>, pressure: Vec<f64>, saturation: Vec<[f64; 2]>) -> StateSnapshot {
        StateSnapshot {
            pressure,
            saturation,
            metadata: StateMetadata {
                dimensions: dims,
                active_cell_indices: active,
                total_cells: dims.total_cells(),
            },
        }
    }

    #[test]
    fn scatters_into_column_major_grid() {
        let dims = GridShape::new(2, 2, 1);
        let states = [state(dims, vec![0, 2], vec![100.0, 200.0], vec![[0.1, 0.9], [0.2, 0.8]])];
        let out = consolidate(&states, None).unwrap();

        assert_eq!(out.pressure.dim(), (2, 2, 1, 1));
        assert_eq!(out.pressure[[0, 0, 0, 0]], 100.0);
        // flattened cell 2 is i=0, j=1
        assert_eq!(out.pressure[[0, 1, 0, 0]], 200.0);
        assert!(out.pressure[[1, 0, 0, 0]].is_nan());
        assert!(out.pressure[[1, 1, 0, 0]].is_nan());
        assert_eq!(out.water_saturation[[0, 1, 0, 0]], 0.2);
        assert_eq!(out.gas_saturation[[0, 0, 0, 0]], 0.9);

        let flat: Vec<f64> = out.pressure.t().iter().copied().collect();
        assert_eq!(flat[0], 100.0);
        assert_eq!(flat[2], 200.0);
    }

    #[test]
    fn timesteps_fill_separate_columns() {
        let dims = GridShape::new(1, 1, 2);
        let states = [
            state(dims, vec![1], vec![5.0], vec![[1.0, 0.0]]),
            state(dims, vec![0, 1], vec![6.0, 7.0], vec![[0.5, 0.5], [0.4, 0.6]]),
        ];
        let out = consolidate(&states, None).unwrap();
        assert_eq!(out.timesteps(), 2);
        assert!(out.pressure[[0, 0, 0, 0]].is_nan());
        assert_eq!(out.pressure[[0, 0, 1, 0]], 5.0);
        assert_eq!(out.pressure[[0, 0, 0, 1]], 6.0);
        assert_eq!(gather_active(&out.pressure, &[0, 1], 1), vec![6.0, 7.0]);
    }

    #[test]
    fn size_mismatch_is_rechecked() {
        let dims = GridShape::new(2, 1, 1);
        let states = [state(dims, vec![0, 1], vec![1.0], vec![[0.1, 0.9], [0.2, 0.8]])];
        assert!(matches!(
            consolidate(&states, None),
            Err(ConsolidationError::SizeMismatch { timestep: 0, .. })
        ));
    }

    #[test]
    fn empty_and_degenerate_inputs_fail() {
        assert!(matches!(consolidate(&[], None), Err(ConsolidationError::NoTimesteps)));
        let states = [state(GridShape::new(0, 1, 1), vec![], vec![], vec![])];
        assert!(matches!(
            consolidate(&states, None),
            Err(ConsolidationError::InvalidDimensions { .. })
        ));
    }

    #[test]
    fn budget_rejects_oversized_grids() {
        let dims = GridShape::new(10, 10, 10);
        let states = [state(dims, vec![], vec![], vec![])];
        assert_eq!(required_bytes(dims, 1), 24_000);
        assert!(matches!(
            consolidate(&states, Some(1_000)),
            Err(ConsolidationError::OverBudget { .. })
        ));
        assert!(consolidate(&states, Some(24_000)).is_ok());
    }
}
