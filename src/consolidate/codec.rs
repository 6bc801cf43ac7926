use ndarray::{Array1, Array4, ArrayView4, Axis, ShapeBuilder, s};
use ndarray_npy::{NpzReader, NpzWriter, read_npy, write_npy};
use std::fs::File;
use std::path::Path;

use super::{ConsolidationError, Quantity};
use crate::staging::ContentId;

pub const SHAPE_ENTRY: &str = "shape.npy";

/// How golden tensors are persisted. The two formats do not read each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    /// Single Fortran-ordered `.npy` array.
    DenseBlob,
    /// Compressed `.npz` split along the time axis.
    ChunkedStore { chunk_timesteps: usize },
}

fn chunk_entry(n: usize) -> String {
    format!("chunk_{n}.npy")
}

fn open(path: &Path) -> Result<File, ConsolidationError> {
    File::open(path).map_err(|source| ConsolidationError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn create(path: &Path) -> Result<File, ConsolidationError> {
    File::create(path).map_err(|source| ConsolidationError::Io {
        path: path.to_path_buf(),
        source,
    })
}

impl Codec {
    pub fn extension(&self) -> &'static str {
        match self {
            Codec::DenseBlob => "npy",
            Codec::ChunkedStore { .. } => "npz",
        }
    }

    pub fn file_name(&self, quantity: Quantity, id: &ContentId) -> String {
        format!("{}_{}.{}", quantity.as_str(), id, self.extension())
    }

    pub fn encode(&self, path: &Path, tensor: &Array4<f64>) -> Result<(), ConsolidationError> {
        match *self {
            Codec::DenseBlob => write_npy(path, tensor).map_err(|source| ConsolidationError::WriteNpy {
                path: path.to_path_buf(),
                source,
            }),
            Codec::ChunkedStore { chunk_timesteps } => encode_chunked(path, tensor, chunk_timesteps.max(1)),
        }
    }

    pub fn decode(&self, path: &Path) -> Result<Array4<f64>, ConsolidationError> {
        match self {
            Codec::DenseBlob => read_npy(path).map_err(|source| ConsolidationError::ReadNpy {
                path: path.to_path_buf(),
                source,
            }),
            Codec::ChunkedStore { .. } => decode_chunked(path),
        }
    }
}

fn encode_chunked(path: &Path, tensor: &Array4<f64>, chunk: usize) -> Result<(), ConsolidationError> {
    let npz_err = |source| ConsolidationError::WriteNpz {
        path: path.to_path_buf(),
        source,
    };
    let mut npz = NpzWriter::new_compressed(create(path)?);
    let (ni, nj, nk, nt) = tensor.dim();
    let shape = Array1::from_vec(vec![ni as i64, nj as i64, nk as i64, nt as i64]);
    npz.add_array(SHAPE_ENTRY, &shape).map_err(npz_err)?;

    for (n, start) in (0..nt).step_by(chunk).enumerate() {
        let end = (start + chunk).min(nt);
        npz.add_array(chunk_entry(n), &tensor.slice(s![.., .., .., start..end]))
            .map_err(npz_err)?;
    }
    npz.finish().map_err(npz_err)?;
    Ok(())
}

fn decode_chunked(path: &Path) -> Result<Array4<f64>, ConsolidationError> {
    let npz_err = |source| ConsolidationError::ReadNpz {
        path: path.to_path_buf(),
        source,
    };
    let corrupt = |detail: String| ConsolidationError::CorruptStore {
        path: path.to_path_buf(),
        detail,
    };

    let mut npz = NpzReader::new(open(path)?).map_err(npz_err)?;
    let shape: Array1<i64> = npz.by_name(SHAPE_ENTRY).map_err(npz_err)?;
    let dims: Vec<usize> = shape
        .iter()
        .map(|&d| usize::try_from(d))
        .collect::<Result<_, _>>()
        .map_err(|_| corrupt(format!("negative extent in {shape}")))?;
    let [ni, nj, nk, nt] = dims[..] else {
        return Err(corrupt(format!("expected 4 extents, found {}", dims.len())));
    };

    let n_chunks = npz
        .names()
        .map_err(npz_err)?
        .iter()
        .filter(|name| name.starts_with("chunk_"))
        .count();
    let mut chunks: Vec<Array4<f64>> = Vec::with_capacity(n_chunks);
    for n in 0..n_chunks {
        chunks.push(npz.by_name(&chunk_entry(n)).map_err(npz_err)?);
    }

    let tensor = if chunks.is_empty() {
        Array4::from_elem((ni, nj, nk, 0).f(), f64::NAN)
    } else {
        let views: Vec<ArrayView4<f64>> = chunks.iter().map(|c| c.view()).collect();
        ndarray::concatenate(Axis(3), &views)?
    };
    if tensor.dim() != (ni, nj, nk, nt) {
        return Err(corrupt(format!(
            "chunks assemble to {:?}, header says {:?}",
            tensor.dim(),
            (ni, nj, nk, nt)
        )));
    }
    Ok(tensor)
}
