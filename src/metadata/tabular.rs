use arrow::array::{ArrayRef, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use ndarray::Array4;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use super::MetadataError;
use crate::consolidate::Quantity;
use crate::staging::ContentId;

pub fn long_format_file_name(quantity: Quantity) -> String {
    format!("{}_long.parquet", quantity.as_str())
}

fn writer_properties() -> WriterProperties {
    WriterProperties::builder()
        .set_created_by(concat!("co2sweep ", env!("CARGO_PKG_VERSION")).to_string())
        .build()
}

/// Writes one record batch as a standalone parquet file.
pub(crate) fn write_batch(path: &Path, batch: &RecordBatch) -> Result<(), MetadataError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| MetadataError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let file = File::create(path).map_err(|source| MetadataError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(writer_properties()))?;
    writer.write(batch)?;
    writer.close()?;
    Ok(())
}

fn long_format_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("content_id", DataType::Utf8, false),
        Field::new("timestep", DataType::Int64, false),
        Field::new("x", DataType::Int64, false),
        Field::new("y", DataType::Int64, false),
        Field::new("z", DataType::Int64, false),
        Field::new("value", DataType::Float64, false),
    ]))
}

/// Non-NaN cells of each run's tensor, one row per (timestep, cell).
pub fn long_format_batch(runs: &[(ContentId, Array4<f64>)]) -> Result<RecordBatch, MetadataError> {
    let mut ids = Vec::new();
    let mut steps = Vec::new();
    let (mut xs, mut ys, mut zs) = (Vec::new(), Vec::new(), Vec::new());
    let mut values = Vec::new();

    for (id, tensor) in runs {
        let (ni, nj, nk, nt) = tensor.dim();
        for t in 0..nt {
            for k in 0..nk {
                for j in 0..nj {
                    for i in 0..ni {
                        let v = tensor[[i, j, k, t]];
                        if v.is_nan() {
                            continue;
                        }
                        ids.push(id.as_str());
                        steps.push(t as i64);
                        xs.push(i as i64);
                        ys.push(j as i64);
                        zs.push(k as i64);
                        values.push(v);
                    }
                }
            }
        }
    }

    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from(ids)),
        Arc::new(Int64Array::from(steps)),
        Arc::new(Int64Array::from(xs)),
        Arc::new(Int64Array::from(ys)),
        Arc::new(Int64Array::from(zs)),
        Arc::new(Float64Array::from(values)),
    ];
    Ok(RecordBatch::try_new(long_format_schema(), columns)?)
}

pub fn write_long_format(
    dir: &Path,
    quantity: Quantity,
    runs: &[(ContentId, Array4<f64>)],
) -> Result<PathBuf, MetadataError> {
    let batch = long_format_batch(runs)?;
    let path = dir.join(long_format_file_name(quantity));
    write_batch(&path, &batch)?;
    info!(%quantity, rows = batch.num_rows(), path = %path.display(), "wrote long-format table");
    Ok(path)
}
