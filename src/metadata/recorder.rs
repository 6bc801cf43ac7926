use arrow::array::{ArrayRef, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::MetadataError;
use super::schema::{ColumnType, MetadataRow, MetadataSchema, column_name};
use super::tabular::write_batch;
use crate::params::{ParameterSet, SectionName};
use crate::results::GridShape;

pub const METADATA_FILE: &str = "metadata.parquet";

/// Sections whose fields become metadata columns.
pub const FLATTENED_SECTIONS: [SectionName; 5] = [
    SectionName::Fluid,
    SectionName::InitialConditions,
    SectionName::BoundaryConditions,
    SectionName::Wells,
    SectionName::Schedule,
];

/// One completed run as seen by the recorder.
#[derive(Debug, Clone, Copy)]
pub struct RunMetadata<'a> {
    pub params: &'a ParameterSet,
    pub dimensions: GridShape,
    pub timesteps: usize,
}

/// Flattens the scalar fields of a run into `{section}__{field}` columns.
pub fn flatten(run: &RunMetadata<'_>) -> Result<MetadataRow, MetadataError> {
    let mut row = MetadataRow::new();
    row.insert(
        "content_id".into(),
        run.params
            .content_id()
            .map_or(Value::Null, |id| Value::String(id.to_string())),
    );
    row.insert("sim_id".into(), Value::from(run.params.sequence_number()));

    for section in FLATTENED_SECTIONS {
        let Some(map) = run.params.section_map(section)? else {
            continue;
        };
        for (field, value) in map {
            if value.is_object() || value.is_array() {
                continue;
            }
            row.insert(column_name(section, &field), value);
        }
    }

    let GridShape { ni, nj, nk } = run.dimensions;
    row.insert("dimension_x".into(), Value::from(ni));
    row.insert("dimension_y".into(), Value::from(nj));
    row.insert("dimension_z".into(), Value::from(nk));
    row.insert("timestamps".into(), Value::from(run.timesteps));
    Ok(row)
}

pub struct MetadataRecorder {
    schema: MetadataSchema,
}

impl Default for MetadataRecorder {
    fn default() -> Self {
        Self::new(MetadataSchema::standard())
    }
}

impl MetadataRecorder {
    pub fn new(schema: MetadataSchema) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &MetadataSchema {
        &self.schema
    }

    /// Flattens and validates the whole batch; any violation rejects all rows.
    pub fn rows(&self, runs: &[RunMetadata<'_>]) -> Result<Vec<MetadataRow>, MetadataError> {
        let rows = runs.iter().map(flatten).collect::<Result<Vec<_>, _>>()?;
        self.schema.validate(&rows)?;
        debug!(rows = rows.len(), "metadata rows validated");
        Ok(rows)
    }

    fn arrow_schema(&self) -> Arc<Schema> {
        let fields: Vec<Field> = self
            .schema
            .columns()
            .iter()
            .map(|c| {
                let ty = match c.ty {
                    ColumnType::Float => DataType::Float64,
                    ColumnType::Integer => DataType::Int64,
                    ColumnType::Text => DataType::Utf8,
                };
                Field::new(c.name.as_str(), ty, false)
            })
            .collect();
        Arc::new(Schema::new(fields))
    }

    /// Builds a record batch from rows that already passed validation.
    pub fn to_batch(&self, rows: &[MetadataRow]) -> Result<RecordBatch, MetadataError> {
        let columns: Vec<ArrayRef> = self
            .schema
            .columns()
            .iter()
            .map(|c| -> ArrayRef {
                let cells = rows.iter().map(|r| r.get(&c.name));
                match c.ty {
                    ColumnType::Float => Arc::new(Float64Array::from(
                        cells.map(|v| v.and_then(Value::as_f64)).collect::<Vec<_>>(),
                    )),
                    ColumnType::Integer => Arc::new(Int64Array::from(
                        cells
                            .map(|v| v.and_then(Value::as_f64).map(|n| n as i64))
                            .collect::<Vec<_>>(),
                    )),
                    ColumnType::Text => Arc::new(StringArray::from(
                        cells.map(|v| v.and_then(Value::as_str)).collect::<Vec<_>>(),
                    )),
                }
            })
            .collect();
        Ok(RecordBatch::try_new(self.arrow_schema(), columns)?)
    }

    /// Validates then writes `metadata.parquet` under `dir`.
    pub fn record(&self, dir: &Path, runs: &[RunMetadata<'_>]) -> Result<PathBuf, MetadataError> {
        let rows = self.rows(runs)?;
        let batch = self.to_batch(&rows)?;
        let path = dir.join(METADATA_FILE);
        write_batch(&path, &batch)?;
        info!(rows = rows.len(), path = %path.display(), "wrote run metadata");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::params::test_support::base_parameters;
    use crate::staging::ContentId;
    use arrow::array::Array;

    fn params(id: &str, seq: u32) -> ParameterSet {
        let mut p = base_parameters();
        p.sim_nums_mut().content_id = ContentId::parse(id);
        p.sim_nums_mut().sim_id = seq;
        p
    }

    fn run(p: &ParameterSet) -> RunMetadata<'_> {
        RunMetadata {
            params: p,
            dimensions: GridShape::new(4, 3, 2),
            timesteps: 20,
        }
    }

    #[test]
    fn flatten_names_columns_by_section_and_field() {
        let p = params("0a0b0c0d", 3);
        let row = flatten(&run(&p)).unwrap();
        assert_eq!(row["content_id"], "0a0b0c0d");
        assert_eq!(row["sim_id"], 3);
        assert_eq!(row["fluid__xnacl"], 0.1);
        assert_eq!(row["initial_conditions__sw_0"], 1.0);
        assert_eq!(row["boundary_conditions__type"], "pressure");
        assert_eq!(row["wells__co2_inj"], 1.5e9);
        assert_eq!(row["dimension_y"], 3);
        assert_eq!(row["timestamps"], 20);
        assert!(!row.contains_key("paths__root"));
    }

    #[test]
    fn batch_with_one_bad_row_writes_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let good = params("0a0b0c0d", 1);
        let mut bad = params("0a0b0c0e", 2);
        bad.initial_conditions.as_mut().unwrap().sw_0 = 1.5;
        bad.schedule.as_mut().unwrap().injection_timesteps = 2.5;

        let err = MetadataRecorder::default()
            .record(tmp.path(), &[run(&good), run(&bad)])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SchemaValidation);
        match err {
            MetadataError::SchemaValidation { columns, violations } => {
                assert_eq!(
                    columns,
                    vec!["initial_conditions__sw_0".to_string(), "schedule__injection_timesteps".to_string()]
                );
                assert!(violations.iter().all(|v| v.row == 1));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(!tmp.path().join(METADATA_FILE).exists());
    }

    #[test]
    fn valid_batch_becomes_one_row_per_run() {
        let tmp = tempfile::tempdir().unwrap();
        let a = params("0a0b0c0d", 1);
        let b = params("0a0b0c0e", 2);
        let recorder = MetadataRecorder::default();
        let rows = recorder.rows(&[run(&a), run(&b)]).unwrap();
        let batch = recorder.to_batch(&rows).unwrap();
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.num_columns(), recorder.schema().columns().len());
        let steps = batch
            .column_by_name("schedule__injection_timesteps")
            .unwrap()
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        assert_eq!(steps.value(1), 10);

        let path = recorder.record(tmp.path(), &[run(&a), run(&b)]).unwrap();
        assert!(path.is_file());
    }
}
