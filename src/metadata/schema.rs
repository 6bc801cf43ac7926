use serde_json::Value;
use std::collections::BTreeMap;

use super::{MetadataError, Violation};
use crate::params::{SectionName, limited_fields};
use crate::staging::ContentId;

/// One flattened run, keyed by column name.
pub type MetadataRow = BTreeMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Float,
    Integer,
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Check {
    /// Inclusive on both ends.
    Range { min: f64, max: f64 },
    Positive,
    NonEmpty,
    ContentId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    pub name: String,
    pub ty: ColumnType,
    pub check: Check,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, ty: ColumnType, check: Check) -> Self {
        Self {
            name: name.into(),
            ty,
            check,
        }
    }

    /// Why `value` does not fit this column, if it does not.
    pub fn check_value(&self, value: Option<&Value>) -> Option<String> {
        let value = match value {
            None | Some(Value::Null) => return Some("missing".into()),
            Some(v) => v,
        };
        match self.ty {
            ColumnType::Text => {
                let Some(text) = value.as_str() else {
                    return Some(format!("expected text, found {value}"));
                };
                match self.check {
                    Check::NonEmpty if text.trim().is_empty() => Some("empty".into()),
                    Check::ContentId if ContentId::parse(text).is_none() => {
                        Some(format!("{text:?} is not a content id"))
                    }
                    _ => None,
                }
            }
            ColumnType::Float | ColumnType::Integer => {
                let Some(number) = value.as_f64() else {
                    return Some(format!("expected a number, found {value}"));
                };
                if self.ty == ColumnType::Integer && number.fract() != 0.0 {
                    return Some(format!("expected an integer, found {number}"));
                }
                match self.check {
                    Check::Range { min, max } if !(min..=max).contains(&number) => {
                        Some(format!("{number} outside [{min}, {max}]"))
                    }
                    Check::Positive if number <= 0.0 => Some(format!("{number} is not positive")),
                    _ => None,
                }
            }
        }
    }
}

pub fn column_name(section: SectionName, field: &str) -> String {
    format!("{}__{}", section.column_prefix(), crate::params::column_token(field))
}

/// Fixed column set every metadata row must satisfy.
#[derive(Debug, Clone)]
pub struct MetadataSchema {
    columns: Vec<ColumnSpec>,
}

impl MetadataSchema {
    pub fn standard() -> Self {
        use ColumnType::*;
        let mut columns = vec![
            ColumnSpec::new("content_id", Text, Check::ContentId),
            ColumnSpec::new("sim_id", Integer, Check::Positive),
        ];
        for (field, limits) in limited_fields() {
            columns.push(ColumnSpec::new(
                column_name(SectionName::Fluid, field),
                Float,
                Check::Range {
                    min: limits.min,
                    max: limits.max,
                },
            ));
        }
        columns.extend([
            ColumnSpec::new(
                column_name(SectionName::InitialConditions, "sw_0"),
                Float,
                Check::Range { min: 0.0, max: 1.0 },
            ),
            ColumnSpec::new(column_name(SectionName::BoundaryConditions, "type"), Text, Check::NonEmpty),
            ColumnSpec::new(column_name(SectionName::Wells, "CO2_inj"), Float, Check::Positive),
        ]);
        for field in ["injection_time", "migration_time", "injection_timesteps", "migration_timesteps"] {
            columns.push(ColumnSpec::new(column_name(SectionName::Schedule, field), Integer, Check::Positive));
        }
        for name in ["dimension_x", "dimension_y", "dimension_z", "timestamps"] {
            columns.push(ColumnSpec::new(name, Integer, Check::Positive));
        }
        Self { columns }
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    /// Checks every row; all violations are collected before failing.
    pub fn validate(&self, rows: &[MetadataRow]) -> Result<(), MetadataError> {
        let mut violations = Vec::new();
        for (row_idx, row) in rows.iter().enumerate() {
            for spec in &self.columns {
                if let Some(reason) = spec.check_value(row.get(&spec.name)) {
                    violations.push(Violation {
                        row: row_idx,
                        column: spec.name.clone(),
                        reason,
                    });
                }
            }
        }
        if violations.is_empty() {
            return Ok(());
        }
        let mut columns: Vec<String> = violations.iter().map(|v| v.column.clone()).collect();
        columns.sort();
        columns.dedup();
        Err(MetadataError::SchemaValidation { columns, violations })
    }
}
