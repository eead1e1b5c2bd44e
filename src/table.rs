//! Experiment tables: ordered records of sequence, structure and reactivity.

use crate::error::{ErrorCode, ProcessingError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

pub const RUN_SUMMARY_PATH: &str = "analysis/summary.json";

/// One measured construct or replicate.
///
/// `structure` and `data` are optional; when present they are index-aligned
/// with `sequence`. Every other column is kept in `extra` untouched.
///
/// A `structure` or `data` column that is present but `null` is kept in
/// `extra` so it survives a load/save round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct ExperimentRecord {
    pub sequence: String,
    pub structure: Option<String>,
    pub data: Option<Vec<f64>>,
    pub extra: Map<String, Value>,
}

impl TryFrom<Map<String, Value>> for ExperimentRecord {
    type Error = String;

    fn try_from(mut row: Map<String, Value>) -> std::result::Result<Self, Self::Error> {
        let sequence = match row.remove("sequence") {
            Some(Value::String(s)) => s,
            Some(other) => return Err(format!("'sequence' must be a string, got {other}")),
            None => return Err("missing field 'sequence'".to_string()),
        };
        let structure = match row.remove("structure") {
            None => None,
            Some(Value::Null) => {
                row.insert("structure".to_string(), Value::Null);
                None
            }
            Some(Value::String(s)) => Some(s),
            Some(other) => return Err(format!("'structure' must be a string, got {other}")),
        };
        let data = match row.remove("data") {
            None => None,
            Some(Value::Null) => {
                row.insert("data".to_string(), Value::Null);
                None
            }
            Some(value) => Some(
                serde_json::from_value::<Vec<f64>>(value)
                    .map_err(|e| format!("'data' must be an array of numbers: {e}"))?,
            ),
        };
        Ok(Self {
            sequence,
            structure,
            data,
            extra: row,
        })
    }
}

impl From<ExperimentRecord> for Map<String, Value> {
    fn from(record: ExperimentRecord) -> Self {
        let mut row = Map::new();
        row.insert("sequence".to_string(), Value::String(record.sequence));
        if let Some(structure) = record.structure {
            row.insert("structure".to_string(), Value::String(structure));
        }
        if let Some(data) = record.data {
            row.insert("data".to_string(), Value::from(data));
        }
        for (key, value) in record.extra {
            if !row.contains_key(&key) {
                row.insert(key, value);
            }
        }
        row
    }
}

impl ExperimentRecord {
    pub fn new(sequence: &str) -> Self {
        Self {
            sequence: sequence.to_string(),
            structure: None,
            data: None,
            extra: Map::new(),
        }
    }

    pub fn with_structure(mut self, structure: &str) -> Self {
        self.structure = Some(structure.to_string());
        self
    }

    pub fn with_data(mut self, data: Vec<f64>) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_column(mut self, name: &str, value: Value) -> Self {
        self.extra.insert(name.to_string(), value);
        self
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    /// Checks the co-indexing invariant of the fields present.
    pub fn validate(&self) -> Result<()> {
        if !self.sequence.is_ascii() {
            return Err(ProcessingError::invalid_input(
                "sequence contains non-ASCII symbols",
            ));
        }
        let len = self.sequence.len();
        if let Some(structure) = &self.structure {
            if !structure.is_ascii() {
                return Err(ProcessingError::invalid_input(
                    "structure contains non-ASCII symbols",
                ));
            }
            if structure.len() != len {
                return Err(ProcessingError::invalid_input(format!(
                    "structure length {} does not match sequence length {len}",
                    structure.len()
                )));
            }
        }
        if let Some(data) = &self.data {
            if data.len() != len {
                return Err(ProcessingError::invalid_input(format!(
                    "data length {} does not match sequence length {len}",
                    data.len()
                )));
            }
        }
        Ok(())
    }

    pub fn require_structure(&self) -> Result<&str> {
        self.structure
            .as_deref()
            .ok_or_else(|| ProcessingError::invalid_input("missing 'structure' field"))
    }

    pub fn require_data(&self) -> Result<&[f64]> {
        self.data
            .as_deref()
            .ok_or_else(|| ProcessingError::invalid_input("missing 'data' field"))
    }
}

/// An ordered collection of records, serialized as a JSON array of objects.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExperimentTable {
    records: Vec<ExperimentRecord>,
}

impl ExperimentTable {
    pub fn new(records: Vec<ExperimentRecord>) -> Self {
        Self { records }
    }

    #[inline(always)]
    pub fn records(&self) -> &[ExperimentRecord] {
        &self.records
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExperimentRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_records(self) -> Vec<ExperimentRecord> {
        self.records
    }

    /// Validates every row, reporting the first offending row.
    pub fn validate(&self) -> Result<()> {
        for (row, record) in self.records.iter().enumerate() {
            record.validate().map_err(|e| e.at_row(row))?;
        }
        Ok(())
    }

    pub fn concat(tables: impl IntoIterator<Item = ExperimentTable>) -> Self {
        Self {
            records: tables.into_iter().flat_map(|t| t.records).collect(),
        }
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load_from_path(path: &str) -> Result<Self> {
        if !Path::new(path).exists() {
            return Err(ProcessingError::new(
                ErrorCode::NotFound,
                format!("File {path} does not exist"),
            ));
        }
        let text = std::fs::read_to_string(path).map_err(|e| ProcessingError {
            code: ErrorCode::Io,
            message: format!("Could not read table '{path}': {e}"),
        })?;
        Self::from_json(&text).map_err(|e| ProcessingError {
            code: ErrorCode::InvalidInput,
            message: format!("Could not parse table JSON '{path}': {}", e.message),
        })
    }

    pub fn save_to_path(&self, path: &str) -> Result<()> {
        let text = serde_json::to_string_pretty(self).map_err(|e| ProcessingError {
            code: ErrorCode::Internal,
            message: format!("Could not serialize table: {e}"),
        })?;
        std::fs::write(path, text).map_err(|e| ProcessingError {
            code: ErrorCode::Io,
            message: format!("Could not write table '{path}': {e}"),
        })
    }

    /// Loads `<path>/<run>/analysis/summary.json` for every run and
    /// concatenates them in the given order.
    pub fn load_runs(path: &str, sets: &[String]) -> Result<Self> {
        let mut tables = Vec::with_capacity(sets.len());
        for run_name in sets {
            let full_path = Path::new(path).join(run_name).join(RUN_SUMMARY_PATH);
            let full_path = full_path.to_string_lossy().to_string();
            tables.push(Self::load_from_path(&full_path)?);
        }
        let table = Self::concat(tables);
        log::info!("loaded {} records from {} runs", table.len(), sets.len());
        Ok(table)
    }
}

impl From<Vec<ExperimentRecord>> for ExperimentTable {
    fn from(records: Vec<ExperimentRecord>) -> Self {
        Self::new(records)
    }
}
