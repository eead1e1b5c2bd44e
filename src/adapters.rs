//! Catalog of known 5' adapter sequences and common-adapter detection.

use crate::error::{ErrorCode, ProcessingError, Result};
use crate::sequence::{has_5p_sequence, to_rna};
use crate::table::ExperimentTable;
use crate::trim::trim;
use anyhow::anyhow;
use csv::ReaderBuilder;
use serde::{Deserialize, Serialize};
use std::fs;

const RUNTIME_P5_PATH: &str = "data/resources/p5_sequences.csv";
const BUILTIN_P5_CSV: &str = include_str!("../assets/p5_sequences.csv");

pub const DEFAULT_P3_LENGTH: usize = 20;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterEntry {
    pub name: String,
    #[serde(default)]
    pub code: String,
    pub sequence: String,
}

/// Adapters in catalog order. Order matters: detection keeps the last match.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdapterCatalog {
    entries: Vec<AdapterEntry>,
}

impl AdapterCatalog {
    pub fn from_csv_text(csv_text: &str) -> anyhow::Result<Self> {
        let mut rdr = ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(csv_text.as_bytes());
        let mut entries = Vec::new();
        for (line, row) in rdr.deserialize::<AdapterEntry>().enumerate() {
            let entry = row.map_err(|e| anyhow!("Bad adapter row {}: {e}", line + 1))?;
            if entry.sequence.is_empty() {
                return Err(anyhow!("Adapter '{}' has an empty sequence", entry.name));
            }
            entries.push(entry);
        }
        Ok(Self { entries })
    }

    pub fn load_from_path(path: &str) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_csv_text(&text)
    }

    /// Builds a catalog from bare sequences, keeping their order.
    pub fn from_sequences<S: AsRef<str>>(sequences: &[S]) -> Self {
        let entries = sequences
            .iter()
            .enumerate()
            .map(|(i, s)| AdapterEntry {
                name: format!("p5_{}", i + 1),
                code: String::new(),
                sequence: s.as_ref().to_string(),
            })
            .collect();
        Self { entries }
    }

    pub fn builtin() -> Self {
        Self::from_csv_text(BUILTIN_P5_CSV).unwrap_or_else(|e| {
            log::warn!("bundled adapter catalog is unreadable: {e}");
            Self { entries: vec![] }
        })
    }

    pub fn entries(&self) -> &[AdapterEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_rna(&self) -> Self {
        let entries = self
            .entries
            .iter()
            .map(|e| AdapterEntry {
                sequence: to_rna(&e.sequence),
                ..e.clone()
            })
            .collect();
        Self { entries }
    }

    /// The last catalog adapter that prefixes every sequence of `table`.
    pub fn detect_common_p5(&self, table: &ExperimentTable) -> Result<&AdapterEntry> {
        let mut common = None;
        for entry in &self.entries {
            if has_5p_sequence(table, &entry.sequence) {
                common = Some(entry);
            }
        }
        let entry = common.ok_or_else(|| {
            ProcessingError::new(ErrorCode::AdapterNotFound, "No common p5 sequence found")
        })?;
        log::debug!("common p5 sequence: {} ({})", entry.sequence, entry.name);
        Ok(entry)
    }
}

impl Default for AdapterCatalog {
    fn default() -> Self {
        if let Ok(custom) = Self::load_from_path(RUNTIME_P5_PATH) {
            if !custom.is_empty() {
                return custom;
            }
        }
        Self::builtin()
    }
}

/// Trims the detected common 5' adapter and `p3_length` 3' positions.
///
/// With `is_rna` the catalog is converted to RNA before comparison.
pub fn trim_p5_and_p3(
    table: &ExperimentTable,
    catalog: &AdapterCatalog,
    is_rna: bool,
    p3_length: usize,
) -> Result<ExperimentTable> {
    let catalog = if is_rna {
        catalog.to_rna()
    } else {
        catalog.clone()
    };
    let p5 = catalog.detect_common_p5(table)?;
    trim(table, p5.sequence.len(), p3_length)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::ExperimentRecord;

    #[test]
    fn test_builtin_catalog() {
        let catalog = AdapterCatalog::builtin();
        assert!(!catalog.is_empty());
        assert!(catalog.entries().iter().any(|e| e.sequence == "GGAAGATCGAGTAGATCAAA"));
    }

    #[test]
    fn test_builtin_catalog_needs_full_adapter() {
        let catalog = AdapterCatalog::builtin().to_rna();
        let table = ExperimentTable::new(vec![
            ExperimentRecord::new("GGAACUUCGGUUCC"),
            ExperimentRecord::new("GGAAACGCCGCAAG"),
        ]);
        let err = catalog.detect_common_p5(&table).unwrap_err();
        assert_eq!(err.code, ErrorCode::AdapterNotFound);

        let table = ExperimentTable::new(vec![ExperimentRecord::new("GGAAGAUCGAGUAGAUCAAACUUCGG")]);
        assert_eq!(catalog.detect_common_p5(&table).unwrap().sequence, "GGAAGAUCGAGUAGAUCAAA");
    }

    #[test]
    fn test_last_match_wins() {
        let catalog = AdapterCatalog::from_sequences(&["GG", "GGAA"]);
        let table = ExperimentTable::new(vec![
            ExperimentRecord::new("GGAACUUG"),
            ExperimentRecord::new("GGAAUUCG"),
        ]);
        let entry = catalog.detect_common_p5(&table).unwrap();
        assert_eq!(entry.sequence, "GGAA");
        assert_eq!(entry.sequence.len(), 4);

        let reversed = AdapterCatalog::from_sequences(&["GGAA", "GG"]);
        assert_eq!(reversed.detect_common_p5(&table).unwrap().sequence, "GG");
    }

    #[test]
    fn test_no_common_adapter() {
        let catalog = AdapterCatalog::from_sequences(&["GGAA"]);
        let table = ExperimentTable::new(vec![
            ExperimentRecord::new("GGAACUUG"),
            ExperimentRecord::new("CCAAUUCG"),
        ]);
        let err = catalog.detect_common_p5(&table).unwrap_err();
        assert_eq!(err.code, ErrorCode::AdapterNotFound);
    }

    #[test]
    fn test_csv_rejects_empty_sequence() {
        assert!(AdapterCatalog::from_csv_text("name,code,sequence\na,P1,\n").is_err());
        let ok = AdapterCatalog::from_csv_text("name,code,sequence\na,P1,GGAA\nb,P2,GGAAT\n").unwrap();
        assert_eq!(ok.len(), 2);
        assert_eq!(ok.to_rna().entries()[1].sequence, "GGAAU");
    }

    #[test]
    fn test_trim_p5_and_p3_rna() {
        let catalog = AdapterCatalog::from_sequences(&["GG", "GGAAT"]);
        let table = ExperimentTable::new(vec![ExperimentRecord::new("GGAAUCCCCAA")
            .with_structure("...........")
            .with_data((0..11).map(f64::from).collect())]);
        let result = trim_p5_and_p3(&table, &catalog, true, 2).unwrap();
        let record = &result.records()[0];
        assert_eq!(record.sequence, "CCCC");
        assert_eq!(record.data.as_deref(), Some(&[5.0, 6.0, 7.0, 8.0][..]));

        // DNA catalog: only "GG" prefixes the RNA sequence
        let result = trim_p5_and_p3(&table, &catalog, false, 2).unwrap();
        assert_eq!(result.records()[0].sequence, "AAUCCCC");
    }
}
