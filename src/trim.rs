//! Coordinate-consistent trimming of sequence, structure and data.

use crate::error::{ProcessingError, Result};
use crate::table::{ExperimentRecord, ExperimentTable};
use std::ops::Range;

/// Range of positions kept after dropping `trim_5p` leading and `trim_3p`
/// trailing positions. A zero 3' trim keeps the tail.
fn kept_range(len: usize, trim_5p: usize, trim_3p: usize) -> Range<usize> {
    if trim_5p == 0 && trim_3p == 0 {
        0..len
    } else if trim_3p == 0 {
        trim_5p..len
    } else if trim_5p == 0 {
        0..len - trim_3p
    } else {
        trim_5p..len - trim_3p
    }
}

fn trim_record(record: &ExperimentRecord, trim_5p: usize, trim_3p: usize) -> Result<ExperimentRecord> {
    record.validate()?;
    let len = record.len();
    if trim_5p + trim_3p > len {
        return Err(ProcessingError::invalid_input(format!(
            "cannot trim {trim_5p} + {trim_3p} positions from a record of length {len}"
        )));
    }
    let keep = kept_range(len, trim_5p, trim_3p);
    Ok(ExperimentRecord {
        sequence: record.sequence[keep.clone()].to_string(),
        structure: record.structure.as_ref().map(|s| s[keep.clone()].to_string()),
        data: record.data.as_ref().map(|d| d[keep.clone()].to_vec()),
        extra: record.extra.clone(),
    })
}

/// Returns a new table with `trim_5p` positions removed from the 5' end and
/// `trim_3p` from the 3' end of every present field. Index `i` of a trimmed
/// row corresponds to index `i + trim_5p` of the untrimmed row.
pub fn trim(table: &ExperimentTable, trim_5p: usize, trim_3p: usize) -> Result<ExperimentTable> {
    let records = table
        .iter()
        .enumerate()
        .map(|(row, record)| trim_record(record, trim_5p, trim_3p).map_err(|e| e.at_row(row)))
        .collect::<Result<Vec<_>>>()?;
    Ok(ExperimentTable::new(records))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use serde_json::json;

    fn sample_table() -> ExperimentTable {
        ExperimentTable::new(vec![
            ExperimentRecord::new("ATCGATCG")
                .with_structure("((..)).)")
                .with_data(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]),
            ExperimentRecord::new("GCTAGCTA")
                .with_structure("(.(.)).)")
                .with_data(vec![8.0, 7.0, 6.0, 5.0, 4.0, 3.0, 2.0, 1.0]),
        ])
    }

    fn sequences(table: &ExperimentTable) -> Vec<&str> {
        table.iter().map(|r| r.sequence.as_str()).collect()
    }

    fn structures(table: &ExperimentTable) -> Vec<&str> {
        table.iter().map(|r| r.structure.as_deref().unwrap()).collect()
    }

    fn data(table: &ExperimentTable) -> Vec<Vec<f64>> {
        table.iter().map(|r| r.data.clone().unwrap()).collect()
    }

    #[test]
    fn test_trim_start_only() {
        let result = trim(&sample_table(), 2, 0).unwrap();
        assert_eq!(sequences(&result), vec!["CGATCG", "TAGCTA"]);
        assert_eq!(structures(&result), vec!["..)).)", "(.)).)"]);
        assert_eq!(
            data(&result),
            vec![vec![3.0, 4.0, 5.0, 6.0, 7.0, 8.0], vec![6.0, 5.0, 4.0, 3.0, 2.0, 1.0]]
        );
    }

    #[test]
    fn test_trim_end_only() {
        let result = trim(&sample_table(), 0, 2).unwrap();
        assert_eq!(sequences(&result), vec!["ATCGAT", "GCTAGC"]);
        assert_eq!(structures(&result), vec!["((..))", "(.(.))"]);
        assert_eq!(
            data(&result),
            vec![vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], vec![8.0, 7.0, 6.0, 5.0, 4.0, 3.0]]
        );
    }

    #[test]
    fn test_trim_start_and_end() {
        let result = trim(&sample_table(), 2, 2).unwrap();
        assert_eq!(sequences(&result), vec!["CGAT", "TAGC"]);
        assert_eq!(structures(&result), vec!["..))", "(.))"]);
        assert_eq!(data(&result), vec![vec![3.0, 4.0, 5.0, 6.0], vec![6.0, 5.0, 4.0, 3.0]]);
    }

    #[test]
    fn test_trim_no_change() {
        let table = sample_table();
        assert_eq!(trim(&table, 0, 0).unwrap(), table);
    }

    #[test]
    fn test_trim_empty_table() {
        assert!(trim(&ExperimentTable::default(), 2, 2).unwrap().is_empty());
    }

    #[test]
    fn test_trim_missing_columns() {
        let table = ExperimentTable::new(vec![
            ExperimentRecord::new("ATCG").with_column("other", json!(1)),
        ]);
        let result = trim(&table, 1, 1).unwrap();
        assert_eq!(result.records()[0].sequence, "TC");
        assert!(result.records()[0].structure.is_none());
        assert_eq!(result.records()[0].extra["other"], json!(1));
    }

    #[test]
    fn test_trim_keeps_alignment() {
        let table = sample_table();
        let (t5, t3) = (3, 1);
        let result = trim(&table, t5, t3).unwrap();
        for (orig, trimmed) in table.iter().zip(result.iter()) {
            let len = orig.len() - t5 - t3;
            assert_eq!(trimmed.sequence.len(), len);
            assert_eq!(trimmed.structure.as_ref().unwrap().len(), len);
            assert_eq!(trimmed.data.as_ref().unwrap().len(), len);
            for i in 0..len {
                assert_eq!(trimmed.sequence.as_bytes()[i], orig.sequence.as_bytes()[i + t5]);
                assert_eq!(trimmed.data.as_ref().unwrap()[i], orig.data.as_ref().unwrap()[i + t5]);
            }
        }
    }

    #[test]
    fn test_trim_does_not_mutate_input() {
        let table = sample_table();
        let before = table.clone();
        let _ = trim(&table, 2, 2).unwrap();
        assert_eq!(table, before);
    }

    #[test]
    fn test_trim_too_long_or_misaligned() {
        let err = trim(&sample_table(), 5, 4).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidInput);
        assert!(err.message.starts_with("row 0:"));

        let bad = ExperimentTable::new(vec![ExperimentRecord::new("ACGU").with_structure("..")]);
        assert_eq!(trim(&bad, 0, 0).unwrap_err().code, ErrorCode::InvalidInput);
    }
}
