//! Gathering reactivity values for the positions of a structural match.
//!
//! Every row must yield exactly one match; anything else has no defined
//! numeric alignment and is reported as an error.

use crate::error::{ErrorCode, ProcessingError, Result};
use crate::search::{MotifSearch, MotifSearchParams, SequenceStructure, StructureSearch};
use crate::table::{ExperimentRecord, ExperimentTable};

/// Wild-type GAAA tetraloop receptor, searched 5' half first.
pub const TLR_SEQUENCE: &str = "UAUGG&CCUAAG";
pub const TLR_STRUCTURE: &str = "(..((&))...)";

fn row_pair(record: &ExperimentRecord) -> Result<(SequenceStructure, &[f64])> {
    record.validate()?;
    let structure = record.require_structure()?;
    let data = record.require_data()?;
    Ok((SequenceStructure::new(&record.sequence, structure)?, data))
}

fn exactly_one<T>(mut found: Vec<T>, what: &str) -> Result<T> {
    match found.len() {
        0 => Err(ProcessingError::new(
            ErrorCode::NoMatch,
            format!("No {what} found"),
        )),
        1 => Ok(found.remove(0)),
        n => Err(ProcessingError::new(
            ErrorCode::AmbiguousMatch,
            format!("More than one {what} found ({n})"),
        )),
    }
}

fn gather(data: &[f64], positions: impl IntoIterator<Item = usize>) -> Result<Vec<f64>> {
    positions
        .into_iter()
        .map(|p| {
            data.get(p).copied().ok_or_else(|| {
                ProcessingError::invalid_input(format!(
                    "position {p} is outside data of length {}",
                    data.len()
                ))
            })
        })
        .collect()
}

fn per_row<F>(table: &ExperimentTable, mut extract: F) -> Result<Vec<Vec<f64>>>
where
    F: FnMut(&SequenceStructure, &[f64]) -> Result<Vec<f64>>,
{
    table
        .iter()
        .enumerate()
        .map(|(row, record)| {
            row_pair(record)
                .and_then(|(pair, data)| extract(&pair, data))
                .map_err(|e| e.at_row(row))
        })
        .collect()
}

/// Data at the positions of `query` in every row, segments concatenated in
/// the order the search returns them.
pub fn get_sec_struct_data(
    table: &ExperimentTable,
    search: &dyn StructureSearch,
    query: &SequenceStructure,
    start: Option<usize>,
    end: Option<usize>,
) -> Result<Vec<Vec<f64>>> {
    per_row(table, |pair, data| {
        let segments = exactly_one(search.find(pair, query, start, end)?, "segment")?;
        gather(data, segments.into_iter().flat_map(|(from, to)| from..to))
    })
}

/// Data over the strands of the single motif found in every row.
pub fn get_motif_data(
    table: &ExperimentTable,
    motifs: &dyn MotifSearch,
    params: &MotifSearchParams,
) -> Result<Vec<Vec<f64>>> {
    per_row(table, |pair, data| {
        let motif = exactly_one(motifs.get_motifs(pair, params)?, "motif")?;
        gather(data, motif.strands.into_iter().flatten())
    })
}

/// Tetraloop receptor data: the 3' half of the receptor followed by the 5'
/// half, which is how the two halves stack in the folded receptor.
pub fn get_wt_tlr_data(
    table: &ExperimentTable,
    search: &dyn StructureSearch,
    start: Option<usize>,
    end: Option<usize>,
) -> Result<Vec<Vec<f64>>> {
    let query = SequenceStructure::new(TLR_SEQUENCE, TLR_STRUCTURE)?;
    per_row(table, |pair, data| {
        let segments = exactly_one(search.find(pair, &query, start, end)?, "segment")?;
        let [first, second] = segments.as_slice() else {
            return Err(ProcessingError::invalid_input(format!(
                "expected 2 receptor segments, found {}",
                segments.len()
            )));
        };
        gather(data, (second.0..second.1).chain(first.0..first.1))
    })
}
