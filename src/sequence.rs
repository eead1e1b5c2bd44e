use crate::table::ExperimentTable;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref DOT_BRACKET: Regex = Regex::new(r"^[.()\[\]{}<>&]*$").unwrap();
}

pub const STRAND_SEPARATOR: char = '&';

pub fn to_rna(sequence: &str) -> String {
    sequence
        .chars()
        .map(|c| match c {
            'T' => 'U',
            't' => 'u',
            other => other,
        })
        .collect()
}

pub fn to_dna(sequence: &str) -> String {
    sequence
        .chars()
        .map(|c| match c {
            'U' => 'T',
            'u' => 't',
            other => other,
        })
        .collect()
}

#[inline(always)]
pub fn is_dot_bracket(structure: &str) -> bool {
    DOT_BRACKET.is_match(structure)
}

/// True when every sequence of the table starts with `p5`.
///
/// An empty table has no counter-example and therefore matches.
pub fn has_5p_sequence(table: &ExperimentTable, p5: &str) -> bool {
    table.iter().all(|r| r.sequence.starts_with(p5))
}

/// Matches two bases, with `N` in the query standing for any base.
#[inline(always)]
pub fn bases_match(query: u8, target: u8) -> bool {
    let query = query.to_ascii_uppercase();
    let target = target.to_ascii_uppercase();
    query == b'N' || query == target || matches!((query, target), (b'T', b'U') | (b'U', b'T'))
}
