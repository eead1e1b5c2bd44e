//! Interfaces to structure search and motif decomposition engines.
//!
//! Extraction only needs the index ranges a search returns, so the engines are
//! injected through the [`StructureSearch`] and [`MotifSearch`] traits.
//! [`ExactSearch`] is a small literal matcher usable when nothing better is
//! available.

use crate::error::{ProcessingError, Result};
use crate::sequence::{bases_match, is_dot_bracket, STRAND_SEPARATOR};
use serde::{Deserialize, Serialize};

/// Half-open `[start, end)` range of positions in the full sequence.
pub type Segment = (usize, usize);

/// One alignment of a query: one segment per query strand, in query order.
pub type SearchMatch = Vec<Segment>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceStructure {
    sequence: String,
    structure: String,
}

impl SequenceStructure {
    pub fn new(sequence: &str, structure: &str) -> Result<Self> {
        if sequence.len() != structure.len() {
            return Err(ProcessingError::invalid_input(format!(
                "sequence length {} does not match structure length {}",
                sequence.len(),
                structure.len()
            )));
        }
        if !sequence.is_ascii() || !is_dot_bracket(structure) {
            return Err(ProcessingError::invalid_input(format!(
                "'{structure}' is not a dot-bracket structure for '{sequence}'"
            )));
        }
        let breaks = |s: &str| s.match_indices(STRAND_SEPARATOR).map(|(i, _)| i).collect::<Vec<_>>();
        if breaks(sequence) != breaks(structure) {
            return Err(ProcessingError::invalid_input(format!(
                "strand breaks of '{sequence}' and '{structure}' do not line up"
            )));
        }
        Ok(Self {
            sequence: sequence.to_string(),
            structure: structure.to_string(),
        })
    }

    pub fn sequence(&self) -> &str {
        &self.sequence
    }

    pub fn structure(&self) -> &str {
        &self.structure
    }

    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    /// Splits a multi-strand pair at `&`.
    pub fn strands(&self) -> Vec<(&str, &str)> {
        self.sequence
            .split(STRAND_SEPARATOR)
            .zip(self.structure.split(STRAND_SEPARATOR))
            .collect()
    }
}

pub trait StructureSearch {
    /// All alignments of `query` inside `full`, restricted to positions in
    /// `[start, end)` when bounds are given.
    fn find(
        &self,
        full: &SequenceStructure,
        query: &SequenceStructure,
        start: Option<usize>,
        end: Option<usize>,
    ) -> Result<Vec<SearchMatch>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotifSearchParams {
    pub sequence: Option<String>,
    pub structure: Option<String>,
    pub m_type: Option<String>,
    pub min_pos: usize,
    pub max_pos: usize,
    pub min_id: usize,
    pub max_id: usize,
}

impl Default for MotifSearchParams {
    fn default() -> Self {
        Self {
            sequence: None,
            structure: None,
            m_type: None,
            min_pos: 0,
            max_pos: 999,
            min_id: 0,
            max_id: 999,
        }
    }
}

/// A structural unit made of ordered strands of positions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Motif {
    pub m_type: String,
    pub strands: Vec<Vec<usize>>,
}

pub trait MotifSearch {
    fn get_motifs(&self, full: &SequenceStructure, params: &MotifSearchParams) -> Result<Vec<Motif>>;
}

/// Partner of every position of a dot-bracket string, `None` for unpaired
/// positions. Each bracket type is matched on its own stack; unbalanced
/// brackets stay unpaired.
pub fn pair_table(structure: &str) -> Vec<Option<usize>> {
    let mut pairs = vec![None; structure.len()];
    let mut stacks: [Vec<usize>; 4] = Default::default();
    for (i, c) in structure.bytes().enumerate() {
        let (kind, open) = match c {
            b'(' => (0, true),
            b')' => (0, false),
            b'[' => (1, true),
            b']' => (1, false),
            b'{' => (2, true),
            b'}' => (2, false),
            b'<' => (3, true),
            b'>' => (3, false),
            _ => continue,
        };
        if open {
            stacks[kind].push(i);
        } else if let Some(j) = stacks[kind].pop() {
            pairs[i] = Some(j);
            pairs[j] = Some(i);
        }
    }
    pairs
}

/// Literal matcher: every query strand must occur verbatim (sequence with `N`
/// wildcards, structure character by character), strands in query order and
/// without overlap. Base pairs of the query must land on base pairs of the
/// full structure.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactSearch;

struct ExactQuery<'a> {
    full: &'a SequenceStructure,
    full_pairs: Vec<Option<usize>>,
    strands: Vec<(&'a str, &'a str)>,
    /// Pairs of the query with strand breaks removed.
    query_pairs: Vec<Option<usize>>,
    end: usize,
}

impl ExactQuery<'_> {
    fn strand_matches(&self, seq: &[u8], ss: &[u8], pos: usize) -> bool {
        let full_seq = &self.full.sequence.as_bytes()[pos..pos + seq.len()];
        let full_ss = &self.full.structure.as_bytes()[pos..pos + ss.len()];
        full_ss == ss && seq.iter().zip(full_seq).all(|(&q, &t)| bases_match(q, t))
    }

    fn pairs_agree(&self, candidate: &SearchMatch) -> bool {
        let positions: Vec<usize> = candidate.iter().flat_map(|&(from, to)| from..to).collect();
        self.query_pairs.iter().enumerate().all(|(qi, partner)| match partner {
            Some(qj) => self.full_pairs[positions[qi]] == Some(positions[*qj]),
            None => true,
        })
    }

    fn extend(&self, strand: usize, from: usize, current: &mut SearchMatch, found: &mut Vec<SearchMatch>) {
        let Some(&(seq, ss)) = self.strands.get(strand) else {
            if self.pairs_agree(current) {
                found.push(current.clone());
            }
            return;
        };
        let width = seq.len();
        if width == 0 || from + width > self.end {
            return;
        }
        for pos in from..=self.end - width {
            if self.strand_matches(seq.as_bytes(), ss.as_bytes(), pos) {
                current.push((pos, pos + width));
                self.extend(strand + 1, pos + width, current, found);
                current.pop();
            }
        }
    }
}

impl StructureSearch for ExactSearch {
    fn find(
        &self,
        full: &SequenceStructure,
        query: &SequenceStructure,
        start: Option<usize>,
        end: Option<usize>,
    ) -> Result<Vec<SearchMatch>> {
        let start = start.unwrap_or(0);
        let end = end.unwrap_or(full.len()).min(full.len());
        let mut found = vec![];
        if start >= end || query.is_empty() {
            return Ok(found);
        }
        let joined: String = query.structure.split(STRAND_SEPARATOR).collect();
        let search = ExactQuery {
            full,
            full_pairs: pair_table(&full.structure),
            strands: query.strands(),
            query_pairs: pair_table(&joined),
            end,
        };
        search.extend(0, start, &mut vec![], &mut found);
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ss(seq: &str, st: &str) -> SequenceStructure {
        SequenceStructure::new(seq, st).unwrap()
    }

    #[test]
    fn test_sequence_structure_validation() {
        assert!(SequenceStructure::new("ACG", "(.").is_err());
        assert!(SequenceStructure::new("ACG", "(x)").is_err());
        let pair = ss("GAC&GUC", "(((&)))");
        assert_eq!(pair.strands(), vec![("GAC", "((("), ("GUC", ")))")]);
    }

    #[test]
    fn test_exact_single_strand() {
        let full = ss("GGAAACUUCGGUUUCC", "((((((....))))))");
        let query = ss("CUUCGG", "(....)");
        let found = ExactSearch.find(&full, &query, None, None).unwrap();
        assert_eq!(found, vec![vec![(5, 11)]]);
    }

    #[test]
    fn test_exact_two_strands_and_bounds() {
        let full = ss("GGAAACUUCGGUUUCC", "((((((....))))))");
        let query = ss("GA&UC", "((&))");
        let found = ExactSearch.find(&full, &query, None, None).unwrap();
        assert_eq!(found, vec![vec![(1, 3), (13, 15)]]);
        let none = ExactSearch.find(&full, &query, Some(2), None).unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_pair_table() {
        assert_eq!(
            pair_table("((.))[.]"),
            vec![Some(4), Some(3), None, Some(1), Some(0), Some(7), None, Some(5)]
        );
        assert_eq!(pair_table("(."), vec![None, None]);
    }

    #[test]
    fn test_exact_pairs_must_match() {
        let full = ss("GAAAACAAAAAC", "(....)(....)");
        let query = ss("G&C", "(&)");
        let found = ExactSearch.find(&full, &query, None, None).unwrap();
        assert_eq!(found, vec![vec![(0, 1), (5, 6)]]);
    }

    #[test]
    fn test_exact_wildcard_multiple_hits() {
        let full = ss("AAAA", "....");
        let query = ss("NA", "..");
        let found = ExactSearch.find(&full, &query, None, None).unwrap();
        assert_eq!(found.len(), 3);
    }
}
