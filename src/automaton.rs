//! The shared atom automaton.
//!
//! Every literal variant and every atomizable hex pattern in a ruleset
//! contributes one short atom; all distinct atoms are compiled into a single
//! Aho-Corasick automaton. A scan makes one overlapping pass over the input
//! and hands each hit, already shifted back to the candidate start of the
//! sub-pattern, to the caller for verification.

use crate::error::{EngineError, Result};
use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};
use std::collections::HashMap;
use tracing::debug;

/// A sub-pattern waiting behind an atom.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AtomEntry {
    /// Index into the ruleset's sub-pattern table.
    pub sub_pattern: u32,
    /// Distance from the start of the sub-pattern to the start of the atom.
    pub backtrack: u32,
}

#[derive(Debug)]
pub(crate) struct Automaton {
    searcher: Option<AhoCorasick>,
    /// Entries per automaton pattern index.
    entries: Vec<Vec<AtomEntry>>,
}

impl Automaton {
    /// Build the automaton over `atoms`, merging identical atoms.
    pub fn build(atoms: Vec<(Vec<u8>, AtomEntry)>, max_atoms: usize) -> Result<Self> {
        let mut index: HashMap<Vec<u8>, usize> = HashMap::new();
        let mut distinct: Vec<Vec<u8>> = Vec::new();
        let mut entries: Vec<Vec<AtomEntry>> = Vec::new();

        for (atom, entry) in atoms {
            let slot = match index.get(&atom) {
                Some(&slot) => slot,
                None => {
                    let slot = distinct.len();
                    index.insert(atom.clone(), slot);
                    distinct.push(atom);
                    entries.push(Vec::new());
                    slot
                }
            };
            entries[slot].push(entry);
        }

        if distinct.len() > max_atoms {
            return Err(EngineError::Resource(format!(
                "ruleset needs {} atoms, limit is {max_atoms}",
                distinct.len()
            )));
        }

        let searcher = if distinct.is_empty() {
            None
        } else {
            let automaton = AhoCorasickBuilder::new()
                .match_kind(MatchKind::Standard)
                .build(&distinct)
                .map_err(|e| {
                    EngineError::Resource(format!("failed to build atom automaton: {e}"))
                })?;
            Some(automaton)
        };

        debug!(atoms = distinct.len(), "built atom automaton");

        Ok(Self { searcher, entries })
    }

    pub fn atom_count(&self) -> usize {
        self.entries.len()
    }

    /// Call `on_candidate` for every atom hit in `data` with the entry and the
    /// offset where its sub-pattern would start. Hits whose sub-pattern would
    /// start before the buffer are skipped.
    pub fn for_each_candidate(&self, data: &[u8], mut on_candidate: impl FnMut(&AtomEntry, usize)) {
        let Some(searcher) = &self.searcher else {
            return;
        };
        for hit in searcher.find_overlapping_iter(data) {
            for entry in &self.entries[hit.pattern().as_usize()] {
                if let Some(start) = hit.start().checked_sub(entry.backtrack as usize) {
                    on_candidate(entry, start);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(sub_pattern: u32, backtrack: u32) -> AtomEntry {
        AtomEntry {
            sub_pattern,
            backtrack,
        }
    }

    fn candidates(automaton: &Automaton, data: &[u8]) -> Vec<(u32, usize)> {
        let mut found = Vec::new();
        automaton.for_each_candidate(data, |e, start| found.push((e.sub_pattern, start)));
        found.sort_unstable();
        found
    }

    #[test]
    fn test_identical_atoms_are_merged() {
        let automaton = Automaton::build(
            vec![
                (b"abc".to_vec(), entry(0, 0)),
                (b"abc".to_vec(), entry(1, 2)),
                (b"xyz".to_vec(), entry(2, 0)),
            ],
            100,
        )
        .unwrap();
        assert_eq!(automaton.atom_count(), 2);
        assert_eq!(candidates(&automaton, b"..abc"), vec![(0, 2), (1, 0)]);
    }

    #[test]
    fn test_overlapping_hits() {
        let automaton = Automaton::build(
            vec![(b"aa".to_vec(), entry(0, 0)), (b"aaa".to_vec(), entry(1, 0))],
            100,
        )
        .unwrap();
        assert_eq!(
            candidates(&automaton, b"aaaa"),
            vec![(0, 0), (0, 1), (0, 2), (1, 0), (1, 1)]
        );
    }

    #[test]
    fn test_backtrack_before_buffer_start_is_skipped() {
        let automaton = Automaton::build(vec![(b"b".to_vec(), entry(0, 3))], 100).unwrap();
        assert!(candidates(&automaton, b"ab").is_empty());
        assert_eq!(candidates(&automaton, b"xxxb"), vec![(0, 0)]);
    }

    #[test]
    fn test_empty_automaton() {
        let automaton = Automaton::build(Vec::new(), 100).unwrap();
        assert_eq!(automaton.atom_count(), 0);
        assert!(candidates(&automaton, b"anything").is_empty());
    }

    #[test]
    fn test_atom_limit() {
        let atoms = (0u8..10).map(|b| (vec![b], entry(b as u32, 0))).collect();
        let result = Automaton::build(atoms, 5);
        assert!(matches!(result, Err(EngineError::Resource(_))));
    }
}
