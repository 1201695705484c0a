//! Per-pattern match evidence collected during a scan.

use serde::Serialize;

/// One occurrence of a pattern in the scanned buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Match {
    /// Byte offset of the first matched byte.
    pub offset: usize,
    /// Number of matched bytes.
    pub length: usize,
}

/// Match lists for every pattern of a ruleset.
#[derive(Debug)]
pub(crate) struct Evidence {
    matches: Vec<Vec<Match>>,
    cap: usize,
    truncated: Vec<bool>,
}

impl Evidence {
    pub fn new(pattern_count: usize, cap: usize) -> Self {
        Self {
            matches: vec![Vec::new(); pattern_count],
            cap,
            truncated: vec![false; pattern_count],
        }
    }

    /// Reset for the next scan, keeping allocations.
    pub fn clear(&mut self) {
        self.matches.iter_mut().for_each(Vec::clear);
        self.truncated.iter_mut().for_each(|t| *t = false);
    }

    pub fn record(&mut self, pattern: usize, offset: usize, length: usize) {
        let list = &mut self.matches[pattern];
        if list.len() >= self.cap {
            self.truncated[pattern] = true;
            return;
        }
        list.push(Match { offset, length });
    }

    pub fn is_full(&self, pattern: usize) -> bool {
        self.truncated[pattern]
    }

    /// Sort every list by offset and keep the longest match per offset.
    ///
    /// Returns the patterns whose lists hit the cap.
    pub fn finalize(&mut self) -> Vec<usize> {
        for list in &mut self.matches {
            list.sort_unstable_by(|a, b| a.offset.cmp(&b.offset).then(b.length.cmp(&a.length)));
            list.dedup_by_key(|m| m.offset);
        }
        self.truncated
            .iter()
            .enumerate()
            .filter(|(_, truncated)| **truncated)
            .map(|(pattern, _)| pattern)
            .collect()
    }

    pub fn get(&self, pattern: usize) -> &[Match] {
        self.matches.get(pattern).map(Vec::as_slice).unwrap_or(&[])
    }
}
