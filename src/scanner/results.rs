//! Scan reports.

use super::Match;
use crate::ir::MetaValue;
use serde::Serialize;

/// Matches of one non-private pattern of a matching rule.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatternMatches {
    /// Identifier as declared, including the `$` sigil.
    pub identifier: String,
    pub matches: Vec<Match>,
}

/// A rule whose condition held for the scanned buffer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchingRule {
    pub name: String,
    pub tags: Vec<String>,
    pub metadata: Vec<(String, MetaValue)>,
    /// Empty unless the scan was configured with `include_match_data`.
    pub patterns: Vec<PatternMatches>,
}

impl MatchingRule {
    /// First metadata value stored under `key`.
    pub fn meta(&self, key: &str) -> Option<&MetaValue> {
        self.metadata
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value)
    }
}

/// Matching non-private rules, in declaration order.
///
/// # Examples
///
/// ```rust
/// let rules = scan_engine::compile(r#"
///     rule greeting : text { strings: $h = "hello" condition: $h }
/// "#)?;
/// let results = rules.scan(b"say hello");
/// assert!(results.matched("greeting"));
/// assert_eq!(results.rule_names().collect::<Vec<_>>(), ["greeting"]);
/// # Ok::<(), scan_engine::EngineError>(())
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScanResults {
    pub matching_rules: Vec<MatchingRule>,
}

impl ScanResults {
    pub fn is_empty(&self) -> bool {
        self.matching_rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.matching_rules.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MatchingRule> {
        self.matching_rules.iter()
    }

    pub fn rule_names(&self) -> impl Iterator<Item = &str> {
        self.matching_rules.iter().map(|rule| rule.name.as_str())
    }

    pub fn get(&self, name: &str) -> Option<&MatchingRule> {
        self.matching_rules.iter().find(|rule| rule.name == name)
    }

    pub fn matched(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Serialize the report, e.g. for logging or a JSON API.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl<'a> IntoIterator for &'a ScanResults {
    type Item = &'a MatchingRule;
    type IntoIter = std::slice::Iter<'a, MatchingRule>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
