//! Scanning a buffer against a compiled ruleset.
//!
//! A scan runs in three phases:
//! 1. one overlapping pass of the shared atom automaton, verifying each
//!    candidate sub-pattern at `hit - backtrack`, followed by the patterns
//!    without atoms and by the regex programs;
//! 2. global rules, which gate every other rule;
//! 3. every non-private rule, once. Rule references are evaluated on demand
//!    and memoized for the rest of the scan.

mod evidence;
mod results;

pub use evidence::Match;
pub use results::{MatchingRule, PatternMatches, ScanResults};

use crate::config::ScanConfig;
use crate::error::{EngineError, Result};
use crate::ir::{PatternId, RuleId, Rules, Value};
use crate::vm::{EvalContext, Vm, VmValue};
use evidence::Evidence;
use rayon::prelude::*;
use regex::bytes::Regex;
use tracing::{trace, warn};

/// Per-scan state over a shared [`Rules`].
///
/// A scanner owns its scratch buffers and external-variable overrides, so
/// any number of scanners can work on the same ruleset at once.
///
/// # Examples
///
/// ```rust
/// use scan_engine::{Compiler, Scanner};
///
/// let mut compiler = Compiler::new();
/// compiler
///     .define_global("expected", "admin")?
///     .add_source(r#"
///         rule user_present {
///             strings: $u = "user=admin"
///             condition: $u and expected == "admin"
///         }
///     "#)?;
/// let rules = compiler.build()?;
///
/// let mut scanner = Scanner::new(&rules);
/// assert_eq!(scanner.scan(b"user=admin").len(), 1);
///
/// scanner.set_global("expected", "root")?;
/// assert!(scanner.scan(b"user=admin").is_empty());
/// # Ok::<(), scan_engine::EngineError>(())
/// ```
pub struct Scanner<'r> {
    rules: &'r Rules,
    config: ScanConfig,
    globals: Vec<Value>,
    evidence: Evidence,
}

impl<'r> Scanner<'r> {
    pub fn new(rules: &'r Rules) -> Self {
        Self::with_valid_config(rules, ScanConfig::default())
    }

    /// Create a scanner with a custom configuration.
    ///
    /// # Errors
    /// [`EngineError::InvalidArgument`] if the configuration does not
    /// validate (for example a zero match cap).
    pub fn with_config(rules: &'r Rules, config: ScanConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_valid_config(rules, config))
    }

    fn with_valid_config(rules: &'r Rules, config: ScanConfig) -> Self {
        Self {
            rules,
            globals: rules.globals.iter().map(|g| g.value.clone()).collect(),
            evidence: Evidence::new(rules.pattern_count, config.max_matches_per_pattern),
            config,
        }
    }

    /// Override an external variable for the following scans.
    ///
    /// # Errors
    /// [`EngineError::InvalidArgument`] if the variable was never defined or
    /// the value has a different type.
    pub fn set_global(&mut self, name: &str, value: impl Into<Value>) -> Result<&mut Self> {
        let value = value.into();
        let slot = self
            .rules
            .globals
            .iter()
            .position(|g| g.name == name)
            .ok_or_else(|| EngineError::InvalidArgument(format!("unknown variable `{name}`")))?;

        let expected = self.rules.globals[slot].value.value_type();
        if value.value_type() != expected {
            return Err(EngineError::InvalidArgument(format!(
                "variable `{name}` is {expected}, got {}",
                value.value_type()
            )));
        }
        self.globals[slot] = value;
        Ok(self)
    }

    /// Scan `data` and report the matching rules.
    pub fn scan(&mut self, data: &[u8]) -> ScanResults {
        self.evidence.clear();
        collect_evidence(self.rules, data, &mut self.evidence);
        for pattern in self.evidence.finalize() {
            warn!(
                pattern,
                cap = self.config.max_matches_per_pattern,
                "match list truncated"
            );
        }

        let mut evaluator = Evaluator {
            rules: self.rules,
            data,
            evidence: &self.evidence,
            globals: &self.globals,
            memo: vec![None; self.rules.rules.len()],
        };

        let gated = self
            .rules
            .global_rules
            .iter()
            .all(|&rule| evaluator.evaluate(rule));

        let mut results = ScanResults::default();
        if gated {
            for (id, rule) in self.rules.rules.iter().enumerate() {
                if rule.is_private || !evaluator.evaluate(id as RuleId) {
                    continue;
                }
                let patterns = if self.config.include_match_data {
                    rule.patterns
                        .iter()
                        .filter(|p| !p.private)
                        .map(|p| PatternMatches {
                            identifier: p.identifier.clone(),
                            matches: self.evidence.get(p.id as usize).to_vec(),
                        })
                        .collect()
                } else {
                    Vec::new()
                };
                results.matching_rules.push(MatchingRule {
                    name: rule.name.clone(),
                    tags: rule.tags.clone(),
                    metadata: rule.metadata.clone(),
                    patterns,
                });
            }
        }

        trace!(
            len = data.len(),
            matching_rules = results.len(),
            "scan complete"
        );
        results
    }
}

/// Fill `evidence` with every verified occurrence of every pattern.
fn collect_evidence(rules: &Rules, data: &[u8], evidence: &mut Evidence) {
    rules.automaton.for_each_candidate(data, |entry, start| {
        let sub_pattern = &rules.sub_patterns[entry.sub_pattern as usize];
        if let Some(length) = sub_pattern.verify(data, start) {
            evidence.record(sub_pattern.pattern as usize, start, length);
        }
    });

    for &index in &rules.unatomized {
        let sub_pattern = &rules.sub_patterns[index];
        let pattern = sub_pattern.pattern as usize;
        for start in 0..data.len() {
            if evidence.is_full(pattern) {
                break;
            }
            if let Some(length) = sub_pattern.verify(data, start) {
                evidence.record(pattern, start, length);
            }
        }
    }

    for (pattern, matcher) in &rules.regexes {
        matcher.for_each_match(data, |offset, length| {
            evidence.record(*pattern as usize, offset, length);
        });
    }
}

/// Condition context of one scan.
struct Evaluator<'a> {
    rules: &'a Rules,
    data: &'a [u8],
    evidence: &'a Evidence,
    globals: &'a [Value],
    memo: Vec<Option<bool>>,
}

impl<'a> Evaluator<'a> {
    fn evaluate(&mut self, rule: RuleId) -> bool {
        if let Some(result) = self.memo[rule as usize] {
            return result;
        }
        let rules = self.rules;
        let chunk = &rules.rules[rule as usize].chunk;
        let result = Vm::new().execute(chunk, self);
        self.memo[rule as usize] = Some(result);
        result
    }
}

impl<'a> EvalContext<'a> for Evaluator<'a> {
    fn data(&self) -> &'a [u8] {
        self.data
    }

    fn matches(&self, pattern: PatternId) -> &'a [Match] {
        self.evidence.get(pattern as usize)
    }

    fn constant(&self, index: u32) -> &'a [u8] {
        self.rules
            .constants
            .get(index as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn global(&self, index: u32) -> VmValue<'a> {
        match self.globals.get(index as usize) {
            Some(Value::Bool(b)) => VmValue::Bool(*b),
            Some(Value::Integer(n)) => VmValue::Int(*n),
            Some(Value::Float(f)) => VmValue::Float(*f),
            Some(Value::String(s)) => VmValue::Str(s.as_slice()),
            None => VmValue::Undefined,
        }
    }

    fn condition_regex(&self, index: u32) -> Option<&'a Regex> {
        self.rules.condition_regexes.get(index as usize)
    }

    fn rule(&mut self, rule: RuleId) -> bool {
        self.evaluate(rule)
    }
}

impl Rules {
    /// Scan `data` with the default [`ScanConfig`].
    ///
    /// # Examples
    ///
    /// ```rust
    /// let rules = scan_engine::compile(r#"
    ///     rule ab { strings: $a = "ab" condition: $a }
    /// "#)?;
    /// assert!(rules.scan(b"xxabxx").matched("ab"));
    /// assert!(rules.scan(b"xxxx").is_empty());
    /// # Ok::<(), scan_engine::EngineError>(())
    /// ```
    pub fn scan(&self, data: &[u8]) -> ScanResults {
        Scanner::new(self).scan(data)
    }

    /// Scan `data` once with a custom configuration.
    ///
    /// # Errors
    /// [`EngineError::InvalidArgument`] if the configuration does not validate.
    pub fn scan_with_config(&self, data: &[u8], config: &ScanConfig) -> Result<ScanResults> {
        Ok(Scanner::with_config(self, config.clone())?.scan(data))
    }

    /// Scan several buffers in parallel on the rayon thread pool. Results
    /// are returned in the order of `buffers`.
    pub fn scan_many(&self, buffers: &[&[u8]]) -> Vec<ScanResults> {
        buffers
            .par_iter()
            .map_init(|| Scanner::new(self), |scanner, data| scanner.scan(data))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile;

    #[test]
    fn test_condition_true_matches_everything() {
        let rules = compile("rule always { condition: true }").unwrap();
        assert!(rules.scan(b"").matched("always"));
        assert!(rules.scan(b"anything at all").matched("always"));
    }

    #[test]
    fn test_match_data_is_opt_in() {
        let rules = compile(r#"rule r { strings: $a = "ab" condition: $a }"#).unwrap();
        let plain = rules.scan(b"xxabxx");
        assert!(plain.matching_rules[0].patterns.is_empty());

        let config = ScanConfig {
            include_match_data: true,
            ..Default::default()
        };
        let detailed = rules.scan_with_config(b"xxabxx", &config).unwrap();
        assert_eq!(
            detailed.matching_rules[0].patterns,
            vec![PatternMatches {
                identifier: "$a".to_string(),
                matches: vec![Match {
                    offset: 2,
                    length: 2
                }],
            }]
        );
    }

    #[test]
    fn test_scanner_reuse_clears_evidence() {
        let rules = compile(r#"rule r { strings: $a = "needle" condition: $a }"#).unwrap();
        let mut scanner = Scanner::new(&rules);
        assert_eq!(scanner.scan(b"a needle here").len(), 1);
        assert!(scanner.scan(b"nothing here").is_empty());
    }

    #[test]
    fn test_set_global_errors() {
        let mut compiler = crate::Compiler::new();
        compiler
            .define_global("limit", 3)
            .unwrap()
            .add_source("rule r { condition: limit > 2 }")
            .unwrap();
        let rules = compiler.build().unwrap();
        let mut scanner = Scanner::new(&rules);
        assert!(matches!(
            scanner.set_global("missing", 1),
            Err(EngineError::InvalidArgument(_))
        ));
        assert!(matches!(
            scanner.set_global("limit", "three"),
            Err(EngineError::InvalidArgument(_))
        ));
        assert_eq!(scanner.scan(b"").len(), 1);
        scanner.set_global("limit", 1).unwrap();
        assert!(scanner.scan(b"").is_empty());
    }

    #[test]
    fn test_match_cap() {
        let rules = compile(r#"rule r { strings: $a = "a" condition: #a == 3 }"#).unwrap();
        let config = ScanConfig {
            max_matches_per_pattern: 3,
            ..Default::default()
        };
        assert!(rules.scan_with_config(b"aaaaaaaa", &config).unwrap().matched("r"));
        assert!(!rules.scan(b"aaaaaaaa").matched("r"));
    }

    #[test]
    fn test_zero_match_cap_rejected() {
        let rules = compile(r#"rule r { strings: $a = "a" condition: $a }"#).unwrap();
        let config = ScanConfig {
            max_matches_per_pattern: 0,
            ..Default::default()
        };
        assert!(matches!(
            Scanner::with_config(&rules, config.clone()),
            Err(EngineError::InvalidArgument(_))
        ));
        assert!(matches!(
            rules.scan_with_config(b"aaa", &config),
            Err(EngineError::InvalidArgument(_))
        ));
        assert!(Scanner::new(&rules).scan(b"aaa").matched("r"));
    }

    #[test]
    fn test_unatomized_hex_pattern() {
        let rules = compile("rule r { strings: $h = { ?? 0? } condition: #h == 2 }").unwrap();
        assert_eq!(rules.atom_count(), 0);
        assert!(rules.scan(b"\x41\x01\x42\x02").matched("r"));
    }
}
