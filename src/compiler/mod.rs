//! Rule compiler.
//!
//! This module turns rule source text into a sealed [`Rules`] value. The
//! compiler is organized into several sub-modules:
//! - [`lexer`] and [`parser`] - tokenization and recursive-descent parsing
//!   into the [`ast`]
//! - [`condition`] - name resolution, type checking and lowering of
//!   conditions
//! - [`codegen`] - bytecode generation from lowered conditions
//! - [`rule_graph`] - rule reference cycle and global dependency checks
//!
//! Patterns are compiled by [`crate::patterns`] and their atoms collected
//! into the shared [`Automaton`] when the compiler is built.
//!
//! # Examples
//!
//! ```rust
//! use scan_engine::Compiler;
//!
//! let mut compiler = Compiler::new();
//! compiler.add_source(r#"
//!     rule mz_header {
//!         strings:
//!             $mz = { 4D 5A }
//!         condition:
//!             $mz at 0
//!     }
//! "#)?;
//! let rules = compiler.build()?;
//!
//! assert_eq!(rules.scan(b"MZ\x90\x00").len(), 1);
//! # Ok::<(), scan_engine::EngineError>(())
//! ```

pub(crate) mod ast;
pub(crate) mod codegen;
pub(crate) mod condition;
pub(crate) mod lexer;
pub(crate) mod parser;
pub(crate) mod rule_graph;

use crate::automaton::{AtomEntry, Automaton};
use crate::config::CompilerConfig;
use crate::error::{EngineError, Result};
use crate::ir::{
    CompiledRule, GlobalVariable, PatternId, RuleId, RulePattern, Rules, Type, Value,
};
use crate::patterns::atoms::{best_atom, best_atom_in_runs, case_variants};
use crate::patterns::regexp::RegexMatcher;
use crate::patterns::{self, CompiledPattern, PatternKey, SubPattern, SubPatternMatcher};
use ast::RuleDecl;
use condition::{ConditionCompiler, Scope};
use lexer::Token;
use regex::bytes::Regex;
use rule_graph::RuleGraph;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Compile a single source unit with the default configuration.
///
/// # Examples
///
/// ```rust
/// let rules = scan_engine::compile("rule always { condition: true }")?;
/// assert_eq!(rules.rule_count(), 1);
/// # Ok::<(), scan_engine::EngineError>(())
/// ```
pub fn compile(source: &str) -> Result<Rules> {
    let mut compiler = Compiler::new();
    compiler.add_source(source)?;
    compiler.build()
}

/// Incremental rule compiler.
///
/// Source units are added one at a time; rules of a later unit may refer to
/// rules of earlier ones. Patterns that are identical across rules are
/// compiled once and share a [`PatternId`].
///
/// # Examples
///
/// ```rust
/// use scan_engine::Compiler;
///
/// let mut compiler = Compiler::new();
/// compiler
///     .define_global("min_size", 16)?
///     .add_source("rule big { condition: filesize >= min_size }")?;
/// assert_eq!(compiler.rule_count(), 1);
/// # Ok::<(), scan_engine::EngineError>(())
/// ```
#[derive(Debug)]
pub struct Compiler {
    config: CompilerConfig,
    rules: Vec<CompiledRule>,
    rule_index: HashMap<String, RuleId>,
    pattern_map: HashMap<PatternKey, PatternId>,
    pattern_count: usize,
    sub_patterns: Vec<SubPattern>,
    unatomized: Vec<usize>,
    atoms: Vec<(Vec<u8>, AtomEntry)>,
    regexes: Vec<(PatternId, RegexMatcher)>,
    globals: Vec<GlobalVariable>,
    global_index: HashMap<String, (u32, Type)>,
    constants: Vec<Vec<u8>>,
    condition_regexes: Vec<Regex>,
}

/// Lengths of the compiler tables before a source unit was added.
struct Checkpoint {
    rules: usize,
    pattern_count: usize,
    sub_patterns: usize,
    unatomized: usize,
    atoms: usize,
    regexes: usize,
    constants: usize,
    condition_regexes: usize,
}

impl Compiler {
    /// Create a compiler with the default configuration.
    pub fn new() -> Self {
        Self::with_config(CompilerConfig::default())
    }

    /// Create a compiler with custom limits.
    ///
    /// The configuration is validated by the first [`Compiler::add_source`].
    pub fn with_config(config: CompilerConfig) -> Self {
        Self {
            config,
            rules: Vec::new(),
            rule_index: HashMap::new(),
            pattern_map: HashMap::new(),
            pattern_count: 0,
            sub_patterns: Vec::new(),
            unatomized: Vec::new(),
            atoms: Vec::new(),
            regexes: Vec::new(),
            globals: Vec::new(),
            global_index: HashMap::new(),
            constants: Vec::new(),
            condition_regexes: Vec::new(),
        }
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Number of distinct patterns compiled so far.
    pub fn pattern_count(&self) -> usize {
        self.pattern_count
    }

    /// Compile one source unit.
    ///
    /// The unit is all-or-nothing: on error the compiler is left exactly as
    /// it was before the call.
    ///
    /// # Errors
    /// - [`EngineError::Syntax`] for malformed text
    /// - [`EngineError::Semantic`] for duplicate or undefined names, type
    ///   errors, cyclic references, imports and includes
    /// - [`EngineError::Pattern`] for patterns that cannot be compiled
    /// - [`EngineError::Resource`] when a pattern exceeds a configured limit
    pub fn add_source(&mut self, source: &str) -> Result<&mut Self> {
        self.config.validate()?;
        let checkpoint = self.checkpoint();
        match self.add_unit(source) {
            Ok(added) => {
                debug!(rules = added, total = self.rules.len(), "added source unit");
                Ok(self)
            }
            Err(error) => {
                self.rollback(checkpoint);
                Err(error)
            }
        }
    }

    /// Declare an external variable with its default value.
    ///
    /// Conditions compiled afterwards may refer to it by name; scanners can
    /// override the value per scan. Redefining a variable with a value of the
    /// same type replaces the default.
    ///
    /// # Errors
    /// [`EngineError::InvalidArgument`] if the name is not an identifier,
    /// collides with a rule, or is already defined with another type.
    pub fn define_global(&mut self, name: &str, value: impl Into<Value>) -> Result<&mut Self> {
        let value = value.into();
        if !is_identifier(name) {
            return Err(EngineError::InvalidArgument(format!(
                "`{name}` is not a valid variable name"
            )));
        }
        if self.rule_index.contains_key(name) {
            return Err(EngineError::InvalidArgument(format!(
                "`{name}` is already the name of a rule"
            )));
        }

        match self.global_index.get(name) {
            Some(&(slot, ty)) => {
                if ty != value.value_type() {
                    return Err(EngineError::InvalidArgument(format!(
                        "variable `{name}` is {ty}, cannot redefine it as {}",
                        value.value_type()
                    )));
                }
                self.globals[slot as usize].value = value;
            }
            None => {
                let slot = self.globals.len() as u32;
                self.global_index
                    .insert(name.to_string(), (slot, value.value_type()));
                self.globals.push(GlobalVariable {
                    name: name.to_string(),
                    value,
                });
            }
        }
        Ok(self)
    }

    /// Seal the compiler into an immutable ruleset.
    ///
    /// # Errors
    /// [`EngineError::Resource`] if the atom automaton exceeds
    /// `max_atoms` or cannot be built.
    pub fn build(self) -> Result<Rules> {
        let automaton = Automaton::build(self.atoms, self.config.max_atoms)?;
        let global_rules: Vec<RuleId> = self
            .rules
            .iter()
            .enumerate()
            .filter(|(_, rule)| rule.is_global)
            .map(|(id, _)| id as RuleId)
            .collect();

        debug!(
            rules = self.rules.len(),
            patterns = self.pattern_count,
            atoms = automaton.atom_count(),
            regexes = self.regexes.len(),
            unatomized = self.unatomized.len(),
            "built ruleset"
        );

        Ok(Rules {
            rules: self.rules,
            automaton,
            sub_patterns: self.sub_patterns,
            unatomized: self.unatomized,
            regexes: self.regexes,
            pattern_count: self.pattern_count,
            globals: self.globals,
            constants: self.constants,
            condition_regexes: self.condition_regexes,
            global_rules,
        })
    }

    fn add_unit(&mut self, source: &str) -> Result<usize> {
        let unit = parser::parse_source(source, self.config.max_nesting)?;

        if let Some(import) = unit.imports.first() {
            return Err(EngineError::semantic(
                format!("unknown module `{}`", import.module),
                import.location,
            ));
        }

        let base = self.rules.len() as RuleId;
        for (offset, rule) in unit.rules.iter().enumerate() {
            if self.rule_index.contains_key(&rule.name) {
                return Err(EngineError::semantic(
                    format!("duplicate rule `{}`", rule.name),
                    rule.location,
                ));
            }
            if self.global_index.contains_key(&rule.name) {
                return Err(EngineError::semantic(
                    format!("rule `{}` conflicts with an external variable", rule.name),
                    rule.location,
                ));
            }
            self.rule_index
                .insert(rule.name.clone(), base + offset as RuleId);
        }

        let mut graph = RuleGraph::new(base);
        for (offset, rule) in unit.rules.iter().enumerate() {
            let rule_id = base + offset as RuleId;
            let compiled = self.compile_rule(rule, rule_id, &mut graph)?;
            self.rules.push(compiled);
        }

        graph.check_cycles()?;
        graph.check_global_dependencies(&self.rules)?;
        Ok(unit.rules.len())
    }

    fn compile_rule(
        &mut self,
        rule: &RuleDecl,
        rule_id: RuleId,
        graph: &mut RuleGraph,
    ) -> Result<CompiledRule> {
        let mut patterns = Vec::with_capacity(rule.patterns.len());
        let mut scope_patterns = Vec::with_capacity(rule.patterns.len());
        for decl in &rule.patterns {
            let (key, modifiers, compiled) = patterns::compile_pattern(decl, &self.config)?;
            let id = match self.pattern_map.get(&key) {
                Some(&id) => id,
                None => {
                    let id = self.pattern_count as PatternId;
                    self.pattern_count += 1;
                    self.register_pattern(id, compiled);
                    self.pattern_map.insert(key, id);
                    id
                }
            };
            patterns.push(RulePattern {
                identifier: decl.display_name(),
                id,
                private: modifiers.private,
            });
            scope_patterns.push((decl.name.clone(), id));
        }

        let scope = Scope {
            patterns: &scope_patterns,
            rules: &self.rule_index,
            globals: &self.global_index,
        };
        let mut conditions = ConditionCompiler::new(
            scope,
            &mut self.constants,
            &mut self.condition_regexes,
            self.config.regex_size_limit,
        );
        let cond = conditions.compile(&rule.condition)?;
        for name in conditions.unused_patterns() {
            warn!(rule = %rule.name, pattern = %format!("${name}"), "pattern is never referenced");
        }
        graph.add_rule(
            &rule.name,
            rule.location,
            rule.is_global,
            conditions.dependencies().to_vec(),
        );

        Ok(CompiledRule {
            name: rule.name.clone(),
            tags: rule.tags.clone(),
            metadata: rule.metadata.clone(),
            is_private: rule.is_private,
            is_global: rule.is_global,
            patterns,
            chunk: codegen::generate_bytecode(&cond, rule_id),
        })
    }

    /// Split a newly compiled pattern into sub-patterns and their atoms.
    fn register_pattern(&mut self, id: PatternId, compiled: CompiledPattern) {
        let max_atom_len = self.config.max_atom_len;
        match compiled {
            CompiledPattern::Literals(variants) => {
                for variant in variants {
                    let atom = best_atom(&variant.bytes, max_atom_len);
                    let nocase = variant.nocase;
                    let sub_pattern = self.push_sub_pattern(id, SubPatternMatcher::Literal(variant));
                    match atom {
                        Some(atom) if nocase => {
                            for bytes in case_variants(&atom.bytes) {
                                self.push_atom(bytes, sub_pattern, atom.backtrack);
                            }
                        }
                        Some(atom) => self.push_atom(atom.bytes, sub_pattern, atom.backtrack),
                        None => self.unatomized.push(sub_pattern),
                    }
                }
            }
            CompiledPattern::Hex(program) => {
                let runs: Vec<Option<u8>> = program.prefix().iter().map(|b| b.exact()).collect();
                let atom = best_atom_in_runs(&runs, max_atom_len);
                let sub_pattern = self.push_sub_pattern(id, SubPatternMatcher::Hex(program));
                match atom {
                    Some(atom) => self.push_atom(atom.bytes, sub_pattern, atom.backtrack),
                    None => self.unatomized.push(sub_pattern),
                }
            }
            CompiledPattern::Regex(matcher) => self.regexes.push((id, matcher)),
        }
    }

    fn push_sub_pattern(&mut self, pattern: PatternId, matcher: SubPatternMatcher) -> usize {
        self.sub_patterns.push(SubPattern { pattern, matcher });
        self.sub_patterns.len() - 1
    }

    fn push_atom(&mut self, bytes: Vec<u8>, sub_pattern: usize, backtrack: usize) {
        self.atoms.push((
            bytes,
            AtomEntry {
                sub_pattern: sub_pattern as u32,
                backtrack: backtrack as u32,
            },
        ));
    }

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            rules: self.rules.len(),
            pattern_count: self.pattern_count,
            sub_patterns: self.sub_patterns.len(),
            unatomized: self.unatomized.len(),
            atoms: self.atoms.len(),
            regexes: self.regexes.len(),
            constants: self.constants.len(),
            condition_regexes: self.condition_regexes.len(),
        }
    }

    fn rollback(&mut self, checkpoint: Checkpoint) {
        self.rules.truncate(checkpoint.rules);
        self.rule_index
            .retain(|_, id| (*id as usize) < checkpoint.rules);
        self.pattern_count = checkpoint.pattern_count;
        self.pattern_map
            .retain(|_, id| (*id as usize) < checkpoint.pattern_count);
        self.sub_patterns.truncate(checkpoint.sub_patterns);
        self.unatomized.truncate(checkpoint.unatomized);
        self.atoms.truncate(checkpoint.atoms);
        self.regexes.truncate(checkpoint.regexes);
        self.constants.truncate(checkpoint.constants);
        self.condition_regexes.truncate(checkpoint.condition_regexes);
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

/// A variable name must lex as a single plain identifier, which rules out
/// keywords.
fn is_identifier(name: &str) -> bool {
    match lexer::tokenize(name) {
        Ok(tokens) => matches!(
            tokens.as_slice(),
            [first, last] if matches!(&first.token, Token::Identifier(id) if id == name)
                && last.token == Token::Eof
        ),
        Err(_) => false,
    }
}
