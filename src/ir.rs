//! Intermediate representation shared by the compiler and the scanner.
//!
//! Conditions are lowered into [`BytecodeChunk`]s of [`Opcode`]s for the
//! stack VM in [`crate::vm`]. The compiled ruleset ([`Rules`]) owns those
//! chunks together with the automaton and every compiled pattern.

use crate::automaton::Automaton;
use crate::patterns::regexp::RegexMatcher;
use crate::patterns::SubPattern;
use regex::bytes::Regex;
use serde::Serialize;
use std::fmt;

pub type PatternId = u32;
pub type RuleId = u32;

/// Static type of a condition expression or external variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    Bool,
    Integer,
    Float,
    String,
}

impl Type {
    pub fn is_numeric(&self) -> bool {
        matches!(self, Type::Integer | Type::Float)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Type::Bool => "bool",
            Type::Integer => "integer",
            Type::Float => "float",
            Type::String => "string",
        };
        f.write_str(name)
    }
}

/// Value of an external variable.
///
/// # Examples
///
/// ```rust
/// use scan_engine::{Type, Value};
///
/// assert_eq!(Value::from(42).value_type(), Type::Integer);
/// assert_eq!(Value::from("abc"), Value::String(b"abc".to_vec()));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(Vec<u8>),
}

impl Value {
    pub fn value_type(&self) -> Type {
        match self {
            Value::Bool(_) => Type::Bool,
            Value::Integer(_) => Type::Integer,
            Value::Float(_) => Type::Float,
            Value::String(_) => Type::String,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(value.into())
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.as_bytes().to_vec())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value.into_bytes())
    }
}

impl From<&[u8]> for Value {
    fn from(value: &[u8]) -> Self {
        Value::String(value.to_vec())
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::String(value)
    }
}

/// Rule metadata value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetaValue {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
}

/// Quantifier of an `of` expression, resolved against its pattern set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfQuantifier {
    All,
    Any,
    None,
    AtLeast(u32),
    Percent(u8),
}

/// Bytecode opcodes for the condition VM.
///
/// Jump offsets are relative to the instruction that follows the jump.
#[derive(Debug, Clone, PartialEq)]
pub enum Opcode {
    PushBool(bool),
    PushInt(i64),
    PushFloat(f64),
    /// Push a string from the constant pool.
    PushString(u32),
    Filesize,
    /// Push the value of an external variable.
    Global(u32),
    /// Push the (memoized) result of another rule.
    Rule(RuleId),

    /// `$a`
    Matched(PatternId),
    /// `$a at <offset>`: pops the offset.
    MatchedAt(PatternId),
    /// `$a in (<lo>..<hi>)`: pops both bounds.
    MatchedIn(PatternId),
    /// `#a`
    Count(PatternId),
    /// `#a in (<lo>..<hi>)`: pops both bounds.
    CountIn(PatternId),
    /// `@a[<index>]`: pops the 1-based index.
    Offset(PatternId),
    /// `!a[<index>]`: pops the 1-based index.
    Length(PatternId),
    /// `uintN(<offset>)` and friends: pops the offset.
    ReadInt {
        width: u8,
        signed: bool,
        big_endian: bool,
    },

    Not,
    /// Collapse the top of the stack to a boolean (undefined becomes false).
    ToBool,
    /// If the top is not true, replace it with `false` and jump; else pop it.
    JumpIfFalse(u32),
    /// If the top is true, replace it with `true` and jump; else pop it.
    JumpIfTrue(u32),

    Neg,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    BitNot,
    Shl,
    Shr,

    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Contains { nocase: bool },
    StartsWith { nocase: bool },
    EndsWith { nocase: bool },
    IEquals,
    /// Match the string on the stack against a condition regex.
    Matches(u32),

    /// Pop `count` booleans and apply the quantifier.
    Of {
        quantifier: OfQuantifier,
        count: u32,
    },
    Return,
}

impl Opcode {
    /// Net change of the stack depth when the instruction falls through.
    fn stack_effect(&self) -> isize {
        match self {
            Opcode::PushBool(_)
            | Opcode::PushInt(_)
            | Opcode::PushFloat(_)
            | Opcode::PushString(_)
            | Opcode::Filesize
            | Opcode::Global(_)
            | Opcode::Rule(_)
            | Opcode::Matched(_)
            | Opcode::Count(_) => 1,
            Opcode::MatchedAt(_)
            | Opcode::Offset(_)
            | Opcode::Length(_)
            | Opcode::ReadInt { .. }
            | Opcode::Not
            | Opcode::ToBool
            | Opcode::Neg
            | Opcode::BitNot
            | Opcode::Matches(_) => 0,
            Opcode::MatchedIn(_)
            | Opcode::CountIn(_)
            | Opcode::JumpIfFalse(_)
            | Opcode::JumpIfTrue(_)
            | Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::Mod
            | Opcode::BitAnd
            | Opcode::BitOr
            | Opcode::BitXor
            | Opcode::Shl
            | Opcode::Shr
            | Opcode::Eq
            | Opcode::Ne
            | Opcode::Lt
            | Opcode::Le
            | Opcode::Gt
            | Opcode::Ge
            | Opcode::Contains { .. }
            | Opcode::StartsWith { .. }
            | Opcode::EndsWith { .. }
            | Opcode::IEquals
            | Opcode::Return => -1,
            Opcode::Of { count, .. } => 1 - *count as isize,
        }
    }

    /// Number of operands the instruction reads from the stack.
    fn stack_inputs(&self) -> isize {
        match self {
            Opcode::Of { count, .. } => *count as isize,
            Opcode::MatchedIn(_) | Opcode::CountIn(_) => 2,
            Opcode::JumpIfFalse(_) | Opcode::JumpIfTrue(_) | Opcode::Return => 1,
            other => match other.stack_effect() {
                1 => 0,
                0 => 1,
                _ => 2,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BytecodeChunk {
    pub rule_id: RuleId,
    pub opcodes: Vec<Opcode>,
    pub max_stack_depth: usize,
    pub is_validated: bool,
}

impl BytecodeChunk {
    pub fn new(rule_id: RuleId, opcodes: Vec<Opcode>) -> Self {
        let max_stack_depth = Self::calculate_max_stack_depth(&opcodes);
        let is_validated = Self::validate_bytecode_structure(&opcodes);
        Self {
            rule_id,
            opcodes,
            max_stack_depth,
            is_validated,
        }
    }

    fn calculate_max_stack_depth(opcodes: &[Opcode]) -> usize {
        let mut current: isize = 0;
        let mut max: isize = 0;
        for opcode in opcodes {
            current += opcode.stack_effect();
            max = max.max(current);
        }
        max as usize
    }

    /// Structural check: ends in `Return`, never underflows, leaves an empty
    /// stack, and every jump lands inside the chunk on a matching depth.
    fn validate_bytecode_structure(opcodes: &[Opcode]) -> bool {
        if !matches!(opcodes.last(), Some(Opcode::Return)) {
            return false;
        }

        let mut depths: Vec<isize> = Vec::with_capacity(opcodes.len() + 1);
        let mut depth: isize = 0;
        for opcode in opcodes {
            if depth < opcode.stack_inputs() {
                return false;
            }
            depths.push(depth);
            depth += opcode.stack_effect();
        }
        depths.push(depth);
        if depth != 0 {
            return false;
        }

        for (index, opcode) in opcodes.iter().enumerate() {
            if let Opcode::JumpIfFalse(offset) | Opcode::JumpIfTrue(offset) = opcode {
                let target = index + 1 + *offset as usize;
                // The jump keeps its operand on the stack.
                match depths.get(target) {
                    Some(&at_target) if at_target == depths[index] => {}
                    _ => return false,
                }
            }
        }
        true
    }
}

/// A pattern as declared by one rule.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RulePattern {
    /// Identifier including the `$` sigil.
    pub identifier: String,
    pub id: PatternId,
    pub private: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct CompiledRule {
    pub name: String,
    pub tags: Vec<String>,
    pub metadata: Vec<(String, MetaValue)>,
    pub is_private: bool,
    pub is_global: bool,
    pub patterns: Vec<RulePattern>,
    pub chunk: BytecodeChunk,
}

/// An external variable with its compile-time default.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct GlobalVariable {
    pub name: String,
    pub value: Value,
}

/// A sealed, immutable ruleset.
///
/// `Rules` is produced by [`crate::Compiler::build`] or [`crate::compile`],
/// can be shared freely between threads and scanned concurrently, and is
/// released by dropping it.
#[derive(Debug)]
pub struct Rules {
    pub(crate) rules: Vec<CompiledRule>,
    pub(crate) automaton: Automaton,
    pub(crate) sub_patterns: Vec<SubPattern>,
    /// Sub-patterns without an atom, verified at every offset.
    pub(crate) unatomized: Vec<usize>,
    pub(crate) regexes: Vec<(PatternId, RegexMatcher)>,
    pub(crate) pattern_count: usize,
    pub(crate) globals: Vec<GlobalVariable>,
    pub(crate) constants: Vec<Vec<u8>>,
    pub(crate) condition_regexes: Vec<Regex>,
    pub(crate) global_rules: Vec<RuleId>,
}

impl Rules {
    /// Number of rules, private and global rules included.
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Number of distinct patterns after deduplication across rules.
    pub fn pattern_count(&self) -> usize {
        self.pattern_count
    }

    /// Number of distinct atoms loaded in the automaton.
    pub fn atom_count(&self) -> usize {
        self.automaton.atom_count()
    }

    /// Rule names in declaration order.
    pub fn rule_names(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|rule| rule.name.as_str())
    }
}
