//! Stack-based virtual machine for rule conditions.
//!
//! The VM evaluates one [`BytecodeChunk`] against the evidence of a scan.
//! Values on the stack are typed and may be *undefined* (an out-of-range
//! read, a division by zero, a missing match index). Undefined propagates
//! through arithmetic and comparisons and counts as false wherever a boolean
//! is needed.

use crate::ir::{BytecodeChunk, OfQuantifier, Opcode, PatternId, RuleId};
use crate::scanner::Match;
use regex::bytes::Regex;
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum VmValue<'a> {
    Undefined,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(&'a [u8]),
}

impl<'a> VmValue<'a> {
    pub fn truthy(&self) -> bool {
        match self {
            VmValue::Undefined => false,
            VmValue::Bool(b) => *b,
            VmValue::Int(n) => *n != 0,
            VmValue::Float(f) => *f != 0.0,
            VmValue::Str(s) => !s.is_empty(),
        }
    }
}

/// What a condition can observe about the scan in progress.
pub(crate) trait EvalContext<'a> {
    fn data(&self) -> &'a [u8];
    fn matches(&self, pattern: PatternId) -> &'a [Match];
    fn constant(&self, index: u32) -> &'a [u8];
    fn global(&self, index: u32) -> VmValue<'a>;
    fn condition_regex(&self, index: u32) -> Option<&'a Regex>;
    /// Result of another rule; evaluated on first use and memoized.
    fn rule(&mut self, rule: RuleId) -> bool;
}

pub(crate) struct Vm<'a> {
    stack: Vec<VmValue<'a>>,
}

impl<'a> Vm<'a> {
    pub fn new() -> Self {
        Self { stack: Vec::new() }
    }

    #[cfg(test)]
    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    /// Evaluate `chunk`. Unvalidated chunks never match.
    pub fn execute<C: EvalContext<'a>>(&mut self, chunk: &BytecodeChunk, ctx: &mut C) -> bool {
        if !chunk.is_validated {
            return false;
        }
        self.stack.clear();
        self.stack.reserve(chunk.max_stack_depth);

        let mut pc = 0;
        while let Some(opcode) = chunk.opcodes.get(pc) {
            pc += 1;
            match opcode {
                Opcode::PushBool(b) => self.push(VmValue::Bool(*b)),
                Opcode::PushInt(n) => self.push(VmValue::Int(*n)),
                Opcode::PushFloat(f) => self.push(VmValue::Float(*f)),
                Opcode::PushString(index) => self.push(VmValue::Str(ctx.constant(*index))),
                Opcode::Filesize => self.push(VmValue::Int(ctx.data().len() as i64)),
                Opcode::Global(index) => self.push(ctx.global(*index)),
                Opcode::Rule(rule) => {
                    let result = ctx.rule(*rule);
                    self.push(VmValue::Bool(result));
                }

                Opcode::Matched(pattern) => {
                    let found = !ctx.matches(*pattern).is_empty();
                    self.push(VmValue::Bool(found));
                }
                Opcode::MatchedAt(pattern) => {
                    let value = match self.pop() {
                        VmValue::Int(offset) => {
                            let matches = ctx.matches(*pattern);
                            VmValue::Bool(offset >= 0 && matches_at(matches, offset as usize))
                        }
                        _ => VmValue::Undefined,
                    };
                    self.push(value);
                }
                Opcode::MatchedIn(pattern) => {
                    let value = match self.pop_range() {
                        Some((lower, upper)) => {
                            VmValue::Bool(count_in(ctx.matches(*pattern), lower, upper) > 0)
                        }
                        None => VmValue::Undefined,
                    };
                    self.push(value);
                }
                Opcode::Count(pattern) => {
                    let count = ctx.matches(*pattern).len();
                    self.push(VmValue::Int(count as i64));
                }
                Opcode::CountIn(pattern) => {
                    let value = match self.pop_range() {
                        Some((lower, upper)) => {
                            VmValue::Int(count_in(ctx.matches(*pattern), lower, upper) as i64)
                        }
                        None => VmValue::Undefined,
                    };
                    self.push(value);
                }
                Opcode::Offset(pattern) => {
                    let value = match self.nth_match(ctx.matches(*pattern)) {
                        Some(m) => VmValue::Int(m.offset as i64),
                        None => VmValue::Undefined,
                    };
                    self.push(value);
                }
                Opcode::Length(pattern) => {
                    let value = match self.nth_match(ctx.matches(*pattern)) {
                        Some(m) => VmValue::Int(m.length as i64),
                        None => VmValue::Undefined,
                    };
                    self.push(value);
                }
                Opcode::ReadInt {
                    width,
                    signed,
                    big_endian,
                } => {
                    let value = match self.pop() {
                        VmValue::Int(offset) => {
                            read_int(ctx.data(), offset, *width, *signed, *big_endian)
                        }
                        _ => VmValue::Undefined,
                    };
                    self.push(value);
                }

                Opcode::Not => {
                    let value = match self.pop() {
                        VmValue::Undefined => VmValue::Undefined,
                        other => VmValue::Bool(!other.truthy()),
                    };
                    self.push(value);
                }
                Opcode::ToBool => {
                    let value = self.pop().truthy();
                    self.push(VmValue::Bool(value));
                }
                Opcode::JumpIfFalse(offset) => {
                    if !self.pop().truthy() {
                        self.push(VmValue::Bool(false));
                        pc += *offset as usize;
                    }
                }
                Opcode::JumpIfTrue(offset) => {
                    if self.pop().truthy() {
                        self.push(VmValue::Bool(true));
                        pc += *offset as usize;
                    }
                }

                Opcode::Neg => {
                    let value = match self.pop() {
                        VmValue::Int(n) => VmValue::Int(n.wrapping_neg()),
                        VmValue::Float(f) => VmValue::Float(-f),
                        _ => VmValue::Undefined,
                    };
                    self.push(value);
                }
                Opcode::BitNot => {
                    let value = match self.pop() {
                        VmValue::Int(n) => VmValue::Int(!n),
                        _ => VmValue::Undefined,
                    };
                    self.push(value);
                }
                Opcode::Add => self.arithmetic(|a, b| Some(a.wrapping_add(b)), |a, b| Some(a + b)),
                Opcode::Sub => self.arithmetic(|a, b| Some(a.wrapping_sub(b)), |a, b| Some(a - b)),
                Opcode::Mul => self.arithmetic(|a, b| Some(a.wrapping_mul(b)), |a, b| Some(a * b)),
                Opcode::Div => self.arithmetic(
                    |a, b| (b != 0).then(|| a.wrapping_div(b)),
                    |a, b| (b != 0.0).then(|| a / b),
                ),
                Opcode::Mod => self.integer_op(|a, b| (b != 0).then(|| a.wrapping_rem(b))),
                Opcode::BitAnd => self.integer_op(|a, b| Some(a & b)),
                Opcode::BitOr => self.integer_op(|a, b| Some(a | b)),
                Opcode::BitXor => self.integer_op(|a, b| Some(a ^ b)),
                Opcode::Shl => self.integer_op(|a, b| match b {
                    b if b < 0 => None,
                    b if b >= 64 => Some(0),
                    b => Some(a.wrapping_shl(b as u32)),
                }),
                Opcode::Shr => self.integer_op(|a, b| match b {
                    b if b < 0 => None,
                    b if b >= 64 => Some(0),
                    b => Some(a.wrapping_shr(b as u32)),
                }),

                Opcode::Eq => self.compare(|o| o == Ordering::Equal),
                Opcode::Ne => self.compare(|o| o != Ordering::Equal),
                Opcode::Lt => self.compare(|o| o == Ordering::Less),
                Opcode::Le => self.compare(|o| o != Ordering::Greater),
                Opcode::Gt => self.compare(|o| o == Ordering::Greater),
                Opcode::Ge => self.compare(|o| o != Ordering::Less),
                Opcode::Contains { nocase } => {
                    let nocase = *nocase;
                    self.string_op(|h, n| find(h, n, nocase))
                }
                Opcode::StartsWith { nocase } => {
                    let nocase = *nocase;
                    self.string_op(|h, n| h.len() >= n.len() && bytes_eq(&h[..n.len()], n, nocase))
                }
                Opcode::EndsWith { nocase } => {
                    let nocase = *nocase;
                    self.string_op(|h, n| {
                        h.len() >= n.len() && bytes_eq(&h[h.len() - n.len()..], n, nocase)
                    })
                }
                Opcode::IEquals => self.string_op(|a, b| bytes_eq(a, b, true)),
                Opcode::Matches(index) => {
                    let value = match (self.pop(), ctx.condition_regex(*index)) {
                        (VmValue::Str(s), Some(regex)) => VmValue::Bool(regex.is_match(s)),
                        _ => VmValue::Undefined,
                    };
                    self.push(value);
                }

                Opcode::Of { quantifier, count } => {
                    let count = *count as usize;
                    let start = self.stack.len().saturating_sub(count);
                    let satisfied = self.stack.drain(start..).filter(|v| v.truthy()).count();
                    let result = match quantifier {
                        OfQuantifier::All => satisfied == count,
                        OfQuantifier::Any => satisfied > 0,
                        OfQuantifier::None => satisfied == 0,
                        OfQuantifier::AtLeast(n) => satisfied >= *n as usize,
                        OfQuantifier::Percent(p) => satisfied * 100 >= *p as usize * count,
                    };
                    self.push(VmValue::Bool(result));
                }
                Opcode::Return => return self.pop().truthy(),
            }
        }
        false
    }

    #[inline]
    fn push(&mut self, value: VmValue<'a>) {
        self.stack.push(value);
    }

    #[inline]
    fn pop(&mut self) -> VmValue<'a> {
        self.stack.pop().unwrap_or(VmValue::Undefined)
    }

    /// Pop `upper` then `lower`; both must be integers.
    fn pop_range(&mut self) -> Option<(i64, i64)> {
        let upper = self.pop();
        let lower = self.pop();
        match (lower, upper) {
            (VmValue::Int(lower), VmValue::Int(upper)) => Some((lower, upper)),
            _ => None,
        }
    }

    /// Pop a 1-based index and select that match.
    fn nth_match<'m>(&mut self, matches: &'m [Match]) -> Option<&'m Match> {
        match self.pop() {
            VmValue::Int(index) if index >= 1 => matches.get(index as usize - 1),
            _ => None,
        }
    }

    fn arithmetic(
        &mut self,
        int_op: impl Fn(i64, i64) -> Option<i64>,
        float_op: impl Fn(f64, f64) -> Option<f64>,
    ) {
        let rhs = self.pop();
        let lhs = self.pop();
        let value = match (lhs, rhs) {
            (VmValue::Int(a), VmValue::Int(b)) => int_op(a, b).map(VmValue::Int),
            (a, b) => match (as_float(a), as_float(b)) {
                (Some(a), Some(b)) => float_op(a, b).map(VmValue::Float),
                _ => None,
            },
        };
        self.push(value.unwrap_or(VmValue::Undefined));
    }

    fn integer_op(&mut self, op: impl Fn(i64, i64) -> Option<i64>) {
        let rhs = self.pop();
        let lhs = self.pop();
        let value = match (lhs, rhs) {
            (VmValue::Int(a), VmValue::Int(b)) => op(a, b).map(VmValue::Int),
            _ => None,
        };
        self.push(value.unwrap_or(VmValue::Undefined));
    }

    fn compare(&mut self, predicate: impl Fn(Ordering) -> bool) {
        let rhs = self.pop();
        let lhs = self.pop();
        let ordering = match (lhs, rhs) {
            (VmValue::Int(a), VmValue::Int(b)) => Some(a.cmp(&b)),
            (VmValue::Str(a), VmValue::Str(b)) => Some(a.cmp(b)),
            (VmValue::Bool(a), VmValue::Bool(b)) => Some(a.cmp(&b)),
            (a, b) => match (as_float(a), as_float(b)) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => None,
            },
        };
        let value = match ordering {
            Some(ordering) => VmValue::Bool(predicate(ordering)),
            None => VmValue::Undefined,
        };
        self.push(value);
    }

    fn string_op(&mut self, op: impl Fn(&[u8], &[u8]) -> bool) {
        let rhs = self.pop();
        let lhs = self.pop();
        let value = match (lhs, rhs) {
            (VmValue::Str(a), VmValue::Str(b)) => VmValue::Bool(op(a, b)),
            _ => VmValue::Undefined,
        };
        self.push(value);
    }
}

fn as_float(value: VmValue<'_>) -> Option<f64> {
    match value {
        VmValue::Int(n) => Some(n as f64),
        VmValue::Float(f) => Some(f),
        _ => None,
    }
}

fn bytes_eq(a: &[u8], b: &[u8], nocase: bool) -> bool {
    if nocase {
        a.eq_ignore_ascii_case(b)
    } else {
        a == b
    }
}

fn find(haystack: &[u8], needle: &[u8], nocase: bool) -> bool {
    if needle.is_empty() {
        return true;
    }
    haystack
        .windows(needle.len())
        .any(|window| bytes_eq(window, needle, nocase))
}

/// Matches are sorted by offset.
fn matches_at(matches: &[Match], offset: usize) -> bool {
    matches.binary_search_by(|m| m.offset.cmp(&offset)).is_ok()
}

fn count_in(matches: &[Match], lower: i64, upper: i64) -> usize {
    if upper < 0 || lower > upper {
        return 0;
    }
    let lower = lower.max(0) as usize;
    let upper = upper as usize;
    let first = matches.partition_point(|m| m.offset < lower);
    let end = matches.partition_point(|m| m.offset <= upper);
    end.saturating_sub(first)
}

fn read_int(data: &[u8], offset: i64, width: u8, signed: bool, big_endian: bool) -> VmValue<'_> {
    if offset < 0 {
        return VmValue::Undefined;
    }
    let start = offset as usize;
    let Some(bytes) = start
        .checked_add(width as usize)
        .and_then(|end| data.get(start..end))
    else {
        return VmValue::Undefined;
    };

    let mut raw: u64 = 0;
    if big_endian {
        for &b in bytes {
            raw = (raw << 8) | b as u64;
        }
    } else {
        for &b in bytes.iter().rev() {
            raw = (raw << 8) | b as u64;
        }
    }

    let bits = width as u32 * 8;
    let value = if signed {
        let shift = 64 - bits;
        ((raw << shift) as i64) >> shift
    } else {
        raw as i64
    };
    VmValue::Int(value)
}
