//! Condition type checking and lowering.
//!
//! A rule condition is resolved against the rule's patterns, the rules known
//! to the compiler and the declared external variables. The result is a typed
//! [`Cond`] tree in which every name has become an integer slot and every
//! `for … of` loop has been unrolled over its pattern set; [`super::codegen`]
//! turns that tree into bytecode.

use super::ast::{Anchor, BinaryOp, Expr, ExprKind, PatternSet, Quantifier, Range, UnaryOp};
use crate::error::{EngineError, Location, Result};
use crate::ir::{OfQuantifier, PatternId, RuleId, Type};
use crate::patterns::regexp::build_regex;
use regex::bytes::Regex;
use std::collections::HashMap;

/// Lowered condition expression.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Cond {
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Index into the constant pool.
    Str(u32),
    Filesize,
    Global(u32),
    Rule(RuleId),
    Matched(PatternId),
    MatchedAt(PatternId, Box<Cond>),
    MatchedIn(PatternId, Box<Cond>, Box<Cond>),
    Count(PatternId),
    CountIn(PatternId, Box<Cond>, Box<Cond>),
    Offset(PatternId, Box<Cond>),
    Length(PatternId, Box<Cond>),
    ReadInt {
        width: u8,
        signed: bool,
        big_endian: bool,
        offset: Box<Cond>,
    },
    Not(Box<Cond>),
    And(Box<Cond>, Box<Cond>),
    Or(Box<Cond>, Box<Cond>),
    Neg(Box<Cond>),
    BitNot(Box<Cond>),
    Binary(BinaryOp, Box<Cond>, Box<Cond>),
    /// Index into the condition regex table.
    Matches(Box<Cond>, u32),
    Of(OfQuantifier, Vec<Cond>),
}

/// Names visible from one rule's condition.
pub(crate) struct Scope<'s> {
    /// The rule's patterns as `(name without sigil, id)`; anonymous patterns
    /// have an empty name.
    pub patterns: &'s [(String, PatternId)],
    pub rules: &'s HashMap<String, RuleId>,
    pub globals: &'s HashMap<String, (u32, Type)>,
}

pub(crate) struct ConditionCompiler<'s> {
    scope: Scope<'s>,
    constants: &'s mut Vec<Vec<u8>>,
    condition_regexes: &'s mut Vec<Regex>,
    regex_size_limit: usize,
    used_patterns: Vec<bool>,
    dependencies: Vec<RuleId>,
    loop_pattern: Option<PatternId>,
}

impl<'s> ConditionCompiler<'s> {
    pub fn new(
        scope: Scope<'s>,
        constants: &'s mut Vec<Vec<u8>>,
        condition_regexes: &'s mut Vec<Regex>,
        regex_size_limit: usize,
    ) -> Self {
        let used_patterns = vec![false; scope.patterns.len()];
        Self {
            scope,
            constants,
            condition_regexes,
            regex_size_limit,
            used_patterns,
            dependencies: Vec::new(),
            loop_pattern: None,
        }
    }

    /// Lower a rule condition. Any type is accepted at the top level and
    /// evaluated for truthiness.
    pub fn compile(&mut self, expr: &Expr) -> Result<Cond> {
        let (cond, _) = self.lower(expr)?;
        Ok(cond)
    }

    /// Rules referenced by the lowered condition, without duplicates.
    pub fn dependencies(&self) -> &[RuleId] {
        &self.dependencies
    }

    /// Names of patterns the condition never mentions.
    pub fn unused_patterns(&self) -> impl Iterator<Item = &str> {
        self.scope
            .patterns
            .iter()
            .zip(&self.used_patterns)
            .filter(|(_, used)| !**used)
            .map(|((name, _), _)| name.as_str())
    }

    fn lower(&mut self, expr: &Expr) -> Result<(Cond, Type)> {
        let location = expr.location;
        let lowered = match &expr.kind {
            ExprKind::Bool(b) => (Cond::Bool(*b), Type::Bool),
            ExprKind::Integer(n) => (Cond::Int(*n), Type::Integer),
            ExprKind::Float(f) => (Cond::Float(*f), Type::Float),
            ExprKind::String(s) => (Cond::Str(self.constant(s)), Type::String),
            ExprKind::Filesize => (Cond::Filesize, Type::Integer),

            ExprKind::PatternMatch { name, anchor } => {
                let id = self.pattern(name, location)?;
                let cond = match anchor {
                    None => Cond::Matched(id),
                    Some(Anchor::At(offset)) => {
                        Cond::MatchedAt(id, Box::new(self.integer(offset, "at")?))
                    }
                    Some(Anchor::In(range)) => {
                        let (lower, upper) = self.range(range)?;
                        Cond::MatchedIn(id, Box::new(lower), Box::new(upper))
                    }
                };
                (cond, Type::Bool)
            }
            ExprKind::PatternCount { name, range } => {
                let id = self.pattern(name, location)?;
                let cond = match range {
                    None => Cond::Count(id),
                    Some(range) => {
                        let (lower, upper) = self.range(range)?;
                        Cond::CountIn(id, Box::new(lower), Box::new(upper))
                    }
                };
                (cond, Type::Integer)
            }
            ExprKind::PatternOffset { name, index } => {
                let id = self.pattern(name, location)?;
                let index = self.match_index(index.as_deref())?;
                (Cond::Offset(id, Box::new(index)), Type::Integer)
            }
            ExprKind::PatternLength { name, index } => {
                let id = self.pattern(name, location)?;
                let index = self.match_index(index.as_deref())?;
                (Cond::Length(id, Box::new(index)), Type::Integer)
            }

            ExprKind::Identifier(name) => self.identifier(name, location)?,
            ExprKind::Call { function, args } => self.call(function, args, location)?,

            ExprKind::Not(operand) => {
                let (operand, _) = self.lower(operand)?;
                (Cond::Not(Box::new(operand)), Type::Bool)
            }
            ExprKind::And(lhs, rhs) => {
                let (lhs, _) = self.lower(lhs)?;
                let (rhs, _) = self.lower(rhs)?;
                (Cond::And(Box::new(lhs), Box::new(rhs)), Type::Bool)
            }
            ExprKind::Or(lhs, rhs) => {
                let (lhs, _) = self.lower(lhs)?;
                let (rhs, _) = self.lower(rhs)?;
                (Cond::Or(Box::new(lhs), Box::new(rhs)), Type::Bool)
            }
            ExprKind::Unary { op, operand } => self.unary(*op, operand, location)?,
            ExprKind::Binary { op, lhs, rhs } => self.binary(*op, lhs, rhs, location)?,
            ExprKind::Matches { lhs, regex, flags } => {
                let (operand, ty) = self.lower(lhs)?;
                if ty != Type::String {
                    return Err(EngineError::semantic(
                        format!("`matches` expects a string, found {ty}"),
                        location,
                    ));
                }
                let regex = build_regex(
                    regex,
                    flags.contains('i'),
                    flags.contains('s'),
                    self.regex_size_limit,
                )
                .map_err(|message| EngineError::semantic(message, location))?;
                let index = self.condition_regexes.len() as u32;
                self.condition_regexes.push(regex);
                (Cond::Matches(Box::new(operand), index), Type::Bool)
            }

            ExprKind::Of { quantifier, set } => {
                let ids = self.pattern_set(set, location)?;
                let quantifier = self.quantifier(*quantifier, location)?;
                let items = ids.into_iter().map(Cond::Matched).collect();
                (Cond::Of(quantifier, items), Type::Bool)
            }
            ExprKind::ForOf {
                quantifier,
                set,
                body,
            } => {
                let ids = self.pattern_set(set, location)?;
                let quantifier = self.quantifier(*quantifier, location)?;
                let outer = self.loop_pattern;
                let mut items = Vec::with_capacity(ids.len());
                for id in ids {
                    self.loop_pattern = Some(id);
                    let lowered = self.lower(body);
                    self.loop_pattern = outer;
                    items.push(lowered?.0);
                }
                (Cond::Of(quantifier, items), Type::Bool)
            }
        };
        Ok(lowered)
    }

    fn constant(&mut self, bytes: &[u8]) -> u32 {
        if let Some(index) = self.constants.iter().position(|c| c == bytes) {
            return index as u32;
        }
        self.constants.push(bytes.to_vec());
        (self.constants.len() - 1) as u32
    }

    fn pattern(&mut self, name: &str, location: Location) -> Result<PatternId> {
        if name.is_empty() {
            return self.loop_pattern.ok_or_else(|| {
                EngineError::semantic("anonymous pattern used outside of a `for` loop", location)
            });
        }
        let slot = self
            .scope
            .patterns
            .iter()
            .position(|(declared, _)| declared == name)
            .ok_or_else(|| {
                EngineError::semantic(format!("undefined pattern `${name}`"), location)
            })?;
        self.used_patterns[slot] = true;
        Ok(self.scope.patterns[slot].1)
    }

    fn pattern_set(&mut self, set: &PatternSet, location: Location) -> Result<Vec<PatternId>> {
        let ids: Vec<PatternId> = match set {
            PatternSet::Them => {
                self.used_patterns.iter_mut().for_each(|used| *used = true);
                self.scope.patterns.iter().map(|(_, id)| *id).collect()
            }
            PatternSet::Items(items) => {
                let mut ids = Vec::new();
                for item in items {
                    if !item.wildcard {
                        let id = self.pattern(&item.name, item.location)?;
                        if !ids.contains(&id) {
                            ids.push(id);
                        }
                        continue;
                    }
                    let mut found = false;
                    for (slot, (name, id)) in self.scope.patterns.iter().enumerate() {
                        if name.starts_with(item.name.as_str()) {
                            self.used_patterns[slot] = true;
                            found = true;
                            if !ids.contains(id) {
                                ids.push(*id);
                            }
                        }
                    }
                    if !found {
                        return Err(EngineError::semantic(
                            format!("no pattern matches `${}*`", item.name),
                            item.location,
                        ));
                    }
                }
                ids
            }
        };
        if ids.is_empty() {
            return Err(EngineError::semantic("empty pattern set", location));
        }
        Ok(ids)
    }

    fn quantifier(&self, quantifier: Quantifier, location: Location) -> Result<OfQuantifier> {
        Ok(match quantifier {
            Quantifier::All => OfQuantifier::All,
            Quantifier::Any => OfQuantifier::Any,
            Quantifier::None => OfQuantifier::None,
            Quantifier::Count(n) => match u32::try_from(n) {
                Ok(n) => OfQuantifier::AtLeast(n),
                Err(_) => {
                    return Err(EngineError::semantic(
                        format!("invalid quantifier {n}"),
                        location,
                    ))
                }
            },
            Quantifier::Percent(p) => match u8::try_from(p) {
                Ok(p) if p <= 100 => OfQuantifier::Percent(p),
                _ => {
                    return Err(EngineError::semantic(
                        format!("percentage must be between 0 and 100, got {p}"),
                        location,
                    ))
                }
            },
        })
    }

    fn integer(&mut self, expr: &Expr, context: &str) -> Result<Cond> {
        let (cond, ty) = self.lower(expr)?;
        if ty != Type::Integer {
            return Err(EngineError::semantic(
                format!("`{context}` expects an integer, found {ty}"),
                expr.location,
            ));
        }
        Ok(cond)
    }

    fn range(&mut self, range: &Range) -> Result<(Cond, Cond)> {
        let lower = self.integer(&range.lower, "..")?;
        let upper = self.integer(&range.upper, "..")?;
        if let (Cond::Int(lo), Cond::Int(hi)) = (&lower, &upper) {
            if lo > hi || *lo < 0 {
                return Err(EngineError::semantic(
                    format!("invalid range ({lo}..{hi})"),
                    range.lower.location,
                ));
            }
        }
        Ok((lower, upper))
    }

    /// `@a` and `!a` without an index refer to the first match.
    fn match_index(&mut self, index: Option<&Expr>) -> Result<Cond> {
        let Some(index) = index else {
            return Ok(Cond::Int(1));
        };
        let cond = self.integer(index, "[]")?;
        if let Cond::Int(n) = cond {
            if n < 1 {
                return Err(EngineError::semantic(
                    format!("match index must be at least 1, got {n}"),
                    index.location,
                ));
            }
        }
        Ok(cond)
    }

    fn identifier(&mut self, name: &str, location: Location) -> Result<(Cond, Type)> {
        if let Some(&rule) = self.scope.rules.get(name) {
            if !self.dependencies.contains(&rule) {
                self.dependencies.push(rule);
            }
            return Ok((Cond::Rule(rule), Type::Bool));
        }
        if let Some(&(slot, ty)) = self.scope.globals.get(name) {
            return Ok((Cond::Global(slot), ty));
        }
        Err(EngineError::semantic(
            format!("unknown identifier `{name}`"),
            location,
        ))
    }

    fn call(&mut self, function: &str, args: &[Expr], location: Location) -> Result<(Cond, Type)> {
        let (base, big_endian) = match function.strip_suffix("be") {
            Some(base) => (base, true),
            None => (function, false),
        };
        let (width, signed) = match base {
            "uint8" => (1, false),
            "uint16" => (2, false),
            "uint32" => (4, false),
            "int8" => (1, true),
            "int16" => (2, true),
            "int32" => (4, true),
            _ => {
                return Err(EngineError::semantic(
                    format!("unknown function `{function}`"),
                    location,
                ))
            }
        };
        let [offset] = args else {
            return Err(EngineError::semantic(
                format!("`{function}` expects 1 argument, got {}", args.len()),
                location,
            ));
        };
        let offset = self.integer(offset, function)?;
        Ok((
            Cond::ReadInt {
                width,
                signed,
                big_endian,
                offset: Box::new(offset),
            },
            Type::Integer,
        ))
    }

    fn unary(&mut self, op: UnaryOp, operand: &Expr, location: Location) -> Result<(Cond, Type)> {
        let (operand, ty) = self.lower(operand)?;
        match (op, operand, ty) {
            (UnaryOp::Neg, Cond::Int(n), _) => Ok((Cond::Int(n.wrapping_neg()), Type::Integer)),
            (UnaryOp::Neg, Cond::Float(f), _) => Ok((Cond::Float(-f), Type::Float)),
            (UnaryOp::Neg, operand, ty) if ty.is_numeric() => {
                Ok((Cond::Neg(Box::new(operand)), ty))
            }
            (UnaryOp::BitNot, operand, Type::Integer) => {
                Ok((Cond::BitNot(Box::new(operand)), Type::Integer))
            }
            (op, _, ty) => {
                let symbol = match op {
                    UnaryOp::Neg => "-",
                    UnaryOp::BitNot => "~",
                };
                Err(EngineError::semantic(
                    format!("operator `{symbol}` cannot be applied to {ty}"),
                    location,
                ))
            }
        }
    }

    fn binary(
        &mut self,
        op: BinaryOp,
        lhs: &Expr,
        rhs: &Expr,
        location: Location,
    ) -> Result<(Cond, Type)> {
        let (lhs, lt) = self.lower(lhs)?;
        let (rhs, rt) = self.lower(rhs)?;

        let result = match op {
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
                match (lt, rt) {
                    (Type::Integer, Type::Integer) => Some(Type::Integer),
                    (l, r) if l.is_numeric() && r.is_numeric() => Some(Type::Float),
                    _ => None,
                }
            }
            BinaryOp::Mod
            | BinaryOp::BitAnd
            | BinaryOp::BitOr
            | BinaryOp::BitXor
            | BinaryOp::Shl
            | BinaryOp::Shr => {
                (lt == Type::Integer && rt == Type::Integer).then_some(Type::Integer)
            }
            BinaryOp::Eq | BinaryOp::Ne => {
                let comparable = (lt.is_numeric() && rt.is_numeric())
                    || (lt == Type::String && rt == Type::String)
                    || (lt == Type::Bool && rt == Type::Bool);
                comparable.then_some(Type::Bool)
            }
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                let comparable = (lt.is_numeric() && rt.is_numeric())
                    || (lt == Type::String && rt == Type::String);
                comparable.then_some(Type::Bool)
            }
            BinaryOp::Contains
            | BinaryOp::IContains
            | BinaryOp::StartsWith
            | BinaryOp::IStartsWith
            | BinaryOp::EndsWith
            | BinaryOp::IEndsWith
            | BinaryOp::IEquals => {
                (lt == Type::String && rt == Type::String).then_some(Type::Bool)
            }
        };

        match result {
            Some(ty) => Ok((Cond::Binary(op, Box::new(lhs), Box::new(rhs)), ty)),
            None => Err(EngineError::semantic(
                format!(
                    "type mismatch: `{}` cannot be applied to {lt} and {rt}",
                    op.symbol()
                ),
                location,
            )),
        }
    }
}
