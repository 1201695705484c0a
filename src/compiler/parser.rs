//! Recursive descent parser for the rule language.
//!
//! The parser works on the token vector produced by [`super::lexer`] with one
//! token of lookahead (two for the `N% of` quantifier form). It only checks
//! structure and the purely local uniqueness constraints of a rule (pattern
//! identifiers and tags); name resolution and typing happen in
//! [`super::condition`].

use super::ast::*;
use super::lexer::{tokenize, Spanned, Token};
use crate::error::{EngineError, Location, Result};
use crate::ir::MetaValue;
use std::collections::HashSet;

/// Parse a complete compilation unit. Conditions nested deeper than
/// `max_nesting` are a syntax error.
pub(crate) fn parse_source(source: &str, max_nesting: usize) -> Result<SourceUnit> {
    let tokens = tokenize(source)?;
    let mut parser = RuleParser::new(&tokens, max_nesting);
    parser.parse_source_unit()
}

pub(crate) struct RuleParser<'a> {
    tokens: &'a [Spanned],
    position: usize,
    max_nesting: usize,
    /// Recursive descents currently open.
    depth: usize,
}

impl<'a> RuleParser<'a> {
    pub(crate) fn new(tokens: &'a [Spanned], max_nesting: usize) -> Self {
        Self {
            tokens,
            position: 0,
            max_nesting,
            depth: 0,
        }
    }

    fn current(&self) -> &Token {
        self.peek_nth(0)
    }

    fn peek_nth(&self, n: usize) -> &Token {
        self.tokens
            .get(self.position + n)
            .map(|s| &s.token)
            .unwrap_or(&Token::Eof)
    }

    fn location(&self) -> Location {
        self.tokens
            .get(self.position)
            .or_else(|| self.tokens.last())
            .map(|s| s.location)
            .unwrap_or_default()
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if self.position < self.tokens.len() {
            self.position += 1;
        }
        token
    }

    fn unexpected(&self, expected: &str) -> EngineError {
        EngineError::syntax(
            format!("expected {expected}, found {}", self.current().describe()),
            self.location(),
        )
    }

    fn expect(&mut self, token: Token, expected: &str) -> Result<()> {
        if *self.current() == token {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn expect_identifier(&mut self, expected: &str) -> Result<String> {
        match self.current() {
            Token::Identifier(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected(expected)),
        }
    }

    fn expect_integer(&mut self) -> Result<i64> {
        match *self.current() {
            Token::Integer(value) => {
                self.advance();
                Ok(value)
            }
            _ => Err(self.unexpected("integer")),
        }
    }

    fn expect_string(&mut self) -> Result<Vec<u8>> {
        match self.current() {
            Token::String(bytes) => {
                let bytes = bytes.clone();
                self.advance();
                Ok(bytes)
            }
            _ => Err(self.unexpected("string literal")),
        }
    }

    fn too_deep(&self, location: Location) -> EngineError {
        EngineError::syntax(
            format!("condition nested too deeply (limit {})", self.max_nesting),
            location,
        )
    }

    /// Run `parse` one level deeper, failing once the nesting limit is hit.
    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.depth >= self.max_nesting {
            return Err(self.too_deep(self.location()));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    /// Build an expression node, rejecting trees taller than the limit.
    fn node(&self, kind: ExprKind, location: Location) -> Result<Expr> {
        let expr = Expr::new(kind, location);
        if expr.height > self.max_nesting {
            return Err(self.too_deep(location));
        }
        Ok(expr)
    }

    fn binary(&self, op: BinaryOp, lhs: Expr, rhs: Expr, location: Location) -> Result<Expr> {
        self.node(
            ExprKind::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            location,
        )
    }

    pub(crate) fn parse_source_unit(&mut self) -> Result<SourceUnit> {
        let mut imports = Vec::new();
        let mut rules = Vec::new();

        loop {
            match self.current() {
                Token::Eof => break,
                Token::Import => {
                    let location = self.location();
                    self.advance();
                    let module = String::from_utf8_lossy(&self.expect_string()?).into_owned();
                    imports.push(Import { module, location });
                }
                Token::Include => {
                    let location = self.location();
                    self.advance();
                    self.expect_string()?;
                    return Err(EngineError::semantic(
                        "include directives are not supported",
                        location,
                    ));
                }
                Token::Rule | Token::Private | Token::Global => {
                    rules.push(self.parse_rule()?);
                }
                _ => return Err(self.unexpected("`rule`, `import` or end of input")),
            }
        }

        Ok(SourceUnit { imports, rules })
    }

    fn parse_rule(&mut self) -> Result<RuleDecl> {
        let mut is_private = false;
        let mut is_global = false;
        loop {
            match self.current() {
                Token::Private if !is_private => is_private = true,
                Token::Global if !is_global => is_global = true,
                _ => break,
            }
            self.advance();
        }

        let location = self.location();
        self.expect(Token::Rule, "`rule`")?;
        let name = self.expect_identifier("rule name")?;

        let mut tags = Vec::new();
        if *self.current() == Token::Colon {
            self.advance();
            let mut seen = HashSet::new();
            while let Token::Identifier(tag) = self.current() {
                let tag = tag.clone();
                if !seen.insert(tag.clone()) {
                    return Err(EngineError::semantic(
                        format!("duplicate tag `{tag}` in rule `{name}`"),
                        self.location(),
                    ));
                }
                tags.push(tag);
                self.advance();
            }
            if tags.is_empty() {
                return Err(self.unexpected("tag"));
            }
        }

        self.expect(Token::LeftBrace, "`{`")?;

        let metadata = if *self.current() == Token::Meta {
            self.advance();
            self.expect(Token::Colon, "`:`")?;
            self.parse_meta()?
        } else {
            Vec::new()
        };

        let patterns = if *self.current() == Token::Strings {
            self.advance();
            self.expect(Token::Colon, "`:`")?;
            self.parse_patterns()?
        } else {
            Vec::new()
        };

        self.expect(Token::Condition, "`condition`")?;
        self.expect(Token::Colon, "`:`")?;
        let condition = self.parse_expression()?;
        self.expect(Token::RightBrace, "`}`")?;

        Ok(RuleDecl {
            name,
            location,
            is_private,
            is_global,
            tags,
            metadata,
            patterns,
            condition,
        })
    }

    fn parse_meta(&mut self) -> Result<Vec<(String, MetaValue)>> {
        let mut entries = Vec::new();
        while let Token::Identifier(key) = self.current() {
            let key = key.clone();
            self.advance();
            self.expect(Token::Assign, "`=`")?;

            let negative = if *self.current() == Token::Minus {
                self.advance();
                true
            } else {
                false
            };

            let value = match self.advance() {
                Token::String(bytes) if !negative => {
                    MetaValue::String(String::from_utf8_lossy(&bytes).into_owned())
                }
                Token::Integer(n) => MetaValue::Integer(if negative { -n } else { n }),
                Token::Float(f) => MetaValue::Float(if negative { -f } else { f }),
                Token::True if !negative => MetaValue::Bool(true),
                Token::False if !negative => MetaValue::Bool(false),
                _ => {
                    self.position -= 1;
                    return Err(self.unexpected("metadata value"));
                }
            };
            entries.push((key, value));
        }
        Ok(entries)
    }

    fn parse_patterns(&mut self) -> Result<Vec<PatternDecl>> {
        let mut patterns = Vec::new();
        let mut seen = HashSet::new();

        while let Token::PatternIdent(name) = self.current() {
            let name = name.clone();
            let location = self.location();
            if !name.is_empty() && !seen.insert(name.clone()) {
                return Err(EngineError::semantic(
                    format!("duplicate pattern identifier `${name}`"),
                    location,
                ));
            }
            self.advance();
            self.expect(Token::Assign, "`=`")?;

            let source = match self.advance() {
                Token::String(bytes) => PatternSource::Text(bytes),
                Token::HexBody(body) => PatternSource::Hex(body),
                Token::Regex { source, flags } => {
                    if let Some(bad) = flags.chars().find(|c| *c != 'i' && *c != 's') {
                        return Err(EngineError::syntax(
                            format!("unknown regular expression flag `{bad}`"),
                            location,
                        ));
                    }
                    PatternSource::Regex { source, flags }
                }
                _ => {
                    self.position -= 1;
                    return Err(self.unexpected("string, hex pattern or regular expression"));
                }
            };

            let modifiers = self.parse_modifiers()?;
            patterns.push(PatternDecl {
                name,
                location,
                source,
                modifiers,
            });
        }

        if patterns.is_empty() {
            return Err(self.unexpected("pattern declaration"));
        }
        Ok(patterns)
    }

    fn parse_modifiers(&mut self) -> Result<Vec<ModifierDecl>> {
        let mut modifiers = Vec::new();
        loop {
            let location = self.location();
            let modifier = match self.current() {
                Token::Private => Modifier::Private,
                Token::Identifier(word) => match word.as_str() {
                    "ascii" => Modifier::Ascii,
                    "wide" => Modifier::Wide,
                    "nocase" => Modifier::Nocase,
                    "fullword" => Modifier::Fullword,
                    "xor" => Modifier::Xor(None),
                    "base64" => Modifier::Base64(None),
                    "base64wide" => Modifier::Base64Wide(None),
                    _ => return Err(self.unexpected("pattern modifier")),
                },
                _ => break,
            };
            self.advance();

            let modifier = match modifier {
                Modifier::Xor(_) if *self.current() == Token::LeftParen => {
                    self.advance();
                    let lower = self.expect_integer()?;
                    let upper = if *self.current() == Token::Minus {
                        self.advance();
                        self.expect_integer()?
                    } else {
                        lower
                    };
                    self.expect(Token::RightParen, "`)`")?;
                    Modifier::Xor(Some((lower, upper)))
                }
                Modifier::Base64(_) if *self.current() == Token::LeftParen => {
                    self.advance();
                    let alphabet = self.expect_string()?;
                    self.expect(Token::RightParen, "`)`")?;
                    Modifier::Base64(Some(alphabet))
                }
                Modifier::Base64Wide(_) if *self.current() == Token::LeftParen => {
                    self.advance();
                    let alphabet = self.expect_string()?;
                    self.expect(Token::RightParen, "`)`")?;
                    Modifier::Base64Wide(Some(alphabet))
                }
                other => other,
            };
            modifiers.push(ModifierDecl { modifier, location });
        }
        Ok(modifiers)
    }

    /// Parse a full boolean expression (lowest precedence).
    pub(crate) fn parse_expression(&mut self) -> Result<Expr> {
        self.parse_or_expression()
    }

    fn parse_or_expression(&mut self) -> Result<Expr> {
        let mut left = self.parse_and_expression()?;
        while *self.current() == Token::Or {
            let location = self.location();
            self.advance();
            let right = self.parse_and_expression()?;
            left = self.node(ExprKind::Or(Box::new(left), Box::new(right)), location)?;
        }
        Ok(left)
    }

    fn parse_and_expression(&mut self) -> Result<Expr> {
        let mut left = self.parse_not_expression()?;
        while *self.current() == Token::And {
            let location = self.location();
            self.advance();
            let right = self.parse_not_expression()?;
            left = self.node(ExprKind::And(Box::new(left), Box::new(right)), location)?;
        }
        Ok(left)
    }

    fn parse_not_expression(&mut self) -> Result<Expr> {
        if *self.current() == Token::Not {
            let location = self.location();
            self.advance();
            let operand = self.nested(Self::parse_not_expression)?;
            return self.node(ExprKind::Not(Box::new(operand)), location);
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let left = self.parse_bit_or()?;
        let location = self.location();

        if *self.current() == Token::Matches {
            self.advance();
            return match self.advance() {
                Token::Regex { source, flags } => {
                    if let Some(bad) = flags.chars().find(|c| *c != 'i' && *c != 's') {
                        return Err(EngineError::syntax(
                            format!("unknown regular expression flag `{bad}`"),
                            location,
                        ));
                    }
                    self.node(
                        ExprKind::Matches {
                            lhs: Box::new(left),
                            regex: source,
                            flags,
                        },
                        location,
                    )
                }
                _ => {
                    self.position -= 1;
                    Err(self.unexpected("regular expression"))
                }
            };
        }

        let op = match self.current() {
            Token::Eq => BinaryOp::Eq,
            Token::Ne => BinaryOp::Ne,
            Token::Lt => BinaryOp::Lt,
            Token::Le => BinaryOp::Le,
            Token::Gt => BinaryOp::Gt,
            Token::Ge => BinaryOp::Ge,
            Token::Contains => BinaryOp::Contains,
            Token::IContains => BinaryOp::IContains,
            Token::StartsWith => BinaryOp::StartsWith,
            Token::IStartsWith => BinaryOp::IStartsWith,
            Token::EndsWith => BinaryOp::EndsWith,
            Token::IEndsWith => BinaryOp::IEndsWith,
            Token::IEquals => BinaryOp::IEquals,
            _ => return Ok(left),
        };
        self.advance();
        let right = self.parse_bit_or()?;
        self.binary(op, left, right, location)
    }

    fn parse_bit_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_bit_xor()?;
        while *self.current() == Token::Pipe {
            let location = self.location();
            self.advance();
            let right = self.parse_bit_xor()?;
            left = self.binary(BinaryOp::BitOr, left, right, location)?;
        }
        Ok(left)
    }

    fn parse_bit_xor(&mut self) -> Result<Expr> {
        let mut left = self.parse_bit_and()?;
        while *self.current() == Token::Caret {
            let location = self.location();
            self.advance();
            let right = self.parse_bit_and()?;
            left = self.binary(BinaryOp::BitXor, left, right, location)?;
        }
        Ok(left)
    }

    fn parse_bit_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_shift()?;
        while *self.current() == Token::Ampersand {
            let location = self.location();
            self.advance();
            let right = self.parse_shift()?;
            left = self.binary(BinaryOp::BitAnd, left, right, location)?;
        }
        Ok(left)
    }

    fn parse_shift(&mut self) -> Result<Expr> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.current() {
                Token::Shl => BinaryOp::Shl,
                Token::Shr => BinaryOp::Shr,
                _ => return Ok(left),
            };
            let location = self.location();
            self.advance();
            let right = self.parse_additive()?;
            left = self.binary(op, left, right, location)?;
        }
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.current() {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                _ => return Ok(left),
            };
            let location = self.location();
            self.advance();
            let right = self.parse_multiplicative()?;
            left = self.binary(op, left, right, location)?;
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.current() {
                Token::Star => BinaryOp::Mul,
                Token::Backslash => BinaryOp::Div,
                Token::Percent => BinaryOp::Mod,
                _ => return Ok(left),
            };
            let location = self.location();
            self.advance();
            let right = self.parse_unary()?;
            left = self.binary(op, left, right, location)?;
        }
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        let location = self.location();
        let op = match self.current() {
            Token::Minus => UnaryOp::Neg,
            Token::Tilde => UnaryOp::BitNot,
            _ => return self.nested(Self::parse_primary),
        };
        self.advance();
        let operand = self.nested(Self::parse_unary)?;
        self.node(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            location,
        )
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let location = self.location();
        let kind = match self.current().clone() {
            Token::True => {
                self.advance();
                ExprKind::Bool(true)
            }
            Token::False => {
                self.advance();
                ExprKind::Bool(false)
            }
            Token::Float(value) => {
                self.advance();
                ExprKind::Float(value)
            }
            Token::String(bytes) => {
                self.advance();
                ExprKind::String(bytes)
            }
            Token::Filesize => {
                self.advance();
                ExprKind::Filesize
            }
            Token::Integer(value) => match (self.peek_nth(1), self.peek_nth(2)) {
                (Token::Of, _) => {
                    self.advance();
                    return self.parse_of(Quantifier::Count(value), location);
                }
                (Token::Percent, Token::Of) => {
                    self.advance();
                    self.advance();
                    return self.parse_of(Quantifier::Percent(value), location);
                }
                _ => {
                    self.advance();
                    ExprKind::Integer(value)
                }
            },
            Token::All | Token::Any | Token::None => {
                let quantifier = self.parse_quantifier()?;
                return self.parse_of(quantifier, location);
            }
            Token::For => {
                self.advance();
                let quantifier = self.parse_quantifier()?;
                self.expect(Token::Of, "`of`")?;
                let set = self.parse_pattern_set()?;
                self.expect(Token::Colon, "`:`")?;
                self.expect(Token::LeftParen, "`(`")?;
                let body = self.parse_expression()?;
                self.expect(Token::RightParen, "`)`")?;
                ExprKind::ForOf {
                    quantifier,
                    set,
                    body: Box::new(body),
                }
            }
            Token::PatternIdent(name) => {
                self.advance();
                let anchor = match self.current() {
                    Token::At => {
                        self.advance();
                        Some(Anchor::At(Box::new(self.parse_additive()?)))
                    }
                    Token::In => {
                        self.advance();
                        Some(Anchor::In(self.parse_range()?))
                    }
                    _ => None,
                };
                ExprKind::PatternMatch { name, anchor }
            }
            Token::PatternCount(name) => {
                self.advance();
                let range = if *self.current() == Token::In {
                    self.advance();
                    Some(self.parse_range()?)
                } else {
                    None
                };
                ExprKind::PatternCount { name, range }
            }
            Token::PatternOffset(name) => {
                self.advance();
                ExprKind::PatternOffset {
                    name,
                    index: self.parse_index()?,
                }
            }
            Token::PatternLength(name) => {
                self.advance();
                ExprKind::PatternLength {
                    name,
                    index: self.parse_index()?,
                }
            }
            Token::Identifier(name) => {
                self.advance();
                if *self.current() == Token::LeftParen {
                    self.advance();
                    let mut args = Vec::new();
                    if *self.current() != Token::RightParen {
                        args.push(self.parse_expression()?);
                        while *self.current() == Token::Comma {
                            self.advance();
                            args.push(self.parse_expression()?);
                        }
                    }
                    self.expect(Token::RightParen, "`)`")?;
                    ExprKind::Call {
                        function: name,
                        args,
                    }
                } else {
                    ExprKind::Identifier(name)
                }
            }
            Token::LeftParen => {
                self.advance();
                let expr = self.parse_expression()?;
                self.expect(Token::RightParen, "`)`")?;
                return Ok(expr);
            }
            _ => return Err(self.unexpected("expression")),
        };
        self.node(kind, location)
    }

    fn parse_quantifier(&mut self) -> Result<Quantifier> {
        let quantifier = match self.current() {
            Token::All => Quantifier::All,
            Token::Any => Quantifier::Any,
            Token::None => Quantifier::None,
            Token::Integer(n) => {
                let n = *n;
                if *self.peek_nth(1) == Token::Percent {
                    self.advance();
                    Quantifier::Percent(n)
                } else {
                    Quantifier::Count(n)
                }
            }
            _ => return Err(self.unexpected("`all`, `any`, `none` or a number")),
        };
        self.advance();
        Ok(quantifier)
    }

    fn parse_of(&mut self, quantifier: Quantifier, location: Location) -> Result<Expr> {
        self.expect(Token::Of, "`of`")?;
        let set = self.parse_pattern_set()?;
        self.node(ExprKind::Of { quantifier, set }, location)
    }

    fn parse_pattern_set(&mut self) -> Result<PatternSet> {
        if *self.current() == Token::Them {
            self.advance();
            return Ok(PatternSet::Them);
        }

        self.expect(Token::LeftParen, "`them` or `(`")?;
        let mut items = Vec::new();
        loop {
            let location = self.location();
            let (name, wildcard) = match self.current() {
                Token::PatternIdent(name) => (name.clone(), false),
                Token::PatternWildcard(name) => (name.clone(), true),
                _ => return Err(self.unexpected("pattern identifier")),
            };
            self.advance();
            items.push(PatternSetItem {
                name,
                wildcard,
                location,
            });
            if *self.current() == Token::Comma {
                self.advance();
            } else {
                break;
            }
        }
        self.expect(Token::RightParen, "`)`")?;
        Ok(PatternSet::Items(items))
    }

    fn parse_range(&mut self) -> Result<Range> {
        self.expect(Token::LeftParen, "`(`")?;
        let lower = self.parse_bit_or()?;
        self.expect(Token::DotDot, "`..`")?;
        let upper = self.parse_bit_or()?;
        self.expect(Token::RightParen, "`)`")?;
        Ok(Range {
            lower: Box::new(lower),
            upper: Box::new(upper),
        })
    }

    fn parse_index(&mut self) -> Result<Option<Box<Expr>>> {
        if *self.current() != Token::LeftBracket {
            return Ok(None);
        }
        self.advance();
        let index = self.parse_expression()?;
        self.expect(Token::RightBracket, "`]`")?;
        Ok(Some(Box::new(index)))
    }
}
