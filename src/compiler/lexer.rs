//! Tokenization of rule-language source text.
//!
//! The lexer runs eagerly over a whole compilation unit and produces a vector
//! of tokens annotated with their source location. Two constructs are
//! context-sensitive: after `=` a `{` opens a hex pattern body and a `/` opens
//! a regular expression; after `matches` a `/` opens a regular expression.

use crate::error::{EngineError, Location, Result};

/// Tokens of the rule language.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Identifier(String),
    /// `$name`; the name is stored without the sigil and is empty for `$`.
    PatternIdent(String),
    /// `$name*` inside pattern sets.
    PatternWildcard(String),
    /// `#name`
    PatternCount(String),
    /// `@name`
    PatternOffset(String),
    /// `!name`
    PatternLength(String),
    Integer(i64),
    Float(f64),
    String(Vec<u8>),
    Regex { source: String, flags: String },
    HexBody(String),

    // Keywords
    Rule,
    Private,
    Global,
    Meta,
    Strings,
    Condition,
    Import,
    Include,
    True,
    False,
    Not,
    And,
    Or,
    All,
    Any,
    None,
    Of,
    Them,
    For,
    At,
    In,
    Filesize,
    Contains,
    IContains,
    StartsWith,
    IStartsWith,
    EndsWith,
    IEndsWith,
    IEquals,
    Matches,

    // Punctuation and operators
    LeftBrace,
    RightBrace,
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,
    Colon,
    Comma,
    Assign,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Backslash,
    Percent,
    Ampersand,
    Pipe,
    Caret,
    Tilde,
    Shl,
    Shr,
    DotDot,
    Eof,
}

impl Token {
    /// Short human-readable description used in syntax errors.
    pub(crate) fn describe(&self) -> String {
        match self {
            Token::Identifier(name) => format!("identifier `{name}`"),
            Token::PatternIdent(name) => format!("`${name}`"),
            Token::PatternWildcard(name) => format!("`${name}*`"),
            Token::PatternCount(name) => format!("`#{name}`"),
            Token::PatternOffset(name) => format!("`@{name}`"),
            Token::PatternLength(name) => format!("`!{name}`"),
            Token::Integer(n) => format!("integer `{n}`"),
            Token::Float(n) => format!("float `{n}`"),
            Token::String(_) => "string literal".to_string(),
            Token::Regex { .. } => "regular expression".to_string(),
            Token::HexBody(_) => "hex pattern".to_string(),
            Token::Eof => "end of input".to_string(),
            other => format!("`{}`", other.literal()),
        }
    }

    fn literal(&self) -> &'static str {
        match self {
            Token::Rule => "rule",
            Token::Private => "private",
            Token::Global => "global",
            Token::Meta => "meta",
            Token::Strings => "strings",
            Token::Condition => "condition",
            Token::Import => "import",
            Token::Include => "include",
            Token::True => "true",
            Token::False => "false",
            Token::Not => "not",
            Token::And => "and",
            Token::Or => "or",
            Token::All => "all",
            Token::Any => "any",
            Token::None => "none",
            Token::Of => "of",
            Token::Them => "them",
            Token::For => "for",
            Token::At => "at",
            Token::In => "in",
            Token::Filesize => "filesize",
            Token::Contains => "contains",
            Token::IContains => "icontains",
            Token::StartsWith => "startswith",
            Token::IStartsWith => "istartswith",
            Token::EndsWith => "endswith",
            Token::IEndsWith => "iendswith",
            Token::IEquals => "iequals",
            Token::Matches => "matches",
            Token::LeftBrace => "{",
            Token::RightBrace => "}",
            Token::LeftParen => "(",
            Token::RightParen => ")",
            Token::LeftBracket => "[",
            Token::RightBracket => "]",
            Token::Colon => ":",
            Token::Comma => ",",
            Token::Assign => "=",
            Token::Eq => "==",
            Token::Ne => "!=",
            Token::Lt => "<",
            Token::Le => "<=",
            Token::Gt => ">",
            Token::Ge => ">=",
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Star => "*",
            Token::Backslash => "\\",
            Token::Percent => "%",
            Token::Ampersand => "&",
            Token::Pipe => "|",
            Token::Caret => "^",
            Token::Tilde => "~",
            Token::Shl => "<<",
            Token::Shr => ">>",
            Token::DotDot => "..",
            _ => "?",
        }
    }
}

fn keyword(word: &str) -> Option<Token> {
    let token = match word {
        "rule" => Token::Rule,
        "private" => Token::Private,
        "global" => Token::Global,
        "meta" => Token::Meta,
        "strings" => Token::Strings,
        "condition" => Token::Condition,
        "import" => Token::Import,
        "include" => Token::Include,
        "true" => Token::True,
        "false" => Token::False,
        "not" => Token::Not,
        "and" => Token::And,
        "or" => Token::Or,
        "all" => Token::All,
        "any" => Token::Any,
        "none" => Token::None,
        "of" => Token::Of,
        "them" => Token::Them,
        "for" => Token::For,
        "at" => Token::At,
        "in" => Token::In,
        "filesize" => Token::Filesize,
        "contains" => Token::Contains,
        "icontains" => Token::IContains,
        "startswith" => Token::StartsWith,
        "istartswith" => Token::IStartsWith,
        "endswith" => Token::EndsWith,
        "iendswith" => Token::IEndsWith,
        "iequals" => Token::IEquals,
        "matches" => Token::Matches,
        _ => return None,
    };
    Some(token)
}

/// A token together with the location of its first character.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Spanned {
    pub token: Token,
    pub location: Location,
}

struct Lexer {
    chars: Vec<char>,
    position: usize,
    line: u32,
    column: u32,
}

impl Lexer {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            position: 0,
            line: 1,
            column: 1,
        }
    }

    fn location(&self) -> Location {
        Location::new(self.line, self.column)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.position).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.position + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.position += 1;
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn skip_trivia(&mut self) -> Result<()> {
        loop {
            match (self.peek(), self.peek_at(1)) {
                (Some(ch), _) if ch.is_whitespace() => {
                    self.advance();
                }
                (Some('/'), Some('/')) => {
                    while let Some(ch) = self.peek() {
                        if ch == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                (Some('/'), Some('*')) => {
                    let start = self.location();
                    self.advance();
                    self.advance();
                    loop {
                        match self.advance() {
                            Some('*') if self.peek() == Some('/') => {
                                self.advance();
                                break;
                            }
                            Some(_) => {}
                            None => {
                                return Err(EngineError::syntax("unterminated comment", start));
                            }
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn identifier_tail(&mut self) -> String {
        let mut name = String::new();
        while let Some(ch) = self.peek() {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                name.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        name
    }

    fn lex_string(&mut self, start: Location) -> Result<Token> {
        self.advance();
        let mut bytes = Vec::new();
        loop {
            match self.advance() {
                Some('"') => return Ok(Token::String(bytes)),
                Some('\\') => {
                    let escape_location = self.location();
                    match self.advance() {
                        Some('n') => bytes.push(b'\n'),
                        Some('r') => bytes.push(b'\r'),
                        Some('t') => bytes.push(b'\t'),
                        Some('\\') => bytes.push(b'\\'),
                        Some('"') => bytes.push(b'"'),
                        Some('x') => {
                            let hi = self.advance().and_then(|c| c.to_digit(16));
                            let lo = self.advance().and_then(|c| c.to_digit(16));
                            match (hi, lo) {
                                (Some(hi), Some(lo)) => bytes.push((hi * 16 + lo) as u8),
                                _ => {
                                    return Err(EngineError::syntax(
                                        "invalid `\\x` escape, expected two hex digits",
                                        escape_location,
                                    ))
                                }
                            }
                        }
                        Some(other) => {
                            return Err(EngineError::syntax(
                                format!("invalid escape sequence `\\{other}`"),
                                escape_location,
                            ))
                        }
                        None => return Err(EngineError::syntax("unterminated string", start)),
                    }
                }
                Some('\n') | None => {
                    return Err(EngineError::syntax("unterminated string", start));
                }
                Some(ch) => {
                    let mut buf = [0u8; 4];
                    bytes.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
                }
            }
        }
    }

    fn lex_regex(&mut self, start: Location) -> Result<Token> {
        self.advance();
        let mut source = String::new();
        loop {
            match self.advance() {
                Some('/') => break,
                Some('\\') => match self.advance() {
                    // `\/` is only an escape for the delimiter.
                    Some('/') => source.push('/'),
                    Some('\n') | None => {
                        return Err(EngineError::syntax("unterminated regular expression", start))
                    }
                    Some(ch) => {
                        source.push('\\');
                        source.push(ch);
                    }
                },
                Some('\n') | None => {
                    return Err(EngineError::syntax("unterminated regular expression", start));
                }
                Some(ch) => source.push(ch),
            }
        }
        if source.is_empty() {
            return Err(EngineError::syntax("empty regular expression", start));
        }
        let mut flags = String::new();
        while let Some(ch) = self.peek() {
            if ch.is_ascii_alphabetic() {
                flags.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        Ok(Token::Regex { source, flags })
    }

    fn lex_hex_body(&mut self, start: Location) -> Result<Token> {
        self.advance();
        let mut body = String::new();
        loop {
            match self.advance() {
                Some('}') => return Ok(Token::HexBody(body)),
                Some(ch) => body.push(ch),
                None => return Err(EngineError::syntax("unterminated hex pattern", start)),
            }
        }
    }

    fn lex_number(&mut self, start: Location) -> Result<Token> {
        let (radix, prefix_len) = match (self.peek(), self.peek_at(1)) {
            (Some('0'), Some('x')) => (16, 2),
            (Some('0'), Some('o')) => (8, 2),
            _ => (10, 0),
        };
        for _ in 0..prefix_len {
            self.advance();
        }

        let mut digits = String::new();
        while let Some(ch) = self.peek() {
            if ch.is_digit(radix) {
                digits.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        if digits.is_empty() {
            return Err(EngineError::syntax("malformed number", start));
        }

        if radix == 10
            && self.peek() == Some('.')
            && self.peek_at(1).map_or(false, |c| c.is_ascii_digit())
        {
            digits.push('.');
            self.advance();
            while let Some(ch) = self.peek() {
                if ch.is_ascii_digit() {
                    digits.push(ch);
                    self.advance();
                } else {
                    break;
                }
            }
            return digits
                .parse::<f64>()
                .map(Token::Float)
                .map_err(|_| EngineError::syntax(format!("malformed float `{digits}`"), start));
        }

        let value = i64::from_str_radix(&digits, radix)
            .map_err(|_| EngineError::syntax(format!("integer `{digits}` out of range"), start))?;

        let multiplier = match (self.peek(), self.peek_at(1)) {
            (Some('K'), Some('B')) => 1024,
            (Some('M'), Some('B')) => 1024 * 1024,
            _ => 1,
        };
        if multiplier > 1 {
            self.advance();
            self.advance();
        }
        if self
            .peek()
            .map_or(false, |c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(EngineError::syntax("malformed number", start));
        }

        value
            .checked_mul(multiplier)
            .map(Token::Integer)
            .ok_or_else(|| EngineError::syntax("integer out of range", start))
    }

    fn lex_operator(&mut self, ch: char, start: Location) -> Result<Token> {
        let next = self.peek_at(1);
        let (token, width) = match (ch, next) {
            ('=', Some('=')) => (Token::Eq, 2),
            ('!', Some('=')) => (Token::Ne, 2),
            ('<', Some('=')) => (Token::Le, 2),
            ('>', Some('=')) => (Token::Ge, 2),
            ('<', Some('<')) => (Token::Shl, 2),
            ('>', Some('>')) => (Token::Shr, 2),
            ('.', Some('.')) => (Token::DotDot, 2),
            ('=', _) => (Token::Assign, 1),
            ('<', _) => (Token::Lt, 1),
            ('>', _) => (Token::Gt, 1),
            ('{', _) => (Token::LeftBrace, 1),
            ('}', _) => (Token::RightBrace, 1),
            ('(', _) => (Token::LeftParen, 1),
            (')', _) => (Token::RightParen, 1),
            ('[', _) => (Token::LeftBracket, 1),
            (']', _) => (Token::RightBracket, 1),
            (':', _) => (Token::Colon, 1),
            (',', _) => (Token::Comma, 1),
            ('+', _) => (Token::Plus, 1),
            ('-', _) => (Token::Minus, 1),
            ('*', _) => (Token::Star, 1),
            ('\\', _) => (Token::Backslash, 1),
            ('%', _) => (Token::Percent, 1),
            ('&', _) => (Token::Ampersand, 1),
            ('|', _) => (Token::Pipe, 1),
            ('^', _) => (Token::Caret, 1),
            ('~', _) => (Token::Tilde, 1),
            _ => {
                return Err(EngineError::syntax(
                    format!("unexpected character `{ch}`"),
                    start,
                ))
            }
        };
        for _ in 0..width {
            self.advance();
        }
        Ok(token)
    }

    fn next_token(&mut self, previous: Option<&Token>) -> Result<Spanned> {
        self.skip_trivia()?;
        let location = self.location();
        let Some(ch) = self.peek() else {
            return Ok(Spanned {
                token: Token::Eof,
                location,
            });
        };

        let after_assign = matches!(previous, Some(Token::Assign));
        let after_matches = matches!(previous, Some(Token::Matches));

        let token = match ch {
            '"' => self.lex_string(location)?,
            '/' if after_assign || after_matches => self.lex_regex(location)?,
            '{' if after_assign => self.lex_hex_body(location)?,
            '0'..='9' => self.lex_number(location)?,
            'a'..='z' | 'A'..='Z' | '_' => {
                let word = self.identifier_tail();
                keyword(&word).unwrap_or(Token::Identifier(word))
            }
            '$' => {
                self.advance();
                let name = self.identifier_tail();
                if self.peek() == Some('*') {
                    self.advance();
                    Token::PatternWildcard(name)
                } else {
                    Token::PatternIdent(name)
                }
            }
            '#' => {
                self.advance();
                Token::PatternCount(self.identifier_tail())
            }
            '@' => {
                self.advance();
                Token::PatternOffset(self.identifier_tail())
            }
            '!' if self.peek_at(1) != Some('=') => {
                self.advance();
                Token::PatternLength(self.identifier_tail())
            }
            other => self.lex_operator(other, location)?,
        };

        Ok(Spanned { token, location })
    }
}

/// Tokenize a complete compilation unit. The returned vector always ends
/// with [`Token::Eof`].
pub(crate) fn tokenize(source: &str) -> Result<Vec<Spanned>> {
    let mut lexer = Lexer::new(source);
    let mut tokens: Vec<Spanned> = Vec::new();
    loop {
        let spanned = lexer.next_token(tokens.last().map(|s| &s.token))?;
        let done = spanned.token == Token::Eof;
        tokens.push(spanned);
        if done {
            return Ok(tokens);
        }
    }
}
