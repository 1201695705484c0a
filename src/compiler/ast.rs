//! Abstract syntax tree produced by the rule parser.
//!
//! Pattern bodies are kept raw here: hex and regex sources are compiled later
//! by the pattern compiler, so a parse never fails because of a pattern's
//! contents.

use crate::error::Location;
use crate::ir::MetaValue;

/// One compilation unit.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SourceUnit {
    pub imports: Vec<Import>,
    pub rules: Vec<RuleDecl>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Import {
    pub module: String,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RuleDecl {
    pub name: String,
    pub location: Location,
    pub is_private: bool,
    pub is_global: bool,
    pub tags: Vec<String>,
    pub metadata: Vec<(String, MetaValue)>,
    pub patterns: Vec<PatternDecl>,
    pub condition: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PatternDecl {
    /// Identifier without the `$` sigil; empty for anonymous patterns.
    pub name: String,
    pub location: Location,
    pub source: PatternSource,
    pub modifiers: Vec<ModifierDecl>,
}

impl PatternDecl {
    pub fn display_name(&self) -> String {
        format!("${}", self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum PatternSource {
    Text(Vec<u8>),
    Hex(String),
    Regex { source: String, flags: String },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ModifierDecl {
    pub modifier: Modifier,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Modifier {
    Ascii,
    Wide,
    Nocase,
    Fullword,
    Private,
    Xor(Option<(i64, i64)>),
    Base64(Option<Vec<u8>>),
    Base64Wide(Option<Vec<u8>>),
}

impl Modifier {
    pub fn name(&self) -> &'static str {
        match self {
            Modifier::Ascii => "ascii",
            Modifier::Wide => "wide",
            Modifier::Nocase => "nocase",
            Modifier::Fullword => "fullword",
            Modifier::Private => "private",
            Modifier::Xor(_) => "xor",
            Modifier::Base64(_) => "base64",
            Modifier::Base64Wide(_) => "base64wide",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Expr {
    pub kind: ExprKind,
    pub location: Location,
    /// Height of the tree rooted here; a leaf has height 1.
    pub height: usize,
}

impl Expr {
    pub fn new(kind: ExprKind, location: Location) -> Self {
        let height = kind.child_height() + 1;
        Self {
            kind,
            location,
            height,
        }
    }
}

impl ExprKind {
    fn child_height(&self) -> usize {
        match self {
            ExprKind::Bool(_)
            | ExprKind::Integer(_)
            | ExprKind::Float(_)
            | ExprKind::String(_)
            | ExprKind::Filesize
            | ExprKind::Identifier(_)
            | ExprKind::Of { .. } => 0,
            ExprKind::PatternMatch { anchor, .. } => match anchor {
                Some(Anchor::At(offset)) => offset.height,
                Some(Anchor::In(range)) => range.height(),
                None => 0,
            },
            ExprKind::PatternCount { range, .. } => range.as_ref().map_or(0, Range::height),
            ExprKind::PatternOffset { index, .. } | ExprKind::PatternLength { index, .. } => {
                index.as_ref().map_or(0, |index| index.height)
            }
            ExprKind::Call { args, .. } => args.iter().map(|arg| arg.height).max().unwrap_or(0),
            ExprKind::Not(operand)
            | ExprKind::Unary { operand, .. }
            | ExprKind::Matches { lhs: operand, .. }
            | ExprKind::ForOf { body: operand, .. } => operand.height,
            ExprKind::And(lhs, rhs) | ExprKind::Or(lhs, rhs) | ExprKind::Binary { lhs, rhs, .. } => {
                lhs.height.max(rhs.height)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ExprKind {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(Vec<u8>),
    Filesize,
    /// `$a`, `$a at e`, `$a in (lo..hi)`
    PatternMatch {
        name: String,
        anchor: Option<Anchor>,
    },
    /// `#a`, `#a in (lo..hi)`
    PatternCount {
        name: String,
        range: Option<Range>,
    },
    /// `@a`, `@a[i]`
    PatternOffset {
        name: String,
        index: Option<Box<Expr>>,
    },
    /// `!a`, `!a[i]`
    PatternLength {
        name: String,
        index: Option<Box<Expr>>,
    },
    /// Rule reference or external variable.
    Identifier(String),
    Call {
        function: String,
        args: Vec<Expr>,
    },
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Matches {
        lhs: Box<Expr>,
        regex: String,
        flags: String,
    },
    Of {
        quantifier: Quantifier,
        set: PatternSet,
    },
    ForOf {
        quantifier: Quantifier,
        set: PatternSet,
        body: Box<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Anchor {
    At(Box<Expr>),
    In(Range),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Range {
    pub lower: Box<Expr>,
    pub upper: Box<Expr>,
}

impl Range {
    fn height(&self) -> usize {
        self.lower.height.max(self.upper.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnaryOp {
    Neg,
    BitNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Contains,
    IContains,
    StartsWith,
    IStartsWith,
    EndsWith,
    IEndsWith,
    IEquals,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "\\",
            BinaryOp::Mod => "%",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Contains => "contains",
            BinaryOp::IContains => "icontains",
            BinaryOp::StartsWith => "startswith",
            BinaryOp::IStartsWith => "istartswith",
            BinaryOp::EndsWith => "endswith",
            BinaryOp::IEndsWith => "iendswith",
            BinaryOp::IEquals => "iequals",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Quantifier {
    All,
    Any,
    None,
    Count(i64),
    Percent(i64),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PatternSet {
    Them,
    Items(Vec<PatternSetItem>),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PatternSetItem {
    pub name: String,
    pub wildcard: bool,
    pub location: Location,
}
