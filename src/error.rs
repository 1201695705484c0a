//! Error types for the scan engine crate.

use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

/// A position in rule source text. Lines and columns start at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, PartialOrd, Ord)]
pub struct Location {
    pub line: u32,
    pub column: u32,
}

impl Location {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Coarse classification of an [`EngineError`], stable across the C ABI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Syntax,
    Semantic,
    Pattern,
    Resource,
    InvalidArgument,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// Malformed rule-language text.
    #[error("syntax error at {location}: {message}")]
    Syntax { message: String, location: Location },

    /// Well-formed text that is not a valid ruleset.
    #[error("semantic error{}: {message}", fmt_location(.location))]
    Semantic {
        message: String,
        location: Option<Location>,
    },

    /// A pattern literal that cannot be compiled.
    #[error("pattern error in `{identifier}`{}: {message}", fmt_location(.location))]
    Pattern {
        identifier: String,
        message: String,
        location: Option<Location>,
    },

    /// A configured size bound was exceeded while building the ruleset.
    #[error("resource limit exceeded: {0}")]
    Resource(String),

    /// An API argument was rejected (unknown variable, wrong value type, bad config).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

fn fmt_location(location: &Option<Location>) -> String {
    match location {
        Some(loc) => format!(" at {loc}"),
        None => String::new(),
    }
}

impl EngineError {
    pub fn syntax(message: impl Into<String>, location: Location) -> Self {
        EngineError::Syntax {
            message: message.into(),
            location,
        }
    }

    pub fn semantic(message: impl Into<String>, location: Location) -> Self {
        EngineError::Semantic {
            message: message.into(),
            location: Some(location),
        }
    }

    pub fn pattern(
        identifier: impl Into<String>,
        message: impl Into<String>,
        location: Option<Location>,
    ) -> Self {
        EngineError::Pattern {
            identifier: identifier.into(),
            message: message.into(),
            location,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Syntax { .. } => ErrorKind::Syntax,
            EngineError::Semantic { .. } => ErrorKind::Semantic,
            EngineError::Pattern { .. } => ErrorKind::Pattern,
            EngineError::Resource(_) => ErrorKind::Resource,
            EngineError::InvalidArgument(_) => ErrorKind::InvalidArgument,
        }
    }

    /// Source location of the error, when one is known.
    pub fn location(&self) -> Option<Location> {
        match self {
            EngineError::Syntax { location, .. } => Some(*location),
            EngineError::Semantic { location, .. } | EngineError::Pattern { location, .. } => {
                *location
            }
            EngineError::Resource(_) | EngineError::InvalidArgument(_) => None,
        }
    }
}

impl From<serde_yaml::Error> for EngineError {
    fn from(err: serde_yaml::Error) -> Self {
        EngineError::InvalidArgument(format!("configuration: {err}"))
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::InvalidArgument(format!("configuration file: {err}"))
    }
}
