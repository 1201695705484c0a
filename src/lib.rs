//! # Scan Engine
//!
//! A rule-based pattern matching engine: compile detection rules written in
//! a small rule language, then scan byte buffers and learn which rules
//! matched.
//!
//! Rules combine text, hex and regular-expression patterns with a boolean
//! condition. All literal and hex patterns of a ruleset share one
//! Aho-Corasick automaton over short *atoms*, so a scan makes a single pass
//! over the input before verifying candidates and evaluating conditions on a
//! small stack VM.
//!
//! ## Quick Start
//!
//! ```rust
//! use scan_engine::compile;
//!
//! let rules = compile(r#"
//!     rule suspicious_script : script {
//!         meta:
//!             author = "analyst"
//!             severity = 3
//!         strings:
//!             $ps = "powershell" nocase
//!             $enc = "-EncodedCommand" nocase fullword
//!             $b64 = /[A-Za-z0-9+]{40,}/
//!         condition:
//!             $ps and ($enc or #b64 > 0)
//!     }
//! "#)?;
//!
//! let results = rules.scan(b"PowerShell.exe -encodedcommand SQBFAFgAIAAoAE4AZQB3AC0ATwBiAGoAZQBjAHQA");
//! assert!(results.matched("suspicious_script"));
//! # Ok::<(), scan_engine::EngineError>(())
//! ```
//!
//! ### Incremental compilation and external variables
//!
//! ```rust
//! use scan_engine::{Compiler, Scanner};
//!
//! let mut compiler = Compiler::new();
//! compiler
//!     .define_global("max_size", 1024)?
//!     .add_source("private rule small { condition: filesize <= max_size }")?
//!     .add_source(r#"rule small_pe { strings: $mz = { 4D 5A } condition: small and $mz at 0 }"#)?;
//! let rules = compiler.build()?;
//!
//! let mut scanner = Scanner::new(&rules);
//! assert_eq!(scanner.scan(b"MZ\x90\x00").len(), 1);
//! scanner.set_global("max_size", 2)?;
//! assert!(scanner.scan(b"MZ\x90\x00").is_empty());
//! # Ok::<(), scan_engine::EngineError>(())
//! ```
//!
//! ### Batch Processing
//!
//! ```rust
//! let rules = scan_engine::compile(r#"rule hit { strings: $a = "needle" condition: $a }"#)?;
//! let buffers: [&[u8]; 3] = [b"haystack", b"a needle", b"needle!"];
//! let results = rules.scan_many(&buffers);
//! let hits: Vec<usize> = results.iter().map(|r| r.len()).collect();
//! assert_eq!(hits, [0, 1, 1]);
//! # Ok::<(), scan_engine::EngineError>(())
//! ```

pub mod compiler;
pub mod config;
pub mod error;
pub mod ffi;
pub mod ir;
pub mod scanner;

pub(crate) mod automaton;
pub(crate) mod patterns;
pub(crate) mod vm;

// Compiler and configuration
pub use compiler::{compile, Compiler};
pub use config::{CompilerConfig, EngineConfig, ScanConfig};

// Core types and errors
pub use error::{EngineError, ErrorKind, Location, Result};
pub use ir::{MetaValue, PatternId, RuleId, Rules, Type, Value};

// Scanning
pub use scanner::{Match, MatchingRule, PatternMatches, ScanResults, Scanner};
