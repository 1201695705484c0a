//! Unified configuration for the scan engine.
//!
//! Configuration is split between the compiler (bounds applied while a
//! ruleset is being built) and the scanner (what a scan records and reports).
//! Both halves can be loaded from YAML.
//!
//! # Examples
//!
//! ```rust
//! use scan_engine::{CompilerConfig, EngineConfig, ScanConfig};
//!
//! // Library defaults
//! let config = EngineConfig::default();
//! assert_eq!(config.compiler.max_atom_len, 4);
//!
//! // Report offsets of every pattern occurrence
//! let scan = ScanConfig {
//!     include_match_data: true,
//!     ..Default::default()
//! };
//! assert!(scan.include_match_data);
//!
//! // Tighter bounds for rules from untrusted authors
//! let strict = CompilerConfig::strict();
//! assert!(strict.max_hex_jump < CompilerConfig::default().max_hex_jump);
//! ```

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Bounds and tuning knobs applied while compiling rules.
///
/// Every limit here turns into a [`EngineError::Resource`] or
/// [`EngineError::Pattern`] at compile time; none of them is checked while
/// scanning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Maximum length of the atoms fed to the shared automaton.
    ///
    /// Longer atoms produce fewer candidate positions but a bigger automaton,
    /// and `nocase` atoms expand into up to `2^max_atom_len` case variants.
    ///
    /// **Default**: 4
    pub max_atom_len: usize,

    /// Maximum number of distinct atoms in one ruleset.
    ///
    /// **Default**: 1_000_000
    pub max_atoms: usize,

    /// Largest upper bound accepted in a hex jump (`[n-m]`).
    ///
    /// Jumps compile into NFA states, so the bound keeps the verifier small.
    ///
    /// **Default**: 4096
    pub max_hex_jump: u32,

    /// Size limit handed to the regex compiler, in bytes.
    ///
    /// **Default**: 10 MiB
    pub regex_size_limit: usize,

    /// Maximum number of byte variants a single text pattern may expand into
    /// (`wide`/`ascii` × xor keys × base64 offsets).
    ///
    /// **Default**: 2048
    pub max_pattern_variants: usize,

    /// Deepest nesting accepted in a condition (parentheses, `not`, unary
    /// operators and chained binary operators) or in hex alternatives.
    ///
    /// Conditions are parsed and lowered recursively, so this bounds the
    /// stack used by compilation.
    ///
    /// **Default**: 128
    pub max_nesting: usize,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            max_atom_len: 4,
            max_atoms: 1_000_000,
            max_hex_jump: 4096,
            regex_size_limit: 10 * 1024 * 1024,
            max_pattern_variants: 2048,
            max_nesting: 128,
        }
    }
}

impl CompilerConfig {
    /// Conservative limits for rules that come from untrusted sources.
    pub fn strict() -> Self {
        Self {
            max_atom_len: 4,
            max_atoms: 100_000,
            max_hex_jump: 256,
            regex_size_limit: 1024 * 1024,
            max_pattern_variants: 512,
            max_nesting: 32,
        }
    }

    /// Validate that the configured values make sense together.
    pub fn validate(&self) -> Result<()> {
        if self.max_atom_len == 0 || self.max_atom_len > 16 {
            return Err(EngineError::InvalidArgument(format!(
                "max_atom_len must be between 1 and 16, got {}",
                self.max_atom_len
            )));
        }
        if self.max_atoms == 0 {
            return Err(EngineError::InvalidArgument(
                "max_atoms must be greater than zero".to_string(),
            ));
        }
        if self.max_pattern_variants == 0 {
            return Err(EngineError::InvalidArgument(
                "max_pattern_variants must be greater than zero".to_string(),
            ));
        }
        if self.max_nesting == 0 {
            return Err(EngineError::InvalidArgument(
                "max_nesting must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Options that shape what a scan records and returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Attach per-pattern match offsets to every matching rule in the report.
    ///
    /// **Default**: false
    pub include_match_data: bool,

    /// Maximum number of matches recorded per pattern and scan. Further
    /// occurrences are dropped (counts saturate at this value).
    ///
    /// **Default**: 1_000_000
    pub max_matches_per_pattern: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            include_match_data: false,
            max_matches_per_pattern: 1_000_000,
        }
    }
}

impl ScanConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_matches_per_pattern == 0 {
            return Err(EngineError::InvalidArgument(
                "max_matches_per_pattern must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Complete engine configuration.
///
/// # Example
/// ```rust
/// use scan_engine::EngineConfig;
///
/// let yaml = r#"
/// compiler:
///   max_hex_jump: 128
/// scan:
///   include_match_data: true
/// "#;
/// let config = EngineConfig::from_yaml_str(yaml)?;
/// assert_eq!(config.compiler.max_hex_jump, 128);
/// assert!(config.scan.include_match_data);
/// # Ok::<(), scan_engine::EngineError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub compiler: CompilerConfig,
    pub scan: ScanConfig,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration for bulk scanning where only rule names matter.
    pub fn high_throughput() -> Self {
        Self {
            compiler: CompilerConfig {
                max_atom_len: 4,
                ..Default::default()
            },
            scan: ScanConfig {
                include_match_data: false,
                max_matches_per_pattern: 10_000,
            },
        }
    }

    /// Configuration for rules of unknown provenance.
    pub fn strict() -> Self {
        Self {
            compiler: CompilerConfig::strict(),
            scan: ScanConfig {
                include_match_data: false,
                max_matches_per_pattern: 100_000,
            },
        }
    }

    pub fn with_match_data(mut self, enabled: bool) -> Self {
        self.scan.include_match_data = enabled;
        self
    }

    pub fn with_max_hex_jump(mut self, jump: u32) -> Self {
        self.compiler.max_hex_jump = jump;
        self
    }

    /// Parse and validate a YAML configuration document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: EngineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML configuration file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        self.compiler.validate()?;
        self.scan.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.compiler.max_atom_len, 4);
        assert!(!config.scan.include_match_data);
    }

    #[test]
    fn test_presets_are_valid() {
        assert!(EngineConfig::high_throughput().validate().is_ok());
        assert!(EngineConfig::strict().validate().is_ok());
        assert!(CompilerConfig::strict().max_atoms < CompilerConfig::default().max_atoms);
    }

    #[test]
    fn test_builder_methods() {
        let config = EngineConfig::new()
            .with_match_data(true)
            .with_max_hex_jump(16);
        assert!(config.scan.include_match_data);
        assert_eq!(config.compiler.max_hex_jump, 16);
    }

    #[test]
    fn test_invalid_atom_len_rejected() {
        let config = CompilerConfig {
            max_atom_len: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(EngineError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_zero_nesting_rejected() {
        let config = CompilerConfig {
            max_nesting: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert!(CompilerConfig::strict().max_nesting < CompilerConfig::default().max_nesting);
    }

    #[test]
    fn test_invalid_match_cap_rejected() {
        let config = ScanConfig {
            max_matches_per_pattern: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_yaml_partial_document_keeps_defaults() {
        let config = EngineConfig::from_yaml_str("scan:\n  include_match_data: true\n").unwrap();
        assert!(config.scan.include_match_data);
        assert_eq!(config.compiler, CompilerConfig::default());
    }

    #[test]
    fn test_yaml_invalid_values_rejected() {
        let result = EngineConfig::from_yaml_str("compiler:\n  max_atom_len: 0\n");
        assert!(matches!(result, Err(EngineError::InvalidArgument(_))));

        let result = EngineConfig::from_yaml_str("compiler: [1, 2");
        assert!(result.is_err());
    }

    #[test]
    fn test_yaml_file_loading() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "compiler:\n  max_hex_jump: 64\n  max_atom_len: 3").unwrap();

        let config = EngineConfig::from_yaml_file(file.path()).unwrap();
        assert_eq!(config.compiler.max_hex_jump, 64);
        assert_eq!(config.compiler.max_atom_len, 3);
    }

    #[test]
    fn test_yaml_missing_file() {
        let result = EngineConfig::from_yaml_file("/definitely/not/here.yml");
        assert!(matches!(result, Err(EngineError::InvalidArgument(_))));
    }
}
