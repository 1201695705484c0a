//! Pattern compilation.
//!
//! Every pattern declared in a rule is turned into one of three compiled
//! forms:
//! - [`text`]: a set of literal byte variants (ascii/wide × xor keys, or the
//!   base64 encodings), verified by byte comparison;
//! - [`hex`]: an NFA program over masked bytes with bounded jumps and
//!   alternatives;
//! - [`regexp`]: a `regex::bytes` program run over the whole buffer.
//!
//! Literal variants and hex programs expose [`atoms`] that are loaded into
//! the shared automaton; regexes are scanned on their own.

pub(crate) mod atoms;
pub(crate) mod hex;
pub(crate) mod regexp;
pub(crate) mod text;

use crate::compiler::ast::{Modifier, PatternDecl, PatternSource};
use crate::config::CompilerConfig;
use crate::error::{EngineError, Result};
use crate::ir::PatternId;
use hex::HexProgram;
use regexp::RegexMatcher;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum Base64Alphabet {
    Standard,
    Custom(Vec<u8>),
}

/// Validated modifier set of one pattern.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub(crate) struct Modifiers {
    pub ascii: bool,
    pub wide: bool,
    pub nocase: bool,
    pub fullword: bool,
    pub private: bool,
    pub xor: Option<(u8, u8)>,
    pub base64: Option<Base64Alphabet>,
    pub base64wide: Option<Base64Alphabet>,
}

impl Modifiers {
    /// Collect modifier declarations, rejecting duplicates and bad arguments.
    pub fn from_decls(decl: &PatternDecl) -> Result<Self> {
        let mut modifiers = Modifiers::default();
        let mut seen: Vec<&'static str> = Vec::new();

        for item in &decl.modifiers {
            let name = item.modifier.name();
            let error = |message: String| {
                EngineError::pattern(decl.display_name(), message, Some(item.location))
            };
            if seen.contains(&name) {
                return Err(error(format!("duplicate modifier `{name}`")));
            }
            seen.push(name);

            match &item.modifier {
                Modifier::Ascii => modifiers.ascii = true,
                Modifier::Wide => modifiers.wide = true,
                Modifier::Nocase => modifiers.nocase = true,
                Modifier::Fullword => modifiers.fullword = true,
                Modifier::Private => modifiers.private = true,
                Modifier::Xor(range) => {
                    let (lower, upper) = range.unwrap_or((0, 255));
                    if !(0..=255).contains(&lower) || !(0..=255).contains(&upper) {
                        return Err(error(format!(
                            "xor key range {lower}-{upper} is outside 0-255"
                        )));
                    }
                    if lower > upper {
                        return Err(error(format!("invalid xor key range {lower}-{upper}")));
                    }
                    modifiers.xor = Some((lower as u8, upper as u8));
                }
                Modifier::Base64(alphabet) => {
                    modifiers.base64 = Some(alphabet_of(alphabet.as_deref()));
                }
                Modifier::Base64Wide(alphabet) => {
                    modifiers.base64wide = Some(alphabet_of(alphabet.as_deref()));
                }
            }
        }
        Ok(modifiers)
    }

    /// Modifiers that take part in pattern identity.
    fn identity(&self) -> Self {
        Self {
            private: false,
            ..self.clone()
        }
    }
}

fn alphabet_of(custom: Option<&[u8]>) -> Base64Alphabet {
    match custom {
        Some(chars) => Base64Alphabet::Custom(chars.to_vec()),
        None => Base64Alphabet::Standard,
    }
}

/// Identity of a pattern across rules: two declarations with equal keys share
/// one [`PatternId`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct PatternKey {
    source: PatternSource,
    modifiers: Modifiers,
}

/// One concrete byte string of a text pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LiteralVariant {
    pub bytes: Vec<u8>,
    pub nocase: bool,
    pub fullword: bool,
    /// The variant is UTF-16LE interleaved.
    pub wide: bool,
    /// Key the variant was xored with; neighbours are decoded with it for
    /// the `fullword` check.
    pub xor_key: u8,
}

impl LiteralVariant {
    pub fn plain(bytes: Vec<u8>, wide: bool) -> Self {
        Self {
            bytes,
            nocase: false,
            fullword: false,
            wide,
            xor_key: 0,
        }
    }

    pub fn verify(&self, data: &[u8], start: usize) -> Option<usize> {
        let end = start.checked_add(self.bytes.len())?;
        let window = data.get(start..end)?;
        let equal = if self.nocase {
            window.eq_ignore_ascii_case(&self.bytes)
        } else {
            window == self.bytes.as_slice()
        };
        if !equal {
            return None;
        }
        if self.fullword && !is_fullword(data, start, self.bytes.len(), self.wide, self.xor_key) {
            return None;
        }
        Some(self.bytes.len())
    }
}

/// A pattern compiled for scanning.
#[derive(Debug, Clone)]
pub(crate) enum CompiledPattern {
    Literals(Vec<LiteralVariant>),
    Hex(HexProgram),
    Regex(RegexMatcher),
}

/// Unit of verification behind an automaton hit.
#[derive(Debug, Clone)]
pub(crate) struct SubPattern {
    pub pattern: PatternId,
    pub matcher: SubPatternMatcher,
}

#[derive(Debug, Clone)]
pub(crate) enum SubPatternMatcher {
    Literal(LiteralVariant),
    Hex(HexProgram),
}

impl SubPattern {
    /// Length of the match starting at `start`, if there is one.
    #[inline]
    pub fn verify(&self, data: &[u8], start: usize) -> Option<usize> {
        match &self.matcher {
            SubPatternMatcher::Literal(literal) => literal.verify(data, start),
            SubPatternMatcher::Hex(program) => program.longest_match(data, start),
        }
    }
}

/// A `fullword` match must not be glued to alphanumeric characters. For wide
/// variants the neighbouring UTF-16 code units are checked.
pub(crate) fn is_fullword(data: &[u8], start: usize, length: usize, wide: bool, key: u8) -> bool {
    let is_word = |b: u8| (b ^ key).is_ascii_alphanumeric();
    let end = start + length;

    if wide {
        let before = start >= 2 && is_word(data[start - 2]) && data[start - 1] ^ key == 0;
        let after = end + 1 < data.len() && is_word(data[end]) && data[end + 1] ^ key == 0;
        !before && !after
    } else {
        let before = start >= 1 && is_word(data[start - 1]);
        let after = end < data.len() && is_word(data[end]);
        !before && !after
    }
}

/// Compile one pattern declaration.
pub(crate) fn compile_pattern(
    decl: &PatternDecl,
    config: &CompilerConfig,
) -> Result<(PatternKey, Modifiers, CompiledPattern)> {
    let modifiers = Modifiers::from_decls(decl)?;
    let error =
        |message: String| EngineError::pattern(decl.display_name(), message, Some(decl.location));

    let compiled = match &decl.source {
        PatternSource::Text(literal) => {
            let variants = text::compile_text(literal, &modifiers).map_err(error)?;
            if variants.len() > config.max_pattern_variants {
                return Err(EngineError::Resource(format!(
                    "pattern `{}` expands into {} variants (limit {})",
                    decl.display_name(),
                    variants.len(),
                    config.max_pattern_variants
                )));
            }
            CompiledPattern::Literals(variants)
        }
        PatternSource::Hex(body) => {
            let only_private = Modifiers {
                private: modifiers.private,
                ..Default::default()
            };
            if modifiers != only_private {
                return Err(error(
                    "only the `private` modifier is allowed on hex patterns".to_string(),
                ));
            }
            CompiledPattern::Hex(
                hex::compile_hex(body, config.max_hex_jump, config.max_nesting).map_err(error)?,
            )
        }
        PatternSource::Regex { source, flags } => CompiledPattern::Regex(
            regexp::compile_regex(source, flags, &modifiers, config.regex_size_limit)
                .map_err(error)?,
        ),
    };

    let key = PatternKey {
        source: decl.source.clone(),
        modifiers: modifiers.identity(),
    };
    Ok((key, modifiers, compiled))
}
