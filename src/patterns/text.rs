//! Text patterns: expansion of a literal into its concrete byte variants.

use super::{Base64Alphabet, LiteralVariant, Modifiers};
use base64::alphabet::{self, Alphabet};
use base64::engine::general_purpose::{GeneralPurpose, NO_PAD};
use base64::Engine;

/// Expand a text literal into every byte string that has to be searched for.
pub(crate) fn compile_text(
    literal: &[u8],
    modifiers: &Modifiers,
) -> Result<Vec<LiteralVariant>, String> {
    if literal.is_empty() {
        return Err("empty text pattern".to_string());
    }
    check_combinations(modifiers)?;

    let mut variants: Vec<LiteralVariant> = Vec::new();
    let mut push = |variant: LiteralVariant| {
        if !variants.iter().any(|v| v.bytes == variant.bytes && v.wide == variant.wide) {
            variants.push(variant);
        }
    };

    if modifiers.base64.is_some() || modifiers.base64wide.is_some() {
        if let Some(alphabet) = &modifiers.base64 {
            for encoded in base64_encodings(literal, alphabet)? {
                push(LiteralVariant::plain(encoded, false));
            }
        }
        if let Some(alphabet) = &modifiers.base64wide {
            for encoded in base64_encodings(literal, alphabet)? {
                push(LiteralVariant::plain(widen(&encoded), true));
            }
        }
        return Ok(variants);
    }

    let mut forms: Vec<(Vec<u8>, bool)> = Vec::new();
    if modifiers.ascii || !modifiers.wide {
        forms.push((literal.to_vec(), false));
    }
    if modifiers.wide {
        forms.push((widen(literal), true));
    }

    for (bytes, wide) in forms {
        match modifiers.xor {
            Some((lower, upper)) => {
                for key in lower..=upper {
                    let xored = bytes.iter().map(|b| b ^ key).collect();
                    push(LiteralVariant {
                        bytes: xored,
                        nocase: false,
                        fullword: modifiers.fullword,
                        wide,
                        xor_key: key,
                    });
                }
            }
            None => push(LiteralVariant {
                bytes,
                nocase: modifiers.nocase,
                fullword: modifiers.fullword,
                wide,
                xor_key: 0,
            }),
        }
    }

    Ok(variants)
}

fn check_combinations(modifiers: &Modifiers) -> Result<(), String> {
    let base64 = modifiers.base64.is_some() || modifiers.base64wide.is_some();
    let conflicts = [
        (modifiers.nocase && modifiers.xor.is_some(), "nocase", "xor"),
        (modifiers.nocase && base64, "nocase", "base64"),
        (modifiers.xor.is_some() && base64, "xor", "base64"),
        (modifiers.fullword && base64, "fullword", "base64"),
        (modifiers.wide && base64, "wide", "base64"),
    ];
    for (conflict, first, second) in conflicts {
        if conflict {
            return Err(format!("`{first}` cannot be combined with `{second}`"));
        }
    }
    Ok(())
}

/// UTF-16LE interleave of an ASCII byte string.
pub(crate) fn widen(bytes: &[u8]) -> Vec<u8> {
    bytes.iter().flat_map(|&b| [b, 0]).collect()
}

/// The three encodings of `literal` that appear inside a base64 stream
/// regardless of where the literal starts, trimmed of the characters that
/// depend on surrounding bytes.
fn base64_encodings(literal: &[u8], alphabet: &Base64Alphabet) -> Result<Vec<Vec<u8>>, String> {
    let engine = match alphabet {
        Base64Alphabet::Standard => GeneralPurpose::new(&alphabet::STANDARD, NO_PAD),
        Base64Alphabet::Custom(chars) => {
            let chars = std::str::from_utf8(chars)
                .map_err(|_| "base64 alphabet must be ASCII".to_string())?;
            let custom = Alphabet::new(chars)
                .map_err(|e| format!("invalid base64 alphabet: {e}"))?;
            GeneralPurpose::new(&custom, NO_PAD)
        }
    };

    let mut encodings = Vec::with_capacity(3);
    for padding in 0..3usize {
        let mut input = vec![0u8; padding];
        input.extend_from_slice(literal);
        let encoded = engine.encode(&input).into_bytes();

        let skip = [0, 2, 3][padding];
        let end = if input.len() % 3 == 0 {
            encoded.len()
        } else {
            encoded.len() - 1
        };
        if end > skip {
            encodings.push(encoded[skip..end].to_vec());
        }
    }

    if encodings.is_empty() {
        return Err("text pattern too short for base64".to_string());
    }
    Ok(encodings)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes_of(variants: &[LiteralVariant]) -> Vec<Vec<u8>> {
        variants.iter().map(|v| v.bytes.clone()).collect()
    }

    #[test]
    fn test_plain_literal() {
        let variants = compile_text(b"abc", &Modifiers::default()).unwrap();
        assert_eq!(bytes_of(&variants), vec![b"abc".to_vec()]);
        assert!(!variants[0].wide);
    }

    #[test]
    fn test_empty_literal_rejected() {
        assert!(compile_text(b"", &Modifiers::default()).is_err());
    }

    #[test]
    fn test_wide_and_ascii() {
        let modifiers = Modifiers {
            wide: true,
            ..Default::default()
        };
        let variants = compile_text(b"ab", &modifiers).unwrap();
        assert_eq!(bytes_of(&variants), vec![b"a\0b\0".to_vec()]);

        let modifiers = Modifiers {
            wide: true,
            ascii: true,
            ..Default::default()
        };
        let variants = compile_text(b"ab", &modifiers).unwrap();
        assert_eq!(variants.len(), 2);
    }

    #[test]
    fn test_xor_range() {
        let modifiers = Modifiers {
            xor: Some((1, 3)),
            ..Default::default()
        };
        let variants = compile_text(b"A", &modifiers).unwrap();
        assert_eq!(
            bytes_of(&variants),
            vec![vec![b'A' ^ 1], vec![b'A' ^ 2], vec![b'A' ^ 3]]
        );
        assert_eq!(variants[1].xor_key, 2);
    }

    #[test]
    fn test_full_xor_includes_plain() {
        let modifiers = Modifiers {
            xor: Some((0, 255)),
            ..Default::default()
        };
        let variants = compile_text(b"ab", &modifiers).unwrap();
        assert_eq!(variants.len(), 256);
        assert_eq!(variants[0].bytes, b"ab");
    }

    #[test]
    fn test_incompatible_modifiers() {
        let modifiers = Modifiers {
            nocase: true,
            xor: Some((0, 255)),
            ..Default::default()
        };
        assert!(compile_text(b"ab", &modifiers).is_err());

        let modifiers = Modifiers {
            fullword: true,
            base64: Some(Base64Alphabet::Standard),
            ..Default::default()
        };
        assert!(compile_text(b"abc", &modifiers).is_err());
    }

    #[test]
    fn test_base64_encodings() {
        let modifiers = Modifiers {
            base64: Some(Base64Alphabet::Standard),
            ..Default::default()
        };
        let variants = compile_text(b"abc", &modifiers).unwrap();
        assert_eq!(
            bytes_of(&variants),
            vec![b"YWJj".to_vec(), b"FiY".to_vec(), b"hYm".to_vec()]
        );
    }

    #[test]
    fn test_base64wide_interleaves() {
        let modifiers = Modifiers {
            base64wide: Some(Base64Alphabet::Standard),
            ..Default::default()
        };
        let variants = compile_text(b"abc", &modifiers).unwrap();
        assert_eq!(variants[0].bytes, b"Y\0W\0J\0j\0".to_vec());
        assert!(variants[0].wide);
    }

    #[test]
    fn test_base64_custom_alphabet() {
        let alphabet =
            b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_".to_vec();
        let modifiers = Modifiers {
            base64: Some(Base64Alphabet::Custom(alphabet)),
            ..Default::default()
        };
        assert!(compile_text(b"abc", &modifiers).is_ok());

        let modifiers = Modifiers {
            base64: Some(Base64Alphabet::Custom(b"too short".to_vec())),
            ..Default::default()
        };
        let err = compile_text(b"abc", &modifiers).unwrap_err();
        assert!(err.contains("invalid base64 alphabet"));
    }
}
