//! Regular expression patterns, backed by `regex::bytes`.
//!
//! The regex crate compiles to finite automata, so a scan is linear in the
//! input regardless of the expression.

use super::{is_fullword, Modifiers};
use regex::bytes::{Regex, RegexBuilder};

#[derive(Debug, Clone)]
pub(crate) struct RegexMatcher {
    regex: Regex,
    fullword: bool,
}

impl RegexMatcher {
    /// Report the leftmost non-empty match starting at every offset, as
    /// `(offset, length)`. Matches may overlap, like literal matches do.
    pub fn for_each_match(&self, data: &[u8], mut on_match: impl FnMut(usize, usize)) {
        let mut position = 0;
        while position <= data.len() {
            // `find_at` keeps the surrounding bytes as context, so `^` and
            // `\b` still see the whole buffer.
            let Some(m) = self.regex.find_at(data, position) else {
                break;
            };
            let (start, end) = (m.start(), m.end());
            if end > start && (!self.fullword || is_fullword(data, start, end - start, false, 0)) {
                on_match(start, end - start);
            }
            position = start + 1;
        }
    }
}

/// Build a regex with the engine-wide settings: byte-oriented (no Unicode
/// classes), `i` and `s` flags, bounded program size.
pub(crate) fn build_regex(
    source: &str,
    case_insensitive: bool,
    dot_all: bool,
    size_limit: usize,
) -> Result<Regex, String> {
    RegexBuilder::new(source)
        .unicode(false)
        .case_insensitive(case_insensitive)
        .dot_matches_new_line(dot_all)
        .size_limit(size_limit)
        .build()
        .map_err(|e| format!("invalid regular expression: {e}"))
}

pub(crate) fn compile_regex(
    source: &str,
    flags: &str,
    modifiers: &Modifiers,
    size_limit: usize,
) -> Result<RegexMatcher, String> {
    let rejected = [
        (modifiers.wide, "wide"),
        (modifiers.xor.is_some(), "xor"),
        (modifiers.base64.is_some(), "base64"),
        (modifiers.base64wide.is_some(), "base64wide"),
    ];
    if let Some((_, name)) = rejected.iter().find(|(present, _)| *present) {
        return Err(format!("`{name}` cannot be used with regular expressions"));
    }

    let regex = build_regex(
        source,
        modifiers.nocase || flags.contains('i'),
        flags.contains('s'),
        size_limit,
    )?;

    Ok(RegexMatcher {
        regex,
        fullword: modifiers.fullword,
    })
}
