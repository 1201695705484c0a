//! Atom selection.
//!
//! An atom is a short exact byte string taken from a pattern. Only atoms are
//! fed to the shared automaton; every automaton hit is a candidate that the
//! owning sub-pattern then verifies in full. Good atoms are rare in real data,
//! so the selection favours long windows of varied, uncommon bytes.

/// Bytes that show up everywhere in binaries (padding, NOP sleds, int3 fill).
const COMMON_BYTES: [u8; 4] = [0x00, 0xFF, 0x90, 0xCC];

/// An atom chosen from a byte string, with the distance from the start of
/// the pattern to the start of the atom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Atom {
    pub bytes: Vec<u8>,
    pub backtrack: usize,
}

/// Score a candidate atom. Higher is better.
pub(crate) fn atom_quality(bytes: &[u8]) -> i32 {
    let mut score = 0;
    let mut distinct = [false; 256];
    let mut distinct_count = 0;

    for &byte in bytes {
        score += if COMMON_BYTES.contains(&byte) {
            2
        } else if byte.is_ascii_alphabetic() {
            18
        } else {
            20
        };
        if !distinct[byte as usize] {
            distinct[byte as usize] = true;
            distinct_count += 1;
        }
    }

    if bytes.len() > 1 && distinct_count == 1 {
        score -= 10 * bytes.len() as i32;
    }
    score + 2 * distinct_count
}

/// Pick the best window of at most `max_len` bytes from `literal`.
///
/// Returns `None` only for an empty input.
pub(crate) fn best_atom(literal: &[u8], max_len: usize) -> Option<Atom> {
    if literal.is_empty() || max_len == 0 {
        return None;
    }
    let width = max_len.min(literal.len());

    let mut best: Option<(i32, usize)> = None;
    for start in 0..=literal.len() - width {
        let quality = atom_quality(&literal[start..start + width]);
        if best.map_or(true, |(q, _)| quality > q) {
            best = Some((quality, start));
        }
    }

    best.map(|(_, start)| Atom {
        bytes: literal[start..start + width].to_vec(),
        backtrack: start,
    })
}

/// Pick the best atom from a sequence of optional exact bytes, where `None`
/// stands for a position that is not a fixed byte (wildcard, nibble mask,
/// negation). Atoms never span such positions.
pub(crate) fn best_atom_in_runs(bytes: &[Option<u8>], max_len: usize) -> Option<Atom> {
    let mut best: Option<(i32, Atom)> = None;
    let mut run_start = 0;

    for end in 0..=bytes.len() {
        let run_ended = end == bytes.len() || bytes[end].is_none();
        if !run_ended {
            continue;
        }
        if end > run_start {
            let run: Vec<u8> = bytes[run_start..end].iter().flatten().copied().collect();
            if let Some(mut atom) = best_atom(&run, max_len) {
                atom.backtrack += run_start;
                let quality = atom_quality(&atom.bytes);
                if best.as_ref().map_or(true, |(q, _)| quality > *q) {
                    best = Some((quality, atom));
                }
            }
        }
        run_start = end + 1;
    }

    best.map(|(_, atom)| atom)
}

/// Every ASCII case combination of `atom`, without duplicates.
pub(crate) fn case_variants(atom: &[u8]) -> Vec<Vec<u8>> {
    let mut variants: Vec<Vec<u8>> = vec![Vec::with_capacity(atom.len())];
    for &byte in atom {
        let lower = byte.to_ascii_lowercase();
        let upper = byte.to_ascii_uppercase();
        if lower == upper {
            for variant in &mut variants {
                variant.push(byte);
            }
        } else {
            let mut uppers = variants.clone();
            for variant in &mut variants {
                variant.push(lower);
            }
            for variant in &mut uppers {
                variant.push(upper);
            }
            variants.extend(uppers);
        }
    }
    variants
}
