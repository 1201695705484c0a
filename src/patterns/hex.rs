//! Hex patterns.
//!
//! A hex body such as `4D 5A ?? [2-4] (01 | 02 03) ~FF` is parsed into a small
//! token tree and compiled into a Thompson NFA program. Verification runs the
//! program anchored at a candidate offset, advancing every live thread in
//! lockstep, and returns the longest match. The work per candidate is bounded
//! by the pattern's maximum width times its program size.

/// One byte test: `(input & mask) == value`, inverted when `negated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct HexByte {
    pub value: u8,
    pub mask: u8,
    pub negated: bool,
}

impl HexByte {
    #[inline]
    pub fn matches(&self, byte: u8) -> bool {
        ((byte & self.mask) == self.value) != self.negated
    }

    /// The byte this test accepts, when it accepts exactly one.
    pub fn exact(&self) -> Option<u8> {
        (self.mask == 0xFF && !self.negated).then_some(self.value)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum HexToken {
    Byte(HexByte),
    Jump { min: u32, max: u32 },
    Alternatives(Vec<Vec<HexToken>>),
}

/// Instructions of the hex NFA.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HexInst {
    Byte(HexByte),
    /// Fork into both targets.
    Split(usize, usize),
    Jump(usize),
    Match,
}

/// A compiled hex pattern.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct HexProgram {
    insts: Vec<HexInst>,
    /// Byte tests before the first jump or alternative, at fixed offsets.
    prefix: Vec<HexByte>,
    max_width: usize,
}

impl HexProgram {
    pub fn prefix(&self) -> &[HexByte] {
        &self.prefix
    }

    #[cfg(test)]
    pub fn max_width(&self) -> usize {
        self.max_width
    }

    /// Length of the longest match starting exactly at `start`.
    pub fn longest_match(&self, data: &[u8], start: usize) -> Option<usize> {
        if start > data.len() {
            return None;
        }
        // No match can extend past the widest path through the program.
        let data = &data[..data.len().min(start.saturating_add(self.max_width))];

        let mut current: Vec<usize> = Vec::with_capacity(self.insts.len());
        let mut next: Vec<usize> = Vec::with_capacity(self.insts.len());
        let mut seen = vec![false; self.insts.len()];
        let mut best = None;

        self.add_thread(&mut current, &mut seen, 0);
        let mut position = start;

        while !current.is_empty() {
            seen.iter_mut().for_each(|s| *s = false);
            let byte = data.get(position).copied();

            for &pc in &current {
                match self.insts[pc] {
                    HexInst::Match => best = Some(position - start),
                    HexInst::Byte(test) => {
                        if byte.map_or(false, |b| test.matches(b)) {
                            self.add_thread(&mut next, &mut seen, pc + 1);
                        }
                    }
                    HexInst::Split(..) | HexInst::Jump(_) => {}
                }
            }

            std::mem::swap(&mut current, &mut next);
            next.clear();
            position += 1;
        }

        best
    }

    /// Follow jumps and splits from `pc`, queueing every byte test and match
    /// reached. Long alternative lists chain splits, so this walks a stack.
    fn add_thread(&self, list: &mut Vec<usize>, seen: &mut [bool], pc: usize) {
        let mut pending = vec![pc];
        while let Some(pc) = pending.pop() {
            if seen[pc] {
                continue;
            }
            seen[pc] = true;
            match self.insts[pc] {
                HexInst::Jump(target) => pending.push(target),
                HexInst::Split(first, second) => {
                    pending.push(second);
                    pending.push(first);
                }
                HexInst::Byte(_) | HexInst::Match => list.push(pc),
            }
        }
    }
}

/// Parse and compile a hex pattern body (the text between the braces).
pub(crate) fn compile_hex(
    body: &str,
    max_jump: u32,
    max_nesting: usize,
) -> Result<HexProgram, String> {
    let chars: Vec<char> = body.chars().filter(|c| !c.is_whitespace()).collect();
    let mut parser = HexParser {
        chars: &chars,
        position: 0,
        max_jump,
        max_nesting,
    };
    let tokens = parser.parse_sequence(0)?;
    if parser.position < chars.len() {
        return Err(format!("unexpected `{}` in hex pattern", chars[parser.position]));
    }
    if tokens.is_empty() {
        return Err("empty hex pattern".to_string());
    }
    if matches!(tokens.first(), Some(HexToken::Jump { .. })) {
        return Err("hex pattern cannot start with a jump".to_string());
    }
    if matches!(tokens.last(), Some(HexToken::Jump { .. })) {
        return Err("hex pattern cannot end with a jump".to_string());
    }

    let prefix = tokens
        .iter()
        .map_while(|token| match token {
            HexToken::Byte(byte) => Some(*byte),
            _ => None,
        })
        .collect();

    let mut insts = Vec::new();
    emit_sequence(&tokens, &mut insts);
    insts.push(HexInst::Match);

    Ok(HexProgram {
        insts,
        prefix,
        max_width: max_width(&tokens),
    })
}

struct HexParser<'a> {
    chars: &'a [char],
    position: usize,
    max_jump: u32,
    max_nesting: usize,
}

impl<'a> HexParser<'a> {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.position).copied()
    }

    fn parse_sequence(&mut self, depth: usize) -> Result<Vec<HexToken>, String> {
        let mut tokens = Vec::new();
        while let Some(ch) = self.peek() {
            match ch {
                '(' => {
                    if depth >= self.max_nesting {
                        return Err(format!(
                            "hex alternatives nested too deeply (limit {})",
                            self.max_nesting
                        ));
                    }
                    self.position += 1;
                    tokens.push(self.parse_alternatives(depth + 1)?);
                }
                ')' | '|' if depth > 0 => break,
                '[' => {
                    self.position += 1;
                    let (min, max) = self.parse_jump()?;
                    // Adjacent jumps coalesce.
                    if let Some(HexToken::Jump {
                        min: prev_min,
                        max: prev_max,
                    }) = tokens.last_mut()
                    {
                        *prev_min += min;
                        *prev_max += max;
                        if *prev_max > self.max_jump {
                            return Err(format!(
                                "jump of {} exceeds the maximum of {}",
                                prev_max, self.max_jump
                            ));
                        }
                    } else {
                        tokens.push(HexToken::Jump { min, max });
                    }
                }
                '~' => {
                    self.position += 1;
                    let mut byte = self.parse_byte()?;
                    if byte.mask == 0 {
                        return Err("`~??` is not a valid hex token".to_string());
                    }
                    byte.negated = true;
                    tokens.push(HexToken::Byte(byte));
                }
                _ => tokens.push(HexToken::Byte(self.parse_byte()?)),
            }
        }
        Ok(tokens)
    }

    fn parse_alternatives(&mut self, depth: usize) -> Result<HexToken, String> {
        let mut alternatives = Vec::new();
        loop {
            let sequence = self.parse_sequence(depth)?;
            if sequence.is_empty() {
                return Err("empty alternative in hex pattern".to_string());
            }
            alternatives.push(sequence);
            match self.peek() {
                Some('|') => self.position += 1,
                Some(')') => {
                    self.position += 1;
                    break;
                }
                _ => return Err("unterminated alternative in hex pattern".to_string()),
            }
        }
        if alternatives.len() < 2 {
            return Err("alternative group needs at least two options".to_string());
        }
        Ok(HexToken::Alternatives(alternatives))
    }

    fn parse_nibble(&mut self) -> Result<(u8, u8), String> {
        match self.peek() {
            Some('?') => {
                self.position += 1;
                Ok((0, 0))
            }
            Some(ch) => match ch.to_digit(16) {
                Some(digit) => {
                    self.position += 1;
                    Ok((digit as u8, 0xF))
                }
                None => Err(format!("invalid character `{ch}` in hex pattern")),
            },
            None => Err("odd number of nibbles in hex pattern".to_string()),
        }
    }

    fn parse_byte(&mut self) -> Result<HexByte, String> {
        let (high, high_mask) = self.parse_nibble()?;
        let (low, low_mask) = match self.peek() {
            Some(ch) if ch.is_ascii_hexdigit() || ch == '?' => self.parse_nibble()?,
            _ => return Err("odd number of nibbles in hex pattern".to_string()),
        };
        Ok(HexByte {
            value: (high << 4) | low,
            mask: (high_mask << 4) | low_mask,
            negated: false,
        })
    }

    fn parse_number(&mut self) -> Option<u32> {
        let start = self.position;
        while self.peek().map_or(false, |c| c.is_ascii_digit()) {
            self.position += 1;
        }
        if start == self.position {
            return None;
        }
        self.chars[start..self.position]
            .iter()
            .collect::<String>()
            .parse()
            .ok()
    }

    fn parse_jump(&mut self) -> Result<(u32, u32), String> {
        let min = self.parse_number();
        let (min, max) = match self.peek() {
            Some(']') => match min {
                Some(n) => (n, n),
                None => return Err("empty jump in hex pattern".to_string()),
            },
            Some('-') => {
                self.position += 1;
                match self.parse_number() {
                    Some(max) => (min.unwrap_or(0), max),
                    None => return Err("unbounded jumps are not supported".to_string()),
                }
            }
            _ => return Err("malformed jump in hex pattern".to_string()),
        };
        if self.peek() != Some(']') {
            return Err("malformed jump in hex pattern".to_string());
        }
        self.position += 1;

        if min > max {
            return Err(format!("invalid jump range [{min}-{max}]"));
        }
        if max > self.max_jump {
            return Err(format!(
                "jump of {max} exceeds the maximum of {}",
                self.max_jump
            ));
        }
        if max == 0 {
            return Err("jump of zero bytes".to_string());
        }
        Ok((min, max))
    }
}

const ANY_BYTE: HexByte = HexByte {
    value: 0,
    mask: 0,
    negated: false,
};

fn emit_sequence(tokens: &[HexToken], insts: &mut Vec<HexInst>) {
    for token in tokens {
        match token {
            HexToken::Byte(byte) => insts.push(HexInst::Byte(*byte)),
            HexToken::Jump { min, max } => {
                for _ in 0..*min {
                    insts.push(HexInst::Byte(ANY_BYTE));
                }
                // Each optional byte can bail out to the end of the jump.
                let optional = (*max - *min) as usize;
                let end = insts.len() + optional * 2;
                for _ in 0..optional {
                    let split = insts.len();
                    insts.push(HexInst::Split(split + 1, end));
                    insts.push(HexInst::Byte(ANY_BYTE));
                }
            }
            HexToken::Alternatives(alternatives) => {
                let mut exits = Vec::new();
                for (i, alternative) in alternatives.iter().enumerate() {
                    let is_last = i + 1 == alternatives.len();
                    let split = insts.len();
                    if !is_last {
                        insts.push(HexInst::Split(split + 1, usize::MAX));
                    }
                    emit_sequence(alternative, insts);
                    if !is_last {
                        exits.push(insts.len());
                        insts.push(HexInst::Jump(usize::MAX));
                        let next = insts.len();
                        insts[split] = HexInst::Split(split + 1, next);
                    }
                }
                let end = insts.len();
                for exit in exits {
                    insts[exit] = HexInst::Jump(end);
                }
            }
        }
    }
}

fn max_width(tokens: &[HexToken]) -> usize {
    tokens
        .iter()
        .map(|token| match token {
            HexToken::Byte(_) => 1,
            HexToken::Jump { max, .. } => *max as usize,
            HexToken::Alternatives(alternatives) => {
                alternatives.iter().map(|a| max_width(a)).max().unwrap_or(0)
            }
        })
        .sum()
}
