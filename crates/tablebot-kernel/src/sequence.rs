use std::fmt;

/// Round result symbol. The history alphabet is exactly these three.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Player,
    Banker,
    Tie,
}

impl Side {
    /// Parses one history symbol: `P`/`B`/`T` or `閒`/`莊`/`和`.
    pub fn from_symbol(c: char) -> Option<Self> {
        match c {
            'P' | '閒' => Some(Side::Player),
            'B' | '莊' => Some(Side::Banker),
            'T' | '和' => Some(Side::Tie),
            _ => None,
        }
    }

    /// Parses a reported outcome. Besides the history alphabet this accepts
    /// the dragon-tiger labels, which occupy the player and banker slots.
    pub fn from_label(label: &str) -> Option<Self> {
        let mut chars = label.trim().chars();
        let c = chars.next()?;
        if chars.next().is_some() {
            return None;
        }
        match c {
            '龍' => Some(Side::Player),
            '虎' => Some(Side::Banker),
            other => Self::from_symbol(other),
        }
    }

    pub fn symbol(self) -> char {
        match self {
            Side::Player => '閒',
            Side::Banker => '莊',
            Side::Tie => '和',
        }
    }

    pub fn label(self, dragon_tiger: bool) -> &'static str {
        match (self, dragon_tiger) {
            (Side::Player, false) => "閒",
            (Side::Banker, false) => "莊",
            (Side::Player, true) => "龍",
            (Side::Banker, true) => "虎",
            (Side::Tie, _) => "和",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceBounds {
    pub min_len: usize,
    pub max_len: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceError {
    InvalidSymbols,
    TooShort { len: usize, min_len: usize },
    TooLong { len: usize, max_len: usize },
}

/// Text that looks like an attempt at a history string: a single token of
/// alphabet symbols and ASCII letters or digits, at least half of them
/// alphabet symbols. Punctuation marks the text as free text.
pub fn is_sequence_candidate(text: &str) -> bool {
    let plausible = |c: char| Side::from_symbol(c).is_some() || c.is_ascii_alphanumeric();
    if text.is_empty() || !text.chars().all(plausible) {
        return false;
    }
    let total = text.chars().count();
    let hits = text
        .chars()
        .filter(|c| Side::from_symbol(*c).is_some())
        .count();
    hits > 0 && hits * 2 >= total
}

/// Validates a history string. Symbol validity is checked before length so
/// that a mixed string is always reported as invalid, whatever its length.
pub fn validate_sequence(text: &str, bounds: SequenceBounds) -> Result<Vec<Side>, SequenceError> {
    let sides: Option<Vec<Side>> = text.chars().map(Side::from_symbol).collect();
    let sides = sides.ok_or(SequenceError::InvalidSymbols)?;
    if sides.len() < bounds.min_len {
        return Err(SequenceError::TooShort {
            len: sides.len(),
            min_len: bounds.min_len,
        });
    }
    if sides.len() > bounds.max_len {
        return Err(SequenceError::TooLong {
            len: sides.len(),
            max_len: bounds.max_len,
        });
    }
    Ok(sides)
}

pub fn render_sequence(sides: &[Side]) -> String {
    sides.iter().map(|s| s.symbol()).collect()
}
