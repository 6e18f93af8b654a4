//! Pattern matching implementation.

use std::fmt;

use crate::crypto::{Address, ADDRESS_NIBBLES};
use crate::error::{PatternSide, VanityError};

/// Maximum nibbles on each side of a pattern (a full address).
pub const MAX_PATTERN_NIBBLES: usize = ADDRESS_NIBBLES;

/// A compiled prefix/suffix pattern, stored as nibble values.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Pattern {
    /// Required leading nibbles, in address order
    prefix: Vec<u8>,
    /// Required trailing nibbles, in address order
    suffix: Vec<u8>,
}

impl Pattern {
    /// Creates a pattern from nibble values (each 0..=15).
    pub fn new(prefix: Vec<u8>, suffix: Vec<u8>) -> Result<Self, VanityError> {
        check_side(&prefix, PatternSide::Prefix)?;
        check_side(&suffix, PatternSide::Suffix)?;
        Ok(Self { prefix, suffix })
    }

    /// Parses case-insensitive hex text. A leading `0x` is ignored on either side.
    pub fn from_hex(prefix: &str, suffix: &str) -> Result<Self, VanityError> {
        Self::new(parse_nibbles(prefix)?, parse_nibbles(suffix)?)
    }

    /// The pattern that every address satisfies.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    pub fn suffix(&self) -> &[u8] {
        &self.suffix
    }

    /// Returns the prefix as lowercase hex.
    pub fn prefix_hex(&self) -> String {
        nibbles_to_hex(&self.prefix)
    }

    /// Returns the suffix as lowercase hex.
    pub fn suffix_hex(&self) -> String {
        nibbles_to_hex(&self.suffix)
    }

    /// Returns true when both windows are empty.
    pub fn is_empty(&self) -> bool {
        self.prefix.is_empty() && self.suffix.is_empty()
    }

    /// Returns true when the prefix and suffix windows share nibble positions.
    pub fn overlaps(&self) -> bool {
        self.prefix.len() + self.suffix.len() > ADDRESS_NIBBLES
    }

    /// Matches an address against this pattern.
    ///
    /// Nibbles `[0, prefix.len())` must equal the prefix and nibbles
    /// `[40 - suffix.len(), 40)` must equal the suffix, even when they overlap.
    #[inline]
    pub fn matches(&self, address: &Address) -> bool {
        let suffix_start = ADDRESS_NIBBLES - self.suffix.len();

        self.prefix
            .iter()
            .enumerate()
            .all(|(i, &n)| address.nibble(i) == n)
            && self
                .suffix
                .iter()
                .enumerate()
                .all(|(i, &n)| address.nibble(suffix_start + i) == n)
    }

    /// Returns the estimated difficulty (number of attempts to find a match).
    ///
    /// Each constrained nibble has 16 possible values, so expected attempts
    /// are 16^n for n constrained positions (at most 40).
    pub fn estimated_difficulty(&self) -> u64 {
        let constrained = (self.prefix.len() + self.suffix.len()).min(ADDRESS_NIBBLES);
        16u64.saturating_pow(constrained as u32)
    }

    /// Returns a human-readable difficulty estimate.
    pub fn difficulty_description(&self) -> String {
        let diff = self.estimated_difficulty();
        match diff {
            0..=1_000 => "Very Easy (< 1 second)".into(),
            1_001..=100_000 => "Easy (seconds)".into(),
            100_001..=10_000_000 => "Medium (minutes)".into(),
            10_000_001..=1_000_000_000 => "Hard (hours)".into(),
            _ => "Very Hard (days or more)".into(),
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stars = ADDRESS_NIBBLES.saturating_sub(self.prefix.len() + self.suffix.len());
        write!(
            f,
            "0x{}{}{}",
            self.prefix_hex(),
            "*".repeat(stars),
            self.suffix_hex()
        )
    }
}

fn check_side(nibbles: &[u8], side: PatternSide) -> Result<(), VanityError> {
    if nibbles.len() > MAX_PATTERN_NIBBLES {
        return Err(VanityError::InvalidPatternLength {
            side,
            len: nibbles.len(),
        });
    }
    match nibbles.iter().find(|&&n| n > 0x0f) {
        Some(&n) => Err(VanityError::InvalidNibble(n)),
        None => Ok(()),
    }
}

fn parse_nibbles(text: &str) -> Result<Vec<u8>, VanityError> {
    let text = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);

    text.chars()
        .map(|c| {
            c.to_digit(16)
                .map(|d| d as u8)
                .ok_or(VanityError::InvalidPatternDigit(c))
        })
        .collect()
}

fn nibbles_to_hex(nibbles: &[u8]) -> String {
    const DIGITS: &[u8; 16] = b"0123456789abcdef";
    nibbles
        .iter()
        .map(|&n| DIGITS[(n & 0x0f) as usize] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_address(hex_str: &str) -> Address {
        hex_str.parse().unwrap()
    }

    #[test]
    fn test_prefix_and_suffix_match() {
        let pattern = Pattern::new(vec![13, 14, 10, 13], vec![1, 2, 3, 4]).unwrap();
        let addr = make_address("deadbeef00000000000000000000000000001234");
        assert!(pattern.matches(&addr));
    }

    #[test]
    fn test_suffix_mismatch() {
        let pattern = Pattern::new(vec![13, 14, 10, 13], vec![5, 6, 7, 8]).unwrap();
        let addr = make_address("deadbeef00000000000000000000000000001234");
        assert!(!pattern.matches(&addr));
    }

    #[test]
    fn test_prefix_no_match() {
        let pattern = Pattern::from_hex("dead", "").unwrap();
        let addr = make_address("beefdeadbeef0000000000000000000000000000");
        assert!(!pattern.matches(&addr));
    }

    #[test]
    fn test_case_insensitive_parse() {
        let upper = Pattern::from_hex("0xDEAD", "BeEf").unwrap();
        let lower = Pattern::from_hex("dead", "beef").unwrap();
        assert_eq!(upper, lower);
        assert_eq!(upper.prefix_hex(), "dead");
        assert_eq!(upper.suffix_hex(), "beef");
    }

    #[test]
    fn test_empty_pattern_matches_everything() {
        let pattern = Pattern::empty();
        assert!(pattern.is_empty());
        assert!(pattern.matches(&make_address("0000000000000000000000000000000000000000")));
        assert!(pattern.matches(&make_address("ffffffffffffffffffffffffffffffffffffffff")));
        assert_eq!(pattern.estimated_difficulty(), 1);
    }

    #[test]
    fn test_overlapping_windows_checked_independently() {
        let addr = make_address("deadbeef00000000000000000000000000001234");
        // Full address on both sides.
        let full = addr.to_hex();
        let pattern = Pattern::from_hex(&full, &full).unwrap();
        assert!(pattern.overlaps());
        assert!(pattern.matches(&addr));

        // Suffix window covers nibble 0 too and disagrees there.
        let wrong = Pattern::from_hex("de", &format!("0{}", &full[1..])).unwrap();
        assert!(!wrong.matches(&addr));
    }

    #[test]
    fn test_length_limits() {
        let max = "a".repeat(40);
        assert!(Pattern::from_hex(&max, &max).is_ok());

        let too_long = "a".repeat(41);
        let err = Pattern::from_hex(&too_long, "").unwrap_err();
        assert!(matches!(
            err,
            VanityError::InvalidPatternLength {
                side: PatternSide::Prefix,
                len: 41
            }
        ));
        let err = Pattern::from_hex("", &too_long).unwrap_err();
        assert!(matches!(
            err,
            VanityError::InvalidPatternLength {
                side: PatternSide::Suffix,
                ..
            }
        ));
    }

    #[test]
    fn test_invalid_digits_and_nibbles() {
        assert!(matches!(
            Pattern::from_hex("xyz", ""),
            Err(VanityError::InvalidPatternDigit('x'))
        ));
        assert!(matches!(
            Pattern::new(vec![1, 16], vec![]),
            Err(VanityError::InvalidNibble(16))
        ));
    }

    #[test]
    fn test_difficulty() {
        let pattern = Pattern::from_hex("dead", "").unwrap();
        assert_eq!(pattern.estimated_difficulty(), 65536); // 16^4
        let pattern = Pattern::from_hex("dead", "beef").unwrap();
        assert_eq!(pattern.estimated_difficulty(), 1 << 32);
        assert_eq!(pattern.difficulty_description(), "Very Hard (days or more)");
    }

    #[test]
    fn test_display() {
        let pattern = Pattern::from_hex("ab", "cd").unwrap();
        assert_eq!(
            pattern.to_string(),
            format!("0xab{}cd", "*".repeat(36))
        );
    }
}
