//! Ordered symbol sets used as numeral-system digits.

use serde::{Deserialize, Serialize};

/// Error returned when an alphabet has fewer than two distinct symbols.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("alphabet must contain at least 2 distinct symbols, got {0}")]
pub struct AlphabetError(pub usize);

/// An ordered set of distinct symbols.
///
/// The position of a symbol is its digit value, so the first symbol plays
/// the role of zero and is used for left padding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Alphabet {
    symbols: Vec<char>,
}

impl Alphabet {
    /// Decimal digits `0-9`.
    pub const DECIMAL: &'static str = "0123456789";

    /// Build an alphabet, dropping repeated symbols while keeping first-seen order.
    ///
    /// # Errors
    ///
    /// Returns an error if fewer than two distinct symbols remain.
    pub fn new(symbols: &str) -> Result<Self, AlphabetError> {
        let mut distinct: Vec<char> = Vec::with_capacity(symbols.len());
        for c in symbols.chars() {
            if !distinct.contains(&c) {
                distinct.push(c);
            }
        }

        if distinct.len() < 2 {
            return Err(AlphabetError(distinct.len()));
        }

        Ok(Self { symbols: distinct })
    }

    /// Decimal alphabet.
    #[must_use]
    pub fn decimal() -> Self {
        Self {
            symbols: Self::DECIMAL.chars().collect(),
        }
    }

    /// Numeral base (number of symbols).
    #[must_use]
    pub fn base(&self) -> u64 {
        self.symbols.len() as u64
    }

    /// Symbol for a digit value. Values are reduced modulo the base.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn symbol(&self, digit: u64) -> char {
        self.symbols[(digit % self.base()) as usize]
    }

    /// Digit value of a symbol, if it belongs to the alphabet.
    #[must_use]
    pub fn digit(&self, symbol: char) -> Option<u64> {
        self.symbols
            .iter()
            .position(|&c| c == symbol)
            .map(|p| p as u64)
    }

    /// The zero symbol used for padding.
    #[must_use]
    pub fn zero(&self) -> char {
        self.symbols[0]
    }

    /// Whether this alphabet is exactly `0-9` in order.
    #[must_use]
    pub fn is_decimal(&self) -> bool {
        self.symbols.iter().copied().eq(Self::DECIMAL.chars())
    }

    /// Whether every character of `value` is a symbol of this alphabet.
    #[must_use]
    pub fn contains_all(&self, value: &str) -> bool {
        value.chars().all(|c| self.symbols.contains(&c))
    }
}

impl TryFrom<String> for Alphabet {
    type Error = AlphabetError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<Alphabet> for String {
    fn from(value: Alphabet) -> Self {
        value.symbols.into_iter().collect()
    }
}

impl std::fmt::Display for Alphabet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for c in &self.symbols {
            write!(f, "{c}")?;
        }
        Ok(())
    }
}
