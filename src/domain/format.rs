//! Encoding format of sequential sources.
//!
//! A counter is written in the numeral system whose digits are the alphabet
//! symbols, left padded with the zero symbol, and wrapped in prefix/suffix.

use super::{Alphabet, AlphabetError};

/// Encoding errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    /// Fewer than two distinct symbols.
    #[error("invalid alphabet: {0}")]
    InvalidAlphabet(#[from] AlphabetError),

    /// Length bounds are inconsistent with the prefix and suffix.
    #[error(
        "invalid length bounds: min_length {min_length}, max_length {max_length}, affixes {affix_length}"
    )]
    InvalidLength {
        /// Configured minimum.
        min_length: usize,
        /// Configured maximum.
        max_length: usize,
        /// Combined prefix and suffix length.
        affix_length: usize,
    },

    /// The counter does not fit in `max_length`.
    #[error("value {value} cannot be encoded within {max_length} characters")]
    CapacityExhausted {
        /// Counter value.
        value: u64,
        /// Configured maximum.
        max_length: usize,
    },

    /// The identifier does not carry the expected prefix or suffix.
    #[error("'{0}' does not match the configured prefix and suffix")]
    AffixMismatch(String),

    /// The body contains a symbol outside the alphabet.
    #[error("symbol '{0}' is not part of the alphabet")]
    UnknownSymbol(char),

    /// The body is empty.
    #[error("identifier body is empty")]
    EmptyBody,

    /// The decoded value exceeds `u64`.
    #[error("decoded value overflows a 64-bit counter")]
    Overflow,
}

/// Encoding parameters of a sequential source.
///
/// Construction enforces `max_length >= min_length >= affixes + 1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceFormat {
    alphabet: Alphabet,
    min_length: usize,
    max_length: usize,
    prefix: String,
    suffix: String,
    affix_length: usize,
}

impl SequenceFormat {
    /// Create a format.
    ///
    /// # Errors
    ///
    /// Returns `InvalidLength` if the bounds cannot hold at least one body symbol.
    pub fn new(
        alphabet: Alphabet,
        min_length: usize,
        max_length: usize,
        prefix: &str,
        suffix: &str,
    ) -> Result<Self, EncodeError> {
        let affix_length = prefix.chars().count() + suffix.chars().count();
        if min_length < affix_length + 1 || max_length < min_length {
            return Err(EncodeError::InvalidLength {
                min_length,
                max_length,
                affix_length,
            });
        }

        Ok(Self {
            alphabet,
            min_length,
            max_length,
            prefix: prefix.to_string(),
            suffix: suffix.to_string(),
            affix_length,
        })
    }

    /// The alphabet.
    #[must_use]
    pub const fn alphabet(&self) -> &Alphabet {
        &self.alphabet
    }

    /// Largest counter value that fits in `max_length`.
    #[must_use]
    pub fn capacity(&self) -> u64 {
        let body = u32::try_from(self.max_length - self.affix_length).unwrap_or(u32::MAX);
        self.alphabet
            .base()
            .checked_pow(body)
            .map_or(u64::MAX, |n| n - 1)
    }

    /// Encode a counter value.
    ///
    /// # Errors
    ///
    /// Returns `CapacityExhausted` if the value needs more than `max_length` characters.
    pub fn encode(&self, value: u64) -> Result<String, EncodeError> {
        let base = self.alphabet.base();
        let mut digits = Vec::new();
        let mut rest = value;
        loop {
            digits.push(self.alphabet.symbol(rest % base));
            rest /= base;
            if rest == 0 {
                break;
            }
        }

        let padded = self.min_length - self.affix_length;
        let body_length = digits.len().max(padded);
        if self.affix_length + body_length > self.max_length {
            return Err(EncodeError::CapacityExhausted {
                value,
                max_length: self.max_length,
            });
        }

        let mut out = String::with_capacity(self.affix_length + body_length);
        out.push_str(&self.prefix);
        for _ in digits.len()..body_length {
            out.push(self.alphabet.zero());
        }
        out.extend(digits.iter().rev());
        out.push_str(&self.suffix);
        Ok(out)
    }

    /// Decode an identifier produced by [`encode`](Self::encode).
    ///
    /// # Errors
    ///
    /// Returns an error if the affixes do not match, the body is empty or
    /// holds foreign symbols, or the value overflows.
    pub fn decode(&self, identifier: &str) -> Result<u64, EncodeError> {
        let body = identifier
            .strip_prefix(self.prefix.as_str())
            .and_then(|rest| rest.strip_suffix(self.suffix.as_str()))
            .ok_or_else(|| EncodeError::AffixMismatch(identifier.to_string()))?;
        decode_body(body, &self.alphabet)
    }
}

pub(crate) fn decode_body(body: &str, alphabet: &Alphabet) -> Result<u64, EncodeError> {
    if body.is_empty() {
        return Err(EncodeError::EmptyBody);
    }

    let base = alphabet.base();
    body.chars().try_fold(0u64, |acc, c| {
        let digit = alphabet.digit(c).ok_or(EncodeError::UnknownSymbol(c))?;
        acc.checked_mul(base)
            .and_then(|v| v.checked_add(digit))
            .ok_or(EncodeError::Overflow)
    })
}
