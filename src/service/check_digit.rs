//! Check character computation.
//!
//! Both algorithms are the Luhn scheme: walking from the right, every other
//! code point is doubled (starting with the rightmost body symbol), doubled
//! values are folded back into the base, and the check symbol brings the sum
//! to a multiple of the base. With the decimal alphabet this is plain Luhn.

use crate::domain::{Alphabet, CheckDigitAlgorithm};

/// Check character errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CheckDigitError {
    /// The body contains a symbol the algorithm cannot weigh.
    #[error("symbol '{0}' is not supported by the check digit alphabet")]
    UnsupportedAlphabet(char),

    /// Nothing to compute over.
    #[error("cannot compute a check digit for an empty body")]
    EmptyBody,
}

/// Pluggable check character strategy.
pub trait CheckDigitStrategy: Send + Sync {
    /// Compute the check character for `body`.
    ///
    /// # Errors
    ///
    /// Returns an error if `body` is empty or holds unsupported symbols.
    fn compute(&self, body: &str) -> Result<char, CheckDigitError>;

    /// Verify an identifier whose last character is the check character.
    fn verify(&self, identifier: &str) -> bool {
        let mut chars = identifier.chars();
        let Some(check) = chars.next_back() else {
            return false;
        };
        self.compute(chars.as_str()).is_ok_and(|c| c == check)
    }
}

/// Decimal Luhn (mod 10). Rejects non-numeric bodies.
#[derive(Debug, Clone, Copy, Default)]
pub struct LuhnMod10;

impl CheckDigitStrategy for LuhnMod10 {
    fn compute(&self, body: &str) -> Result<char, CheckDigitError> {
        if let Some(c) = body.chars().find(|c| !c.is_ascii_digit()) {
            return Err(CheckDigitError::UnsupportedAlphabet(c));
        }
        luhn_mod_n(body, &Alphabet::decimal())
    }
}

/// Luhn mod N over an arbitrary alphabet.
#[derive(Debug, Clone)]
pub struct LuhnModN {
    alphabet: Alphabet,
}

impl LuhnModN {
    /// Create the strategy for an alphabet.
    #[must_use]
    pub const fn new(alphabet: Alphabet) -> Self {
        Self { alphabet }
    }
}

impl CheckDigitStrategy for LuhnModN {
    fn compute(&self, body: &str) -> Result<char, CheckDigitError> {
        luhn_mod_n(body, &self.alphabet)
    }
}

fn luhn_mod_n(body: &str, alphabet: &Alphabet) -> Result<char, CheckDigitError> {
    if body.is_empty() {
        return Err(CheckDigitError::EmptyBody);
    }

    let n = alphabet.base();
    let mut factor = 2;
    let mut sum = 0u64;
    for c in body.chars().rev() {
        let code_point = alphabet
            .digit(c)
            .ok_or(CheckDigitError::UnsupportedAlphabet(c))?;
        let addend = factor * code_point;
        sum += addend / n + addend % n;
        factor = if factor == 2 { 1 } else { 2 };
    }

    Ok(alphabet.symbol((n - sum % n) % n))
}

/// Strategy configured by an algorithm, or `None` when disabled.
#[must_use]
pub fn strategy(algorithm: &CheckDigitAlgorithm) -> Option<Box<dyn CheckDigitStrategy>> {
    match algorithm {
        CheckDigitAlgorithm::None => None,
        CheckDigitAlgorithm::Mod10Luhn => Some(Box::new(LuhnMod10)),
        CheckDigitAlgorithm::ModN { alphabet } => Some(Box::new(LuhnModN::new(alphabet.clone()))),
    }
}

/// Compute the check character for `body`, or `None` when the algorithm is disabled.
///
/// # Errors
///
/// Returns an error if the body cannot be weighed by the algorithm.
pub fn compute(body: &str, algorithm: &CheckDigitAlgorithm) -> Result<Option<char>, CheckDigitError> {
    strategy(algorithm).map(|s| s.compute(body)).transpose()
}

/// Verify the trailing check character. Always true when the algorithm is disabled.
#[must_use]
pub fn verify(identifier: &str, algorithm: &CheckDigitAlgorithm) -> bool {
    strategy(algorithm).is_none_or(|s| s.verify(identifier))
}
