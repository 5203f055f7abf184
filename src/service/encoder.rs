//! Counter encoding over arbitrary alphabets.
//!
//! Free-function form of [`SequenceFormat`] for callers holding raw source
//! parameters.

use crate::domain::Alphabet;
use crate::domain::format::decode_body;
pub use crate::domain::format::{EncodeError, SequenceFormat};

/// Encode `n` over `alphabet`, padded to `min_len` and bounded by `max_len`.
///
/// # Errors
///
/// Returns `InvalidAlphabet` for fewer than two distinct symbols,
/// `InvalidLength` for inconsistent bounds, and `CapacityExhausted` when `n`
/// does not fit.
pub fn encode(
    n: u64,
    alphabet: &str,
    min_len: usize,
    max_len: usize,
    prefix: &str,
    suffix: &str,
) -> Result<String, EncodeError> {
    SequenceFormat::new(Alphabet::new(alphabet)?, min_len, max_len, prefix, suffix)?.encode(n)
}

/// Inverse of [`encode`].
///
/// # Errors
///
/// Returns an error if the alphabet is invalid, the affixes do not match,
/// or the body is not a number in this alphabet.
pub fn decode(identifier: &str, alphabet: &str, prefix: &str, suffix: &str) -> Result<u64, EncodeError> {
    let alphabet = Alphabet::new(alphabet)?;
    let body = identifier
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_suffix(suffix))
        .ok_or_else(|| EncodeError::AffixMismatch(identifier.to_string()))?;
    decode_body(body, &alphabet)
}
