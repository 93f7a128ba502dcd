//! License key generation.
//!
//! Charsets are written compactly as a comma-separated list of literal
//! characters and `X-Y` ranges (e.g. `A-Z,2-9` or `a-f,0-9,_`). Keys are
//! drawn from the expanded alphabet with the operating system's secure
//! random source; there is no fallback to a weaker generator.

use rand::RngCore;
use rand::rngs::OsRng;
use thiserror::Error;

/// Alphabet used when no charset is configured anywhere.
pub const DEFAULT_CHARSET: &str = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Longest random part a key may have.
pub const MAX_KEY_LENGTH: usize = 256;

#[derive(Error, Debug)]
pub enum KeygenError {
    #[error("invalid range: {0}")]
    InvalidCharsetRange(String),

    #[error("charset expands to an empty alphabet")]
    EmptyCharset,

    #[error("key length {0} exceeds the maximum of {max}", max = MAX_KEY_LENGTH)]
    LengthTooLong(usize),

    #[error("random source error: {0}")]
    RandomSource(#[from] rand::Error),
}

/// Expand a compact charset spec into its alphabet.
///
/// Range tokens are exactly three characters with a `-` in the middle and
/// expand in code-point order. Any other token is copied verbatim.
/// Duplicates are kept, so repeating a character weights it.
pub fn parse_charset(spec: &str) -> Result<Vec<char>, KeygenError> {
    if spec.is_empty() {
        return Ok(DEFAULT_CHARSET.chars().collect());
    }

    let mut alphabet = Vec::new();
    for token in spec.split(',') {
        let chars: Vec<char> = token.chars().collect();
        if let [start, '-', end] = chars[..] {
            if start > end {
                return Err(KeygenError::InvalidCharsetRange(token.to_string()));
            }
            alphabet.extend(start..=end);
        } else {
            alphabet.extend(chars);
        }
    }

    if alphabet.is_empty() {
        return Err(KeygenError::EmptyCharset);
    }
    Ok(alphabet)
}

/// Generate a license key of `length` random characters from `alphabet`.
///
/// When `prefix` is non-empty the result is `prefix + separator + random`;
/// an empty separator falls back to `-`.
pub fn generate_license_key(
    prefix: &str,
    length: usize,
    separator: &str,
    alphabet: &[char],
) -> Result<String, KeygenError> {
    generate_with_rng(&mut OsRng, prefix, length, separator, alphabet)
}

fn generate_with_rng<R: RngCore>(
    rng: &mut R,
    prefix: &str,
    length: usize,
    separator: &str,
    alphabet: &[char],
) -> Result<String, KeygenError> {
    if alphabet.is_empty() {
        return Err(KeygenError::EmptyCharset);
    }
    if length > MAX_KEY_LENGTH {
        return Err(KeygenError::LengthTooLong(length));
    }

    let mut random_part = String::with_capacity(length);
    for _ in 0..length {
        let idx = uniform_index(rng, alphabet.len())?;
        random_part.push(alphabet[idx]);
    }

    if prefix.is_empty() {
        return Ok(random_part);
    }

    let separator = if separator.is_empty() { "-" } else { separator };
    Ok(format!("{}{}{}", prefix, separator, random_part))
}

/// Unbiased index in `0..n` using rejection sampling over `u32` draws.
fn uniform_index<R: RngCore>(rng: &mut R, n: usize) -> Result<usize, KeygenError> {
    let n = n as u64;
    let zone = (u64::from(u32::MAX) + 1) / n * n;
    loop {
        let mut buf = [0u8; 4];
        rng.try_fill_bytes(&mut buf)?;
        let v = u64::from(u32::from_le_bytes(buf));
        if v < zone {
            return Ok((v % n) as usize);
        }
    }
}
