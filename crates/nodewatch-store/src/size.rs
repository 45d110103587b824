//! Human-readable byte sizes such as `"16GB"` or `"1.5 GiB"`.
//!
//! Units without an `i` are decimal (`KB` = 1000 bytes, `GB` = 10^9), units
//! with an `i` are binary (`KiB` = 1024 bytes, `GiB` = 2^30). A lone letter
//! counts as decimal (`16G` = 16 GB). Matching is case-insensitive and a bare
//! number is a byte count.

use crate::error::{StoreError, StoreResult};

const UNITS: &[(&str, u64)] = &[
    ("", 1),
    ("b", 1),
    ("byte", 1),
    ("bytes", 1),
    ("k", 1_000),
    ("kb", 1_000),
    ("m", 1_000_000),
    ("mb", 1_000_000),
    ("g", 1_000_000_000),
    ("gb", 1_000_000_000),
    ("t", 1_000_000_000_000),
    ("tb", 1_000_000_000_000),
    ("p", 1_000_000_000_000_000),
    ("pb", 1_000_000_000_000_000),
    ("ki", 1 << 10),
    ("kib", 1 << 10),
    ("mi", 1 << 20),
    ("mib", 1 << 20),
    ("gi", 1 << 30),
    ("gib", 1 << 30),
    ("ti", 1 << 40),
    ("tib", 1 << 40),
    ("pi", 1 << 50),
    ("pib", 1 << 50),
];

/// Parse a size string into a byte count.
///
/// # Errors
///
/// Returns [`StoreError::InvalidSize`] for empty or negative input, an
/// unknown unit, or a value that does not fit in `u64`.
pub fn parse_size(input: &str) -> StoreResult<u64> {
    let invalid = |reason| StoreError::InvalidSize {
        input: input.to_string(),
        reason,
    };

    let s = input.trim();
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(split);
    if number.is_empty() {
        return Err(invalid("missing number"));
    }

    let unit = unit.trim().to_ascii_lowercase();
    let multiplier = UNITS
        .iter()
        .find(|(name, _)| *name == unit)
        .map(|&(_, m)| m)
        .ok_or_else(|| invalid("unknown unit"))?;

    // Whole numbers stay in integer arithmetic so large sizes are exact.
    if let Ok(whole) = number.parse::<u64>() {
        return whole
            .checked_mul(multiplier)
            .ok_or_else(|| invalid("too large"));
    }

    let value: f64 = number.parse().map_err(|_| invalid("malformed number"))?;
    let bytes = value * multiplier as f64;
    if !bytes.is_finite() || bytes >= u64::MAX as f64 {
        return Err(invalid("too large"));
    }
    Ok(bytes as u64)
}
