//! Shared key-value type and line format for intermediate/output files.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One key-value pair as produced by `map` or consumed by `reduce`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Renders this pair in the on-disk line format `key SP value LF`.
    pub fn to_line(&self) -> String {
        format!("{} {}\n", self.key, self.value)
    }
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("line missing a space separator: {0:?}")]
    MissingSeparator(String),
}

/// Parses one intermediate/output line, trimming a trailing `CR`/`LF` and
/// splitting on the first space. Returns `Ok(None)` for a blank line.
pub fn parse_line(raw: &str) -> Result<Option<KeyValue>, ParseError> {
    let trimmed = raw.trim_end_matches(['\r', '\n']);
    if trimmed.trim().is_empty() {
        return Ok(None);
    }
    match trimmed.split_once(' ') {
        Some((key, value)) => Ok(Some(KeyValue::new(key, value))),
        None => Err(ParseError::MissingSeparator(trimmed.to_owned())),
    }
}

/// `FNV1a(key) & 0x7fffffff`, used to route a key to a reduce partition.
pub fn ihash(key: &str) -> u32 {
    const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
    const FNV_PRIME: u32 = 0x0100_0193;
    let mut hash = FNV_OFFSET_BASIS;
    for byte in key.as_bytes() {
        hash ^= *byte as u32;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash & 0x7fff_ffff
}

/// Partition index for `key` given `n_reduce` reduce tasks.
pub fn partition_of(key: &str, n_reduce: i32) -> i32 {
    (ihash(key) % n_reduce as u32) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_well_formed_line() {
        assert_eq!(
            parse_line("a 1\n").unwrap(),
            Some(KeyValue::new("a", "1"))
        );
    }

    #[test]
    fn blank_lines_parse_to_none() {
        assert_eq!(parse_line("\n").unwrap(), None);
        assert_eq!(parse_line("   \n").unwrap(), None);
        assert_eq!(parse_line("").unwrap(), None);
    }

    #[test]
    fn missing_separator_is_an_error() {
        assert!(parse_line("nospacehere\n").is_err());
    }

    #[test]
    fn partition_is_stable_and_in_range() {
        for key in ["a", "b", "hello world", ""] {
            let p = partition_of(key, 7);
            assert!((0..7).contains(&p));
            assert_eq!(p, partition_of(key, 7));
        }
    }
}
