// Size strings: turns values such as "500MB" or "1.5 gigabytes" into a
// byte count. Used for the PART_SIZE setting and the `--part-size` flag.

use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

const KB: f64 = 1024.0;
const MB: f64 = 1024.0 * 1024.0;
// GB is 1000 * MiB, not 1024^3 and not 10^9. Upload sizes configured
// against the backend depend on this value.
const GB: f64 = 1000.0 * 1024.0 * 1024.0;

/// Errors returned by [`parse_size`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SizeError {
    #[error("invalid size format: {0}")]
    InvalidFormat(String),

    #[error("invalid number in size: {0}")]
    InvalidNumber(String),

    #[error("unsupported size unit: {0}")]
    UnsupportedUnit(String),
}

fn size_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^\s*(\d+(?:\.\d+)?)\s*([a-z]+)\s*$").expect("size pattern is valid")
    })
}

/// Parse `<number><unit>` into bytes. Matching is case-insensitive and
/// whitespace between the number and the unit is allowed.
pub fn parse_size(input: &str) -> Result<u64, SizeError> {
    let caps = size_pattern()
        .captures(input)
        .ok_or_else(|| SizeError::InvalidFormat(input.to_string()))?;

    let number: f64 = caps[1]
        .parse()
        .map_err(|_| SizeError::InvalidNumber(caps[1].to_string()))?;

    let unit = caps[2].to_ascii_lowercase();
    let multiplier = match unit.as_str() {
        "b" | "byte" | "bytes" => 1.0,
        "kb" | "kilobyte" | "kilobytes" => KB,
        "mb" | "megabyte" | "megabytes" => MB,
        "gb" | "gigabyte" | "gigabytes" => GB,
        _ => return Err(SizeError::UnsupportedUnit(unit)),
    };

    Ok((number * multiplier) as u64)
}
