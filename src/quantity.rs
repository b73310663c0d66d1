//! Kubernetes quantity arithmetic
//!
//! Sizes travel through the API as quantity strings ("10Gi", "500M",
//! "1.5Ti", "1e3"). Everything here resolves them to whole bytes the same
//! way the API server does: binary suffixes are powers of 1024, decimal
//! suffixes powers of 1000, and fractional bytes round up.

use crate::error::{Error, Result};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

pub const KI: i64 = 1024;
pub const MI: i64 = KI * 1024;
pub const GI: i64 = MI * 1024;
pub const TI: i64 = GI * 1024;

const BINARY_SUFFIXES: [(&str, u32); 6] = [
    ("Ki", 1),
    ("Mi", 2),
    ("Gi", 3),
    ("Ti", 4),
    ("Pi", 5),
    ("Ei", 6),
];

const DECIMAL_SUFFIXES: [(&str, i32); 9] = [
    ("n", -9),
    ("u", -6),
    ("m", -3),
    ("k", 3),
    ("M", 6),
    ("G", 9),
    ("T", 12),
    ("P", 15),
    ("E", 18),
];

/// Parse a quantity string into bytes
pub fn parse_quantity(s: &str) -> Result<i64> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::CapacityParse("empty quantity string".into()));
    }

    let (negative, unsigned) = match s.as_bytes()[0] {
        b'-' => (true, &s[1..]),
        b'+' => (false, &s[1..]),
        _ => (false, s),
    };

    let num_end = unsigned
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(unsigned.len());
    let (num_str, suffix) = unsigned.split_at(num_end);

    let (int_part, frac_part) = match num_str.split_once('.') {
        Some((i, f)) => (i, f),
        None => (num_str, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(Error::CapacityParse(format!("invalid number in quantity: {}", s)));
    }

    let digits = format!("{}{}", int_part, frac_part);
    let mantissa: i128 = digits
        .parse()
        .map_err(|_| Error::CapacityParse(format!("invalid number in quantity: {}", s)))?;

    // value = mantissa * 2^(10*bin) * 10^(dec) / 10^frac_len
    let (binary_power, mut decimal_power) = parse_suffix(suffix)
        .ok_or_else(|| Error::CapacityParse(format!("unknown quantity suffix: {}", suffix)))?;
    decimal_power -= frac_part.len() as i32;

    let overflow = || Error::CapacityParse(format!("quantity out of range: {}", s));

    let mut numerator = mantissa
        .checked_mul(1024_i128.checked_pow(binary_power).ok_or_else(overflow)?)
        .ok_or_else(overflow)?;
    let mut denominator: i128 = 1;
    if decimal_power >= 0 {
        numerator = numerator
            .checked_mul(10_i128.checked_pow(decimal_power as u32).ok_or_else(overflow)?)
            .ok_or_else(overflow)?;
    } else {
        denominator = 10_i128
            .checked_pow(decimal_power.unsigned_abs())
            .ok_or_else(overflow)?;
    }

    let mut value = numerator / denominator;
    if numerator % denominator != 0 {
        value += 1;
    }
    if negative {
        value = -value;
    }

    i64::try_from(value).map_err(|_| overflow())
}

/// Returns (binary power, decimal exponent) for a suffix
fn parse_suffix(suffix: &str) -> Option<(u32, i32)> {
    if suffix.is_empty() {
        return Some((0, 0));
    }
    if let Some((_, power)) = BINARY_SUFFIXES.iter().find(|(s, _)| *s == suffix) {
        return Some((*power, 0));
    }
    if let Some((_, exp)) = DECIMAL_SUFFIXES.iter().find(|(s, _)| *s == suffix) {
        return Some((0, *exp));
    }
    // Scientific notation: "e3", "E-2"
    let rest = suffix
        .strip_prefix('e')
        .or_else(|| suffix.strip_prefix('E'))?;
    let exp: i32 = rest.parse().ok()?;
    if exp.unsigned_abs() > 38 {
        return None;
    }
    Some((0, exp))
}

/// Parse an API quantity into bytes
pub fn quantity_bytes(quantity: &Quantity) -> Result<i64> {
    parse_quantity(&quantity.0)
}

/// Render bytes in canonical binary-SI form ("10Gi", "1536Mi", "1500")
pub fn format_binary_si(bytes: i64) -> String {
    if bytes == 0 {
        return "0".to_string();
    }

    let mut value = bytes;
    let mut power = 0;
    while power < BINARY_SUFFIXES.len() && value % 1024 == 0 {
        value /= 1024;
        power += 1;
    }

    if power == 0 {
        bytes.to_string()
    } else {
        format!("{}{}", value, BINARY_SUFFIXES[power - 1].0)
    }
}

/// Build an API quantity from bytes
pub fn bytes_to_quantity(bytes: i64) -> Quantity {
    Quantity(format_binary_si(bytes))
}

/// Reported sizes may be rounded by the block layer, so they are only ever
/// compared within a tolerance: `|left - right| < delta`.
pub fn sizes_equal_within_delta(left: i64, right: i64, delta: i64) -> bool {
    (left as i128 - right as i128).abs() < delta as i128
}
