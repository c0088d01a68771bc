//! Magnitude arithmetic over little-endian `u32` digit vectors.
//!
//! Only what boxing, printing and parsing of integer literals needs; the
//! general arithmetic library lives elsewhere.

use std::cmp::Ordering;

pub const DIGIT_BITS: u32 = 32;

/// Length of `digits` without leading (most significant) zero digits.
pub fn normalize_len(digits: &[u32]) -> usize {
    let mut idx = digits.len();
    while idx > 0 {
        if digits[idx - 1] != 0 {
            break;
        }
        idx -= 1;
    }
    idx
}

pub fn cmp_mag(a: &[u32], b: &[u32]) -> Ordering {
    let a = &a[..normalize_len(a)];
    let b = &b[..normalize_len(b)];
    if a.len() != b.len() {
        return a.len().cmp(&b.len());
    }
    for i in (0..a.len()).rev() {
        if a[i] != b[i] {
            return a[i].cmp(&b[i]);
        }
    }
    Ordering::Equal
}

/// `digits = digits * factor + addend`, growing by one digit if needed.
pub fn mul_add_small(digits: &mut Vec<u32>, factor: u32, addend: u32) {
    let mut carry = addend as u64;
    for digit in digits.iter_mut() {
        let acc = (*digit as u64) * (factor as u64) + carry;
        *digit = acc as u32;
        carry = acc >> DIGIT_BITS;
    }
    if carry != 0 {
        digits.push(carry as u32);
    }
}

/// Divides in place and returns the remainder.
pub fn div_rem_small(digits: &mut [u32], divisor: u32) -> u32 {
    debug_assert!(divisor != 0);
    let mut rem = 0u64;
    for digit in digits.iter_mut().rev() {
        let acc = (rem << DIGIT_BITS) | (*digit as u64);
        *digit = (acc / divisor as u64) as u32;
        rem = acc % divisor as u64;
    }
    rem as u32
}

pub fn from_u64(value: u64) -> Vec<u32> {
    let mut digits = vec![value as u32, (value >> DIGIT_BITS) as u32];
    digits.truncate(normalize_len(&digits));
    digits
}

/// Sign and magnitude of an `i64`.
pub fn from_i64(value: i64) -> (bool, Vec<u32>) {
    (value < 0, from_u64(value.unsigned_abs()))
}

/// The value as `i64`, if it fits.
pub fn to_i64(negative: bool, digits: &[u32]) -> Option<i64> {
    let len = normalize_len(digits);
    if len > 2 {
        return None;
    }
    let mut mag = 0u64;
    for i in (0..len).rev() {
        mag = (mag << DIGIT_BITS) | digits[i] as u64;
    }
    if negative {
        if mag <= i64::MAX as u64 + 1 {
            Some((mag as i64).wrapping_neg())
        } else {
            None
        }
    } else {
        i64::try_from(mag).ok()
    }
}

/// Parses an optionally signed decimal or `0x` prefixed hexadecimal
/// literal. Returns `None` on any malformed input.
pub fn parse(text: &str) -> Option<(bool, Vec<u32>)> {
    let (negative, body) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let (radix, body) = match body
        .strip_prefix("0x")
        .or_else(|| body.strip_prefix("0X"))
    {
        Some(rest) => (16, rest),
        None => (10, body),
    };
    if body.is_empty() {
        return None;
    }
    let mut digits = Vec::new();
    for c in body.chars() {
        let value = c.to_digit(radix)?;
        mul_add_small(&mut digits, radix, value);
    }
    digits.truncate(normalize_len(&digits));
    let negative = negative && !digits.is_empty();
    Some((negative, digits))
}

/// Largest power of ten below 2^32, used to peel nine decimal digits per
/// division.
const DEC_CHUNK: u32 = 1_000_000_000;
const DEC_CHUNK_DIGITS: usize = 9;

pub fn to_decimal(negative: bool, digits: &[u32]) -> String {
    let mut mag = digits[..normalize_len(digits)].to_vec();
    if mag.is_empty() {
        return "0".to_string();
    }
    let mut chunks = Vec::new();
    while !mag.is_empty() {
        chunks.push(div_rem_small(&mut mag, DEC_CHUNK));
        mag.truncate(normalize_len(&mag));
    }
    let mut out = String::new();
    if negative {
        out.push('-');
    }
    let mut chunks = chunks.into_iter().rev();
    if let Some(first) = chunks.next() {
        out.push_str(&first.to_string());
    }
    for chunk in chunks {
        out.push_str(&format!("{chunk:0width$}", width = DEC_CHUNK_DIGITS));
    }
    out
}

pub fn to_hex(negative: bool, digits: &[u32]) -> String {
    let len = normalize_len(digits);
    if len == 0 {
        return "0x0".to_string();
    }
    let mut out = String::new();
    if negative {
        out.push('-');
    }
    out.push_str("0x");
    out.push_str(&format!("{:x}", digits[len - 1]));
    for digit in digits[..len - 1].iter().rev() {
        out.push_str(&format!("{digit:08x}"));
    }
    out
}
