//! Fixed-point decimal scaling for token amounts
//!
//! Token contracts report a `decimals` value; user input is a decimal string
//! like `"1.5"` which must be scaled to integer base units without going
//! through floating point.

use thiserror::Error;

/// Errors from decimal scaling
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnitsError {
    #[error("empty amount")]
    Empty,

    #[error("invalid amount \"{0}\"")]
    InvalidNumber(String),

    #[error("amount \"{value}\" has more than {decimals} fractional digits")]
    TooManyDecimals { value: String, decimals: u8 },

    #[error("amount \"{0}\" overflows 128 bits")]
    Overflow(String),
}

/// Parse a decimal string into integer base units.
///
/// `parse_units("1.5", 18)` yields `1_500_000_000_000_000_000`. Rejects empty
/// input, signs, non-digit characters, more fractional digits than `decimals`
/// allows, and values that overflow `u128`.
pub fn parse_units(value: &str, decimals: u8) -> Result<u128, UnitsError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(UnitsError::Empty);
    }

    let (int_part, frac_part) = match trimmed.split_once('.') {
        Some((i, f)) => (i, f),
        None => (trimmed, ""),
    };

    if int_part.is_empty() && frac_part.is_empty() {
        return Err(UnitsError::InvalidNumber(value.to_string()));
    }
    let all_digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    if !all_digits(int_part) || !all_digits(frac_part) {
        return Err(UnitsError::InvalidNumber(value.to_string()));
    }
    if frac_part.len() > decimals as usize {
        return Err(UnitsError::TooManyDecimals {
            value: value.to_string(),
            decimals,
        });
    }

    let overflow = || UnitsError::Overflow(value.to_string());
    let scale = 10u128
        .checked_pow(decimals as u32)
        .ok_or_else(overflow)?;

    let int_units: u128 = if int_part.is_empty() {
        0
    } else {
        int_part.parse().map_err(|_| overflow())?
    };

    // Right-pad the fraction to `decimals` digits, e.g. "5" @ 18 -> 5 * 10^17.
    let frac_units: u128 = if frac_part.is_empty() {
        0
    } else {
        let parsed: u128 = frac_part.parse().map_err(|_| overflow())?;
        let pad = decimals as u32 - frac_part.len() as u32;
        parsed
            .checked_mul(10u128.pow(pad))
            .ok_or_else(overflow)?
    };

    int_units
        .checked_mul(scale)
        .and_then(|v| v.checked_add(frac_units))
        .ok_or_else(overflow)
}

/// Format integer base units back into a decimal string.
///
/// Trailing fractional zeros are trimmed; whole values render without a dot.
pub fn format_units(units: u128, decimals: u8) -> String {
    if decimals == 0 {
        return units.to_string();
    }
    let scale = 10u128.pow(decimals as u32);
    let whole = units / scale;
    let frac = units % scale;
    if frac == 0 {
        return whole.to_string();
    }
    let frac_str = format!("{frac:0width$}", width = decimals as usize);
    format!("{}.{}", whole, frac_str.trim_end_matches('0'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_whole_and_fractional_values() {
        assert_eq!(parse_units("1.5", 18).unwrap(), 1_500_000_000_000_000_000);
        assert_eq!(parse_units("2", 6), Ok(2_000_000));
        assert_eq!(parse_units("0.000001", 6), Ok(1));
        assert_eq!(parse_units(".5", 1), Ok(5));
        assert_eq!(parse_units("7", 0), Ok(7));
    }

    #[test]
    fn zero_parses_to_zero() {
        assert_eq!(parse_units("0", 18), Ok(0));
        assert_eq!(parse_units("0.0", 18), Ok(0));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_units("", 18), Err(UnitsError::Empty));
        assert!(matches!(parse_units("abc", 18), Err(UnitsError::InvalidNumber(_))));
        assert!(matches!(parse_units("-1", 18), Err(UnitsError::InvalidNumber(_))));
        assert!(matches!(parse_units("1.2.3", 18), Err(UnitsError::InvalidNumber(_))));
        assert!(matches!(parse_units(".", 18), Err(UnitsError::InvalidNumber(_))));
    }

    #[test]
    fn rejects_excess_precision() {
        assert!(matches!(
            parse_units("1.0000001", 6),
            Err(UnitsError::TooManyDecimals { .. })
        ));
    }

    #[test]
    fn rejects_overflow() {
        // u128::MAX is ~3.4e38; 1e39 must overflow at 18 decimals.
        let huge = "1".to_string() + &"0".repeat(21);
        assert!(matches!(parse_units(&huge, 18), Err(UnitsError::Overflow(_))));
    }

    #[test]
    fn formats_round_trip() {
        assert_eq!(format_units(1_500_000_000_000_000_000, 18), "1.5");
        assert_eq!(format_units(2_000_000, 6), "2");
        assert_eq!(format_units(1, 6), "0.000001");
        assert_eq!(format_units(42, 0), "42");
    }
}
