use bigdecimal::BigDecimal;
use std::str::FromStr;

/// Fractional digits of the staking token (wei-style base units).
pub const TOKEN_DECIMALS: u32 = 18;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum UnitsError {
    #[error("empty amount")]
    Empty,
    #[error("invalid digit in amount '{0}'")]
    InvalidDigit(String),
    #[error("amount '{0}' has more than {1} fractional digits")]
    TooPrecise(String, u32),
}

/// Render an integer amount of base units as plain decimal digits (no exponent, no scale).
pub fn base_units_string(amount: &BigDecimal) -> String {
    let (int, _) = amount.with_scale(0).as_bigint_and_exponent();
    int.to_string()
}

/// Format an integer amount of base units as a display-unit decimal string.
///
/// Works on the decimal digit string, so values far beyond 2^53 keep every digit.
/// Trailing fractional zeros are trimmed and an all-zero fraction is omitted.
pub fn format_units(amount: &BigDecimal, decimals: u32) -> String {
    format_digits(&base_units_string(amount), decimals)
}

/// Same as [`format_units`] but for a digit string such as `"1500000000000000000"`.
pub fn format_digits(raw: &str, decimals: u32) -> String {
    let (negative, digits) = match raw.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, raw),
    };
    let digits = digits.trim_start_matches('0');
    if digits.is_empty() {
        return "0".to_string();
    }

    let decimals = decimals as usize;
    let padded = if digits.len() <= decimals {
        format!("{}{}", "0".repeat(decimals + 1 - digits.len()), digits)
    } else {
        digits.to_string()
    };

    let split = padded.len() - decimals;
    let (int_part, frac_part) = padded.split_at(split);
    let frac_part = frac_part.trim_end_matches('0');

    let sign = if negative { "-" } else { "" };
    if frac_part.is_empty() {
        format!("{sign}{int_part}")
    } else {
        format!("{sign}{int_part}.{frac_part}")
    }
}

/// Parse a display-unit decimal string back into base units without floating point.
pub fn parse_units(value: &str, decimals: u32) -> Result<BigDecimal, UnitsError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(UnitsError::Empty);
    }

    let (negative, unsigned) = match value.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, value),
    };
    let (int_part, frac_part) = unsigned.split_once('.').unwrap_or((unsigned, ""));

    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if (int_part.is_empty() && frac_part.is_empty()) || !all_digits(int_part) || !all_digits(frac_part)
    {
        return Err(UnitsError::InvalidDigit(value.to_string()));
    }
    if frac_part.len() > decimals as usize {
        return Err(UnitsError::TooPrecise(value.to_string(), decimals));
    }

    let digits = format!(
        "{}{}{}",
        if negative { "-" } else { "" },
        if int_part.is_empty() { "0" } else { int_part },
        format!("{:0<width$}", frac_part, width = decimals as usize)
    );
    BigDecimal::from_str(&digits).map_err(|_| UnitsError::InvalidDigit(value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bd(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    #[test]
    fn test_format_whole_and_fractional() {
        assert_eq!(format_units(&bd("1000000000000000000"), 18), "1");
        assert_eq!(format_units(&bd("1500000000000000000"), 18), "1.5");
        assert_eq!(format_units(&bd("1"), 18), "0.000000000000000001");
        assert_eq!(format_units(&bd("0"), 18), "0");
        assert_eq!(format_units(&bd("-2500000000000000000"), 18), "-2.5");
    }

    #[test]
    fn test_format_beyond_f64_precision() {
        // 2^53 + 1 tokens' worth of base units plus a 1-wei tail
        let raw = "9007199254740993000000000000000001";
        assert_eq!(
            format_units(&bd(raw), 18),
            "9007199254740993.000000000000000001"
        );
    }

    #[test]
    fn test_parse_reconstructs_base_units() {
        for raw in [
            "0",
            "1",
            "10",
            "999999999999999999",
            "1000000000000000000",
            "123456789012345678901234567890",
            "9007199254740993000000000000000001",
        ] {
            let formatted = format_units(&bd(raw), TOKEN_DECIMALS);
            let parsed = parse_units(&formatted, TOKEN_DECIMALS).unwrap();
            assert_eq!(base_units_string(&parsed), raw, "value {raw} via {formatted}");
        }
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(parse_units("", 18), Err(UnitsError::Empty));
        assert!(matches!(parse_units("1.2.3", 18), Err(UnitsError::InvalidDigit(_))));
        assert!(matches!(parse_units("abc", 18), Err(UnitsError::InvalidDigit(_))));
        assert!(matches!(parse_units("0.1234", 2), Err(UnitsError::TooPrecise(_, 2))));
    }

    #[test]
    fn test_format_digits_handles_leading_zeros() {
        assert_eq!(format_digits("000100", 2), "1");
        assert_eq!(format_digits("0000", 2), "0");
        assert_eq!(format_digits("5", 0), "5");
    }
}
