//! Decimal token amounts

use crate::errors::FeeGateError;

/// Parse a human amount like `"12.5"` into raw base units for a mint with
/// `decimals` decimals. Exact: no floating point, no rounding.
pub fn parse_ui_amount(input: &str, decimals: u8) -> Result<u64, FeeGateError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(FeeGateError::validation("amount is required"));
    }
    if s.starts_with('-') {
        return Err(FeeGateError::validation("amount must be greater than zero"));
    }
    let s = s.strip_prefix('+').unwrap_or(s);

    let (whole, frac) = match s.split_once('.') {
        Some((whole, frac)) => (whole, frac),
        None => (s, ""),
    };
    let all_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
    if (whole.is_empty() && frac.is_empty()) || !all_digits(whole) || !all_digits(frac) {
        return Err(FeeGateError::validation(format!("{input:?} is not a number")));
    }
    if frac.len() > usize::from(decimals) {
        return Err(FeeGateError::validation(format!(
            "amount has more than {decimals} decimal places"
        )));
    }

    let overflow = || FeeGateError::validation(format!("amount {input} is too large"));
    let scale = 10u64.checked_pow(u32::from(decimals)).ok_or_else(overflow)?;
    let whole: u64 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| overflow())?
    };
    let frac_raw: u64 = if frac.is_empty() {
        0
    } else {
        let padded = format!("{frac:0<width$}", width = usize::from(decimals));
        padded.parse().map_err(|_| overflow())?
    };

    let raw = whole
        .checked_mul(scale)
        .and_then(|w| w.checked_add(frac_raw))
        .ok_or_else(overflow)?;
    if raw == 0 {
        return Err(FeeGateError::validation("amount must be greater than zero"));
    }
    Ok(raw)
}

/// Raw base units for a whole-token supply, `None` on overflow
pub fn scale_supply(whole_tokens: u64, decimals: u8) -> Option<u64> {
    10u64
        .checked_pow(u32::from(decimals))
        .and_then(|scale| whole_tokens.checked_mul(scale))
}
