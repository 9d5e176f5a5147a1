//! Conversions between raw on-chain integers and human decimal strings.

use alloy::primitives::U256;
use alloy::primitives::utils::{ParseUnits, format_units, parse_units};

use crate::AppError;

/// Largest `decimals` value a token created through the factory may use.
pub const MAX_DECIMALS: u8 = 18;

/// Format a raw token amount with `decimals` places, trimming trailing zeros.
///
/// `format_amount(1_500_000, 6) == "1.5"`, `format_amount(100, 0) == "100"`.
pub fn format_amount(raw: U256, decimals: u8) -> Result<String, AppError> {
    let formatted =
        format_units(raw, decimals).map_err(|e| AppError::Decode(e.to_string()))?;
    if !formatted.contains('.') {
        return Ok(formatted);
    }
    Ok(formatted
        .trim_end_matches('0')
        .trim_end_matches('.')
        .to_string())
}

/// Parse a user-entered decimal amount into its raw integer at `decimals`.
///
/// Rejects negative, non-numeric, and over-precise input. Zero is accepted
/// here; callers that need a positive amount use [`parse_positive_amount`].
pub fn parse_amount(input: &str, decimals: u8) -> Result<U256, AppError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(AppError::validation("amount is empty"));
    }
    if input.starts_with('-') {
        return Err(AppError::validation(format!("amount {input} is negative")));
    }

    let (whole, fraction) = input.split_once('.').unwrap_or((input, ""));
    let digits_only = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    if (whole.is_empty() && fraction.is_empty()) || !digits_only(whole) || !digits_only(fraction)
    {
        return Err(AppError::validation(format!("amount {input} is not a number")));
    }
    if fraction.len() > decimals as usize {
        return Err(AppError::validation(format!(
            "amount {input} has more than {decimals} decimal places"
        )));
    }

    let whole = if whole.is_empty() { "0" } else { whole };
    let normalized = if fraction.is_empty() {
        whole.to_string()
    } else {
        format!("{whole}.{fraction}")
    };

    match parse_units(&normalized, decimals).map_err(|e| AppError::validation(e.to_string()))? {
        ParseUnits::U256(raw) => Ok(raw),
        ParseUnits::I256(_) => Err(AppError::validation(format!("amount {input} is negative"))),
    }
}

/// [`parse_amount`], additionally rejecting zero.
pub fn parse_positive_amount(input: &str, decimals: u8) -> Result<U256, AppError> {
    let raw = parse_amount(input, decimals)?;
    if raw.is_zero() {
        return Err(AppError::validation("amount must be greater than zero"));
    }
    Ok(raw)
}
