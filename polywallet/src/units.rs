//! Conversion between human decimal amounts and smallest-unit integers.

use alloy_primitives::U256;

use crate::error::WalletError;

/// Fractional digits shown in balance reports.
pub const DISPLAY_DECIMALS: u8 = 6;

/// Largest decimals value whose scale fits in a [`U256`].
pub const MAX_DECIMALS: u8 = 77;

fn scale(decimals: u8) -> Option<U256> {
    U256::from(10u8).checked_pow(U256::from(decimals))
}

/// Parse a positive decimal amount into smallest units.
///
/// Accepts plain digits with at least one digit and an optional single `.`;
/// signs, exponents and non-finite spellings are rejected, as is any
/// precision finer than `decimals`.
///
/// # Errors
///
/// Returns [`WalletError::InvalidInput`] if the amount is malformed, zero,
/// too precise or too large.
pub fn parse_amount(raw: &str, decimals: u8) -> Result<U256, WalletError> {
    let raw = raw.trim();
    let (whole, frac) = raw.split_once('.').unwrap_or((raw, ""));

    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if whole.len() + frac.len() == 0 || !all_digits(whole) || !all_digits(frac) {
        return Err(WalletError::invalid(format!("'{raw}' is not a decimal amount")));
    }
    if frac.len() > usize::from(decimals) {
        return Err(WalletError::invalid(format!(
            "'{raw}' has more than {decimals} decimal places"
        )));
    }

    let overflow = || WalletError::invalid(format!("'{raw}' is too large"));
    let parse = |s: &str| -> Result<U256, WalletError> {
        if s.is_empty() {
            Ok(U256::ZERO)
        } else {
            s.parse::<U256>().map_err(|_| overflow())
        }
    };

    // frac.len() <= decimals, so this never underflows
    let pad = decimals - u8::try_from(frac.len()).map_err(|_| overflow())?;
    let amount = parse(whole)?
        .checked_mul(scale(decimals).ok_or_else(overflow)?)
        .and_then(|w| {
            let f = parse(frac).ok()?.checked_mul(scale(pad)?)?;
            w.checked_add(f)
        })
        .ok_or_else(overflow)?;

    if amount.is_zero() {
        return Err(WalletError::invalid("amount must be greater than zero"));
    }
    Ok(amount)
}

/// Render a smallest-unit balance with six fractional digits and the symbol.
///
/// The sixth digit is rounded half up, e.g. `1.2345675` → `1.234568`.
#[must_use]
pub fn format_amount(raw: U256, decimals: u8, symbol: &str) -> String {
    let Some(unit) = scale(decimals) else {
        return format!("0.000000 {symbol}");
    };
    let mut whole = raw / unit;
    let frac = raw % unit;
    let micro_unit = U256::from(1_000_000u32);

    let mut micro = if decimals <= DISPLAY_DECIMALS {
        frac * scale(DISPLAY_DECIMALS - decimals).unwrap_or(U256::ZERO)
    } else {
        let divisor = scale(decimals - DISPLAY_DECIMALS).unwrap_or(U256::MAX);
        let mut micro = frac / divisor;
        if (frac % divisor) * U256::from(2u8) >= divisor {
            micro += U256::from(1u8);
        }
        micro
    };
    if micro >= micro_unit {
        whole += U256::from(1u8);
        micro -= micro_unit;
    }

    // below 10^6, so the low limb holds the whole value
    let micro = micro.as_limbs()[0];
    format!("{whole}.{micro:06} {symbol}")
}
