//! Fixed-point conversions between on-chain integer amounts and decimals.

/// Allowance granted by approval transactions.
pub const MAX_ALLOWANCE: u128 = u128::MAX;

/// Parse a user-entered decimal string into an integer amount scaled by
/// `10^decimals`.
///
/// Only plain decimal notation is accepted: optional surrounding whitespace,
/// digits with at most one `.`, and no more fractional digits than
/// `decimals`. Returns `None` for anything else or on overflow.
pub fn parse_units(text: &str, decimals: u32) -> Option<u128> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    let (whole, fraction) = match text.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (text, ""),
    };
    if whole.is_empty() && fraction.is_empty() {
        return None;
    }
    if !whole.bytes().all(|b| b.is_ascii_digit()) || !fraction.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }
    if fraction.len() > decimals as usize {
        return None;
    }

    let scale = 10u128.checked_pow(decimals)?;
    let whole_value = if whole.is_empty() {
        0
    } else {
        whole.parse::<u128>().ok()?
    };
    let mut fraction_value = 0u128;
    for digit in fraction.bytes() {
        fraction_value = fraction_value * 10 + u128::from(digit - b'0');
    }
    let padding = 10u128.checked_pow(decimals - fraction.len() as u32)?;

    whole_value
        .checked_mul(scale)?
        .checked_add(fraction_value.checked_mul(padding)?)
}

/// Convert an integer on-chain amount into a floating point display value.
pub fn format_units(raw: u128, decimals: u32) -> f64 {
    raw as f64 / 10f64.powi(decimals as i32)
}
