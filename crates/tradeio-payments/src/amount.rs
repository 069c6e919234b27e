// ============================================================================
// TRADEIO-PAYMENTS - Amounts
// ============================================================================
// Stellar amounts are decimal strings with up to 7 fractional digits.
// On the wire they are int64 stroops (1 unit = 10,000,000 stroops).
// ============================================================================

use crate::error::PaymentError;
use crate::Result;

pub const STROOPS_PER_UNIT: i64 = 10_000_000;
const DECIMALS: usize = 7;

/// Parse a decimal amount string into stroops, exactly.
///
/// ```
/// use tradeio_payments::amount::parse_amount;
///
/// assert_eq!(parse_amount("1").unwrap(), 10_000_000);
/// assert_eq!(parse_amount("0.0000001").unwrap(), 1);
/// assert!(parse_amount("1.00000001").is_err());
/// ```
pub fn parse_amount(amount: &str) -> Result<i64> {
    let invalid = || PaymentError::InvalidTransaction(format!("Invalid amount: {:?}", amount));

    let trimmed = amount.trim();
    if trimmed.is_empty() || trimmed.starts_with('-') || trimmed.starts_with('+') {
        return Err(invalid());
    }

    let (whole, fraction) = match trimmed.split_once('.') {
        Some((w, f)) => (w, f),
        None => (trimmed, ""),
    };

    if whole.is_empty() && fraction.is_empty() {
        return Err(invalid());
    }
    if fraction.len() > DECIMALS {
        return Err(invalid());
    }
    if !whole.bytes().all(|b| b.is_ascii_digit()) || !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }

    let whole_value: i64 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| invalid())?
    };

    let mut fraction_value: i64 = 0;
    for (i, digit) in fraction.bytes().enumerate() {
        fraction_value += i64::from(digit - b'0') * 10i64.pow((DECIMALS - 1 - i) as u32);
    }

    whole_value
        .checked_mul(STROOPS_PER_UNIT)
        .and_then(|w| w.checked_add(fraction_value))
        .ok_or_else(invalid)
}

/// Format stroops as a 7-decimal amount string, the way Horizon reports it.
pub fn format_amount(stroops: i64) -> String {
    let sign = if stroops < 0 { "-" } else { "" };
    let abs = stroops.unsigned_abs();
    let unit = STROOPS_PER_UNIT as u64;
    format!("{}{}.{:07}", sign, abs / unit, abs % unit)
}
