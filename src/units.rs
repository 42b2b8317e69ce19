use thiserror::Error;

use crate::ledger::Amount;

/// Minimal units per whole currency unit (1 unit = 1e8 minimal units).
pub const UNIT: Amount = 100_000_000;
pub const DECIMALS: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnitsError {
    #[error("empty amount")]
    Empty,
    #[error("invalid amount {0:?}")]
    Invalid(String),
    #[error("amount {0:?} has more than 8 decimals")]
    TooPrecise(String),
    #[error("amount {0:?} does not fit in minimal units")]
    Overflow(String),
}

/// Parse a decimal string such as `"0.1"` or `"12"` into minimal units.
pub fn parse_units(input: &str) -> Result<Amount, UnitsError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(UnitsError::Empty);
    }
    let (whole, frac) = match s.split_once('.') {
        Some((w, f)) => (w, f),
        None => (s, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return Err(UnitsError::Invalid(s.to_string()));
    }
    let digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
    if !digits(whole) || !digits(frac) {
        return Err(UnitsError::Invalid(s.to_string()));
    }
    if frac.len() > DECIMALS {
        return Err(UnitsError::TooPrecise(s.to_string()));
    }

    let overflow = || UnitsError::Overflow(s.to_string());
    let whole_units: Amount = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| overflow())?
    };
    let mut frac_units: Amount = 0;
    if !frac.is_empty() {
        let padded = format!("{frac:0<width$}", width = DECIMALS);
        frac_units = padded.parse().map_err(|_| overflow())?;
    }
    whole_units
        .checked_mul(UNIT)
        .and_then(|w| w.checked_add(frac_units))
        .ok_or_else(overflow)
}

/// Render minimal units as a decimal string with trailing zeros trimmed.
pub fn format_units(amount: Amount) -> String {
    let whole = amount / UNIT;
    let frac = amount % UNIT;
    if frac == 0 {
        return whole.to_string();
    }
    let frac = format!("{frac:0>width$}", width = DECIMALS);
    format!("{whole}.{}", frac.trim_end_matches('0'))
}
