//! Monetary types for the Strongbox ledger.
//!
//! Every amount that enters the ledger, and every balance it computes, is a
//! `Decimal` held at exactly [`MONEY_SCALE`] fractional digits, rounded
//! half-to-even.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{LedgerError, Result};

/// Number of fractional digits carried by every amount and balance.
pub const MONEY_SCALE: u32 = 4;

/// Round to [`MONEY_SCALE`] digits (half-to-even) and pad to exactly that scale.
pub fn normalize(value: Decimal) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointNearestEven);
    rounded.rescale(MONEY_SCALE);
    rounded
}

/// Largest magnitude an amount or balance may have: 15 integer digits and
/// [`MONEY_SCALE`] fractional digits, the range of a `NUMERIC(19, 4)` column.
pub fn max_amount() -> Decimal {
    Decimal::from_i128_with_scale(9_999_999_999_999_999_999, MONEY_SCALE)
}

/// Reject values outside [`max_amount`], then [`normalize`].
///
/// `field` names the offending input in the returned error.
pub fn bounded(value: Decimal, field: &str) -> Result<Decimal> {
    if value.abs() > max_amount() {
        return Err(LedgerError::invalid_field(
            field,
            format!("{} exceeds the maximum magnitude {}", value, max_amount()),
        ));
    }
    Ok(normalize(value))
}

/// `a + b`, normalized, failing instead of overflowing or leaving the bounded range.
pub fn checked_add(a: Decimal, b: Decimal, field: &str) -> Result<Decimal> {
    let sum = a.checked_add(b).ok_or_else(|| {
        LedgerError::invalid_field(field, format!("{} + {} overflows", a, b))
    })?;
    bounded(sum, field)
}

/// `a - b`, normalized, failing instead of overflowing or leaving the bounded range.
pub fn checked_sub(a: Decimal, b: Decimal, field: &str) -> Result<Decimal> {
    let difference = a.checked_sub(b).ok_or_else(|| {
        LedgerError::invalid_field(field, format!("{} - {} overflows", a, b))
    })?;
    bounded(difference, field)
}

/// Parse a caller-supplied decimal string into a normalized amount.
pub fn parse_amount(value: &str) -> Result<Decimal> {
    let parsed = Decimal::from_str(value.trim()).map_err(|e| LedgerError::InvalidRequest {
        message: format!("invalid amount '{}': {}", value, e),
        field: Some("amount".to_string()),
    })?;
    bounded(parsed, "amount")
}

/// Active ISO 4217 alphabetic codes, sorted for binary search.
const ISO_4217_CODES: &[&str] = &[
    "AED", "AFN", "ALL", "AMD", "ANG", "AOA", "ARS", "AUD", "AWG", "AZN",
    "BAM", "BBD", "BDT", "BGN", "BHD", "BIF", "BMD", "BND", "BOB", "BOV",
    "BRL", "BSD", "BTN", "BWP", "BYN", "BZD", "CAD", "CDF", "CHE", "CHF",
    "CHW", "CLF", "CLP", "CNY", "COP", "COU", "CRC", "CUC", "CUP", "CVE",
    "CZK", "DJF", "DKK", "DOP", "DZD", "EGP", "ERN", "ETB", "EUR", "FJD",
    "FKP", "GBP", "GEL", "GHS", "GIP", "GMD", "GNF", "GTQ", "GYD", "HKD",
    "HNL", "HTG", "HUF", "IDR", "ILS", "INR", "IQD", "IRR", "ISK", "JMD",
    "JOD", "JPY", "KES", "KGS", "KHR", "KMF", "KPW", "KRW", "KWD", "KYD",
    "KZT", "LAK", "LBP", "LKR", "LRD", "LSL", "LYD", "MAD", "MDL", "MGA",
    "MKD", "MMK", "MNT", "MOP", "MRU", "MUR", "MVR", "MWK", "MXN", "MXV",
    "MYR", "MZN", "NAD", "NGN", "NIO", "NOK", "NPR", "NZD", "OMR", "PAB",
    "PEN", "PGK", "PHP", "PKR", "PLN", "PYG", "QAR", "RON", "RSD", "RUB",
    "RWF", "SAR", "SBD", "SCR", "SDG", "SEK", "SGD", "SHP", "SLE", "SLL",
    "SOS", "SRD", "SSP", "STN", "SVC", "SYP", "SZL", "THB", "TJS", "TMT",
    "TND", "TOP", "TRY", "TTD", "TWD", "TZS", "UAH", "UGX", "USD", "USN",
    "UYI", "UYU", "UYW", "UZS", "VED", "VES", "VND", "VUV", "WST", "XAF",
    "XAG", "XAU", "XBA", "XBB", "XBC", "XBD", "XCD", "XDR", "XOF", "XPD",
    "XPF", "XPT", "XSU", "XTS", "XUA", "XXX", "YER", "ZAR", "ZMW", "ZWG",
    "ZWL",
];

/// Check a code is three uppercase ASCII letters.
fn is_well_formed(code: &str) -> bool {
    code.len() == 3 && code.bytes().all(|b| b.is_ascii_uppercase())
}

/// Check a code is a well-formed, currently assigned ISO 4217 code.
pub fn is_iso_4217(code: &str) -> bool {
    is_well_formed(code) && ISO_4217_CODES.binary_search(&code).is_ok()
}

/// ISO 4217 currency code.
///
/// Only constructible through validation, so a `Currency` in hand is always
/// a real code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    /// Validate and wrap a currency code. Codes are case-sensitive.
    pub fn parse(code: &str) -> Result<Self> {
        if is_iso_4217(code) {
            Ok(Self(code.to_string()))
        } else {
            Err(LedgerError::InvalidCurrency(code.to_string()))
        }
    }

    /// Get the currency code.
    pub fn code(&self) -> &str {
        &self.0
    }

    /// Common currencies
    pub fn usd() -> Self {
        Self("USD".to_string())
    }

    pub fn eur() -> Self {
        Self("EUR".to_string())
    }

    pub fn gbp() -> Self {
        Self("GBP".to_string())
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Currency {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Currency {
    type Error = LedgerError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Currency> for String {
    fn from(currency: Currency) -> Self {
        currency.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_normalize_pads_to_scale() {
        let value = normalize(dec!(500));
        assert_eq!(value.scale(), MONEY_SCALE);
        assert_eq!(value.to_string(), "500.0000");
    }

    #[test]
    fn test_normalize_rounds_half_even() {
        assert_eq!(normalize(dec!(50.01234)), dec!(50.0123));
        assert_eq!(normalize(dec!(0.00005)), dec!(0.0000));
        assert_eq!(normalize(dec!(0.00015)), dec!(0.0002));
        assert_eq!(normalize(dec!(-2.00025)), dec!(-2.0002));
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("50.0123").unwrap().to_string(), "50.0123");
        assert_eq!(parse_amount(" 2 ").unwrap().to_string(), "2.0000");
        assert!(matches!(
            parse_amount("two dollars"),
            Err(LedgerError::InvalidRequest { .. })
        ));
    }

    #[test]
    fn test_bounded_range() {
        let max = max_amount();
        assert_eq!(max.to_string(), "999999999999999.9999");
        assert_eq!(bounded(max, "amount").unwrap(), max);
        assert_eq!(bounded(-max, "amount").unwrap(), -max);

        for value in [max + dec!(0.0001), Decimal::from_i128_with_scale(7 * 10i128.pow(24), 0), Decimal::MAX, Decimal::MIN] {
            assert!(matches!(
                bounded(value, "balance"),
                Err(LedgerError::InvalidRequest { field: Some(ref f), .. }) if f == "balance"
            ));
        }
    }

    #[test]
    fn test_checked_arithmetic_never_panics() {
        assert_eq!(checked_add(dec!(1.5), dec!(2), "delta").unwrap().to_string(), "3.5000");
        assert_eq!(checked_sub(dec!(1.5), dec!(2), "amount").unwrap(), dec!(-0.5));

        assert!(checked_add(Decimal::MAX, Decimal::MAX, "delta").is_err());
        assert!(checked_sub(Decimal::MIN, Decimal::MAX, "amount").is_err());
        assert!(checked_add(max_amount(), dec!(0.0001), "delta").is_err());
    }

    #[test]
    fn test_parse_amount_rejects_huge_values() {
        assert!(parse_amount("7000000000000000000000000").is_err());
        assert!(parse_amount("999999999999999.9999").is_ok());
    }

    #[test]
    fn test_code_table_is_sorted() {
        assert!(ISO_4217_CODES.windows(2).all(|w| w[0] < w[1]));
        assert!(ISO_4217_CODES.iter().all(|c| is_well_formed(c)));
    }

    #[test]
    fn test_currency_validation() {
        assert!(Currency::parse("EUR").is_ok());
        assert!(Currency::parse("GBP").is_ok());
        assert!(Currency::parse("JPY").is_ok());

        assert!(matches!(
            Currency::parse("usd"),
            Err(LedgerError::InvalidCurrency(code)) if code == "usd"
        ));
        assert!(Currency::parse("US").is_err());
        assert!(Currency::parse("USDT").is_err());
        assert!(Currency::parse("XYZ").is_err());
        assert!(Currency::parse("").is_err());
    }

    #[test]
    fn test_currency_serde_validates() {
        let eur: Currency = serde_json::from_str("\"EUR\"").unwrap();
        assert_eq!(eur, Currency::eur());
        assert!(serde_json::from_str::<Currency>("\"ABC\"").is_err());
    }

    proptest! {
        #[test]
        fn normalize_is_idempotent(units in -1_000_000_000i64..1_000_000_000, scale in 0u32..10) {
            let value = Decimal::new(units, scale);
            let once = normalize(value);
            prop_assert_eq!(once.scale(), MONEY_SCALE);
            prop_assert_eq!(normalize(once), once);
        }

        #[test]
        fn normalize_moves_at_most_half_a_unit(units in -1_000_000_000i64..1_000_000_000, scale in 0u32..10) {
            let value = Decimal::new(units, scale);
            let diff = (normalize(value) - value).abs();
            prop_assert!(diff <= Decimal::new(5, MONEY_SCALE + 1));
        }
    }
}
