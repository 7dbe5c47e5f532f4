//! Type-safe price representation using decimal arithmetic.
//!
//! Money is never represented as a float. Amounts are `rust_decimal::Decimal`
//! in the currency's standard unit (dollars, not cents); conversion to minor
//! units happens only at the payment gateway boundary.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A price with currency information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Price {
    /// Amount in the currency's standard unit (e.g., dollars, not cents).
    pub amount: Decimal,
    /// ISO 4217 currency code.
    pub currency_code: CurrencyCode,
}

impl Price {
    /// Create a new price.
    #[must_use]
    pub const fn new(amount: Decimal, currency_code: CurrencyCode) -> Self {
        Self {
            amount,
            currency_code,
        }
    }

    /// Create a USD price.
    #[must_use]
    pub const fn usd(amount: Decimal) -> Self {
        Self::new(amount, CurrencyCode::USD)
    }

    /// Amount in the currency's minor unit (cents for USD).
    ///
    /// Returns `None` if the amount does not fit in an `i64` or has more
    /// precision than the minor unit can carry.
    #[must_use]
    pub fn minor_units(&self) -> Option<i64> {
        use rust_decimal::prelude::ToPrimitive;

        let scaled = self
            .amount
            .checked_mul(Decimal::from(self.currency_code.minor_unit_scale()))?;
        if scaled.fract() != Decimal::ZERO {
            return None;
        }
        scaled.to_i64()
    }
}

impl std::fmt::Display for Price {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{:.2}", self.currency_code.symbol(), self.amount)
    }
}

/// ISO 4217 currency codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CurrencyCode {
    #[default]
    USD,
    EUR,
    GBP,
    CAD,
    AUD,
}

impl CurrencyCode {
    /// Display symbol for the currency.
    #[must_use]
    pub const fn symbol(&self) -> &'static str {
        match self {
            Self::USD | Self::CAD | Self::AUD => "$",
            Self::EUR => "\u{20ac}",
            Self::GBP => "\u{a3}",
        }
    }

    /// ISO 4217 code string.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::USD => "USD",
            Self::EUR => "EUR",
            Self::GBP => "GBP",
            Self::CAD => "CAD",
            Self::AUD => "AUD",
        }
    }

    /// Minor units per standard unit (all supported currencies use cents).
    #[must_use]
    pub const fn minor_unit_scale(&self) -> i64 {
        100
    }
}

impl std::str::FromStr for CurrencyCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "USD" => Ok(Self::USD),
            "EUR" => Ok(Self::EUR),
            "GBP" => Ok(Self::GBP),
            "CAD" => Ok(Self::CAD),
            "AUD" => Ok(Self::AUD),
            _ => Err(format!("unsupported currency code: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_display_formats_two_decimals() {
        let price = Price::usd(dec!(19.9));
        assert_eq!(price.to_string(), "$19.90");
    }

    #[test]
    fn test_minor_units() {
        assert_eq!(Price::usd(dec!(35.00)).minor_units(), Some(3500));
        assert_eq!(Price::usd(dec!(0.01)).minor_units(), Some(1));
    }

    #[test]
    fn test_minor_units_rejects_sub_cent_precision() {
        assert_eq!(Price::usd(dec!(1.005)).minor_units(), None);
    }

    #[test]
    fn test_serde_amount_as_string() {
        // serde-with-str keeps decimal amounts exact on the wire
        let price = Price::usd(dec!(12.50));
        let json = serde_json::to_value(&price).unwrap();
        assert_eq!(json["amount"], "12.50");
    }
}
