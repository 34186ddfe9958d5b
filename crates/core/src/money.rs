//! Fixed-precision monetary amounts.

use core::str::FromStr;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// A strictly positive amount of money with at most two fractional digits.
///
/// Bounded so that it always fits a `NUMERIC(20, 2)` column. The stored value is
/// rescaled to exactly two fractional digits, so `100` displays as `100.00`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    /// Fractional digits kept for every amount and balance.
    pub const SCALE: u32 = 2;

    /// Exclusive upper bound (18 integer digits).
    pub fn limit() -> Decimal {
        Decimal::from(1_000_000_000_000_000_000i64)
    }

    pub fn new(value: Decimal) -> DomainResult<Self> {
        if value <= Decimal::ZERO {
            return Err(DomainError::validation("amount must be greater than zero"));
        }
        if value.normalize().scale() > Self::SCALE {
            return Err(DomainError::validation(format!(
                "amount must have at most {} decimal places",
                Self::SCALE
            )));
        }
        if value >= Self::limit() {
            return Err(DomainError::validation("amount is too large"));
        }

        let mut value = value;
        value.rescale(Self::SCALE);
        Ok(Self(value))
    }

    pub fn value(self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = DomainError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(value: Amount) -> Self {
        value.0
    }
}

impl FromStr for Amount {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = Decimal::from_str(s.trim())
            .map_err(|e| DomainError::validation(format!("amount is not a number: {e}")))?;
        Self::new(value)
    }
}

impl core::fmt::Display for Amount {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    #[test]
    fn rejects_zero_and_negative() {
        for v in [dec!(0), dec!(0.00), dec!(-10), dec!(-0.01)] {
            let err = Amount::new(v).unwrap_err();
            assert_eq!(err, DomainError::validation("amount must be greater than zero"));
        }
    }

    #[test]
    fn rejects_sub_cent_precision() {
        assert!(Amount::new(dec!(1.005)).is_err());
        // Trailing zeros are not extra precision.
        assert_eq!(Amount::new(dec!(1.500)).unwrap().value(), dec!(1.50));
    }

    #[test]
    fn rejects_values_that_do_not_fit_numeric_20_2() {
        assert!(Amount::new(Amount::limit()).is_err());
        assert!(Amount::new(dec!(999999999999999999.99)).is_ok());
    }

    #[test]
    fn normalizes_to_two_fraction_digits() {
        let amount = Amount::new(dec!(100)).unwrap();
        assert_eq!(amount.to_string(), "100.00");
        assert_eq!("9999999999".parse::<Amount>().unwrap().to_string(), "9999999999.00");
    }

    #[test]
    fn deserializes_numbers_and_strings_with_validation() {
        let a: Amount = serde_json::from_str("100.5").unwrap();
        assert_eq!(a.value(), dec!(100.50));
        let b: Amount = serde_json::from_str("\"42\"").unwrap();
        assert_eq!(b.value(), dec!(42));
        assert!(serde_json::from_str::<Amount>("-10").is_err());
        assert!(serde_json::from_str::<Amount>("\"abc\"").is_err());
    }

    proptest! {
        #[test]
        fn any_positive_cent_value_is_accepted(cents in 1i64..1_000_000_000_000i64) {
            let value = Decimal::new(cents, 2);
            let amount = Amount::new(value).unwrap();
            prop_assert_eq!(amount.value(), value);
            prop_assert_eq!(amount.value().scale(), Amount::SCALE);
        }
    }
}
