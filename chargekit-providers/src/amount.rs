//! Fixed-point money arithmetic.
//!
//! Amounts are `Decimal` internally and serialize as strings, so `"29.99"`
//! survives a round trip without float drift. **Never use f64 for money.**

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::ProviderError;

/// A monetary amount with fixed-point precision.
///
/// The currency is carried separately (on the charge or intent), so `Amount`
/// is a pure magnitude. All arithmetic is checked; the discount helpers
/// floor at zero instead of going negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount(Decimal);

impl Amount {
    /// Zero.
    pub const ZERO: Amount = Amount(Decimal::ZERO);

    /// Create from an integer count of minor units (cents).
    ///
    /// ```
    /// use chargekit_providers::Amount;
    /// assert_eq!(Amount::from_cents(2999).to_string(), "29.99");
    /// ```
    pub fn from_cents(cents: i64) -> Self {
        Self(Decimal::new(cents, 2))
    }

    /// Create from a whole number of major units.
    pub fn from_major(units: i64) -> Self {
        Self(Decimal::from(units))
    }

    /// Parse from a decimal string such as `"29.99"`.
    pub fn parse(s: &str) -> Result<Self, ProviderError> {
        Decimal::from_str(s)
            .map(Self)
            .map_err(|e| ProviderError::invalid_data("amount", e.to_string()))
    }

    /// The amount in minor units, rounded to the nearest cent.
    ///
    /// Saturates at `i64::MAX` for values beyond the representable range.
    pub fn as_cents(&self) -> i64 {
        let cents = (self.0 * Decimal::from(100)).round();
        cents.try_into().unwrap_or(i64::MAX)
    }

    /// The raw decimal value.
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    /// Checked addition; `None` on overflow.
    pub fn checked_add(&self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    /// Checked subtraction; `None` on overflow.
    pub fn checked_sub(&self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    /// Subtraction floored at zero. Discount math never produces a
    /// negative charge.
    ///
    /// ```
    /// use chargekit_providers::Amount;
    /// let price = Amount::from_cents(500);
    /// let discount = Amount::from_cents(800);
    /// assert_eq!(price.sub_floor_zero(discount), Amount::ZERO);
    /// ```
    pub fn sub_floor_zero(&self, other: Amount) -> Amount {
        match self.0.checked_sub(other.0) {
            Some(d) if d > Decimal::ZERO => Amount(d),
            _ => Amount::ZERO,
        }
    }

    /// A percentage of this amount, rounded to cents.
    ///
    /// `rate` is expressed in percent (`Decimal::from(25)` = 25%).
    pub fn percentage(&self, rate: Decimal) -> Amount {
        let fraction = rate.checked_div(Decimal::from(100)).unwrap_or(Decimal::ZERO);
        self.0
            .checked_mul(fraction)
            .map(|v| Amount(v.round_dp(2)))
            .unwrap_or(Amount::ZERO)
    }

    /// The smaller of two amounts.
    pub fn min(self, other: Amount) -> Amount {
        if self.0 <= other.0 {
            self
        } else {
            other
        }
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Amount {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<Decimal> for Amount {
    fn from(value: Decimal) -> Self {
        Self(value)
    }
}
