//! Fixed-point money in integer minor units, per currency.
//!
//! All settlement and merge arithmetic runs on `Money`. The only bridge to a
//! fractional representation is `rust_decimal`, used at the display boundary.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Closed set of supported currencies, in declared (report) order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Currency {
    #[serde(rename = "CNY")]
    Cny,
    #[serde(rename = "JPY")]
    Jpy,
}

impl Currency {
    /// Every currency, in the order results are concatenated.
    pub const ALL: [Currency; 2] = [Currency::Cny, Currency::Jpy];

    /// Number of decimal places in one major unit.
    ///
    /// JPY has no subdivision, so one minor unit is one yen.
    pub fn minor_exponent(&self) -> u32 {
        match self {
            Currency::Cny => 2,
            Currency::Jpy => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Cny => "CNY",
            Currency::Jpy => "JPY",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Currency {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CNY" => Ok(Currency::Cny),
            "JPY" => Ok(Currency::Jpy),
            other => Err(MoneyError::UnknownCurrency(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoneyError {
    #[error("unknown currency: {0}")]
    UnknownCurrency(String),
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
    #[error("amount out of range: {0}")]
    OutOfRange(String),
}

/// A signed amount counted in the currency's minor unit.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_minor(units: i64) -> Self {
        Money(units)
    }

    pub const fn minor(&self) -> i64 {
        self.0
    }

    /// Convert a user-facing decimal value, rounding half away from zero to
    /// the currency's minor unit.
    pub fn from_decimal(value: Decimal, currency: Currency) -> Result<Self, MoneyError> {
        let factor = Decimal::from(10_i64.pow(currency.minor_exponent()));
        let units = value
            .checked_mul(factor)
            .ok_or_else(|| MoneyError::OutOfRange(value.to_string()))?
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
        units
            .to_i64()
            .map(Money)
            .ok_or_else(|| MoneyError::OutOfRange(value.to_string()))
    }

    /// Parse a display-form amount such as `"12.30"`.
    pub fn parse(s: &str, currency: Currency) -> Result<Self, MoneyError> {
        let value =
            Decimal::from_str(s.trim()).map_err(|_| MoneyError::InvalidAmount(s.to_string()))?;
        Self::from_decimal(value, currency)
    }

    /// The exact decimal value in major units.
    pub fn to_decimal(&self, currency: Currency) -> Decimal {
        Decimal::new(self.0, currency.minor_exponent())
    }

    /// Display form with exactly the currency's number of decimal places.
    pub fn format(&self, currency: Currency) -> String {
        format!(
            "{:.prec$}",
            self.to_decimal(currency),
            prec = currency.minor_exponent() as usize
        )
    }

    /// Integer split of `total` across `parts` participants.
    ///
    /// Returns `(per_part, remainder)` where `per_part * parts + remainder == total`.
    /// Returns `None` when `parts` is zero.
    pub fn split_evenly(total: Money, parts: usize) -> Option<(Money, Money)> {
        let parts = i64::try_from(parts).ok().filter(|p| *p > 0)?;
        let per = total.0.div_euclid(parts);
        Some((Money(per), Money(total.0 - per * parts)))
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    pub fn abs(&self) -> Money {
        Money(self.0.abs())
    }

    pub fn checked_add(self, rhs: Money) -> Option<Money> {
        self.0.checked_add(rhs.0).map(Money)
    }

    pub fn checked_sub(self, rhs: Money) -> Option<Money> {
        self.0.checked_sub(rhs.0).map(Money)
    }

    /// Sum of `amounts`, or `None` if it leaves the i64 range.
    pub fn checked_sum<I>(amounts: I) -> Option<Money>
    where
        I: IntoIterator<Item = Money>,
    {
        amounts
            .into_iter()
            .try_fold(Money::ZERO, |acc, m| acc.checked_add(m))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::ops::Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl std::ops::AddAssign for Money {
    fn add_assign(&mut self, rhs: Money) {
        self.0 += rhs.0;
    }
}

impl std::ops::Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}

impl std::ops::SubAssign for Money {
    fn sub_assign(&mut self, rhs: Money) {
        self.0 -= rhs.0;
    }
}

impl std::ops::Neg for Money {
    type Output = Money;

    fn neg(self) -> Money {
        Money(-self.0)
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, |acc, m| acc + m)
    }
}

impl<'a> std::iter::Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, |acc, m| acc + *m)
    }
}
