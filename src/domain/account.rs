use crate::error::PaymentError;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

/// Number of decimal places every monetary value is normalised to.
pub const MONEY_SCALE: u32 = 4;

/// Rounds a raw decimal to [`MONEY_SCALE`] places using banker's rounding.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointNearestEven)
}

/// Identifies the owner of an account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Represents a monetary value with 4 decimal places precision.
///
/// A balance may be negative only when an overdraft policy allows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(from = "Decimal", into = "Decimal")]
pub struct Balance(Decimal);

/// Represents a positive monetary amount for payments and refunds.
///
/// Values are rounded to [`MONEY_SCALE`] places on construction; anything that
/// does not remain strictly positive after rounding is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self, PaymentError> {
        let rounded = round_money(value);
        if rounded > Decimal::ZERO {
            Ok(Self(rounded))
        } else {
            Err(PaymentError::ValidationError(format!(
                "Amount must be positive, got {}",
                value
            )))
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.normalize().fmt(f)
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = PaymentError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl From<Amount> for Balance {
    fn from(amount: Amount) -> Self {
        Self(amount.0)
    }
}

impl Balance {
    pub const ZERO: Self = Self(Decimal::ZERO);

    pub fn new(amount: Decimal) -> Self {
        Self(round_money(amount))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    /// `None` when the sum does not fit in a `Decimal`.
    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self::new)
    }
}

impl From<Decimal> for Balance {
    fn from(value: Decimal) -> Self {
        Self::new(value)
    }
}

impl From<Balance> for Decimal {
    fn from(balance: Balance) -> Self {
        balance.0
    }
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.normalize().fmt(f)
    }
}

impl Add for Balance {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Balance {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl Neg for Balance {
    type Output = Self;
    fn neg(self) -> Self::Output {
        Self(-self.0)
    }
}

impl AddAssign for Balance {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Balance {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

/// Condition a balance must satisfy after an adjustment is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BalanceConstraint {
    /// The resulting balance must be at or above the given floor.
    AtLeast(Balance),
    /// Used for credits, which can never be refused.
    Unconstrained,
    /// The resulting balance must not be negative.
    #[default]
    NonNegative,
}

impl BalanceConstraint {
    pub fn allows(&self, balance: Balance) -> bool {
        match self {
            BalanceConstraint::AtLeast(floor) => balance >= *floor,
            BalanceConstraint::Unconstrained => true,
            BalanceConstraint::NonNegative => balance >= Balance::ZERO,
        }
    }
}

/// State of a user's account.
///
/// `version` grows by one with every applied adjustment and is never reset.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Account {
    pub user_id: UserId,
    pub balance: Balance,
    pub version: u64,
}

impl Account {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            balance: Balance::ZERO,
            version: 0,
        }
    }

    /// Applies `delta` if the resulting balance satisfies `constraint`.
    ///
    /// Leaves the account untouched and returns `InsufficientFunds` otherwise,
    /// or `BalanceOverflow` when the result is out of range.
    pub fn apply(&mut self, delta: Balance, constraint: BalanceConstraint) -> Result<Balance, PaymentError> {
        let next = self
            .balance
            .checked_add(delta)
            .ok_or_else(|| PaymentError::BalanceOverflow(self.user_id.clone()))?;
        if !constraint.allows(next) {
            return Err(PaymentError::InsufficientFunds { payment_id: None });
        }
        self.balance = next;
        self.version += 1;
        Ok(next)
    }
}
