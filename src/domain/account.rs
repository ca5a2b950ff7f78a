use crate::error::TransferError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};

/// Represents a monetary value held by an account.
///
/// This is a wrapper around `rust_decimal::Decimal` to enforce domain-specific rules
/// and provide type safety for financial calculations.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Balance(pub Decimal);

/// Represents a positive monetary amount moved by a transfer.
///
/// Ensures that transfer amounts are always strictly positive.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self, TransferError> {
        if value > Decimal::ZERO {
            Ok(Self(value))
        } else {
            Err(TransferError::ValidationError(
                "Amount must be positive".to_string(),
            ))
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = TransferError;

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
        Self(amount)
    }

    pub fn is_negative(&self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }

    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self)
    }

    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        self.0.checked_sub(rhs.0).map(Self)
    }
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

// Implement basic arithmetic for Balance to make it a usable Value Object
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

impl std::iter::Sum for Balance {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Balance::ZERO, |acc, b| acc + b)
    }
}

/// Opaque account identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// A ledger account row.
///
/// `version` is bumped by the ledger store on every committed balance change and
/// is what the optimistic conflict check compares against.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Account {
    /// The unique identifier for the account.
    pub id: AccountId,
    /// Current balance. Never negative.
    pub balance: Balance,
    /// Monotonic version stamp, starts at 0.
    pub version: u64,
}

impl Account {
    pub fn new(id: AccountId, balance: Balance) -> Self {
        Self {
            id,
            balance,
            version: 0,
        }
    }

    /// Debits `amount` if the balance covers it.
    pub fn debit(&mut self, amount: Amount) -> Result<(), TransferError> {
        let amount = Balance::from(amount);
        if self.balance < amount {
            return Err(TransferError::ValidationError(
                "Insufficient funds".to_string(),
            ));
        }
        self.balance = self.balance.checked_sub(amount).ok_or_else(|| {
            TransferError::ValidationError(format!("Balance underflow on account {}", self.id))
        })?;
        Ok(())
    }

    /// Credits `amount` to the balance. Fails, leaving the balance untouched,
    /// if the result does not fit in a `Decimal`.
    pub fn credit(&mut self, amount: Amount) -> Result<(), TransferError> {
        self.balance = self.balance.checked_add(amount.into()).ok_or_else(|| {
            TransferError::ValidationError(format!("Balance overflow on account {}", self.id))
        })?;
        Ok(())
    }

    /// Returns the row as it looks after a committed write of `balance`.
    pub fn committed(&self, balance: Balance) -> Self {
        Self {
            id: self.id.clone(),
            balance,
            version: self.version + 1,
        }
    }
}
