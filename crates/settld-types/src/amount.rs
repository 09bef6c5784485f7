//! Currency and amount types.
//!
//! settld amounts are integer cents (`i64`), never floating point: §A.1's "no
//! currency conversion" means every arithmetic operation is same-currency, and
//! integer cents keep the settlement kernel's `floor(amount * pct / 100)` rule
//! exact without rounding-mode ambiguity.

use crate::error::{Result, SettldError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};

/// A supported settlement currency. Closed set: no currency conversion means no
/// open-ended currency registry either.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Usd,
    Usdc,
    Eur,
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Usd => write!(f, "USD"),
            Self::Usdc => write!(f, "USDC"),
            Self::Eur => write!(f, "EUR"),
        }
    }
}

impl std::str::FromStr for Currency {
    type Err = SettldError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "USD" => Ok(Self::Usd),
            "USDC" => Ok(Self::Usdc),
            "EUR" => Ok(Self::Eur),
            other => Err(SettldError::InvalidInput {
                message: format!("unsupported currency: {other}"),
            }),
        }
    }
}

/// An amount of a given currency, expressed in integer cents.
///
/// Cents is deliberately a bare `i64` (not wrapped) in wire structs so canonical
/// JSON serializes it as a plain number per §A.4.1 ("shortest round-trip
/// representation without exponent for integers ≤ 2^53"); this type exists for
/// the checked-arithmetic helpers used by the ledger and settlement kernel.
pub type Cents = i64;

/// A currency-tagged amount with overflow-checked arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    pub cents: Cents,
    pub currency: Currency,
}

impl Money {
    pub fn new(cents: Cents, currency: Currency) -> Self {
        Self { cents, currency }
    }

    pub fn zero(currency: Currency) -> Self {
        Self { cents: 0, currency }
    }

    pub fn is_zero(&self) -> bool {
        self.cents == 0
    }

    pub fn checked_add(&self, other: &Money) -> Result<Money> {
        self.require_same_currency(other)?;
        self.cents
            .checked_add(other.cents)
            .map(|cents| Money::new(cents, self.currency))
            .ok_or(SettldError::AmountOverflow)
    }

    pub fn checked_sub(&self, other: &Money) -> Result<Money> {
        self.require_same_currency(other)?;
        self.cents
            .checked_sub(other.cents)
            .map(|cents| Money::new(cents, self.currency))
            .ok_or(SettldError::AmountUnderflow)
    }

    fn require_same_currency(&self, other: &Money) -> Result<()> {
        if self.currency != other.currency {
            return Err(SettldError::CurrencyMismatch {
                expected: self.currency.to_string(),
                actual: other.currency.to_string(),
            });
        }
        Ok(())
    }
}

impl Add for Money {
    type Output = Result<Money>;
    fn add(self, rhs: Money) -> Result<Money> {
        self.checked_add(&rhs)
    }
}

impl Sub for Money {
    type Output = Result<Money>;
    fn sub(self, rhs: Money) -> Result<Money> {
        self.checked_sub(&rhs)
    }
}

/// `floor(amount * pct / 100)`, the settlement kernel's release computation
/// (§A.4.7 step 4). `pct` is an integer percent in `0..=100`.
pub fn release_cents(amount_cents: Cents, release_rate_pct: u8) -> Cents {
    ((amount_cents as i128) * (release_rate_pct as i128) / 100) as Cents
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_cents_floors_toward_zero() {
        assert_eq!(release_cents(2501, 40), 1000);
        assert_eq!(release_cents(2500, 100), 2500);
        assert_eq!(release_cents(2500, 0), 0);
    }

    #[test]
    fn checked_add_rejects_currency_mismatch() {
        let usd = Money::new(100, Currency::Usd);
        let eur = Money::new(100, Currency::Eur);
        assert!(usd.checked_add(&eur).is_err());
    }

    #[test]
    fn checked_sub_rejects_underflow() {
        let a = Money::new(10, Currency::Usd);
        let b = Money::new(20, Currency::Usd);
        assert!(matches!(a.checked_sub(&b), Err(SettldError::AmountUnderflow)));
    }

    #[test]
    fn currency_from_str_is_case_insensitive() {
        assert_eq!("usd".parse::<Currency>().unwrap(), Currency::Usd);
        assert_eq!("USDC".parse::<Currency>().unwrap(), Currency::Usdc);
        assert!("xyz".parse::<Currency>().is_err());
    }
}
