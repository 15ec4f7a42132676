//! Currency units and conversion between them

use crate::error::{PaymentError, PaymentResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Ratio between the major and the minor unit.
pub const MINOR_PER_MAJOR: i64 = 10;

/// The two denominations of the Iranian currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Currency {
    /// Rial, the minor unit. Gateways settle in rial.
    #[serde(rename = "IRR")]
    Irr,
    /// Toman, the major unit (10 rial).
    #[serde(rename = "IRT")]
    Irt,
}

impl Currency {
    /// Get currency code string
    pub fn code(&self) -> &'static str {
        match self {
            Self::Irr => "IRR",
            Self::Irt => "IRT",
        }
    }

    /// Whether this is the major denomination
    pub fn is_major(&self) -> bool {
        matches!(self, Self::Irt)
    }

    /// Parse from a currency code
    pub fn from_code(code: &str) -> PaymentResult<Self> {
        match code.trim().to_uppercase().as_str() {
            "IRR" => Ok(Self::Irr),
            "IRT" => Ok(Self::Irt),
            _ => Err(PaymentError::CurrencyUnsupported(code.to_string())),
        }
    }
}

impl Default for Currency {
    fn default() -> Self {
        Self::Irt
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Currency {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_code(s)
    }
}

/// Convert `amount` from one unit to the other.
///
/// Major to minor multiplies by ten; minor to major divides by ten and
/// refuses amounts that are not a whole number of major units.
pub fn convert(amount: i64, from: Currency, to: Currency) -> PaymentResult<i64> {
    match (from, to) {
        (from, to) if from == to => Ok(amount),
        (Currency::Irt, Currency::Irr) => amount.checked_mul(MINOR_PER_MAJOR).ok_or_else(|| {
            PaymentError::AmountInvalid(format!("{} {} overflows in {}", amount, from, to))
        }),
        (Currency::Irr, Currency::Irt) => {
            if amount % MINOR_PER_MAJOR != 0 {
                return Err(PaymentError::AmountInvalid(format!(
                    "{} {} is not a whole number of {}",
                    amount, from, to
                )));
            }
            Ok(amount / MINOR_PER_MAJOR)
        }
        (from, to) => Err(PaymentError::CurrencyUnsupported(format!("{} -> {}", from, to))),
    }
}

/// Convert between two currency codes, validating both.
pub fn convert_codes(amount: i64, from: &str, to: &str) -> PaymentResult<i64> {
    convert(amount, Currency::from_code(from)?, Currency::from_code(to)?)
}
