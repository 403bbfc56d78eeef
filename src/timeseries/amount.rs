//! Numeric amounts
//!
//! An engine works either on integers (`HINCRBY`) or floats
//! (`HINCRBYFLOAT`) for its whole lifetime. `AmountKind` is that mode;
//! `Amount` is a value tagged with its representation.

use super::error::{Result, TimeSeriesError};
use crate::store::StoreValue;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, Neg};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Amount {
    Integer(i64),
    Float(f64),
}

impl Amount {
    /// Get as i64, truncating floats
    pub fn as_i64(&self) -> i64 {
        match self {
            Amount::Integer(i) => *i,
            Amount::Float(f) => *f as i64,
        }
    }

    pub fn as_f64(&self) -> f64 {
        match self {
            Amount::Integer(i) => *i as f64,
            Amount::Float(f) => *f,
        }
    }

    pub fn is_zero(&self) -> bool {
        match self {
            Amount::Integer(i) => *i == 0,
            Amount::Float(f) => *f == 0.0,
        }
    }

    /// Negation that fails instead of wrapping `i64::MIN`
    pub fn checked_neg(&self) -> Option<Amount> {
        match self {
            Amount::Integer(i) => i.checked_neg().map(Amount::Integer),
            Amount::Float(f) => Some(Amount::Float(-f)),
        }
    }

    pub fn kind(&self) -> AmountKind {
        match self {
            Amount::Integer(_) => AmountKind::Integer,
            Amount::Float(_) => AmountKind::Float,
        }
    }
}

impl Neg for Amount {
    type Output = Amount;

    fn neg(self) -> Amount {
        match self {
            Amount::Integer(i) => Amount::Integer(i.wrapping_neg()),
            Amount::Float(f) => Amount::Float(-f),
        }
    }
}

/// Integers stay integers; anything involving a float is a float
impl Add for Amount {
    type Output = Amount;

    fn add(self, rhs: Amount) -> Amount {
        match (self, rhs) {
            (Amount::Integer(a), Amount::Integer(b)) => Amount::Integer(a.saturating_add(b)),
            (a, b) => Amount::Float(a.as_f64() + b.as_f64()),
        }
    }
}

impl Sum for Amount {
    fn sum<I: Iterator<Item = Amount>>(iter: I) -> Amount {
        iter.fold(Amount::Integer(0), Add::add)
    }
}

impl From<i64> for Amount {
    fn from(v: i64) -> Self {
        Amount::Integer(v)
    }
}

impl From<i32> for Amount {
    fn from(v: i32) -> Self {
        Amount::Integer(v as i64)
    }
}

impl From<u32> for Amount {
    fn from(v: u32) -> Self {
        Amount::Integer(v as i64)
    }
}

impl From<f64> for Amount {
    fn from(v: f64) -> Self {
        Amount::Float(v)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Amount::Integer(i) => write!(f, "{}", i),
            Amount::Float(v) => write!(f, "{}", v),
        }
    }
}

impl PartialEq<i64> for Amount {
    fn eq(&self, other: &i64) -> bool {
        matches!(self, Amount::Integer(i) if i == other)
    }
}

impl PartialEq<f64> for Amount {
    fn eq(&self, other: &f64) -> bool {
        self.as_f64() == *other
    }
}

/// Numeric mode of an engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AmountKind {
    #[default]
    Integer,
    Float,
}

impl AmountKind {
    pub fn from_use_float(use_float: bool) -> Self {
        if use_float {
            AmountKind::Float
        } else {
            AmountKind::Integer
        }
    }

    pub fn zero(&self) -> Amount {
        match self {
            AmountKind::Integer => Amount::Integer(0),
            AmountKind::Float => Amount::Float(0.0),
        }
    }

    /// Convert an amount into this mode. Integers widen to floats; floats
    /// only narrow to integers when they are whole and in range.
    pub fn coerce(&self, amount: Amount) -> Result<Amount> {
        match (self, amount) {
            (AmountKind::Integer, Amount::Integer(_)) => Ok(amount),
            (AmountKind::Float, Amount::Float(f)) => {
                if f.is_finite() {
                    Ok(amount)
                } else {
                    Err(TimeSeriesError::InvalidAmount(format!("{} is not finite", f)))
                }
            }
            (AmountKind::Float, Amount::Integer(i)) => Ok(Amount::Float(i as f64)),
            (AmountKind::Integer, Amount::Float(f)) => {
                if f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
                    Ok(Amount::Integer(f as i64))
                } else {
                    Err(TimeSeriesError::InvalidAmount(format!(
                        "{} is not an integer amount",
                        f
                    )))
                }
            }
        }
    }

    /// Read a bucket reply. Missing fields count as zero.
    pub fn parse(&self, reply: &StoreValue) -> Result<Amount> {
        let text = match reply {
            StoreValue::Nil => return Ok(self.zero()),
            StoreValue::Integer(i) => return self.coerce(Amount::Integer(*i)),
            StoreValue::Bulk(_) | StoreValue::Status(_) => reply.as_text().unwrap_or_default(),
            StoreValue::Array(_) => {
                return Err(TimeSeriesError::UnexpectedReply(format!(
                    "expected a number, got {:?}",
                    reply
                )))
            }
        };

        let parsed = match self {
            AmountKind::Integer => text.trim().parse::<i64>().map(Amount::Integer).ok(),
            AmountKind::Float => text.trim().parse::<f64>().map(Amount::Float).ok(),
        };
        parsed.ok_or_else(|| {
            TimeSeriesError::UnexpectedReply(format!("'{}' is not a {:?} amount", text, self))
        })
    }

    pub fn sum<I: IntoIterator<Item = Amount>>(&self, amounts: I) -> Amount {
        amounts.into_iter().fold(self.zero(), Add::add)
    }
}
