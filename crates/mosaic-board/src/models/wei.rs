//! Bid amounts in the settlement currency's smallest unit.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A non-negative amount of wei.
///
/// Serialized as a decimal string so JSON clients never lose precision.
/// Deserialization also accepts a plain JSON integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Wei(pub u128);

impl Wei {
    pub const ZERO: Wei = Wei(0);

    /// Largest bid the ledger can carry (`uint96`).
    pub const LEDGER_MAX: Wei = Wei((1u128 << 96) - 1);

    pub const fn new(amount: u128) -> Self {
        Self(amount)
    }

    pub const fn get(&self) -> u128 {
        self.0
    }

    /// Total for `cells` cells, saturating at `u128::MAX`.
    pub const fn times_cells(&self, cells: u64) -> Wei {
        Wei(self.0.saturating_mul(cells as u128))
    }
}

impl fmt::Display for Wei {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Wei {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(format!("invalid wei amount: {:?}", s));
        }
        s.parse::<u128>()
            .map(Wei)
            .map_err(|_| format!("wei amount out of range: {}", s))
    }
}

impl From<u128> for Wei {
    fn from(v: u128) -> Self {
        Self(v)
    }
}

impl Serialize for Wei {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

struct WeiVisitor;

impl<'de> Visitor<'de> for WeiVisitor {
    type Value = Wei;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a non-negative integer or decimal string")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Wei, E> {
        Ok(Wei(v as u128))
    }

    fn visit_u128<E: de::Error>(self, v: u128) -> Result<Wei, E> {
        Ok(Wei(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Wei, E> {
        u128::try_from(v)
            .map(Wei)
            .map_err(|_| E::custom("wei amount must be non-negative"))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Wei, E> {
        v.parse().map_err(E::custom)
    }
}

impl<'de> Deserialize<'de> for Wei {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(WeiVisitor)
    }
}
