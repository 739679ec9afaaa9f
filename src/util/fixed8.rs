//! Fixed-point asset amount with 8 decimal places.

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::io::{BinReader, BinWriter, Decodable, Encodable, IoResult};

const DECIMALS: i64 = 100_000_000;

/// A signed amount counted in units of 10⁻⁸.
///
/// All asset amounts use this type; arithmetic never silently rounds and
/// the checked constructors refuse overflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Fixed8(i64);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Fixed8Error {
    #[error("fixed8 value out of range")]
    OutOfRange,
    #[error("invalid fixed8 string {0:?}")]
    InvalidString(String),
}

impl Fixed8 {
    pub const ZERO: Fixed8 = Fixed8(0);

    /// Wraps a raw count of 10⁻⁸ units.
    pub const fn from_raw(value: i64) -> Self {
        Fixed8(value)
    }

    /// Converts whole units, failing on overflow.
    pub fn from_int(value: i64) -> Result<Self, Fixed8Error> {
        value
            .checked_mul(DECIMALS)
            .map(Fixed8)
            .ok_or(Fixed8Error::OutOfRange)
    }

    pub fn raw(&self) -> i64 {
        self.0
    }

    /// The whole-unit part, truncated toward zero.
    pub fn int_part(&self) -> i64 {
        self.0 / DECIMALS
    }

    pub fn checked_add(self, rhs: Fixed8) -> Option<Fixed8> {
        self.0.checked_add(rhs.0).map(Fixed8)
    }

    pub fn checked_sub(self, rhs: Fixed8) -> Option<Fixed8> {
        self.0.checked_sub(rhs.0).map(Fixed8)
    }

    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }
}

impl Add for Fixed8 {
    type Output = Fixed8;
    fn add(self, rhs: Fixed8) -> Fixed8 {
        Fixed8(self.0 + rhs.0)
    }
}

impl AddAssign for Fixed8 {
    fn add_assign(&mut self, rhs: Fixed8) {
        self.0 += rhs.0;
    }
}

impl Sub for Fixed8 {
    type Output = Fixed8;
    fn sub(self, rhs: Fixed8) -> Fixed8 {
        Fixed8(self.0 - rhs.0)
    }
}

impl SubAssign for Fixed8 {
    fn sub_assign(&mut self, rhs: Fixed8) {
        self.0 -= rhs.0;
    }
}

impl Neg for Fixed8 {
    type Output = Fixed8;
    fn neg(self) -> Fixed8 {
        Fixed8(-self.0)
    }
}

impl Sum for Fixed8 {
    fn sum<I: Iterator<Item = Fixed8>>(iter: I) -> Fixed8 {
        iter.fold(Fixed8::ZERO, Add::add)
    }
}

impl fmt::Display for Fixed8 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let whole = abs / DECIMALS as u64;
        let frac = abs % DECIMALS as u64;
        if frac == 0 {
            write!(f, "{sign}{whole}")
        } else {
            let frac = format!("{frac:08}");
            write!(f, "{sign}{whole}.{}", frac.trim_end_matches('0'))
        }
    }
}

impl FromStr for Fixed8 {
    type Err = Fixed8Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || Fixed8Error::InvalidString(s.to_string());
        let (sign, body) = match s.strip_prefix('-') {
            Some(rest) => (-1i64, rest),
            None => (1i64, s),
        };
        let (whole, frac) = match body.split_once('.') {
            Some((w, f)) => (w, f),
            None => (body, ""),
        };
        if whole.is_empty() || frac.len() > 8 {
            return Err(bad());
        }
        let whole: i64 = whole.parse().map_err(|_| bad())?;
        let mut frac_units = 0i64;
        if !frac.is_empty() {
            let parsed: i64 = frac.parse().map_err(|_| bad())?;
            frac_units = parsed * 10i64.pow(8 - frac.len() as u32);
        }
        whole
            .checked_mul(DECIMALS)
            .and_then(|w| w.checked_add(frac_units))
            .and_then(|v| v.checked_mul(sign))
            .map(Fixed8)
            .ok_or(Fixed8Error::OutOfRange)
    }
}

impl Encodable for Fixed8 {
    fn encode_binary(&self, w: &mut BinWriter) -> IoResult<()> {
        w.write_u64_le(self.0 as u64)
    }
}

impl Decodable for Fixed8 {
    fn decode_binary(r: &mut BinReader<'_>) -> IoResult<Self> {
        Ok(Fixed8(r.read_u64_le()? as i64))
    }
}

impl Serialize for Fixed8 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Fixed8 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_truncates_trailing_zeros() {
        assert_eq!(Fixed8::from_raw(150_000_000).to_string(), "1.5");
        assert_eq!(Fixed8::from_int(42).unwrap().to_string(), "42");
        assert_eq!(Fixed8::from_raw(-1).to_string(), "-0.00000001");
    }

    #[test]
    fn parse_round_trip() {
        for s in ["0", "1.5", "-3.00000001", "123456789", "0.00000001"] {
            let v: Fixed8 = s.parse().unwrap();
            assert_eq!(v.to_string(), s);
        }
        assert!("1.123456789".parse::<Fixed8>().is_err());
        assert!("".parse::<Fixed8>().is_err());
    }

    #[test]
    fn checked_arithmetic() {
        let max = Fixed8::from_raw(i64::MAX);
        assert_eq!(max.checked_add(Fixed8::from_raw(1)), None);
        assert_eq!(
            Fixed8::from_int(1).unwrap().checked_sub(Fixed8::from_int(2).unwrap()),
            Some(Fixed8::from_int(-1).unwrap())
        );
    }
}
