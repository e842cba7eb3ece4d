//! Integer equity quantity.
//!
//! Ownership is stored as micro-percent: 1 unit = 0.000001% and 100% is exactly
//! 100,000,000 units. Percent `f64` values only appear at the API boundary.

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct MicroPct(u64);

impl MicroPct {
    pub const UNITS_PER_PERCENT: u64 = 1_000_000;
    pub const ZERO: MicroPct = MicroPct(0);
    pub const ONE_HUNDRED: MicroPct = MicroPct(100 * Self::UNITS_PER_PERCENT);

    pub const fn from_units(units: u64) -> Self {
        Self(units)
    }

    pub const fn units(self) -> u64 {
        self.0
    }

    /// Parse a boundary percent (e.g. `12.5` for 12.5%). Rejects NaN, negatives and
    /// anything above 100.
    pub fn from_percent(pct: f64) -> Option<Self> {
        if !pct.is_finite() || pct < 0.0 || pct > 100.0 {
            return None;
        }
        Some(Self((pct * Self::UNITS_PER_PERCENT as f64).round() as u64))
    }

    /// `part / whole` as a share of the company, e.g. amount raised over post-money.
    pub fn from_ratio(part: f64, whole: f64) -> Option<Self> {
        if !part.is_finite() || !whole.is_finite() || whole <= 0.0 || part < 0.0 {
            return None;
        }
        let units = (part / whole * Self::ONE_HUNDRED.0 as f64).round();
        if units > Self::ONE_HUNDRED.0 as f64 {
            return None;
        }
        Some(Self(units as u64))
    }

    pub fn as_percent(self) -> f64 {
        self.0 as f64 / Self::UNITS_PER_PERCENT as f64
    }

    pub fn as_fraction(self) -> f64 {
        self.0 as f64 / Self::ONE_HUNDRED.0 as f64
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// `self * num / den`, floored. `den == 0` yields zero.
    pub fn scale(self, num: u64, den: u64) -> Self {
        if den == 0 {
            return Self::ZERO;
        }
        Self(((self.0 as u128 * num as u128) / den as u128) as u64)
    }

    /// `self * num / den`, rounded up.
    pub fn scale_ceil(self, num: u64, den: u64) -> Self {
        if den == 0 {
            return Self::ZERO;
        }
        let n = self.0 as u128 * num as u128;
        Self(n.div_ceil(den as u128) as u64)
    }

    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self)
    }

    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        self.0.checked_sub(rhs.0).map(Self)
    }

    pub fn saturating_sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }

    /// Dollar value of this share of a company worth `valuation`.
    pub fn value_at(self, valuation: f64) -> f64 {
        valuation * self.as_fraction()
    }
}

impl Add for MicroPct {
    type Output = MicroPct;

    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl AddAssign for MicroPct {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sum for MicroPct {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, |acc, x| acc + x)
    }
}

impl<'a> Sum<&'a MicroPct> for MicroPct {
    fn sum<I: Iterator<Item = &'a MicroPct>>(iter: I) -> Self {
        iter.fold(Self::ZERO, |acc, x| acc + *x)
    }
}

impl fmt::Display for MicroPct {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4}%", self.as_percent())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_round_trip() {
        let p = MicroPct::from_percent(12.5).unwrap();
        assert_eq!(p.units(), 12_500_000);
        assert_eq!(p.as_percent(), 12.5);
    }

    #[test]
    fn test_from_percent_rejects_out_of_range() {
        assert!(MicroPct::from_percent(-0.1).is_none());
        assert!(MicroPct::from_percent(100.01).is_none());
        assert!(MicroPct::from_percent(f64::NAN).is_none());
        assert_eq!(MicroPct::from_percent(100.0), Some(MicroPct::ONE_HUNDRED));
    }

    #[test]
    fn test_from_ratio_amount_over_post() {
        // $2M on $10M post = 20%
        let p = MicroPct::from_ratio(2_000_000.0, 10_000_000.0).unwrap();
        assert_eq!(p, MicroPct::from_percent(20.0).unwrap());
        assert!(MicroPct::from_ratio(1.0, 0.0).is_none());
    }

    #[test]
    fn test_scale_floor_and_ceil() {
        let p = MicroPct::from_units(10);
        assert_eq!(p.scale(1, 3).units(), 3);
        assert_eq!(p.scale_ceil(1, 3).units(), 4);
        assert_eq!(p.scale(5, 0), MicroPct::ZERO);
    }

    #[test]
    fn test_sum_and_display() {
        let parts = [MicroPct::from_percent(60.0).unwrap(), MicroPct::from_percent(40.0).unwrap()];
        let total: MicroPct = parts.iter().sum();
        assert_eq!(total, MicroPct::ONE_HUNDRED);
        assert_eq!(format!("{}", MicroPct::from_percent(7.25).unwrap()), "7.2500%");
    }
}
