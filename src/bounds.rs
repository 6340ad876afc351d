//! Range clamping
//!
//! Inclusive `[low, high]` ranges used for bus gain limits, device gain
//! controls and configuration values. An inverted range is a programming
//! error and is rejected when the range is built; fitting a value into a
//! valid range never fails.

use crate::{AudioError, Result};
use std::fmt::Debug;

/// Inclusive range with a guaranteed `low <= high`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds<T> {
    low: T,
    high: T,
}

impl<T> Bounds<T> {
    /// Build a range from values the caller already knows are ordered
    pub(crate) const fn from_sorted(low: T, high: T) -> Self {
        Bounds { low, high }
    }
}

impl<T: PartialOrd + Copy + Debug> Bounds<T> {
    /// Build a range, rejecting `high < low`
    ///
    /// Values that do not compare (NaN) are rejected the same way.
    pub fn new(low: T, high: T) -> Result<Self> {
        match low.partial_cmp(&high) {
            Some(std::cmp::Ordering::Less) | Some(std::cmp::Ordering::Equal) => {
                Ok(Bounds { low, high })
            }
            _ => Err(AudioError::InvalidBounds {
                low: format!("{low:?}"),
                high: format!("{high:?}"),
            }),
        }
    }

    /// Lower bound
    pub fn low(&self) -> T {
        self.low
    }

    /// Upper bound
    pub fn high(&self) -> T {
        self.high
    }

    /// Clamp `value` into the range
    ///
    /// A value that does not compare with the bounds (NaN) fits to `low`.
    pub fn fit(&self, value: T) -> T {
        if value.partial_cmp(&value).is_none() {
            self.low
        } else if value >= self.high {
            self.high
        } else if value <= self.low {
            self.low
        } else {
            value
        }
    }

    /// Check whether `value` lies inside the range
    pub fn contains(&self, value: T) -> bool {
        value >= self.low && value <= self.high
    }
}

/// Clamp `value` into `[low, high]` in one call
pub fn fit_bounds<T: PartialOrd + Copy + Debug>(value: T, low: T, high: T) -> Result<T> {
    Ok(Bounds::new(low, high)?.fit(value))
}
