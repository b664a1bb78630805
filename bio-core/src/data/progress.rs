//! Progress reporting types

use std::fmt;

use crate::data::variant::Dictionary;
use crate::error::{BiometryError, Result};

/// A fraction in the closed range [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Percent(f64);

impl Percent {
    /// Construct from a raw value, rejecting anything outside [0, 1] (and NaN)
    pub fn from_raw_value(value: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&value) {
            return Err(BiometryError::PercentOutOfRange { value });
        }
        Ok(Self(value))
    }

    pub const fn zero() -> Self {
        Self(0.0)
    }

    pub const fn full() -> Self {
        Self(1.0)
    }

    pub const fn value(self) -> f64 {
        self.0
    }
}

impl Default for Percent {
    fn default() -> Self {
        Self::zero()
    }
}

impl fmt::Display for Percent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.0}%", self.0 * 100.0)
    }
}

impl TryFrom<f64> for Percent {
    type Error = BiometryError;

    fn try_from(value: f64) -> Result<Self> {
        Self::from_raw_value(value)
    }
}

/// Progress of a running operation plus device specific details
/// (e.g. a `Rectangle` hinting where to place the finger next)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Progress {
    pub percent: Percent,
    pub details: Dictionary,
}

impl Progress {
    pub fn new(percent: Percent) -> Self {
        Self {
            percent,
            details: Dictionary::new(),
        }
    }

    pub fn with_details(percent: Percent, details: Dictionary) -> Self {
        Self { percent, details }
    }
}
