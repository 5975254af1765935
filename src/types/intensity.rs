//! Light intensity.

use serde::{Deserialize, Serialize};

/// Light intensity as a percentage from 0 to 100.
#[derive(Default, Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(transparent)]
pub struct Intensity {
    pub(crate) value: u8,
}

impl Intensity {
    const MIN: u8 = 0;
    const MAX: u8 = 100;

    pub fn value(&self) -> u8 {
        self.value
    }

    /// Clamps value into the valid range (0-100).
    ///
    /// # Examples
    ///
    /// ```
    /// use bulb_endpoint::Intensity;
    ///
    /// assert_eq!(Intensity::clamped(75).value(), 75);
    /// assert_eq!(Intensity::clamped(250).value(), 100);
    /// assert_eq!(Intensity::clamped(-3).value(), 0);
    /// ```
    pub fn clamped(value: i64) -> Self {
        let value = value.clamp(i64::from(Self::MIN), i64::from(Self::MAX));
        Intensity { value: value as u8 }
    }
}
