//! Power mode for the bulb.

use serde::{Deserialize, Serialize};

/// Power state for a light.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum PowerMode {
    /// Turn the light on
    On,
    /// Turn the light off
    Off,
}

impl PowerMode {
    /// Coerce a wire value: zero is off, anything else is on.
    ///
    /// # Examples
    ///
    /// ```
    /// use bulb_endpoint::PowerMode;
    ///
    /// assert_eq!(PowerMode::from_value(0), PowerMode::Off);
    /// assert_eq!(PowerMode::from_value(1), PowerMode::On);
    /// assert_eq!(PowerMode::from_value(-7), PowerMode::On);
    /// ```
    pub fn from_value(value: i64) -> Self {
        if value != 0 { PowerMode::On } else { PowerMode::Off }
    }

    pub fn is_on(&self) -> bool {
        matches!(self, PowerMode::On)
    }
}
