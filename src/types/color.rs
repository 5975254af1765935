//! Fixed color palette supported by the bulb.

use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter};

/// The colors the bulb can show, identified on the wire by their integer code.
#[derive(Debug, Default, Serialize, Deserialize, Clone, Copy, EnumIter, Display, PartialEq, Eq)]
pub enum Color {
    #[default]
    White = 0,
    Red = 1,
    Green = 2,
    Blue = 3,
    Yellow = 4,
}

impl Color {
    /// Look up a color by its code. Returns None for codes outside the palette.
    ///
    /// # Examples
    ///
    /// ```
    /// use bulb_endpoint::Color;
    ///
    /// assert_eq!(Color::from_code(2), Some(Color::Green));
    /// assert_eq!(Color::from_code(5), None);
    /// assert_eq!(Color::from_code(-1), None);
    /// ```
    pub fn from_code(code: i64) -> Option<Self> {
        Color::iter().find(|color| i64::from(color.code()) == code)
    }

    pub fn code(&self) -> u8 {
        *self as u8
    }
}
