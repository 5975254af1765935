//! Value types for device fields.

mod color;
mod intensity;
mod power;

pub use color::Color;
pub use intensity::Intensity;
pub use power::PowerMode;
