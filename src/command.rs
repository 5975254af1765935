//! Command records and the dispatcher that applies them to a [`Bulb`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::device::Bulb;
use crate::errors::Error;
use crate::types::{Color, Intensity, PowerMode};

/// One decoded inbound command: a selector and its integer payload.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct CommandRecord {
    pub command: i64,
    pub value: i64,
}

impl CommandRecord {
    pub fn new(command: i64, value: i64) -> Self {
        CommandRecord { command, value }
    }

    /// The typed selector, if this is a known command.
    pub fn kind(&self) -> Option<CommandKind> {
        CommandKind::try_from(self.command).ok()
    }
}

/// Known command selectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    SetId = 0,
    SetPower = 1,
    SetIntensity = 2,
    SetColor = 3,
}

impl TryFrom<i64> for CommandKind {
    type Error = i64;

    fn try_from(selector: i64) -> Result<Self, i64> {
        match selector {
            0 => Ok(CommandKind::SetId),
            1 => Ok(CommandKind::SetPower),
            2 => Ok(CommandKind::SetIntensity),
            3 => Ok(CommandKind::SetColor),
            other => Err(other),
        }
    }
}

/// A device field a command wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Id,
    On,
    Intensity,
    Color,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Field::Id => "id",
            Field::On => "on",
            Field::Intensity => "intensity",
            Field::Color => "color",
        };
        f.write_str(name)
    }
}

/// What [`apply`] did with a record.
#[derive(Debug)]
pub enum ApplyOutcome {
    /// Exactly this field was written.
    Applied(Field),
    /// Unknown selector; nothing was written.
    Ignored(i64),
    /// Known selector with an unusable value; nothing was written.
    Rejected(Error),
}

/// Apply one command record to the device.
///
/// Writes at most one field and never fails outward. Intensity is clamped to
/// 0-100, power treats any nonzero value as on, and a color code outside the
/// palette is rejected without touching the device.
///
/// # Examples
///
/// ```
/// use bulb_endpoint::{apply, ApplyOutcome, Bulb, Color, CommandRecord, SharedBulb};
///
/// let bulb = SharedBulb::default();
/// apply(&bulb, &CommandRecord::new(3, 2));
/// assert_eq!(bulb.color(), Color::Green);
///
/// assert!(matches!(apply(&bulb, &CommandRecord::new(3, 9)), ApplyOutcome::Rejected(_)));
/// assert!(matches!(apply(&bulb, &CommandRecord::new(42, 1)), ApplyOutcome::Ignored(42)));
/// assert_eq!(bulb.color(), Color::Green);
/// ```
pub fn apply<B: Bulb + ?Sized>(device: &B, record: &CommandRecord) -> ApplyOutcome {
    let Some(kind) = record.kind() else {
        return ApplyOutcome::Ignored(record.command);
    };

    match kind {
        CommandKind::SetId => {
            device.set_id(record.value);
            ApplyOutcome::Applied(Field::Id)
        }
        CommandKind::SetPower => {
            device.set_power(PowerMode::from_value(record.value));
            ApplyOutcome::Applied(Field::On)
        }
        CommandKind::SetIntensity => {
            device.set_intensity(Intensity::clamped(record.value));
            ApplyOutcome::Applied(Field::Intensity)
        }
        CommandKind::SetColor => match Color::from_code(record.value) {
            Some(color) => {
                device.set_color(color);
                ApplyOutcome::Applied(Field::Color)
            }
            None => ApplyOutcome::Rejected(Error::InvalidColor(record.value)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{BulbState, SharedBulb};

    fn baseline() -> BulbState {
        BulbState {
            id: 11,
            on: false,
            intensity: Intensity::clamped(20),
            color: Color::Blue,
        }
    }

    #[test]
    fn test_each_command_touches_one_field() {
        let cases = [
            (CommandRecord::new(0, 99), Field::Id),
            (CommandRecord::new(1, 1), Field::On),
            (CommandRecord::new(2, 55), Field::Intensity),
            (CommandRecord::new(3, 4), Field::Color),
        ];

        for (record, field) in cases {
            let bulb = SharedBulb::new(baseline());
            let outcome = apply(&bulb, &record);
            assert!(matches!(outcome, ApplyOutcome::Applied(f) if f == field));

            let before = baseline();
            let after = bulb.state();
            assert_eq!(after.id != before.id, field == Field::Id);
            assert_eq!(after.on != before.on, field == Field::On);
            assert_eq!(after.intensity != before.intensity, field == Field::Intensity);
            assert_eq!(after.color != before.color, field == Field::Color);
        }
    }

    #[test]
    fn test_unknown_commands_are_ignored() {
        for selector in [-1, 4, 5, 1000, i64::MAX] {
            let bulb = SharedBulb::new(baseline());
            let outcome = apply(&bulb, &CommandRecord::new(selector, 1));
            assert!(matches!(outcome, ApplyOutcome::Ignored(s) if s == selector));
            assert_eq!(bulb.state(), baseline());
        }
    }

    #[test]
    fn test_power_coercion() {
        let bulb = SharedBulb::new(baseline());
        apply(&bulb, &CommandRecord::new(1, 5));
        assert!(bulb.is_on());
        apply(&bulb, &CommandRecord::new(1, 0));
        assert!(!bulb.is_on());
    }

    #[test]
    fn test_intensity_is_clamped() {
        let bulb = SharedBulb::new(baseline());
        apply(&bulb, &CommandRecord::new(2, 150));
        assert_eq!(bulb.intensity().value(), 100);
        apply(&bulb, &CommandRecord::new(2, -10));
        assert_eq!(bulb.intensity().value(), 0);
    }

    #[test]
    fn test_out_of_range_color_is_rejected() {
        let bulb = SharedBulb::new(baseline());
        let outcome = apply(&bulb, &CommandRecord::new(3, 5));
        assert!(matches!(outcome, ApplyOutcome::Rejected(Error::InvalidColor(5))));
        assert_eq!(bulb.state(), baseline());
    }

    #[test]
    fn test_kind() {
        assert_eq!(CommandRecord::new(2, 0).kind(), Some(CommandKind::SetIntensity));
        assert_eq!(CommandRecord::new(7, 0).kind(), None);
    }
}
