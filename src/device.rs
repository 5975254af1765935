//! Device state and its accessor contract.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::telemetry::TelemetryRecord;
use crate::types::{Color, Intensity, PowerMode};

/// Accessor contract for the device state both workers share.
///
/// Implementations must be safe to call from the publisher and the listener at
/// the same time. [`SharedBulb`] is the provided implementation; a collaborator
/// owning its own device representation can implement this instead.
pub trait Bulb: Send + Sync {
    fn id(&self) -> i64;
    fn set_id(&self, id: i64);

    fn is_on(&self) -> bool;
    fn set_power(&self, power: PowerMode);

    fn intensity(&self) -> Intensity;
    fn set_intensity(&self, intensity: Intensity);

    fn color(&self) -> Color;
    fn set_color(&self, color: Color);

    /// Read every field for one telemetry report.
    ///
    /// The default reads field by field; implementations holding a lock should
    /// read all fields under a single acquisition.
    fn snapshot(&self) -> TelemetryRecord {
        TelemetryRecord {
            id: self.id(),
            on: self.is_on(),
            intensity: self.intensity().value(),
            color: self.color().code(),
        }
    }
}

/// Plain device fields.
#[derive(Debug, Default, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct BulbState {
    pub id: i64,
    pub on: bool,
    pub intensity: Intensity,
    pub color: Color,
}

impl From<&BulbState> for TelemetryRecord {
    fn from(state: &BulbState) -> Self {
        TelemetryRecord {
            id: state.id,
            on: state.on,
            intensity: state.intensity.value(),
            color: state.color.code(),
        }
    }
}

/// A [`BulbState`] behind one mutex, cheap to clone across workers.
///
/// # Example
///
/// ```
/// use bulb_endpoint::{Bulb, Color, PowerMode, SharedBulb};
///
/// let bulb = SharedBulb::with_id(7);
/// let worker_view = bulb.clone();
/// worker_view.set_power(PowerMode::On);
/// worker_view.set_color(Color::Blue);
///
/// let state = bulb.state();
/// assert_eq!(state.id, 7);
/// assert!(state.on);
/// assert_eq!(state.color, Color::Blue);
/// ```
#[derive(Debug, Clone, Default)]
pub struct SharedBulb {
    state: Arc<Mutex<BulbState>>,
}

impl SharedBulb {
    pub fn new(state: BulbState) -> Self {
        SharedBulb {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn with_id(id: i64) -> Self {
        Self::new(BulbState {
            id,
            ..BulbState::default()
        })
    }

    /// Copy of the current fields.
    pub fn state(&self) -> BulbState {
        *self.lock()
    }

    fn lock(&self) -> MutexGuard<'_, BulbState> {
        lock(&self.state)
    }
}

// A panic while holding one of these locks cannot leave a scalar field half
// written, so a poisoned lock is still usable.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Bulb for SharedBulb {
    fn id(&self) -> i64 {
        self.lock().id
    }

    fn set_id(&self, id: i64) {
        self.lock().id = id;
    }

    fn is_on(&self) -> bool {
        self.lock().on
    }

    fn set_power(&self, power: PowerMode) {
        self.lock().on = power.is_on();
    }

    fn intensity(&self) -> Intensity {
        self.lock().intensity
    }

    fn set_intensity(&self, intensity: Intensity) {
        self.lock().intensity = intensity;
    }

    fn color(&self) -> Color {
        self.lock().color
    }

    fn set_color(&self, color: Color) {
        self.lock().color = color;
    }

    fn snapshot(&self) -> TelemetryRecord {
        TelemetryRecord::from(&*self.lock())
    }
}
