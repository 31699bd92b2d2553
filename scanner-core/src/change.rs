//! Up/down change highlighting.

use crate::types::InstrumentId;
use fnv::FnvHashMap;
use serde::Serialize;

/// Direction of the latest change of a tracked field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tick {
    Up,
    Down,
    #[default]
    Unchanged,
}

impl Tick {
    /// Compare a new value against the previous one.
    ///
    /// With no previous value, or no current value, there is nothing to highlight.
    pub fn compare(previous: Option<f64>, current: Option<f64>) -> Self {
        match (previous, current) {
            (Some(previous), Some(current)) if current > previous => Tick::Up,
            (Some(previous), Some(current)) if current < previous => Tick::Down,
            _ => Tick::Unchanged,
        }
    }
}

/// Quote fields that carry change highlighting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackedField {
    CurrentPrice,
    BestBid,
    BestAsk,
}

/// Previous value per instrument and field.
#[derive(Debug, Clone, Default)]
pub struct ChangeTracker {
    previous: FnvHashMap<(InstrumentId, TrackedField), f64>,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare `value` against the stored previous value and remember it.
    ///
    /// Absent or non-finite values are not stored, so a gap in the feed does not erase
    /// the comparison baseline.
    pub fn observe(&mut self, id: &InstrumentId, field: TrackedField, value: Option<f64>) -> Tick {
        let Some(value) = value.filter(|value| value.is_finite()) else {
            return Tick::Unchanged;
        };

        let previous = self.previous.insert((id.clone(), field), value);
        Tick::compare(previous, Some(value))
    }

    pub fn previous(&self, id: &InstrumentId, field: TrackedField) -> Option<f64> {
        self.previous.get(&(id.clone(), field)).copied()
    }

    pub fn clear(&mut self) {
        self.previous.clear();
    }
}
