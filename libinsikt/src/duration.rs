use serde::Serialize;

/// Capture timestamp, panic-free and limited to our needs:
///   - micros instead of nanos
///   - fields are exposed
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Debug, Serialize)]
pub struct Duration {
    pub secs: u32,
    pub micros: u32,
}

pub const MICROS_PER_SEC: u32 = 1_000_000;

impl Duration {
    /// Build Duration from secs and micros
    pub fn new(secs: u32, micros: u32) -> Duration {
        Duration { secs, micros }
    }

    /// Build Duration from a timestamp fraction expressed in `unit` ticks per second
    pub fn from_fraction(secs: u32, frac: u64, unit: u64) -> Duration {
        let micros = if unit == 0 {
            0
        } else if unit >= u64::from(MICROS_PER_SEC) {
            frac / (unit / u64::from(MICROS_PER_SEC))
        } else {
            frac * (u64::from(MICROS_PER_SEC) / unit)
        };
        Duration {
            secs,
            micros: (micros % u64::from(MICROS_PER_SEC)) as u32,
        }
    }
}
