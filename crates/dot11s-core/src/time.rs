//! Simulated time helpers.
//!
//! All protocol state runs on simulated time: a [`Duration`] measured from
//! the start of the run. 802.11 timing attributes are expressed in time
//! units (TU) of 1024 µs.

use std::time::Duration;

/// Point on the simulated clock, measured from the start of the run
pub type SimTime = Duration;

/// One 802.11 time unit
pub const TU: Duration = Duration::from_micros(1024);

/// Convert a TU count to a duration
pub fn tu(units: u32) -> Duration {
    TU * units
}

/// Convert a duration to whole TUs, saturating at `u32::MAX`
pub fn to_tu(duration: Duration) -> u32 {
    u32::try_from(duration.as_micros() / 1024).unwrap_or(u32::MAX)
}
