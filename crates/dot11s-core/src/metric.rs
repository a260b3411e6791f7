//! Path metrics
//!
//! A metric is a cumulative path cost; lower is better. [`MAX_METRIC`] is
//! reserved for "unreachable" and all accumulation saturates at it.
//!
//! The airtime link metric follows the 802.11s definition:
//!
//! ```text
//! ca = (O + Bt / r) / (1 - ef)
//! ```
//!
//! with `O` the channel access overhead, `Bt` the test frame size in bits,
//! `r` the data rate and `ef` the frame error rate. The result is expressed
//! in units of 0.01 TU (10.24 µs).

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Cumulative path cost
pub type Metric = u32;

/// Sentinel meaning "unreachable"
pub const MAX_METRIC: Metric = u32::MAX;

/// Add a link cost to a path cost, saturating at [`MAX_METRIC`]
pub fn accumulate(path: Metric, link: Metric) -> Metric {
    path.saturating_add(link)
}

/// Freshness rule shared by every path table.
///
/// A candidate replaces the stored path when its sequence number is newer,
/// or equally new with a strictly lower cost, or when the stored path has
/// expired. Sequence numbers are compared as plain integers.
pub fn supersedes<S: Ord, C: Ord>(
    candidate_seq: S,
    candidate_cost: C,
    stored_seq: S,
    stored_cost: C,
    stored_expired: bool,
) -> bool {
    stored_expired
        || candidate_seq > stored_seq
        || (candidate_seq == stored_seq && candidate_cost < stored_cost)
}

/// Airtime link metric calculator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AirtimeMetric {
    /// Test frame size in bits
    pub test_frame_bits: u32,
    /// Channel access and protocol overhead per frame (µs)
    pub overhead_us: f64,
}

impl Default for AirtimeMetric {
    fn default() -> Self {
        Self {
            test_frame_bits: 8192, // 1024 octets
            overhead_us: 75.0,     // DIFS + preamble + ACK at OFDM rates
        }
    }
}

impl AirtimeMetric {
    /// Metric unit: 0.01 TU
    pub const UNIT: Duration = Duration::from_nanos(10_240);

    /// Link cost for a data rate (bits/s) and frame error rate (0.0-1.0)
    pub fn calculate(&self, rate_bps: u64, frame_error_rate: f64) -> Metric {
        if rate_bps == 0 || !(0.0..1.0).contains(&frame_error_rate) {
            return MAX_METRIC;
        }
        let tx_us = self.overhead_us + self.test_frame_bits as f64 * 1e6 / rate_bps as f64;
        let airtime_us = tx_us / (1.0 - frame_error_rate);
        let units = (airtime_us / 10.24).round();
        if units >= MAX_METRIC as f64 {
            MAX_METRIC
        } else {
            (units as Metric).max(1)
        }
    }
}
