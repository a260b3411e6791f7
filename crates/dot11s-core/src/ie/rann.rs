//! Root Announcement element

use crate::address::MacAddress;
use crate::metric::{accumulate, Metric};
use serde::{Deserialize, Serialize};

/// RANN information element
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IeRann {
    pub hop_count: u8,
    pub ttl: u8,
    /// Root mesh point
    pub originator: MacAddress,
    pub originator_seqno: u32,
    /// Announcement interval in TU
    pub interval: u32,
    pub metric: Metric,
}

impl IeRann {
    pub fn increment_metric(&mut self, link: Metric) {
        self.metric = accumulate(self.metric, link);
    }

    pub fn increment_hop_count(&mut self) {
        self.hop_count = self.hop_count.saturating_add(1);
    }

    pub fn decrement_ttl(&mut self) {
        self.ttl = self.ttl.saturating_sub(1);
    }
}
