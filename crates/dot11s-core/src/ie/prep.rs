//! Path Reply element

use crate::address::MacAddress;
use crate::metric::{accumulate, Metric};
use serde::{Deserialize, Serialize};

/// PREP information element.
///
/// `target` is the station the advertised path leads to; `requester` is
/// the PREQ originator the reply travels back to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IePrep {
    pub hop_count: u8,
    pub ttl: u8,
    pub target: MacAddress,
    pub target_seqno: u32,
    /// Path lifetime in TU
    pub lifetime: u32,
    pub metric: Metric,
    pub requester: MacAddress,
    pub requester_seqno: u32,
}

impl IePrep {
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
