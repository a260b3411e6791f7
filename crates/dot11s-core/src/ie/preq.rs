//! Path Request element

use crate::address::MacAddress;
use crate::error::{MeshError, MeshResult};
use crate::metric::{accumulate, Metric};
use serde::{Deserialize, Serialize};

/// One requested target inside a PREQ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreqTarget {
    /// Target address, or broadcast for a proactive PREQ
    pub address: MacAddress,
    /// Last known target sequence number
    pub seqno: u32,
    /// Destination Only: only the target itself may answer
    pub do_flag: bool,
    /// Reply and Forward: an intermediate replier keeps forwarding
    pub rf_flag: bool,
    /// Unknown sequence number
    pub usn: bool,
}

impl PreqTarget {
    pub fn new(address: MacAddress, seqno: u32, do_flag: bool, rf_flag: bool) -> Self {
        Self {
            address,
            seqno,
            do_flag,
            rf_flag,
            usn: seqno == 0,
        }
    }
}

/// PREQ information element
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IePreq {
    pub originator: MacAddress,
    pub originator_seqno: u32,
    pub preq_id: u32,
    pub hop_count: u8,
    pub ttl: u8,
    pub metric: Metric,
    /// Path lifetime in TU
    pub lifetime: u32,
    /// Proactive PREQ: targets must not send a PREP back
    pub need_not_prep: bool,
    pub targets: Vec<PreqTarget>,
}

impl IePreq {
    /// Target units that fit in one element
    pub const MAX_TARGETS: usize = 20;

    pub fn new(originator: MacAddress, originator_seqno: u32, preq_id: u32, ttl: u8, lifetime: u32) -> Self {
        Self {
            originator,
            originator_seqno,
            preq_id,
            hop_count: 0,
            ttl,
            metric: 0,
            lifetime,
            need_not_prep: false,
            targets: Vec::new(),
        }
    }

    /// Append a target unit. A PREQ already carrying the address only
    /// refreshes its sequence number.
    pub fn add_target(&mut self, target: PreqTarget) -> MeshResult<()> {
        if let Some(existing) = self.targets.iter_mut().find(|t| t.address == target.address) {
            existing.seqno = existing.seqno.max(target.seqno);
            return Ok(());
        }
        if self.is_full() {
            return Err(MeshError::PreqFull(self.targets.len()));
        }
        self.targets.push(target);
        Ok(())
    }

    /// Remove a target unit
    pub fn remove_target(&mut self, address: MacAddress) {
        self.targets.retain(|t| t.address != address);
    }

    pub fn is_full(&self) -> bool {
        self.targets.len() >= Self::MAX_TARGETS
    }

    /// Proactive PREQs carry a single broadcast target
    pub fn is_proactive(&self) -> bool {
        self.targets.iter().any(|t| t.address.is_broadcast())
    }

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
