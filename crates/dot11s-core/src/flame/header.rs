//! FLAME data header

use crate::address::MacAddress;
use serde::{Deserialize, Serialize};

/// Header carried by every FLAME data frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlameHeader {
    /// Hops travelled so far
    pub cost: u8,
    /// Per-originator sequence number
    pub seqno: u16,
    pub orig_dst: MacAddress,
    pub orig_src: MacAddress,
    pub protocol: u16,
}

impl FlameHeader {
    pub fn new(orig_src: MacAddress, orig_dst: MacAddress, seqno: u16, protocol: u16) -> Self {
        Self {
            cost: 0,
            seqno,
            orig_dst,
            orig_src,
            protocol,
        }
    }

    /// Add hops, saturating at 255
    pub fn add_cost(&mut self, cost: u8) {
        self.cost = self.cost.saturating_add(cost);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cost_saturates() {
        let mut header = FlameHeader::new(MacAddress::from_index(1), MacAddress::BROADCAST, 1, 0x0800);
        header.add_cost(200);
        header.add_cost(200);
        assert_eq!(header.cost, u8::MAX);
    }
}
