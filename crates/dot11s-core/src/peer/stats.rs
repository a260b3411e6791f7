//! Peer link management counters

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PeerStats {
    pub tx_open: u64,
    pub tx_confirm: u64,
    pub tx_close: u64,
    pub rx_open: u64,
    pub rx_confirm: u64,
    pub rx_close: u64,
    pub rx_beacon: u64,
    /// Confirm or Close for a link we do not have
    pub dropped_frames: u64,
    pub config_mismatches: u64,
    /// Opens refused with MESH_MAX_PEERS
    pub rejected_max_peers: u64,
    pub links_opened: u64,
    pub links_closed: u64,
    pub beacon_shifts: u64,
}

impl PeerStats {
    pub fn merge(&mut self, other: &PeerStats) {
        self.tx_open += other.tx_open;
        self.tx_confirm += other.tx_confirm;
        self.tx_close += other.tx_close;
        self.rx_open += other.rx_open;
        self.rx_confirm += other.rx_confirm;
        self.rx_close += other.rx_close;
        self.rx_beacon += other.rx_beacon;
        self.dropped_frames += other.dropped_frames;
        self.config_mismatches += other.config_mismatches;
        self.rejected_max_peers += other.rejected_max_peers;
        self.links_opened += other.links_opened;
        self.links_closed += other.links_closed;
        self.beacon_shifts += other.beacon_shifts;
    }
}

impl fmt::Display for PeerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "  Open    tx={} rx={}  Confirm tx={} rx={}  Close tx={} rx={}",
            self.tx_open, self.rx_open, self.tx_confirm, self.rx_confirm, self.tx_close, self.rx_close
        )?;
        writeln!(
            f,
            "  Links   opened={} closed={} max-peers-rejects={} mismatches={}",
            self.links_opened, self.links_closed, self.rejected_max_peers, self.config_mismatches
        )?;
        write!(
            f,
            "  Beacons rx={} shifts={} dropped-frames={}",
            self.rx_beacon, self.beacon_shifts, self.dropped_frames
        )
    }
}
