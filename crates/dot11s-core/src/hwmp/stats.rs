//! HWMP counters

use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Per mesh point HWMP statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HwmpStats {
    pub tx_preq: u64,
    pub rx_preq: u64,
    pub tx_prep: u64,
    pub rx_prep: u64,
    pub tx_perr: u64,
    pub rx_perr: u64,
    pub tx_rann: u64,
    pub rx_rann: u64,
    /// Data frames handed down for unicast transmission
    pub tx_unicast: u64,
    /// Data frames handed down for broadcast transmission
    pub tx_broadcast: u64,
    pub dropped_ttl: u64,
    pub dropped_queue: u64,
    pub dropped_no_route: u64,
    pub dropped_duplicate: u64,
    /// Path discoveries started by this mesh point
    pub initiated_discoveries: u64,
    pub resolved_discoveries: u64,
    pub failed_discoveries: u64,
    /// Sum of first-PREQ-to-resolution times
    pub total_discovery_time: Duration,
}

impl HwmpStats {
    pub fn average_discovery_time(&self) -> Option<Duration> {
        u32::try_from(self.resolved_discoveries)
            .ok()
            .filter(|n| *n > 0)
            .map(|n| self.total_discovery_time / n)
    }

    pub fn total_dropped(&self) -> u64 {
        self.dropped_ttl + self.dropped_queue + self.dropped_no_route + self.dropped_duplicate
    }

    /// Accumulate another node's counters
    pub fn merge(&mut self, other: &HwmpStats) {
        self.tx_preq += other.tx_preq;
        self.rx_preq += other.rx_preq;
        self.tx_prep += other.tx_prep;
        self.rx_prep += other.rx_prep;
        self.tx_perr += other.tx_perr;
        self.rx_perr += other.rx_perr;
        self.tx_rann += other.tx_rann;
        self.rx_rann += other.rx_rann;
        self.tx_unicast += other.tx_unicast;
        self.tx_broadcast += other.tx_broadcast;
        self.dropped_ttl += other.dropped_ttl;
        self.dropped_queue += other.dropped_queue;
        self.dropped_no_route += other.dropped_no_route;
        self.dropped_duplicate += other.dropped_duplicate;
        self.initiated_discoveries += other.initiated_discoveries;
        self.resolved_discoveries += other.resolved_discoveries;
        self.failed_discoveries += other.failed_discoveries;
        self.total_discovery_time += other.total_discovery_time;
    }
}

impl fmt::Display for HwmpStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  PREQ  tx={} rx={}", self.tx_preq, self.rx_preq)?;
        writeln!(f, "  PREP  tx={} rx={}", self.tx_prep, self.rx_prep)?;
        writeln!(f, "  PERR  tx={} rx={}", self.tx_perr, self.rx_perr)?;
        writeln!(f, "  RANN  tx={} rx={}", self.tx_rann, self.rx_rann)?;
        writeln!(f, "  Data  unicast={} broadcast={}", self.tx_unicast, self.tx_broadcast)?;
        writeln!(
            f,
            "  Drops ttl={} queue={} no-route={} duplicate={}",
            self.dropped_ttl, self.dropped_queue, self.dropped_no_route, self.dropped_duplicate
        )?;
        write!(
            f,
            "  Discovery initiated={} resolved={} failed={}",
            self.initiated_discoveries, self.resolved_discoveries, self.failed_discoveries
        )?;
        if let Some(avg) = self.average_discovery_time() {
            write!(f, " avg={:.1}ms", avg.as_secs_f64() * 1000.0)?;
        }
        Ok(())
    }
}
