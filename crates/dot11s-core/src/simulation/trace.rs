//! Simulation event log

use crate::time::SimTime;
use serde::Serialize;
use std::io::{self, Write};

/// Something that happened during a run. Node fields are simulator indices.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SimEvent {
    NodeStarted {
        node: usize,
        address: String,
    },
    FrameSent {
        from: usize,
        /// None for broadcast
        to: Option<usize>,
        kind: &'static str,
    },
    FrameLost {
        from: usize,
        to: usize,
        kind: &'static str,
        reason: &'static str,
    },
    PeerLink {
        node: usize,
        peer: usize,
        up: bool,
    },
    MessageSent {
        uid: u64,
        from: usize,
        to: Option<usize>,
    },
    MessageDelivered {
        uid: u64,
        from: usize,
        to: usize,
        latency_us: u64,
    },
    LinkBroken {
        a: usize,
        b: usize,
    },
    LinkRestored {
        a: usize,
        b: usize,
    },
}

/// Timestamped event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceRecord {
    pub time_us: u64,
    #[serde(flatten)]
    pub event: SimEvent,
}

impl TraceRecord {
    pub fn new(at: SimTime, event: SimEvent) -> Self {
        Self {
            time_us: u64::try_from(at.as_micros()).unwrap_or(u64::MAX),
            event,
        }
    }
}

/// Write records as JSON lines
pub fn write_trace<W: Write>(records: &[TraceRecord], mut out: W) -> io::Result<()> {
    for record in records {
        serde_json::to_writer(&mut out, record).map_err(io::Error::other)?;
        out.write_all(b"\n")?;
    }
    out.flush()
}
