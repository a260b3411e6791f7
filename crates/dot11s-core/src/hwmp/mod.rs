//! Hybrid Wireless Mesh Protocol (802.11s default path selection)
//!
//! ```text
//!            request_route                      receive_routing_frame
//!                 │                                     │
//!                 ▼                                     ▼
//!   ┌──────────────────────────┐   PREQ/PREP/PERR/RANN  ┌────────────────────┐
//!   │ protocol.rs              │◄──────────────────────►│ discovery.rs       │
//!   │ data path, queue, retry, │                        │ frame handling,    │
//!   │ root announcements       │                        │ PERR generation    │
//!   └────────────┬─────────────┘                        └─────────┬──────────┘
//!                └──────────────┬─────────────────────────────────┘
//!                               ▼
//!                    rtable.rs (reactive + proactive paths)
//! ```
//!
//! Paths are discovered on demand: the originator floods a PREQ, the
//! target (or an intermediate station with a fresh enough path) answers
//! with a unicast PREP that installs the forward path hop by hop. Broken
//! links produce PERRs sent to the precursors of the affected
//! destinations. A root station may additionally build a tree with
//! periodic proactive PREQs or RANNs.

mod config;
mod discovery;
mod protocol;
mod queue;
mod rtable;
mod stats;

pub use config::{HwmpConfig, RootMode};
pub use protocol::{DiscoveryState, HwmpProtocol};
pub use queue::{PacketQueue, QueuedPacket};
pub use rtable::{LookupResult, PathEntry, Precursor, RoutingTable};
pub use stats::HwmpStats;

#[cfg(test)]
mod tests;
