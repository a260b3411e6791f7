//! Frames exchanged between mesh points
//!
//! ```text
//! Frame
//! ├── Management { mesh_point, body }
//! │   ├── Beacon    (interval, Mesh ID, Mesh Configuration, Beacon Timing)
//! │   ├── PeerLink  (Peer Management open/confirm/close, AID, Mesh ID, Mesh Configuration)
//! │   └── Routing   (PREQ | PREP | PERR | RANN)
//! └── Data { source, destination, protocol, packet }
//!                                              └── DataPacket { uid, payload, header }
//!                                                                          ├── Hwmp(HwmpTag)
//!                                                                          └── Flame(FlameHeader)
//! ```
//!
//! The transmitter and receiver addresses of a frame are supplied by the
//! layer that moves it, not stored in the frame.

use crate::address::MacAddress;
use crate::flame::FlameHeader;
use crate::ie::{
    IeBeaconTiming, IeConfiguration, IeMeshId, IePerr, IePrep, IePreq, IeRann, PeerManagement,
};
use crate::metric::Metric;
use serde::{Deserialize, Serialize};

/// EtherType used for simulated upper-layer traffic
pub const ETHERTYPE_IPV4: u16 = 0x0800;

/// Per-hop HWMP state carried with a data packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HwmpTag {
    /// Receiver chosen for the next hop
    pub address: MacAddress,
    pub ttl: u8,
    pub metric: Metric,
    /// Data sequence number, used for broadcast duplicate detection
    pub seqno: u32,
}

/// Header owned by the routing protocol, stripped before delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoutingHeader {
    Hwmp(HwmpTag),
    Flame(FlameHeader),
}

/// Payload plus the routing header of whichever protocol carries it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataPacket {
    /// Unique id assigned at origin, preserved across hops
    pub uid: u64,
    pub payload: Vec<u8>,
    pub header: Option<RoutingHeader>,
}

impl DataPacket {
    pub fn new(uid: u64, payload: Vec<u8>) -> Self {
        Self {
            uid,
            payload,
            header: None,
        }
    }

    pub fn hwmp_tag(&self) -> Option<&HwmpTag> {
        match &self.header {
            Some(RoutingHeader::Hwmp(tag)) => Some(tag),
            _ => None,
        }
    }

    pub fn hwmp_tag_mut(&mut self) -> Option<&mut HwmpTag> {
        match &mut self.header {
            Some(RoutingHeader::Hwmp(tag)) => Some(tag),
            _ => None,
        }
    }

    pub fn flame_header(&self) -> Option<&FlameHeader> {
        match &self.header {
            Some(RoutingHeader::Flame(header)) => Some(header),
            _ => None,
        }
    }

    /// Remove the HWMP tag, leaving any other header in place
    pub fn take_hwmp_tag(&mut self) -> Option<HwmpTag> {
        match self.header {
            Some(RoutingHeader::Hwmp(tag)) => {
                self.header = None;
                Some(tag)
            }
            _ => None,
        }
    }

    /// Remove the FLAME header, leaving any other header in place
    pub fn take_flame_header(&mut self) -> Option<FlameHeader> {
        match self.header {
            Some(RoutingHeader::Flame(header)) => {
                self.header = None;
                Some(header)
            }
            _ => None,
        }
    }
}

/// Data frame as seen between two mesh points
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataFrame {
    /// Originating mesh point
    pub source: MacAddress,
    /// Final destination mesh point, or broadcast
    pub destination: MacAddress,
    pub protocol: u16,
    pub packet: DataPacket,
}

/// HWMP path selection frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoutingFrame {
    Preq(IePreq),
    Prep(IePrep),
    Perr(IePerr),
    Rann(IeRann),
}

impl RoutingFrame {
    pub fn kind(&self) -> &'static str {
        match self {
            RoutingFrame::Preq(_) => "preq",
            RoutingFrame::Prep(_) => "prep",
            RoutingFrame::Perr(_) => "perr",
            RoutingFrame::Rann(_) => "rann",
        }
    }
}

/// Mesh peering management frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerLinkFrame {
    pub peer_management: PeerManagement,
    /// Association id the sender assigned to the receiver
    pub aid: u16,
    pub mesh_id: IeMeshId,
    pub config: IeConfiguration,
}

/// Mesh beacon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeaconFrame {
    /// Beacon interval in TU
    pub interval: u32,
    pub mesh_id: IeMeshId,
    pub config: IeConfiguration,
    pub timing: Option<IeBeaconTiming>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ManagementBody {
    Beacon(BeaconFrame),
    PeerLink(PeerLinkFrame),
    Routing(RoutingFrame),
}

/// Management frame together with the sender's mesh point address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagementFrame {
    pub mesh_point: MacAddress,
    pub body: ManagementBody,
}

impl ManagementFrame {
    pub fn routing(mesh_point: MacAddress, frame: RoutingFrame) -> Self {
        Self {
            mesh_point,
            body: ManagementBody::Routing(frame),
        }
    }

    pub fn kind(&self) -> &'static str {
        match &self.body {
            ManagementBody::Beacon(_) => "beacon",
            ManagementBody::PeerLink(f) => f.peer_management.subtype(),
            ManagementBody::Routing(f) => f.kind(),
        }
    }
}

/// Anything that crosses the air
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frame {
    Management(ManagementFrame),
    Data(DataFrame),
}

impl Frame {
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Management(m) => m.kind(),
            Frame::Data(_) => "data",
        }
    }
}
