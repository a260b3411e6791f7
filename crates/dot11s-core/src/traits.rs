//! Core mesh traits
//!
//! The protocol objects in this crate are driven entirely from outside:
//! frames and timer expiries come in through method calls, and everything
//! that leaves (frames, timers, status notifications) goes through the
//! small capability traits defined here. A simulator and a real driver
//! differ only in how they implement [`MeshEnvironment`].

use crate::address::{InterfaceId, MacAddress};
use crate::error::MeshResult;
use crate::frame::{DataFrame, DataPacket, ManagementFrame, RoutingFrame};
use crate::ie::IeConfiguration;
use crate::metric::Metric;
use crate::scheduler::{Timer, TimerId};
use crate::time::SimTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Services the MAC/device layer provides to the protocol stack
pub trait MeshEnvironment {
    /// Current simulated time
    fn now(&self) -> SimTime;

    /// Arm a timer. The returned handle stays valid until the timer fires
    /// or is canceled.
    fn schedule(&mut self, delay: Duration, timer: Timer) -> TimerId;

    /// Cancel a pending timer. Canceling a fired timer is a no-op.
    fn cancel(&mut self, id: TimerId);

    /// Transmit a management frame to a neighbour (or broadcast)
    fn send_management_frame(&mut self, interface: InterfaceId, receiver: MacAddress, frame: ManagementFrame);

    /// Transmit a data frame to the next hop (or broadcast)
    fn send_data_frame(&mut self, interface: InterfaceId, receiver: MacAddress, frame: DataFrame);
}

/// Aggregate peer link state change, reported on ESTAB entry and exit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerLinkStatus {
    /// Our mesh point address
    pub mesh_point: MacAddress,
    /// Peer interface address
    pub peer: MacAddress,
    /// Peer mesh point address
    pub peer_mesh_point: MacAddress,
    pub interface: InterfaceId,
    pub up: bool,
}

/// Environment of the peer link manager: the MAC services plus the
/// listener for link status and configuration problems.
pub trait PeerLinkHost: MeshEnvironment {
    /// A link entered or left ESTAB
    fn on_peer_link_status(&mut self, _status: &PeerLinkStatus) {}

    /// A peer advertised an incompatible mesh configuration
    fn on_configuration_mismatch(&mut self, _interface: InterfaceId, _peer: MacAddress) {}
}

/// Where a packet handed to [`RoutingProtocol::request_route`] came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ingress {
    /// Upper layer of this mesh point
    Local,
    /// Received from a neighbour on this interface
    Interface(InterfaceId),
}

/// Outcome of a route request, passed to the reply callback
#[derive(Debug, Clone)]
pub struct RouteReply {
    pub success: bool,
    /// Packet with the routing header filled in for the next hop
    pub packet: DataPacket,
    pub source: MacAddress,
    pub destination: MacAddress,
    pub protocol: u16,
    /// Outgoing interface
    pub interface: InterfaceId,
    /// Next hop receiver (broadcast for floods)
    pub receiver: MacAddress,
}

/// Route reply callback. Invoked once per transmission decision: zero or
/// more times synchronously, or later when a queued packet resolves.
pub type RouteReplyCallback = Box<dyn FnMut(RouteReply)>;

/// Why a packet was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DropReason {
    TtlExpired,
    QueueFull,
    NoRoute,
    Duplicate,
    OwnPacket,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::TtlExpired => write!(f, "TTL expired"),
            DropReason::QueueFull => write!(f, "queue full"),
            DropReason::NoRoute => write!(f, "no route"),
            DropReason::Duplicate => write!(f, "duplicate"),
            DropReason::OwnPacket => write!(f, "own packet looped back"),
        }
    }
}

/// Immediate result of a route request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteOutcome {
    /// The reply callback already ran with success
    Sent,
    /// Waiting for path discovery; the callback runs on resolution or failure
    Queued,
    /// Dropped; the callback will not run
    Dropped(DropReason),
}

impl RouteOutcome {
    pub fn is_accepted(&self) -> bool {
        !matches!(self, RouteOutcome::Dropped(_))
    }
}

/// Contract between a mesh point and its path selection protocol
pub trait RoutingProtocol {
    /// Protocol name for logs
    fn name(&self) -> &'static str;

    /// Mesh point address this instance routes for
    fn address(&self) -> MacAddress;

    /// Mesh configuration element advertised in beacons and peering frames
    fn configuration(&self) -> IeConfiguration;

    /// Attach an interface
    fn install_interface(&mut self, interface: InterfaceId, address: MacAddress);

    /// Called once the mesh point is running, before any frame arrives
    fn start(&mut self, _env: &mut dyn MeshEnvironment) {}

    /// Route a packet. `reply` is called for every transmission decision.
    #[allow(clippy::too_many_arguments)]
    fn request_route(
        &mut self,
        ingress: Ingress,
        source: MacAddress,
        destination: MacAddress,
        packet: DataPacket,
        protocol: u16,
        reply: RouteReplyCallback,
        env: &mut dyn MeshEnvironment,
    ) -> MeshResult<RouteOutcome>;

    /// Strip the routing header before final delivery
    fn remove_routing_stuff(
        &mut self,
        interface: InterfaceId,
        source: MacAddress,
        destination: MacAddress,
        packet: DataPacket,
    ) -> MeshResult<DataPacket>;

    /// Filter a received data frame before delivery or forwarding.
    /// Returns false to drop it.
    fn accept_data_frame(
        &mut self,
        _interface: InterfaceId,
        _transmitter: MacAddress,
        _frame: &DataFrame,
        _env: &mut dyn MeshEnvironment,
    ) -> bool {
        true
    }

    /// Handle a path selection frame from an established peer
    fn receive_routing_frame(
        &mut self,
        _interface: InterfaceId,
        _transmitter: MacAddress,
        _mesh_point: MacAddress,
        _frame: RoutingFrame,
        _link_metric: Metric,
        _env: &mut dyn MeshEnvironment,
    ) {
    }

    /// A peer link went up or down
    fn peer_link_status(&mut self, _status: &PeerLinkStatus, _env: &mut dyn MeshEnvironment) {}

    /// A timer armed by this protocol fired
    fn handle_timer(&mut self, _timer: &Timer, _id: TimerId, _env: &mut dyn MeshEnvironment) {}
}
