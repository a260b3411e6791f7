//! Mesh point: one routing protocol plus its peer link manager
//!
//! [`MeshPoint`] plays the device layer for the protocol objects. It
//! filters inbound frames by peer link state, hands peering frames and
//! beacons to the [`PeerLinkManager`], path selection frames and data to
//! the routing protocol, and turns route replies into data transmissions.
//! Link status changes reported by the manager go straight to the routing
//! protocol.

use crate::address::{InterfaceId, MacAddress};
use crate::error::MeshResult;
use crate::frame::{DataFrame, DataPacket, ManagementBody, ManagementFrame, ETHERTYPE_IPV4};
use crate::ie::PmpReasonCode;
use crate::metric::Metric;
use crate::peer::{PeerLinkConfig, PeerLinkManager, PeerLinkStatusCallback};
use crate::scheduler::{Timer, TimerId};
use crate::time::{tu, SimTime};
use crate::traits::{
    DropReason, Ingress, MeshEnvironment, PeerLinkHost, PeerLinkStatus, RouteOutcome, RouteReply, RoutingProtocol,
};
use serde::Serialize;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Packet handed to the upper layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Delivery {
    pub uid: u64,
    pub source: MacAddress,
    pub destination: MacAddress,
    pub at: SimTime,
    pub payload_len: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NodeStats {
    pub originated: u64,
    pub delivered: u64,
    pub forwarded: u64,
    pub data_frames_sent: u64,
    /// Data from stations we have no established link with
    pub dropped_not_peer: u64,
    /// Rejected by the routing protocol (duplicates, own frames)
    pub dropped_filtered: u64,
    pub dropped_no_route: u64,
    pub dropped_ttl: u64,
    pub dropped_queue: u64,
    pub config_mismatches: u64,
}

impl NodeStats {
    fn record_drop(&mut self, reason: DropReason) {
        match reason {
            DropReason::TtlExpired => self.dropped_ttl += 1,
            DropReason::QueueFull => self.dropped_queue += 1,
            DropReason::NoRoute => self.dropped_no_route += 1,
            DropReason::Duplicate | DropReason::OwnPacket => self.dropped_filtered += 1,
        }
    }

    pub fn merge(&mut self, other: &NodeStats) {
        self.originated += other.originated;
        self.delivered += other.delivered;
        self.forwarded += other.forwarded;
        self.data_frames_sent += other.data_frames_sent;
        self.dropped_not_peer += other.dropped_not_peer;
        self.dropped_filtered += other.dropped_filtered;
        self.dropped_no_route += other.dropped_no_route;
        self.dropped_ttl += other.dropped_ttl;
        self.dropped_queue += other.dropped_queue;
        self.config_mismatches += other.config_mismatches;
    }
}

/// Peer link host that forwards link status to the routing protocol
struct LinkHost<'a, R: RoutingProtocol> {
    env: &'a mut dyn MeshEnvironment,
    routing: &'a mut R,
    stats: &'a mut NodeStats,
}

impl<R: RoutingProtocol> MeshEnvironment for LinkHost<'_, R> {
    fn now(&self) -> SimTime {
        self.env.now()
    }

    fn schedule(&mut self, delay: Duration, timer: Timer) -> TimerId {
        self.env.schedule(delay, timer)
    }

    fn cancel(&mut self, id: TimerId) {
        self.env.cancel(id);
    }

    fn send_management_frame(&mut self, interface: InterfaceId, receiver: MacAddress, frame: ManagementFrame) {
        self.env.send_management_frame(interface, receiver, frame);
    }

    fn send_data_frame(&mut self, interface: InterfaceId, receiver: MacAddress, frame: DataFrame) {
        self.env.send_data_frame(interface, receiver, frame);
    }
}

impl<R: RoutingProtocol> PeerLinkHost for LinkHost<'_, R> {
    fn on_peer_link_status(&mut self, status: &PeerLinkStatus) {
        self.routing.peer_link_status(status, &mut *self.env);
    }

    fn on_configuration_mismatch(&mut self, interface: InterfaceId, peer: MacAddress) {
        self.stats.config_mismatches += 1;
        debug!("configuration mismatch with {} on interface {}", peer, interface);
    }
}

/// One mesh station
pub struct MeshPoint<R: RoutingProtocol> {
    address: MacAddress,
    routing: R,
    peers: PeerLinkManager,
    interfaces: BTreeMap<InterfaceId, MacAddress>,
    /// Route replies waiting to be turned into transmissions
    replies: Rc<RefCell<Vec<RouteReply>>>,
    deliveries: Vec<Delivery>,
    stats: NodeStats,
}

impl<R: RoutingProtocol> MeshPoint<R> {
    pub fn new(routing: R, peer_config: PeerLinkConfig) -> MeshResult<Self> {
        let address = routing.address();
        let peers = PeerLinkManager::new(address, peer_config, routing.configuration())?;
        Ok(Self {
            address,
            routing,
            peers,
            interfaces: BTreeMap::new(),
            replies: Rc::new(RefCell::new(Vec::new())),
            deliveries: Vec::new(),
            stats: NodeStats::default(),
        })
    }

    pub fn address(&self) -> MacAddress {
        self.address
    }

    pub fn routing(&self) -> &R {
        &self.routing
    }

    pub fn routing_mut(&mut self) -> &mut R {
        &mut self.routing
    }

    pub fn peers(&self) -> &PeerLinkManager {
        &self.peers
    }

    pub fn stats(&self) -> &NodeStats {
        &self.stats
    }

    pub fn interfaces(&self) -> impl Iterator<Item = (InterfaceId, MacAddress)> + '_ {
        self.interfaces.iter().map(|(id, addr)| (*id, *addr))
    }

    /// Packets delivered to the upper layer since the last call
    pub fn take_deliveries(&mut self) -> Vec<Delivery> {
        std::mem::take(&mut self.deliveries)
    }

    pub fn install_interface(&mut self, interface: InterfaceId, address: MacAddress) {
        self.interfaces.insert(interface, address);
        self.routing.install_interface(interface, address);
        self.peers.install_interface(interface, address);
    }

    /// Start protocol activity (root announcements)
    pub fn start(&mut self, env: &mut dyn MeshEnvironment) {
        self.routing.start(env);
        self.flush(env);
    }

    fn host<'a>(&'a mut self, env: &'a mut dyn MeshEnvironment) -> (&'a mut PeerLinkManager, LinkHost<'a, R>) {
        (
            &mut self.peers,
            LinkHost {
                env,
                routing: &mut self.routing,
                stats: &mut self.stats,
            },
        )
    }

    /// Observe link status changes in addition to the routing protocol
    pub fn set_peer_link_status_callback(&mut self, callback: PeerLinkStatusCallback) {
        self.peers.set_peer_link_status_callback(callback);
    }

    /// Send a packet originated by this station
    pub fn send(
        &mut self,
        destination: MacAddress,
        packet: DataPacket,
        env: &mut dyn MeshEnvironment,
    ) -> MeshResult<RouteOutcome> {
        self.stats.originated += 1;
        let sink = self.replies.clone();
        let outcome = self.routing.request_route(
            Ingress::Local,
            self.address,
            destination,
            packet,
            ETHERTYPE_IPV4,
            Box::new(move |reply| sink.borrow_mut().push(reply)),
            env,
        );
        if let Ok(RouteOutcome::Dropped(reason)) = outcome {
            self.stats.record_drop(reason);
        }
        self.flush(env);
        outcome
    }

    /// Open a peer link on request
    pub fn active_open(
        &mut self,
        interface: InterfaceId,
        peer: MacAddress,
        env: &mut dyn MeshEnvironment,
    ) -> MeshResult<()> {
        let (peers, mut host) = self.host(env);
        let result = peers.active_open(interface, peer, &mut host);
        self.flush(env);
        result
    }

    /// Tear down a peer link (MLME cancel)
    pub fn cancel_peer_link(
        &mut self,
        interface: InterfaceId,
        peer: MacAddress,
        env: &mut dyn MeshEnvironment,
    ) -> MeshResult<()> {
        let (peers, mut host) = self.host(env);
        let result = peers.cancel_peer_link(interface, peer, PmpReasonCode::PeeringCancelled, &mut host);
        self.flush(env);
        result
    }

    /// Build and transmit a beacon. Returns the delay until the next one,
    /// including any shift requested by collision avoidance.
    pub fn send_beacon(
        &mut self,
        interface: InterfaceId,
        interval: Duration,
        env: &mut dyn MeshEnvironment,
    ) -> MeshResult<Duration> {
        let beacon = self.peers.build_beacon(interface, interval, env.now())?;
        env.send_management_frame(
            interface,
            MacAddress::BROADCAST,
            ManagementFrame {
                mesh_point: self.address,
                body: ManagementBody::Beacon(beacon),
            },
        );
        let shift = self.peers.take_beacon_shift(interface);
        let delay = if shift >= 0 {
            interval + tu(shift.unsigned_abs())
        } else {
            interval.saturating_sub(tu(shift.unsigned_abs()))
        };
        Ok(delay)
    }

    pub fn receive_management_frame(
        &mut self,
        interface: InterfaceId,
        transmitter: MacAddress,
        frame: ManagementFrame,
        link_metric: Metric,
        env: &mut dyn MeshEnvironment,
    ) -> MeshResult<()> {
        let mesh_point = frame.mesh_point;
        let result = match frame.body {
            ManagementBody::Beacon(beacon) => {
                let (peers, mut host) = self.host(env);
                peers.receive_beacon(interface, transmitter, mesh_point, &beacon, &mut host)
            }
            ManagementBody::PeerLink(peer_link) => {
                let (peers, mut host) = self.host(env);
                peers.receive_peer_link_frame(interface, transmitter, mesh_point, &peer_link, &mut host)
            }
            ManagementBody::Routing(routing) => {
                if self.peers.is_active_link(interface, transmitter) {
                    self.routing
                        .receive_routing_frame(interface, transmitter, mesh_point, routing, link_metric, env);
                } else {
                    trace!("{}: {} from non-peer {} dropped", self.address, routing.kind(), transmitter);
                }
                Ok(())
            }
        };
        self.flush(env);
        result
    }

    pub fn receive_data_frame(
        &mut self,
        interface: InterfaceId,
        transmitter: MacAddress,
        frame: DataFrame,
        env: &mut dyn MeshEnvironment,
    ) -> MeshResult<()> {
        if !self.peers.is_active_link(interface, transmitter) {
            trace!("{}: data from non-peer {} dropped", self.address, transmitter);
            self.stats.dropped_not_peer += 1;
            return Ok(());
        }
        if !self.routing.accept_data_frame(interface, transmitter, &frame, env) {
            self.stats.dropped_filtered += 1;
            return Ok(());
        }
        let DataFrame {
            source,
            destination,
            protocol,
            packet,
        } = frame;

        if destination == self.address || destination.is_broadcast() {
            let delivered = self
                .routing
                .remove_routing_stuff(interface, source, destination, packet.clone())?;
            self.stats.delivered += 1;
            self.deliveries.push(Delivery {
                uid: delivered.uid,
                source,
                destination,
                at: env.now(),
                payload_len: delivered.payload.len(),
            });
            if destination == self.address {
                return Ok(());
            }
        }

        let sink = self.replies.clone();
        let outcome = self.routing.request_route(
            Ingress::Interface(interface),
            source,
            destination,
            packet,
            protocol,
            Box::new(move |reply| sink.borrow_mut().push(reply)),
            env,
        )?;
        match outcome {
            RouteOutcome::Dropped(reason) => self.stats.record_drop(reason),
            _ => self.stats.forwarded += 1,
        }
        self.flush(env);
        Ok(())
    }

    /// Dispatch a timer armed by this station
    pub fn handle_timer(&mut self, timer: &Timer, id: TimerId, env: &mut dyn MeshEnvironment) {
        match timer {
            Timer::PeerLink { .. } => {
                let (peers, mut host) = self.host(env);
                peers.handle_timer(timer, id, &mut host);
            }
            _ => self.routing.handle_timer(timer, id, env),
        }
        self.flush(env);
    }

    pub fn transmission_success(&mut self, interface: InterfaceId, peer: MacAddress) {
        self.peers.transmission_success(interface, peer);
    }

    /// A unicast frame to `peer` went unacknowledged
    pub fn transmission_failure(&mut self, interface: InterfaceId, peer: MacAddress, env: &mut dyn MeshEnvironment) {
        let (peers, mut host) = self.host(env);
        peers.transmission_failure(interface, peer, &mut host);
        self.flush(env);
    }

    /// Turn collected route replies into data transmissions
    fn flush(&mut self, env: &mut dyn MeshEnvironment) {
        let replies: Vec<RouteReply> = self.replies.borrow_mut().drain(..).collect();
        for reply in replies {
            if !reply.success {
                warn!(
                    "{}: no route to {}, packet {} dropped",
                    self.address, reply.destination, reply.packet.uid
                );
                self.stats.dropped_no_route += 1;
                continue;
            }
            self.stats.data_frames_sent += 1;
            env.send_data_frame(
                reply.interface,
                reply.receiver,
                DataFrame {
                    source: reply.source,
                    destination: reply.destination,
                    protocol: reply.protocol,
                    packet: reply.packet,
                },
            );
        }
    }
}

impl<R: RoutingProtocol + std::fmt::Debug> std::fmt::Debug for MeshPoint<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeshPoint")
            .field("address", &self.address)
            .field("routing", &self.routing)
            .field("peers", &self.peers)
            .finish()
    }
}
