//! FLAME path selection
//!
//! No control frames: every data frame carries a [`FlameHeader`], and
//! each station learns the path back to the originator from the frames it
//! receives. Unicast data goes to the learned next hop; when no path is
//! known, or the originator's broadcast interval has elapsed, the frame is
//! broadcast so that every station refreshes its path to the source.

use super::header::FlameHeader;
use super::rtable::FlameRtable;
use crate::address::{InterfaceId, MacAddress};
use crate::error::{MeshError, MeshResult};
use crate::frame::{DataFrame, DataPacket, RoutingHeader};
use crate::ie::{IeConfiguration, PathSelectionProtocol};
use crate::time::SimTime;
use crate::traits::{
    DropReason, Ingress, MeshEnvironment, PeerLinkStatus, RouteOutcome, RouteReply, RouteReplyCallback,
    RoutingProtocol,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tracing::{debug, trace};

/// FLAME parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlameConfig {
    /// Unicast data is broadcast at least this often (ms)
    pub broadcast_interval_ms: u64,
    /// Frames that travelled this many hops are not forwarded
    pub max_cost: u8,
    /// Path lifetime (ms)
    pub path_lifetime_ms: u64,
}

impl Default for FlameConfig {
    fn default() -> Self {
        Self {
            broadcast_interval_ms: 5_000,
            max_cost: 32,
            path_lifetime_ms: 120_000,
        }
    }
}

impl FlameConfig {
    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_millis(self.broadcast_interval_ms)
    }

    pub fn path_lifetime(&self) -> Duration {
        Duration::from_millis(self.path_lifetime_ms)
    }

    pub fn validate(&self) -> MeshResult<()> {
        if self.max_cost == 0 {
            return Err(MeshError::Config("max_cost must be greater than 0".into()));
        }
        if self.path_lifetime_ms == 0 {
            return Err(MeshError::Config("path_lifetime_ms must be greater than 0".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlameStats {
    pub tx_unicast: u64,
    pub tx_broadcast: u64,
    /// Unicast data broadcast because the interval elapsed
    pub forced_broadcasts: u64,
    pub dropped_cost: u64,
    pub dropped_duplicate: u64,
    pub dropped_own: u64,
}

impl FlameStats {
    pub fn total_dropped(&self) -> u64 {
        self.dropped_cost + self.dropped_duplicate + self.dropped_own
    }

    pub fn merge(&mut self, other: &FlameStats) {
        self.tx_unicast += other.tx_unicast;
        self.tx_broadcast += other.tx_broadcast;
        self.forced_broadcasts += other.forced_broadcasts;
        self.dropped_cost += other.dropped_cost;
        self.dropped_duplicate += other.dropped_duplicate;
        self.dropped_own += other.dropped_own;
    }
}

impl fmt::Display for FlameStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "  Data  unicast={} broadcast={} forced-broadcast={}",
            self.tx_unicast, self.tx_broadcast, self.forced_broadcasts
        )?;
        write!(
            f,
            "  Drops cost={} duplicate={} own={}",
            self.dropped_cost, self.dropped_duplicate, self.dropped_own
        )
    }
}

/// FLAME instance of one mesh point
#[derive(Debug)]
pub struct FlameProtocol {
    address: MacAddress,
    config: FlameConfig,
    interfaces: BTreeMap<InterfaceId, MacAddress>,
    rtable: FlameRtable,
    seqno: u16,
    last_broadcast: SimTime,
    stats: FlameStats,
}

impl FlameProtocol {
    pub fn new(address: MacAddress, config: FlameConfig) -> MeshResult<Self> {
        if address.is_group() {
            return Err(MeshError::GroupAddress(address));
        }
        config.validate()?;
        Ok(Self {
            address,
            rtable: FlameRtable::new(config.path_lifetime()),
            config,
            interfaces: BTreeMap::new(),
            seqno: 0,
            last_broadcast: Duration::ZERO,
            stats: FlameStats::default(),
        })
    }

    pub fn config(&self) -> &FlameConfig {
        &self.config
    }

    pub fn stats(&self) -> &FlameStats {
        &self.stats
    }

    pub fn routing_table(&self) -> &FlameRtable {
        &self.rtable
    }

    fn next_seqno(&mut self) -> u16 {
        // zero means "no path" in lookups
        self.seqno = self.seqno.wrapping_add(1).max(1);
        self.seqno
    }

    fn broadcast(
        &mut self,
        source: MacAddress,
        destination: MacAddress,
        packet: DataPacket,
        protocol: u16,
        header: FlameHeader,
        reply: &mut RouteReplyCallback,
    ) {
        let interfaces: Vec<InterfaceId> = self.interfaces.keys().copied().collect();
        for interface in interfaces {
            let mut copy = packet.clone();
            copy.header = Some(RoutingHeader::Flame(header));
            self.stats.tx_broadcast += 1;
            reply(RouteReply {
                success: true,
                packet: copy,
                source,
                destination,
                protocol,
                interface,
                receiver: MacAddress::BROADCAST,
            });
        }
    }
}

impl RoutingProtocol for FlameProtocol {
    fn name(&self) -> &'static str {
        "FLAME"
    }

    fn address(&self) -> MacAddress {
        self.address
    }

    fn configuration(&self) -> IeConfiguration {
        IeConfiguration::for_protocol(PathSelectionProtocol::Flame)
    }

    fn install_interface(&mut self, interface: InterfaceId, address: MacAddress) {
        self.interfaces.insert(interface, address);
    }

    fn request_route(
        &mut self,
        ingress: Ingress,
        source: MacAddress,
        destination: MacAddress,
        mut packet: DataPacket,
        protocol: u16,
        mut reply: RouteReplyCallback,
        env: &mut dyn MeshEnvironment,
    ) -> MeshResult<RouteOutcome> {
        let now = env.now();
        let mut force_broadcast = destination.is_broadcast();
        let header = match ingress {
            Ingress::Local => {
                if packet.header.is_some() {
                    return Err(MeshError::UnexpectedRoutingHeader);
                }
                let mut header = FlameHeader::new(source, destination, self.next_seqno(), protocol);
                header.add_cost(1);
                if !force_broadcast && now >= self.last_broadcast + self.config.broadcast_interval() {
                    trace!("{}: broadcast interval elapsed, flooding packet {}", self.address, packet.uid);
                    self.stats.forced_broadcasts += 1;
                    force_broadcast = true;
                }
                if force_broadcast {
                    self.last_broadcast = now;
                }
                header
            }
            Ingress::Interface(_) => {
                let mut header = packet
                    .take_flame_header()
                    .ok_or(MeshError::MissingRoutingHeader("FLAME"))?;
                if header.cost >= self.config.max_cost {
                    self.stats.dropped_cost += 1;
                    trace!("{}: packet {} reached max cost {}", self.address, packet.uid, header.cost);
                    return Ok(RouteOutcome::Dropped(DropReason::TtlExpired));
                }
                header.add_cost(1);
                header
            }
        };

        let route = self.rtable.lookup(destination, now);
        if force_broadcast || !route.is_valid() {
            self.broadcast(source, destination, packet, protocol, header, &mut reply);
            return Ok(RouteOutcome::Sent);
        }
        packet.header = Some(RoutingHeader::Flame(header));
        self.stats.tx_unicast += 1;
        reply(RouteReply {
            success: true,
            packet,
            source,
            destination,
            protocol,
            interface: route.interface,
            receiver: route.retransmitter,
        });
        Ok(RouteOutcome::Sent)
    }

    fn remove_routing_stuff(
        &mut self,
        _interface: InterfaceId,
        _source: MacAddress,
        _destination: MacAddress,
        mut packet: DataPacket,
    ) -> MeshResult<DataPacket> {
        packet
            .take_flame_header()
            .ok_or(MeshError::MissingRoutingHeader("FLAME"))?;
        Ok(packet)
    }

    /// Learn the path back to the originator, dropping our own frames and
    /// anything not newer than what was already seen from that source.
    fn accept_data_frame(
        &mut self,
        interface: InterfaceId,
        transmitter: MacAddress,
        frame: &DataFrame,
        env: &mut dyn MeshEnvironment,
    ) -> bool {
        let Some(header) = frame.packet.flame_header().copied() else {
            return false;
        };
        if header.orig_src == self.address {
            self.stats.dropped_own += 1;
            return false;
        }
        let now = env.now();
        let known = self.rtable.lookup(header.orig_src, now);
        if known.is_valid() && known.seqnum >= header.seqno {
            self.stats.dropped_duplicate += 1;
            return false;
        }
        self.rtable
            .add_path(header.orig_src, transmitter, interface, header.cost, header.seqno, now);
        true
    }

    fn peer_link_status(&mut self, status: &PeerLinkStatus, _env: &mut dyn MeshEnvironment) {
        if status.up {
            return;
        }
        let gone = self.rtable.delete_paths_via(status.peer);
        debug!("{}: peer {} down, dropped {} paths", self.address, status.peer, gone.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::ETHERTYPE_IPV4;
    use crate::testing::TestEnv;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn addr(i: u32) -> MacAddress {
        MacAddress::from_index(i)
    }

    fn node(i: u32) -> FlameProtocol {
        let mut flame = FlameProtocol::new(addr(i), FlameConfig::default()).unwrap();
        flame.install_interface(0, addr(i));
        flame
    }

    fn collector() -> (Rc<RefCell<Vec<RouteReply>>>, RouteReplyCallback) {
        let replies = Rc::new(RefCell::new(Vec::new()));
        let sink = replies.clone();
        (replies, Box::new(move |r| sink.borrow_mut().push(r)))
    }

    fn frame_from(src: u32, dst: MacAddress, seqno: u16, cost: u8) -> DataFrame {
        let mut header = FlameHeader::new(addr(src), dst, seqno, ETHERTYPE_IPV4);
        header.add_cost(cost);
        let mut packet = DataPacket::new(1, vec![0; 8]);
        packet.header = Some(RoutingHeader::Flame(header));
        DataFrame {
            source: addr(src),
            destination: dst,
            protocol: ETHERTYPE_IPV4,
            packet,
        }
    }

    fn send_local(flame: &mut FlameProtocol, dst: MacAddress, env: &mut TestEnv) -> Vec<RouteReply> {
        let (replies, reply) = collector();
        let outcome = flame
            .request_route(
                Ingress::Local,
                flame.address(),
                dst,
                DataPacket::new(7, vec![1, 2, 3]),
                ETHERTYPE_IPV4,
                reply,
                env,
            )
            .unwrap();
        assert_eq!(outcome, RouteOutcome::Sent);
        let out = replies.borrow().clone();
        out
    }

    #[test]
    fn test_unknown_destination_is_broadcast() {
        let mut env = TestEnv::new();
        let mut a = node(1);
        env.advance(Duration::from_millis(10));
        let replies = send_local(&mut a, addr(9), &mut env);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].receiver, MacAddress::BROADCAST);
        let header = replies[0].packet.flame_header().copied().unwrap();
        assert_eq!((header.cost, header.seqno), (1, 1));
    }

    #[test]
    fn test_learned_path_is_used_until_broadcast_interval() {
        let mut env = TestEnv::new();
        let mut a = node(1);
        env.advance(Duration::from_millis(10));
        assert!(a.accept_data_frame(0, addr(2), &frame_from(9, addr(1), 4, 2), &mut env));
        let replies = send_local(&mut a, addr(9), &mut env);
        assert_eq!(replies[0].receiver, addr(2));
        assert_eq!(a.stats().tx_unicast, 1);

        env.advance(Duration::from_secs(5));
        let replies = send_local(&mut a, addr(9), &mut env);
        assert_eq!(replies[0].receiver, MacAddress::BROADCAST);
        assert_eq!(a.stats().forced_broadcasts, 1);
    }

    #[test]
    fn test_duplicates_and_own_frames_dropped() {
        let mut env = TestEnv::new();
        let mut a = node(1);
        let frame = frame_from(9, MacAddress::BROADCAST, 4, 2);
        assert!(a.accept_data_frame(0, addr(2), &frame, &mut env));
        assert!(!a.accept_data_frame(0, addr(3), &frame, &mut env));
        assert!(!a.accept_data_frame(0, addr(3), &frame_from(1, addr(5), 1, 1), &mut env));
        assert_eq!(a.stats().dropped_duplicate, 1);
        assert_eq!(a.stats().dropped_own, 1);
        assert_eq!(a.routing_table().lookup(addr(9), env.now()).retransmitter, addr(2));
    }

    #[test]
    fn test_forwarding_adds_cost_and_stops_at_max() {
        let mut env = TestEnv::new();
        let mut a = node(1);
        let (replies, reply) = collector();
        let frame = frame_from(9, addr(5), 4, 3);
        let outcome = a
            .request_route(Ingress::Interface(0), addr(9), addr(5), frame.packet, ETHERTYPE_IPV4, reply, &mut env)
            .unwrap();
        assert_eq!(outcome, RouteOutcome::Sent);
        assert_eq!(replies.borrow()[0].packet.flame_header().unwrap().cost, 4);

        let (_, reply) = collector();
        let frame = frame_from(9, addr(5), 5, 32);
        let outcome = a
            .request_route(Ingress::Interface(0), addr(9), addr(5), frame.packet, ETHERTYPE_IPV4, reply, &mut env)
            .unwrap();
        assert_eq!(outcome, RouteOutcome::Dropped(DropReason::TtlExpired));
    }

    #[test]
    fn test_link_down_forgets_paths() {
        let mut env = TestEnv::new();
        let mut a = node(1);
        assert!(a.accept_data_frame(0, addr(2), &frame_from(9, addr(1), 1, 2), &mut env));
        a.peer_link_status(
            &PeerLinkStatus {
                mesh_point: addr(1),
                peer: addr(2),
                peer_mesh_point: addr(2),
                interface: 0,
                up: false,
            },
            &mut env,
        );
        assert!(a.routing_table().is_empty());
    }

    #[test]
    fn test_header_handling_errors() {
        let mut env = TestEnv::new();
        let mut a = node(1);
        let (_, reply) = collector();
        let frame = frame_from(9, addr(5), 1, 1);
        let err = a
            .request_route(Ingress::Local, addr(1), addr(5), frame.packet.clone(), ETHERTYPE_IPV4, reply, &mut env)
            .unwrap_err();
        assert_eq!(err, MeshError::UnexpectedRoutingHeader);
        let stripped = a.remove_routing_stuff(0, addr(9), addr(5), frame.packet).unwrap();
        assert!(stripped.header.is_none());
        assert!(a
            .remove_routing_stuff(0, addr(9), addr(5), DataPacket::new(1, vec![]))
            .is_err());
    }
}
