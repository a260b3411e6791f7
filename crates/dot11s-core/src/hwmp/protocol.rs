//! HWMP protocol state and the [`RoutingProtocol`] entry points
//!
//! Data path: a packet for a unicast destination is sent at once if a
//! valid path exists, otherwise it is queued and a path discovery is
//! started (PREQ, retried with a growing back-off). Discovery results
//! arrive as PREPs, handled in `discovery.rs`, and release the queue.
//! While a root is known, packets without a reactive path go up the tree
//! towards it instead of waiting.

use super::config::{HwmpConfig, RootMode};
use super::queue::{PacketQueue, QueuedPacket};
use super::rtable::{LookupResult, RoutingTable};
use super::stats::HwmpStats;
use crate::address::{InterfaceId, MacAddress, INTERFACE_ANY};
use crate::error::{MeshError, MeshResult};
use crate::frame::{DataFrame, DataPacket, HwmpTag, RoutingFrame, RoutingHeader};
use crate::ie::{IeConfiguration, IePreq, IeRann, PathSelectionProtocol, PreqTarget};
use crate::metric::Metric;
use crate::scheduler::{Timer, TimerId};
use crate::time::{tu, SimTime};
use crate::traits::{
    DropReason, Ingress, MeshEnvironment, PeerLinkStatus, RouteOutcome, RouteReply,
    RouteReplyCallback, RoutingProtocol,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Path discovery in progress for one destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct Discovery {
    /// Retries sent after the first PREQ
    pub retries: u8,
    pub started_at: SimTime,
    pub timer: TimerId,
}

/// Discovery state of a destination as seen from outside
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryState {
    Idle,
    /// PREQ outstanding, `retries` retransmissions so far
    Pending { retries: u8 },
}

/// HWMP instance of one mesh point
#[derive(Debug)]
pub struct HwmpProtocol {
    pub(super) address: MacAddress,
    pub(super) config: HwmpConfig,
    pub(super) interfaces: BTreeMap<InterfaceId, MacAddress>,
    /// Established peers per interface
    pub(super) neighbours: BTreeMap<InterfaceId, BTreeSet<MacAddress>>,
    pub(super) rtable: RoutingTable,
    pub(super) hwmp_seqno: u32,
    pub(super) preq_id: u32,
    pub(super) data_seqno: u32,
    /// Freshest (seqno, metric) seen per originator
    pub(super) seqno_metric_db: BTreeMap<MacAddress, (u32, Metric)>,
    /// Last broadcast data seqno per source
    pub(super) last_data_seqno: BTreeMap<MacAddress, u32>,
    pub(super) discoveries: BTreeMap<MacAddress, Discovery>,
    pub(super) queue: PacketQueue,
    pub(super) root_timer: Option<TimerId>,
    pub(super) rng: StdRng,
    pub(super) stats: HwmpStats,
}

impl HwmpProtocol {
    pub fn new(address: MacAddress, config: HwmpConfig) -> MeshResult<Self> {
        if address.is_group() {
            return Err(MeshError::GroupAddress(address));
        }
        config.validate()?;
        Ok(Self {
            address,
            queue: PacketQueue::new(config.max_queue_size),
            rng: StdRng::seed_from_u64(config.seed),
            config,
            interfaces: BTreeMap::new(),
            neighbours: BTreeMap::new(),
            rtable: RoutingTable::new(),
            hwmp_seqno: 0,
            preq_id: 0,
            data_seqno: 0,
            seqno_metric_db: BTreeMap::new(),
            last_data_seqno: BTreeMap::new(),
            discoveries: BTreeMap::new(),
            root_timer: None,
            stats: HwmpStats::default(),
        })
    }

    pub fn config(&self) -> &HwmpConfig {
        &self.config
    }

    pub fn stats(&self) -> &HwmpStats {
        &self.stats
    }

    pub fn routing_table(&self) -> &RoutingTable {
        &self.rtable
    }

    pub fn routing_table_mut(&mut self) -> &mut RoutingTable {
        &mut self.rtable
    }

    /// Best path to `destination` at `now`
    pub fn lookup(&self, destination: MacAddress, now: SimTime) -> LookupResult {
        self.rtable.lookup_best(destination, now)
    }

    pub fn discovery_state(&self, destination: MacAddress) -> DiscoveryState {
        match self.discoveries.get(&destination) {
            Some(d) => DiscoveryState::Pending { retries: d.retries },
            None => DiscoveryState::Idle,
        }
    }

    /// Packets waiting for a path
    pub fn queued_packets(&self) -> usize {
        self.queue.len()
    }

    pub fn neighbours(&self, interface: InterfaceId) -> Vec<MacAddress> {
        self.neighbours
            .get(&interface)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub(super) fn is_neighbour(&self, interface: InterfaceId, address: MacAddress) -> bool {
        self.neighbours
            .get(&interface)
            .is_some_and(|set| set.contains(&address))
    }

    pub fn is_root(&self) -> bool {
        self.config.root_mode != RootMode::None
    }

    /// Change root behaviour. The first announcement goes out after a
    /// random delay of up to `random_start` TU.
    pub fn set_root(&mut self, mode: RootMode, env: &mut dyn MeshEnvironment) {
        if let Some(timer) = self.root_timer.take() {
            env.cancel(timer);
        }
        self.config.root_mode = mode;
        if mode != RootMode::None {
            info!("{} becomes root ({:?})", self.address, mode);
            self.schedule_first_announcement(env);
        }
    }

    fn schedule_first_announcement(&mut self, env: &mut dyn MeshEnvironment) {
        let timer = match self.config.root_mode {
            RootMode::None => return,
            RootMode::ProactivePreq { .. } => Timer::ProactivePreq,
            RootMode::Rann => Timer::Rann,
        };
        let max = u64::try_from(tu(self.config.random_start).as_micros()).unwrap_or(u64::MAX);
        let delay = Duration::from_micros(self.rng.gen_range(0..=max));
        debug!("{}: first root announcement in {:?}", self.address, delay);
        self.root_timer = Some(env.schedule(delay, timer));
    }

    pub fn unset_root(&mut self, env: &mut dyn MeshEnvironment) {
        self.set_root(RootMode::None, env);
    }

    pub(super) fn next_hwmp_seqno(&mut self) -> u32 {
        self.hwmp_seqno = self.hwmp_seqno.wrapping_add(1);
        self.hwmp_seqno
    }

    pub(super) fn next_preq_id(&mut self) -> u32 {
        self.preq_id = self.preq_id.wrapping_add(1);
        self.preq_id
    }

    /// Receivers for a flooded frame on `interface`: every established
    /// peer, or the broadcast address once there are `threshold` of them.
    pub(super) fn broadcast_receivers(&self, interface: InterfaceId, threshold: usize) -> Vec<MacAddress> {
        let peers = self.neighbours(interface);
        if peers.is_empty() {
            Vec::new()
        } else if peers.len() >= threshold {
            vec![MacAddress::BROADCAST]
        } else {
            peers
        }
    }

    /// Returns true if a broadcast data frame was already seen
    pub fn drop_data_frame(&mut self, seqno: u32, source: MacAddress) -> bool {
        if source == self.address {
            return true;
        }
        match self.last_data_seqno.get(&source) {
            Some(&last) if last >= seqno => true,
            _ => {
                self.last_data_seqno.insert(source, seqno);
                false
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn forward_unicast(
        &mut self,
        ingress: Ingress,
        source: MacAddress,
        destination: MacAddress,
        mut packet: DataPacket,
        protocol: u16,
        mut tag: HwmpTag,
        mut reply: RouteReplyCallback,
        env: &mut dyn MeshEnvironment,
    ) -> RouteOutcome {
        let now = env.now();
        let path = self.rtable.lookup_best(destination, now);
        if path.is_valid() {
            tag.address = path.retransmitter;
            packet.header = Some(RoutingHeader::Hwmp(tag));
            self.stats.tx_unicast += 1;
            reply(RouteReply {
                success: true,
                packet,
                source,
                destination,
                protocol,
                interface: path.interface,
                receiver: path.retransmitter,
            });
            return RouteOutcome::Sent;
        }

        if let Ingress::Interface(_) = ingress {
            // A forwarding node without a path reports the break upstream
            let mut stale = self.rtable.lookup_reactive_expired(destination, now);
            if !stale.is_valid() {
                stale = self.rtable.lookup_proactive_expired(now);
            }
            if stale.is_valid() {
                let failed = self.rtable.unreachable_destinations(stale.retransmitter, now);
                let error = self.make_path_error(&failed, stale.retransmitter, now);
                self.initiate_path_error(error, env);
            }
            self.stats.dropped_no_route += 1;
            debug!("{}: no path to {}, dropping forwarded packet {}", self.address, destination, packet.uid);
            return RouteOutcome::Dropped(DropReason::NoRoute);
        }

        if self.should_send_preq(destination, env) {
            self.stats.initiated_discoveries += 1;
            debug!("{}: starting path discovery for {}", self.address, destination);
            self.request_destination(destination, env);
        }

        packet.header = Some(RoutingHeader::Hwmp(tag));
        let queued = QueuedPacket {
            packet,
            source,
            destination,
            protocol,
            ingress,
            reply,
        };
        match self.queue.push(queued) {
            Ok(()) => RouteOutcome::Queued,
            Err(rejected) => {
                self.stats.dropped_queue += 1;
                warn!("{}: queue full, dropping packet {} for {}", self.address, rejected.packet.uid, destination);
                RouteOutcome::Dropped(DropReason::QueueFull)
            }
        }
    }

    /// Register a discovery for `destination`. Returns false if one is
    /// already running.
    pub(super) fn should_send_preq(&mut self, destination: MacAddress, env: &mut dyn MeshEnvironment) -> bool {
        if self.discoveries.contains_key(&destination) {
            return false;
        }
        let timer = env.schedule(self.config.retry_delay(0), Timer::PreqRetry { destination });
        self.discoveries.insert(
            destination,
            Discovery {
                retries: 0,
                started_at: env.now(),
                timer,
            },
        );
        true
    }

    /// Send a PREQ for a single target with a fresh originator seqno
    fn request_destination(&mut self, destination: MacAddress, env: &mut dyn MeshEnvironment) {
        let now = env.now();
        let originator_seqno = self.next_hwmp_seqno();
        let preq_id = self.next_preq_id();
        let known = self.rtable.lookup_reactive_expired(destination, now);
        let target_seqno = if known.is_valid() { known.seqnum } else { 0 };
        let mut preq = IePreq::new(
            self.address,
            originator_seqno,
            preq_id,
            self.config.max_ttl,
            self.config.active_path_timeout,
        );
        preq.targets.push(PreqTarget::new(
            destination,
            target_seqno,
            self.config.do_flag,
            self.config.rf_flag,
        ));
        self.send_preq(preq, env);
    }

    pub(super) fn retry_path_discovery(&mut self, destination: MacAddress, env: &mut dyn MeshEnvironment) {
        let now = env.now();
        self.purge_stale_paths(now);
        if self.rtable.lookup_reactive(destination, now).is_valid() {
            self.reactive_path_resolved(destination, env);
            return;
        }
        if self.rtable.lookup_proactive(now).is_valid() {
            self.proactive_path_resolved(env);
            self.discoveries.remove(&destination);
            return;
        }
        let Some(discovery) = self.discoveries.get_mut(&destination) else {
            return;
        };
        discovery.retries += 1;
        let retries = discovery.retries;

        if retries > self.config.max_preq_retries {
            self.discoveries.remove(&destination);
            self.stats.failed_discoveries += 1;
            let dropped = self.queue.take_for(destination);
            warn!(
                "{}: path discovery for {} failed after {} retries, dropping {} packets",
                self.address,
                destination,
                retries - 1,
                dropped.len()
            );
            for mut queued in dropped {
                (queued.reply)(RouteReply {
                    success: false,
                    packet: queued.packet,
                    source: queued.source,
                    destination: queued.destination,
                    protocol: queued.protocol,
                    interface: INTERFACE_ANY,
                    receiver: MacAddress::BROADCAST,
                });
            }
            return;
        }

        debug!("{}: PREQ retry {} for {}", self.address, retries, destination);
        self.request_destination(destination, env);
        let timer = env.schedule(self.config.retry_delay(retries), Timer::PreqRetry { destination });
        if let Some(discovery) = self.discoveries.get_mut(&destination) {
            discovery.timer = timer;
        }
    }

    /// Close the discovery for `destination` and release its queued packets
    /// along the new reactive path.
    pub(super) fn reactive_path_resolved(&mut self, destination: MacAddress, env: &mut dyn MeshEnvironment) {
        let now = env.now();
        let path = self.rtable.lookup_reactive(destination, now);
        if path.is_valid() {
            self.release_queue(destination, path, env);
        }
    }

    /// A tree path was learned from a root announcement: every queued
    /// packet leaves, over its reactive path if one exists and up the tree
    /// otherwise.
    pub(super) fn proactive_path_resolved(&mut self, env: &mut dyn MeshEnvironment) {
        let now = env.now();
        let tree = self.rtable.lookup_proactive(now);
        if !tree.is_valid() {
            return;
        }
        for destination in self.queue.destinations() {
            let path = self.rtable.lookup_best(destination, now);
            if path.is_valid() {
                self.release_queue(destination, path, env);
            }
        }
    }

    /// Forget paths expired for longer than one active path timeout
    pub(super) fn purge_stale_paths(&mut self, now: SimTime) {
        let removed = self.rtable.purge(now, self.config.active_path_lifetime());
        if removed > 0 {
            trace!("{}: purged {} stale paths", self.address, removed);
        }
    }

    fn release_queue(&mut self, destination: MacAddress, path: LookupResult, env: &mut dyn MeshEnvironment) {
        let now = env.now();
        if let Some(discovery) = self.discoveries.remove(&destination) {
            env.cancel(discovery.timer);
            self.stats.resolved_discoveries += 1;
            self.stats.total_discovery_time += now.saturating_sub(discovery.started_at);
            debug!(
                "{}: path to {} via {} (metric {})",
                self.address, destination, path.retransmitter, path.metric
            );
        }
        for mut queued in self.queue.take_for(destination) {
            if let Some(tag) = queued.packet.hwmp_tag_mut() {
                tag.address = path.retransmitter;
            }
            self.stats.tx_unicast += 1;
            (queued.reply)(RouteReply {
                success: true,
                packet: queued.packet,
                source: queued.source,
                destination: queued.destination,
                protocol: queued.protocol,
                interface: path.interface,
                receiver: path.retransmitter,
            });
        }
    }

    /// Send the periodic root announcement and re-arm its timer
    pub(super) fn announce_root(&mut self, env: &mut dyn MeshEnvironment) {
        match self.config.root_mode {
            RootMode::None => {}
            RootMode::ProactivePreq { prep } => {
                let originator_seqno = self.next_hwmp_seqno();
                let preq_id = self.next_preq_id();
                let mut preq = IePreq::new(
                    self.address,
                    originator_seqno,
                    preq_id,
                    self.config.max_ttl,
                    self.config.active_path_timeout,
                );
                preq.need_not_prep = !prep;
                preq.targets.push(PreqTarget::new(MacAddress::BROADCAST, 0, true, false));
                trace!("{}: proactive PREQ seqno {}", self.address, originator_seqno);
                self.send_preq(preq, env);
                let delay = tu(self.config.path_to_root_interval);
                self.root_timer = Some(env.schedule(delay, Timer::ProactivePreq));
            }
            RootMode::Rann => {
                let rann = IeRann {
                    hop_count: 0,
                    ttl: self.config.max_ttl,
                    originator: self.address,
                    originator_seqno: self.next_hwmp_seqno(),
                    interval: self.config.rann_interval,
                    metric: 0,
                };
                trace!("{}: RANN seqno {}", self.address, rann.originator_seqno);
                let sent = self.flood(RoutingFrame::Rann(rann), self.config.unicast_preq_threshold, env);
                self.stats.tx_rann += sent;
                let delay = tu(self.config.rann_interval);
                self.root_timer = Some(env.schedule(delay, Timer::Rann));
            }
        }
    }
}

impl RoutingProtocol for HwmpProtocol {
    fn name(&self) -> &'static str {
        "HWMP"
    }

    fn address(&self) -> MacAddress {
        self.address
    }

    fn configuration(&self) -> IeConfiguration {
        IeConfiguration::for_protocol(PathSelectionProtocol::Hwmp)
    }

    fn install_interface(&mut self, interface: InterfaceId, address: MacAddress) {
        self.interfaces.insert(interface, address);
        self.neighbours.entry(interface).or_default();
    }

    fn start(&mut self, env: &mut dyn MeshEnvironment) {
        if self.is_root() && self.root_timer.is_none() {
            self.schedule_first_announcement(env);
        }
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
        let mut tag = match ingress {
            Ingress::Local => {
                if packet.header.is_some() {
                    return Err(MeshError::UnexpectedRoutingHeader);
                }
                let seqno = if destination.is_broadcast() {
                    self.data_seqno = self.data_seqno.wrapping_add(1);
                    self.data_seqno
                } else {
                    0
                };
                HwmpTag {
                    address: MacAddress::BROADCAST,
                    ttl: self.config.max_ttl,
                    metric: 0,
                    seqno,
                }
            }
            Ingress::Interface(_) => {
                let mut tag = packet
                    .take_hwmp_tag()
                    .ok_or(MeshError::MissingRoutingHeader("HWMP"))?;
                if tag.ttl <= 1 {
                    self.stats.dropped_ttl += 1;
                    trace!("{}: TTL expired for packet {} to {}", self.address, packet.uid, destination);
                    return Ok(RouteOutcome::Dropped(DropReason::TtlExpired));
                }
                tag.ttl -= 1;
                tag
            }
        };

        if destination.is_broadcast() {
            let interfaces: Vec<InterfaceId> = self.interfaces.keys().copied().collect();
            for interface in interfaces {
                for receiver in self.broadcast_receivers(interface, self.config.unicast_data_threshold) {
                    tag.address = receiver;
                    let mut copy = packet.clone();
                    copy.header = Some(RoutingHeader::Hwmp(tag));
                    self.stats.tx_broadcast += 1;
                    reply(RouteReply {
                        success: true,
                        packet: copy,
                        source,
                        destination,
                        protocol,
                        interface,
                        receiver,
                    });
                }
            }
            return Ok(RouteOutcome::Sent);
        }

        Ok(self.forward_unicast(ingress, source, destination, packet, protocol, tag, reply, env))
    }

    fn remove_routing_stuff(
        &mut self,
        _interface: InterfaceId,
        _source: MacAddress,
        _destination: MacAddress,
        mut packet: DataPacket,
    ) -> MeshResult<DataPacket> {
        packet
            .take_hwmp_tag()
            .ok_or(MeshError::MissingRoutingHeader("HWMP"))?;
        Ok(packet)
    }

    fn accept_data_frame(
        &mut self,
        _interface: InterfaceId,
        _transmitter: MacAddress,
        frame: &DataFrame,
        _env: &mut dyn MeshEnvironment,
    ) -> bool {
        let Some(tag) = frame.packet.hwmp_tag() else {
            return false;
        };
        if !frame.destination.is_broadcast() {
            return true;
        }
        let seqno = tag.seqno;
        if self.drop_data_frame(seqno, frame.source) {
            self.stats.dropped_duplicate += 1;
            return false;
        }
        true
    }

    fn receive_routing_frame(
        &mut self,
        interface: InterfaceId,
        transmitter: MacAddress,
        mesh_point: MacAddress,
        frame: RoutingFrame,
        link_metric: Metric,
        env: &mut dyn MeshEnvironment,
    ) {
        if !self.is_neighbour(interface, transmitter) {
            debug!("{}: ignoring {} from non-peer {}", self.address, frame.kind(), transmitter);
            return;
        }
        match frame {
            RoutingFrame::Preq(preq) => self.receive_preq(preq, transmitter, interface, mesh_point, link_metric, env),
            RoutingFrame::Prep(prep) => self.receive_prep(prep, transmitter, interface, mesh_point, link_metric, env),
            RoutingFrame::Perr(perr) => self.receive_perr(perr, transmitter, env),
            RoutingFrame::Rann(rann) => self.receive_rann(rann, transmitter, interface, mesh_point, link_metric, env),
        }
    }

    fn peer_link_status(&mut self, status: &PeerLinkStatus, env: &mut dyn MeshEnvironment) {
        if status.up {
            debug!("{}: peer {} up on interface {}", self.address, status.peer, status.interface);
            self.neighbours.entry(status.interface).or_default().insert(status.peer);
            return;
        }
        if let Some(set) = self.neighbours.get_mut(&status.interface) {
            set.remove(&status.peer);
        }
        let now = env.now();
        let failed = self.rtable.unreachable_destinations(status.peer, now);
        info!(
            "{}: peer {} down, {} destinations unreachable",
            self.address,
            status.peer,
            failed.len()
        );
        let error = self.make_path_error(&failed, status.peer, now);
        self.initiate_path_error(error, env);
    }

    fn handle_timer(&mut self, timer: &Timer, id: TimerId, env: &mut dyn MeshEnvironment) {
        match timer {
            Timer::PreqRetry { destination } => {
                if self.discoveries.get(destination).map(|d| d.timer) == Some(id) {
                    self.retry_path_discovery(*destination, env);
                }
            }
            Timer::ProactivePreq | Timer::Rann => {
                if self.root_timer == Some(id) {
                    self.root_timer = None;
                    self.purge_stale_paths(env.now());
                    self.announce_root(env);
                }
            }
            Timer::PeerLink { .. } => {}
        }
    }
}
