//! Multi-node mesh simulation
//!
//! Runs a set of [`MeshPoint`]s over a static [`Topology`] on a single
//! discrete-event queue. It models:
//!
//! - Frame delivery to one-hop neighbours after a propagation delay
//! - Unicast acknowledgement: frames to a station that cannot hear us
//!   come back as transmission failures
//! - Random frame loss
//! - Periodic beacons, which drive peer discovery and beacon loss
//! - Link breaks and repairs while the simulation runs
//!
//! ## Example
//!
//! ```ignore
//! use dot11s_core::config::MeshConfig;
//! use dot11s_core::simulation::{MeshSimulator, SimConfig, TopologyKind};
//! use std::time::Duration;
//!
//! let config = SimConfig::default().with_node_count(4).with_topology(TopologyKind::Chain);
//! let mut sim = MeshSimulator::new_hwmp(config, &MeshConfig::default())?;
//! sim.run_until(Duration::from_secs(2), |s| s.all_links_established());
//! let uid = sim.send_data(0, 3, 64)?;
//! sim.run_for(Duration::from_secs(1));
//! assert!(sim.is_delivered(uid));
//! ```

mod topology;
mod trace;

pub use topology::{LinkState, Topology, TopologyKind};
pub use trace::{write_trace, SimEvent, TraceRecord};

use crate::address::{InterfaceId, MacAddress};
use crate::config::MeshConfig;
use crate::error::{MeshError, MeshResult};
use crate::flame::{FlameProtocol, FlameStats};
use crate::frame::{DataFrame, DataPacket, Frame, ManagementFrame};
use crate::hwmp::{HwmpConfig, HwmpProtocol, HwmpStats, RootMode};
use crate::metric::{AirtimeMetric, Metric};
use crate::node::{MeshPoint, NodeStats};
use crate::peer::{PeerLinkConfig, PeerStats};
use crate::scheduler::{EventQueue, Timer, TimerId};
use crate::time::{tu, SimTime};
use crate::traits::{MeshEnvironment, PeerLinkStatus, RoutingProtocol};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// The single radio interface of every simulated node
pub const SIM_INTERFACE: InterfaceId = 0;

/// Simulation configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Number of nodes in the simulation
    pub node_count: usize,
    pub topology: TopologyKind,
    /// PHY rate of every link (bit/s)
    pub link_rate_bps: u64,
    /// Frame error rate assumed by the airtime metric
    pub frame_error_rate: f64,
    /// Probability that a single reception is lost
    pub frame_loss: f64,
    /// Beacon interval in TU
    pub beacon_interval: u32,
    pub propagation_delay_us: u64,
    /// HWMP root node
    pub root: Option<usize>,
    /// Random seed for reproducibility
    pub seed: u64,
    /// Log every transmission in the event trace, not just link and
    /// message events
    pub trace_frames: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            node_count: 5,
            topology: TopologyKind::Chain,
            link_rate_bps: 54_000_000,
            frame_error_rate: 0.0,
            frame_loss: 0.0,
            beacon_interval: 100, // ~102 ms
            propagation_delay_us: 50,
            root: None,
            seed: 42,
            trace_frames: false,
        }
    }
}

impl SimConfig {
    pub fn with_node_count(mut self, count: usize) -> Self {
        self.node_count = count;
        self
    }

    pub fn with_topology(mut self, topology: TopologyKind) -> Self {
        self.topology = topology;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_root(mut self, root: usize) -> Self {
        self.root = Some(root);
        self
    }

    pub fn with_frame_loss(mut self, loss: f64) -> Self {
        self.frame_loss = loss;
        self
    }

    pub fn with_link_rate(mut self, rate_bps: u64) -> Self {
        self.link_rate_bps = rate_bps;
        self
    }

    pub fn with_beacon_interval(mut self, tus: u32) -> Self {
        self.beacon_interval = tus;
        self
    }

    pub fn with_trace_frames(mut self, trace_frames: bool) -> Self {
        self.trace_frames = trace_frames;
        self
    }

    /// Airtime cost of a link built from this configuration
    pub fn link_metric(&self) -> Metric {
        AirtimeMetric::default().calculate(self.link_rate_bps, self.frame_error_rate)
    }

    pub fn propagation_delay(&self) -> Duration {
        Duration::from_micros(self.propagation_delay_us)
    }

    pub fn validate(&self) -> MeshResult<()> {
        if self.node_count == 0 {
            return Err(MeshError::Config("node_count must be greater than 0".into()));
        }
        if self.beacon_interval == 0 {
            return Err(MeshError::Config("beacon_interval must be greater than 0".into()));
        }
        if !(0.0..1.0).contains(&self.frame_loss) {
            return Err(MeshError::Config("frame_loss must be in [0, 1)".into()));
        }
        if let TopologyKind::Grid { width: 0 } = self.topology {
            return Err(MeshError::Config("grid width must be greater than 0".into()));
        }
        Ok(())
    }
}

/// Simulation statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct SimStats {
    /// Messages handed to a node's upper layer for sending
    pub messages_sent: u64,
    /// Unicast messages that reached their destination
    pub messages_delivered: u64,
    pub unicast_sent: u64,
    /// Broadcast copies delivered, summed over receivers
    pub broadcast_receptions: u64,
    pub frames_transmitted: u64,
    pub frames_received: u64,
    pub frames_lost: u64,
    pub management_frames: u64,
    pub data_frames: u64,
    pub transmission_failures: u64,
    pub links_up: u64,
    pub links_down: u64,
    /// Sum of unicast delivery latencies (µs)
    pub total_latency_us: u64,
    /// Per-node statistics
    pub per_node: Vec<NodeStats>,
}

impl SimStats {
    /// Unicast delivery rate (0.0 - 1.0)
    pub fn delivery_rate(&self) -> f64 {
        if self.unicast_sent == 0 {
            0.0
        } else {
            self.messages_delivered as f64 / self.unicast_sent as f64
        }
    }

    /// Average unicast delivery latency (ms)
    pub fn avg_latency_ms(&self) -> f64 {
        if self.messages_delivered == 0 {
            0.0
        } else {
            self.total_latency_us as f64 / self.messages_delivered as f64 / 1000.0
        }
    }

    /// Node statistics summed over all nodes
    pub fn node_totals(&self) -> NodeStats {
        let mut total = NodeStats::default();
        for node in &self.per_node {
            total.merge(node);
        }
        total
    }
}

impl fmt::Display for SimStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Messages:")?;
        writeln!(f, "  Sent: {} ({} unicast)", self.messages_sent, self.unicast_sent)?;
        writeln!(f, "  Delivered: {}", self.messages_delivered)?;
        writeln!(f, "  Delivery rate: {:.1}%", self.delivery_rate() * 100.0)?;
        writeln!(f, "  Avg latency: {:.3} ms", self.avg_latency_ms())?;
        writeln!(f, "  Broadcast receptions: {}", self.broadcast_receptions)?;
        writeln!(f, "Frames:")?;
        writeln!(
            f,
            "  Transmitted: {} (management {}, data {})",
            self.frames_transmitted, self.management_frames, self.data_frames
        )?;
        writeln!(f, "  Received: {}", self.frames_received)?;
        writeln!(f, "  Lost: {}", self.frames_lost)?;
        writeln!(f, "  Unacknowledged unicast: {}", self.transmission_failures)?;
        writeln!(f, "Peer links:")?;
        writeln!(f, "  Up events: {}", self.links_up)?;
        write!(f, "  Down events: {}", self.links_down)?;
        if !self.per_node.is_empty() {
            writeln!(f)?;
            writeln!(f, "Per-node stats:")?;
            for (i, node) in self.per_node.iter().enumerate() {
                writeln!(
                    f,
                    "  Node {:2}: orig={} deliv={} fwd={} no-route={} ttl={} queue={}",
                    i,
                    node.originated,
                    node.delivered,
                    node.forwarded,
                    node.dropped_no_route,
                    node.dropped_ttl,
                    node.dropped_queue
                )?;
            }
        }
        Ok(())
    }
}

/// Scheduled simulator work
#[derive(Debug)]
enum Pending {
    Timer { node: usize, timer: Timer },
    Deliver { from: usize, to: usize, frame: Frame, unicast: bool },
    /// Unicast frame went unacknowledged
    TxFailure { node: usize, peer: MacAddress },
    Beacon { node: usize },
    Send { from: usize, to: Option<usize>, len: usize },
}

struct Outgoing {
    receiver: MacAddress,
    frame: Frame,
}

/// Environment handed to one node while it processes an event
struct NodeEnv<'a> {
    node: usize,
    queue: &'a mut EventQueue<Pending>,
    outbox: &'a mut Vec<Outgoing>,
}

impl MeshEnvironment for NodeEnv<'_> {
    fn now(&self) -> SimTime {
        self.queue.now()
    }

    fn schedule(&mut self, delay: Duration, timer: Timer) -> TimerId {
        self.queue.schedule(delay, Pending::Timer { node: self.node, timer })
    }

    fn cancel(&mut self, id: TimerId) {
        self.queue.cancel(id);
    }

    fn send_management_frame(&mut self, _interface: InterfaceId, receiver: MacAddress, frame: ManagementFrame) {
        self.outbox.push(Outgoing {
            receiver,
            frame: Frame::Management(frame),
        });
    }

    fn send_data_frame(&mut self, _interface: InterfaceId, receiver: MacAddress, frame: DataFrame) {
        self.outbox.push(Outgoing {
            receiver,
            frame: Frame::Data(frame),
        });
    }
}

/// Message tracking for delivery statistics
#[derive(Debug, Clone)]
struct TrackedMessage {
    from: usize,
    to: Option<usize>,
    sent_at: SimTime,
    delivered: bool,
}

/// Address of simulated node `index`
pub fn node_address(index: usize) -> MacAddress {
    MacAddress::from_index(index as u32 + 1)
}

/// Multi-node mesh network simulator
pub struct MeshSimulator<R: RoutingProtocol> {
    config: SimConfig,
    topology: Topology,
    nodes: Vec<MeshPoint<R>>,
    index: HashMap<MacAddress, usize>,
    queue: EventQueue<Pending>,
    rng: StdRng,
    /// Link status changes reported by the nodes' peer managers
    link_events: Rc<RefCell<Vec<PeerLinkStatus>>>,
    tracked: HashMap<u64, TrackedMessage>,
    next_uid: u64,
    started: bool,
    stats: SimStats,
    event_log: Vec<TraceRecord>,
}

impl<R: RoutingProtocol> MeshSimulator<R> {
    /// Create a simulator over `topology`. `factory` builds the routing
    /// protocol of each node from its index and address.
    pub fn new<F>(config: SimConfig, topology: Topology, peer_config: &PeerLinkConfig, mut factory: F) -> MeshResult<Self>
    where
        F: FnMut(usize, MacAddress) -> MeshResult<R>,
    {
        config.validate()?;
        if let Some(root) = config.root {
            if root >= topology.node_count() {
                return Err(MeshError::NodeOutOfRange(root));
            }
        }
        let link_events = Rc::new(RefCell::new(Vec::new()));
        let mut nodes = Vec::with_capacity(topology.node_count());
        let mut index = HashMap::new();
        for i in 0..topology.node_count() {
            let address = node_address(i);
            let routing = factory(i, address)?;
            let peer = peer_config.clone().with_seed(config.seed.wrapping_add(i as u64));
            let mut mp = MeshPoint::new(routing, peer)?;
            mp.install_interface(SIM_INTERFACE, address);
            let sink = link_events.clone();
            mp.set_peer_link_status_callback(Box::new(move |status| sink.borrow_mut().push(*status)));
            nodes.push(mp);
            index.insert(address, i);
        }

        Ok(Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            topology,
            nodes,
            index,
            queue: EventQueue::new(),
            link_events,
            tracked: HashMap::new(),
            next_uid: 1,
            started: false,
            stats: SimStats::default(),
            event_log: Vec::new(),
        })
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, index: usize) -> Option<&MeshPoint<R>> {
        self.nodes.get(index)
    }

    pub fn node_mut(&mut self, index: usize) -> Option<&mut MeshPoint<R>> {
        self.nodes.get_mut(index)
    }

    pub fn nodes(&self) -> &[MeshPoint<R>] {
        &self.nodes
    }

    pub fn node_index(&self, address: MacAddress) -> Option<usize> {
        self.index.get(&address).copied()
    }

    /// Current simulated time
    pub fn now(&self) -> SimTime {
        self.queue.now()
    }

    /// Get event log
    pub fn events(&self) -> &[TraceRecord] {
        &self.event_log
    }

    /// Current statistics, including per-node counters
    pub fn stats(&self) -> SimStats {
        let mut stats = self.stats.clone();
        stats.per_node = self.nodes.iter().map(|n| n.stats().clone()).collect();
        stats
    }

    /// Peer manager counters summed over all nodes
    pub fn peer_stats(&self) -> PeerStats {
        let mut total = PeerStats::default();
        for node in &self.nodes {
            total.merge(node.peers().stats());
        }
        total
    }

    pub fn is_delivered(&self, uid: u64) -> bool {
        self.tracked.get(&uid).is_some_and(|m| m.delivered)
    }

    /// Established peer links, counted once per pair
    pub fn established_links(&self) -> usize {
        self.topology
            .links()
            .filter(|((a, b), _)| self.link_established(*a, *b))
            .count()
    }

    /// Both ends of the radio link a-b are in ESTAB
    pub fn link_established(&self, a: usize, b: usize) -> bool {
        match (self.nodes.get(a), self.nodes.get(b)) {
            (Some(na), Some(nb)) => {
                na.peers().is_active_link(SIM_INTERFACE, node_address(b))
                    && nb.peers().is_active_link(SIM_INTERFACE, node_address(a))
            }
            _ => false,
        }
    }

    /// Every working radio link carries an established peer link
    pub fn all_links_established(&self) -> bool {
        self.topology
            .links()
            .filter(|(_, link)| link.up)
            .all(|((a, b), _)| self.link_established(a, b))
    }

    fn check_node(&self, node: usize) -> MeshResult<()> {
        if node < self.nodes.len() {
            Ok(())
        } else {
            Err(MeshError::NodeOutOfRange(node))
        }
    }

    fn record(&mut self, event: SimEvent) {
        self.event_log.push(TraceRecord::new(self.queue.now(), event));
    }

    /// Start every node and schedule the first beacons at random offsets
    /// within one interval.
    pub fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        info!(
            "starting simulation: {} nodes, {} topology, link metric {}",
            self.nodes.len(),
            self.config.topology,
            self.config.link_metric()
        );
        let interval_us = tu(self.config.beacon_interval).as_micros() as u64;
        for i in 0..self.nodes.len() {
            self.record(SimEvent::NodeStarted {
                node: i,
                address: node_address(i).to_string(),
            });
            self.with_node(i, |mp, env| mp.start(env));
            let offset = Duration::from_micros(self.rng.gen_range(0..interval_us.max(1)));
            self.queue.schedule(offset, Pending::Beacon { node: i });
        }
    }

    /// Process the next event. Returns false when nothing is left to do.
    pub fn step(&mut self) -> bool {
        self.start();
        let Some((_, id, event)) = self.queue.pop() else {
            return false;
        };
        match event {
            Pending::Timer { node, timer } => {
                self.with_node(node, |mp, env| mp.handle_timer(&timer, id, env));
            }
            Pending::Deliver {
                from,
                to,
                frame,
                unicast,
            } => self.deliver(from, to, frame, unicast),
            Pending::TxFailure { node, peer } => {
                self.stats.transmission_failures += 1;
                self.with_node(node, |mp, env| mp.transmission_failure(SIM_INTERFACE, peer, env));
            }
            Pending::Beacon { node } => {
                let interval = tu(self.config.beacon_interval);
                let next = self
                    .with_node(node, |mp, env| mp.send_beacon(SIM_INTERFACE, interval, env))
                    .unwrap_or_else(|e| {
                        warn!("node {}: beacon failed: {}", node, e);
                        interval
                    });
                self.queue.schedule(next, Pending::Beacon { node });
            }
            Pending::Send { from, to, len } => {
                if let Err(e) = self.originate(from, to, len) {
                    warn!("node {}: scheduled message failed: {}", from, e);
                }
            }
        }
        true
    }

    /// Run for `duration` of simulated time
    pub fn run_for(&mut self, duration: Duration) {
        self.start();
        let end = self.queue.now() + duration;
        while self.queue.peek_time().is_some_and(|at| at <= end) {
            self.step();
        }
        self.queue.advance_to(end);
    }

    /// Run until `condition` holds or `max` of simulated time has passed.
    /// Returns whether the condition was met.
    pub fn run_until<F>(&mut self, max: Duration, condition: F) -> bool
    where
        F: Fn(&Self) -> bool,
    {
        self.start();
        let end = self.queue.now() + max;
        if condition(self) {
            return true;
        }
        while self.queue.peek_time().is_some_and(|at| at <= end) {
            self.step();
            if condition(self) {
                return true;
            }
        }
        self.queue.advance_to(end);
        false
    }

    /// Send `len` bytes from one node to another now. Returns the message uid.
    pub fn send_data(&mut self, from: usize, to: usize, len: usize) -> MeshResult<u64> {
        self.check_node(to)?;
        self.start();
        self.originate(from, Some(to), len)
    }

    /// Broadcast `len` bytes from a node now
    pub fn broadcast_data(&mut self, from: usize, len: usize) -> MeshResult<u64> {
        self.start();
        self.originate(from, None, len)
    }

    /// Queue a message for later (`to` of None broadcasts)
    pub fn schedule_message(&mut self, delay: Duration, from: usize, to: Option<usize>, len: usize) -> MeshResult<()> {
        self.check_node(from)?;
        if let Some(to) = to {
            self.check_node(to)?;
        }
        self.queue.schedule(delay, Pending::Send { from, to, len });
        Ok(())
    }

    fn originate(&mut self, from: usize, to: Option<usize>, len: usize) -> MeshResult<u64> {
        self.check_node(from)?;
        let uid = self.next_uid;
        self.next_uid += 1;
        self.tracked.insert(
            uid,
            TrackedMessage {
                from,
                to,
                sent_at: self.queue.now(),
                delivered: false,
            },
        );
        self.stats.messages_sent += 1;
        if to.is_some() {
            self.stats.unicast_sent += 1;
        }
        self.record(SimEvent::MessageSent { uid, from, to });

        let destination = to.map_or(MacAddress::BROADCAST, node_address);
        let payload = vec![(uid & 0xFF) as u8; len];
        let outcome = self.with_node(from, |mp, env| mp.send(destination, DataPacket::new(uid, payload), env))?;
        debug!("node {}: message {} to {} -> {:?}", from, uid, destination, outcome);
        Ok(uid)
    }

    /// Open a peer link from `node` to `peer` on request
    pub fn active_open(&mut self, node: usize, peer: usize) -> MeshResult<()> {
        self.check_node(node)?;
        self.check_node(peer)?;
        self.start();
        self.with_node(node, |mp, env| mp.active_open(SIM_INTERFACE, node_address(peer), env))
    }

    pub fn cancel_peer_link(&mut self, node: usize, peer: usize) -> MeshResult<()> {
        self.check_node(node)?;
        self.check_node(peer)?;
        self.with_node(node, |mp, env| mp.cancel_peer_link(SIM_INTERFACE, node_address(peer), env))
    }

    /// Take the radio link a-b down. Peers notice through beacon loss or
    /// unacknowledged unicast frames.
    pub fn break_link(&mut self, a: usize, b: usize) -> MeshResult<()> {
        if self.topology.break_link(a, b)? {
            debug!("link {}-{} broken", a, b);
            self.record(SimEvent::LinkBroken { a, b });
        }
        Ok(())
    }

    pub fn restore_link(&mut self, a: usize, b: usize) -> MeshResult<()> {
        if self.topology.restore_link(a, b)? {
            debug!("link {}-{} restored", a, b);
            self.record(SimEvent::LinkRestored { a, b });
        }
        Ok(())
    }

    /// Let one node handle an event, then transmit what it sent and
    /// collect what it delivered.
    fn with_node<T, F>(&mut self, node: usize, f: F) -> T
    where
        F: FnOnce(&mut MeshPoint<R>, &mut dyn MeshEnvironment) -> T,
    {
        let mut outbox = Vec::new();
        let result = {
            let mut env = NodeEnv {
                node,
                queue: &mut self.queue,
                outbox: &mut outbox,
            };
            f(&mut self.nodes[node], &mut env)
        };
        self.collect_link_events();
        self.collect_deliveries(node);
        self.transmit(node, outbox);
        result
    }

    fn collect_link_events(&mut self) {
        let statuses: Vec<PeerLinkStatus> = self.link_events.borrow_mut().drain(..).collect();
        for status in statuses {
            let (Some(node), Some(peer)) = (
                self.node_index(status.mesh_point),
                self.node_index(status.peer_mesh_point),
            ) else {
                continue;
            };
            if status.up {
                self.stats.links_up += 1;
            } else {
                self.stats.links_down += 1;
            }
            self.record(SimEvent::PeerLink {
                node,
                peer,
                up: status.up,
            });
        }
    }

    fn collect_deliveries(&mut self, node: usize) {
        for delivery in self.nodes[node].take_deliveries() {
            let Some(message) = self.tracked.get_mut(&delivery.uid) else {
                continue;
            };
            match message.to {
                Some(to) if to == node && !message.delivered => {
                    message.delivered = true;
                    let latency = delivery.at.saturating_sub(message.sent_at);
                    let from = message.from;
                    self.stats.messages_delivered += 1;
                    self.stats.total_latency_us += latency.as_micros() as u64;
                    self.record(SimEvent::MessageDelivered {
                        uid: delivery.uid,
                        from,
                        to: node,
                        latency_us: latency.as_micros() as u64,
                    });
                }
                None => {
                    message.delivered = true;
                    self.stats.broadcast_receptions += 1;
                }
                _ => {}
            }
        }
    }

    fn lost(&mut self) -> bool {
        self.config.frame_loss > 0.0 && self.rng.gen::<f64>() < self.config.frame_loss
    }

    fn transmit(&mut self, from: usize, outbox: Vec<Outgoing>) {
        let delay = self.config.propagation_delay();
        for Outgoing { receiver, frame } in outbox {
            let kind = frame.kind();
            self.stats.frames_transmitted += 1;
            match frame {
                Frame::Management(_) => self.stats.management_frames += 1,
                Frame::Data(_) => self.stats.data_frames += 1,
            }

            if receiver.is_group() {
                if self.config.trace_frames {
                    self.record(SimEvent::FrameSent { from, to: None, kind });
                }
                for to in self.topology.neighbours(from) {
                    if self.lost() {
                        self.frame_lost(from, to, kind, "channel");
                        continue;
                    }
                    self.queue.schedule(
                        delay,
                        Pending::Deliver {
                            from,
                            to,
                            frame: frame.clone(),
                            unicast: false,
                        },
                    );
                }
                continue;
            }

            let Some(to) = self.node_index(receiver) else {
                trace!("node {}: {} to unknown station {}", from, kind, receiver);
                self.stats.frames_lost += 1;
                continue;
            };
            if self.config.trace_frames {
                self.record(SimEvent::FrameSent { from, to: Some(to), kind });
            }
            let reason = if !self.topology.is_up(from, to) {
                Some("no link")
            } else if self.lost() {
                Some("channel")
            } else {
                None
            };
            match reason {
                Some(reason) => {
                    self.frame_lost(from, to, kind, reason);
                    self.queue
                        .schedule(delay * 2, Pending::TxFailure { node: from, peer: receiver });
                }
                None => {
                    self.queue.schedule(
                        delay,
                        Pending::Deliver {
                            from,
                            to,
                            frame,
                            unicast: true,
                        },
                    );
                }
            }
        }
    }

    fn frame_lost(&mut self, from: usize, to: usize, kind: &'static str, reason: &'static str) {
        trace!("{} from node {} to node {} lost: {}", kind, from, to, reason);
        self.stats.frames_lost += 1;
        if self.config.trace_frames {
            self.record(SimEvent::FrameLost { from, to, kind, reason });
        }
    }

    fn deliver(&mut self, from: usize, to: usize, frame: Frame, unicast: bool) {
        let Some(metric) = self.topology.link_metric(from, to) else {
            // Link broke while the frame was in the air
            self.frame_lost(from, to, frame.kind(), "no link");
            if unicast {
                self.queue.schedule(
                    self.config.propagation_delay(),
                    Pending::TxFailure {
                        node: from,
                        peer: node_address(to),
                    },
                );
            }
            return;
        };
        self.stats.frames_received += 1;
        if unicast {
            self.nodes[from].transmission_success(SIM_INTERFACE, node_address(to));
        }
        let transmitter = node_address(from);
        let result = match frame {
            Frame::Management(m) => self.with_node(to, |mp, env| {
                mp.receive_management_frame(SIM_INTERFACE, transmitter, m, metric, env)
            }),
            Frame::Data(d) => self.with_node(to, |mp, env| mp.receive_data_frame(SIM_INTERFACE, transmitter, d, env)),
        };
        if let Err(e) = result {
            warn!("node {}: frame from node {} rejected: {}", to, from, e);
        }
    }
}

impl MeshSimulator<HwmpProtocol> {
    /// HWMP network over the topology described by `config`
    pub fn new_hwmp(config: SimConfig, mesh: &MeshConfig) -> MeshResult<Self> {
        let topology = Topology::build(config.topology, config.node_count, config.link_metric());
        Self::hwmp_with_topology(config, topology, mesh)
    }

    /// HWMP network over an explicit topology. The root node (if any) uses
    /// the configured root mode, or proactive PREQ with PREP when none is
    /// set; every other node is a plain mesh station.
    pub fn hwmp_with_topology(config: SimConfig, topology: Topology, mesh: &MeshConfig) -> MeshResult<Self> {
        mesh.validate()?;
        let root = config.root;
        let seed = config.seed;
        let root_mode = match mesh.hwmp.root_mode {
            RootMode::None => RootMode::ProactivePreq { prep: true },
            mode => mode,
        };
        Self::new(config, topology, &mesh.peer, |i, address| {
            let mode = if root == Some(i) { root_mode } else { RootMode::None };
            let hwmp = HwmpConfig::clone(&mesh.hwmp)
                .with_root_mode(mode)
                .with_seed(seed.wrapping_add(i as u64));
            HwmpProtocol::new(address, hwmp)
        })
    }

    /// Change the root behaviour of a node while running
    pub fn set_root(&mut self, node: usize, mode: RootMode) -> MeshResult<()> {
        self.check_node(node)?;
        self.start();
        self.with_node(node, |mp, env| mp.routing_mut().set_root(mode, env));
        Ok(())
    }

    /// HWMP counters summed over all nodes
    pub fn hwmp_stats(&self) -> HwmpStats {
        let mut total = HwmpStats::default();
        for node in &self.nodes {
            total.merge(node.routing().stats());
        }
        total
    }
}

impl MeshSimulator<FlameProtocol> {
    pub fn new_flame(config: SimConfig, mesh: &MeshConfig) -> MeshResult<Self> {
        let topology = Topology::build(config.topology, config.node_count, config.link_metric());
        Self::flame_with_topology(config, topology, mesh)
    }

    pub fn flame_with_topology(config: SimConfig, topology: Topology, mesh: &MeshConfig) -> MeshResult<Self> {
        mesh.validate()?;
        Self::new(config, topology, &mesh.peer, |_, address| {
            FlameProtocol::new(address, mesh.flame.clone())
        })
    }

    pub fn flame_stats(&self) -> FlameStats {
        let mut total = FlameStats::default();
        for node in &self.nodes {
            total.merge(node.routing().stats());
        }
        total
    }
}

impl<R: RoutingProtocol> fmt::Debug for MeshSimulator<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MeshSimulator")
            .field("nodes", &self.nodes.len())
            .field("now", &self.queue.now())
            .field("pending", &self.queue.len())
            .finish()
    }
}
