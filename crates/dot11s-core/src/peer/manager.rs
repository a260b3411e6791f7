//! Peer link manager: owns every [`PeerLink`] of a mesh point
//!
//! Inbound peering frames and beacons are dispatched to the link keyed by
//! (interface, neighbour), creating it on first contact. Whatever a link
//! asks for (frames, status changes) is carried out here, and links that
//! return to IDLE are dropped.

use super::beacon::{next_beacon_shift, NeighbourBeacons};
use super::config::PeerLinkConfig;
use super::link::{LinkOutput, PeerLink, PeerState};
use super::stats::PeerStats;
use crate::address::{InterfaceId, MacAddress};
use crate::error::{MeshError, MeshResult};
use crate::frame::{BeaconFrame, ManagementBody, ManagementFrame, PeerLinkFrame};
use crate::ie::{IeBeaconTiming, IeConfiguration, IeMeshId, PeerManagement, PmpReasonCode};
use crate::scheduler::{Timer, TimerId};
use crate::time::{tu, to_tu, SimTime};
use crate::traits::{PeerLinkHost, PeerLinkStatus};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Observer for aggregate link status changes
pub type PeerLinkStatusCallback = Box<dyn FnMut(&PeerLinkStatus)>;

#[derive(Debug, Default)]
struct InterfaceState {
    address: MacAddress,
    links: BTreeMap<MacAddress, PeerLink>,
    beacons: NeighbourBeacons,
    /// Time and interval of our last beacon
    own_beacon: Option<(SimTime, Duration)>,
    /// TU to add to the next beacon time
    pending_shift: i32,
}

pub struct PeerLinkManager {
    address: MacAddress,
    config: PeerLinkConfig,
    mesh_id: IeMeshId,
    local_config: IeConfiguration,
    interfaces: BTreeMap<InterfaceId, InterfaceState>,
    next_link_id: u16,
    next_aid: u16,
    active_links: usize,
    rng: StdRng,
    stats: PeerStats,
    observers: Vec<PeerLinkStatusCallback>,
}

impl fmt::Debug for PeerLinkManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerLinkManager")
            .field("address", &self.address)
            .field("mesh_id", &self.mesh_id)
            .field("interfaces", &self.interfaces)
            .field("active_links", &self.active_links)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl PeerLinkManager {
    pub fn new(address: MacAddress, config: PeerLinkConfig, local_config: IeConfiguration) -> MeshResult<Self> {
        if address.is_group() {
            return Err(MeshError::GroupAddress(address));
        }
        config.validate()?;
        let mesh_id = config.mesh_id_element()?;
        Ok(Self {
            address,
            rng: StdRng::seed_from_u64(config.seed),
            config,
            mesh_id,
            local_config,
            interfaces: BTreeMap::new(),
            next_link_id: 1,
            next_aid: 1,
            active_links: 0,
            stats: PeerStats::default(),
            observers: Vec::new(),
        })
    }

    pub fn address(&self) -> MacAddress {
        self.address
    }

    pub fn config(&self) -> &PeerLinkConfig {
        &self.config
    }

    pub fn mesh_id(&self) -> &IeMeshId {
        &self.mesh_id
    }

    /// Mesh Configuration element we advertise
    pub fn configuration(&self) -> &IeConfiguration {
        &self.local_config
    }

    pub fn stats(&self) -> &PeerStats {
        &self.stats
    }

    pub fn install_interface(&mut self, interface: InterfaceId, address: MacAddress) {
        self.interfaces.insert(
            interface,
            InterfaceState {
                address,
                ..InterfaceState::default()
            },
        );
    }

    /// Register an observer, called on every ESTAB entry and exit
    pub fn set_peer_link_status_callback(&mut self, callback: PeerLinkStatusCallback) {
        self.observers.push(callback);
    }

    pub fn find_peer_link(&self, interface: InterfaceId, peer: MacAddress) -> Option<&PeerLink> {
        self.interfaces.get(&interface)?.links.get(&peer)
    }

    /// True only for links in ESTAB
    pub fn is_active_link(&self, interface: InterfaceId, peer: MacAddress) -> bool {
        self.find_peer_link(interface, peer)
            .is_some_and(PeerLink::is_established)
    }

    /// Established peers on an interface
    pub fn get_peers(&self, interface: InterfaceId) -> Vec<MacAddress> {
        self.interfaces
            .get(&interface)
            .map(|state| {
                state
                    .links
                    .values()
                    .filter(|link| link.is_established())
                    .map(PeerLink::peer_address)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every link on every interface, in any state
    pub fn peer_links(&self) -> impl Iterator<Item = &PeerLink> {
        self.interfaces.values().flat_map(|state| state.links.values())
    }

    /// Number of established links
    pub fn number_of_links(&self) -> usize {
        self.active_links
    }

    pub fn link_state(&self, interface: InterfaceId, peer: MacAddress) -> Option<PeerState> {
        self.find_peer_link(interface, peer).map(PeerLink::state)
    }

    fn is_own_address(&self, address: MacAddress) -> bool {
        address == self.address || self.interfaces.values().any(|state| state.address == address)
    }

    fn should_send_open(&self) -> bool {
        self.active_links < self.config.max_peer_links
    }

    fn should_accept_open(&self, interface: InterfaceId, peer: MacAddress) -> bool {
        self.is_active_link(interface, peer) || self.active_links < self.config.max_peer_links
    }

    fn allocate_link_id(&mut self) -> u16 {
        let id = self.next_link_id;
        self.next_link_id = self.next_link_id.wrapping_add(1).max(1);
        id
    }

    /// Create an IDLE link unless one exists
    fn ensure_link(&mut self, interface: InterfaceId, peer: MacAddress, peer_mesh_point: MacAddress) -> MeshResult<()> {
        if self.find_peer_link(interface, peer).is_some() {
            return Ok(());
        }
        let link_id = self.allocate_link_id();
        let state = self
            .interfaces
            .get_mut(&interface)
            .ok_or(MeshError::UnknownInterface(interface))?;
        let aid = match state.beacons.aid(peer) {
            Some(aid) => aid,
            None => {
                let aid = self.next_aid;
                self.next_aid = self.next_aid.wrapping_add(1).max(1);
                aid
            }
        };
        trace!("{}: new peer link {} to {} on {}", self.address, link_id, peer, interface);
        state.links.insert(
            peer,
            PeerLink::new(interface, peer, peer_mesh_point, link_id, aid, &self.config),
        );
        Ok(())
    }

    /// Run `f` on an existing link and carry out its output. Returns false
    /// if there is no such link.
    fn drive<H, F>(&mut self, interface: InterfaceId, peer: MacAddress, host: &mut H, f: F) -> bool
    where
        H: PeerLinkHost + ?Sized,
        F: FnOnce(&mut PeerLink, &mut H) -> LinkOutput,
    {
        let Some(state) = self.interfaces.get_mut(&interface) else {
            return false;
        };
        let Some(link) = state.links.get_mut(&peer) else {
            return false;
        };
        let out = f(link, &mut *host);
        let local_aid = link.local_aid();
        let peer_mesh_point = link.peer_mesh_point();
        if link.is_idle() {
            link.clear_timers(host);
            state.links.remove(&peer);
            trace!("{}: peer link to {} on {} removed", self.address, peer, interface);
        }
        self.apply(interface, peer, peer_mesh_point, local_aid, out, host);
        true
    }

    fn apply<H: PeerLinkHost + ?Sized>(
        &mut self,
        interface: InterfaceId,
        peer: MacAddress,
        peer_mesh_point: MacAddress,
        local_aid: u16,
        out: LinkOutput,
        host: &mut H,
    ) {
        let up = out.link_up();
        let down = out.link_down();
        for peer_management in out.frames {
            match peer_management {
                PeerManagement::Open { .. } => self.stats.tx_open += 1,
                PeerManagement::Confirm { .. } => self.stats.tx_confirm += 1,
                PeerManagement::Close { .. } => self.stats.tx_close += 1,
            }
            let frame = ManagementFrame {
                mesh_point: self.address,
                body: ManagementBody::PeerLink(PeerLinkFrame {
                    peer_management,
                    aid: local_aid,
                    mesh_id: self.mesh_id.clone(),
                    config: self.local_config,
                }),
            };
            host.send_management_frame(interface, peer, frame);
        }

        if up {
            self.active_links += 1;
            self.stats.links_opened += 1;
            info!("{}: peer link to {} on {} established", self.address, peer, interface);
        } else if down {
            self.active_links = self.active_links.saturating_sub(1);
            self.stats.links_closed += 1;
            info!("{}: peer link to {} on {} closed", self.address, peer, interface);
        } else {
            return;
        }
        let status = PeerLinkStatus {
            mesh_point: self.address,
            peer,
            peer_mesh_point,
            interface,
            up,
        };
        for observer in &mut self.observers {
            observer(&status);
        }
        host.on_peer_link_status(&status);
    }

    /// Dispatch an Open, Confirm or Close from `peer`
    pub fn receive_peer_link_frame<H: PeerLinkHost + ?Sized>(
        &mut self,
        interface: InterfaceId,
        peer: MacAddress,
        peer_mesh_point: MacAddress,
        frame: &PeerLinkFrame,
        host: &mut H,
    ) -> MeshResult<()> {
        if !self.interfaces.contains_key(&interface) {
            return Err(MeshError::UnknownInterface(interface));
        }
        if peer.is_group() {
            return Err(MeshError::GroupAddress(peer));
        }
        let config = frame.config;
        match frame.peer_management {
            PeerManagement::Open { .. } => self.stats.rx_open += 1,
            PeerManagement::Confirm { .. } => self.stats.rx_confirm += 1,
            PeerManagement::Close { .. } => self.stats.rx_close += 1,
        }

        let mismatch = !matches!(frame.peer_management, PeerManagement::Close { .. })
            && (!self.local_config.is_compatible(&config) || frame.mesh_id != self.mesh_id);
        if mismatch {
            warn!(
                "{}: configuration mismatch with {} on {} (mesh id {})",
                self.address,
                peer,
                interface,
                frame.mesh_id.as_str()
            );
            self.stats.config_mismatches += 1;
            host.on_configuration_mismatch(interface, peer);
        }

        match frame.peer_management {
            PeerManagement::Open { local_link_id } => {
                let reject = if mismatch {
                    Some(PmpReasonCode::MeshCapabilityPolicyViolation)
                } else if !self.should_accept_open(interface, peer) {
                    debug!("{}: refusing open from {}, {} links active", self.address, peer, self.active_links);
                    self.stats.rejected_max_peers += 1;
                    Some(PmpReasonCode::MeshMaxPeers)
                } else {
                    None
                };
                self.ensure_link(interface, peer, peer_mesh_point)?;
                self.drive(interface, peer, host, |link, host| match reject {
                    None => link.open_accept(local_link_id, config, peer_mesh_point, host),
                    Some(reason) => link.open_reject(local_link_id, config, peer_mesh_point, reason, host),
                });
            }
            PeerManagement::Confirm {
                local_link_id,
                peer_link_id,
            } => {
                let aid = frame.aid;
                let handled = self.drive(interface, peer, host, |link, host| {
                    if mismatch {
                        link.confirm_reject(
                            local_link_id,
                            peer_link_id,
                            config,
                            peer_mesh_point,
                            PmpReasonCode::MeshCapabilityPolicyViolation,
                            host,
                        )
                    } else {
                        link.confirm_accept(local_link_id, peer_link_id, aid, config, peer_mesh_point, host)
                    }
                });
                if !handled {
                    trace!("{}: confirm from {} without a peer link", self.address, peer);
                    self.stats.dropped_frames += 1;
                }
            }
            PeerManagement::Close {
                local_link_id,
                peer_link_id,
                reason,
            } => {
                debug!("{}: close from {}: {}", self.address, peer, reason);
                let handled = self.drive(interface, peer, host, |link, host| {
                    link.close(local_link_id, peer_link_id, reason, host)
                });
                if !handled {
                    trace!("{}: close from {} without a peer link", self.address, peer);
                    self.stats.dropped_frames += 1;
                }
            }
        }
        Ok(())
    }

    /// Process a neighbour's beacon: record its timing, check for beacon
    /// collisions and open a link to a compatible newcomer.
    pub fn receive_beacon<H: PeerLinkHost + ?Sized>(
        &mut self,
        interface: InterfaceId,
        peer: MacAddress,
        peer_mesh_point: MacAddress,
        beacon: &BeaconFrame,
        host: &mut H,
    ) -> MeshResult<()> {
        if self.is_own_address(peer) {
            return Ok(());
        }
        if peer.is_group() {
            return Err(MeshError::GroupAddress(peer));
        }
        let now = host.now();
        let interval = tu(beacon.interval);
        let state = self
            .interfaces
            .get_mut(&interface)
            .ok_or(MeshError::UnknownInterface(interface))?;
        self.stats.rx_beacon += 1;
        if !self.local_config.is_compatible(&beacon.config) || beacon.mesh_id != self.mesh_id {
            trace!("{}: ignoring beacon of foreign mesh from {}", self.address, peer);
            return Ok(());
        }

        let link = state.links.get(&peer);
        let link_aid = link.map(PeerLink::local_aid);
        // Id the neighbour gave us, known once it confirmed a link
        let own_aid = link.map(PeerLink::peer_aid).filter(|aid| *aid != 0);
        state.beacons.record(peer, now, interval, link_aid, &mut self.next_aid);
        if self.config.beacon_collision_avoidance {
            if let (Some(timing), Some((last, own_interval)), Some(own_aid)) =
                (&beacon.timing, state.own_beacon, own_aid)
            {
                let shift = next_beacon_shift(
                    now,
                    last + own_interval,
                    own_interval,
                    own_aid,
                    timing.units(),
                    self.config.max_beacon_shift,
                    &mut self.rng,
                );
                if shift != 0 {
                    debug!("{}: beacon collision via {}, shifting {} TU", self.address, peer, shift);
                    state.pending_shift = shift;
                    self.stats.beacon_shifts += 1;
                }
            }
        }

        let known = state.links.contains_key(&peer);
        if !known {
            if !beacon.config.capability.accept_peer_links || !self.should_send_open() {
                return Ok(());
            }
            self.ensure_link(interface, peer, peer_mesh_point)?;
        }
        let timing = beacon.timing.clone().unwrap_or_default();
        self.drive(interface, peer, host, |link, host| {
            link.set_beacon_information(now, interval, host);
            link.set_beacon_timing(timing);
            if known {
                LinkOutput::default()
            } else {
                link.active_open(host)
            }
        });
        Ok(())
    }

    /// Local request to open a link to `peer`
    pub fn active_open<H: PeerLinkHost + ?Sized>(
        &mut self,
        interface: InterfaceId,
        peer: MacAddress,
        host: &mut H,
    ) -> MeshResult<()> {
        if peer.is_group() {
            return Err(MeshError::GroupAddress(peer));
        }
        self.ensure_link(interface, peer, MacAddress::BROADCAST)?;
        self.drive(interface, peer, host, |link, host| link.active_open(host));
        Ok(())
    }

    /// Local request to tear a link down
    pub fn cancel_peer_link<H: PeerLinkHost + ?Sized>(
        &mut self,
        interface: InterfaceId,
        peer: MacAddress,
        reason: PmpReasonCode,
        host: &mut H,
    ) -> MeshResult<()> {
        if self.drive(interface, peer, host, |link, host| link.cancel(reason, host)) {
            Ok(())
        } else {
            Err(MeshError::PeerLinkNotFound { interface, peer })
        }
    }

    /// Incompatible configuration learned out of band
    pub fn configuration_mismatch<H: PeerLinkHost + ?Sized>(
        &mut self,
        interface: InterfaceId,
        peer: MacAddress,
        host: &mut H,
    ) {
        warn!("{}: configuration mismatch with {} on {}", self.address, peer, interface);
        self.stats.config_mismatches += 1;
        host.on_configuration_mismatch(interface, peer);
        self.drive(interface, peer, host, |link, host| {
            link.cancel(PmpReasonCode::MeshCapabilityPolicyViolation, host)
        });
    }

    pub fn transmission_success(&mut self, interface: InterfaceId, peer: MacAddress) {
        if let Some(link) = self
            .interfaces
            .get_mut(&interface)
            .and_then(|state| state.links.get_mut(&peer))
        {
            link.transmission_success();
        }
    }

    pub fn transmission_failure<H: PeerLinkHost + ?Sized>(
        &mut self,
        interface: InterfaceId,
        peer: MacAddress,
        host: &mut H,
    ) {
        self.drive(interface, peer, host, |link, host| link.transmission_failure(host));
    }

    /// Dispatch a peer link timer. Returns false for other timers and for
    /// timers of links that no longer exist.
    pub fn handle_timer<H: PeerLinkHost + ?Sized>(&mut self, timer: &Timer, id: TimerId, host: &mut H) -> bool {
        let Timer::PeerLink { interface, peer, kind } = *timer else {
            return false;
        };
        self.drive(interface, peer, host, |link, host| link.handle_timer(kind, id, host))
    }

    /// Beacon Timing element describing the neighbours heard on `interface`
    pub fn beacon_timing_element(&mut self, interface: InterfaceId, now: SimTime) -> Option<IeBeaconTiming> {
        let state = self.interfaces.get_mut(&interface)?;
        Some(state.beacons.timing_element(now))
    }

    /// Record that we beaconed on `interface`
    pub fn notify_beacon_sent(&mut self, interface: InterfaceId, at: SimTime, interval: Duration) {
        if let Some(state) = self.interfaces.get_mut(&interface) {
            state.own_beacon = Some((at, interval));
        }
    }

    /// Build our beacon for `interface` and record it as sent
    pub fn build_beacon(&mut self, interface: InterfaceId, interval: Duration, now: SimTime) -> MeshResult<BeaconFrame> {
        let timing = self
            .beacon_timing_element(interface, now)
            .ok_or(MeshError::UnknownInterface(interface))?;
        self.notify_beacon_sent(interface, now, interval);
        Ok(BeaconFrame {
            interval: to_tu(interval),
            mesh_id: self.mesh_id.clone(),
            config: self.local_config,
            timing: (!timing.is_empty()).then_some(timing),
        })
    }

    /// Pending beacon shift in TU, reset on read
    pub fn take_beacon_shift(&mut self, interface: InterfaceId) -> i32 {
        self.interfaces
            .get_mut(&interface)
            .map(|state| std::mem::take(&mut state.pending_shift))
            .unwrap_or(0)
    }
}
