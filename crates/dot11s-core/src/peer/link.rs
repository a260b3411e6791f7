//! Peer link state machine
//!
//! One [`PeerLink`] per (interface, neighbour). Inputs are received
//! frames, local requests and timer expiries; outputs are the Peer
//! Management elements to transmit and the state transition, returned
//! as a [`LinkOutput`] for the manager to act on.
//!
//! ```text
//!            ACTOPN                 CNF_ACPT
//!   IDLE ──────────────► OPN_SNT ─────────────► CNF_RCVD
//!    │                      │                      │
//!    │ OPN_ACPT             │ OPN_ACPT             │ OPN_ACPT
//!    ▼                      ▼                      ▼
//!   OPN_RCVD ◄──────────────┘                    ESTAB
//!    │ CNF_ACPT                                    ▲
//!    └─────────────────────────────────────────────┘
//!
//!   any non-IDLE ── close / reject / cancel / timeout ──► HOLDING ── TOH / CLS_ACPT ──► IDLE
//! ```

use super::config::PeerLinkConfig;
use crate::address::{InterfaceId, MacAddress};
use crate::ie::{IeBeaconTiming, IeConfiguration, PeerManagement, PmpReasonCode};
use crate::scheduler::{PeerLinkTimer, Timer, TimerId};
use crate::time::SimTime;
use crate::traits::MeshEnvironment;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, trace};

/// Peer link states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PeerState {
    Idle,
    OpnSnt,
    CnfRcvd,
    OpnRcvd,
    Estab,
    Holding,
}

impl PeerState {
    pub const ALL: [PeerState; 6] = [
        PeerState::Idle,
        PeerState::OpnSnt,
        PeerState::CnfRcvd,
        PeerState::OpnRcvd,
        PeerState::Estab,
        PeerState::Holding,
    ];
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PeerState::Idle => "IDLE",
            PeerState::OpnSnt => "OPN_SNT",
            PeerState::CnfRcvd => "CNF_RCVD",
            PeerState::OpnRcvd => "OPN_RCVD",
            PeerState::Estab => "ESTAB",
            PeerState::Holding => "HOLDING",
        };
        f.write_str(name)
    }
}

/// State machine input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerEvent {
    /// CNCL: local cancel, beacon loss, transmission failures
    Cancel(PmpReasonCode),
    /// ACTOPN: local request to open
    ActiveOpen,
    /// REQ_RJCT: refuse a peering request before any state exists
    RequestReject(PmpReasonCode),
    /// CLS_ACPT: valid Close received
    CloseAccept(PmpReasonCode),
    /// OPN_ACPT: acceptable Open received
    OpenAccept,
    /// OPN_RJCT: Open received but refused
    OpenReject(PmpReasonCode),
    /// CNF_ACPT: valid Confirm received
    ConfirmAccept,
    /// CNF_RJCT: Confirm received but refused
    ConfirmReject(PmpReasonCode),
    /// TOR1: retry timer, retries left
    RetryTimeout,
    /// TOR2: retry timer, retries exhausted
    RetryExhausted,
    /// TOC
    ConfirmTimeout,
    /// TOH
    HoldingTimeout,
}

impl PeerEvent {
    /// One instance of every event kind
    pub const ALL: [PeerEvent; 12] = [
        PeerEvent::Cancel(PmpReasonCode::PeeringCancelled),
        PeerEvent::ActiveOpen,
        PeerEvent::RequestReject(PmpReasonCode::MeshMaxPeers),
        PeerEvent::CloseAccept(PmpReasonCode::PeeringCancelled),
        PeerEvent::OpenAccept,
        PeerEvent::OpenReject(PmpReasonCode::MeshCapabilityPolicyViolation),
        PeerEvent::ConfirmAccept,
        PeerEvent::ConfirmReject(PmpReasonCode::MeshCapabilityPolicyViolation),
        PeerEvent::RetryTimeout,
        PeerEvent::RetryExhausted,
        PeerEvent::ConfirmTimeout,
        PeerEvent::HoldingTimeout,
    ];
}

/// Frames to send and the state change caused by one input
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[must_use]
pub struct LinkOutput {
    pub frames: Vec<PeerManagement>,
    pub transition: Option<(PeerState, PeerState)>,
}

impl LinkOutput {
    /// The link entered ESTAB
    pub fn link_up(&self) -> bool {
        matches!(self.transition, Some((from, PeerState::Estab)) if from != PeerState::Estab)
    }

    /// The link left ESTAB
    pub fn link_down(&self) -> bool {
        matches!(self.transition, Some((PeerState::Estab, to)) if to != PeerState::Estab)
    }
}

/// Timing and retry limits of one link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LinkLimits {
    retry: Duration,
    holding: Duration,
    confirm: Duration,
    max_retries: u16,
    max_beacon_loss: u16,
    max_packet_failure: u16,
}

/// Handshake state with one neighbour
#[derive(Debug, Clone)]
pub struct PeerLink {
    interface: InterfaceId,
    peer_address: MacAddress,
    /// Broadcast until the peer's mesh point address is learned
    peer_mesh_point: MacAddress,
    local_link_id: u16,
    /// Zero until the peer's first frame
    peer_link_id: u16,
    local_aid: u16,
    peer_aid: u16,
    state: PeerState,
    retry_counter: u16,
    packet_failures: u16,
    peer_config: Option<IeConfiguration>,
    last_beacon: SimTime,
    beacon_interval: Duration,
    beacon_timing: IeBeaconTiming,
    retry_timer: Option<TimerId>,
    confirm_timer: Option<TimerId>,
    holding_timer: Option<TimerId>,
    beacon_loss_timer: Option<TimerId>,
    limits: LinkLimits,
}

impl PeerLink {
    pub fn new(
        interface: InterfaceId,
        peer_address: MacAddress,
        peer_mesh_point: MacAddress,
        local_link_id: u16,
        local_aid: u16,
        config: &PeerLinkConfig,
    ) -> Self {
        Self {
            interface,
            peer_address,
            peer_mesh_point,
            local_link_id,
            peer_link_id: 0,
            local_aid,
            peer_aid: 0,
            state: PeerState::Idle,
            retry_counter: 0,
            packet_failures: 0,
            peer_config: None,
            last_beacon: Duration::ZERO,
            beacon_interval: Duration::ZERO,
            beacon_timing: IeBeaconTiming::new(),
            retry_timer: None,
            confirm_timer: None,
            holding_timer: None,
            beacon_loss_timer: None,
            limits: LinkLimits {
                retry: config.retry_delay(),
                holding: config.holding_delay(),
                confirm: config.confirm_delay(),
                max_retries: config.max_retries,
                max_beacon_loss: config.max_beacon_loss,
                max_packet_failure: config.max_packet_failure,
            },
        }
    }

    /// Current handshake state
    pub fn state(&self) -> PeerState {
        self.state
    }

    /// Interface the peer is heard on
    pub fn interface(&self) -> InterfaceId {
        self.interface
    }

    /// Interface address of the peer
    pub fn peer_address(&self) -> MacAddress {
        self.peer_address
    }

    /// Mesh point address of the peer, broadcast until learned
    pub fn peer_mesh_point(&self) -> MacAddress {
        self.peer_mesh_point
    }

    /// Link id we chose, carried in our frames
    pub fn local_link_id(&self) -> u16 {
        self.local_link_id
    }

    /// Link id the peer chose, zero until its first frame
    pub fn peer_link_id(&self) -> u16 {
        self.peer_link_id
    }

    /// Association id we gave the peer
    pub fn local_aid(&self) -> u16 {
        self.local_aid
    }

    /// Association id the peer gave us, zero until its Confirm
    pub fn peer_aid(&self) -> u16 {
        self.peer_aid
    }

    /// Opens resent since the handshake started
    pub fn retry_counter(&self) -> u16 {
        self.retry_counter
    }

    /// Last Mesh Configuration the peer advertised
    pub fn peer_config(&self) -> Option<&IeConfiguration> {
        self.peer_config.as_ref()
    }

    /// In ESTAB
    pub fn is_established(&self) -> bool {
        self.state == PeerState::Estab
    }

    pub fn is_idle(&self) -> bool {
        self.state == PeerState::Idle
    }

    /// When the peer's last beacon was heard
    pub fn last_beacon(&self) -> SimTime {
        self.last_beacon
    }

    /// Beacon interval the peer advertised
    pub fn beacon_interval(&self) -> Duration {
        self.beacon_interval
    }

    /// Beacon Timing element last received from the peer
    pub fn beacon_timing(&self) -> &IeBeaconTiming {
        &self.beacon_timing
    }

    pub fn set_beacon_timing(&mut self, timing: IeBeaconTiming) {
        self.beacon_timing = timing;
    }

    /// Record a beacon from the peer and re-arm the beacon loss timer
    pub fn set_beacon_information<E: MeshEnvironment + ?Sized>(
        &mut self,
        last_beacon: SimTime,
        interval: Duration,
        env: &mut E,
    ) {
        self.last_beacon = last_beacon;
        self.beacon_interval = interval;
        Self::clear(&mut self.beacon_loss_timer, env);
        if interval.is_zero() {
            return;
        }
        let delay = interval * u32::from(self.limits.max_beacon_loss);
        self.beacon_loss_timer = Some(self.arm(PeerLinkTimer::BeaconLoss, delay, env));
    }

    pub fn active_open<E: MeshEnvironment + ?Sized>(&mut self, env: &mut E) -> LinkOutput {
        self.state_machine(PeerEvent::ActiveOpen, env)
    }

    pub fn cancel<E: MeshEnvironment + ?Sized>(&mut self, reason: PmpReasonCode, env: &mut E) -> LinkOutput {
        self.state_machine(PeerEvent::Cancel(reason), env)
    }

    pub fn request_reject<E: MeshEnvironment + ?Sized>(&mut self, reason: PmpReasonCode, env: &mut E) -> LinkOutput {
        self.state_machine(PeerEvent::RequestReject(reason), env)
    }

    fn learn_peer(&mut self, local_link_id: u16, config: IeConfiguration, peer_mesh_point: MacAddress) {
        if self.peer_link_id == 0 {
            self.peer_link_id = local_link_id;
        }
        self.peer_config = Some(config);
        if self.peer_mesh_point.is_broadcast() {
            self.peer_mesh_point = peer_mesh_point;
        } else if self.peer_mesh_point != peer_mesh_point {
            debug!(
                "peer {} changed mesh point address {} -> {}, keeping the first",
                self.peer_address, self.peer_mesh_point, peer_mesh_point
            );
        }
    }

    /// Check the link ids of a Confirm or Close. The peer must echo our id
    /// (or zero for Close) and keep using the id it chose first.
    fn link_ids_match(&mut self, local_link_id: u16, peer_link_id: u16, allow_unset: bool) -> bool {
        let echoed = peer_link_id == self.local_link_id || (allow_unset && peer_link_id == 0);
        if !echoed {
            return false;
        }
        if self.peer_link_id == 0 {
            self.peer_link_id = local_link_id;
            true
        } else {
            self.peer_link_id == local_link_id
        }
    }

    pub fn open_accept<E: MeshEnvironment + ?Sized>(
        &mut self,
        local_link_id: u16,
        config: IeConfiguration,
        peer_mesh_point: MacAddress,
        env: &mut E,
    ) -> LinkOutput {
        self.learn_peer(local_link_id, config, peer_mesh_point);
        self.state_machine(PeerEvent::OpenAccept, env)
    }

    pub fn open_reject<E: MeshEnvironment + ?Sized>(
        &mut self,
        local_link_id: u16,
        config: IeConfiguration,
        peer_mesh_point: MacAddress,
        reason: PmpReasonCode,
        env: &mut E,
    ) -> LinkOutput {
        self.learn_peer(local_link_id, config, peer_mesh_point);
        self.state_machine(PeerEvent::OpenReject(reason), env)
    }

    pub fn confirm_accept<E: MeshEnvironment + ?Sized>(
        &mut self,
        local_link_id: u16,
        peer_link_id: u16,
        peer_aid: u16,
        config: IeConfiguration,
        peer_mesh_point: MacAddress,
        env: &mut E,
    ) -> LinkOutput {
        if !self.link_ids_match(local_link_id, peer_link_id, false) {
            trace!("confirm from {} with foreign link ids ignored", self.peer_address);
            return LinkOutput::default();
        }
        self.peer_aid = peer_aid;
        self.learn_peer(local_link_id, config, peer_mesh_point);
        self.state_machine(PeerEvent::ConfirmAccept, env)
    }

    pub fn confirm_reject<E: MeshEnvironment + ?Sized>(
        &mut self,
        local_link_id: u16,
        peer_link_id: u16,
        config: IeConfiguration,
        peer_mesh_point: MacAddress,
        reason: PmpReasonCode,
        env: &mut E,
    ) -> LinkOutput {
        if !self.link_ids_match(local_link_id, peer_link_id, false) {
            return LinkOutput::default();
        }
        self.learn_peer(local_link_id, config, peer_mesh_point);
        self.state_machine(PeerEvent::ConfirmReject(reason), env)
    }

    pub fn close<E: MeshEnvironment + ?Sized>(
        &mut self,
        local_link_id: u16,
        peer_link_id: u16,
        reason: PmpReasonCode,
        env: &mut E,
    ) -> LinkOutput {
        if !self.link_ids_match(local_link_id, peer_link_id, true) {
            trace!("close from {} with foreign link ids ignored", self.peer_address);
            return LinkOutput::default();
        }
        self.state_machine(PeerEvent::CloseAccept(reason), env)
    }

    pub fn transmission_success(&mut self) {
        self.packet_failures = 0;
    }

    /// A unicast frame to the peer was not acknowledged
    pub fn transmission_failure<E: MeshEnvironment + ?Sized>(&mut self, env: &mut E) -> LinkOutput {
        self.packet_failures += 1;
        if self.packet_failures < self.limits.max_packet_failure {
            return LinkOutput::default();
        }
        self.packet_failures = 0;
        debug!("{} consecutive failures to {}", self.limits.max_packet_failure, self.peer_address);
        self.state_machine(PeerEvent::Cancel(PmpReasonCode::PeeringCancelled), env)
    }

    /// Dispatch an expired timer. Firings that do not match the armed
    /// handle are stale and ignored.
    pub fn handle_timer<E: MeshEnvironment + ?Sized>(
        &mut self,
        kind: PeerLinkTimer,
        id: TimerId,
        env: &mut E,
    ) -> LinkOutput {
        let slot = match kind {
            PeerLinkTimer::Retry => &mut self.retry_timer,
            PeerLinkTimer::Confirm => &mut self.confirm_timer,
            PeerLinkTimer::Holding => &mut self.holding_timer,
            PeerLinkTimer::BeaconLoss => &mut self.beacon_loss_timer,
        };
        if *slot != Some(id) {
            return LinkOutput::default();
        }
        *slot = None;
        let event = match kind {
            PeerLinkTimer::Retry if self.retry_counter < self.limits.max_retries => PeerEvent::RetryTimeout,
            PeerLinkTimer::Retry => PeerEvent::RetryExhausted,
            PeerLinkTimer::Confirm => PeerEvent::ConfirmTimeout,
            PeerLinkTimer::Holding => PeerEvent::HoldingTimeout,
            PeerLinkTimer::BeaconLoss => {
                debug!("beacon loss from {}", self.peer_address);
                PeerEvent::Cancel(PmpReasonCode::PeeringCancelled)
            }
        };
        self.state_machine(event, env)
    }

    /// Cancel every pending timer; used before the link is dropped
    pub fn clear_timers<E: MeshEnvironment + ?Sized>(&mut self, env: &mut E) {
        Self::clear(&mut self.retry_timer, env);
        Self::clear(&mut self.confirm_timer, env);
        Self::clear(&mut self.holding_timer, env);
        Self::clear(&mut self.beacon_loss_timer, env);
    }

    /// Feed one event through the transition table
    pub fn state_machine<E: MeshEnvironment + ?Sized>(&mut self, event: PeerEvent, env: &mut E) -> LinkOutput {
        use PeerEvent::*;
        use PeerState::*;

        let from = self.state;
        let mut out = LinkOutput::default();
        match (from, event) {
            (Idle, RequestReject(reason) | OpenReject(reason)) => out.frames.push(self.close_frame(reason)),
            (Idle, ActiveOpen) => {
                self.state = OpnSnt;
                out.frames.push(self.open_frame());
                self.set_retry_timer(env);
            }
            (Idle, OpenAccept) => {
                self.state = OpnRcvd;
                out.frames.push(self.confirm_frame());
                out.frames.push(self.open_frame());
                self.set_retry_timer(env);
            }

            (OpnSnt | OpnRcvd, RetryTimeout) => {
                out.frames.push(self.open_frame());
                self.retry_counter += 1;
                self.set_retry_timer(env);
            }
            (OpnSnt | OpnRcvd, RetryExhausted) => {
                self.enter_holding(PmpReasonCode::MeshMaxRetries, &mut out, env);
            }
            (OpnSnt, ConfirmAccept) => {
                self.state = CnfRcvd;
                Self::clear(&mut self.retry_timer, env);
                self.confirm_timer = Some(self.arm(PeerLinkTimer::Confirm, self.limits.confirm, env));
            }
            (OpnSnt, OpenAccept) => {
                self.state = OpnRcvd;
                out.frames.push(self.confirm_frame());
            }
            (CnfRcvd, OpenAccept) => {
                self.state = Estab;
                Self::clear(&mut self.confirm_timer, env);
                out.frames.push(self.confirm_frame());
            }
            (CnfRcvd, ConfirmTimeout) => {
                self.enter_holding(PmpReasonCode::MeshConfirmTimeout, &mut out, env);
            }
            (OpnRcvd, ConfirmAccept) => {
                self.state = Estab;
                Self::clear(&mut self.retry_timer, env);
            }
            (Estab, OpenAccept) => out.frames.push(self.confirm_frame()),

            (OpnSnt | CnfRcvd | OpnRcvd | Estab, CloseAccept(_)) => {
                self.enter_holding(PmpReasonCode::MeshCloseRcvd, &mut out, env);
            }
            (OpnSnt | CnfRcvd | OpnRcvd | Estab, OpenReject(reason) | ConfirmReject(reason) | Cancel(reason)) => {
                self.enter_holding(reason, &mut out, env);
            }

            (Holding, CloseAccept(_) | HoldingTimeout) => {
                self.clear_timers(env);
                self.state = Idle;
            }
            (Holding, OpenAccept | ConfirmAccept) => {
                out.frames.push(self.close_frame(PmpReasonCode::PeeringCancelled));
            }
            (Holding, OpenReject(reason) | ConfirmReject(reason)) => {
                out.frames.push(self.close_frame(reason));
            }

            // Everything else is ignored in the current state
            _ => {}
        }

        if self.state != from {
            debug!(
                "peer link {} on {}: {} -> {} ({:?})",
                self.peer_address, self.interface, from, self.state, event
            );
            out.transition = Some((from, self.state));
        }
        out
    }

    fn enter_holding<E: MeshEnvironment + ?Sized>(
        &mut self,
        reason: PmpReasonCode,
        out: &mut LinkOutput,
        env: &mut E,
    ) {
        Self::clear(&mut self.retry_timer, env);
        Self::clear(&mut self.confirm_timer, env);
        self.state = PeerState::Holding;
        out.frames.push(self.close_frame(reason));
        self.holding_timer = Some(self.arm(PeerLinkTimer::Holding, self.limits.holding, env));
    }

    fn set_retry_timer<E: MeshEnvironment + ?Sized>(&mut self, env: &mut E) {
        Self::clear(&mut self.retry_timer, env);
        self.retry_timer = Some(self.arm(PeerLinkTimer::Retry, self.limits.retry, env));
    }

    fn arm<E: MeshEnvironment + ?Sized>(&self, kind: PeerLinkTimer, delay: Duration, env: &mut E) -> TimerId {
        env.schedule(
            delay,
            Timer::PeerLink {
                interface: self.interface,
                peer: self.peer_address,
                kind,
            },
        )
    }

    fn clear<E: MeshEnvironment + ?Sized>(slot: &mut Option<TimerId>, env: &mut E) {
        if let Some(id) = slot.take() {
            env.cancel(id);
        }
    }

    fn open_frame(&self) -> PeerManagement {
        PeerManagement::Open {
            local_link_id: self.local_link_id,
        }
    }

    fn confirm_frame(&self) -> PeerManagement {
        PeerManagement::Confirm {
            local_link_id: self.local_link_id,
            peer_link_id: self.peer_link_id,
        }
    }

    fn close_frame(&self, reason: PmpReasonCode) -> PeerManagement {
        PeerManagement::Close {
            local_link_id: self.local_link_id,
            peer_link_id: self.peer_link_id,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestEnv;

    fn link() -> PeerLink {
        PeerLink::new(
            0,
            MacAddress::from_index(2),
            MacAddress::BROADCAST,
            7,
            1,
            &PeerLinkConfig::default(),
        )
    }

    fn cfg() -> IeConfiguration {
        IeConfiguration::default()
    }

    /// Drive a fresh link into `state`
    fn link_in(state: PeerState, env: &mut TestEnv) -> PeerLink {
        let mut l = link();
        let peer = MacAddress::from_index(2);
        match state {
            PeerState::Idle => {}
            PeerState::OpnSnt => {
                let _ = l.active_open(env);
            }
            PeerState::CnfRcvd => {
                let _ = l.active_open(env);
                let _ = l.confirm_accept(9, 7, 3, cfg(), peer, env);
            }
            PeerState::OpnRcvd => {
                let _ = l.open_accept(9, cfg(), peer, env);
            }
            PeerState::Estab => {
                let _ = l.open_accept(9, cfg(), peer, env);
                let _ = l.confirm_accept(9, 7, 3, cfg(), peer, env);
            }
            PeerState::Holding => {
                let _ = l.active_open(env);
                let _ = l.cancel(PmpReasonCode::PeeringCancelled, env);
            }
        }
        assert_eq!(l.state(), state);
        l
    }

    #[test]
    fn test_every_state_event_pair_is_handled() {
        for state in PeerState::ALL {
            for event in PeerEvent::ALL {
                let mut env = TestEnv::new();
                let mut l = link_in(state, &mut env);
                let out = l.state_machine(event, &mut env);
                // ESTAB is never entered from IDLE by a single event
                if state == PeerState::Idle {
                    assert_ne!(l.state(), PeerState::Estab, "{state} + {event:?}");
                }
                if let Some((from, to)) = out.transition {
                    assert_eq!(from, state);
                    assert_eq!(to, l.state());
                    assert_ne!(from, to);
                } else {
                    assert_eq!(l.state(), state, "{state} + {event:?}");
                }
            }
        }
    }

    #[test]
    fn test_active_open_sends_open_and_arms_retry() {
        let mut env = TestEnv::new();
        let mut l = link();
        let out = l.active_open(&mut env);
        assert_eq!(out.frames, vec![PeerManagement::Open { local_link_id: 7 }]);
        assert_eq!(out.transition, Some((PeerState::Idle, PeerState::OpnSnt)));
        assert_eq!(env.queue.len(), 1);
    }

    #[test]
    fn test_passive_open_answers_confirm_then_open() {
        let mut env = TestEnv::new();
        let mut l = link();
        let out = l.open_accept(9, cfg(), MacAddress::from_index(20), &mut env);
        assert_eq!(
            out.frames,
            vec![
                PeerManagement::Confirm {
                    local_link_id: 7,
                    peer_link_id: 9
                },
                PeerManagement::Open { local_link_id: 7 },
            ]
        );
        assert_eq!(l.state(), PeerState::OpnRcvd);
        assert_eq!(l.peer_mesh_point(), MacAddress::from_index(20));
        assert_eq!(l.peer_link_id(), 9);
    }

    #[test]
    fn test_confirm_then_open_establishes() {
        let mut env = TestEnv::new();
        let mut l = link();
        let peer = MacAddress::from_index(2);
        let _ = l.active_open(&mut env);
        let out = l.confirm_accept(9, 7, 4, cfg(), peer, &mut env);
        assert_eq!(l.state(), PeerState::CnfRcvd);
        assert!(out.frames.is_empty());
        let out = l.open_accept(9, cfg(), peer, &mut env);
        assert!(out.link_up());
        assert_eq!(l.peer_aid(), 4);
        assert_eq!(
            out.frames,
            vec![PeerManagement::Confirm {
                local_link_id: 7,
                peer_link_id: 9
            }]
        );
        // Only the beacon loss timer could remain, and none was armed
        assert!(env.queue.is_empty());
    }

    #[test]
    fn test_confirm_with_wrong_link_id_ignored() {
        let mut env = TestEnv::new();
        let mut l = link();
        let _ = l.active_open(&mut env);
        let out = l.confirm_accept(9, 99, 4, cfg(), MacAddress::from_index(2), &mut env);
        assert_eq!(out, LinkOutput::default());
        assert_eq!(l.state(), PeerState::OpnSnt);
    }

    #[test]
    fn test_close_with_other_peer_link_id_ignored() {
        let mut env = TestEnv::new();
        let mut l = link_in(PeerState::Estab, &mut env);
        let out = l.close(10, 7, PmpReasonCode::PeeringCancelled, &mut env);
        assert!(out.transition.is_none());
        let out = l.close(9, 0, PmpReasonCode::PeeringCancelled, &mut env);
        assert!(out.link_down());
        assert_eq!(
            out.frames,
            vec![PeerManagement::Close {
                local_link_id: 7,
                peer_link_id: 9,
                reason: PmpReasonCode::MeshCloseRcvd
            }]
        );
    }

    #[test]
    fn test_retries_exhaust_into_holding_then_idle() {
        let mut env = TestEnv::new();
        let mut l = link();
        let mut opens = l.active_open(&mut env).frames.len();
        let mut states = vec![l.state()];
        while let Some((id, timer)) = env.next_timer() {
            let Timer::PeerLink { kind, .. } = timer else {
                panic!("unexpected timer {timer:?}");
            };
            let out = l.handle_timer(kind, id, &mut env);
            opens += out
                .frames
                .iter()
                .filter(|f| matches!(f, PeerManagement::Open { .. }))
                .count();
            if let Some((_, to)) = out.transition {
                states.push(to);
            }
        }
        assert_eq!(opens, 1 + 4);
        assert_eq!(states, vec![PeerState::OpnSnt, PeerState::Holding, PeerState::Idle]);
        assert_eq!(env.now(), crate::time::tu(40 * 5 + 40));
    }

    #[test]
    fn test_confirm_timeout() {
        let mut env = TestEnv::new();
        let mut l = link_in(PeerState::CnfRcvd, &mut env);
        let (id, timer) = env.next_timer().unwrap();
        assert_eq!(
            timer,
            Timer::PeerLink {
                interface: 0,
                peer: MacAddress::from_index(2),
                kind: PeerLinkTimer::Confirm
            }
        );
        let out = l.handle_timer(PeerLinkTimer::Confirm, id, &mut env);
        assert_eq!(l.state(), PeerState::Holding);
        assert!(matches!(
            out.frames[0],
            PeerManagement::Close {
                reason: PmpReasonCode::MeshConfirmTimeout,
                ..
            }
        ));
    }

    #[test]
    fn test_stale_timer_ignored() {
        let mut env = TestEnv::new();
        let mut l = link();
        let _ = l.active_open(&mut env);
        let (id, _) = env.next_timer().unwrap();
        let _ = l.cancel(PmpReasonCode::PeeringCancelled, &mut env);
        let out = l.handle_timer(PeerLinkTimer::Retry, id, &mut env);
        assert_eq!(out, LinkOutput::default());
        assert_eq!(l.state(), PeerState::Holding);
    }

    #[test]
    fn test_holding_answers_open_with_close() {
        let mut env = TestEnv::new();
        let mut l = link_in(PeerState::Holding, &mut env);
        let out = l.open_accept(9, cfg(), MacAddress::from_index(2), &mut env);
        assert!(out.transition.is_none());
        assert!(matches!(out.frames[0], PeerManagement::Close { .. }));
    }

    #[test]
    fn test_packet_failures_cancel_link() {
        let mut env = TestEnv::new();
        let mut l = link_in(PeerState::Estab, &mut env);
        assert!(l.transmission_failure(&mut env).transition.is_none());
        l.transmission_success();
        assert!(l.transmission_failure(&mut env).transition.is_none());
        let out = l.transmission_failure(&mut env);
        assert!(out.link_down());
    }

    #[test]
    fn test_beacon_loss_cancels_link() {
        let mut env = TestEnv::new();
        let mut l = link_in(PeerState::Estab, &mut env);
        l.set_beacon_information(env.now(), Duration::from_millis(100), &mut env);
        let (id, timer) = env.next_timer().unwrap();
        assert_eq!(env.now(), Duration::from_millis(200));
        let Timer::PeerLink { kind, .. } = timer else {
            panic!("unexpected timer");
        };
        let out = l.handle_timer(kind, id, &mut env);
        assert!(out.link_down());
        assert_eq!(l.state(), PeerState::Holding);
    }
}
