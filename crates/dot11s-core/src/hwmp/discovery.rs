//! Path selection frame handling: PREQ, PREP, PERR and RANN

use super::protocol::HwmpProtocol;
use crate::address::{InterfaceId, MacAddress};
use crate::frame::{ManagementFrame, RoutingFrame};
use crate::ie::{FailedDestination, IePerr, IePrep, IePreq, IeRann};
use crate::metric::Metric;
use crate::time::{to_tu, tu, SimTime};
use crate::traits::MeshEnvironment;
use tracing::{debug, trace};

/// Destinations to invalidate and the precursors that must hear about it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(super) struct PathError {
    pub destinations: Vec<FailedDestination>,
    pub receivers: Vec<(InterfaceId, MacAddress)>,
}

impl HwmpProtocol {
    /// Seqno/metric filter shared by PREQ, PREP and RANN.
    ///
    /// Returns `None` to drop the element, otherwise whether it carries a
    /// newer sequence number than anything seen from `originator`. With
    /// `drop_equal_worse` an element repeating the known seqno is dropped
    /// unless it brings a strictly better metric.
    fn check_freshness(
        &mut self,
        originator: MacAddress,
        seqno: u32,
        metric: Metric,
        drop_equal_worse: bool,
    ) -> Option<bool> {
        if let Some(&(known_seqno, known_metric)) = self.seqno_metric_db.get(&originator) {
            if known_seqno > seqno {
                return None;
            }
            if known_seqno == seqno && drop_equal_worse && known_metric <= metric {
                return None;
            }
            self.seqno_metric_db.insert(originator, (seqno, metric));
            return Some(known_seqno != seqno);
        }
        self.seqno_metric_db.insert(originator, (seqno, metric));
        Some(true)
    }

    /// Keep a one-hop path to the neighbouring mesh point alive
    #[allow(clippy::too_many_arguments)]
    fn refresh_neighbour_path(
        &mut self,
        mesh_point: MacAddress,
        transmitter: MacAddress,
        interface: InterfaceId,
        link_metric: Metric,
        lifetime: std::time::Duration,
        now: SimTime,
        env: &mut dyn MeshEnvironment,
    ) {
        let current = self.rtable.lookup_reactive(mesh_point, now);
        if current.is_valid() && current.metric <= link_metric {
            return;
        }
        let seqnum = self.rtable.lookup_reactive_expired(mesh_point, now).seqnum;
        if self
            .rtable
            .add_reactive_path(mesh_point, transmitter, interface, link_metric, lifetime, seqnum, now)
        {
            self.reactive_path_resolved(mesh_point, env);
        }
    }

    pub(super) fn receive_preq(
        &mut self,
        mut preq: IePreq,
        from: MacAddress,
        interface: InterfaceId,
        from_mp: MacAddress,
        link_metric: Metric,
        env: &mut dyn MeshEnvironment,
    ) {
        self.stats.rx_preq += 1;
        if preq.originator == self.address {
            return;
        }
        preq.increment_metric(link_metric);
        let now = env.now();
        let Some(fresh) = self.check_freshness(preq.originator, preq.originator_seqno, preq.metric, true) else {
            trace!("{}: stale PREQ from {} seqno {}", self.address, preq.originator, preq.originator_seqno);
            return;
        };
        if fresh {
            self.purge_stale_paths(now);
        }
        let lifetime = tu(preq.lifetime);

        let reverse = self.rtable.lookup_reactive(preq.originator, now);
        if (fresh || !reverse.is_valid() || reverse.metric > preq.metric)
            && self.rtable.add_reactive_path(
                preq.originator,
                from,
                interface,
                preq.metric,
                lifetime,
                preq.originator_seqno,
                now,
            )
        {
            self.reactive_path_resolved(preq.originator, env);
        }
        self.refresh_neighbour_path(from_mp, from, interface, link_metric, lifetime, now, env);

        let mut remaining = Vec::with_capacity(preq.targets.len());
        for mut target in std::mem::take(&mut preq.targets) {
            if target.address.is_broadcast() {
                if self.rtable.add_proactive_path(
                    preq.metric,
                    preq.originator,
                    from,
                    interface,
                    lifetime,
                    preq.originator_seqno,
                    now,
                ) {
                    self.proactive_path_resolved(env);
                }
                if !preq.need_not_prep {
                    let prep = IePrep {
                        hop_count: 0,
                        ttl: self.config.max_ttl,
                        target: self.address,
                        target_seqno: self.next_hwmp_seqno(),
                        lifetime: preq.lifetime,
                        metric: 0,
                        requester: preq.originator,
                        requester_seqno: preq.originator_seqno,
                    };
                    self.send_prep(prep, interface, from, env);
                }
                remaining.push(target);
                continue;
            }

            if target.address == self.address {
                let prep = IePrep {
                    hop_count: 0,
                    ttl: self.config.max_ttl,
                    target: self.address,
                    target_seqno: self.next_hwmp_seqno(),
                    lifetime: preq.lifetime,
                    metric: 0,
                    requester: preq.originator,
                    requester_seqno: preq.originator_seqno,
                };
                debug!("{}: answering PREQ from {}", self.address, preq.originator);
                self.send_prep(prep, interface, from, env);
                continue;
            }

            let known = self.rtable.lookup_reactive(target.address, now);
            if !target.do_flag && known.is_valid() && (target.usn || known.seqnum >= target.seqno) {
                let prep = IePrep {
                    hop_count: 0,
                    ttl: self.config.max_ttl,
                    target: target.address,
                    target_seqno: known.seqnum,
                    lifetime: to_tu(known.lifetime),
                    metric: known.metric,
                    requester: preq.originator,
                    requester_seqno: preq.originator_seqno,
                };
                debug!(
                    "{}: intermediate reply to {} for {}",
                    self.address, preq.originator, target.address
                );
                self.rtable.add_precursor(target.address, interface, from, lifetime, now);
                self.send_prep(prep, interface, from, env);
                if target.rf_flag {
                    // Only the target may answer further downstream
                    target.do_flag = true;
                    target.rf_flag = false;
                    remaining.push(target);
                }
                continue;
            }
            remaining.push(target);
        }
        preq.targets = remaining;

        if preq.targets.is_empty() {
            return;
        }
        if preq.ttl <= 1 {
            trace!("{}: PREQ from {} reached TTL limit", self.address, preq.originator);
            return;
        }
        preq.decrement_ttl();
        preq.increment_hop_count();
        self.send_preq(preq, env);
    }

    pub(super) fn receive_prep(
        &mut self,
        mut prep: IePrep,
        from: MacAddress,
        interface: InterfaceId,
        from_mp: MacAddress,
        link_metric: Metric,
        env: &mut dyn MeshEnvironment,
    ) {
        self.stats.rx_prep += 1;
        prep.increment_metric(link_metric);
        let now = env.now();
        let Some(fresh) = self.check_freshness(prep.target, prep.target_seqno, prep.metric, false) else {
            trace!("{}: stale PREP for {} seqno {}", self.address, prep.target, prep.target_seqno);
            return;
        };
        let lifetime = tu(prep.lifetime);
        let towards_requester = self.rtable.lookup_reactive(prep.requester, now);

        let current = self.rtable.lookup_reactive(prep.target, now);
        if (fresh || !current.is_valid() || current.metric > prep.metric)
            && self.rtable.add_reactive_path(
                prep.target,
                from,
                interface,
                prep.metric,
                lifetime,
                prep.target_seqno,
                now,
            )
        {
            // `from` reaches the requester through us, the requester's
            // next hop reaches the target through us
            self.rtable.add_precursor(prep.requester, interface, from, lifetime, now);
            if towards_requester.is_valid() {
                self.rtable.add_precursor(
                    prep.target,
                    towards_requester.interface,
                    towards_requester.retransmitter,
                    towards_requester.lifetime,
                    now,
                );
            }
            self.reactive_path_resolved(prep.target, env);
        }
        self.refresh_neighbour_path(from_mp, from, interface, link_metric, lifetime, now, env);

        if prep.requester == self.address {
            return;
        }
        let next = if towards_requester.is_valid() {
            towards_requester
        } else {
            self.rtable.lookup_proactive_to(prep.requester, now)
        };
        if !next.is_valid() {
            debug!("{}: no path back to {}, dropping PREP", self.address, prep.requester);
            return;
        }
        if prep.ttl <= 1 {
            return;
        }
        prep.decrement_ttl();
        prep.increment_hop_count();
        self.send_prep(prep, next.interface, next.retransmitter, env);
    }

    pub(super) fn receive_perr(&mut self, perr: IePerr, from: MacAddress, env: &mut dyn MeshEnvironment) {
        self.stats.rx_perr += 1;
        let now = env.now();
        let invalidated: Vec<FailedDestination> = perr
            .destinations()
            .iter()
            .filter(|unit| {
                let reactive = self.rtable.lookup_reactive_expired(unit.destination, now);
                let via_reactive = reactive.is_valid()
                    && reactive.retransmitter == from
                    && reactive.seqnum < unit.seqno;
                let via_tree = self
                    .rtable
                    .proactive_paths()
                    .any(|(root, e)| *root == unit.destination && e.retransmitter == from && e.seqnum < unit.seqno);
                via_reactive || via_tree
            })
            .copied()
            .collect();
        if invalidated.is_empty() {
            return;
        }
        debug!("{}: PERR from {} invalidates {} paths", self.address, from, invalidated.len());
        let error = self.make_path_error(&invalidated, from, now);
        if perr.ttl > 1 {
            self.forward_path_error(error, perr.ttl - 1, env);
        }
    }

    pub(super) fn receive_rann(
        &mut self,
        mut rann: IeRann,
        from: MacAddress,
        interface: InterfaceId,
        from_mp: MacAddress,
        link_metric: Metric,
        env: &mut dyn MeshEnvironment,
    ) {
        self.stats.rx_rann += 1;
        if rann.originator == self.address {
            return;
        }
        rann.increment_metric(link_metric);
        let now = env.now();
        if self
            .check_freshness(rann.originator, rann.originator_seqno, rann.metric, true)
            .is_none()
        {
            return;
        }
        // Outlive the gap between two announcements
        let lifetime = tu(rann.interval.saturating_mul(2));
        if self.rtable.add_proactive_path(
            rann.metric,
            rann.originator,
            from,
            interface,
            lifetime,
            rann.originator_seqno,
            now,
        ) {
            trace!("{}: root {} via {} metric {}", self.address, rann.originator, from, rann.metric);
            self.proactive_path_resolved(env);
        }
        self.refresh_neighbour_path(from_mp, from, interface, link_metric, lifetime, now, env);

        if rann.ttl <= 1 {
            return;
        }
        rann.decrement_ttl();
        rann.increment_hop_count();
        let sent = self.flood(RoutingFrame::Rann(rann), self.config.unicast_preq_threshold, env);
        self.stats.tx_rann += sent;
    }

    /// Collect the precursors of `destinations` and delete the paths that
    /// lead through `via`
    pub(super) fn make_path_error(
        &mut self,
        destinations: &[FailedDestination],
        via: MacAddress,
        now: SimTime,
    ) -> PathError {
        let mut receivers: Vec<(InterfaceId, MacAddress)> = Vec::new();
        for unit in destinations {
            for precursor in self.rtable.precursors(unit.destination, now) {
                let receiver = (precursor.interface, precursor.address);
                if precursor.address != via && !receivers.contains(&receiver) {
                    receivers.push(receiver);
                }
            }
        }
        for unit in destinations {
            let reactive = self.rtable.lookup_reactive_expired(unit.destination, now);
            if reactive.is_valid() && reactive.retransmitter == via {
                self.rtable.delete_reactive_path(unit.destination);
            }
            let via_tree = self
                .rtable
                .proactive_paths()
                .any(|(root, e)| *root == unit.destination && e.retransmitter == via);
            if via_tree {
                self.rtable.delete_proactive_path_to(unit.destination);
            }
        }
        PathError {
            destinations: destinations.to_vec(),
            receivers,
        }
    }

    pub(super) fn initiate_path_error(&mut self, error: PathError, env: &mut dyn MeshEnvironment) {
        self.forward_path_error(error, self.config.max_ttl, env);
    }

    /// Send PERR elements to the precursors, per interface, unicast below
    /// the PERR threshold and broadcast at or above it
    fn forward_path_error(&mut self, error: PathError, ttl: u8, env: &mut dyn MeshEnvironment) {
        if error.destinations.is_empty() || error.receivers.is_empty() {
            return;
        }
        let elements = IePerr::split(ttl, &error.destinations);
        let interfaces: Vec<InterfaceId> = self.interfaces.keys().copied().collect();
        for interface in interfaces {
            let on_interface: Vec<MacAddress> = error
                .receivers
                .iter()
                .filter(|(i, _)| *i == interface)
                .map(|(_, a)| *a)
                .collect();
            if on_interface.is_empty() {
                continue;
            }
            let receivers = if on_interface.len() >= self.config.unicast_perr_threshold {
                vec![MacAddress::BROADCAST]
            } else {
                on_interface
            };
            for receiver in receivers {
                for perr in &elements {
                    self.stats.tx_perr += 1;
                    env.send_management_frame(
                        interface,
                        receiver,
                        ManagementFrame::routing(self.address, RoutingFrame::Perr(perr.clone())),
                    );
                }
            }
        }
    }

    pub(super) fn send_preq(&mut self, preq: IePreq, env: &mut dyn MeshEnvironment) {
        let sent = self.flood(RoutingFrame::Preq(preq), self.config.unicast_preq_threshold, env);
        self.stats.tx_preq += sent;
    }

    fn send_prep(&mut self, prep: IePrep, interface: InterfaceId, receiver: MacAddress, env: &mut dyn MeshEnvironment) {
        self.stats.tx_prep += 1;
        env.send_management_frame(
            interface,
            receiver,
            ManagementFrame::routing(self.address, RoutingFrame::Prep(prep)),
        );
    }

    /// Send `frame` on every interface. Returns the number of frames sent.
    pub(super) fn flood(&mut self, frame: RoutingFrame, threshold: usize, env: &mut dyn MeshEnvironment) -> u64 {
        let mut sent = 0;
        let interfaces: Vec<InterfaceId> = self.interfaces.keys().copied().collect();
        for interface in interfaces {
            for receiver in self.broadcast_receivers(interface, threshold) {
                env.send_management_frame(
                    interface,
                    receiver,
                    ManagementFrame::routing(self.address, frame.clone()),
                );
                sent += 1;
            }
        }
        sent
    }
}
