use super::*;
use crate::address::MacAddress;
use crate::frame::{DataFrame, DataPacket, HwmpTag, RoutingFrame, RoutingHeader, ETHERTYPE_IPV4};
use crate::ie::{FailedDestination, IePerr, IePreq, PreqTarget};
use crate::metric::Metric;
use crate::scheduler::Timer;
use crate::testing::TestEnv;
use crate::time::tu;
use crate::traits::{
    DropReason, Ingress, MeshEnvironment, PeerLinkStatus, RouteOutcome, RouteReply, RouteReplyCallback,
    RoutingProtocol,
};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

fn addr(i: u32) -> MacAddress {
    MacAddress::from_index(i)
}

fn node_with(i: u32, config: HwmpConfig) -> HwmpProtocol {
    let mut hwmp = HwmpProtocol::new(addr(i), config).unwrap();
    hwmp.install_interface(0, addr(i));
    hwmp
}

fn node(i: u32) -> HwmpProtocol {
    node_with(i, HwmpConfig::default())
}

fn set_link(hwmp: &mut HwmpProtocol, peer: MacAddress, up: bool, env: &mut TestEnv) {
    let status = PeerLinkStatus {
        mesh_point: hwmp.address(),
        peer,
        peer_mesh_point: peer,
        interface: 0,
        up,
    };
    hwmp.peer_link_status(&status, env);
}

type Replies = Rc<RefCell<Vec<RouteReply>>>;

fn collector() -> (Replies, RouteReplyCallback) {
    let log: Replies = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&log);
    (log, Box::new(move |reply| sink.borrow_mut().push(reply)))
}

fn send_local(
    hwmp: &mut HwmpProtocol,
    destination: MacAddress,
    uid: u64,
    env: &mut TestEnv,
) -> (Replies, RouteOutcome) {
    let (log, reply) = collector();
    let outcome = hwmp
        .request_route(
            Ingress::Local,
            hwmp.address(),
            destination,
            DataPacket::new(uid, vec![0xab; 16]),
            ETHERTYPE_IPV4,
            reply,
            env,
        )
        .unwrap();
    (log, outcome)
}

fn tagged(uid: u64, ttl: u8, seqno: u32) -> DataPacket {
    let mut packet = DataPacket::new(uid, vec![1, 2, 3]);
    packet.header = Some(RoutingHeader::Hwmp(HwmpTag {
        address: MacAddress::BROADCAST,
        ttl,
        metric: 0,
        seqno,
    }));
    packet
}

fn preqs(env: &mut TestEnv) -> Vec<IePreq> {
    env.take_sent()
        .into_iter()
        .filter_map(|f| match f.routing() {
            Some(RoutingFrame::Preq(p)) => Some(p.clone()),
            _ => None,
        })
        .collect()
}

/// Stations 1..=n in a line, link i <-> i+1 costing `metrics[i-1]`
struct Chain {
    nodes: Vec<HwmpProtocol>,
    envs: Vec<TestEnv>,
    metrics: Vec<Metric>,
}

impl Chain {
    fn new(metrics: &[Metric]) -> Self {
        let n = metrics.len() + 1;
        let mut nodes: Vec<HwmpProtocol> = (1..=n as u32).map(node).collect();
        let mut envs: Vec<TestEnv> = (0..n).map(|_| TestEnv::new()).collect();
        for i in 0..n - 1 {
            set_link(&mut nodes[i], addr(i as u32 + 2), true, &mut envs[i]);
            set_link(&mut nodes[i + 1], addr(i as u32 + 1), true, &mut envs[i + 1]);
        }
        Self {
            nodes,
            envs,
            metrics: metrics.to_vec(),
        }
    }

    fn adjacent(&self, i: usize) -> Vec<usize> {
        let mut out = Vec::new();
        if i > 0 {
            out.push(i - 1);
        }
        if i + 1 < self.nodes.len() {
            out.push(i + 1);
        }
        out
    }

    /// Deliver management frames until the network is quiet
    fn relay(&mut self) -> usize {
        let mut delivered = 0;
        loop {
            let mut pending = Vec::new();
            for (i, env) in self.envs.iter_mut().enumerate() {
                for frame in env.take_sent() {
                    pending.push((i, frame));
                }
            }
            if pending.is_empty() {
                return delivered;
            }
            for (i, sent) in pending {
                let Some(routing) = sent.routing().cloned() else {
                    continue;
                };
                let targets: Vec<usize> = self
                    .adjacent(i)
                    .into_iter()
                    .filter(|j| sent.receiver.is_broadcast() || self.nodes[*j].address() == sent.receiver)
                    .collect();
                for j in targets {
                    let metric = self.metrics[i.min(j)];
                    self.nodes[j].receive_routing_frame(
                        0,
                        addr(i as u32 + 1),
                        sent.frame.mesh_point,
                        routing.clone(),
                        metric,
                        &mut self.envs[j],
                    );
                    delivered += 1;
                }
            }
        }
    }
}

#[test]
fn test_local_packet_with_header_rejected() {
    let mut env = TestEnv::new();
    let mut hwmp = node(1);
    let (_, reply) = collector();
    let result = hwmp.request_route(
        Ingress::Local,
        addr(1),
        addr(2),
        tagged(1, 5, 0),
        ETHERTYPE_IPV4,
        reply,
        &mut env,
    );
    assert_eq!(result, Err(crate::error::MeshError::UnexpectedRoutingHeader));
}

#[test]
fn test_forwarded_packet_needs_tag() {
    let mut env = TestEnv::new();
    let mut hwmp = node(2);
    let (_, reply) = collector();
    let result = hwmp.request_route(
        Ingress::Interface(0),
        addr(1),
        addr(3),
        DataPacket::new(1, vec![]),
        ETHERTYPE_IPV4,
        reply,
        &mut env,
    );
    assert_eq!(result, Err(crate::error::MeshError::MissingRoutingHeader("HWMP")));
}

#[test]
fn test_ttl_expiry_drops() {
    let mut env = TestEnv::new();
    let mut hwmp = node(2);
    let (log, reply) = collector();
    let outcome = hwmp
        .request_route(
            Ingress::Interface(0),
            addr(1),
            addr(3),
            tagged(7, 1, 0),
            ETHERTYPE_IPV4,
            reply,
            &mut env,
        )
        .unwrap();
    assert_eq!(outcome, RouteOutcome::Dropped(DropReason::TtlExpired));
    assert!(log.borrow().is_empty());
    assert_eq!(hwmp.stats().dropped_ttl, 1);
}

#[test]
fn test_known_path_sends_immediately() {
    let mut env = TestEnv::new();
    let mut hwmp = node(1);
    hwmp.routing_table_mut()
        .add_reactive_path(addr(3), addr(2), 0, 20, Duration::from_secs(5), 4, env.now());
    let (log, outcome) = send_local(&mut hwmp, addr(3), 1, &mut env);
    assert_eq!(outcome, RouteOutcome::Sent);
    let replies = log.borrow();
    assert_eq!(replies.len(), 1);
    assert!(replies[0].success);
    assert_eq!(replies[0].receiver, addr(2));
    let tag = replies[0].packet.hwmp_tag().unwrap();
    assert_eq!(tag.address, addr(2));
    assert_eq!(tag.ttl, hwmp.config().max_ttl);
}

#[test]
fn test_single_discovery_per_destination() {
    let mut env = TestEnv::new();
    let mut hwmp = node(1);
    set_link(&mut hwmp, addr(2), true, &mut env);

    let (_, first) = send_local(&mut hwmp, addr(9), 1, &mut env);
    let (_, second) = send_local(&mut hwmp, addr(9), 2, &mut env);
    assert_eq!(first, RouteOutcome::Queued);
    assert_eq!(second, RouteOutcome::Queued);
    assert_eq!(hwmp.queued_packets(), 2);
    assert_eq!(hwmp.discovery_state(addr(9)), DiscoveryState::Pending { retries: 0 });

    let sent = preqs(&mut env);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].targets.len(), 1);
    assert_eq!(sent[0].targets[0].address, addr(9));
    assert!(sent[0].targets[0].usn);
    assert_eq!(hwmp.stats().initiated_discoveries, 1);
}

#[test]
fn test_discovery_gives_up_after_max_retries() {
    let mut env = TestEnv::new();
    let mut hwmp = node_with(1, HwmpConfig::default().with_max_preq_retries(2));
    set_link(&mut hwmp, addr(2), true, &mut env);

    let (log, _) = send_local(&mut hwmp, addr(9), 1, &mut env);
    let mut preq_count = preqs(&mut env).len();
    let mut fire_times = Vec::new();
    while let Some((id, timer)) = env.next_timer() {
        fire_times.push(env.now());
        hwmp.handle_timer(&timer, id, &mut env);
        preq_count += preqs(&mut env).len();
    }

    assert_eq!(preq_count, 3);
    // back-off 2, 4 and 6 traversal times
    let traversal = hwmp.config().traversal_time();
    assert_eq!(
        fire_times,
        vec![traversal * 2, traversal * 6, traversal * 12]
    );
    let replies = log.borrow();
    assert_eq!(replies.len(), 1);
    assert!(!replies[0].success);
    assert_eq!(hwmp.queued_packets(), 0);
    assert_eq!(hwmp.discovery_state(addr(9)), DiscoveryState::Idle);
    assert_eq!(hwmp.stats().failed_discoveries, 1);
}

#[test]
fn test_queue_overflow() {
    let mut env = TestEnv::new();
    let config = HwmpConfig {
        max_queue_size: 1,
        ..HwmpConfig::default()
    };
    let mut hwmp = node_with(1, config);
    let (_, first) = send_local(&mut hwmp, addr(9), 1, &mut env);
    let (_, second) = send_local(&mut hwmp, addr(8), 2, &mut env);
    assert_eq!(first, RouteOutcome::Queued);
    assert_eq!(second, RouteOutcome::Dropped(DropReason::QueueFull));
    assert_eq!(hwmp.stats().dropped_queue, 1);
}

#[test]
fn test_chain_discovery_sums_link_metrics() {
    let mut chain = Chain::new(&[10, 25, 7]);
    let (log, outcome) = send_local(&mut chain.nodes[0], addr(4), 1, &mut chain.envs[0]);
    assert_eq!(outcome, RouteOutcome::Queued);
    chain.relay();

    let replies = log.borrow();
    assert_eq!(replies.len(), 1);
    assert!(replies[0].success);
    assert_eq!(replies[0].receiver, addr(2));

    let now = chain.envs[0].now();
    let path = chain.nodes[0].lookup(addr(4), now);
    assert_eq!(path.metric, 10 + 25 + 7);
    assert_eq!(path.retransmitter, addr(2));
    assert_eq!(chain.nodes[0].discovery_state(addr(4)), DiscoveryState::Idle);
    assert_eq!(chain.nodes[0].stats().resolved_discoveries, 1);

    // Reverse path at the target, precursors along the way
    let back = chain.nodes[3].lookup(addr(1), now);
    assert_eq!(back.metric, 10 + 25 + 7);
    assert_eq!(back.retransmitter, addr(3));
    let precursors = chain.nodes[1].routing_table().precursors(addr(4), now);
    assert!(precursors.iter().any(|p| p.address == addr(1)));
}

#[test]
fn test_intermediate_reply_with_ttl_one() {
    let mut env = TestEnv::new();
    let mut b = node(2);
    set_link(&mut b, addr(1), true, &mut env);
    set_link(&mut b, addr(3), true, &mut env);
    b.routing_table_mut()
        .add_reactive_path(addr(3), addr(3), 0, 10, Duration::from_secs(5), 5, env.now());

    let mut preq = IePreq::new(addr(1), 1, 1, 1, 5000);
    preq.targets.push(PreqTarget::new(addr(3), 0, false, true));
    b.receive_routing_frame(0, addr(1), addr(1), RoutingFrame::Preq(preq), 10, &mut env);

    let sent = env.take_sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].receiver, addr(1));
    match sent[0].routing() {
        Some(RoutingFrame::Prep(prep)) => {
            assert_eq!(prep.target, addr(3));
            assert_eq!(prep.target_seqno, 5);
            assert_eq!(prep.metric, 10);
            assert_eq!(prep.requester, addr(1));
        }
        other => panic!("expected PREP, got {other:?}"),
    }
}

#[test]
fn test_reply_and_forward_sets_destination_only() {
    let mut env = TestEnv::new();
    let mut b = node(2);
    set_link(&mut b, addr(1), true, &mut env);
    set_link(&mut b, addr(3), true, &mut env);
    b.routing_table_mut()
        .add_reactive_path(addr(3), addr(3), 0, 10, Duration::from_secs(5), 5, env.now());

    let mut preq = IePreq::new(addr(1), 1, 1, 8, 5000);
    preq.targets.push(PreqTarget::new(addr(3), 0, false, true));
    b.receive_routing_frame(0, addr(1), addr(1), RoutingFrame::Preq(preq), 10, &mut env);

    let forwarded = preqs(&mut env);
    assert_eq!(forwarded.len(), 1);
    assert_eq!(forwarded[0].ttl, 7);
    assert_eq!(forwarded[0].hop_count, 1);
    assert!(forwarded[0].targets[0].do_flag);
    assert!(!forwarded[0].targets[0].rf_flag);
}

#[test]
fn test_destination_only_target_not_answered_by_intermediate() {
    let mut env = TestEnv::new();
    let mut b = node(2);
    set_link(&mut b, addr(1), true, &mut env);
    b.routing_table_mut()
        .add_reactive_path(addr(3), addr(3), 0, 10, Duration::from_secs(5), 5, env.now());

    let mut preq = IePreq::new(addr(1), 1, 1, 8, 5000);
    preq.targets.push(PreqTarget::new(addr(3), 0, true, false));
    b.receive_routing_frame(0, addr(1), addr(1), RoutingFrame::Preq(preq), 10, &mut env);

    let sent = env.take_sent();
    assert!(sent.iter().all(|f| matches!(f.routing(), Some(RoutingFrame::Preq(_)))));
    assert_eq!(sent.len(), 1);
}

#[test]
fn test_multi_target_preq() {
    let mut env = TestEnv::new();
    let mut b = node(2);
    set_link(&mut b, addr(1), true, &mut env);
    b.routing_table_mut()
        .add_reactive_path(addr(4), addr(4), 0, 10, Duration::from_secs(5), 3, env.now());

    let mut preq = IePreq::new(addr(1), 1, 1, 8, 5000);
    preq.add_target(PreqTarget::new(addr(2), 0, false, false)).unwrap();
    preq.add_target(PreqTarget::new(addr(4), 0, false, false)).unwrap();
    preq.add_target(PreqTarget::new(addr(5), 0, false, false)).unwrap();
    b.receive_routing_frame(0, addr(1), addr(1), RoutingFrame::Preq(preq), 10, &mut env);

    let sent = env.take_sent();
    let prep_targets: Vec<MacAddress> = sent
        .iter()
        .filter_map(|f| match f.routing() {
            Some(RoutingFrame::Prep(p)) => Some(p.target),
            _ => None,
        })
        .collect();
    assert_eq!(prep_targets, vec![addr(2), addr(4)]);
    let forwarded: Vec<&IePreq> = sent
        .iter()
        .filter_map(|f| match f.routing() {
            Some(RoutingFrame::Preq(p)) => Some(p),
            _ => None,
        })
        .collect();
    assert_eq!(forwarded.len(), 1);
    let remaining: Vec<MacAddress> = forwarded[0].targets.iter().map(|t| t.address).collect();
    assert_eq!(remaining, vec![addr(5)]);
}

#[test]
fn test_duplicate_preq_dropped() {
    let mut env = TestEnv::new();
    let mut b = node(2);
    set_link(&mut b, addr(1), true, &mut env);
    set_link(&mut b, addr(3), true, &mut env);

    let mut preq = IePreq::new(addr(1), 4, 1, 8, 5000);
    preq.targets.push(PreqTarget::new(addr(9), 0, false, false));
    b.receive_routing_frame(0, addr(1), addr(1), RoutingFrame::Preq(preq.clone()), 10, &mut env);
    assert_eq!(preqs(&mut env).len(), 1);

    // Same seqno over a worse path
    b.receive_routing_frame(0, addr(3), addr(3), RoutingFrame::Preq(preq), 50, &mut env);
    assert!(preqs(&mut env).is_empty());
}

#[test]
fn test_link_down_sends_perr_to_precursors() {
    let mut chain = Chain::new(&[10, 10]);
    let _ = send_local(&mut chain.nodes[0], addr(3), 1, &mut chain.envs[0]);
    chain.relay();
    let now = chain.envs[1].now();
    let stored = chain.nodes[1].lookup(addr(3), now);
    assert!(stored.is_valid());

    set_link(&mut chain.nodes[1], addr(3), false, &mut chain.envs[1]);
    let sent = chain.envs[1].sent.clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].receiver, addr(1));
    match sent[0].routing() {
        Some(RoutingFrame::Perr(perr)) => {
            assert_eq!(
                perr.destinations(),
                &[FailedDestination {
                    destination: addr(3),
                    seqno: stored.seqnum + 1
                }]
            );
        }
        other => panic!("expected PERR, got {other:?}"),
    }
    assert!(!chain.nodes[1].lookup(addr(3), now).is_valid());

    chain.relay();
    assert!(!chain.nodes[0].lookup(addr(3), now).is_valid());
    assert_eq!(chain.nodes[0].stats().rx_perr, 1);
}

#[test]
fn test_perr_with_old_seqno_ignored() {
    let mut env = TestEnv::new();
    let mut a = node(1);
    set_link(&mut a, addr(2), true, &mut env);
    a.routing_table_mut()
        .add_reactive_path(addr(3), addr(2), 0, 20, Duration::from_secs(5), 9, env.now());

    let stale = IePerr::split(
        32,
        &[FailedDestination {
            destination: addr(3),
            seqno: 9,
        }],
    );
    a.receive_routing_frame(0, addr(2), addr(2), RoutingFrame::Perr(stale[0].clone()), 10, &mut env);
    assert!(a.lookup(addr(3), env.now()).is_valid());

    // Right seqno, wrong neighbour
    let fresh = IePerr::split(
        32,
        &[FailedDestination {
            destination: addr(3),
            seqno: 10,
        }],
    );
    set_link(&mut a, addr(5), true, &mut env);
    a.receive_routing_frame(0, addr(5), addr(5), RoutingFrame::Perr(fresh[0].clone()), 10, &mut env);
    assert!(a.lookup(addr(3), env.now()).is_valid());

    a.receive_routing_frame(0, addr(2), addr(2), RoutingFrame::Perr(fresh[0].clone()), 10, &mut env);
    assert!(!a.lookup(addr(3), env.now()).is_valid());
}

#[test]
fn test_forwarding_without_path_drops() {
    let mut env = TestEnv::new();
    let mut b = node(2);
    set_link(&mut b, addr(1), true, &mut env);
    let (log, reply) = collector();
    let outcome = b
        .request_route(
            Ingress::Interface(0),
            addr(1),
            addr(7),
            tagged(3, 10, 0),
            ETHERTYPE_IPV4,
            reply,
            &mut env,
        )
        .unwrap();
    assert_eq!(outcome, RouteOutcome::Dropped(DropReason::NoRoute));
    assert!(log.borrow().is_empty());
    assert!(env.sent.is_empty());
    assert_eq!(b.discovery_state(addr(7)), DiscoveryState::Idle);
}

#[test]
fn test_routing_frame_from_non_peer_ignored() {
    let mut env = TestEnv::new();
    let mut b = node(2);
    let mut preq = IePreq::new(addr(1), 1, 1, 8, 5000);
    preq.targets.push(PreqTarget::new(addr(2), 0, false, false));
    b.receive_routing_frame(0, addr(1), addr(1), RoutingFrame::Preq(preq), 10, &mut env);
    assert!(env.sent.is_empty());
    assert_eq!(b.stats().rx_preq, 0);
}

#[test]
fn test_broadcast_data_receivers() {
    let mut env = TestEnv::new();
    let config = HwmpConfig {
        unicast_data_threshold: 3,
        ..HwmpConfig::default()
    };
    let mut a = node_with(1, config);
    set_link(&mut a, addr(2), true, &mut env);
    set_link(&mut a, addr(3), true, &mut env);

    let (log, outcome) = send_local(&mut a, MacAddress::BROADCAST, 1, &mut env);
    assert_eq!(outcome, RouteOutcome::Sent);
    let receivers: Vec<MacAddress> = log.borrow().iter().map(|r| r.receiver).collect();
    assert_eq!(receivers, vec![addr(2), addr(3)]);

    let mut b = node(4);
    set_link(&mut b, addr(5), true, &mut env);
    set_link(&mut b, addr(6), true, &mut env);
    let (log, _) = send_local(&mut b, MacAddress::BROADCAST, 1, &mut env);
    let receivers: Vec<MacAddress> = log.borrow().iter().map(|r| r.receiver).collect();
    assert_eq!(receivers, vec![MacAddress::BROADCAST]);
    assert_eq!(log.borrow()[0].packet.hwmp_tag().map(|t| t.seqno), Some(1));
}

#[test]
fn test_broadcast_duplicate_filter() {
    let mut env = TestEnv::new();
    let mut b = node(2);
    let frame = DataFrame {
        source: addr(5),
        destination: MacAddress::BROADCAST,
        protocol: ETHERTYPE_IPV4,
        packet: tagged(1, 8, 3),
    };
    assert!(b.accept_data_frame(0, addr(5), &frame, &mut env));
    assert!(!b.accept_data_frame(0, addr(6), &frame, &mut env));
    assert_eq!(b.stats().dropped_duplicate, 1);

    let own = DataFrame {
        source: addr(2),
        ..frame
    };
    assert!(!b.accept_data_frame(0, addr(5), &own, &mut env));
}

#[test]
fn test_remove_routing_stuff() {
    let mut b = node(2);
    let stripped = b
        .remove_routing_stuff(0, addr(1), addr(2), tagged(1, 3, 0))
        .unwrap();
    assert!(stripped.header.is_none());
    assert!(b.remove_routing_stuff(0, addr(1), addr(2), DataPacket::new(2, vec![])).is_err());
}

#[test]
fn test_proactive_preq_builds_tree() {
    let config = HwmpConfig::default().with_root_mode(RootMode::ProactivePreq { prep: true });
    let mut root_env = TestEnv::new();
    let mut root = node_with(1, config);
    set_link(&mut root, addr(2), true, &mut root_env);
    root.start(&mut root_env);
    assert!(root_env.sent.is_empty());
    let (id, timer) = root_env.next_timer().unwrap();
    root.handle_timer(&timer, id, &mut root_env);

    let sent = preqs(&mut root_env);
    assert_eq!(sent.len(), 1);
    assert!(sent[0].is_proactive());
    assert!(!sent[0].need_not_prep);
    assert_eq!(root_env.queue.len(), 1);

    let mut env = TestEnv::new();
    let mut b = node(2);
    set_link(&mut b, addr(1), true, &mut env);
    set_link(&mut b, addr(3), true, &mut env);
    b.receive_routing_frame(0, addr(1), addr(1), RoutingFrame::Preq(sent[0].clone()), 12, &mut env);

    let tree = b.routing_table().lookup_proactive(env.now());
    assert_eq!(tree.retransmitter, addr(1));
    assert_eq!(tree.metric, 12);
    assert_eq!(b.routing_table().current_root(), Some(addr(1)));

    let out = env.take_sent();
    let prep = out
        .iter()
        .find_map(|f| match f.routing() {
            Some(RoutingFrame::Prep(p)) => Some((f.receiver, p.clone())),
            _ => None,
        })
        .unwrap();
    assert_eq!(prep.0, addr(1));
    assert_eq!(prep.1.target, addr(2));
    assert!(out
        .iter()
        .any(|f| matches!(f.routing(), Some(RoutingFrame::Preq(p)) if p.is_proactive())));
}

#[test]
fn test_rann_refreshes_and_rebroadcasts() {
    let config = HwmpConfig::default().with_root_mode(RootMode::Rann);
    let mut root_env = TestEnv::new();
    let mut root = node_with(1, config);
    set_link(&mut root, addr(2), true, &mut root_env);
    root.start(&mut root_env);
    let (id, timer) = root_env.next_timer().unwrap();
    let first = root_env.now();
    root.handle_timer(&timer, id, &mut root_env);
    let sent = root_env.take_sent();
    assert_eq!(sent.len(), 1);
    let rann = sent[0].routing().cloned().unwrap();
    assert_eq!(root.stats().tx_rann, 1);

    // Next announcement after the configured interval
    let (id, timer) = root_env.next_timer().unwrap();
    assert_eq!(root_env.now(), first + tu(root.config().rann_interval));
    root.handle_timer(&timer, id, &mut root_env);
    assert_eq!(root.stats().tx_rann, 2);

    let mut env = TestEnv::new();
    let mut b = node(2);
    set_link(&mut b, addr(1), true, &mut env);
    set_link(&mut b, addr(3), true, &mut env);
    b.receive_routing_frame(0, addr(1), addr(1), rann.clone(), 5, &mut env);
    assert!(b.lookup(addr(1), env.now()).is_valid());
    assert_eq!(b.stats().tx_rann, 1);

    // Repeated announcement is not flooded again
    b.receive_routing_frame(0, addr(1), addr(1), rann, 5, &mut env);
    assert_eq!(b.stats().tx_rann, 1);
}

#[test]
fn test_stale_retry_timer_ignored() {
    let mut env = TestEnv::new();
    let mut chain = Chain::new(&[10]);
    let _ = send_local(&mut chain.nodes[0], addr(2), 1, &mut chain.envs[0]);
    chain.relay();
    assert_eq!(chain.nodes[0].discovery_state(addr(2)), DiscoveryState::Idle);
    // The canceled retry must not start a new discovery
    let stale = Timer::PreqRetry { destination: addr(2) };
    let id = env.schedule(Duration::ZERO, stale.clone());
    chain.nodes[0].handle_timer(&stale, id, &mut chain.envs[0]);
    assert!(chain.envs[0].sent.is_empty());
}


#[test]
fn test_first_root_announcement_is_jittered() {
    let window = tu(HwmpConfig::default().random_start);
    let mut starts = Vec::new();
    for seed in 0..8 {
        let config = HwmpConfig::default()
            .with_root_mode(RootMode::ProactivePreq { prep: false })
            .with_seed(seed);
        let mut env = TestEnv::new();
        let mut root = node_with(1, config);
        set_link(&mut root, addr(2), true, &mut env);
        root.start(&mut env);
        assert!(env.sent.is_empty());

        let (id, timer) = env.next_timer().unwrap();
        assert_eq!(timer, Timer::ProactivePreq);
        assert!(env.now() <= window, "first announcement at {:?}", env.now());
        starts.push(env.now());
        root.handle_timer(&timer, id, &mut env);
        assert_eq!(preqs(&mut env).len(), 1);
    }
    starts.dedup();
    assert!(starts.len() > 1);

    // A station promoted later also waits
    let mut env = TestEnv::new();
    let mut b = node(2);
    set_link(&mut b, addr(1), true, &mut env);
    env.advance(Duration::from_secs(1));
    b.set_root(RootMode::Rann, &mut env);
    assert!(env.sent.is_empty());
    let (id, timer) = env.next_timer().unwrap();
    assert_eq!(timer, Timer::Rann);
    assert!(env.now() <= Duration::from_secs(1) + window);
    b.handle_timer(&timer, id, &mut env);
    assert_eq!(b.stats().tx_rann, 1);
}

#[test]
fn test_unknown_destination_goes_up_the_tree() {
    let mut env = TestEnv::new();
    let mut b = node(2);
    set_link(&mut b, addr(1), true, &mut env);
    b.routing_table_mut()
        .add_proactive_path(12, addr(1), addr(1), 0, Duration::from_secs(5), 3, env.now());

    let (log, outcome) = send_local(&mut b, addr(9), 1, &mut env);
    assert_eq!(outcome, RouteOutcome::Sent);
    let replies = log.borrow();
    assert_eq!(replies.len(), 1);
    assert!(replies[0].success);
    assert_eq!(replies[0].receiver, addr(1));
    assert_eq!(replies[0].packet.hwmp_tag().map(|t| t.address), Some(addr(1)));
    assert!(preqs(&mut env).is_empty());
    assert_eq!(b.stats().initiated_discoveries, 0);

    // Forwarded traffic takes the same way
    let (log, reply) = collector();
    let outcome = b
        .request_route(
            Ingress::Interface(0),
            addr(3),
            addr(8),
            tagged(2, 10, 0),
            ETHERTYPE_IPV4,
            reply,
            &mut env,
        )
        .unwrap();
    assert_eq!(outcome, RouteOutcome::Sent);
    assert_eq!(log.borrow()[0].receiver, addr(1));
}

#[test]
fn test_root_announcement_releases_every_queued_packet() {
    let mut env = TestEnv::new();
    let mut b = node(2);
    set_link(&mut b, addr(1), true, &mut env);
    let (first, _) = send_local(&mut b, addr(8), 1, &mut env);
    let (second, _) = send_local(&mut b, addr(9), 2, &mut env);
    assert_eq!(b.queued_packets(), 2);
    env.take_sent();

    let mut preq = IePreq::new(addr(1), 1, 1, 8, 5000);
    preq.need_not_prep = true;
    preq.targets.push(PreqTarget::new(MacAddress::BROADCAST, 0, true, false));
    b.receive_routing_frame(0, addr(1), addr(1), RoutingFrame::Preq(preq), 10, &mut env);

    assert_eq!(b.queued_packets(), 0);
    for log in [first, second] {
        let replies = log.borrow();
        assert_eq!(replies.len(), 1);
        assert!(replies[0].success);
        assert_eq!(replies[0].receiver, addr(1));
    }
    assert_eq!(b.discovery_state(addr(8)), DiscoveryState::Idle);
    assert_eq!(b.discovery_state(addr(9)), DiscoveryState::Idle);
    assert_eq!(b.stats().resolved_discoveries, 2);
}

#[test]
fn test_perr_passed_on_to_upstream_precursors() {
    let mut chain = Chain::new(&[10, 10, 10]);
    let (log, _) = send_local(&mut chain.nodes[0], addr(4), 1, &mut chain.envs[0]);
    chain.relay();
    assert!(log.borrow()[0].success);
    let now = chain.envs[0].now();
    assert!(chain.nodes[0].lookup(addr(4), now).is_valid());
    let stored = chain.nodes[2].lookup(addr(4), now);

    // Station 3 loses station 4 and tells station 2
    set_link(&mut chain.nodes[2], addr(4), false, &mut chain.envs[2]);
    let from_3 = chain.envs[2].take_sent();
    assert_eq!(from_3.len(), 1);
    assert_eq!(from_3[0].receiver, addr(2));
    let perr = from_3[0].routing().cloned().unwrap();
    chain.nodes[1].receive_routing_frame(0, addr(3), addr(3), perr, 10, &mut chain.envs[1]);

    // Station 2 has station 1 as precursor and passes the error on
    assert!(!chain.nodes[1].lookup(addr(4), now).is_valid());
    let from_2 = chain.envs[1].take_sent();
    assert_eq!(from_2.len(), 1);
    assert_eq!(from_2[0].receiver, addr(1));
    match from_2[0].routing() {
        Some(RoutingFrame::Perr(perr)) => {
            assert_eq!(perr.ttl, chain.nodes[2].config().max_ttl - 1);
            assert_eq!(
                perr.destinations(),
                &[FailedDestination {
                    destination: addr(4),
                    seqno: stored.seqnum + 1
                }]
            );
        }
        other => panic!("expected PERR, got {other:?}"),
    }
    assert_eq!(chain.nodes[1].stats().tx_perr, 1);

    chain.nodes[0].receive_routing_frame(
        0,
        addr(2),
        addr(2),
        from_2[0].routing().cloned().unwrap(),
        10,
        &mut chain.envs[0],
    );
    assert!(!chain.nodes[0].lookup(addr(4), now).is_valid());
    assert_eq!(chain.nodes[0].stats().rx_perr, 1);
    // Station 1 has nobody upstream
    assert!(chain.envs[0].sent.is_empty());
}
