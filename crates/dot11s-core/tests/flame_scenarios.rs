//! Integration tests for FLAME over simulated topologies.

use dot11s_core::simulation::node_address;
use dot11s_core::{FlameConfig, FlameProtocol, MeshConfig, MeshSimulator, SimConfig};
use std::time::Duration;

fn flame_chain(n: usize, mesh: &MeshConfig) -> MeshSimulator<FlameProtocol> {
    let mut sim = MeshSimulator::new_flame(SimConfig::default().with_node_count(n), mesh)
        .expect("failed to build simulator");
    assert!(
        sim.run_until(Duration::from_secs(3), |s| s.all_links_established()),
        "peer links did not come up"
    );
    sim
}

#[test]
fn test_first_frame_floods_reply_goes_unicast() {
    let mut sim = flame_chain(4, &MeshConfig::default());

    let out = sim.send_data(0, 3, 64).expect("send failed");
    sim.run_for(Duration::from_millis(50));
    assert!(sim.is_delivered(out));
    let after_flood = sim.flame_stats();
    assert_eq!(after_flood.tx_unicast, 0);
    assert!(after_flood.tx_broadcast >= 3);

    // Every station learned the way back to node 0
    let now = sim.now();
    let learned = sim.node(3).expect("node 3").routing().routing_table().lookup(node_address(0), now);
    assert!(learned.is_valid());
    assert_eq!(learned.retransmitter, node_address(2));
    assert_eq!(learned.cost, 3);

    let back = sim.send_data(3, 0, 64).expect("send failed");
    sim.run_for(Duration::from_millis(50));
    assert!(sim.is_delivered(back));
    let stats = sim.flame_stats();
    assert_eq!(stats.tx_unicast, 3);
    assert_eq!(stats.tx_broadcast, after_flood.tx_broadcast);
    assert_eq!(sim.stats().per_node[1].forwarded, 2);
}

#[test]
fn test_broadcast_interval_forces_flood() {
    let mesh = MeshConfig::default().with_flame(FlameConfig {
        broadcast_interval_ms: 100,
        ..FlameConfig::default()
    });
    let mut sim = flame_chain(3, &mesh);
    let first = sim.send_data(0, 2, 16).expect("send failed");
    sim.run_for(Duration::from_millis(20));
    assert!(sim.is_delivered(first));

    // Node 2 knows node 0 but its interval has run out
    sim.run_for(Duration::from_millis(200));
    let reply = sim.send_data(2, 0, 16).expect("send failed");
    sim.run_for(Duration::from_millis(20));
    assert!(sim.is_delivered(reply));
    assert!(sim.node(2).expect("node 2").routing().stats().forced_broadcasts >= 1);
}

#[test]
fn test_max_cost_limits_reach() {
    let mesh = MeshConfig::default().with_flame(FlameConfig {
        max_cost: 2,
        ..FlameConfig::default()
    });
    let mut sim = flame_chain(4, &mesh);
    let near = sim.send_data(0, 2, 16).expect("send failed");
    let far = sim.send_data(0, 3, 16).expect("send failed");
    sim.run_for(Duration::from_millis(50));
    assert!(sim.is_delivered(near));
    assert!(!sim.is_delivered(far));
    assert!(sim.flame_stats().dropped_cost >= 1);
}

#[test]
fn test_peer_loss_forgets_paths() {
    let mut sim = flame_chain(3, &MeshConfig::default());
    let uid = sim.send_data(2, 0, 16).expect("send failed");
    sim.run_for(Duration::from_millis(50));
    assert!(sim.is_delivered(uid));
    let learned = |s: &MeshSimulator<FlameProtocol>| {
        s.node(1)
            .expect("node 1")
            .routing()
            .routing_table()
            .lookup(node_address(2), s.now())
            .is_valid()
    };
    assert!(learned(&sim));

    sim.break_link(1, 2).expect("break link");
    assert!(sim.run_until(Duration::from_secs(2), |s| !s.link_established(1, 2)));
    assert!(!learned(&sim));
}
