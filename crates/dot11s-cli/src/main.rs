//! 802.11s Mesh Routing Command-Line Interface
//!
//! This CLI provides tools for:
//! - Simulating HWMP or FLAME meshes over chain, ring, grid and full-mesh topologies
//! - Walking through a peer link handshake between two stations
//! - Dumping and checking protocol configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dot11s_core::simulation::{write_trace, SimEvent, TraceRecord};
use dot11s_core::{
    FlameProtocol, HwmpProtocol, MeshConfig, MeshSimulator, RootMode, RoutingProtocol, SimConfig, SimStats,
    TopologyKind,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "dot11s")]
#[command(author, version, about = "802.11s mesh routing simulator", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate a mesh network carrying random traffic
    Simulate {
        /// Topology (chain, ring, grid, full-mesh)
        #[arg(short, long, default_value = "chain")]
        topology: String,

        /// Number of nodes
        #[arg(short, long, default_value = "5")]
        nodes: usize,

        /// Grid width (grid topology only)
        #[arg(long, default_value = "3")]
        width: usize,

        /// Path selection protocol (hwmp, flame)
        #[arg(short, long, default_value = "hwmp")]
        protocol: String,

        /// HWMP root node index
        #[arg(long)]
        root: Option<usize>,

        /// Root announcement mode (proactive, proactive-no-prep, rann)
        #[arg(long, default_value = "proactive")]
        root_mode: String,

        /// Simulated traffic duration in seconds
        #[arg(short, long, default_value = "10")]
        duration: u64,

        /// Number of unicast messages between random node pairs
        #[arg(short, long, default_value = "20")]
        messages: usize,

        /// Payload size in bytes
        #[arg(long, default_value = "100")]
        payload: usize,

        /// Per-reception frame loss probability
        #[arg(long, default_value = "0.0")]
        loss: f64,

        /// Random seed
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Protocol configuration (JSON, see `dot11s config`)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Write the event trace as JSON lines
        #[arg(long)]
        trace: Option<PathBuf>,

        /// Include every frame in the trace
        #[arg(long)]
        trace_frames: bool,

        /// Print statistics as JSON
        #[arg(long)]
        json: bool,
    },

    /// Walk through a peer link handshake between two stations
    PeerLink {
        /// Drop the link after it comes up
        #[arg(long)]
        cancel: bool,

        /// Break the radio link instead, so the open goes unanswered
        #[arg(long)]
        unanswered: bool,

        /// Protocol configuration (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Print the default configuration as JSON
    Config {
        /// Also print the simulator defaults
        #[arg(long)]
        sim: bool,
    },

    /// Show protocol overview and example invocations
    Info,
}

/// Parse topology name
fn parse_topology(name: &str, width: usize) -> Result<TopologyKind> {
    match name.to_lowercase().as_str() {
        "chain" | "line" => Ok(TopologyKind::Chain),
        "ring" => Ok(TopologyKind::Ring),
        "grid" => {
            if width == 0 {
                anyhow::bail!("Grid width must be at least 1");
            }
            Ok(TopologyKind::Grid { width })
        }
        "full-mesh" | "fullmesh" | "mesh" => Ok(TopologyKind::FullMesh),
        _ => anyhow::bail!("Unknown topology: {}. Use chain, ring, grid or full-mesh", name),
    }
}

/// Parse root announcement mode
fn parse_root_mode(name: &str) -> Result<RootMode> {
    match name.to_lowercase().as_str() {
        "proactive" | "preq" => Ok(RootMode::ProactivePreq { prep: true }),
        "proactive-no-prep" => Ok(RootMode::ProactivePreq { prep: false }),
        "rann" => Ok(RootMode::Rann),
        _ => anyhow::bail!("Unknown root mode: {}. Use proactive, proactive-no-prep or rann", name),
    }
}

fn load_mesh_config(path: Option<&Path>) -> Result<MeshConfig> {
    let Some(path) = path else {
        return Ok(MeshConfig::default());
    };
    let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    MeshConfig::from_json(&text).with_context(|| format!("Invalid configuration in {}", path.display()))
}

/// Install Ctrl+C handling; the returned flag goes false on interrupt
fn interrupt_flag() -> Result<Arc<AtomicBool>> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")?;
    Ok(running)
}

struct TrafficPlan {
    warmup: Duration,
    duration: Duration,
    messages: usize,
    payload: usize,
    seed: u64,
}

/// Let links come up, then run random unicast traffic to completion or
/// until interrupted.
fn run_traffic<R: RoutingProtocol>(sim: &mut MeshSimulator<R>, plan: &TrafficPlan, running: &AtomicBool) -> Result<()> {
    let established = sim.run_until(plan.warmup, |s| s.all_links_established());
    if established {
        info!("all {} peer links established at {:?}", sim.established_links(), sim.now());
    } else {
        warn!(
            "only {} peer links established after {:?}",
            sim.established_links(),
            plan.warmup
        );
    }

    let nodes = sim.node_count();
    if nodes >= 2 {
        let mut rng = StdRng::seed_from_u64(plan.seed);
        let window_us = plan.duration.as_micros().max(1) as u64;
        for _ in 0..plan.messages {
            let from = rng.gen_range(0..nodes);
            let mut to = rng.gen_range(0..nodes - 1);
            if to >= from {
                to += 1;
            }
            let delay = Duration::from_micros(rng.gen_range(0..window_us));
            sim.schedule_message(delay, from, Some(to), plan.payload)?;
        }
    }

    // Leave time for the last discoveries to finish
    let end = sim.now() + plan.duration + Duration::from_secs(2);
    let slice = Duration::from_millis(100);
    while sim.now() < end {
        if !running.load(Ordering::SeqCst) {
            println!("Interrupted at {:.3} s", sim.now().as_secs_f64());
            break;
        }
        sim.run_for(slice.min(end - sim.now()));
    }
    Ok(())
}

fn write_trace_file(path: &Path, events: &[TraceRecord]) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    write_trace(events, BufWriter::new(file)).context("Failed to write trace")?;
    println!("Wrote {} trace records to {}", events.len(), path.display());
    Ok(())
}

fn print_stats(stats: &SimStats, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(stats).context("Failed to serialize statistics")?);
    } else {
        println!("{}", stats);
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn cmd_simulate(
    topology: String,
    nodes: usize,
    width: usize,
    protocol: String,
    root: Option<usize>,
    root_mode: String,
    duration: u64,
    messages: usize,
    payload: usize,
    loss: f64,
    seed: u64,
    config: Option<PathBuf>,
    trace: Option<PathBuf>,
    trace_frames: bool,
    json: bool,
) -> Result<()> {
    let kind = parse_topology(&topology, width)?;
    let mut mesh = load_mesh_config(config.as_deref())?;
    let mut sim_config = SimConfig::default()
        .with_node_count(nodes)
        .with_topology(kind)
        .with_seed(seed)
        .with_frame_loss(loss)
        .with_trace_frames(trace_frames);
    if let Some(root) = root {
        sim_config = sim_config.with_root(root);
        mesh.hwmp.root_mode = parse_root_mode(&root_mode)?;
    }

    let plan = TrafficPlan {
        warmup: Duration::from_secs(3),
        duration: Duration::from_secs(duration),
        messages,
        payload,
        seed,
    };

    if !json {
        println!("=== 802.11s Mesh Simulation ===");
        println!();
        println!("Protocol: {}", protocol.to_uppercase());
        println!("Topology: {} ({} nodes)", kind, nodes);
        if let Some(root) = root {
            println!("Root:     node {} ({:?})", root, mesh.hwmp.root_mode);
        }
        println!("Messages: {} over {} s", messages, duration);
        println!("Loss:     {:.1}%", loss * 100.0);
        println!("Seed:     {}", seed);
        println!();
    }

    let running = interrupt_flag()?;
    match protocol.to_lowercase().as_str() {
        "hwmp" => {
            let mut sim = MeshSimulator::new_hwmp(sim_config, &mesh).context("Failed to build simulation")?;
            run_traffic(&mut sim, &plan, &running)?;
            print_stats(&sim.stats(), json)?;
            if !json {
                println!();
                println!("{}", sim.hwmp_stats());
                println!();
                println!("{}", sim.peer_stats());
            }
            if let Some(path) = trace {
                write_trace_file(&path, sim.events())?;
            }
        }
        "flame" => {
            if root.is_some() {
                warn!("--root has no effect with FLAME");
            }
            let mut sim = MeshSimulator::new_flame(sim_config, &mesh).context("Failed to build simulation")?;
            run_traffic(&mut sim, &plan, &running)?;
            print_stats(&sim.stats(), json)?;
            if !json {
                println!();
                println!("{}", sim.flame_stats());
                println!();
                println!("{}", sim.peer_stats());
            }
            if let Some(path) = trace {
                write_trace_file(&path, sim.events())?;
            }
        }
        _ => anyhow::bail!("Unknown protocol: {}. Use hwmp or flame", protocol),
    }
    Ok(())
}

fn describe(event: &SimEvent) -> String {
    match event {
        SimEvent::NodeStarted { node, address } => format!("node {} started as {}", node, address),
        SimEvent::FrameSent { from, to: Some(to), kind } => format!("node {} -> node {}: {}", from, to, kind),
        SimEvent::FrameSent { from, to: None, kind } => format!("node {} -> all: {}", from, kind),
        SimEvent::FrameLost { from, to, kind, reason } => {
            format!("node {} -> node {}: {} lost ({})", from, to, kind, reason)
        }
        SimEvent::PeerLink { node, peer, up } => {
            format!("node {}: link to node {} {}", node, peer, if *up { "UP" } else { "DOWN" })
        }
        SimEvent::MessageSent { uid, from, to } => format!("message {} sent by node {} to {:?}", uid, from, to),
        SimEvent::MessageDelivered {
            uid, to, latency_us, ..
        } => format!("message {} delivered to node {} after {} us", uid, to, latency_us),
        SimEvent::LinkBroken { a, b } => format!("radio link {}-{} broken", a, b),
        SimEvent::LinkRestored { a, b } => format!("radio link {}-{} restored", a, b),
    }
}

fn print_events(events: &[TraceRecord]) {
    for record in events {
        if matches!(record.event, SimEvent::FrameSent { kind: "beacon", .. }) {
            continue;
        }
        println!("  {:>9.3} ms  {}", record.time_us as f64 / 1000.0, describe(&record.event));
    }
}

fn cmd_peer_link(cancel: bool, unanswered: bool, config: Option<PathBuf>) -> Result<()> {
    let mesh = load_mesh_config(config.as_deref())?;
    let sim_config = SimConfig::default()
        .with_node_count(2)
        .with_trace_frames(true)
        // Keep beacons from opening the link before we do
        .with_beacon_interval(10_000);
    let mut sim = MeshSimulator::new_hwmp(sim_config, &mesh).context("Failed to build simulation")?;

    println!("=== Peer Link Handshake ===");
    println!();
    println!("Node 0: {}", dot11s_core::simulation::node_address(0));
    println!("Node 1: {}", dot11s_core::simulation::node_address(1));
    println!("Retry timeout:   {} TU", mesh.peer.retry_timeout);
    println!("Holding timeout: {} TU", mesh.peer.holding_timeout);
    println!("Max retries:     {}", mesh.peer.max_retries);
    println!();

    if unanswered {
        sim.break_link(0, 1)?;
    }
    sim.active_open(0, 1).context("Active open failed")?;
    let window = dot11s_core::tu(
        mesh.peer.retry_timeout * (u32::from(mesh.peer.max_retries) + 2) + mesh.peer.holding_timeout,
    );
    let up = sim.run_until(window, |s| s.link_established(0, 1));
    if up && cancel {
        sim.run_for(Duration::from_millis(5));
        sim.cancel_peer_link(0, 1).context("Cancel failed")?;
        sim.run_for(dot11s_core::tu(mesh.peer.holding_timeout * 2));
    } else if !up {
        sim.run_for(window);
    }

    println!("Events:");
    print_events(sim.events());
    println!();
    for node in 0..2 {
        let peer = dot11s_core::simulation::node_address(1 - node);
        let state = sim
            .node(node)
            .and_then(|n| n.peers().link_state(dot11s_core::simulation::SIM_INTERFACE, peer));
        match state {
            Some(state) => println!("Node {} link state: {}", node, state),
            None => println!("Node {} link state: (none)", node),
        }
    }
    println!();
    println!("{}", sim.peer_stats());
    Ok(())
}

fn cmd_config(sim: bool) -> Result<()> {
    let mesh = MeshConfig::default();
    println!("{}", mesh.to_json_pretty().context("Failed to serialize configuration")?);
    if sim {
        println!(
            "{}",
            serde_json::to_string_pretty(&SimConfig::default()).context("Failed to serialize configuration")?
        );
    }
    Ok(())
}

fn cmd_info() -> Result<()> {
    let mesh = MeshConfig::default();
    println!("=== 802.11s Mesh Routing ===");
    println!();
    println!("Path selection protocols:");
    println!("  hwmp   - Hybrid Wireless Mesh Protocol: on-demand PREQ/PREP discovery,");
    println!("           PERR on link failure, optional proactive root (PREQ or RANN)");
    println!("  flame  - Flat hop-count routing learned from data frames, no control traffic");
    println!();
    println!("Topologies:");
    println!("  chain      - 0 - 1 - 2 - ... - n-1");
    println!("  ring       - chain closed into a ring");
    println!("  grid       - rows of --width nodes, 4-neighbour connectivity");
    println!("  full-mesh  - every node hears every other");
    println!();
    println!("HWMP defaults:");
    println!("  Max PREQ retries:      {}", mesh.hwmp.max_preq_retries);
    println!("  Active path timeout:   {} TU", mesh.hwmp.active_path_timeout);
    println!("  Max TTL:               {}", mesh.hwmp.max_ttl);
    println!("  Root interval:         {} TU", mesh.hwmp.path_to_root_interval);
    println!();
    println!("Peer link defaults:");
    println!("  Retry/holding/confirm: {}/{}/{} TU", mesh.peer.retry_timeout, mesh.peer.holding_timeout, mesh.peer.confirm_timeout);
    println!("  Max peer links:        {}", mesh.peer.max_peer_links);
    println!("  Mesh ID:               {}", mesh.peer.mesh_id);
    println!();
    println!("Examples:");
    println!("  dot11s simulate --nodes 8 --topology chain --messages 50");
    println!("  dot11s simulate --topology grid --width 4 --nodes 16 --root 0 --root-mode rann");
    println!("  dot11s simulate --protocol flame --topology ring --trace run.jsonl");
    println!("  dot11s peer-link --cancel");
    println!("  dot11s config > mesh.json && dot11s simulate --config mesh.json");

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Simulate {
            topology,
            nodes,
            width,
            protocol,
            root,
            root_mode,
            duration,
            messages,
            payload,
            loss,
            seed,
            config,
            trace,
            trace_frames,
            json,
        } => cmd_simulate(
            topology,
            nodes,
            width,
            protocol,
            root,
            root_mode,
            duration,
            messages,
            payload,
            loss,
            seed,
            config,
            trace,
            trace_frames,
            json,
        ),

        Commands::PeerLink {
            cancel,
            unanswered,
            config,
        } => cmd_peer_link(cancel, unanswered, config),

        Commands::Config { sim } => cmd_config(sim),

        Commands::Info => cmd_info(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_topology() {
        assert_eq!(parse_topology("chain", 3).unwrap(), TopologyKind::Chain);
        assert_eq!(parse_topology("Grid", 4).unwrap(), TopologyKind::Grid { width: 4 });
        assert_eq!(parse_topology("full-mesh", 3).unwrap(), TopologyKind::FullMesh);
        assert!(parse_topology("grid", 0).is_err());
        assert!(parse_topology("star", 3).is_err());
    }

    #[test]
    fn test_parse_root_mode() {
        assert_eq!(parse_root_mode("rann").unwrap(), RootMode::Rann);
        assert_eq!(
            parse_root_mode("proactive-no-prep").unwrap(),
            RootMode::ProactivePreq { prep: false }
        );
        assert!(parse_root_mode("none").is_err());
    }

    #[test]
    fn test_cli_parses_simulate() {
        let cli = Cli::try_parse_from(["dot11s", "-vv", "simulate", "--nodes", "7", "--root", "0"]).unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Simulate { nodes, root, .. } => {
                assert_eq!(nodes, 7);
                assert_eq!(root, Some(0));
            }
            _ => panic!("expected simulate"),
        }
    }

    #[test]
    fn test_missing_config_file_is_error() {
        assert!(load_mesh_config(Some(Path::new("/nonexistent/mesh.json"))).is_err());
        assert_eq!(load_mesh_config(None).unwrap(), MeshConfig::default());
    }
}
