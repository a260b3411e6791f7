//! Static radio topology
//!
//! Nodes are numbered from 0. A link is undirected, carries its airtime
//! cost, and can be broken and restored while the simulation runs.

use crate::error::{MeshError, MeshResult};
use crate::metric::Metric;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Topology shapes the simulator can build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopologyKind {
    /// 0 - 1 - 2 - ... - n-1
    #[default]
    Chain,
    /// Chain closed into a ring
    Ring,
    /// Rows of `width` nodes, 4-neighbour connectivity
    Grid { width: usize },
    /// Every node hears every other
    FullMesh,
}

impl std::fmt::Display for TopologyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TopologyKind::Chain => write!(f, "chain"),
            TopologyKind::Ring => write!(f, "ring"),
            TopologyKind::Grid { width } => write!(f, "grid (width {})", width),
            TopologyKind::FullMesh => write!(f, "full mesh"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LinkState {
    pub metric: Metric,
    pub up: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Topology {
    node_count: usize,
    /// Keyed by (lower index, higher index)
    links: BTreeMap<(usize, usize), LinkState>,
}

fn key(a: usize, b: usize) -> (usize, usize) {
    (a.min(b), a.max(b))
}

impl Topology {
    /// Nodes without any links
    pub fn new(node_count: usize) -> Self {
        Self {
            node_count,
            links: BTreeMap::new(),
        }
    }

    pub fn build(kind: TopologyKind, node_count: usize, metric: Metric) -> Self {
        match kind {
            TopologyKind::Chain => Self::chain(node_count, metric),
            TopologyKind::Ring => Self::ring(node_count, metric),
            TopologyKind::Grid { width } => Self::grid(width, node_count.div_ceil(width.max(1)), metric),
            TopologyKind::FullMesh => Self::full_mesh(node_count, metric),
        }
    }

    pub fn chain(node_count: usize, metric: Metric) -> Self {
        let mut topology = Self::new(node_count);
        for i in 1..node_count {
            topology.links.insert((i - 1, i), LinkState { metric, up: true });
        }
        topology
    }

    pub fn ring(node_count: usize, metric: Metric) -> Self {
        let mut topology = Self::chain(node_count, metric);
        if node_count > 2 {
            topology.links.insert((0, node_count - 1), LinkState { metric, up: true });
        }
        topology
    }

    /// `width` x `height` grid; node `r * width + c` sits at row r, column c
    pub fn grid(width: usize, height: usize, metric: Metric) -> Self {
        let width = width.max(1);
        let mut topology = Self::new(width * height);
        for r in 0..height {
            for c in 0..width {
                let n = r * width + c;
                if c + 1 < width {
                    topology.links.insert((n, n + 1), LinkState { metric, up: true });
                }
                if r + 1 < height {
                    topology.links.insert((n, n + width), LinkState { metric, up: true });
                }
            }
        }
        topology
    }

    pub fn full_mesh(node_count: usize, metric: Metric) -> Self {
        let mut topology = Self::new(node_count);
        for a in 0..node_count {
            for b in a + 1..node_count {
                topology.links.insert((a, b), LinkState { metric, up: true });
            }
        }
        topology
    }

    /// Add (or replace) a link
    pub fn add_link(&mut self, a: usize, b: usize, metric: Metric) -> MeshResult<()> {
        self.check(a)?;
        self.check(b)?;
        if a == b {
            return Err(MeshError::Config(format!("self link on node {}", a)));
        }
        self.links.insert(key(a, b), LinkState { metric, up: true });
        Ok(())
    }

    /// Take a link down. Returns false if it was already down.
    pub fn break_link(&mut self, a: usize, b: usize) -> MeshResult<bool> {
        self.set_up(a, b, false)
    }

    pub fn restore_link(&mut self, a: usize, b: usize) -> MeshResult<bool> {
        self.set_up(a, b, true)
    }

    fn set_up(&mut self, a: usize, b: usize, up: bool) -> MeshResult<bool> {
        self.check(a)?;
        self.check(b)?;
        let link = self
            .links
            .get_mut(&key(a, b))
            .ok_or_else(|| MeshError::Config(format!("no link between {} and {}", a, b)))?;
        let changed = link.up != up;
        link.up = up;
        Ok(changed)
    }

    fn check(&self, node: usize) -> MeshResult<()> {
        if node < self.node_count {
            Ok(())
        } else {
            Err(MeshError::NodeOutOfRange(node))
        }
    }

    pub fn node_count(&self) -> usize {
        self.node_count
    }

    pub fn is_up(&self, a: usize, b: usize) -> bool {
        self.links.get(&key(a, b)).is_some_and(|l| l.up)
    }

    /// Cost of a working link
    pub fn link_metric(&self, a: usize, b: usize) -> Option<Metric> {
        self.links.get(&key(a, b)).filter(|l| l.up).map(|l| l.metric)
    }

    /// Nodes reachable from `node` in one hop over working links
    pub fn neighbours(&self, node: usize) -> Vec<usize> {
        self.links
            .iter()
            .filter(|(_, l)| l.up)
            .filter_map(|(&(a, b), _)| match node {
                n if n == a => Some(b),
                n if n == b => Some(a),
                _ => None,
            })
            .collect()
    }

    pub fn links(&self) -> impl Iterator<Item = ((usize, usize), LinkState)> + '_ {
        self.links.iter().map(|(k, l)| (*k, *l))
    }

    /// Adjacency list over working links
    pub fn adjacency(&self) -> Vec<Vec<usize>> {
        (0..self.node_count).map(|n| self.neighbours(n)).collect()
    }

    /// Check if every node is reachable from node 0 over working links
    pub fn is_connected(&self) -> bool {
        if self.node_count == 0 {
            return true;
        }
        let adj = self.adjacency();
        let mut visited = vec![false; self.node_count];
        let mut stack = vec![0usize];
        while let Some(node) = stack.pop() {
            if visited[node] {
                continue;
            }
            visited[node] = true;
            stack.extend(adj[node].iter().copied().filter(|n| !visited[*n]));
        }
        visited.iter().all(|v| *v)
    }

    /// Sum of link costs along the shortest path, or None if unreachable
    pub fn shortest_path_metric(&self, from: usize, to: usize) -> Option<Metric> {
        if from >= self.node_count || to >= self.node_count {
            return None;
        }
        let mut best = vec![None::<Metric>; self.node_count];
        let mut done = vec![false; self.node_count];
        best[from] = Some(0);
        loop {
            let current = (0..self.node_count)
                .filter(|n| !done[*n])
                .filter_map(|n| best[n].map(|m| (m, n)))
                .min();
            let Some((metric, node)) = current else {
                break;
            };
            if node == to {
                return Some(metric);
            }
            done[node] = true;
            for next in self.neighbours(node) {
                let cost = crate::metric::accumulate(metric, self.link_metric(node, next).unwrap_or(Metric::MAX));
                if best[next].map_or(true, |m| cost < m) {
                    best[next] = Some(cost);
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain() {
        let t = Topology::chain(4, 10);
        assert_eq!(t.neighbours(0), vec![1]);
        assert_eq!(t.neighbours(2), vec![1, 3]);
        assert!(t.is_connected());
        assert_eq!(t.shortest_path_metric(0, 3), Some(30));
    }

    #[test]
    fn test_grid_and_ring() {
        let t = Topology::grid(3, 2, 1);
        assert_eq!(t.node_count(), 6);
        assert_eq!(t.neighbours(4), vec![1, 3, 5]);
        assert_eq!(t.links().count(), 7);

        let r = Topology::ring(5, 1);
        assert_eq!(r.neighbours(0), vec![1, 4]);
        assert_eq!(r.shortest_path_metric(0, 3), Some(2));
    }

    #[test]
    fn test_build_grid_rounds_up_rows() {
        let t = Topology::build(TopologyKind::Grid { width: 3 }, 7, 1);
        assert_eq!(t.node_count(), 9);
    }

    #[test]
    fn test_break_and_restore() {
        let mut t = Topology::chain(3, 5);
        assert!(t.break_link(1, 2).unwrap());
        assert!(!t.break_link(2, 1).unwrap());
        assert!(!t.is_up(1, 2));
        assert_eq!(t.link_metric(1, 2), None);
        assert!(!t.is_connected());
        assert_eq!(t.shortest_path_metric(0, 2), None);
        assert!(t.restore_link(1, 2).unwrap());
        assert!(t.is_connected());
    }

    #[test]
    fn test_invalid_links() {
        let mut t = Topology::new(2);
        assert_eq!(t.add_link(0, 5, 1), Err(MeshError::NodeOutOfRange(5)));
        assert!(t.add_link(1, 1, 1).is_err());
        assert!(t.break_link(0, 1).is_err());
        t.add_link(1, 0, 7).unwrap();
        assert_eq!(t.link_metric(0, 1), Some(7));
    }

    #[test]
    fn test_full_mesh() {
        let t = Topology::full_mesh(4, 1);
        assert_eq!(t.links().count(), 6);
        assert_eq!(t.neighbours(3), vec![0, 1, 2]);
    }
}
