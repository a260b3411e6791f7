//! HWMP routing table
//!
//! Holds reactive paths (keyed by destination, discovered on demand) and
//! proactive paths (keyed by root, learned from root announcements). Both
//! kinds follow the same freshness rule, see [`supersedes`]. Lookups never
//! fail: a miss yields [`LookupResult::invalid`].
//!
//! Each path carries a precursor list, the neighbours known to forward
//! through us towards that destination. When a next hop breaks, only the
//! precursors of the affected destinations are told.

use crate::address::{InterfaceId, MacAddress, INTERFACE_ANY};
use crate::ie::FailedDestination;
use crate::metric::{supersedes, Metric, MAX_METRIC};
use crate::time::SimTime;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Neighbour depending on us as next hop towards a destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Precursor {
    /// Interface the precursor is reached on
    pub interface: InterfaceId,
    /// Address of the precursor
    pub address: MacAddress,
    /// Time after which the precursor is no longer told about breaks
    pub expires_at: SimTime,
}

/// Stored path, reactive or proactive
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathEntry {
    /// Next hop towards the destination
    pub retransmitter: MacAddress,
    /// Interface the next hop is reached on
    pub interface: InterfaceId,
    /// Cumulative airtime metric to the destination
    pub metric: Metric,
    /// Destination sequence number the path was learned with
    pub seqnum: u32,
    /// Absolute expiry time
    pub expires_at: SimTime,
    /// Neighbours forwarding through us towards the destination
    pub precursors: Vec<Precursor>,
}

impl PathEntry {
    pub fn is_expired(&self, now: SimTime) -> bool {
        self.expires_at <= now
    }

    fn to_result(&self, now: SimTime) -> LookupResult {
        LookupResult {
            retransmitter: self.retransmitter,
            interface: self.interface,
            metric: self.metric,
            seqnum: self.seqnum,
            lifetime: self.expires_at.saturating_sub(now),
        }
    }

    fn add_precursor(&mut self, interface: InterfaceId, address: MacAddress, expires_at: SimTime) {
        match self.precursors.iter_mut().find(|p| p.address == address) {
            Some(existing) => {
                existing.interface = interface;
                existing.expires_at = expires_at;
            }
            None => self.precursors.push(Precursor {
                interface,
                address,
                expires_at,
            }),
        }
    }
}

/// Answer to a routing table query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LookupResult {
    /// Next hop, broadcast when there is no path
    pub retransmitter: MacAddress,
    /// Outgoing interface, [`INTERFACE_ANY`] when there is no path
    pub interface: InterfaceId,
    /// Path metric, [`MAX_METRIC`] when there is no path
    pub metric: Metric,
    /// Destination sequence number
    pub seqnum: u32,
    /// Remaining lifetime (zero once expired)
    pub lifetime: Duration,
}

impl LookupResult {
    /// The "no path" answer
    pub fn invalid() -> Self {
        Self {
            retransmitter: MacAddress::BROADCAST,
            interface: INTERFACE_ANY,
            metric: MAX_METRIC,
            seqnum: 0,
            lifetime: Duration::ZERO,
        }
    }

    pub fn is_valid(&self) -> bool {
        *self != Self::invalid()
    }
}

impl Default for LookupResult {
    fn default() -> Self {
        Self::invalid()
    }
}

/// HWMP routing table of one mesh point
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    reactive: BTreeMap<MacAddress, PathEntry>,
    proactive: BTreeMap<MacAddress, PathEntry>,
    current_root: Option<MacAddress>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the reactive path to `destination`.
    ///
    /// Returns true if the table changed. Precursors of a replaced path
    /// are kept.
    #[allow(clippy::too_many_arguments)]
    pub fn add_reactive_path(
        &mut self,
        destination: MacAddress,
        retransmitter: MacAddress,
        interface: InterfaceId,
        metric: Metric,
        lifetime: Duration,
        seqnum: u32,
        now: SimTime,
    ) -> bool {
        debug_assert!(!destination.is_group(), "reactive path to group address {destination}");
        if destination.is_group() {
            return false;
        }
        Self::install(
            &mut self.reactive,
            destination,
            retransmitter,
            interface,
            metric,
            lifetime,
            seqnum,
            now,
        )
    }

    /// Insert or replace the proactive path to `root`.
    ///
    /// An accepted path makes `root` the current root.
    #[allow(clippy::too_many_arguments)]
    pub fn add_proactive_path(
        &mut self,
        metric: Metric,
        root: MacAddress,
        retransmitter: MacAddress,
        interface: InterfaceId,
        lifetime: Duration,
        seqnum: u32,
        now: SimTime,
    ) -> bool {
        debug_assert!(!root.is_group(), "proactive path to group address {root}");
        if root.is_group() {
            return false;
        }
        let accepted = Self::install(
            &mut self.proactive,
            root,
            retransmitter,
            interface,
            metric,
            lifetime,
            seqnum,
            now,
        );
        if accepted {
            self.current_root = Some(root);
        }
        accepted
    }

    #[allow(clippy::too_many_arguments)]
    fn install(
        paths: &mut BTreeMap<MacAddress, PathEntry>,
        key: MacAddress,
        retransmitter: MacAddress,
        interface: InterfaceId,
        metric: Metric,
        lifetime: Duration,
        seqnum: u32,
        now: SimTime,
    ) -> bool {
        let expires_at = now + lifetime;
        match paths.get_mut(&key) {
            Some(entry) => {
                if !supersedes(seqnum, metric, entry.seqnum, entry.metric, entry.is_expired(now)) {
                    return false;
                }
                entry.retransmitter = retransmitter;
                entry.interface = interface;
                entry.metric = metric;
                entry.seqnum = seqnum;
                entry.expires_at = expires_at;
                true
            }
            None => {
                paths.insert(
                    key,
                    PathEntry {
                        retransmitter,
                        interface,
                        metric,
                        seqnum,
                        expires_at,
                        precursors: Vec::new(),
                    },
                );
                true
            }
        }
    }

    /// Record that `precursor` forwards through us towards `destination`.
    ///
    /// Attaches to the reactive path and, if `destination` is a root, to
    /// its proactive path. Returns false if neither exists.
    pub fn add_precursor(
        &mut self,
        destination: MacAddress,
        interface: InterfaceId,
        precursor: MacAddress,
        lifetime: Duration,
        now: SimTime,
    ) -> bool {
        let expires_at = now + lifetime;
        let mut attached = false;
        if let Some(entry) = self.reactive.get_mut(&destination) {
            entry.add_precursor(interface, precursor, expires_at);
            attached = true;
        }
        if let Some(entry) = self.proactive.get_mut(&destination) {
            entry.add_precursor(interface, precursor, expires_at);
            attached = true;
        }
        attached
    }

    /// Live precursors for `destination`
    pub fn precursors(&self, destination: MacAddress, now: SimTime) -> Vec<Precursor> {
        let mut out: Vec<Precursor> = Vec::new();
        let entries = self
            .reactive
            .get(&destination)
            .into_iter()
            .chain(self.proactive.get(&destination));
        for entry in entries {
            for p in entry.precursors.iter().filter(|p| p.expires_at > now) {
                if !out.iter().any(|o| o.address == p.address && o.interface == p.interface) {
                    out.push(*p);
                }
            }
        }
        out
    }

    pub fn delete_reactive_path(&mut self, destination: MacAddress) -> bool {
        self.reactive.remove(&destination).is_some()
    }

    /// Delete the path to the current root
    pub fn delete_proactive_path(&mut self) -> bool {
        match self.current_root.take() {
            Some(root) => self.proactive.remove(&root).is_some(),
            None => false,
        }
    }

    /// Delete the path to a specific root
    pub fn delete_proactive_path_to(&mut self, root: MacAddress) -> bool {
        if self.current_root == Some(root) {
            self.current_root = None;
        }
        self.proactive.remove(&root).is_some()
    }

    /// Unexpired reactive path to `destination`
    pub fn lookup_reactive(&self, destination: MacAddress, now: SimTime) -> LookupResult {
        match self.reactive.get(&destination) {
            Some(entry) if !entry.is_expired(now) => entry.to_result(now),
            _ => LookupResult::invalid(),
        }
    }

    /// Reactive path to `destination`, even if expired
    pub fn lookup_reactive_expired(&self, destination: MacAddress, now: SimTime) -> LookupResult {
        self.reactive
            .get(&destination)
            .map(|entry| entry.to_result(now))
            .unwrap_or_default()
    }

    /// Unexpired path to the current root
    pub fn lookup_proactive(&self, now: SimTime) -> LookupResult {
        match self.current_root {
            Some(root) => self.lookup_proactive_to(root, now),
            None => LookupResult::invalid(),
        }
    }

    /// Path to the current root, even if expired
    pub fn lookup_proactive_expired(&self, now: SimTime) -> LookupResult {
        self.current_root
            .and_then(|root| self.proactive.get(&root))
            .map(|entry| entry.to_result(now))
            .unwrap_or_default()
    }

    /// Unexpired path to a specific root, current or historical
    pub fn lookup_proactive_to(&self, root: MacAddress, now: SimTime) -> LookupResult {
        match self.proactive.get(&root) {
            Some(entry) if !entry.is_expired(now) => entry.to_result(now),
            _ => LookupResult::invalid(),
        }
    }

    /// Root of the most recently accepted proactive path
    pub fn current_root(&self) -> Option<MacAddress> {
        self.current_root
    }

    /// Path used for forwarding: the reactive path when valid, otherwise
    /// the tree path. A destination that is itself a root is served by its
    /// own proactive path; any other destination goes up the tree towards
    /// the current root.
    pub fn lookup_best(&self, destination: MacAddress, now: SimTime) -> LookupResult {
        let reactive = self.lookup_reactive(destination, now);
        if reactive.is_valid() {
            return reactive;
        }
        let to_root = self.lookup_proactive_to(destination, now);
        if to_root.is_valid() {
            return to_root;
        }
        self.lookup_proactive(now)
    }

    /// Destinations whose best known path leads through `neighbour`.
    ///
    /// Each unit carries the stored sequence number plus one, which
    /// invalidates the path at every node that learned it from us.
    pub fn unreachable_destinations(&self, neighbour: MacAddress, now: SimTime) -> Vec<FailedDestination> {
        let mut keys: Vec<MacAddress> = self.reactive.keys().copied().collect();
        for root in self.proactive.keys() {
            if !self.reactive.contains_key(root) {
                keys.push(*root);
            }
        }
        keys.sort();

        keys.into_iter()
            .filter_map(|destination| {
                let best = self.best_stored(destination, now)?;
                (best.retransmitter == neighbour).then(|| FailedDestination {
                    destination,
                    seqno: best.seqnum.saturating_add(1),
                })
            })
            .collect()
    }

    /// Best stored entry for a destination, preferring live paths
    fn best_stored(&self, destination: MacAddress, now: SimTime) -> Option<&PathEntry> {
        let reactive = self.reactive.get(&destination);
        let proactive = self.proactive.get(&destination);
        match (reactive, proactive) {
            (Some(r), _) if !r.is_expired(now) => Some(r),
            (_, Some(p)) if !p.is_expired(now) => Some(p),
            (Some(r), _) => Some(r),
            (None, p) => p,
        }
    }

    /// Drop paths that expired more than `grace` ago and precursors that
    /// have expired. Returns the number of paths removed.
    ///
    /// Recently expired paths stay so their sequence numbers remain
    /// available to `lookup_*_expired`.
    pub fn purge(&mut self, now: SimTime, grace: Duration) -> usize {
        let cutoff = now.saturating_sub(grace);
        let before = self.reactive.len() + self.proactive.len();
        for paths in [&mut self.reactive, &mut self.proactive] {
            paths.retain(|_, e| !e.is_expired(cutoff));
            for entry in paths.values_mut() {
                entry.precursors.retain(|p| p.expires_at > now);
            }
        }
        if let Some(root) = self.current_root {
            if !self.proactive.contains_key(&root) {
                self.current_root = None;
            }
        }
        before - (self.reactive.len() + self.proactive.len())
    }

    /// All stored reactive paths, expired ones included
    pub fn reactive_paths(&self) -> impl Iterator<Item = (&MacAddress, &PathEntry)> {
        self.reactive.iter()
    }

    /// All stored proactive paths, keyed by root
    pub fn proactive_paths(&self) -> impl Iterator<Item = (&MacAddress, &PathEntry)> {
        self.proactive.iter()
    }

    pub fn len(&self) -> usize {
        self.reactive.len() + self.proactive.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reactive.is_empty() && self.proactive.is_empty()
    }
}
