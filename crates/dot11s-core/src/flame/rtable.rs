//! FLAME routing table: one path per source, learned from data frames

use crate::address::{InterfaceId, MacAddress, INTERFACE_ANY};
use crate::metric::supersedes;
use crate::time::SimTime;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Cost of an unusable path
pub const MAX_COST: u8 = u8::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FlameRoute {
    pub retransmitter: MacAddress,
    pub interface: InterfaceId,
    pub cost: u8,
    pub seqnum: u16,
    pub expires_at: SimTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FlameLookupResult {
    pub retransmitter: MacAddress,
    pub interface: InterfaceId,
    pub cost: u8,
    pub seqnum: u16,
}

impl FlameLookupResult {
    pub fn invalid() -> Self {
        Self {
            retransmitter: MacAddress::BROADCAST,
            interface: INTERFACE_ANY,
            cost: MAX_COST,
            seqnum: 0,
        }
    }

    pub fn is_valid(&self) -> bool {
        *self != Self::invalid()
    }
}

#[derive(Debug, Clone)]
pub struct FlameRtable {
    lifetime: Duration,
    routes: BTreeMap<MacAddress, FlameRoute>,
}

impl FlameRtable {
    pub fn new(lifetime: Duration) -> Self {
        Self {
            lifetime,
            routes: BTreeMap::new(),
        }
    }

    /// Install or refresh the path to `destination`. Returns false when the
    /// stored path is fresher.
    pub fn add_path(
        &mut self,
        destination: MacAddress,
        retransmitter: MacAddress,
        interface: InterfaceId,
        cost: u8,
        seqnum: u16,
        now: SimTime,
    ) -> bool {
        let route = FlameRoute {
            retransmitter,
            interface,
            cost,
            seqnum,
            expires_at: now + self.lifetime,
        };
        match self.routes.get_mut(&destination) {
            Some(stored) => {
                let expired = stored.expires_at <= now;
                if !supersedes(seqnum, cost, stored.seqnum, stored.cost, expired) {
                    return false;
                }
                *stored = route;
            }
            None => {
                self.routes.insert(destination, route);
            }
        }
        true
    }

    pub fn lookup(&self, destination: MacAddress, now: SimTime) -> FlameLookupResult {
        match self.routes.get(&destination) {
            Some(route) if route.expires_at > now => FlameLookupResult {
                retransmitter: route.retransmitter,
                interface: route.interface,
                cost: route.cost,
                seqnum: route.seqnum,
            },
            _ => FlameLookupResult::invalid(),
        }
    }

    /// Drop every path through `retransmitter`, returning the destinations
    pub fn delete_paths_via(&mut self, retransmitter: MacAddress) -> Vec<MacAddress> {
        let gone: Vec<MacAddress> = self
            .routes
            .iter()
            .filter(|(_, route)| route.retransmitter == retransmitter)
            .map(|(dst, _)| *dst)
            .collect();
        for dst in &gone {
            self.routes.remove(dst);
        }
        gone
    }

    pub fn purge(&mut self, now: SimTime) {
        self.routes.retain(|_, route| route.expires_at > now);
    }

    pub fn routes(&self) -> impl Iterator<Item = (&MacAddress, &FlameRoute)> {
        self.routes.iter()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
