//! Neighbour beacon bookkeeping and beacon collision avoidance

use crate::address::MacAddress;
use crate::ie::{BeaconTimingUnit, IeBeaconTiming};
use crate::time::{to_tu, SimTime};
use rand::Rng;
use std::collections::BTreeMap;
use std::time::Duration;

/// Last beacon heard from one neighbour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeaconInfo {
    pub aid: u16,
    pub last_beacon: SimTime,
    pub interval: Duration,
}

/// Beacons heard on one interface, keyed by neighbour
#[derive(Debug, Clone, Default)]
pub struct NeighbourBeacons {
    neighbours: BTreeMap<MacAddress, BeaconInfo>,
}

impl NeighbourBeacons {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a beacon. A neighbour gets an association id on its first
    /// beacon and keeps it; `known_aid` is the id a peer link already
    /// assigned it.
    pub fn record(
        &mut self,
        peer: MacAddress,
        at: SimTime,
        interval: Duration,
        known_aid: Option<u16>,
        next_aid: &mut u16,
    ) -> u16 {
        let info = self.neighbours.entry(peer).or_insert_with(|| {
            let aid = known_aid.unwrap_or_else(|| {
                let aid = *next_aid;
                *next_aid = next_aid.wrapping_add(1).max(1);
                aid
            });
            BeaconInfo {
                aid,
                last_beacon: at,
                interval,
            }
        });
        info.last_beacon = at;
        info.interval = interval;
        info.aid
    }

    pub fn aid(&self, peer: MacAddress) -> Option<u16> {
        self.neighbours.get(&peer).map(|info| info.aid)
    }

    pub fn get(&self, peer: MacAddress) -> Option<&BeaconInfo> {
        self.neighbours.get(&peer)
    }

    pub fn len(&self) -> usize {
        self.neighbours.len()
    }

    pub fn is_empty(&self) -> bool {
        self.neighbours.is_empty()
    }

    /// Beacon Timing element for our next beacon. Neighbours silent for
    /// more than three of their intervals are forgotten.
    pub fn timing_element(&mut self, now: SimTime) -> IeBeaconTiming {
        self.neighbours
            .retain(|_, info| info.last_beacon + info.interval * 3 >= now);
        let mut element = IeBeaconTiming::new();
        for info in self.neighbours.values() {
            element.add_unit(BeaconTimingUnit {
                aid: info.aid,
                last_beacon: to_tu(info.last_beacon),
                beacon_interval: to_tu(info.interval),
            });
        }
        element
    }
}

/// Shift in TU to apply to our next beacon, or zero.
///
/// A collision exists when a two-hop neighbour reported in `units` beacons
/// with our interval and its next TBTT lands on ours. The unit with
/// `own_aid`, the id the reporting neighbour gave us, describes our own
/// beacon and is skipped. The shift is a random non-zero offset within
/// `max_shift` that keeps the beacon in the future.
#[allow(clippy::too_many_arguments)]
pub fn next_beacon_shift<R: Rng>(
    now: SimTime,
    own_next_tbtt: SimTime,
    own_interval: Duration,
    own_aid: u16,
    units: &[BeaconTimingUnit],
    max_shift: u32,
    rng: &mut R,
) -> i32 {
    if max_shift == 0 {
        return 0;
    }
    let interval = to_tu(own_interval);
    let our_tbtt = i64::from(to_tu(own_next_tbtt));
    let now_tu = i64::from(to_tu(now));
    if interval == 0 {
        return 0;
    }
    let collision = units
        .iter()
        .filter(|unit| unit.aid != own_aid && unit.beacon_interval == interval)
        .any(|unit| {
            let step = i64::from(interval);
            let mut tbtt = i64::from(unit.last_beacon);
            while tbtt <= now_tu {
                tbtt += step;
            }
            tbtt == our_tbtt
        });
    if !collision {
        return 0;
    }
    let max = i32::try_from(max_shift).unwrap_or(i32::MAX);
    let magnitude = rng.gen_range(1..=max);
    let shift = if rng.gen_bool(0.5) { magnitude } else { -magnitude };
    if our_tbtt + i64::from(shift) > now_tu {
        shift
    } else {
        magnitude
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::tu;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_aids_are_stable() {
        let mut beacons = NeighbourBeacons::new();
        let mut next = 1;
        let a = beacons.record(MacAddress::from_index(1), tu(0), tu(100), None, &mut next);
        let b = beacons.record(MacAddress::from_index(2), tu(5), tu(100), None, &mut next);
        let a2 = beacons.record(MacAddress::from_index(1), tu(100), tu(100), None, &mut next);
        assert_eq!((a, b, a2), (1, 2, 1));
        assert_eq!(next, 3);

        // a neighbour already peered keeps the link's id
        let c = beacons.record(MacAddress::from_index(3), tu(7), tu(100), Some(9), &mut next);
        assert_eq!(c, 9);
        assert_eq!(next, 3);
    }

    #[test]
    fn test_timing_element_forgets_silent_neighbours() {
        let mut beacons = NeighbourBeacons::new();
        let mut next = 1;
        beacons.record(MacAddress::from_index(1), tu(0), tu(100), None, &mut next);
        beacons.record(MacAddress::from_index(2), tu(250), tu(100), None, &mut next);
        let element = beacons.timing_element(tu(320));
        assert_eq!(element.units().len(), 1);
        assert_eq!(element.units()[0].aid, 2);
        assert_eq!(element.units()[0].last_beacon, 250);
        assert_eq!(beacons.len(), 1);
    }

    #[test]
    fn test_collision_produces_shift() {
        let mut rng = StdRng::seed_from_u64(7);
        let units = [BeaconTimingUnit {
            aid: 1,
            last_beacon: 50,
            beacon_interval: 100,
        }];
        for _ in 0..32 {
            let shift = next_beacon_shift(tu(120), tu(150), tu(100), 2, &units, 15, &mut rng);
            assert!(shift != 0 && shift.abs() <= 15, "shift {shift}");
        }
    }

    #[test]
    fn test_no_collision_no_shift() {
        let mut rng = StdRng::seed_from_u64(7);
        let units = [
            BeaconTimingUnit {
                aid: 1,
                last_beacon: 60,
                beacon_interval: 100,
            },
            BeaconTimingUnit {
                aid: 2,
                last_beacon: 50,
                beacon_interval: 200,
            },
        ];
        assert_eq!(next_beacon_shift(tu(120), tu(150), tu(100), 3, &units, 15, &mut rng), 0);
    }

    #[test]
    fn test_own_unit_is_not_a_collision() {
        let mut rng = StdRng::seed_from_u64(7);
        // The neighbour heard us at 50 TU and lists us as aid 1
        let units = [BeaconTimingUnit {
            aid: 1,
            last_beacon: 50,
            beacon_interval: 100,
        }];
        assert_eq!(next_beacon_shift(tu(120), tu(150), tu(100), 1, &units, 15, &mut rng), 0);
        assert_ne!(next_beacon_shift(tu(120), tu(150), tu(100), 4, &units, 15, &mut rng), 0);
    }
}
