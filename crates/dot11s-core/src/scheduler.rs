//! Timers and the discrete-event queue
//!
//! Protocol objects never hold callbacks into themselves. Instead they arm
//! a [`Timer`] through [`MeshEnvironment::schedule`](crate::traits::MeshEnvironment::schedule),
//! keep the returned [`TimerId`], and cancel it when they leave the state
//! that armed it. When the timer fires, the owner routes the [`Timer`] value
//! back to the protocol object, which compares the id with the one it
//! stored and ignores stale firings.
//!
//! [`EventQueue`] is the simulation kernel used by the simulator and by
//! unit tests: a min-heap ordered by (time, insertion order) with O(1)
//! cancelation.

use crate::address::{InterfaceId, MacAddress};
use crate::time::SimTime;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::Duration;

/// Handle of a scheduled event, used for cancelation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl TimerId {
    /// Raw id value
    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Peer link timers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerLinkTimer {
    /// Open retransmission (dot11MeshRetryTimeout)
    Retry,
    /// Waiting for the peer's Open after our Confirm was acknowledged
    Confirm,
    /// Close handshake guard (dot11MeshHoldingTimeout)
    Holding,
    /// No beacon heard from the peer for max_beacon_loss intervals
    BeaconLoss,
}

/// Every timer the protocol stack can arm
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Timer {
    /// Per-link handshake timer
    PeerLink {
        interface: InterfaceId,
        peer: MacAddress,
        kind: PeerLinkTimer,
    },
    /// Path discovery retry for a destination
    PreqRetry { destination: MacAddress },
    /// Root: next proactive PREQ
    ProactivePreq,
    /// Root: next root announcement
    Rann,
}

/// Discrete-event queue with cancelable entries
#[derive(Debug)]
pub struct EventQueue<T> {
    heap: BinaryHeap<Reverse<(SimTime, u64)>>,
    pending: HashMap<u64, T>,
    next_id: u64,
    now: SimTime,
}

impl<T> EventQueue<T> {
    /// Create an empty queue at time zero
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            pending: HashMap::new(),
            next_id: 1,
            now: Duration::ZERO,
        }
    }

    /// Current simulated time
    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Schedule an event `delay` after the current time
    pub fn schedule(&mut self, delay: Duration, event: T) -> TimerId {
        self.schedule_at(self.now + delay, event)
    }

    /// Schedule an event at an absolute time.
    ///
    /// Times in the past are clamped to now.
    pub fn schedule_at(&mut self, at: SimTime, event: T) -> TimerId {
        let at = at.max(self.now);
        let id = self.next_id;
        self.next_id += 1;
        self.heap.push(Reverse((at, id)));
        self.pending.insert(id, event);
        TimerId(id)
    }

    /// Cancel a scheduled event. Returns false if it already fired.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        self.pending.remove(&id.0).is_some()
    }

    /// Check whether an event is still pending
    pub fn is_pending(&self, id: TimerId) -> bool {
        self.pending.contains_key(&id.0)
    }

    /// Time of the next live event
    pub fn peek_time(&mut self) -> Option<SimTime> {
        self.discard_canceled();
        self.heap.peek().map(|Reverse((at, _))| *at)
    }

    /// Pop the next live event and advance the clock to it
    pub fn pop(&mut self) -> Option<(SimTime, TimerId, T)> {
        while let Some(Reverse((at, id))) = self.heap.pop() {
            if let Some(event) = self.pending.remove(&id) {
                self.now = at;
                return Some((at, TimerId(id), event));
            }
        }
        None
    }

    /// Advance the clock without processing events.
    ///
    /// Never moves the clock backwards or past a pending event.
    pub fn advance_to(&mut self, at: SimTime) {
        let limit = self.peek_time().unwrap_or(at);
        self.now = self.now.max(at.min(limit));
    }

    /// Number of live events
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Check if no live events remain
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn discard_canceled(&mut self) {
        while let Some(Reverse((_, id))) = self.heap.peek() {
            if self.pending.contains_key(id) {
                break;
            }
            self.heap.pop();
        }
    }
}

impl<T> Default for EventQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
