//! Recording environment for unit tests

use crate::address::{InterfaceId, MacAddress};
use crate::frame::{DataFrame, ManagementBody, ManagementFrame, RoutingFrame};
use crate::scheduler::{EventQueue, Timer, TimerId};
use crate::time::SimTime;
use crate::traits::{MeshEnvironment, PeerLinkHost, PeerLinkStatus};
use std::time::Duration;

#[derive(Debug, Clone)]
pub(crate) struct SentFrame {
    pub interface: InterfaceId,
    pub receiver: MacAddress,
    pub frame: ManagementFrame,
}

impl SentFrame {
    pub fn routing(&self) -> Option<&RoutingFrame> {
        match &self.frame.body {
            ManagementBody::Routing(r) => Some(r),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct TestEnv {
    pub queue: EventQueue<Timer>,
    pub sent: Vec<SentFrame>,
    pub data: Vec<(InterfaceId, MacAddress, DataFrame)>,
    pub statuses: Vec<PeerLinkStatus>,
    pub mismatches: Vec<(InterfaceId, MacAddress)>,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pop the next timer, advancing the clock
    pub fn next_timer(&mut self) -> Option<(TimerId, Timer)> {
        self.queue.pop().map(|(_, id, timer)| (id, timer))
    }

    pub fn advance(&mut self, by: Duration) {
        let target = self.queue.now() + by;
        self.queue.advance_to(target);
    }

    pub fn take_sent(&mut self) -> Vec<SentFrame> {
        std::mem::take(&mut self.sent)
    }
}

impl MeshEnvironment for TestEnv {
    fn now(&self) -> SimTime {
        self.queue.now()
    }

    fn schedule(&mut self, delay: Duration, timer: Timer) -> TimerId {
        self.queue.schedule(delay, timer)
    }

    fn cancel(&mut self, id: TimerId) {
        self.queue.cancel(id);
    }

    fn send_management_frame(&mut self, interface: InterfaceId, receiver: MacAddress, frame: ManagementFrame) {
        self.sent.push(SentFrame {
            interface,
            receiver,
            frame,
        });
    }

    fn send_data_frame(&mut self, interface: InterfaceId, receiver: MacAddress, frame: DataFrame) {
        self.data.push((interface, receiver, frame));
    }
}

impl PeerLinkHost for TestEnv {
    fn on_peer_link_status(&mut self, status: &PeerLinkStatus) {
        self.statuses.push(*status);
    }

    fn on_configuration_mismatch(&mut self, interface: InterfaceId, peer: MacAddress) {
        self.mismatches.push((interface, peer));
    }
}
