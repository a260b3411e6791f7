//! Packets waiting for path discovery

use crate::address::MacAddress;
use crate::frame::DataPacket;
use crate::traits::{Ingress, RouteReplyCallback};
use std::collections::VecDeque;
use std::fmt;

/// Packet held until its destination resolves
pub struct QueuedPacket {
    /// Payload with its HWMP tag
    pub packet: DataPacket,
    pub source: MacAddress,
    pub destination: MacAddress,
    /// Ethertype
    pub protocol: u16,
    /// Where the packet entered this station
    pub ingress: Ingress,
    /// Called once the packet leaves the queue
    pub reply: RouteReplyCallback,
}

impl fmt::Debug for QueuedPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedPacket")
            .field("uid", &self.packet.uid)
            .field("source", &self.source)
            .field("destination", &self.destination)
            .field("protocol", &self.protocol)
            .finish()
    }
}

/// Bounded FIFO shared by all destinations
#[derive(Debug)]
pub struct PacketQueue {
    packets: VecDeque<QueuedPacket>,
    capacity: usize,
}

impl PacketQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            packets: VecDeque::new(),
            capacity,
        }
    }

    /// Enqueue; hands the packet back when full
    pub fn push(&mut self, packet: QueuedPacket) -> Result<(), QueuedPacket> {
        if self.packets.len() >= self.capacity {
            return Err(packet);
        }
        self.packets.push_back(packet);
        Ok(())
    }

    /// Remove every packet for `destination`, oldest first
    pub fn take_for(&mut self, destination: MacAddress) -> Vec<QueuedPacket> {
        let (matching, rest): (VecDeque<_>, VecDeque<_>) = self
            .packets
            .drain(..)
            .partition(|p| p.destination == destination);
        self.packets = rest;
        matching.into()
    }

    /// Remove everything
    pub fn take_all(&mut self) -> Vec<QueuedPacket> {
        self.packets.drain(..).collect()
    }

    /// Distinct destinations with waiting packets, oldest first
    pub fn destinations(&self) -> Vec<MacAddress> {
        let mut out: Vec<MacAddress> = Vec::new();
        for packet in &self.packets {
            if !out.contains(&packet.destination) {
                out.push(packet.destination);
            }
        }
        out
    }

    pub fn count_for(&self, destination: MacAddress) -> usize {
        self.packets.iter().filter(|p| p.destination == destination).count()
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }
}
