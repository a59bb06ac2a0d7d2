use std::collections::VecDeque;

use netsim_common::Packet;

/// Default capacity of a device's transmit queue, in packets.
pub const DEFAULT_QUEUE_SIZE: usize = 100;

/// A FIFO packet queue that drops new arrivals when full.
#[derive(Debug, Clone)]
pub struct DropTailQueue {
    packets: VecDeque<Packet>,
    max_packets: usize,
    /// Total packets rejected because the queue was full.
    dropped: usize,
}

impl Default for DropTailQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_SIZE)
    }
}

impl DropTailQueue {
    /// An empty queue holding at most `max_packets`.
    pub fn new(max_packets: usize) -> Self {
        Self { packets: VecDeque::new(), max_packets, dropped: 0 }
    }

    /// Appends a packet. Returns the packet back if the queue is full.
    pub fn enqueue(&mut self, packet: Packet) -> Result<(), Packet> {
        if self.packets.len() >= self.max_packets {
            self.dropped += 1;
            return Err(packet);
        }

        self.packets.push_back(packet);
        Ok(())
    }

    /// Removes the oldest packet.
    pub fn dequeue(&mut self) -> Option<Packet> {
        self.packets.pop_front()
    }

    /// The oldest packet, without removing it.
    pub fn peek(&self) -> Option<&Packet> {
        self.packets.front()
    }

    /// Drops every queued packet, returning how many there were.
    pub fn clear(&mut self) -> usize {
        let n = self.packets.len();
        self.packets.clear();
        n
    }

    /// Number of queued packets.
    #[inline]
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    /// Returns `true` if nothing is queued.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Maximum number of queued packets.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.max_packets
    }

    /// Total packets rejected because the queue was full.
    #[inline]
    pub fn dropped(&self) -> usize {
        self.dropped
    }
}
