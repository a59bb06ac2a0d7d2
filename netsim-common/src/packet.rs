use bytes::Bytes;

use crate::address::MacAddress;

/// A simulated frame: an immutable payload plus the addressing metadata the link layer needs.
///
/// Cloning a packet is a logical copy: the payload is reference counted, so handing the same
/// frame to many receivers never copies bytes.
///
/// A packet's uid is `0` until a device queues it; the device then stamps it with the next uid
/// of its channel, so uids are unique per channel and identical across repeated runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    uid: u64,
    source: MacAddress,
    destination: MacAddress,
    protocol: u16,
    payload: Bytes,
}

impl Packet {
    /// Creates an unsent packet: uid `0`, broadcast destination and no protocol.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            uid: 0,
            source: MacAddress::default(),
            destination: MacAddress::BROADCAST,
            protocol: 0,
            payload: payload.into(),
        }
    }

    /// Returns the packet with the given link-layer addressing.
    pub fn with_addressing(
        mut self,
        source: MacAddress,
        destination: MacAddress,
        protocol: u16,
    ) -> Self {
        self.source = source;
        self.destination = destination;
        self.protocol = protocol;
        self
    }

    /// Returns the packet with the given uid.
    pub fn with_uid(mut self, uid: u64) -> Self {
        self.uid = uid;
        self
    }

    /// Trace identity of the packet, shared by all of its copies.
    #[inline]
    pub fn uid(&self) -> u64 {
        self.uid
    }

    /// Link-layer source address.
    #[inline]
    pub fn source(&self) -> MacAddress {
        self.source
    }

    /// Link-layer destination address.
    #[inline]
    pub fn destination(&self) -> MacAddress {
        self.destination
    }

    /// Protocol number of the payload, e.g. `0x0800` for IPv4.
    #[inline]
    pub fn protocol(&self) -> u16 {
        self.protocol
    }

    /// The payload bytes.
    #[inline]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Size of the packet on the wire, in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.payload.len()
    }
}
