use std::fmt;

/// A 48-bit IEEE 802 MAC address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    /// `ff:ff:ff:ff:ff:ff`, accepted by every device.
    pub const BROADCAST: Self = Self([0xff; 6]);

    /// An address from its six octets, most significant first.
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// The unicast address with the low 48 bits of `index`, e.g. `00:00:00:00:00:01` for 1.
    ///
    /// Channels hand these out in sequence to devices that were not configured with an address.
    pub const fn from_index(index: u64) -> Self {
        let b = index.to_be_bytes();
        Self([b[2], b[3], b[4], b[5], b[6], b[7]])
    }

    /// The six octets, most significant first.
    #[inline]
    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Returns `true` for [`MacAddress::BROADCAST`].
    #[inline]
    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    /// Group addresses have the least significant bit of the first octet set.
    #[inline]
    pub const fn is_group(&self) -> bool {
        self.0[0] & 0x01 == 0x01
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}
