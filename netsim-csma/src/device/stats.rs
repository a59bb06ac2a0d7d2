use std::sync::atomic::{AtomicUsize, Ordering};

/// Statistics for a CSMA net device. Shared between the device handle and its scheduled events.
#[derive(Debug, Default)]
pub struct DeviceStats {
    /// Total packets put on the wire
    tx_packets: AtomicUsize,
    /// Total bytes put on the wire
    tx_bytes: AtomicUsize,
    /// Total packets handed up by the receive path
    rx_packets: AtomicUsize,
    /// Total bytes handed up by the receive path
    rx_bytes: AtomicUsize,
    /// Total backoffs taken because the medium was busy
    backoffs: AtomicUsize,
    /// Packets dropped by the transmit machine: retries ran out, the device was detached
    /// or sending was disabled
    tx_drops: AtomicUsize,
    /// Packets refused by `send` (queue full, send disabled)
    mac_tx_drops: AtomicUsize,
    /// Frames ignored because receiving is disabled or the error model marked them corrupt
    rx_drops: AtomicUsize,
}

impl DeviceStats {
    #[inline]
    pub(crate) fn increment_tx(&self, bytes: usize) {
        self.tx_packets.fetch_add(1, Ordering::Relaxed);
        self.tx_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_rx(&self, bytes: usize) {
        self.rx_packets.fetch_add(1, Ordering::Relaxed);
        self.rx_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_backoffs(&self) {
        self.backoffs.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_tx_drops(&self) {
        self.add_tx_drops(1);
    }

    #[inline]
    pub(crate) fn add_tx_drops(&self, packets: usize) {
        self.tx_drops.fetch_add(packets, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_mac_tx_drops(&self) {
        self.mac_tx_drops.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_rx_drops(&self) {
        self.rx_drops.fetch_add(1, Ordering::Relaxed);
    }

    /// Packets put on the wire.
    #[inline]
    pub fn tx_packets(&self) -> usize {
        self.tx_packets.load(Ordering::Relaxed)
    }

    /// Bytes put on the wire.
    #[inline]
    pub fn tx_bytes(&self) -> usize {
        self.tx_bytes.load(Ordering::Relaxed)
    }

    /// Packets handed up by the receive path.
    #[inline]
    pub fn rx_packets(&self) -> usize {
        self.rx_packets.load(Ordering::Relaxed)
    }

    /// Bytes handed up by the receive path.
    #[inline]
    pub fn rx_bytes(&self) -> usize {
        self.rx_bytes.load(Ordering::Relaxed)
    }

    /// Backoffs taken because the medium was busy.
    #[inline]
    pub fn backoffs(&self) -> usize {
        self.backoffs.load(Ordering::Relaxed)
    }

    /// Packets dropped by the transmit machine.
    #[inline]
    pub fn tx_drops(&self) -> usize {
        self.tx_drops.load(Ordering::Relaxed)
    }

    /// Packets refused by `send`.
    #[inline]
    pub fn mac_tx_drops(&self) -> usize {
        self.mac_tx_drops.load(Ordering::Relaxed)
    }

    /// Frames dropped on receive.
    #[inline]
    pub fn rx_drops(&self) -> usize {
        self.rx_drops.load(Ordering::Relaxed)
    }
}
