use std::rc::Rc;

use netsim_common::{constants::MTU_ETHERNET, MacAddress, Packet, Time};
use netsim_core::{SchedulerError, Simulator};
use thiserror::Error;

mod net_device;
pub use net_device::*;

mod stats;
pub use stats::DeviceStats;

use crate::{
    backoff::{BackoffError, BackoffOptions},
    channel::ChannelError,
    queue::DEFAULT_QUEUE_SIZE,
    DeviceId,
};

/// Errors returned by [`CsmaNetDevice`].
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The device options are unusable.
    #[error("invalid device parameter: {0}")]
    InvalidParameter(&'static str),
    /// Sending is disabled; the packet was counted as a MAC drop.
    #[error("sending is disabled on this device")]
    SendDisabled,
    /// The device was never attached to a channel.
    #[error("device is not attached to a channel")]
    NotAttached,
    /// The packet is larger than the device MTU.
    #[error("packet of {size} bytes exceeds the MTU of {mtu} bytes")]
    MtuExceeded {
        /// Size of the rejected packet.
        size: usize,
        /// The device MTU.
        mtu: usize,
    },
    /// The transmit queue is full; the packet was counted as a MAC drop.
    #[error("transmit queue full")]
    QueueFull,
    /// The device was torn down by [`CsmaNetDevice::dispose`].
    #[error("device disposed")]
    Disposed,
    /// A transmit step was invoked out of order.
    #[error("{operation} is illegal in transmit state {state:?}")]
    InvalidState {
        /// The step.
        operation: &'static str,
        /// The state the machine was in.
        state: TxState,
    },
    /// The channel refused a transition.
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),
    /// A transmit step could not be scheduled.
    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
    /// The backoff options are invalid.
    #[error("backoff error: {0}")]
    Backoff(#[from] BackoffError),
}

/// State of a device's transmit machine.
///
/// ```text
/// Ready --(medium busy)--> Backoff --(retry or abort)--> Ready
/// Ready --(medium idle)--> Busy --(tx time)--> Gap --(interframe gap)--> Ready
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxState {
    /// Free to start a transmission.
    Ready,
    /// Waiting out a backoff before retrying the current packet.
    Backoff,
    /// Serializing the current packet onto the channel.
    Busy,
    /// Waiting out the interframe gap after a transmission.
    Gap,
}

/// Invoked with `(sim, receiver id, packet, sender id)` for every frame handed up by a device.
pub type ReceiveCallback = Rc<dyn Fn(&mut Simulator, DeviceId, &Packet, DeviceId)>;

/// Decides whether a received frame is corrupt and must be dropped.
pub type ReceiveErrorModel = Rc<dyn Fn(&Packet) -> bool>;

/// Configuration of a [`CsmaNetDevice`].
#[derive(Debug, Clone)]
pub struct CsmaDeviceOptions {
    /// The device's MAC address. The channel assigns one on attach if unset.
    pub(crate) address: Option<MacAddress>,
    /// Largest packet `send` accepts, in bytes.
    pub(crate) mtu: usize,
    /// Capacity of the transmit queue, in packets.
    pub(crate) queue_size: usize,
    pub(crate) send_enable: bool,
    pub(crate) receive_enable: bool,
    /// Pause after each transmission. If unset, 96 bit times at the channel's data rate.
    pub(crate) interframe_gap: Option<Time>,
    pub(crate) backoff: BackoffOptions,
}

impl Default for CsmaDeviceOptions {
    fn default() -> Self {
        Self {
            address: None,
            mtu: MTU_ETHERNET,
            queue_size: DEFAULT_QUEUE_SIZE,
            send_enable: true,
            receive_enable: true,
            interframe_gap: None,
            backoff: BackoffOptions::default(),
        }
    }
}

impl CsmaDeviceOptions {
    /// Sets a fixed MAC address.
    pub fn address(mut self, address: MacAddress) -> Self {
        self.address = Some(address);
        self
    }

    /// Sets the largest packet `send` accepts, in bytes.
    pub fn mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    /// Sets the transmit queue capacity, in packets.
    pub fn queue_size(mut self, queue_size: usize) -> Self {
        self.queue_size = queue_size;
        self
    }

    /// Starts the device with sending enabled or disabled.
    pub fn send_enable(mut self, enable: bool) -> Self {
        self.send_enable = enable;
        self
    }

    /// Starts the device with receiving enabled or disabled.
    pub fn receive_enable(mut self, enable: bool) -> Self {
        self.receive_enable = enable;
        self
    }

    /// Overrides the interframe gap derived from the channel's data rate. Must not be negative.
    pub fn interframe_gap(mut self, gap: Time) -> Self {
        self.interframe_gap = Some(gap);
        self
    }

    /// Sets the backoff used while the medium is busy.
    pub fn backoff(mut self, backoff: BackoffOptions) -> Self {
        self.backoff = backoff;
        self
    }
}
