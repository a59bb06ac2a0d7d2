//! A shared-medium (CSMA) link model for the netsim scheduler.
//!
//! A [`CsmaChannel`] connects any number of [`CsmaNetDevice`]s. Devices sense the carrier before
//! transmitting, back off with truncated binary exponential [`Backoff`] while the medium is busy,
//! and deliver each frame to every other active device after the channel's propagation delay.
//!
//! ```
//! use netsim_common::{DataRate, MacAddress, Packet, Time};
//! use netsim_core::Simulator;
//! use netsim_csma::{CsmaChannel, CsmaChannelOptions, CsmaDeviceOptions, CsmaNetDevice};
//!
//! let mut sim = Simulator::new();
//! let channel = CsmaChannel::new(
//!     CsmaChannelOptions::default().data_rate(DataRate::from_mbps(100)).delay(Time::from_micros(2)),
//! )
//! .unwrap();
//!
//! let a = CsmaNetDevice::new(CsmaDeviceOptions::default()).unwrap();
//! let b = CsmaNetDevice::new(CsmaDeviceOptions::default()).unwrap();
//! channel.attach(&a).unwrap();
//! channel.attach(&b).unwrap();
//!
//! b.set_receive_callback(|sim, _, packet, sender| {
//!     println!("{}: {} bytes from device {sender}", sim.now(), packet.size());
//! });
//!
//! a.send(&mut sim, Packet::new("hello"), MacAddress::BROADCAST, 0x88b5).unwrap();
//! sim.run().unwrap();
//! assert_eq!(b.stats().rx_packets(), 1);
//! ```
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

mod backoff;
pub use backoff::{Backoff, BackoffError, BackoffOptions};

mod channel;
pub use channel::{ChannelError, ChannelState, CsmaChannel, CsmaChannelOptions};

mod device;
pub use device::{
    CsmaDeviceOptions, CsmaNetDevice, DeviceError, DeviceStats, ReceiveCallback,
    ReceiveErrorModel, TxState, WeakDevice,
};

mod queue;
pub use queue::{DropTailQueue, DEFAULT_QUEUE_SIZE};

/// Index of a device on its channel, handed out by [`CsmaChannel::attach`]. Stable for the
/// lifetime of the channel, even across detach and reattach.
pub type DeviceId = usize;
