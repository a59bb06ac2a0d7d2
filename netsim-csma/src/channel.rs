use std::{cell::RefCell, fmt, rc::Rc};

use netsim_common::{DataRate, MacAddress, Packet, Time};
use netsim_core::{SchedulerError, Simulator};
use thiserror::Error;

use crate::{
    device::{CsmaNetDevice, WeakDevice},
    DeviceId,
};

/// Errors returned by [`CsmaChannel`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChannelError {
    /// The channel options are unusable.
    #[error("invalid channel parameter: {0}")]
    InvalidParameter(&'static str),
    /// A transmission was requested while the wire is not idle.
    #[error("channel busy: wire is {0:?}")]
    ChannelBusy(ChannelState),
    /// The device is detached.
    #[error("device {0} is not active on this channel")]
    DeviceNotActive(DeviceId),
    /// No device was ever attached under this id.
    #[error("unknown device id {0}")]
    UnknownDevice(DeviceId),
    /// Detach of an inactive device, or reattach of an active one.
    #[error("device {id} already has active = {active}")]
    AlreadyInState {
        /// The device.
        id: DeviceId,
        /// Its current activity.
        active: bool,
    },
    /// The device is attached to a channel already.
    #[error("device is already attached to a channel")]
    AlreadyAttached,
    /// A wire transition was requested out of order.
    #[error("{operation} requires the wire to be {expected:?}, found {found:?}")]
    InvalidState {
        /// The transition.
        operation: &'static str,
        /// The wire state it requires.
        expected: ChannelState,
        /// The wire state it found.
        found: ChannelState,
    },
    /// Delivery events could not be scheduled.
    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
}

/// State of the shared wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelState {
    /// Nobody is transmitting. The only state in which a transmission may start.
    Idle,
    /// A device is occupying the medium for the serialization time of its frame.
    Transmitting,
    /// The sender finished; the last bits are still travelling to the receivers.
    Propagating,
}

/// Configuration of a [`CsmaChannel`], validated by [`CsmaChannel::new`].
#[derive(Debug, Clone)]
pub struct CsmaChannelOptions {
    /// Rate at which attached devices serialize frames.
    data_rate: DataRate,
    /// Propagation delay from the sender to every receiver.
    delay: Time,
}

impl Default for CsmaChannelOptions {
    fn default() -> Self {
        Self { data_rate: DataRate::default(), delay: Time::ZERO }
    }
}

impl CsmaChannelOptions {
    /// Sets the rate at which devices serialize frames. Must be non-zero.
    pub fn data_rate(mut self, data_rate: DataRate) -> Self {
        self.data_rate = data_rate;
        self
    }

    /// Sets the propagation delay. Must not be negative.
    pub fn delay(mut self, delay: Time) -> Self {
        self.delay = delay;
        self
    }
}

/// The wire, together with the frame that is on it.
#[derive(Debug, Clone)]
enum Wire {
    Idle,
    Transmitting { src: DeviceId, packet: Packet },
    Propagating { src: DeviceId, packet: Packet },
}

impl Wire {
    fn state(&self) -> ChannelState {
        match self {
            Self::Idle => ChannelState::Idle,
            Self::Transmitting { .. } => ChannelState::Transmitting,
            Self::Propagating { .. } => ChannelState::Propagating,
        }
    }
}

/// An attachment slot. Slots are never removed, so device ids stay valid for the whole run.
#[derive(Debug)]
struct DeviceRecord {
    device: WeakDevice,
    active: bool,
}

#[derive(Debug)]
struct ChannelInner {
    data_rate: DataRate,
    delay: Time,
    wire: Wire,
    devices: Vec<DeviceRecord>,
    /// Index of the next address handed to a device without one.
    next_address: u64,
    next_packet_uid: u64,
}

impl ChannelInner {
    fn record(&self, id: DeviceId) -> Result<&DeviceRecord, ChannelError> {
        self.devices.get(id).ok_or(ChannelError::UnknownDevice(id))
    }

    fn record_mut(&mut self, id: DeviceId) -> Result<&mut DeviceRecord, ChannelError> {
        self.devices.get_mut(id).ok_or(ChannelError::UnknownDevice(id))
    }
}

/// A shared broadcast medium with carrier sense.
///
/// At most one attached device transmits at a time. A transmission goes through two phases:
/// the sender occupies the wire for the serialization time of its frame
/// ([`CsmaChannel::transmit_start`] → [`CsmaChannel::transmit_end`]), then the frame propagates
/// for [`CsmaChannel::delay`], after which every other active device receives a copy and the wire
/// returns to [`ChannelState::Idle`].
///
/// ```text
/// Idle --transmit_start--> Transmitting --transmit_end--> Propagating --(delay)--> Idle
/// ```
///
/// The channel is a cheap handle; clones refer to the same medium.
#[derive(Clone)]
pub struct CsmaChannel {
    inner: Rc<RefCell<ChannelInner>>,
}

impl fmt::Debug for CsmaChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("CsmaChannel")
            .field("data_rate", &inner.data_rate)
            .field("delay", &inner.delay)
            .field("state", &inner.wire.state())
            .field("devices", &inner.devices.len())
            .finish()
    }
}

impl Default for CsmaChannel {
    /// A 10 Mbps channel without propagation delay.
    fn default() -> Self {
        Self::from_options(CsmaChannelOptions::default())
    }
}

impl CsmaChannel {
    /// Creates an idle channel with no devices.
    ///
    /// Fails with [`ChannelError::InvalidParameter`] on a zero data rate or a negative delay.
    pub fn new(options: CsmaChannelOptions) -> Result<Self, ChannelError> {
        if options.data_rate.bps() == 0 {
            return Err(ChannelError::InvalidParameter("data_rate is zero"));
        }

        if options.delay.is_negative() {
            return Err(ChannelError::InvalidParameter("delay is negative"));
        }

        Ok(Self::from_options(options))
    }

    fn from_options(options: CsmaChannelOptions) -> Self {
        Self {
            inner: Rc::new(RefCell::new(ChannelInner {
                data_rate: options.data_rate,
                delay: options.delay,
                wire: Wire::Idle,
                devices: Vec::new(),
                next_address: 1,
                next_packet_uid: 1,
            })),
        }
    }

    /// Attaches a device and returns its id on this channel.
    ///
    /// The device learns its id and the channel's data rate; from now on it can send. A device
    /// configured without an address gets the next one of this channel, starting at
    /// `00:00:00:00:00:01`.
    pub fn attach(&self, device: &CsmaNetDevice) -> Result<DeviceId, ChannelError> {
        if device.is_attached() {
            return Err(ChannelError::AlreadyAttached);
        }

        let (id, data_rate) = {
            let mut inner = self.inner.borrow_mut();
            inner.devices.push(DeviceRecord { device: device.downgrade(), active: true });
            (inner.devices.len() - 1, inner.data_rate)
        };

        device.bind(self.clone(), id, data_rate);
        tracing::debug!(id, address = %device.address(), "attached device to channel");

        Ok(id)
    }

    /// Marks a device inactive. It keeps its id but stops sending and receiving.
    ///
    /// A device waiting out a backoff loses its pending retry and the packet it was retrying.
    /// A transmission already on the wire runs to completion. Queued packets wait for
    /// [`CsmaChannel::reattach`].
    pub fn detach(&self, sim: &mut Simulator, id: DeviceId) -> Result<(), ChannelError> {
        if let Some(device) = self.set_active(id, false)? {
            device.link_down(sim);
        }

        Ok(())
    }

    /// Marks a previously detached device active again.
    ///
    /// If the device has packets queued, it starts sending them in an event scheduled for now.
    pub fn reattach(&self, sim: &mut Simulator, id: DeviceId) -> Result<(), ChannelError> {
        if let Some(device) = self.set_active(id, true)? {
            let device = device.downgrade();
            sim.schedule_with_context(id as u32, Time::ZERO, move |sim| {
                if let Some(device) = device.upgrade() {
                    device.link_up(sim)?;
                }
                Ok(())
            })?;
        }

        Ok(())
    }

    /// Flips the active flag and returns the device, if it is still alive.
    fn set_active(&self, id: DeviceId, active: bool) -> Result<Option<CsmaNetDevice>, ChannelError> {
        let mut inner = self.inner.borrow_mut();
        let record = inner.record_mut(id)?;
        if record.active == active {
            return Err(ChannelError::AlreadyInState { id, active });
        }

        record.active = active;
        tracing::debug!(id, active, "device activity changed");

        Ok(record.device.upgrade())
    }

    /// Hands out the next unicast address of this channel.
    pub(crate) fn allocate_address(&self) -> MacAddress {
        let mut inner = self.inner.borrow_mut();
        let address = MacAddress::from_index(inner.next_address);
        inner.next_address += 1;
        address
    }

    /// Hands out the next packet uid of this channel.
    pub(crate) fn allocate_packet_uid(&self) -> u64 {
        let mut inner = self.inner.borrow_mut();
        let uid = inner.next_packet_uid;
        inner.next_packet_uid += 1;
        uid
    }

    /// Starts a transmission of `packet` by device `src`.
    ///
    /// Fails with [`ChannelError::ChannelBusy`] unless the wire is idle, and with
    /// [`ChannelError::DeviceNotActive`] if `src` is detached. Both are expected outcomes of
    /// contention, not bugs.
    pub fn transmit_start(&self, packet: &Packet, src: DeviceId) -> Result<(), ChannelError> {
        let mut inner = self.inner.borrow_mut();

        let state = inner.wire.state();
        if state != ChannelState::Idle {
            tracing::debug!(src, ?state, "transmit start rejected, channel busy");
            return Err(ChannelError::ChannelBusy(state));
        }

        if !inner.record(src)?.active {
            tracing::debug!(src, "transmit start rejected, device not active");
            return Err(ChannelError::DeviceNotActive(src));
        }

        tracing::debug!(src, uid = packet.uid(), size = packet.size(), "transmission started");
        inner.wire = Wire::Transmitting { src, packet: packet.clone() };

        Ok(())
    }

    /// Ends the current transmission and schedules its delivery.
    ///
    /// Every active device other than the sender receives a copy of the frame after the
    /// propagation delay; the wire returns to idle at the same time, after the deliveries.
    ///
    /// Returns `Ok(false)` if the sender was detached while it was transmitting. The frame is
    /// still delivered, as on a real medium, but the delivery integrity is not guaranteed.
    ///
    /// Calling this while the wire is not [`ChannelState::Transmitting`] is an internal
    /// consistency violation and returns [`ChannelError::InvalidState`].
    pub fn transmit_end(&self, sim: &mut Simulator) -> Result<bool, ChannelError> {
        let (src, packet, delay, receivers, src_active) = {
            let mut inner = self.inner.borrow_mut();

            let (src, packet) = match &inner.wire {
                Wire::Transmitting { src, packet } => (*src, packet.clone()),
                wire => {
                    return Err(ChannelError::InvalidState {
                        operation: "transmit_end",
                        expected: ChannelState::Transmitting,
                        found: wire.state(),
                    })
                }
            };

            inner.wire = Wire::Propagating { src, packet: packet.clone() };

            let receivers: Vec<(DeviceId, WeakDevice)> = inner
                .devices
                .iter()
                .enumerate()
                .filter(|(id, record)| record.active && *id != src)
                .map(|(id, record)| (id, record.device.clone()))
                .collect();

            let src_active = inner.devices.get(src).is_some_and(|record| record.active);

            (src, packet, inner.delay, receivers, src_active)
        };

        if !src_active {
            tracing::warn!(src, uid = packet.uid(), "sender detached during transmission");
        }

        tracing::debug!(src, uid = packet.uid(), receivers = receivers.len(), %delay, "propagating");

        for (id, device) in receivers {
            let packet = packet.clone();
            sim.schedule_with_context(id as u32, delay, move |sim| {
                if let Some(device) = device.upgrade() {
                    device.receive(sim, packet, src);
                }
                Ok(())
            })?;
        }

        let channel = self.clone();
        sim.schedule(delay, move |_| Ok(channel.propagation_complete()?))?;

        Ok(src_active)
    }

    /// Returns the wire to idle once the last frame has reached every receiver.
    pub fn propagation_complete(&self) -> Result<(), ChannelError> {
        let mut inner = self.inner.borrow_mut();

        let found = inner.wire.state();
        if found != ChannelState::Propagating {
            return Err(ChannelError::InvalidState {
                operation: "propagation_complete",
                expected: ChannelState::Propagating,
                found,
            });
        }

        inner.wire = Wire::Idle;
        tracing::trace!("channel idle");

        Ok(())
    }

    /// Returns `true` if `id` is attached and active. Unknown ids are inactive.
    pub fn is_active(&self, id: DeviceId) -> bool {
        self.inner.borrow().devices.get(id).is_some_and(|record| record.active)
    }

    /// Number of attached devices that are currently active.
    pub fn num_active_devices(&self) -> usize {
        self.inner.borrow().devices.iter().filter(|record| record.active).count()
    }

    /// Number of devices ever attached, active or not.
    pub fn num_devices(&self) -> usize {
        self.inner.borrow().devices.len()
    }

    /// Returns the device attached under `id`, if it is still alive.
    pub fn device(&self, id: DeviceId) -> Option<CsmaNetDevice> {
        self.inner.borrow().devices.get(id).and_then(|record| record.device.upgrade())
    }

    /// State of the wire.
    #[inline]
    pub fn state(&self) -> ChannelState {
        self.inner.borrow().wire.state()
    }

    /// The device currently transmitting or whose frame is propagating.
    pub fn current_source(&self) -> Option<DeviceId> {
        match self.inner.borrow().wire {
            Wire::Idle => None,
            Wire::Transmitting { src, .. } | Wire::Propagating { src, .. } => Some(src),
        }
    }

    /// Rate at which attached devices serialize frames.
    #[inline]
    pub fn data_rate(&self) -> DataRate {
        self.inner.borrow().data_rate
    }

    /// Propagation delay to every receiver.
    #[inline]
    pub fn delay(&self) -> Time {
        self.inner.borrow().delay
    }
}
