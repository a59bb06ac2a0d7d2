use std::{
    cell::RefCell,
    fmt,
    rc::{Rc, Weak},
};

use netsim_common::{constants::INTERFRAME_GAP_BYTES, DataRate, MacAddress, Packet, Time};
use netsim_core::{EventId, Simulator, NO_CONTEXT};

use super::{
    CsmaDeviceOptions, DeviceError, DeviceStats, ReceiveCallback, ReceiveErrorModel, TxState,
};
use crate::{
    backoff::Backoff,
    channel::{ChannelError, ChannelState, CsmaChannel},
    queue::DropTailQueue,
    DeviceId,
};

/// A scheduled step of the transmit machine.
type TxStep = fn(&CsmaNetDevice, &mut Simulator) -> Result<(), DeviceError>;

struct DeviceInner {
    /// Assigned by the channel on attach if not configured.
    address: Option<MacAddress>,
    mtu: usize,
    send_enable: bool,
    receive_enable: bool,
    /// Explicit interframe gap, overriding the one derived from the channel.
    gap_override: Option<Time>,
    interframe_gap: Time,

    channel: Option<CsmaChannel>,
    id: Option<DeviceId>,

    state: TxState,
    queue: DropTailQueue,
    /// The packet being transmitted or waiting out a backoff.
    current: Option<Packet>,
    backoff: Backoff,
    /// The one self-scheduled transmit step in flight, if any.
    pending: Option<EventId>,

    rx_callback: Option<ReceiveCallback>,
    promisc_callback: Option<ReceiveCallback>,
    error_model: Option<ReceiveErrorModel>,
    disposed: bool,
}

impl DeviceInner {
    /// Attached and marked active on the channel.
    fn link_is_up(&self) -> bool {
        match (&self.channel, self.id) {
            (Some(channel), Some(id)) => channel.is_active(id),
            _ => false,
        }
    }

    /// Drops the current packet and returns the machine to [`TxState::Ready`].
    fn discard_current(&mut self, stats: &DeviceStats) -> Option<Packet> {
        let dropped = self.current.take();
        if dropped.is_some() {
            stats.increment_tx_drops();
        }
        self.backoff.reset();
        self.state = TxState::Ready;
        dropped
    }
}

struct DeviceShared {
    inner: RefCell<DeviceInner>,
    stats: DeviceStats,
}

/// A node's attachment to a [`CsmaChannel`].
///
/// The device queues outgoing packets and drives a transmit state machine (see [`TxState`]):
/// when the medium is idle it occupies it for the serialization time of the packet, waits out
/// the interframe gap, then moves on to the next queued packet. When the medium is busy it backs
/// off with truncated binary exponential backoff and retries the same packet, dropping it once
/// the retries run out.
///
/// Frames from other devices reach [`CsmaNetDevice::receive`], which hands frames addressed to
/// this device (or to a group) to the receive callback, and every frame to the promiscuous
/// callback.
///
/// The device is a cheap handle; clones refer to the same device. Scheduled events only hold
/// weak references, so dropping every handle (or calling [`CsmaNetDevice::dispose`]) silences
/// them.
#[derive(Clone)]
pub struct CsmaNetDevice {
    shared: Rc<DeviceShared>,
}

/// A non-owning reference to a [`CsmaNetDevice`].
#[derive(Clone, Debug)]
pub struct WeakDevice {
    shared: Weak<DeviceShared>,
}

impl WeakDevice {
    /// Returns the device if any handle to it is still alive.
    pub fn upgrade(&self) -> Option<CsmaNetDevice> {
        self.shared.upgrade().map(|shared| CsmaNetDevice { shared })
    }
}

impl fmt::Debug for CsmaNetDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.shared.inner.borrow();
        f.debug_struct("CsmaNetDevice")
            .field("address", &inner.address)
            .field("id", &inner.id)
            .field("state", &inner.state)
            .field("queued", &inner.queue.len())
            .field("disposed", &inner.disposed)
            .finish_non_exhaustive()
    }
}

impl CsmaNetDevice {
    /// Creates a detached device.
    ///
    /// Fails on invalid backoff options or a negative interframe gap.
    pub fn new(options: CsmaDeviceOptions) -> Result<Self, DeviceError> {
        let backoff = Backoff::new(&options.backoff)?;

        if options.interframe_gap.is_some_and(Time::is_negative) {
            return Err(DeviceError::InvalidParameter("interframe_gap is negative"));
        }

        let inner = DeviceInner {
            address: options.address,
            mtu: options.mtu,
            send_enable: options.send_enable,
            receive_enable: options.receive_enable,
            gap_override: options.interframe_gap,
            interframe_gap: options.interframe_gap.unwrap_or(Time::ZERO),
            channel: None,
            id: None,
            state: TxState::Ready,
            queue: DropTailQueue::new(options.queue_size),
            current: None,
            backoff,
            pending: None,
            rx_callback: None,
            promisc_callback: None,
            error_model: None,
            disposed: false,
        };

        Ok(Self {
            shared: Rc::new(DeviceShared { inner: RefCell::new(inner), stats: DeviceStats::default() }),
        })
    }

    /// Returns a non-owning reference to the device.
    pub fn downgrade(&self) -> WeakDevice {
        WeakDevice { shared: Rc::downgrade(&self.shared) }
    }

    /// Called by [`CsmaChannel::attach`].
    pub(crate) fn bind(&self, channel: CsmaChannel, id: DeviceId, data_rate: DataRate) {
        let mut inner = self.shared.inner.borrow_mut();
        inner.interframe_gap =
            inner.gap_override.unwrap_or_else(|| data_rate.tx_time(INTERFRAME_GAP_BYTES));
        if inner.address.is_none() {
            inner.address = Some(channel.allocate_address());
        }
        inner.channel = Some(channel);
        inner.id = Some(id);
    }

    /// Queues `packet` for transmission to `destination`, from this device's address.
    ///
    /// See [`CsmaNetDevice::send_from`].
    pub fn send(
        &self,
        sim: &mut Simulator,
        packet: Packet,
        destination: MacAddress,
        protocol: u16,
    ) -> Result<(), DeviceError> {
        let source = self.address();
        self.send_from(sim, packet, source, destination, protocol)
    }

    /// Queues `packet` for transmission from `source` to `destination`.
    ///
    /// The packet is stamped with the next uid of the channel and with the given addressing. If
    /// the transmit machine is ready, the transmission starts right away. The actual delivery
    /// always happens later, in scheduled events. While the device is detached, packets wait in
    /// the queue until it is reattached.
    pub fn send_from(
        &self,
        sim: &mut Simulator,
        packet: Packet,
        source: MacAddress,
        destination: MacAddress,
        protocol: u16,
    ) -> Result<(), DeviceError> {
        {
            let mut inner = self.shared.inner.borrow_mut();

            if inner.disposed {
                return Err(DeviceError::Disposed);
            }

            let Some(channel) = inner.channel.clone() else {
                return Err(DeviceError::NotAttached);
            };

            if !inner.send_enable {
                self.shared.stats.increment_mac_tx_drops();
                return Err(DeviceError::SendDisabled);
            }

            if packet.size() > inner.mtu {
                return Err(DeviceError::MtuExceeded { size: packet.size(), mtu: inner.mtu });
            }

            let packet = packet
                .with_uid(channel.allocate_packet_uid())
                .with_addressing(source, destination, protocol);
            let uid = packet.uid();
            if inner.queue.enqueue(packet).is_err() {
                self.shared.stats.increment_mac_tx_drops();
                tracing::debug!(id = ?inner.id, uid, "transmit queue full, dropping packet");
                return Err(DeviceError::QueueFull);
            }
        }

        self.start_next(sim)
    }

    /// Moves the next queued packet on, if the machine is idle and the link is up.
    fn start_next(&self, sim: &mut Simulator) -> Result<(), DeviceError> {
        let next = {
            let mut inner = self.shared.inner.borrow_mut();

            if inner.disposed
                || inner.state != TxState::Ready
                || inner.current.is_some()
                || !inner.link_is_up()
            {
                return Ok(());
            }

            inner.current = inner.queue.dequeue();
            inner.current.is_some()
        };

        if next {
            self.transmit_start(sim)?;
        }

        Ok(())
    }

    /// Tries to put the current packet on the wire.
    ///
    /// If sending was disabled in the meantime, the current packet and everything queued behind
    /// it are dropped. If the device is detached, the current packet is dropped.
    ///
    /// If the medium is busy the device backs off and schedules a retry of this step, or drops
    /// the packet through [`CsmaNetDevice::transmit_abort`] once the retries are exhausted. If the
    /// medium is idle the transmission starts and [`CsmaNetDevice::transmit_complete`] is
    /// scheduled after the serialization time.
    ///
    /// Only legal in [`TxState::Ready`] or [`TxState::Backoff`] with a current packet.
    pub fn transmit_start(&self, sim: &mut Simulator) -> Result<(), DeviceError> {
        let mut inner = self.shared.inner.borrow_mut();

        if !matches!(inner.state, TxState::Ready | TxState::Backoff) {
            return Err(DeviceError::InvalidState { operation: "transmit_start", state: inner.state });
        }

        let Some(packet) = inner.current.clone() else {
            return Err(DeviceError::InvalidState { operation: "transmit_start", state: inner.state });
        };

        let (channel, id) = match (&inner.channel, inner.id) {
            (Some(channel), Some(id)) => (channel.clone(), id),
            _ => return Err(DeviceError::NotAttached),
        };

        if !inner.send_enable {
            inner.discard_current(&self.shared.stats);
            let flushed = inner.queue.clear();
            self.shared.stats.add_tx_drops(flushed);
            tracing::debug!(id, uid = packet.uid(), flushed, "send disabled, dropping packets");
            return Ok(());
        }

        if !channel.is_active(id) {
            inner.discard_current(&self.shared.stats);
            tracing::debug!(id, uid = packet.uid(), "device detached, dropping packet");
            return Ok(());
        }

        if channel.state() != ChannelState::Idle {
            inner.state = TxState::Backoff;

            if inner.backoff.max_retries_reached() {
                drop(inner);
                return self.transmit_abort(sim);
            }

            inner.backoff.increment_retries();
            let delay = inner.backoff.backoff_time();
            self.shared.stats.increment_backoffs();

            tracing::debug!(
                id,
                uid = packet.uid(),
                retries = inner.backoff.retries(),
                %delay,
                "medium busy, backing off"
            );

            drop(inner);
            return self.schedule_step(sim, delay, Self::transmit_start);
        }

        match channel.transmit_start(&packet, id) {
            Ok(()) => {
                inner.state = TxState::Busy;
                inner.backoff.reset();
                drop(inner);

                let tx_time = channel.data_rate().tx_time(packet.size());
                tracing::debug!(id, uid = packet.uid(), size = packet.size(), %tx_time, "transmitting");

                self.schedule_step(sim, tx_time, Self::transmit_complete)
            }
            Err(ChannelError::ChannelBusy(_) | ChannelError::DeviceNotActive(_)) => {
                tracing::debug!(id, uid = packet.uid(), "channel rejected transmission, dropping packet");
                inner.discard_current(&self.shared.stats);
                drop(inner);
                self.start_next(sim)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Drops the current packet after its retries ran out and moves on to the next one.
    ///
    /// Only legal in [`TxState::Backoff`].
    pub fn transmit_abort(&self, sim: &mut Simulator) -> Result<(), DeviceError> {
        {
            let mut inner = self.shared.inner.borrow_mut();

            if inner.state != TxState::Backoff {
                return Err(DeviceError::InvalidState { operation: "transmit_abort", state: inner.state });
            }

            let retries = inner.backoff.retries();
            let dropped = inner.discard_current(&self.shared.stats);
            tracing::debug!(
                id = ?inner.id,
                uid = ?dropped.as_ref().map(Packet::uid),
                retries,
                "retries exhausted, dropping packet"
            );
        }

        self.start_next(sim)
    }

    /// Ends the transmission of the current packet and waits out the interframe gap.
    ///
    /// Only legal in [`TxState::Busy`].
    pub fn transmit_complete(&self, sim: &mut Simulator) -> Result<(), DeviceError> {
        let (channel, gap) = {
            let mut inner = self.shared.inner.borrow_mut();

            if inner.state != TxState::Busy {
                return Err(DeviceError::InvalidState {
                    operation: "transmit_complete",
                    state: inner.state,
                });
            }

            let channel = inner.channel.clone().ok_or(DeviceError::NotAttached)?;

            inner.state = TxState::Gap;
            if let Some(packet) = inner.current.take() {
                self.shared.stats.increment_tx(packet.size());
            }

            (channel, inner.interframe_gap)
        };

        channel.transmit_end(sim)?;

        self.schedule_step(sim, gap, Self::transmit_ready)
    }

    /// Leaves the interframe gap and starts on the next queued packet, if any.
    ///
    /// Only legal in [`TxState::Gap`].
    pub fn transmit_ready(&self, sim: &mut Simulator) -> Result<(), DeviceError> {
        {
            let mut inner = self.shared.inner.borrow_mut();

            if inner.state != TxState::Gap {
                return Err(DeviceError::InvalidState { operation: "transmit_ready", state: inner.state });
            }

            inner.state = TxState::Ready;
        }

        self.start_next(sim)
    }

    /// The channel marked this device inactive.
    ///
    /// A pending backoff retry is cancelled and its packet dropped. A transmission in progress,
    /// or the gap after it, runs to completion.
    pub(crate) fn link_down(&self, sim: &mut Simulator) {
        let mut inner = self.shared.inner.borrow_mut();
        if inner.disposed || inner.state != TxState::Backoff {
            return;
        }

        if let Some(event) = inner.pending.take() {
            sim.cancel(&event);
        }

        let dropped = inner.discard_current(&self.shared.stats);
        tracing::debug!(
            id = ?inner.id,
            uid = ?dropped.as_ref().map(Packet::uid),
            queued = inner.queue.len(),
            "link down, cancelled backoff retry"
        );
    }

    /// The channel marked this device active again. Resumes sending queued packets.
    pub(crate) fn link_up(&self, sim: &mut Simulator) -> Result<(), DeviceError> {
        self.start_next(sim)
    }

    /// Schedules the next step of the transmit machine. The event is skipped if the device is
    /// gone or disposed by the time it fires.
    fn schedule_step(&self, sim: &mut Simulator, delay: Time, step: TxStep) -> Result<(), DeviceError> {
        let device = self.downgrade();
        let context = self.id().map_or(NO_CONTEXT, |id| id as u32);

        let event = sim.schedule_with_context(context, delay, move |sim| {
            let Some(device) = device.upgrade() else {
                return Ok(());
            };

            {
                let mut inner = device.shared.inner.borrow_mut();
                if inner.disposed {
                    return Ok(());
                }
                inner.pending = None;
            }

            step(&device, sim)?;
            Ok(())
        })?;

        self.shared.inner.borrow_mut().pending = Some(event);

        Ok(())
    }

    /// Hands a frame sent by device `sender` up the stack.
    ///
    /// Frames are dropped, and counted in [`DeviceStats::rx_drops`], if receiving is disabled or
    /// the receive error model marks them corrupt.
    pub fn receive(&self, sim: &mut Simulator, packet: Packet, sender: DeviceId) {
        let (id, for_us, error_model, rx_callback, promisc_callback) = {
            let inner = self.shared.inner.borrow();

            let Some(id) = inner.id else {
                return;
            };

            if inner.disposed {
                return;
            }

            if !inner.receive_enable {
                self.shared.stats.increment_rx_drops();
                tracing::trace!(id, uid = packet.uid(), "receive disabled, dropping frame");
                return;
            }

            let destination = packet.destination();
            let for_us = Some(destination) == inner.address || destination.is_group();

            (
                id,
                for_us,
                inner.error_model.clone(),
                inner.rx_callback.clone(),
                inner.promisc_callback.clone(),
            )
        };

        if error_model.is_some_and(|is_corrupt| is_corrupt(&packet)) {
            self.shared.stats.increment_rx_drops();
            tracing::trace!(id, sender, uid = packet.uid(), "corrupt frame, dropping");
            return;
        }

        tracing::trace!(id, sender, uid = packet.uid(), for_us, "received frame");

        if let Some(callback) = promisc_callback {
            callback(sim, id, &packet, sender);
        }

        if for_us {
            self.shared.stats.increment_rx(packet.size());
            if let Some(callback) = rx_callback {
                callback(sim, id, &packet, sender);
            }
        }
    }

    /// Sets the callback invoked for frames addressed to this device or to a group.
    pub fn set_receive_callback<F>(&self, callback: F)
    where
        F: Fn(&mut Simulator, DeviceId, &Packet, DeviceId) + 'static,
    {
        self.shared.inner.borrow_mut().rx_callback = Some(Rc::new(callback));
    }

    /// Sets the callback invoked for every frame seen on the medium.
    pub fn set_promisc_receive_callback<F>(&self, callback: F)
    where
        F: Fn(&mut Simulator, DeviceId, &Packet, DeviceId) + 'static,
    {
        self.shared.inner.borrow_mut().promisc_callback = Some(Rc::new(callback));
    }

    /// Sets the predicate deciding which received frames are corrupt. Corrupt frames are dropped
    /// before any callback sees them.
    pub fn set_receive_error_model<F>(&self, is_corrupt: F)
    where
        F: Fn(&Packet) -> bool + 'static,
    {
        self.shared.inner.borrow_mut().error_model = Some(Rc::new(is_corrupt));
    }

    /// Enables or disables sending. Packets already queued are dropped when their turn comes.
    pub fn set_send_enable(&self, enable: bool) {
        self.shared.inner.borrow_mut().send_enable = enable;
    }

    /// Enables or disables receiving.
    pub fn set_receive_enable(&self, enable: bool) {
        self.shared.inner.borrow_mut().receive_enable = enable;
    }

    /// Tears the device down.
    ///
    /// Cancels the pending transmit step, drops the current and queued packets and detaches from
    /// the channel. If the device was occupying the medium, the transmission is ended so the
    /// channel does not stay busy forever. Afterwards no scheduled event touches the device.
    pub fn dispose(&self, sim: &mut Simulator) -> Result<(), DeviceError> {
        let (channel, id, was_busy) = {
            let mut inner = self.shared.inner.borrow_mut();
            if inner.disposed {
                return Ok(());
            }

            inner.disposed = true;
            if let Some(event) = inner.pending.take() {
                sim.cancel(&event);
            }

            let dropped = inner.queue.clear() + usize::from(inner.current.take().is_some());
            let was_busy = inner.state == TxState::Busy;
            inner.state = TxState::Ready;
            inner.backoff.reset();
            inner.rx_callback = None;
            inner.promisc_callback = None;
            inner.error_model = None;

            tracing::debug!(id = ?inner.id, dropped, was_busy, "disposing device");

            (inner.channel.clone(), inner.id, was_busy)
        };

        if let (Some(channel), Some(id)) = (channel, id) {
            if channel.is_active(id) {
                channel.detach(sim, id)?;
            }

            if was_busy {
                channel.transmit_end(sim)?;
            }
        }

        Ok(())
    }

    /// Reseeds the backoff draw. Returns the number of streams used.
    pub fn assign_streams(&self, stream: u64) -> u64 {
        self.shared.inner.borrow_mut().backoff.assign_stream(stream);
        1
    }

    /// The id assigned by the channel, or `None` before attachment.
    pub fn id(&self) -> Option<DeviceId> {
        self.shared.inner.borrow().id
    }

    /// The device's MAC address. All zeros until attached, unless one was configured.
    pub fn address(&self) -> MacAddress {
        self.shared.inner.borrow().address.unwrap_or_default()
    }

    /// The channel the device is attached to.
    pub fn channel(&self) -> Option<CsmaChannel> {
        self.shared.inner.borrow().channel.clone()
    }

    /// Returns `true` once attached, even if currently detached.
    pub fn is_attached(&self) -> bool {
        self.shared.inner.borrow().channel.is_some()
    }

    /// Returns `true` after [`CsmaNetDevice::dispose`].
    pub fn is_disposed(&self) -> bool {
        self.shared.inner.borrow().disposed
    }

    /// State of the transmit machine.
    pub fn state(&self) -> TxState {
        self.shared.inner.borrow().state
    }

    /// Largest packet `send` accepts, in bytes.
    pub fn mtu(&self) -> usize {
        self.shared.inner.borrow().mtu
    }

    /// Pause after each transmission.
    pub fn interframe_gap(&self) -> Time {
        self.shared.inner.borrow().interframe_gap
    }

    /// Number of packets waiting behind the current one.
    pub fn queue_len(&self) -> usize {
        self.shared.inner.borrow().queue.len()
    }

    /// Consecutive failed attempts for the current packet.
    pub fn retries(&self) -> u32 {
        self.shared.inner.borrow().backoff.retries()
    }

    /// Returns `true` if a transmit step is scheduled.
    pub fn has_pending_event(&self) -> bool {
        self.shared.inner.borrow().pending.is_some()
    }

    /// Traffic counters.
    #[inline]
    pub fn stats(&self) -> &DeviceStats {
        &self.shared.stats
    }
}
