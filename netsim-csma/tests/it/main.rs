mod contention;
mod delivery;
mod teardown;

/// Helper functions.
mod helpers {
    use std::{cell::RefCell, rc::Rc};

    use netsim_common::{DataRate, Packet, Time};
    use netsim_core::Simulator;
    use netsim_csma::{
        CsmaChannel, CsmaChannelOptions, CsmaDeviceOptions, CsmaNetDevice, DeviceId,
    };

    /// `(time, receiver, sender, payload)` of every frame handed to a receive callback.
    pub type Deliveries = Rc<RefCell<Vec<(Time, DeviceId, DeviceId, Vec<u8>)>>>;

    /// A 10 Mbps channel with the given propagation delay.
    pub fn channel(delay: Time) -> CsmaChannel {
        CsmaChannel::new(
            CsmaChannelOptions::default().data_rate(DataRate::from_mbps(10)).delay(delay),
        )
        .unwrap()
    }

    /// Attaches `n` devices built from `options` to `channel`.
    pub fn attach_devices(
        channel: &CsmaChannel,
        n: usize,
        options: impl Fn(usize) -> CsmaDeviceOptions,
    ) -> Vec<CsmaNetDevice> {
        (0..n)
            .map(|i| {
                let device = CsmaNetDevice::new(options(i)).unwrap();
                channel.attach(&device).unwrap();
                device
            })
            .collect()
    }

    /// Records every frame handed to the receive callbacks of `devices`.
    pub fn record_deliveries(devices: &[CsmaNetDevice]) -> Deliveries {
        let deliveries = Deliveries::default();
        for device in devices {
            let log = deliveries.clone();
            device.set_receive_callback(move |sim: &mut Simulator, id, packet: &Packet, sender| {
                log.borrow_mut().push((sim.now(), id, sender, packet.payload().to_vec()));
            });
        }
        deliveries
    }
}
