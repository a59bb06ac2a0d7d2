use std::{cell::RefCell, rc::Rc};

use bytes::Bytes;
use netsim::{
    BackoffOptions, CsmaChannel, CsmaChannelOptions, CsmaDeviceOptions, CsmaNetDevice, DataRate,
    MacAddress, Packet, Simulator, Time,
};
use tracing::Level;

const NODES: usize = 8;
const PACKETS_PER_NODE: usize = 10;

/// Eight nodes on one 10 Mbps segment all start broadcasting at the same instant and fight over
/// the medium.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = tracing_subscriber::fmt().with_max_level(Level::INFO).try_init();

    let mut sim = Simulator::new();
    let channel = CsmaChannel::new(
        CsmaChannelOptions::default()
            .data_rate("10Mbps".parse::<DataRate>()?)
            .delay(Time::from_micros(5)),
    )?;

    let received = Rc::new(RefCell::new(0usize));
    let mut devices = Vec::with_capacity(NODES);
    for i in 0..NODES {
        let options =
            CsmaDeviceOptions::default().backoff(BackoffOptions::default().seed(i as u64));
        let device = CsmaNetDevice::new(options)?;
        channel.attach(&device)?;

        let received = received.clone();
        device.set_receive_callback(move |_, _, _, _| *received.borrow_mut() += 1);
        devices.push(device);
    }

    for device in &devices {
        for seq in 0..PACKETS_PER_NODE {
            let payload = Bytes::from(vec![seq as u8; 512]);
            device.send(&mut sim, Packet::new(payload), MacAddress::BROADCAST, 0x88b5)?;
        }
    }

    sim.run()?;

    tracing::info!(now = %sim.now(), events = sim.event_count(), "simulation finished");
    for device in &devices {
        let stats = device.stats();
        tracing::info!(
            id = ?device.id(),
            address = %device.address(),
            tx = stats.tx_packets(),
            backoffs = stats.backoffs(),
            drops = stats.tx_drops(),
            rx = stats.rx_packets(),
            "device stats"
        );
    }
    tracing::info!(total_received = *received.borrow(), "done");

    sim.destroy()?;

    Ok(())
}
