use netsim::{
    CsmaChannel, CsmaChannelOptions, CsmaDeviceOptions, CsmaNetDevice, DataRate, Packet,
    Simulator, Time,
};

const ROUNDS: u32 = 5;

/// Two nodes bounce a counter back and forth over a shared medium until it reaches `ROUNDS`.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = tracing_subscriber::fmt::try_init();

    let mut sim = Simulator::new();
    let channel = CsmaChannel::new(
        CsmaChannelOptions::default().data_rate(DataRate::from_mbps(100)).delay(Time::from_micros(1)),
    )?;

    let ping = CsmaNetDevice::new(CsmaDeviceOptions::default())?;
    let pong = CsmaNetDevice::new(CsmaDeviceOptions::default())?;
    channel.attach(&ping)?;
    channel.attach(&pong)?;

    for device in [&ping, &pong] {
        let this = device.downgrade();
        device.set_receive_callback(move |sim, id, packet, sender| {
            let count = packet.payload().first().copied().unwrap_or_default();
            tracing::info!(now = %sim.now(), id, sender, count, "received");

            if u32::from(count) >= ROUNDS {
                return;
            }

            let Some(this) = this.upgrade() else { return };
            let reply = Packet::new(vec![count + 1]);
            if let Err(e) = this.send(sim, reply, packet.source(), 0x88b5) {
                tracing::error!(id, "failed to reply: {e}");
            }
        });
    }

    ping.send(&mut sim, Packet::new(vec![0u8]), pong.address(), 0x88b5)?;
    sim.stop_after(Time::from_millis(10))?;
    sim.run()?;

    tracing::info!(
        now = %sim.now(),
        ping_rx = ping.stats().rx_packets(),
        pong_rx = pong.stats().rx_packets(),
        "finished"
    );

    Ok(())
}
