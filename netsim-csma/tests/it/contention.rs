use std::rc::Rc;

use netsim_common::{MacAddress, Packet, Time};
use netsim_core::{EventResult, Simulator};
use netsim_csma::{
    BackoffOptions, ChannelState, CsmaChannel, CsmaDeviceOptions, CsmaNetDevice, TxState,
};

use crate::helpers::{attach_devices, channel, record_deliveries, Deliveries};

#[test]
fn contention_second_sender_backs_off_once() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut sim = Simulator::new();
    let channel = channel(Time::from_micros(10));

    // B always waits exactly one 200us slot.
    let devices = attach_devices(&channel, 2, |i| match i {
        0 => CsmaDeviceOptions::default(),
        _ => CsmaDeviceOptions::default().backoff(
            BackoffOptions::default().slot_time(Time::from_micros(200)).slots(1, 1),
        ),
    });
    let (a, b) = (&devices[0], &devices[1]);
    let deliveries = record_deliveries(&devices);

    a.send(&mut sim, Packet::new(vec![0xa; 100]), MacAddress::BROADCAST, 0).unwrap();
    assert_eq!(a.state(), TxState::Busy);
    assert_eq!(channel.state(), ChannelState::Transmitting);

    b.send(&mut sim, Packet::new(vec![0xb; 100]), MacAddress::BROADCAST, 0).unwrap();
    assert_eq!(b.state(), TxState::Backoff);
    assert_eq!(b.retries(), 1);
    assert_eq!(b.stats().backoffs(), 1);
    assert_eq!(channel.current_source(), a.id());

    sim.run().unwrap();

    // A: 80us on the wire plus 10us propagation. B: retries at 200us, same again.
    assert_eq!(
        *deliveries.borrow(),
        vec![
            (Time::from_micros(90), 1, 0, vec![0xa; 100]),
            (Time::from_micros(290), 0, 1, vec![0xb; 100]),
        ]
    );
    assert_eq!(b.stats().backoffs(), 1);
    assert_eq!(b.retries(), 0);
    assert_eq!(a.stats().tx_packets(), 1);
    assert_eq!(b.stats().tx_packets(), 1);
    assert_eq!(channel.state(), ChannelState::Idle);
}

#[test]
fn contention_drops_packet_after_retries_exhausted() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut sim = Simulator::new();
    let channel = channel(Time::ZERO);

    let devices = attach_devices(&channel, 2, |i| match i {
        0 => CsmaDeviceOptions::default(),
        _ => CsmaDeviceOptions::default().backoff(
            BackoffOptions::default().slot_time(Time::from_micros(1)).slots(1, 1).max_retries(3),
        ),
    });
    let (a, b) = (&devices[0], &devices[1]);
    let deliveries = record_deliveries(&devices);

    // 1500 bytes keep the medium busy for 1.2ms.
    a.send(&mut sim, Packet::new(vec![0; 1500]), MacAddress::BROADCAST, 0).unwrap();
    b.send(&mut sim, Packet::new("first"), MacAddress::BROADCAST, 0).unwrap();
    b.send(&mut sim, Packet::new("second"), MacAddress::BROADCAST, 0).unwrap();

    // Attempts at 0, 1 and 2us back off; at 3us the first packet is dropped and the second one
    // starts over with a fresh retry counter.
    sim.stop_at(Time::from_nanos(3_500)).unwrap();
    sim.run().unwrap();
    assert_eq!(b.stats().tx_drops(), 1);
    assert_eq!(b.stats().backoffs(), 4);
    assert_eq!(b.retries(), 1);
    assert_eq!(b.state(), TxState::Backoff);
    assert_eq!(b.queue_len(), 0);

    sim.stop_at(Time::from_nanos(6_500)).unwrap();
    sim.run().unwrap();
    assert_eq!(b.stats().tx_drops(), 2);
    assert_eq!(b.retries(), 0);
    assert_eq!(b.state(), TxState::Ready);
    assert!(!b.has_pending_event());

    sim.run().unwrap();
    assert_eq!(b.stats().tx_packets(), 0);
    assert_eq!(a.stats().tx_packets(), 1);
    assert_eq!(*deliveries.borrow(), vec![(Time::from_micros(1200), 1, 0, vec![0; 1500])]);
}

/// Samples the channel every microsecond while there is traffic, checking that at most one
/// device occupies the medium and that it is the one the channel reports.
fn sample_medium(sim: &mut Simulator, channel: CsmaChannel, devices: Rc<Vec<CsmaNetDevice>>) -> EventResult {
    let busy: Vec<_> =
        devices.iter().filter(|device| device.state() == TxState::Busy).map(CsmaNetDevice::id).collect();

    assert!(busy.len() <= 1, "{} devices transmitting at {}", busy.len(), sim.now());
    match busy.first() {
        Some(id) => {
            assert_eq!(channel.state(), ChannelState::Transmitting);
            assert_eq!(channel.current_source(), *id);
        }
        None => assert_ne!(channel.state(), ChannelState::Transmitting),
    }

    let traffic = devices.iter().any(CsmaNetDevice::has_pending_event);
    if traffic || channel.state() != ChannelState::Idle {
        sim.schedule(Time::from_micros(1), move |sim| sample_medium(sim, channel, devices))?;
    }

    Ok(())
}

#[test]
fn contention_medium_is_mutually_exclusive() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut sim = Simulator::new();
    let channel = channel(Time::from_micros(5));
    let devices = attach_devices(&channel, 5, |i| {
        CsmaDeviceOptions::default().backoff(BackoffOptions::default().seed(i as u64))
    });
    let deliveries = record_deliveries(&devices);

    for device in &devices {
        for _ in 0..3 {
            device.send(&mut sim, Packet::new(vec![0; 200]), MacAddress::BROADCAST, 0).unwrap();
        }
    }

    let devices = Rc::new(devices);
    let (sampled_channel, sampled_devices) = (channel.clone(), devices.clone());
    sim.schedule_now(move |sim| sample_medium(sim, sampled_channel, sampled_devices)).unwrap();
    sim.stop_at(Time::from_secs(1)).unwrap();
    sim.run().unwrap();

    let sent: usize = devices.iter().map(|device| device.stats().tx_packets()).sum();
    let dropped: usize = devices.iter().map(|device| device.stats().tx_drops()).sum();
    assert_eq!(sent + dropped, 15);
    assert_eq!(deliveries.borrow().len(), sent * 4);
    assert_eq!(channel.state(), ChannelState::Idle);
}

fn contended_run(seed: u64) -> (Vec<(Time, usize, usize, Vec<u8>)>, u64) {
    let mut sim = Simulator::new();
    let channel = channel(Time::from_micros(3));
    let devices = attach_devices(&channel, 4, |i| {
        CsmaDeviceOptions::default().backoff(BackoffOptions::default().seed(seed + i as u64))
    });
    let deliveries: Deliveries = record_deliveries(&devices);

    for (i, device) in devices.iter().enumerate() {
        for k in 0..2 {
            let payload = format!("{i}-{k}").into_bytes();
            device.send(&mut sim, Packet::new(payload), MacAddress::BROADCAST, 0).unwrap();
        }
    }

    sim.run().unwrap();

    let log = deliveries.borrow().clone();
    (log, sim.event_count())
}

#[test]
fn contention_runs_are_reproducible() {
    let first = contended_run(7);
    let second = contended_run(7);

    assert!(!first.0.is_empty());
    assert_eq!(first, second);
}
