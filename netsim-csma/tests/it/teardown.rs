use netsim_common::{MacAddress, Packet, Time};
use netsim_core::Simulator;
use netsim_csma::{ChannelState, CsmaDeviceOptions, TxState};

use crate::helpers::{attach_devices, channel, record_deliveries};

#[test]
fn teardown_detach_during_transmission() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut sim = Simulator::new();
    let channel = channel(Time::from_micros(10));
    let devices = attach_devices(&channel, 3, |_| CsmaDeviceOptions::default());
    let deliveries = record_deliveries(&devices);
    let (a, c) = (&devices[0], &devices[2]);

    a.send(&mut sim, Packet::new(vec![1; 100]), MacAddress::BROADCAST, 0).unwrap();
    assert_eq!(channel.state(), ChannelState::Transmitting);
    channel.detach(&mut sim, 0).unwrap();

    // The transmission still completes and the medium is released on schedule.
    sim.stop_at(Time::from_micros(85)).unwrap();
    sim.run().unwrap();
    assert_eq!(channel.state(), ChannelState::Propagating);

    sim.run().unwrap();
    assert_eq!(channel.state(), ChannelState::Idle);
    assert_eq!(sim.now(), Time::from_micros(90));
    assert_eq!(deliveries.borrow().len(), 2);

    // A hears nothing while detached.
    c.send(&mut sim, Packet::new("while detached"), MacAddress::BROADCAST, 0).unwrap();
    sim.run().unwrap();
    assert_eq!(a.stats().rx_packets(), 0);

    channel.reattach(&mut sim, 0).unwrap();
    c.send(&mut sim, Packet::new("after reattach"), MacAddress::BROADCAST, 0).unwrap();
    sim.run().unwrap();

    assert_eq!(a.stats().rx_packets(), 1);
    let last = deliveries.borrow().iter().rev().find(|d| d.1 == 0).cloned();
    assert_eq!(last.map(|d| d.3), Some(b"after reattach".to_vec()));
}

#[test]
fn teardown_detach_cancels_backoff_and_reattach_resumes() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut sim = Simulator::new();
    let channel = channel(Time::from_micros(10));
    let devices = attach_devices(&channel, 2, |_| CsmaDeviceOptions::default());
    let deliveries = record_deliveries(&devices);
    let (a, b) = (&devices[0], &devices[1]);

    a.send(&mut sim, Packet::new(vec![0; 1500]), MacAddress::BROADCAST, 0).unwrap();
    b.send(&mut sim, Packet::new("retrying"), MacAddress::BROADCAST, 0).unwrap();
    b.send(&mut sim, Packet::new("queued"), MacAddress::BROADCAST, 0).unwrap();
    assert_eq!(b.state(), TxState::Backoff);
    assert!(b.has_pending_event());

    // The retry is cancelled and its packet dropped; the queue is kept.
    channel.detach(&mut sim, 1).unwrap();
    assert!(!b.has_pending_event());
    assert_eq!(b.state(), TxState::Ready);
    assert_eq!(b.retries(), 0);
    assert_eq!(b.stats().tx_drops(), 1);
    assert_eq!(b.queue_len(), 1);

    sim.run().unwrap();
    assert_eq!(b.stats().backoffs(), 1);
    assert_eq!(b.stats().tx_packets(), 0);
    assert_eq!(b.queue_len(), 1);
    assert!(deliveries.borrow().is_empty());

    // Packets sent while detached wait in the queue too.
    b.send(&mut sim, Packet::new("sent while detached"), MacAddress::BROADCAST, 0).unwrap();
    assert_eq!(b.state(), TxState::Ready);
    assert_eq!(b.queue_len(), 2);

    channel.reattach(&mut sim, 1).unwrap();
    sim.run().unwrap();

    assert_eq!(b.stats().tx_packets(), 2);
    assert_eq!(b.stats().tx_drops(), 1);
    assert_eq!(b.queue_len(), 0);
    let heard: Vec<_> = deliveries.borrow().iter().map(|d| (d.1, d.3.clone())).collect();
    assert_eq!(heard, vec![(0, b"queued".to_vec()), (0, b"sent while detached".to_vec())]);
    assert_eq!(channel.state(), ChannelState::Idle);
}

#[test]
fn teardown_cancels_pending_backoff() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut sim = Simulator::new();
    let channel = channel(Time::from_micros(10));
    let devices = attach_devices(&channel, 2, |_| CsmaDeviceOptions::default());
    let deliveries = record_deliveries(&devices);
    let (a, b) = (&devices[0], &devices[1]);

    a.send(&mut sim, Packet::new(vec![0; 1500]), MacAddress::BROADCAST, 0).unwrap();
    b.send(&mut sim, Packet::new("queued"), MacAddress::BROADCAST, 0).unwrap();
    b.send(&mut sim, Packet::new("queued too"), MacAddress::BROADCAST, 0).unwrap();
    assert_eq!(b.state(), TxState::Backoff);
    assert!(b.has_pending_event());

    b.dispose(&mut sim).unwrap();
    assert!(b.is_disposed());
    assert!(!b.has_pending_event());
    assert!(!channel.is_active(1));
    assert_eq!(b.queue_len(), 0);
    assert!(b.send(&mut sim, Packet::new("late"), MacAddress::BROADCAST, 0).is_err());

    sim.run().unwrap();

    // A's completion, A's interframe gap and the channel going idle. B's retry never fires.
    assert_eq!(sim.event_count(), 3);
    assert_eq!(b.stats().backoffs(), 1);
    assert_eq!(b.stats().tx_packets(), 0);
    assert!(deliveries.borrow().is_empty());
    assert_eq!(a.stats().tx_packets(), 1);
}

#[test]
fn teardown_while_transmitting_releases_the_medium() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut sim = Simulator::new();
    let channel = channel(Time::from_micros(2));
    let devices = attach_devices(&channel, 2, |_| CsmaDeviceOptions::default());
    let deliveries = record_deliveries(&devices);
    let (a, b) = (devices[0].clone(), devices[1].clone());

    // 500 bytes would occupy the medium for 400us; A goes away after 100us.
    a.send(&mut sim, Packet::new(vec![0; 500]), MacAddress::BROADCAST, 0).unwrap();
    sim.schedule(Time::from_micros(100), move |sim| Ok(a.dispose(sim)?)).unwrap();
    sim.run().unwrap();

    assert!(devices[0].is_disposed());
    assert!(!channel.is_active(0));
    assert_eq!(channel.state(), ChannelState::Idle);
    assert_eq!(sim.now(), Time::from_micros(102));
    // The truncated frame still reaches B.
    assert_eq!(*deliveries.borrow(), vec![(Time::from_micros(102), 1, 0, vec![0; 500])]);

    b.send(&mut sim, Packet::new("anyone?"), MacAddress::BROADCAST, 0).unwrap();
    sim.run().unwrap();
    assert_eq!(b.stats().tx_packets(), 1);
    assert_eq!(devices[0].stats().rx_packets(), 0);

    // Devices can be disposed on simulator teardown too.
    sim.schedule_destroy(move |sim| Ok(b.dispose(sim)?)).unwrap();
    sim.destroy().unwrap();
    assert!(devices[1].is_disposed());
    assert_eq!(channel.num_active_devices(), 0);
}

#[test]
fn teardown_dropped_device_is_never_touched() {
    let mut sim = Simulator::new();
    let channel = channel(Time::ZERO);
    let mut devices = attach_devices(&channel, 2, |_| CsmaDeviceOptions::default());

    devices[0].send(&mut sim, Packet::new(vec![0; 1000]), MacAddress::BROADCAST, 0).unwrap();
    devices[1].send(&mut sim, Packet::new("x"), MacAddress::BROADCAST, 0).unwrap();
    assert_eq!(devices[1].state(), TxState::Backoff);

    devices.truncate(1);
    assert!(channel.device(1).is_none());

    sim.run().unwrap();
    assert_eq!(devices[0].stats().tx_packets(), 1);
    assert_eq!(channel.state(), ChannelState::Idle);
}
