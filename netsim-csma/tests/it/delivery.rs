use std::{cell::RefCell, rc::Rc};

use netsim_common::{MacAddress, Packet, Time};
use netsim_core::Simulator;
use netsim_csma::CsmaDeviceOptions;

use crate::helpers::{attach_devices, channel, record_deliveries};

#[test]
fn delivery_unicast_reaches_promiscuous_listeners_only() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut sim = Simulator::new();
    let channel = channel(Time::from_micros(1));
    let devices = attach_devices(&channel, 3, |_| CsmaDeviceOptions::default());
    let deliveries = record_deliveries(&devices);

    let sniffed = Rc::new(RefCell::new(Vec::new()));
    for device in &devices {
        let sniffed = sniffed.clone();
        device.set_promisc_receive_callback(move |_, id, packet, _| {
            sniffed.borrow_mut().push((id, packet.destination()));
        });
    }

    let b = devices[1].address();
    devices[0].send(&mut sim, Packet::new("for b"), b, 0x0800).unwrap();
    sim.run().unwrap();

    assert_eq!(deliveries.borrow().len(), 1);
    assert_eq!(deliveries.borrow()[0].1, 1);
    assert_eq!(*sniffed.borrow(), vec![(1, b), (2, b)]);
    assert_eq!(devices[2].stats().rx_packets(), 0);

    // Group addresses are accepted by everyone.
    let group = MacAddress::new([0x01, 0x00, 0x5e, 0x00, 0x00, 0x01]);
    devices[2].send(&mut sim, Packet::new("for all"), group, 0x0800).unwrap();
    sim.run().unwrap();

    let receivers: Vec<_> = deliveries.borrow()[1..].iter().map(|d| d.1).collect();
    assert_eq!(receivers, vec![0, 1]);
}

#[test]
fn delivery_packets_carry_link_addressing() {
    let mut sim = Simulator::new();
    let channel = channel(Time::ZERO);
    let a = MacAddress::new([0x02, 0, 0, 0, 0, 0xaa]);
    let devices = attach_devices(&channel, 2, |i| match i {
        0 => CsmaDeviceOptions::default().address(a),
        _ => CsmaDeviceOptions::default(),
    });

    let seen = Rc::new(RefCell::new(None));
    let log = seen.clone();
    devices[1].set_receive_callback(move |_, _, packet, sender| {
        *log.borrow_mut() = Some((packet.source(), packet.destination(), packet.protocol(), sender));
    });

    devices[0].send(&mut sim, Packet::new("x"), devices[1].address(), 0x86dd).unwrap();
    sim.run().unwrap();

    assert_eq!(*seen.borrow(), Some((a, devices[1].address(), 0x86dd, 0)));
}

#[test]
fn delivery_receive_callback_can_reply() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut sim = Simulator::new();
    let channel = channel(Time::from_micros(10));
    let devices = attach_devices(&channel, 2, |_| CsmaDeviceOptions::default());
    let deliveries = record_deliveries(&devices[..1]);

    let b = devices[1].downgrade();
    devices[1].set_receive_callback(move |sim, _, packet, _| {
        if packet.payload().as_ref() == b"ping" {
            if let Some(b) = b.upgrade() {
                b.send(sim, Packet::new("pong"), packet.source(), 0).unwrap();
            }
        }
    });

    devices[0].send(&mut sim, Packet::new("ping"), devices[1].address(), 0).unwrap();
    sim.run().unwrap();

    // The ping lands at 13.2us while the medium is still propagating, so the pong backs off one
    // 1us slot, then takes 3.2us on the wire and 10us to arrive.
    assert_eq!(*deliveries.borrow(), vec![(Time::from_nanos(27_400), 0, 1, b"pong".to_vec())]);
    assert_eq!(devices[1].stats().backoffs(), 1);
    assert_eq!(devices[1].stats().rx_packets(), 1);
}

/// `(source, destination, uid)` of every frame sniffed during a short broadcast exchange.
fn sniffed_run() -> Vec<(MacAddress, MacAddress, u64)> {
    let mut sim = Simulator::new();
    let channel = channel(Time::from_micros(1));
    let devices = attach_devices(&channel, 3, |_| CsmaDeviceOptions::default());

    let sniffed = Rc::new(RefCell::new(Vec::new()));
    for device in &devices {
        let sniffed = sniffed.clone();
        device.set_promisc_receive_callback(move |_, _, packet, _| {
            sniffed.borrow_mut().push((packet.source(), packet.destination(), packet.uid()));
        });
    }

    for device in &devices {
        device.send(&mut sim, Packet::new("hello"), MacAddress::BROADCAST, 0).unwrap();
    }
    sim.run().unwrap();

    let sniffed = sniffed.borrow().clone();
    sniffed
}

#[test]
fn delivery_repeated_runs_see_identical_addresses_and_uids() {
    let first = sniffed_run();
    let second = sniffed_run();

    // Three frames, each heard by two devices.
    assert_eq!(first.len(), 6);
    assert_eq!(first[0], (MacAddress::from_index(1), MacAddress::BROADCAST, 1));
    assert_eq!(first, second);
}
