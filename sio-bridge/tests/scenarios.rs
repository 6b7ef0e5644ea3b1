//! End-to-end bus transactions against an in-process peer.

use std::rc::Rc;
use std::time::Duration;

use sio_bridge::bus::{ACK, COMPLETE, ERROR, NAK};
use sio_bridge::command::command;
use sio_bridge::{
    checksum, Bridge, BridgeConfig, Bus, BusError, CommandFrame, Direction, DiskSet,
    HandshakeState, ManualClock, NoStorage, Phase, RawImage, RelayError,
};
use sio_wire::{Framing, MemoryTransport, Message};

type TestBus = Bus<MemoryTransport, NoStorage, Rc<ManualClock>>;

fn setup(framing: Framing) -> (TestBus, MemoryTransport, Rc<ManualClock>) {
    let mut config = BridgeConfig::default();
    config.router.delegated_units.insert(1);
    let (side, mut peer) = MemoryTransport::pair(framing);
    let clock = Rc::new(ManualClock::new());
    let bus = Bus::new(Bridge::new(side, config), NoStorage, clock.clone());

    peer.send_message(&Message::PingRequest).unwrap();
    (bus, peer, clock)
}

fn send_frame(bus: &mut TestBus, bytes: [u8; 5]) {
    bus.command_line(true);
    for byte in bytes {
        bus.put_byte(byte);
    }
    bus.command_line(false);
}

fn scenario_a(framing: Framing) {
    let (mut bus, mut peer, _clock) = setup(framing);

    send_frame(&mut bus, [0x31, 0x53, 0x00, 0x00, 0x84]);
    assert_eq!(bus.phase(), Phase::WaitAck);

    let sent = peer.recv_messages();
    assert_eq!(
        sent,
        vec![
            Message::PingResponse { credits: 200 },
            Message::CommandOn { device: 0x31 },
            Message::DataBlock {
                sync: None,
                data: vec![0x53, 0x00, 0x00]
            },
            Message::CommandOffSync { sync: 0 },
        ]
    );

    peer.send_message(&Message::SyncResponse {
        sync: 0,
        ack_type: b'C',
        ack_byte: b'C',
        write_size: 0,
    })
    .unwrap();

    assert_eq!(bus.get_byte(), Some(ACK));
    assert_eq!(bus.get_byte(), Some(COMPLETE));
    assert_eq!(bus.phase(), Phase::Idle);
    assert_eq!(bus.bridge().session().credits(), 199);
}

#[test]
fn scenario_a_status_relayed_over_datagrams() {
    scenario_a(Framing::Datagram);
}

#[test]
fn scenario_a_status_relayed_over_stream() {
    scenario_a(Framing::Stream);
}

#[test]
fn scenario_b_timeout_naks_and_clears() {
    let (mut bus, mut peer, clock) = setup(Framing::Datagram);

    send_frame(&mut bus, [0x31, 0x53, 0x00, 0x00, 0x84]);
    assert_eq!(bus.get_byte(), Some(NAK));
    assert!(!bus.bridge().relay().is_pending());
    assert!(matches!(
        bus.last_error(),
        Some(BusError::Relay(RelayError::Timeout(0)))
    ));
    // Status expects data, so the longer budget applies
    assert!(clock.elapsed() > Duration::from_millis(2000));
    assert!(clock.elapsed() < Duration::from_millis(2100));

    // A stale answer to the lost transaction must not resolve the next one
    peer.recv_messages();
    send_frame(&mut bus, [0x31, 0x53, 0x00, 0x00, 0x84]);
    assert_eq!(bus.phase(), Phase::WaitAck);
    assert_eq!(bus.bridge().relay().pending().unwrap().sync, 1);

    peer.send_message(&Message::SyncResponse {
        sync: 0,
        ack_type: b'C',
        ack_byte: 0,
        write_size: 0,
    })
    .unwrap();
    peer.send_message(&Message::DataBlock {
        sync: Some(1),
        data: vec![0x10, 0xFF, 0xE0, 0x00],
    })
    .unwrap();

    let mut got = Vec::new();
    while let Some(byte) = bus.get_byte() {
        got.push(byte);
    }
    let status = [0x10, 0xFF, 0xE0, 0x00];
    assert_eq!(
        got,
        vec![ACK, 0x10, 0xFF, 0xE0, 0x00, checksum(&status), COMPLETE]
    );
}

#[test]
fn scenario_c_disconnect_during_wait() {
    let (mut bus, mut peer, clock) = setup(Framing::Datagram);

    send_frame(&mut bus, [0x31, 0x53, 0x00, 0x00, 0x84]);
    peer.send_message(&Message::DeviceDisconnect).unwrap();

    assert_eq!(bus.get_byte(), Some(ERROR));
    assert_eq!(bus.phase(), Phase::Idle);
    assert_eq!(bus.bridge().session().state(), HandshakeState::Unconnected);
    assert!(!bus.bridge().relay().is_pending());
    assert!(clock.elapsed() < Duration::from_millis(10));

    let now = std::time::Instant::now();
    let frame = CommandFrame::new(0x31, command::STATUS, 0, 0);
    assert!(matches!(
        bus.bridge_mut().begin(&frame, None, Direction::Read(4), now),
        Err(RelayError::NotConnected)
    ));

    // The bus master sees a clean NAK from here on
    send_frame(&mut bus, [0x31, 0x53, 0x00, 0x00, 0x84]);
    assert_eq!(bus.get_byte(), Some(NAK));
}

#[test]
fn transport_loss_naks_cleanly() {
    let (mut bus, peer, _clock) = setup(Framing::Datagram);
    bus.tick();
    assert!(bus.bridge().session().is_connected());

    peer.close();
    send_frame(&mut bus, [0x31, 0x53, 0x00, 0x00, 0x84]);
    assert_eq!(bus.get_byte(), Some(NAK));
    assert!(!bus.bridge().session().is_connected());
}

#[test]
fn credits_run_out() {
    let mut config = BridgeConfig::default();
    config.credit_grant = 2;
    config.router.delegated_units.insert(1);
    let (side, mut peer) = MemoryTransport::pair(Framing::Datagram);
    let clock = Rc::new(ManualClock::new());
    let mut bus = Bus::new(Bridge::new(side, config), NoStorage, clock);
    peer.send_message(&Message::PingRequest).unwrap();

    for sync in 0..2u8 {
        send_frame(&mut bus, [0x31, 0x53, 0x00, 0x00, 0x84]);
        peer.send_message(&Message::SyncResponse {
            sync,
            ack_type: b'C',
            ack_byte: 0,
            write_size: 0,
        })
        .unwrap();
        assert_eq!(bus.get_byte(), Some(ACK));
        assert_eq!(bus.get_byte(), Some(COMPLETE));
    }

    send_frame(&mut bus, [0x31, 0x53, 0x00, 0x00, 0x84]);
    assert_eq!(bus.get_byte(), Some(NAK));

    // A credit grant makes the peer usable again
    peer.send_message(&Message::CreditStatus { credits: 0 }).unwrap();
    send_frame(&mut bus, [0x31, 0x53, 0x00, 0x00, 0x84]);
    assert_eq!(bus.phase(), Phase::WaitAck);
}

#[test]
fn local_and_relayed_units_side_by_side() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("boot.img");
    let mut image = RawImage::create(&path, 128, 720).unwrap();
    let boot: Vec<u8> = (0..128).map(|i| (i * 3) as u8).collect();
    image.write_sector(1, 1, &boot).unwrap();

    let mut disks = DiskSet::new();
    disks.mount(1, image);

    let mut config = BridgeConfig::default();
    config.router.delegated_units.insert(2);
    let (side, mut peer) = MemoryTransport::pair(Framing::Datagram);
    let clock = Rc::new(ManualClock::new());
    let mut bus = Bus::new(Bridge::new(side, config), disks, clock);
    peer.send_message(&Message::PingRequest).unwrap();

    // D1: sector 1 from the local image
    let frame = CommandFrame::with_sector(0x31, command::READ, 1).to_bytes();
    bus.command_line(true);
    for byte in frame {
        bus.put_byte(byte);
    }
    bus.command_line(false);
    let mut got = Vec::new();
    while let Some(byte) = bus.get_byte() {
        got.push(byte);
    }
    assert_eq!(got[0], ACK);
    assert_eq!(&got[1..129], &boot[..]);
    assert_eq!(got[129], checksum(&boot));
    assert_eq!(got[130], COMPLETE);

    // D2: delegated to the peer
    let frame = CommandFrame::with_sector(0x32, command::READ, 1).to_bytes();
    bus.command_line(true);
    for byte in frame {
        bus.put_byte(byte);
    }
    let sent = peer.recv_messages();
    assert_eq!(sent.last(), Some(&Message::CommandOffSync { sync: 0 }));
    assert_eq!(sent[1], Message::CommandOn { device: 0x32 });

    peer.send_message(&Message::DataBlock {
        sync: Some(0),
        data: vec![0xEE; 128],
    })
    .unwrap();
    assert_eq!(bus.get_byte(), Some(ACK));
    assert_eq!(bus.get_byte(), Some(0xEE));
}

#[test]
fn disconnect_during_write_data_frame() {
    let (mut bus, mut peer, _clock) = setup(Framing::Datagram);
    bus.tick();
    assert_eq!(peer.recv_messages(), vec![Message::PingResponse { credits: 200 }]);

    send_frame(&mut bus, CommandFrame::with_sector(0x31, command::WRITE, 4).to_bytes());
    assert_eq!(bus.get_byte(), Some(ACK));
    assert_eq!(bus.phase(), Phase::DataToRemote);

    let sector = vec![0x6C; 128];
    for &byte in &sector[..64] {
        bus.put_byte(byte);
    }
    peer.send_message(&Message::DeviceDisconnect).unwrap();
    for &byte in &sector[64..] {
        bus.put_byte(byte);
    }
    bus.put_byte(checksum(&sector));

    assert_eq!(bus.get_byte(), Some(NAK));
    assert_eq!(bus.phase(), Phase::Idle);
    assert!(matches!(
        bus.last_error(),
        Some(BusError::Relay(RelayError::NotConnected))
    ));
    assert_eq!(bus.bridge().session().state(), HandshakeState::Unconnected);
    assert!(!bus.bridge().relay().is_pending());
    // No burst went out for the abandoned write
    assert!(peer.recv_messages().is_empty());
}

#[test]
fn unencodable_write_naks_and_keeps_peer() {
    let mut config = BridgeConfig::default();
    config.relay_sector_size = 1022;
    let (side, mut peer) = MemoryTransport::pair(Framing::Datagram);
    let clock = Rc::new(ManualClock::new());
    let mut bus = Bus::new(Bridge::new(side, config), NoStorage, clock);
    peer.send_message(&Message::PingRequest).unwrap();
    bus.tick();
    assert_eq!(peer.recv_messages(), vec![Message::PingResponse { credits: 200 }]);

    send_frame(&mut bus, CommandFrame::with_sector(0x70, command::WRITE, 1).to_bytes());
    assert_eq!(bus.get_byte(), Some(ACK));
    let data = vec![0x5A; 1022];
    for &byte in &data {
        bus.put_byte(byte);
    }
    bus.put_byte(checksum(&data));

    assert_eq!(bus.get_byte(), Some(NAK));
    assert!(matches!(
        bus.last_error(),
        Some(BusError::Relay(RelayError::Encode(_)))
    ));
    assert!(bus.bridge().session().is_connected());
    assert_eq!(bus.bridge().session().credits(), 200);
    assert!(peer.recv_messages().is_empty());
}
