//! One-shot bus transactions driven from the command line.
//!
//! These play the bus master: they raise the command line, clock a frame
//! in and read the reply byte by byte, exactly as a host would.

use std::fs;
use std::path::Path;
use std::time::Duration;

use sio_bridge::bus::{ACK, COMPLETE, ERROR, NAK};
use sio_bridge::command::{command, STATUS_LEN};
use sio_bridge::{checksum, route, Bus, Clock, CommandFrame, LocalStorage, Phase, Route};
use sio_wire::{fmt_hex, Transport, TransportError};
use tracing::{debug, info};

use crate::error::CliError;

const PEER_POLL: Duration = Duration::from_millis(1);

/// Wait for the peer's handshake, but only if `device` would be relayed.
pub fn wait_for_peer<T, S, C>(
    bus: &mut Bus<T, S, C>,
    device: u8,
    limit: Duration,
) -> Result<(), CliError>
where
    T: Transport,
    S: LocalStorage,
    C: Clock,
{
    let storage = bus.storage();
    let relayed = route(device, &bus.bridge().config().router, true, |unit| {
        storage.has_unit(unit)
    }) == Route::Relay;
    if !relayed {
        return Ok(());
    }

    let start = bus.clock().now();
    while !bus.bridge().session().is_connected() {
        if bus.clock().now().duration_since(start) > limit {
            return Err(CliError::NoPeer(limit));
        }
        bus.tick();
        bus.clock().sleep(PEER_POLL);
    }
    info!(
        "master: peer {} connected",
        bus.bridge()
            .session()
            .peer()
            .map_or_else(String::new, |p| p.to_string())
    );
    Ok(())
}

/// Run one transaction and return the data frame, checksum verified.
pub fn transact<T, S, C>(
    bus: &mut Bus<T, S, C>,
    frame: CommandFrame,
    outbound: Option<&[u8]>,
) -> Result<Vec<u8>, CliError>
where
    T: Transport,
    S: LocalStorage,
    C: Clock,
{
    bus.command_line(true);
    for byte in frame.to_bytes() {
        bus.put_byte(byte);
    }
    bus.command_line(false);

    let mut outbound = outbound;
    let mut received = Vec::new();
    loop {
        let byte = bus.get_byte().ok_or(CliError::NoResponse(frame.device))?;
        received.push(byte);
        match bus.phase() {
            Phase::Idle => break,
            Phase::DataToRemote => {
                let data = outbound
                    .take()
                    .ok_or(CliError::UnexpectedStatus(byte))?;
                for &b in data {
                    bus.put_byte(b);
                }
                bus.put_byte(checksum(data));
                received.clear();
            }
            _ => {}
        }
    }
    debug!("master: received {}", fmt_hex(&received));

    let reason = || bus.last_error().map(|e| e.to_string());
    let status = received.pop().ok_or(CliError::NoResponse(frame.device))?;
    match status {
        COMPLETE => {}
        NAK => {
            return Err(CliError::Refused {
                device: frame.device,
                byte: status,
                reason: reason(),
            })
        }
        ERROR => {
            return Err(CliError::DeviceError {
                device: frame.device,
                reason: reason(),
            })
        }
        other => return Err(CliError::UnexpectedStatus(other)),
    }

    match received.first() {
        Some(&ACK) => {}
        Some(&other) => return Err(CliError::UnexpectedStatus(other)),
        None => return Err(CliError::NoResponse(frame.device)),
    }
    let mut data = received.split_off(1);
    if let Some(chk) = data.pop() {
        if checksum(&data) != chk {
            return Err(CliError::DataChecksum);
        }
    }
    Ok(data)
}

pub fn status<T, S, C>(bus: &mut Bus<T, S, C>, device: u8, wait: Duration) -> Result<(), CliError>
where
    T: Transport,
    S: LocalStorage,
    C: Clock,
{
    wait_for_peer(bus, device, wait)?;
    let data = transact(bus, CommandFrame::new(device, command::STATUS, 0, 0), None)?;
    if data.is_empty() {
        println!("{:02X}: complete, no status data", device);
    } else {
        if data.len() != STATUS_LEN {
            debug!("master: status frame of {} bytes", data.len());
        }
        println!("{:02X}: {}", device, fmt_hex(&data));
    }
    Ok(())
}

pub fn read<T, S, C>(
    bus: &mut Bus<T, S, C>,
    device: u8,
    sector: u16,
    out: Option<&Path>,
    wait: Duration,
) -> Result<(), CliError>
where
    T: Transport,
    S: LocalStorage,
    C: Clock,
{
    wait_for_peer(bus, device, wait)?;
    let data = transact(bus, CommandFrame::with_sector(device, command::READ, sector), None)?;
    match out {
        Some(path) => {
            fs::write(path, &data)?;
            println!(
                "{:02X}: sector {} ({} bytes) saved to {}",
                device,
                sector,
                data.len(),
                path.display()
            );
        }
        None => {
            for (i, row) in data.chunks(16).enumerate() {
                println!("{:04X}  {}", i * 16, fmt_hex(row));
            }
        }
    }
    Ok(())
}

pub fn write<T, S, C>(
    bus: &mut Bus<T, S, C>,
    device: u8,
    sector: u16,
    file: &Path,
    wait: Duration,
) -> Result<(), CliError>
where
    T: Transport,
    S: LocalStorage,
    C: Clock,
{
    let data = fs::read(file)?;
    let expected = expected_sector_size(bus, device, sector);
    if data.len() != expected {
        return Err(CliError::SectorSize {
            expected,
            actual: data.len(),
        });
    }

    wait_for_peer(bus, device, wait)?;
    transact(
        bus,
        CommandFrame::with_sector(device, command::WRITE, sector),
        Some(&data),
    )?;
    println!("{:02X}: sector {} written", device, sector);
    Ok(())
}

fn expected_sector_size<T, S, C>(bus: &Bus<T, S, C>, device: u8, sector: u16) -> usize
where
    T: Transport,
    S: LocalStorage,
    C: Clock,
{
    let storage = bus.storage();
    let config = bus.bridge().config();
    match route(device, &config.router, true, |unit| storage.has_unit(unit)) {
        Route::LocalStorage(unit) => storage.sector_size(unit, sector),
        _ => config.relay_sector_size,
    }
}

/// Logs peer and host-signal changes as they happen.
#[derive(Debug, Default)]
pub struct Monitor {
    connected: bool,
    proceed: bool,
    interrupt: bool,
    speed: Option<u32>,
}

impl Monitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pump the bus once and report what changed.
    pub fn observe<T, S, C>(&mut self, bus: &mut Bus<T, S, C>)
    where
        T: Transport,
        S: LocalStorage,
        C: Clock,
    {
        bus.tick();

        let session = bus.bridge().session();
        if session.is_connected() != self.connected {
            self.connected = session.is_connected();
            match (self.connected, session.peer()) {
                (true, Some(peer)) => info!(
                    "monitor: peer {} connected with {} credits",
                    peer,
                    session.credits()
                ),
                _ => info!("monitor: peer gone"),
            }
        }

        let signals = bus.bridge_mut().signals_mut();
        if let Some(kind) = signals.take_reset() {
            info!("monitor: peer requested {:?} reset", kind);
        }
        if signals.proceed() != self.proceed {
            self.proceed = signals.proceed();
            info!("monitor: PROCEED {}", on_off(self.proceed));
        }
        if signals.interrupt() != self.interrupt {
            self.interrupt = signals.interrupt();
            info!("monitor: INTERRUPT {}", on_off(self.interrupt));
        }
        if signals.speed() != self.speed {
            self.speed = signals.speed();
            if let Some(baud) = self.speed {
                info!("monitor: peer asked for {} baud", baud);
            }
        }
    }

    pub fn connected(&self) -> bool {
        self.connected
    }

    pub fn proceed(&self) -> bool {
        self.proceed
    }

    pub fn interrupt(&self) -> bool {
        self.interrupt
    }

    pub fn speed(&self) -> Option<u32> {
        self.speed
    }
}

fn on_off(on: bool) -> &'static str {
    if on {
        "on"
    } else {
        "off"
    }
}

/// Log until the transport is closed by the peer.
pub fn monitor<T, S, C>(bus: &mut Bus<T, S, C>) -> Result<(), CliError>
where
    T: Transport,
    S: LocalStorage,
    C: Clock,
{
    let mut monitor = Monitor::new();
    loop {
        monitor.observe(bus);
        if bus.bridge().is_closed() {
            return Err(TransportError::ConnectionClosed.into());
        }
        bus.clock().sleep(PEER_POLL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;
    use std::thread;
    use std::time::Instant;

    use sio_bridge::{
        Bridge, BridgeConfig, DiskSet, ManualClock, NoStorage, RawImage, SystemClock,
    };
    use sio_wire::{Framing, MemoryTransport, Message};

    fn bus_with<S: LocalStorage>(
        storage: S,
    ) -> (Bus<MemoryTransport, S, Rc<ManualClock>>, MemoryTransport) {
        let (side, peer) = MemoryTransport::pair(Framing::Datagram);
        let clock = Rc::new(ManualClock::new());
        let bus = Bus::new(Bridge::new(side, BridgeConfig::default()), storage, clock);
        (bus, peer)
    }

    fn disk(dir: &tempfile::TempDir) -> DiskSet {
        let mut image = RawImage::create(dir.path().join("d1.img"), 128, 4).unwrap();
        image.write_sector(1, 2, &[0x5A; 128]).unwrap();
        let mut disks = DiskSet::new();
        disks.mount(1, image);
        disks
    }

    #[test]
    fn test_local_read_and_write() {
        let dir = tempfile::tempdir().unwrap();
        let (mut bus, _peer) = bus_with(disk(&dir));

        let data = transact(&mut bus, CommandFrame::with_sector(0x31, command::READ, 2), None)
            .unwrap();
        assert_eq!(data, vec![0x5A; 128]);

        let sector = vec![0x11; 128];
        let written = transact(
            &mut bus,
            CommandFrame::with_sector(0x31, command::WRITE, 3),
            Some(&sector),
        )
        .unwrap();
        assert!(written.is_empty());

        let back = transact(&mut bus, CommandFrame::with_sector(0x31, command::READ, 3), None)
            .unwrap();
        assert_eq!(back, sector);
    }

    #[test]
    fn test_unhandled_device_is_refused() {
        let (mut bus, _peer) = bus_with(NoStorage);
        let err = transact(&mut bus, CommandFrame::new(0x32, command::STATUS, 0, 0), None)
            .unwrap_err();
        assert!(matches!(
            err,
            CliError::Refused {
                device: 0x32,
                byte: NAK,
                reason: Some(_)
            }
        ));
    }

    #[test]
    fn test_relayed_status() {
        let (side, mut peer) = MemoryTransport::pair(Framing::Datagram);
        let mut bus = Bus::new(
            Bridge::new(side, BridgeConfig::default()),
            NoStorage,
            SystemClock,
        );

        let responder = thread::spawn(move || {
            peer.send_message(&Message::PingRequest).unwrap();
            let start = Instant::now();
            loop {
                assert!(start.elapsed() < Duration::from_secs(3), "no request");
                let sync = peer.recv_messages().into_iter().find_map(|msg| match msg {
                    Message::CommandOffSync { sync } => Some(sync),
                    _ => None,
                });
                if let Some(sync) = sync {
                    peer.send_message(&Message::DataBlock {
                        sync: Some(sync),
                        data: vec![0x10, 0xFF, 0xE0, 0x00],
                    })
                    .unwrap();
                    return;
                }
                thread::sleep(Duration::from_millis(1));
            }
        });

        wait_for_peer(&mut bus, 0x70, Duration::from_secs(3)).unwrap();
        let data = transact(&mut bus, CommandFrame::new(0x70, command::STATUS, 0, 0), None)
            .unwrap();
        assert_eq!(data, vec![0x10, 0xFF, 0xE0, 0x00]);
        responder.join().unwrap();
    }

    #[test]
    fn test_wait_for_peer_gives_up() {
        let (mut bus, _peer) = bus_with(NoStorage);
        let err = wait_for_peer(&mut bus, 0x70, Duration::from_millis(20)).unwrap_err();
        assert!(matches!(err, CliError::NoPeer(_)));
    }

    #[test]
    fn test_local_units_skip_the_wait() {
        let dir = tempfile::tempdir().unwrap();
        let (mut bus, _peer) = bus_with(disk(&dir));
        wait_for_peer(&mut bus, 0x31, Duration::ZERO).unwrap();
    }

    #[test]
    fn test_monitor_tracks_signals() {
        let (mut bus, mut peer) = bus_with(NoStorage);
        let mut monitor = Monitor::new();

        peer.send_message(&Message::PingRequest).unwrap();
        monitor.observe(&mut bus);
        assert!(monitor.connected());

        peer.send_message(&Message::ProceedOn).unwrap();
        peer.send_message(&Message::SpeedChange { baud: 57600 })
            .unwrap();
        monitor.observe(&mut bus);
        assert!(monitor.proceed());
        assert!(!monitor.interrupt());
        assert_eq!(monitor.speed(), Some(57600));

        peer.send_message(&Message::DeviceDisconnect).unwrap();
        monitor.observe(&mut bus);
        assert!(!monitor.connected());
    }

    #[test]
    fn test_monitor_ends_when_peer_closes() {
        let (mut bus, peer) = bus_with(NoStorage);
        peer.close();

        let err = monitor(&mut bus).unwrap_err();
        assert!(matches!(
            err,
            CliError::Transport(TransportError::ConnectionClosed)
        ));
        assert!(bus.bridge().is_closed());
    }
}
