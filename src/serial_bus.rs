//! A real bus on a serial adapter.
//!
//! Data lines go through the UART; the adapter wires the bus COMMAND line
//! to one of the modem status inputs.

use std::fmt;
use std::io::{self, Read, Write};
use std::str::FromStr;
use std::time::Duration;

use serialport::SerialPort;
use sio_bridge::{Bus, Clock, LocalStorage, Tick};
use sio_wire::{fmt_hex, Transport, TransportError};
use tracing::{debug, info, trace, warn};

use crate::error::CliError;

const READ_TIMEOUT: Duration = Duration::from_millis(1);

/// Modem status input carrying the COMMAND line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandLine {
    Ri,
    Dsr,
    Cts,
}

impl FromStr for CommandLine {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ri" => Ok(CommandLine::Ri),
            "dsr" => Ok(CommandLine::Dsr),
            "cts" => Ok(CommandLine::Cts),
            _ => Err(format!("unknown command line '{}', expected ri, dsr or cts", s)),
        }
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandLine::Ri => "RI",
            CommandLine::Dsr => "DSR",
            CommandLine::Cts => "CTS",
        };
        f.write_str(name)
    }
}

impl CommandLine {
    fn read(self, port: &mut dyn SerialPort) -> serialport::Result<bool> {
        match self {
            CommandLine::Ri => port.read_ring_indicator(),
            CommandLine::Dsr => port.read_data_set_ready(),
            CommandLine::Cts => port.read_clear_to_send(),
        }
    }
}

/// Serve the bus on `port` until the adapter or the peer goes away.
pub fn run<T, S, C>(
    bus: &mut Bus<T, S, C>,
    port_name: &str,
    baud: u32,
    line: CommandLine,
) -> Result<(), CliError>
where
    T: Transport,
    S: LocalStorage,
    C: Clock,
{
    let mut port = serialport::new(port_name, baud)
        .timeout(READ_TIMEOUT)
        .open()?;
    info!(
        "serial: {} at {} baud, COMMAND on {}",
        port_name, baud, line
    );

    let mut command = false;
    let mut speed = baud;
    let mut buf = [0u8; 64];
    let mut reply = Vec::new();

    loop {
        let asserted = line.read(port.as_mut())?;
        if asserted != command {
            command = asserted;
            trace!("serial: COMMAND {}", if command { "asserted" } else { "released" });
            bus.command_line(command);
        }

        match port.read(&mut buf) {
            Ok(0) => {}
            Ok(n) => {
                trace!("serial: <- {}", fmt_hex(&buf[..n]));
                for &byte in &buf[..n] {
                    bus.put_byte(byte);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {}
            Err(e) => return Err(e.into()),
        }

        while bus.tick() == Tick::Ready {
            match bus.get_byte() {
                Some(byte) => reply.push(byte),
                None => break,
            }
        }
        if !reply.is_empty() {
            trace!("serial: -> {}", fmt_hex(&reply));
            port.write_all(&reply)?;
            port.flush()?;
            reply.clear();
        }

        if bus.bridge().is_closed() {
            return Err(TransportError::ConnectionClosed.into());
        }

        let signals = bus.bridge_mut().signals_mut();
        if let Some(kind) = signals.take_reset() {
            warn!("serial: peer asked for a {:?} reset, the adapter cannot drive it", kind);
        }
        if let Some(requested) = signals.speed() {
            if requested != speed {
                debug!("serial: switching to {} baud", requested);
                port.set_baud_rate(requested)?;
                speed = requested;
            }
        }
    }
}
