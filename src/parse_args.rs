use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use sio_bridge::{storage::DEFAULT_SECTOR_SIZE, BridgeConfig, DEFAULT_RELAY_DEVICE};
use sio_wire::{udp::DEFAULT_UDP_PORT, Endpoint};

use crate::serial_bus::CommandLine;

const HELP: &str = "\
sio-tunnel - Tunnel an SIO peripheral bus to a remote peripheral emulator

USAGE:
  sio-tunnel [OPTIONS] <COMMAND>

COMMANDS:
  status <device>                 Send a status command and print the reply
  read <device> <sector>          Read one sector (hex dump, or --out <file>)
  write <device> <sector> <file>  Write one sector from a file
  monitor                         Answer the peer's handshake and log bus signals
  serial <port>                   Drive a real bus attached through a serial adapter

  Device ids are hex (31 = D1:, 70 = network adapter). Sectors count from 1.

OPTIONS:
  -h, --help               Prints help information
  --udp <addr>             Wait for the peer on a UDP address (default: 0.0.0.0:9997)
  --tcp <host:port>        Connect to the peer over TCP
  --listen-tcp <addr>      Accept the peer over TCP
  --unix <path>            Connect to the peer over a Unix socket
  --ws <port>              Accept the peer over WebSocket
  --disk <unit>=<path>     Serve a disk unit from a raw image; append :256 for
                           256-byte sectors (may be repeated)
  --delegate <unit>        Send a disk unit's traffic to the peer (may be repeated)
  --relay-device <id>      Device always served by the peer (default: 70)
  --ack-timeout-ms <ms>    Wait for an acknowledgement (default: 1000)
  --data-timeout-ms <ms>   Wait for response data (default: 2000)
  --wait-peer-ms <ms>      Wait for the peer's handshake (default: 5000)
  --out <file>             read: save the sector to a file
  --baud <rate>            serial: line speed (default: 19200)
  --command-line <line>    serial: modem line carrying COMMAND: ri, dsr, cts (default: ri)
  -v, --verbose            Show connection and handshake events
  -vv, --debug             Show relay correlation
  -vvv, --trace            Show every message on the wire
  --log <file>             Write log output to file instead of stderr
";

/// Verbosity level for log output
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Verbosity {
    /// Warnings and errors only
    #[default]
    Quiet = 0,
    /// Connection and handshake events
    Verbose = 1,
    /// Relay correlation
    Debug = 2,
    /// Every message on the wire
    Trace = 3,
}

/// A disk image to serve locally
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskSpec {
    pub unit: u8,
    pub path: PathBuf,
    pub sector_size: usize,
}

impl FromStr for DiskSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (unit, rest) = s
            .split_once('=')
            .ok_or_else(|| format!("expected <unit>=<path>, got '{}'", s))?;
        let unit = parse_unit(unit)?;
        let (path, sector_size) = match rest.rsplit_once(':') {
            Some((path, "128")) => (path, 128),
            Some((path, "256")) => (path, 256),
            _ => (rest, DEFAULT_SECTOR_SIZE),
        };
        if path.is_empty() {
            return Err(format!("missing image path in '{}'", s));
        }
        Ok(DiskSpec {
            unit,
            path: PathBuf::from(path),
            sector_size,
        })
    }
}

fn parse_unit(s: &str) -> Result<u8, String> {
    match s.parse::<u8>() {
        Ok(unit @ 1..=15) => Ok(unit),
        _ => Err(format!("disk unit must be 1..15, got '{}'", s)),
    }
}

fn parse_hex_u8(s: &str) -> Result<u8, String> {
    u8::from_str_radix(s.trim_start_matches("0x"), 16)
        .map_err(|_| format!("expected a hex device id, got '{}'", s))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Status {
        device: u8,
    },
    Read {
        device: u8,
        sector: u16,
        out: Option<PathBuf>,
    },
    Write {
        device: u8,
        sector: u16,
        file: PathBuf,
    },
    Monitor,
    Serial {
        port: String,
        baud: u32,
        line: CommandLine,
    },
}

#[derive(Debug)]
pub struct AppArgs {
    pub endpoint: Endpoint,
    pub disks: Vec<DiskSpec>,
    pub delegated: Vec<u8>,
    pub relay_device: u8,
    pub ack_timeout_ms: Option<u64>,
    pub data_timeout_ms: Option<u64>,
    pub wait_peer: Duration,
    pub verbosity: Verbosity,
    pub log_file: Option<String>,
    pub command: Command,
}

impl AppArgs {
    pub fn bridge_config(&self) -> BridgeConfig {
        let mut config = BridgeConfig::default();
        if let Some(ms) = self.ack_timeout_ms {
            config.ack_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = self.data_timeout_ms {
            config.data_timeout = Duration::from_millis(ms);
        }
        config.router.relay_device = self.relay_device;
        config.router.delegated_units.extend(self.delegated.iter().copied());
        config
    }
}

pub fn parse_args() -> Result<AppArgs, pico_args::Error> {
    let mut pargs = pico_args::Arguments::from_env();

    if pargs.contains(["-h", "--help"]) {
        print!("{}", HELP);
        std::process::exit(0);
    }

    parse_from(pargs)
}

fn parse_from(mut pargs: pico_args::Arguments) -> Result<AppArgs, pico_args::Error> {
    let verbosity = if pargs.contains("--trace") || pargs.contains("-vvv") {
        Verbosity::Trace
    } else if pargs.contains("--debug") || pargs.contains("-vv") {
        Verbosity::Debug
    } else if pargs.contains(["-v", "--verbose"]) {
        Verbosity::Verbose
    } else {
        Verbosity::Quiet
    };

    let endpoint = if let Some(addr) = pargs.opt_value_from_str::<_, String>("--tcp")? {
        Endpoint::Tcp(addr)
    } else if let Some(addr) = pargs.opt_value_from_str::<_, String>("--listen-tcp")? {
        Endpoint::TcpListen(addr)
    } else if let Some(port) = pargs.opt_value_from_str("--ws")? {
        Endpoint::WebSocket(port)
    } else if let Some(path) = unix_endpoint(&mut pargs)? {
        path
    } else {
        let addr: Option<String> = pargs.opt_value_from_str("--udp")?;
        Endpoint::Udp(addr.unwrap_or_else(|| format!("0.0.0.0:{}", DEFAULT_UDP_PORT)))
    };

    let disks = pargs.values_from_str("--disk")?;
    let delegated = pargs.values_from_fn("--delegate", parse_unit)?;
    let relay_device = pargs
        .opt_value_from_fn("--relay-device", parse_hex_u8)?
        .unwrap_or(DEFAULT_RELAY_DEVICE);
    let ack_timeout_ms = pargs.opt_value_from_str("--ack-timeout-ms")?;
    let data_timeout_ms = pargs.opt_value_from_str("--data-timeout-ms")?;
    let wait_peer_ms: u64 = pargs.opt_value_from_str("--wait-peer-ms")?.unwrap_or(5000);
    let log_file = pargs.opt_value_from_str("--log")?;
    let out: Option<PathBuf> = pargs.opt_value_from_str("--out")?;
    let baud: u32 = pargs.opt_value_from_str("--baud")?.unwrap_or(19200);
    let line = pargs
        .opt_value_from_str("--command-line")?
        .unwrap_or(CommandLine::Ri);

    let command = match pargs.subcommand()?.as_deref() {
        Some("status") => Command::Status {
            device: pargs.free_from_fn(parse_hex_u8)?,
        },
        Some("read") => Command::Read {
            device: pargs.free_from_fn(parse_hex_u8)?,
            sector: pargs.free_from_str()?,
            out,
        },
        Some("write") => Command::Write {
            device: pargs.free_from_fn(parse_hex_u8)?,
            sector: pargs.free_from_str()?,
            file: pargs.free_from_str()?,
        },
        Some("monitor") => Command::Monitor,
        Some("serial") => Command::Serial {
            port: pargs.free_from_str()?,
            baud,
            line,
        },
        Some(other) => {
            return Err(pico_args::Error::ArgumentParsingFailed {
                cause: format!("unknown command '{}'", other),
            })
        }
        None => return Err(pico_args::Error::MissingArgument),
    };

    let remaining = pargs.finish();
    if !remaining.is_empty() {
        eprintln!("Warning: unused arguments left: {:?}.", remaining);
    }

    Ok(AppArgs {
        endpoint,
        disks,
        delegated,
        relay_device,
        ack_timeout_ms,
        data_timeout_ms,
        wait_peer: Duration::from_millis(wait_peer_ms),
        verbosity,
        log_file,
        command,
    })
}

#[cfg(unix)]
fn unix_endpoint(pargs: &mut pico_args::Arguments) -> Result<Option<Endpoint>, pico_args::Error> {
    Ok(pargs.opt_value_from_str::<_, String>("--unix")?.map(Endpoint::Unix))
}

#[cfg(not(unix))]
fn unix_endpoint(pargs: &mut pico_args::Arguments) -> Result<Option<Endpoint>, pico_args::Error> {
    if pargs.contains("--unix") {
        return Err(pico_args::Error::ArgumentParsingFailed {
            cause: "Unix sockets are not supported on this platform, use --tcp".to_string(),
        });
    }
    Ok(None)
}
