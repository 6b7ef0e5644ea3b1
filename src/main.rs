mod error;
mod logger;
mod master;
mod parse_args;
mod serial_bus;

use parse_args::{parse_args, AppArgs, Command};
use sio_bridge::{Bridge, Bus, DiskSet, RawImage, SystemClock};
use sio_wire::{
    Endpoint, StreamListener, StreamTransport, Transport, UdpTransport, WebSocketListener,
};
use tracing::info;

use crate::error::CliError;

fn main() {
    let args = match parse_args() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("Error parsing arguments: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = logger::init(args.verbosity, args.log_file.as_deref()) {
        eprintln!(
            "Failed to open log file '{}': {}",
            args.log_file.as_deref().unwrap_or_default(),
            e
        );
        std::process::exit(1);
    }
    if let Some(path) = &args.log_file {
        eprintln!("Logging to: {}", path);
    }

    if let Err(e) = run(args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: AppArgs) -> Result<(), CliError> {
    let disks = mount_disks(&args)?;
    let transport = open_transport(&args.endpoint)?;
    let config = args.bridge_config();
    let mut bus = Bus::new(Bridge::new(transport, config), disks, SystemClock);

    match &args.command {
        Command::Status { device } => master::status(&mut bus, *device, args.wait_peer),
        Command::Read {
            device,
            sector,
            out,
        } => master::read(&mut bus, *device, *sector, out.as_deref(), args.wait_peer),
        Command::Write {
            device,
            sector,
            file,
        } => master::write(&mut bus, *device, *sector, file, args.wait_peer),
        Command::Monitor => master::monitor(&mut bus),
        Command::Serial { port, baud, line } => serial_bus::run(&mut bus, port, *baud, *line),
    }
}

fn mount_disks(args: &AppArgs) -> Result<DiskSet, CliError> {
    let mut disks = DiskSet::new();
    for spec in &args.disks {
        let image = RawImage::open(&spec.path, spec.sector_size)?;
        info!(
            "D{}: {} ({} sectors of {} bytes{})",
            spec.unit,
            spec.path.display(),
            image.sectors(),
            image.sector_size(),
            if image.is_read_only() { ", read-only" } else { "" }
        );
        disks.mount(spec.unit, image);
    }
    Ok(disks)
}

fn open_transport(endpoint: &Endpoint) -> Result<Box<dyn Transport>, CliError> {
    let transport: Box<dyn Transport> = match endpoint {
        Endpoint::Udp(addr) => {
            let udp = UdpTransport::bind(addr)?;
            info!("Waiting for the peer on udp://{}", udp.local_addr()?);
            Box::new(udp)
        }
        Endpoint::TcpListen(_) => {
            let listener = StreamListener::bind(endpoint)?;
            eprintln!("Waiting for the peer on {}...", endpoint);
            Box::new(listener.accept()?)
        }
        Endpoint::WebSocket(port) => {
            let listener = WebSocketListener::bind(*port)?;
            eprintln!("Waiting for the peer on ws://0.0.0.0:{}/...", listener.port());
            Box::new(listener.accept()?)
        }
        _ => {
            info!("Connecting to the peer at {}", endpoint);
            Box::new(StreamTransport::connect(endpoint)?)
        }
    };
    Ok(transport)
}
