//! Bus command frames and the bus checksum.

use crate::error::BusError;

/// Command frame length on the bus, checksum included
pub const FRAME_LEN: usize = 5;

pub mod command {
    pub const FORMAT: u8 = 0x21;
    pub const READ_CONFIG: u8 = 0x4E;
    pub const WRITE_CONFIG: u8 = 0x4F;
    pub const PUT: u8 = 0x50;
    pub const READ: u8 = 0x52;
    pub const STATUS: u8 = 0x53;
    pub const WRITE: u8 = 0x57;
}

/// Length of a status block
pub const STATUS_LEN: usize = 4;
/// Length of a drive configuration block
pub const CONFIG_LEN: usize = 12;

/// Fold a sum into eight bits, adding each carry back in until none is left.
pub fn fold(mut sum: u32) -> u8 {
    while sum > 0xFF {
        sum = (sum & 0xFF) + (sum >> 8);
    }
    sum as u8
}

/// Bus checksum: byte sum with end-around carry.
pub fn checksum(data: &[u8]) -> u8 {
    fold(data.iter().map(|&b| b as u32).sum())
}

/// A verified command frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandFrame {
    pub device: u8,
    pub command: u8,
    pub aux1: u8,
    pub aux2: u8,
}

impl CommandFrame {
    pub fn new(device: u8, command: u8, aux1: u8, aux2: u8) -> Self {
        CommandFrame {
            device,
            command,
            aux1,
            aux2,
        }
    }

    /// Build a frame addressing a sector
    pub fn with_sector(device: u8, command: u8, sector: u16) -> Self {
        let [aux1, aux2] = sector.to_le_bytes();
        CommandFrame::new(device, command, aux1, aux2)
    }

    /// Check the trailing checksum of a raw frame
    pub fn parse(raw: &[u8; FRAME_LEN]) -> Result<Self, BusError> {
        let expected = checksum(&raw[..4]);
        if expected != raw[4] {
            return Err(BusError::ChecksumMismatch {
                expected,
                actual: raw[4],
            });
        }
        Ok(CommandFrame::new(raw[0], raw[1], raw[2], raw[3]))
    }

    pub fn to_bytes(&self) -> [u8; FRAME_LEN] {
        let body = [self.device, self.command, self.aux1, self.aux2];
        [body[0], body[1], body[2], body[3], checksum(&body)]
    }

    pub fn sector(&self) -> u16 {
        u16::from_le_bytes([self.aux1, self.aux2])
    }
}

/// Which way the data frame of a command flows, and how long it is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Device sends this many bytes to the bus
    Read(usize),
    /// Bus sends this many bytes to the device
    Write(usize),
    /// Not a command we know; the device may or may not answer with data
    Unknown,
}

impl Direction {
    pub fn of(command: u8, sector_size: usize) -> Direction {
        match command {
            command::STATUS => Direction::Read(STATUS_LEN),
            command::READ | command::FORMAT => Direction::Read(sector_size),
            command::READ_CONFIG => Direction::Read(CONFIG_LEN),
            command::WRITE | command::PUT => Direction::Write(sector_size),
            command::WRITE_CONFIG => Direction::Write(CONFIG_LEN),
            _ => Direction::Unknown,
        }
    }

    /// Whether the device is expected to answer with a data frame
    pub fn expects_data(&self) -> bool {
        !matches!(self, Direction::Write(_))
    }

    pub fn data_len(&self) -> usize {
        match self {
            Direction::Read(n) | Direction::Write(n) => *n,
            Direction::Unknown => 0,
        }
    }
}
