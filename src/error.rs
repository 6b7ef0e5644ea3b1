use std::time::Duration;

use sio_bridge::StorageError;
use sio_wire::TransportError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("no peer handshake within {0:?}")]
    NoPeer(Duration),

    #[error("device {device:02X} refused the command with '{}'{}", status_char(.byte), reason_suffix(.reason))]
    Refused {
        device: u8,
        byte: u8,
        reason: Option<String>,
    },

    #[error("device {device:02X} reported an error{}", reason_suffix(.reason))]
    DeviceError { device: u8, reason: Option<String> },

    #[error("device {0:02X} did not answer")]
    NoResponse(u8),

    #[error("unexpected status byte {0:02X}")]
    UnexpectedStatus(u8),

    #[error("data frame checksum mismatch")]
    DataChecksum,

    #[error("expected {expected} bytes of sector data, file has {actual}")]
    SectorSize { expected: usize, actual: usize },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("serial port: {0}")]
    Serial(#[from] serialport::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn status_char(byte: &u8) -> char {
    char::from(*byte)
}

fn reason_suffix(reason: &Option<String>) -> String {
    match reason {
        Some(reason) => format!(" ({})", reason),
        None => String::new(),
    }
}
