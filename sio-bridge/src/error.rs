//! Error types for the bridge.
//!
//! Everything here is recovered at the bus boundary and turned into one of
//! the bus status bytes; none of it is fatal to the host.

use sio_wire::{EncodeError, TransportError};
use thiserror::Error;

/// The session has no credits left for another relayed command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("no credits available")]
pub struct NoCreditsError;

/// Why a relay transaction could not be started or completed
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("remote peer is not connected")]
    NotConnected,

    #[error("a relay transaction is already outstanding")]
    Busy,

    #[error(transparent)]
    NoCredits(#[from] NoCreditsError),

    #[error("no response to sync {0} within the time budget")]
    Timeout(u8),

    #[error("peer disconnected while sync {0} was outstanding")]
    Disconnected(u8),

    #[error("transport failed while sync {0} was outstanding")]
    TransportLost(u8),

    #[error("cannot encode the relay burst: {0}")]
    Encode(#[from] EncodeError),

    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),
}

/// Local storage failures
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("unit {0} is not available")]
    Unavailable(u8),

    #[error("sector {sector} is out of range for unit {unit}")]
    BadSector { unit: u8, sector: u16 },

    #[error("unit {0} is write protected")]
    WriteProtected(u8),

    #[error("expected {expected} bytes of sector data, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("image I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reasons a bus transaction ended in NAK or error, kept for diagnostics.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("command frame checksum mismatch: expected {expected:02X}, got {actual:02X}")]
    ChecksumMismatch { expected: u8, actual: u8 },

    #[error("data frame checksum mismatch: expected {expected:02X}, got {actual:02X}")]
    DataChecksumMismatch { expected: u8, actual: u8 },

    #[error("device {0:02X} is not handled")]
    Unhandled(u8),

    #[error("command {command:02X} is not supported by local unit {unit}")]
    Unsupported { unit: u8, command: u8 },

    #[error("remote peer reported error status {0:02X}")]
    RemoteError(u8),

    #[error("remote peer rejected the command")]
    Rejected,

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
