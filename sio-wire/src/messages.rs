//! Message types and encoding/decoding for both framings.

use thiserror::Error;

/// Largest payload either framing will carry (one datagram's worth).
pub const MAX_PAYLOAD: usize = 1024;

/// `type, param, length:u16-LE`
pub const DATAGRAM_HEADER_LEN: usize = 4;

/// `total_length:u32-LE, timestamp:u32-LE, event, arg`
pub const STREAM_HEADER_LEN: usize = 10;

/// Message type constants
pub mod msg_type {
    pub const DATA_BYTE: u8 = 0x01;
    pub const DATA_BLOCK: u8 = 0x02;
    pub const DATA_BYTE_SYNC: u8 = 0x09;
    pub const COMMAND_OFF: u8 = 0x10;
    pub const COMMAND_ON: u8 = 0x11;
    pub const COMMAND_OFF_SYNC: u8 = 0x18;
    pub const MOTOR_OFF: u8 = 0x20;
    pub const MOTOR_ON: u8 = 0x21;
    pub const PROCEED_OFF: u8 = 0x30;
    pub const PROCEED_ON: u8 = 0x31;
    pub const INTERRUPT_OFF: u8 = 0x40;
    pub const INTERRUPT_ON: u8 = 0x41;
    pub const SPEED_CHANGE: u8 = 0x80;
    pub const SYNC_RESPONSE: u8 = 0x81;
    pub const DEVICE_DISCONNECT: u8 = 0xC0;
    pub const DEVICE_CONNECT: u8 = 0xC1;
    pub const PING_REQUEST: u8 = 0xC2;
    pub const PING_RESPONSE: u8 = 0xC3;
    pub const ALIVE_REQUEST: u8 = 0xC4;
    pub const ALIVE_RESPONSE: u8 = 0xC5;
    pub const CREDIT_STATUS: u8 = 0xC6;
    pub const CREDIT_UPDATE: u8 = 0xC7;
    pub const WARM_RESET: u8 = 0xFE;
    pub const COLD_RESET: u8 = 0xFF;
}

/// Which of the two wire encodings a transport speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Compact 4-byte header, one message per datagram.
    Datagram,
    /// 10-byte length-prefixed header with timestamp, for byte streams.
    Stream,
}

/// Malformed or unsupported wire bytes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("truncated frame: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("unsupported message type 0x{0:02x}")]
    Unsupported(u8),

    #[error("unexpected payload length {actual} for {kind}")]
    PayloadLength { kind: &'static str, actual: usize },

    #[error("stream frame length {0} is shorter than its header")]
    FrameLength(u32),

    #[error("declared payload of {0} bytes exceeds the {max}-byte limit", max = MAX_PAYLOAD)]
    Oversized(usize),

    #[error("{0} unexpected bytes after the frame")]
    TrailingBytes(usize),
}

/// A message that cannot be put on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("payload of {0} bytes exceeds the {max}-byte limit", max = MAX_PAYLOAD)]
    PayloadTooLarge(usize),
}

/// Messages exchanged between the bus side and the remote peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// A single bus data byte
    DataByte(u8),

    /// A run of bus data bytes, optionally tagged with the sync number of the
    /// transaction it answers
    DataBlock { sync: Option<u8>, data: Vec<u8> },

    /// A bus data byte that also requests a sync response
    DataByteSync { byte: u8, sync: u8 },

    /// Command line deasserted
    CommandOff,

    /// Command line asserted for `device`
    CommandOn { device: u8 },

    /// Command line deasserted; the peer must answer with `SyncResponse { sync }`
    CommandOffSync { sync: u8 },

    MotorOff,
    MotorOn,
    ProceedOff,
    ProceedOn,
    InterruptOff,
    InterruptOn,

    /// Bus bit rate changed
    SpeedChange { baud: u32 },

    /// Answer to `CommandOffSync` / `DataByteSync`
    SyncResponse {
        sync: u8,
        ack_type: u8,
        ack_byte: u8,
        write_size: u16,
    },

    DeviceDisconnect,
    DeviceConnect,
    PingRequest,

    /// Ping answer carrying the initial credit grant
    PingResponse { credits: u8 },

    AliveRequest,
    AliveResponse,

    /// Peer reports its remaining credits and asks for more
    CreditStatus { credits: u8 },

    /// Credit grant
    CreditUpdate { credits: u8 },

    WarmReset,
    ColdReset,
}

/// A message decoded from stream framing, with the sender's timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFrame {
    pub message: Message,
    pub timestamp: u32,
}

impl Message {
    /// Wire type byte
    pub fn type_byte(&self) -> u8 {
        use msg_type::*;
        match self {
            Message::DataByte(_) => DATA_BYTE,
            Message::DataBlock { .. } => DATA_BLOCK,
            Message::DataByteSync { .. } => DATA_BYTE_SYNC,
            Message::CommandOff => COMMAND_OFF,
            Message::CommandOn { .. } => COMMAND_ON,
            Message::CommandOffSync { .. } => COMMAND_OFF_SYNC,
            Message::MotorOff => MOTOR_OFF,
            Message::MotorOn => MOTOR_ON,
            Message::ProceedOff => PROCEED_OFF,
            Message::ProceedOn => PROCEED_ON,
            Message::InterruptOff => INTERRUPT_OFF,
            Message::InterruptOn => INTERRUPT_ON,
            Message::SpeedChange { .. } => SPEED_CHANGE,
            Message::SyncResponse { .. } => SYNC_RESPONSE,
            Message::DeviceDisconnect => DEVICE_DISCONNECT,
            Message::DeviceConnect => DEVICE_CONNECT,
            Message::PingRequest => PING_REQUEST,
            Message::PingResponse { .. } => PING_RESPONSE,
            Message::AliveRequest => ALIVE_REQUEST,
            Message::AliveResponse => ALIVE_RESPONSE,
            Message::CreditStatus { .. } => CREDIT_STATUS,
            Message::CreditUpdate { .. } => CREDIT_UPDATE,
            Message::WarmReset => WARM_RESET,
            Message::ColdReset => COLD_RESET,
        }
    }

    /// Short upper-case name used in protocol logs
    pub fn name(&self) -> &'static str {
        type_name(self.type_byte()).unwrap_or("UNKNOWN")
    }

    /// Split into the `(type, param, payload)` triple shared by both framings.
    fn parts(&self) -> (u8, u8, Vec<u8>) {
        let ty = self.type_byte();
        match self {
            Message::DataByte(byte) => (ty, *byte, vec![]),
            Message::DataBlock { sync: None, data } => (ty, 0, data.clone()),
            Message::DataBlock {
                sync: Some(sync),
                data,
            } => {
                let mut p = Vec::with_capacity(1 + data.len());
                p.push(*sync);
                p.extend_from_slice(data);
                (ty, 1, p)
            }
            Message::DataByteSync { byte, sync } => (ty, *byte, vec![*sync]),
            Message::CommandOn { device } => (ty, *device, vec![]),
            Message::CommandOffSync { sync } => (ty, *sync, vec![]),
            Message::SpeedChange { baud } => (ty, 0, baud.to_le_bytes().to_vec()),
            Message::SyncResponse {
                sync,
                ack_type,
                ack_byte,
                write_size,
            } => {
                let ws = write_size.to_le_bytes();
                (ty, *sync, vec![*ack_type, *ack_byte, ws[0], ws[1]])
            }
            Message::PingResponse { credits }
            | Message::CreditStatus { credits }
            | Message::CreditUpdate { credits } => (ty, *credits, vec![]),
            _ => (ty, 0, vec![]),
        }
    }

    /// Rebuild a message from its `(type, param, payload)` triple.
    fn from_parts(ty: u8, param: u8, payload: &[u8]) -> Result<Message, DecodeError> {
        use msg_type::*;

        let kind = type_name(ty).ok_or(DecodeError::Unsupported(ty))?;
        let expect = |len: usize| {
            if payload.len() == len {
                Ok(())
            } else {
                Err(DecodeError::PayloadLength {
                    kind,
                    actual: payload.len(),
                })
            }
        };

        let message = match ty {
            DATA_BYTE => {
                expect(0)?;
                Message::DataByte(param)
            }
            DATA_BLOCK => {
                let (sync, data) = if param == 0 {
                    (None, payload)
                } else {
                    match payload.split_first() {
                        Some((sync, rest)) => (Some(*sync), rest),
                        None => (None, payload),
                    }
                };
                if data.is_empty() {
                    return Err(DecodeError::PayloadLength {
                        kind,
                        actual: payload.len(),
                    });
                }
                Message::DataBlock {
                    sync,
                    data: data.to_vec(),
                }
            }
            DATA_BYTE_SYNC => {
                expect(1)?;
                Message::DataByteSync {
                    byte: param,
                    sync: payload[0],
                }
            }
            COMMAND_ON => {
                expect(0)?;
                Message::CommandOn { device: param }
            }
            COMMAND_OFF_SYNC => {
                expect(0)?;
                Message::CommandOffSync { sync: param }
            }
            SPEED_CHANGE => {
                expect(4)?;
                Message::SpeedChange {
                    baud: u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]),
                }
            }
            SYNC_RESPONSE => {
                expect(4)?;
                Message::SyncResponse {
                    sync: param,
                    ack_type: payload[0],
                    ack_byte: payload[1],
                    write_size: u16::from_le_bytes([payload[2], payload[3]]),
                }
            }
            PING_RESPONSE => {
                expect(0)?;
                Message::PingResponse { credits: param }
            }
            CREDIT_STATUS => {
                expect(0)?;
                Message::CreditStatus { credits: param }
            }
            CREDIT_UPDATE => {
                expect(0)?;
                Message::CreditUpdate { credits: param }
            }
            _ => {
                expect(0)?;
                match ty {
                    COMMAND_OFF => Message::CommandOff,
                    MOTOR_OFF => Message::MotorOff,
                    MOTOR_ON => Message::MotorOn,
                    PROCEED_OFF => Message::ProceedOff,
                    PROCEED_ON => Message::ProceedOn,
                    INTERRUPT_OFF => Message::InterruptOff,
                    INTERRUPT_ON => Message::InterruptOn,
                    DEVICE_DISCONNECT => Message::DeviceDisconnect,
                    DEVICE_CONNECT => Message::DeviceConnect,
                    PING_REQUEST => Message::PingRequest,
                    ALIVE_REQUEST => Message::AliveRequest,
                    ALIVE_RESPONSE => Message::AliveResponse,
                    WARM_RESET => Message::WarmReset,
                    COLD_RESET => Message::ColdReset,
                    other => return Err(DecodeError::Unsupported(other)),
                }
            }
        };
        Ok(message)
    }
}

fn type_name(ty: u8) -> Option<&'static str> {
    use msg_type::*;
    let name = match ty {
        DATA_BYTE => "DATA_BYTE",
        DATA_BLOCK => "DATA_BLOCK",
        DATA_BYTE_SYNC => "DATA_BYTE_SYNC",
        COMMAND_OFF => "COMMAND_OFF",
        COMMAND_ON => "COMMAND_ON",
        COMMAND_OFF_SYNC => "COMMAND_OFF_SYNC",
        MOTOR_OFF => "MOTOR_OFF",
        MOTOR_ON => "MOTOR_ON",
        PROCEED_OFF => "PROCEED_OFF",
        PROCEED_ON => "PROCEED_ON",
        INTERRUPT_OFF => "INTERRUPT_OFF",
        INTERRUPT_ON => "INTERRUPT_ON",
        SPEED_CHANGE => "SPEED_CHANGE",
        SYNC_RESPONSE => "SYNC_RESPONSE",
        DEVICE_DISCONNECT => "DEVICE_DISCONNECT",
        DEVICE_CONNECT => "DEVICE_CONNECT",
        PING_REQUEST => "PING_REQUEST",
        PING_RESPONSE => "PING_RESPONSE",
        ALIVE_REQUEST => "ALIVE_REQUEST",
        ALIVE_RESPONSE => "ALIVE_RESPONSE",
        CREDIT_STATUS => "CREDIT_STATUS",
        CREDIT_UPDATE => "CREDIT_UPDATE",
        WARM_RESET => "WARM_RESET",
        COLD_RESET => "COLD_RESET",
        _ => return None,
    };
    Some(name)
}

/// Encode a message with the given framing. Stream frames get timestamp 0.
pub fn encode(msg: &Message, framing: Framing) -> Result<Vec<u8>, EncodeError> {
    match framing {
        Framing::Datagram => encode_datagram(msg),
        Framing::Stream => encode_stream(msg, 0),
    }
}

/// Encode to the compact datagram frame: `[type][param][len:u16-LE][payload]`
pub fn encode_datagram(msg: &Message) -> Result<Vec<u8>, EncodeError> {
    let (ty, param, payload) = msg.parts();
    if payload.len() > MAX_PAYLOAD {
        return Err(EncodeError::PayloadTooLarge(payload.len()));
    }
    let mut out = Vec::with_capacity(DATAGRAM_HEADER_LEN + payload.len());
    out.push(ty);
    out.push(param);
    out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Encode to the stream frame:
/// `[total:u32-LE][timestamp:u32-LE][event][arg][payload]`, where `total`
/// counts the 10-byte header itself.
pub fn encode_stream(msg: &Message, timestamp: u32) -> Result<Vec<u8>, EncodeError> {
    let (ty, param, payload) = msg.parts();
    if payload.len() > MAX_PAYLOAD {
        return Err(EncodeError::PayloadTooLarge(payload.len()));
    }
    let total = (STREAM_HEADER_LEN + payload.len()) as u32;
    let mut out = Vec::with_capacity(total as usize);
    out.extend_from_slice(&total.to_le_bytes());
    out.extend_from_slice(&timestamp.to_le_bytes());
    out.push(ty);
    out.push(param);
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Decode exactly one frame occupying the whole buffer.
pub fn decode(data: &[u8], framing: Framing) -> Result<Message, DecodeError> {
    let (message, used) = match framing {
        Framing::Datagram => decode_datagram_prefix(data)?,
        Framing::Stream => {
            let (frame, used) = decode_stream_prefix(data)?;
            (frame.message, used)
        }
    };
    if used != data.len() {
        return Err(DecodeError::TrailingBytes(data.len() - used));
    }
    Ok(message)
}

/// Decode the datagram frame at the start of `data`, returning the number of
/// bytes it occupied.
pub fn decode_datagram_prefix(data: &[u8]) -> Result<(Message, usize), DecodeError> {
    if data.len() < DATAGRAM_HEADER_LEN {
        return Err(DecodeError::Truncated {
            needed: DATAGRAM_HEADER_LEN,
            available: data.len(),
        });
    }
    let len = u16::from_le_bytes([data[2], data[3]]) as usize;
    if len > MAX_PAYLOAD {
        return Err(DecodeError::Oversized(len));
    }
    let total = DATAGRAM_HEADER_LEN + len;
    if data.len() < total {
        return Err(DecodeError::Truncated {
            needed: total,
            available: data.len(),
        });
    }
    let message = Message::from_parts(data[0], data[1], &data[DATAGRAM_HEADER_LEN..total])?;
    Ok((message, total))
}

/// Decode the stream frame at the start of `data`, returning the number of
/// bytes it occupied.
pub fn decode_stream_prefix(data: &[u8]) -> Result<(StreamFrame, usize), DecodeError> {
    let total = declared_stream_len(data)?;
    if data.len() < total {
        return Err(DecodeError::Truncated {
            needed: total,
            available: data.len(),
        });
    }
    let timestamp = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    let message = Message::from_parts(data[8], data[9], &data[STREAM_HEADER_LEN..total])?;
    Ok((StreamFrame { message, timestamp }, total))
}

/// Validated total length of the stream frame starting at `data`.
pub(crate) fn declared_stream_len(data: &[u8]) -> Result<usize, DecodeError> {
    if data.len() < 4 {
        return Err(DecodeError::Truncated {
            needed: STREAM_HEADER_LEN,
            available: data.len(),
        });
    }
    let total = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    if (total as usize) < STREAM_HEADER_LEN {
        return Err(DecodeError::FrameLength(total));
    }
    let payload_len = total as usize - STREAM_HEADER_LEN;
    if payload_len > MAX_PAYLOAD {
        return Err(DecodeError::Oversized(payload_len));
    }
    Ok(total as usize)
}

/// Format bytes as hex string for debug output
pub fn fmt_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
