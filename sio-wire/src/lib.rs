//! # SIO wire
//!
//! Messages, framings and transports used to carry an 8-bit serial
//! peripheral bus to a remote peripheral emulator.
//!
//! ## Wire Format
//!
//! Datagram framing (UDP, WebSocket):
//! ```text
//! [type:u8][param:u8][len:u16-LE][payload...]
//! ```
//!
//! Stream framing (TCP, Unix sockets):
//! ```text
//! [total:u32-LE][timestamp:u32-LE][type:u8][param:u8][payload...]
//! ```
//! where `total` counts the 10-byte header.
//!
//! ## Message Types
//!
//! | Type | Name | Direction | param / payload |
//! |------|------|-----------|-----------------|
//! | 0x01 | DATA_BYTE | either | byte / empty |
//! | 0x02 | DATA_BLOCK | either | tagged flag / [sync] data |
//! | 0x09 | DATA_BYTE_SYNC | bus→peer | byte / sync |
//! | 0x10 | COMMAND_OFF | bus→peer | empty |
//! | 0x11 | COMMAND_ON | bus→peer | device / empty |
//! | 0x18 | COMMAND_OFF_SYNC | bus→peer | sync / empty |
//! | 0x20/0x21 | MOTOR_OFF/ON | bus→peer | empty |
//! | 0x30/0x31 | PROCEED_OFF/ON | peer→bus | empty |
//! | 0x40/0x41 | INTERRUPT_OFF/ON | peer→bus | empty |
//! | 0x80 | SPEED_CHANGE | either | empty / baud:u32 |
//! | 0x81 | SYNC_RESPONSE | peer→bus | sync / ack_type, ack_byte, write_size:u16 |
//! | 0xC0/0xC1 | DEVICE_DISCONNECT/CONNECT | peer→bus | empty |
//! | 0xC2/0xC3 | PING_REQUEST/RESPONSE | either | credits on response |
//! | 0xC4/0xC5 | ALIVE_REQUEST/RESPONSE | either | empty |
//! | 0xC6/0xC7 | CREDIT_STATUS/UPDATE | either | credits / empty |
//! | 0xFE/0xFF | WARM/COLD_RESET | either | empty |

mod frame_buffer;
mod memory;
mod messages;
pub mod socket;
mod transport;
pub mod udp;
pub mod websocket;

pub use frame_buffer::FrameBuffer;
pub use memory::MemoryTransport;
pub use messages::{
    decode, decode_datagram_prefix, decode_stream_prefix, encode, encode_datagram, encode_stream,
    fmt_hex, msg_type, DecodeError, EncodeError, Framing, Message, StreamFrame,
    DATAGRAM_HEADER_LEN, MAX_PAYLOAD, STREAM_HEADER_LEN,
};
pub use socket::{StreamListener, StreamTransport};
pub use transport::{Endpoint, PeerAddr, Transport, TransportError};
pub use udp::UdpTransport;
pub use websocket::{WebSocketListener, WebSocketTransport};
