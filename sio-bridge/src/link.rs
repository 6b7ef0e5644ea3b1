//! Message-level view of a transport.

use std::collections::VecDeque;
use std::time::Instant;

use sio_wire::{
    decode, encode_datagram, encode_stream, fmt_hex, FrameBuffer, Framing, Message, PeerAddr,
    Transport, TransportError,
};
use tracing::{trace, warn};

/// Encodes outbound messages with the transport's framing and decodes
/// inbound frames, dropping the malformed ones.
pub struct Link<T: Transport> {
    transport: T,
    reassembly: FrameBuffer,
    inbox: VecDeque<(Message, PeerAddr)>,
    /// Stream timestamps count milliseconds from here
    epoch: Option<Instant>,
}

impl<T: Transport> Link<T> {
    pub fn new(transport: T) -> Self {
        Link {
            transport,
            reassembly: FrameBuffer::new(),
            inbox: VecDeque::new(),
            epoch: None,
        }
    }

    pub fn send(&mut self, msg: &Message, now: Instant) -> Result<(), TransportError> {
        let frame = match self.transport.framing() {
            Framing::Datagram => encode_datagram(msg)?,
            Framing::Stream => {
                let epoch = *self.epoch.get_or_insert(now);
                let millis = now.saturating_duration_since(epoch).as_millis() as u32;
                encode_stream(msg, millis)?
            }
        };
        trace!("link: -> {} {}", msg.name(), fmt_hex(&frame));
        self.transport.send(&frame)
    }

    /// Next decoded message, or `None` when nothing is waiting.
    pub fn recv(&mut self) -> Result<Option<(Message, PeerAddr)>, TransportError> {
        loop {
            if let Some(item) = self.inbox.pop_front() {
                return Ok(Some(item));
            }
            let Some((bytes, from)) = self.transport.receive()? else {
                return Ok(None);
            };
            trace!("link: <- {} {}", from, fmt_hex(&bytes));
            match self.transport.framing() {
                Framing::Datagram => match decode(&bytes, Framing::Datagram) {
                    Ok(msg) => self.inbox.push_back((msg, from)),
                    Err(e) => warn!("link: dropping frame from {}: {}", from, e),
                },
                Framing::Stream => {
                    self.reassembly.push(&bytes);
                    while let Some(frame) = self.reassembly.next_frame() {
                        match frame {
                            Ok(frame) => self.inbox.push_back((frame.message, from.clone())),
                            Err(e) => warn!("link: dropping frame from {}: {}", from, e),
                        }
                    }
                }
            }
        }
    }

    /// Whether `recv` has something to hand out
    pub fn poll(&mut self) -> Result<bool, TransportError> {
        if !self.inbox.is_empty() {
            return Ok(true);
        }
        self.transport.poll()
    }

    pub fn set_peer(&mut self, peer: &PeerAddr) {
        self.transport.set_peer(peer);
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_inner(self) -> T {
        self.transport
    }
}
