//! In-process transport pair.
//!
//! Both ends share frame queues, so a peer can be scripted from the same
//! thread (tests) or run on another thread.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::{
    decode, encode, FrameBuffer, Framing, Message, PeerAddr, Transport, TransportError,
};

type FrameQueue = Arc<Mutex<VecDeque<Vec<u8>>>>;

/// One end of an in-memory channel.
pub struct MemoryTransport {
    framing: Framing,
    /// Address this end's frames are reported under
    local: PeerAddr,
    /// Address the other end's frames are reported under
    remote: PeerAddr,
    tx_queue: FrameQueue,
    rx_queue: FrameQueue,
    closed: Arc<AtomicBool>,
    reassembly: FrameBuffer,
}

impl MemoryTransport {
    /// Create two connected ends. The first is conventionally the bus side.
    pub fn pair(framing: Framing) -> (MemoryTransport, MemoryTransport) {
        let a_to_b: FrameQueue = Arc::new(Mutex::new(VecDeque::new()));
        let b_to_a: FrameQueue = Arc::new(Mutex::new(VecDeque::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let bus = MemoryTransport {
            framing,
            local: PeerAddr::Local("memory:bus".to_string()),
            remote: PeerAddr::Local("memory:peer".to_string()),
            tx_queue: a_to_b.clone(),
            rx_queue: b_to_a.clone(),
            closed: closed.clone(),
            reassembly: FrameBuffer::new(),
        };
        let peer = MemoryTransport {
            framing,
            local: PeerAddr::Local("memory:peer".to_string()),
            remote: PeerAddr::Local("memory:bus".to_string()),
            tx_queue: b_to_a,
            rx_queue: a_to_b,
            closed,
            reassembly: FrameBuffer::new(),
        };
        (bus, peer)
    }

    /// Address this end's frames appear to come from, as seen by the other end
    pub fn local_addr(&self) -> PeerAddr {
        self.local.clone()
    }

    /// Close both ends; pending frames can still be drained.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }

    /// Encode and send a message with this channel's framing.
    pub fn send_message(&mut self, msg: &Message) -> Result<(), TransportError> {
        let frame = encode(msg, self.framing)?;
        self.send(&frame)
    }

    /// Drain and decode every frame queued for this end. Undecodable frames
    /// are skipped.
    pub fn recv_messages(&mut self) -> Vec<Message> {
        let mut out = Vec::new();
        while let Ok(Some((bytes, _))) = self.receive() {
            match self.framing {
                Framing::Datagram => {
                    if let Ok(msg) = decode(&bytes, Framing::Datagram) {
                        out.push(msg);
                    }
                }
                Framing::Stream => {
                    self.reassembly.push(&bytes);
                    while let Some(frame) = self.reassembly.next_frame() {
                        if let Ok(frame) = frame {
                            out.push(frame.message);
                        }
                    }
                }
            }
        }
        out
    }
}

impl Transport for MemoryTransport {
    fn framing(&self) -> Framing {
        self.framing
    }

    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(TransportError::ConnectionClosed);
        }
        if let Ok(mut queue) = self.tx_queue.lock() {
            queue.push_back(frame.to_vec());
        }
        Ok(())
    }

    fn receive(&mut self) -> Result<Option<(Vec<u8>, PeerAddr)>, TransportError> {
        let next = match self.rx_queue.lock() {
            Ok(mut queue) => queue.pop_front(),
            Err(_) => None,
        };
        match next {
            Some(frame) => Ok(Some((frame, self.remote.clone()))),
            None if self.closed.load(Ordering::Relaxed) => Err(TransportError::ConnectionClosed),
            None => Ok(None),
        }
    }

    fn poll(&mut self) -> Result<bool, TransportError> {
        let ready = match self.rx_queue.lock() {
            Ok(queue) => !queue.is_empty(),
            Err(_) => false,
        };
        if !ready && self.closed.load(Ordering::Relaxed) {
            return Err(TransportError::ConnectionClosed);
        }
        Ok(ready)
    }
}
