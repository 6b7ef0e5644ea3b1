//! Datagram transport over UDP.

use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};

use tracing::{debug, warn};

use crate::{Framing, PeerAddr, Transport, TransportError, DATAGRAM_HEADER_LEN, MAX_PAYLOAD};

/// Default port the bus side listens on
pub const DEFAULT_UDP_PORT: u16 = 9997;

/// Largest datagram a well-formed frame can fill
const MAX_DATAGRAM: usize = DATAGRAM_HEADER_LEN + MAX_PAYLOAD;

/// Non-blocking UDP socket speaking datagram framing to one peer.
pub struct UdpTransport {
    socket: UdpSocket,
    peer: Option<SocketAddr>,
    buf: Vec<u8>,
}

impl UdpTransport {
    /// Bind and wait for the peer to introduce itself.
    pub fn bind(addr: &str) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;
        Ok(UdpTransport {
            socket,
            peer: None,
            // spare byte: a longer datagram must not be cut to a valid frame
            buf: vec![0u8; MAX_DATAGRAM + 1],
        })
    }

    /// Bind to an ephemeral port and address a known peer.
    pub fn connect(remote: &str) -> Result<Self, TransportError> {
        let remote: SocketAddr = remote
            .parse()
            .map_err(|_| TransportError::InvalidEndpoint(remote.to_string()))?;
        let local = if remote.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let mut transport = Self::bind(local)?;
        transport.peer = Some(remote);
        Ok(transport)
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.socket.local_addr()?)
    }
}

/// ICMP errors surface as connection errors on some platforms; for a
/// connectionless socket they only mean "nothing to read".
fn is_icmp_noise(kind: ErrorKind) -> bool {
    matches!(kind, ErrorKind::ConnectionReset | ErrorKind::ConnectionRefused)
}

impl Transport for UdpTransport {
    fn framing(&self) -> Framing {
        Framing::Datagram
    }

    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        let peer = self.peer.ok_or(TransportError::NoPeer)?;
        // a reset on a connectionless socket is not a closed connection
        self.socket.send_to(frame, peer).map_err(TransportError::Io)?;
        Ok(())
    }

    fn receive(&mut self) -> Result<Option<(Vec<u8>, PeerAddr)>, TransportError> {
        loop {
            match self.socket.recv_from(&mut self.buf) {
                Ok((n, from)) if n > MAX_DATAGRAM => {
                    warn!("udp: dropping oversized datagram from {}", from);
                }
                Ok((n, from)) => return Ok(Some((self.buf[..n].to_vec(), from.into()))),
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => return Ok(None),
                Err(ref e) if is_icmp_noise(e.kind()) => {
                    debug!("udp: ignoring {}", e);
                    return Ok(None);
                }
                Err(e) => return Err(TransportError::Io(e)),
            }
        }
    }

    fn poll(&mut self) -> Result<bool, TransportError> {
        let mut peek = [0u8; 1];
        match self.socket.peek_from(&mut peek) {
            Ok(_) => Ok(true),
            Err(ref e) if e.kind() == ErrorKind::WouldBlock || is_icmp_noise(e.kind()) => {
                Ok(false)
            }
            // a datagram larger than one byte still means data is waiting
            Err(ref e) if e.kind() == ErrorKind::InvalidInput => Ok(true),
            Err(e) => Err(TransportError::Io(e)),
        }
    }

    fn set_peer(&mut self, peer: &PeerAddr) {
        if let PeerAddr::Inet(addr) = peer {
            self.peer = Some(*addr);
        }
    }
}
