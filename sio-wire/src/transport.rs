//! Transport abstraction: the byte channel to the remote peer.

use std::fmt;
use std::net::SocketAddr;

use thiserror::Error;

use crate::{EncodeError, Framing};

/// Transport-level failures
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(std::io::Error),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("no peer address known yet")]
    NoPeer,

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error("invalid endpoint '{0}'")]
    InvalidEndpoint(String),
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::BrokenPipe => TransportError::ConnectionClosed,
            _ => TransportError::Io(e),
        }
    }
}

/// Identity of the remote peer as seen by a transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PeerAddr {
    Inet(SocketAddr),
    /// Unix socket peers and in-process peers have no inet address
    Local(String),
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerAddr::Inet(addr) => write!(f, "{}", addr),
            PeerAddr::Local(name) => write!(f, "{}", name),
        }
    }
}

impl From<SocketAddr> for PeerAddr {
    fn from(addr: SocketAddr) -> Self {
        PeerAddr::Inet(addr)
    }
}

/// A byte channel to a single remote peer.
///
/// Implementations never block in `receive`: no data is `Ok(None)`.
pub trait Transport {
    /// Framing spoken on this channel
    fn framing(&self) -> Framing;

    /// Send one encoded frame (or stream chunk) to the current peer.
    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError>;

    /// Take whatever bytes have arrived, with the address they came from.
    ///
    /// Datagram transports return exactly one frame per call; stream
    /// transports return raw chunks that must be reassembled.
    fn receive(&mut self) -> Result<Option<(Vec<u8>, PeerAddr)>, TransportError>;

    /// Whether `receive` would return data right now.
    fn poll(&mut self) -> Result<bool, TransportError>;

    /// Direct future sends to `peer`. Connected transports ignore this.
    fn set_peer(&mut self, _peer: &PeerAddr) {}
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn framing(&self) -> Framing {
        (**self).framing()
    }

    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        (**self).send(frame)
    }

    fn receive(&mut self) -> Result<Option<(Vec<u8>, PeerAddr)>, TransportError> {
        (**self).receive()
    }

    fn poll(&mut self) -> Result<bool, TransportError> {
        (**self).poll()
    }

    fn set_peer(&mut self, peer: &PeerAddr) {
        (**self).set_peer(peer)
    }
}

/// Where to reach or accept the peer, parsed from `scheme://address`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Bind a UDP socket and wait for the peer's ping
    Udp(String),
    /// Connect to a TCP peer
    Tcp(String),
    /// Accept one TCP peer
    TcpListen(String),
    #[cfg(unix)]
    Unix(String),
    /// Accept one WebSocket peer on the given port
    WebSocket(u16),
}

impl Endpoint {
    pub fn parse(s: &str) -> Result<Self, TransportError> {
        let invalid = || TransportError::InvalidEndpoint(s.to_string());
        let (scheme, rest) = s.split_once("://").ok_or_else(invalid)?;
        if rest.is_empty() {
            return Err(invalid());
        }
        match scheme {
            "udp" => Ok(Endpoint::Udp(rest.to_string())),
            "tcp" => Ok(Endpoint::Tcp(rest.to_string())),
            "tcp-listen" => Ok(Endpoint::TcpListen(rest.to_string())),
            #[cfg(unix)]
            "unix" => Ok(Endpoint::Unix(rest.to_string())),
            "ws" => rest.parse().map(Endpoint::WebSocket).map_err(|_| invalid()),
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Udp(a) => write!(f, "udp://{}", a),
            Endpoint::Tcp(a) => write!(f, "tcp://{}", a),
            Endpoint::TcpListen(a) => write!(f, "tcp-listen://{}", a),
            #[cfg(unix)]
            Endpoint::Unix(p) => write!(f, "unix://{}", p),
            Endpoint::WebSocket(port) => write!(f, "ws://{}", port),
        }
    }
}
