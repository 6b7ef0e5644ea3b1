//! WebSocket transport.
//!
//! Each binary WebSocket message carries one datagram-framed message, so
//! the peer sees the same encoding it would over UDP.

use std::net::{TcpListener, TcpStream};

use tracing::debug;
use tungstenite::protocol::Message as WsMessage;
use tungstenite::{accept, WebSocket};

use crate::{Framing, PeerAddr, Transport, TransportError};

/// A WebSocket listener that accepts peers
pub struct WebSocketListener {
    listener: TcpListener,
    port: u16,
}

impl WebSocketListener {
    /// Bind to a TCP port and start listening for WebSocket connections
    pub fn bind(port: u16) -> Result<Self, TransportError> {
        let addr = format!("0.0.0.0:{}", port);
        let listener = TcpListener::bind(&addr)?;
        let port = listener.local_addr()?.port();
        Ok(WebSocketListener { listener, port })
    }

    /// Accept a new WebSocket peer (blocking)
    ///
    /// This performs the WebSocket handshake automatically.
    pub fn accept(&self) -> Result<WebSocketTransport, TransportError> {
        let (stream, addr) = self.listener.accept()?;
        // Disable Nagle's algorithm for lower latency
        let _ = stream.set_nodelay(true);

        let websocket = accept(stream).map_err(|e| TransportError::WebSocket(e.to_string()))?;

        Ok(WebSocketTransport {
            websocket,
            peer: PeerAddr::Inet(addr),
            pending: None,
        })
    }

    /// Get the port this listener is bound to
    pub fn port(&self) -> u16 {
        self.port
    }
}

/// A WebSocket peer
pub struct WebSocketTransport {
    websocket: WebSocket<TcpStream>,
    peer: PeerAddr,
    /// Frame read by `poll` and not yet handed out by `receive`
    pending: Option<Vec<u8>>,
}

impl WebSocketTransport {
    /// Wrap an already-handshaken WebSocket
    pub fn from_websocket(websocket: WebSocket<TcpStream>) -> Result<Self, TransportError> {
        let peer = PeerAddr::Inet(websocket.get_ref().peer_addr()?);
        Ok(WebSocketTransport {
            websocket,
            peer,
            pending: None,
        })
    }

    /// Convert tungstenite error to TransportError, preserving WouldBlock
    fn convert_ws_error(e: tungstenite::Error) -> TransportError {
        match e {
            tungstenite::Error::Io(io_err) => TransportError::from(io_err),
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                TransportError::ConnectionClosed
            }
            other => TransportError::WebSocket(other.to_string()),
        }
    }

    /// Read the next binary frame without blocking.
    fn read_frame(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        self.websocket.get_ref().set_nonblocking(true)?;
        let result = loop {
            match self.websocket.read() {
                Ok(WsMessage::Binary(data)) => break Ok(Some(data)),
                Ok(WsMessage::Close(_)) => break Err(TransportError::ConnectionClosed),
                Ok(WsMessage::Ping(data)) => {
                    // Respond to ping with pong
                    let _ = self.websocket.send(WsMessage::Pong(data));
                }
                Ok(WsMessage::Text(text)) => {
                    debug!("websocket: ignoring text message ({} bytes)", text.len());
                }
                Ok(_) => {}
                Err(tungstenite::Error::Io(ref e))
                    if e.kind() == std::io::ErrorKind::WouldBlock =>
                {
                    break Ok(None)
                }
                Err(e) => break Err(Self::convert_ws_error(e)),
            }
        };

        // Restore blocking mode
        let _ = self.websocket.get_ref().set_nonblocking(false);
        result
    }

    /// Close the WebSocket connection gracefully
    pub fn close(&mut self) -> Result<(), TransportError> {
        self.websocket
            .close(None)
            .map_err(Self::convert_ws_error)?;
        // Flush pending close frame
        let _ = self.websocket.flush();
        Ok(())
    }

    /// Check if the connection is still open
    pub fn is_open(&self) -> bool {
        self.websocket.can_read() && self.websocket.can_write()
    }
}

impl Transport for WebSocketTransport {
    fn framing(&self) -> Framing {
        Framing::Datagram
    }

    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        self.websocket
            .send(WsMessage::Binary(frame.to_vec()))
            .map_err(Self::convert_ws_error)
    }

    fn receive(&mut self) -> Result<Option<(Vec<u8>, PeerAddr)>, TransportError> {
        let frame = match self.pending.take() {
            Some(frame) => Some(frame),
            None => self.read_frame()?,
        };
        Ok(frame.map(|f| (f, self.peer.clone())))
    }

    fn poll(&mut self) -> Result<bool, TransportError> {
        if self.pending.is_none() {
            self.pending = self.read_frame()?;
        }
        Ok(self.pending.is_some())
    }
}
