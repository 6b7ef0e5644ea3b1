//! Stream transport over Unix sockets and TCP connections.

use std::io::{ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream};
#[cfg(unix)]
use std::os::unix::net::{UnixListener, UnixStream};
use std::time::Duration;

use crate::{Endpoint, Framing, PeerAddr, Transport, TransportError};

/// Default TCP port for stream peers
pub const DEFAULT_TCP_PORT: u16 = 9996;

/// Default socket path for Unix sockets
#[cfg(unix)]
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/sio-tunnel.sock";

const READ_CHUNK: usize = 4096;

/// Internal enum for listener types
enum ListenerInner {
    #[cfg(unix)]
    Unix(UnixListener, String),
    Tcp(TcpListener),
}

/// A socket listener that accepts stream peers
pub struct StreamListener {
    inner: ListenerInner,
}

impl StreamListener {
    /// Bind to a `tcp-listen://` or `unix://` endpoint
    pub fn bind(endpoint: &Endpoint) -> Result<Self, TransportError> {
        let inner = match endpoint {
            #[cfg(unix)]
            Endpoint::Unix(path) => {
                // Remove existing socket file if present
                let _ = std::fs::remove_file(path);
                ListenerInner::Unix(UnixListener::bind(path)?, path.clone())
            }
            Endpoint::TcpListen(addr) => ListenerInner::Tcp(TcpListener::bind(addr)?),
            other => return Err(TransportError::InvalidEndpoint(other.to_string())),
        };
        Ok(StreamListener { inner })
    }

    /// Accept a new peer (blocking)
    pub fn accept(&self) -> Result<StreamTransport, TransportError> {
        match &self.inner {
            #[cfg(unix)]
            ListenerInner::Unix(listener, path) => {
                let (stream, _) = listener.accept()?;
                StreamTransport::from_unix(stream, path)
            }
            ListenerInner::Tcp(listener) => {
                let (stream, _) = listener.accept()?;
                StreamTransport::from_tcp(stream)
            }
        }
    }

    /// TCP address actually bound (useful with port 0)
    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        match &self.inner {
            #[cfg(unix)]
            ListenerInner::Unix(..) => None,
            ListenerInner::Tcp(listener) => listener.local_addr().ok(),
        }
    }
}

#[cfg(unix)]
impl Drop for StreamListener {
    fn drop(&mut self) {
        // Clean up Unix socket file on drop
        if let ListenerInner::Unix(_, path) = &self.inner {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// Internal enum for connection stream types
enum StreamInner {
    #[cfg(unix)]
    Unix(UnixStream),
    Tcp(TcpStream),
}

impl StreamInner {
    fn set_nonblocking(&self, nonblocking: bool) -> std::io::Result<()> {
        match self {
            #[cfg(unix)]
            StreamInner::Unix(s) => s.set_nonblocking(nonblocking),
            StreamInner::Tcp(s) => s.set_nonblocking(nonblocking),
        }
    }

    fn set_write_timeout(&self, dur: Option<Duration>) -> std::io::Result<()> {
        match self {
            #[cfg(unix)]
            StreamInner::Unix(s) => s.set_write_timeout(dur),
            StreamInner::Tcp(s) => s.set_write_timeout(dur),
        }
    }

    fn shutdown(&self) -> std::io::Result<()> {
        match self {
            #[cfg(unix)]
            StreamInner::Unix(s) => s.shutdown(std::net::Shutdown::Both),
            StreamInner::Tcp(s) => s.shutdown(std::net::Shutdown::Both),
        }
    }
}

impl Read for StreamInner {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            #[cfg(unix)]
            StreamInner::Unix(s) => s.read(buf),
            StreamInner::Tcp(s) => s.read(buf),
        }
    }
}

impl Write for StreamInner {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            #[cfg(unix)]
            StreamInner::Unix(s) => s.write(buf),
            StreamInner::Tcp(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            #[cfg(unix)]
            StreamInner::Unix(s) => s.flush(),
            StreamInner::Tcp(s) => s.flush(),
        }
    }
}

/// A connected stream peer speaking stream framing.
///
/// The socket stays in blocking mode for writes (bounded by a write
/// timeout) and is switched to non-blocking only while reading.
pub struct StreamTransport {
    stream: StreamInner,
    peer: PeerAddr,
    /// Bytes read by `poll` and not yet handed out by `receive`
    pending: Vec<u8>,
}

impl StreamTransport {
    #[cfg(unix)]
    fn from_unix(stream: UnixStream, path: &str) -> Result<Self, TransportError> {
        let transport = StreamTransport {
            stream: StreamInner::Unix(stream),
            peer: PeerAddr::Local(format!("unix:{}", path)),
            pending: Vec::new(),
        };
        transport.stream.set_write_timeout(Some(Duration::from_secs(1)))?;
        Ok(transport)
    }

    fn from_tcp(stream: TcpStream) -> Result<Self, TransportError> {
        // Disable Nagle's algorithm for lower latency
        let _ = stream.set_nodelay(true);
        let peer = PeerAddr::Inet(stream.peer_addr()?);
        let transport = StreamTransport {
            stream: StreamInner::Tcp(stream),
            peer,
            pending: Vec::new(),
        };
        transport.stream.set_write_timeout(Some(Duration::from_secs(1)))?;
        Ok(transport)
    }

    /// Connect to a `tcp://` or `unix://` endpoint
    pub fn connect(endpoint: &Endpoint) -> Result<Self, TransportError> {
        match endpoint {
            #[cfg(unix)]
            Endpoint::Unix(path) => Self::from_unix(UnixStream::connect(path)?, path),
            Endpoint::Tcp(addr) => Self::from_tcp(TcpStream::connect(addr)?),
            other => Err(TransportError::InvalidEndpoint(other.to_string())),
        }
    }

    /// Connect to a TCP address with timeout
    pub fn connect_timeout(addr: &str, timeout: Duration) -> Result<Self, TransportError> {
        let socket_addr: std::net::SocketAddr = addr
            .parse()
            .map_err(|_| TransportError::InvalidEndpoint(addr.to_string()))?;
        Self::from_tcp(TcpStream::connect_timeout(&socket_addr, timeout)?)
    }

    /// Address of the connected peer
    pub fn peer(&self) -> &PeerAddr {
        &self.peer
    }

    /// Shutdown the connection
    pub fn shutdown(&self) -> Result<(), TransportError> {
        Ok(self.stream.shutdown()?)
    }

    /// Non-blocking read of whatever is available into `pending`.
    fn fill(&mut self) -> Result<(), TransportError> {
        self.stream.set_nonblocking(true)?;
        let mut chunk = [0u8; READ_CHUNK];
        let result = loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => break Err(TransportError::ConnectionClosed),
                Ok(n) => {
                    self.pending.extend_from_slice(&chunk[..n]);
                    if n < chunk.len() {
                        break Ok(());
                    }
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => break Ok(()),
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => break Err(e.into()),
            }
        };
        // Restore blocking mode
        let _ = self.stream.set_nonblocking(false);
        result
    }
}

impl Transport for StreamTransport {
    fn framing(&self) -> Framing {
        Framing::Stream
    }

    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        self.stream.write_all(frame)?;
        self.stream.flush()?;
        Ok(())
    }

    fn receive(&mut self) -> Result<Option<(Vec<u8>, PeerAddr)>, TransportError> {
        if self.pending.is_empty() {
            self.fill()?;
        }
        if self.pending.is_empty() {
            return Ok(None);
        }
        Ok(Some((std::mem::take(&mut self.pending), self.peer.clone())))
    }

    fn poll(&mut self) -> Result<bool, TransportError> {
        if self.pending.is_empty() {
            self.fill()?;
        }
        Ok(!self.pending.is_empty())
    }
}
