//! Byte-stream socket abstraction used by the handshake and secure sessions.
//!
//! [`TransportSocket`] is the narrow surface the protocol layer needs: write
//! some bytes, read the next inbound chunk, tear down. [`Connector`] opens
//! sockets. The TCP implementation lives here; tests substitute scripted
//! sockets through the same traits.

use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, instrument, trace};

use crate::config::TransportConfig;
use crate::core::frame::MAX_FRAME_SIZE;
use crate::error::{constants, ProtocolError, Result};
use crate::utils::timeout::with_timeout_error;

/// Size of a single read from the stream
const READ_CHUNK: usize = 4096;

/// A connected byte stream to one device
#[async_trait]
pub trait TransportSocket: Send {
    /// Write all of `data`.
    async fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Resolve with the first inbound chunk.
    ///
    /// Tolerant sockets may resolve with an empty chunk instead of an error
    /// when the peer went away.
    async fn read(&mut self) -> Result<Bytes>;

    /// Release the socket. Idempotent.
    fn destroy(&mut self);

    /// Peer address, for diagnostics
    fn peer(&self) -> SocketAddr;
}

/// Opens [`TransportSocket`]s
#[async_trait]
pub trait Connector: Send + Sync {
    type Socket: TransportSocket + 'static;

    async fn connect(&self, addr: SocketAddr) -> Result<Self::Socket>;

    /// Largest frame sessions on these sockets accept
    fn max_frame_size(&self) -> usize {
        MAX_FRAME_SIZE
    }
}

/// Connects plain TCP sockets with the configured timeouts
#[derive(Debug, Clone, Default)]
pub struct TcpConnector {
    config: TransportConfig,
}

impl TcpConnector {
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    type Socket = TcpSocket;

    #[instrument(skip(self), fields(peer = %addr))]
    async fn connect(&self, addr: SocketAddr) -> Result<TcpSocket> {
        let stream = with_timeout_error(
            async { TcpStream::connect(addr).await.map_err(ProtocolError::from) },
            self.config.connect_timeout,
        )
        .await?;
        stream.set_nodelay(true)?;
        debug!("Connected");
        Ok(TcpSocket::new(stream, addr, self.config.clone()))
    }

    fn max_frame_size(&self) -> usize {
        self.config.max_frame_size
    }
}

/// TCP implementation of [`TransportSocket`]
#[derive(Debug)]
pub struct TcpSocket {
    stream: Option<TcpStream>,
    peer: SocketAddr,
    config: TransportConfig,
    // set once a peer-side failure was swallowed in tolerant mode
    absorbed: bool,
}

impl TcpSocket {
    pub fn new(stream: TcpStream, peer: SocketAddr, config: TransportConfig) -> Self {
        Self {
            stream: Some(stream),
            peer,
            config,
            absorbed: false,
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.stream.is_none()
    }

    fn stream(&mut self) -> Result<&mut TcpStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| ProtocolError::Transport(constants::ERR_SOCKET_DESTROYED.into()))
    }

    /// Log and close after a peer-side failure.
    ///
    /// Returns true when the caller should swallow the failure.
    fn absorb(&mut self, reason: &str) -> bool {
        if !self.config.tolerate_recoverable_errors {
            return false;
        }
        debug!(peer = %self.peer, reason, "Peer went away, closing socket");
        self.destroy();
        self.absorbed = true;
        true
    }
}

/// Failures caused by the peer closing or resetting the connection
pub fn is_recoverable(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
    )
}

#[async_trait]
impl TransportSocket for TcpSocket {
    async fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.absorbed {
            return Ok(());
        }
        let timeout = self.config.write_timeout;
        let stream = self.stream()?;
        let result = with_timeout_error(
            async { stream.write_all(data).await.map_err(ProtocolError::from) },
            timeout,
        )
        .await;

        match result {
            Ok(()) => {
                trace!(peer = %self.peer, len = data.len(), "Wrote");
                Ok(())
            }
            Err(ProtocolError::Io(e)) if is_recoverable(&e) => {
                if self.absorb(&e.to_string()) {
                    return Ok(());
                }
                Err(ProtocolError::Transport(e.to_string()))
            }
            Err(ProtocolError::Io(e)) => Err(ProtocolError::Transport(e.to_string())),
            Err(e) => Err(e),
        }
    }

    async fn read(&mut self) -> Result<Bytes> {
        if self.absorbed {
            return Ok(Bytes::new());
        }
        let timeout = self.config.read_timeout;
        let stream = self.stream()?;
        let mut buf = BytesMut::with_capacity(READ_CHUNK);
        let result = with_timeout_error(
            async { stream.read_buf(&mut buf).await.map_err(ProtocolError::from) },
            timeout,
        )
        .await;

        match result {
            Ok(0) => {
                if self.absorb("end of stream") {
                    return Ok(Bytes::new());
                }
                Err(ProtocolError::ConnectionClosed)
            }
            Ok(n) => {
                trace!(peer = %self.peer, len = n, "Read");
                Ok(buf.freeze())
            }
            Err(ProtocolError::Io(e)) if is_recoverable(&e) => {
                if self.absorb(&e.to_string()) {
                    return Ok(Bytes::new());
                }
                Err(ProtocolError::Transport(e.to_string()))
            }
            Err(ProtocolError::Io(e)) => Err(ProtocolError::Transport(e.to_string())),
            Err(e) => Err(e),
        }
    }

    fn destroy(&mut self) {
        if self.stream.take().is_some() {
            trace!(peer = %self.peer, "Socket destroyed");
        }
    }

    fn peer(&self) -> SocketAddr {
        self.peer
    }
}
