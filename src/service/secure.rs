use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, instrument, trace};

use crate::core::codec::FrameCodec;
use crate::core::frame::{Frame, MessageType};
use crate::device::DeviceDescriptor;
use crate::error::{ProtocolError, Result};
use crate::protocol::handshake::HandshakeAuthenticator;
use crate::protocol::security::{LocalSecurity, SessionKey};
use crate::transport::{Connector, TransportSocket};
use crate::utils::Metrics;

/// Encrypted request/response session over an authenticated socket.
///
/// Owns the socket from a successful handshake. Outbound frames are
/// `EncryptedRequest`s numbered by a 16-bit sequence that wraps from
/// `0xFFFF` to `0`; inbound chunks are reassembled into whole frames before
/// decryption.
pub struct SecureConnection<S: TransportSocket> {
    socket: S,
    session_key: SessionKey,
    security: LocalSecurity,
    codec: FrameCodec,
    buffer: BytesMut,
    sequence: u16,
    metrics: Arc<Metrics>,
    closed: bool,
}

impl<S: TransportSocket> SecureConnection<S> {
    pub fn new(socket: S, session_key: SessionKey, metrics: Arc<Metrics>) -> Self {
        metrics.connection_established();
        Self {
            socket,
            session_key,
            security: LocalSecurity::new(),
            codec: FrameCodec::default(),
            buffer: BytesMut::new(),
            sequence: 0,
            metrics,
            closed: false,
        }
    }

    /// Handshake with `device` and keep the socket for encrypted traffic.
    ///
    /// Frames in either direction are limited to the connector's
    /// `max_frame_size`.
    pub async fn open<C>(
        authenticator: &HandshakeAuthenticator<C>,
        device: &DeviceDescriptor,
    ) -> Result<Self>
    where
        C: Connector<Socket = S>,
    {
        let (socket, session_key) = authenticator.establish(device).await?;
        let max_frame_size = authenticator.connector().max_frame_size();
        Ok(Self::new(socket, session_key, authenticator.metrics().clone())
            .with_max_frame_size(max_frame_size))
    }

    /// Start numbering requests at `sequence`
    pub fn with_initial_sequence(mut self, sequence: u16) -> Self {
        self.sequence = sequence;
        self
    }

    /// Limit frames to `max_frame_size` bytes
    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.codec = FrameCodec::new(max_frame_size);
        self
    }

    /// Sequence number the next request will carry
    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    fn next_sequence(&mut self) -> u16 {
        let sequence = self.sequence;
        self.sequence = sequence.wrapping_add(1);
        sequence
    }

    /// Encrypt and send `payload`, returning the sequence number used.
    #[instrument(skip(self, payload), level = "debug", fields(len = payload.len()))]
    pub async fn send(&mut self, payload: &[u8]) -> Result<u16> {
        if self.closed {
            return Err(ProtocolError::ConnectionClosed);
        }
        let sequence = self.next_sequence();
        let frame = Frame::new(
            MessageType::EncryptedRequest,
            sequence,
            Bytes::copy_from_slice(payload),
        );
        let bytes = self.security.encode(&frame, Some(&self.session_key))?;
        let mut out = BytesMut::with_capacity(bytes.len());
        self.codec.encode(bytes, &mut out)?;
        self.socket.write(&out).await?;

        self.metrics.bytes_sent(out.len() as u64);
        trace!(sequence, "Sent encrypted request");
        Ok(sequence)
    }

    /// Receive and decrypt the next whole frame.
    ///
    /// # Errors
    /// - `ProtocolError::ConnectionClosed` if the peer closed mid-frame
    /// - `ProtocolError::OversizedPacket` if the frame exceeds the size limit
    /// - `ProtocolError::DecryptionFailure` if the frame fails its integrity check
    #[instrument(skip(self), level = "debug")]
    pub async fn recv(&mut self) -> Result<Frame> {
        loop {
            if let Some(raw) = self.codec.decode(&mut self.buffer)? {
                let frame = self.security.decode(&raw, Some(&self.session_key))?;
                trace!(sequence = frame.sequence, "Received frame");
                return Ok(frame);
            }

            if self.closed {
                return Err(ProtocolError::ConnectionClosed);
            }
            let chunk = self.socket.read().await?;
            if chunk.is_empty() {
                return Err(ProtocolError::ConnectionClosed);
            }
            self.metrics.bytes_received(chunk.len() as u64);
            self.buffer.extend_from_slice(&chunk);
        }
    }

    /// Send `payload` and wait for the device's encrypted response.
    pub async fn request(&mut self, payload: &[u8]) -> Result<Bytes> {
        self.send(payload).await?;
        let frame = self.recv().await?;
        if frame.message_type != MessageType::EncryptedResponse {
            return Err(ProtocolError::UnexpectedMessage(frame.message_type as u8));
        }
        Ok(frame.payload)
    }

    /// Release the socket. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.socket.destroy();
        self.metrics.connection_closed();
        debug!(peer = %self.socket.peer(), "Secure connection closed");
    }
}

impl<S: TransportSocket> Drop for SecureConnection<S> {
    fn drop(&mut self) {
        self.close();
    }
}
