//! Live handshake against a device's control port.
//!
//! A handshake sends the device's token in a `HandshakeRequest` frame and
//! derives the session key from the reply using the device's raw key. Success
//! proves that the token/key pair belongs to the device.
//!
//! Each attempt opens one fresh socket and releases it exactly once, whatever
//! the outcome. Dropping the future mid-attempt drops the socket, which closes
//! it as well.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::device::{Credentials, DeviceDescriptor};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::security::{LocalSecurity, SessionKey, DERIVATION_PAYLOAD_LEN};
use crate::transport::{Connector, TransportSocket};
use crate::utils::metrics::Timer;
use crate::utils::Metrics;

/// Replies shorter than this cannot carry a handshake payload
pub const MIN_REPLY_LEN: usize = 20;

/// Offset of the key-derivation payload inside a handshake reply
pub const REPLY_PAYLOAD_OFFSET: usize = 8;

/// Verifies a device's credentials by performing a live handshake
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, device: &DeviceDescriptor) -> Result<SessionKey>;
}

#[async_trait]
impl<T: Authenticator + ?Sized> Authenticator for Arc<T> {
    async fn authenticate(&self, device: &DeviceDescriptor) -> Result<SessionKey> {
        (**self).authenticate(device).await
    }
}

/// Handshake over sockets opened by `C`
pub struct HandshakeAuthenticator<C> {
    connector: C,
    security: LocalSecurity,
    metrics: Arc<Metrics>,
}

impl<C: Connector> HandshakeAuthenticator<C> {
    pub fn new(connector: C, metrics: Arc<Metrics>) -> Self {
        Self {
            connector,
            security: LocalSecurity::new(),
            metrics,
        }
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Handshake and keep the socket open for an encrypted session.
    ///
    /// On failure the socket has already been destroyed.
    #[instrument(skip_all, fields(device_id = device.id, peer = %device.socket_addr()))]
    pub async fn establish(&self, device: &DeviceDescriptor) -> Result<(C::Socket, SessionKey)> {
        let credentials = device
            .credentials
            .as_ref()
            .ok_or_else(|| ProtocolError::MissingCredentials {
                device: device.name.clone(),
            })?;

        self.metrics.handshake_attempt();
        let _timer = Timer::start("handshake");

        let mut socket = match self.connector.connect(device.socket_addr()).await {
            Ok(socket) => socket,
            Err(e) => {
                self.metrics.handshake_failed();
                return Err(e);
            }
        };

        match perform_handshake(&mut socket, &self.security, device, credentials).await {
            Ok(key) => {
                self.metrics.handshake_success();
                debug!("Handshake complete");
                Ok((socket, key))
            }
            Err(e) => {
                socket.destroy();
                self.metrics.handshake_failed();
                debug!(error = %e, "Handshake failed");
                Err(e)
            }
        }
    }
}

#[async_trait]
impl<C: Connector> Authenticator for HandshakeAuthenticator<C> {
    async fn authenticate(&self, device: &DeviceDescriptor) -> Result<SessionKey> {
        let (mut socket, key) = self.establish(device).await?;
        socket.destroy();
        Ok(key)
    }
}

/// Exchange one handshake request/reply on an open socket.
///
/// Does not release the socket; that is the caller's job.
pub async fn perform_handshake<S>(
    socket: &mut S,
    security: &LocalSecurity,
    device: &DeviceDescriptor,
    credentials: &Credentials,
) -> Result<SessionKey>
where
    S: TransportSocket + ?Sized,
{
    let request = security.build_handshake_frame(&credentials.token)?;
    socket.write(&request).await?;

    let reply = socket.read().await?;
    let malformed = |reason: &str| ProtocolError::MalformedResponse {
        device: device.name.clone(),
        peer: socket.peer(),
        reason: reason.to_string(),
    };
    if reply.is_empty() {
        return Err(malformed(constants::ERR_EMPTY_REPLY));
    }
    if reply.len() < MIN_REPLY_LEN {
        return Err(malformed(constants::ERR_SHORT_REPLY));
    }

    let end = reply.len().min(REPLY_PAYLOAD_OFFSET + DERIVATION_PAYLOAD_LEN);
    security.derive_session_key(&reply[REPLY_PAYLOAD_OFFSET..end], &credentials.key)
}
