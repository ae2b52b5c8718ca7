//! Cloud-assisted credential acquisition.
//!
//! The cloud issues a token/key pair for a device id, but the id may be
//! serialized in either byte order and nothing in the response says which one
//! the device expects. Each [`ByteOrder`] hypothesis is therefore verified with
//! a live handshake, in [`ByteOrder::PRIORITY`] order, stopping at the first
//! that authenticates.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument};

use crate::device::{Credentials, DeviceDescriptor};
use crate::error::{ProtocolError, Result};
use crate::protocol::handshake::Authenticator;
use crate::utils::crypto;
use crate::utils::Metrics;

/// Serialization order of the 6-byte device id sent to the cloud
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ByteOrder {
    BigEndian,
    LittleEndian,
}

impl ByteOrder {
    /// Hypotheses in the order they are tried
    pub const PRIORITY: [ByteOrder; 2] = [ByteOrder::BigEndian, ByteOrder::LittleEndian];

    /// The six low bytes of `device_id` in this order
    pub fn id_bytes(self, device_id: u64) -> [u8; 6] {
        let le = device_id.to_le_bytes();
        let mut out = [0u8; 6];
        out.copy_from_slice(&le[..6]);
        if self == ByteOrder::BigEndian {
            out.reverse();
        }
        out
    }

    /// Identifier cloud token endpoints expect for this hypothesis.
    ///
    /// SHA-256 of [`id_bytes`](Self::id_bytes), first half XOR second half,
    /// as lower-case hex.
    pub fn udp_id(self, device_id: u64) -> String {
        let digest = crypto::sha256(&[&self.id_bytes(device_id)[..]]);
        let mut folded = [0u8; 16];
        for (i, out) in folded.iter_mut().enumerate() {
            *out = digest[i] ^ digest[i + 16];
        }
        hex::encode(folded)
    }
}

impl fmt::Display for ByteOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ByteOrder::BigEndian => f.write_str("big-endian"),
            ByteOrder::LittleEndian => f.write_str("little-endian"),
        }
    }
}

/// Cloud collaborator that issues a token/key pair for a device id
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn get_token(&self, device_id: u64, byte_order: ByteOrder) -> Result<Credentials>;
}

#[async_trait]
impl<T: TokenProvider + ?Sized> TokenProvider for Arc<T> {
    async fn get_token(&self, device_id: u64, byte_order: ByteOrder) -> Result<Credentials> {
        (**self).get_token(device_id, byte_order).await
    }
}

/// Obtains verified credentials for a device
pub struct CredentialAcquirer<P, A> {
    provider: P,
    authenticator: A,
    metrics: Arc<Metrics>,
}

impl<P, A> CredentialAcquirer<P, A>
where
    P: TokenProvider,
    A: Authenticator,
{
    pub fn new(provider: P, authenticator: A, metrics: Arc<Metrics>) -> Self {
        Self {
            provider,
            authenticator,
            metrics,
        }
    }

    /// Try each byte order until a handshake succeeds.
    ///
    /// On success the credentials are left on `device` and also returned. On
    /// failure `device.credentials` is `None`.
    ///
    /// # Errors
    /// Returns `ProtocolError::Credential` when no hypothesis authenticates.
    #[instrument(skip_all, fields(device_id = device.id))]
    pub async fn acquire(&self, device: &mut DeviceDescriptor) -> Result<Credentials> {
        info!(device = %device.name, "Retrieving credentials");
        for byte_order in ByteOrder::PRIORITY {
            self.metrics.credential_attempt();
            let candidate = match self.provider.get_token(device.id, byte_order).await {
                Ok(candidate) => candidate,
                Err(e) => {
                    debug!(%byte_order, error = %e, "Cloud token request failed");
                    continue;
                }
            };

            device.credentials = Some(candidate.clone());
            match self.authenticator.authenticate(device).await {
                Ok(_session_key) => {
                    debug!(%byte_order, "Credentials verified");
                    return Ok(candidate);
                }
                Err(e) => {
                    debug!(%byte_order, error = %e, "Credentials rejected");
                    device.credentials = None;
                }
            }
        }

        Err(ProtocolError::Credential {
            device_id: device.id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_bytes_orders() {
        let id = 0x0000_1122_3344_5566;
        assert_eq!(
            ByteOrder::LittleEndian.id_bytes(id),
            [0x66, 0x55, 0x44, 0x33, 0x22, 0x11]
        );
        assert_eq!(
            ByteOrder::BigEndian.id_bytes(id),
            [0x11, 0x22, 0x33, 0x44, 0x55, 0x66]
        );
    }

    #[test]
    fn test_udp_id_shape() {
        let id = 0x1234_5678_9ABC;
        let be = ByteOrder::BigEndian.udp_id(id);
        let le = ByteOrder::LittleEndian.udp_id(id);
        assert_eq!(be.len(), 32);
        assert!(be.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(be, le);
        assert_eq!(be, ByteOrder::BigEndian.udp_id(id));
    }

    #[test]
    fn test_priority_is_big_endian_first() {
        assert_eq!(ByteOrder::PRIORITY[0], ByteOrder::BigEndian);
        assert_eq!(ByteOrder::PRIORITY[1], ByteOrder::LittleEndian);
    }
}
