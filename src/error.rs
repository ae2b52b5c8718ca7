//! # Error Types
//!
//! Error handling for discovery, credential acquisition and the secure
//! device transport.
//!
//! Every fallible operation in the crate returns [`Result`], whose error side
//! is a single [`ProtocolError`] enum. Variants are grouped by the layer that
//! raises them.
//!
//! ## Error Categories
//! - **Transport Errors**: connect/read/write failures, remote close, timeouts
//! - **Discovery Errors**: undecodable replies (discarded) and bind failures (fatal)
//! - **Credential Errors**: cloud failures and exhausted byte-order hypotheses
//! - **Handshake Errors**: missing credentials, short replies, key derivation
//! - **Framing Errors**: bad headers/lengths vs. failed integrity checks
//!
//! Framing and decryption failures are distinct variants:
//! [`ProtocolError::FrameDecode`] points at a transport or codec bug, while
//! [`ProtocolError::DecryptionFailure`] usually means a wrong or stale session key.
//!
//! ## Example Usage
//! ```rust
//! use appliance_link::error::{ProtocolError, Result};
//! use tracing::warn;
//!
//! fn parse_port(raw: &str) -> Result<u16> {
//!     raw.parse()
//!         .map_err(|e| ProtocolError::ConfigError(format!("bad port '{raw}': {e}")))
//! }
//!
//! if let Err(e) = parse_port("not-a-port") {
//!     warn!(error = %e, "Rejected port");
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Framing errors
    pub const ERR_INVALID_MAGIC: &str = "Invalid frame magic";
    pub const ERR_INVALID_MARKER: &str = "Invalid frame marker byte";
    pub const ERR_TRUNCATED_FRAME: &str = "Frame shorter than its declared size";
    pub const ERR_TRUNCATED_HEADER: &str = "Frame shorter than its header";
    pub const ERR_UNALIGNED_CIPHERTEXT: &str = "Encrypted body is not block aligned";
    pub const ERR_UNKNOWN_MESSAGE_TYPE: &str = "Unknown frame message type";
    pub const ERR_SESSION_KEY_REQUIRED: &str = "Encrypted frame requires a session key";
    pub const ERR_PADDING_OVERFLOW: &str = "Frame padding exceeds body length";

    /// Handshake errors
    pub const ERR_EMPTY_REPLY: &str = "empty reply";
    pub const ERR_SHORT_REPLY: &str = "data length mismatch";
    pub const ERR_SIGNATURE_MISMATCH: &str = "handshake signature does not match";
    pub const ERR_KEY_LENGTH: &str = "device key must be 32 bytes";
    pub const ERR_PAYLOAD_TOO_SHORT: &str = "handshake payload shorter than 64 bytes";

    /// Discovery errors
    pub const ERR_EMPTY_DATAGRAM: &str = "empty datagram";
    pub const ERR_UNKNOWN_PREAMBLE: &str = "unknown reply preamble";
    pub const ERR_SHORT_DATAGRAM: &str = "reply shorter than minimum body";
    pub const ERR_BAD_DISCOVERY_CIPHERTEXT: &str = "reply ciphertext not decryptable";
    pub const ERR_BAD_PADDING: &str = "invalid PKCS#7 padding";

    /// Connection errors
    pub const ERR_SOCKET_DESTROYED: &str = "Socket already destroyed";
}

// ProtocolError is the primary error type for all operations in this crate
#[derive(Error, Debug, Serialize, Deserialize)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    #[serde(skip_serializing, skip_deserializing)]
    Io(#[from] io::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Timeout occurred")]
    Timeout,

    #[error("Discovery reply could not be decoded: {0}")]
    DiscoveryDecode(String),

    #[error("Failed to bind discovery socket on {addr}: {reason}")]
    DiscoveryBind { addr: SocketAddr, reason: String },

    #[error("Cloud request failed: {0}")]
    Cloud(String),

    #[error("Credential acquisition failed for device {device_id}: no byte order authenticated")]
    Credential { device_id: u64 },

    #[error("[{device}] Token or key is missing")]
    MissingCredentials { device: String },

    #[error("[{device}] Authenticate error when receiving data from {peer} ({reason})")]
    MalformedResponse {
        device: String,
        peer: SocketAddr,
        reason: String,
    },

    #[error("Session key derivation failed: {0}")]
    Derivation(String),

    #[error("Frame decode error: {0}")]
    FrameDecode(String),

    #[error("Decryption failed")]
    DecryptionFailure,

    #[error("Packet too large: {0} bytes")]
    OversizedPacket(usize),

    #[error("Unexpected message type: {0:#x}")]
    UnexpectedMessage(u8),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl ProtocolError {
    /// Whether the error originated from the network rather than from the
    /// protocol itself.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ProtocolError::Io(_)
                | ProtocolError::Transport(_)
                | ProtocolError::ConnectionClosed
                | ProtocolError::Timeout
        )
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
