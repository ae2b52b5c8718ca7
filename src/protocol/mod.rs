//! # Protocol Layer
//!
//! Credential acquisition, the device handshake and the local security
//! context.
//!
//! ## Components
//! - **Security**: session-key derivation and encrypted frame encode/decode
//! - **Handshake**: one live token/key verification per socket
//! - **Credentials**: cloud token requests with byte-order fallback
//!
//! ## Flow
//! ```text
//! TokenProvider::get_token(id, BigEndian) -> Authenticator::authenticate
//!   on failure -> TokenProvider::get_token(id, LittleEndian) -> authenticate
//!   on failure -> ProtocolError::Credential
//! ```

pub mod credentials;
pub mod handshake;
pub mod security;

pub use credentials::{ByteOrder, CredentialAcquirer, TokenProvider};
pub use handshake::{Authenticator, HandshakeAuthenticator};
pub use security::{LocalSecurity, SessionKey};
