//! # Service Layer
//!
//! High-level entry points built on the protocol layer.
//!
//! ## Components
//! - **Discovery**: broadcast scan yielding credential-verified devices
//! - **Secure**: encrypted request/response session after a handshake

pub mod discovery;
pub mod secure;

pub use discovery::{DiscoveryReply, ScanStream, Scanner, DISCOVERY_PROBE};
pub use secure::SecureConnection;
