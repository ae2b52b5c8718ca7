//! # Transport Layer
//!
//! Connected byte streams to devices.
//!
//! The protocol layer only sees the [`TransportSocket`] and [`Connector`]
//! traits; [`TcpConnector`] is the production implementation.

pub mod socket;

pub use socket::{Connector, TcpConnector, TcpSocket, TransportSocket};
