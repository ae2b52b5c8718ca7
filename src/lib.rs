//! # Appliance Link
//!
//! LAN discovery, cloud-assisted credential acquisition and the secure
//! handshake for climate-control appliances speaking the vendor's `0x8370`
//! framed protocol.
//!
//! ## Layers
//! - [`service`]: the discovery [`Scanner`] and [`SecureConnection`]
//! - [`protocol`]: credential acquisition, handshake and frame security
//! - [`transport`]: socket abstraction and the TCP implementation
//! - [`core`]: frame layout and the stream codec
//!
//! ## Example
//! ```rust,no_run
//! use appliance_link::config::BridgeConfig;
//! use appliance_link::device::Credentials;
//! use appliance_link::error::{ProtocolError, Result};
//! use appliance_link::protocol::{ByteOrder, TokenProvider};
//! use appliance_link::service::Scanner;
//!
//! struct Cloud;
//!
//! #[async_trait::async_trait]
//! impl TokenProvider for Cloud {
//!     async fn get_token(&self, device_id: u64, order: ByteOrder) -> Result<Credentials> {
//!         let _udp_id = order.udp_id(device_id);
//!         Err(ProtocolError::Cloud("not signed in".into()))
//!     }
//! }
//!
//! # async fn run() -> Result<()> {
//! let config = BridgeConfig::default();
//! let devices = Scanner::with_cloud(&config, Cloud).scan_all().await?;
//! for device in devices {
//!     println!("{} {} {:?}", device.display_name, device.ip, device.token_hex());
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod device;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use config::BridgeConfig;
pub use device::{Credentials, DeviceDescriptor, DeviceType};
pub use error::{ProtocolError, Result};
pub use service::{Scanner, SecureConnection};
