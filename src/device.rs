//! Device records produced by discovery and handed to the accessory layer.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};

/// Appliance category advertised in a discovery reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum DeviceType {
    AirConditioner,
    Dehumidifier,
    Unknown(u8),
}

impl DeviceType {
    /// Label shown to the operator for this category
    pub fn display_name(self) -> &'static str {
        match self {
            DeviceType::AirConditioner => "Air Conditioner",
            DeviceType::Dehumidifier => "Dehumidifier",
            DeviceType::Unknown(_) => "Unknown",
        }
    }
}

impl From<u8> for DeviceType {
    fn from(code: u8) -> Self {
        match code {
            0xAC => DeviceType::AirConditioner,
            0xA1 => DeviceType::Dehumidifier,
            other => DeviceType::Unknown(other),
        }
    }
}

impl From<DeviceType> for u8 {
    fn from(device_type: DeviceType) -> Self {
        match device_type {
            DeviceType::AirConditioner => 0xAC,
            DeviceType::Dehumidifier => 0xA1,
            DeviceType::Unknown(code) => code,
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", u8::from(*self))
    }
}

/// Cloud-issued token/key pair bound to one device.
///
/// Stored as raw bytes, serialized as lower-case hex.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(with = "hex::serde")]
    pub token: Vec<u8>,
    #[serde(with = "hex::serde")]
    pub key: Vec<u8>,
}

impl Credentials {
    pub fn new(token: impl Into<Vec<u8>>, key: impl Into<Vec<u8>>) -> Self {
        Self {
            token: token.into(),
            key: key.into(),
        }
    }

    /// Parse a hex-encoded pair as stored in host configuration
    pub fn from_hex(token: &str, key: &str) -> Result<Self, hex::FromHexError> {
        Ok(Self {
            token: hex::decode(token)?,
            key: hex::decode(key)?,
        })
    }

    pub fn token_hex(&self) -> String {
        hex::encode(&self.token)
    }

    pub fn key_hex(&self) -> String {
        hex::encode(&self.key)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("token_len", &self.token.len())
            .field("key_len", &self.key.len())
            .finish()
    }
}

/// One appliance found on the local network.
///
/// Token and key live in a single optional [`Credentials`] value, so a
/// descriptor never holds one without the other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub id: u64,
    pub ip: IpAddr,
    pub port: u16,
    #[serde(rename = "type")]
    pub device_type: DeviceType,
    /// Network name the appliance advertises
    pub name: String,
    pub display_name: String,
    pub serial_number: String,
    /// Discovery reply generation (2 or 3)
    pub protocol_version: u8,
    #[serde(flatten, default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
}

impl DeviceDescriptor {
    pub fn new(id: u64, ip: IpAddr, port: u16, device_type: DeviceType) -> Self {
        Self {
            id,
            ip,
            port,
            device_type,
            name: format!("{device_type}_{id}"),
            display_name: device_type.display_name().to_string(),
            serial_number: String::new(),
            protocol_version: 3,
            credentials: None,
        }
    }

    /// Address of the device's control port
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    pub fn token_hex(&self) -> Option<String> {
        self.credentials.as_ref().map(Credentials::token_hex)
    }

    pub fn key_hex(&self) -> Option<String> {
        self.credentials.as_ref().map(Credentials::key_hex)
    }

    /// Refresh the operator-facing label from the device type
    pub fn assign_display_name(&mut self) {
        self.display_name = self.device_type.display_name().to_string();
    }
}
