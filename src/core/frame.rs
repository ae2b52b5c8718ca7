//! Binary frame layout shared by the handshake and session traffic.
//!
//! ```text
//! [0x83 0x70] [size: u16 BE] [0x20] [pad << 4 | type] [sequence: u16 BE] [body...]
//! ```
//!
//! `size` counts every byte after the first eight, so a whole frame is always
//! `size + 8` bytes long. The sequence number sits inside the encrypted region
//! for encrypted message types, which is why [`FrameHeader`] only covers the
//! first six bytes.

use bytes::Bytes;

use crate::error::{constants, ProtocolError, Result};

/// Magic prefix of every frame
pub const MAGIC: [u8; 2] = [0x83, 0x70];

/// Fixed marker byte following the size field
pub const MARKER: u8 = 0x20;

/// Bytes covered by [`FrameHeader`]
pub const HEADER_LEN: usize = 6;

/// Header plus the sequence number: offset of the first payload byte of a
/// plaintext frame
pub const PREFIX_LEN: usize = 8;

/// Length of the SHA-256 signature trailing encrypted frames
pub const SIGNATURE_LEN: usize = 32;

/// The size field is 16 bits wide
pub const MAX_FRAME_SIZE: usize = u16::MAX as usize + PREFIX_LEN;

/// Frame message types understood by the appliance firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    HandshakeRequest = 0x0,
    HandshakeResponse = 0x1,
    EncryptedResponse = 0x3,
    EncryptedRequest = 0x6,
}

impl MessageType {
    /// All supported message types
    pub const ALL: [MessageType; 4] = [
        MessageType::HandshakeRequest,
        MessageType::HandshakeResponse,
        MessageType::EncryptedResponse,
        MessageType::EncryptedRequest,
    ];

    /// Whether frames of this type carry ciphertext under a session key
    pub fn is_encrypted(self) -> bool {
        matches!(
            self,
            MessageType::EncryptedRequest | MessageType::EncryptedResponse
        )
    }
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x0 => Ok(MessageType::HandshakeRequest),
            0x1 => Ok(MessageType::HandshakeResponse),
            0x3 => Ok(MessageType::EncryptedResponse),
            0x6 => Ok(MessageType::EncryptedRequest),
            _ => Err(ProtocolError::FrameDecode(format!(
                "{}: {value:#x}",
                constants::ERR_UNKNOWN_MESSAGE_TYPE
            ))),
        }
    }
}

/// A decoded unit of traffic. Ephemeral: built per send or receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub message_type: MessageType,
    pub sequence: u16,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(message_type: MessageType, sequence: u16, payload: impl Into<Bytes>) -> Self {
        Self {
            message_type,
            sequence,
            payload: payload.into(),
        }
    }
}

/// The fixed six leading bytes of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Value of the size field (total length minus eight)
    pub size: u16,
    /// Random padding bytes appended before encryption
    pub padding: u8,
    pub message_type: MessageType,
}

impl FrameHeader {
    /// Total frame length this header announces
    #[inline]
    pub fn frame_len(&self) -> usize {
        self.size as usize + PREFIX_LEN
    }

    /// Serialize the header
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let size = self.size.to_be_bytes();
        [
            MAGIC[0],
            MAGIC[1],
            size[0],
            size[1],
            MARKER,
            (self.padding << 4) | self.message_type as u8,
        ]
    }

    /// Parse a header from the start of `buf`.
    ///
    /// Returns `Ok(None)` when fewer than [`HEADER_LEN`] bytes are available.
    ///
    /// # Errors
    /// Returns `ProtocolError::FrameDecode` on bad magic, marker or message type.
    pub fn parse(buf: &[u8]) -> Result<Option<Self>> {
        if buf.len() < HEADER_LEN {
            return Ok(None);
        }
        if buf[..2] != MAGIC {
            return Err(ProtocolError::FrameDecode(constants::ERR_INVALID_MAGIC.into()));
        }
        if buf[4] != MARKER {
            return Err(ProtocolError::FrameDecode(constants::ERR_INVALID_MARKER.into()));
        }
        Ok(Some(Self {
            size: u16::from_be_bytes([buf[2], buf[3]]),
            padding: buf[5] >> 4,
            message_type: MessageType::try_from(buf[5] & 0x0F)?,
        }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let header = FrameHeader {
            size: 0x0140,
            padding: 7,
            message_type: MessageType::EncryptedRequest,
        };
        let bytes = header.to_bytes();
        assert_eq!(bytes, [0x83, 0x70, 0x01, 0x40, 0x20, 0x76]);
        assert_eq!(FrameHeader::parse(&bytes).unwrap(), Some(header));
        assert_eq!(header.frame_len(), 0x0148);
    }

    #[test]
    fn test_short_buffer_is_incomplete() {
        assert_eq!(FrameHeader::parse(&[0x83, 0x70, 0x00]).unwrap(), None);
    }

    #[test]
    fn test_bad_magic() {
        let err = FrameHeader::parse(&[0x5A, 0x5A, 0, 0, 0x20, 0]).unwrap_err();
        assert!(matches!(err, ProtocolError::FrameDecode(_)));
    }

    #[test]
    fn test_bad_marker() {
        let err = FrameHeader::parse(&[0x83, 0x70, 0, 0, 0x21, 0]).unwrap_err();
        assert!(matches!(err, ProtocolError::FrameDecode(_)));
    }

    #[test]
    fn test_unknown_message_type() {
        let err = FrameHeader::parse(&[0x83, 0x70, 0, 0, 0x20, 0x05]).unwrap_err();
        assert!(matches!(err, ProtocolError::FrameDecode(_)));
    }

    #[test]
    fn test_encrypted_types() {
        assert!(MessageType::EncryptedRequest.is_encrypted());
        assert!(MessageType::EncryptedResponse.is_encrypted());
        assert!(!MessageType::HandshakeRequest.is_encrypted());
        assert!(!MessageType::HandshakeResponse.is_encrypted());
    }
}
