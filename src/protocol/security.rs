//! Local security context: handshake payloads, session-key derivation and
//! frame encryption.
//!
//! [`LocalSecurity`] holds no per-device state. Everything it needs for one
//! call (token, raw key, session key, sequence number) is passed in, so a
//! single instance can be shared by every concurrent device chain.
//!
//! ## Session key derivation
//! The 64-byte handshake reply payload is `ciphertext(32) || sha256(plain)(32)`
//! where the ciphertext is AES-256-CBC under the device's raw key. The session
//! key is `plain XOR raw_key`.
//!
//! ## Encrypted frames
//! ```text
//! header(6) || AES-256-CBC(sequence(2) || payload || random padding)
//!           || SHA-256(header || plaintext)
//! ```

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{instrument, trace};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::core::frame::{
    Frame, FrameHeader, MessageType, HEADER_LEN, PREFIX_LEN, SIGNATURE_LEN,
};
use crate::error::{constants, ProtocolError, Result};
use crate::utils::crypto::{self, BLOCK_SIZE};

/// Length of the key-derivation slice taken from a handshake reply
pub const DERIVATION_PAYLOAD_LEN: usize = 64;

/// Length of the device's raw key and of the derived session key
pub const KEY_LEN: usize = 32;

/// Symmetric key protecting post-handshake traffic on one connection.
///
/// Never serialized; wiped on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; KEY_LEN]);

impl SessionKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

/// Stateless codec for handshake and session frames
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalSecurity;

impl LocalSecurity {
    pub fn new() -> Self {
        Self
    }

    /// Frame bytes for a handshake request carrying `token`.
    pub fn build_handshake_frame(&self, token: &[u8]) -> Result<Bytes> {
        self.encode(&Frame::new(MessageType::HandshakeRequest, 0, token.to_vec()), None)
    }

    /// Derive the session key from a handshake reply payload and the raw key.
    ///
    /// # Errors
    /// Returns `ProtocolError::Derivation` if the payload is shorter than
    /// [`DERIVATION_PAYLOAD_LEN`], the key is not 32 bytes, or the embedded
    /// signature does not match.
    #[instrument(skip_all, level = "debug", fields(payload_len = payload.len()))]
    pub fn derive_session_key(&self, payload: &[u8], raw_key: &[u8]) -> Result<SessionKey> {
        if payload.len() < DERIVATION_PAYLOAD_LEN {
            return Err(ProtocolError::Derivation(
                constants::ERR_PAYLOAD_TOO_SHORT.into(),
            ));
        }
        let mut key: [u8; KEY_LEN] = raw_key
            .try_into()
            .map_err(|_| ProtocolError::Derivation(constants::ERR_KEY_LENGTH.into()))?;

        let (ciphertext, signature) = payload[..DERIVATION_PAYLOAD_LEN].split_at(KEY_LEN);
        let mut plain = crypto::aes256_cbc_decrypt(&key, ciphertext)
            .map_err(|e| ProtocolError::Derivation(e.to_string()))?;

        if crypto::sha256(&[plain.as_slice()]) != signature {
            plain.zeroize();
            key.zeroize();
            return Err(ProtocolError::Derivation(
                constants::ERR_SIGNATURE_MISMATCH.into(),
            ));
        }

        let mut session = [0u8; KEY_LEN];
        for (out, (p, k)) in session.iter_mut().zip(plain.iter().zip(key.iter())) {
            *out = p ^ k;
        }
        plain.zeroize();
        key.zeroize();

        Ok(SessionKey(session))
    }

    /// Serialize `frame`, encrypting it when its type requires a session key.
    ///
    /// # Errors
    /// Returns `ProtocolError::FrameDecode` when an encrypted type is given no
    /// key, and `ProtocolError::OversizedPacket` when the result would not fit
    /// the 16-bit size field.
    pub fn encode(&self, frame: &Frame, session_key: Option<&SessionKey>) -> Result<Bytes> {
        if !frame.message_type.is_encrypted() {
            return self.encode_plain(frame);
        }
        let key = session_key.ok_or_else(|| {
            ProtocolError::FrameDecode(constants::ERR_SESSION_KEY_REQUIRED.into())
        })?;

        let unpadded = 2 + frame.payload.len();
        let padding = (BLOCK_SIZE - unpadded % BLOCK_SIZE) % BLOCK_SIZE;
        let size = frame.payload.len() + padding + SIGNATURE_LEN;
        let size = u16::try_from(size)
            .map_err(|_| ProtocolError::OversizedPacket(size + PREFIX_LEN))?;

        let header = FrameHeader {
            size,
            padding: padding as u8,
            message_type: frame.message_type,
        }
        .to_bytes();

        let mut plain = Vec::with_capacity(unpadded + padding);
        plain.extend_from_slice(&frame.sequence.to_be_bytes());
        plain.extend_from_slice(&frame.payload);
        plain.extend_from_slice(&crypto::random_bytes(padding));

        let signature = crypto::sha256(&[&header[..], plain.as_slice()]);
        let ciphertext = crypto::aes256_cbc_encrypt(key.as_bytes(), &plain)?;
        plain.zeroize();

        let mut out = BytesMut::with_capacity(HEADER_LEN + ciphertext.len() + SIGNATURE_LEN);
        out.put_slice(&header);
        out.put_slice(&ciphertext);
        out.put_slice(&signature);
        trace!(len = out.len(), padding, "Encoded encrypted frame");
        Ok(out.freeze())
    }

    fn encode_plain(&self, frame: &Frame) -> Result<Bytes> {
        let size = u16::try_from(frame.payload.len())
            .map_err(|_| ProtocolError::OversizedPacket(frame.payload.len() + PREFIX_LEN))?;
        let header = FrameHeader {
            size,
            padding: 0,
            message_type: frame.message_type,
        };

        let mut out = BytesMut::with_capacity(PREFIX_LEN + frame.payload.len());
        out.put_slice(&header.to_bytes());
        out.put_u16(frame.sequence);
        out.put_slice(&frame.payload);
        Ok(out.freeze())
    }

    /// Parse one whole frame, decrypting and verifying it when required.
    ///
    /// # Errors
    /// - `ProtocolError::FrameDecode` for a bad header, a length that does not
    ///   match the buffer, unaligned ciphertext or a missing session key
    /// - `ProtocolError::DecryptionFailure` when the signature check fails
    pub fn decode(&self, bytes: &[u8], session_key: Option<&SessionKey>) -> Result<Frame> {
        let header = FrameHeader::parse(bytes)?.ok_or_else(|| {
            ProtocolError::FrameDecode(constants::ERR_TRUNCATED_HEADER.into())
        })?;
        let frame_len = header.frame_len();
        if bytes.len() < frame_len {
            return Err(ProtocolError::FrameDecode(format!(
                "{}: declared {frame_len}, got {}",
                constants::ERR_TRUNCATED_FRAME,
                bytes.len()
            )));
        }
        let bytes = &bytes[..frame_len];

        if !header.message_type.is_encrypted() {
            if bytes.len() < PREFIX_LEN {
                return Err(ProtocolError::FrameDecode(
                    constants::ERR_TRUNCATED_HEADER.into(),
                ));
            }
            return Ok(Frame {
                message_type: header.message_type,
                sequence: u16::from_be_bytes([bytes[6], bytes[7]]),
                payload: Bytes::copy_from_slice(&bytes[PREFIX_LEN..]),
            });
        }

        let key = session_key.ok_or_else(|| {
            ProtocolError::FrameDecode(constants::ERR_SESSION_KEY_REQUIRED.into())
        })?;

        let body = &bytes[HEADER_LEN..];
        if body.len() < SIGNATURE_LEN + BLOCK_SIZE {
            return Err(ProtocolError::FrameDecode(
                constants::ERR_TRUNCATED_FRAME.into(),
            ));
        }
        let (ciphertext, signature) = body.split_at(body.len() - SIGNATURE_LEN);
        if ciphertext.len() % BLOCK_SIZE != 0 {
            return Err(ProtocolError::FrameDecode(
                constants::ERR_UNALIGNED_CIPHERTEXT.into(),
            ));
        }

        let mut plain = crypto::aes256_cbc_decrypt(key.as_bytes(), ciphertext)?;
        if crypto::sha256(&[&bytes[..HEADER_LEN], plain.as_slice()]) != signature {
            plain.zeroize();
            return Err(ProtocolError::DecryptionFailure);
        }

        let padding = header.padding as usize;
        if plain.len() < 2 + padding {
            plain.zeroize();
            return Err(ProtocolError::FrameDecode(
                constants::ERR_PADDING_OVERFLOW.into(),
            ));
        }
        let sequence = u16::from_be_bytes([plain[0], plain[1]]);
        let payload = Bytes::copy_from_slice(&plain[2..plain.len() - padding]);
        plain.zeroize();

        Ok(Frame {
            message_type: header.message_type,
            sequence,
            payload,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    /// Build the 64-byte handshake payload a device would send for `plain`.
    fn device_payload(plain: &[u8; 32], raw_key: &[u8; 32]) -> Vec<u8> {
        let mut out = crypto::aes256_cbc_encrypt(raw_key, plain).unwrap();
        out.extend_from_slice(&crypto::sha256(&[&plain[..]]));
        out
    }

    #[test]
    fn test_handshake_frame_layout() {
        let token = [0xAB; 64];
        let frame = LocalSecurity::new().build_handshake_frame(&token).unwrap();
        assert_eq!(frame.len(), 72);
        assert_eq!(&frame[..6], &[0x83, 0x70, 0x00, 0x40, 0x20, 0x00]);
        assert_eq!(&frame[6..8], &[0, 0]);
        assert_eq!(&frame[8..], &token[..]);
    }

    #[test]
    fn test_session_key_is_plain_xor_key() {
        let security = LocalSecurity::new();
        let raw_key = [0x0F; 32];
        let plain = [0xF0; 32];
        let key = security
            .derive_session_key(&device_payload(&plain, &raw_key), &raw_key)
            .unwrap();
        assert_eq!(key.as_bytes(), &[0xFF; 32]);
    }

    #[test]
    fn test_derivation_rejects_short_payload() {
        let err = LocalSecurity::new()
            .derive_session_key(&[0u8; 63], &[0u8; 32])
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Derivation(_)));
    }

    #[test]
    fn test_derivation_rejects_wrong_key_length() {
        let err = LocalSecurity::new()
            .derive_session_key(&[0u8; 64], &[0u8; 16])
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Derivation(_)));
    }

    #[test]
    fn test_derivation_rejects_wrong_key() {
        let plain = [7u8; 32];
        let payload = device_payload(&plain, &[1u8; 32]);
        let err = LocalSecurity::new()
            .derive_session_key(&payload, &[2u8; 32])
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Derivation(_)));
    }

    #[test]
    fn test_encrypted_frame_sizes() {
        let security = LocalSecurity::new();
        let key = SessionKey::from_bytes([3u8; 32]);
        for len in [0usize, 1, 13, 14, 15, 30, 100] {
            let frame = Frame::new(MessageType::EncryptedRequest, 9, vec![0x11; len]);
            let bytes = security.encode(&frame, Some(&key)).unwrap();
            let header = FrameHeader::parse(&bytes).unwrap().unwrap();
            assert_eq!(header.frame_len(), bytes.len());
            assert_eq!((bytes.len() - HEADER_LEN - SIGNATURE_LEN) % BLOCK_SIZE, 0);
            assert_eq!(security.decode(&bytes, Some(&key)).unwrap(), frame);
        }
    }

    #[test]
    fn test_encrypted_type_requires_key() {
        let frame = Frame::new(MessageType::EncryptedRequest, 0, vec![1, 2, 3]);
        assert!(matches!(
            LocalSecurity::new().encode(&frame, None),
            Err(ProtocolError::FrameDecode(_))
        ));
    }

    #[test]
    fn test_wrong_session_key_is_decryption_failure() {
        let security = LocalSecurity::new();
        let frame = Frame::new(MessageType::EncryptedResponse, 1, vec![0x42; 20]);
        let bytes = security
            .encode(&frame, Some(&SessionKey::from_bytes([1u8; 32])))
            .unwrap();
        assert!(matches!(
            security.decode(&bytes, Some(&SessionKey::from_bytes([2u8; 32]))),
            Err(ProtocolError::DecryptionFailure)
        ));
    }

    #[test]
    fn test_tampered_signature_is_decryption_failure() {
        let security = LocalSecurity::new();
        let key = SessionKey::from_bytes([5u8; 32]);
        let frame = Frame::new(MessageType::EncryptedRequest, 2, vec![0x99; 5]);
        let mut bytes = security.encode(&frame, Some(&key)).unwrap().to_vec();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        assert!(matches!(
            security.decode(&bytes, Some(&key)),
            Err(ProtocolError::DecryptionFailure)
        ));
    }

    #[test]
    fn test_truncated_frame_is_framing_error() {
        let security = LocalSecurity::new();
        let bytes = security.build_handshake_frame(&[1u8; 64]).unwrap();
        assert!(matches!(
            security.decode(&bytes[..40], None),
            Err(ProtocolError::FrameDecode(_))
        ));
    }

    #[test]
    fn test_debug_redacts_session_key() {
        let key = SessionKey::from_bytes([0xAA; 32]);
        assert_eq!(format!("{key:?}"), "SessionKey(..)");
    }
}
