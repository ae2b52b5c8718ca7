use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::core::frame::{FrameHeader, MAX_FRAME_SIZE, PREFIX_LEN};
use crate::error::{ProtocolError, Result};

/// Splits a byte stream into whole raw frames.
///
/// Only the plaintext header is inspected; decryption is left to
/// [`LocalSecurity`](crate::protocol::security::LocalSecurity) so that a
/// framing failure and an integrity failure stay distinguishable.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            max_frame_size: max_frame_size.min(MAX_FRAME_SIZE),
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(MAX_FRAME_SIZE)
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let header = match FrameHeader::parse(&src[..])? {
            Some(header) => header,
            None => return Ok(None),
        };

        let frame_len = header.frame_len();
        if frame_len > self.max_frame_size {
            return Err(ProtocolError::OversizedPacket(frame_len));
        }

        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        Ok(Some(src.split_to(frame_len).freeze()))
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<()> {
        if item.len() < PREFIX_LEN {
            return Err(ProtocolError::FrameDecode(
                crate::error::constants::ERR_TRUNCATED_HEADER.into(),
            ));
        }
        if item.len() > self.max_frame_size {
            return Err(ProtocolError::OversizedPacket(item.len()));
        }
        dst.reserve(item.len());
        dst.extend_from_slice(&item);
        Ok(())
    }
}
