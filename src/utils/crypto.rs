//! Block cipher and digest primitives used by the device protocol.
//!
//! The appliance firmware fixes every algorithm here: AES-256-CBC with a zero
//! IV for session traffic and the handshake, AES-128-ECB with PKCS#7 for
//! discovery replies, SHA-256 for frame signatures and MD5 for the discovery
//! key and reply trailer.

use aes::cipher::block_padding::NoPadding;
use aes::cipher::{
    BlockDecrypt, BlockDecryptMut, BlockEncrypt, BlockEncryptMut, KeyInit, KeyIvInit,
};
use aes::{Aes128, Aes256, Block};
use md5::Md5;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::{constants, ProtocolError, Result};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// AES block size in bytes
pub const BLOCK_SIZE: usize = 16;

/// Every CBC operation in the protocol uses an all-zero IV.
const ZERO_IV: [u8; BLOCK_SIZE] = [0u8; BLOCK_SIZE];

/// Vendor constant whose MD5 digest keys discovery reply encryption.
const DISCOVERY_SIGN_KEY: &[u8] = b"xhdiwjnchekd4d512chdjx5d8e4c394D2D7S";

/// Encrypt block-aligned `data` with AES-256-CBC under `key` (zero IV).
///
/// # Errors
/// Returns `ProtocolError::FrameDecode` if `data` is not a multiple of 16 bytes.
pub fn aes256_cbc_encrypt(key: &[u8; 32], data: &[u8]) -> Result<Vec<u8>> {
    if data.len() % BLOCK_SIZE != 0 {
        return Err(ProtocolError::FrameDecode(
            constants::ERR_UNALIGNED_CIPHERTEXT.into(),
        ));
    }
    Ok(Aes256CbcEnc::new(key.into(), (&ZERO_IV).into()).encrypt_padded_vec_mut::<NoPadding>(data))
}

/// Decrypt block-aligned `data` with AES-256-CBC under `key` (zero IV).
///
/// # Errors
/// Returns `ProtocolError::DecryptionFailure` if the input is empty or unaligned.
pub fn aes256_cbc_decrypt(key: &[u8; 32], data: &[u8]) -> Result<Vec<u8>> {
    if data.is_empty() || data.len() % BLOCK_SIZE != 0 {
        return Err(ProtocolError::DecryptionFailure);
    }
    Aes256CbcDec::new(key.into(), (&ZERO_IV).into())
        .decrypt_padded_vec_mut::<NoPadding>(data)
        .map_err(|_| ProtocolError::DecryptionFailure)
}

/// The AES-128 key used for discovery replies.
pub fn discovery_key() -> [u8; 16] {
    md5(DISCOVERY_SIGN_KEY)
}

/// PKCS#7-pad `data` and encrypt it with AES-128-ECB.
pub fn aes128_ecb_encrypt(key: &[u8; 16], data: &[u8]) -> Vec<u8> {
    let cipher = Aes128::new(key.into());
    let mut buf = pkcs7_pad(data);
    for chunk in buf.chunks_exact_mut(BLOCK_SIZE) {
        cipher.encrypt_block(Block::from_mut_slice(chunk));
    }
    buf
}

/// Decrypt AES-128-ECB ciphertext and strip its PKCS#7 padding.
///
/// # Errors
/// Returns `ProtocolError::DiscoveryDecode` for unaligned input or bad padding.
pub fn aes128_ecb_decrypt(key: &[u8; 16], data: &[u8]) -> Result<Vec<u8>> {
    if data.is_empty() || data.len() % BLOCK_SIZE != 0 {
        return Err(ProtocolError::DiscoveryDecode(
            constants::ERR_BAD_DISCOVERY_CIPHERTEXT.into(),
        ));
    }
    let cipher = Aes128::new(key.into());
    let mut buf = data.to_vec();
    for chunk in buf.chunks_exact_mut(BLOCK_SIZE) {
        cipher.decrypt_block(Block::from_mut_slice(chunk));
    }
    pkcs7_unpad(&mut buf)?;
    Ok(buf)
}

fn pkcs7_pad(data: &[u8]) -> Vec<u8> {
    let pad = BLOCK_SIZE - data.len() % BLOCK_SIZE;
    let mut out = Vec::with_capacity(data.len() + pad);
    out.extend_from_slice(data);
    out.resize(data.len() + pad, pad as u8);
    out
}

fn pkcs7_unpad(buf: &mut Vec<u8>) -> Result<()> {
    let bad = || ProtocolError::DiscoveryDecode(constants::ERR_BAD_PADDING.into());
    let pad = *buf.last().ok_or_else(bad)? as usize;
    if pad == 0 || pad > BLOCK_SIZE || pad > buf.len() {
        return Err(bad());
    }
    if !buf[buf.len() - pad..].iter().all(|&b| b as usize == pad) {
        return Err(bad());
    }
    buf.truncate(buf.len() - pad);
    Ok(())
}

/// SHA-256 over the concatenation of `parts`.
pub fn sha256(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// MD5 digest of `data`.
pub fn md5(data: &[u8]) -> [u8; 16] {
    Md5::digest(data).into()
}

/// MD5 signature appended to discovery replies.
pub fn discovery_signature(body: &[u8]) -> [u8; 16] {
    let mut hasher = Md5::new();
    hasher.update(body);
    hasher.update(DISCOVERY_SIGN_KEY);
    hasher.finalize().into()
}

/// Fill a fresh buffer of `len` random bytes.
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    rand::rng().fill_bytes(&mut buf);
    buf
}
