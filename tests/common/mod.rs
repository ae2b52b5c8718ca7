//! Loopback stand-ins for appliances and the cloud.

#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

use std::collections::HashMap;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use appliance_link::core::codec::FrameCodec;
use appliance_link::core::frame::{Frame, MessageType};
use appliance_link::device::Credentials;
use appliance_link::error::{ProtocolError, Result};
use appliance_link::protocol::{ByteOrder, LocalSecurity, SessionKey, TokenProvider};
use appliance_link::service::DiscoveryReply;
use appliance_link::utils::crypto;
use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio_util::codec::Decoder;
use tracing_subscriber::fmt::MakeWriter;

pub const TOKEN: [u8; 64] = [0x42; 64];
pub const WRONG_KEY: [u8; 32] = [0xEE; 32];

/// How a fake appliance answers the handshake request
#[derive(Debug, Clone)]
pub enum Reply {
    /// A valid handshake response, then an encrypted echo service
    Handshake,
    /// These exact bytes, then close
    Raw(Vec<u8>),
    /// Close without answering
    Close,
}

/// TCP appliance on 127.0.0.1
pub struct FakeDevice {
    pub addr: SocketAddr,
    pub raw_key: [u8; 32],
    pub secret: [u8; 32],
}

impl FakeDevice {
    pub async fn spawn(raw_key: [u8; 32], delay: Duration, reply: Reply) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let secret = [0x3Cu8; 32];

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let reply = reply.clone();
                tokio::spawn(serve(stream, raw_key, secret, delay, reply));
            }
        });

        Self {
            addr,
            raw_key,
            secret,
        }
    }

    pub fn session_key(&self) -> SessionKey {
        session_key(&self.raw_key, &self.secret)
    }
}

fn session_key(raw_key: &[u8; 32], secret: &[u8; 32]) -> SessionKey {
    let mut key = [0u8; 32];
    for (i, b) in key.iter_mut().enumerate() {
        *b = raw_key[i] ^ secret[i];
    }
    SessionKey::from_bytes(key)
}

/// Handshake response frame for `raw_key`
pub fn handshake_response(raw_key: &[u8; 32], secret: &[u8; 32]) -> Vec<u8> {
    let mut payload = crypto::aes256_cbc_encrypt(raw_key, secret).unwrap();
    payload.extend_from_slice(&crypto::sha256(&[&secret[..]]));
    LocalSecurity::new()
        .encode(&Frame::new(MessageType::HandshakeResponse, 0, payload), None)
        .unwrap()
        .to_vec()
}

async fn serve(
    mut stream: TcpStream,
    raw_key: [u8; 32],
    secret: [u8; 32],
    delay: Duration,
    reply: Reply,
) {
    let mut request = [0u8; 72];
    if stream.read_exact(&mut request).await.is_err() {
        return;
    }
    tokio::time::sleep(delay).await;

    match reply {
        Reply::Close => {}
        Reply::Raw(bytes) => {
            let _ = stream.write_all(&bytes).await;
        }
        Reply::Handshake => {
            if stream
                .write_all(&handshake_response(&raw_key, &secret))
                .await
                .is_err()
            {
                return;
            }
            echo(stream, session_key(&raw_key, &secret)).await;
        }
    }
}

/// Answer every encrypted request with an encrypted response carrying the
/// same payload and sequence number.
async fn echo(mut stream: TcpStream, key: SessionKey) {
    let security = LocalSecurity::new();
    let mut codec = FrameCodec::default();
    let mut buf = BytesMut::new();
    loop {
        while let Ok(Some(raw)) = codec.decode(&mut buf) {
            let Ok(request) = security.decode(&raw, Some(&key)) else {
                return;
            };
            let response = Frame::new(
                MessageType::EncryptedResponse,
                request.sequence,
                request.payload,
            );
            let bytes = security.encode(&response, Some(&key)).unwrap();
            if stream.write_all(&bytes).await.is_err() {
                return;
            }
        }
        match stream.read_buf(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
    }
}

/// Discovery reply advertising a device listening on `addr`
pub fn discovery_reply(device_id: u64, addr: SocketAddr, ssid: &str) -> Vec<u8> {
    DiscoveryReply {
        version: 3,
        device_id,
        ip: Ipv4Addr::LOCALHOST,
        port: addr.port(),
        serial_number: format!("SN{device_id:030}"),
        ssid: ssid.to_string(),
    }
    .to_bytes()
}

/// UDP responder answering every probe with `replies`
pub async fn spawn_responder(replies: Vec<Vec<u8>>) -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    tokio::spawn(async move {
        let mut buf = [0u8; 1024];
        while let Ok((_, src)) = socket.recv_from(&mut buf).await {
            for reply in &replies {
                let _ = socket.send_to(reply, src).await;
            }
        }
    });
    addr
}

/// Cloud stub: correct key only for the registered byte order
#[derive(Default)]
pub struct FakeCloud {
    devices: HashMap<u64, (ByteOrder, [u8; 32])>,
    pub calls: Mutex<Vec<(u64, ByteOrder)>>,
}

impl FakeCloud {
    pub fn with_device(mut self, device_id: u64, order: ByteOrder, raw_key: [u8; 32]) -> Self {
        self.devices.insert(device_id, (order, raw_key));
        self
    }

    pub fn call_count(&self, device_id: u64) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == device_id)
            .count()
    }
}

#[async_trait]
impl TokenProvider for FakeCloud {
    async fn get_token(&self, device_id: u64, byte_order: ByteOrder) -> Result<Credentials> {
        self.calls.lock().unwrap().push((device_id, byte_order));
        match self.devices.get(&device_id) {
            Some((order, key)) if *order == byte_order => Ok(Credentials::new(TOKEN, key.to_vec())),
            Some(_) => Ok(Credentials::new(TOKEN, WRONG_KEY.to_vec())),
            None => Err(ProtocolError::Cloud(format!("unknown device {device_id}"))),
        }
    }
}

/// In-memory log sink for asserting on emitted events
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }

    pub fn count(&self, needle: &str) -> usize {
        self.contents().matches(needle).count()
    }
}

pub struct CaptureWriter(Arc<Mutex<Vec<u8>>>);

impl io::Write for CaptureWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = CaptureWriter;

    fn make_writer(&'a self) -> Self::Writer {
        CaptureWriter(self.0.clone())
    }
}
