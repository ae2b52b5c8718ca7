//! LAN discovery of appliances.
//!
//! The scanner broadcasts the vendor probe datagram, decodes every reply
//! into a [`DeviceDescriptor`] and runs one credential chain per new device.
//! A device is yielded only once its credentials have been verified by a
//! live handshake.
//!
//! ## Reply format
//! ```text
//! V2: [0x5A 0x5A ...header(40)] [AES-128-ECB ciphertext] [MD5 trailer(16)]
//! V3: [0x83 0x70 ...(8)] [V2 body] [trailer(16)]
//! ```
//! Device id: 6 bytes LE at body offset 20. Decrypted: reversed IPv4 (4),
//! port u32 LE (4), serial (32), SSID length (1), SSID.
//!
//! ## Lifecycle
//! The stream ends once the listening window has elapsed *and* every device
//! chain spawned during the window has finished. Chains are bounded by
//! `device_timeout` so that one unresponsive device cannot hold the scan open.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::config::{BridgeConfig, DiscoveryConfig, MAX_DATAGRAM_SIZE};
use crate::device::{DeviceDescriptor, DeviceType};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::credentials::{CredentialAcquirer, TokenProvider};
use crate::protocol::handshake::{Authenticator, HandshakeAuthenticator};
use crate::transport::TcpConnector;
use crate::utils::crypto;
use crate::utils::Metrics;

/// Fixed probe datagram understood by the appliance firmware
pub const DISCOVERY_PROBE: [u8; 72] = [
    0x5a, 0x5a, 0x01, 0x11, 0x48, 0x00, 0x92, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x7f, 0x75, 0xbd, 0x6b, 0x3e, 0x4f, 0x8b, 0x76,
    0x2e, 0x84, 0x9c, 0x6e, 0x57, 0x8d, 0x65, 0x90, 0x03, 0x6e, 0x9d, 0x43, 0x42, 0xa5, 0x0f, 0x1f,
    0x56, 0x9e, 0xb8, 0xec, 0x91, 0x8e, 0x92, 0xe5, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

const V2_PREAMBLE: [u8; 2] = [0x5A, 0x5A];
const V3_PREAMBLE: [u8; 2] = [0x83, 0x70];
const V3_PREFIX_LEN: usize = 8;
const BODY_HEADER_LEN: usize = 40;
const TRAILER_LEN: usize = 16;
const SERIAL_LEN: usize = 32;
const DEVICE_ID_RANGE: std::ops::Range<usize> = 20..26;

/// Fields carried by one discovery reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryReply {
    /// Reply generation, 2 or 3
    pub version: u8,
    pub device_id: u64,
    pub ip: Ipv4Addr,
    pub port: u16,
    pub serial_number: String,
    /// Network name advertised by the appliance, e.g. `net_ac_1A2B`
    pub ssid: String,
}

impl DiscoveryReply {
    /// Decode a reply datagram.
    ///
    /// # Errors
    /// Returns `ProtocolError::DiscoveryDecode` for empty, truncated or
    /// undecryptable datagrams.
    pub fn decode(datagram: &[u8]) -> Result<Self> {
        let decode_err = |msg: &str| ProtocolError::DiscoveryDecode(msg.to_string());

        if datagram.is_empty() {
            return Err(decode_err(constants::ERR_EMPTY_DATAGRAM));
        }

        let (version, body) = if datagram.starts_with(&V3_PREAMBLE) {
            if datagram.len() < V3_PREFIX_LEN + TRAILER_LEN {
                return Err(decode_err(constants::ERR_SHORT_DATAGRAM));
            }
            (3, &datagram[V3_PREFIX_LEN..datagram.len() - TRAILER_LEN])
        } else {
            (2, datagram)
        };
        if !body.starts_with(&V2_PREAMBLE) {
            return Err(decode_err(constants::ERR_UNKNOWN_PREAMBLE));
        }
        if body.len() < BODY_HEADER_LEN + crypto::BLOCK_SIZE + TRAILER_LEN {
            return Err(decode_err(constants::ERR_SHORT_DATAGRAM));
        }

        let mut id_bytes = [0u8; 8];
        id_bytes[..6].copy_from_slice(&body[DEVICE_ID_RANGE]);
        let device_id = u64::from_le_bytes(id_bytes);

        let ciphertext = &body[BODY_HEADER_LEN..body.len() - TRAILER_LEN];
        let plain = crypto::aes128_ecb_decrypt(&crypto::discovery_key(), ciphertext)?;
        if plain.len() < 8 + SERIAL_LEN + 1 {
            return Err(decode_err(constants::ERR_SHORT_DATAGRAM));
        }

        let ip = Ipv4Addr::new(plain[3], plain[2], plain[1], plain[0]);
        let port = u32::from_le_bytes([plain[4], plain[5], plain[6], plain[7]]);
        let port = u16::try_from(port)
            .map_err(|_| ProtocolError::DiscoveryDecode(format!("port out of range: {port}")))?;
        let serial_number = ascii_field(&plain[8..8 + SERIAL_LEN]);

        let ssid_len = plain[8 + SERIAL_LEN] as usize;
        let ssid_start = 8 + SERIAL_LEN + 1;
        let ssid = plain
            .get(ssid_start..ssid_start + ssid_len)
            .map(ascii_field)
            .ok_or_else(|| decode_err(constants::ERR_SHORT_DATAGRAM))?;

        Ok(Self {
            version,
            device_id,
            ip,
            port,
            serial_number,
            ssid,
        })
    }

    /// Encode the reply the way an appliance would send it.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut plain = Vec::with_capacity(8 + SERIAL_LEN + 1 + self.ssid.len());
        let octets = self.ip.octets();
        plain.extend_from_slice(&[octets[3], octets[2], octets[1], octets[0]]);
        plain.extend_from_slice(&u32::from(self.port).to_le_bytes());
        let mut serial = [0u8; SERIAL_LEN];
        let serial_len = self.serial_number.len().min(SERIAL_LEN);
        serial[..serial_len].copy_from_slice(&self.serial_number.as_bytes()[..serial_len]);
        plain.extend_from_slice(&serial);
        let ssid = &self.ssid.as_bytes()[..self.ssid.len().min(u8::MAX as usize)];
        plain.push(ssid.len() as u8);
        plain.extend_from_slice(ssid);

        let ciphertext = crypto::aes128_ecb_encrypt(&crypto::discovery_key(), &plain);

        let mut body = vec![0u8; BODY_HEADER_LEN];
        body[..2].copy_from_slice(&V2_PREAMBLE);
        body[2] = 0x01;
        body[3] = 0x11;
        let total = (BODY_HEADER_LEN + ciphertext.len() + TRAILER_LEN) as u16;
        body[4..6].copy_from_slice(&total.to_le_bytes());
        body[DEVICE_ID_RANGE].copy_from_slice(&self.device_id.to_le_bytes()[..6]);
        body.extend_from_slice(&ciphertext);
        let signature = crypto::discovery_signature(&body);
        body.extend_from_slice(&signature);

        if self.version < 3 {
            return body;
        }
        let size = (body.len() + TRAILER_LEN) as u16;
        let mut out = Vec::with_capacity(V3_PREFIX_LEN + body.len() + TRAILER_LEN);
        out.extend_from_slice(&V3_PREAMBLE);
        out.extend_from_slice(&size.to_be_bytes());
        out.extend_from_slice(&[0x20, 0x00, 0x00, 0x00]);
        out.extend_from_slice(&body);
        out.extend_from_slice(&[0u8; TRAILER_LEN]);
        out
    }

    /// Appliance category encoded in the SSID, e.g. `net_ac_1A2B` is 0xAC
    pub fn device_type(&self) -> DeviceType {
        self.ssid
            .split('_')
            .nth(1)
            .and_then(|code| u8::from_str_radix(code, 16).ok())
            .map(DeviceType::from)
            .unwrap_or(DeviceType::Unknown(0))
    }

    pub fn into_descriptor(self) -> DeviceDescriptor {
        let mut device = DeviceDescriptor::new(
            self.device_id,
            IpAddr::V4(self.ip),
            self.port,
            self.device_type(),
        );
        if !self.ssid.is_empty() {
            device.name = self.ssid;
        }
        device.serial_number = self.serial_number;
        device.protocol_version = self.version;
        device
    }
}

fn ascii_field(raw: &[u8]) -> String {
    raw.iter()
        .take_while(|&&b| b != 0)
        .map(|&b| b as char)
        .collect()
}

/// Devices yielded by one scan, in completion order.
///
/// Dropping the stream cancels the scan and every pending device chain.
pub struct ScanStream {
    inner: ReceiverStream<DeviceDescriptor>,
    task: JoinHandle<()>,
}

impl Stream for ScanStream {
    type Item = DeviceDescriptor;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl Drop for ScanStream {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Broadcast discovery with per-device credential verification
pub struct Scanner<P, A> {
    config: DiscoveryConfig,
    acquirer: Arc<CredentialAcquirer<P, A>>,
    metrics: Arc<Metrics>,
}

impl<P> Scanner<P, HandshakeAuthenticator<TcpConnector>>
where
    P: TokenProvider + 'static,
{
    /// Scanner that verifies credentials over TCP as configured in `config`
    pub fn with_cloud(config: &BridgeConfig, provider: P) -> Self {
        let metrics = Arc::new(Metrics::new());
        let authenticator = HandshakeAuthenticator::new(
            TcpConnector::new(config.transport.clone()),
            metrics.clone(),
        );
        let acquirer = CredentialAcquirer::new(provider, authenticator, metrics.clone());
        Self::new(config.discovery.clone(), acquirer, metrics)
    }
}

impl<P, A> Scanner<P, A>
where
    P: TokenProvider + 'static,
    A: Authenticator + 'static,
{
    pub fn new(
        config: DiscoveryConfig,
        acquirer: CredentialAcquirer<P, A>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            config,
            acquirer: Arc::new(acquirer),
            metrics,
        }
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Start a scan.
    ///
    /// # Errors
    /// Returns `ProtocolError::DiscoveryBind` if the UDP socket cannot be
    /// bound, and `ProtocolError::ConfigError` for unparsable addresses. No
    /// stream is produced in either case.
    #[instrument(skip(self))]
    pub async fn scan(&self) -> Result<ScanStream> {
        let bind_addr: SocketAddr = self.config.bind_address.parse().map_err(|e| {
            ProtocolError::ConfigError(format!(
                "Invalid bind address '{}': {e}",
                self.config.bind_address
            ))
        })?;
        let targets = self.targets()?;

        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|e| ProtocolError::DiscoveryBind {
                addr: bind_addr,
                reason: e.to_string(),
            })?;
        socket
            .set_broadcast(true)
            .map_err(|e| ProtocolError::DiscoveryBind {
                addr: bind_addr,
                reason: e.to_string(),
            })?;

        self.metrics.scan_started();
        info!(
            local = ?socket.local_addr().ok(),
            targets = targets.len(),
            window_ms = self.config.window.as_millis() as u64,
            "Start device discovery"
        );

        let (tx, rx) = mpsc::channel(64);
        let run = ScanRun {
            socket,
            targets,
            config: self.config.clone(),
            acquirer: self.acquirer.clone(),
            metrics: self.metrics.clone(),
            tx,
        };
        let task = tokio::spawn(run.drive());

        Ok(ScanStream {
            inner: ReceiverStream::new(rx),
            task,
        })
    }

    /// Run a scan to completion.
    ///
    /// Devices without credentials are dropped; the rest are sorted by IP.
    pub async fn scan_all(&self) -> Result<Vec<DeviceDescriptor>> {
        let mut devices: Vec<_> = self
            .scan()
            .await?
            .filter(|device| futures::future::ready(device.has_credentials()))
            .collect()
            .await;
        devices.sort_by(|a, b| a.ip.cmp(&b.ip));
        Ok(devices)
    }

    fn targets(&self) -> Result<Vec<SocketAddr>> {
        let mut targets = Vec::new();
        for address in &self.config.broadcast_addresses {
            let ip: IpAddr = address.parse().map_err(|e| {
                ProtocolError::ConfigError(format!("Invalid broadcast address '{address}': {e}"))
            })?;
            targets.extend(self.config.ports.iter().map(|&port| SocketAddr::new(ip, port)));
        }
        Ok(targets)
    }
}

type ChainOutcome = (u64, Result<DeviceDescriptor>);

/// State owned by the background task of one scan
struct ScanRun<P, A> {
    socket: UdpSocket,
    targets: Vec<SocketAddr>,
    config: DiscoveryConfig,
    acquirer: Arc<CredentialAcquirer<P, A>>,
    metrics: Arc<Metrics>,
    tx: mpsc::Sender<DeviceDescriptor>,
}

impl<P, A> ScanRun<P, A>
where
    P: TokenProvider + 'static,
    A: Authenticator + 'static,
{
    async fn drive(self) {
        let deadline = Instant::now() + self.config.window;
        let window = tokio::time::sleep_until(deadline);
        tokio::pin!(window);

        let mut probes = tokio::time::interval(self.config.broadcast_interval);
        probes.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut probes_sent = 0u32;

        let mut seen = HashSet::new();
        let mut chains: JoinSet<ChainOutcome> = JoinSet::new();
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        loop {
            tokio::select! {
                _ = &mut window => break,

                _ = probes.tick(), if probes_sent < self.config.broadcast_count => {
                    probes_sent += 1;
                    self.broadcast(probes_sent).await;
                }

                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((len, src)) => {
                        self.metrics.reply_received();
                        self.on_datagram(&buf[..len], src, &mut seen, &mut chains);
                    }
                    Err(e) => debug!(error = %e, "Discovery receive failed"),
                },

                Some(joined) = chains.join_next(), if !chains.is_empty() => {
                    if !self.report(joined).await {
                        chains.abort_all();
                        return;
                    }
                }
            }
        }

        trace!(pending = chains.len(), "Listening window closed");
        while let Some(joined) = chains.join_next().await {
            if !self.report(joined).await {
                chains.abort_all();
                return;
            }
        }

        info!(devices = seen.len(), "Device discovery complete");
        self.metrics.log_metrics();
    }

    async fn broadcast(&self, round: u32) {
        for target in &self.targets {
            match self.socket.send_to(&DISCOVERY_PROBE, target).await {
                Ok(_) => trace!(%target, round, "Probe sent"),
                Err(e) => warn!(%target, error = %e, "Failed to send discovery probe"),
            }
        }
    }

    fn on_datagram(
        &self,
        datagram: &[u8],
        src: SocketAddr,
        seen: &mut HashSet<u64>,
        chains: &mut JoinSet<ChainOutcome>,
    ) {
        let reply = match DiscoveryReply::decode(datagram) {
            Ok(reply) => reply,
            Err(e) => {
                self.metrics.reply_discarded();
                debug!(%src, len = datagram.len(), error = %e, "Discarding discovery reply");
                return;
            }
        };

        if !seen.insert(reply.device_id) {
            trace!(device_id = reply.device_id, "Duplicate discovery reply");
            return;
        }

        let mut device = reply.into_descriptor();
        info!(
            device_id = device.id,
            ip = %device.ip,
            port = device.port,
            device_type = %device.device_type,
            "Discovered device"
        );

        let acquirer = self.acquirer.clone();
        let device_timeout = self.config.device_timeout;
        chains.spawn(async move {
            let id = device.id;
            let outcome = verify_device(&acquirer, &mut device, device_timeout)
                .await
                .map(|()| device);
            (id, outcome)
        });
    }

    /// Forward a finished chain. Returns false once the consumer is gone.
    async fn report(&self, joined: std::result::Result<ChainOutcome, JoinError>) -> bool {
        match joined {
            Ok((_, Ok(device))) => {
                self.metrics.device_found();
                info!(device_id = device.id, name = %device.name, "Device ready");
                self.tx.send(device).await.is_ok()
            }
            Ok((device_id, Err(e))) => {
                self.metrics.device_failed();
                warn!(device_id, error = %e, "Skipping device");
                true
            }
            Err(e) => {
                self.metrics.device_failed();
                error!(error = %e, "Device task aborted");
                true
            }
        }
    }
}

/// Credential acquisition and display-name assignment for one device
async fn verify_device<P, A>(
    acquirer: &CredentialAcquirer<P, A>,
    device: &mut DeviceDescriptor,
    device_timeout: Duration,
) -> Result<()>
where
    P: TokenProvider,
    A: Authenticator,
{
    tokio::time::timeout(device_timeout, acquirer.acquire(device))
        .await
        .map_err(|_| ProtocolError::Timeout)??;
    device.assign_display_name();
    Ok(())
}
