//! End-to-end discovery scans against loopback appliances.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use appliance_link::config::{DiscoveryConfig, TransportConfig};
use appliance_link::error::ProtocolError;
use appliance_link::protocol::{ByteOrder, CredentialAcquirer, HandshakeAuthenticator};
use appliance_link::service::Scanner;
use appliance_link::transport::TcpConnector;
use appliance_link::utils::Metrics;
use appliance_link::DeviceType;
use common::{discovery_reply, spawn_responder, FakeCloud, FakeDevice, LogCapture, Reply};
use futures::StreamExt;
use tokio::net::UdpSocket;

const KEY_A: [u8; 32] = [0x11; 32];
const KEY_B: [u8; 32] = [0x22; 32];
const KEY_C: [u8; 32] = [0x33; 32];

fn discovery_config(responder: std::net::SocketAddr, window: Duration) -> DiscoveryConfig {
    DiscoveryConfig {
        broadcast_addresses: vec!["127.0.0.1".into()],
        ports: vec![responder.port()],
        window,
        broadcast_count: 2,
        broadcast_interval: Duration::from_millis(50),
        device_timeout: Duration::from_secs(5),
        bind_address: "127.0.0.1:0".into(),
    }
}

fn scanner(
    config: DiscoveryConfig,
    cloud: Arc<FakeCloud>,
) -> Scanner<Arc<FakeCloud>, HandshakeAuthenticator<TcpConnector>> {
    let metrics = Arc::new(Metrics::new());
    let authenticator =
        HandshakeAuthenticator::new(TcpConnector::new(TransportConfig::default()), metrics.clone());
    let acquirer = CredentialAcquirer::new(cloud, authenticator, metrics.clone());
    Scanner::new(config, acquirer, metrics)
}

#[tokio::test]
async fn test_slow_device_outlives_window() {
    let fast = FakeDevice::spawn(KEY_A, Duration::from_millis(50), Reply::Handshake).await;
    let slow = FakeDevice::spawn(KEY_B, Duration::from_millis(500), Reply::Handshake).await;
    let responder = spawn_responder(vec![
        discovery_reply(0xA1, fast.addr, "net_ac_00A1"),
        discovery_reply(0xB2, slow.addr, "net_a1_00B2"),
    ])
    .await;
    let cloud = Arc::new(
        FakeCloud::default()
            .with_device(0xA1, ByteOrder::BigEndian, KEY_A)
            .with_device(0xB2, ByteOrder::BigEndian, KEY_B),
    );

    let started = Instant::now();
    let scanner = scanner(discovery_config(responder, Duration::from_millis(200)), cloud);
    let devices: Vec<_> = scanner.scan().await.unwrap().collect().await;

    assert!(started.elapsed() >= Duration::from_millis(500));
    let ids: Vec<u64> = devices.iter().map(|d| d.id).collect();
    assert_eq!(ids, vec![0xA1, 0xB2]);

    let fast_record = &devices[0];
    assert_eq!(fast_record.device_type, DeviceType::AirConditioner);
    assert_eq!(fast_record.display_name, "Air Conditioner");
    assert_eq!(fast_record.port, fast.addr.port());
    assert_eq!(fast_record.token_hex(), Some(hex::encode(common::TOKEN)));
    assert_eq!(fast_record.key_hex(), Some(hex::encode(KEY_A)));

    assert_eq!(devices[1].display_name, "Dehumidifier");
}

#[tokio::test]
async fn test_little_endian_fallback_issues_two_cloud_calls() {
    let device = FakeDevice::spawn(KEY_A, Duration::ZERO, Reply::Handshake).await;
    let responder = spawn_responder(vec![discovery_reply(0xC3, device.addr, "net_ac_00C3")]).await;
    let cloud = Arc::new(FakeCloud::default().with_device(0xC3, ByteOrder::LittleEndian, KEY_A));

    let devices = scanner(
        discovery_config(responder, Duration::from_millis(150)),
        cloud.clone(),
    )
    .scan_all()
    .await
    .unwrap();

    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].key_hex(), Some(hex::encode(KEY_A)));
    assert_eq!(cloud.call_count(0xC3), 2);
}

#[tokio::test]
async fn test_duplicate_replies_run_one_chain() {
    let device = FakeDevice::spawn(KEY_A, Duration::ZERO, Reply::Handshake).await;
    let reply = discovery_reply(0xD4, device.addr, "net_ac_00D4");
    let responder = spawn_responder(vec![reply.clone(), reply]).await;
    let cloud = Arc::new(FakeCloud::default().with_device(0xD4, ByteOrder::BigEndian, KEY_A));

    let devices = scanner(
        discovery_config(responder, Duration::from_millis(150)),
        cloud.clone(),
    )
    .scan_all()
    .await
    .unwrap();

    assert_eq!(devices.len(), 1);
    assert_eq!(cloud.call_count(0xD4), 1);
}

#[tokio::test]
async fn test_empty_and_garbage_replies_are_discarded() {
    let device = FakeDevice::spawn(KEY_A, Duration::ZERO, Reply::Handshake).await;
    let responder = spawn_responder(vec![
        Vec::new(),
        b"definitely not an appliance".to_vec(),
        discovery_reply(0xE5, device.addr, "net_ac_00E5"),
    ])
    .await;
    let cloud = Arc::new(FakeCloud::default().with_device(0xE5, ByteOrder::BigEndian, KEY_A));

    let scanner = scanner(discovery_config(responder, Duration::from_millis(150)), cloud);
    let devices = scanner.scan_all().await.unwrap();

    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].id, 0xE5);
    let snapshot = scanner.metrics().snapshot();
    assert!(snapshot.replies_discarded >= 2);
    assert_eq!(snapshot.devices_found, 1);
}

#[tokio::test]
async fn test_failed_device_is_excluded_and_logged_once() {
    let capture = LogCapture::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(capture.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let good = FakeDevice::spawn(KEY_A, Duration::ZERO, Reply::Handshake).await;
    let bad = FakeDevice::spawn(KEY_C, Duration::ZERO, Reply::Handshake).await;
    let responder = spawn_responder(vec![
        discovery_reply(0xF6, good.addr, "net_ac_00F6"),
        discovery_reply(0xF7, bad.addr, "net_ac_00F7"),
    ])
    .await;
    // the cloud hands out the wrong key for 0xF7 in both byte orders
    let cloud = Arc::new(
        FakeCloud::default()
            .with_device(0xF6, ByteOrder::BigEndian, KEY_A)
            .with_device(0xF7, ByteOrder::BigEndian, common::WRONG_KEY),
    );

    let scanner = scanner(
        discovery_config(responder, Duration::from_millis(150)),
        cloud.clone(),
    );
    let devices = scanner.scan_all().await.unwrap();

    assert_eq!(devices.iter().map(|d| d.id).collect::<Vec<_>>(), vec![0xF6]);
    assert_eq!(cloud.call_count(0xF7), 2);
    assert_eq!(capture.count("Credential acquisition failed for device 247"), 1);
    assert_eq!(capture.count("Skipping device"), 1);
    assert_eq!(scanner.metrics().snapshot().devices_failed, 1);
}

#[tokio::test]
async fn test_device_timeout_counts_as_failure() {
    let stuck = FakeDevice::spawn(KEY_A, Duration::from_secs(30), Reply::Handshake).await;
    let responder = spawn_responder(vec![discovery_reply(0x1F, stuck.addr, "net_ac_001F")]).await;
    let cloud = Arc::new(FakeCloud::default().with_device(0x1F, ByteOrder::BigEndian, KEY_A));

    let mut config = discovery_config(responder, Duration::from_millis(100));
    config.device_timeout = Duration::from_millis(300);
    let scanner = scanner(config, cloud);

    let started = Instant::now();
    let devices = scanner.scan_all().await.unwrap();
    assert!(devices.is_empty());
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(scanner.metrics().snapshot().devices_failed, 1);
}

#[tokio::test]
async fn test_scan_without_replies_ends_after_window() {
    let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let config = discovery_config(silent.local_addr().unwrap(), Duration::from_millis(100));

    let started = Instant::now();
    let devices = scanner(config, Arc::new(FakeCloud::default()))
        .scan_all()
        .await
        .unwrap();
    assert!(devices.is_empty());
    assert!(started.elapsed() >= Duration::from_millis(100));
}

#[tokio::test]
async fn test_bind_failure_is_fatal() {
    let taken = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let mut config = discovery_config(taken.local_addr().unwrap(), Duration::from_millis(100));
    config.bind_address = taken.local_addr().unwrap().to_string();

    let result = scanner(config, Arc::new(FakeCloud::default())).scan().await;
    assert!(matches!(result, Err(ProtocolError::DiscoveryBind { .. })));
}
