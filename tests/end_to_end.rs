//! End-to-end tests over loopback TCP
//!
//! A real [`Listener`] is bound on an ephemeral port and driven by a client
//! speaking the device side of the protocol.

use avl_gateway::codec::{encode_identifier, encode_packet};
use avl_gateway::config::TimeoutConfig;
use avl_gateway::stores::MemoryStore;
use avl_gateway::types::{AlertKind, AvlRecord, CodecId, DIN1_IO_ID, DeviceId, IoValue, Priority};
use avl_gateway::{Collaborators, GatewayConfig, Listener};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(5);
const IMEI: &str = "356307042441013";

struct Gateway {
    addrs: Vec<SocketAddr>,
    store: Arc<MemoryStore>,
    shutdown: CancellationToken,
    registry: Arc<avl_gateway::listener::SessionRegistry>,
    task: JoinHandle<()>,
}

async fn start(config: GatewayConfig) -> Gateway {
    let store = Arc::new(MemoryStore::new());
    let listener = Listener::from_config(&config, Collaborators::from_store(store.clone())).await.unwrap();
    let addrs = listener.local_addrs();
    let shutdown = listener.shutdown_token();
    let registry = listener.registry();
    let task = tokio::spawn(listener.run());
    Gateway { addrs, store, shutdown, registry, task }
}

fn loopback_config() -> GatewayConfig {
    GatewayConfig { listen: vec!["127.0.0.1:0".parse().unwrap()], ..GatewayConfig::default() }
}

fn panic_record() -> AvlRecord {
    AvlRecord::builder(1_700_000_000_000)
        .priority(Priority::Panic)
        .position(-12.0464, -77.0428)
        .satellites(9)
        .speed(0)
        .io(DIN1_IO_ID, IoValue::U8(1))
        .build()
}

fn handshake() -> Vec<u8> {
    encode_identifier(&DeviceId::new(IMEI)).unwrap()
}

async fn read_bytes(stream: &mut TcpStream, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    tokio::time::timeout(WAIT, stream.read_exact(&mut buf)).await.expect("read timed out").expect("read failed");
    buf
}

async fn read_eof(stream: &mut TcpStream) -> Vec<u8> {
    let mut rest = Vec::new();
    tokio::time::timeout(WAIT, stream.read_to_end(&mut rest)).await.expect("close timed out").unwrap_or_default();
    rest
}

#[tokio::test]
async fn panic_record_flows_to_every_store() {
    let gateway = start(loopback_config()).await;
    let mut device = TcpStream::connect(gateway.addrs[0]).await.unwrap();
    device.set_nodelay(true).unwrap();

    // Slow, fragmented login
    for byte in handshake() {
        device.write_all(&[byte]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert_eq!(read_bytes(&mut device, 1).await, [0x01]);

    device.write_all(&encode_packet(CodecId::Codec8, &[panic_record()]).unwrap()).await.unwrap();
    assert_eq!(read_bytes(&mut device, 4).await, [0, 0, 0, 1]);

    assert!(gateway.store.wait_for_calls(3, WAIT).await);
    assert_eq!(gateway.store.positions().len(), 1);
    assert_eq!(gateway.store.incidents().len(), 1);
    let alerts = gateway.store.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].kind, AlertKind::Panic);
    assert_eq!(alerts[0].device.as_str(), IMEI);
    assert_eq!(alerts[0].speed, 0);

    gateway.shutdown.cancel();
    gateway.task.await.unwrap();
}

#[tokio::test]
async fn garbage_before_frame_is_resynchronized() {
    let gateway = start(loopback_config()).await;
    let mut device = TcpStream::connect(gateway.addrs[0]).await.unwrap();

    device.write_all(&handshake()).await.unwrap();
    assert_eq!(read_bytes(&mut device, 1).await, [0x01]);

    let mut bytes = vec![0xDE, 0xAD, 0xBE];
    bytes.extend(encode_packet(CodecId::Codec8Extended, &[panic_record()]).unwrap());
    device.write_all(&bytes).await.unwrap();
    assert_eq!(read_bytes(&mut device, 4).await, [0, 0, 0, 1]);

    gateway.shutdown.cancel();
}

#[tokio::test]
async fn every_port_speaks_the_protocol() {
    let config = GatewayConfig {
        listen: vec!["127.0.0.1:0".parse().unwrap(), "127.0.0.1:0".parse().unwrap()],
        ..GatewayConfig::default()
    };
    let gateway = start(config).await;
    assert_eq!(gateway.addrs.len(), 2);

    for addr in &gateway.addrs {
        let mut device = TcpStream::connect(addr).await.unwrap();
        device.write_all(&handshake()).await.unwrap();
        assert_eq!(read_bytes(&mut device, 1).await, [0x01]);
    }

    gateway.shutdown.cancel();
}

#[tokio::test]
async fn whitelist_rejects_unknown_devices() {
    let config = GatewayConfig { accept_all_devices: false, whitelist: vec![DeviceId::new(IMEI)], ..loopback_config() };
    let gateway = start(config).await;

    let mut stranger = TcpStream::connect(gateway.addrs[0]).await.unwrap();
    stranger.write_all(&encode_identifier(&DeviceId::new("111111111111111")).unwrap()).await.unwrap();
    assert_eq!(read_eof(&mut stranger).await, [0x00]);

    let mut known = TcpStream::connect(gateway.addrs[0]).await.unwrap();
    known.write_all(&handshake()).await.unwrap();
    assert_eq!(read_bytes(&mut known, 1).await, [0x01]);

    gateway.shutdown.cancel();
}

#[tokio::test]
async fn closed_connections_leave_the_registry() {
    let gateway = start(loopback_config()).await;
    let mut device = TcpStream::connect(gateway.addrs[0]).await.unwrap();
    device.write_all(&handshake()).await.unwrap();
    assert_eq!(read_bytes(&mut device, 1).await, [0x01]);
    assert_eq!(gateway.registry.len(), 1);

    drop(device);
    let drained = tokio::time::timeout(WAIT, async {
        while !gateway.registry.is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(drained.is_ok(), "registry still holds {} sessions", gateway.registry.len());

    gateway.shutdown.cancel();
}

#[tokio::test]
async fn shutdown_closes_open_connections() {
    let gateway = start(loopback_config()).await;
    let mut device = TcpStream::connect(gateway.addrs[0]).await.unwrap();
    device.write_all(&handshake()).await.unwrap();
    assert_eq!(read_bytes(&mut device, 1).await, [0x01]);

    gateway.shutdown.cancel();
    tokio::time::timeout(WAIT, gateway.task).await.unwrap().unwrap();
    assert!(read_eof(&mut device).await.is_empty());
}

#[tokio::test]
async fn silent_connection_hits_login_timeout() {
    let config = GatewayConfig {
        timeouts: TimeoutConfig {
            login: Duration::from_secs(1),
            sweep_interval: Duration::from_secs(1),
            ..TimeoutConfig::default()
        },
        ..loopback_config()
    };
    let gateway = start(config).await;
    let mut device = TcpStream::connect(gateway.addrs[0]).await.unwrap();

    // No identifier, no acknowledgement, just a close
    assert!(read_eof(&mut device).await.is_empty());

    gateway.shutdown.cancel();
}
