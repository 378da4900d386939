//! # avl-simulator
//!
//! Pretends to be an FMB920 tracker: logs in with an IMEI, then sends one
//! Codec 8 record per interval and prints the acknowledgements.
//!
//! ```bash
//! # Periodic reports every 30 s
//! avl-simulator --port 5000
//!
//! # Panic button held: priority 2, DIN1 high, every 1.5 s
//! avl-simulator --panic --count 5
//! ```

use anyhow::{Context, bail};
use avl_gateway::codec::{encode_identifier, encode_packet};
use avl_gateway::types::{AvlRecord, CodecId, DIN1_IO_ID, DeviceId, IoValue, Priority};
use clap::Parser;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// GSM signal level I/O element
const GSM_SIGNAL_IO_ID: u16 = 0x0F;
/// External voltage I/O element (mV)
const EXTERNAL_VOLTAGE_IO_ID: u16 = 0x2A;

/// Teltonika device simulator
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(long, default_value = "127.0.0.1", env = "TCP_HOST")]
    host: String,

    #[arg(short, long, default_value = "5000", env = "TCP_PORT")]
    port: u16,

    #[arg(long, default_value = "356307042441013", env = "IMEI")]
    imei: String,

    /// Send panic records (priority 2, DIN1 = 1)
    #[arg(long)]
    panic: bool,

    /// Milliseconds between packets; defaults to 1500 in panic mode, 30000 otherwise
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Stop after this many packets
    #[arg(short, long)]
    count: Option<u64>,

    /// Encode as Codec 8 Extended
    #[arg(long)]
    extended: bool,

    #[arg(long, default_value = "-12.0464", allow_hyphen_values = true)]
    lat: f64,

    #[arg(long, default_value = "-77.0428", allow_hyphen_values = true)]
    lng: f64,
}

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or_default()
}

fn build_record(args: &Args, seq: u64) -> AvlRecord {
    // Small deterministic wander around the start point
    let step = (seq % 20) as f64 - 10.0;
    let lat = args.lat + step * 0.00005;
    let lng = args.lng + (10.0 - step) * 0.00005;
    let din1 = u8::from(args.panic);

    AvlRecord::builder(now_ms())
        .priority(if args.panic { Priority::Panic } else { Priority::Low })
        .position(lat, lng)
        .satellites(5)
        .speed(if args.panic { 0 } else { ((seq * 7) % 60) as u16 })
        .event_io_id(if args.panic { DIN1_IO_ID } else { 0 })
        .io(GSM_SIGNAL_IO_ID, IoValue::U8(3))
        .io(DIN1_IO_ID, IoValue::U8(din1))
        .io(EXTERNAL_VOLTAGE_IO_ID, IoValue::U16(0x5E10))
        .build()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let interval = Duration::from_millis(args.interval_ms.unwrap_or(if args.panic { 1500 } else { 30_000 }));
    let codec = if args.extended { CodecId::Codec8Extended } else { CodecId::Codec8 };
    info!(host = %args.host, port = args.port, imei = %args.imei, panic = args.panic, ?interval, codec = %codec, "Simulator starting");

    let mut stream = TcpStream::connect((args.host.as_str(), args.port))
        .await
        .with_context(|| format!("connecting to {}:{}", args.host, args.port))?;
    stream.set_nodelay(true)?;

    stream.write_all(&encode_identifier(&DeviceId::new(args.imei.as_str()))?).await?;
    let mut ack = [0u8; 1];
    stream.read_exact(&mut ack).await.context("waiting for identifier acknowledgement")?;
    if ack[0] != 0x01 {
        bail!("identifier {} rejected by gateway", args.imei);
    }
    info!("Identifier accepted");

    let mut ticker = tokio::time::interval(interval);
    let mut seq = 0u64;
    loop {
        if args.count.is_some_and(|limit| seq >= limit) {
            break;
        }
        ticker.tick().await;

        let record = build_record(&args, seq);
        let packet = encode_packet(codec, std::slice::from_ref(&record))?;
        stream.write_all(&packet).await.context("sending packet")?;

        let mut count = [0u8; 4];
        stream.read_exact(&mut count).await.context("waiting for record acknowledgement")?;
        let accepted = u32::from_be_bytes(count);
        if accepted == 1 {
            info!(seq, lat = record.latitude, lng = record.longitude, panic = record.is_panic, "Packet acknowledged");
        } else {
            warn!(seq, accepted, "Gateway did not accept the packet");
        }
        seq += 1;
    }

    info!(packets = seq, "Simulator finished");
    Ok(())
}
