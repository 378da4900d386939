//! # avl-gateway
//!
//! Teltonika AVL ingestion server.
//!
//! ## Usage
//!
//! ```bash
//! # Defaults: port 5000, accept every IMEI
//! avl-gateway
//!
//! # Config file, extra port, strict whitelist
//! avl-gateway --config gateway.yaml --listen 0.0.0.0:5027 --accept-all-devices false
//! ```
//!
//! Environment: `AVL_CONFIG`, `AVL_LISTEN`, `AVL_PORTS`, `AVL_ACCEPT_ALL_DEVICES`,
//! `RUST_LOG`.

use anyhow::Context;
use avl_gateway::stores::TracingStore;
use avl_gateway::types::DeviceId;
use avl_gateway::{Collaborators, FailurePolicy, GatewayConfig, Listener};
use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Teltonika AVL (Codec 8 / 8E) ingestion gateway
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(short, long, env = "AVL_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on, repeatable (replaces configured addresses)
    #[arg(short, long)]
    listen: Vec<SocketAddr>,

    /// Accept every well-formed identifier without the whitelist
    #[arg(long)]
    accept_all_devices: Option<bool>,

    /// Device identifier to whitelist, repeatable (added to configured ones)
    #[arg(long = "whitelist", value_name = "IMEI")]
    whitelist: Vec<String>,

    /// What to do when the whitelist lookup fails
    #[arg(long, value_enum)]
    auth_failure_policy: Option<PolicyArg>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PolicyArg {
    FailOpen,
    FailClosed,
}

impl From<PolicyArg> for FailurePolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::FailOpen => FailurePolicy::FailOpen,
            PolicyArg::FailClosed => FailurePolicy::FailClosed,
        }
    }
}

fn load_config(args: &Args) -> anyhow::Result<GatewayConfig> {
    let mut config = match &args.config {
        Some(path) => GatewayConfig::from_file(path).with_context(|| format!("loading {}", path.display()))?,
        None => GatewayConfig::default(),
    };
    config.apply_env().context("applying environment overrides")?;

    if !args.listen.is_empty() {
        config.listen = args.listen.clone();
    }
    if let Some(accept_all) = args.accept_all_devices {
        config.accept_all_devices = accept_all;
    }
    config.whitelist.extend(args.whitelist.iter().map(DeviceId::new));
    if let Some(policy) = args.auth_failure_policy {
        config.auth_failure_policy = policy.into();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("avl-gateway v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args)?;
    info!(
        listen = ?config.listen,
        accept_all_devices = config.accept_all_devices,
        whitelist = config.whitelist.len(),
        auth_failure_policy = ?config.auth_failure_policy,
        "Configuration loaded"
    );

    let listener = Listener::from_config(&config, Collaborators::from_store(Arc::new(TracingStore)))
        .await
        .context("starting listener")?;

    let shutdown = listener.shutdown_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown requested");
                shutdown.cancel();
            }
            Err(e) => error!(error = %e, "Cannot listen for Ctrl-C, running until killed"),
        }
    });

    listener.run().await;
    Ok(())
}
