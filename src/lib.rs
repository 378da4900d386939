//! Ingestion gateway for Teltonika AVL vehicle trackers.
//!
//! Trackers open a long-lived TCP connection, identify themselves with their
//! IMEI and stream binary Codec 8 / Codec 8 Extended frames. This crate
//! terminates that protocol: it validates and decodes frames, acknowledges
//! them so the device can discard its local copy, and forwards every record
//! (plus any classified alert) to pluggable downstream stores.
//!
//! # Features
//!
//! - **Wire codec**: bit-exact Codec 8 / 8E decoding with CRC-16 verification
//! - **Resilient framing**: resync after garbage, zero-record acks for bad frames
//! - **Alert classification**: extensible event and I/O-condition tables
//! - **Explicit failure policy**: fail-open or fail-closed device authorization
//! - **Sans-IO core**: the [`Session`] state machine is testable without sockets
//!
//! # Architecture
//!
//! ```text
//! TcpListener ─▶ connection::serve ─▶ Session ─▶ codec::decode
//!                      │                 │
//!                      │            Action::Deliver
//!                      ▼                 ▼
//!               Authorizer        Dispatcher ─▶ PositionStore
//!                                     │      ─▶ IncidentStore
//!                                     └─ AlertRules ─▶ AlertStore
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use avl_gateway::{Collaborators, GatewayConfig, Listener, stores::MemoryStore};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = GatewayConfig::default();
//!     config.apply_env()?;
//!
//!     let store = Arc::new(MemoryStore::new());
//!     let listener = Listener::from_config(&config, Collaborators::from_store(store.clone())).await?;
//!     listener.run().await;
//!
//!     println!("{} positions received", store.positions().len());
//!     Ok(())
//! }
//! ```

// Core types and error handling
mod error;
#[cfg_attr(any(test, feature = "benchmark"), path = "test_utils.rs")]
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

// Protocol
pub mod classifier;
pub mod codec;
pub mod crc;
pub mod session;

// Runtime
pub mod auth;
pub mod collaborators;
pub mod config;
pub mod connection;
pub mod listener;
pub mod stores;

pub use error::*;
pub use types::*;

pub use auth::{Authorizer, FailurePolicy, Verdict};
pub use classifier::{AlertRules, classify};
pub use codec::{decode, decode_frame, encode_identifier, encode_packet};
pub use collaborators::{AlertStore, BatchObserver, Collaborators, DeviceRegistry, IncidentStore, PositionStore};
pub use config::GatewayConfig;
pub use listener::Listener;
pub use session::{Action, Phase, Session, SessionLimits};
