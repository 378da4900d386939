//! Error types for the ingestion gateway.
//!
//! Decoding and classification never fail with a [`GatewayError`]: malformed
//! device data is answered on the wire (zero-record acknowledgements) and
//! logged. These errors cover everything around that core: sockets,
//! configuration, the whitelist lookup and the downstream stores.
//!
//! ## Error Categories
//!
//! - **Transport Errors**: socket reads/writes, bind failures
//! - **Protocol Violations**: framing faults that close a connection
//! - **Authorization Errors**: the device registry itself failed (not a rejection)
//! - **Store Errors**: a position/incident/alert collaborator failed
//! - **Configuration Errors**: unreadable or invalid configuration
//!
//! ## Recovery and Retry
//!
//! ```rust
//! use avl_gateway::GatewayError;
//!
//! let error = GatewayError::authorization_failed("registry unreachable");
//! if error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for gateway operations.
pub type Result<T, E = GatewayError> = std::result::Result<T, E>;

/// Boxed error used for collaborator failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Framing faults that terminate a connection without acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolViolation {
    /// Accumulated unconsumed bytes exceeded the buffer cap.
    BufferOverflow { size: usize, limit: usize },
    /// A frame declared a data field larger than the frame cap.
    FrameTooLarge { length: u32, limit: u32 },
    /// No preamble found within the resync window.
    Desynchronized { skipped: usize },
}

impl std::fmt::Display for ProtocolViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolViolation::BufferOverflow { size, limit } => {
                write!(f, "buffer of {} bytes exceeds cap of {}", size, limit)
            }
            ProtocolViolation::FrameTooLarge { length, limit } => {
                write!(f, "declared data field of {} bytes exceeds cap of {}", length, limit)
            }
            ProtocolViolation::Desynchronized { skipped } => {
                write!(f, "no preamble after skipping {} bytes", skipped)
            }
        }
    }
}

/// Main error type for gateway operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GatewayError {
    #[error("Transport error during {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to bind {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Protocol violation: {0}")]
    Protocol(ProtocolViolation),

    #[error("Device authorization check failed: {reason}")]
    Authorization {
        reason: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("Store '{store}' failed: {reason}")]
    Store {
        store: &'static str,
        reason: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("{phase} timed out after {duration:?}")]
    Timeout { phase: &'static str, duration: Duration },

    #[error("Configuration error in {origin}: {details}")]
    Config { origin: String, details: String },

    #[error("Configuration file error: {path}")]
    ConfigFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl GatewayError {
    /// Returns whether retrying the failed operation could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Io { .. } => true,
            GatewayError::Bind { .. } => true,
            GatewayError::Authorization { .. } => true,
            GatewayError::Store { .. } => true,
            GatewayError::Timeout { .. } => true,
            GatewayError::Protocol(_) => false,
            GatewayError::Config { .. } => false,
            GatewayError::ConfigFile { .. } => false,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            GatewayError::Io { .. } => {
                vec!["Check network connectivity to the device", "Wait for the device to reconnect"]
            }
            GatewayError::Bind { .. } => vec![
                "Check that no other process listens on the port",
                "Use a port above 1024 or grant bind privileges",
            ],
            GatewayError::Protocol(_) => vec![
                "Verify the device is configured for Codec 8 or Codec 8 Extended",
                "Check for middleboxes rewriting the TCP stream",
            ],
            GatewayError::Authorization { .. } => vec![
                "Check the device registry is reachable",
                "Review the authorization failure policy",
            ],
            GatewayError::Store { .. } => {
                vec!["Check the downstream store is reachable", "Inspect store logs for rejected writes"]
            }
            GatewayError::Timeout { .. } => {
                vec!["Increase the configured timeout", "Check device reporting interval"]
            }
            GatewayError::Config { .. } | GatewayError::ConfigFile { .. } => vec![
                "Check the configuration file syntax",
                "Verify environment overrides (AVL_LISTEN, AVL_PORTS, AVL_ACCEPT_ALL_DEVICES)",
            ],
        }
    }

    /// Helper constructor for registry failures.
    pub fn authorization_failed(reason: impl Into<String>) -> Self {
        GatewayError::Authorization { reason: reason.into(), source: None }
    }

    /// Helper constructor for registry failures with source.
    pub fn authorization_failed_with_source(reason: impl Into<String>, source: BoxError) -> Self {
        GatewayError::Authorization { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for store failures.
    pub fn store_failed(store: &'static str, reason: impl Into<String>) -> Self {
        GatewayError::Store { store, reason: reason.into(), source: None }
    }

    /// Helper constructor for configuration errors.
    pub fn config(origin: impl Into<String>, details: impl Into<String>) -> Self {
        GatewayError::Config { origin: origin.into(), details: details.into() }
    }
}

impl From<ProtocolViolation> for GatewayError {
    fn from(violation: ProtocolViolation) -> Self {
        GatewayError::Protocol(violation)
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        GatewayError::Io { context: "<unknown>".to_string(), source: err }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
          #[test]
          fn error_messages_carry_their_context(
            reason in ".*",
            size in 0usize..10_000_000usize,
            limit in 0usize..10_000_000usize,
            secs in 1u64..3600u64
          ) {
            let auth = GatewayError::authorization_failed(reason.clone());
            prop_assert!(auth.to_string().contains(&reason));

            let overflow = GatewayError::from(ProtocolViolation::BufferOverflow { size, limit });
            let msg = overflow.to_string();
            prop_assert!(msg.contains(&size.to_string()));
            prop_assert!(msg.contains(&limit.to_string()));

            let timeout = GatewayError::Timeout { phase: "login", duration: Duration::from_secs(secs) };
            prop_assert!(timeout.to_string().starts_with("login"));
          }

          #[test]
          fn source_chain_is_preserved(base in ".*") {
            let source: BoxError = Box::new(std::io::Error::other(base.clone()));
            let err = GatewayError::authorization_failed_with_source("lookup", source);

            let inner = std::error::Error::source(&err).expect("source must be kept");
            prop_assert_eq!(inner.to_string(), base);
          }
        }
    }

    #[test]
    fn error_traits_validation() {
        fn assert_send_sync_static<T: Send + Sync + 'static>() {}
        assert_send_sync_static::<GatewayError>();

        let error = GatewayError::store_failed("positions", "down");
        let _: &dyn std::error::Error = &error;
    }

    #[test]
    fn protocol_violations_are_not_retryable() {
        let violation = GatewayError::from(ProtocolViolation::Desynchronized { skipped: 1024 });
        assert!(!violation.is_retryable());
        assert!(GatewayError::authorization_failed("x").is_retryable());
        assert!(!GatewayError::config("env", "bad").is_retryable());

        for err in [violation, GatewayError::authorization_failed("x")] {
            let suggestions = err.recovery_suggestions();
            assert!(!suggestions.is_empty());
            assert!(suggestions.iter().all(|s| s.len() > 5));
        }
    }

    #[test]
    fn io_errors_convert_with_unknown_context() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        match GatewayError::from(io_err) {
            GatewayError::Io { context, source } => {
                assert_eq!(context, "<unknown>");
                assert_eq!(source.kind(), std::io::ErrorKind::ConnectionReset);
            }
            other => panic!("Expected Io variant, got {other:?}"),
        }
    }
}
