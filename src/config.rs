//! Gateway configuration
//!
//! Values are layered, lowest precedence first:
//!
//! 1. built-in defaults
//! 2. a YAML file ([`GatewayConfig::from_file`])
//! 3. environment variables ([`GatewayConfig::apply_env`])
//! 4. command line flags (applied by the binary)
//!
//! ```yaml
//! listen: ["0.0.0.0:5000", "0.0.0.0:5027"]
//! accept_all_devices: false
//! whitelist: ["356307042441013"]
//! auth_failure_policy: fail_closed
//! timeouts:
//!   idle: 900
//! classifier:
//!   event_mappings:
//!     - { event_io_id: 175, alert: harsh_braking }
//! ```
//!
//! Durations are whole seconds.

use serde::{Deserialize, Deserializer};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::auth::{AllowAll, Authorizer, FailurePolicy, StaticWhitelist};
use crate::classifier::{AlertRules, EventMapping, IoCondition};
use crate::codec::frame_len;
use crate::session::SessionLimits;
use crate::types::DeviceId;
use crate::{GatewayError, Result};

/// Comma-separated `host:port` list to listen on.
pub const ENV_LISTEN: &str = "AVL_LISTEN";
/// Comma-separated ports bound on all interfaces.
pub const ENV_PORTS: &str = "AVL_PORTS";
/// Whitelist bypass; `false`, `0` and `no` disable it.
pub const ENV_ACCEPT_ALL: &str = "AVL_ACCEPT_ALL_DEVICES";
/// Path of the YAML configuration file.
pub const ENV_CONFIG: &str = "AVL_CONFIG";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatewayConfig {
    pub listen: Vec<SocketAddr>,
    /// Accept every well-formed identifier without consulting the whitelist
    pub accept_all_devices: bool,
    pub whitelist: Vec<DeviceId>,
    pub auth_failure_policy: FailurePolicy,
    pub require_imei: bool,
    pub limits: LimitsConfig,
    pub timeouts: TimeoutConfig,
    pub classifier: ClassifierConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen: vec![SocketAddr::from(([0, 0, 0, 0], 5000))],
            accept_all_devices: true,
            whitelist: Vec::new(),
            auth_failure_policy: FailurePolicy::FailOpen,
            require_imei: true,
            limits: LimitsConfig::default(),
            timeouts: TimeoutConfig::default(),
            classifier: ClassifierConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    pub max_identifier_len: usize,
    pub max_buffer_bytes: usize,
    pub max_data_field_len: u32,
    pub max_resync_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        let limits = SessionLimits::default();
        Self {
            max_identifier_len: limits.max_identifier_len,
            max_buffer_bytes: limits.max_buffer_bytes,
            max_data_field_len: limits.max_data_field_len,
            max_resync_bytes: limits.max_resync_bytes,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimeoutConfig {
    /// Identifier must arrive within this after connecting
    #[serde(deserialize_with = "seconds")]
    pub login: Duration,
    /// Streaming connections silent for longer are closed
    #[serde(deserialize_with = "seconds")]
    pub idle: Duration,
    /// Registry lookup deadline; expiry counts as a registry failure
    #[serde(deserialize_with = "seconds")]
    pub authorization: Duration,
    #[serde(deserialize_with = "seconds")]
    pub sweep_interval: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            login: Duration::from_secs(30),
            idle: Duration::from_secs(600),
            authorization: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(15),
        }
    }
}

/// Entries added on top of the built-in classifier tables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClassifierConfig {
    pub event_mappings: Vec<EventMapping>,
    pub io_conditions: Vec<IoCondition>,
}

fn seconds<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_secs)
}

impl GatewayConfig {
    /// Parse YAML. `origin` names the source in error messages.
    pub fn from_yaml_str(yaml: &str, origin: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml_ng::from_str(yaml).map_err(|e| GatewayError::config(origin, e.to_string()))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .map_err(|source| GatewayError::ConfigFile { path: path.to_path_buf(), source })?;
        Self::from_yaml_str(&yaml, &path.display().to_string())
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`.
    ///
    /// When `AVL_LISTEN` or `AVL_PORTS` is set the listen list is replaced by
    /// the union of both.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let listen = lookup(ENV_LISTEN);
        let ports = lookup(ENV_PORTS);
        if listen.is_some() || ports.is_some() {
            let mut addrs = Vec::new();
            if let Some(listen) = listen {
                for item in split_list(&listen) {
                    let addr = item
                        .parse::<SocketAddr>()
                        .map_err(|e| GatewayError::config(ENV_LISTEN, format!("'{}': {}", item, e)))?;
                    push_unique(&mut addrs, addr);
                }
            }
            if let Some(ports) = ports {
                for item in split_list(&ports) {
                    let port =
                        item.parse::<u16>().map_err(|e| GatewayError::config(ENV_PORTS, format!("'{}': {}", item, e)))?;
                    push_unique(&mut addrs, SocketAddr::from(([0, 0, 0, 0], port)));
                }
            }
            self.listen = addrs;
        }

        if let Some(flag) = lookup(ENV_ACCEPT_ALL) {
            self.accept_all_devices = parse_flag(&flag);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.listen.is_empty() {
            return Err(GatewayError::config("listen", "at least one address is required"));
        }

        let limits = &self.limits;
        for (name, value) in [
            ("limits.max_identifier_len", limits.max_identifier_len),
            ("limits.max_buffer_bytes", limits.max_buffer_bytes),
            ("limits.max_data_field_len", limits.max_data_field_len as usize),
            ("limits.max_resync_bytes", limits.max_resync_bytes),
        ] {
            if value == 0 {
                return Err(GatewayError::config(name, "must be greater than zero"));
            }
        }
        if frame_len(limits.max_data_field_len) > limits.max_buffer_bytes {
            return Err(GatewayError::config(
                "limits.max_buffer_bytes",
                format!("must hold a full frame of {} bytes", frame_len(limits.max_data_field_len)),
            ));
        }

        let timeouts = &self.timeouts;
        for (name, value) in [
            ("timeouts.login", timeouts.login),
            ("timeouts.idle", timeouts.idle),
            ("timeouts.authorization", timeouts.authorization),
            ("timeouts.sweep_interval", timeouts.sweep_interval),
        ] {
            if value.is_zero() {
                return Err(GatewayError::config(name, "must be at least one second"));
            }
        }

        if timeouts.idle <= timeouts.login {
            warn!(idle = ?timeouts.idle, login = ?timeouts.login, "Idle timeout is not longer than login timeout");
        }
        if !self.accept_all_devices && self.whitelist.is_empty() {
            warn!("Whitelist is empty and bypass is disabled, every device will be rejected");
        }
        Ok(())
    }

    pub fn session_limits(&self) -> SessionLimits {
        SessionLimits {
            max_identifier_len: self.limits.max_identifier_len,
            max_buffer_bytes: self.limits.max_buffer_bytes,
            max_data_field_len: self.limits.max_data_field_len,
            max_resync_bytes: self.limits.max_resync_bytes,
            require_imei: self.require_imei,
        }
    }

    /// Built-in tables plus the configured entries.
    pub fn alert_rules(&self) -> AlertRules {
        let mut rules = AlertRules::teltonika_defaults();
        rules.extend(&self.classifier.event_mappings, &self.classifier.io_conditions);
        rules
    }

    /// Authorizer over the configured whitelist, or accepting everything.
    pub fn authorizer(&self) -> Authorizer {
        if self.accept_all_devices {
            Authorizer::new(Arc::new(AllowAll), self.auth_failure_policy, self.timeouts.authorization)
        } else {
            let whitelist = StaticWhitelist::new(self.whitelist.iter().cloned());
            Authorizer::new(Arc::new(whitelist), self.auth_failure_policy, self.timeouts.authorization)
        }
    }
}

/// `false`, `0` and `no` (any case) are false; everything else is true.
pub fn parse_flag(value: &str) -> bool {
    !matches!(value.trim().to_ascii_lowercase().as_str(), "false" | "0" | "no")
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn push_unique(addrs: &mut Vec<SocketAddr>, addr: SocketAddr) {
    if !addrs.contains(&addr) {
        addrs.push(addr);
    }
}
