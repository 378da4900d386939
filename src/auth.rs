//! Device authorization at the login handshake
//!
//! An explicit rejection from the registry always rejects the device. When the
//! registry lookup itself fails or exceeds its deadline, the configured
//! [`FailurePolicy`] decides: `FailOpen` keeps devices reporting while the
//! control plane is unreachable, `FailClosed` enforces the whitelist strictly.

use dashmap::DashSet;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::{GatewayError, Result};
use crate::collaborators::DeviceRegistry;
use crate::types::DeviceId;

/// What to do when the registry cannot answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Accept the device and log the degradation
    #[default]
    FailOpen,
    /// Reject the device
    FailClosed,
}

/// Outcome of an authorization check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    Rejected,
}

/// Registry check with a deadline and a failure policy.
#[derive(Clone)]
pub struct Authorizer {
    registry: Arc<dyn DeviceRegistry>,
    policy: FailurePolicy,
    deadline: Duration,
}

impl Authorizer {
    pub fn new(registry: Arc<dyn DeviceRegistry>, policy: FailurePolicy, deadline: Duration) -> Self {
        Self { registry, policy, deadline }
    }

    /// Authorizer that accepts every device.
    pub fn allow_all() -> Self {
        Self::new(Arc::new(AllowAll), FailurePolicy::FailOpen, Duration::from_secs(1))
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Decide whether `device` may stream telemetry.
    pub async fn authorize(&self, device: &DeviceId) -> Verdict {
        let failure = match tokio::time::timeout(self.deadline, self.registry.is_authorized(device)).await {
            Ok(Ok(true)) => {
                debug!(device = %device, "Device authorized");
                return Verdict::Accepted;
            }
            Ok(Ok(false)) => {
                warn!(device = %device, "Device not in whitelist");
                return Verdict::Rejected;
            }
            Ok(Err(e)) => e,
            Err(_) => GatewayError::Timeout { phase: "authorization", duration: self.deadline },
        };

        match self.policy {
            FailurePolicy::FailOpen => {
                warn!(device = %device, error = %failure, "Whitelist check failed, accepting device (fail-open)");
                Verdict::Accepted
            }
            FailurePolicy::FailClosed => {
                warn!(device = %device, error = %failure, "Whitelist check failed, rejecting device (fail-closed)");
                Verdict::Rejected
            }
        }
    }
}

impl std::fmt::Debug for Authorizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authorizer").field("policy", &self.policy).field("deadline", &self.deadline).finish()
    }
}

/// Registry that accepts every device (whitelist bypass).
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait::async_trait]
impl DeviceRegistry for AllowAll {
    async fn is_authorized(&self, _device: &DeviceId) -> Result<bool> {
        Ok(true)
    }
}

/// In-process whitelist, safe to update while connections are checking it.
#[derive(Debug, Default)]
pub struct StaticWhitelist {
    devices: DashSet<DeviceId>,
}

impl StaticWhitelist {
    pub fn new<I>(devices: I) -> Self
    where
        I: IntoIterator<Item = DeviceId>,
    {
        Self { devices: devices.into_iter().collect() }
    }

    pub fn insert(&self, device: DeviceId) -> bool {
        self.devices.insert(device)
    }

    pub fn remove(&self, device: &DeviceId) -> bool {
        self.devices.remove(device).is_some()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[async_trait::async_trait]
impl DeviceRegistry for StaticWhitelist {
    async fn is_authorized(&self, device: &DeviceId) -> Result<bool> {
        Ok(self.devices.contains(device))
    }
}
