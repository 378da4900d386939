//! Live connection registry and timeout sweep

use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::connection::SessionHandle;
use crate::session::{CloseReason, Phase};

/// All connections of one listener, keyed by a connection id.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: DashMap<u64, Arc<SessionHandle>>,
    next_id: AtomicU64,
    shutdown: CancellationToken,
}

impl SessionRegistry {
    /// Handles registered here are cancelled when `shutdown` fires.
    pub fn new(shutdown: CancellationToken) -> Self {
        Self { sessions: DashMap::new(), next_id: AtomicU64::new(1), shutdown }
    }

    pub fn register(&self, peer: SocketAddr) -> Arc<SessionHandle> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = Arc::new(SessionHandle::new(id, peer, &self.shutdown));
        self.sessions.insert(id, handle.clone());
        handle
    }

    pub fn deregister(&self, id: u64) -> bool {
        self.sessions.remove(&id).is_some()
    }

    pub fn get(&self, id: u64) -> Option<Arc<SessionHandle>> {
        self.sessions.get(&id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Number of connections currently in `phase`.
    pub fn count_in(&self, phase: Phase) -> usize {
        self.sessions.iter().filter(|entry| entry.value().phase() == phase).count()
    }

    /// Cancel connections past their login or idle timeout.
    ///
    /// Connections still waiting for an identifier are measured against
    /// `login`, streaming connections against `idle`. Returns how many were
    /// cancelled.
    pub fn sweep(&self, login: Duration, idle: Duration) -> usize {
        let now = Instant::now();
        let expired: Vec<(Arc<SessionHandle>, CloseReason)> = self
            .sessions
            .iter()
            .filter(|entry| !entry.value().is_cancelled())
            .filter_map(|entry| {
                let handle = entry.value();
                let silent = handle.idle_for(now);
                match handle.phase() {
                    Phase::AwaitingIdentifier if silent > login => Some((handle.clone(), CloseReason::LoginTimeout)),
                    Phase::Streaming if silent > idle => Some((handle.clone(), CloseReason::IdleTimeout)),
                    _ => None,
                }
            })
            .collect();

        for (handle, reason) in &expired {
            warn!(
                peer = %handle.peer(),
                device = ?handle.device().map(|d| d.to_string()),
                reason = %reason,
                silent_secs = handle.idle_for(now).as_secs(),
                "Closing inactive connection"
            );
            handle.cancel(reason.clone());
        }
        if !expired.is_empty() {
            debug!(cancelled = expired.len(), remaining = self.len(), "Sweep finished");
        }
        expired.len()
    }

    /// Cancel every registered connection.
    pub fn cancel_all(&self) {
        for entry in self.sessions.iter() {
            entry.value().cancel(CloseReason::Shutdown);
        }
    }
}

/// Removes a connection from the registry when dropped, including when the
/// connection task panics.
#[derive(Debug)]
pub struct Registration {
    registry: Arc<SessionRegistry>,
    id: u64,
}

impl Registration {
    pub fn new(registry: Arc<SessionRegistry>, id: u64) -> Self {
        Self { registry, id }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.deregister(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DeviceId;

    const LOGIN: Duration = Duration::from_secs(30);
    const IDLE: Duration = Duration::from_secs(600);

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[tokio::test(start_paused = true)]
    async fn login_timeout_only_hits_unidentified_connections() {
        let registry = SessionRegistry::new(CancellationToken::new());
        let waiting = registry.register(peer(1));
        let streaming = registry.register(peer(2));
        streaming.update(Phase::Streaming, Some(&DeviceId::new("356307042441013")));

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(registry.sweep(LOGIN, IDLE), 1);
        assert!(waiting.is_cancelled());
        assert_eq!(waiting.cancel_reason(), CloseReason::LoginTimeout);
        assert!(!streaming.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timeout_respects_activity() {
        let registry = SessionRegistry::new(CancellationToken::new());
        let handle = registry.register(peer(1));
        handle.update(Phase::Streaming, None);

        tokio::time::advance(Duration::from_secs(590)).await;
        handle.touch();
        tokio::time::advance(Duration::from_secs(590)).await;
        assert_eq!(registry.sweep(LOGIN, IDLE), 0);

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(registry.sweep(LOGIN, IDLE), 1);
        assert_eq!(handle.cancel_reason(), CloseReason::IdleTimeout);

        // Already cancelled, not counted again
        assert_eq!(registry.sweep(LOGIN, IDLE), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn validating_connections_are_not_swept() {
        let registry = SessionRegistry::new(CancellationToken::new());
        let handle = registry.register(peer(1));
        handle.update(Phase::Validating, Some(&DeviceId::new("356307042441013")));
        tokio::time::advance(Duration::from_secs(3600)).await;
        assert_eq!(registry.sweep(LOGIN, IDLE), 0);
    }

    #[test]
    fn registration_guard_deregisters() {
        let registry = Arc::new(SessionRegistry::new(CancellationToken::new()));
        let handle = registry.register(peer(1));
        assert_eq!(registry.len(), 1);
        {
            let _registration = Registration::new(registry.clone(), handle.id());
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn shutdown_token_reaches_all_handles() {
        let shutdown = CancellationToken::new();
        let registry = SessionRegistry::new(shutdown.clone());
        let handles: Vec<_> = (0..3).map(|i| registry.register(peer(i))).collect();
        shutdown.cancel();
        assert!(handles.iter().all(|h| h.is_cancelled()));
        assert_eq!(registry.count_in(Phase::AwaitingIdentifier), 3);
    }
}
