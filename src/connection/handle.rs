//! Shared view of one live connection
//!
//! The connection task updates the handle as the session advances. The
//! listener's sweeper reads it to enforce timeouts and cancels the connection
//! through it.

use parking_lot::Mutex;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::session::{CloseReason, Phase};
use crate::types::DeviceId;

#[derive(Debug)]
struct HandleState {
    phase: Phase,
    device: Option<DeviceId>,
    identified_at: Option<Instant>,
    last_activity: Instant,
    cancel_reason: Option<CloseReason>,
}

/// Registry entry for a connection.
#[derive(Debug)]
pub struct SessionHandle {
    id: u64,
    peer: SocketAddr,
    connected_at: Instant,
    state: Mutex<HandleState>,
    cancel: CancellationToken,
}

impl SessionHandle {
    /// Create a handle whose cancellation follows `parent`.
    pub fn new(id: u64, peer: SocketAddr, parent: &CancellationToken) -> Self {
        let now = Instant::now();
        Self {
            id,
            peer,
            connected_at: now,
            state: Mutex::new(HandleState {
                phase: Phase::AwaitingIdentifier,
                device: None,
                identified_at: None,
                last_activity: now,
                cancel_reason: None,
            }),
            cancel: parent.child_token(),
        }
    }

    /// Handle not attached to any listener.
    pub fn detached(peer: SocketAddr) -> Self {
        Self::new(0, peer, &CancellationToken::new())
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn connected_for(&self) -> Duration {
        self.connected_at.elapsed()
    }

    pub fn phase(&self) -> Phase {
        self.state.lock().phase
    }

    pub fn device(&self) -> Option<DeviceId> {
        self.state.lock().device.clone()
    }

    /// Record that bytes arrived.
    pub fn touch(&self) {
        self.state.lock().last_activity = Instant::now();
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.state.lock().last_activity)
    }

    /// Time from accept until the identifier arrived.
    pub fn identified_after(&self) -> Option<Duration> {
        self.state.lock().identified_at.map(|at| at.saturating_duration_since(self.connected_at))
    }

    /// Mirror the session's phase. The device and its arrival time are set once.
    pub fn update(&self, phase: Phase, device: Option<&DeviceId>) {
        let mut state = self.state.lock();
        state.phase = phase;
        if let (true, Some(device)) = (state.device.is_none(), device) {
            state.device = Some(device.clone());
            state.identified_at = Some(Instant::now());
        }
    }

    /// Ask the connection task to close. The first reason given wins.
    pub fn cancel(&self, reason: CloseReason) {
        {
            let mut state = self.state.lock();
            if state.cancel_reason.is_none() {
                state.cancel_reason = Some(reason);
            }
        }
        self.cancel.cancel();
    }

    /// Reason passed to [`cancel`](Self::cancel), `Shutdown` when the parent
    /// token fired instead.
    pub fn cancel_reason(&self) -> CloseReason {
        self.state.lock().cancel_reason.clone().unwrap_or(CloseReason::Shutdown)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }
}
