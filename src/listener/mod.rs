//! TCP listener accepting device connections on one or more ports
//!
//! Every port runs the same protocol; extra ports exist for networks that
//! block the primary one. Each accepted socket gets its own task running
//! [`serve`], registered in the [`SessionRegistry`] until it ends. A panic in
//! one connection task ends only that connection.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use avl_gateway::{Collaborators, GatewayConfig, Listener, stores::TracingStore};
//! use std::sync::Arc;
//!
//! # async fn example() -> avl_gateway::Result<()> {
//! let config = GatewayConfig::default();
//! let listener = Listener::from_config(&config, Collaborators::from_store(Arc::new(TracingStore))).await?;
//!
//! let shutdown = listener.shutdown_token();
//! tokio::spawn(async move {
//!     let _ = tokio::signal::ctrl_c().await;
//!     shutdown.cancel();
//! });
//!
//! listener.run().await;
//! # Ok(())
//! # }
//! ```

mod registry;

pub use registry::{Registration, SessionRegistry};

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::collaborators::Collaborators;
use crate::config::{GatewayConfig, TimeoutConfig};
use crate::connection::{ConnectionContext, serve};
use crate::{GatewayError, Result};

/// Back-off after a failed accept (e.g. file descriptor exhaustion).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Bound sockets ready to accept device connections.
#[derive(Debug)]
pub struct Listener {
    sockets: Vec<TcpListener>,
    ctx: Arc<ConnectionContext>,
    registry: Arc<SessionRegistry>,
    timeouts: TimeoutConfig,
    shutdown: CancellationToken,
}

impl Listener {
    /// Bind every address in `addrs`. Fails if any address cannot be bound.
    pub async fn bind(addrs: &[SocketAddr], ctx: ConnectionContext, timeouts: TimeoutConfig) -> Result<Self> {
        if addrs.is_empty() {
            return Err(GatewayError::config("listen", "at least one address is required"));
        }

        let mut sockets = Vec::with_capacity(addrs.len());
        for &addr in addrs {
            let socket = TcpListener::bind(addr).await.map_err(|source| GatewayError::Bind { addr, source })?;
            sockets.push(socket);
        }

        let shutdown = CancellationToken::new();
        let registry = Arc::new(SessionRegistry::new(shutdown.child_token()));
        Ok(Self { sockets, ctx: Arc::new(ctx), registry, timeouts, shutdown })
    }

    /// Validate `config` and bind its listen addresses.
    pub async fn from_config(config: &GatewayConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;
        let ctx = ConnectionContext {
            authorizer: config.authorizer(),
            rules: Arc::new(config.alert_rules()),
            collaborators,
            limits: config.session_limits(),
        };
        Self::bind(&config.listen, ctx, config.timeouts).await
    }

    /// Actual bound addresses (resolves port 0).
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.sockets.iter().filter_map(|s| s.local_addr().ok()).collect()
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        self.registry.clone()
    }

    /// Cancelling this token stops accepting and closes every connection.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Accept connections until the shutdown token fires.
    pub async fn run(self) {
        let Listener { sockets, ctx, registry, timeouts, shutdown } = self;

        for socket in &sockets {
            if let Ok(addr) = socket.local_addr() {
                info!(addr = %addr, auth_failure_policy = ?ctx.authorizer.policy(), "Listening for AVL devices");
            }
        }

        let sweeper = tokio::spawn(sweep_loop(registry.clone(), timeouts, shutdown.clone()));
        let accept_loops = sockets
            .into_iter()
            .map(|socket| accept_loop(socket, ctx.clone(), registry.clone(), shutdown.clone()));
        futures::future::join_all(accept_loops).await;

        registry.cancel_all();
        if let Err(e) = sweeper.await {
            error!(error = %e, "Sweeper task failed");
        }
        info!(open_connections = registry.len(), "Listener stopped");
    }
}

async fn accept_loop(
    socket: TcpListener,
    ctx: Arc<ConnectionContext>,
    registry: Arc<SessionRegistry>,
    shutdown: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = socket.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => spawn_connection(stream, peer, ctx.clone(), registry.clone()),
            Err(e) => {
                warn!(error = %e, "Accept failed");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

fn spawn_connection(stream: TcpStream, peer: SocketAddr, ctx: Arc<ConnectionContext>, registry: Arc<SessionRegistry>) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
    }

    let handle = registry.register(peer);
    let registration = Registration::new(registry, handle.id());
    let span = info_span!("connection", id = handle.id(), peer = %peer, device = tracing::field::Empty);

    tokio::spawn(
        async move {
            let _registration = registration;
            serve(stream, ctx, handle).await;
        }
        .instrument(span),
    );
}

async fn sweep_loop(registry: Arc<SessionRegistry>, timeouts: TimeoutConfig, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(timeouts.sweep_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                registry.sweep(timeouts.login, timeouts.idle);
            }
        }
    }
}
