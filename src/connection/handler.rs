//! Socket driver for one device connection

use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tracing::{Span, debug, info, warn};

use super::dispatch::Dispatcher;
use super::handle::SessionHandle;
use crate::auth::{Authorizer, Verdict};
use crate::classifier::AlertRules;
use crate::collaborators::Collaborators;
use crate::session::{Action, CloseReason, Session, SessionLimits, SessionStats};

const READ_CHUNK: usize = 4096;
/// Upper bound on flushing the write side after the session closed.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Everything a connection needs besides its socket. Shared by all
/// connections of a listener.
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    pub authorizer: Authorizer,
    pub rules: Arc<AlertRules>,
    pub collaborators: Collaborators,
    pub limits: SessionLimits,
}

/// How a connection ended.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSummary {
    pub reason: CloseReason,
    pub stats: SessionStats,
}

enum Event {
    Read(std::io::Result<usize>),
    Authorized(Verdict),
    Cancelled,
}

/// Drive `stream` through the session state machine until it closes.
///
/// Never returns an error: transport faults and protocol violations end the
/// connection and are reported in the summary. Records still queued for the
/// collaborators keep flowing after this returns.
pub async fn serve<S>(stream: S, ctx: Arc<ConnectionContext>, handle: Arc<SessionHandle>) -> ConnectionSummary
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut session = Session::new(ctx.limits);
    let (dispatcher, _delivery) = Dispatcher::spawn(ctx.rules.clone(), ctx.collaborators.clone());
    let mut authorization: Option<BoxFuture<'static, Verdict>> = None;
    let mut buf = vec![0u8; READ_CHUNK];

    info!(peer = %handle.peer(), "Connection accepted");

    while !session.is_closed() {
        let event = tokio::select! {
            _ = handle.cancelled() => Event::Cancelled,
            verdict = await_verdict(&mut authorization), if authorization.is_some() => Event::Authorized(verdict),
            read = reader.read(&mut buf) => Event::Read(read),
        };

        let actions = match event {
            Event::Cancelled => session.close(handle.cancel_reason()),
            Event::Authorized(verdict) => {
                authorization = None;
                session.resolve_authorization(verdict)
            }
            Event::Read(Ok(0)) => session.close(CloseReason::PeerClosed),
            Event::Read(Ok(n)) => {
                handle.touch();
                session.feed(&buf[..n])
            }
            Event::Read(Err(e)) => {
                warn!(error = %e, "Socket read failed");
                session.close(CloseReason::Transport(e.to_string()))
            }
        };

        for action in actions {
            match action {
                Action::Reply(reply) => {
                    if let Err(reason) = write_reply(&mut writer, &reply.to_bytes(), &handle).await {
                        session.close(reason);
                        break;
                    }
                    debug!(reply = ?reply, "Acknowledgement sent");
                }
                Action::Authorize(device) => {
                    Span::current().record("device", device.as_str());
                    let authorizer = ctx.authorizer.clone();
                    authorization = Some(Box::pin(async move { authorizer.authorize(&device).await }));
                }
                Action::Deliver { device, records } => {
                    if !dispatcher.dispatch(device, records) {
                        warn!("Delivery task stopped, dropping records");
                    }
                }
                Action::Close(_) => {}
            }
        }
        handle.update(session.phase(), session.device());
    }

    // The peer may already be gone or may have stopped reading
    let _ = tokio::time::timeout(SHUTDOWN_GRACE, writer.shutdown()).await;

    let reason = session.close_reason().cloned().unwrap_or(CloseReason::PeerClosed);
    let stats = session.stats();
    let idle_secs = handle.idle_for(Instant::now()).as_secs();
    info!(
        peer = %handle.peer(),
        device = ?session.device().map(|d| d.as_str()),
        reason = %reason,
        connected_secs = handle.connected_for().as_secs(),
        identified_after_ms = ?handle.identified_after().map(|d| d.as_millis()),
        idle_secs,
        bytes_received = stats.bytes_received,
        frames_acked = stats.frames_acked,
        frames_rejected = stats.frames_rejected,
        records_delivered = stats.records_delivered,
        resync_bytes = stats.resync_bytes,
        "Connection closed"
    );

    ConnectionSummary { reason, stats }
}

/// Write one acknowledgement, racing the handle's cancellation.
///
/// Returns the cancel reason if the handle fires while the write is pending.
async fn write_reply<W>(writer: &mut W, bytes: &[u8], handle: &SessionHandle) -> Result<(), CloseReason>
where
    W: AsyncWrite + Unpin,
{
    tokio::select! {
        biased;
        _ = handle.cancelled() => Err(handle.cancel_reason()),
        written = writer.write_all(bytes) => written.map_err(|e| {
            warn!(error = %e, "Socket write failed");
            CloseReason::Transport(e.to_string())
        }),
    }
}

async fn await_verdict(pending: &mut Option<BoxFuture<'static, Verdict>>) -> Verdict {
    match pending {
        Some(future) => future.await,
        None => std::future::pending().await,
    }
}
