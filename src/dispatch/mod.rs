//! Frame dispatcher - accept loop, routing, and the tick deadline

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::app::AppState;
use crate::bot::registry::{FrameJob, SubmitError};
use crate::bot::{BotHandle, SpawnInfo};
use crate::util::time::Timer;
use crate::wire::codec;
use crate::wire::{ControlOutput, GameTickSnapshot};

/// Owns the listening socket and drives every frame from bytes to reply
pub struct FrameDispatcher {
    state: AppState,
    conn_seq: AtomicU64,
}

impl FrameDispatcher {
    pub fn new(state: AppState) -> Self {
        Self {
            state,
            conn_seq: AtomicU64::new(1),
        }
    }

    /// Accept engine connections until the shutdown future resolves
    ///
    /// Connection loss retires that connection's bots and the loop keeps
    /// accepting; only the caller failing to bind is fatal.
    pub async fn run(self, listener: TcpListener, shutdown: impl Future<Output = ()>) {
        if let Ok(addr) = listener.local_addr() {
            info!(addr = %addr, "Listening for engine connections");
        }

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let conn_id = self.conn_seq.fetch_add(1, Ordering::Relaxed);
                        info!(conn_id, peer = %peer, "Engine connected");
                        let state = self.state.clone();
                        tokio::spawn(handle_connection(stream, conn_id, state));
                    }
                    Err(e) => {
                        warn!(error = %e, "Accept failed");
                    }
                },
                _ = &mut shutdown => {
                    info!("Shutdown signal received, draining bots");
                    break;
                }
            }
        }

        let registry = &self.state.registry;
        info!(bots = registry.len(), "Retiring all bots");
        registry.retire_all();

        if timeout(self.state.config.shutdown_grace, registry.drained())
            .await
            .is_err()
        {
            warn!("Shutdown grace period expired with bot workers still live");
        }
    }
}

/// Read loop for one engine connection
///
/// Responses flow through a writer task so one slow bot never stalls
/// frames addressed to another index.
async fn handle_connection(stream: TcpStream, conn_id: u64, state: AppState) {
    let (mut reader, mut writer) = stream.into_split();

    let (resp_tx, mut resp_rx) = mpsc::channel::<Bytes>(64);
    let writer_task = tokio::spawn(async move {
        while let Some(bytes) = resp_rx.recv().await {
            if let Err(e) = writer.write_all(&bytes).await {
                debug!(error = %e, "Response write failed");
                break;
            }
        }
    });

    let mut buf = BytesMut::with_capacity(8 * 1024);

    'conn: loop {
        loop {
            match codec::extract_frame(&mut buf) {
                Ok(Some(frame)) => match codec::decode_snapshot(&frame) {
                    Ok(snapshot) => route_frame(&state, conn_id, snapshot, &resp_tx),
                    Err(e) => {
                        warn!(conn_id, error = %e, "Dropping malformed frame");
                    }
                },
                Ok(None) => break,
                Err(e) => {
                    error!(conn_id, error = %e, "Framing desync, closing connection");
                    break 'conn;
                }
            }
        }

        match reader.read_buf(&mut buf).await {
            Ok(0) => {
                info!(conn_id, "Engine disconnected");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(conn_id, error = %e, "Socket read failed");
                break;
            }
        }
    }

    state.registry.retire_connection(conn_id);
    writer_task.abort();
    info!(conn_id, "Connection closed");
}

/// Resolve the target bot and spawn the per-frame dispatch task
fn route_frame(
    state: &AppState,
    conn_id: u64,
    snapshot: GameTickSnapshot,
    resp_tx: &mpsc::Sender<Bytes>,
) {
    let handle = match state.registry.lookup(snapshot.player_index) {
        Some(handle) => handle,
        None => {
            // First contact for this index: implicit creation request.
            let spawn = SpawnInfo::from_snapshot(&snapshot);
            state.registry.ensure(&spawn, conn_id, &state.factory)
        }
    };

    let budget = state.config.tick_budget;
    let resp_tx = resp_tx.clone();
    tokio::spawn(async move {
        if let Some(bytes) = dispatch_frame(handle, snapshot, budget).await {
            let _ = resp_tx.send(bytes).await;
        }
    });
}

/// Drive one frame to a reply within the tick budget
///
/// Never blocks past the budget: a policy that overruns is answered with
/// its last cached output (or neutral), and its eventual result is kept
/// for the next tick rather than delivered late.
async fn dispatch_frame(
    handle: BotHandle,
    snapshot: GameTickSnapshot,
    budget: Duration,
) -> Option<Bytes> {
    let index = snapshot.player_index;
    let frame = snapshot.frame;

    if handle.is_retired() {
        if handle.construction_failed() {
            return Some(codec::encode_control(index, frame, &ControlOutput::NEUTRAL));
        }
        warn!(index, frame, "Dropping frame for retired bot");
        return None;
    }

    let (reply_tx, reply_rx) = oneshot::channel();
    let job = FrameJob {
        snapshot,
        reply: reply_tx,
    };

    match handle.try_submit(job) {
        Ok(()) => {
            let timer = Timer::new();
            match timeout(budget, reply_rx).await {
                Ok(Ok(output)) => Some(codec::encode_control(index, frame, &output)),
                Ok(Err(_)) => {
                    warn!(index, frame, "Bot worker dropped the reply, serving fallback");
                    Some(codec::encode_control(index, frame, &handle.last_or_neutral()))
                }
                Err(_) => {
                    debug!(
                        index,
                        frame,
                        elapsed_ms = timer.elapsed_ms(),
                        budget_ms = budget.as_millis() as u64,
                        "Tick budget exceeded, serving cached output"
                    );
                    Some(codec::encode_control(index, frame, &handle.last_or_neutral()))
                }
            }
        }
        Err(SubmitError::Busy) => {
            debug!(index, frame, "Bot worker still busy, serving cached output");
            Some(codec::encode_control(index, frame, &handle.last_or_neutral()))
        }
        Err(SubmitError::Closed) => {
            warn!(index, frame, "Dropping frame for retired bot");
            None
        }
    }
}
