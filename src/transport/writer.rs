//! Connection writer task.
//!
//! The single owner of a connection's outbound half. Command handlers never
//! touch the transport; they push encoded frames into a bounded [`mpsc`]
//! queue and this task writes them one at a time, so frames can never
//! interleave.

use std::time::Duration;

use futures_util::SinkExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::transport::FrameSink;
use crate::{AppError, Result};

/// Upper bound on the closing handshake of a possibly half-open socket.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Sending half of a connection's outbound queue.
pub type Outbound = mpsc::Sender<String>;

/// Drain `frame_rx` into `sink` until cancelled or the queue closes.
///
/// On a write failure the task cancels `cancel` itself, so the read loop
/// sharing that token notices the broken connection immediately.
///
/// The task exits cleanly when:
/// - `cancel` is triggered (connection teardown or shutdown), or
/// - `frame_rx` is closed (all senders dropped).
///
/// # Errors
///
/// Returns [`AppError::Transport`]`("write failed: …")` if the sink rejects a
/// frame.
pub async fn run_writer(
    connection_id: u64,
    mut sink: FrameSink,
    mut frame_rx: mpsc::Receiver<String>,
    cancel: CancellationToken,
) -> Result<()> {
    let outcome = loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(connection_id, "writer: cancellation received, stopping");
                break Ok(());
            }

            frame = frame_rx.recv() => {
                let Some(frame) = frame else {
                    debug!(connection_id, "writer: outbound queue closed, stopping");
                    break Ok(());
                };

                let written = tokio::select! {
                    biased;
                    () = cancel.cancelled() => break Ok(()),
                    written = sink.send(frame) => written,
                };

                if let Err(err) = written {
                    warn!(connection_id, error = %err, "writer: write failed");
                    cancel.cancel();
                    break Err(AppError::Transport(format!("write failed: {err}")));
                }
            }
        }
    };

    // Best effort: a closing handshake on an already broken socket fails.
    match tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => debug!(connection_id, error = %err, "writer: close failed"),
        Err(_) => debug!(connection_id, "writer: close timed out"),
    }

    outcome
}
