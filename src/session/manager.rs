//! Session manager: the connect / identify / read / retry loop.
//!
//! One [`SessionManager`] runs per process and owns at most one coordinator
//! transport at a time. Per connection it:
//!
//! 1. writes `id|<peerId>` before anything else,
//! 2. spawns the single writer task fed by a bounded outbound queue,
//! 3. reads frames, answering heartbeats inline and handing every other
//!    command to a tracked task so slow store calls never hold up the reader,
//! 4. tears everything down on a read/write failure or idle timeout and
//!    retries after a cooldown.
//!
//! Replies from handlers that outlive their connection are discarded: the
//! outbound queue dies with the writer, so nothing reaches a stale or later
//! transport.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::GlobalConfig;
use crate::dispatcher::CommandDispatcher;
use crate::protocol::{Command, Reply};
use crate::session::heartbeat::HeartbeatMonitor;
use crate::session::{Session, SessionState};
use crate::store::ContentStore;
use crate::transport::writer::{run_writer, Outbound};
use crate::transport::{self, Connection};

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SessionEnd {
    /// The shutdown token fired.
    Shutdown,
    /// The transport failed or went idle.
    Lost(String),
}

/// Owner of the coordinator session.
pub struct SessionManager {
    config: Arc<GlobalConfig>,
    peer_id: String,
    dispatcher: Arc<CommandDispatcher>,
    session_tx: watch::Sender<Session>,
    tracker: TaskTracker,
}

impl SessionManager {
    /// Build a manager presenting `peer_id` and serving commands from `store`.
    #[must_use]
    pub fn new(config: Arc<GlobalConfig>, peer_id: String, store: Arc<dyn ContentStore>) -> Self {
        let dispatcher = Arc::new(CommandDispatcher::new(store, &config.store));
        let (session_tx, _) = watch::channel(Session::new(peer_id.clone()));
        Self {
            config,
            peer_id,
            dispatcher,
            session_tx,
            tracker: TaskTracker::new(),
        }
    }

    /// Observe session state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.session_tx.subscribe()
    }

    /// Snapshot of the current session.
    #[must_use]
    pub fn session(&self) -> Session {
        self.session_tx.borrow().clone()
    }

    /// Keep a session alive until `shutdown` fires.
    ///
    /// Dial failures and lost sessions are logged and retried forever with
    /// the configured cooldowns. On shutdown, in-flight commands get the
    /// configured grace period before this returns.
    pub async fn run(&self, shutdown: CancellationToken) {
        let url = self.config.coordinator_url.as_str();
        let span = info_span!("session", peer_id = %self.peer_id);

        async {
            loop {
                self.transition(SessionState::Connecting);
                info!(url, "connecting to coordinator");

                let dialed = tokio::select! {
                    biased;
                    () = shutdown.cancelled() => break,
                    dialed = transport::connect(url, &self.config.transport) => dialed,
                };

                let cooldown = match dialed {
                    Ok(connection) => {
                        let end = self.serve(connection, &shutdown).await;
                        self.transition(SessionState::Disconnected);
                        match end {
                            SessionEnd::Shutdown => break,
                            SessionEnd::Lost(reason) => {
                                warn!(reason = %reason, "coordinator session lost");
                                self.config.session.reconnect_delay()
                            }
                        }
                    }
                    Err(err) => {
                        self.transition(SessionState::Disconnected);
                        warn!(url, error = %err, "dial failed");
                        self.config.session.dial_retry()
                    }
                };

                info!(delay_secs = cooldown.as_secs(), "reconnecting after cooldown");
                tokio::select! {
                    biased;
                    () = shutdown.cancelled() => break,
                    () = tokio::time::sleep(cooldown) => {}
                }
            }

            self.transition(SessionState::Disconnected);
            self.drain(self.config.session.shutdown_grace()).await;
            info!("session manager stopped");
        }
        .instrument(span)
        .await;
    }

    /// Serve one open connection until it fails, idles out, or shutdown.
    async fn serve(&self, connection: Connection, shutdown: &CancellationToken) -> SessionEnd {
        let Connection {
            mut sink,
            mut stream,
        } = connection;

        self.transition(SessionState::Identifying);
        let connection_id = self.session_tx.borrow().connection_id;

        let identity = Reply::Identity {
            peer_id: self.peer_id.clone(),
        };
        match tokio::time::timeout(
            self.config.transport.handshake_timeout(),
            sink.send(identity.encode()),
        )
        .await
        {
            Ok(Ok(())) => info!(connection_id, "identified to coordinator"),
            Ok(Err(err)) => return SessionEnd::Lost(format!("identity write failed: {err}")),
            Err(_) => return SessionEnd::Lost("identity write timed out".into()),
        }

        let connection_cancel = shutdown.child_token();
        let (outbound, outbound_rx) = mpsc::channel(self.config.transport.outbound_queue);
        let writer = tokio::spawn(run_writer(
            connection_id,
            sink,
            outbound_rx,
            connection_cancel.clone(),
        ));

        self.transition(SessionState::Active);
        let idle_window = self.config.session.idle_window();
        let mut monitor = HeartbeatMonitor::new(idle_window);

        let end = loop {
            tokio::select! {
                biased;

                () = connection_cancel.cancelled() => {
                    break if shutdown.is_cancelled() {
                        SessionEnd::Shutdown
                    } else {
                        SessionEnd::Lost("outbound write failed".into())
                    };
                }

                () = tokio::time::sleep_until(monitor.deadline()) => {
                    break SessionEnd::Lost(format!(
                        "no inbound frame for {}s",
                        idle_window.as_secs()
                    ));
                }

                frame = stream.next() => {
                    let raw = match frame {
                        None => break SessionEnd::Lost("connection closed".into()),
                        Some(Err(err)) if err.is_recoverable_frame_error() => {
                            monitor.record_activity();
                            warn!(connection_id, error = %err, "dropping unreadable frame");
                            continue;
                        }
                        Some(Err(err)) => break SessionEnd::Lost(err.to_string()),
                        Some(Ok(raw)) => raw,
                    };

                    monitor.record_activity();
                    self.session_tx
                        .send_modify(|session| session.last_activity = Some(Utc::now()));
                    self.route(Command::decode(&raw), connection_id, &outbound).await;
                }
            }
        };

        connection_cancel.cancel();
        drop(outbound);
        match writer.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => debug!(connection_id, error = %err, "writer ended with error"),
            Err(err) => warn!(connection_id, error = %err, "writer task panicked"),
        }

        debug!(
            connection_id,
            frames = monitor.frames_seen(),
            "connection torn down"
        );
        end
    }

    /// Answer inline commands directly; run the rest on a tracked task.
    ///
    /// Inline replies never wait for queue space: a stalled writer must not
    /// stop the read loop from watching its idle deadline.
    async fn route(&self, command: Command, connection_id: u64, outbound: &Outbound) {
        if command.is_inline() {
            if let Some(reply) = self.dispatcher.dispatch(command).await {
                match outbound.try_send(reply.encode()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        warn!(connection_id, "outbound queue full, inline reply dropped");
                    }
                    Err(TrySendError::Closed(_)) => {
                        debug!(connection_id, "outbound queue closed, inline reply discarded");
                    }
                }
            }
            return;
        }

        let span = info_span!(
            "command",
            connection_id,
            verb = command.verb(),
            request_id = command.request_id()
        );
        let dispatcher = Arc::clone(&self.dispatcher);
        let outbound = outbound.clone();

        self.tracker.spawn(
            async move {
                if let Some(reply) = dispatcher.dispatch(command).await {
                    if outbound.send(reply.encode()).await.is_err() {
                        debug!("connection ended before the reply was written, discarding");
                    }
                }
            }
            .instrument(span),
        );
    }

    /// Wait up to `grace` for in-flight commands.
    async fn drain(&self, grace: Duration) {
        self.tracker.close();
        if self.tracker.is_empty() {
            return;
        }

        info!(in_flight = self.tracker.len(), "waiting for in-flight commands");
        if tokio::time::timeout(grace, self.tracker.wait()).await.is_err() {
            warn!(
                abandoned = self.tracker.len(),
                "grace period elapsed with commands still running"
            );
        }
    }

    fn transition(&self, next: SessionState) {
        self.session_tx.send_if_modified(|session| {
            if session.state == next {
                return false;
            }
            if !session.can_transition_to(next) {
                warn!(from = ?session.state, to = ?next, "unexpected session transition");
            }
            debug!(from = ?session.state, to = ?next, "session state change");

            session.state = next;
            match next {
                SessionState::Identifying => {
                    session.connection_id += 1;
                    session.connected_at = Some(Utc::now());
                }
                SessionState::Disconnected => session.connected_at = None,
                SessionState::Connecting | SessionState::Active => {}
            }
            true
        });
    }
}
