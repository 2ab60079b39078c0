//! Command dispatch against the content store.
//!
//! [`CommandDispatcher::dispatch`] turns one decoded [`Command`] into at most
//! one [`Reply`]:
//!
//! | Command        | Reply                                                  |
//! |----------------|--------------------------------------------------------|
//! | `Heartbeat`    | always `HeartbeatEcho`                                 |
//! | `ListPins`     | `PinList`, with `None` when the store failed           |
//! | `Pin`/`Unpin`  | always `OpResult`, `ok=false` on failure or timeout    |
//! | `Upload`       | `UploadResult` on success; nothing on any failure      |
//! | `Download`     | `DownloadResult` on success; nothing on any failure    |
//! | `Unrecognized` | never                                                  |
//!
//! The dispatcher is transport-agnostic; the session layer decides which
//! commands run inline and which run on their own task.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tracing::{debug, info, warn};

use crate::config::StoreConfig;
use crate::protocol::{Command, OpKind, Reply};
use crate::session::heartbeat::HeartbeatMonitor;
use crate::store::ContentStore;

/// Routes commands to the content store.
#[derive(Clone)]
pub struct CommandDispatcher {
    store: Arc<dyn ContentStore>,
    op_timeout: Duration,
    list_timeout: Duration,
}

impl CommandDispatcher {
    /// Dispatcher using the store time budgets from `config`.
    #[must_use]
    pub fn new(store: Arc<dyn ContentStore>, config: &StoreConfig) -> Self {
        Self::with_timeouts(store, config.op_timeout(), config.list_timeout())
    }

    /// Dispatcher with explicit time budgets.
    #[must_use]
    pub fn with_timeouts(
        store: Arc<dyn ContentStore>,
        op_timeout: Duration,
        list_timeout: Duration,
    ) -> Self {
        Self {
            store,
            op_timeout,
            list_timeout,
        }
    }

    /// Execute `command` and produce its reply, if the protocol has one.
    pub async fn dispatch(&self, command: Command) -> Option<Reply> {
        match command {
            Command::Heartbeat { nonce } => Some(HeartbeatMonitor::on_heartbeat(nonce)),
            Command::ListPins => Some(self.list_pins().await),
            Command::Pin { cid } => Some(self.pin(cid).await),
            Command::Unpin { cid } => Some(self.unpin(cid).await),
            Command::Upload {
                request_id,
                name,
                payload,
            } => self.upload(request_id, &name, &payload).await,
            Command::Download { request_id, cid } => self.download(request_id, cid).await,
            Command::Unrecognized { verb, reason } => {
                debug!(verb, reason, "ignoring unrecognised frame");
                None
            }
        }
    }

    async fn list_pins(&self) -> Reply {
        match self.store.list_pinned(self.list_timeout).await {
            Ok(cids) => {
                debug!(count = cids.len(), "reporting pin set");
                Reply::PinList {
                    cids: Some(cids.into_iter().collect()),
                }
            }
            Err(err) => {
                warn!(error = %err, "pin listing failed");
                Reply::PinList { cids: None }
            }
        }
    }

    async fn pin(&self, cid: String) -> Reply {
        info!(cid, "pinning");
        match self.store.pin(&cid, self.op_timeout).await {
            Ok(()) => {
                info!(cid, "pinned");
                Reply::op_ok(OpKind::Pin, cid)
            }
            Err(err) => {
                warn!(cid, error = %err, "pin failed");
                Reply::op_failed(OpKind::Pin, cid, &err.to_string())
            }
        }
    }

    async fn unpin(&self, cid: String) -> Reply {
        info!(cid, "unpinning");
        match self.store.unpin(&cid, self.op_timeout).await {
            Ok(()) => {
                info!(cid, "unpinned");
                Reply::op_ok(OpKind::Unpin, cid)
            }
            Err(err) => {
                warn!(cid, error = %err, "unpin failed");
                Reply::op_failed(OpKind::Unpin, cid, &err.to_string())
            }
        }
    }

    async fn upload(&self, request_id: String, name: &str, payload: &str) -> Option<Reply> {
        let data = match STANDARD.decode(payload) {
            Ok(data) => data,
            Err(err) => {
                warn!(request_id, name, error = %err, "upload payload is not valid base64, dropping");
                return None;
            }
        };

        let size = data.len();
        match self.store.add(data, self.op_timeout).await {
            Ok(cid) => {
                info!(request_id, name, size, cid, "upload stored");
                Some(Reply::UploadResult { request_id, cid })
            }
            Err(err) => {
                warn!(request_id, name, size, error = %err, "upload failed, no reply sent");
                None
            }
        }
    }

    async fn download(&self, request_id: String, cid: String) -> Option<Reply> {
        match self.store.read(&cid, self.op_timeout).await {
            Ok(payload) => {
                info!(request_id, cid, size = payload.len(), "serving download");
                Some(Reply::DownloadResult {
                    request_id,
                    payload,
                })
            }
            Err(err) => {
                warn!(request_id, cid, error = %err, "download failed, no reply sent");
                None
            }
        }
    }
}
