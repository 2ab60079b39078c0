//! [`ContentStore`] backed by the Kubo `ipfs` command line.
//!
//! Each operation spawns one `ipfs` subprocess with `kill_on_drop(true)`,
//! so a timed-out or abandoned call also terminates the child.

use std::collections::BTreeSet;
use std::ffi::OsStr;
use std::io::Write;
use std::process::{Output, Stdio};
use std::time::Duration;

use tempfile::NamedTempFile;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::StoreConfig;
use crate::protocol::single_line;
use crate::store::{bounded, ContentStore, StoreFuture};
use crate::{AppError, Result};

/// Kubo CLI adapter.
#[derive(Debug, Clone)]
pub struct KuboStore {
    config: StoreConfig,
}

impl KuboStore {
    /// Create an adapter invoking `config.ipfs_bin`.
    #[must_use]
    pub fn new(config: StoreConfig) -> Self {
        Self { config }
    }

    /// Run `ipfs <args>` to completion and return its stdout.
    async fn exec<I, S>(&self, args: I) -> Result<Vec<u8>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let output = Command::new(&self.config.ipfs_bin)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| {
                AppError::Store(format!("failed to run {}: {err}", self.config.ipfs_bin))
            })?;

        if output.status.success() {
            Ok(output.stdout)
        } else {
            Err(AppError::Store(failure_detail(&output)))
        }
    }

    async fn pin_inner(&self, cid: &str) -> Result<()> {
        validate_cid(cid)?;
        if self.config.prefetch_before_pin {
            self.exec(["refs", "-r", cid])
                .await
                .map_err(|err| AppError::Store(format!("fetch failed: {err}")))?;
            debug!(cid, "prefetch complete");
        }
        self.exec(["pin", "add", cid]).await.map(drop)
    }

    async fn add_inner(&self, data: Vec<u8>) -> Result<String> {
        // Temp file is removed when `staged` drops.
        let staged = tokio::task::spawn_blocking(move || -> Result<NamedTempFile> {
            let mut file = tempfile::Builder::new()
                .prefix("upload-")
                .suffix(".bin")
                .tempfile()?;
            file.write_all(&data)?;
            file.flush()?;
            Ok(file)
        })
        .await
        .map_err(|err| AppError::Io(format!("staging task panicked: {err}")))??;

        let path = staged.path().as_os_str();
        let stdout = if self.config.pin_on_add {
            self.exec([OsStr::new("add"), OsStr::new("-Q"), path]).await?
        } else {
            self.exec([
                OsStr::new("add"),
                OsStr::new("--pin=false"),
                OsStr::new("-Q"),
                path,
            ])
            .await?
        };

        let cid = String::from_utf8_lossy(&stdout).trim().to_owned();
        if cid.is_empty() {
            return Err(AppError::Store("ipfs add returned no identifier".into()));
        }
        Ok(cid)
    }
}

impl ContentStore for KuboStore {
    fn peer_id(&self, timeout: Duration) -> StoreFuture<'_, String> {
        Box::pin(async move {
            let stdout = bounded("ipfs id", timeout, self.exec(["id", "-f=<id>"]))
                .await
                .map_err(|err| AppError::Identity(format!("ipfs id failed: {err}")))?;
            let peer_id = String::from_utf8_lossy(&stdout).trim().to_owned();
            if peer_id.is_empty() {
                return Err(AppError::Identity("empty peer id from ipfs id".into()));
            }
            Ok(peer_id)
        })
    }

    fn pin<'a>(&'a self, cid: &'a str, timeout: Duration) -> StoreFuture<'a, ()> {
        Box::pin(bounded("pin", timeout, self.pin_inner(cid)))
    }

    fn unpin<'a>(&'a self, cid: &'a str, timeout: Duration) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            validate_cid(cid)?;
            let deadline = Instant::now() + timeout;
            bounded("unpin", timeout, self.exec(["pin", "rm", cid])).await?;

            if self.config.gc_after_unpin {
                // Collection shares the unpin budget; failure does not undo the unpin.
                let remaining = deadline.saturating_duration_since(Instant::now());
                match bounded("repo gc", remaining, self.exec(["repo", "gc", "--quiet"])).await {
                    Ok(_) => debug!(cid, "repo gc after unpin complete"),
                    Err(err) => warn!(cid, error = %err, "repo gc after unpin failed"),
                }
            }
            Ok(())
        })
    }

    fn list_pinned(&self, timeout: Duration) -> StoreFuture<'_, BTreeSet<String>> {
        Box::pin(async move {
            let stdout = bounded(
                "pin ls",
                timeout,
                self.exec(["pin", "ls", "--type=recursive"]),
            )
            .await?;
            Ok(parse_pin_listing(&String::from_utf8_lossy(&stdout)))
        })
    }

    fn add(&self, data: Vec<u8>, timeout: Duration) -> StoreFuture<'_, String> {
        Box::pin(bounded("add", timeout, self.add_inner(data)))
    }

    fn read<'a>(&'a self, cid: &'a str, timeout: Duration) -> StoreFuture<'a, Vec<u8>> {
        Box::pin(async move {
            validate_cid(cid)?;
            bounded("cat", timeout, self.exec(["cat", cid])).await
        })
    }
}

/// Extract identifiers from `ipfs pin ls` output (`<cid> <type>` per line).
#[must_use]
pub fn parse_pin_listing(listing: &str) -> BTreeSet<String> {
    listing
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_owned)
        .collect()
}

/// Reject identifiers the CLI would parse as options.
fn validate_cid(cid: &str) -> Result<()> {
    if cid.is_empty() || cid.starts_with('-') || cid.chars().any(char::is_whitespace) {
        return Err(AppError::Store(format!(
            "invalid content identifier {cid:?}"
        )));
    }
    Ok(())
}

fn failure_detail(output: &Output) -> String {
    let mut detail = String::from_utf8_lossy(&output.stderr).trim().to_owned();
    let stdout = String::from_utf8_lossy(&output.stdout);
    if !stdout.trim().is_empty() {
        if !detail.is_empty() {
            detail.push(' ');
        }
        detail.push_str(stdout.trim());
    }
    if detail.is_empty() {
        detail = format!("ipfs exited with {}", output.status);
    }
    single_line(&detail)
}
