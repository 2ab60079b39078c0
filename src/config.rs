//! Global configuration parsing, validation, and environment overrides.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::{AppError, Result};

/// Name of the token file looked up next to the executable.
pub const DEFAULT_TOKEN_FILE: &str = "provider.token";

fn default_coordinator_url() -> String {
    "ws://localhost:9090".into()
}

fn default_true() -> bool {
    true
}

fn default_handshake_seconds() -> u64 {
    15
}

fn default_max_frame_bytes() -> usize {
    64 * 1024 * 1024
}

fn default_outbound_queue() -> usize {
    256
}

fn default_dial_retry_seconds() -> u64 {
    3
}

fn default_reconnect_seconds() -> u64 {
    5
}

fn default_idle_seconds() -> u64 {
    600
}

fn default_shutdown_grace_seconds() -> u64 {
    5
}

fn default_ipfs_bin() -> String {
    "ipfs".into()
}

fn default_op_timeout_seconds() -> u64 {
    100
}

fn default_list_timeout_seconds() -> u64 {
    8
}

fn default_backend_url() -> String {
    "http://localhost:3001".into()
}

fn default_claim_timeout_seconds() -> u64 {
    15
}

/// Coordinator transport settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TransportConfig {
    /// Time allowed for the TCP connect plus WebSocket upgrade.
    #[serde(default = "default_handshake_seconds")]
    pub handshake_seconds: u64,
    /// Send `ngrok-skip-browser-warning` and `Origin` on the upgrade request.
    #[serde(default = "default_true")]
    pub send_tunnel_headers: bool,
    /// Additional headers for the WebSocket upgrade request.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Largest inbound frame accepted before it is rejected.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    /// Capacity of the per-connection outbound reply queue.
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            handshake_seconds: default_handshake_seconds(),
            send_tunnel_headers: true,
            headers: BTreeMap::new(),
            max_frame_bytes: default_max_frame_bytes(),
            outbound_queue: default_outbound_queue(),
        }
    }
}

impl TransportConfig {
    /// Handshake budget as a [`Duration`].
    #[must_use]
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_seconds)
    }
}

/// Session lifecycle timings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionConfig {
    /// Cooldown after a dial that never connected.
    #[serde(default = "default_dial_retry_seconds")]
    pub dial_retry_seconds: u64,
    /// Cooldown after an established session was lost.
    #[serde(default = "default_reconnect_seconds")]
    pub reconnect_seconds: u64,
    /// Inbound silence tolerated before the transport is presumed half-open.
    #[serde(default = "default_idle_seconds")]
    pub idle_seconds: u64,
    /// Upper bound on waiting for in-flight commands at shutdown.
    #[serde(default = "default_shutdown_grace_seconds")]
    pub shutdown_grace_seconds: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            dial_retry_seconds: default_dial_retry_seconds(),
            reconnect_seconds: default_reconnect_seconds(),
            idle_seconds: default_idle_seconds(),
            shutdown_grace_seconds: default_shutdown_grace_seconds(),
        }
    }
}

impl SessionConfig {
    /// Cooldown after a failed dial.
    #[must_use]
    pub fn dial_retry(&self) -> Duration {
        Duration::from_secs(self.dial_retry_seconds)
    }

    /// Cooldown after losing an active session.
    #[must_use]
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_seconds)
    }

    /// Idle window for liveness detection.
    #[must_use]
    pub fn idle_window(&self) -> Duration {
        Duration::from_secs(self.idle_seconds)
    }

    /// Grace period for in-flight work at shutdown.
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }
}

/// Local content store settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct StoreConfig {
    /// Path or name of the `ipfs` executable.
    #[serde(default = "default_ipfs_bin")]
    pub ipfs_bin: String,
    /// Budget for pin, unpin, add, and read.
    #[serde(default = "default_op_timeout_seconds")]
    pub op_timeout_seconds: u64,
    /// Budget for enumerating pins.
    #[serde(default = "default_list_timeout_seconds")]
    pub list_timeout_seconds: u64,
    /// Keep a pin on content added through `upload`.
    #[serde(default)]
    pub pin_on_add: bool,
    /// Fetch the full DAG before pinning.
    #[serde(default)]
    pub prefetch_before_pin: bool,
    /// Run repository garbage collection after a successful unpin.
    #[serde(default)]
    pub gc_after_unpin: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            ipfs_bin: default_ipfs_bin(),
            op_timeout_seconds: default_op_timeout_seconds(),
            list_timeout_seconds: default_list_timeout_seconds(),
            pin_on_add: false,
            prefetch_before_pin: false,
            gc_after_unpin: false,
        }
    }
}

impl StoreConfig {
    /// Budget for a single pin, unpin, add, or read.
    #[must_use]
    pub fn op_timeout(&self) -> Duration {
        Duration::from_secs(self.op_timeout_seconds)
    }

    /// Budget for listing pins.
    #[must_use]
    pub fn list_timeout(&self) -> Duration {
        Duration::from_secs(self.list_timeout_seconds)
    }
}

/// One-time provider claim settings. Absent in bootstrap deployments.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ClaimConfig {
    /// Base HTTP URL of the backend.
    #[serde(default = "default_backend_url")]
    pub backend_url: String,
    /// Token file; defaults to `provider.token` next to the executable.
    #[serde(default)]
    pub token_file: Option<PathBuf>,
    /// HTTP request timeout.
    #[serde(default = "default_claim_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Remove the token file once the claim succeeded.
    #[serde(default)]
    pub delete_token_after_claim: bool,
}

impl Default for ClaimConfig {
    fn default() -> Self {
        Self {
            backend_url: default_backend_url(),
            token_file: None,
            timeout_seconds: default_claim_timeout_seconds(),
            delete_token_after_claim: false,
        }
    }
}

impl ClaimConfig {
    /// Full URL of the claim endpoint.
    #[must_use]
    pub fn claim_url(&self) -> String {
        format!("{}/providers/claim", self.backend_url.trim_end_matches('/'))
    }

    /// Resolved token file path.
    #[must_use]
    pub fn token_path(&self) -> PathBuf {
        self.token_file
            .clone()
            .unwrap_or_else(|| exe_dir().join(DEFAULT_TOKEN_FILE))
    }

    /// Request timeout as a [`Duration`].
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Coordinator endpoint; the scheme selects the transport.
    #[serde(default = "default_coordinator_url")]
    pub coordinator_url: String,
    /// Transport tuning.
    #[serde(default)]
    pub transport: TransportConfig,
    /// Session lifecycle timings.
    #[serde(default)]
    pub session: SessionConfig,
    /// Local content store settings.
    #[serde(default)]
    pub store: StoreConfig,
    /// Startup claim; `None` runs without claiming.
    #[serde(default)]
    pub claim: Option<ClaimConfig>,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            coordinator_url: default_coordinator_url(),
            transport: TransportConfig::default(),
            session: SessionConfig::default(),
            store: StoreConfig::default(),
            claim: None,
        }
    }
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and validate it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from the process environment, then re-validate.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the overridden values fail validation.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup, then re-validate.
    ///
    /// Blank values are ignored. `BACKEND_WS_URL` takes precedence over
    /// `BOOTSTRAP_WS_URL`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the overridden values fail validation.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
        };

        if let Some(url) = get("BACKEND_WS_URL").or_else(|| get("BOOTSTRAP_WS_URL")) {
            debug!(url, "coordinator url overridden from environment");
            self.coordinator_url = url;
        }
        if let Some(bin) = get("IPFS_BIN") {
            self.store.ipfs_bin = bin;
        }
        if let Some(flag) = get("PIN_ON_BOOTSTRAP") {
            self.store.pin_on_add = flag.eq_ignore_ascii_case("true");
        }
        if let Some(url) = get("BACKEND_HTTP_URL") {
            if let Some(claim) = self.claim.as_mut() {
                claim.backend_url = url;
            }
        }

        self.validate()
    }

    /// Check URL schemes and that every duration is positive.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        let url = self.coordinator_url.as_str();
        if !["ws://", "wss://", "tcp://"]
            .iter()
            .any(|scheme| url.starts_with(scheme))
        {
            return Err(AppError::Config(format!(
                "coordinator_url must use ws://, wss:// or tcp://, got {url:?}"
            )));
        }

        let durations = [
            ("transport.handshake_seconds", self.transport.handshake_seconds),
            ("session.dial_retry_seconds", self.session.dial_retry_seconds),
            ("session.reconnect_seconds", self.session.reconnect_seconds),
            ("session.idle_seconds", self.session.idle_seconds),
            ("store.op_timeout_seconds", self.store.op_timeout_seconds),
            ("store.list_timeout_seconds", self.store.list_timeout_seconds),
        ];
        for (name, value) in durations {
            if value == 0 {
                return Err(AppError::Config(format!(
                    "{name} must be greater than zero"
                )));
            }
        }

        if self.transport.outbound_queue == 0 {
            return Err(AppError::Config(
                "transport.outbound_queue must be greater than zero".into(),
            ));
        }

        if let Some(claim) = &self.claim {
            if claim.timeout_seconds == 0 {
                return Err(AppError::Config(
                    "claim.timeout_seconds must be greater than zero".into(),
                ));
            }
            if !claim.backend_url.starts_with("http://") && !claim.backend_url.starts_with("https://")
            {
                return Err(AppError::Config(format!(
                    "claim.backend_url must be an http(s) url, got {:?}",
                    claim.backend_url
                )));
            }
        }

        Ok(())
    }
}

/// Directory holding the running executable, or `.` when unknown.
fn exe_dir() -> PathBuf {
    env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}
