//! Error types shared across the agent.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all agent failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Dial, read, or write failure on the coordinator transport.
    Transport(String),
    /// A single inbound frame could not be framed or decoded.
    Protocol(String),
    /// Content store operation failed.
    Store(String),
    /// An operation exceeded its time budget.
    Timeout(String),
    /// The startup claim was rejected or could not be sent.
    Claim(String),
    /// The local peer identity could not be determined.
    Identity(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl AppError {
    /// Whether the error only spoils the current frame and the session may
    /// keep reading.
    #[must_use]
    pub fn is_recoverable_frame_error(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Store(msg) => write!(f, "store: {msg}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::Claim(msg) => write!(f, "claim: {msg}"),
            Self::Identity(msg) => write!(f, "identity: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
