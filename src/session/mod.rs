//! Coordinator session model and lifecycle.
//!
//! Submodules:
//! - `heartbeat`: heartbeat echo and the inbound idle deadline.
//! - `manager`: the connect / identify / read / retry loop.

pub mod heartbeat;
pub mod manager;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Connection state of the single coordinator session.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No transport open.
    Disconnected,
    /// Dialing the coordinator.
    Connecting,
    /// Transport open; identity frame being written.
    Identifying,
    /// Identified and serving commands.
    Active,
}

/// The one session owned by this process.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Session {
    /// Identity presented to the coordinator.
    pub peer_id: String,
    /// Current lifecycle state.
    pub state: SessionState,
    /// Count of transports that reached `Identifying`; 0 before the first.
    pub connection_id: u64,
    /// When the current transport was opened.
    pub connected_at: Option<DateTime<Utc>>,
    /// When the last inbound frame arrived.
    pub last_activity: Option<DateTime<Utc>>,
}

impl Session {
    /// A disconnected session for `peer_id`.
    #[must_use]
    pub fn new(peer_id: String) -> Self {
        Self {
            peer_id,
            state: SessionState::Disconnected,
            connection_id: 0,
            connected_at: None,
            last_activity: None,
        }
    }

    /// Determine whether a lifecycle transition is permitted.
    #[must_use]
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        matches!(
            (self.state, next),
            (SessionState::Disconnected, SessionState::Connecting)
                | (
                    SessionState::Connecting,
                    SessionState::Identifying | SessionState::Disconnected
                )
                | (
                    SessionState::Identifying,
                    SessionState::Active | SessionState::Disconnected
                )
                | (SessionState::Active, SessionState::Disconnected)
        )
    }
}
